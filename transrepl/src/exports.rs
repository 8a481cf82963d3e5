//! The host-function registry a peer can call back into (spec §4.5).
//!
//! Shaped directly after this codebase's `MethodDispatcher`: a
//! `HashMap<Key, Arc<dyn Handler>>` with register/lookup/unregister and the
//! same "collision fails without replacing the existing entry" semantics —
//! adapted from numeric method ids to peer identifier strings.
//!
//! Handlers are async and receive the owning [`crate::bond::Bond`] so an
//! exported function can itself call back into the peer (spec §8's
//! "recursive inception" scenario) — a closure alone can't express this
//! without a boxed, lifetime-generic future, hence the hand-rolled
//! `BoxFuture`/`ExportedFn` pair instead of a plain `Fn`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::bond::Bond;
use crate::error::ExportError;
use crate::profile::PeerProfile;
use crate::value::Value;

/// Error raised by an exported handler while it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct HostException(pub String);

impl std::fmt::Display for HostException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for HostException {}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A host function the peer may invoke by name. Takes the owning bond so
/// a handler can issue its own `eval`/`call` while serving a call-in.
pub trait ExportedFn: Send + Sync {
    fn call<'a>(
        &'a self,
        bond: &'a Bond,
        args: Vec<Value>,
    ) -> BoxFuture<'a, Result<Value, HostException>>;
}

/// Wraps a plain synchronous closure (the common case: a handler that
/// doesn't need to call back into the peer).
pub struct SyncExport<F>(pub F);

impl<F> ExportedFn for SyncExport<F>
where
    F: Fn(Vec<Value>) -> Result<Value, HostException> + Send + Sync,
{
    fn call<'a>(
        &'a self,
        _bond: &'a Bond,
        args: Vec<Value>,
    ) -> BoxFuture<'a, Result<Value, HostException>> {
        let result = (self.0)(args);
        Box::pin(async move { result })
    }
}

/// Wraps a function that needs the bond, e.g. to call back into the peer
/// (spec §8's recursive-inception scenario). `F` must return an
/// already-boxed future since a bare `async fn` can't be named as a type.
pub struct AsyncExport<F>(pub F);

impl<F> ExportedFn for AsyncExport<F>
where
    F: for<'a> Fn(&'a Bond, Vec<Value>) -> BoxFuture<'a, Result<Value, HostException>>
        + Send
        + Sync,
{
    fn call<'a>(
        &'a self,
        bond: &'a Bond,
        args: Vec<Value>,
    ) -> BoxFuture<'a, Result<Value, HostException>> {
        (self.0)(bond, args)
    }
}

/// Name → handler registry owned by a [`crate::bond::Bond`].
#[derive(Default)]
pub struct ExportsRegistry {
    handlers: HashMap<String, Arc<dyn ExportedFn>>,
}

impl ExportsRegistry {
    pub fn new() -> Self {
        ExportsRegistry {
            handlers: HashMap::new(),
        }
    }

    /// Validate `name` against the peer's identifier grammar and register
    /// `handler` under it. Fails without touching the map on an invalid
    /// name or a collision with an existing entry — the prior entry, if
    /// any, is never replaced.
    pub fn register(
        &mut self,
        profile: &PeerProfile,
        name: &str,
        handler: Arc<dyn ExportedFn>,
    ) -> Result<(), ExportError> {
        if !profile.is_valid_identifier(name) {
            return Err(ExportError::InvalidName(name.to_string()));
        }
        if self.handlers.contains_key(name) {
            return Err(ExportError::AlreadyRegistered(name.to_string()));
        }
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<dyn ExportedFn>> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}
