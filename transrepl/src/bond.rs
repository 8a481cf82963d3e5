//! The host-side driver: one active session with one peer process (spec
//! §3/§4.4, the centerpiece of this crate).
//!
//! The re-entrant dispatch loop below implements spec.md §4.4's pseudocode
//! almost verbatim; its *shape* (a plain loop matching on an enum tag, `?`
//! propagation, `tracing` spans around each step) follows this codebase's
//! dispatcher/session style (`src/dispatch.rs`, the `session.run().await`
//! pattern referenced from `spec-subject/src/main.rs`). There is no
//! background reader task: spec.md §9 explicitly warns that one would risk
//! reordering `OUTPUT`/`STDERR` frames relative to terminal frames.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::process::Child;

use crate::channel::{terminate_child, Channel, ChannelError};
use crate::codec::{decode_value, encode_value, Encoding};
use crate::error::{
    BondError, CodecError, ExceptionData, ExportError, RemoteException, SerializationException,
    Side, TerminatedException,
};
use crate::exports::{ExportedFn, ExportsRegistry, HostException};
use crate::frame::{Frame, FrameCode};
use crate::profile::PeerProfile;
use crate::value::Value;

/// A call/export/close argument and result type, kept small and typed
/// rather than `Vec<u8>` since every caller in this crate needs a `Value`
/// in the end. Handshake-level byte payloads stay inside [`crate::frame`].
type HostResult<T> = Result<T, BondError>;

/// Whether a bond is still usable. Closed is terminal — no implicit
/// revival (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BondState {
    Open,
    Closed,
}

/// One active session with one peer process.
pub struct Bond {
    child: tokio::sync::Mutex<Child>,
    channel: Channel,
    exports: tokio::sync::Mutex<ExportsRegistry>,
    profile: PeerProfile,
    trans_except: bool,
    encoding: Encoding,
    closed: AtomicBool,
    /// Re-entrancy level of whatever request is currently outstanding: 0
    /// for a bare host-initiated `eval`/`eval_block`/`call`, or one past
    /// the depth of the `CALL` frame an export handler is reacting to.
    /// Since there is no background reader task (spec.md §9) exactly one
    /// request chain is ever live, so a single cell tracks it correctly.
    current_depth: AtomicU32,
}

impl Bond {
    pub(crate) fn new(
        child: Child,
        channel: Channel,
        profile: PeerProfile,
        trans_except: bool,
        encoding: Encoding,
    ) -> Self {
        Bond {
            child: tokio::sync::Mutex::new(child),
            channel,
            exports: tokio::sync::Mutex::new(ExportsRegistry::new()),
            profile,
            trans_except,
            encoding,
            closed: AtomicBool::new(false),
            current_depth: AtomicU32::new(0),
        }
    }

    fn state(&self) -> BondState {
        if self.closed.load(Ordering::Acquire) {
            BondState::Closed
        } else {
            BondState::Open
        }
    }

    fn check_open(&self) -> HostResult<()> {
        if self.state() == BondState::Closed {
            return Err(TerminatedException {
                reason: "bond already closed".to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn mark_closed(&self, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(target: "transrepl::bond", reason, "bond closing");
        self.channel.close().await;
        let mut child = self.child.lock().await;
        terminate_child(&mut child).await;
    }

    /// Evaluate `src` as an expression, returning its value.
    pub async fn eval(&self, src: &str) -> HostResult<Value> {
        self.check_open()?;
        let payload =
            encode_value(self.encoding, &src).map_err(|e| self.local_serialization_error(e))?;
        self.request(FrameCode::Eval, payload).await
    }

    /// Evaluate `src` as statements; no value is returned.
    pub async fn eval_block(&self, src: &str) -> HostResult<()> {
        self.check_open()?;
        let payload =
            encode_value(self.encoding, &src).map_err(|e| self.local_serialization_error(e))?;
        self.request(FrameCode::EvalBlock, payload).await?;
        Ok(())
    }

    /// Call a peer-defined function by name with positional arguments.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> HostResult<Value> {
        self.check_open()?;
        let payload = encode_value(self.encoding, &(name, args))
            .map_err(|e| self.local_serialization_error(e))?;
        self.request(FrameCode::Call, payload).await
    }

    /// Register a host function the peer can invoke by name.
    pub async fn export(
        &self,
        name: &str,
        handler: Arc<dyn ExportedFn>,
    ) -> Result<(), ExportError> {
        if self.state() == BondState::Closed {
            return Err(ExportError::NameUnavailable);
        }
        {
            let mut exports = self.exports.lock().await;
            exports.register(&self.profile, name, handler)?;
        }
        let payload =
            encode_value(self.encoding, &name).unwrap_or_else(|_| name.as_bytes().to_vec());
        // Export names are host-chosen and already validated; a failure
        // here is a protocol-level problem, not an export-registration
        // one, so surface it as best-effort (the registry entry stands
        // either way, matching spec.md's "entries live until session
        // close").
        let _ = self.request(FrameCode::Export, payload).await;
        Ok(())
    }

    /// Number of exports currently registered. Diagnostics/tests only.
    pub async fn export_count(&self) -> usize {
        self.exports.lock().await.len()
    }

    /// A reusable handle bound to one peer function name, so callers don't
    /// have to repeat the name at every call site.
    pub fn callable<'a>(&'a self, name: &str) -> Callable<'a> {
        Callable {
            bond: self,
            name: name.to_string(),
        }
    }

    /// Tear down the session: signal `BYE` if possible, then kill the
    /// child if still alive. Double-close is a no-op.
    pub async fn close(&self) {
        if self.state() == BondState::Closed {
            return;
        }
        let frame = Frame::empty(FrameCode::Bye, 0);
        let _ = self.channel.send_frame(&frame).await;
        self.mark_closed("explicit close").await;
    }

    fn local_serialization_error(
        &self,
        e: Box<dyn std::error::Error + Send + Sync>,
    ) -> BondError {
        SerializationException {
            side: Side::Local,
            detail: e.to_string(),
        }
        .into()
    }

    /// Send a request frame, then loop consuming frames until a terminal
    /// one arrives, dispatching any nested `CALL` frames along the way.
    /// This is spec.md §4.4's pseudocode.
    async fn request(&self, code: FrameCode, payload: Vec<u8>) -> HostResult<Value> {
        let depth = self.current_depth.load(Ordering::Acquire);
        if let Err(e) = self
            .channel
            .send_frame(&Frame::new(code, depth, payload))
            .await
        {
            return Err(self.fatal_from_channel_error(e).await);
        }

        loop {
            let frame = match self.channel.recv_frame().await {
                Ok(f) => f,
                Err(e) => return Err(self.fatal_from_channel_error(e).await),
            };

            match frame.code {
                FrameCode::Return => {
                    let value: Value = decode_value(self.encoding, &frame.payload)
                        .map_err(|e| self.local_serialization_error(e))?;
                    return Ok(value);
                }
                // ERROR: the peer's evaluation raised a genuine exception
                // (user code threw). Structured if the bond negotiated
                // transparent exceptions, otherwise a printable message.
                FrameCode::Error => {
                    let data = if self.trans_except {
                        let value: Value = decode_value(self.encoding, &frame.payload)
                            .map_err(|e| self.local_serialization_error(e))?;
                        ExceptionData::Structured(value)
                    } else {
                        let message = String::from_utf8_lossy(&frame.payload).into_owned();
                        ExceptionData::Message(message)
                    };
                    return Err(RemoteException {
                        depth: frame.depth,
                        data,
                    }
                    .into());
                }
                // EXCEPT: the peer could not serialize the return value
                // for our EVAL/EVAL_BLOCK/CALL. Always a serialization
                // failure on the remote side (spec §4.4).
                FrameCode::Except => {
                    let detail = String::from_utf8_lossy(&frame.payload).into_owned();
                    return Err(SerializationException {
                        side: Side::Remote,
                        detail,
                    }
                    .into());
                }
                FrameCode::Bye => {
                    self.mark_closed("peer sent BYE").await;
                    return Err(TerminatedException {
                        reason: "peer said BYE".to_string(),
                    }
                    .into());
                }
                FrameCode::Call => {
                    self.serve_call_in(&frame).await?;
                }
                // Channel::recv_frame forwards OUTPUT/STDERR frames to
                // their sinks internally and keeps reading; it never
                // returns them here. This arm only guards against that
                // invariant changing underfoot.
                FrameCode::Output | FrameCode::Stderr => {
                    continue;
                }
                // A well-formed frame with a code that can never be a
                // legal reply breaks the ping-pong invariant just as much
                // as a malformed line would — fatal per spec §4.4/§7.
                FrameCode::Eval | FrameCode::EvalBlock | FrameCode::Export => {
                    let err: BondError =
                        CodecError::UnknownCode(frame.code.to_string()).into();
                    self.mark_closed("peer sent an invalid reply code").await;
                    return Err(err);
                }
            }
        }
    }

    /// Serve one nested call-in: look up the export, invoke it, and reply
    /// with exactly one `RETURN` or `EXCEPT` at the same depth — the
    /// balanced-depth guarantee (spec §3 invariants, §4.4).
    async fn serve_call_in(&self, frame: &Frame) -> HostResult<()> {
        let (name, args): (String, Vec<Value>) = decode_value(self.encoding, &frame.payload)
            .map_err(|e| self.local_serialization_error(e))?;

        let handler = {
            let exports = self.exports.lock().await;
            exports.lookup(&name).cloned()
        };

        let Some(handler) = handler else {
            let detail = format!("no export named '{name}'");
            self.send_except(frame.depth, &detail).await?;
            return Ok(());
        };

        // Any call the handler makes back into the peer happens one level
        // deeper than this call-in; restore the previous depth once the
        // handler returns, since this call-in is itself nested inside
        // whatever chain invoked it.
        let prev_depth = self
            .current_depth
            .swap(frame.depth + 1, Ordering::AcqRel);
        let outcome = handler.call(self, args).await;
        self.current_depth.store(prev_depth, Ordering::Release);

        match outcome {
            Err(HostException(message)) => {
                self.send_except(frame.depth, &message).await?;
            }
            Ok(result) => match encode_value(self.encoding, &result) {
                Ok(payload) => {
                    let sent = self
                        .channel
                        .send_frame(&Frame::new(FrameCode::Return, frame.depth, payload))
                        .await;
                    if let Err(e) = sent {
                        return Err(self.fatal_from_channel_error(e).await);
                    }
                }
                Err(_) => {
                    self.send_except(frame.depth, "SerializationException:local")
                        .await?;
                }
            },
        }
        Ok(())
    }

    async fn send_except(&self, depth: u32, message: &str) -> HostResult<()> {
        let payload = if self.trans_except {
            encode_value(self.encoding, &message).unwrap_or_else(|_| message.as_bytes().to_vec())
        } else {
            message.as_bytes().to_vec()
        };
        match self
            .channel
            .send_frame(&Frame::new(FrameCode::Except, depth, payload))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fatal_from_channel_error(e).await),
        }
    }

    /// Every path through here is fatal per spec §4.4/§7: a codec error,
    /// an I/O error, or the peer's output stream ending all break the
    /// ping-pong invariant, so the bond transitions to Closed exactly
    /// once.
    async fn fatal_from_channel_error(&self, e: ChannelError) -> BondError {
        let err = match e {
            ChannelError::Eof => TerminatedException {
                reason: "peer closed its output stream".to_string(),
            }
            .into(),
            ChannelError::Codec(c) => BondError::from(c),
            ChannelError::Io(io) => BondError::from(io),
        };
        self.mark_closed("fatal channel error").await;
        err
    }
}

/// A peer function bound to a fixed name, returned by [`Bond::callable`].
pub struct Callable<'a> {
    bond: &'a Bond,
    name: String,
}

impl Callable<'_> {
    pub async fn invoke(&self, args: Vec<Value>) -> HostResult<Value> {
        self.bond.call(&self.name, args).await
    }
}
