//! Re-entrant host/peer RPC bridge over a single interactive-interpreter
//! subprocess.
//!
//! A [`bond::Bond`] is spawned via [`spawn::spawn`] against a
//! [`profile::PeerProfile`] describing one peer language's native prompt,
//! prelude, and identifier grammar. Once spawned, the host evaluates
//! expressions and statements, calls peer functions, and exports host
//! functions the peer may call back into — even while a host-initiated
//! call is still outstanding.

pub mod bond;
pub mod channel;
pub mod codec;
pub mod error;
pub mod exports;
pub mod frame;
pub mod profile;
pub mod sink;
pub mod spawn;
pub mod value;

pub use bond::{Bond, Callable};
pub use codec::Encoding;
pub use error::{
    BondError, CodecError, ExceptionData, ExportError, RemoteException, SerializationException,
    Side, SpawnError, TerminatedException,
};
pub use exports::{ExportedFn, HostException};
pub use profile::PeerProfile;
pub use spawn::{spawn, SpawnConfig};
pub use value::Value;
