//! Error taxonomy for the bridge: one enum per failure class named in the
//! protocol, each hand-rolled with `Display` + `std::error::Error` rather
//! than derived, matching the rest of this codebase's error style.

use std::fmt;

use crate::value::Value;

/// Launch or handshake failure. No [`crate::bond::Bond`] exists yet when
/// this is raised.
#[derive(Debug)]
pub enum SpawnError {
    /// The child process could not be started at all.
    Launch(std::io::Error),
    /// The interpreter's native prompt never appeared before the timeout.
    PromptTimeout,
    /// The prelude was injected but no READY marker followed.
    HandshakeFailed,
    /// An I/O error while talking to the child during handshake.
    Io(std::io::Error),
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::Launch(e) => write!(f, "failed to launch peer process: {e}"),
            SpawnError::PromptTimeout => write!(f, "timed out waiting for peer's native prompt"),
            SpawnError::HandshakeFailed => {
                write!(f, "peer did not confirm prelude load (no READY marker)")
            }
            SpawnError::Io(e) => write!(f, "i/o error during handshake: {e}"),
        }
    }
}

impl std::error::Error for SpawnError {}

/// The session has ended (clean `BYE`, fatal I/O, or timeout). All further
/// operations on the bond raise this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminatedException {
    pub reason: String,
}

impl fmt::Display for TerminatedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bond is closed: {}", self.reason)
    }
}

impl std::error::Error for TerminatedException {}

/// An exception raised on the peer side while evaluating or calling.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteException {
    /// Re-entrancy depth at which the exception was raised.
    pub depth: u32,
    /// Structured data if the bond negotiated transparent exceptions,
    /// otherwise the exception's printable message.
    pub data: ExceptionData,
}

/// Either a structured exception value (transparent mode) or a plain string.
#[derive(Debug, Clone, PartialEq)]
pub enum ExceptionData {
    Structured(Value),
    Message(String),
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            ExceptionData::Structured(v) => {
                write!(f, "remote exception at depth {}: {:?}", self.depth, v)
            }
            ExceptionData::Message(m) => {
                write!(f, "remote exception at depth {}: {m}", self.depth)
            }
        }
    }
}

impl std::error::Error for RemoteException {}

/// Which side failed to serialize a value or exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => write!(f, "local"),
            Side::Remote => write!(f, "remote"),
        }
    }
}

/// Encoding of a value or exception failed on one side of the bond.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializationException {
    pub side: Side,
    pub detail: String,
}

impl fmt::Display for SerializationException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "serialization exception ({}): {}",
            self.side, self.detail
        )
    }
}

impl std::error::Error for SerializationException {}

/// Local, pre-wire export failure: invalid name or name collision. Does
/// not consume a protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    InvalidName(String),
    NameUnavailable,
    AlreadyRegistered(String),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::InvalidName(n) => write!(f, "'{n}' is not a valid export name"),
            ExportError::NameUnavailable => {
                write!(f, "no name given and handler has no introspectable name")
            }
            ExportError::AlreadyRegistered(n) => {
                write!(f, "an export named '{n}' is already registered")
            }
        }
    }
}

impl std::error::Error for ExportError {}

/// A received line did not match the frame grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    UnknownCode(String),
    BadDepth(String),
    BadBase64(String),
    MalformedLine(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::UnknownCode(c) => write!(f, "unknown frame code: {c}"),
            CodecError::BadDepth(d) => write!(f, "malformed depth field: {d}"),
            CodecError::BadBase64(e) => write!(f, "malformed base64 payload: {e}"),
            CodecError::MalformedLine(l) => write!(f, "line does not match frame grammar: {l:?}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Umbrella error returned by every host-facing [`crate::bond::Bond`]
/// operation.
#[derive(Debug)]
pub enum BondError {
    Terminated(TerminatedException),
    Remote(RemoteException),
    Serialization(SerializationException),
    Export(ExportError),
    Codec(CodecError),
    Io(std::io::Error),
}

impl fmt::Display for BondError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BondError::Terminated(e) => write!(f, "{e}"),
            BondError::Remote(e) => write!(f, "{e}"),
            BondError::Serialization(e) => write!(f, "{e}"),
            BondError::Export(e) => write!(f, "{e}"),
            BondError::Codec(e) => write!(f, "{e}"),
            BondError::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for BondError {}

impl From<TerminatedException> for BondError {
    fn from(e: TerminatedException) -> Self {
        BondError::Terminated(e)
    }
}

impl From<RemoteException> for BondError {
    fn from(e: RemoteException) -> Self {
        BondError::Remote(e)
    }
}

impl From<SerializationException> for BondError {
    fn from(e: SerializationException) -> Self {
        BondError::Serialization(e)
    }
}

impl From<ExportError> for BondError {
    fn from(e: ExportError) -> Self {
        BondError::Export(e)
    }
}

impl From<CodecError> for BondError {
    fn from(e: CodecError) -> Self {
        BondError::Codec(e)
    }
}

impl From<std::io::Error> for BondError {
    fn from(e: std::io::Error) -> Self {
        BondError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_error_display() {
        assert_eq!(
            format!("{}", SpawnError::PromptTimeout),
            "timed out waiting for peer's native prompt"
        );
    }

    #[test]
    fn remote_exception_display_message() {
        let e = RemoteException {
            depth: 2,
            data: ExceptionData::Message("boom".into()),
        };
        assert!(format!("{e}").contains("depth 2"));
        assert!(format!("{e}").contains("boom"));
    }

    #[test]
    fn serialization_exception_side_display() {
        let e = SerializationException {
            side: Side::Remote,
            detail: "unpicklable".into(),
        };
        assert!(format!("{e}").contains("remote"));
    }

    #[test]
    fn export_error_display() {
        let e = ExportError::AlreadyRegistered("foo".into());
        assert!(format!("{e}").contains("foo"));
    }

    #[test]
    fn codec_error_display() {
        let e = CodecError::UnknownCode("WAT".into());
        assert!(format!("{e}").contains("WAT"));
    }

    #[test]
    fn bond_error_from_conversions() {
        let be: BondError = TerminatedException {
            reason: "bye".into(),
        }
        .into();
        assert!(matches!(be, BondError::Terminated(_)));

        let be: BondError = ExportError::NameUnavailable.into();
        assert!(matches!(be, BondError::Export(_)));
    }
}
