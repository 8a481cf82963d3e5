//! Serializer identity and the codecs a bond may negotiate at handshake.
//!
//! Mirrors the shape of this codebase's control-message codec: an
//! [`Encoding`] wire token plus a [`Codec`] trait with associated error
//! types, rather than a single hardcoded serializer.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// Wire token for the serializer a bond negotiated at handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// Compact binary format; the default.
    Postcard,
    /// Human-readable format, useful for debugging a session by eye.
    Json,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Postcard => write!(f, "postcard"),
            Encoding::Json => write!(f, "json"),
        }
    }
}

impl Encoding {
    /// The token sent to the peer during the `start(trans_except,
    /// serializer_identity)` handshake call (see spec §6.3).
    pub fn identity_token(&self) -> &'static str {
        match self {
            Encoding::Postcard => "postcard",
            Encoding::Json => "json",
        }
    }
}

/// Error produced while decoding an unrecognized serializer identity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEncoding(pub String);

impl fmt::Display for UnknownEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown serializer identity: {}", self.0)
    }
}

impl std::error::Error for UnknownEncoding {}

impl std::str::FromStr for Encoding {
    type Err = UnknownEncoding;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postcard" => Ok(Encoding::Postcard),
            "json" => Ok(Encoding::Json),
            other => Err(UnknownEncoding(other.to_string())),
        }
    }
}

/// A concrete encode/decode pair for one [`Encoding`].
pub trait Codec {
    const ENCODING: Encoding;
    type EncodeError: std::error::Error;
    type DecodeError: std::error::Error;

    fn encode<T: Serialize>(val: &T) -> Result<Vec<u8>, Self::EncodeError>;
    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, Self::DecodeError>;
}

pub struct PostcardCodec;

impl Codec for PostcardCodec {
    const ENCODING: Encoding = Encoding::Postcard;
    type EncodeError = postcard::Error;
    type DecodeError = postcard::Error;

    fn encode<T: Serialize>(val: &T) -> Result<Vec<u8>, Self::EncodeError> {
        postcard::to_allocvec(val)
    }

    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, Self::DecodeError> {
        postcard::from_bytes(buf)
    }
}

pub struct JsonCodec;

impl Codec for JsonCodec {
    const ENCODING: Encoding = Encoding::Json;
    type EncodeError = serde_json::Error;
    type DecodeError = serde_json::Error;

    fn encode<T: Serialize>(val: &T) -> Result<Vec<u8>, Self::EncodeError> {
        serde_json::to_vec(val)
    }

    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, Self::DecodeError> {
        serde_json::from_slice(buf)
    }
}

/// Encode with the codec selected by a runtime [`Encoding`] value. Bonds
/// hold `Encoding`, not a type parameter, since the serializer identity is
/// only known after the handshake completes.
pub fn encode_value<T: Serialize>(
    encoding: Encoding,
    val: &T,
) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
    match encoding {
        Encoding::Postcard => PostcardCodec::encode(val).map_err(|e| Box::new(e) as _),
        Encoding::Json => JsonCodec::encode(val).map_err(|e| Box::new(e) as _),
    }
}

pub fn decode_value<T: DeserializeOwned>(
    encoding: Encoding,
    buf: &[u8],
) -> Result<T, Box<dyn std::error::Error + Send + Sync>> {
    match encoding {
        Encoding::Postcard => PostcardCodec::decode(buf).map_err(|e| Box::new(e) as _),
        Encoding::Json => JsonCodec::decode(buf).map_err(|e| Box::new(e) as _),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn encoding_roundtrip_token() {
        for enc in [Encoding::Postcard, Encoding::Json] {
            let token = enc.identity_token();
            let parsed: Encoding = token.parse().unwrap();
            assert_eq!(enc, parsed);
        }
    }

    #[test]
    fn unknown_encoding_errors() {
        let result: Result<Encoding, _> = "msgpack".parse();
        assert!(result.is_err());
    }

    #[test]
    fn postcard_codec_roundtrip() {
        let v = Value::Str("hello".into());
        let bytes = PostcardCodec::encode(&v).unwrap();
        let back: Value = PostcardCodec::decode(&bytes).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn json_codec_is_human_readable() {
        let v = Value::Int(42);
        let bytes = JsonCodec::encode(&v).unwrap();
        let s = String::from_utf8(bytes).unwrap();
        assert!(s.contains("42"));
    }

    #[test]
    fn postcard_more_compact_than_json() {
        let v = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let pc = PostcardCodec::encode(&v).unwrap();
        let js = JsonCodec::encode(&v).unwrap();
        assert!(pc.len() < js.len());
    }

    #[test]
    fn encode_value_dispatches_by_encoding() {
        let v = Value::Bool(true);
        let bytes = encode_value(Encoding::Json, &v).unwrap();
        let back: Value = decode_value(Encoding::Json, &bytes).unwrap();
        assert_eq!(v, back);
    }
}
