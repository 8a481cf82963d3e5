//! The wire grammar: `CODE SP DEPTH SP PAYLOAD LF`, one frame per line.
//!
//! Adapted from this codebase's `ControlMethod` (a closed tag enum with
//! wire round-tripping and a `Display` impl) to short string tags instead
//! of numeric ids, since frames here are text lines rather than binary
//! descriptors.

use base64::Engine as _;
use std::fmt;

use crate::error::CodecError;

/// The tag of a protocol frame (spec §6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCode {
    Eval,
    EvalBlock,
    Call,
    Export,
    Return,
    Except,
    Error,
    Bye,
    Output,
    Stderr,
}

impl FrameCode {
    const fn tag(self) -> &'static str {
        match self {
            FrameCode::Eval => "EVAL",
            FrameCode::EvalBlock => "EVAL_BLOCK",
            FrameCode::Call => "CALL",
            FrameCode::Export => "EXPORT",
            FrameCode::Return => "RETURN",
            FrameCode::Except => "EXCEPT",
            FrameCode::Error => "ERROR",
            FrameCode::Bye => "BYE",
            FrameCode::Output => "OUTPUT",
            FrameCode::Stderr => "STDERR",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "EVAL" => FrameCode::Eval,
            "EVAL_BLOCK" => FrameCode::EvalBlock,
            "CALL" => FrameCode::Call,
            "EXPORT" => FrameCode::Export,
            "RETURN" => FrameCode::Return,
            "EXCEPT" => FrameCode::Except,
            "ERROR" => FrameCode::Error,
            "BYE" => FrameCode::Bye,
            "OUTPUT" => FrameCode::Output,
            "STDERR" => FrameCode::Stderr,
            _ => return None,
        })
    }
}

impl fmt::Display for FrameCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// One protocol frame: `(code, depth, payload)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: FrameCode,
    pub depth: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(code: FrameCode, depth: u32, payload: Vec<u8>) -> Self {
        Frame {
            code,
            depth,
            payload,
        }
    }

    pub fn empty(code: FrameCode, depth: u32) -> Self {
        Frame::new(code, depth, Vec::new())
    }

    /// Render as the wire line, including trailing `\n`.
    pub fn encode(&self) -> String {
        if self.payload.is_empty() {
            format!("{} {} \n", self.code, self.depth)
        } else {
            let b64 = base64::engine::general_purpose::STANDARD.encode(&self.payload);
            format!("{} {} {}\n", self.code, self.depth, b64)
        }
    }

    /// Parse one line (without its trailing `\n`) into a frame, or
    /// classify why it isn't one. A non-matching line is not itself an
    /// error at the `Channel` level (see [`crate::channel`]) — it is
    /// chatter — but the grammar still needs a precise rejection for
    /// lines that *look* like frames and are malformed.
    pub fn decode(line: &str) -> Result<Frame, CodecError> {
        let mut parts = line.splitn(3, ' ');
        let code_str = parts
            .next()
            .ok_or_else(|| CodecError::MalformedLine(line.to_string()))?;
        let depth_str = parts
            .next()
            .ok_or_else(|| CodecError::MalformedLine(line.to_string()))?;
        let payload_str = parts.next().unwrap_or("");

        let code = FrameCode::from_tag(code_str)
            .ok_or_else(|| CodecError::UnknownCode(code_str.to_string()))?;
        let depth: u32 = depth_str
            .parse()
            .map_err(|_| CodecError::BadDepth(depth_str.to_string()))?;
        let payload = if payload_str.is_empty() {
            Vec::new()
        } else {
            base64::engine::general_purpose::STANDARD
                .decode(payload_str)
                .map_err(|e| CodecError::BadBase64(e.to_string()))?
        };

        Ok(Frame::new(code, depth, payload))
    }

    /// Whether `line` looks enough like a frame to be worth attempting to
    /// decode (first token is a recognized code). Used by the Channel to
    /// decide frame vs. chatter without raising spurious `CodecError`s for
    /// ordinary interpreter output that merely starts with a capital word.
    pub fn looks_like_frame(line: &str) -> bool {
        line.split(' ')
            .next()
            .and_then(FrameCode::from_tag)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_payload() {
        let f = Frame::new(FrameCode::Return, 3, b"hello".to_vec());
        let line = f.encode();
        let decoded = Frame::decode(line.trim_end_matches('\n')).unwrap();
        assert_eq!(f, decoded);
    }

    #[test]
    fn roundtrip_empty_payload() {
        let f = Frame::empty(FrameCode::Bye, 0);
        let line = f.encode();
        let decoded = Frame::decode(line.trim_end_matches('\n')).unwrap();
        assert_eq!(f, decoded);
    }

    #[test]
    fn unknown_code_is_codec_error() {
        let err = Frame::decode("NOPE 0 ").unwrap_err();
        assert!(matches!(err, CodecError::UnknownCode(_)));
    }

    #[test]
    fn bad_depth_is_codec_error() {
        let err = Frame::decode("EVAL notanumber ").unwrap_err();
        assert!(matches!(err, CodecError::BadDepth(_)));
    }

    #[test]
    fn bad_base64_is_codec_error() {
        let err = Frame::decode("EVAL 0 not-valid-base64!!!").unwrap_err();
        assert!(matches!(err, CodecError::BadBase64(_)));
    }

    #[test]
    fn missing_depth_is_malformed() {
        let err = Frame::decode("EVAL").unwrap_err();
        assert!(matches!(err, CodecError::MalformedLine(_)));
    }

    #[test]
    fn looks_like_frame_rejects_chatter() {
        assert!(!Frame::looks_like_frame(">>> some banner"));
        assert!(Frame::looks_like_frame("EVAL 0 aGk="));
    }

    #[test]
    fn all_codes_roundtrip_through_tag() {
        let codes = [
            FrameCode::Eval,
            FrameCode::EvalBlock,
            FrameCode::Call,
            FrameCode::Export,
            FrameCode::Return,
            FrameCode::Except,
            FrameCode::Error,
            FrameCode::Bye,
            FrameCode::Output,
            FrameCode::Stderr,
        ];
        for code in codes {
            let tag = code.tag();
            assert_eq!(FrameCode::from_tag(tag), Some(code));
        }
    }
}
