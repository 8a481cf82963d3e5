//! Per-peer-language knobs the Spawner and Exports registry need but this
//! crate does not hardcode: the native prompt, the prelude source, the
//! identifier grammar, and the reserved sentinel name.
//!
//! Concrete preludes are a collaborator's concern (spec.md explicitly
//! excludes "per-language prelude implementations" from this core); the
//! one concrete profile this repo ships lives in `transrepl-mockpeer`,
//! used only by the integration tests.

/// Everything the Spawner/Channel/Exports registry need to know about one
/// peer language, without baking a specific language into this crate.
#[derive(Clone, Copy)]
pub struct PeerProfile {
    /// Substring that marks the interpreter's native, pre-handshake prompt
    /// (e.g. `">>> "` for Python). Matched as a plain suffix, not a regex:
    /// every peer this crate has seen uses a fixed literal prompt.
    pub prompt_marker: &'static str,
    /// Source text loaded into the child to implement its side of the
    /// wire protocol.
    pub prelude_source: &'static str,
    /// Prefix the prelude uses for its own internal names, to keep them
    /// out of the way of user code evaluated in the same global scope.
    pub wrap_prefix: &'static str,
    /// Reserved identifier that can never be used as an export name.
    pub sentinel: &'static str,
    /// Peer-side tag prefix marking a captured stdout chunk outside the
    /// frame protocol (e.g. used for banner lines the prelude could not
    /// suppress).
    pub stdout_tag: &'static str,
    /// Same, for stderr.
    pub stderr_tag: &'static str,
}

impl PeerProfile {
    /// Checks a candidate export name against the peer's identifier
    /// grammar: alphanumeric + underscore, not starting with a digit, and
    /// never equal to the reserved sentinel.
    pub fn is_valid_identifier(&self, name: &str) -> bool {
        if name.is_empty() || name == self.sentinel {
            return false;
        }
        let mut chars = name.chars();
        let first = chars.next().expect("checked non-empty above");
        if first.is_ascii_digit() {
            return false;
        }
        if !(first.is_ascii_alphabetic() || first == '_') {
            return false;
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_PROFILE: PeerProfile = PeerProfile {
        prompt_marker: ">>> ",
        prelude_source: "",
        wrap_prefix: "__TR_BOND",
        sentinel: "SENTINEL",
        stdout_tag: "__TR_STDOUT__",
        stderr_tag: "__TR_STDERR__",
    };

    #[test]
    fn valid_identifiers() {
        assert!(TEST_PROFILE.is_valid_identifier("foo"));
        assert!(TEST_PROFILE.is_valid_identifier("_foo"));
        assert!(TEST_PROFILE.is_valid_identifier("foo_bar2"));
    }

    #[test]
    fn rejects_leading_digit() {
        assert!(!TEST_PROFILE.is_valid_identifier("2foo"));
    }

    #[test]
    fn rejects_sentinel() {
        assert!(!TEST_PROFILE.is_valid_identifier("SENTINEL"));
    }

    #[test]
    fn rejects_empty() {
        assert!(!TEST_PROFILE.is_valid_identifier(""));
    }

    #[test]
    fn rejects_punctuation() {
        assert!(!TEST_PROFILE.is_valid_identifier("foo-bar"));
        assert!(!TEST_PROFILE.is_valid_identifier("foo.bar"));
    }
}
