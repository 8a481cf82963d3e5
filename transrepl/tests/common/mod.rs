//! Shared fixture for the integration tests below: spawns the compiled
//! `transrepl-mockpeer` binary, mirroring how `conformance/tests-runner`
//! spawns a compiled test-subject binary and drives it over stdio rather
//! than faking the transport in-process.
//!
//! The profile constants here must match the literals hardcoded in
//! `transrepl-mockpeer/src/main.rs` — there's no shared crate between a
//! `[[bin]]` and this test harness to enforce it at compile time.

use std::collections::HashMap;
use std::time::Duration;

use transrepl::sink::ChannelSinks;
use transrepl::{spawn, Bond, Encoding, PeerProfile, SpawnConfig};

pub const MOCK_PROFILE: PeerProfile = PeerProfile {
    prompt_marker: ">>> ",
    prelude_source: "",
    wrap_prefix: "__TR_BOND",
    sentinel: "SENTINEL",
    stdout_tag: "__TR_STDOUT__",
    stderr_tag: "__TR_STDERR__",
};

pub async fn spawn_mock(trans_except: bool, encoding: Encoding) -> Bond {
    let config = SpawnConfig {
        command: env!("CARGO_BIN_EXE_transrepl-mockpeer").to_string(),
        args: Vec::new(),
        envs: HashMap::new(),
        timeout: Duration::from_secs(5),
        trans_except,
        encoding,
        sinks: ChannelSinks::default(),
    };
    spawn(&MOCK_PROFILE, config)
        .await
        .expect("mockpeer spawns and completes the handshake")
}
