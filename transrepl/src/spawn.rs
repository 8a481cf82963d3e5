//! Turns a raw interactive interpreter into a protocol endpoint (spec
//! §4.1/§6.3).
//!
//! The child-launch and stdio-wiring shape follows
//! `conformance/tests-runner`'s `spawn_harness`/`ChildIo`; the prompt-wait
//! + prelude-injection + READY-marker handshake sequence follows the
//! original bond implementation's `Spawn`/`expect`/`sendline` dance,
//! translated from a blocking `pexpect` loop into an async
//! `Channel::wait_for_marker` loop.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::bond::Bond;
use crate::channel::{Channel, SideChannelTags};
use crate::codec::Encoding;
use crate::error::SpawnError;
use crate::profile::PeerProfile;
use crate::sink::ChannelSinks;

/// Parameters for one [`spawn`] call. Mirrors how this codebase's
/// transports and sessions take explicit construction arguments instead
/// of reading ambient/global config.
pub struct SpawnConfig {
    pub command: String,
    pub args: Vec<String>,
    pub envs: HashMap<String, String>,
    /// Applies to the whole handshake, and later becomes the bond's
    /// session-wide `recv_frame` timeout (spec §5).
    pub timeout: Duration,
    pub trans_except: bool,
    pub encoding: Encoding,
    pub sinks: ChannelSinks,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        SpawnConfig {
            command: String::new(),
            args: Vec::new(),
            envs: HashMap::new(),
            timeout: Duration::from_secs(10),
            trans_except: true,
            encoding: Encoding::Postcard,
            sinks: ChannelSinks::default(),
        }
    }
}

/// Spawn `profile`'s interpreter per `config`, drive the handshake, and
/// return a ready-to-use [`Bond`]. On any failure the child is killed —
/// no zombies are left behind.
pub async fn spawn(profile: &PeerProfile, config: SpawnConfig) -> Result<Bond, SpawnError> {
    let mut command = Command::new(&config.command);
    command
        .args(&config.args)
        .envs(&config.envs)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(SpawnError::Launch)?;

    let stdin = child.stdin.take().expect("stdin was piped");
    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take();

    if let Some(stderr) = stderr {
        tokio::spawn(drain_os_stderr(stderr));
    }

    let tags = SideChannelTags {
        stdout_tag: profile.stdout_tag.to_string(),
        stderr_tag: profile.stderr_tag.to_string(),
    };
    let channel = Channel::from_child_stdio(stdin, stdout, tags, config.sinks);

    if let Err(e) = handshake(profile, &config, &channel).await {
        let _ = child.start_kill();
        let _ = child.wait().await;
        return Err(e);
    }

    Ok(Bond::new(
        child,
        channel,
        *profile,
        config.trans_except,
        config.encoding,
    ))
}

async fn handshake(
    profile: &PeerProfile,
    config: &SpawnConfig,
    channel: &Channel,
) -> Result<(), SpawnError> {
    channel
        .wait_for_marker(profile.prompt_marker, config.timeout)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut => SpawnError::PromptTimeout,
            _ => SpawnError::Io(e),
        })?;

    let ready_marker = format!("{}_READY", profile.wrap_prefix);
    let prelude_line = format!(
        "{prelude}\nprint(\"\\n{marker}\")",
        prelude = profile.prelude_source,
        marker = ready_marker
    );
    channel
        .send_raw_line(&prelude_line)
        .await
        .map_err(SpawnError::Io)?;

    channel
        .wait_for_marker(&ready_marker, config.timeout)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut => SpawnError::HandshakeFailed,
            _ => SpawnError::Io(e),
        })?;

    // also absorb the native prompt's re-echo right after our READY print,
    // so the channel is clean before the dispatch loop takes over.
    channel
        .wait_for_marker(profile.prompt_marker, config.timeout)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut => SpawnError::HandshakeFailed,
            _ => SpawnError::Io(e),
        })?;

    let start_line = format!(
        "{prefix}_start({trans_except}, \"{encoding}\")",
        prefix = profile.wrap_prefix,
        trans_except = config.trans_except,
        encoding = config.encoding.identity_token(),
    );
    channel
        .send_raw_line(&start_line)
        .await
        .map_err(SpawnError::Io)?;

    Ok(())
}

async fn drain_os_stderr(stderr: tokio::process::ChildStderr) {
    use tokio::io::{AsyncBufReadExt, BufReader};
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::warn!(target: "transrepl::spawn", %line, "peer stderr"),
            Ok(None) | Err(_) => break,
        }
    }
}
