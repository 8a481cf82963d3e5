//! Owns a child's stdin/stdout and turns raw lines into frames or sink
//! traffic (spec §4.3).
//!
//! Grounded on `StreamTransport`/`StreamInner`'s shape (boxed
//! `AsyncRead`/`AsyncWrite` trait objects behind an async mutex, an
//! `AtomicBool` closed flag, `from_split`) and on the `ChildIo` pattern of
//! wrapping a child's piped stdio as a single stream pair — adapted from a
//! varint-length binary frame boundary to a newline text boundary, and from
//! a single combined `AsyncRead + AsyncWrite` stream to a split
//! reader/writer pair (a child's stdin and stdout are already split).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::CodecError;
use crate::frame::{Frame, FrameCode};
use crate::sink::ChannelSinks;

/// How long [`Channel::close`] spends draining any stdout still buffered
/// in the pipe before giving up. The child is already being torn down at
/// that point, so this only needs to catch output that arrived just
/// before the last frame, not wait indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug)]
pub enum ChannelError {
    /// The child closed its stdout (clean or otherwise) before a frame
    /// arrived.
    Eof,
    /// A line looked enough like a frame to attempt decoding but failed
    /// the grammar.
    Codec(CodecError),
    Io(std::io::Error),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Eof => write!(f, "peer closed its output stream"),
            ChannelError::Codec(e) => write!(f, "{e}"),
            ChannelError::Io(e) => write!(f, "i/o error reading from peer: {e}"),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<CodecError> for ChannelError {
    fn from(e: CodecError) -> Self {
        ChannelError::Codec(e)
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        ChannelError::Io(e)
    }
}

/// Tag prefixes a peer uses to mark a captured stdout/stderr chunk when it
/// cannot route that output through the frame protocol itself (banners
/// printed before the prelude takes over, signal handlers, etc).
pub struct SideChannelTags {
    pub stdout_tag: String,
    pub stderr_tag: String,
}

pub struct Channel {
    reader: AsyncMutex<BufReader<Box<dyn AsyncRead + Unpin + Send>>>,
    writer: AsyncMutex<Box<dyn AsyncWrite + Unpin + Send>>,
    sinks: ChannelSinks,
    tags: SideChannelTags,
    closed: AtomicBool,
}

impl Channel {
    pub fn new<R, W>(reader: R, writer: W, tags: SideChannelTags, sinks: ChannelSinks) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Channel {
            reader: AsyncMutex::new(BufReader::new(Box::new(reader))),
            writer: AsyncMutex::new(Box::new(writer)),
            sinks,
            tags,
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_child_stdio(
        stdin: ChildStdin,
        stdout: ChildStdout,
        tags: SideChannelTags,
        sinks: ChannelSinks,
    ) -> Self {
        Channel::new(stdout, stdin, tags, sinks)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Write the frame and flush. Does not wait for any reply.
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), ChannelError> {
        let line = frame.encode();
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read lines until one is a well-formed frame that isn't `OUTPUT`/
    /// `STDERR`, routing everything else — chatter *and* captured peer
    /// output/error frames — to the appropriate sink. Returns
    /// [`ChannelError::Eof`] if the stream ends first and
    /// [`ChannelError::Codec`] if a line looks like a frame but fails to
    /// parse (fatal — breaks the ping-pong invariant).
    pub async fn recv_frame(&self) -> Result<Frame, ChannelError> {
        let mut reader = self.reader.lock().await;
        loop {
            let mut buf = String::new();
            let n = reader.read_line(&mut buf).await?;
            if n == 0 {
                return Err(ChannelError::Eof);
            }
            let line = buf.trim_end_matches(['\n', '\r']);

            if Frame::looks_like_frame(line) {
                let frame = Frame::decode(line)?;
                match frame.code {
                    FrameCode::Output => {
                        self.sinks
                            .stdout
                            .accept(&String::from_utf8_lossy(&frame.payload));
                    }
                    FrameCode::Stderr => {
                        self.sinks
                            .stderr
                            .accept(&String::from_utf8_lossy(&frame.payload));
                    }
                    _ => return Ok(frame),
                }
                continue;
            }

            self.route_chatter(line);
        }
    }

    /// Send a raw source line (not a frame) during handshake, e.g. the
    /// prelude-injection line or the `start(...)` call.
    pub async fn send_raw_line(&self, line: &str) -> Result<(), std::io::Error> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    /// Read raw bytes until the accumulated tail matches `marker`, or
    /// `timeout` elapses. Used only during handshake, before the peer is
    /// speaking the frame protocol — prompts like `">>> "` have no
    /// trailing newline, so this reads byte-at-a-time rather than by
    /// line. ASCII markers only (handshake markers are never expected to
    /// contain multi-byte UTF-8).
    pub async fn wait_for_marker(
        &self,
        marker: &str,
        timeout: Duration,
    ) -> Result<(), std::io::Error> {
        use tokio::io::AsyncReadExt;
        let mut reader = self.reader.lock().await;
        let fut = async {
            let mut acc = String::new();
            let mut byte = [0u8; 1];
            loop {
                let n = reader.read(&mut byte).await?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "peer closed its output during handshake",
                    ));
                }
                acc.push(byte[0] as char);
                if acc.ends_with(marker) {
                    return Ok(());
                }
            }
        };
        tokio::time::timeout(timeout, fut).await.map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out waiting for marker")
        })?
    }

    fn route_chatter(&self, line: &str) {
        if let Some(rest) = line.strip_prefix(&self.tags.stdout_tag) {
            self.sinks.stdout.accept(rest);
        } else if let Some(rest) = line.strip_prefix(&self.tags.stderr_tag) {
            self.sinks.stderr.accept(rest);
        } else {
            self.sinks.chatter.accept(line);
        }
    }

    /// Signal close: drains any stdout still buffered in the pipe to
    /// sinks (never silently discarded) and marks the channel closed.
    /// Double-close is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drain = async {
            loop {
                let mut reader = self.reader.lock().await;
                let mut buf = String::new();
                match reader.read_line(&mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = buf.trim_end_matches(['\n', '\r']).to_string();
                        drop(reader);
                        self.route_chatter(&line);
                    }
                    Err(_) => break,
                }
            }
        };
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, drain).await;
    }
}

/// Best-effort teardown of the child associated with a channel: send
/// `BYE` if the channel is still open, then kill if the process is still
/// alive. Used by [`crate::bond::Bond::close`].
pub async fn terminate_child(child: &mut Child) {
    if let Ok(None) = child.try_wait() {
        let _ = child.start_kill();
    }
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameCode;
    use crate::sink::VecSink;
    use std::sync::Arc;

    fn tags() -> SideChannelTags {
        SideChannelTags {
            stdout_tag: "__TR_STDOUT__".to_string(),
            stderr_tag: "__TR_STDERR__".to_string(),
        }
    }

    #[tokio::test]
    async fn send_then_recv_over_duplex() {
        let (host_side, peer_side) = tokio::io::duplex(4096);
        let (host_r, host_w) = tokio::io::split(host_side);
        let (peer_r, peer_w) = tokio::io::split(peer_side);

        let host = Channel::new(host_r, host_w, tags(), ChannelSinks::default());
        let peer = Channel::new(peer_r, peer_w, tags(), ChannelSinks::default());

        let frame = Frame::new(FrameCode::Eval, 0, b"1+1".to_vec());
        host.send_frame(&frame).await.unwrap();
        let received = peer.recv_frame().await.unwrap();
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn chatter_is_routed_and_skipped() {
        let (host_side, peer_side) = tokio::io::duplex(4096);
        let (host_r, host_w) = tokio::io::split(host_side);
        let (peer_r, peer_w) = tokio::io::split(peer_side);

        let chatter = Arc::new(VecSink::new());
        let sinks = ChannelSinks {
            stdout: Box::new(VecSink::new()),
            stderr: Box::new(VecSink::new()),
            chatter: Box::new(ArcSink(chatter.clone())),
        };

        let host = Channel::new(host_r, host_w, tags(), ChannelSinks::default());
        let peer = Channel::new(peer_r, peer_w, tags(), sinks);

        {
            let mut w = host.writer.lock().await;
            w.write_all(b">>> some banner\n").await.unwrap();
            w.flush().await.unwrap();
        }
        let frame = Frame::new(FrameCode::Bye, 0, Vec::new());
        host.send_frame(&frame).await.unwrap();

        let received = peer.recv_frame().await.unwrap();
        assert_eq!(received, frame);
        assert_eq!(chatter.lines(), vec![">>> some banner".to_string()]);
    }

    #[tokio::test]
    async fn output_and_stderr_frames_route_to_sinks_not_the_caller() {
        let (host_side, peer_side) = tokio::io::duplex(4096);
        let (host_r, host_w) = tokio::io::split(host_side);
        let (peer_r, peer_w) = tokio::io::split(peer_side);

        let stdout = Arc::new(VecSink::new());
        let stderr = Arc::new(VecSink::new());
        let sinks = ChannelSinks {
            stdout: Box::new(ArcSink(stdout.clone())),
            stderr: Box::new(ArcSink(stderr.clone())),
            chatter: Box::new(VecSink::new()),
        };

        let host = Channel::new(host_r, host_w, tags(), ChannelSinks::default());
        let peer = Channel::new(peer_r, peer_w, tags(), sinks);

        host.send_frame(&Frame::new(FrameCode::Output, 0, b"hi there".to_vec()))
            .await
            .unwrap();
        host.send_frame(&Frame::new(FrameCode::Stderr, 0, b"uh oh".to_vec()))
            .await
            .unwrap();
        let terminal = Frame::new(FrameCode::Bye, 0, Vec::new());
        host.send_frame(&terminal).await.unwrap();

        let received = peer.recv_frame().await.unwrap();
        assert_eq!(received, terminal);
        assert_eq!(stdout.lines(), vec!["hi there".to_string()]);
        assert_eq!(stderr.lines(), vec!["uh oh".to_string()]);
    }

    #[tokio::test]
    async fn eof_before_frame_is_reported() {
        let (host_side, peer_side) = tokio::io::duplex(64);
        drop(host_side);
        let (peer_r, peer_w) = tokio::io::split(peer_side);
        let peer = Channel::new(peer_r, peer_w, tags(), ChannelSinks::default());
        let err = peer.recv_frame().await.unwrap_err();
        assert!(matches!(err, ChannelError::Eof));
    }

    #[tokio::test]
    async fn malformed_frame_like_line_is_codec_error() {
        let (host_side, peer_side) = tokio::io::duplex(4096);
        let (host_r, host_w) = tokio::io::split(host_side);
        let (peer_r, peer_w) = tokio::io::split(peer_side);
        let host = Channel::new(host_r, host_w, tags(), ChannelSinks::default());
        let peer = Channel::new(peer_r, peer_w, tags(), ChannelSinks::default());

        {
            let mut w = host.writer.lock().await;
            w.write_all(b"EVAL not-a-number \n").await.unwrap();
            w.flush().await.unwrap();
        }
        let err = peer.recv_frame().await.unwrap_err();
        assert!(matches!(err, ChannelError::Codec(_)));
    }

    #[tokio::test]
    async fn wait_for_marker_finds_prompt() {
        let (host_side, peer_side) = tokio::io::duplex(4096);
        let (host_r, host_w) = tokio::io::split(host_side);
        let (peer_r, peer_w) = tokio::io::split(peer_side);
        let host = Channel::new(host_r, host_w, tags(), ChannelSinks::default());
        let peer = Channel::new(peer_r, peer_w, tags(), ChannelSinks::default());

        host.send_raw_line("Python 3.11\n>>> ").await.unwrap();
        peer.wait_for_marker(">>> ", Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_for_marker_times_out() {
        let (_host_side, peer_side) = tokio::io::duplex(4096);
        let (peer_r, peer_w) = tokio::io::split(peer_side);
        let peer = Channel::new(peer_r, peer_w, tags(), ChannelSinks::default());
        let err = peer
            .wait_for_marker(">>> ", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }

    struct ArcSink(Arc<VecSink>);
    impl crate::sink::Sink for ArcSink {
        fn accept(&self, line: &str) {
            self.0.accept(line);
        }
    }
}
