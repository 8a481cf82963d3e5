//! Destinations for non-protocol bytes: peer stdout/stderr chunks and
//! interpreter chatter (banners, echoed prompts, deprecation warnings).
//!
//! The Channel never discards a line silently — every line that isn't a
//! well-formed frame is routed to one of these.

use std::sync::Mutex;

/// Where a line of non-frame text goes.
pub trait Sink: Send + Sync {
    fn accept(&self, line: &str);
}

/// A sink that drops everything. Useful when a caller genuinely doesn't
/// care about one of the three streams.
pub struct NullSink;

impl Sink for NullSink {
    fn accept(&self, _line: &str) {}
}

/// A sink that forwards each line to `tracing` at a fixed level and target.
pub struct TracingSink {
    target: &'static str,
}

impl TracingSink {
    pub fn new(target: &'static str) -> Self {
        TracingSink { target }
    }
}

impl Sink for TracingSink {
    fn accept(&self, line: &str) {
        tracing::debug!(target: "transrepl::sink", stream = self.target, %line, "peer output");
    }
}

/// A sink that buffers every line it receives, for tests and for callers
/// that want to inspect peer output after the fact.
#[derive(Default)]
pub struct VecSink {
    lines: Mutex<Vec<String>>,
}

impl VecSink {
    pub fn new() -> Self {
        VecSink::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("VecSink mutex poisoned").clone()
    }
}

impl Sink for VecSink {
    fn accept(&self, line: &str) {
        self.lines
            .lock()
            .expect("VecSink mutex poisoned")
            .push(line.to_string());
    }
}

/// The three sinks a [`crate::channel::Channel`] routes non-frame lines to.
pub struct ChannelSinks {
    pub stdout: Box<dyn Sink>,
    pub stderr: Box<dyn Sink>,
    pub chatter: Box<dyn Sink>,
}

impl Default for ChannelSinks {
    fn default() -> Self {
        ChannelSinks {
            stdout: Box::new(TracingSink::new("stdout")),
            stderr: Box::new(TracingSink::new("stderr")),
            chatter: Box::new(TracingSink::new("chatter")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_sink_accumulates() {
        let sink = VecSink::new();
        sink.accept("one");
        sink.accept("two");
        assert_eq!(sink.lines(), vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn null_sink_drops() {
        let sink = NullSink;
        sink.accept("whatever");
    }
}
