//! Trace sinks: where dump and trace lines go.
//!
//! The trace surface is line-oriented text with no machine-readable schema.
//! Production stacks write to stdout; tests capture lines in memory.

use std::sync::Arc;

use parking_lot::Mutex;

pub type SinkRef = Arc<dyn TraceSink>;

pub trait TraceSink: Send + Sync {
    fn line(&self, line: &str);
}

/// Writes each line to stdout.
#[derive(Default)]
pub struct StdoutSink;

impl TraceSink for StdoutSink {
    fn line(&self, line: &str) {
        println!("{}", line);
    }
}

/// Collects lines in memory, for tests and offline inspection.
#[derive(Default)]
pub struct BufferSink {
    lines: Mutex<Vec<String>>,
}

impl BufferSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Drain everything written so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }
}

impl TraceSink for BufferSink {
    fn line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sink_collects_in_order() {
        let sink = BufferSink::new();
        sink.line("a");
        sink.line("b");
        assert_eq!(sink.lines(), vec!["a", "b"]);
        assert_eq!(sink.take(), vec!["a", "b"]);
        assert!(sink.lines().is_empty());
    }
}
