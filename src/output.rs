//! Output sinks for script-side `print` and `warn`.
//!
//! The bridge replaces the interpreter's default print mechanism; every
//! printed line is routed to the [`OutputSink`] installed on the bridge.

use std::cell::RefCell;

use tracing::{info, warn};

/// Channel a line of script output arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLevel {
    /// `print(...)`
    Print,
    /// `warn(...)`
    Warning,
}

/// Trait for handling script output.
pub trait OutputSink {
    /// Write one complete line at the given level.
    fn write(&self, level: OutputLevel, message: &str);
}

/// Default sink: forwards output to `tracing` under the `lua` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn write(&self, level: OutputLevel, message: &str) {
        match level {
            OutputLevel::Print => info!(target: "lua", "{message}"),
            OutputLevel::Warning => warn!(target: "lua", "{message}"),
        }
    }
}

/// Sink that keeps every line in memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    lines: RefCell<Vec<(OutputLevel, String)>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Printed lines, oldest first
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .borrow()
            .iter()
            .filter(|(level, _)| *level == OutputLevel::Print)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.lines
            .borrow()
            .iter()
            .filter(|(level, _)| *level == OutputLevel::Warning)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.lines.borrow_mut().clear();
    }
}

impl OutputSink for BufferSink {
    fn write(&self, level: OutputLevel, message: &str) {
        self.lines.borrow_mut().push((level, message.to_string()));
    }
}

/// A sink that discards all output.
pub struct NoOpSink;

impl OutputSink for NoOpSink {
    fn write(&self, _level: OutputLevel, _message: &str) {}
}
