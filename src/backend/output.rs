//! Sinks for a container's stdout/stderr.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Lines a [`LogBuffer`] keeps before dropping the oldest.
pub const DEFAULT_MAX_LINES: usize = 10_000;

/// Receives raw output chunks from an attached container.
///
/// Chunks arrive in order per stream but carry no line framing.
pub trait OutputConsumer: Send + Sync {
    fn stdout(&self, bytes: &[u8]);
    fn stderr(&self, bytes: &[u8]);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOutput;

impl OutputConsumer for NullOutput {
    fn stdout(&self, _bytes: &[u8]) {}
    fn stderr(&self, _bytes: &[u8]) {}
}

/// Forwards output to `tracing` at debug level, tagged with a label.
#[derive(Debug, Clone)]
pub struct TracingOutput {
    label: String,
}

impl TracingOutput {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl OutputConsumer for TracingOutput {
    fn stdout(&self, bytes: &[u8]) {
        for line in String::from_utf8_lossy(bytes).lines() {
            tracing::debug!(container = %self.label, "stdout: {}", line);
        }
    }

    fn stderr(&self, bytes: &[u8]) {
        for line in String::from_utf8_lossy(bytes).lines() {
            tracing::debug!(container = %self.label, "stderr: {}", line);
        }
    }
}

#[derive(Debug)]
struct LineState {
    lines: VecDeque<String>,
    max_lines: usize,
    partial_stdout: Vec<u8>,
    partial_stderr: Vec<u8>,
}

/// Collects complete output lines from both streams.
///
/// Clones share storage, so one clone can be handed to the container as its
/// sink while another is read by a wait strategy. Only the most recent
/// `max_lines` lines are kept.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    inner: Arc<Mutex<LineState>>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::with_max_lines(DEFAULT_MAX_LINES)
    }
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer keeping at most `max_lines` lines (at least one).
    pub fn with_max_lines(max_lines: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LineState {
                lines: VecDeque::new(),
                max_lines: max_lines.max(1),
                partial_stdout: Vec::new(),
                partial_stderr: Vec::new(),
            })),
        }
    }

    /// Snapshot of the complete lines still retained.
    pub fn lines(&self) -> Vec<String> {
        self.lock().lines.iter().cloned().collect()
    }

    /// Whether any complete line satisfies `predicate`.
    pub fn any_line(&self, predicate: impl Fn(&str) -> bool) -> bool {
        self.lock().lines.iter().any(|line| predicate(line))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LineState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, bytes: &[u8], stderr: bool) {
        let mut state = self.lock();
        let LineState {
            lines,
            max_lines,
            partial_stdout,
            partial_stderr,
        } = &mut *state;
        let partial = if stderr { partial_stderr } else { partial_stdout };

        // Decode whole lines only; a chunk may end inside a multi-byte char.
        partial.extend_from_slice(bytes);
        while let Some(pos) = partial.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if lines.len() == *max_lines {
                lines.pop_front();
            }
            lines.push_back(line.trim_end_matches(['\r', '\n']).to_string());
        }
    }
}

impl OutputConsumer for LogBuffer {
    fn stdout(&self, bytes: &[u8]) {
        self.push(bytes, false);
    }

    fn stderr(&self, bytes: &[u8]) {
        self.push(bytes, true);
    }
}
