//! Upload progress
//!
//! Part workers report completed byte counts through [`ProgressSink`]. The
//! terminal [`ProgressReporter`] keeps the counter under a single lock and
//! redraws one status line in place on every update:
//!
//! ```text
//! big.iso  52428800 / 125829120  (41.67%)
//! ```
//!
//! When progress is disabled no sink is installed at all, so workers skip
//! reporting without touching any lock.

use parking_lot::Mutex;
use std::io::{self, Write};

/// Receiver of completed byte counts
pub trait ProgressSink: Send + Sync {
    /// `bytes` more bytes reached the store
    fn bytes_completed(&self, bytes: u64);

    /// A new attempt starts from zero
    fn reset(&self) {}

    /// The upload finished successfully
    fn finish(&self) {}
}

/// Format a status line
pub fn render_line(name: &str, seen: u64, total: u64) -> String {
    let percentage = if total == 0 {
        100.0
    } else {
        seen as f64 / total as f64 * 100.0
    };
    format!("{}  {} / {}  ({:.2}%)", name, seen, total, percentage)
}

struct ProgressState {
    seen: u64,
    out: Box<dyn Write + Send>,
}

/// Single-line terminal progress reporter
pub struct ProgressReporter {
    name: String,
    total: u64,
    state: Mutex<ProgressState>,
}

impl ProgressReporter {
    /// Report to stdout
    pub fn new(name: impl Into<String>, total: u64) -> Self {
        Self::with_writer(name, total, Box::new(io::stdout()))
    }

    /// Report to any writer
    pub fn with_writer(name: impl Into<String>, total: u64, out: Box<dyn Write + Send>) -> Self {
        Self {
            name: name.into(),
            total,
            state: Mutex::new(ProgressState { seen: 0, out }),
        }
    }

    /// Bytes seen in the current attempt
    pub fn seen(&self) -> u64 {
        self.state.lock().seen
    }

    /// Current status line
    pub fn render(&self) -> String {
        render_line(&self.name, self.seen(), self.total)
    }

    fn draw(&self, state: &mut ProgressState, suffix: &str) {
        let line = render_line(&self.name, state.seen, self.total);
        let result = write!(state.out, "\r{}{}", line, suffix).and_then(|_| state.out.flush());
        if let Err(e) = result {
            tracing::debug!(error = %e, "Failed to draw progress line");
        }
    }
}

impl ProgressSink for ProgressReporter {
    fn bytes_completed(&self, bytes: u64) {
        let mut state = self.state.lock();
        state.seen = state.seen.saturating_add(bytes);
        self.draw(&mut state, "");
    }

    fn reset(&self) {
        self.state.lock().seen = 0;
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        self.draw(&mut state, "\r\n");
    }
}
