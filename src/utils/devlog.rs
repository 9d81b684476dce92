//! Per-thread capture of diagnostic lines.
//!
//! Query reports and [`crate::Warning`]s are written through [`devlog!`]
//! (or [`record`]) to the `idbquery::dev` log target. While a [`Capture`]
//! is alive on the current thread the same lines are also buffered, so a
//! test can assert on them without installing a global logger.
//!
//! [`devlog!`]: crate::devlog

use std::cell::RefCell;

/// Log target of every captured line.
pub const TARGET: &str = "idbquery::dev";

thread_local! {
    static BUFFER: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

fn with_buffer<R>(f: impl FnOnce(&mut Option<Vec<String>>) -> R) -> R {
    BUFFER.with(|b| f(&mut b.borrow_mut()))
}

/// Active capture on this thread. Dropping it restores whatever capture
/// was active before, so captures nest.
#[must_use = "lines are only captured while the guard is alive"]
pub struct Capture {
    outer: Option<Vec<String>>,
}

impl Drop for Capture {
    fn drop(&mut self) {
        let outer = self.outer.take();
        with_buffer(|b| *b = outer);
    }
}

pub fn capture() -> Capture {
    let outer = with_buffer(|b| b.replace(Vec::new()));
    Capture { outer }
}

/// Buffers `line` when a capture is active. Does not log.
pub fn record(line: &str) {
    with_buffer(|b| {
        if let Some(lines) = b {
            lines.push(line.to_owned());
        }
    });
}

/// Takes the captured lines, leaving the capture active and empty.
pub fn drain() -> Vec<String> {
    with_buffer(|b| b.as_mut().map(std::mem::take).unwrap_or_default())
}

/// Takes only the lines starting with `prefix`; the others stay buffered.
pub fn drain_matching(prefix: &str) -> Vec<String> {
    with_buffer(|b| {
        let Some(lines) = b else {
            return Vec::new();
        };
        let (hit, kept): (Vec<String>, Vec<String>) = std::mem::take(lines)
            .into_iter()
            .partition(|l| l.starts_with(prefix));
        *lines = kept;
        hit
    })
}

pub fn snapshot() -> Vec<String> {
    with_buffer(|b| b.clone().unwrap_or_default())
}

/// Formats a line, buffers it and logs it at debug level under [`TARGET`].
#[macro_export]
macro_rules! devlog {
    ($($arg:tt)*) => {{
        let line = format!($($arg)*);
        $crate::utils::devlog::record(&line);
        log::debug!(target: $crate::utils::devlog::TARGET, "{}", line);
    }};
}
