//! Cooperative cancellation of analysis runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared flag requesting all analyses holding a clone of it to stop.
///
/// The analysis checks the flag once per iteration of its main loop
/// and leaves its reached set in a consistent and resumable state when it stops.
#[derive(Debug, Clone, Default)]
pub struct ShutdownNotifier {
    flag: Arc<AtomicBool>,
}

impl ShutdownNotifier {
    pub fn new() -> ShutdownNotifier {
        ShutdownNotifier::default()
    }

    /// Use an existing flag, e.g. one that is also set by a signal handler.
    pub fn from_flag(flag: Arc<AtomicBool>) -> ShutdownNotifier {
        ShutdownNotifier { flag }
    }

    /// Ask all analyses using this notifier to stop.
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
