//! In-flight call tracking for the stores' `is_loading` flag.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts remote calls currently in flight.
#[derive(Debug, Clone, Default)]
pub struct LoadingCounter {
    in_flight: Arc<AtomicUsize>,
}

impl LoadingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a call as started. The call ends when the guard is dropped.
    pub fn begin(&self) -> LoadingGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        LoadingGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }
}

/// Ends an in-flight call on drop, including on early return and cancellation.
#[derive(Debug)]
pub struct LoadingGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
