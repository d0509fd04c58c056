//! Progress tracking for running exports
//!
//! Shared between a worker's pipeline (writer side) and queries listing the
//! worker's current item (reader side).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Rows written so far by the current export
#[derive(Debug)]
pub struct ProgressTracker {
    /// Number of rows written so far
    processed: AtomicU64,
    /// Start time of the current export
    start_time: std::sync::Mutex<Instant>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            start_time: std::sync::Mutex::new(Instant::now()),
        }
    }

    /// Start counting from zero for a new export
    pub fn reset(&self) {
        self.processed.store(0, Ordering::Relaxed);
        if let Ok(mut start) = self.start_time.lock() {
            *start = Instant::now();
        }
    }

    /// Record `count` more rows written
    pub fn add(&self, count: u64) -> u64 {
        self.processed.fetch_add(count, Ordering::Relaxed) + count
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Rows per second since the last reset
    pub fn rate(&self) -> f64 {
        let elapsed = self
            .start_time
            .lock()
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or_default();
        if elapsed > 0.0 {
            self.processed() as f64 / elapsed
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_reset() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.add(10), 10);
        assert_eq!(tracker.add(5), 15);
        assert_eq!(tracker.processed(), 15);
        tracker.reset();
        assert_eq!(tracker.processed(), 0);
        assert!(tracker.rate() >= 0.0);
    }
}
