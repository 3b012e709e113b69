use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cancellation epoch.
///
/// Work captures the current value when it starts and drops its results if
/// the value moved on by the time they arrive.
#[derive(Debug, Clone, Default)]
pub struct Generation(Arc<AtomicU64>);

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Invalidate everything started so far; returns the new epoch
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, captured: u64) -> bool {
        self.current() == captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_invalidates_captured_value() {
        let generation = Generation::new();
        let captured = generation.current();
        assert!(generation.is_current(captured));

        let shared = generation.clone();
        assert_eq!(shared.bump(), captured + 1);
        assert!(!generation.is_current(captured));
    }
}
