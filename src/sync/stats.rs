//! Convergence history and progress reporting. Grounded in the
//! `work_left_history` FIFO and `should_continue` comparison in
//! `original_source/client/device_synchronizer/device_synchronizer.cc`.

use std::collections::VecDeque;

/// Default depth of the bounded sample history (one sample
/// per second, 180 samples retained).
pub const DEFAULT_HISTORY_DEPTH: usize = 180;

/// Minimum number of samples before the convergence check is allowed to
/// fire.
pub const DEFAULT_WARM_UP: usize = 60;

/// A bounded FIFO of recent `unsynced_sector_count` samples.
#[derive(Debug, Clone)]
pub struct ConvergenceHistory {
    samples: VecDeque<u64>,
    depth: usize,
    warm_up: usize,
}

impl ConvergenceHistory {
    pub fn new(depth: usize, warm_up: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(depth),
            depth,
            warm_up,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_HISTORY_DEPTH, DEFAULT_WARM_UP)
    }

    /// Append a sample, trimming the oldest entry once the bound is hit.
    pub fn push(&mut self, unsynced: u64) {
        self.samples.push_back(unsynced);
        while self.samples.len() > self.depth {
            self.samples.pop_front();
        }
    }

    pub fn is_warmed_up(&self) -> bool {
        self.samples.len() >= self.warm_up
    }

    pub fn oldest(&self) -> Option<u64> {
        self.samples.front().copied()
    }

    pub fn newest(&self) -> Option<u64> {
        self.samples.back().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Pluggable convergence heuristic: the reference implementation compares
/// the newest sample against the oldest retained one, which is ambiguous
/// as a long-term heuristic but is kept as the default here, factored
/// behind this trait so a slope-based alternative can be substituted
/// without touching the sync loop.
pub trait ConvergencePolicy: Send + Sync {
    /// True if the workload should be declared non-convergent given the
    /// current history. Only ever called once `history.is_warmed_up()`.
    fn is_diverging(&self, history: &ConvergenceHistory) -> bool;
}

/// The default endpoints-comparison policy: declares non-convergence if
/// the most recent sample exceeds the oldest retained one, i.e. the dirty
/// count grew (or failed to shrink) across the window.
#[derive(Debug, Default, Clone, Copy)]
pub struct EndpointsConvergencePolicy;

impl ConvergencePolicy for EndpointsConvergencePolicy {
    fn is_diverging(&self, history: &ConvergenceHistory) -> bool {
        match (history.oldest(), history.newest()) {
            (Some(oldest), Some(newest)) => newest > oldest,
            _ => false,
        }
    }
}

/// Best-effort observability hooks.
/// Dropping an update must never affect correctness; implementations
/// should not block the calling synchronizer.
pub trait ProgressSink: Send + Sync {
    fn update_synced(&self, sectors: u64);
    fn update_unsynced(&self, sectors: u64);
}

/// A `ProgressSink` that discards every update, for callers with no
/// interest in progress (and for tests exercising only the terminal
/// outcome).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn update_synced(&self, _sectors: u64) {}
    fn update_unsynced(&self, _sectors: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_trims_to_its_bound() {
        let mut history = ConvergenceHistory::new(3, 2);
        for i in 0..5 {
            history.push(i);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.oldest(), Some(2));
        assert_eq!(history.newest(), Some(4));
    }

    #[test]
    fn endpoints_policy_requires_warm_up() {
        let mut history = ConvergenceHistory::new(10, 3);
        history.push(100);
        history.push(200);
        assert!(!history.is_warmed_up());
        assert!(!EndpointsConvergencePolicy.is_diverging(&history));
    }

    #[test]
    fn endpoints_policy_flags_growth_after_warm_up() {
        let mut history = ConvergenceHistory::new(10, 2);
        history.push(100);
        history.push(150);
        assert!(history.is_warmed_up());
        assert!(EndpointsConvergencePolicy.is_diverging(&history));
    }

    #[test]
    fn endpoints_policy_accepts_shrinkage() {
        let mut history = ConvergenceHistory::new(10, 2);
        history.push(150);
        history.push(100);
        assert!(!EndpointsConvergencePolicy.is_diverging(&history));
    }
}
