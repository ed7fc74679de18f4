//! Run context - cancellation and progress hooks
//!
//! These traits let the engine report what it is doing without depending
//! on a particular terminal or UI crate.

use crate::types::{NodeOutcome, Operation, RunReport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag for cooperative cancellation.
///
/// Cloning shares the flag. The provisioner checks it between nodes; a
/// node whose provider call already started runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Progress callback for apply and destroy runs
///
/// Node events may arrive from worker threads, so implementations must
/// be `Sync`.
pub trait ProgressCallback: Send + Sync {
    /// Called when a wave of independent nodes is about to run
    fn on_wave_start(&self, operation: Operation, wave: usize, count: usize);

    /// Called when a node starts
    fn on_node_start(&self, graph_id: &str, node_id: &str, kind: &str);

    /// Called when a node has an outcome
    fn on_node_complete(&self, graph_id: &str, node_id: &str, outcome: &NodeOutcome);

    /// Called once the run is finished
    fn on_run_complete(&self, _report: &RunReport) {}
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_wave_start(&self, _operation: Operation, _wave: usize, _count: usize) {}
    fn on_node_start(&self, _graph_id: &str, _node_id: &str, _kind: &str) {}
    fn on_node_complete(&self, _graph_id: &str, _node_id: &str, _outcome: &NodeOutcome) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());

        token.cancel();
        assert!(other.is_cancelled());
    }
}
