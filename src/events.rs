//! Repaint events and counters.
//!
//! Every [`RepaintCoordinator`](crate::render::RepaintCoordinator) publishes
//! [`RepaintEvent`]s on a broadcast bus. Subscribing is optional; events sent
//! while nobody listens are dropped. [`RepaintStats`] offers the same
//! information as plain counters for hosts that only want numbers.

use crate::render::{CanvasId, DiscardReason, PaintRequest, Rect};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub enum RepaintEvent {
    // ****************************************
    // ** Requests
    /// A burst of requests was merged into one
    RequestsMerged { canvas_id: CanvasId, request: PaintRequest },

    // ****************************************
    // ** Offscreen jobs
    /// A new offscreen job was dispatched
    JobStarted { canvas_id: CanvasId, seq: u64, region: Option<Rect> },
    /// A job was superseded by a newer one (or by quit)
    JobCancelled { canvas_id: CanvasId, seq: u64 },
    /// A job's image is now the slot contents
    JobCommitted { canvas_id: CanvasId, seq: u64, region: Option<Rect> },
    /// A job finished but its output was dropped
    JobDiscarded { canvas_id: CanvasId, seq: u64, reason: DiscardReason },
    /// The render function failed or panicked
    JobFailed { canvas_id: CanvasId, seq: u64, error: String },

    // ****************************************
    // ** Drawing / lifecycle
    /// The host canvas was asked to repaint
    Drawn { canvas_id: CanvasId, region: Option<Rect> },
    /// Coordinator has quit
    Quit { canvas_id: CanvasId },
}

/// Point-in-time copy of a coordinator's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepaintStats {
    /// Requests accepted by `enqueue`
    pub requests: u64,
    /// Merged batches handled by the coordinator loop
    pub merges: u64,
    pub jobs_started: u64,
    pub jobs_committed: u64,
    pub jobs_discarded: u64,
    pub jobs_failed: u64,
    /// Calls to the host canvas `repaint`
    pub draws: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub requests: AtomicU64,
    pub merges: AtomicU64,
    pub jobs_started: AtomicU64,
    pub jobs_committed: AtomicU64,
    pub jobs_discarded: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub draws: AtomicU64,
}

impl StatsCounters {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RepaintStats {
        RepaintStats {
            requests: self.requests.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_committed: self.jobs_committed.load(Ordering::Relaxed),
            jobs_discarded: self.jobs_discarded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            draws: self.draws.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_bumps() {
        let counters = StatsCounters::default();
        StatsCounters::bump(&counters.requests);
        StatsCounters::bump(&counters.requests);
        StatsCounters::bump(&counters.draws);

        let stats = counters.snapshot();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.draws, 1);
        assert_eq!(stats.jobs_started, 0);
    }

    #[test]
    fn events_debug_names() {
        let id = CanvasId::new();
        let a = RepaintEvent::Quit { canvas_id: id };
        let b = RepaintEvent::JobDiscarded {
            canvas_id: id,
            seq: 2,
            reason: DiscardReason::Superseded { current: 3 },
        };

        assert!(format!("{a:?}").contains("Quit"));
        assert!(format!("{b:?}").contains("Superseded"));
    }
}
