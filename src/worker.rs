//! Coalescing single-flight workers.
//!
//! Both the repaint coordinator and the grouping stages are driven by the same
//! primitive: a long-lived task that sleeps until someone signals it, merges
//! everything that was signalled in the meantime and runs one unit of work.
//! See [`CoalescingWorker`] for the loop and [`StageWorker`] for the
//! parameter-capturing flavour used by the updater/painter pair.

mod coalescing;
mod stage;

pub use coalescing::{Coalesce, CoalescingWorker, WorkerPhase};
pub use stage::{RunFlag, StageParams, StageWorker};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the guard when a previous holder panicked.
///
/// None of the guarded values can be left half-updated by a panic (all
/// mutations are single assignments or `Vec` operations), so continuing with
/// the inner value is sound.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
