//! Holder for the most recently committed offscreen image.
//!
//! The [`ResultSlot`] is written by render jobs and read by the draw step.
//! Every write and read happens inside one critical section, so readers never
//! observe a half-written result. Writes are ordered by job sequence number:
//! a job that finishes late can never replace the output of a newer job.

use crate::render::{Rect, RenderJob};
use crate::worker::lock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Committed contents of a [`ResultSlot`].
#[derive(Debug, Clone)]
pub struct SlotContents<I> {
    /// The offscreen image
    pub image: I,
    /// Region the image was regenerated for (`None` = whole surface)
    pub valid_region: Option<Rect>,
    /// Sequence number of the job that produced the image
    pub generated_by: u64,
}

/// Result of trying to commit a job's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The image is now the slot's contents.
    Committed,
    /// The job was cancelled before it could commit. Output dropped.
    Cancelled,
    /// A newer job already committed. Output dropped.
    Superseded { current: u64 },
}

pub struct ResultSlot<I> {
    contents: Mutex<Option<SlotContents<I>>>,
    producers: Arc<AtomicUsize>,
}

impl<I> Default for ResultSlot<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> std::fmt::Debug for ResultSlot<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSlot")
            .field("generated_by", &self.generated_by())
            .field("producers", &self.producers())
            .finish_non_exhaustive()
    }
}

impl<I> ResultSlot<I> {
    pub fn new() -> Self {
        Self {
            contents: Mutex::new(None),
            producers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Stores `image` as the output of `job` unless the job was cancelled or a
    /// job with a higher sequence number already committed.
    pub fn commit(&self, job: &RenderJob, image: I) -> CommitOutcome {
        let previous = {
            let mut contents = lock(&self.contents);

            if job.is_cancelled() {
                return CommitOutcome::Cancelled;
            }

            let current = contents.as_ref().map_or(0, |c| c.generated_by);
            if job.seq() < current {
                return CommitOutcome::Superseded { current };
            }

            contents.replace(SlotContents {
                image,
                valid_region: job.region(),
                generated_by: job.seq(),
            })
        };

        // Release the replaced image outside the lock.
        drop(previous);
        CommitOutcome::Committed
    }

    /// Runs `f` against the committed contents while holding the slot lock.
    ///
    /// Returns `None` when nothing has been committed yet. Keep `f` short:
    /// committing jobs wait for it.
    pub fn with_contents<R>(&self, f: impl FnOnce(&SlotContents<I>) -> R) -> Option<R> {
        lock(&self.contents).as_ref().map(f)
    }

    /// Sequence number of the committed image, `0` when empty.
    pub fn generated_by(&self) -> u64 {
        lock(&self.contents).as_ref().map_or(0, |c| c.generated_by)
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.contents).is_none()
    }

    /// Drops the committed image. Sequence ordering restarts from zero.
    pub fn clear(&self) -> Option<SlotContents<I>> {
        lock(&self.contents).take()
    }

    /// Registers a running producer until the returned guard is dropped.
    pub fn begin_production(&self) -> ProductionGuard {
        self.producers.fetch_add(1, Ordering::AcqRel);
        ProductionGuard {
            producers: self.producers.clone(),
        }
    }

    /// Returns true while any job is producing an image for this slot.
    pub fn is_producing(&self) -> bool {
        self.producers() > 0
    }

    pub fn producers(&self) -> usize {
        self.producers.load(Ordering::Acquire)
    }
}

impl<I: Clone> ResultSlot<I> {
    /// Clone of the committed contents.
    pub fn snapshot(&self) -> Option<SlotContents<I>> {
        lock(&self.contents).clone()
    }
}

/// Keeps [`ResultSlot::is_producing`] true while alive.
#[derive(Debug)]
pub struct ProductionGuard {
    producers: Arc<AtomicUsize>,
}

impl Drop for ProductionGuard {
    fn drop(&mut self) {
        self.producers.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn job(seq: u64) -> RenderJob {
        RenderJob::new(seq, Some(Rect::new(0, 0, seq as u32, seq as u32)), CancellationToken::new())
    }

    #[test]
    fn newer_job_replaces_older() {
        let slot = ResultSlot::new();
        assert!(slot.is_empty());

        assert_eq!(slot.commit(&job(1), "one"), CommitOutcome::Committed);
        assert_eq!(slot.commit(&job(2), "two"), CommitOutcome::Committed);

        let contents = slot.snapshot().unwrap();
        assert_eq!(contents.image, "two");
        assert_eq!(contents.generated_by, 2);
        assert_eq!(contents.valid_region, Some(Rect::new(0, 0, 2, 2)));
    }

    #[test]
    fn late_older_job_is_rejected() {
        let slot = ResultSlot::new();
        assert_eq!(slot.commit(&job(5), "five"), CommitOutcome::Committed);
        assert_eq!(
            slot.commit(&job(4), "four"),
            CommitOutcome::Superseded { current: 5 }
        );
        assert_eq!(slot.generated_by(), 5);
        assert_eq!(slot.with_contents(|c| c.image), Some("five"));
    }

    #[test]
    fn cancelled_job_never_writes() {
        let slot = ResultSlot::new();
        let j = job(1);
        j.cancel();

        assert_eq!(slot.commit(&j, "stale"), CommitOutcome::Cancelled);
        assert!(slot.is_empty());
        assert_eq!(slot.generated_by(), 0);
    }

    #[test]
    fn concurrent_commits_keep_the_highest_sequence() {
        use rand::Rng;
        use std::time::Duration;

        for _round in 0..20 {
            let jobs = rand::rng().random_range(2..=6u64);
            let slot = Arc::new(ResultSlot::new());

            let threads: Vec<_> = (1..=jobs)
                .map(|seq| {
                    let slot = slot.clone();
                    let delay = rand::rng().random_range(0..3000);
                    std::thread::spawn(move || {
                        std::thread::sleep(Duration::from_micros(delay));
                        let outcome = slot.commit(&job(seq), seq);
                        (seq, outcome, slot.generated_by())
                    })
                })
                .collect();

            for t in threads {
                let (seq, outcome, after) = t.join().unwrap();
                assert!(after >= seq, "job {seq} saw the slot at {after}");
                match outcome {
                    CommitOutcome::Committed => {}
                    CommitOutcome::Superseded { current } => assert!(current > seq),
                    CommitOutcome::Cancelled => panic!("job {seq} was never cancelled"),
                }
            }

            let contents = slot.snapshot().unwrap();
            assert_eq!(contents.generated_by, jobs);
            assert_eq!(contents.image, jobs);
            assert_eq!(contents.valid_region, job(jobs).region());
        }
    }

    #[test]
    fn replaced_image_is_released() {
        let slot = ResultSlot::new();
        let first = Arc::new(1u8);
        slot.commit(&job(1), first.clone());
        assert_eq!(Arc::strong_count(&first), 2);

        slot.commit(&job(2), Arc::new(2u8));
        assert_eq!(Arc::strong_count(&first), 1);
    }

    #[test]
    fn production_guard_tracks_producers() {
        let slot: ResultSlot<()> = ResultSlot::new();
        assert!(!slot.is_producing());

        let a = slot.begin_production();
        let b = slot.begin_production();
        assert_eq!(slot.producers(), 2);

        drop(a);
        assert!(slot.is_producing());
        drop(b);
        assert!(!slot.is_producing());
    }

    #[test]
    fn clear_resets_ordering() {
        let slot = ResultSlot::new();
        slot.commit(&job(9), 9);
        assert_eq!(slot.clear().map(|c| c.image), Some(9));
        assert_eq!(slot.commit(&job(1), 1), CommitOutcome::Committed);
    }
}
