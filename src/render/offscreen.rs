//! Background regeneration of the offscreen image.
//!
//! Each [`RenderJob`] runs the host render function on the blocking pool and
//! commits the output into the shared [`ResultSlot`]. Starting a job cancels
//! every job still running, so at most one job is live at any time.
//! Cancelled jobs keep running until their next checkpoint, but nothing they
//! produce reaches the slot.

use crate::errors::RenderError;
use crate::render::{CommitOutcome, Rect, RenderContext, RenderJob, ResultSlot};
use crate::worker::lock;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::watch;

/// Host render function. Runs on the blocking pool.
pub type RenderFn<I> = Arc<dyn Fn(&RenderContext<'_>) -> Result<I, RenderError> + Send + Sync>;

/// Wraps a closure into a [`RenderFn`].
pub fn render_fn<I, F>(f: F) -> RenderFn<I>
where
    F: Fn(&RenderContext<'_>) -> Result<I, RenderError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Why a finished job's output was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Job was cancelled before it could commit
    Cancelled,
    /// A newer job had already committed
    Superseded { current: u64 },
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Committed,
    Discarded(DiscardReason),
    /// Render function returned an error or panicked. The slot is unchanged.
    Failed(String),
}

impl RenderOutcome {
    /// Committed and failed jobs are followed by a draw; discarded ones are not.
    pub fn should_draw(&self) -> bool {
        matches!(self, RenderOutcome::Committed | RenderOutcome::Failed(_))
    }
}

/// A running job stopped by [`OffscreenRenderer::cancel_all`] or
/// [`OffscreenRenderer::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledJob {
    pub seq: u64,
    pub region: Option<Rect>,
    /// The job's image never reached the slot, so its region is still stale.
    pub uncommitted: bool,
}

struct Inflight {
    job: Arc<RenderJob>,
    /// Closed when the job's task exits. Nothing is ever sent.
    exited: watch::Receiver<()>,
}

impl Inflight {
    fn is_running(&self) -> bool {
        self.exited.has_changed().is_ok()
    }
}

pub struct OffscreenRenderer<I> {
    runtime: Handle,
    render_fn: RenderFn<I>,
    slot: Arc<ResultSlot<I>>,
    inflight: Mutex<Vec<Inflight>>,
}

impl<I: Send + 'static> OffscreenRenderer<I> {
    pub fn new(runtime: Handle, render_fn: RenderFn<I>, slot: Arc<ResultSlot<I>>) -> Self {
        Self {
            runtime,
            render_fn,
            slot,
            inflight: Mutex::new(Vec::new()),
        }
    }

    pub fn slot(&self) -> &Arc<ResultSlot<I>> {
        &self.slot
    }

    /// Starts `job` in the background and cancels every job started before it.
    ///
    /// `on_finish` is called once from the job's task after the commit attempt.
    /// Returns the jobs this call cancelled.
    pub fn start<F>(&self, job: RenderJob, on_finish: F) -> Vec<CancelledJob>
    where
        F: FnOnce(&RenderJob, &RenderOutcome) + Send + 'static,
    {
        let job = Arc::new(job);
        let (exited_tx, exited_rx) = watch::channel(());

        let superseded = {
            let mut inflight = lock(&self.inflight);
            let superseded = cancel_running(&mut inflight, &self.slot);
            inflight.push(Inflight {
                job: job.clone(),
                exited: exited_rx,
            });
            superseded
        };

        log::trace!("Offscreen[{}]: starting job", job.seq());

        let guard = self.slot.begin_production();
        let render_fn = self.render_fn.clone();
        let slot = self.slot.clone();

        self.runtime.spawn(async move {
            let _exited = exited_tx;
            let _guard = guard;

            let outcome = render(&job, render_fn, &slot).await;
            log::trace!("Offscreen[{}]: finished after {:?}: {:?}", job.seq(), job.age(), outcome);
            on_finish(&job, &outcome);
        });

        superseded
    }

    /// Cancels every running job. Returns the jobs newly cancelled.
    pub fn cancel_all(&self) -> Vec<CancelledJob> {
        cancel_running(&mut lock(&self.inflight), &self.slot)
    }

    /// Sequence number of the job allowed to commit, if one is running.
    pub fn live_job(&self) -> Option<u64> {
        lock(&self.inflight)
            .iter()
            .rev()
            .find(|e| e.is_running() && !e.job.is_cancelled())
            .map(|e| e.job.seq())
    }

    /// Sequence numbers of every job whose task has not exited yet.
    pub fn running_jobs(&self) -> Vec<u64> {
        lock(&self.inflight)
            .iter()
            .filter(|e| e.is_running())
            .map(|e| e.job.seq())
            .collect()
    }

    /// Waits until every job running at the time of the call has exited.
    ///
    /// Does not cancel anything; call [`cancel_all`](Self::cancel_all) first
    /// for a prompt return.
    pub async fn wait_for_offs(&self) {
        let waiters: Vec<watch::Receiver<()>> = lock(&self.inflight)
            .iter()
            .map(|e| e.exited.clone())
            .collect();

        if waiters.is_empty() {
            return;
        }

        log::trace!("Offscreen: waiting for {} job(s)", waiters.len());
        futures::future::join_all(waiters.into_iter().map(|mut exited| async move {
            while exited.changed().await.is_ok() {}
        }))
        .await;

        lock(&self.inflight).retain(Inflight::is_running);
    }
}

fn cancel_running<I>(inflight: &mut Vec<Inflight>, slot: &ResultSlot<I>) -> Vec<CancelledJob> {
    inflight.retain(Inflight::is_running);

    let mut cancelled = Vec::new();
    for entry in inflight.iter() {
        if entry.job.is_cancelled() {
            continue;
        }
        entry.job.cancel();

        // Commits check cancellation under the slot lock, so once the job is
        // cancelled its seq shows up in the slot only if it already committed.
        let seq = entry.job.seq();
        cancelled.push(CancelledJob {
            seq,
            region: entry.job.region(),
            uncommitted: slot.generated_by() < seq,
        });
    }
    cancelled
}

async fn render<I: Send + 'static>(
    job: &Arc<RenderJob>,
    render_fn: RenderFn<I>,
    slot: &ResultSlot<I>,
) -> RenderOutcome {
    if job.is_cancelled() {
        return RenderOutcome::Discarded(DiscardReason::Cancelled);
    }

    let worker_job = job.clone();
    let result = tokio::task::spawn_blocking(move || render_fn(&worker_job.context())).await;

    match result {
        Ok(Ok(image)) => match slot.commit(job, image) {
            CommitOutcome::Committed => RenderOutcome::Committed,
            CommitOutcome::Cancelled => RenderOutcome::Discarded(DiscardReason::Cancelled),
            CommitOutcome::Superseded { current } => {
                RenderOutcome::Discarded(DiscardReason::Superseded { current })
            }
        },
        Ok(Err(RenderError::Cancelled)) => RenderOutcome::Discarded(DiscardReason::Cancelled),
        Ok(Err(e)) if job.is_cancelled() => {
            log::debug!("Offscreen[{}]: cancelled job failed: {}", job.seq(), e);
            RenderOutcome::Discarded(DiscardReason::Cancelled)
        }
        Ok(Err(e)) => {
            log::warn!("Offscreen[{}]: render failed: {}", job.seq(), e);
            RenderOutcome::Failed(e.to_string())
        }
        Err(e) if e.is_panic() => {
            log::error!("Offscreen[{}]: render panicked: {}", job.seq(), e);
            RenderOutcome::Failed(format!("render panicked: {e}"))
        }
        Err(e) => {
            log::warn!("Offscreen[{}]: render task did not complete: {}", job.seq(), e);
            RenderOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Rect;
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    const WAIT: Duration = Duration::from_secs(5);

    type Finished = mpsc::UnboundedReceiver<(u64, RenderOutcome)>;

    fn reporter(
        tx: &mpsc::UnboundedSender<(u64, RenderOutcome)>,
    ) -> impl FnOnce(&RenderJob, &RenderOutcome) + Send + 'static {
        let tx = tx.clone();
        move |job, outcome| {
            let _ = tx.send((job.seq(), outcome.clone()));
        }
    }

    fn job(seq: u64) -> RenderJob {
        RenderJob::new(seq, Some(Rect::new(0, 0, 8, 8)), CancellationToken::new())
    }

    async fn next(rx: &mut Finished) -> (u64, RenderOutcome) {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    fn seqs(cancelled: Vec<CancelledJob>) -> Vec<u64> {
        cancelled.into_iter().map(|c| c.seq).collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn finished_job_commits_its_image() {
        let slot = Arc::new(ResultSlot::new());
        let renderer = OffscreenRenderer::new(
            Handle::current(),
            render_fn(|ctx| Ok(ctx.seq() * 10)),
            slot.clone(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(renderer.start(job(1), reporter(&tx)).is_empty());
        assert_eq!(next(&mut rx).await, (1, RenderOutcome::Committed));

        renderer.wait_for_offs().await;
        assert_eq!(slot.with_contents(|c| c.image), Some(10));
        assert_eq!(slot.generated_by(), 1);
        assert!(!slot.is_producing());
        assert!(renderer.running_jobs().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_job_output_is_discarded() {
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let slot = Arc::new(ResultSlot::new());
        let renderer = OffscreenRenderer::new(
            Handle::current(),
            // ignores cancellation on purpose and returns a full image
            render_fn(move |_ctx| {
                let _ = lock(&release_rx).recv_timeout(WAIT);
                Ok("stale")
            }),
            slot.clone(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        renderer.start(job(1), reporter(&tx));
        assert_eq!(renderer.live_job(), Some(1));
        assert_eq!(
            renderer.cancel_all(),
            vec![CancelledJob {
                seq: 1,
                region: Some(Rect::new(0, 0, 8, 8)),
                uncommitted: true,
            }]
        );
        assert_eq!(renderer.live_job(), None);
        // already cancelled, nothing new to report
        assert!(renderer.cancel_all().is_empty());

        release_tx.send(()).unwrap();
        assert_eq!(
            next(&mut rx).await,
            (1, RenderOutcome::Discarded(DiscardReason::Cancelled))
        );
        assert!(slot.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_older_job_cannot_overwrite_newer() {
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let slot = Arc::new(ResultSlot::new());
        let renderer = OffscreenRenderer::new(
            Handle::current(),
            render_fn(move |ctx| {
                if ctx.seq() == 1 {
                    let _ = lock(&release_rx).recv_timeout(WAIT);
                }
                Ok(ctx.seq())
            }),
            slot.clone(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        renderer.start(job(1), reporter(&tx));
        assert_eq!(seqs(renderer.start(job(2), reporter(&tx))), vec![1]);

        assert_eq!(next(&mut rx).await, (2, RenderOutcome::Committed));
        release_tx.send(()).unwrap();
        let (seq, outcome) = next(&mut rx).await;
        assert_eq!(seq, 1);
        assert!(matches!(outcome, RenderOutcome::Discarded(_)));

        assert_eq!(slot.with_contents(|c| c.image), Some(2));
        assert_eq!(slot.generated_by(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelling_a_committed_job_reports_nothing_stale() {
        let (release_tx, release_rx) = std_mpsc::channel::<()>();

        let slot = Arc::new(ResultSlot::new());
        let renderer = OffscreenRenderer::new(Handle::current(), render_fn(|ctx| Ok(ctx.seq())), slot.clone());

        // the task stays alive after its commit until released
        renderer.start(job(1), move |_job, _outcome| {
            let _ = release_rx.recv_timeout(WAIT);
        });

        let committed = timeout(WAIT, async {
            while slot.generated_by() != 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await;
        assert!(committed.is_ok());

        let cancelled = renderer.cancel_all();
        assert_eq!(seqs(cancelled.clone()), vec![1]);
        assert!(!cancelled[0].uncommitted);

        release_tx.send(()).unwrap();
        timeout(WAIT, renderer.wait_for_offs()).await.unwrap();
        assert_eq!(slot.with_contents(|c| c.image), Some(1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failure_keeps_previous_image() {
        let slot = Arc::new(ResultSlot::new());
        let renderer = OffscreenRenderer::new(
            Handle::current(),
            render_fn(|ctx| match ctx.seq() {
                1 => Ok("first"),
                2 => Err(anyhow::anyhow!("out of memory").into()),
                _ => panic!("renderer blew up"),
            }),
            slot.clone(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        renderer.start(job(1), reporter(&tx));
        assert_eq!(next(&mut rx).await, (1, RenderOutcome::Committed));

        renderer.start(job(2), reporter(&tx));
        let (seq, outcome) = next(&mut rx).await;
        assert_eq!(seq, 2);
        assert_eq!(outcome, RenderOutcome::Failed("out of memory".into()));
        assert!(outcome.should_draw());

        renderer.start(job(3), reporter(&tx));
        let (seq, outcome) = next(&mut rx).await;
        assert_eq!(seq, 3);
        assert!(matches!(outcome, RenderOutcome::Failed(ref msg) if msg.contains("panicked")));

        assert_eq!(slot.with_contents(|c| c.image), Some("first"));
        assert_eq!(slot.generated_by(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_for_offs_waits_for_every_cancelled_job() {
        let exited = Arc::new(AtomicUsize::new(0));
        let counter = exited.clone();

        let slot = Arc::new(ResultSlot::new());
        let renderer = OffscreenRenderer::new(
            Handle::current(),
            render_fn(move |ctx| {
                // poll until cancelled, then leave slowly
                while ctx.checkpoint().is_ok() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                std::thread::sleep(Duration::from_millis(20));
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RenderError::Cancelled)
            }),
            slot.clone(),
        );
        let (tx, _rx) = mpsc::unbounded_channel();

        for seq in 1..=3 {
            renderer.start(job(seq), reporter(&tx));
        }
        assert_eq!(renderer.live_job(), Some(3));
        assert_eq!(seqs(renderer.cancel_all()), vec![3]);

        timeout(WAIT, renderer.wait_for_offs()).await.unwrap();
        assert_eq!(exited.load(Ordering::SeqCst), 3);
        assert!(!slot.is_producing());
        assert!(slot.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn committed_sequence_never_goes_backwards() {
        const JOBS: u64 = 25;

        let slot = Arc::new(ResultSlot::new());
        let renderer = OffscreenRenderer::new(
            Handle::current(),
            render_fn(|ctx| {
                let delay = rand::rng().random_range(0..15);
                std::thread::sleep(Duration::from_millis(delay));
                Ok(ctx.seq())
            }),
            slot.clone(),
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for seq in 1..=JOBS {
            let tx = tx.clone();
            let slot = slot.clone();
            let seen = seen.clone();
            renderer.start(job(seq), move |job, outcome| {
                let mut seen = lock(&seen);
                seen.push(slot.generated_by());
                let _ = tx.send((job.seq(), outcome.clone()));
            });

            let pause = rand::rng().random_range(0..8);
            tokio::time::sleep(Duration::from_millis(pause)).await;
        }

        let mut finished = 0;
        while finished < JOBS {
            let (_, outcome) = next(&mut rx).await;
            assert!(!matches!(outcome, RenderOutcome::Failed(_)));
            finished += 1;
        }
        renderer.wait_for_offs().await;

        // the last job is never cancelled, so it always wins
        assert_eq!(slot.with_contents(|c| c.image), Some(JOBS));
        let seen = lock(&seen);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "slot went backwards: {seen:?}");
    }
}
