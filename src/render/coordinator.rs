//! The repaint coordinator.
//!
//! A [`RepaintCoordinator`] owns one canvas' repaint pipeline: a coalescing
//! worker that absorbs bursts of [`PaintRequest`]s, an [`OffscreenRenderer`]
//! that regenerates the offscreen image in the background, and the
//! [`ResultSlot`] holding the latest committed image.
//!
//! Producers call [`enqueue`](RepaintCoordinator::enqueue) (or one of the
//! `paint*` shorthands) from any thread. The call never blocks on rendering.
//! After the debounce window the coordinator merges everything pending and
//! either draws right away (no regeneration requested) or cancels the running
//! job and dispatches a new one. The draw for a regenerated image is issued
//! when its job commits.

use crate::config::RepaintConfig;
use crate::errors::{RenderError, RepaintError};
use crate::events::{RepaintEvent, RepaintStats, StatsCounters};
use crate::render::{
    render_fn, union_region, Canvas, CanvasId, OffscreenRenderer, PaintQueue, PaintRequest, Rect,
    RenderContext, RenderFn, RenderJob, RenderOutcome, ResultSlot,
};
use crate::worker::{CoalescingWorker, WorkerPhase};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Coarse view of what a coordinator is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Nothing pending and no job running
    Idle,
    /// Absorbing a burst of requests
    Debouncing,
    /// Waiting for a background job
    Rendering,
    /// Handling a merged request
    Drawing,
    /// Shut down, or shutting down
    Quitting,
}

struct Shared<I> {
    id: CanvasId,
    name: String,
    canvas: Arc<dyn Canvas>,
    renderer: OffscreenRenderer<I>,
    next_seq: AtomicU64,
    shutdown: CancellationToken,
    quitting: AtomicBool,
    events: broadcast::Sender<RepaintEvent>,
    stats: Arc<StatsCounters>,
}

impl<I: Send + 'static> Shared<I> {
    fn publish(&self, event: RepaintEvent) {
        // Fails only when nobody is subscribed.
        let _ = self.events.send(event);
    }

    /// Runs on the worker loop, once per merged batch.
    fn handle(self: &Arc<Self>, request: PaintRequest) {
        StatsCounters::bump(&self.stats.merges);
        log::debug!("Canvas[{}]: merged request {:?}", self.name, request);
        self.publish(RepaintEvent::RequestsMerged {
            canvas_id: self.id,
            request,
        });

        if request.regenerate {
            self.dispatch(request.region);
        } else {
            self.draw(request.region);
        }
    }

    fn dispatch(self: &Arc<Self>, mut region: Option<Rect>) {
        if self.shutdown.is_cancelled() {
            return;
        }

        self.canvas.cancel_outstanding();
        for cancelled in self.renderer.cancel_all() {
            log::debug!("Canvas[{}]: cancelling job {}", self.name, cancelled.seq);
            self.publish(RepaintEvent::JobCancelled {
                canvas_id: self.id,
                seq: cancelled.seq,
            });

            // The new job takes over whatever the cancelled one never delivered.
            if cancelled.uncommitted {
                region = union_region(region, cancelled.region);
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let job = RenderJob::new(seq, region, self.shutdown.child_token());

        StatsCounters::bump(&self.stats.jobs_started);
        log::debug!("Canvas[{}]: starting job {} for {:?}", self.name, seq, region);
        self.publish(RepaintEvent::JobStarted {
            canvas_id: self.id,
            seq,
            region,
        });

        let shared = self.clone();
        self.renderer
            .start(job, move |job, outcome| shared.finish(job, outcome));
    }

    /// Called from the job's task once the job has ended.
    fn finish(&self, job: &RenderJob, outcome: &RenderOutcome) {
        let seq = job.seq();
        match outcome {
            RenderOutcome::Committed => {
                StatsCounters::bump(&self.stats.jobs_committed);
                self.publish(RepaintEvent::JobCommitted {
                    canvas_id: self.id,
                    seq,
                    region: job.region(),
                });
            }
            RenderOutcome::Discarded(reason) => {
                StatsCounters::bump(&self.stats.jobs_discarded);
                log::debug!("Canvas[{}]: job {} discarded ({:?})", self.name, seq, reason);
                self.publish(RepaintEvent::JobDiscarded {
                    canvas_id: self.id,
                    seq,
                    reason: *reason,
                });
            }
            RenderOutcome::Failed(error) => {
                StatsCounters::bump(&self.stats.jobs_failed);
                self.publish(RepaintEvent::JobFailed {
                    canvas_id: self.id,
                    seq,
                    error: error.clone(),
                });
            }
        }

        // A failed job still draws: the canvas shows the previous image.
        if outcome.should_draw() {
            self.draw(job.region());
        }
    }

    fn draw(&self, region: Option<Rect>) {
        if self.shutdown.is_cancelled() {
            log::trace!("Canvas[{}]: skipping draw after quit", self.name);
            return;
        }

        self.canvas.repaint(region);
        StatsCounters::bump(&self.stats.draws);
        self.publish(RepaintEvent::Drawn {
            canvas_id: self.id,
            region,
        });
    }
}

fn submit(
    worker: &CoalescingWorker<PaintQueue>,
    stats: &StatsCounters,
    request: PaintRequest,
) -> Result<(), RepaintError> {
    worker.submit(request)?;
    StatsCounters::bump(&stats.requests);
    log::trace!("Canvas[{}]: queued {:?}", worker.name(), request);
    Ok(())
}

/// Drives the repaint pipeline of a single canvas.
///
/// `I` is the offscreen image type produced by the render function. Dropping
/// the coordinator shuts it down like [`quit`](Self::quit) without emitting
/// a quit event.
pub struct RepaintCoordinator<I: Send + 'static> {
    shared: Arc<Shared<I>>,
    worker: Arc<CoalescingWorker<PaintQueue>>,
}

impl<I: Send + 'static> RepaintCoordinator<I> {
    /// Creates a coordinator on the current tokio runtime.
    pub fn new<F>(config: RepaintConfig, canvas: Arc<dyn Canvas>, render: F) -> Result<Self, RepaintError>
    where
        F: Fn(&RenderContext<'_>) -> Result<I, RenderError> + Send + Sync + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| RepaintError::NoRuntime)?;
        Self::new_on(&runtime, config, canvas, render_fn(render))
    }

    pub fn new_on(
        runtime: &Handle,
        config: RepaintConfig,
        canvas: Arc<dyn Canvas>,
        render_fn: RenderFn<I>,
    ) -> Result<Self, RepaintError> {
        config.validate()?;

        let id = CanvasId::new();
        let shutdown = CancellationToken::new();
        let (events, _first_rx) = broadcast::channel(config.event_capacity);
        let slot = Arc::new(ResultSlot::new());

        let shared = Arc::new(Shared {
            id,
            name: config.name.clone(),
            canvas,
            renderer: OffscreenRenderer::new(runtime.clone(), render_fn, slot),
            next_seq: AtomicU64::new(0),
            shutdown: shutdown.clone(),
            quitting: AtomicBool::new(false),
            events,
            stats: Arc::new(StatsCounters::default()),
        });

        let handler = shared.clone();
        let worker = CoalescingWorker::spawn(
            runtime,
            config.name,
            PaintQueue::new(),
            config.debounce,
            shutdown,
            move |request: PaintRequest| {
                handler.handle(request);
                async {}
            },
        );

        log::debug!("Canvas[{}]: coordinator {} started", shared.name, id);

        Ok(Self {
            shared,
            worker: Arc::new(worker),
        })
    }

    pub fn id(&self) -> CanvasId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queues a paint request. Returns immediately.
    ///
    /// `region` of `None` covers the whole surface. `regenerate` rebuilds the
    /// offscreen image before drawing.
    pub fn enqueue(&self, region: Option<Rect>, regenerate: bool) -> Result<(), RepaintError> {
        submit(&self.worker, &self.shared.stats, PaintRequest::new(region, regenerate))
    }

    /// Regenerates and draws `region`.
    pub fn paint(&self, region: Rect) -> Result<(), RepaintError> {
        self.enqueue(Some(region), true)
    }

    /// Regenerates and draws the whole surface.
    pub fn paint_all(&self) -> Result<(), RepaintError> {
        self.enqueue(None, true)
    }

    /// Draws `region` from the current offscreen image without regenerating.
    pub fn repaint(&self, region: Option<Rect>) -> Result<(), RepaintError> {
        self.enqueue(region, false)
    }

    /// Stops the coordinator and cancels every running job.
    ///
    /// Does not wait; use [`wait_for_offs`](Self::wait_for_offs) or
    /// [`join`](Self::join) for that. Safe to call any number of times.
    pub fn quit(&self) {
        if self.shared.quitting.swap(true, Ordering::AcqRel) {
            return;
        }

        // Job tokens are children of the shutdown token.
        self.worker.quit();
        log::debug!(
            "Canvas[{}]: quit with {} job(s) still running",
            self.shared.name,
            self.shared.renderer.running_jobs().len()
        );
        self.shared.publish(RepaintEvent::Quit {
            canvas_id: self.shared.id,
        });
    }

    pub fn is_quit(&self) -> bool {
        self.worker.is_quit()
    }

    /// Waits until every background job running at the time of the call has
    /// observed its cancellation and exited.
    pub async fn wait_for_offs(&self) {
        self.shared.renderer.wait_for_offs().await
    }

    /// Waits until nothing is pending, no job is running and every resulting
    /// draw has been issued.
    pub async fn wait_for_repaint(&self) {
        loop {
            self.worker.wait_idle().await;
            self.shared.renderer.wait_for_offs().await;

            if self.worker.is_idle() && self.shared.renderer.running_jobs().is_empty() {
                return;
            }
        }
    }

    /// Waits for the coordinator loop and all of its jobs to finish.
    /// Only returns after [`quit`](Self::quit) (or another shutdown).
    pub async fn join(&self) -> Result<(), RepaintError> {
        self.worker.join().await?;
        self.shared.renderer.wait_for_offs().await;
        Ok(())
    }

    pub fn state(&self) -> CoordinatorState {
        if self.shared.quitting.load(Ordering::Acquire) {
            return CoordinatorState::Quitting;
        }

        match self.worker.phase() {
            WorkerPhase::Quit => CoordinatorState::Quitting,
            WorkerPhase::Debouncing => CoordinatorState::Debouncing,
            WorkerPhase::Running => CoordinatorState::Drawing,
            WorkerPhase::Waiting if self.shared.renderer.live_job().is_some() => {
                CoordinatorState::Rendering
            }
            WorkerPhase::Waiting => CoordinatorState::Idle,
        }
    }

    /// Sequence number of the job currently allowed to commit.
    pub fn live_job(&self) -> Option<u64> {
        self.shared.renderer.live_job()
    }

    /// Holder of the latest committed offscreen image.
    pub fn slot(&self) -> &Arc<ResultSlot<I>> {
        self.shared.renderer.slot()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RepaintEvent> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self) -> RepaintStats {
        self.shared.stats.snapshot()
    }

    /// Cheap handle for producers that should not own the coordinator.
    pub fn handle(&self) -> RepaintHandle {
        RepaintHandle {
            id: self.shared.id,
            worker: Arc::downgrade(&self.worker),
            stats: self.shared.stats.clone(),
        }
    }
}

impl<I: Send + 'static> std::fmt::Debug for RepaintCoordinator<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepaintCoordinator")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Clonable request sender for a [`RepaintCoordinator`].
///
/// Does not keep the coordinator alive. Once it is gone every call fails
/// with [`RepaintError::Quit`].
#[derive(Clone)]
pub struct RepaintHandle {
    id: CanvasId,
    worker: Weak<CoalescingWorker<PaintQueue>>,
    stats: Arc<StatsCounters>,
}

impl RepaintHandle {
    pub fn id(&self) -> CanvasId {
        self.id
    }

    pub fn enqueue(&self, region: Option<Rect>, regenerate: bool) -> Result<(), RepaintError> {
        let worker = self.worker.upgrade().ok_or(RepaintError::Quit)?;
        submit(&worker, &self.stats, PaintRequest::new(region, regenerate))
    }

    pub fn paint(&self, region: Rect) -> Result<(), RepaintError> {
        self.enqueue(Some(region), true)
    }

    pub fn paint_all(&self) -> Result<(), RepaintError> {
        self.enqueue(None, true)
    }
}

impl std::fmt::Debug for RepaintHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepaintHandle")
            .field("id", &self.id)
            .field("alive", &(self.worker.strong_count() > 0))
            .finish()
    }
}

/// Lets a coordinator sit behind anything that drives a [`Canvas`]: a repaint
/// becomes a regenerating paint request.
impl Canvas for RepaintHandle {
    fn repaint(&self, region: Option<Rect>) {
        if let Err(e) = self.enqueue(region, true) {
            log::debug!("Canvas[{}]: dropped repaint: {}", self.id, e);
        }
    }
}
