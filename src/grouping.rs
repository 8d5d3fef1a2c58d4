//! Two-stage rendering for groups of objects.
//!
//! A [`GroupingSession`] runs two [`StageWorker`]s that share one set of view
//! parameters. The updater recomputes per-object descriptors whenever the
//! view changes and installs the new set in one swap. The painter then draws
//! the latest installed set and asks the host canvas to repaint. Both stages
//! coalesce: a burst of view changes costs at most one extra pass per stage.

use crate::config::StageConfig;
use crate::errors::RepaintError;
use crate::render::{Canvas, Rect};
use crate::worker::{lock, StageParams, StageWorker};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Host hooks for a grouping session.
///
/// Both methods run on the blocking pool, never concurrently with
/// themselves. `paint` may run concurrently with `compute` for a newer view.
pub trait GroupRenderer: Send + Sync + 'static {
    /// Per-object render data, opaque to the session.
    type Descriptor: Send + Sync + 'static;

    /// Builds the descriptor set for `params`.
    fn compute(&self, params: StageParams) -> Vec<Self::Descriptor>;

    /// Draws `descriptors` into the host's offscreen target.
    fn paint(&self, params: StageParams, descriptors: &[Self::Descriptor]);
}

type DescriptorSet<D> = Arc<Mutex<Arc<Vec<D>>>>;

pub struct GroupingSession<R: GroupRenderer> {
    name: String,
    params: Arc<Mutex<StageParams>>,
    descriptors: DescriptorSet<R::Descriptor>,
    updater: StageWorker,
    painter: Arc<StageWorker>,
}

impl<R: GroupRenderer> GroupingSession<R> {
    /// Starts both stages on the current runtime and schedules the first pass.
    pub fn start(
        name: impl Into<String>,
        renderer: Arc<R>,
        canvas: Arc<dyn Canvas>,
        view: StageParams,
    ) -> Result<Self, RepaintError> {
        let runtime = Handle::try_current().map_err(|_| RepaintError::NoRuntime)?;
        Self::start_on(&runtime, name, renderer, canvas, view)
    }

    pub fn start_on(
        runtime: &Handle,
        name: impl Into<String>,
        renderer: Arc<R>,
        canvas: Arc<dyn Canvas>,
        view: StageParams,
    ) -> Result<Self, RepaintError> {
        let name = name.into();
        let shutdown = CancellationToken::new();
        let params = Arc::new(Mutex::new(view));
        let descriptors: DescriptorSet<R::Descriptor> = Arc::new(Mutex::new(Arc::new(Vec::new())));

        let painter = {
            let renderer = renderer.clone();
            let descriptors = descriptors.clone();
            let name = name.clone();

            StageWorker::spawn_on(
                runtime,
                StageConfig::new(format!("{name}-painter")),
                params.clone(),
                shutdown.child_token(),
                move |params| {
                    let set = lock(&descriptors).clone();
                    let painted =
                        panic::catch_unwind(AssertUnwindSafe(|| renderer.paint(params, &set)));
                    if painted.is_err() {
                        log::error!("Group[{}]: paint panicked, repainting anyway", name);
                    }
                    canvas.repaint(None);
                },
            )?
        };
        let painter = Arc::new(painter);

        let updater = {
            let descriptors = descriptors.clone();
            let painter = painter.clone();
            let name = name.clone();

            StageWorker::spawn_on(
                runtime,
                StageConfig::new(format!("{name}-updater")),
                params.clone(),
                shutdown.child_token(),
                move |params| {
                    let set = Arc::new(renderer.compute(params));
                    log::trace!("Group[{}]: {} descriptor(s) for {:?}", name, set.len(), params);

                    let previous = std::mem::replace(&mut *lock(&descriptors), set);
                    drop(previous);

                    if let Err(e) = painter.update() {
                        log::debug!("Group[{}]: painter not updated: {}", name, e);
                    }
                },
            )?
        };

        updater.update()?;
        log::debug!("Group[{}]: session started", name);

        Ok(Self {
            name,
            params,
            descriptors,
            updater,
            painter,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Moves the view. Returns `Ok(false)` when nothing changed, in which case
    /// no stage runs.
    pub fn set_view(&self, region: Rect, magnification: f64) -> Result<bool, RepaintError> {
        if self.updater.is_quit() {
            return Err(RepaintError::Quit);
        }

        let next = StageParams::new(region, magnification);
        {
            let mut params = lock(&self.params);
            if *params == next {
                return Ok(false);
            }
            *params = next;
        }

        self.updater.update()?;
        Ok(true)
    }

    /// Recomputes descriptors for the current view.
    pub fn refresh(&self) -> Result<(), RepaintError> {
        self.updater.update()
    }

    /// Repaints the installed descriptors without recomputing them.
    pub fn repaint(&self) -> Result<(), RepaintError> {
        self.painter.update()
    }

    pub fn view(&self) -> StageParams {
        *lock(&self.params)
    }

    /// The most recently installed descriptor set.
    pub fn descriptors(&self) -> Arc<Vec<R::Descriptor>> {
        lock(&self.descriptors).clone()
    }

    /// Stops both stages. Passes already running finish first.
    pub fn cancel(&self) {
        self.updater.quit();
        self.painter.quit();
    }

    pub fn is_cancelled(&self) -> bool {
        self.updater.is_quit() && self.painter.is_quit()
    }

    /// Waits until neither stage has work pending or running.
    pub async fn wait_idle(&self) {
        loop {
            self.updater.wait_idle().await;
            self.painter.wait_idle().await;

            if self.updater.is_idle() && self.painter.is_idle() {
                return;
            }
        }
    }

    pub async fn join(&self) -> Result<(), RepaintError> {
        self.updater.join().await?;
        self.painter.join().await
    }

    /// Completed (updater, painter) passes.
    pub fn passes(&self) -> (u64, u64) {
        (self.updater.passes(), self.painter.passes())
    }
}

impl<R: GroupRenderer> Drop for GroupingSession<R> {
    fn drop(&mut self) {
        self.cancel();
    }
}
