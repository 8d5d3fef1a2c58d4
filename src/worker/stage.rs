use crate::config::StageConfig;
use crate::errors::RepaintError;
use crate::render::Rect;
use crate::worker::{lock, Coalesce, CoalescingWorker, WorkerPhase};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Viewport parameters a stage computes against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageParams {
    /// Visible source rectangle
    pub region: Rect,
    /// Screen pixels per source pixel
    pub magnification: f64,
}

impl StageParams {
    pub fn new(region: Rect, magnification: f64) -> Self {
        Self { region, magnification }
    }
}

impl Default for StageParams {
    fn default() -> Self {
        Self {
            region: Rect::default(),
            magnification: 1.0,
        }
    }
}

/// Mailbox holding a single "run again" flag.
#[derive(Debug, Default)]
pub struct RunFlag {
    needs_run: bool,
}

impl Coalesce for RunFlag {
    type Request = ();
    type Batch = ();

    fn push(&mut self, _request: ()) {
        self.needs_run = true;
    }

    fn take(&mut self) -> Option<()> {
        std::mem::replace(&mut self.needs_run, false).then_some(())
    }

    fn is_empty(&self) -> bool {
        !self.needs_run
    }
}

/// A worker that re-runs `work` with the current parameters whenever updated.
///
/// `update()` only raises a flag. Any number of updates that arrive while a
/// pass is running produce one more pass, never a queue of them. The
/// parameters are read at the start of every pass, so a pass always sees the
/// latest values set before it started.
pub struct StageWorker {
    inner: CoalescingWorker<RunFlag>,
    params: Arc<Mutex<StageParams>>,
}

impl StageWorker {
    /// Spawns a stage on the current tokio runtime.
    ///
    /// `work` runs on the blocking pool. A panic inside it is logged and the
    /// stage keeps serving updates.
    pub fn spawn<W>(
        config: StageConfig,
        params: Arc<Mutex<StageParams>>,
        shutdown: CancellationToken,
        work: W,
    ) -> Result<Self, RepaintError>
    where
        W: Fn(StageParams) + Send + Sync + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| RepaintError::NoRuntime)?;
        Self::spawn_on(&runtime, config, params, shutdown, work)
    }

    pub fn spawn_on<W>(
        runtime: &Handle,
        config: StageConfig,
        params: Arc<Mutex<StageParams>>,
        shutdown: CancellationToken,
        work: W,
    ) -> Result<Self, RepaintError>
    where
        W: Fn(StageParams) + Send + Sync + 'static,
    {
        config.validate()?;

        let work = Arc::new(work);
        let source = params.clone();
        let name = config.name.clone();

        let inner = CoalescingWorker::spawn(
            runtime,
            config.name,
            RunFlag::default(),
            config.debounce,
            shutdown,
            move |()| {
                let work = work.clone();
                let name = name.clone();
                let snapshot = *lock(&source);

                async move {
                    log::trace!("Stage[{}]: running for {:?}", name, snapshot);
                    let result = tokio::task::spawn_blocking(move || work(snapshot)).await;
                    if let Err(e) = result {
                        if e.is_panic() {
                            log::error!("Stage[{}]: work panicked: {}", name, e);
                        } else {
                            log::warn!("Stage[{}]: work did not complete: {}", name, e);
                        }
                    }
                }
            },
        );

        Ok(Self { inner, params })
    }

    /// Requests another pass with whatever parameters are current when it starts.
    pub fn update(&self) -> Result<(), RepaintError> {
        self.inner.submit(())
    }

    /// Replaces the parameters and requests a pass.
    pub fn set_params(&self, params: StageParams) -> Result<(), RepaintError> {
        *lock(&self.params) = params;
        self.update()
    }

    pub fn params(&self) -> StageParams {
        *lock(&self.params)
    }

    pub fn quit(&self) {
        self.inner.quit();
    }

    pub fn is_quit(&self) -> bool {
        self.inner.is_quit()
    }

    pub async fn join(&self) -> Result<(), RepaintError> {
        self.inner.join().await
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn phase(&self) -> WorkerPhase {
        self.inner.phase()
    }

    /// Number of completed passes.
    pub fn passes(&self) -> u64 {
        self.inner.passes()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    pub async fn wait_idle(&self) {
        self.inner.wait_idle().await
    }
}
