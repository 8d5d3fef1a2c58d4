use crate::errors::RepaintError;
use crate::worker::lock;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A mailbox that merges pending requests into a single batch.
///
/// `push` is called by producers under the worker's mailbox lock, `take` by
/// the worker loop under the same lock, so a request is either part of the
/// batch returned by one `take` or left for the next one. Never both.
pub trait Coalesce: Send + 'static {
    type Request: Send;
    type Batch: Send + 'static;

    /// Adds a request to the mailbox.
    fn push(&mut self, request: Self::Request);

    /// Removes everything pending and returns it merged, or `None` when empty.
    fn take(&mut self) -> Option<Self::Batch>;

    /// Returns true when nothing is pending.
    fn is_empty(&self) -> bool;
}

/// Where the worker loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerPhase {
    /// Sleeping until signalled
    Waiting = 0,
    /// Signalled, absorbing the rest of the burst
    Debouncing = 1,
    /// Running the handler for a merged batch
    Running = 2,
    /// Loop has exited
    Quit = 3,
}

impl WorkerPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerPhase::Waiting,
            1 => WorkerPhase::Debouncing,
            2 => WorkerPhase::Running,
            _ => WorkerPhase::Quit,
        }
    }
}

struct Shared<C> {
    name: String,
    mailbox: Mutex<C>,
    /// Holds at most one permit, which is what makes signals coalesce.
    wake: Notify,
    /// Fired whenever the loop goes back to sleep or exits.
    idle: Notify,
    shutdown: CancellationToken,
    phase: AtomicU8,
    passes: AtomicU64,
}

impl<C> Shared<C> {
    fn set_phase(&self, phase: WorkerPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    fn phase(&self) -> WorkerPhase {
        WorkerPhase::from_u8(self.phase.load(Ordering::Acquire))
    }
}

/// Long-lived task that runs `handler` once per merged batch of requests.
///
/// Requests submitted while the handler runs are merged into the mailbox and
/// trigger exactly one more pass once the handler returns. Requests are never
/// queued as separate passes.
pub struct CoalescingWorker<C: Coalesce> {
    shared: Arc<Shared<C>>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Coalesce> CoalescingWorker<C> {
    /// Spawns the worker loop on `runtime`.
    ///
    /// `shutdown` ends the loop when cancelled. Passing a token lets owners
    /// hang child tokens (for example per-job cancellation) off the same root.
    pub fn spawn<F, Fut>(
        runtime: &Handle,
        name: impl Into<String>,
        mailbox: C,
        debounce: Duration,
        shutdown: CancellationToken,
        handler: F,
    ) -> Self
    where
        F: FnMut(C::Batch) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shared = Arc::new(Shared {
            name: name.into(),
            mailbox: Mutex::new(mailbox),
            wake: Notify::new(),
            idle: Notify::new(),
            shutdown,
            phase: AtomicU8::new(WorkerPhase::Waiting as u8),
            passes: AtomicU64::new(0),
        });

        let join_handle = runtime.spawn(run(shared.clone(), debounce, handler));

        Self {
            shared,
            join_handle: Mutex::new(Some(join_handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Adds a request and signals the loop. Never blocks on the handler.
    pub fn submit(&self, request: C::Request) -> Result<(), RepaintError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(RepaintError::Quit);
        }

        lock(&self.shared.mailbox).push(request);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Stops the loop. The handler is not run again; a pass that is already
    /// running finishes first. Safe to call any number of times.
    pub fn quit(&self) {
        if !self.shared.shutdown.is_cancelled() {
            log::debug!("Worker[{}]: quit requested", self.shared.name);
        }
        self.shared.shutdown.cancel();
    }

    pub fn is_quit(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Token that is cancelled when this worker quits.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    pub fn phase(&self) -> WorkerPhase {
        self.shared.phase()
    }

    /// Number of completed handler passes.
    pub fn passes(&self) -> u64 {
        self.shared.passes.load(Ordering::Acquire)
    }

    /// Returns true when the loop is asleep (or gone) and nothing is pending.
    pub fn is_idle(&self) -> bool {
        // Waiting -> Running happens under the mailbox lock.
        let mailbox = lock(&self.shared.mailbox);
        match self.shared.phase() {
            WorkerPhase::Quit => true,
            WorkerPhase::Waiting => mailbox.is_empty(),
            _ => false,
        }
    }

    /// Waits until [`is_idle`](Self::is_idle) holds.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            // Register before checking, so a transition between the check and
            // the await is not missed.
            notified.as_mut().enable();

            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Waits for the loop task to finish. Only the first caller actually
    /// awaits the task; later calls return immediately.
    pub async fn join(&self) -> Result<(), RepaintError> {
        let handle = lock(&self.join_handle).take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| RepaintError::Join(e.to_string())),
            None => Ok(()),
        }
    }
}

impl<C: Coalesce> Drop for CoalescingWorker<C> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn run<C, F, Fut>(shared: Arc<Shared<C>>, debounce: Duration, mut handler: F)
where
    C: Coalesce,
    F: FnMut(C::Batch) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    log::debug!("Worker[{}]: started", shared.name);

    loop {
        shared.set_phase(WorkerPhase::Waiting);
        shared.idle.notify_waiters();

        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            _ = shared.wake.notified() => {}
        }

        if !debounce.is_zero() {
            shared.set_phase(WorkerPhase::Debouncing);
            tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => break,
                _ = tokio::time::sleep(debounce) => {}
            }
        }

        // A permit can outlive the batch it announced when more requests
        // landed during the debounce window; those are already merged.
        let batch = {
            let mut mailbox = lock(&shared.mailbox);
            let batch = mailbox.take();
            if batch.is_some() {
                shared.set_phase(WorkerPhase::Running);
            }
            batch
        };
        let Some(batch) = batch else {
            log::trace!("Worker[{}]: woke without pending requests", shared.name);
            continue;
        };

        if shared.shutdown.is_cancelled() {
            break;
        }

        handler(batch).await;
        shared.passes.fetch_add(1, Ordering::AcqRel);
    }

    shared.set_phase(WorkerPhase::Quit);
    shared.idle.notify_waiters();
    log::debug!("Worker[{}]: exiting", shared.name);
}
