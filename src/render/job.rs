use crate::errors::RenderError;
use crate::render::Rect;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// One attempt at regenerating the offscreen image.
///
/// Jobs are numbered from 1 in dispatch order. A job can be cancelled at any
/// time from any thread; the render function notices at its next checkpoint.
#[derive(Debug)]
pub struct RenderJob {
    seq: u64,
    region: Option<Rect>,
    cancel: CancellationToken,
    created: Instant,
}

impl RenderJob {
    pub fn new(seq: u64, region: Option<Rect>, cancel: CancellationToken) -> Self {
        Self {
            seq,
            region,
            cancel,
            created: Instant::now(),
        }
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[inline]
    pub fn region(&self) -> Option<Rect> {
        self.region
    }

    /// Marks the job as superseded. Does not wait for the render to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Time since the job was created.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn context(&self) -> RenderContext<'_> {
        RenderContext { job: self }
    }
}

/// View of a [`RenderJob`] handed to the host render function.
///
/// Render functions must call [`checkpoint`](Self::checkpoint) (or poll
/// [`is_cancelled`](Self::is_cancelled)) at bounded intervals. A render
/// function that never checks keeps its worker busy until it returns; its
/// output is still discarded.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    job: &'a RenderJob,
}

impl RenderContext<'_> {
    pub fn seq(&self) -> u64 {
        self.job.seq
    }

    pub fn region(&self) -> Option<Rect> {
        self.job.region
    }

    pub fn is_cancelled(&self) -> bool {
        self.job.is_cancelled()
    }

    /// Returns `Err(RenderError::Cancelled)` once the job has been cancelled.
    ///
    /// ```
    /// use canvas_repaint::errors::RenderError;
    /// use canvas_repaint::render::RenderContext;
    ///
    /// fn render(ctx: &RenderContext<'_>) -> Result<Vec<u8>, RenderError> {
    ///     let mut rows = Vec::new();
    ///     for row in 0..16u8 {
    ///         ctx.checkpoint()?;
    ///         rows.push(row);
    ///     }
    ///     Ok(rows)
    /// }
    /// ```
    pub fn checkpoint(&self) -> Result<(), RenderError> {
        if self.job.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        Ok(())
    }
}
