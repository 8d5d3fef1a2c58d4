use crate::render::Rect;
use uuid::Uuid;

/// A unique identifier for a canvas driven by a
/// [`RepaintCoordinator`](crate::render::RepaintCoordinator).
///
/// Only used to tell coordinators apart in logs and events. Treat it as an
/// opaque handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanvasId(Uuid);

impl CanvasId {
    /// Create a new unique `CanvasId` using a random UUID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CanvasId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CanvasId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Eight hex digits are plenty to tell canvases apart in a log.
        let simple = self.0.simple().to_string();
        write!(f, "{}", &simple[..8])
    }
}

/// Callbacks the host canvas provides to the repaint pipeline.
///
/// Calls arrive on runtime worker threads, never on the UI thread. They must
/// not block: `repaint` should only schedule an on-screen blit.
pub trait Canvas: Send + Sync + 'static {
    /// Schedule a blit of the current offscreen image. `None` means the whole surface.
    fn repaint(&self, region: Option<Rect>);

    /// Release listeners or handles tied to earlier background jobs.
    /// Called right before a new offscreen job is started.
    fn cancel_outstanding(&self) {}
}

impl<F> Canvas for F
where
    F: Fn(Option<Rect>) + Send + Sync + 'static,
{
    fn repaint(&self, region: Option<Rect>) {
        self(region)
    }
}
