//! Offscreen rendering and repaint coordination for a single canvas.

mod canvas;
mod coordinator;
mod job;
mod offscreen;
mod rect;
mod request;
mod slot;

pub use canvas::{Canvas, CanvasId};
pub use coordinator::{CoordinatorState, RepaintCoordinator, RepaintHandle};
pub use job::{RenderContext, RenderJob};
pub use offscreen::{
    render_fn, CancelledJob, DiscardReason, OffscreenRenderer, RenderFn, RenderOutcome,
};
pub use rect::{union_region, Rect};
pub use request::{PaintQueue, PaintRequest};
pub use slot::{CommitOutcome, ProductionGuard, ResultSlot, SlotContents};
