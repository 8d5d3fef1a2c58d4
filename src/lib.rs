pub mod config;
pub mod errors;
pub mod events;
pub mod grouping;
pub mod render;
pub mod worker;

pub use errors::{RenderError, RepaintError};
pub use events::{RepaintEvent, RepaintStats};
pub use grouping::{GroupRenderer, GroupingSession};
pub use render::{Canvas, CanvasId, Rect, RenderContext, RepaintCoordinator, RepaintHandle};
