//! Paint requests and the mergeable request queue.
//!
//! Producers (input handlers, model change notifications, navigators) push a
//! [`PaintRequest`] for every change they see. The coordinator later drains
//! the whole [`PaintQueue`] at once and acts on the merged result, so a burst
//! of requests costs one regeneration at most.

use crate::render::rect::union_region;
use crate::render::Rect;
use crate::worker::Coalesce;

/// A single request to repaint part of the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaintRequest {
    /// Region to repaint. `None` repaints the whole surface.
    pub region: Option<Rect>,
    /// Rebuild the offscreen image before drawing
    pub regenerate: bool,
}

impl PaintRequest {
    pub fn new(region: Option<Rect>, regenerate: bool) -> Self {
        Self { region, regenerate }
    }

    /// Whole surface, with regeneration.
    pub fn everything() -> Self {
        Self::new(None, true)
    }

    /// Folds `other` into this request.
    ///
    /// The region becomes the union of both, or the whole surface if either is
    /// the whole surface. Regeneration is needed if either request needs it.
    pub fn merge(&mut self, other: &PaintRequest) {
        self.region = union_region(self.region, other.region);
        self.regenerate |= other.regenerate;
    }

    pub fn is_full_surface(&self) -> bool {
        self.region.is_none()
    }
}

/// Ordered list of pending paint requests.
#[derive(Debug, Default)]
pub struct PaintQueue {
    pending: Vec<PaintRequest>,
}

impl PaintQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request.
    pub fn enqueue(&mut self, region: Option<Rect>, regenerate: bool) {
        self.pending.push(PaintRequest::new(region, regenerate));
    }

    /// Removes every queued request and returns them merged into one.
    ///
    /// Returns `None` when nothing was queued.
    pub fn drain_and_merge(&mut self) -> Option<PaintRequest> {
        let mut drained = self.pending.drain(..);
        let mut merged = drained.next()?;
        for request in drained {
            merged.merge(&request);
        }
        Some(merged)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Coalesce for PaintQueue {
    type Request = PaintRequest;
    type Batch = PaintRequest;

    fn push(&mut self, request: PaintRequest) {
        self.pending.push(request);
    }

    fn take(&mut self) -> Option<PaintRequest> {
        self.drain_and_merge()
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_queue_drains_to_none() {
        let mut q = PaintQueue::new();
        assert!(q.drain_and_merge().is_none());
    }

    #[test]
    fn regions_union_and_regenerate_ors() {
        let mut q = PaintQueue::new();
        q.enqueue(Some(Rect::new(0, 0, 10, 10)), true);
        q.enqueue(Some(Rect::new(5, 5, 20, 20)), false);

        let merged = q.drain_and_merge().unwrap();
        assert_eq!(merged.region, Some(Rect::new(0, 0, 25, 25)));
        assert!(merged.regenerate);
        assert!(q.is_empty());
    }

    #[test]
    fn corner_regions_merge_to_their_bounding_box() {
        let mut q = PaintQueue::new();
        q.enqueue(Some(Rect::from_corners(0, 0, 10, 10)), true);
        q.enqueue(Some(Rect::from_corners(5, 5, 20, 20)), false);

        let merged = q.drain_and_merge().unwrap();
        assert_eq!(merged.region, Some(Rect::from_corners(0, 0, 20, 20)));
        assert!(merged.regenerate);
    }

    #[test]
    fn any_full_surface_request_wins() {
        let mut q = PaintQueue::new();
        q.enqueue(Some(Rect::new(0, 0, 10, 10)), false);
        q.enqueue(None, false);
        q.enqueue(Some(Rect::new(100, 100, 1, 1)), false);

        let merged = q.drain_and_merge().unwrap();
        assert!(merged.is_full_surface());
        assert!(!merged.regenerate);
    }

    #[test]
    fn single_request_is_returned_unchanged() {
        let mut q = PaintQueue::new();
        q.enqueue(Some(Rect::new(1, 2, 3, 4)), false);
        assert_eq!(
            q.drain_and_merge(),
            Some(PaintRequest::new(Some(Rect::new(1, 2, 3, 4)), false))
        );
    }

    #[test]
    fn drained_requests_are_not_merged_twice() {
        let mut q = PaintQueue::new();
        q.enqueue(Some(Rect::new(0, 0, 1, 1)), true);
        let _ = q.drain_and_merge();

        q.enqueue(Some(Rect::new(50, 50, 1, 1)), false);
        let second = q.drain_and_merge().unwrap();
        assert_eq!(second.region, Some(Rect::new(50, 50, 1, 1)));
        assert!(!second.regenerate);
    }

    #[test]
    fn coalesce_take_matches_drain() {
        let mut q = PaintQueue::new();
        Coalesce::push(&mut q, PaintRequest::everything());
        assert_eq!(q.len(), 1);
        assert_eq!(q.take(), Some(PaintRequest::everything()));
        assert!(Coalesce::is_empty(&q));
    }
}
