//! Rectangle definition for repaint regions.
//!
//! A [`Rect`] describes a region of the canvas in canvas pixels. It is used
//! by paint requests, render jobs and the result slot to describe which part
//! of the surface is affected. A missing region (`None`) always means the
//! whole surface, so there is no "infinite" rect value.
//!
//! # Examples
//!
//! Merging two damaged areas:
//! ```
//! use canvas_repaint::render::Rect;
//!
//! let a = Rect::new(0, 0, 10, 10);
//! let b = Rect::new(5, 5, 20, 20);
//! assert_eq!(a.union(&b), Rect::new(0, 0, 25, 25));
//! ```

/// Axis aligned rectangle in canvas pixels.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Default)]
pub struct Rect {
    /// Horizontal offset in pixels from the origin.
    pub x: i32,

    /// Vertical offset in pixels from the origin.
    pub y: i32,

    /// Width in pixels.
    pub width: u32,

    /// Height in pixels.
    pub height: u32,
}

impl std::fmt::Debug for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rect {{ x: {}, y: {}, width: {}, height: {} }}",
            self.x, self.y, self.width, self.height
        )
    }
}

impl Rect {
    /// Creates a new [`Rect`] with the given position and size.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Creates the rect spanning corners `(x0, y0)` and `(x1, y1)`, given in any order.
    pub fn from_corners(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        let (left, right) = (x0.min(x1), x0.max(x1));
        let (top, bottom) = (y0.min(y1), y0.max(y1));
        Self {
            x: left,
            y: top,
            width: right.abs_diff(left),
            height: bottom.abs_diff(top),
        }
    }

    /// Right edge (exclusive).
    #[inline]
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Bottom edge (exclusive).
    #[inline]
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Returns true when `other` lies completely inside this rect.
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Smallest rect that covers both `self` and `other`.
    ///
    /// Edges are computed in 64 bits and clamped back into range, so huge
    /// rects saturate instead of wrapping.
    pub fn union(&self, other: &Rect) -> Rect {
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());

        Rect {
            x: left,
            y: top,
            width: (right - left as i64).clamp(0, u32::MAX as i64) as u32,
            height: (bottom - top as i64).clamp(0, u32::MAX as i64) as u32,
        }
    }
}

/// Union of two optional regions where `None` stands for the whole surface.
pub fn union_region(a: Option<Rect>, b: Option<Rect>) -> Option<Rect> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.union(&b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_covers_both_rects() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 20, 20);
        let u = a.union(&b);

        assert_eq!(u, Rect::new(0, 0, 25, 25));
        assert!(u.contains(&a));
        assert!(u.contains(&b));
    }

    #[test]
    fn corners_in_any_order() {
        assert_eq!(Rect::from_corners(5, 5, 20, 20), Rect::new(5, 5, 15, 15));
        assert_eq!(Rect::from_corners(20, 20, 5, 5), Rect::new(5, 5, 15, 15));
        assert!(Rect::from_corners(3, 3, 3, 9).is_empty());
    }

    #[test]
    fn union_with_negative_origin() {
        let a = Rect::new(-10, -5, 5, 5);
        let b = Rect::new(3, 4, 2, 2);
        assert_eq!(a.union(&b), Rect::new(-10, -5, 15, 11));
    }

    #[test]
    fn union_saturates_instead_of_wrapping() {
        let a = Rect::new(i32::MIN, 0, u32::MAX, 1);
        let b = Rect::new(i32::MAX - 1, 0, u32::MAX, 1);
        let u = a.union(&b);
        assert_eq!(u.x, i32::MIN);
        assert_eq!(u.width, u32::MAX);
    }

    #[test]
    fn none_region_absorbs_everything() {
        let a = Some(Rect::new(0, 0, 1, 1));
        assert_eq!(union_region(a, None), None);
        assert_eq!(union_region(None, a), None);
        assert_eq!(union_region(a, a), a);
    }

    #[test]
    fn debug_format_is_compact() {
        let r = Rect::new(1, 2, 3, 4);
        assert_eq!(format!("{r:?}"), "Rect { x: 1, y: 2, width: 3, height: 4 }");
    }
}
