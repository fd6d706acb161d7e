//! Window geometry for rectangular raster requests.
//!
//! A [`Window`] is the caller-specified region of a band being read or
//! written, in pixels, origin at the top-left of the raster. A
//! [`FloatWindow`] carries the same region at sub-pixel precision; the
//! engine uses it so that tiled sub-requests of a downsampled read
//! reproduce bit-identical results to one large request.
//!
//! # Example
//!
//! ```rust
//! use rastio_core::Window;
//!
//! let win = Window::new(10, 20, 100, 50);
//! assert_eq!(win.right(), 110);
//! assert!(win.contains(10, 69));
//! let clipped = win.intersect(&Window::new(0, 0, 64, 64)).unwrap();
//! assert_eq!((clipped.width, clipped.height), (54, 44));
//! ```

/// A pixel-aligned rectangular window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Window {
    /// X origin (left edge).
    pub x: usize,
    /// Y origin (top edge).
    pub y: usize,
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
}

impl Window {
    /// Creates a new window.
    #[inline]
    pub const fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A window covering a full raster of the given size.
    #[inline]
    pub const fn of_raster(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    /// One-past-the-right edge.
    #[inline]
    pub const fn right(&self) -> usize {
        self.x + self.width
    }

    /// One-past-the-bottom edge.
    #[inline]
    pub const fn bottom(&self) -> usize {
        self.y + self.height
    }

    /// Whether the window covers zero pixels.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels covered.
    #[inline]
    pub const fn area(&self) -> usize {
        self.width * self.height
    }

    /// Whether the pixel (x, y) lies inside the window.
    #[inline]
    pub const fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Whether `other` lies entirely inside this window.
    #[inline]
    pub const fn contains_window(&self, other: &Window) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Intersection with `other`, or `None` when disjoint.
    pub fn intersect(&self, other: &Window) -> Option<Window> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right > x && bottom > y {
            Some(Window::new(x, y, right - x, bottom - y))
        } else {
            None
        }
    }

    /// The same region at floating-point precision.
    #[inline]
    pub fn to_float(&self) -> FloatWindow {
        FloatWindow {
            x: self.x as f64,
            y: self.y as f64,
            width: self.width as f64,
            height: self.height as f64,
        }
    }
}

/// A sub-pixel precision window override.
///
/// When a large downsampled request is split into tiles, each tile's
/// integer window loses the fractional source position of its first output
/// pixel. Supplying the exact fractional window restores it, so the split
/// request samples the same source pixels as the unsplit one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FloatWindow {
    /// X origin.
    pub x: f64,
    /// Y origin.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl FloatWindow {
    /// Creates a new floating-point window.
    #[inline]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges() {
        let w = Window::new(4, 6, 10, 3);
        assert_eq!(w.right(), 14);
        assert_eq!(w.bottom(), 9);
        assert_eq!(w.area(), 30);
        assert!(!w.is_empty());
        assert!(Window::new(0, 0, 0, 5).is_empty());
    }

    #[test]
    fn test_contains() {
        let w = Window::new(2, 2, 4, 4);
        assert!(w.contains(2, 2));
        assert!(w.contains(5, 5));
        assert!(!w.contains(6, 5));
        assert!(w.contains_window(&Window::new(3, 3, 2, 2)));
        assert!(!w.contains_window(&Window::new(3, 3, 4, 2)));
    }

    #[test]
    fn test_intersect() {
        let a = Window::new(0, 0, 10, 10);
        let b = Window::new(6, 8, 10, 10);
        let c = a.intersect(&b).unwrap();
        assert_eq!(c, Window::new(6, 8, 4, 2));
        assert!(a.intersect(&Window::new(10, 0, 2, 2)).is_none());
    }

    #[test]
    fn test_to_float() {
        let f = Window::new(1, 2, 3, 4).to_float();
        assert_eq!(f, FloatWindow::new(1.0, 2.0, 3.0, 4.0));
    }
}
