//! # rastio-core
//!
//! Core types for windowed raster data access.
//!
//! This crate provides the foundational types used throughout the RASTIO-RS
//! ecosystem:
//!
//! - [`RasterKind`], [`Sample`] - Runtime sample kinds and the raw byte codec
//! - [`copy_words`], [`replicate_word`] - The kind-conversion kernel with
//!   saturating and rounding semantics
//! - [`Window`], [`FloatWindow`] - Pixel and sub-pixel request geometry
//! - [`Progress`] - Progress reporting with cooperative cancellation
//! - [`Error`], [`Result`] - Error types shared by the whole stack
//!
//! ## Design Philosophy
//!
//! Sample kinds are **runtime values, not type parameters**. Bands of
//! different kinds flow through one cache and one access engine; generic
//! per-kind code exists only at the leaves, reached by dispatching on a
//! [`RasterKind`]:
//!
//! ```ignore
//! let mut out = vec![0u8; 4]; // one f32 word
//! copy_words(&src, band.kind(), 2, &mut out, RasterKind::F32, 4, 1);
//! ```
//!
//! ## Crate Structure
//!
//! This crate is the foundation of RASTIO-RS and has no internal
//! dependencies:
//!
//! ```text
//! rastio-core (this crate)
//!    ^
//!    |
//!    +-- rastio-io (block cache, windowed access engine)
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod copy;
pub mod error;
pub mod pixel;
pub mod progress;
pub mod window;

// Re-exports for convenience
pub use copy::{copy_words, replicate_word, ConvertFrom};
pub use error::{Error, Result};
pub use pixel::{read_complex, write_complex, Complex, RasterKind, Sample};
pub use progress::{Progress, ProgressFn};
pub use window::{FloatWindow, Window};

/// Prelude module for convenient imports.
///
/// # Usage
///
/// ```
/// use rastio_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::copy::{copy_words, replicate_word};
    pub use crate::error::{Error, Result};
    pub use crate::pixel::{RasterKind, Sample};
    pub use crate::progress::{Progress, ProgressFn};
    pub use crate::window::{FloatWindow, Window};
}
