//! # rastio-io
//!
//! Block cache and windowed I/O engine for tiled raster data.
//!
//! This crate turns "read me this window, at this size, in this kind" into
//! a bounded set of accesses to fixed-size blocks that are expensive to
//! decode:
//!
//! - [`Block`], [`BlockRef`] - A cached tile and its RAII lock
//! - [`BandBlockCache`] - The per-band live-block set with recycling
//! - [`RasterBand`], [`BlockSource`] - One channel and its decode/write-back
//!   collaborator
//! - [`rasterio`] - The windowed access engine and its strategy ladder
//! - [`select_level`] - Overview substitution for downsampled reads
//! - [`Resampling`], [`KernelRegistry`] - Scaled-read algorithms
//! - [`Dataset`] - Band collections, interleaved access, cache budget
//! - [`MemSource`] - In-memory block source for tests and synthetic data
//!
//! ## Design Philosophy
//!
//! Blocks are the only unit of storage access. Whatever a request looks
//! like, it decomposes into locked block references; while a [`BlockRef`]
//! lives, its block cannot be evicted or recycled. Format decoding stays
//! behind the narrow [`BlockSource`] seam.
//!
//! ```ignore
//! let shape = BufferShape::packed(2, 2, RasterKind::U8);
//! let mut out = [0u8; 4];
//! band.read_window(Window::new(1, 1, 2, 2), &mut out, &shape)?;
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//! rastio-core (kinds, windows, conversion kernel)
//!    ^
//!    |
//! rastio-io (this crate)
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod band;
pub mod block;
pub mod cache;
pub mod dataset;
pub mod mem;
pub mod overview;
pub mod rasterio;
pub mod resample;

// Re-exports for convenience
pub use band::{BandOptions, BlockSource, Overview, OverviewKind, RasterBand};
pub use block::{Block, BlockRef};
pub use cache::{BandBlockCache, CacheStrategy};
pub use dataset::{CacheBudget, Dataset};
pub use mem::MemSource;
pub use overview::{select_level, OverviewChoice};
pub use rasterio::{rasterio, AccessMode, BufferShape, IoBuffer, IoOptions};
pub use resample::{Kernel, KernelRegistry, Resampling};

/// Prelude module for convenient imports.
///
/// # Usage
///
/// ```
/// use rastio_io::prelude::*;
/// ```
pub mod prelude {
    pub use crate::band::{BandOptions, BlockSource, OverviewKind, RasterBand};
    pub use crate::block::BlockRef;
    pub use crate::cache::CacheStrategy;
    pub use crate::dataset::{CacheBudget, Dataset};
    pub use crate::mem::MemSource;
    pub use crate::rasterio::{rasterio, AccessMode, BufferShape, IoBuffer, IoOptions};
    pub use crate::resample::{KernelRegistry, Resampling};
    pub use rastio_core::prelude::*;
}
