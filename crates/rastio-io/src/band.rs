//! Raster bands: one channel of pixel data with its own block cache.
//!
//! # Overview
//!
//! A [`RasterBand`] ties together the band geometry (raster and block
//! dimensions, sample kind), the [`BandBlockCache`] holding decoded blocks,
//! and the [`BlockSource`] that decodes and writes back raw block content.
//! The windowed access engine in [`crate::rasterio`] drives everything
//! through [`RasterBand::locked_block`].
//!
//! A band optionally carries a list of overview bands, full bands at
//! coarser resolution, which the engine substitutes for downsampled reads.
//!
//! Write-back failures are remembered per band: once a dirty block fails to
//! flush, every following write on the band fails with the recorded error
//! until [`RasterBand::take_flush_error`] acknowledges it. Lost pixels can
//! not hide behind later writes that appear to succeed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rastio_core::{
    copy_words, write_complex, Complex, Error, Progress, RasterKind, Result, Sample, Window,
};
use tracing::warn;

use crate::block::{Block, BlockRef};
use crate::cache::{BandBlockCache, CacheStrategy};
use crate::rasterio::{rasterio, BufferShape, IoBuffer, IoOptions};

/// Decode and write-back collaborator for one band.
///
/// Implemented per storage format; [`crate::mem::MemSource`] is the
/// in-memory implementation used by tests. Buffers are always full block
/// size; for edge blocks only the valid area carries meaning.
pub trait BlockSource: Send + Sync {
    /// Decodes the block at (col, row) into `data`.
    fn read_block(&self, col: usize, row: usize, data: &mut [u8]) -> Result<()>;

    /// Writes the block at (col, row) back to storage.
    fn write_block(&self, col: usize, row: usize, data: &[u8]) -> Result<()>;
}

impl<T: BlockSource + ?Sized> BlockSource for Arc<T> {
    fn read_block(&self, col: usize, row: usize, data: &mut [u8]) -> Result<()> {
        (**self).read_block(col, row, data)
    }

    fn write_block(&self, col: usize, row: usize, data: &[u8]) -> Result<()> {
        (**self).write_block(col, row, data)
    }
}

/// How an overview band was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverviewKind {
    /// Ordinary reduced-resolution pixel data; usable for any read.
    Pixel,
    /// Statistical or otherwise synthetic content (e.g. a bit-to-grayscale
    /// rendering); never substituted for ordinary pixel access.
    Statistical,
}

/// An overview entry on a band.
#[derive(Debug, Clone)]
pub struct Overview {
    /// How the overview was produced.
    pub kind: OverviewKind,
    /// The overview band itself.
    pub band: Arc<RasterBand>,
}

/// Construction parameters for a [`RasterBand`].
#[derive(Debug, Clone)]
pub struct BandOptions {
    /// Raster width in pixels.
    pub width: usize,
    /// Raster height in pixels.
    pub height: usize,
    /// Block width in pixels.
    pub block_width: usize,
    /// Block height in pixels.
    pub block_height: usize,
    /// Sample kind.
    pub kind: RasterKind,
    /// No-data marker value, consulted by kernel resampling.
    pub nodata: Option<f64>,
    /// Live-set storage strategy.
    pub strategy: CacheStrategy,
}

impl BandOptions {
    /// Options for a `width` x `height` band of `kind` with the given block
    /// size, no no-data value, and automatic cache strategy.
    pub fn new(
        width: usize,
        height: usize,
        block_width: usize,
        block_height: usize,
        kind: RasterKind,
    ) -> Self {
        Self {
            width,
            height,
            block_width,
            block_height,
            kind,
            nodata: None,
            strategy: CacheStrategy::Auto,
        }
    }

    /// Sets the no-data marker value.
    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    /// Sets the cache strategy.
    pub fn with_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Misses tolerated per cached block before the thrashing warning fires.
const THRASH_FACTOR: usize = 2;

/// One raster channel with its block cache and block source.
pub struct RasterBand {
    width: usize,
    height: usize,
    block_width: usize,
    block_height: usize,
    kind: RasterKind,
    nodata: Option<f64>,
    source: Box<dyn BlockSource>,
    cache: BandBlockCache,
    overviews: Vec<Overview>,
    flush_error: Mutex<Option<Error>>,
    misses: AtomicUsize,
    thrash_warned: AtomicBool,
}

impl RasterBand {
    /// Creates a band over `source`.
    ///
    /// Fails if any dimension is zero.
    pub fn new(options: BandOptions, source: Box<dyn BlockSource>) -> Result<Self> {
        if options.width == 0
            || options.height == 0
            || options.block_width == 0
            || options.block_height == 0
        {
            return Err(Error::invalid_argument(
                "band and block dimensions must be non-zero",
            ));
        }
        let cols = options.width.div_ceil(options.block_width);
        let rows = options.height.div_ceil(options.block_height);
        Ok(Self {
            width: options.width,
            height: options.height,
            block_width: options.block_width,
            block_height: options.block_height,
            kind: options.kind,
            nodata: options.nodata,
            source,
            cache: BandBlockCache::new(options.strategy, cols, rows),
            overviews: Vec::new(),
            flush_error: Mutex::new(None),
            misses: AtomicUsize::new(0),
            thrash_warned: AtomicBool::new(false),
        })
    }

    /// Raster width in pixels.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Raster height in pixels.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Block width in pixels.
    #[inline]
    pub fn block_width(&self) -> usize {
        self.block_width
    }

    /// Block height in pixels.
    #[inline]
    pub fn block_height(&self) -> usize {
        self.block_height
    }

    /// Sample kind.
    #[inline]
    pub fn kind(&self) -> RasterKind {
        self.kind
    }

    /// No-data marker value, if any.
    #[inline]
    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    /// Number of blocks per row.
    #[inline]
    pub fn blocks_per_row(&self) -> usize {
        self.width.div_ceil(self.block_width)
    }

    /// Number of blocks per column.
    #[inline]
    pub fn blocks_per_col(&self) -> usize {
        self.height.div_ceil(self.block_height)
    }

    /// Total number of blocks in the grid.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks_per_row() * self.blocks_per_col()
    }

    /// The block cache.
    #[inline]
    pub fn cache(&self) -> &BandBlockCache {
        &self.cache
    }

    /// Window covered by the full raster.
    #[inline]
    pub fn full_window(&self) -> Window {
        Window::of_raster(self.width, self.height)
    }

    /// Attaches an overview band. Overviews must be pushed in decreasing
    /// resolution order.
    pub fn push_overview(&mut self, kind: OverviewKind, band: Arc<RasterBand>) {
        debug_assert!(band.width <= self.width && band.height <= self.height);
        self.overviews.push(Overview { kind, band });
    }

    /// Attached overviews, finest first.
    #[inline]
    pub fn overviews(&self) -> &[Overview] {
        &self.overviews
    }

    /// Valid pixel extent of the block at (col, row).
    pub(crate) fn block_valid_size(&self, col: usize, row: usize) -> (usize, usize) {
        let w = (self.width - col * self.block_width).min(self.block_width);
        let h = (self.height - row * self.block_height).min(self.block_height);
        (w, h)
    }

    /// Raster window covered by the valid area of the block at (col, row).
    pub(crate) fn block_window(&self, col: usize, row: usize) -> Window {
        let (w, h) = self.block_valid_size(col, row);
        Window::new(col * self.block_width, row * self.block_height, w, h)
    }

    /// Returns a locked reference to the cached block at (col, row) without
    /// creating it on a miss.
    pub fn try_locked_block(&self, col: usize, row: usize) -> Result<Option<BlockRef>> {
        self.check_block_offset(col, row)?;
        Ok(self.cache.try_locked(col, row))
    }

    /// Returns a locked reference to the block at (col, row), creating and
    /// populating it on a miss.
    ///
    /// With `initialize_only` set, a missing block is left zeroed instead of
    /// decoded; callers use this when they are about to overwrite every
    /// valid pixel of the block.
    pub fn locked_block(&self, col: usize, row: usize, initialize_only: bool) -> Result<BlockRef> {
        self.check_block_offset(col, row)?;
        if let Some(reference) = self.cache.try_locked(col, row) {
            return Ok(reference);
        }

        self.note_miss();
        let bytes = self.block_width * self.block_height * self.kind.size_bytes();
        let mut buffer = self.cache.allocate(bytes)?;
        if !initialize_only {
            if let Err(err) = self.source.read_block(col, row, &mut buffer) {
                self.cache.release_buffer(buffer);
                return Err(err);
            }
        }
        let (valid_w, valid_h) = self.block_valid_size(col, row);
        let block = Arc::new(Block::new(
            col,
            row,
            self.block_width,
            self.block_height,
            valid_w,
            valid_h,
            self.kind,
            buffer,
        ));
        Ok(self.cache.adopt(block))
    }

    fn check_block_offset(&self, col: usize, row: usize) -> Result<()> {
        let cols = self.blocks_per_row();
        let rows = self.blocks_per_col();
        if col >= cols || row >= rows {
            return Err(Error::IllegalBlockOffset {
                col,
                row,
                cols,
                rows,
            });
        }
        Ok(())
    }

    fn note_miss(&self) {
        let misses = self.misses.fetch_add(1, Ordering::Relaxed) + 1;
        if misses > self.block_count() * THRASH_FACTOR
            && !self.thrash_warned.swap(true, Ordering::Relaxed)
        {
            warn!(
                misses,
                blocks = self.block_count(),
                "potential thrashing: blocks re-decoded more often than cached"
            );
        }
    }

    /// Reads `window` into `buffer` with default options and no progress
    /// reporting.
    pub fn read_window(&self, window: Window, buffer: &mut [u8], shape: &BufferShape) -> Result<()> {
        rasterio(
            self,
            window,
            IoBuffer::Read(buffer),
            shape,
            &IoOptions::default(),
            &mut Progress::none(),
        )
    }

    /// Reads `window` into `buffer` with explicit options and progress.
    pub fn read_window_with(
        &self,
        window: Window,
        buffer: &mut [u8],
        shape: &BufferShape,
        options: &IoOptions<'_>,
        progress: &mut Progress<'_>,
    ) -> Result<()> {
        rasterio(self, window, IoBuffer::Read(buffer), shape, options, progress)
    }

    /// Writes `buffer` into `window` with default options and no progress
    /// reporting.
    pub fn write_window(&self, window: Window, buffer: &[u8], shape: &BufferShape) -> Result<()> {
        rasterio(
            self,
            window,
            IoBuffer::Write(buffer),
            shape,
            &IoOptions::default(),
            &mut Progress::none(),
        )
    }

    /// Writes `buffer` into `window` with explicit options and progress.
    pub fn write_window_with(
        &self,
        window: Window,
        buffer: &[u8],
        shape: &BufferShape,
        options: &IoOptions<'_>,
        progress: &mut Progress<'_>,
    ) -> Result<()> {
        rasterio(self, window, IoBuffer::Write(buffer), shape, options, progress)
    }

    /// Sets every pixel of the band to (`real`, `imag`).
    ///
    /// For real bands `imag` is ignored. The value is converted to the
    /// band's kind once and replicated, and blocks are created without
    /// decoding since every valid pixel is overwritten.
    pub fn fill(&self, real: f64, imag: f64) -> Result<()> {
        self.ensure_writable()?;

        // One CF64 source word covers every destination kind: complex
        // destinations convert both components, real destinations keep the
        // real part.
        let mut seed = [0u8; 16];
        write_complex(Complex::new(real, imag), &mut seed);
        let word = self.kind.size_bytes();
        let mut pattern = vec![0u8; word];
        copy_words(
            &seed,
            RasterKind::CF64,
            0,
            &mut pattern,
            self.kind,
            0,
            1,
        );

        for row in 0..self.blocks_per_col() {
            for col in 0..self.blocks_per_row() {
                let block = self.locked_block(col, row, true)?;
                let mut data = block.data();
                let count = data.len() / word;
                rastio_core::replicate_word(&pattern, self.kind, &mut data, self.kind, word, count);
                drop(data);
                block.mark_dirty();
            }
        }
        Ok(())
    }

    /// Deterministic 16-bit checksum of `window`, independent of block size.
    ///
    /// Pixels are converted to `i32` (complex bands contribute their real
    /// component) and folded position-weighted modulo 65535. Intended for
    /// tests and data comparison, like a band checksum utility.
    pub fn checksum(&self, window: Window) -> Result<u32> {
        let shape = BufferShape::packed(window.width, window.height, RasterKind::I32);
        let mut buffer = vec![0u8; shape.min_bytes()];
        self.read_window(window, &mut buffer, &shape)?;
        let mut sum: u32 = 0;
        for (i, chunk) in buffer.chunks_exact(4).enumerate() {
            let value = i32::read_from(chunk);
            let weight = (i % 34) as u32 + 1;
            sum = (sum + (value.unsigned_abs() % 65535) * weight) % 65535;
        }
        Ok(sum)
    }

    /// Flushes every cached block, writing dirty ones back when
    /// `write_dirty` is set.
    ///
    /// A write-back failure is recorded as the band's sticky flush error in
    /// addition to being returned.
    pub fn flush_cache(&self, write_dirty: bool) -> Result<()> {
        let result = self.cache.flush_all(write_dirty, &*self.source);
        if let Err(err) = &result {
            self.record_flush_error(err.clone());
        }
        result
    }

    /// Flushes the single block at (col, row), recording write-back failure
    /// as the sticky flush error.
    pub fn flush_block(&self, col: usize, row: usize, write_dirty: bool) -> Result<()> {
        self.check_block_offset(col, row)?;
        let result = self.cache.flush_one(col, row, write_dirty, &*self.source);
        if let Err(err) = &result {
            self.record_flush_error(err.clone());
        }
        result
    }

    /// Fails with the recorded flush error, if one is pending.
    pub(crate) fn ensure_writable(&self) -> Result<()> {
        match &*self.flush_error.lock().unwrap() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub(crate) fn record_flush_error(&self, err: Error) {
        self.flush_error.lock().unwrap().get_or_insert(err);
    }

    /// Takes and clears the sticky flush error, re-enabling writes.
    pub fn take_flush_error(&self) -> Option<Error> {
        self.flush_error.lock().unwrap().take()
    }
}

impl Drop for RasterBand {
    fn drop(&mut self) {
        // Best effort: unreachable dirty data is worth one attempt and a
        // warning, nothing more.
        if let Err(err) = self.cache.flush_all(true, &*self.source) {
            warn!(error = %err, "write-back failed during band teardown");
        }
        self.cache.wait_idle();
    }
}

impl std::fmt::Debug for RasterBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterBand")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("block_width", &self.block_width)
            .field("block_height", &self.block_height)
            .field("kind", &self.kind)
            .field("overviews", &self.overviews.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemSource;

    fn u8_band(width: usize, height: usize, bw: usize, bh: usize) -> RasterBand {
        let source = Arc::new(MemSource::new(width, height, bw, bh, RasterKind::U8));
        RasterBand::new(
            BandOptions::new(width, height, bw, bh, RasterKind::U8),
            Box::new(source),
        )
        .unwrap()
    }

    #[test]
    fn test_grid_geometry() {
        let band = u8_band(10, 7, 4, 3);
        assert_eq!(band.blocks_per_row(), 3);
        assert_eq!(band.blocks_per_col(), 3);
        assert_eq!(band.block_count(), 9);
        assert_eq!(band.block_valid_size(2, 2), (2, 1));
        assert_eq!(band.block_window(1, 0), Window::new(4, 0, 4, 3));
    }

    #[test]
    fn test_locked_block_caches() {
        let band = u8_band(8, 8, 4, 4);
        let a = band.locked_block(1, 1, false).unwrap();
        let b = band.locked_block(1, 1, false).unwrap();
        assert!(Arc::ptr_eq(a.block(), b.block()));
        assert_eq!(band.cache().len(), 1);
    }

    #[test]
    fn test_illegal_block_offset() {
        let band = u8_band(8, 8, 4, 4);
        let err = band.locked_block(2, 0, false).unwrap_err();
        assert!(matches!(err, Error::IllegalBlockOffset { .. }));
        assert!(band.try_locked_block(0, 5).is_err());
    }

    #[test]
    fn test_fill_and_checksum() {
        let band = u8_band(6, 6, 4, 4);
        band.fill(9.0, 0.0).unwrap();
        let full = band.full_window();
        let sum = band.checksum(full).unwrap();
        assert_ne!(sum, 0);
        // Same content, different block layout, same checksum.
        let other = u8_band(6, 6, 2, 3);
        other.fill(9.0, 0.0).unwrap();
        assert_eq!(other.checksum(full).unwrap(), sum);
    }

    #[test]
    fn test_zero_dims_rejected() {
        let source = Arc::new(MemSource::new(4, 4, 2, 2, RasterKind::U8));
        let err = RasterBand::new(
            BandOptions::new(4, 0, 2, 2, RasterKind::U8),
            Box::new(source),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
