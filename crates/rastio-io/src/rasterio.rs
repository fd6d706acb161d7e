//! The windowed access engine.
//!
//! # Overview
//!
//! [`rasterio`] satisfies one read or write of a rectangular window on a
//! band, at an output size and sample kind of the caller's choosing, by
//! mapping the request onto a bounded set of block accesses. Four mutually
//! exclusive strategies are tried in order:
//!
//! 1. **Overview substitution** - a downsampled read with a suitable
//!    overview recurses against the coarser band, window rescaled;
//! 2. **Full-row fast path** - 1:1 on a band whose blocks span the raster
//!    width, with a packed buffer: whole rows move in single conversions;
//! 3. **1:1 general path** - 1:1 across a multi-block-per-row grid: walk
//!    the intersected blocks, copy the covered span of each row;
//! 4. **Scaled path** - sizes differ: nearest-neighbour stepping (always
//!    for writes), or the chunked kernel resampler for elaborate read
//!    algorithms.
//!
//! The branch order is behavior, not just performance: overview
//! substitution changes which pixels are read at all.
//!
//! Every branch reports progress per row group or chunk and aborts with
//! [`rastio_core::Error::Cancelled`] when the callback vetoes.
//!
//! # Example
//!
//! ```rust,ignore
//! let shape = BufferShape::packed(64, 64, RasterKind::F32);
//! let mut out = vec![0u8; shape.min_bytes()];
//! band.read_window(Window::new(128, 128, 64, 64), &mut out, &shape)?;
//! ```

use rastio_core::{copy_words, Error, FloatWindow, Progress, RasterKind, Result, Window};
use tracing::debug;

use crate::band::RasterBand;
use crate::overview::select_level;
use crate::resample::{read_resampled, KernelRegistry, Resampling};

/// Direction of a windowed access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Band to caller buffer.
    Read,
    /// Caller buffer to band.
    Write,
}

/// Layout of a caller-supplied pixel buffer.
///
/// Strides are in bytes. `pixel_stride` separates consecutive pixels of a
/// row, `line_stride` consecutive rows; both may exceed the packed size to
/// interleave several bands in one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferShape {
    /// Buffer width in pixels.
    pub width: usize,
    /// Buffer height in pixels.
    pub height: usize,
    /// Sample kind of the buffer.
    pub kind: RasterKind,
    /// Bytes between consecutive pixels.
    pub pixel_stride: usize,
    /// Bytes between consecutive rows.
    pub line_stride: usize,
}

impl BufferShape {
    /// A tightly packed row-major buffer of `width` x `height` samples.
    pub fn packed(width: usize, height: usize, kind: RasterKind) -> Self {
        let word = kind.size_bytes();
        Self {
            width,
            height,
            kind,
            pixel_stride: word,
            line_stride: word * width,
        }
    }

    /// A buffer with explicit strides.
    pub fn with_strides(
        width: usize,
        height: usize,
        kind: RasterKind,
        pixel_stride: usize,
        line_stride: usize,
    ) -> Self {
        Self {
            width,
            height,
            kind,
            pixel_stride,
            line_stride,
        }
    }

    /// Minimum buffer length in bytes for this shape.
    pub fn min_bytes(&self) -> usize {
        if self.width == 0 || self.height == 0 {
            return 0;
        }
        (self.height - 1) * self.line_stride
            + (self.width - 1) * self.pixel_stride
            + self.kind.size_bytes()
    }

    #[inline]
    fn word(&self) -> usize {
        self.kind.size_bytes()
    }
}

/// The caller's buffer, carrying the access direction in its variant.
#[derive(Debug)]
pub enum IoBuffer<'a> {
    /// Destination of a read.
    Read(&'a mut [u8]),
    /// Source of a write.
    Write(&'a [u8]),
}

impl IoBuffer<'_> {
    /// The access direction this buffer implies.
    #[inline]
    pub fn mode(&self) -> AccessMode {
        match self {
            Self::Read(_) => AccessMode::Read,
            Self::Write(_) => AccessMode::Write,
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Read(buf) => buf.len(),
            Self::Write(buf) => buf.len(),
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Copy, Default)]
pub struct IoOptions<'a> {
    /// Resampling algorithm for scaled requests.
    pub resampling: Resampling,
    /// Sub-pixel window override. When a large scaled request is split into
    /// tiles, passing each tile's exact fractional source window here makes
    /// the tiles reproduce the unsplit request bit for bit.
    pub window_override: Option<FloatWindow>,
    /// Kernel registry for elaborate algorithms; the built-in registry is
    /// used when absent.
    pub registry: Option<&'a KernelRegistry>,
}

/// Reads or writes `window` on `band` through the caller's buffer.
///
/// See the module documentation for the strategy ladder. All validation
/// happens up front; after the first block is touched the only failure
/// sources are the block source and the progress callback.
pub fn rasterio(
    band: &RasterBand,
    window: Window,
    mut buffer: IoBuffer<'_>,
    shape: &BufferShape,
    options: &IoOptions<'_>,
    progress: &mut Progress<'_>,
) -> Result<()> {
    if window.right() > band.width() || window.bottom() > band.height() {
        return Err(Error::InvalidWindow {
            x: window.x,
            y: window.y,
            width: window.width,
            height: window.height,
            raster_width: band.width(),
            raster_height: band.height(),
        });
    }
    if window.is_empty() || shape.width == 0 || shape.height == 0 {
        return Ok(());
    }
    if buffer.len() < shape.min_bytes() {
        return Err(Error::BufferTooSmall {
            needed: shape.min_bytes(),
            got: buffer.len(),
        });
    }
    if let Some(f) = options.window_override {
        // The sub-pixel override refines `window`; one lying outside it
        // would make the resampler read source pixels the window never
        // covered. The slack absorbs rounding from overview rescaling.
        const SLACK: f64 = 1e-8;
        let contained = f.width > 0.0
            && f.height > 0.0
            && f.x >= window.x as f64 - SLACK
            && f.y >= window.y as f64 - SLACK
            && f.x + f.width <= window.right() as f64 + SLACK
            && f.y + f.height <= window.bottom() as f64 + SLACK;
        if !contained {
            return Err(Error::invalid_argument(format!(
                "window override ({}, {}, {}x{}) lies outside window ({}, {}, {}x{})",
                f.x, f.y, f.width, f.height, window.x, window.y, window.width, window.height
            )));
        }
    }
    if buffer.mode() == AccessMode::Write {
        band.ensure_writable()?;
    }

    // 1. Overview substitution.
    if buffer.mode() == AccessMode::Read
        && (shape.width < window.width || shape.height < window.height)
        && !band.overviews().is_empty()
    {
        if let Some(choice) = select_level(
            band,
            &window,
            options.window_override,
            shape.width,
            shape.height,
        ) {
            debug!(
                level = choice.index,
                window = ?choice.window,
                "substituting overview for downsampled read"
            );
            let sub_options = IoOptions {
                window_override: choice.float_window,
                ..*options
            };
            let overview = &band.overviews()[choice.index].band;
            return rasterio(overview, choice.window, buffer, shape, &sub_options, progress);
        }
    }

    if shape.width == window.width && shape.height == window.height {
        // 2. Full-row fast path.
        if band.block_width() == band.width() && shape.pixel_stride == shape.word() {
            return full_row_path(band, window, buffer, shape, progress);
        }
        // 3. 1:1 general path.
        return one_to_one_path(band, window, buffer, shape, progress);
    }

    // 4. Scaled path.
    match buffer.mode() {
        AccessMode::Write => write_scaled_path(band, window, buffer, shape, progress),
        AccessMode::Read => {
            let fwin = options.window_override.unwrap_or_else(|| window.to_float());
            if options.resampling == Resampling::Nearest || band.kind().is_complex() {
                if options.resampling != Resampling::Nearest {
                    debug!(
                        alg = %options.resampling,
                        "complex band: falling back to nearest resampling"
                    );
                }
                read_nearest_path(band, window, fwin, buffer, shape, progress)
            } else {
                let IoBuffer::Read(dst) = &mut buffer else {
                    unreachable!()
                };
                read_resampled(
                    band,
                    window,
                    fwin,
                    dst,
                    shape,
                    options.resampling,
                    options.registry,
                    progress,
                )
            }
        }
    }
}

/// 1:1 transfer on a band whose blocks span the full raster width.
fn full_row_path(
    band: &RasterBand,
    window: Window,
    mut buffer: IoBuffer<'_>,
    shape: &BufferShape,
    progress: &mut Progress<'_>,
) -> Result<()> {
    let band_word = band.kind().size_bytes();
    let bh = band.block_height();
    let is_write = buffer.mode() == AccessMode::Write;

    let mut y = 0;
    while y < window.height {
        let src_y = window.y + y;
        let block_row = src_y / bh;
        let block_y = src_y - block_row * bh;
        let rows = (bh - block_y).min(window.height - y);

        let block_win = band.block_window(0, block_row);
        let covers_block = window.x == 0
            && window.width == band.width()
            && block_y == 0
            && rows >= block_win.height;
        let block = band.locked_block(0, block_row, is_write && covers_block)?;
        {
            let mut data = block.data();
            for r in 0..rows {
                let block_off = block.offset_of(window.x, block_y + r);
                let buf_off = (y + r) * shape.line_stride;
                match &mut buffer {
                    IoBuffer::Read(dst) => copy_words(
                        &data[block_off..],
                        band.kind(),
                        band_word,
                        &mut dst[buf_off..],
                        shape.kind,
                        shape.pixel_stride,
                        window.width,
                    ),
                    IoBuffer::Write(src) => copy_words(
                        &src[buf_off..],
                        shape.kind,
                        shape.pixel_stride,
                        &mut data[block_off..],
                        band.kind(),
                        band_word,
                        window.width,
                    ),
                }
            }
        }
        if is_write {
            block.mark_dirty();
        }

        y += rows;
        progress.report(y as f64 / window.height as f64)?;
    }
    Ok(())
}

/// 1:1 transfer across a multi-block-per-row grid.
fn one_to_one_path(
    band: &RasterBand,
    window: Window,
    mut buffer: IoBuffer<'_>,
    shape: &BufferShape,
    progress: &mut Progress<'_>,
) -> Result<()> {
    let bw = band.block_width();
    let bh = band.block_height();
    let band_word = band.kind().size_bytes();
    let is_write = buffer.mode() == AccessMode::Write;

    let row0 = window.y / bh;
    let row1 = (window.bottom() - 1) / bh;
    let col0 = window.x / bw;
    let col1 = (window.right() - 1) / bw;

    for block_row in row0..=row1 {
        let y_start = window.y.max(block_row * bh);
        let y_end = window.bottom().min(block_row * bh + bh);

        for block_col in col0..=col1 {
            let x_start = window.x.max(block_col * bw);
            let x_end = window.right().min(block_col * bw + bw);
            let span = x_end - x_start;

            // A write that swallows the block's whole valid extent never
            // needs the prior content decoded.
            let covers_block = window.contains_window(&band.block_window(block_col, block_row));
            let block = band.locked_block(block_col, block_row, is_write && covers_block)?;
            {
                let mut data = block.data();
                for y in y_start..y_end {
                    let block_off =
                        block.offset_of(x_start - block_col * bw, y - block_row * bh);
                    let buf_off = (y - window.y) * shape.line_stride
                        + (x_start - window.x) * shape.pixel_stride;
                    match &mut buffer {
                        IoBuffer::Read(dst) => copy_words(
                            &data[block_off..],
                            band.kind(),
                            band_word,
                            &mut dst[buf_off..],
                            shape.kind,
                            shape.pixel_stride,
                            span,
                        ),
                        IoBuffer::Write(src) => copy_words(
                            &src[buf_off..],
                            shape.kind,
                            shape.pixel_stride,
                            &mut data[block_off..],
                            band.kind(),
                            band_word,
                            span,
                        ),
                    }
                }
            }
            if is_write {
                block.mark_dirty();
            }
        }

        progress.report((y_end - window.y) as f64 / window.height as f64)?;
    }
    Ok(())
}

/// Scaled read by nearest-neighbour stepping.
fn read_nearest_path(
    band: &RasterBand,
    window: Window,
    fwin: FloatWindow,
    mut buffer: IoBuffer<'_>,
    shape: &BufferShape,
    progress: &mut Progress<'_>,
) -> Result<()> {
    let IoBuffer::Read(dst) = &mut buffer else {
        unreachable!()
    };
    let bw = band.block_width();
    let bh = band.block_height();
    let band_kind = band.kind();

    let scale_x = fwin.width / shape.width as f64;
    let scale_y = fwin.height / shape.height as f64;

    // Source column of each output column, clamped into the window; the
    // sequence is non-decreasing, so runs share one block lookup.
    let src_x: Vec<usize> = (0..shape.width)
        .map(|bx| {
            let sx = (fwin.x + (bx as f64 + 0.5) * scale_x).floor().max(window.x as f64);
            (sx as usize).min(window.right() - 1)
        })
        .collect();

    for by in 0..shape.height {
        let sy = (fwin.y + (by as f64 + 0.5) * scale_y).floor().max(window.y as f64);
        let sy = (sy as usize).min(window.bottom() - 1);
        let block_row = sy / bh;
        let block_y = sy - block_row * bh;

        let mut bx = 0;
        while bx < shape.width {
            let block_col = src_x[bx] / bw;
            let mut bx_end = bx + 1;
            while bx_end < shape.width && src_x[bx_end] / bw == block_col {
                bx_end += 1;
            }

            let block = band.locked_block(block_col, block_row, false)?;
            let data = block.data();
            for i in bx..bx_end {
                let block_off = block.offset_of(src_x[i] - block_col * bw, block_y);
                let buf_off = by * shape.line_stride + i * shape.pixel_stride;
                copy_words(
                    &data[block_off..],
                    band_kind,
                    0,
                    &mut dst[buf_off..],
                    shape.kind,
                    0,
                    1,
                );
            }
            bx = bx_end;
        }

        progress.report((by + 1) as f64 / shape.height as f64)?;
    }
    Ok(())
}

/// Scaled write: every raster pixel of the window receives the value of its
/// nearest buffer pixel.
fn write_scaled_path(
    band: &RasterBand,
    window: Window,
    buffer: IoBuffer<'_>,
    shape: &BufferShape,
    progress: &mut Progress<'_>,
) -> Result<()> {
    let IoBuffer::Write(src) = &buffer else {
        unreachable!()
    };
    let bw = band.block_width();
    let bh = band.block_height();
    let band_kind = band.kind();

    let row0 = window.y / bh;
    let row1 = (window.bottom() - 1) / bh;
    let col0 = window.x / bw;
    let col1 = (window.right() - 1) / bw;

    for block_row in row0..=row1 {
        let y_start = window.y.max(block_row * bh);
        let y_end = window.bottom().min(block_row * bh + bh);

        for block_col in col0..=col1 {
            let x_start = window.x.max(block_col * bw);
            let x_end = window.right().min(block_col * bw + bw);

            let covers_block = window.contains_window(&band.block_window(block_col, block_row));
            let block = band.locked_block(block_col, block_row, covers_block)?;
            {
                let mut data = block.data();
                for y in y_start..y_end {
                    let by = (y - window.y) * shape.height / window.height;
                    for x in x_start..x_end {
                        let bx = (x - window.x) * shape.width / window.width;
                        let buf_off = by * shape.line_stride + bx * shape.pixel_stride;
                        let block_off =
                            block.offset_of(x - block_col * bw, y - block_row * bh);
                        copy_words(
                            &src[buf_off..],
                            shape.kind,
                            0,
                            &mut data[block_off..],
                            band_kind,
                            0,
                            1,
                        );
                    }
                }
            }
            block.mark_dirty();
        }

        progress.report((y_end - window.y) as f64 / window.height as f64)?;
    }
    Ok(())
}
