//! Resampling algorithms for scaled reads.
//!
//! # Overview
//!
//! [`Resampling`] names the algorithm a request asks for. Nearest-neighbour
//! is handled inline by the access engine; the elaborate algorithms live
//! here, split in two families:
//!
//! - convolution kernels (bilinear, cubic, cubic-spline, Lanczos, gaussian),
//!   looked up by name in a [`KernelRegistry`];
//! - aggregates (average, mode) computed over the source footprint of each
//!   output pixel.
//!
//! The registry is an explicit object so tests can register fake kernels;
//! there is no global kernel table.
//!
//! [`read_resampled`] processes the output in row chunks against a fixed
//! working-buffer budget: each chunk reads a kernel-padded source window at
//! 1:1 through the engine, widens it to `f64`, applies the no-data mask
//! (fully valid and fully invalid chunks short-circuit), convolves or
//! aggregates, and converts into the caller's buffer.

use std::collections::HashMap;

use rastio_core::{
    copy_words, Error, FloatWindow, Progress, RasterKind, Result, Sample, Window,
};
use tracing::debug;

use crate::band::RasterBand;
use crate::rasterio::{rasterio, BufferShape, IoBuffer, IoOptions};

/// Resampling algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Resampling {
    /// Nearest-neighbour; the only algorithm valid for writes.
    #[default]
    Nearest,
    /// Triangle kernel over a 2x2 neighbourhood.
    Bilinear,
    /// Catmull-Rom cubic kernel.
    Cubic,
    /// Cubic B-spline kernel (smoothing).
    CubicSpline,
    /// Lanczos windowed sinc, 3 lobes.
    Lanczos,
    /// Mean of the covered source pixels.
    Average,
    /// Most frequent value among the covered source pixels.
    Mode,
    /// Gaussian kernel.
    Gaussian,
}

impl Resampling {
    /// Registry name of the algorithm.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Bilinear => "bilinear",
            Self::Cubic => "cubic",
            Self::CubicSpline => "cubicspline",
            Self::Lanczos => "lanczos",
            Self::Average => "average",
            Self::Mode => "mode",
            Self::Gaussian => "gaussian",
        }
    }

    /// Whether the algorithm is a convolution kernel (as opposed to
    /// nearest-neighbour or an aggregate).
    pub const fn uses_kernel(&self) -> bool {
        matches!(
            self,
            Self::Bilinear | Self::Cubic | Self::CubicSpline | Self::Lanczos | Self::Gaussian
        )
    }
}

impl std::fmt::Display for Resampling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A convolution kernel: weight function and support radius.
#[derive(Debug, Clone, Copy)]
pub struct Kernel {
    /// Radius in source pixels beyond which the weight is zero.
    pub support: f64,
    /// Weight at normalized distance `x` from the sample center.
    pub weight: fn(f64) -> f64,
}

fn bilinear_weight(x: f64) -> f64 {
    (1.0 - x.abs()).max(0.0)
}

// Catmull-Rom (Keys, a = -0.5).
fn cubic_weight(x: f64) -> f64 {
    let x = x.abs();
    if x < 1.0 {
        1.5 * x * x * x - 2.5 * x * x + 1.0
    } else if x < 2.0 {
        -0.5 * x * x * x + 2.5 * x * x - 4.0 * x + 2.0
    } else {
        0.0
    }
}

// Cubic B-spline.
fn cubic_spline_weight(x: f64) -> f64 {
    let x = x.abs();
    if x < 1.0 {
        (0.5 * x * x * x - x * x + 2.0 / 3.0).max(0.0)
    } else if x < 2.0 {
        let t = 2.0 - x;
        t * t * t / 6.0
    } else {
        0.0
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-10 {
        1.0
    } else {
        let px = std::f64::consts::PI * x;
        px.sin() / px
    }
}

fn lanczos_weight(x: f64) -> f64 {
    if x.abs() < 3.0 {
        sinc(x) * sinc(x / 3.0)
    } else {
        0.0
    }
}

fn gaussian_weight(x: f64) -> f64 {
    (-2.0 * x * x).exp()
}

/// Name-keyed kernel lookup, constructed once and passed where needed.
#[derive(Debug, Clone)]
pub struct KernelRegistry {
    kernels: HashMap<&'static str, Kernel>,
}

impl KernelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            kernels: HashMap::new(),
        }
    }

    /// A registry holding the built-in kernels.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("bilinear", Kernel { support: 1.0, weight: bilinear_weight });
        registry.register("cubic", Kernel { support: 2.0, weight: cubic_weight });
        registry.register("cubicspline", Kernel { support: 2.0, weight: cubic_spline_weight });
        registry.register("lanczos", Kernel { support: 3.0, weight: lanczos_weight });
        registry.register("gaussian", Kernel { support: 1.5, weight: gaussian_weight });
        registry
    }

    /// Registers (or replaces) a kernel under `name`.
    pub fn register(&mut self, name: &'static str, kernel: Kernel) {
        self.kernels.insert(name, kernel);
    }

    /// Looks up a kernel by name.
    pub fn get(&self, name: &str) -> Option<Kernel> {
        self.kernels.get(name).copied()
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// Working-buffer ceiling for one resampling chunk.
const CHUNK_BUDGET_BYTES: usize = 4 << 20;

/// Serves a downsampled or upsampled read with an elaborate algorithm.
///
/// `window` is the integer source window (already validated and clipped);
/// `fwin` the sub-pixel window the output grid is laid over.
pub(crate) fn read_resampled(
    band: &RasterBand,
    window: Window,
    fwin: FloatWindow,
    dst: &mut [u8],
    shape: &BufferShape,
    alg: Resampling,
    registry: Option<&KernelRegistry>,
    progress: &mut Progress<'_>,
) -> Result<()> {
    debug_assert!(alg != Resampling::Nearest);

    let buf_w = shape.width;
    let buf_h = shape.height;
    let scale_x = fwin.width / buf_w as f64;
    let scale_y = fwin.height / buf_h as f64;

    let kernel = if alg.uses_kernel() {
        let fallback;
        let registry = match registry {
            Some(registry) => registry,
            None => {
                fallback = KernelRegistry::with_builtin();
                &fallback
            }
        };
        let kernel = registry
            .get(alg.name())
            .ok_or_else(|| Error::invalid_argument(format!("no kernel registered for {alg}")))?;
        Some(kernel)
    } else {
        None
    };

    // Kernel footprint in source pixels, widened when downsampling.
    let radius_x = match kernel {
        Some(k) => k.support * scale_x.max(1.0),
        None => scale_x.max(1.0),
    };
    let radius_y = match kernel {
        Some(k) => k.support * scale_y.max(1.0),
        None => scale_y.max(1.0),
    };

    // Full x extent of the padded source, shared by every chunk.
    let sx0 = ((fwin.x - radius_x).floor().max(window.x as f64)) as usize;
    let sx1 = ((fwin.x + fwin.width + radius_x).ceil())
        .min(window.right() as f64) as usize;
    let src_w = sx1 - sx0;

    // Shrinking-fit search for a chunk height within the budget.
    let mut chunk_rows = buf_h;
    loop {
        let src_rows = (chunk_rows as f64 * scale_y + 2.0 * radius_y).ceil() as usize + 2;
        let needed = src_w * src_rows.min(window.height) * std::mem::size_of::<f64>();
        if needed <= CHUNK_BUDGET_BYTES || chunk_rows == 1 {
            break;
        }
        chunk_rows = chunk_rows.div_ceil(2);
    }
    debug!(alg = %alg, chunk_rows, src_w, "resampled read");

    let nodata = band.nodata();
    let src_shape = |w: usize, h: usize| BufferShape::packed(w, h, RasterKind::F64);

    let mut by0 = 0;
    while by0 < buf_h {
        let by1 = (by0 + chunk_rows).min(buf_h);

        let sy0 = ((fwin.y + by0 as f64 * scale_y - radius_y).floor().max(window.y as f64)) as usize;
        let sy1 = ((fwin.y + by1 as f64 * scale_y + radius_y).ceil())
            .min(window.bottom() as f64) as usize;
        let src_h = sy1 - sy0;

        // Pull the padded source chunk at 1:1 and widen to f64.
        let chunk_shape = src_shape(src_w, src_h);
        let mut raw = vec![0u8; chunk_shape.min_bytes()];
        rasterio(
            band,
            Window::new(sx0, sy0, src_w, src_h),
            IoBuffer::Read(&mut raw),
            &chunk_shape,
            &IoOptions::default(),
            &mut Progress::none(),
        )?;
        let src: Vec<f64> = raw.chunks_exact(8).map(f64::read_from).collect();

        // No-data mask, with the two degenerate cases short-circuited.
        let mask: Option<Vec<bool>> = nodata.map(|nd| src.iter().map(|v| *v != nd).collect());
        let mask = match &mask {
            Some(mask) if mask.iter().all(|v| *v) => None,
            Some(mask) if !mask.iter().any(|v| *v) => {
                // Entirely no-data: the whole output chunk is no-data.
                let nd = nodata.unwrap_or(0.0);
                for by in by0..by1 {
                    for bx in 0..buf_w {
                        write_sample(dst, shape, bx, by, nd);
                    }
                }
                by0 = by1;
                progress.report(by0 as f64 / buf_h as f64)?;
                continue;
            }
            other => other.as_deref(),
        };

        for by in by0..by1 {
            let cy = fwin.y + (by as f64 + 0.5) * scale_y;
            for bx in 0..buf_w {
                let cx = fwin.x + (bx as f64 + 0.5) * scale_x;
                let value = match kernel {
                    Some(k) => convolve(
                        &src, mask, src_w, src_h, sx0, sy0, cx, cy, radius_x, radius_y, scale_x,
                        scale_y, k,
                    ),
                    None => {
                        aggregate(&src, mask, src_w, src_h, sx0, sy0, fwin, bx, by, scale_x,
                            scale_y, alg)
                    }
                };
                write_sample(dst, shape, bx, by, value.or(nodata).unwrap_or(0.0));
            }
        }

        by0 = by1;
        progress.report(by0 as f64 / buf_h as f64)?;
    }
    Ok(())
}

fn write_sample(dst: &mut [u8], shape: &BufferShape, bx: usize, by: usize, value: f64) {
    let off = by * shape.line_stride + bx * shape.pixel_stride;
    copy_words(
        &value.to_ne_bytes(),
        RasterKind::F64,
        0,
        &mut dst[off..],
        shape.kind,
        0,
        1,
    );
}

/// Weighted kernel sum around (`cx`, `cy`), in source coordinates.
#[allow(clippy::too_many_arguments)]
fn convolve(
    src: &[f64],
    mask: Option<&[bool]>,
    src_w: usize,
    src_h: usize,
    sx0: usize,
    sy0: usize,
    cx: f64,
    cy: f64,
    radius_x: f64,
    radius_y: f64,
    scale_x: f64,
    scale_y: f64,
    kernel: Kernel,
) -> Option<f64> {
    let norm_x = scale_x.max(1.0);
    let norm_y = scale_y.max(1.0);

    let tx0 = ((cx - radius_x - 0.5).ceil().max(sx0 as f64)) as usize;
    let tx1 = ((cx + radius_x - 0.5).floor().min((sx0 + src_w - 1) as f64)) as usize;
    let ty0 = ((cy - radius_y - 0.5).ceil().max(sy0 as f64)) as usize;
    let ty1 = ((cy + radius_y - 0.5).floor().min((sy0 + src_h - 1) as f64)) as usize;

    let mut sum = 0.0;
    let mut weight_sum = 0.0;
    for sy in ty0..=ty1 {
        let wy = (kernel.weight)((sy as f64 + 0.5 - cy) / norm_y);
        if wy == 0.0 {
            continue;
        }
        let row = (sy - sy0) * src_w;
        for sx in tx0..=tx1 {
            let idx = row + (sx - sx0);
            if let Some(mask) = mask {
                if !mask[idx] {
                    continue;
                }
            }
            let wx = (kernel.weight)((sx as f64 + 0.5 - cx) / norm_x);
            let w = wx * wy;
            sum += src[idx] * w;
            weight_sum += w;
        }
    }
    if weight_sum.abs() < 1e-10 {
        None
    } else {
        Some(sum / weight_sum)
    }
}

/// Average or mode over the exact source footprint of output pixel
/// (`bx`, `by`).
#[allow(clippy::too_many_arguments)]
fn aggregate(
    src: &[f64],
    mask: Option<&[bool]>,
    src_w: usize,
    src_h: usize,
    sx0: usize,
    sy0: usize,
    fwin: FloatWindow,
    bx: usize,
    by: usize,
    scale_x: f64,
    scale_y: f64,
    alg: Resampling,
) -> Option<f64> {
    let fx0 = fwin.x + bx as f64 * scale_x;
    let fy0 = fwin.y + by as f64 * scale_y;
    let x0 = (fx0.floor().max(sx0 as f64)) as usize;
    let y0 = (fy0.floor().max(sy0 as f64)) as usize;
    let x1 = ((fx0 + scale_x).ceil().min((sx0 + src_w) as f64)) as usize;
    let y1 = ((fy0 + scale_y).ceil().min((sy0 + src_h) as f64)) as usize;

    match alg {
        Resampling::Average => {
            let mut sum = 0.0;
            let mut count = 0usize;
            for sy in y0..y1.max(y0 + 1).min(sy0 + src_h) {
                let row = (sy - sy0) * src_w;
                for sx in x0..x1.max(x0 + 1).min(sx0 + src_w) {
                    let idx = row + (sx - sx0);
                    if let Some(mask) = mask {
                        if !mask[idx] {
                            continue;
                        }
                    }
                    sum += src[idx];
                    count += 1;
                }
            }
            if count == 0 {
                None
            } else {
                Some(sum / count as f64)
            }
        }
        Resampling::Mode => {
            // Highest count wins; ties go to the value seen first in
            // row-major order, keeping the result deterministic.
            let mut counts: HashMap<u64, (usize, usize)> = HashMap::new();
            let mut order = 0usize;
            for sy in y0..y1.max(y0 + 1).min(sy0 + src_h) {
                let row = (sy - sy0) * src_w;
                for sx in x0..x1.max(x0 + 1).min(sx0 + src_w) {
                    let idx = row + (sx - sx0);
                    if let Some(mask) = mask {
                        if !mask[idx] {
                            continue;
                        }
                    }
                    let entry = counts.entry(src[idx].to_bits()).or_insert((0, order));
                    entry.0 += 1;
                    order += 1;
                }
            }
            counts
                .into_iter()
                .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(b.1 .1.cmp(&a.1 .1)))
                .map(|(bits, _)| f64::from_bits(bits))
        }
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_names_round_trip() {
        assert_eq!(Resampling::CubicSpline.name(), "cubicspline");
        assert_eq!(Resampling::Average.to_string(), "average");
        assert!(Resampling::Lanczos.uses_kernel());
        assert!(!Resampling::Mode.uses_kernel());
        assert!(!Resampling::Nearest.uses_kernel());
    }

    #[test]
    fn test_builtin_registry() {
        let registry = KernelRegistry::with_builtin();
        for alg in [
            Resampling::Bilinear,
            Resampling::Cubic,
            Resampling::CubicSpline,
            Resampling::Lanczos,
            Resampling::Gaussian,
        ] {
            assert!(registry.get(alg.name()).is_some(), "{alg}");
        }
        assert!(registry.get("nearest").is_none());
    }

    #[test]
    fn test_registry_injection() {
        let mut registry = KernelRegistry::new();
        registry.register("cubic", Kernel { support: 1.0, weight: bilinear_weight });
        assert_relative_eq!(registry.get("cubic").unwrap().support, 1.0);
    }

    #[test]
    fn test_kernel_weights_at_zero() {
        assert_relative_eq!(bilinear_weight(0.0), 1.0);
        assert_relative_eq!(cubic_weight(0.0), 1.0);
        assert_relative_eq!(cubic_spline_weight(0.0), 2.0 / 3.0);
        assert_relative_eq!(lanczos_weight(0.0), 1.0);
        assert_relative_eq!(gaussian_weight(0.0), 1.0);
    }

    #[test]
    fn test_kernel_weights_vanish_past_support() {
        assert_relative_eq!(bilinear_weight(1.0), 0.0);
        assert_relative_eq!(cubic_weight(2.0), 0.0);
        assert_relative_eq!(cubic_spline_weight(2.0), 0.0);
        assert_relative_eq!(lanczos_weight(3.0), 0.0);
    }

    #[test]
    fn test_cubic_interpolates_constants() {
        // Sum of weights at the four taps around any phase is 1 for
        // Catmull-Rom, so constant signals pass through unchanged.
        for phase in [0.0, 0.25, 0.5, 0.75] {
            let sum: f64 = (-2..=2)
                .map(|i| cubic_weight(i as f64 - phase))
                .sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
        }
    }
}
