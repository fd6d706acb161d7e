//! Datasets: ordered band collections with interleaved access.
//!
//! # Overview
//!
//! A [`Dataset`] owns its bands, the kernel registry handed to every
//! request, and an optional [`CacheBudget`]. Multi-band reads and writes
//! loop the per-band engine over a band-interleaved buffer; they add no
//! consistency guarantees beyond per-band access.
//!
//! The cache budget is a policy layered on top of the band caches, not
//! part of them: once the live bytes across all bands pass the ceiling,
//! the dataset degrades to caching only the most recently used band and
//! flushes the rest.

use std::sync::{Arc, Mutex};

use rastio_core::{Error, Progress, Result, Window};
use tracing::debug;

use crate::band::RasterBand;
use crate::rasterio::{rasterio, BufferShape, IoBuffer, IoOptions};
use crate::resample::KernelRegistry;

/// Dataset-wide cache ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheBudget {
    /// Live bytes across all band caches above which the dataset keeps
    /// only the most recently used band cached.
    pub ceiling_bytes: usize,
}

/// An ordered collection of equally sized bands.
pub struct Dataset {
    bands: Vec<Arc<RasterBand>>,
    registry: KernelRegistry,
    budget: Option<CacheBudget>,
    size: Mutex<Option<(usize, usize)>>,
}

impl Dataset {
    /// An empty dataset with the built-in kernel registry and no cache
    /// budget.
    pub fn new() -> Self {
        Self::with_registry(KernelRegistry::with_builtin())
    }

    /// An empty dataset using `registry` for elaborate resampling.
    pub fn with_registry(registry: KernelRegistry) -> Self {
        Self {
            bands: Vec::new(),
            registry,
            budget: None,
            size: Mutex::new(None),
        }
    }

    /// Sets the cache budget.
    pub fn with_cache_budget(mut self, budget: CacheBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Appends a band and returns its index.
    ///
    /// Every band must share the raster dimensions of the first.
    pub fn push_band(&mut self, band: RasterBand) -> Result<usize> {
        let mut size = self.size.lock().unwrap();
        match *size {
            None => *size = Some((band.width(), band.height())),
            Some((w, h)) if (w, h) == (band.width(), band.height()) => {}
            Some((w, h)) => {
                return Err(Error::invalid_argument(format!(
                    "band size {}x{} does not match dataset {w}x{h}",
                    band.width(),
                    band.height()
                )));
            }
        }
        drop(size);
        self.bands.push(Arc::new(band));
        Ok(self.bands.len() - 1)
    }

    /// Number of bands.
    #[inline]
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// The band at `index`.
    #[inline]
    pub fn band(&self, index: usize) -> Option<&Arc<RasterBand>> {
        self.bands.get(index)
    }

    /// Raster size, `(width, height)`, once a band has been pushed.
    pub fn size(&self) -> Option<(usize, usize)> {
        *self.size.lock().unwrap()
    }

    /// The kernel registry requests are served with.
    #[inline]
    pub fn registry(&self) -> &KernelRegistry {
        &self.registry
    }

    /// Reads `window` from the listed bands into a band-interleaved buffer.
    ///
    /// Band `bands[i]` lands at byte offset `i * band_stride`; `shape`
    /// describes one band's layout within the buffer. Progress covers the
    /// whole request as a single 0..1 ramp across bands.
    pub fn read_window_bands(
        &self,
        window: Window,
        bands: &[usize],
        buffer: &mut [u8],
        shape: &BufferShape,
        band_stride: usize,
        options: &IoOptions<'_>,
        progress: &mut Progress<'_>,
    ) -> Result<()> {
        self.access_bands(window, bands, buffer, shape, band_stride, options, progress, false)
    }

    /// Writes `window` to the listed bands from a band-interleaved buffer.
    ///
    /// Layout mirrors [`read_window_bands`](Self::read_window_bands).
    pub fn write_window_bands(
        &self,
        window: Window,
        bands: &[usize],
        buffer: &mut [u8],
        shape: &BufferShape,
        band_stride: usize,
        options: &IoOptions<'_>,
        progress: &mut Progress<'_>,
    ) -> Result<()> {
        self.access_bands(window, bands, buffer, shape, band_stride, options, progress, true)
    }

    #[allow(clippy::too_many_arguments)]
    fn access_bands(
        &self,
        window: Window,
        bands: &[usize],
        buffer: &mut [u8],
        shape: &BufferShape,
        band_stride: usize,
        options: &IoOptions<'_>,
        progress: &mut Progress<'_>,
        write: bool,
    ) -> Result<()> {
        let options = IoOptions {
            registry: options.registry.or(Some(&self.registry)),
            ..*options
        };
        let count = bands.len();
        for (i, &index) in bands.iter().enumerate() {
            let band = self
                .band(index)
                .ok_or_else(|| Error::invalid_argument(format!("no band {index}")))?;
            let slice = &mut buffer[i * band_stride..];

            let base = i as f64 / count as f64;
            let span = 1.0 / count as f64;
            let mut forward;
            let mut sub = if progress.is_active() {
                forward = |f: f64| progress.report(base + f * span).is_ok();
                Progress::new(&mut forward)
            } else {
                Progress::none()
            };

            let io = if write {
                IoBuffer::Write(slice)
            } else {
                IoBuffer::Read(slice)
            };
            rasterio(band, window, io, shape, &options, &mut sub)?;
            self.enforce_budget(index)?;
        }
        Ok(())
    }

    /// Reads `window` from all bands, pixel-interleaved and packed.
    pub fn read_window(&self, window: Window, buffer: &mut [u8], kind: rastio_core::RasterKind,
        width: usize, height: usize) -> Result<()> {
        let (shape, band_stride, bands) = self.interleaved_layout(kind, width, height);
        self.read_window_bands(
            window,
            &bands,
            buffer,
            &shape,
            band_stride,
            &IoOptions::default(),
            &mut Progress::none(),
        )
    }

    /// Writes `window` to all bands, pixel-interleaved and packed.
    pub fn write_window(&self, window: Window, buffer: &mut [u8], kind: rastio_core::RasterKind,
        width: usize, height: usize) -> Result<()> {
        let (shape, band_stride, bands) = self.interleaved_layout(kind, width, height);
        self.write_window_bands(
            window,
            &bands,
            buffer,
            &shape,
            band_stride,
            &IoOptions::default(),
            &mut Progress::none(),
        )
    }

    fn interleaved_layout(
        &self,
        kind: rastio_core::RasterKind,
        width: usize,
        height: usize,
    ) -> (BufferShape, usize, Vec<usize>) {
        let word = kind.size_bytes();
        let count = self.band_count().max(1);
        let shape = BufferShape::with_strides(
            width,
            height,
            kind,
            word * count,
            word * count * width,
        );
        (shape, word, (0..self.band_count()).collect())
    }

    /// Flushes every band's cache.
    pub fn flush_cache(&self, write_dirty: bool) -> Result<()> {
        let mut first_error = None;
        for band in &self.bands {
            if let Err(err) = band.flush_cache(write_dirty) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Total live bytes across all band caches.
    pub fn cache_bytes(&self) -> usize {
        self.bands.iter().map(|b| b.cache().live_bytes()).sum()
    }

    /// Applies the cache budget after an access to band `current`.
    fn enforce_budget(&self, current: usize) -> Result<()> {
        let Some(budget) = self.budget else {
            return Ok(());
        };
        let total = self.cache_bytes();
        if total <= budget.ceiling_bytes {
            return Ok(());
        }
        debug!(
            total,
            ceiling = budget.ceiling_bytes,
            keep = current,
            "cache ceiling exceeded, keeping most recently used band only"
        );
        let mut first_error = None;
        for (index, band) in self.bands.iter().enumerate() {
            if index == current {
                continue;
            }
            if let Err(err) = band.flush_cache(true) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for Dataset {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("bands", &self.bands.len())
            .field("size", &self.size())
            .field("budget", &self.budget)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::BandOptions;
    use crate::mem::MemSource;
    use rastio_core::RasterKind;

    fn u8_band(width: usize, height: usize) -> RasterBand {
        let source = Arc::new(MemSource::new(width, height, 4, 4, RasterKind::U8));
        RasterBand::new(
            BandOptions::new(width, height, 4, 4, RasterKind::U8),
            Box::new(source),
        )
        .unwrap()
    }

    #[test]
    fn test_band_size_must_match() {
        let mut ds = Dataset::new();
        ds.push_band(u8_band(8, 8)).unwrap();
        assert!(ds.push_band(u8_band(8, 4)).is_err());
        assert_eq!(ds.band_count(), 1);
        assert_eq!(ds.size(), Some((8, 8)));
    }

    #[test]
    fn test_interleaved_round_trip() {
        let mut ds = Dataset::new();
        ds.push_band(u8_band(8, 8)).unwrap();
        ds.push_band(u8_band(8, 8)).unwrap();
        ds.push_band(u8_band(8, 8)).unwrap();

        // Pixel-interleaved RGB-style payload.
        let window = Window::new(1, 1, 4, 4);
        let mut payload = vec![0u8; 4 * 4 * 3];
        for (i, v) in payload.iter_mut().enumerate() {
            *v = (10 + i % 3 * 100 + i / 3) as u8;
        }
        ds.write_window(window, &mut payload.clone(), RasterKind::U8, 4, 4)
            .unwrap();

        let mut back = vec![0u8; 4 * 4 * 3];
        ds.read_window(window, &mut back, RasterKind::U8, 4, 4).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_budget_degrades_to_mru_band() {
        let mut ds = Dataset::new();
        ds.push_band(u8_band(8, 8)).unwrap();
        ds.push_band(u8_band(8, 8)).unwrap();
        // One 4x4 u8 block is 16 bytes; allow a single block overall.
        let ds = ds.with_cache_budget(CacheBudget { ceiling_bytes: 16 });

        let shape = BufferShape::packed(8, 8, RasterKind::U8);
        let mut out = vec![0u8; shape.min_bytes()];
        ds.read_window_bands(
            Window::new(0, 0, 8, 8),
            &[0, 1],
            &mut out,
            &shape,
            0,
            &IoOptions::default(),
            &mut Progress::none(),
        )
        .unwrap();

        // Band 1 was used last; band 0 got flushed by the policy.
        assert_eq!(ds.band(0).unwrap().cache().len(), 0);
        assert!(ds.band(1).unwrap().cache().len() > 0);
    }
}
