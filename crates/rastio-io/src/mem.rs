//! In-memory block source.
//!
//! [`MemSource`] keeps a full raster in one allocation and serves it
//! block-by-block through the [`BlockSource`] interface, standing in for a
//! format driver. Tests also use its failure injection to exercise the
//! decode and write-back error paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use rastio_core::{Error, RasterKind, Result};

use crate::band::BlockSource;

/// A raster held in memory, addressable in blocks.
pub struct MemSource {
    width: usize,
    height: usize,
    block_width: usize,
    block_height: usize,
    kind: RasterKind,
    data: RwLock<Vec<u8>>,
    fail_read_at: Mutex<Option<(usize, usize)>>,
    fail_writes: AtomicBool,
}

impl MemSource {
    /// A zero-filled raster of `width` x `height` samples of `kind`, served
    /// in `block_width` x `block_height` blocks.
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
            data: RwLock::new(vec![0; width * height * kind.size_bytes()]),
            fail_read_at: Mutex::new(None),
            fail_writes: AtomicBool::new(false),
        }
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

    /// Sample kind.
    #[inline]
    pub fn kind(&self) -> RasterKind {
        self.kind
    }

    /// Overwrites the backing pixels. `pixels` must hold the full raster,
    /// packed row-major.
    pub fn load(&self, pixels: &[u8]) {
        let mut data = self.data.write().unwrap();
        data.copy_from_slice(pixels);
    }

    /// Copy of the backing pixels, packed row-major.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().unwrap().clone()
    }

    /// Makes the next decodes of block (col, row) fail, until cleared with
    /// [`clear_failures`](Self::clear_failures).
    pub fn fail_reads_at(&self, col: usize, row: usize) {
        *self.fail_read_at.lock().unwrap() = Some((col, row));
    }

    /// Makes every write-back fail until cleared.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::Release);
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        *self.fail_read_at.lock().unwrap() = None;
        self.fail_writes.store(false, Ordering::Release);
    }

    /// Raster extent of the valid area of block (col, row): origin plus
    /// width and height in pixels.
    fn block_extent(&self, col: usize, row: usize) -> (usize, usize, usize, usize) {
        let x = col * self.block_width;
        let y = row * self.block_height;
        let w = self.block_width.min(self.width - x);
        let h = self.block_height.min(self.height - y);
        (x, y, w, h)
    }
}

impl BlockSource for MemSource {
    fn read_block(&self, col: usize, row: usize, data: &mut [u8]) -> Result<()> {
        if *self.fail_read_at.lock().unwrap() == Some((col, row)) {
            return Err(Error::decode(col, row, "injected decode failure"));
        }
        let word = self.kind.size_bytes();
        let (x, y, w, h) = self.block_extent(col, row);
        let raster = self.data.read().unwrap();
        for r in 0..h {
            let src = ((y + r) * self.width + x) * word;
            let dst = r * self.block_width * word;
            data[dst..dst + w * word].copy_from_slice(&raster[src..src + w * word]);
        }
        Ok(())
    }

    fn write_block(&self, col: usize, row: usize, data: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(Error::write_back(col, row, "injected write failure"));
        }
        let word = self.kind.size_bytes();
        let (x, y, w, h) = self.block_extent(col, row);
        let mut raster = self.data.write().unwrap();
        for r in 0..h {
            let src = r * self.block_width * word;
            let dst = ((y + r) * self.width + x) * word;
            raster[dst..dst + w * word].copy_from_slice(&data[src..src + w * word]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_block_partial_copy() {
        // 5x3 raster in 4x2 blocks: block (1, 1) covers a 1x1 corner.
        let source = MemSource::new(5, 3, 4, 2, RasterKind::U8);
        let pixels: Vec<u8> = (0..15).collect();
        source.load(&pixels);

        let mut block = vec![0xAA; 8];
        source.read_block(1, 1, &mut block).unwrap();
        assert_eq!(block[0], 14); // pixel (4, 2)
        // Bytes outside the valid area are untouched by the copy.
        assert_eq!(block[1], 0xAA);
    }

    #[test]
    fn test_write_back_round_trip() {
        let source = MemSource::new(4, 4, 2, 2, RasterKind::U8);
        let block = vec![1, 2, 3, 4];
        source.write_block(1, 0, &block).unwrap();
        let snapshot = source.snapshot();
        assert_eq!(&snapshot[2..4], &[1, 2]);
        assert_eq!(&snapshot[6..8], &[3, 4]);

        let mut read = vec![0; 4];
        source.read_block(1, 0, &mut read).unwrap();
        assert_eq!(read, block);
    }

    #[test]
    fn test_injected_failures() {
        let source = MemSource::new(4, 4, 2, 2, RasterKind::U8);
        source.fail_reads_at(0, 1);
        let mut block = vec![0; 4];
        assert!(source.read_block(0, 1, &mut block).is_err());
        assert!(source.read_block(0, 0, &mut block).is_ok());

        source.fail_writes();
        assert!(source.write_block(0, 0, &block).is_err());
        source.clear_failures();
        assert!(source.write_block(0, 0, &block).is_ok());
        assert!(source.read_block(0, 1, &mut block).is_ok());
    }
}
