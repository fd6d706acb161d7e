//! A single cached tile of decoded pixel data.
//!
//! A [`Block`] is one tile of one band: its pixel buffer, its (column, row)
//! position in the band's block grid, a dirty flag, and a lock count. Blocks
//! are shared as `Arc<Block>` between the cache's live set and any number of
//! in-flight accesses; a [`BlockRef`] is the RAII lock holder that keeps a
//! block pinned while its buffer is in use.
//!
//! Two rules the rest of the crate relies on:
//!
//! - a block with a positive lock count is never evicted and its buffer is
//!   never recycled;
//! - edge blocks are allocated at the band's full block size, with the
//!   logically valid area tracked separately.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rastio_core::RasterKind;

/// One decoded tile of a band.
#[derive(Debug)]
pub struct Block {
    col: usize,
    row: usize,
    width: usize,
    height: usize,
    valid_width: usize,
    valid_height: usize,
    kind: RasterKind,
    lock_count: AtomicI32,
    dirty: AtomicBool,
    data: Mutex<Vec<u8>>,
}

impl Block {
    /// Creates a block at grid position (`col`, `row`) taking ownership of
    /// `data`, which must hold `width * height` samples of `kind`.
    pub(crate) fn new(
        col: usize,
        row: usize,
        width: usize,
        height: usize,
        valid_width: usize,
        valid_height: usize,
        kind: RasterKind,
        data: Vec<u8>,
    ) -> Self {
        debug_assert_eq!(data.len(), width * height * kind.size_bytes());
        Self {
            col,
            row,
            width,
            height,
            valid_width,
            valid_height,
            kind,
            lock_count: AtomicI32::new(0),
            dirty: AtomicBool::new(false),
            data: Mutex::new(data),
        }
    }

    /// Block column in the band's grid.
    #[inline]
    pub fn col(&self) -> usize {
        self.col
    }

    /// Block row in the band's grid.
    #[inline]
    pub fn row(&self) -> usize {
        self.row
    }

    /// Allocated width in pixels (the band's block width).
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Allocated height in pixels (the band's block height).
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Width of the logically valid area; smaller than [`width`](Self::width)
    /// only for blocks on the right raster edge.
    #[inline]
    pub fn valid_width(&self) -> usize {
        self.valid_width
    }

    /// Height of the logically valid area; smaller than
    /// [`height`](Self::height) only for blocks on the bottom raster edge.
    #[inline]
    pub fn valid_height(&self) -> usize {
        self.valid_height
    }

    /// Sample kind of the buffer.
    #[inline]
    pub fn kind(&self) -> RasterKind {
        self.kind
    }

    /// Allocated buffer size in bytes.
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.width * self.height * self.kind.size_bytes()
    }

    /// Byte offset of pixel (`x`, `y`) within the buffer.
    #[inline]
    pub fn offset_of(&self, x: usize, y: usize) -> usize {
        (y * self.width + x) * self.kind.size_bytes()
    }

    /// Locks the pixel buffer for access.
    pub fn data(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap()
    }

    /// Marks the buffer as modified since the last write-back.
    #[inline]
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clears the dirty flag after a successful write-back.
    #[inline]
    pub(crate) fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Whether the buffer has been modified since the last write-back.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Current lock count.
    #[inline]
    pub fn lock_count(&self) -> i32 {
        self.lock_count.load(Ordering::Acquire)
    }

    /// Whether any access currently pins this block.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock_count() > 0
    }

    #[inline]
    pub(crate) fn add_lock(&self) {
        self.lock_count.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn drop_lock(&self) {
        let prev = self.lock_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "lock count underflow");
    }

    /// Detaches the pixel buffer for recycling, leaving the block empty.
    ///
    /// Only called on blocks that have left the live set with no outstanding
    /// locks.
    pub(crate) fn take_data(&self) -> Vec<u8> {
        std::mem::take(&mut *self.data.lock().unwrap())
    }
}

/// RAII lock on a [`Block`].
///
/// Holds the block's lock count above zero for its lifetime, which keeps the
/// block in the cache's live set and its buffer intact. Dereferences to the
/// block itself.
#[derive(Debug)]
pub struct BlockRef {
    block: Arc<Block>,
}

impl BlockRef {
    /// Takes one lock on `block`.
    pub(crate) fn new(block: Arc<Block>) -> Self {
        block.add_lock();
        Self { block }
    }

    /// The underlying shared block.
    #[inline]
    pub fn block(&self) -> &Arc<Block> {
        &self.block
    }
}

impl Deref for BlockRef {
    type Target = Block;

    #[inline]
    fn deref(&self) -> &Block {
        &self.block
    }
}

impl Drop for BlockRef {
    fn drop(&mut self) {
        self.block.drop_lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_2x2() -> Arc<Block> {
        Arc::new(Block::new(0, 0, 2, 2, 2, 2, RasterKind::U8, vec![0; 4]))
    }

    #[test]
    fn test_lock_lifecycle() {
        let block = block_2x2();
        assert!(!block.is_locked());
        {
            let a = BlockRef::new(Arc::clone(&block));
            let b = BlockRef::new(Arc::clone(&block));
            assert_eq!(block.lock_count(), 2);
            assert_eq!(a.col(), 0);
            drop(b);
            assert_eq!(block.lock_count(), 1);
        }
        assert!(!block.is_locked());
    }

    #[test]
    fn test_dirty_flag() {
        let block = block_2x2();
        assert!(!block.is_dirty());
        block.mark_dirty();
        assert!(block.is_dirty());
        block.clear_dirty();
        assert!(!block.is_dirty());
    }

    #[test]
    fn test_geometry() {
        let block = Block::new(3, 1, 16, 16, 5, 16, RasterKind::U16, vec![0; 512]);
        assert_eq!(block.size_bytes(), 512);
        assert_eq!(block.valid_width(), 5);
        assert_eq!(block.offset_of(2, 1), (16 + 2) * 2);
    }
}
