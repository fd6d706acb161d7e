//! Per-band cache of live blocks.
//!
//! # Overview
//!
//! A [`BandBlockCache`] owns every live [`Block`] of one band. Membership is
//! guarded by a single mutex; the per-block lock counts are atomics, so
//! holding a [`BlockRef`] never holds the membership lock.
//!
//! Two interchangeable storage strategies back the live set, mirroring the
//! two access patterns bands exhibit in practice:
//!
//! - [`ArrayBlockStore`] - a dense 2-D slot table, direct indexing, for
//!   bands whose grid gets mostly filled;
//! - [`HashBlockStore`] - a hash map keyed by (col, row), for large grids
//!   touched sparsely.
//!
//! The choice is a construction-time [`CacheStrategy`]; callers cannot
//! observe which one is in use.
//!
//! Write-back of a dirty block happens with the membership lock released:
//! the block is taken out of the live set, a keep-alive counter is raised
//! while the driver writes, and teardown ([`BandBlockCache::wait_idle`])
//! blocks until that counter returns to zero. Buffers of flushed blocks go
//! onto a small free list and are recycled, zeroed, for the next miss.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use rastio_core::{Error, Result};
use tracing::trace;

use crate::band::BlockSource;
use crate::block::{Block, BlockRef};

/// Storage strategy for a band's live-block set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStrategy {
    /// Dense 2-D slot table, one slot per grid position.
    Dense,
    /// Hash map keyed by (col, row).
    Sparse,
    /// [`Dense`](Self::Dense) for grids up to
    /// [`AUTO_SPARSE_THRESHOLD`] blocks, [`Sparse`](Self::Sparse) above.
    #[default]
    Auto,
}

/// Grid size at which [`CacheStrategy::Auto`] switches to hashing.
pub const AUTO_SPARSE_THRESHOLD: usize = 1 << 20;

/// Recycled buffers kept around per cache.
const FREE_LIST_LIMIT: usize = 16;

/// The live-block set interface shared by both strategies.
///
/// No locking here; [`BandBlockCache`] serializes all access.
trait BlockStore: Send {
    /// Inserts a block. The key must not already be present.
    fn insert(&mut self, block: Arc<Block>);
    /// Looks up the block at (col, row).
    fn get(&self, col: usize, row: usize) -> Option<&Arc<Block>>;
    /// Removes and returns the block at (col, row).
    fn take(&mut self, col: usize, row: usize) -> Option<Arc<Block>>;
    /// Removes and returns an arbitrary block, for drain loops.
    fn take_any(&mut self) -> Option<Arc<Block>>;
    /// Number of live blocks.
    fn len(&self) -> usize;
}

/// Dense slot-table store.
struct ArrayBlockStore {
    cols: usize,
    slots: Vec<Option<Arc<Block>>>,
    len: usize,
    // Drain cursor so take_any stays amortized O(1).
    scan: usize,
}

impl ArrayBlockStore {
    fn new(cols: usize, rows: usize) -> Self {
        Self {
            cols,
            slots: vec![None; cols * rows],
            len: 0,
            scan: 0,
        }
    }

    #[inline]
    fn index(&self, col: usize, row: usize) -> usize {
        row * self.cols + col
    }
}

impl BlockStore for ArrayBlockStore {
    fn insert(&mut self, block: Arc<Block>) {
        let idx = self.index(block.col(), block.row());
        debug_assert!(self.slots[idx].is_none(), "duplicate block key");
        self.slots[idx] = Some(block);
        self.len += 1;
        self.scan = self.scan.min(idx);
    }

    fn get(&self, col: usize, row: usize) -> Option<&Arc<Block>> {
        self.slots[self.index(col, row)].as_ref()
    }

    fn take(&mut self, col: usize, row: usize) -> Option<Arc<Block>> {
        let idx = self.index(col, row);
        let block = self.slots[idx].take();
        if block.is_some() {
            self.len -= 1;
        }
        block
    }

    fn take_any(&mut self) -> Option<Arc<Block>> {
        while self.scan < self.slots.len() {
            if let Some(block) = self.slots[self.scan].take() {
                self.len -= 1;
                return Some(block);
            }
            self.scan += 1;
        }
        None
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// Hash-map store.
struct HashBlockStore {
    map: HashMap<(usize, usize), Arc<Block>>,
}

impl HashBlockStore {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

impl BlockStore for HashBlockStore {
    fn insert(&mut self, block: Arc<Block>) {
        let prev = self.map.insert((block.col(), block.row()), block);
        debug_assert!(prev.is_none(), "duplicate block key");
    }

    fn get(&self, col: usize, row: usize) -> Option<&Arc<Block>> {
        self.map.get(&(col, row))
    }

    fn take(&mut self, col: usize, row: usize) -> Option<Arc<Block>> {
        self.map.remove(&(col, row))
    }

    fn take_any(&mut self) -> Option<Arc<Block>> {
        let key = *self.map.keys().next()?;
        self.map.remove(&key)
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

struct CacheState {
    store: Box<dyn BlockStore>,
    /// Buffers of flushed blocks awaiting reuse.
    free: Vec<Vec<u8>>,
    /// Blocks detached from the live set mid-write-back.
    detached: usize,
    /// Bytes held by live blocks.
    bytes: usize,
}

/// The per-band block cache.
pub struct BandBlockCache {
    state: Mutex<CacheState>,
    idle: Condvar,
}

impl BandBlockCache {
    /// Creates a cache for a `cols` x `rows` block grid.
    pub fn new(strategy: CacheStrategy, cols: usize, rows: usize) -> Self {
        let dense = match strategy {
            CacheStrategy::Dense => true,
            CacheStrategy::Sparse => false,
            CacheStrategy::Auto => cols.saturating_mul(rows) <= AUTO_SPARSE_THRESHOLD,
        };
        let store: Box<dyn BlockStore> = if dense {
            Box::new(ArrayBlockStore::new(cols, rows))
        } else {
            Box::new(HashBlockStore::new())
        };
        Self {
            state: Mutex::new(CacheState {
                store,
                free: Vec::new(),
                detached: 0,
                bytes: 0,
            }),
            idle: Condvar::new(),
        }
    }

    /// Returns a locked reference to the cached block at (col, row), if any.
    pub fn try_locked(&self, col: usize, row: usize) -> Option<BlockRef> {
        let state = self.state.lock().unwrap();
        state
            .store
            .get(col, row)
            .map(|block| BlockRef::new(Arc::clone(block)))
    }

    /// Inserts `block` and returns a locked reference to it.
    ///
    /// If another thread raced the same miss and its block is already live
    /// at this key, that block wins: the newcomer's buffer is recycled and
    /// the existing block is returned, so at most one live block ever exists
    /// per key.
    pub fn adopt(&self, block: Arc<Block>) -> BlockRef {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.store.get(block.col(), block.row()) {
            trace!(
                col = block.col(),
                row = block.row(),
                "lost adoption race, reusing existing block"
            );
            let existing = Arc::clone(existing);
            let buffer = block.take_data();
            Self::recycle(&mut state, buffer);
            return BlockRef::new(existing);
        }
        state.bytes += block.size_bytes();
        let reference = BlockRef::new(Arc::clone(&block));
        state.store.insert(block);
        reference
    }

    /// Obtains a zeroed buffer of `bytes` bytes, reusing a recycled one when
    /// available.
    pub fn allocate(&self, bytes: usize) -> Result<Vec<u8>> {
        let recycled = {
            let mut state = self.state.lock().unwrap();
            state.free.pop()
        };
        if let Some(mut buffer) = recycled {
            trace!(bytes, "recycling flushed block buffer");
            buffer.clear();
            if let Err(err) = buffer.try_reserve_exact(bytes) {
                return Err(Error::allocation_failed(bytes, err.to_string()));
            }
            buffer.resize(bytes, 0);
            return Ok(buffer);
        }
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(bytes)
            .map_err(|err| Error::allocation_failed(bytes, err.to_string()))?;
        buffer.resize(bytes, 0);
        Ok(buffer)
    }

    /// Returns a no-longer-needed buffer to the free list.
    pub fn release_buffer(&self, buffer: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        Self::recycle(&mut state, buffer);
    }

    fn recycle(state: &mut CacheState, buffer: Vec<u8>) {
        if state.free.len() < FREE_LIST_LIMIT && buffer.capacity() > 0 {
            state.free.push(buffer);
        }
    }

    /// Removes the block at (col, row) from the live set, writing it back
    /// through `source` if dirty and `write_dirty` is set.
    ///
    /// A locked block is left in place untouched; absence is not an error.
    pub fn flush_one(
        &self,
        col: usize,
        row: usize,
        write_dirty: bool,
        source: &dyn BlockSource,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(block) = state.store.take(col, row) else {
            return Ok(());
        };
        if block.is_locked() {
            trace!(col, row, "flush skipped, block is locked");
            state.store.insert(block);
            return Ok(());
        }
        state.bytes -= block.size_bytes();
        drop(state);
        self.finalize(block, write_dirty, source)
    }

    /// Flushes every block in the live set.
    ///
    /// Locked blocks survive; dirty unlocked blocks are written back through
    /// `source` when `write_dirty` is set. The first write-back error is
    /// returned after the drain completes, so one bad block does not pin the
    /// rest of the cache in memory.
    pub fn flush_all(&self, write_dirty: bool, source: &dyn BlockSource) -> Result<()> {
        let (drained, kept) = {
            let mut state = self.state.lock().unwrap();
            let mut drained = Vec::with_capacity(state.store.len());
            let mut kept = Vec::new();
            while let Some(block) = state.store.take_any() {
                if block.is_locked() {
                    kept.push(block);
                } else {
                    state.bytes -= block.size_bytes();
                    drained.push(block);
                }
            }
            for block in &kept {
                state.store.insert(Arc::clone(block));
            }
            (drained, kept)
        };
        drop(kept);

        let mut first_error = None;
        for block in drained {
            if let Err(err) = self.finalize(block, write_dirty, source) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Writes back (if requested and dirty) and recycles a block already
    /// removed from the live set.
    fn finalize(&self, block: Arc<Block>, write_dirty: bool, source: &dyn BlockSource) -> Result<()> {
        let mut result = Ok(());
        if write_dirty && block.is_dirty() {
            // Keep-alive: the block belongs to no container while the driver
            // writes; teardown must wait for it.
            self.state.lock().unwrap().detached += 1;
            let write = {
                let data = block.data();
                source.write_block(block.col(), block.row(), &data)
            };
            match write {
                Ok(()) => block.clear_dirty(),
                Err(err) => result = Err(err),
            }
            let mut state = self.state.lock().unwrap();
            state.detached -= 1;
            if state.detached == 0 {
                self.idle.notify_all();
            }
        }
        trace!(col = block.col(), row = block.row(), "evicting block");
        let buffer = block.take_data();
        self.release_buffer(buffer);
        result
    }

    /// Blocks until no block is detached mid-write-back.
    ///
    /// Called before the owning band tears the cache down.
    pub fn wait_idle(&self) {
        let mut state = self.state.lock().unwrap();
        while state.detached > 0 {
            state = self.idle.wait(state).unwrap();
        }
    }

    /// Number of live blocks.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().store.len()
    }

    /// Whether the live set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by live blocks.
    pub fn live_bytes(&self) -> usize {
        self.state.lock().unwrap().bytes
    }
}

impl std::fmt::Debug for BandBlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("BandBlockCache")
            .field("blocks", &state.store.len())
            .field("bytes", &state.bytes)
            .field("detached", &state.detached)
            .finish()
    }
}
