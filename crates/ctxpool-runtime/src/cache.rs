//! Block response cache shared by every context of a pool
//!
//! The only cross-context mutable state. Synchronisation is internal to
//! `quick_cache`'s sharded cache, so contexts hold a plain `Arc<BlockCache>`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ctxpool_core::{Block, H256};
use quick_cache::sync::Cache as QuickCache;

pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 1024;

pub struct BlockCache {
    blocks: QuickCache<H256, Arc<Block>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            blocks: QuickCache::new(capacity.max(1)),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, hash: &H256) -> Option<Arc<Block>> {
        let found = self.blocks.get(hash);
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Insert `block` under its own hash and return the shared copy.
    pub fn insert(&self, block: Block) -> Arc<Block> {
        let block = Arc::new(block);
        self.blocks.insert(block.hash, Arc::clone(&block));
        block
    }

    pub fn remove(&self, hash: &H256) -> bool {
        self.blocks.remove(hash).is_some()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}
