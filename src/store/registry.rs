//! Block registry
//!
//! The set of blocks currently known to the gateway. The sync task is the only
//! writer; any number of queries read it through [`BlockRegistry::snapshot`].
//!
//! Critical sections only move `Arc` pointers around, so readers never wait on
//! object-store I/O and a snapshot stays valid after later removals.

use crate::block::descriptor::BlockDescriptor;
use crate::block::error::{StoreError, StoreResult};
use crate::block::types::BlockId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

type BlockMap = HashMap<BlockId, Arc<BlockDescriptor>>;

/// Concurrent map from block id to descriptor
#[derive(Debug, Default)]
pub struct BlockRegistry {
    blocks: RwLock<BlockMap>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, BlockMap>> {
        self.blocks
            .read()
            .map_err(|e| StoreError::Lock(format!("Failed to acquire registry read lock: {}", e)))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, BlockMap>> {
        self.blocks
            .write()
            .map_err(|e| StoreError::Lock(format!("Failed to acquire registry write lock: {}", e)))
    }

    /// Insert a descriptor unless its id is already present
    ///
    /// Returns true if the block was added.
    pub fn upsert(&self, block: Arc<BlockDescriptor>) -> StoreResult<bool> {
        let mut blocks = self.write()?;
        if blocks.contains_key(block.id()) {
            return Ok(false);
        }
        blocks.insert(block.id().clone(), block);
        Ok(true)
    }

    /// Remove a block; returns true if it was present
    pub fn remove(&self, id: &BlockId) -> StoreResult<bool> {
        Ok(self.write()?.remove(id).is_some())
    }

    /// Current descriptors sorted by id
    ///
    /// The returned vector owns its `Arc`s and is unaffected by later mutation.
    pub fn snapshot(&self) -> StoreResult<Vec<Arc<BlockDescriptor>>> {
        let mut blocks: Vec<Arc<BlockDescriptor>> = self.read()?.values().cloned().collect();
        blocks.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(blocks)
    }

    pub fn get(&self, id: &BlockId) -> StoreResult<Option<Arc<BlockDescriptor>>> {
        Ok(self.read()?.get(id).cloned())
    }

    pub fn contains(&self, id: &BlockId) -> StoreResult<bool> {
        Ok(self.read()?.contains_key(id))
    }

    pub fn count(&self) -> StoreResult<usize> {
        Ok(self.read()?.len())
    }

    /// Ids of all registered blocks, sorted
    pub fn ids(&self) -> StoreResult<Vec<BlockId>> {
        let mut ids: Vec<BlockId> = self.read()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// `(min of minTime, max of maxTime)` over all blocks, or None when empty
    pub fn time_bounds(&self) -> StoreResult<Option<(i64, i64)>> {
        Ok(global_bounds(self.read()?.values().map(|b| b.as_ref())))
    }
}

/// Union of the time ranges of `blocks`
pub fn global_bounds<'a>(blocks: impl IntoIterator<Item = &'a BlockDescriptor>) -> Option<(i64, i64)> {
    blocks
        .into_iter()
        .map(|b| b.time_range())
        .reduce(|acc, r| acc.union(&r))
        .map(|r| (r.min_time, r.max_time))
}
