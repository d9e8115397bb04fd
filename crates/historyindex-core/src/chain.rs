//! In-memory canonical chain, for tests and ephemeral nodes.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::source::{BlockSource, ChainReader};
use crate::types::{Block, ZERO_HASH};

/// Append-only chain held in RAM. Block `h` lives at index `h - 1`.
#[derive(Default)]
pub struct MemoryChain {
    blocks: RwLock<Vec<Block>>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chain from already-linked blocks.
    pub fn from_blocks(blocks: impl IntoIterator<Item = Block>) -> Result<Self, StoreError> {
        let chain = Self::new();
        for block in blocks {
            chain.append(block)?;
        }
        Ok(chain)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Block>> {
        self.blocks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Block>> {
        self.blocks.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `block` to the head of the chain.
    ///
    /// The block must have height `head + 1` and point at the current head.
    pub fn append(&self, block: Block) -> Result<(), StoreError> {
        let mut blocks = self.write();
        let head = blocks.len() as u64;
        let linked = match blocks.last() {
            Some(prev) => block.extends(&prev.header),
            None => block.height() == 1 && block.header.prev_hash == ZERO_HASH,
        };
        if !linked {
            return Err(StoreError::NonSequential {
                height: block.height(),
                head,
            });
        }
        blocks.push(block);
        Ok(())
    }

    /// The newest block, if any.
    pub fn head(&self) -> Option<Block> {
        self.read().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[async_trait]
impl BlockSource for MemoryChain {
    async fn head_height(&self) -> Result<u64, StoreError> {
        Ok(self.read().len() as u64)
    }

    async fn block_at_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        let index = match usize::try_from(height).ok().and_then(|h| h.checked_sub(1)) {
            Some(index) => index,
            None => return Ok(None),
        };
        Ok(self.read().get(index).cloned())
    }
}

#[async_trait]
impl ChainReader for MemoryChain {
    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, StoreError> {
        Ok(self
            .read()
            .iter()
            .find(|b| b.hash().eq_ignore_ascii_case(hash))
            .cloned())
    }

    async fn last_blocks(&self, n: u64) -> Result<Vec<Block>, StoreError> {
        let n = usize::try_from(n).unwrap_or(usize::MAX);
        Ok(self.read().iter().rev().take(n).cloned().collect())
    }
}
