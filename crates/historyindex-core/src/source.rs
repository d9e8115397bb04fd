//! Read access to the canonical chain.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::Block;

/// The canonical chain as seen by the parser.
///
/// Implementations must allow concurrent readers while a separate writer
/// appends blocks.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Height of the newest block, `0` for an empty chain.
    async fn head_height(&self) -> Result<u64, StoreError>;

    /// Fetch the block at `height`, `None` if the chain has no such block.
    async fn block_at_height(&self, height: u64) -> Result<Option<Block>, StoreError>;
}

/// Extra lookups used by the query API.
#[async_trait]
pub trait ChainReader: BlockSource {
    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, StoreError>;

    /// Up to `n` most recent blocks, newest first.
    async fn last_blocks(&self, n: u64) -> Result<Vec<Block>, StoreError>;
}
