//! Index store traits: the write side used by the parser and the read side
//! used by the query API.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{AddressTxn, Block, OutPoint, TxRecord, UxOut};

/// Persisted watermark plus the "apply one block" primitive.
///
/// Implementations include `InMemoryHistoryStore` and `SqliteStorage`
/// in `historyindex-storage`.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Height up to which every block has been applied; `0` for an empty index.
    async fn parsed_height(&self) -> Result<u64, StoreError>;

    /// Apply one block's effects atomically and durably.
    ///
    /// Must be safe to repeat for a block that was already applied: a crash
    /// between this call and [`IndexStore::set_parsed_height`] replays it.
    async fn apply_block(&self, block: &Block) -> Result<(), StoreError>;

    /// Durably record `height` as the new watermark.
    async fn set_parsed_height(&self, height: u64) -> Result<(), StoreError>;
}

/// Queries over the derived history index.
#[async_trait]
pub trait HistoryReader: Send + Sync {
    async fn transaction(&self, tx_hash: &str) -> Result<Option<TxRecord>, StoreError>;

    async fn uxout(&self, outpoint: &OutPoint) -> Result<Option<UxOut>, StoreError>;

    /// History entries for `address`, ascending by height.
    async fn address_transactions(&self, address: &str) -> Result<Vec<AddressTxn>, StoreError>;

    /// Unspent outputs owned by `address`.
    async fn address_unspent(&self, address: &str) -> Result<Vec<UxOut>, StoreError>;
}
