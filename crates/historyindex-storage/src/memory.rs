//! In-memory history index.
//!
//! Stores the parsed height, transactions, outputs and per-address history in
//! RAM. Useful for testing and short-lived nodes that don't need persistence.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use historyindex_core::error::StoreError;
use historyindex_core::store::{HistoryReader, IndexStore};
use historyindex_core::types::{AddressTxn, Block, OutPoint, TxRecord, UxOut};

#[derive(Default)]
struct HistoryState {
    parsed_height: u64,
    transactions: HashMap<String, TxRecord>,
    outputs: HashMap<OutPoint, UxOut>,
    address_txns: HashMap<String, Vec<AddressTxn>>,
}

/// Changes computed for one block before any of them are committed.
#[derive(Default)]
struct BlockDelta {
    created: HashMap<OutPoint, UxOut>,
    spent: Vec<(OutPoint, String)>,
    txns: Vec<TxRecord>,
    history: Vec<AddressTxn>,
}

impl HistoryState {
    /// Validate `block` against the current state and collect its effects.
    fn stage(&self, block: &Block) -> Result<BlockDelta, StoreError> {
        let height = block.height();
        let mut delta = BlockDelta::default();
        let mut spent_in_block: HashMap<OutPoint, String> = HashMap::new();

        for tx in &block.transactions {
            for input in &tx.inputs {
                let ux = delta
                    .created
                    .get(input)
                    .or_else(|| self.outputs.get(input))
                    .ok_or_else(|| StoreError::MissingOutput {
                        outpoint: input.to_string(),
                    })?;
                let spent_by = spent_in_block
                    .get(input)
                    .or(ux.spent_tx.as_ref());
                if let Some(by) = spent_by {
                    if *by != tx.hash {
                        return Err(StoreError::DoubleSpend {
                            outpoint: input.to_string(),
                            spent_by: by.clone(),
                        });
                    }
                }
                delta.history.push(AddressTxn {
                    address: ux.address.clone(),
                    tx_hash: tx.hash.clone(),
                    height,
                });
                spent_in_block.insert(input.clone(), tx.hash.clone());
                delta.spent.push((input.clone(), tx.hash.clone()));
            }

            for (index, output) in tx.outputs.iter().enumerate() {
                let outpoint = tx.outpoint(index as u32);
                if !self.outputs.contains_key(&outpoint) {
                    delta.created.insert(
                        outpoint.clone(),
                        UxOut {
                            outpoint,
                            address: output.address.clone(),
                            coins: output.coins,
                            hours: output.hours,
                            created_height: height,
                            created_tx: tx.hash.clone(),
                            spent_height: None,
                            spent_tx: None,
                        },
                    );
                }
                delta.history.push(AddressTxn {
                    address: output.address.clone(),
                    tx_hash: tx.hash.clone(),
                    height,
                });
            }

            delta.txns.push(TxRecord {
                tx: tx.clone(),
                height,
            });
        }
        Ok(delta)
    }

    fn commit(&mut self, height: u64, delta: BlockDelta) {
        self.outputs.extend(delta.created);
        for (outpoint, tx_hash) in delta.spent {
            if let Some(ux) = self.outputs.get_mut(&outpoint) {
                ux.spent_height = Some(height);
                ux.spent_tx = Some(tx_hash);
            }
        }
        for record in delta.txns {
            self.transactions.insert(record.tx.hash.clone(), record);
        }
        for entry in delta.history {
            let entries = self.address_txns.entry(entry.address.clone()).or_default();
            if !entries.iter().any(|e| e.tx_hash == entry.tx_hash) {
                entries.push(entry);
            }
        }
    }
}

/// In-memory history index.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    state: Mutex<HistoryState>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HistoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of indexed transactions.
    pub fn tx_count(&self) -> usize {
        self.state().transactions.len()
    }

    /// Number of known outputs, spent or not.
    pub fn output_count(&self) -> usize {
        self.state().outputs.len()
    }

    /// Drop the whole index and reset the parsed height to 0.
    pub fn reset(&self) {
        *self.state() = HistoryState::default();
    }
}

#[async_trait]
impl IndexStore for InMemoryHistoryStore {
    async fn parsed_height(&self) -> Result<u64, StoreError> {
        Ok(self.state().parsed_height)
    }

    async fn apply_block(&self, block: &Block) -> Result<(), StoreError> {
        let mut state = self.state();
        let delta = state.stage(block)?;
        state.commit(block.height(), delta);
        debug!(height = block.height(), "block applied to history index");
        Ok(())
    }

    async fn set_parsed_height(&self, height: u64) -> Result<(), StoreError> {
        self.state().parsed_height = height;
        Ok(())
    }
}

#[async_trait]
impl HistoryReader for InMemoryHistoryStore {
    async fn transaction(&self, tx_hash: &str) -> Result<Option<TxRecord>, StoreError> {
        Ok(self.state().transactions.get(tx_hash).cloned())
    }

    async fn uxout(&self, outpoint: &OutPoint) -> Result<Option<UxOut>, StoreError> {
        Ok(self.state().outputs.get(outpoint).cloned())
    }

    async fn address_transactions(&self, address: &str) -> Result<Vec<AddressTxn>, StoreError> {
        Ok(self
            .state()
            .address_txns
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn address_unspent(&self, address: &str) -> Result<Vec<UxOut>, StoreError> {
        let mut unspent: Vec<UxOut> = self
            .state()
            .outputs
            .values()
            .filter(|ux| ux.address == address && !ux.is_spent())
            .cloned()
            .collect();
        unspent.sort_by(|a, b| {
            (a.created_height, &a.outpoint).cmp(&(b.created_height, &b.outpoint))
        });
        Ok(unspent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use historyindex_core::types::{Transaction, TxOutput};

    /// alice receives 100 at genesis, pays bob 60 in block 2.
    fn two_blocks() -> (Block, Block) {
        let coinbase = Transaction::new(vec![], vec![TxOutput::new("alice", 100, 10)]);
        let genesis = Block::genesis(1_000, vec![coinbase.clone()]);
        let pay = Transaction::new(
            vec![coinbase.outpoint(0)],
            vec![TxOutput::new("bob", 60, 5), TxOutput::new("alice", 40, 5)],
        );
        let b2 = Block::new(&genesis.header, 1_010, vec![pay]);
        (genesis, b2)
    }

    #[tokio::test]
    async fn apply_derives_outputs_and_history() {
        let store = InMemoryHistoryStore::new();
        let (genesis, b2) = two_blocks();
        store.apply_block(&genesis).await.unwrap();
        store.apply_block(&b2).await.unwrap();

        let coinbase = &genesis.transactions[0];
        let spent = store.uxout(&coinbase.outpoint(0)).await.unwrap().unwrap();
        assert_eq!(spent.spent_height, Some(2));
        assert_eq!(spent.spent_tx.as_deref(), Some(b2.transactions[0].hash.as_str()));

        let alice = store.address_transactions("alice").await.unwrap();
        assert_eq!(alice.iter().map(|e| e.height).collect::<Vec<_>>(), vec![1, 2]);
        let bob = store.address_unspent("bob").await.unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].coins, 60);
        assert_eq!(store.tx_count(), 2);
    }

    #[tokio::test]
    async fn reapply_is_harmless() {
        let store = InMemoryHistoryStore::new();
        let (genesis, b2) = two_blocks();
        store.apply_block(&genesis).await.unwrap();
        store.apply_block(&b2).await.unwrap();
        store.apply_block(&b2).await.unwrap();

        assert_eq!(store.tx_count(), 2);
        assert_eq!(store.output_count(), 3);
        assert_eq!(store.address_transactions("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn double_spend_rejected_without_partial_effects() {
        let store = InMemoryHistoryStore::new();
        let (genesis, b2) = two_blocks();
        store.apply_block(&genesis).await.unwrap();
        store.apply_block(&b2).await.unwrap();

        let coinbase = &genesis.transactions[0];
        let fresh = Transaction::new(vec![], vec![TxOutput::new("dave", 1, 0)]);
        let thief = Transaction::new(
            vec![coinbase.outpoint(0)],
            vec![TxOutput::new("mallory", 100, 0)],
        );
        let b3 = Block::new(&b2.header, 1_020, vec![fresh.clone(), thief]);

        let err = store.apply_block(&b3).await.unwrap_err();
        assert!(matches!(err, StoreError::DoubleSpend { .. }));
        assert!(store.transaction(&fresh.hash).await.unwrap().is_none());
        assert!(store.address_transactions("dave").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_output_rejected() {
        let store = InMemoryHistoryStore::new();
        let (_, b2) = two_blocks();
        let err = store.apply_block(&b2).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingOutput { .. }));
        assert_eq!(store.tx_count(), 0);
    }

    #[tokio::test]
    async fn spend_within_same_block() {
        let store = InMemoryHistoryStore::new();
        let coinbase = Transaction::new(vec![], vec![TxOutput::new("alice", 10, 0)]);
        let hop = Transaction::new(vec![coinbase.outpoint(0)], vec![TxOutput::new("bob", 10, 0)]);
        let genesis = Block::genesis(0, vec![coinbase, hop.clone()]);

        store.apply_block(&genesis).await.unwrap();
        assert!(store.address_unspent("alice").await.unwrap().is_empty());
        assert_eq!(store.address_unspent("bob").await.unwrap()[0].created_tx, hop.hash);
    }

    #[tokio::test]
    async fn parsed_height_and_reset() {
        let store = InMemoryHistoryStore::new();
        assert_eq!(store.parsed_height().await.unwrap(), 0);
        let (genesis, _) = two_blocks();
        store.apply_block(&genesis).await.unwrap();
        store.set_parsed_height(1).await.unwrap();
        assert_eq!(store.parsed_height().await.unwrap(), 1);

        store.reset();
        assert_eq!(store.parsed_height().await.unwrap(), 0);
        assert_eq!(store.tx_count(), 0);
    }
}
