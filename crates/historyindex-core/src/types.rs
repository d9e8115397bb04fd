//! Shared types for the history indexing pipeline.
//!
//! Blocks arrive already validated; the helpers here only compute the hashes
//! that link a block to its parent and its transactions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Hash of the (non-existent) parent of the first block.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Returns `true` if `s` is a lowercase-or-uppercase hex SHA-256 digest.
pub fn is_valid_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

// ─── OutPoint ─────────────────────────────────────────────────────────────────

/// Reference to a transaction output: `(tx_hash, index)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: String,
    pub index: u32,
}

impl OutPoint {
    pub fn new(tx_hash: impl Into<String>, index: u32) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            index,
        }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.index)
    }
}

/// Error returned when parsing an [`OutPoint`] from its `"<tx_hash>:<index>"` form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseOutPointError {
    #[error("expected <tx_hash>:<index>")]
    MissingSeparator,
    #[error("invalid tx hash: {0}")]
    InvalidHash(String),
    #[error("invalid output index: {0}")]
    InvalidIndex(String),
}

impl FromStr for OutPoint {
    type Err = ParseOutPointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hash, index) = s
            .rsplit_once(':')
            .ok_or(ParseOutPointError::MissingSeparator)?;
        if !is_valid_hash(hash) {
            return Err(ParseOutPointError::InvalidHash(hash.to_string()));
        }
        let index = index
            .parse::<u32>()
            .map_err(|e| ParseOutPointError::InvalidIndex(e.to_string()))?;
        Ok(Self::new(hash.to_ascii_lowercase(), index))
    }
}

// ─── Transaction ─────────────────────────────────────────────────────────────

/// A single output created by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub coins: u64,
    pub hours: u64,
}

impl TxOutput {
    pub fn new(address: impl Into<String>, coins: u64, hours: u64) -> Self {
        Self {
            address: address.into(),
            coins,
            hours,
        }
    }
}

/// A confirmed transaction: spends `inputs`, creates `outputs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction hash (hex SHA-256 of inputs and outputs).
    pub hash: String,
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Build a transaction and compute its hash.
    pub fn new(inputs: Vec<OutPoint>, outputs: Vec<TxOutput>) -> Self {
        let hash = Self::compute_hash(&inputs, &outputs);
        Self {
            hash,
            inputs,
            outputs,
        }
    }

    fn compute_hash(inputs: &[OutPoint], outputs: &[TxOutput]) -> String {
        let mut hasher = Sha256::new();
        for input in inputs {
            hasher.update(input.tx_hash.as_bytes());
            hasher.update(input.index.to_le_bytes());
        }
        for output in outputs {
            hasher.update(output.address.as_bytes());
            hasher.update(output.coins.to_le_bytes());
            hasher.update(output.hours.to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Outpoint of this transaction's `index`-th output.
    pub fn outpoint(&self, index: u32) -> OutPoint {
        OutPoint::new(self.hash.clone(), index)
    }
}

// ─── Block ───────────────────────────────────────────────────────────────────

/// Block header. `height` is the block's sequence number; the first block of
/// a chain has height 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: String,
    pub prev_hash: String,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    pub fee: u64,
    pub version: u32,
    /// Hash over the block's transaction hashes.
    pub body_hash: String,
}

/// A confirmed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// First block of a chain (height 1, parent [`ZERO_HASH`]).
    pub fn genesis(timestamp: u64, transactions: Vec<Transaction>) -> Self {
        Self::build(1, ZERO_HASH.to_string(), timestamp, transactions)
    }

    /// Block extending `parent`.
    pub fn new(parent: &BlockHeader, timestamp: u64, transactions: Vec<Transaction>) -> Self {
        Self::build(parent.height + 1, parent.hash.clone(), timestamp, transactions)
    }

    fn build(height: u64, prev_hash: String, timestamp: u64, transactions: Vec<Transaction>) -> Self {
        let tx_hashes: Vec<&[u8]> = transactions.iter().map(|t| t.hash.as_bytes()).collect();
        let body_hash = sha256_hex(&tx_hashes);
        let version = 0u32;
        let fee = 0u64;
        let hash = sha256_hex(&[
            &height.to_le_bytes(),
            prev_hash.as_bytes(),
            &timestamp.to_le_bytes(),
            &fee.to_le_bytes(),
            &version.to_le_bytes(),
            body_hash.as_bytes(),
        ]);
        Self {
            header: BlockHeader {
                height,
                hash,
                prev_hash,
                timestamp,
                fee,
                version,
                body_hash,
            },
            transactions,
        }
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn hash(&self) -> &str {
        &self.header.hash
    }

    /// Returns `true` if `self` directly extends `parent`.
    pub fn extends(&self, parent: &BlockHeader) -> bool {
        self.header.height == parent.height + 1 && self.header.prev_hash == parent.hash
    }
}

// ─── Derived index records ───────────────────────────────────────────────────

/// An output as seen by the history index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UxOut {
    pub outpoint: OutPoint,
    pub address: String,
    pub coins: u64,
    pub hours: u64,
    pub created_height: u64,
    pub created_tx: String,
    /// Height of the block that spent this output, `None` while unspent.
    pub spent_height: Option<u64>,
    pub spent_tx: Option<String>,
}

impl UxOut {
    pub fn is_spent(&self) -> bool {
        self.spent_tx.is_some()
    }
}

/// One entry of an address's transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressTxn {
    pub address: String,
    pub tx_hash: String,
    pub height: u64,
}

/// A transaction together with the height of the block that confirmed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub tx: Transaction,
    pub height: u64,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
