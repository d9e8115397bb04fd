//! historyindex-core: the ordered, resumable history indexing engine.
//!
//! # Architecture
//!
//! ```text
//! block appender ──on_block_appended──► ParserHandle ──bounded queue──┐
//!                ──stop()──────────────►             ──rendezvous────┤
//!                                                                    ▼
//!                                    BlockchainParser (single task)
//!                                        ├── BlockSource  (canonical chain, read-only)
//!                                        └── IndexStore   (parsed height + apply_block)
//! ```
//!
//! The persisted parsed height is the only record of progress: every block at
//! or below it has been applied, none above it has.

pub mod builder;
pub mod chain;
pub mod config;
pub mod error;
pub mod parser;
pub mod source;
pub mod store;
pub mod types;

pub use builder::ParserBuilder;
pub use chain::MemoryChain;
pub use config::{FatalPolicy, ParserConfig, ParserState, ParserStatus};
pub use error::{IndexerError, StoreError};
pub use parser::{BlockchainParser, ParseNotifier, ParserHandle};
pub use source::{BlockSource, ChainReader};
pub use store::{HistoryReader, IndexStore};
pub use types::{AddressTxn, Block, BlockHeader, OutPoint, Transaction, TxOutput, TxRecord, UxOut};

pub use tokio_util::sync::CancellationToken;
