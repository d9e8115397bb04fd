//! Fluent builder API for creating parsers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use historyindex_core::{FatalPolicy, MemoryChain, ParserBuilder};
//! # fn store() -> Arc<dyn historyindex_core::IndexStore> { unimplemented!() }
//!
//! let chain = Arc::new(MemoryChain::new());
//! let (parser, handle) = ParserBuilder::new()
//!     .queue_capacity(32)
//!     .on_fatal(FatalPolicy::Degrade)
//!     .notifier(|height| println!("parsed up to {height}"))
//!     .build(chain, store());
//! ```

use std::sync::Arc;

use crate::config::{FatalPolicy, ParserConfig};
use crate::parser::{BlockchainParser, ParseNotifier, ParserHandle};
use crate::source::BlockSource;
use crate::store::IndexStore;

/// Fluent builder for [`BlockchainParser`].
#[derive(Default)]
pub struct ParserBuilder {
    config: ParserConfig,
    notifier: Option<ParseNotifier>,
}

impl ParserBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration (e.g. loaded from a file).
    pub fn config(mut self, config: ParserConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the pending-block queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set the reaction to fatal errors.
    pub fn on_fatal(mut self, policy: FatalPolicy) -> Self {
        self.config.on_fatal = policy;
        self
    }

    /// Bound how long `stop()` waits for the acknowledgement.
    pub fn stop_timeout_ms(mut self, ms: u64) -> Self {
        self.config.stop_timeout_ms = Some(ms);
        self
    }

    /// Register a callback invoked with the new parsed height after each
    /// successful catch-up.
    pub fn notifier(mut self, f: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.notifier = Some(Arc::new(f));
        self
    }

    /// Build the [`ParserConfig`] only.
    pub fn build_config(self) -> ParserConfig {
        self.config
    }

    /// Build the parser and its handle.
    pub fn build(
        self,
        source: Arc<dyn BlockSource>,
        store: Arc<dyn IndexStore>,
    ) -> (BlockchainParser, ParserHandle) {
        BlockchainParser::new(source, store, self.config, self.notifier)
    }
}
