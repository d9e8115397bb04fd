//! The blockchain parser: derives the history index from the chain.
//!
//! # Lifecycle
//! ```text
//! STARTING ── catch up to head ──► RUNNING ── stop request ──► STOPPING ──► STOPPED
//!     │                               │
//!     └──── fatal error ──────────────┴─────────────────────────────────────► STOPPED
//! ```
//!
//! A single task owns the parser and performs every watermark read, every
//! `apply_block` and every watermark write. Producers talk to it through a
//! [`ParserHandle`]: a bounded queue of block notifications and a control
//! channel carrying one-shot stop acknowledgements.
//!
//! Notifications are wake-up hints. The range to replay is always derived from
//! the persisted parsed height and the block source, so duplicated, reordered
//! or dropped notifications never break ordering.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{FatalPolicy, ParserConfig, ParserState, ParserStatus};
use crate::error::IndexerError;
use crate::source::BlockSource;
use crate::store::IndexStore;
use crate::types::Block;

/// Callback invoked with the new parsed height after each successful catch-up.
pub type ParseNotifier = Arc<dyn Fn(u64) + Send + Sync>;

type StopAck = oneshot::Sender<()>;

/// The parser task. Consumed by [`BlockchainParser::run`].
pub struct BlockchainParser {
    source: Arc<dyn BlockSource>,
    store: Arc<dyn IndexStore>,
    config: ParserConfig,
    notifier: Option<ParseNotifier>,
    blocks_rx: mpsc::Receiver<Block>,
    closing_rx: mpsc::Receiver<StopAck>,
    status_tx: watch::Sender<ParserStatus>,
}

/// Cloneable producer/controller side of a [`BlockchainParser`].
#[derive(Clone)]
pub struct ParserHandle {
    blocks_tx: mpsc::Sender<Block>,
    closing_tx: mpsc::Sender<StopAck>,
    status_rx: watch::Receiver<ParserStatus>,
    stop_timeout: Option<Duration>,
}

impl BlockchainParser {
    /// Create a parser and its handle. See also [`crate::ParserBuilder`].
    pub fn new(
        source: Arc<dyn BlockSource>,
        store: Arc<dyn IndexStore>,
        config: ParserConfig,
        notifier: Option<ParseNotifier>,
    ) -> (Self, ParserHandle) {
        let (blocks_tx, blocks_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (closing_tx, closing_rx) = mpsc::channel(1);
        let (status_tx, status_rx) = watch::channel(ParserStatus::default());

        let handle = ParserHandle {
            blocks_tx,
            closing_tx,
            status_rx,
            stop_timeout: config.stop_timeout(),
        };
        let parser = Self {
            source,
            store,
            config,
            notifier,
            blocks_rx,
            closing_rx,
            status_tx,
        };
        (parser, handle)
    }

    /// Catch up to the chain head, then follow newly appended blocks until a
    /// stop request arrives.
    ///
    /// On a fatal error the parser stops, publishes the error in its status
    /// and, under [`FatalPolicy::ShutdownProcess`], cancels `shutdown` so the
    /// owning process can exit and resume from the persisted height later.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), IndexerError> {
        info!("blockchain parser start");

        if let Err(err) = self.catch_up().await {
            return Err(self.fail(err, &shutdown));
        }
        self.set_state(ParserState::Running);

        loop {
            tokio::select! {
                biased;

                Some(ack) = self.closing_rx.recv() => {
                    self.set_state(ParserState::Stopping);
                    self.set_state(ParserState::Stopped);
                    let _ = ack.send(());
                    return Ok(());
                }
                Some(block) = self.blocks_rx.recv() => {
                    let target = self.drain_pending(block.height());
                    if let Err(err) = self.follow(target).await {
                        return Err(self.fail(err, &shutdown));
                    }
                }
                else => {
                    debug!("all parser handles dropped");
                    self.set_state(ParserState::Stopped);
                    return Ok(());
                }
            }
        }
    }

    /// Bring the parsed height up to `target`.
    ///
    /// Blocks `(parsed, target]` are applied in ascending order and the
    /// watermark is advanced after each one. On error nothing past the last
    /// successfully applied block has been recorded.
    pub async fn parse_to(&self, target: u64) -> Result<u64, IndexerError> {
        let parsed = self.parsed_height().await?;
        self.replay(parsed, target).await
    }

    async fn catch_up(&self) -> Result<u64, IndexerError> {
        let head = self
            .source
            .head_height()
            .await
            .map_err(IndexerError::Source)?;
        let parsed = self.parsed_height().await?;
        if parsed > head {
            // The index claims blocks the chain does not have.
            return Err(IndexerError::WatermarkAhead {
                parsed,
                target: head,
            });
        }
        self.publish_parsed(parsed);
        self.replay(parsed, head).await
    }

    /// Handle a notification for `target`. Stale hints (at or below the
    /// parsed height) are ignored.
    async fn follow(&self, target: u64) -> Result<(), IndexerError> {
        let parsed = self.parsed_height().await?;
        if target <= parsed {
            debug!(target, parsed, "stale block notification");
            return Ok(());
        }
        self.replay(parsed, target).await.map(|_| ())
    }

    async fn replay(&self, parsed: u64, target: u64) -> Result<u64, IndexerError> {
        if target < parsed {
            return Err(IndexerError::WatermarkAhead { parsed, target });
        }
        if target == parsed {
            return Ok(parsed);
        }

        for height in parsed + 1..=target {
            if let Err(err) = self.parse_block(height).await {
                self.publish_parsed(height - 1);
                return Err(err);
            }
        }

        info!(from = parsed + 1, to = target, "parse block from {} to {}", parsed + 1, target);
        self.publish_parsed(target);
        if let Some(notify) = &self.notifier {
            notify(target);
        }
        Ok(target)
    }

    async fn parse_block(&self, height: u64) -> Result<(), IndexerError> {
        let block = self
            .source
            .block_at_height(height)
            .await
            .map_err(IndexerError::Source)?
            .filter(|b| b.height() == height)
            .ok_or(IndexerError::Gap { height })?;

        self.store
            .apply_block(&block)
            .await
            .map_err(|source| IndexerError::Apply { height, source })?;

        // Only after the block is committed.
        self.store
            .set_parsed_height(height)
            .await
            .map_err(|source| IndexerError::Persist { height, source })?;

        debug!(height, txns = block.transactions.len(), "block parsed");
        Ok(())
    }

    async fn parsed_height(&self) -> Result<u64, IndexerError> {
        self.store.parsed_height().await.map_err(IndexerError::Store)
    }

    /// Fold every notification already queued into a single target.
    fn drain_pending(&mut self, mut target: u64) -> u64 {
        while let Ok(block) = self.blocks_rx.try_recv() {
            target = target.max(block.height());
        }
        target
    }

    fn fail(&self, err: IndexerError, shutdown: &CancellationToken) -> IndexerError {
        error!(height = ?err.height(), error = %err, "blockchain parser failed");
        let message = err.to_string();
        self.status_tx.send_modify(|status| {
            status.state = ParserState::Stopped;
            status.last_error = Some(message);
        });
        match self.config.on_fatal {
            FatalPolicy::ShutdownProcess => shutdown.cancel(),
            FatalPolicy::Degrade => {
                warn!("history index degraded, parser stopped while the process keeps running")
            }
        }
        err
    }

    fn set_state(&self, state: ParserState) {
        self.status_tx.send_modify(|status| status.state = state);
    }

    fn publish_parsed(&self, height: u64) {
        self.status_tx
            .send_modify(|status| status.parsed_height = height);
    }
}

impl ParserHandle {
    /// Hand a newly appended block to the parser.
    ///
    /// Waits while the pending-block queue is full. Once the parser has
    /// stopped the notification is discarded; the next run re-derives the
    /// range to index from the persisted parsed height.
    pub async fn on_block_appended(&self, block: Block) {
        let height = block.height();
        if self.blocks_tx.send(block).await.is_err() {
            debug!(height, "parser stopped, block notification discarded");
        }
    }

    /// Blocking variant of [`ParserHandle::on_block_appended`] for producers
    /// running on plain threads.
    ///
    /// # Panics
    /// When called from within an asynchronous execution context.
    pub fn blocking_on_block_appended(&self, block: Block) {
        let height = block.height();
        if self.blocks_tx.blocking_send(block).is_err() {
            debug!(height, "parser stopped, block notification discarded");
        }
    }

    /// Ask the parser to stop and wait until it acknowledges.
    ///
    /// The parser acknowledges between catch-ups, never in the middle of a
    /// block. Stopping a parser that already exited returns immediately.
    pub async fn stop(&self) -> Result<(), IndexerError> {
        match self.stop_timeout {
            Some(limit) => tokio::time::timeout(limit, self.stop_and_wait())
                .await
                .map_err(|_| IndexerError::StopTimeout(limit)),
            None => {
                self.stop_and_wait().await;
                Ok(())
            }
        }
    }

    async fn stop_and_wait(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.closing_tx.send(ack_tx).await.is_err() {
            debug!("blockchain parser already stopped");
            return;
        }
        // A dropped ack means the parser exited on a fatal error first.
        let _ = ack_rx.await;
        info!("blockchain parser stopped");
    }

    /// Latest published status.
    pub fn status(&self) -> ParserStatus {
        self.status_rx.borrow().clone()
    }

    pub fn state(&self) -> ParserState {
        self.status_rx.borrow().state
    }

    /// Wait until the parser reports `state`, or until it stops.
    pub async fn wait_for_state(&self, state: ParserState) -> ParserStatus {
        self.wait_until(|s| s.state == state).await
    }

    /// Wait until the parsed height reaches `height`, or until the parser stops.
    pub async fn wait_for_height(&self, height: u64) -> ParserStatus {
        self.wait_until(|s| s.parsed_height >= height).await
    }

    async fn wait_until(&self, done: impl Fn(&ParserStatus) -> bool) -> ParserStatus {
        let mut rx = self.status_rx.clone();
        loop {
            {
                let status = rx.borrow_and_update();
                if done(&status) || status.state == ParserState::Stopped {
                    return status.clone();
                }
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
