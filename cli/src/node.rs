//! `historyindex run`: the long-running node.
//!
//! Opens the SQLite database, catches the history index up with the stored
//! chain, then follows new blocks and serves the query API until Ctrl-C or a
//! fatal parser error.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use historyindex_core::{CancellationToken, ChainReader, ParserBuilder, ParserHandle};
use historyindex_storage::SqliteStorage;

use crate::cmd_blocks::next_block;
use crate::config::NodeConfig;

pub async fn run(config: NodeConfig, produce_every: Option<Duration>) -> Result<()> {
    let db = config.db_location()?;
    let storage = Arc::new(
        SqliteStorage::open(db)
            .await
            .with_context(|| format!("opening database {db}"))?,
    );
    info!(db, "database opened");

    let shutdown = CancellationToken::new();
    let (parser, handle) = ParserBuilder::new()
        .config(config.parser.clone())
        .notifier(|height| debug!(height, "history index advanced"))
        .build(storage.clone(), storage.clone());
    let parser_task = tokio::spawn(parser.run(shutdown.clone()));

    let http_task = if config.http.enabled {
        let listener = TcpListener::bind(config.http.listen.as_str())
            .await
            .with_context(|| format!("binding {}", config.http.listen))?;
        let state = historyindex_http::AppState::new(storage.clone(), storage.clone())
            .with_parser(handle.clone());
        let app = historyindex_http::router(state);
        Some(tokio::spawn(historyindex_http::serve(
            listener,
            app,
            shutdown.clone(),
        )))
    } else {
        None
    };

    let producer_task = produce_every.map(|every| {
        tokio::spawn(produce_blocks(
            storage.clone(),
            handle.clone(),
            every,
            shutdown.clone(),
        ))
    });

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("listening for ctrl-c")?;
            info!("interrupt received, shutting down");
        }
        _ = shutdown.cancelled() => {
            warn!("blockchain parser failed, shutting down");
        }
    }

    // Stop producing before stopping the parser so no producer is left
    // waiting on a full queue.
    shutdown.cancel();
    if let Some(task) = producer_task {
        task.await.context("block producer panicked")??;
    }
    handle.stop().await?;
    if let Some(task) = http_task {
        task.await.context("http server panicked")??;
    }

    parser_task
        .await
        .context("blockchain parser panicked")?
        .context("blockchain parser failed")
}

/// Append a synthetic block every `every` and notify the parser.
async fn produce_blocks(
    storage: Arc<SqliteStorage>,
    parser: ParserHandle,
    every: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let parent = storage.last_blocks(1).await?.into_iter().next();
        let block = next_block(parent.as_ref(), chrono::Utc::now().timestamp() as u64);
        storage.append_block(&block).await?;
        info!(height = block.height(), hash = %block.hash(), "block produced");

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = parser.on_block_appended(block) => {}
        }
    }
}
