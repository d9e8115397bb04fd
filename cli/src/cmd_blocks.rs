//! `historyindex import` / `historyindex generate`: move blocks in and out of
//! JSON-lines files.
//!
//! One block per line, serialised as the JSON form of
//! [`historyindex_core::Block`].

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use historyindex_core::{Block, ChainReader, Transaction, TxOutput};
use historyindex_storage::SqliteStorage;

/// Seconds between synthetic blocks.
const BLOCK_INTERVAL_SECS: u64 = 10;

/// Append every block in `file` to the chain stored in `storage`.
///
/// Runs offline: the index is not touched. The next node start catches up
/// from the persisted parsed height.
pub async fn import(storage: &SqliteStorage, file: &Path) -> Result<u64> {
    let reader = BufReader::new(
        File::open(file).with_context(|| format!("opening {}", file.display()))?,
    );

    let mut imported = 0u64;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", file.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let block: Block = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid block", file.display(), lineno + 1))?;
        storage
            .append_block(&block)
            .await
            .with_context(|| format!("{}:{}: appending block", file.display(), lineno + 1))?;
        imported += 1;
    }

    info!(imported, file = %file.display(), "blocks imported");
    Ok(imported)
}

/// Write `count` synthetic blocks continuing from the stored head to `file`.
pub async fn generate(storage: &SqliteStorage, count: u64, file: &Path) -> Result<Option<Block>> {
    let mut parent = storage.last_blocks(1).await?.into_iter().next();
    let mut out = BufWriter::new(
        File::create(file).with_context(|| format!("creating {}", file.display()))?,
    );

    for _ in 0..count {
        let block = next_block(parent.as_ref(), chrono::Utc::now().timestamp() as u64);
        serde_json::to_writer(&mut out, &block)?;
        out.write_all(b"\n")?;
        parent = Some(block);
    }
    out.flush()?;

    info!(count, file = %file.display(), "blocks generated");
    Ok(parent)
}

fn miner_address(height: u64) -> String {
    format!("miner-{}", height % 7)
}

fn wallet_address(n: u64) -> String {
    format!("wallet-{}", n % 11)
}

/// Synthetic block extending `parent`.
///
/// Each block carries a coinbase and one payment spending that coinbase, so
/// the block is valid on top of any chain. The coinbase amount includes the
/// height to keep transaction hashes unique.
pub fn next_block(parent: Option<&Block>, now: u64) -> Block {
    let height = parent.map_or(1, |p| p.height() + 1);
    let reward = 1_000_000 + height;

    let coinbase = Transaction::new(
        vec![],
        vec![TxOutput::new(miner_address(height), reward, height % 100)],
    );
    let payment = Transaction::new(
        vec![coinbase.outpoint(0)],
        vec![
            TxOutput::new(wallet_address(height), reward / 2, 1),
            TxOutput::new(miner_address(height), reward - reward / 2, 1),
        ],
    );

    match parent {
        Some(parent) => {
            let timestamp = now.max(parent.header.timestamp + BLOCK_INTERVAL_SECS);
            Block::new(&parent.header, timestamp, vec![coinbase, payment])
        }
        None => Block::genesis(now, vec![coinbase, payment]),
    }
}
