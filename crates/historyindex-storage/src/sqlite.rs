//! SQLite storage backend for historyindex.
//!
//! Holds the canonical chain and the derived history index in a single
//! SQLite file, so the node can restart from disk. Uses `sqlx` with WAL mode
//! for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use historyindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./history.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use historyindex_core::error::StoreError;
use historyindex_core::source::{BlockSource, ChainReader};
use historyindex_core::store::{HistoryReader, IndexStore};
use historyindex_core::types::{AddressTxn, Block, OutPoint, Transaction, TxRecord, UxOut, ZERO_HASH};

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn codec(e: serde_json::Error) -> StoreError {
    StoreError::Codec(e.to_string())
}

fn uxout_from_row(row: &SqliteRow) -> UxOut {
    UxOut {
        outpoint: OutPoint::new(
            row.get::<String, _>("tx_hash"),
            row.get::<i64, _>("idx") as u32,
        ),
        address: row.get("address"),
        coins: row.get::<i64, _>("coins") as u64,
        hours: row.get::<i64, _>("hours") as u64,
        created_height: row.get::<i64, _>("created_height") as u64,
        created_tx: row.get("created_tx"),
        spent_height: row.get::<Option<i64>, _>("spent_height").map(|h| h as u64),
        spent_tx: row.get("spent_tx"),
    }
}

const UXOUT_COLUMNS: &str =
    "tx_hash, idx, address, coins, hours, created_height, created_tx, spent_height, spent_tx";

/// SQLite-backed chain and history index.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./history.db"`) or a full
    /// SQLite URL (`"sqlite:./history.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(backend)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every connection to `sqlite::memory:` sees its own database, so the
    /// pool is pinned to a single long-lived connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(backend)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        // Canonical chain
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blocks (
                height     INTEGER PRIMARY KEY,
                hash       TEXT    NOT NULL UNIQUE,
                prev_hash  TEXT    NOT NULL,
                timestamp  INTEGER NOT NULL,
                block_json TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        // Single-row watermark
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS history_meta (
                id            INTEGER PRIMARY KEY CHECK (id = 0),
                parsed_height INTEGER NOT NULL,
                updated_at    INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transactions (
                tx_hash TEXT    PRIMARY KEY,
                height  INTEGER NOT NULL,
                tx_json TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS outputs (
                tx_hash        TEXT    NOT NULL,
                idx            INTEGER NOT NULL,
                address        TEXT    NOT NULL,
                coins          INTEGER NOT NULL,
                hours          INTEGER NOT NULL,
                created_height INTEGER NOT NULL,
                created_tx     TEXT    NOT NULL,
                spent_height   INTEGER,
                spent_tx       TEXT,
                PRIMARY KEY (tx_hash, idx)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS address_txns (
                address TEXT    NOT NULL,
                tx_hash TEXT    NOT NULL,
                height  INTEGER NOT NULL,
                PRIMARY KEY (address, tx_hash)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_outputs_address ON outputs (address);")
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(())
    }

    // ─── Chain storage ──────────────────────────────────────────────────────────

    /// Append `block` to the stored chain.
    ///
    /// The block must have height `head + 1` and point at the current head.
    pub async fn append_block(&self, block: &Block) -> Result<(), StoreError> {
        let head = sqlx::query("SELECT height, hash FROM blocks ORDER BY height DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        let (head_height, head_hash) = match head {
            Some(row) => (
                row.get::<i64, _>("height") as u64,
                row.get::<String, _>("hash"),
            ),
            None => (0, ZERO_HASH.to_string()),
        };
        if block.height() != head_height + 1 || block.header.prev_hash != head_hash {
            return Err(StoreError::NonSequential {
                height: block.height(),
                head: head_height,
            });
        }

        let json = serde_json::to_string(block).map_err(codec)?;
        sqlx::query(
            "INSERT INTO blocks (height, hash, prev_hash, timestamp, block_json)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(block.height() as i64)
        .bind(block.hash())
        .bind(&block.header.prev_hash)
        .bind(block.header.timestamp as i64)
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        debug!(height = block.height(), hash = %block.hash(), "block appended");
        Ok(())
    }

    fn decode_block(row: Option<SqliteRow>) -> Result<Option<Block>, StoreError> {
        row.map(|r| serde_json::from_str::<Block>(&r.get::<String, _>("block_json")).map_err(codec))
            .transpose()
    }

    // ─── Index maintenance ───────────────────────────────────────────────────────

    /// Drop the derived history index and reset the parsed height to 0.
    ///
    /// The chain itself is kept; the next parser run rebuilds the index.
    pub async fn reset_index(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for table in ["transactions", "outputs", "address_txns", "history_meta"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;
        debug!("history index reset");
        Ok(())
    }

    /// Number of indexed transactions.
    pub async fn tx_count(&self) -> Result<u64, StoreError> {
        self.count("SELECT COUNT(*) as cnt FROM transactions").await
    }

    /// Number of known outputs, spent or not.
    pub async fn output_count(&self) -> Result<u64, StoreError> {
        self.count("SELECT COUNT(*) as cnt FROM outputs").await
    }

    async fn count(&self, sql: &str) -> Result<u64, StoreError> {
        let row = sqlx::query(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

// ─── Block application ───────────────────────────────────────────────────────

async fn spend_input(
    conn: &mut SqliteConnection,
    input: &OutPoint,
    tx: &Transaction,
    height: u64,
) -> Result<(), StoreError> {
    let row = sqlx::query("SELECT address, spent_tx FROM outputs WHERE tx_hash = ? AND idx = ?")
        .bind(&input.tx_hash)
        .bind(input.index as i64)
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?
        .ok_or_else(|| StoreError::MissingOutput {
            outpoint: input.to_string(),
        })?;

    let address: String = row.get("address");
    if let Some(spent_by) = row.get::<Option<String>, _>("spent_tx") {
        if spent_by != tx.hash {
            return Err(StoreError::DoubleSpend {
                outpoint: input.to_string(),
                spent_by,
            });
        }
    }

    sqlx::query(
        "UPDATE outputs SET spent_height = ?, spent_tx = ? WHERE tx_hash = ? AND idx = ?",
    )
    .bind(height as i64)
    .bind(&tx.hash)
    .bind(&input.tx_hash)
    .bind(input.index as i64)
    .execute(&mut *conn)
    .await
    .map_err(backend)?;

    record_history(conn, &address, &tx.hash, height).await
}

async fn create_output(
    conn: &mut SqliteConnection,
    tx: &Transaction,
    index: usize,
    height: u64,
) -> Result<(), StoreError> {
    let output = &tx.outputs[index];
    sqlx::query(
        "INSERT OR IGNORE INTO outputs
         (tx_hash, idx, address, coins, hours, created_height, created_tx)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&tx.hash)
    .bind(index as i64)
    .bind(&output.address)
    .bind(output.coins as i64)
    .bind(output.hours as i64)
    .bind(height as i64)
    .bind(&tx.hash)
    .execute(&mut *conn)
    .await
    .map_err(backend)?;

    record_history(conn, &output.address, &tx.hash, height).await
}

async fn record_history(
    conn: &mut SqliteConnection,
    address: &str,
    tx_hash: &str,
    height: u64,
) -> Result<(), StoreError> {
    sqlx::query("INSERT OR IGNORE INTO address_txns (address, tx_hash, height) VALUES (?, ?, ?)")
        .bind(address)
        .bind(tx_hash)
        .bind(height as i64)
        .execute(&mut *conn)
        .await
        .map_err(backend)?;
    Ok(())
}

async fn record_transaction(
    conn: &mut SqliteConnection,
    tx: &Transaction,
    height: u64,
) -> Result<(), StoreError> {
    let json = serde_json::to_string(tx).map_err(codec)?;
    sqlx::query("INSERT OR REPLACE INTO transactions (tx_hash, height, tx_json) VALUES (?, ?, ?)")
        .bind(&tx.hash)
        .bind(height as i64)
        .bind(&json)
        .execute(&mut *conn)
        .await
        .map_err(backend)?;
    Ok(())
}

// ─── BlockSource / ChainReader impl ──────────────────────────────────────────

#[async_trait]
impl BlockSource for SqliteStorage {
    async fn head_height(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(height), 0) as head FROM blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.get::<i64, _>("head") as u64)
    }

    async fn block_at_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        let row = sqlx::query("SELECT block_json FROM blocks WHERE height = ?")
            .bind(height as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Self::decode_block(row)
    }
}

#[async_trait]
impl ChainReader for SqliteStorage {
    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, StoreError> {
        let row = sqlx::query("SELECT block_json FROM blocks WHERE hash = ?")
            .bind(hash.to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Self::decode_block(row)
    }

    async fn last_blocks(&self, n: u64) -> Result<Vec<Block>, StoreError> {
        let rows = sqlx::query("SELECT block_json FROM blocks ORDER BY height DESC LIMIT ?")
            .bind(n.min(i64::MAX as u64) as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut blocks = Vec::with_capacity(rows.len());
        for row in rows {
            let json: String = row.get("block_json");
            blocks.push(serde_json::from_str(&json).map_err(codec)?);
        }
        Ok(blocks)
    }
}

// ─── IndexStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl IndexStore for SqliteStorage {
    async fn parsed_height(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT parsed_height FROM history_meta WHERE id = 0")
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map_or(0, |r| r.get::<i64, _>("parsed_height") as u64))
    }

    async fn apply_block(&self, block: &Block) -> Result<(), StoreError> {
        let height = block.height();
        let mut db = self.pool.begin().await.map_err(backend)?;

        // Any early return drops `db`, which rolls the whole block back.
        for tx in &block.transactions {
            for input in &tx.inputs {
                spend_input(&mut *db, input, tx, height).await?;
            }
            for index in 0..tx.outputs.len() {
                create_output(&mut *db, tx, index, height).await?;
            }
            record_transaction(&mut *db, tx, height).await?;
        }

        db.commit().await.map_err(backend)?;
        debug!(height, txns = block.transactions.len(), "block applied to history index");
        Ok(())
    }

    async fn set_parsed_height(&self, height: u64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO history_meta (id, parsed_height, updated_at)
             VALUES (0, ?, ?)",
        )
        .bind(height as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        debug!(height, "parsed height saved");
        Ok(())
    }
}

// ─── HistoryReader impl ──────────────────────────────────────────────────────

#[async_trait]
impl HistoryReader for SqliteStorage {
    async fn transaction(&self, tx_hash: &str) -> Result<Option<TxRecord>, StoreError> {
        let row = sqlx::query("SELECT height, tx_json FROM transactions WHERE tx_hash = ?")
            .bind(tx_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(r) => {
                let tx: Transaction =
                    serde_json::from_str(&r.get::<String, _>("tx_json")).map_err(codec)?;
                Ok(Some(TxRecord {
                    tx,
                    height: r.get::<i64, _>("height") as u64,
                }))
            }
            None => Ok(None),
        }
    }

    async fn uxout(&self, outpoint: &OutPoint) -> Result<Option<UxOut>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {UXOUT_COLUMNS} FROM outputs WHERE tx_hash = ? AND idx = ?"
        ))
        .bind(&outpoint.tx_hash)
        .bind(outpoint.index as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.as_ref().map(uxout_from_row))
    }

    async fn address_transactions(&self, address: &str) -> Result<Vec<AddressTxn>, StoreError> {
        let rows = sqlx::query(
            "SELECT address, tx_hash, height FROM address_txns
             WHERE address = ? ORDER BY height, rowid",
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(|r| AddressTxn {
                address: r.get("address"),
                tx_hash: r.get("tx_hash"),
                height: r.get::<i64, _>("height") as u64,
            })
            .collect())
    }

    async fn address_unspent(&self, address: &str) -> Result<Vec<UxOut>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {UXOUT_COLUMNS} FROM outputs
             WHERE address = ? AND spent_tx IS NULL
             ORDER BY created_height, tx_hash, idx"
        ))
        .bind(address)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.iter().map(uxout_from_row).collect())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use historyindex_core::types::TxOutput;
    use historyindex_core::{CancellationToken, ParserBuilder, ParserState};

    /// genesis pays alice 100; block 2 sends 60 of it to bob.
    fn sample_chain() -> Vec<Block> {
        let coinbase = Transaction::new(vec![], vec![TxOutput::new("alice", 100, 10)]);
        let genesis = Block::genesis(1_700_000_000, vec![coinbase.clone()]);
        let pay = Transaction::new(
            vec![coinbase.outpoint(0)],
            vec![TxOutput::new("bob", 60, 4), TxOutput::new("alice", 40, 6)],
        );
        let b2 = Block::new(&genesis.header, 1_700_000_010, vec![pay]);
        vec![genesis, b2]
    }

    async fn store_with_chain() -> (SqliteStorage, Vec<Block>) {
        let store = SqliteStorage::in_memory().await.unwrap();
        let chain = sample_chain();
        for block in &chain {
            store.append_block(block).await.unwrap();
        }
        (store, chain)
    }

    // ── Chain ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn chain_append_and_lookup() {
        let (store, chain) = store_with_chain().await;

        assert_eq!(store.head_height().await.unwrap(), 2);
        assert_eq!(store.block_at_height(1).await.unwrap().unwrap(), chain[0]);
        assert!(store.block_at_height(3).await.unwrap().is_none());
        assert_eq!(
            store.block_by_hash(chain[1].hash()).await.unwrap().unwrap(),
            chain[1]
        );

        let last = store.last_blocks(5).await.unwrap();
        assert_eq!(last.iter().map(Block::height).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn chain_rejects_unlinked_block() {
        let (store, chain) = store_with_chain().await;
        let orphan = Block::new(&chain[0].header, 1, vec![]);
        let err = store.append_block(&orphan).await.unwrap_err();
        assert!(matches!(err, StoreError::NonSequential { height: 2, head: 2 }));
    }

    #[tokio::test]
    async fn empty_chain_has_head_zero() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert_eq!(store.head_height().await.unwrap(), 0);
        assert!(store.last_blocks(10).await.unwrap().is_empty());
    }

    // ── Index ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn apply_derives_outputs_and_history() {
        let (store, chain) = store_with_chain().await;
        store.apply_block(&chain[0]).await.unwrap();
        store.apply_block(&chain[1]).await.unwrap();

        let coinbase = &chain[0].transactions[0];
        let pay = &chain[1].transactions[0];

        let spent = store.uxout(&coinbase.outpoint(0)).await.unwrap().unwrap();
        assert_eq!(spent.spent_height, Some(2));
        assert_eq!(spent.spent_tx.as_deref(), Some(pay.hash.as_str()));

        let record = store.transaction(&pay.hash).await.unwrap().unwrap();
        assert_eq!(record.height, 2);
        assert_eq!(record.tx, *pay);

        let alice = store.address_transactions("alice").await.unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].tx_hash, coinbase.hash);
        assert_eq!(alice[1].tx_hash, pay.hash);

        let alice_unspent = store.address_unspent("alice").await.unwrap();
        assert_eq!(alice_unspent.len(), 1);
        assert_eq!(alice_unspent[0].coins, 40);
    }

    #[tokio::test]
    async fn reapply_is_idempotent() {
        let (store, chain) = store_with_chain().await;
        store.apply_block(&chain[0]).await.unwrap();
        store.apply_block(&chain[1]).await.unwrap();
        store.apply_block(&chain[1]).await.unwrap();

        assert_eq!(store.tx_count().await.unwrap(), 2);
        assert_eq!(store.output_count().await.unwrap(), 3);
        assert_eq!(store.address_transactions("bob").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn double_spend_rolls_back_block() {
        let (store, chain) = store_with_chain().await;
        store.apply_block(&chain[0]).await.unwrap();
        store.apply_block(&chain[1]).await.unwrap();

        let coinbase = &chain[0].transactions[0];
        let fresh = Transaction::new(vec![], vec![TxOutput::new("dave", 1, 0)]);
        let thief = Transaction::new(vec![coinbase.outpoint(0)], vec![TxOutput::new("mallory", 100, 0)]);
        let b3 = Block::new(&chain[1].header, 1_700_000_020, vec![fresh.clone(), thief]);

        let err = store.apply_block(&b3).await.unwrap_err();
        assert!(matches!(err, StoreError::DoubleSpend { .. }));
        assert!(store.transaction(&fresh.hash).await.unwrap().is_none());
        assert!(store.uxout(&fresh.outpoint(0)).await.unwrap().is_none());
        assert_eq!(store.tx_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn missing_output_is_rejected() {
        let (store, chain) = store_with_chain().await;
        let err = store.apply_block(&chain[1]).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingOutput { .. }));
        assert_eq!(store.tx_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn parsed_height_upsert_and_reset() {
        let (store, chain) = store_with_chain().await;
        assert_eq!(store.parsed_height().await.unwrap(), 0);

        store.apply_block(&chain[0]).await.unwrap();
        store.set_parsed_height(1).await.unwrap();
        store.set_parsed_height(1).await.unwrap();
        assert_eq!(store.parsed_height().await.unwrap(), 1);

        store.reset_index().await.unwrap();
        assert_eq!(store.parsed_height().await.unwrap(), 0);
        assert_eq!(store.tx_count().await.unwrap(), 0);
        // chain survives an index reset
        assert_eq!(store.head_height().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn parser_indexes_stored_chain() {
        let (store, chain) = store_with_chain().await;
        let store = Arc::new(store);

        let (parser, handle) = ParserBuilder::new().build(store.clone(), store.clone());
        let task = tokio::spawn(parser.run(CancellationToken::new()));

        let status = handle.wait_for_state(ParserState::Running).await;
        assert_eq!(status.parsed_height, 2);

        let b3 = Block::new(&chain[1].header, 1_700_000_020, vec![]);
        store.append_block(&b3).await.unwrap();
        handle.on_block_appended(b3).await;
        handle.wait_for_height(3).await;

        handle.stop().await.unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(store.parsed_height().await.unwrap(), 3);
        assert_eq!(store.address_unspent("bob").await.unwrap().len(), 1);
    }
}
