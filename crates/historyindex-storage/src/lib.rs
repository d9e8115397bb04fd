//! historyindex-storage: backends for the derived history index.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx`: chain and history index in one file
//!
//! Both apply a block as a single atomic unit and are safe to re-apply a
//! block that was already applied.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryHistoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
