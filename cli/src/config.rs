//! Node configuration, loaded from YAML.
//!
//! ```yaml
//! db_path: ./historyindex.db
//! http:
//!   enabled: true
//!   listen: 127.0.0.1:6420
//! parser:
//!   queue_capacity: 10
//!   on_fatal: shutdown_process
//!   stop_timeout_ms: 30000
//! log:
//!   level: info
//!   components:
//!     sqlx: warn
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use historyindex_core::ParserConfig;

use crate::logging::LogConfig;

pub const DEFAULT_DB_PATH: &str = "./historyindex.db";
pub const DEFAULT_LISTEN: &str = "127.0.0.1:6420";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub db_path: PathBuf,
    pub http: HttpConfig,
    pub parser: ParserConfig,
    pub log: LogConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            http: HttpConfig::default(),
            parser: ParserConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from `path`, or fall back to defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                Self::from_yaml(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// `db_path` as a string for the SQLite backend.
    pub fn db_location(&self) -> Result<&str> {
        self.db_path
            .to_str()
            .with_context(|| format!("database path {:?} is not valid UTF-8", self.db_path))
    }
}
