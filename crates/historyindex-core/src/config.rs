//! Parser configuration and runtime state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Capacity of the pending-block queue when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// What the parser does to the rest of the process after a fatal error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalPolicy {
    /// Cancel the shared shutdown token so the owning process exits and can be
    /// restarted to resume from the persisted height.
    #[default]
    ShutdownProcess,
    /// Stop the parser only. The failure is visible through
    /// [`ParserStatus::last_error`] and read endpoints keep serving data as of
    /// the last parsed height.
    Degrade,
}

/// Configuration for a parser instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Capacity of the pending-block queue. Producers block when it is full.
    pub queue_capacity: usize,
    /// Reaction to a fatal catch-up error.
    pub on_fatal: FatalPolicy,
    /// Optional deadline for `stop()`; `None` waits indefinitely.
    pub stop_timeout_ms: Option<u64>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            on_fatal: FatalPolicy::default(),
            stop_timeout_ms: None,
        }
    }
}

impl ParserConfig {
    pub fn stop_timeout(&self) -> Option<Duration> {
        self.stop_timeout_ms.map(Duration::from_millis)
    }
}

/// Lifecycle of the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserState {
    /// Created, `run` not yet called or initial catch-up in progress.
    Starting,
    /// Caught up; following newly appended blocks.
    Running,
    /// Stop request received.
    Stopping,
    /// Terminated, either on request or after a fatal error.
    Stopped,
}

impl std::fmt::Display for ParserState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot published by the parser after every state change or catch-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserStatus {
    pub state: ParserState,
    /// Last parsed height observed by the parser.
    pub parsed_height: u64,
    /// Message of the fatal error that stopped the parser, if any.
    pub last_error: Option<String>,
}

impl Default for ParserStatus {
    fn default() -> Self {
        Self {
            state: ParserState::Starting,
            parsed_height: 0,
            last_error: None,
        }
    }
}

impl ParserStatus {
    /// `true` once the parser stopped because of a fatal error.
    pub fn is_degraded(&self) -> bool {
        self.state == ParserState::Stopped && self.last_error.is_some()
    }
}
