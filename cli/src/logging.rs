//! `tracing-subscriber` setup for the `historyindex` binary.
//!
//! Filter precedence: `RUST_LOG`, then the `log` section of the config with
//! `--verbose` lowering the base level to `debug`. Component overrides from
//! the config file still apply under `--verbose`, so `sqlx: warn` keeps sqlx
//! quiet while the parser logs every step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// Crate name to level, e.g. `historyindex-storage: debug`.
    pub components: BTreeMap<String, String>,
    /// JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            components: BTreeMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directives, e.g. `"info,historyindex_core=debug"`.
    pub fn directives(&self, verbose: bool) -> String {
        let base = if verbose { "debug" } else { self.level.as_str() };
        self.components
            .iter()
            .fold(base.to_string(), |mut acc, (component, level)| {
                acc.push_str(&format!(",{}={level}", component.replace('-', "_")));
                acc
            })
    }

    fn filter(&self, verbose: bool) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.directives(verbose)))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber. Call once, before any command runs.
pub fn init_tracing(config: &LogConfig, verbose: bool) {
    let json = config.json.then(|| fmt::layer().json());
    let text = (!config.json).then(fmt::layer);

    tracing_subscriber::registry()
        .with(config.filter(verbose))
        .with(json)
        .with(text)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_components() -> LogConfig {
        let mut config = LogConfig::default();
        config
            .components
            .insert("historyindex-core".into(), "trace".into());
        config.components.insert("sqlx".into(), "warn".into());
        config
    }

    #[test]
    fn directives_include_component_overrides() {
        assert_eq!(
            with_components().directives(false),
            "info,historyindex_core=trace,sqlx=warn"
        );
    }

    #[test]
    fn verbose_lowers_base_level_only() {
        assert_eq!(
            with_components().directives(true),
            "debug,historyindex_core=trace,sqlx=warn"
        );
        assert_eq!(LogConfig::default().directives(true), "debug");
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: LogConfig = serde_yaml::from_str("json: true").unwrap();
        assert_eq!(config.level, "info");
        assert!(config.json);
        assert!(config.components.is_empty());
    }
}
