// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Application configuration
//!
//! Configuration is loaded from a YAML file with one section per concern.
//! Every section has defaults so a missing file yields a runnable local
//! setup; command-line arguments override the file.

mod broker;
mod database;
mod operator;
mod session;

pub use broker::BrokerConfig;
pub use database::DatabaseConfig;
pub use operator::OperatorConfig;
pub use session::SessionConfig;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the reactor console.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Message broker connection settings.
    pub broker: BrokerConfig,
    /// Durable store settings.
    pub database: DatabaseConfig,
    /// Live session tuning (window sizes, dose defaults).
    pub session: SessionConfig,
    /// Operator identity used for audit fields.
    pub operator: OperatorConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration file {}", path.display()))?;
        let config: Config = serde_yml::from_str(&content)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Apply command line overrides.
    pub fn apply_args(
        &mut self,
        broker_url: Option<String>,
        database_path: Option<PathBuf>,
        operator_name: Option<String>,
    ) {
        if let Some(url) = broker_url {
            self.broker.url = url;
        }
        if let Some(path) = database_path {
            self.database.path = path;
        }
        if let Some(name) = operator_name {
            self.operator.display_name = name;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_runnable() {
        let config = Config::default();
        assert_eq!(config.broker.url, "redis://127.0.0.1:6379");
        assert_eq!(config.session.telemetry_window, 50);
        assert_eq!(config.session.event_log_window, 100);
    }

    #[test]
    fn test_partial_yaml_keeps_section_defaults() {
        let config: Config = serde_yml::from_str(
            "broker:\n  url: redis://broker.lab:6379\nsession:\n  telemetry_window: 25\n",
        )
        .unwrap();
        assert_eq!(config.broker.url, "redis://broker.lab:6379");
        assert_eq!(config.session.telemetry_window, 25);
        // Untouched sections fall back to defaults.
        assert_eq!(config.session.default_dose_steps, 50);
        assert_eq!(config.database.path.to_string_lossy(), "reactor.db");
    }

    #[test]
    fn test_args_override_file_values() {
        let mut config = Config::default();
        config.apply_args(
            Some("redis://override:6379".to_string()),
            Some(PathBuf::from("/tmp/test.db")),
            Some("Dr. Smith".to_string()),
        );
        assert_eq!(config.broker.url, "redis://override:6379");
        assert_eq!(config.database.path, PathBuf::from("/tmp/test.db"));
        assert_eq!(config.operator.display_name, "Dr. Smith");
    }
}
