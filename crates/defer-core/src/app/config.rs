//! Config - listener と demo の設定
//!
//! 優先順位（後勝ち）:
//! 1. 構造体の default（元の定数: timeout 30s, reconnect 15s）
//! 2. 設定ファイル（既定は `defer.toml`、無くてもよい）
//! 3. `DEFER__*` 環境変数（ネストは `__` 区切り、例: `DEFER__LISTENER__MAX_IN_FLIGHT=16`）

use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;

const ENV_PREFIX: &str = "DEFER";
const DEFAULT_FILE: &str = "defer";

/// Dispatch loop tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Deadline handed to each handler.
    pub handler_timeout_ms: u64,
    /// Fixed delay before reconnecting after the loop exits.
    pub reconnect_delay_ms: u64,
    /// Upper bound on concurrently running handlers (streaming only).
    pub max_in_flight: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 30_000,
            reconnect_delay_ms: 15_000,
            max_in_flight: 64,
        }
    }
}

impl ListenerConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// In-process streaming queue server.
    #[default]
    Memory,
    /// In-process pub/sub channel.
    MemoryPubsub,
    /// NATS core pub/sub.
    Nats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferConfig {
    pub project: String,
    pub queue: String,
    pub transport: TransportKind,
    pub nats_url: Option<String>,
    pub log_format: LogFormat,
    pub listener: ListenerConfig,
}

impl Default for DeferConfig {
    fn default() -> Self {
        Self {
            project: "default".to_string(),
            queue: "default".to_string(),
            transport: TransportKind::default(),
            nats_url: None,
            log_format: LogFormat::default(),
            listener: ListenerConfig::default(),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

impl DeferConfig {
    /// Load from `path` (required when given, otherwise optional `defer.toml`)
    /// and the environment.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::with_name(path),
            None => File::with_name(DEFAULT_FILE).required(false),
        };
        Self::from_builder(Config::builder().add_source(file).add_source(environment()))
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.is_empty() {
            return Err(ConfigError::Invalid("project must not be empty".to_string()));
        }
        if self.queue.is_empty() {
            return Err(ConfigError::Invalid("queue must not be empty".to_string()));
        }
        if self.listener.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "listener.max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.transport == TransportKind::Nats && self.nats_url.is_none() {
            return Err(ConfigError::Invalid(
                "nats_url is required for the nats transport".to_string(),
            ));
        }
        Ok(())
    }
}
