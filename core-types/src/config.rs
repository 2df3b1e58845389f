use std::time::Duration;

use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

use crate::types::Region;

/// Top-level configuration, loaded from `config.toml` plus environment
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiConfig {
    /// API credentials handed out round-robin across fan-out calls.
    #[serde(default)]
    pub application_ids: Vec<String>,
    /// Shards queried by default. The RU shard exists but is not active.
    #[serde(default = "default_regions")]
    pub regions: Vec<Region>,
}

fn default_regions() -> Vec<Region> {
    vec![Region::Asia, Region::Eu, Region::Na]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> usize {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Upper bound on one whole fan-out call, all shards included.
    #[serde(default = "default_total_timeout_secs")]
    pub total_timeout_secs: u64,
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,
}

fn default_total_timeout_secs() -> u64 {
    20
}

fn default_search_limit() -> u32 {
    3
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            total_timeout_secs: default_total_timeout_secs(),
            search_limit: default_search_limit(),
        }
    }
}

impl FanoutConfig {
    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Number of prompts an interactive session may spend before abandoning.
    #[serde(default = "default_prompt_budget")]
    pub prompt_budget: u32,
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
}

fn default_prompt_budget() -> u32 {
    3
}

fn default_turn_timeout_secs() -> u64 {
    30
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            prompt_budget: default_prompt_budget(),
            turn_timeout_secs: default_turn_timeout_secs(),
        }
    }
}

impl ResolverConfig {
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_clan_refresh_interval_secs")]
    pub clan_refresh_interval_secs: u64,
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
}

fn default_clan_refresh_interval_secs() -> u64 {
    86_400
}

fn default_snapshot_interval_secs() -> u64 {
    86_400
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            clan_refresh_interval_secs: default_clan_refresh_interval_secs(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
        }
    }
}

impl JobsConfig {
    pub fn clan_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.clan_refresh_interval_secs)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("config.toml").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.application_ids.is_empty() {
            return Err(ConfigError::Message(
                "api.application_ids must list at least one credential".to_string(),
            ));
        }
        if self.api.regions.is_empty() {
            return Err(ConfigError::Message(
                "api.regions must list at least one shard".to_string(),
            ));
        }
        Ok(())
    }
}
