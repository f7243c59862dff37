/*!
common/src/lib.rs

Shared configuration types and DB helper functions for newsmill.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default file with an override file
- A helper to initialize an SQLite database pool
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/newsmill.db")
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/newsmill.db".to_string(),
        }
    }
}

/// Generator (poller + pipeline) tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Fixed delay between two fetches of the same feed
    pub poll_interval_seconds: u64,
    /// Number of pipeline workers draining the merged queue
    pub workers: usize,
    /// Draft candidates produced per accepted article
    pub candidates: usize,
    /// Score/rewrite rounds per candidate
    pub scoring_rounds: usize,
    /// When true, every start after the first one suppresses the first batch of each feed
    pub skip_first_batch_on_restart: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            workers: 1,
            candidates: 3,
            scoring_rounds: 3,
            skip_first_batch_on_restart: true,
        }
    }
}

/// Article quality thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Minimum article body length, in characters
    pub min_text_length: usize,
    /// Maximum images per body character
    pub max_image_to_text_ratio: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_text_length: 400,
            max_image_to_text_ratio: 1.0 / 400.0,
        }
    }
}

/// Replay buffer sizes of the live event stream, per severity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub info_capacity: usize,
    pub warn_capacity: usize,
    pub error_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            info_capacity: 100,
            warn_capacity: 50,
            error_capacity: 50,
        }
    }
}

/// Politeness / fetching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolitenessConfig {
    pub user_agent: Option<String>,
    pub fetch_timeout_seconds: Option<u64>,
}

/// Remote LLM config (used if `llm.adapter = "remote"`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

/// LLM top-level config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "remote", "none"
    pub remote: Option<RemoteLlmConfig>,
    /// Per-call timeout handed to the provider
    pub call_timeout_seconds: Option<u64>,
    /// Cap on retries of unparseable structured output; unbounded when absent
    pub max_parse_retries: Option<u32>,
}

/// One feed source: a set of feed URLs sharing one article parser
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: Option<String>,
    pub urls: Vec<String>,
    /// Article parser capability, e.g. "readability"
    #[serde(default = "default_parser")]
    pub parser: String,
}

fn default_parser() -> String {
    "readability".to_string()
}

/// HTTP control surface binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub events: EventsConfig,
    pub politeness: Option<PolitenessConfig>,
    pub llm: Option<LlmConfig>,
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read default config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read override config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .context("Failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects generator settings that would store materials without examples
    /// or run no pipeline at all.
    pub fn validate(&self) -> Result<()> {
        let generator = &self.generator;
        if generator.candidates == 0 {
            anyhow::bail!("[generator] candidates must be at least 1");
        }
        if generator.scoring_rounds == 0 {
            anyhow::bail!("[generator] scoring_rounds must be at least 1");
        }
        if generator.workers == 0 {
            anyhow::bail!("[generator] workers must be at least 1");
        }
        Ok(())
    }

    /// Feed fetch timeout, defaulting to 10 seconds
    pub fn fetch_timeout_seconds(&self) -> u64 {
        self.politeness
            .as_ref()
            .and_then(|p| p.fetch_timeout_seconds)
            .unwrap_or(10)
    }

    pub fn user_agent(&self) -> String {
        self.politeness
            .as_ref()
            .and_then(|p| p.user_agent.clone())
            .unwrap_or_else(|| "newsmill/0.1.0".to_string())
    }
}

// Arrays are replaced wholesale; tables merge key by key.
fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// This function will create the parent directory if necessary and return a configured
/// `SqlitePool`. Defaults are conservative for resource-constrained platforms:
/// - max_connections: 5
/// - WAL journal
///
/// Example:
///   let pool = init_db_pool("data/newsmill.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}
