use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::matching::types::WeightingPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LensmatchConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub pipeline: PipelineConfig,
    pub matching: MatchingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

/// Which models turn content into vectors.
///
/// `provider` drives the text model (choices and profile descriptions).
/// `image_provider` drives the image model; `"none"` leaves image jobs failing
/// with an explanatory message until one is configured.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    pub endpoint: String,
    pub api_key_env: String,
    pub image_provider: String,
    pub image_model: String,
    pub image_endpoint: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// Jobs claimed from the queue per round.
    pub batch_size: usize,
    /// Inputs sent to the model in a single call.
    pub request_batch_size: usize,
    /// Model calls allowed in flight at once.
    pub max_concurrency: usize,
    /// Age after which a `processing` job is considered abandoned.
    pub stuck_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MatchingConfig {
    pub missing_dimension_policy: WeightingPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8787,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_lensmatch_dir()
            .join("lensmatch.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_lensmatch_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
            endpoint: "https://api.openai.com/v1/embeddings".into(),
            api_key_env: "LENSMATCH_EMBEDDING_API_KEY".into(),
            image_provider: "none".into(),
            image_model: "clip-vit-b-32".into(),
            image_endpoint: String::new(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            request_batch_size: 16,
            max_concurrency: 4,
            stuck_timeout_secs: 600,
        }
    }
}

/// Returns `~/.lensmatch/`
pub fn default_lensmatch_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".lensmatch")
}

/// Returns the default config file path: `~/.lensmatch/config.toml`
pub fn default_config_path() -> PathBuf {
    default_lensmatch_dir().join("config.toml")
}

impl LensmatchConfig {
    /// Load config from the default TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            LensmatchConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("LENSMATCH_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("LENSMATCH_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("LENSMATCH_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("LENSMATCH_PORT") {
            match val.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %val, "ignoring invalid LENSMATCH_PORT"),
            }
        }
        if let Ok(val) = std::env::var("LENSMATCH_EMBEDDING_PROVIDER") {
            self.embedding.provider = val;
        }
    }

    /// Reject pipeline settings that would stall or never make progress.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.pipeline.batch_size > 0, "pipeline.batch_size must be > 0");
        anyhow::ensure!(
            self.pipeline.request_batch_size > 0,
            "pipeline.request_batch_size must be > 0"
        );
        anyhow::ensure!(
            self.pipeline.max_concurrency > 0,
            "pipeline.max_concurrency must be > 0"
        );
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = LensmatchConfig::default();
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.embedding.image_provider, "none");
        assert_eq!(config.pipeline.batch_size, 50);
        assert_eq!(
            config.matching.missing_dimension_policy,
            WeightingPolicy::Skip
        );
        assert!(config.storage.db_path.ends_with("lensmatch.db"));
        config.validate().unwrap();
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"
port = 9000

[storage]
db_path = "/tmp/test.db"

[pipeline]
max_concurrency = 2

[matching]
missing_dimension_policy = "renormalize"
"#;
        let config: LensmatchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.pipeline.max_concurrency, 2);
        assert_eq!(
            config.matching.missing_dimension_policy,
            WeightingPolicy::Renormalize
        );
        // defaults still apply for unset fields
        assert_eq!(config.pipeline.batch_size, 50);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = LensmatchConfig::default();
        config.pipeline.max_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/var/db.sqlite"), PathBuf::from("/var/db.sqlite"));
    }
}
