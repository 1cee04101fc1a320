use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub endpoint: String,
    pub name: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_vector_dims")]
    pub vector_dims: usize,
    /// Name of the environment variable holding the admin key.
    #[serde(default = "default_index_key_env")]
    pub api_key_env: String,
}

fn default_api_version() -> String {
    "2024-07-01".to_string()
}
fn default_page_size() -> usize {
    1000
}
fn default_vector_dims() -> usize {
    1536
}
fn default_index_key_env() -> String {
    "ISYNC_INDEX_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    /// Send the key as `api-key` instead of `Authorization: Bearer`.
    #[serde(default)]
    pub api_key_header: bool,
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_path")]
    pub path: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: default_corpus_path(),
        }
    }
}

fn default_corpus_path() -> PathBuf {
    PathBuf::from("./data/chunks.jsonl")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            batch_size: default_batch_size(),
            delete_batch_size: default_delete_batch_size(),
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}
fn default_batch_size() -> usize {
    100
}
fn default_delete_batch_size() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// Per-attempt timeout; 0 disables it.
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl RetryConfig {
    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_secs > 0).then(|| Duration::from_secs(self.attempt_timeout_secs))
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8000
}
fn default_jitter_ratio() -> f64 {
    0.2
}
fn default_attempt_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThrottleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_initial_pause_ms")]
    pub initial_pause_ms: u64,
    #[serde(default = "default_max_pause_ms")]
    pub max_pause_ms: u64,
    #[serde(default = "default_decay_after")]
    pub decay_after: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_pause_ms: default_initial_pause_ms(),
            max_pause_ms: default_max_pause_ms(),
            decay_after: default_decay_after(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_initial_pause_ms() -> u64 {
    250
}
fn default_max_pause_ms() -> u64 {
    60_000
}
fn default_decay_after() -> u32 {
    8
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

/// Apply `ISYNC_*` overrides for the retry and throttle knobs.
///
/// Values that do not parse are ignored with a warning.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    override_with(&lookup, "ISYNC_RETRY_MAX_ATTEMPTS", &mut config.retry.max_attempts);
    override_with(&lookup, "ISYNC_RETRY_BASE_DELAY_MS", &mut config.retry.base_delay_ms);
    override_with(&lookup, "ISYNC_RETRY_MAX_DELAY_MS", &mut config.retry.max_delay_ms);
    override_with(&lookup, "ISYNC_RETRY_JITTER_RATIO", &mut config.retry.jitter_ratio);
    override_flag(&lookup, "ISYNC_THROTTLE_ENABLED", &mut config.throttle.enabled);
    override_with(&lookup, "ISYNC_THROTTLE_MAX_PAUSE_MS", &mut config.throttle.max_pause_ms);
}

fn override_with<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}

/// Like [`override_with`], but also accepts `1`/`0`, `yes`/`no` and `on`/`off`.
fn override_flag<F>(lookup: &F, key: &str, slot: &mut bool)
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match parse_flag(&raw) {
        Some(value) => *slot = value,
        None => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate index
    if config.index.endpoint.trim().is_empty() {
        anyhow::bail!("index.endpoint must not be empty");
    }
    if config.index.name.trim().is_empty() {
        anyhow::bail!("index.name must not be empty");
    }
    if config.index.page_size == 0 {
        anyhow::bail!("index.page_size must be >= 1");
    }
    if config.index.vector_dims == 0 {
        anyhow::bail!("index.vector_dims must be > 0");
    }

    // Validate embedding
    if config.embedding.model.trim().is_empty() {
        anyhow::bail!("embedding.model must not be empty");
    }

    // Validate sync
    if config.sync.max_concurrency == 0 {
        anyhow::bail!("sync.max_concurrency must be >= 1");
    }
    if config.sync.batch_size == 0 {
        anyhow::bail!("sync.batch_size must be >= 1");
    }
    if config.sync.delete_batch_size == 0 {
        anyhow::bail!("sync.delete_batch_size must be >= 1");
    }

    // Validate retry
    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        anyhow::bail!(
            "retry.base_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
            config.retry.base_delay_ms,
            config.retry.max_delay_ms
        );
    }
    if !(0.0..=1.0).contains(&config.retry.jitter_ratio) {
        anyhow::bail!("retry.jitter_ratio must be in [0.0, 1.0]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
[index]
endpoint = "https://search.example.net"
name = "docs"

[embedding]
model = "text-embedding-3-small"
"#;

    fn minimal() -> Config {
        toml::from_str(MINIMAL).unwrap()
    }

    #[test]
    fn test_defaults_fill_optional_sections() {
        let config = minimal();
        assert_eq!(config.index.page_size, 1000);
        assert_eq!(config.index.api_key_env, "ISYNC_INDEX_API_KEY");
        assert_eq!(config.sync.max_concurrency, 4);
        assert_eq!(config.sync.batch_size, 100);
        assert_eq!(config.sync.delete_batch_size, 500);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.attempt_timeout(), Some(Duration::from_secs(60)));
        assert!(config.throttle.enabled);
        assert_eq!(config.throttle.max_pause_ms, 60_000);
        validate(&config).unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let mut config = minimal();
        let env: HashMap<&str, &str> = [
            ("ISYNC_RETRY_MAX_ATTEMPTS", "9"),
            ("ISYNC_RETRY_JITTER_RATIO", "0"),
            ("ISYNC_THROTTLE_ENABLED", "false"),
            ("ISYNC_RETRY_MAX_DELAY_MS", "soon"),
        ]
        .into_iter()
        .collect();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.retry.max_attempts, 9);
        assert_eq!(config.retry.jitter_ratio, 0.0);
        assert!(!config.throttle.enabled);
        // Unparseable value leaves the default in place.
        assert_eq!(config.retry.max_delay_ms, 8000);
    }

    #[test]
    fn test_throttle_flag_accepts_numeric_form() {
        let mut config = minimal();
        apply_env_overrides(&mut config, |k| {
            (k == "ISYNC_THROTTLE_ENABLED").then(|| "0".to_string())
        });
        assert!(!config.throttle.enabled);

        apply_env_overrides(&mut config, |k| {
            (k == "ISYNC_THROTTLE_ENABLED").then(|| " 1 ".to_string())
        });
        assert!(config.throttle.enabled);

        apply_env_overrides(&mut config, |k| {
            (k == "ISYNC_THROTTLE_ENABLED").then(|| "OFF".to_string())
        });
        assert!(!config.throttle.enabled);

        // Anything else keeps the current value.
        apply_env_overrides(&mut config, |k| {
            (k == "ISYNC_THROTTLE_ENABLED").then(|| "2".to_string())
        });
        assert!(!config.throttle.enabled);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = minimal();
        config.sync.max_concurrency = 0;
        assert!(validate(&config).is_err());

        let mut config = minimal();
        config.retry.base_delay_ms = 10_000;
        let err = validate(&config).unwrap_err().to_string();
        assert!(err.contains("must not exceed"));

        let mut config = minimal();
        config.retry.jitter_ratio = 1.5;
        assert!(validate(&config).is_err());

        let mut config = minimal();
        config.index.name = " ".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config: Config = toml::from_str(include_str!("../config/isync.toml")).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.throttle.decay_after, 8);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/isync.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_zero_timeout_disables_it() {
        let config = RetryConfig {
            attempt_timeout_secs: 0,
            ..RetryConfig::default()
        };
        assert_eq!(config.attempt_timeout(), None);
    }
}
