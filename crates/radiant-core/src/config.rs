// Configuration loading and parsing (config/radiant.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE: &str = "radiant.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub websocket: WebsocketConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebsocketConfig {
    pub base_url: String,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Exponential backoff policy for dropped channel sockets.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Scheduled retries before the channel gives up and reports an error.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (zero-based):
    /// `min(initial * multiplier^attempt, max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl CacheConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    10
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_stale_after_secs() -> u64 {
    300
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/radiant.toml` relative to `base_dir`.
///
/// Does not create the file; see `load_or_init`.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let config: Config = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    validate(&config)?;

    Ok(config)
}

/// Create `config/radiant.toml` from `defaults/radiant.toml` when it does not
/// exist yet. An existing file is never touched. Returns the created path.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CONFIG_FILE);
    if target.exists() {
        return Ok(None);
    }
    let source = base_dir.join("defaults").join(CONFIG_FILE);
    let copy_error = |message: String| ConfigError::DefaultsCopyError { message };

    let mut defaults = std::fs::File::open(&source).map_err(|_| {
        copy_error(format!(
            "{} is missing and there is no {} to create it from; pass --config-dir",
            target.display(),
            source.display()
        ))
    })?;
    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| copy_error(format!("cannot create {}: {e}", dir.display())))?;
    }
    let mut dest = match std::fs::OpenOptions::new().write(true).create_new(true).open(&target) {
        Ok(dest) => dest,
        // Another process created it first.
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
        Err(e) => return Err(copy_error(format!("cannot create {}: {e}", target.display()))),
    };
    std::io::copy(&mut defaults, &mut dest)
        .map_err(|e| copy_error(format!("cannot write {}: {e}", target.display())))?;
    Ok(Some(target))
}

/// `ensure_config_file` followed by `load_config_from`.
pub fn load_or_init(base_dir: &Path) -> Result<(Config, Option<PathBuf>), ConfigError> {
    let created = ensure_config_file(base_dir)?;
    Ok((load_config_from(base_dir)?, created))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let api_url = config.api.base_url.as_str();
    if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
        return Err(invalid(
            "api.base_url",
            format!("must start with http:// or https://, got {api_url:?}"),
        ));
    }
    if config.api.timeout_secs == 0 {
        return Err(invalid("api.timeout_secs", "must be greater than 0"));
    }

    let ws_url = config.websocket.base_url.as_str();
    if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
        return Err(invalid(
            "websocket.base_url",
            format!("must start with ws:// or wss://, got {ws_url:?}"),
        ));
    }

    let reconnect = &config.websocket.reconnect;
    if reconnect.initial_delay_ms == 0 {
        return Err(invalid(
            "websocket.reconnect.initial_delay_ms",
            "must be greater than 0",
        ));
    }
    if reconnect.max_delay_ms < reconnect.initial_delay_ms {
        return Err(invalid(
            "websocket.reconnect.max_delay_ms",
            format!(
                "must be >= initial_delay_ms ({}), got {}",
                reconnect.initial_delay_ms, reconnect.max_delay_ms
            ),
        ));
    }
    let multiplier = reconnect.backoff_multiplier;
    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(invalid(
            "websocket.reconnect.backoff_multiplier",
            format!("must be >= 1.0, got {multiplier}"),
        ));
    }

    if config.cache.stale_after_secs == 0 {
        return Err(invalid("cache.stale_after_secs", "must be greater than 0"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Workspace root holding `defaults/`.
    fn project_root() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
    }

    /// Fresh temp base dir with `config/radiant.toml` set to `body`.
    fn write_config(name: &str, body: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config").join(CONFIG_FILE), body).unwrap();
        tmp
    }

    fn default_text() -> String {
        fs::read_to_string(project_root().join("defaults").join(CONFIG_FILE)).unwrap()
    }

    #[test]
    fn load_valid_config_from_defaults() {
        let tmp = write_config("radiant_config_defaults", &default_text());

        let config = load_config_from(&tmp).expect("defaults should load");
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.websocket.base_url, "ws://localhost:8000");
        assert_eq!(config.websocket.reconnect, ReconnectConfig::default());
        assert_eq!(config.cache.stale_after(), Duration::from_secs(300));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn reconnect_and_cache_sections_are_optional() {
        let tmp = write_config(
            "radiant_config_minimal",
            "[api]\nbase_url = \"https://api.example.test\"\n\n[websocket]\nbase_url = \"wss://api.example.test\"\n",
        );

        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.api.timeout(), Duration::from_secs(15));
        assert_eq!(config.websocket.reconnect.max_attempts, 10);
        assert_eq!(config.cache.stale_after_secs, 300);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = ReconnectConfig::default();
        let delays: Vec<u64> = (0..8)
            .map(|n| policy.delay_for_attempt(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]);
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(30000));
    }

    #[test]
    fn rejects_non_websocket_url() {
        let text = default_text().replace("ws://localhost:8000", "http://localhost:8000");
        let tmp = write_config("radiant_config_bad_ws", &text);

        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "websocket.base_url"),
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let text = default_text().replace("backoff_multiplier = 2.0", "backoff_multiplier = 0.5");
        let tmp = write_config("radiant_config_bad_multiplier", &text);

        match load_config_from(&tmp).unwrap_err() {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "websocket.reconnect.backoff_multiplier")
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_timeout() {
        let text = default_text().replace("timeout_secs = 15", "timeout_secs = 0");
        let tmp = write_config("radiant_config_zero_timeout", &text);

        assert!(matches!(
            load_config_from(&tmp),
            Err(ConfigError::ValidationError { ref field, .. }) if field == "api.timeout_secs"
        ));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found_for_missing_config() {
        let tmp = std::env::temp_dir().join("radiant_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        assert!(matches!(
            load_config_from(&tmp),
            Err(ConfigError::FileNotFound { .. })
        ));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = write_config("radiant_config_invalid", "[api\nbase_url = ");

        assert!(matches!(
            load_config_from(&tmp),
            Err(ConfigError::ParseError { .. })
        ));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_config_is_created_from_defaults_once() {
        let tmp = std::env::temp_dir().join("radiant_config_ensure");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::copy(
            project_root().join("defaults").join(CONFIG_FILE),
            tmp.join("defaults").join(CONFIG_FILE),
        )
        .unwrap();

        let (config, created) = load_or_init(&tmp).unwrap();
        assert_eq!(created, Some(tmp.join("config").join(CONFIG_FILE)));
        assert_eq!(config.websocket.reconnect.max_attempts, 10);

        let custom = default_text().replace("timeout_secs = 15", "timeout_secs = 3");
        fs::write(tmp.join("config").join(CONFIG_FILE), &custom).unwrap();
        let (config, created) = load_or_init(&tmp).unwrap();
        assert_eq!(created, None);
        assert_eq!(config.api.timeout(), Duration::from_secs(3));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn existing_config_needs_no_defaults() {
        let tmp = write_config("radiant_config_no_defaults", &default_text());
        assert_eq!(ensure_config_file(&tmp).unwrap(), None);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_config_and_defaults_is_an_error() {
        let tmp = std::env::temp_dir().join("radiant_config_both_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        match ensure_config_file(&tmp).unwrap_err() {
            ConfigError::DefaultsCopyError { message } => assert!(message.contains("--config-dir")),
            other => panic!("expected DefaultsCopyError, got: {other}"),
        }
        assert!(!tmp.join("config").exists());

        let _ = fs::remove_dir_all(&tmp);
    }
}
