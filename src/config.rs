// Configuration loading and parsing (config/laddu.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::session::validate::{BidLimits, MAX_BID_AMOUNT, MIN_BID_AMOUNT, PRESET_AMOUNTS};

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

/// Top-level deserialization target for laddu.toml.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub bidding: BiddingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the hosted backend, e.g. `https://myproject.supabase.co`.
    pub url: String,
    /// Publishable (anon) API key sent with every RPC and realtime request.
    pub anon_key: String,
    /// Bound on each remote call; a pending bid past this is treated as
    /// failed and rolled back.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    /// Session code to open on startup. May instead be passed as the first
    /// CLI argument, which takes precedence.
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BiddingConfig {
    #[serde(default = "default_min_bid")]
    pub min_bid: f64,
    #[serde(default = "default_max_bid")]
    pub max_bid: f64,
    /// Quick-bid amounts shown as one-key buttons.
    #[serde(default = "default_presets")]
    pub presets: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_rpc_timeout_secs() -> u64 {
    15
}

fn default_min_bid() -> f64 {
    MIN_BID_AMOUNT
}

fn default_max_bid() -> f64 {
    MAX_BID_AMOUNT
}

fn default_presets() -> Vec<f64> {
    PRESET_AMOUNTS.to_vec()
}

fn default_db_path() -> String {
    "laddu.db".to_string()
}

impl Default for BiddingConfig {
    fn default() -> Self {
        BiddingConfig {
            min_bid: default_min_bid(),
            max_bid: default_max_bid(),
            presets: default_presets(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: default_db_path(),
        }
    }
}

impl Config {
    pub fn bid_limits(&self) -> BidLimits {
        BidLimits {
            min: self.bidding.min_bid,
            max: self.bidding.max_bid,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/laddu.toml` relative to the
/// given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy
/// defaults. Prefer `load_config()` which handles default initialization
/// automatically.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("laddu.toml");
    let text = read_file(&path)?;
    let config: Config = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };

        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // File already exists in config/, skip it
            }
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Convenience wrapper: loads config relative to the current working
/// directory. Ensures default config files are copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let url = config.backend.url.trim();
    if url.is_empty() {
        return Err(ConfigError::ValidationError {
            field: "backend.url".into(),
            message: "must be set".into(),
        });
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::ValidationError {
            field: "backend.url".into(),
            message: format!("must start with http:// or https://, got {url}"),
        });
    }

    if config.backend.anon_key.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "backend.anon_key".into(),
            message: "must be set".into(),
        });
    }

    if config.backend.rpc_timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "backend.rpc_timeout_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    let bidding = &config.bidding;
    if bidding.min_bid <= 0.0 {
        return Err(ConfigError::ValidationError {
            field: "bidding.min_bid".into(),
            message: format!("must be > 0, got {}", bidding.min_bid),
        });
    }
    if bidding.max_bid < bidding.min_bid {
        return Err(ConfigError::ValidationError {
            field: "bidding.max_bid".into(),
            message: format!(
                "must be >= min_bid ({}), got {}",
                bidding.min_bid, bidding.max_bid
            ),
        });
    }
    for preset in &bidding.presets {
        if *preset < bidding.min_bid || *preset > bidding.max_bid {
            return Err(ConfigError::ValidationError {
                field: "bidding.presets".into(),
                message: format!(
                    "preset {} outside [{}, {}]",
                    preset, bidding.min_bid, bidding.max_bid
                ),
            });
        }
    }

    if config.database.path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must be set".into(),
        });
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

    const VALID_TOML: &str = r#"
[backend]
url = "https://example.supabase.co"
anon_key = "anon-test-key"

[session]
code = "ABC123"

[bidding]
min_bid = 5.0
max_bid = 10000.0
presets = [5.0, 10.0, 15.0, 20.0, 50.0]

[database]
path = "laddu.db"
"#;

    fn write_config(dir_name: &str, toml_text: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(dir_name);
        let config_dir = tmp.join("config");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("laddu.toml"), toml_text).unwrap();
        tmp
    }

    #[test]
    fn load_valid_config() {
        let tmp = write_config("laddu_config_valid", VALID_TOML);
        let config = load_config_from(&tmp).expect("should load valid config");

        assert_eq!(config.backend.url, "https://example.supabase.co");
        assert_eq!(config.backend.anon_key, "anon-test-key");
        assert_eq!(config.backend.rpc_timeout_secs, 15); // default
        assert_eq!(config.session.code.as_deref(), Some("ABC123"));
        assert_eq!(config.bidding.min_bid, 5.0);
        assert_eq!(config.bidding.max_bid, 10_000.0);
        assert_eq!(config.bidding.presets, vec![5.0, 10.0, 15.0, 20.0, 50.0]);
        assert_eq!(config.database.path, "laddu.db");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let toml_text = r#"
[backend]
url = "https://example.supabase.co"
anon_key = "k"
"#;
        let tmp = write_config("laddu_config_minimal", toml_text);
        let config = load_config_from(&tmp).expect("should load minimal config");

        assert!(config.session.code.is_none());
        assert_eq!(config.bidding.min_bid, MIN_BID_AMOUNT);
        assert_eq!(config.bidding.max_bid, MAX_BID_AMOUNT);
        assert_eq!(config.bidding.presets, PRESET_AMOUNTS.to_vec());
        assert_eq!(config.database.path, "laddu.db");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_missing_url() {
        let toml_text = r#"
[backend]
url = ""
anon_key = "k"
"#;
        let tmp = write_config("laddu_config_no_url", toml_text);
        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "backend.url"),
            other => panic!("expected ValidationError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_non_http_url() {
        let toml_text = r#"
[backend]
url = "ftp://example.com"
anon_key = "k"
"#;
        let tmp = write_config("laddu_config_bad_scheme", toml_text);
        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "backend.url"),
            other => panic!("expected ValidationError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_missing_anon_key() {
        let toml_text = r#"
[backend]
url = "https://example.supabase.co"
anon_key = " "
"#;
        let tmp = write_config("laddu_config_no_key", toml_text);
        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "backend.anon_key"),
            other => panic!("expected ValidationError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_max_below_min() {
        let toml_text = r#"
[backend]
url = "https://example.supabase.co"
anon_key = "k"

[bidding]
min_bid = 50.0
max_bid = 10.0
presets = []
"#;
        let tmp = write_config("laddu_config_max_lt_min", toml_text);
        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "bidding.max_bid"),
            other => panic!("expected ValidationError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_preset_out_of_bounds() {
        let toml_text = r#"
[backend]
url = "https://example.supabase.co"
anon_key = "k"

[bidding]
min_bid = 5.0
max_bid = 100.0
presets = [5.0, 500.0]
"#;
        let tmp = write_config("laddu_config_bad_preset", toml_text);
        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "bidding.presets"),
            other => panic!("expected ValidationError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_timeout() {
        let toml_text = r#"
[backend]
url = "https://example.supabase.co"
anon_key = "k"
rpc_timeout_secs = 0
"#;
        let tmp = write_config("laddu_config_zero_timeout", toml_text);
        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "backend.rpc_timeout_secs")
            }
            other => panic!("expected ValidationError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found() {
        let tmp = std::env::temp_dir().join("laddu_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::FileNotFound { path } => assert!(path.ends_with("laddu.toml")),
            other => panic!("expected FileNotFound, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = write_config("laddu_config_invalid", "this is not valid [[[ toml");
        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::ParseError { path, .. } => assert!(path.ends_with("laddu.toml")),
            other => panic!("expected ParseError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_copies_missing_files() {
        let tmp = std::env::temp_dir().join("laddu_config_ensure_copies");
        let _ = fs::remove_dir_all(&tmp);

        let defaults_dir = tmp.join("defaults");
        fs::create_dir_all(&defaults_dir).unwrap();
        fs::write(defaults_dir.join("laddu.toml"), VALID_TOML).unwrap();
        fs::write(defaults_dir.join("laddu.toml.example"), "# template\n").unwrap();

        assert!(!tmp.join("config").exists());

        let copied = ensure_config_files(&tmp).expect("should succeed");
        assert_eq!(copied.len(), 1);
        assert!(tmp.join("config/laddu.toml").exists());
        assert!(!tmp.join("config/laddu.toml.example").exists());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_skips_existing() {
        let tmp = std::env::temp_dir().join("laddu_config_ensure_skips");
        let _ = fs::remove_dir_all(&tmp);

        let defaults_dir = tmp.join("defaults");
        let config_dir = tmp.join("config");
        fs::create_dir_all(&defaults_dir).unwrap();
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(defaults_dir.join("laddu.toml"), VALID_TOML).unwrap();
        fs::write(config_dir.join("laddu.toml"), "# custom\n").unwrap();

        let copied = ensure_config_files(&tmp).expect("should succeed");
        assert!(copied.is_empty());

        let content = fs::read_to_string(config_dir.join("laddu.toml")).unwrap();
        assert_eq!(content, "# custom\n");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_errors_when_both_dirs_missing() {
        let tmp = std::env::temp_dir().join("laddu_config_both_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let err = ensure_config_files(&tmp).unwrap_err();
        match &err {
            ConfigError::DefaultsCopyError { message } => {
                assert!(message.contains("neither defaults/ nor config/"));
            }
            other => panic!("expected DefaultsCopyError, got: {other}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }
}
