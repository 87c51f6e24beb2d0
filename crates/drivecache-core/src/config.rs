//! Configuration module for drivecache.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, a builder, and a layered resolver that
//! folds defaults, the file, the environment and command-line overrides into
//! one effective configuration while remembering where each value came from.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for drivecache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

/// Local cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding `meta/`, `files/` and `tmp/`.
    pub root: PathBuf,
    /// Free space (in MiB) that must remain after any cache write.
    pub min_free_space_mb: u64,
}

/// Background sync settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Milliseconds a scheduled fetch/upload waits before starting.
    pub delay_ms: u64,
    /// Seconds between remote change checks.
    pub poll_interval_secs: u64,
    /// Maximum fetch/upload tasks running at once.
    pub max_concurrent_tasks: u32,
}

/// Remote service endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the metadata API.
    pub base_url: String,
    /// Base URL of the content upload API.
    pub upload_url: String,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/drivecache/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("drivecache")
            .join("config.yaml")
    }

    /// `cache.min_free_space_mb` in bytes.
    pub fn min_free_space_bytes(&self) -> u64 {
        self.cache.min_free_space_mb.saturating_mul(1024 * 1024)
    }

    /// `sync.delay_ms` as a duration.
    pub fn sync_delay(&self) -> Duration {
        Duration::from_millis(self.sync.delay_ms)
    }

    /// `sync.poll_interval_secs` as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("drivecache")
                .join("cache"),
            min_free_space_mb: 512,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            poll_interval_secs: 60,
            max_concurrent_tasks: 4,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.googleapis.com/drive/v2".to_string(),
            upload_url: "https://www.googleapis.com/upload/drive/v2".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- cache ---
        if self.cache.root.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "cache.root".into(),
                message: "must not be empty".into(),
            });
        }

        // --- sync ---
        if self.sync.poll_interval_secs == 0 {
            errors.push(ValidationError {
                field: "sync.poll_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.max_concurrent_tasks == 0 || self.sync.max_concurrent_tasks > 32 {
            errors.push(ValidationError {
                field: "sync.max_concurrent_tasks".into(),
                message: "must be in range 1..=32".into(),
            });
        }

        // --- remote ---
        for (field, url) in [
            ("remote.base_url", &self.remote.base_url),
            ("remote.upload_url", &self.remote.upload_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(ValidationError {
                    field: field.into(),
                    message: format!("must be an http(s) URL, got '{url}'"),
                });
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use drivecache_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .cache_root(PathBuf::from("/var/cache/drivecache"))
///     .sync_delay_ms(0)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- cache ---

    pub fn cache_root(mut self, root: PathBuf) -> Self {
        self.config.cache.root = root;
        self
    }

    pub fn cache_min_free_space_mb(mut self, mb: u64) -> Self {
        self.config.cache.min_free_space_mb = mb;
        self
    }

    // --- sync ---

    pub fn sync_delay_ms(mut self, ms: u64) -> Self {
        self.config.sync.delay_ms = ms;
        self
    }

    pub fn sync_poll_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval_secs = seconds;
        self
    }

    pub fn sync_max_concurrent_tasks(mut self, n: u32) -> Self {
        self.config.sync.max_concurrent_tasks = n;
        self
    }

    // --- remote ---

    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn remote_upload_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.upload_url = url.into();
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Layered resolution
// ---------------------------------------------------------------------------

/// Where a configuration value came from, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigLayer {
    Default,
    File,
    Environment,
    CommandLine,
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Default => "default",
            Self::File => "file",
            Self::Environment => "environment",
            Self::CommandLine => "command-line",
        };
        f.write_str(name)
    }
}

/// Prefix of environment variables read by [`ConfigLayers::with_env`].
///
/// `DRIVECACHE_SYNC__DELAY_MS=0` sets `sync.delay_ms`.
pub const ENV_PREFIX: &str = "DRIVECACHE_";

/// Effective configuration plus the winning layer of every leaf setting.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: Config,
    /// Dotted key path -> layer that supplied the value
    pub provenance: BTreeMap<String, ConfigLayer>,
}

impl ResolvedConfig {
    pub fn source_of(&self, key_path: &str) -> Option<ConfigLayer> {
        self.provenance.get(key_path).copied()
    }
}

/// Partial configuration trees, one per layer, folded by precedence.
///
/// Each layer only holds the keys it sets. The built-in defaults are always
/// the bottom layer.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayers {
    layers: BTreeMap<ConfigLayer, Value>,
}

impl ConfigLayers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the YAML file at `path` as the file layer.
    pub fn with_file(self, path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let value: Value = serde_yaml::from_str(&content)?;
        Ok(self.with_layer(ConfigLayer::File, value))
    }

    /// Merges a whole partial tree into `layer`.
    pub fn with_layer(mut self, layer: ConfigLayer, value: Value) -> Self {
        let slot = self
            .layers
            .entry(layer)
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        merge_value(slot, value);
        self
    }

    /// Sets one dotted key path in `layer`.
    pub fn with_override(self, layer: ConfigLayer, key_path: &str, value: impl Into<Value>) -> Self {
        let mut node = value.into();
        for key in key_path.rsplit('.') {
            let mut map = Mapping::new();
            map.insert(Value::String(key.to_string()), node);
            node = Value::Mapping(map);
        }
        self.with_layer(layer, node)
    }

    /// Reads `DRIVECACHE_<SECTION>__<KEY>` variables into the environment layer.
    pub fn with_env<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, raw) in vars {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key_path = rest
                .split("__")
                .map(str::to_ascii_lowercase)
                .collect::<Vec<_>>()
                .join(".");
            if key_path.is_empty() {
                continue;
            }
            let value = serde_yaml::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
            self = self.with_override(ConfigLayer::Environment, &key_path, value);
        }
        self
    }

    /// Folds all layers over the defaults.
    pub fn resolve(&self) -> anyhow::Result<ResolvedConfig> {
        let mut merged = serde_yaml::to_value(Config::default())?;
        let mut provenance = BTreeMap::new();
        record_leaves(&merged, "", ConfigLayer::Default, &mut provenance);

        for (layer, value) in &self.layers {
            fold_layer(&mut merged, value, "", *layer, &mut provenance);
        }

        let config: Config = serde_yaml::from_value(merged)?;
        Ok(ResolvedConfig { config, provenance })
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn key_name(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn record_leaves(
    value: &Value,
    prefix: &str,
    layer: ConfigLayer,
    provenance: &mut BTreeMap<String, ConfigLayer>,
) {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                record_leaves(child, &join_key(prefix, &key_name(key)), layer, provenance);
            }
        }
        _ => {
            provenance.insert(prefix.to_string(), layer);
        }
    }
}

fn fold_layer(
    acc: &mut Value,
    layer_value: &Value,
    prefix: &str,
    layer: ConfigLayer,
    provenance: &mut BTreeMap<String, ConfigLayer>,
) {
    match (acc, layer_value) {
        (Value::Mapping(acc_map), Value::Mapping(layer_map)) => {
            for (key, child) in layer_map {
                let path = join_key(prefix, &key_name(key));
                match acc_map.get_mut(key) {
                    Some(existing) => fold_layer(existing, child, &path, layer, provenance),
                    None => {
                        acc_map.insert(key.clone(), child.clone());
                        record_leaves(child, &path, layer, provenance);
                    }
                }
            }
        }
        (acc, value) => {
            let sub = format!("{prefix}.");
            provenance.retain(|k, _| !k.starts_with(&sub));
            *acc = value.clone();
            record_leaves(value, prefix, layer, provenance);
        }
    }
}

fn merge_value(acc: &mut Value, value: Value) {
    match (acc, value) {
        (Value::Mapping(acc_map), Value::Mapping(map)) => {
            for (key, child) in map {
                match acc_map.get_mut(&key) {
                    Some(existing) => merge_value(existing, child),
                    None => {
                        acc_map.insert(key, child);
                    }
                }
            }
        }
        (acc, value) => *acc = value,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
