//! Configuration module for SheetSync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::CacheKey;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for SheetSync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub fallback: FallbackConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub transform: TransformConfig,
    pub sync: SyncConfig,
    /// Logical data types keyed by name
    pub data_types: BTreeMap<String, DataTypeConfig>,
    pub logging: LoggingConfig,
}

/// Fast structured endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address of the structured endpoint. `None` disables the fast path.
    pub endpoint_url: Option<String>,
    /// Bearer token; requires `intermediary_url`.
    pub auth_token: Option<String>,
    /// Authenticated intermediary that forwards POSTed requests to the endpoint.
    pub intermediary_url: Option<String>,
    /// Per-attempt deadline for routine calls, in seconds.
    pub timeout_secs: u64,
    /// Per-attempt deadline for full snapshot calls, in seconds.
    pub snapshot_timeout_secs: u64,
}

/// A named alternate network route for the raw-text export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRoute {
    pub name: String,
    /// URL template containing `{url}`, replaced by the percent-encoded export URL.
    pub template: String,
}

/// Legacy raw-text transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Export URL template containing `{sheet}`.
    pub export_url_template: Option<String>,
    /// Routes attempted in order.
    pub proxy_routes: Vec<ProxyRoute>,
    /// Pause after a non-origin-policy route failure, in milliseconds.
    pub route_pause_ms: u64,
    /// Per-route deadline, in seconds.
    pub timeout_secs: u64,
}

/// Retry policy for transient transport failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Base of the exponential backoff, in milliseconds.
    pub base_delay_ms: u64,
}

/// Shared cache store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite database shared by all clients on this host.
    pub database: PathBuf,
    pub default_ttl_minutes: u64,
    /// Expiry for delta snapshots. Unset keeps them until the next reload.
    pub delta_ttl_minutes: Option<u64>,
}

/// Transform pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Offload transforms to the worker thread.
    pub worker_enabled: bool,
    /// Per-job deadline, in seconds.
    pub job_timeout_secs: u64,
}

/// Polling and background synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_secs: u64,
    /// How long a background sync may hold the in-progress flag, in seconds.
    pub background_flag_ttl_secs: u64,
    /// Delay between sheets during a background sync, in milliseconds.
    pub inter_sheet_delay_ms: u64,
}

/// One logical data type: where it comes from and where it is cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTypeConfig {
    pub sheet: String,
    pub cache_key: String,
    pub transformer: String,
    /// Overrides `cache.default_ttl_minutes`.
    #[serde(default)]
    pub ttl_minutes: Option<u64>,
    /// Use the version-based delta engine instead of TTL fetches.
    #[serde(default)]
    pub delta: bool,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Config::load()
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
    /// Typically `$XDG_CONFIG_HOME/sheetsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("sheetsync")
            .join("config.yaml")
    }

    /// Look up a data type by name.
    pub fn data_type(&self, name: &str) -> Option<&DataTypeConfig> {
        self.data_types.get(name)
    }

    /// TTL for a data type, falling back to the cache default.
    pub fn ttl_for(&self, data_type: &DataTypeConfig) -> Duration {
        let minutes = data_type
            .ttl_minutes
            .unwrap_or(self.cache.default_ttl_minutes);
        Duration::from_secs(minutes * 60)
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_timeout_secs)
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_minutes * 60)
    }

    pub fn delta_ttl(&self) -> Option<Duration> {
        self.delta_ttl_minutes.map(|m| Duration::from_secs(m * 60))
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

// Config derives Default because all its fields implement Default.
// (clippy::derivable_impls)

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            auth_token: None,
            intermediary_url: None,
            timeout_secs: 30,
            snapshot_timeout_secs: 60,
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            export_url_template: None,
            proxy_routes: vec![
                ProxyRoute {
                    name: "direct".to_string(),
                    template: "{url}".to_string(),
                },
                ProxyRoute {
                    name: "corsproxy".to_string(),
                    template: "https://corsproxy.io/?{url}".to_string(),
                },
                ProxyRoute {
                    name: "allorigins".to_string(),
                    template: "https://api.allorigins.win/raw?url={url}".to_string(),
                },
            ],
            route_pause_ms: 500,
            timeout_secs: 20,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("sheetsync");
        Self {
            database: data_dir.join("cache.db"),
            default_ttl_minutes: 180,
            delta_ttl_minutes: None,
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            worker_enabled: true,
            job_timeout_secs: 60,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            background_flag_ttl_secs: 300,
            inter_sheet_delay_ms: 1_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"api.timeout_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for `retry.max_retries`.
const MAX_RETRIES_LIMIT: u32 = 10;

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid. A missing or
    /// malformed `api.endpoint_url` is not reported here: it only disables
    /// the fast path.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ValidationError {
                field: field.into(),
                message,
            });
        };

        // --- api ---
        if self.api.timeout_secs == 0 {
            push("api.timeout_secs", "must be greater than 0".into());
        }
        if self.api.snapshot_timeout_secs < self.api.timeout_secs {
            push(
                "api.snapshot_timeout_secs",
                format!(
                    "must not be shorter than api.timeout_secs ({})",
                    self.api.timeout_secs
                ),
            );
        }
        if self.api.auth_token.is_some() && self.api.intermediary_url.is_none() {
            push(
                "api.intermediary_url",
                "required when api.auth_token is set; the endpoint cannot read headers directly"
                    .into(),
            );
        }
        if let Some(url) = &self.api.intermediary_url {
            if !is_http_url(url) {
                push(
                    "api.intermediary_url",
                    format!("not an http(s) URL: {url}"),
                );
            }
        }

        // --- fallback ---
        if let Some(template) = &self.fallback.export_url_template {
            if !template.contains("{sheet}") {
                push(
                    "fallback.export_url_template",
                    "must contain the {sheet} placeholder".into(),
                );
            }
        }
        for (index, route) in self.fallback.proxy_routes.iter().enumerate() {
            if route.name.trim().is_empty() {
                push(
                    &format!("fallback.proxy_routes[{index}].name"),
                    "must not be empty".into(),
                );
            }
            if !route.template.contains("{url}") {
                push(
                    &format!("fallback.proxy_routes[{index}].template"),
                    "must contain the {url} placeholder".into(),
                );
            }
        }
        if self.fallback.timeout_secs == 0 {
            push("fallback.timeout_secs", "must be greater than 0".into());
        }

        // --- retry ---
        if self.retry.max_retries > MAX_RETRIES_LIMIT {
            push(
                "retry.max_retries",
                format!("must not exceed {MAX_RETRIES_LIMIT}"),
            );
        }
        if self.retry.base_delay_ms == 0 {
            push("retry.base_delay_ms", "must be greater than 0".into());
        }

        // --- cache ---
        if self.cache.default_ttl_minutes == 0 {
            push("cache.default_ttl_minutes", "must be greater than 0".into());
        }
        if self.cache.delta_ttl_minutes == Some(0) {
            push("cache.delta_ttl_minutes", "must be greater than 0".into());
        }

        // --- transform ---
        if self.transform.job_timeout_secs == 0 {
            push("transform.job_timeout_secs", "must be greater than 0".into());
        }

        // --- sync ---
        if self.sync.poll_interval_secs == 0 {
            push("sync.poll_interval_secs", "must be greater than 0".into());
        }
        if self.sync.background_flag_ttl_secs == 0 {
            push(
                "sync.background_flag_ttl_secs",
                "must be greater than 0".into(),
            );
        }

        // --- data_types ---
        for (name, data_type) in &self.data_types {
            if data_type.sheet.trim().is_empty() {
                push(
                    &format!("data_types.{name}.sheet"),
                    "must not be empty".into(),
                );
            }
            if let Err(e) = CacheKey::new(data_type.cache_key.clone()) {
                push(&format!("data_types.{name}.cache_key"), e.to_string());
            }
            if data_type.transformer.trim().is_empty() {
                push(
                    &format!("data_types.{name}.transformer"),
                    "must not be empty".into(),
                );
            }
            if data_type.ttl_minutes == Some(0) {
                push(
                    &format!("data_types.{name}.ttl_minutes"),
                    "must be greater than 0".into(),
                );
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            push(
                "logging.level",
                format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            );
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
/// use sheetsync_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .api_endpoint_url("https://script.example.com/exec")
///     .data_type("positions", "Holdings", "sheet:positions", "rows")
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

    // --- api ---

    pub fn api_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.config.api.endpoint_url = Some(url.into());
        self
    }

    pub fn api_auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.api.auth_token = Some(token.into());
        self
    }

    pub fn api_intermediary_url(mut self, url: impl Into<String>) -> Self {
        self.config.api.intermediary_url = Some(url.into());
        self
    }

    pub fn api_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.api.timeout_secs = seconds;
        self
    }

    pub fn api_snapshot_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.api.snapshot_timeout_secs = seconds;
        self
    }

    // --- fallback ---

    pub fn fallback_export_url_template(mut self, template: impl Into<String>) -> Self {
        self.config.fallback.export_url_template = Some(template.into());
        self
    }

    pub fn fallback_proxy_routes(mut self, routes: Vec<ProxyRoute>) -> Self {
        self.config.fallback.proxy_routes = routes;
        self
    }

    pub fn fallback_route_pause_ms(mut self, ms: u64) -> Self {
        self.config.fallback.route_pause_ms = ms;
        self
    }

    pub fn fallback_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.fallback.timeout_secs = seconds;
        self
    }

    // --- retry ---

    pub fn retry_max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.base_delay_ms = ms;
        self
    }

    // --- cache ---

    pub fn cache_database(mut self, path: PathBuf) -> Self {
        self.config.cache.database = path;
        self
    }

    pub fn cache_default_ttl_minutes(mut self, minutes: u64) -> Self {
        self.config.cache.default_ttl_minutes = minutes;
        self
    }

    pub fn cache_delta_ttl_minutes(mut self, minutes: u64) -> Self {
        self.config.cache.delta_ttl_minutes = Some(minutes);
        self
    }

    // --- transform ---

    pub fn transform_worker_enabled(mut self, enabled: bool) -> Self {
        self.config.transform.worker_enabled = enabled;
        self
    }

    pub fn transform_job_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.transform.job_timeout_secs = seconds;
        self
    }

    // --- sync ---

    pub fn sync_poll_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval_secs = seconds;
        self
    }

    pub fn sync_background_flag_ttl_secs(mut self, seconds: u64) -> Self {
        self.config.sync.background_flag_ttl_secs = seconds;
        self
    }

    pub fn sync_inter_sheet_delay_ms(mut self, ms: u64) -> Self {
        self.config.sync.inter_sheet_delay_ms = ms;
        self
    }

    // --- data_types ---

    pub fn data_type(
        mut self,
        name: impl Into<String>,
        sheet: impl Into<String>,
        cache_key: impl Into<String>,
        transformer: impl Into<String>,
    ) -> Self {
        self.config.data_types.insert(
            name.into(),
            DataTypeConfig {
                sheet: sheet.into(),
                cache_key: cache_key.into(),
                transformer: transformer.into(),
                ttl_minutes: None,
                delta: false,
            },
        );
        self
    }

    pub fn delta_data_type(
        mut self,
        name: impl Into<String>,
        sheet: impl Into<String>,
        cache_key: impl Into<String>,
        transformer: impl Into<String>,
    ) -> Self {
        self.config.data_types.insert(
            name.into(),
            DataTypeConfig {
                sheet: sheet.into(),
                cache_key: cache_key.into(),
                transformer: transformer.into(),
                ttl_minutes: None,
                delta: true,
            },
        );
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
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
