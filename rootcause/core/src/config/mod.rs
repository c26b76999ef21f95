//! TOML Configuration File Support
//!
//! Configuration lives in `$XDG_CONFIG_HOME/rootcause/rootcause.toml`
//! (typically `~/.config/rootcause/rootcause.toml`).
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. Environment variables
//! 2. TOML configuration file
//! 3. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [routing]
//! prefer_local = true
//! provider_order = ["ollama", "gemini"]
//! default_timeout_secs = 60
//! json_retry_timeout_secs = 15
//! temperature = 0.3
//! max_tokens = 2000
//!
//! [providers.ollama]
//! model = "llama3"
//! timeout_secs = 120
//! base_url = "http://localhost:11434"
//!
//! [memory]
//! retention_days = 30
//! redis_url = "redis://localhost:6379/0"
//! connect_timeout_ms = 2000
//! data_dir = "~/.local/share/rootcause/incidents"
//! health_window_secs = 3600
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `ROOTCAUSE_RETENTION_DAYS` | record retention |
//! | `REDIS_URL` | primary store URL |
//! | `REDIS_HOST`, `REDIS_PORT` | primary store address when `REDIS_URL` is unset |
//! | `ROOTCAUSE_DATA_DIR` | file store directory |
//! | `ROOTCAUSE_PREFER_LOCAL` | put Ollama first (`1`/`true`) or last |
//! | `OLLAMA_HOST`, `OLLAMA_PORT` | Ollama server address |
//! | `GOOGLE_API_KEY`, `OPENROUTER_API_KEY`, `HUGGINGFACE_API_KEY`, `ANTHROPIC_API_KEY` | hosted provider keys |

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::{GenerationParams, ProviderKind};
use crate::routing::{DEFAULT_HEALTH_WINDOW, DEFAULT_JSON_RETRY_TIMEOUT, DEFAULT_PROVIDER_TIMEOUT};
use crate::store::DEFAULT_RETENTION;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Default primary store URL
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";

/// Default primary store connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Where the effective configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// At least one environment variable applied
    Env,
    /// TOML configuration file
    File,
    /// Defaults only
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[routing]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingToml {
    /// Try the local server first
    pub prefer_local: Option<bool>,

    /// Explicit provider order (overrides `prefer_local`)
    pub provider_order: Option<Vec<String>>,

    /// Per-call timeout for providers without their own
    pub default_timeout_secs: Option<u64>,

    /// Timeout of the JSON correction re-prompt
    pub json_retry_timeout_secs: Option<u64>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Completion budget
    pub max_tokens: Option<u32>,
}

/// `[providers.<name>]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderToml {
    /// Model identifier
    pub model: Option<String>,

    /// Per-call timeout
    pub timeout_secs: Option<u64>,

    /// Endpoint root
    pub base_url: Option<String>,

    /// API key (environment variables take precedence)
    pub api_key: Option<String>,

    /// Register the provider at all
    pub enabled: Option<bool>,
}

/// `[memory]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryToml {
    /// Record retention in days
    pub retention_days: Option<u64>,

    /// Primary store URL
    pub redis_url: Option<String>,

    /// Primary store connect timeout
    pub connect_timeout_ms: Option<u64>,

    /// File store directory (`~/` is expanded)
    pub data_dir: Option<String>,

    /// Provider health rolling window
    pub health_window_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RootcauseToml {
    /// Routing section
    pub routing: RoutingToml,

    /// Per-provider sections keyed by provider name
    pub providers: BTreeMap<String, ProviderToml>,

    /// Incident memory section
    pub memory: MemoryToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Settings for one provider
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderSettings {
    /// Model (provider default when `None`)
    pub model: Option<String>,
    /// Per-call timeout (routing default when `None`)
    pub timeout: Option<Duration>,
    /// Endpoint root (provider default when `None`)
    pub base_url: Option<String>,
    /// API key
    pub api_key: Option<String>,
    /// Whether the provider is registered
    pub enabled: bool,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            model: None,
            timeout: None,
            base_url: None,
            api_key: None,
            enabled: true,
        }
    }
}

/// Provider routing configuration
#[derive(Clone, Debug)]
pub struct RoutingConfig {
    /// Ollama first (true) or last (false)
    pub prefer_local: bool,
    /// Explicit order, replacing the `prefer_local` default
    pub provider_order: Option<Vec<ProviderKind>>,
    /// Timeout for providers without their own
    pub default_timeout: Duration,
    /// Timeout of the JSON correction re-prompt
    pub json_retry_timeout: Duration,
    /// Sampling parameters shared by all providers
    pub params: GenerationParams,
    /// Per-provider settings
    pub providers: HashMap<ProviderKind, ProviderSettings>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            prefer_local: true,
            provider_order: None,
            default_timeout: DEFAULT_PROVIDER_TIMEOUT,
            json_retry_timeout: DEFAULT_JSON_RETRY_TIMEOUT,
            params: GenerationParams::default(),
            providers: HashMap::new(),
        }
    }
}

impl RoutingConfig {
    /// Enabled providers in routing order
    #[must_use]
    pub fn order(&self) -> Vec<ProviderKind> {
        let order = self
            .provider_order
            .clone()
            .unwrap_or_else(|| ProviderKind::default_order(self.prefer_local));
        order
            .into_iter()
            .filter(|kind| self.settings(*kind).enabled)
            .collect()
    }

    /// Settings of one provider (defaults when unconfigured)
    #[must_use]
    pub fn settings(&self, kind: ProviderKind) -> ProviderSettings {
        self.providers.get(&kind).cloned().unwrap_or_default()
    }

    fn settings_mut(&mut self, kind: ProviderKind) -> &mut ProviderSettings {
        self.providers.entry(kind).or_default()
    }
}

/// Incident memory configuration
#[derive(Clone, Debug)]
pub struct MemoryConfig {
    /// Record retention
    pub retention: Duration,
    /// Primary store URL
    pub redis_url: String,
    /// Primary store connect timeout
    pub connect_timeout: Duration,
    /// File store directory
    pub data_dir: PathBuf,
    /// Provider health rolling window
    pub health_window: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            data_dir: default_data_dir(),
            health_window: DEFAULT_HEALTH_WINDOW,
        }
    }
}

impl MemoryConfig {
    /// Retention in whole days
    #[must_use]
    pub fn retention_days(&self) -> u64 {
        self.retention.as_secs() / SECS_PER_DAY
    }
}

/// Complete configuration
#[derive(Clone, Debug, Default)]
pub struct RootcauseConfig {
    /// Provider routing
    pub routing: RoutingConfig,
    /// Incident memory
    pub memory: MemoryConfig,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: Option<ConfigSource>,
}

impl RootcauseConfig {
    /// Defaults only
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source.unwrap_or(ConfigSource::Default)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.retention < Duration::from_secs(SECS_PER_DAY) {
            return Err(ConfigError::ValidationError(
                "retention must be at least one day".to_string(),
            ));
        }
        let timeouts = [
            ("routing.default_timeout", self.routing.default_timeout),
            ("routing.json_retry_timeout", self.routing.json_retry_timeout),
            ("memory.connect_timeout", self.memory.connect_timeout),
            ("memory.health_window", self.memory.health_window),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
            }
        }
        for (kind, settings) in &self.routing.providers {
            if settings.timeout.is_some_and(|t| t.is_zero()) {
                return Err(ConfigError::ValidationError(format!(
                    "providers.{kind}.timeout_secs must be > 0"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.routing.params.temperature) {
            return Err(ConfigError::ValidationError(
                "routing.temperature must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/rootcause/rootcause.toml` or
/// `~/.config/rootcause/rootcause.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("rootcause").join("rootcause.toml"))
}

/// Default file store directory (`~/.local/share/rootcause/incidents` on Linux)
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rootcause")
        .join("incidents")
}

/// Load configuration from all sources with proper priority
///
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<RootcauseConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path plus the process environment
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RootcauseConfig, ConfigError> {
    load_config_with_env(path, |name| std::env::var(name).ok())
}

/// Load configuration with an explicit environment lookup
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RootcauseConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = RootcauseConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RootcauseToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = Some(ConfigSource::File);

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, &env)?;
    config.validate()?;
    Ok(config)
}

fn parse_kind(name: &str) -> Result<ProviderKind, ConfigError> {
    name.parse::<ProviderKind>()
        .map_err(|e| ConfigError::ValidationError(e.to_string()))
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RootcauseConfig, toml: &RootcauseToml) -> Result<(), ConfigError> {
    // Routing settings
    let routing = &mut config.routing;
    if let Some(prefer_local) = toml.routing.prefer_local {
        routing.prefer_local = prefer_local;
    }
    if let Some(ref names) = toml.routing.provider_order {
        let mut order = Vec::with_capacity(names.len());
        for name in names {
            let kind = parse_kind(name)?;
            if order.contains(&kind) {
                return Err(ConfigError::ValidationError(format!(
                    "provider {kind} listed twice in routing.provider_order"
                )));
            }
            order.push(kind);
        }
        routing.provider_order = Some(order);
    }
    if let Some(secs) = toml.routing.default_timeout_secs {
        routing.default_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.routing.json_retry_timeout_secs {
        routing.json_retry_timeout = Duration::from_secs(secs);
    }
    if let Some(temperature) = toml.routing.temperature {
        routing.params.temperature = temperature;
    }
    if let Some(max_tokens) = toml.routing.max_tokens {
        routing.params.max_tokens = max_tokens;
    }

    // Provider sections
    for (name, section) in &toml.providers {
        let settings = routing.settings_mut(parse_kind(name)?);
        if section.model.is_some() {
            settings.model.clone_from(&section.model);
        }
        if let Some(secs) = section.timeout_secs {
            settings.timeout = Some(Duration::from_secs(secs));
        }
        if section.base_url.is_some() {
            settings.base_url.clone_from(&section.base_url);
        }
        if section.api_key.is_some() {
            settings.api_key.clone_from(&section.api_key);
        }
        if let Some(enabled) = section.enabled {
            settings.enabled = enabled;
        }
    }

    // Memory settings
    let memory = &mut config.memory;
    if let Some(days) = toml.memory.retention_days {
        memory.retention = Duration::from_secs(days.saturating_mul(SECS_PER_DAY));
    }
    if let Some(ref url) = toml.memory.redis_url {
        memory.redis_url.clone_from(url);
    }
    if let Some(ms) = toml.memory.connect_timeout_ms {
        memory.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(ref dir) = toml.memory.data_dir {
        memory.data_dir = expand_home(dir);
    }
    if let Some(secs) = toml.memory.health_window_secs {
        memory.health_window = Duration::from_secs(secs);
    }

    Ok(())
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut RootcauseConfig, env: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut touched = false;

    if let Some(days) = env("ROOTCAUSE_RETENTION_DAYS") {
        let days: u64 = days.trim().parse().map_err(|_| {
            ConfigError::ValidationError(format!("ROOTCAUSE_RETENTION_DAYS={days:?} is not a number"))
        })?;
        config.memory.retention = Duration::from_secs(days.saturating_mul(SECS_PER_DAY));
        touched = true;
    }

    if let Some(url) = env("REDIS_URL").filter(|v| !v.is_empty()) {
        config.memory.redis_url = url;
        touched = true;
    } else if env("REDIS_HOST").is_some() || env("REDIS_PORT").is_some() {
        let host = env("REDIS_HOST").unwrap_or_else(|| "localhost".to_string());
        let port = env("REDIS_PORT").unwrap_or_else(|| "6379".to_string());
        config.memory.redis_url = format!("redis://{host}:{port}/0");
        touched = true;
    }

    if let Some(dir) = env("ROOTCAUSE_DATA_DIR").filter(|v| !v.is_empty()) {
        config.memory.data_dir = expand_home(&dir);
        touched = true;
    }

    if let Some(value) = env("ROOTCAUSE_PREFER_LOCAL") {
        config.routing.prefer_local = value != "0" && !value.eq_ignore_ascii_case("false");
        touched = true;
    }

    if env("OLLAMA_HOST").is_some() || env("OLLAMA_PORT").is_some() {
        let url = ollama_url(env("OLLAMA_HOST"), env("OLLAMA_PORT"));
        config.routing.settings_mut(ProviderKind::Ollama).base_url = Some(url);
        touched = true;
    }

    for kind in ProviderKind::ALL {
        let Some(var) = kind.api_key_var() else {
            continue;
        };
        if let Some(key) = env(var).filter(|v| !v.is_empty()) {
            config.routing.settings_mut(kind).api_key = Some(key);
            touched = true;
        }
    }

    if touched {
        config.source = Some(ConfigSource::Env);
    }
    Ok(())
}

/// Ollama base URL from `OLLAMA_HOST` (bare host or URL) and `OLLAMA_PORT`
fn ollama_url(host: Option<String>, port: Option<String>) -> String {
    match (host, port) {
        (Some(host), _) if host.contains("://") => host,
        (Some(host), _) if host.contains(':') => format!("http://{host}"),
        (host, port) => format!(
            "http://{}:{}",
            host.unwrap_or_else(|| "localhost".to_string()),
            port.unwrap_or_else(|| "11434".to_string())
        ),
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| Path::new(path).to_path_buf()),
        None => PathBuf::from(path),
    }
}
