//! Configuration management for task-router
//!
//! Supports configuration via:
//! 1. Config file (~/.config/task-router/config.toml)
//! 2. Environment variables (TASK_ROUTER_CACHE_TTL, TASK_ROUTER_CACHE_ENABLED,
//!    plus each provider's `api_key_env`)
//! 3. CLI arguments (override file/env settings)

use crate::cache::DEFAULT_TTL_SECS;
use crate::routing::{Capability, ModelRegistry, ProviderConfig, RoutingTable, TaskRoute};
use crate::usage::JsonFileUsageStore;
use crate::vision::EstimatorConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid route for task '{task}': {reason}")]
    InvalidRoute { task: String, reason: String },

    #[error("Provider '{0}' is declared more than once")]
    DuplicateProvider(String),
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Provider catalog
    pub providers: Vec<ProviderConfig>,

    /// Task type -> provider chain
    pub routes: Vec<TaskRoute>,

    /// Response cache settings
    pub cache: CacheSettings,

    /// Usage reporting settings
    pub usage: UsageSettings,

    /// Image recognition estimator tunables
    pub vision: EstimatorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            routes: default_routes(),
            cache: CacheSettings::default(),
            usage: UsageSettings::default(),
            vision: EstimatorConfig::default(),
        }
    }
}

/// Cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Whether chat responses are cached
    pub enabled: bool,

    /// Lifetime of a cached response
    pub ttl_secs: u64,

    /// Capacity of the in-process store
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: DEFAULT_TTL_SECS,
            max_entries: 1000,
        }
    }
}

/// Usage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageSettings {
    /// Days covered by `get_usage_stats`, today included
    pub stats_days: u32,

    /// Usage ledger file for the CLI (default: under the user data dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_path: Option<PathBuf>,
}

impl Default for UsageSettings {
    fn default() -> Self {
        Self {
            stats_days: 7,
            ledger_path: None,
        }
    }
}

impl UsageSettings {
    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(JsonFileUsageStore::default_path)
    }
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::new("groq-fast", "Groq Llama 3.1 8B", Capability::Chat)
            .with_quota(14_400)
            .with_endpoint(
                "https://api.groq.com/openai/v1",
                "llama-3.1-8b-instant",
                "GROQ_API_KEY",
            ),
        ProviderConfig::new("glm-4-free", "Zhipu GLM-4 Flash", Capability::Chat)
            .with_quota(1_000)
            .with_endpoint(
                "https://open.bigmodel.cn/api/paas/v4",
                "glm-4-flash",
                "ZHIPU_API_KEY",
            ),
        ProviderConfig::new("deepseek-chat", "DeepSeek Chat", Capability::Chat)
            .with_quota(500)
            .with_cost(0.001)
            .with_endpoint("https://api.deepseek.com/v1", "deepseek-chat", "DEEPSEEK_API_KEY"),
        ProviderConfig::new("qwen-turbo", "Qwen Turbo", Capability::Chat)
            .with_quota(2_000)
            .with_cost(0.0003)
            .with_endpoint(
                "https://dashscope.aliyuncs.com/compatible-mode/v1",
                "qwen-turbo",
                "DASHSCOPE_API_KEY",
            ),
        ProviderConfig::new("baidu-vision", "Baidu Image Recognition", Capability::Vision)
            .with_quota(500),
        ProviderConfig::new("tencent-vision", "Tencent Image Analysis", Capability::Vision)
            .with_quota(1_000),
    ]
}

fn default_routes() -> Vec<TaskRoute> {
    vec![
        TaskRoute::new("urgent_diagnosis", "groq-fast", &["glm-4-free", "deepseek-chat"], 10_000),
        TaskRoute::new("general_chat", "glm-4-free", &["qwen-turbo", "groq-fast"], 15_000),
        TaskRoute::new("health_analysis", "deepseek-chat", &["qwen-turbo", "glm-4-free"], 30_000),
        TaskRoute::new("report_generation", "qwen-turbo", &["deepseek-chat", "glm-4-free"], 60_000),
        TaskRoute::new("image_recognition", "baidu-vision", &["tencent-vision"], 20_000),
    ]
}

impl Config {
    /// Get default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("task-router")
            .join("config.toml")
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path())
    }

    /// Load config from specific path; a missing file yields the defaults
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default().with_env_overrides());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;

        Ok(config.with_env_overrides())
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(ttl) = std::env::var("TASK_ROUTER_CACHE_TTL") {
            match ttl.trim().parse::<u64>() {
                Ok(ttl) => self.cache.ttl_secs = ttl,
                Err(_) => warn!(value = %ttl, "ignoring invalid TASK_ROUTER_CACHE_TTL"),
            }
        }

        if let Ok(enabled) = std::env::var("TASK_ROUTER_CACHE_ENABLED") {
            match parse_flag(&enabled) {
                Some(flag) => self.cache.enabled = flag,
                None => warn!(value = %enabled, "ignoring invalid TASK_ROUTER_CACHE_ENABLED"),
            }
        }

        self
    }

    /// Save config to default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::default_path())
    }

    /// Save config to specific path
    pub fn save_to(&self, path: PathBuf) -> Result<(), ConfigError> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Validate configuration: catalog ids unique, every route well formed
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::MissingRequired(
                "at least one provider must be configured".to_string(),
            ));
        }
        if self.routes.is_empty() {
            return Err(ConfigError::MissingRequired(
                "at least one route must be configured".to_string(),
            ));
        }

        let registry = self.build_registry()?;
        self.build_routes(&registry)?;

        if self.vision.default_range.validate().is_err() {
            return Err(ConfigError::MissingRequired(format!(
                "vision.default_range must satisfy 0 <= min <= max (got {}..{})",
                self.vision.default_range.min, self.vision.default_range.max
            )));
        }

        Ok(())
    }

    pub fn build_registry(&self) -> Result<ModelRegistry, ConfigError> {
        ModelRegistry::new(self.providers.clone())
    }

    pub fn build_routes(&self, registry: &ModelRegistry) -> Result<RoutingTable, ConfigError> {
        RoutingTable::new(self.routes.clone(), registry)
    }

    /// Generate example config content
    pub fn example() -> String {
        let example = Config::default();
        toml::to_string_pretty(&example).unwrap_or_default()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Builder for creating Config programmatically
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Start from an empty catalog and route table
    pub fn empty() -> Self {
        Self {
            config: Config {
                providers: Vec::new(),
                routes: Vec::new(),
                ..Config::default()
            },
        }
    }

    pub fn provider(mut self, provider: ProviderConfig) -> Self {
        self.config.providers.retain(|p| p.id != provider.id);
        self.config.providers.push(provider);
        self
    }

    pub fn route(mut self, route: TaskRoute) -> Self {
        self.config.routes.retain(|r| r.task_type != route.task_type);
        self.config.routes.push(route);
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache.enabled = enabled;
        self
    }

    pub fn cache_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.config.cache.ttl_secs = ttl_secs;
        self
    }

    pub fn stats_days(mut self, days: u32) -> Self {
        self.config.usage.stats_days = days;
        self
    }

    pub fn vision(mut self, vision: EstimatorConfig) -> Self {
        self.config.vision = vision;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
