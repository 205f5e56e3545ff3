//! Configuration management
//!
//! This module handles loading, validation, and management of the Appforge
//! configuration. Configuration is stored in TOML format at
//! ~/.appforge/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: log level, data directory
//! - **llm**: endpoint, secret key name, and the chat/reasoning/routing model profiles
//! - **storage**: database file and the artifact, deploy and screenshot roots
//! - **session**: session client cache policy and memory window
//! - **deploy**: public deploy host and build tool settings
//! - **screenshot**: headless browser capture settings (optional)
//! - **server**: HTTP bind address
//!
//! # Path Expansion
//!
//! The configuration system automatically:
//! - Expands ~ to the user's home directory
//! - Resolves relative storage paths under `core.data_dir`
//! - Creates the storage directories if they don't exist
//!
//! # Examples
//!
//! ```no_run
//! use appforge_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Deploy host: {}", config.deploy.host);
//! println!("Artifacts: {:?}", config.storage.code_output_dir);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// Language model configuration
    pub llm: LLMConfig,

    /// Storage locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Session client cache policy
    #[serde(default)]
    pub session: SessionConfig,

    /// Build and publish settings
    #[serde(default)]
    pub deploy: DeployConfig,

    /// Preview capture settings
    #[serde(default)]
    pub screenshot: ScreenshotConfig,

    /// HTTP front end
    #[serde(default)]
    pub server: ServerConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Language model configuration
///
/// All profiles talk to the same OpenAI-compatible endpoint. The API key is
/// resolved through `SecretManager` under `api_key_name`, never stored here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Secret key name used to look up the API key
    #[serde(default = "default_api_key_name")]
    pub api_key_name: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Profile used for single document and multi-file generation
    #[serde(default = "ModelProfile::chat")]
    pub chat: ModelProfile,

    /// Profile used by the tool-augmented client
    #[serde(default = "ModelProfile::reasoning")]
    pub reasoning: ModelProfile,

    /// Profile used to classify initial prompts
    #[serde(default = "ModelProfile::routing")]
    pub routing: ModelProfile,
}

/// A model name plus its sampling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl ModelProfile {
    fn chat() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
        }
    }

    fn reasoning() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_tokens: 16384,
            temperature: 0.2,
        }
    }

    fn routing() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 64,
            temperature: 0.0,
        }
    }
}

/// Storage locations. Relative paths resolve under `core.data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Root of the per-application artifact directories
    #[serde(default = "default_code_output_dir")]
    pub code_output_dir: PathBuf,

    /// Root of the published deploy directories
    #[serde(default = "default_deploy_dir")]
    pub deploy_dir: PathBuf,

    /// Where captured cover images are stored
    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: PathBuf,
}

/// Session client cache policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of live session clients
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Entries expire this long after creation
    #[serde(default = "default_ttl_after_write")]
    pub ttl_after_write_secs: u64,

    /// Entries expire this long after their last access
    #[serde(default = "default_ttl_after_access")]
    pub ttl_after_access_secs: u64,

    /// Conversation turns kept in a client's memory window
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,

    /// Upper bound on tool calls in one tool-augmented turn
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,

    /// How often expired entries are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Build and publish settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Public deploy host, e.g. `http://localhost:8123/deploy`
    #[serde(default = "default_deploy_host")]
    pub host: String,

    /// npm executable used for project builds
    #[serde(default = "default_npm_binary")]
    pub npm_binary: String,

    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,

    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,
}

/// Headless browser preview capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Chrome or Chromium executable
    #[serde(default = "default_chrome_binary")]
    pub chrome_binary: String,

    #[serde(default = "default_screenshot_timeout")]
    pub timeout_secs: u64,

    /// Maximum concurrent captures
    #[serde(default = "default_screenshot_workers")]
    pub workers: usize,

    /// Prefix for stored cover references; file paths are stored when unset
    #[serde(default)]
    pub public_base_url: Option<String>,
}

/// HTTP front end settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.appforge")
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_name() -> String {
    "openai_api_key".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_temperature() -> f32 {
    0.7
}

fn default_database() -> PathBuf {
    PathBuf::from("appforge.db")
}

fn default_code_output_dir() -> PathBuf {
    PathBuf::from("code_output")
}

fn default_deploy_dir() -> PathBuf {
    PathBuf::from("code_deploy")
}

fn default_screenshot_dir() -> PathBuf {
    PathBuf::from("screenshots")
}

fn default_max_entries() -> usize {
    1000
}

fn default_ttl_after_write() -> u64 {
    30 * 60
}

fn default_ttl_after_access() -> u64 {
    10 * 60
}

fn default_memory_window() -> usize {
    20
}

fn default_max_tool_calls() -> usize {
    50
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_deploy_host() -> String {
    "http://localhost:8123/deploy".to_string()
}

fn default_npm_binary() -> String {
    if cfg!(windows) {
        "npm.cmd".to_string()
    } else {
        "npm".to_string()
    }
}

fn default_install_timeout() -> u64 {
    300
}

fn default_build_timeout() -> u64 {
    180
}

fn default_chrome_binary() -> String {
    "google-chrome".to_string()
}

fn default_screenshot_timeout() -> u64 {
    30
}

fn default_screenshot_workers() -> usize {
    2
}

fn default_bind() -> String {
    "127.0.0.1:8123".to_string()
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key_name: default_api_key_name(),
            request_timeout_secs: default_request_timeout(),
            chat: ModelProfile::chat(),
            reasoning: ModelProfile::reasoning(),
            routing: ModelProfile::routing(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            code_output_dir: default_code_output_dir(),
            deploy_dir: default_deploy_dir(),
            screenshot_dir: default_screenshot_dir(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_after_write_secs: default_ttl_after_write(),
            ttl_after_access_secs: default_ttl_after_access(),
            memory_window: default_memory_window(),
            max_tool_calls: default_max_tool_calls(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl SessionConfig {
    pub fn ttl_after_write(&self) -> Duration {
        Duration::from_secs(self.ttl_after_write_secs)
    }

    pub fn ttl_after_access(&self) -> Duration {
        Duration::from_secs(self.ttl_after_access_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            host: default_deploy_host(),
            npm_binary: default_npm_binary(),
            install_timeout_secs: default_install_timeout(),
            build_timeout_secs: default_build_timeout(),
        }
    }
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chrome_binary: default_chrome_binary(),
            timeout_secs: default_screenshot_timeout(),
            workers: default_screenshot_workers(),
            public_base_url: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.appforge/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails (invalid values, storage directories cannot be created)
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse, validate and process a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Build a validated configuration rooted at `data_dir`, used by tests and
    /// embedded setups that have no config file.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let mut config = Self::default_config();
        config.core.data_dir = data_dir.into();
        config.validate_and_process()?;
        Ok(config)
    }

    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Written before processing so the file keeps portable ~ paths
        let config = Self::default_config();
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.appforge/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".appforge").join("config.toml"))
    }

    fn default_config() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            llm: LLMConfig::default(),
            storage: StorageConfig::default(),
            session: SessionConfig::default(),
            deploy: DeployConfig::default(),
            screenshot: ScreenshotConfig::default(),
            server: ServerConfig::default(),
        }
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates enumerated and numeric fields
    /// - Expands ~ in paths
    /// - Resolves storage paths under the data directory
    /// - Creates the data and storage directories
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        for (name, profile) in [
            ("chat", &self.llm.chat),
            ("reasoning", &self.llm.reasoning),
            ("routing", &self.llm.routing),
        ] {
            if profile.model.trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "llm.{}.model must not be empty",
                    name
                )));
            }
            if !(0.0..=2.0).contains(&profile.temperature) {
                return Err(EngineError::Config(format!(
                    "llm.{}.temperature must be between 0.0 and 2.0",
                    name
                )));
            }
        }

        if self.session.max_entries == 0 {
            return Err(EngineError::Config(
                "session.max_entries must be at least 1".to_string(),
            ));
        }
        if self.session.memory_window == 0 || self.session.max_tool_calls == 0 {
            return Err(EngineError::Config(
                "session.memory_window and session.max_tool_calls must be at least 1".to_string(),
            ));
        }
        if self.screenshot.workers == 0 {
            return Err(EngineError::Config(
                "screenshot.workers must be at least 1".to_string(),
            ));
        }

        let host = self.deploy.host.trim().trim_end_matches('/');
        if host.is_empty() {
            return Err(EngineError::Config("deploy.host must be set".to_string()));
        }
        self.deploy.host = host.to_string();

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        fs::create_dir_all(&self.core.data_dir).map_err(|e| {
            EngineError::Config(format!("Failed to create data directory: {}", e))
        })?;

        self.storage.database = resolve_under(&self.core.data_dir, &self.storage.database)?;
        self.storage.code_output_dir =
            resolve_under(&self.core.data_dir, &self.storage.code_output_dir)?;
        self.storage.deploy_dir = resolve_under(&self.core.data_dir, &self.storage.deploy_dir)?;
        self.storage.screenshot_dir =
            resolve_under(&self.core.data_dir, &self.storage.screenshot_dir)?;

        for dir in [
            &self.storage.code_output_dir,
            &self.storage.deploy_dir,
            &self.storage.screenshot_dir,
        ] {
            fs::create_dir_all(dir).map_err(|e| {
                EngineError::Config(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Expand a storage path and anchor it under `base` when it is relative
fn resolve_under(base: &Path, path: &Path) -> Result<PathBuf, EngineError> {
    let expanded = expand_path(path)?;
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(base.join(expanded))
    }
}
