use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_BASE_CURRENCY: &str = "USD";
const DEFAULT_WARRANTY_MONTHS: u32 = 12;
const DEFAULT_MONEY_SCALE: u32 = 2;
const DEFAULT_MAX_OPEN_SESSIONS: usize = 64;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// ISO 4217 code all pricing is converted into
    #[serde(default = "default_base_currency")]
    #[validate(length(min = 3, max = 3))]
    pub base_currency: String,

    /// Warranty length stamped on received units, in months (0 disables)
    #[serde(default = "default_warranty_months")]
    #[validate(range(min = 0, max = 120))]
    pub default_warranty_months: u32,

    /// Decimal places monetary values are rounded to at commit/display time
    #[serde(default = "default_money_scale")]
    #[validate(range(min = 0, max = 6))]
    pub money_scale: u32,

    /// Upper bound on concurrently open staging sessions
    #[serde(default = "default_max_open_sessions")]
    #[validate(custom = "validate_nonzero_capacity")]
    pub max_open_sessions: usize,

    /// Bounded capacity of the domain event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_nonzero_capacity")]
    pub event_channel_capacity: usize,

    /// Default log level when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,
}

fn default_base_currency() -> String {
    DEFAULT_BASE_CURRENCY.to_string()
}
fn default_warranty_months() -> u32 {
    DEFAULT_WARRANTY_MONTHS
}
fn default_money_scale() -> u32 {
    DEFAULT_MONEY_SCALE
}
fn default_max_open_sessions() -> usize {
    DEFAULT_MAX_OPEN_SESSIONS
}
fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}
fn default_log_level() -> String {
    "info".to_string()
}

fn validate_nonzero_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("capacity");
        err.message = Some("capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_currency: default_base_currency(),
            default_warranty_months: default_warranty_months(),
            money_scale: default_money_scale(),
            max_open_sessions: default_max_open_sessions(),
            event_channel_capacity: default_event_channel_capacity(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (PROCUREMENT__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    let config = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("PROCUREMENT").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
