use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_ADMIN_USER_TYPE: &str = "admin";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// ISO currency code used for new orders and provider sessions
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub default_currency: String,

    /// Storefront base URL that payment redirects return to
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,

    /// User type name whose members may manage store settings
    #[serde(default = "default_admin_user_type")]
    #[validate(length(min = 1, max = 100))]
    pub admin_user_type: String,

    /// Stripe secret API key; payment sessions are disabled when absent
    #[serde(default)]
    pub stripe_secret_key: Option<String>,

    /// Stripe webhook signing secret (whsec_...)
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,

    /// Stripe REST base URL (overridable for tests)
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,

    /// Allowed clock skew for webhook signature timestamps
    #[serde(default = "default_webhook_tolerance_secs")]
    pub payment_webhook_tolerance_secs: u64,

    /// Per-request timeout for calls to the payment provider
    #[serde(default = "default_payment_request_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub payment_request_timeout_secs: u64,

    /// Retries for transient provider failures (transport, 429, 5xx)
    #[serde(default = "default_payment_max_retries")]
    #[validate(range(max = 10))]
    pub payment_max_retries: u32,
}

impl AppConfig {
    /// Creates a new configuration with defaults for every optional setting
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            default_currency: default_currency(),
            frontend_url: default_frontend_url(),
            admin_user_type: default_admin_user_type(),
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: default_stripe_api_base(),
            payment_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            payment_request_timeout_secs: default_payment_request_timeout_secs(),
            payment_max_retries: default_payment_max_retries(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn payment_request_timeout(&self) -> Duration {
        Duration::from_secs(self.payment_request_timeout_secs)
    }

    /// Parsed CORS origins, empty when unset
    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        // Webhooks would be accepted unauthenticated without a signing secret.
        if self.is_production()
            && self.stripe_secret_key.is_some()
            && self
                .stripe_webhook_secret
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            let mut err = ValidationError::new("stripe_webhook_secret_required");
            err.message = Some(
                "Set APP__STRIPE_WEBHOOK_SECRET when Stripe payments are enabled in production"
                    .into(),
            );
            errors.add("stripe_webhook_secret", err);
        }

        if !self.frontend_url.starts_with("http://") && !self.frontend_url.starts_with("https://")
        {
            let mut err = ValidationError::new("frontend_url");
            err.message = Some("frontend_url must be an absolute http(s) URL".into());
            errors.add("frontend_url", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_admin_user_type() -> String {
    DEFAULT_ADMIN_USER_TYPE.to_string()
}

fn default_stripe_api_base() -> String {
    DEFAULT_STRIPE_API_BASE.to_string()
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_payment_request_timeout_secs() -> u64 {
    15
}

fn default_payment_max_retries() -> u32 {
    3
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(CONFIG_DIR)
}

pub fn load_config_from(config_dir: &str) -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(config_dir).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
        .add_source(File::with_name(&format!("{}/{}", config_dir, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
