use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "inr";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 15;
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// Payment processor configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentConfig {
    /// Base URL of the payment processor API
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// Secret API key used as bearer credential for session create/retrieve
    pub secret_key: String,

    /// Shared secret for webhook signature verification.
    /// When unset, webhook signatures cannot be verified and every
    /// webhook delivery is rejected.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Allowed clock skew between the signature timestamp and now
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,

    /// Per-request timeout for gateway calls
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            secret_key: String::new(),
            webhook_secret: None,
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key (minimum 64 characters)
    #[validate(length(min = 64))]
    pub jwt_secret: String,

    /// JWT expiration time in seconds
    pub jwt_expiration: usize,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Base URL of the storefront client, used to build the payment
    /// success and cancel redirect URLs
    #[serde(default = "default_client_url")]
    pub client_url: String,

    /// Authoritative currency for checkout sessions (ISO code, lowercase)
    #[serde(default = "default_currency")]
    pub currency: String,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Request timeout for inbound HTTP requests in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Payment processor configuration
    #[serde(default)]
    pub payment: PaymentConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_client_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_gateway_base_url() -> String {
    "https://api.payproc.example".to_string()
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

impl AppConfig {
    /// Construct a configuration programmatically (used by tests).
    pub fn new(
        database_url: String,
        jwt_secret: String,
        jwt_expiration: usize,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            client_url: default_client_url(),
            currency: default_currency(),
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            request_timeout_secs: default_request_timeout_secs(),
            payment: PaymentConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("{0}")]
    Invalid(String),
}

/// Load configuration from layered sources: `config/default`, a
/// per-environment file, then `APP__`-prefixed environment variables.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let builder = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("jwt_expiration", 3600)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    // jwt_secret has no production default: it must come from the
    // environment or a config file. Development falls back to a fixed key.
    let mut cfg: AppConfig = match config.get_string("jwt_secret") {
        Ok(_) => config.try_deserialize()?,
        Err(_) if run_env != "production" => {
            info!("jwt_secret not configured; using built-in development secret");
            let mut with_secret = Config::builder()
                .add_source(config)
                .set_override("jwt_secret", DEV_DEFAULT_JWT_SECRET)?
                .build()?;
            // the payment secret key may also be absent in development
            if with_secret.get_string("payment.secret_key").is_err() {
                with_secret = Config::builder()
                    .add_source(with_secret)
                    .set_override("payment.secret_key", "sk_test_development_only")?
                    .build()?;
            }
            with_secret.try_deserialize()?
        }
        Err(_) => {
            return Err(AppConfigError::Invalid(
                "jwt_secret must be configured in production".to_string(),
            ))
        }
    };

    cfg.currency = cfg.currency.to_lowercase();
    if url::Url::parse(&cfg.client_url).is_err() {
        return Err(AppConfigError::Invalid(format!(
            "client_url is not a valid URL: {}",
            cfg.client_url
        )));
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the configured
/// level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::try_new(filter_directive)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
