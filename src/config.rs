use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Layaway policy knobs. The original intent behind several of these
/// constants is not recoverable from the product requirements, so every
/// one of them is configuration rather than a hard-coded value.
#[derive(Clone, Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct LayawayPolicy {
    /// Maximum number of installments a plan may be split into
    #[serde(default = "default_max_installments")]
    #[validate(range(min = 1, max = 60))]
    pub max_installments: u32,

    /// Smallest accepted purchase amount, in minor currency units
    #[serde(default = "default_min_order_amount")]
    pub min_order_amount: i64,

    /// Largest accepted purchase amount, in minor currency units
    #[serde(default = "default_max_order_amount")]
    pub max_order_amount: i64,

    /// Charge attempts per payment before it fails permanently
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,

    /// Retry backoff schedule in seconds, indexed by attempt count.
    /// Attempts past the end of the schedule reuse the last entry.
    #[serde(default = "default_backoff_schedule")]
    #[validate(length(min = 1))]
    pub backoff_schedule_secs: Vec<u64>,

    /// Per-call timeout for gateway charge attempts, in seconds
    #[serde(default = "default_gateway_timeout")]
    pub gateway_timeout_secs: u64,

    /// Per-call timeout for sales tax lookups, in seconds
    #[serde(default = "default_tax_timeout")]
    pub tax_timeout_secs: u64,

    /// How often the autopay orchestrator scans for due payments
    #[serde(default = "default_autopay_poll_interval")]
    pub autopay_poll_interval_secs: u64,

    /// Maximum due payments claimed per orchestrator pass
    #[serde(default = "default_autopay_batch_size")]
    pub autopay_batch_size: u64,
}

impl Default for LayawayPolicy {
    fn default() -> Self {
        Self {
            max_installments: default_max_installments(),
            min_order_amount: default_min_order_amount(),
            max_order_amount: default_max_order_amount(),
            max_attempts: default_max_attempts(),
            backoff_schedule_secs: default_backoff_schedule(),
            gateway_timeout_secs: default_gateway_timeout(),
            tax_timeout_secs: default_tax_timeout(),
            autopay_poll_interval_secs: default_autopay_poll_interval(),
            autopay_batch_size: default_autopay_batch_size(),
        }
    }
}

impl LayawayPolicy {
    /// Backoff delay after the given (1-based) attempt count.
    pub fn backoff_after(&self, attempt_count: u32) -> Duration {
        let idx = (attempt_count.max(1) as usize - 1).min(self.backoff_schedule_secs.len() - 1);
        Duration::from_secs(self.backoff_schedule_secs[idx])
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn tax_timeout(&self) -> Duration {
        Duration::from_secs(self.tax_timeout_secs)
    }

    pub fn autopay_poll_interval(&self) -> Duration {
        Duration::from_secs(self.autopay_poll_interval_secs)
    }
}

/// Application configuration with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

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
    #[serde(default = "default_true")]
    pub auto_migrate: bool,

    /// Whether the autopay orchestrator runs in this process
    #[serde(default = "default_true")]
    pub autopay_enabled: bool,

    /// Comma-separated CORS origins; unset means permissive in development
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Layaway policy
    #[serde(default)]
    #[validate]
    pub layaway: LayawayPolicy,
}

impl AppConfig {
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            environment,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_json: false,
            auto_migrate: true,
            autopay_enabled: false,
            cors_allowed_origins: None,
            layaway: LayawayPolicy::default(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

fn default_max_installments() -> u32 {
    12
}
fn default_min_order_amount() -> i64 {
    10_000 // $100.00
}
fn default_max_order_amount() -> i64 {
    500_000 // $5,000.00
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_schedule() -> Vec<u64> {
    vec![3_600, 21_600, 86_400] // 1h, 6h, 24h
}
fn default_gateway_timeout() -> u64 {
    30
}
fn default_tax_timeout() -> u64 {
    10
}
fn default_autopay_poll_interval() -> u64 {
    60
}
fn default_autopay_batch_size() -> u64 {
    50
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration load error: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Loads application configuration.
///
/// Layers sources in this order:
/// 1. Built-in defaults
/// 2. `config/default.toml`
/// 3. `config/{RUN_ENV}.toml`
/// 4. `LAYAWAY__`-prefixed environment variables
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

    let config = Config::builder()
        .set_default("database_url", "sqlite://layaway.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("LAYAWAY").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate()?;

    Ok(app_config)
}

/// Initializes the global tracing subscriber. `RUST_LOG` overrides the
/// configured level when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("layaway_api={},tower_http=info", level);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_is_clamped_to_last_entry() {
        let policy = LayawayPolicy::default();
        assert_eq!(policy.backoff_after(1), Duration::from_secs(3_600));
        assert_eq!(policy.backoff_after(2), Duration::from_secs(21_600));
        assert_eq!(policy.backoff_after(3), Duration::from_secs(86_400));
        // past the schedule, reuse the final delay
        assert_eq!(policy.backoff_after(7), Duration::from_secs(86_400));
    }

    #[test]
    fn default_policy_validates() {
        LayawayPolicy::default().validate().unwrap();
    }
}
