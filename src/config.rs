use std::collections::HashMap;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::info;

use crate::entities::intake::IntakeCategory;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_GATEWAY_MAX_RETRIES: u32 = 3;
const DEFAULT_RAPID_FILL_SECS: u64 = 20;
const DEFAULT_FLAG_PERSIST_THRESHOLD: u32 = 40;
const DEFAULT_MAX_CERTIFICATE_DAYS: u32 = 2;

/// Callers must supply an idempotency key at least this long; anything
/// shorter is too guessable to collapse retries safely.
pub const IDEMPOTENCY_KEY_MIN_LEN: usize = 16;

/// Payment gateway connection settings.
#[derive(Clone, Debug, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the gateway REST API
    pub base_url: String,

    /// API secret used as a bearer token
    #[serde(default)]
    pub secret_key: String,

    /// Network timeout per gateway call, in seconds
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,

    /// Bounded automatic retry count for transient network errors
    #[serde(default = "default_gateway_max_retries")]
    pub max_retries: u32,

    /// Where the gateway sends the patient after a successful payment
    pub success_url: String,

    /// Where the gateway sends the patient after abandoning checkout
    pub cancel_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9920".to_string(),
            secret_key: String::new(),
            timeout_secs: default_gateway_timeout_secs(),
            max_retries: default_gateway_max_retries(),
            success_url: "http://localhost:3000/checkout/success".to_string(),
            cancel_url: "http://localhost:3000/checkout/cancelled".to_string(),
        }
    }
}

/// Gateway price references keyed by pricing tier, resolved once at startup.
/// Keys look like `certificate:single_day` or `prescription:standard`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PricingConfig {
    #[serde(default)]
    pub refs: HashMap<String, String>,
}

impl PricingConfig {
    pub fn price_ref(&self, tier_key: &str) -> Option<&str> {
        self.refs.get(tier_key).map(String::as_str)
    }
}

/// Administrative kill switch. Disabling a category rejects submissions
/// before any other step runs.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct KillSwitchConfig {
    #[serde(default)]
    pub disabled_categories: Vec<IntakeCategory>,
}

impl KillSwitchConfig {
    pub fn is_disabled(&self, category: IntakeCategory) -> bool {
        self.disabled_categories.contains(&category)
    }
}

/// Data for the safety gate. The rule *content* is operational data, not
/// code; it arrives here so the gate itself stays a pure evaluator.
#[derive(Clone, Debug, Deserialize)]
pub struct GateRulesConfig {
    /// Medication slugs that can never be requested online. Doubles as the
    /// per-medication kill switch.
    #[serde(default)]
    pub blocked_medications: Vec<String>,

    /// Medication slugs that require a phone call before prescribing
    #[serde(default)]
    pub call_required_medications: Vec<String>,

    /// Certificates longer than this need a phone call
    #[serde(default = "default_max_certificate_days")]
    pub max_certificate_days: u32,
}

impl Default for GateRulesConfig {
    fn default() -> Self {
        Self {
            blocked_medications: Vec::new(),
            call_required_medications: Vec::new(),
            max_certificate_days: default_max_certificate_days(),
        }
    }
}

/// Fraud scoring thresholds.
#[derive(Clone, Debug, Deserialize)]
pub struct FraudConfig {
    /// Forms completed faster than this are suspicious
    #[serde(default = "default_rapid_fill_secs")]
    pub rapid_fill_secs: u64,

    /// Flags scoring at or above this are persisted for manual review
    #[serde(default = "default_flag_persist_threshold")]
    pub persist_threshold: u32,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            rapid_fill_secs: default_rapid_fill_secs(),
            persist_threshold: default_flag_persist_threshold(),
        }
    }
}

/// Application configuration, resolved once at process start.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
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

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub pricing: PricingConfig,

    #[serde(default)]
    pub kill_switch: KillSwitchConfig,

    #[serde(default)]
    pub gate_rules: GateRulesConfig,

    #[serde(default)]
    pub fraud: FraudConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}
fn default_gateway_max_retries() -> u32 {
    DEFAULT_GATEWAY_MAX_RETRIES
}
fn default_rapid_fill_secs() -> u64 {
    DEFAULT_RAPID_FILL_SECS
}
fn default_flag_persist_threshold() -> u32 {
    DEFAULT_FLAG_PERSIST_THRESHOLD
}
fn default_max_certificate_days() -> u32 {
    DEFAULT_MAX_CERTIFICATE_DAYS
}

impl AppConfig {
    /// Minimal constructor used by tests and tooling.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            gateway: GatewayConfig::default(),
            pricing: PricingConfig::default(),
            kill_switch: KillSwitchConfig::default(),
            gate_rules: GateRulesConfig::default(),
            fraud: FraudConfig::default(),
        }
    }
}

/// Loads configuration from `config/default.toml`, an environment-specific
/// overlay, and `INTAKE__`-prefixed environment variables, in that order.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment =
        std::env::var("ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, environment)).required(false))
        .add_source(Environment::with_prefix("INTAKE").separator("__"))
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    info!(environment = %app_config.environment, "Configuration loaded");
    Ok(app_config)
}

/// Initializes the global tracing subscriber. Safe to call more than once;
/// later calls are no-ops.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_config_resolves_tier_keys() {
        let mut refs = HashMap::new();
        refs.insert(
            "certificate:single_day".to_string(),
            "price_cert_1d".to_string(),
        );
        let pricing = PricingConfig { refs };

        assert_eq!(
            pricing.price_ref("certificate:single_day"),
            Some("price_cert_1d")
        );
        assert_eq!(pricing.price_ref("certificate:multi_day"), None);
    }

    #[test]
    fn kill_switch_matches_configured_categories() {
        let ks = KillSwitchConfig {
            disabled_categories: vec![IntakeCategory::Prescription],
        };
        assert!(ks.is_disabled(IntakeCategory::Prescription));
        assert!(!ks.is_disabled(IntakeCategory::Certificate));
    }
}
