use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Default values for configuration
const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_COUPON_LIFETIME_SECS: u64 = 10;
const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Application configuration.
///
/// Values are layered from compiled-in defaults and `COMMERCE_`-prefixed
/// environment variables, e.g. `COMMERCE_COUPON_DEFAULT_LIFETIME_SECS=90`.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Application environment
    #[serde(default = "default_env")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Lifetime applied to coupons stored without an explicit expiry.
    #[serde(default = "default_coupon_lifetime_secs")]
    pub coupon_default_lifetime_secs: u64,

    /// Capacity of the event channel between services and the consumer.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
}

fn default_env() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_coupon_lifetime_secs() -> u64 {
    DEFAULT_COUPON_LIFETIME_SECS
}

fn default_event_buffer_size() -> usize {
    DEFAULT_EVENT_BUFFER_SIZE
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_env(),
            log_level: default_log_level(),
            coupon_default_lifetime_secs: default_coupon_lifetime_secs(),
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

impl AppConfig {
    /// Loads and validates the configuration from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let cfg: AppConfig = Config::builder()
            .add_source(Environment::with_prefix("COMMERCE"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks the invariants that serde defaults alone cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coupon_default_lifetime_secs == 0 {
            return Err(ConfigError::Message(
                "coupon_default_lifetime_secs must be at least 1".to_string(),
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(ConfigError::Message(
                "event_buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn coupon_default_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.coupon_default_lifetime_secs as i64)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
