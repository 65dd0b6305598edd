use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    pub postgres_url: String,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
    /// Empty string means: use the in-process cache (single replica only).
    #[serde(default)]
    pub redis_url: String,
    /// Empty string means: no broker; the outbox accumulates undrained.
    #[serde(default)]
    pub amqp_url: String,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub saga: SagaConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub fraud: FraudConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusConfig {
    pub exchange: String,
    pub fraud_queue: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            exchange: "wallet_events".to_string(),
            fraud_queue: "fraud_detection".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WalletConfig {
    pub default_currency: String,
    pub balance_cache_ttl_secs: u64,
    pub idempotency_ttl_secs: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            default_currency: "USD".to_string(),
            balance_cache_ttl_secs: 30,
            idempotency_ttl_secs: 86_400,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff_ms: 50,
            max_backoff_ms: 5_000,
            max_jitter_ms: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SagaConfig {
    pub stuck_threshold_ms: u64,
    pub recovery_interval_secs: u64,
    pub recovery_batch_size: i64,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            stuck_threshold_ms: 60_000,
            recovery_interval_secs: 10,
            recovery_batch_size: 10,
        }
    }
}

impl SagaConfig {
    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_millis(self.stuck_threshold_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutboxConfig {
    pub relay_interval_secs: u64,
    pub relay_batch_size: i64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            relay_interval_secs: 5,
            relay_batch_size: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FraudConfig {
    pub threshold: Decimal,
    pub max_withdrawals: u64,
    pub time_window_minutes: u64,
    pub retry_delays_ms: Vec<u64>,
    pub max_retries: u32,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            threshold: Decimal::new(10_000, 0),
            max_withdrawals: 3,
            time_window_minutes: 5,
            retry_delays_ms: vec![1_000, 2_000, 4_000],
            max_retries: 3,
        }
    }
}

impl AppConfig {
    /// Load config from YAML file based on environment
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let mut config: Self =
            serde_yaml::from_str(&content).context("Failed to parse config yaml")?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Environment variables take precedence over YAML config.
    ///
    /// Supported overrides:
    /// - WALLETD_GATEWAY_PORT: Gateway port (u16)
    /// - WALLETD_GATEWAY_HOST: Gateway host
    /// - WALLETD_POSTGRES_URL: PostgreSQL connection URL
    /// - WALLETD_REDIS_URL: Redis connection URL
    /// - WALLETD_AMQP_URL: Broker connection URL
    /// - WALLETD_LOG_LEVEL: Log level (trace/debug/info/warn/error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("WALLETD_GATEWAY_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                tracing::info!("Config override: gateway.port = {} (from WALLETD_GATEWAY_PORT)", p);
                self.gateway.port = p;
            }
        }
        if let Ok(host) = std::env::var("WALLETD_GATEWAY_HOST") {
            tracing::info!("Config override: gateway.host = {} (from WALLETD_GATEWAY_HOST)", host);
            self.gateway.host = host;
        }
        if let Ok(url) = std::env::var("WALLETD_POSTGRES_URL") {
            tracing::info!("Config override: postgres_url = [REDACTED] (from WALLETD_POSTGRES_URL)");
            self.postgres_url = url;
        }
        if let Ok(url) = std::env::var("WALLETD_REDIS_URL") {
            tracing::info!("Config override: redis_url = [REDACTED] (from WALLETD_REDIS_URL)");
            self.redis_url = url;
        }
        if let Ok(url) = std::env::var("WALLETD_AMQP_URL") {
            tracing::info!("Config override: amqp_url = [REDACTED] (from WALLETD_AMQP_URL)");
            self.amqp_url = url;
        }
        if let Ok(level) = std::env::var("WALLETD_LOG_LEVEL") {
            tracing::info!("Config override: log_level = {} (from WALLETD_LOG_LEVEL)", level);
            self.log_level = level;
        }
    }

    /// Validate configuration at startup
    pub fn validate(&self) -> Result<()> {
        if self.gateway.port == 0 {
            anyhow::bail!("Invalid gateway.port: must be > 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log_level '{}': must be one of {:?}",
                self.log_level,
                valid_levels
            );
        }

        if self.postgres_url.is_empty() {
            anyhow::bail!("postgres_url must be set");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("Invalid retry.max_attempts: must be > 0");
        }

        if self.fraud.retry_delays_ms.is_empty() {
            anyhow::bail!("fraud.retry_delays_ms must not be empty");
        }

        if self.wallet.default_currency.len() != 3 {
            anyhow::bail!(
                "Invalid wallet.default_currency '{}': must be a 3-letter code",
                self.wallet.default_currency
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "walletd.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            gateway: GatewayConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            postgres_url: "postgres://localhost/walletd".to_string(),
            run_migrations: true,
            redis_url: String::new(),
            amqp_url: String::new(),
            bus: BusConfig::default(),
            wallet: WalletConfig::default(),
            retry: RetryConfig::default(),
            saga: SagaConfig::default(),
            outbox: OutboxConfig::default(),
            fraud: FraudConfig::default(),
        }
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_port() {
        let mut config = valid_config();
        config.gateway.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = valid_config();
        config.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_currency() {
        let mut config = valid_config();
        config.wallet.default_currency = "DOLLARS".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fraud_defaults() {
        let fraud = FraudConfig::default();
        assert_eq!(fraud.threshold, Decimal::new(10_000, 0));
        assert_eq!(fraud.max_withdrawals, 3);
        assert_eq!(fraud.retry_delays_ms, vec![1_000, 2_000, 4_000]);
    }
}
