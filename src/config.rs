use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_retry::strategy::ExponentialBackoff;

use crate::errors::{BillingError, Result};

/// billing engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// plans with more installments are rejected
    pub max_installments: u32,
    /// currency code reported to the transaction ledger
    pub currency: String,
    /// days after the due date before an installment is considered late for reporting
    pub grace_period_days: u32,
    /// horizon used by upcoming-installment queries
    pub upcoming_window_days: u32,
    /// accept plans whose start date is before today
    pub allow_past_start_date: bool,
    pub max_description_len: usize,
    /// how long a request waits for a card lock before giving up
    pub lock_timeout_ms: u64,
    pub retry: RetryConfig,
    pub ledger: LedgerClientConfig,
}

/// bounded retry for retryable persistence failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// remote transaction ledger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerClientConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            max_installments: 24,
            currency: "ARS".to_string(),
            grace_period_days: 7,
            upcoming_window_days: 30,
            allow_past_start_date: false,
            max_description_len: 255,
            lock_timeout_ms: 2_000,
            retry: RetryConfig::default(),
            ledger: LedgerClientConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 1_000,
        }
    }
}

impl Default for LedgerClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://transaction-service:8083".to_string(),
            timeout_secs: 10,
        }
    }
}

impl BillingConfig {
    /// load from a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| BillingError::InvalidConfiguration {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// load from environment variables, reading a `.env` file first when present
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Some(v) = env_parse::<u32>("BILLING_MAX_INSTALLMENTS")? {
            config.max_installments = v;
        }
        if let Ok(v) = env::var("BILLING_CURRENCY") {
            config.currency = v;
        }
        if let Some(v) = env_parse::<u32>("BILLING_GRACE_PERIOD_DAYS")? {
            config.grace_period_days = v;
        }
        if let Some(v) = env_parse::<u64>("BILLING_LOCK_TIMEOUT_MS")? {
            config.lock_timeout_ms = v;
        }
        if let Some(v) = env_parse::<u32>("BILLING_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = v;
        }
        if let Ok(v) = env::var("TRANSACTION_SERVICE_URL") {
            config.ledger.base_url = v;
        }
        if let Some(v) = env_parse::<u64>("BILLING_LEDGER_TIMEOUT_SECS")? {
            config.ledger.timeout_secs = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_installments == 0 {
            return Err(BillingError::InvalidConfiguration {
                message: "max_installments must be at least 1".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(BillingError::InvalidConfiguration {
                message: "retry.max_attempts must be at least 1".to_string(),
            });
        }
        if self.ledger.timeout_secs == 0 {
            return Err(BillingError::InvalidConfiguration {
                message: "ledger.timeout_secs must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl RetryConfig {
    /// delays to sleep between attempts (one fewer than `max_attempts`)
    pub fn backoff(&self) -> impl Iterator<Item = Duration> {
        // base 2 with factor base_delay/2 yields base_delay, 2x, 4x, ...
        ExponentialBackoff::from_millis(2)
            .factor((self.base_delay_ms / 2).max(1))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .take(self.max_attempts.saturating_sub(1) as usize)
    }
}

impl LedgerClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| BillingError::InvalidConfiguration {
                message: format!("{key} has an invalid value: {raw}"),
            }),
        Err(_) => Ok(None),
    }
}
