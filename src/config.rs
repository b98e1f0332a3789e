// config.rs
use anyhow::Context;
use sqlx::types::BigDecimal;

use crate::models::amendmentmodel::{CHANGE_REQUEST_EXPIRY_HOURS, EXTENSION_REQUEST_EXPIRY_HOURS};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub port: u16,
    pub redis_url: Option<String>,
    pub log_level: String,
    pub allowed_origins: Vec<String>,
    // Amendment windows
    pub change_request_expiry_hours: i64,
    pub extension_expiry_hours: i64,
    pub escalation_sweep_interval_secs: u64,
    // Commission policy overrides
    pub min_job_price: BigDecimal,
    pub commission_flat_fee: BigDecimal,
    pub commission_flat_fee_threshold: BigDecimal,
    // Payment collaborator
    pub paystack_secret_key: String,
    pub payment_callback_url: String,
    pub active_payment_provider: String,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value: {}", name, e)),
        _ => Ok(default),
    }
}

fn required_secret(name: &str, value: Option<String>) -> anyhow::Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .with_context(|| format!("{} must be set", name))
}

impl Config {
    pub fn init() -> anyhow::Result<Config> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt_secret = std::env::var("JWT_SECRET_KEY").context("JWT_SECRET_KEY must be set")?;

        let redis_url = std::env::var("REDIS_URL").ok().filter(|u| !u.trim().is_empty());
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());

        let allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173,http://localhost:8000".to_string())
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        // Also the webhook signing key; there is no usable default.
        let paystack_secret_key = required_secret("PAYSTACK_SECRET_KEY", std::env::var("PAYSTACK_SECRET_KEY").ok())?;
        let payment_callback_url = std::env::var("PAYMENT_CALLBACK_URL")
            .unwrap_or_else(|_| "http://localhost:5173/payments/callback".to_string());
        let active_payment_provider = std::env::var("PAYMENT_PROVIDER")
            .unwrap_or_else(|_| "paystack".to_string());

        Ok(Config {
            database_url,
            jwt_secret,
            port: env_or("PORT", 8000)?,
            redis_url,
            log_level,
            allowed_origins,
            change_request_expiry_hours: env_or("CHANGE_REQUEST_EXPIRY_HOURS", CHANGE_REQUEST_EXPIRY_HOURS)?,
            extension_expiry_hours: env_or("EXTENSION_EXPIRY_HOURS", EXTENSION_REQUEST_EXPIRY_HOURS)?,
            escalation_sweep_interval_secs: env_or("ESCALATION_SWEEP_INTERVAL_SECS", 900)?,
            min_job_price: env_or("MIN_JOB_PRICE", BigDecimal::from(5_000))?,
            commission_flat_fee: env_or("COMMISSION_FLAT_FEE", BigDecimal::from(1_000))?,
            commission_flat_fee_threshold: env_or("COMMISSION_FLAT_FEE_THRESHOLD", BigDecimal::from(8_000))?,
            paystack_secret_key,
            payment_callback_url,
            active_payment_provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_secret_has_no_fallback() {
        assert!(required_secret("PAYSTACK_SECRET_KEY", None).is_err());
        assert!(required_secret("PAYSTACK_SECRET_KEY", Some("   ".to_string())).is_err());
        assert_eq!(
            required_secret("PAYSTACK_SECRET_KEY", Some(" sk_live_abc ".to_string())).unwrap(),
            "sk_live_abc"
        );
    }
}
