use anyhow::{anyhow, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub http_port: u16,
    pub company_id: i64,
    pub altegio_api_base_url: String,
    pub altegio_partner_token: String,
    pub altegio_user_token: String,
    pub webhook_secret: String,
    pub slot_cache_ttl: Duration,
    pub session_expiry: Duration,
    pub commit_max_attempts: u32,
    pub retry_base_delay: Duration,
    /// In-call retry budget for individual HTTP requests, as opposed to the
    /// commit-level attempt budget above.
    pub remote_retry_max_attempts: u32,
    pub remote_retry_base_delay: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let partner_token = require_var("ALTEGIO_PARTNER_TOKEN")?;
        let user_token = require_var("ALTEGIO_USER_TOKEN")?;
        let webhook_secret = require_var("WEBHOOK_SECRET")?;

        let company_id = require_var("ALTEGIO_COMPANY_ID")?
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid ALTEGIO_COMPANY_ID"))?;

        let database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "sqlite:./data/altegio_bot.db".to_string());

        let api_base_url = env::var("ALTEGIO_API_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://api.alteg.io/api/v1".to_string());

        let http_port = env::var("HTTP_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid HTTP_PORT"))?;

        let slot_cache_ttl = parse_secs("SLOT_CACHE_TTL_SECS", 120)?;
        let session_expiry = parse_secs("SESSION_EXPIRY_SECS", 1800)?;
        let retry_base_delay = parse_millis("COMMIT_RETRY_BASE_DELAY_MS", 2000)?;
        let remote_retry_base_delay = parse_millis("ALTEGIO_RETRY_BASE_DELAY_MS", 300)?;

        let commit_max_attempts = env::var("COMMIT_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid COMMIT_MAX_ATTEMPTS"))?;

        let remote_retry_max_attempts = env::var("ALTEGIO_RETRY_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "2".to_string())
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid ALTEGIO_RETRY_MAX_ATTEMPTS"))?;

        Ok(Config {
            database_url,
            http_port,
            company_id,
            altegio_api_base_url: api_base_url,
            altegio_partner_token: partner_token,
            altegio_user_token: user_token,
            webhook_secret,
            slot_cache_ttl,
            session_expiry,
            commit_max_attempts,
            retry_base_delay,
            remote_retry_max_attempts,
            remote_retry_base_delay,
        })
    }
}

fn require_var(name: &str) -> Result<String> {
    let value = env::var(name).map_err(|_| anyhow!("{} must be set", name))?;
    if value.trim().is_empty() {
        return Err(anyhow!("{} must be set", name));
    }
    Ok(value)
}

fn parse_secs(name: &str, default_secs: u64) -> Result<Duration> {
    let raw = env::var(name).unwrap_or_else(|_| default_secs.to_string());
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid {}", name))?;
    Ok(Duration::from_secs(secs))
}

fn parse_millis(name: &str, default_ms: u64) -> Result<Duration> {
    let raw = env::var(name).unwrap_or_else(|_| default_ms.to_string());
    let ms: u64 = raw
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid {}", name))?;
    Ok(Duration::from_millis(ms))
}
