//! Configuration loaded from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address
    pub bind: SocketAddr,

    /// Agent handle stripped from mention text (without `@`)
    pub agent_handle: String,

    /// SQLite file backing cache/quota/confirmation state. `None` keeps state in memory.
    pub database_path: Option<PathBuf>,

    pub cache: CacheConfig,
    pub quota: QuotaConfig,
    pub payment: PaymentConfig,

    /// How long a token proposal waits for a yes/no
    pub confirmation_timeout: Duration,

    /// OpenRouter key; enables the LLM-backed collaborators
    pub openrouter_api_key: Option<String>,

    /// Model used for analysis and token metadata
    pub analysis_model: String,

    /// Wallet service used for balance/allowance/transfer
    pub ledger_url: Option<String>,

    /// Token deployment service
    pub token_issuer_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub capacity: usize,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            capacity: 10_000,
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub free_uses: u32,
    /// Most recent history entries kept per user
    pub history_limit: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_uses: 5,
            history_limit: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Price of one paid matching analysis, in the ledger's smallest unit
    pub matching_cost: u128,
    /// Address that receives payments and must hold the allowance
    pub spender: String,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            matching_cost: 1_000_000_000_000_000_000,
            spender: "treasury".to_string(),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(1000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            agent_handle: "agent".to_string(),
            database_path: None,
            cache: CacheConfig::default(),
            quota: QuotaConfig::default(),
            payment: PaymentConfig::default(),
            confirmation_timeout: Duration::from_secs(5 * 60),
            openrouter_api_key: None,
            analysis_model: "openai/gpt-4o-mini".to_string(),
            ledger_url: None,
            token_issuer_url: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(v) = get("MENTION_GATE_BIND") {
            config.bind = parse("MENTION_GATE_BIND", &v)?;
        }
        if let Some(v) = get("AGENT_HANDLE") {
            config.agent_handle = v.trim_start_matches('@').to_lowercase();
        }
        config.database_path = get("DATABASE_PATH").map(PathBuf::from);

        if let Some(v) = get("FREE_USES_PER_USER") {
            config.quota.free_uses = parse("FREE_USES_PER_USER", &v)?;
        }
        if let Some(v) = get("CACHE_TTL_SECS") {
            config.cache.ttl = Duration::from_secs(parse("CACHE_TTL_SECS", &v)?);
        }
        if let Some(v) = get("CACHE_CAPACITY") {
            config.cache.capacity = parse("CACHE_CAPACITY", &v)?;
        }
        if let Some(v) = get("CACHE_SWEEP_INTERVAL_SECS") {
            config.cache.sweep_interval =
                Duration::from_secs(parse("CACHE_SWEEP_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = get("CONFIRMATION_TIMEOUT_SECS") {
            config.confirmation_timeout =
                Duration::from_secs(parse("CONFIRMATION_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("MATCHING_COST") {
            config.payment.matching_cost = parse("MATCHING_COST", &v)?;
        }
        if let Some(v) = get("PAYMENT_SPENDER") {
            config.payment.spender = v;
        }
        if let Some(v) = get("PAYMENT_RETRY_ATTEMPTS") {
            config.payment.retry_attempts = parse("PAYMENT_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("PAYMENT_RETRY_BACKOFF_MS") {
            config.payment.retry_backoff =
                Duration::from_millis(parse("PAYMENT_RETRY_BACKOFF_MS", &v)?);
        }

        config.openrouter_api_key = get("OPENROUTER_API_KEY");
        if let Some(v) = get("ANALYSIS_MODEL") {
            config.analysis_model = v;
        }
        config.ledger_url = get("LEDGER_URL");
        config.token_issuer_url = get("TOKEN_ISSUER_URL");

        Ok(config)
    }
}

fn parse<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.quota.free_uses, 5);
        assert_eq!(config.cache.ttl, Duration::from_secs(86_400));
        assert_eq!(config.confirmation_timeout, Duration::from_secs(300));
        assert_eq!(config.payment.retry_attempts, 3);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("AGENT_HANDLE", "@PersonaBot"),
            ("FREE_USES_PER_USER", "2"),
            ("CACHE_CAPACITY", "50"),
            ("PAYMENT_RETRY_BACKOFF_MS", "0"),
            ("DATABASE_PATH", "/tmp/gate.db"),
        ]))
        .unwrap();
        assert_eq!(config.agent_handle, "personabot");
        assert_eq!(config.quota.free_uses, 2);
        assert_eq!(config.cache.capacity, 50);
        assert_eq!(config.payment.retry_backoff, Duration::ZERO);
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/gate.db")));
    }

    #[test]
    fn test_invalid_number() {
        let err = Config::from_lookup(lookup(&[("CACHE_TTL_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "CACHE_TTL_SECS", .. }));
    }

    #[test]
    fn test_blank_values_ignored() {
        let config = Config::from_lookup(lookup(&[("OPENROUTER_API_KEY", "  ")])).unwrap();
        assert!(config.openrouter_api_key.is_none());
    }
}
