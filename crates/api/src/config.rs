//! Application configuration loaded from environment variables.

use std::time::Duration;

use checkout::{CartConfig, CheckoutConfig, LockConfig, ServiceConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs the in-memory backend
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `STOCK_LOCK_TTL_SECS` (default: `10`), `CART_LOCK_TTL_SECS` (default: `8`)
/// - `LOCK_ACQUIRE_TIMEOUT_MS` (default: `2000`), `LOCK_RETRY_INTERVAL_MS` (default: `50`)
/// - `CART_CACHE_TTL_SECS`: `0` keeps cached carts until rewritten (default: `0`)
/// - `CHECKOUT_TIMEOUT_SECS` (default: `30`)
/// - `PAYMENT_HANDLER_TIMEOUT_SECS` (default: `30`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub stock_lock_ttl: Duration,
    pub cart_lock_ttl: Duration,
    pub lock_acquire_timeout: Duration,
    pub lock_retry_interval: Duration,
    pub cart_cache_ttl: Option<Duration>,
    pub checkout_timeout: Duration,
    pub payment_handler_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup. Unparseable values
    /// fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let cart_cache_secs = number("CART_CACHE_TTL_SECS", 0);

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            stock_lock_ttl: Duration::from_secs(number("STOCK_LOCK_TTL_SECS", 10)),
            cart_lock_ttl: Duration::from_secs(number("CART_LOCK_TTL_SECS", 8)),
            lock_acquire_timeout: Duration::from_millis(number("LOCK_ACQUIRE_TIMEOUT_MS", 2000)),
            lock_retry_interval: Duration::from_millis(number("LOCK_RETRY_INTERVAL_MS", 50)),
            cart_cache_ttl: (cart_cache_secs > 0).then(|| Duration::from_secs(cart_cache_secs)),
            checkout_timeout: Duration::from_secs(number("CHECKOUT_TIMEOUT_SECS", 30)),
            payment_handler_timeout: Duration::from_secs(number("PAYMENT_HANDLER_TIMEOUT_SECS", 30)),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the service settings from this configuration.
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            lock: LockConfig {
                acquire_timeout: self.lock_acquire_timeout,
                retry_interval: self.lock_retry_interval,
            },
            cart: CartConfig {
                lock_ttl: self.cart_lock_ttl,
                ..CartConfig::default()
            },
            cart_cache_ttl: self.cart_cache_ttl,
            checkout: CheckoutConfig {
                stock_lock_ttl: self.stock_lock_ttl,
                ..CheckoutConfig::default()
            },
            payment_handler_timeout: self.payment_handler_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            database_max_connections: 10,
            stock_lock_ttl: Duration::from_secs(10),
            cart_lock_ttl: Duration::from_secs(8),
            lock_acquire_timeout: Duration::from_millis(2000),
            lock_retry_interval: Duration::from_millis(50),
            cart_cache_ttl: None,
            checkout_timeout: Duration::from_secs(30),
            payment_handler_timeout: Duration::from_secs(30),
        }
    }
}
