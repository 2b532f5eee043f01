//! Server configuration read from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use auctionhouse_bus::BusConfig;
use auctionhouse_core::retry::RetryPolicy;
use auctionhouse_outbox::DispatcherConfig;

use crate::error::AppError;

/// Everything the binary needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub search_database_url: String,
    /// Database holding the bus delivery log; defaults to `DATABASE_URL`.
    pub bus_database_url: String,
    pub host: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: usize,
    pub outbox_max_attempts: u32,
    pub outbox_retention: Duration,
    pub bus_workers: usize,
    pub bus_poll_interval: Duration,
    pub bus_max_deliveries: u32,
    /// OTLP collector endpoint; span export is off when unset.
    pub otlp_endpoint: Option<String>,
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key} is invalid ({raw}): {e}"))),
    }
}

impl AppConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required variable is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of a
    /// variable if it is set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required variable is missing or a value
    /// does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| AppError::Config("DATABASE_URL environment variable must be set".into()))?;
        let search_database_url = lookup("SEARCH_DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| database_url.clone());
        let bus_database_url = lookup("BUS_DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| database_url.clone());

        let config = Self {
            database_url,
            search_database_url,
            bus_database_url,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: parse_or(&lookup, "PORT", 3000)?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            outbox_poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "OUTBOX_POLL_INTERVAL_MS",
                500,
            )?),
            outbox_batch_size: parse_or(&lookup, "OUTBOX_BATCH_SIZE", 50)?,
            outbox_max_attempts: parse_or(&lookup, "OUTBOX_MAX_ATTEMPTS", 10)?,
            outbox_retention: Duration::from_secs(
                parse_or::<u64>(&lookup, "OUTBOX_RETENTION_HOURS", 168)?.saturating_mul(3600),
            ),
            bus_workers: parse_or(&lookup, "BUS_WORKERS", 4)?,
            bus_poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "BUS_POLL_INTERVAL_MS",
                200,
            )?),
            bus_max_deliveries: parse_or(&lookup, "BUS_MAX_DELIVERIES", 5)?,
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|e| !e.trim().is_empty()),
        };

        if config.outbox_batch_size == 0 {
            return Err(AppError::Config("OUTBOX_BATCH_SIZE must be at least 1".into()));
        }
        if config.bus_workers == 0 {
            return Err(AppError::Config("BUS_WORKERS must be at least 1".into()));
        }
        Ok(config)
    }

    /// The address to bind.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `HOST:PORT` is not a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, AppError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))
    }

    /// Dispatcher tuning derived from the outbox settings.
    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            batch_size: self.outbox_batch_size,
            poll_interval: self.outbox_poll_interval,
            retry: RetryPolicy {
                max_attempts: self.outbox_max_attempts,
                ..RetryPolicy::default()
            },
            retention: self.outbox_retention,
            ..DispatcherConfig::default()
        }
    }

    /// Bus tuning derived from the bus settings.
    #[must_use]
    pub fn bus_config(&self) -> BusConfig {
        let defaults = BusConfig::default();
        BusConfig {
            workers: self.bus_workers,
            poll_interval: self.bus_poll_interval,
            max_deliveries: self.bus_max_deliveries,
            redelivery: RetryPolicy {
                max_attempts: self.bus_max_deliveries,
                ..defaults.redelivery
            },
            ..defaults
        }
    }
}
