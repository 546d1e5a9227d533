//! Configuration module for sitepulse.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Where the probes are sent from. Stamped on every stored ping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorLocation {
    pub location: String,
    pub region_code: String,
}

impl Default for MonitorLocation {
    fn default() -> Self {
        Self {
            location: "Unknown".to_string(),
            region_code: "XX".to_string(),
        }
    }
}

/// Retry settings for opening the database at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 9999)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "sitepulse.db")
    pub db_path: String,
    /// Default log level when `RUST_LOG` is unset (default: "info")
    pub log_level: String,
    /// Hard deadline for a single probe (default: 10s)
    pub probe_timeout: Duration,
    pub location: MonitorLocation,
    /// Upper bound on probe pipelines running at once (default: 10)
    pub max_concurrent_pings: usize,
    pub db_retry: RetryPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 9999,
            db_path: "sitepulse.db".to_string(),
            log_level: "info".to_string(),
            probe_timeout: Duration::from_millis(10_000),
            location: MonitorLocation::default(),
            max_concurrent_pings: 10,
            db_retry: RetryPolicy::default(),
        }
    }
}

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "fatal"];

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT`: HTTP port (default: 9999)
    /// - `DATABASE_PATH`: Database file path (default: "sitepulse.db")
    /// - `LOG_LEVEL`: one of trace/debug/info/warn/error/fatal (default: info)
    /// - `PING_TIMEOUT_MS`: probe deadline in milliseconds (default: 10000)
    /// - `MONITORING_LOCATION`: location tag for pings (default: "Unknown")
    /// - `MONITORING_REGION_CODE`: region tag for pings (default: "XX")
    /// - `MAX_CONCURRENT_PINGS`: concurrent pipeline bound (default: 10)
    /// - `DB_RETRY_ATTEMPTS`: database open attempts (default: 3)
    /// - `DB_RETRY_DELAY_MS`: delay between open attempts (default: 1000)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Values that fail to parse keep their default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = lookup("PORT").and_then(|s| s.trim().parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("DATABASE_PATH").filter(|s| !s.is_empty()) {
            cfg.db_path = db_path;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            let level = level.trim().to_ascii_lowercase();
            if LOG_LEVELS.contains(&level.as_str()) {
                // tracing has no fatal level
                cfg.log_level = if level == "fatal" { "error".to_string() } else { level };
            }
        }

        if let Some(ms) = lookup("PING_TIMEOUT_MS").and_then(|s| s.trim().parse::<u64>().ok()) {
            if ms > 0 {
                cfg.probe_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(location) = lookup("MONITORING_LOCATION") {
            cfg.location.location = location;
        }

        if let Some(region_code) = lookup("MONITORING_REGION_CODE") {
            cfg.location.region_code = region_code;
        }

        if let Some(max) = lookup("MAX_CONCURRENT_PINGS").and_then(|s| s.trim().parse::<usize>().ok()) {
            if max > 0 && max <= Semaphore::MAX_PERMITS {
                cfg.max_concurrent_pings = max;
            }
        }

        if let Some(attempts) = lookup("DB_RETRY_ATTEMPTS").and_then(|s| s.trim().parse().ok()) {
            cfg.db_retry.attempts = attempts;
        }

        if let Some(ms) = lookup("DB_RETRY_DELAY_MS").and_then(|s| s.trim().parse().ok()) {
            cfg.db_retry.delay = Duration::from_millis(ms);
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 9999);
        assert_eq!(cfg.db_path, "sitepulse.db");
        assert_eq!(cfg.probe_timeout, Duration::from_millis(10_000));
        assert_eq!(cfg.location.location, "Unknown");
        assert_eq!(cfg.location.region_code, "XX");
        assert_eq!(cfg.max_concurrent_pings, 10);
        assert_eq!(cfg.db_retry.attempts, 3);
    }

    #[test]
    fn test_lookup_overrides() {
        let cfg = ServerConfig::from_lookup(lookup_from(&[
            ("PORT", "8081"),
            ("DATABASE_PATH", "/tmp/pulse.db"),
            ("PING_TIMEOUT_MS", "2500"),
            ("MONITORING_LOCATION", "Singapore"),
            ("MONITORING_REGION_CODE", "SG"),
            ("MAX_CONCURRENT_PINGS", "4"),
            ("DB_RETRY_ATTEMPTS", "5"),
            ("DB_RETRY_DELAY_MS", "250"),
            ("LOG_LEVEL", "DEBUG"),
        ]));

        assert_eq!(cfg.http_port, 8081);
        assert_eq!(cfg.db_path, "/tmp/pulse.db");
        assert_eq!(cfg.probe_timeout, Duration::from_millis(2500));
        assert_eq!(
            cfg.location,
            MonitorLocation {
                location: "Singapore".to_string(),
                region_code: "SG".to_string(),
            }
        );
        assert_eq!(cfg.max_concurrent_pings, 4);
        assert_eq!(cfg.db_retry.attempts, 5);
        assert_eq!(cfg.db_retry.delay, Duration::from_millis(250));
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let cfg = ServerConfig::from_lookup(lookup_from(&[
            ("PORT", "not-a-port"),
            ("PING_TIMEOUT_MS", "0"),
            ("MAX_CONCURRENT_PINGS", "-3"),
            ("LOG_LEVEL", "verbose"),
        ]));

        assert_eq!(cfg.http_port, 9999);
        assert_eq!(cfg.probe_timeout, Duration::from_millis(10_000));
        assert_eq!(cfg.max_concurrent_pings, 10);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn test_oversized_concurrency_keeps_default() {
        let too_many = usize::MAX.to_string();
        let cfg = ServerConfig::from_lookup(lookup_from(&[("MAX_CONCURRENT_PINGS", too_many.as_str())]));
        assert_eq!(cfg.max_concurrent_pings, 10);

        let at_limit = Semaphore::MAX_PERMITS.to_string();
        let cfg = ServerConfig::from_lookup(lookup_from(&[("MAX_CONCURRENT_PINGS", at_limit.as_str())]));
        assert_eq!(cfg.max_concurrent_pings, Semaphore::MAX_PERMITS);
    }

    #[test]
    fn test_fatal_maps_to_error() {
        let cfg = ServerConfig::from_lookup(lookup_from(&[("LOG_LEVEL", "fatal")]));
        assert_eq!(cfg.log_level, "error");
    }
}
