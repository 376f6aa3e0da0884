use figment::{Figment, providers::{Env, Format, Toml}};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub rate_limit: RateLimitConfig,
    pub session: SessionConfig,
    pub csrf: CsrfConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window_seconds: u64,
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Sessions idle longer than this are invalidated by the reaper.
    pub idle_timeout_seconds: u64,
    /// Invalidated sessions stay visible for this long before removal.
    pub inactive_grace_seconds: u64,
    pub reap_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CsrfConfig {
    pub loopback_aliases: Vec<String>,
    /// Treat a token issued under one loopback alias as valid under all of
    /// them. This is a convenience for same-machine development clients and
    /// should be disabled in production.
    pub dev_loopback_aliasing: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 120,
            window_seconds: 60,
            cleanup_interval_seconds: 300,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: 86_400,
            inactive_grace_seconds: 300,
            reap_interval_seconds: 60,
        }
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            loopback_aliases: vec!["127.0.0.1".to_string(), "::1".to_string(), "localhost".to_string()],
            dev_loopback_aliasing: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            session: SessionConfig::default(),
            csrf: CsrfConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from multiple sources in priority order:
    /// 1. Authgate.toml (base configuration file)
    /// 2. Environment variables (prefixed with AUTHGATE_)
    pub fn load() -> Result<Self, figment::Error> {
        let figment = Figment::new()
            // Start with defaults
            .merge(Toml::string(&toml::to_string(&Config::default()).unwrap()).nested())
            // Layer on Authgate.toml if it exists
            .merge(Toml::file("Authgate.toml").nested())
            // Layer on environment variables (e.g., AUTHGATE_LOGGING_LEVEL)
            .merge(Env::prefixed("AUTHGATE_").split("_"));

        figment.extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let serialized = toml::to_string(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.rate_limit.limit, 120);
        assert_eq!(parsed.session.reap_interval_seconds, 60);
        assert!(parsed.csrf.dev_loopback_aliasing);
    }

    #[test]
    fn default_aliases_cover_both_ip_families() {
        let csrf = CsrfConfig::default();
        assert!(csrf.loopback_aliases.iter().any(|a| a == "127.0.0.1"));
        assert!(csrf.loopback_aliases.iter().any(|a| a == "::1"));
        assert!(csrf.loopback_aliases.iter().any(|a| a == "localhost"));
    }
}
