//! Layered configuration for the `taskwire-server` and `taskwire-worker`
//! binaries: built-in defaults, overlaid by an optional TOML file, overlaid
//! by `TASKWIRE__`-prefixed environment variables, overlaid by CLI flags
//! parsed by each binary's own `clap::Parser`.
//!
//! Grounded on `lakekeeper-bin/src/config.rs`'s
//! `Serialized::defaults(...).merge(Env::prefixed(...).split("__"))` shape,
//! generalized to also accept an optional TOML file between the two (the
//! teacher's `ferrex-config` precedent for a config file, without its
//! interactive init-wizard machinery, which this workspace has no use for).

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the optional TOML config file.
pub const CONFIG_PATH_ENV: &str = "TASKWIRE_CONFIG";
const ENV_PREFIX: &str = "TASKWIRE__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Figment(#[from] figment::Error),

    #[error("invalid time zone {0:?}: not found in the IANA database")]
    UnknownTimeZone(String),
}

/// Redis connection settings, shared by the store adapter and the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// `taskwire-server`'s bind address and CORS policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `true` gives a dev-mode `CorsLayer::permissive()`; production
    /// deployments should set this `false` and configure an explicit
    /// allow-list in front of the service instead (this crate does not
    /// model one — see DESIGN.md).
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_permissive: true,
        }
    }
}

/// `taskwire-worker`'s pool size and polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BrokerConfig {
    pub worker_count: usize,
    #[serde(with = "humantime_serde")]
    pub poll_timeout: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub reap_interval: std::time::Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            worker_count: 4,
            poll_timeout: std::time::Duration::from_secs(1),
            reap_interval: std::time::Duration::from_millis(500),
        }
    }
}

/// `tracing_subscriber::EnvFilter` directive, resolved at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "taskwire_server=debug,taskwire_broker=debug,taskwire_core=debug,tower_http=debug"
                .to_string(),
        }
    }
}

/// The IANA zone cron schedules are evaluated in; `eta` is always stored and
/// exchanged as UTC (SPEC_FULL.md §9's "the two conversions must commute").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct ScheduleConfig {
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl AppConfig {
    /// Resolves `schedule.timezone` (defaulting to `"UTC"` for an empty
    /// string) against the IANA database.
    pub fn timezone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        let name = if self.schedule.timezone.is_empty() {
            "UTC"
        } else {
            &self.schedule.timezone
        };
        name.parse()
            .map_err(|_| ConfigError::UnknownTimeZone(name.to_string()))
    }
}

/// Loads `.env` (if present, ignored otherwise), then layers: built-in
/// defaults -> an optional TOML file (`--config`/`TASKWIRE_CONFIG`, silently
/// skipped if absent) -> `TASKWIRE__SECTION__FIELD`-style environment
/// variables. Each binary merges its own CLI flags on top via
/// [`merge_cli`] after calling this.
pub fn load(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let _ = dotenvy::dotenv();

    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    let path = config_path
        .map(PathBuf::from)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));
    if let Some(path) = path {
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    Ok(figment.extract()?)
}

/// Merges a CLI-sourced overlay (typically `Serialized::defaults(cli_args)`
/// built from `Option` fields so only explicitly-passed flags are present)
/// on top of an already-loaded config, giving flags the highest precedence.
pub fn merge_cli<T: Serialize>(base: AppConfig, overlay: T) -> Result<AppConfig, ConfigError> {
    let figment = Figment::from(Serialized::defaults(base)).merge(Serialized::defaults(overlay));
    Ok(figment.extract()?)
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_file_or_env() {
        let config = load(None).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.broker.worker_count, 4);
        assert_eq!(config.timezone().unwrap(), chrono_tz::UTC);
    }

    #[test]
    fn env_overrides_defaults() {
        // SAFETY: test-only, no other thread touches these vars concurrently
        // within this process (figment env tests follow the same pattern).
        unsafe {
            std::env::set_var("TASKWIRE__SERVER__PORT", "9999");
            std::env::set_var("TASKWIRE__REDIS__URL", "redis://example.test:6390");
        }
        let config = load(None).unwrap();
        unsafe {
            std::env::remove_var("TASKWIRE__SERVER__PORT");
            std::env::remove_var("TASKWIRE__REDIS__URL");
        }
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.redis.url, "redis://example.test:6390");
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let mut config = AppConfig::default();
        config.schedule.timezone = "Not/AZone".to_string();
        assert!(matches!(config.timezone(), Err(ConfigError::UnknownTimeZone(_))));
    }
}
