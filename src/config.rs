//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default Bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Relay configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bot token used for every Bot API call.
    pub bot_token: SecretString,
    /// Bot API base URL (overridable for tests and local proxies).
    pub api_base: String,
    /// Path to the libSQL database file.
    pub db_path: PathBuf,
    /// Forwarding ticker interval. `None` disables timed cycles.
    pub forward_interval: Option<Duration>,
    pub delivery_timeout: Duration,
    /// How long a pending tagging decision stays valid.
    pub session_ttl: Duration,
    /// Maximum subscriptions processed at once by `run_all`.
    pub max_concurrent_cycles: usize,
    /// User ids seeded as admin operators on startup.
    pub admin_ids: Vec<i64>,
    /// Directory for the rolling log file. `None` logs to stdout only.
    pub log_dir: Option<PathBuf>,
}

impl RelayConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bot_token = lookup("TELEGRAM_BOT_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()))?;

        let api_base = lookup("TELEGRAM_API_BASE")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let db_path = lookup("TAG_RELAY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/tag-relay.db"));

        let forward_secs: u64 = parse_or(&lookup, "TAG_RELAY_FORWARD_INTERVAL_SECS", 300)?;
        let timeout_secs: u64 = parse_or(&lookup, "TAG_RELAY_DELIVERY_TIMEOUT_SECS", 30)?;
        let ttl_secs: u64 = parse_or(&lookup, "TAG_RELAY_SESSION_TTL_SECS", 3600)?;
        let max_concurrent_cycles: usize = parse_or(&lookup, "TAG_RELAY_MAX_CONCURRENT_CYCLES", 4)?;

        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TAG_RELAY_DELIVERY_TIMEOUT_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }

        let admin_ids = lookup("TAG_RELAY_ADMIN_IDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i64>().map_err(|e| ConfigError::InvalidValue {
                    key: "TAG_RELAY_ADMIN_IDS".into(),
                    message: format!("{s:?}: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let log_dir = match lookup("TAG_RELAY_LOG_DIR") {
            Some(dir) if dir.trim().is_empty() => None,
            Some(dir) => Some(PathBuf::from(dir)),
            None => Some(PathBuf::from("./logs")),
        };

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            api_base,
            db_path,
            forward_interval: (forward_secs > 0).then(|| Duration::from_secs(forward_secs)),
            delivery_timeout: Duration::from_secs(timeout_secs),
            session_ttl: Duration::from_secs(ttl_secs),
            max_concurrent_cycles: max_concurrent_cycles.max(1),
            admin_ids,
            log_dir,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}
