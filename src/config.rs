use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::limits::{MAX_SLOT_WIDTH_MS, MIN_SLOT_WIDTH_MS};
use crate::model::Ms;

const MINUTE_MS: Ms = 60_000;
const HOUR_MS: Ms = 60 * MINUTE_MS;

/// Business constants the lifecycle engine runs with.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Width of a conflict bucket. Two active appointments for the same
    /// doctor may not fall into the same bucket.
    pub slot_width_ms: Ms,
    /// Furthest ahead of "now" a create or reschedule may land (inclusive).
    pub max_lookahead_ms: Ms,
    /// Upper bound on slot-lock waits and WAL commits.
    pub store_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            slot_width_ms: 30 * MINUTE_MS,
            max_lookahead_ms: 7 * 24 * HOUR_MS,
            store_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_SLOT_WIDTH_MS..=MAX_SLOT_WIDTH_MS).contains(&self.slot_width_ms) {
            return Err(ConfigError::Invalid {
                key: "CLINICSLOT_SLOT_MINUTES",
                reason: "slot width must be between 1 minute and 24 hours".into(),
            });
        }
        if self.max_lookahead_ms <= 0 {
            return Err(ConfigError::Invalid {
                key: "CLINICSLOT_MAX_LOOKAHEAD_HOURS",
                reason: "lookahead must be positive".into(),
            });
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "CLINICSLOT_STORE_TIMEOUT_MS",
                reason: "store timeout must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Everything the server binary reads from `CLINICSLOT_*` variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub admin_passkey: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub roster_path: Option<PathBuf>,
    pub log_filter: String,
    pub engine: EngineConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, so tests need not touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = EngineConfig::default();
        let slot_minutes: Ms = parse_or(&lookup, "CLINICSLOT_SLOT_MINUTES", defaults.slot_width_ms / MINUTE_MS)?;
        let lookahead_hours: Ms =
            parse_or(&lookup, "CLINICSLOT_MAX_LOOKAHEAD_HOURS", defaults.max_lookahead_ms / HOUR_MS)?;
        let store_timeout_ms: u64 = parse_or(
            &lookup,
            "CLINICSLOT_STORE_TIMEOUT_MS",
            defaults.store_timeout.as_millis() as u64,
        )?;

        let engine = EngineConfig {
            slot_width_ms: slot_minutes.saturating_mul(MINUTE_MS),
            max_lookahead_ms: lookahead_hours.saturating_mul(HOUR_MS),
            store_timeout: Duration::from_millis(store_timeout_ms),
        };
        engine.validate()?;

        let metrics_port = match lookup("CLINICSLOT_METRICS_PORT") {
            Some(raw) => Some(parse_value("CLINICSLOT_METRICS_PORT", &raw)?),
            None => None,
        };

        Ok(Self {
            bind: lookup("CLINICSLOT_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "CLINICSLOT_PORT", 5433)?,
            data_dir: PathBuf::from(lookup("CLINICSLOT_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: lookup("CLINICSLOT_PASSWORD").unwrap_or_else(|| "clinicslot".into()),
            admin_passkey: lookup("CLINICSLOT_ADMIN_PASSKEY").unwrap_or_else(|| "111111".into()),
            max_connections: parse_or(&lookup, "CLINICSLOT_MAX_CONNECTIONS", 256)?,
            compact_threshold: parse_or(&lookup, "CLINICSLOT_COMPACT_THRESHOLD", 1000)?,
            metrics_port,
            tls_cert: lookup("CLINICSLOT_TLS_CERT"),
            tls_key: lookup("CLINICSLOT_TLS_KEY"),
            roster_path: lookup("CLINICSLOT_ROSTER").map(PathBuf::from),
            log_filter: lookup("CLINICSLOT_LOG").unwrap_or_else(|| "info".into()),
            engine,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("appointments.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        reason: format!("cannot parse {raw:?}"),
    })
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { key: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { key, reason } => write!(f, "invalid {key}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}
