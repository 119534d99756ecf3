//! Service configuration, read from `BURNER_SMS_*` environment variables.

use std::time::Duration;

use crate::error::ConfigError;

/// Minimum lease duration in hours.
pub const MIN_LEASE_HOURS: u32 = 1;
/// Maximum lease duration in hours.
pub const MAX_LEASE_HOURS: u32 = 24;

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// HTTP/WS listen port.
    pub port: u16,
    /// Path to the libSQL database file.
    pub db_path: String,
    /// How often the expiry reaper scans for expired leases.
    pub reap_interval: Duration,
    /// How often the retention sweep deletes old messages.
    pub retention_interval: Duration,
    /// Messages older than this are deleted by the retention sweep.
    pub message_max_age: Duration,
    /// Expose the dev-only test-injection webhook route.
    pub dev_routes: bool,
    /// Static token seeds: `token:user[:admin]` entries.
    pub token_seeds: Vec<TokenSeed>,
    /// Phone numbers to provision on startup: `+E164:CC` entries.
    pub number_seeds: Vec<NumberSeed>,
}

/// A single `token:user[:admin]` credential seed.
#[derive(Debug, Clone)]
pub struct TokenSeed {
    pub token: String,
    pub user_id: String,
    pub is_admin: bool,
}

/// A single `+E164:CC` number seed.
#[derive(Debug, Clone)]
pub struct NumberSeed {
    pub phone_number: String,
    pub country_code: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: "./data/burner-sms.db".to_string(),
            reap_interval: Duration::from_secs(120),
            retention_interval: Duration::from_secs(600),
            message_max_age: Duration::from_secs(24 * 3600),
            dev_routes: false,
            token_seeds: Vec::new(),
            number_seeds: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Build a configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = parse_env("BURNER_SMS_PORT", defaults.port)?;
        let db_path =
            std::env::var("BURNER_SMS_DB_PATH").unwrap_or_else(|_| defaults.db_path.clone());
        let reap_secs = parse_env("BURNER_SMS_REAP_INTERVAL_SECS", 120u64)?;
        let retention_secs = parse_env("BURNER_SMS_RETENTION_INTERVAL_SECS", 600u64)?;
        let max_age_hours = parse_env("BURNER_SMS_MESSAGE_MAX_AGE_HOURS", 24u64)?;
        let dev_routes = std::env::var("BURNER_SMS_DEV_ROUTES")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let token_seeds = std::env::var("BURNER_SMS_TOKENS")
            .map(|raw| parse_token_seeds(&raw))
            .unwrap_or_else(|_| Ok(Vec::new()))?;

        let number_seeds = std::env::var("BURNER_SMS_SEED_NUMBERS")
            .map(|raw| parse_number_seeds(&raw))
            .unwrap_or_else(|_| Ok(Vec::new()))?;

        Ok(Self {
            port,
            db_path,
            reap_interval: Duration::from_secs(reap_secs),
            retention_interval: Duration::from_secs(retention_secs),
            message_max_age: Duration::from_secs(max_age_hours * 3600),
            dev_routes,
            token_seeds,
            number_seeds,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

/// Parse `token:user[:admin]` entries separated by commas.
fn parse_token_seeds(raw: &str) -> Result<Vec<TokenSeed>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let mut parts = entry.split(':');
            let token = parts.next().unwrap_or_default();
            let user_id = parts.next().unwrap_or_default();
            if token.is_empty() || user_id.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "BURNER_SMS_TOKENS".to_string(),
                    message: format!("expected token:user[:admin], got {entry:?}"),
                });
            }
            let is_admin = parts.next().map(|p| p == "admin").unwrap_or(false);
            Ok(TokenSeed {
                token: token.to_string(),
                user_id: user_id.to_string(),
                is_admin,
            })
        })
        .collect()
}

/// Parse `+E164:CC` entries separated by commas.
fn parse_number_seeds(raw: &str) -> Result<Vec<NumberSeed>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (number, country) =
                entry
                    .split_once(':')
                    .ok_or_else(|| ConfigError::InvalidValue {
                        key: "BURNER_SMS_SEED_NUMBERS".to_string(),
                        message: format!("expected +E164:CC, got {entry:?}"),
                    })?;
            Ok(NumberSeed {
                phone_number: number.to_string(),
                country_code: country.to_uppercase(),
            })
        })
        .collect()
}
