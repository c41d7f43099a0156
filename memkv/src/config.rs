//! Database configuration.
//!
//! Configuration can be built in code, starting from [`Config::default`], or
//! loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `MEMKV_SYNC_POLICY`: `never`, `every_second` or `always`, or the numeric
//!   values 0, 1, 2 (default: `every_second`)
//! - `MEMKV_AUTO_SHRINK_PERCENTAGE`: growth over the last shrunk size, in
//!   percent, before an automatic shrink (default: `100`)
//! - `MEMKV_AUTO_SHRINK_MIN_SIZE`: minimum log size in bytes before an
//!   automatic shrink (default: 32MB)
//! - `MEMKV_AUTO_SHRINK_DISABLED`: `true` or `false` (default: `false`)

use crate::storage::DbError;

/// How often committed data is fsynced to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Leave flushing to the operating system.
    Never,
    /// Fsync once per second from the background thread.
    #[default]
    EverySecond,
    /// Fsync on every commit.
    Always,
}

impl TryFrom<i64> for SyncPolicy {
    type Error = DbError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Never),
            1 => Ok(Self::EverySecond),
            2 => Ok(Self::Always),
            _ => Err(DbError::InvalidSyncPolicy),
        }
    }
}

impl std::str::FromStr for SyncPolicy {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "every_second" | "everysecond" => Ok(Self::EverySecond),
            "always" => Ok(Self::Always),
            other => other
                .parse::<i64>()
                .map_err(|_| DbError::InvalidSyncPolicy)
                .and_then(Self::try_from),
        }
    }
}

/// Database configuration.
///
/// # Invariants
///
/// - An automatic shrink only happens when the log is larger than
///   `auto_shrink_min_size` and has grown by more than
///   `auto_shrink_percentage` percent since the last shrink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub sync_policy: SyncPolicy,
    pub auto_shrink_percentage: u64,
    pub auto_shrink_min_size: u64,
    pub auto_shrink_disabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_policy: SyncPolicy::EverySecond,
            auto_shrink_percentage: Self::DEFAULT_AUTO_SHRINK_PERCENTAGE,
            auto_shrink_min_size: Self::DEFAULT_AUTO_SHRINK_MIN_SIZE,
            auto_shrink_disabled: false,
        }
    }
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub const DEFAULT_AUTO_SHRINK_PERCENTAGE: u64 = 100;
    pub const DEFAULT_AUTO_SHRINK_MIN_SIZE: u64 = 32 * 1024 * 1024;

    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a value that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration using `lookup` to read variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let sync_policy = load("MEMKV_SYNC_POLICY", &lookup, defaults.sync_policy, |v| {
            v.parse::<SyncPolicy>().map_err(|e| e.to_string())
        })?;
        let auto_shrink_percentage = load(
            "MEMKV_AUTO_SHRINK_PERCENTAGE",
            &lookup,
            defaults.auto_shrink_percentage,
            |v| v.parse::<u64>().map_err(|_| format!("'{v}' is not a valid percentage")),
        )?;
        let auto_shrink_min_size = load(
            "MEMKV_AUTO_SHRINK_MIN_SIZE",
            &lookup,
            defaults.auto_shrink_min_size,
            |v| v.parse::<u64>().map_err(|_| format!("'{v}' is not a valid size in bytes")),
        )?;
        let auto_shrink_disabled = load(
            "MEMKV_AUTO_SHRINK_DISABLED",
            &lookup,
            defaults.auto_shrink_disabled,
            |v| v.parse::<bool>().map_err(|_| format!("'{v}' is not true or false")),
        )?;

        Ok(Self {
            sync_policy,
            auto_shrink_percentage,
            auto_shrink_min_size,
            auto_shrink_disabled,
        })
    }
}

fn load<T, F, P>(name: &str, lookup: &F, default: T, parse: P) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    P: FnOnce(&str) -> Result<T, String>,
{
    match lookup(name) {
        Some(value) => parse(&value).map_err(|message| ConfigError::InvalidValue {
            name: name.to_string(),
            message,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.sync_policy, SyncPolicy::EverySecond);
        assert_eq!(config.auto_shrink_percentage, 100);
        assert_eq!(config.auto_shrink_min_size, 32 * 1024 * 1024);
        assert!(!config.auto_shrink_disabled);
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).expect("load config");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_values_from_environment() {
        let config = Config::from_lookup(lookup_from(&[
            ("MEMKV_SYNC_POLICY", "always"),
            ("MEMKV_AUTO_SHRINK_PERCENTAGE", "50"),
            ("MEMKV_AUTO_SHRINK_MIN_SIZE", "1024"),
            ("MEMKV_AUTO_SHRINK_DISABLED", "true"),
        ]))
        .expect("load config");
        assert_eq!(config.sync_policy, SyncPolicy::Always);
        assert_eq!(config.auto_shrink_percentage, 50);
        assert_eq!(config.auto_shrink_min_size, 1024);
        assert!(config.auto_shrink_disabled);
    }

    #[test]
    fn test_invalid_value_reports_variable() {
        let err = Config::from_lookup(lookup_from(&[("MEMKV_AUTO_SHRINK_MIN_SIZE", "big")]))
            .expect_err("invalid size");
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                name: "MEMKV_AUTO_SHRINK_MIN_SIZE".to_string(),
                message: "'big' is not a valid size in bytes".to_string(),
            }
        );
    }

    #[test]
    fn test_sync_policy_parsing() {
        assert_eq!("never".parse::<SyncPolicy>().ok(), Some(SyncPolicy::Never));
        assert_eq!("2".parse::<SyncPolicy>().ok(), Some(SyncPolicy::Always));
        assert!(matches!(
            "7".parse::<SyncPolicy>(),
            Err(DbError::InvalidSyncPolicy)
        ));
        assert!(matches!(
            SyncPolicy::try_from(-1),
            Err(DbError::InvalidSyncPolicy)
        ));
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
