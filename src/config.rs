//! Migrator configuration
//!
//! [`MigratorConfig`] can be built in code or loaded with
//! [`MigratorConfig::load()`] from `config/lockstep.toml` and `LOCKSTEP__MIGRATIONS__*`
//! environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Tracking table used when none is configured
pub const DEFAULT_TABLE_NAME: &str = "lockstep_migrations";

/// Lock wait used when none is configured
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const DEFAULT_CONFIG_FILE: &str = "config/lockstep.toml";
const ENV_PREFIX: &str = "LOCKSTEP";

/// Settings for a [`Migrator`](crate::Migrator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorConfig {
    /// Name of the tracking table
    pub table_name: String,
    /// How long `lock` may wait for another holder
    pub lock_timeout: Duration,
    /// Run mutating operations without the distributed lock
    pub skip_lock: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            skip_lock: false,
        }
    }
}

/// On-disk/env shape of the `[migrations]` section
#[derive(Debug, Deserialize, Default)]
struct RawMigrationsConfig {
    #[serde(default)]
    table_name: String,
    #[serde(default)]
    lock_timeout_seconds: u64,
    #[serde(default)]
    skip_lock: bool,
}

impl From<RawMigrationsConfig> for MigratorConfig {
    fn from(raw: RawMigrationsConfig) -> Self {
        MigratorConfig {
            table_name: raw.table_name,
            lock_timeout: Duration::from_secs(raw.lock_timeout_seconds),
            skip_lock: raw.skip_lock,
        }
        .normalized()
    }
}

impl MigratorConfig {
    /// Set the tracking table name
    #[must_use]
    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Set the lock wait
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Disable the distributed lock
    #[must_use]
    pub fn skip_lock(mut self, skip: bool) -> Self {
        self.skip_lock = skip;
        self
    }

    /// Replace an empty table name or a zero timeout with the defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.table_name.is_empty() {
            self.table_name = DEFAULT_TABLE_NAME.to_string();
        }
        if self.lock_timeout.is_zero() {
            self.lock_timeout = DEFAULT_LOCK_TIMEOUT;
        }
        self
    }

    /// Load from `config/lockstep.toml` (optional), then the environment.
    ///
    /// Environment variables use the `LOCKSTEP` prefix and `__` separator, e.g.
    /// `LOCKSTEP__MIGRATIONS__TABLE_NAME`. A missing `[migrations]` section
    /// yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if neither the file nor the environment can be read.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Same as [`load`](Self::load) with an explicit file path
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if neither the file nor the environment can be read,
    /// or if the `[migrations]` section has the wrong shape.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let env = || Environment::with_prefix(ENV_PREFIX).separator("__");

        let builder = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(env());

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                if path.exists() {
                    log::warn!(
                        "Failed to load config file {}, falling back to env: {}",
                        path.display(),
                        err
                    );
                }
                Config::builder().add_source(env()).build().map_err(|env_err| {
                    ConfigError::Message(format!(
                        "Failed to load configuration from file and env: {}, then env-only error: {}",
                        err, env_err
                    ))
                })?
            }
        };

        let raw = match settings.get::<RawMigrationsConfig>("migrations") {
            Ok(raw) => raw,
            Err(ConfigError::NotFound(_)) => RawMigrationsConfig::default(),
            Err(e) => {
                return Err(ConfigError::Message(format!(
                    "Migrations configuration could not be loaded from file or environment: {}",
                    e
                )))
            }
        };

        Ok(raw.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MigratorConfig::default();
        assert_eq!(config.table_name, "lockstep_migrations");
        assert_eq!(config.lock_timeout, Duration::from_secs(1800));
        assert!(!config.skip_lock);
    }

    #[test]
    fn test_normalized_fills_blanks_only() {
        let config = MigratorConfig::default()
            .table_name("")
            .lock_timeout(Duration::ZERO)
            .normalized();
        assert_eq!(config, MigratorConfig::default());

        let custom = MigratorConfig::default()
            .table_name("schema_history")
            .lock_timeout(Duration::from_secs(5))
            .skip_lock(true)
            .normalized();
        assert_eq!(custom.table_name, "schema_history");
        assert_eq!(custom.lock_timeout, Duration::from_secs(5));
        assert!(custom.skip_lock);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            "[migrations]\ntable_name = \"app_migrations\"\nlock_timeout_seconds = 90\nskip_lock = true"
        )
        .expect("write");

        let config = MigratorConfig::load_from(file.path()).expect("loads");
        assert_eq!(config.table_name, "app_migrations");
        assert_eq!(config.lock_timeout, Duration::from_secs(90));
        assert!(config.skip_lock);
    }

    #[test]
    fn test_load_from_file_without_section_uses_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(file, "[other]\nkey = 1").expect("write");

        let config = MigratorConfig::load_from(file.path()).expect("loads");
        assert_eq!(config.table_name, DEFAULT_TABLE_NAME);
        assert_eq!(config.lock_timeout, DEFAULT_LOCK_TIMEOUT);
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = MigratorConfig::load_from(dir.path().join("absent.toml")).expect("loads");
        assert_eq!(config.table_name, DEFAULT_TABLE_NAME);
    }
}
