//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services by
//! value. Request handling never reads process-wide environment variables, which keeps
//! behaviour consistent across threads and lets tests build a config directly.

use crate::constants::{
    BYTES_PER_MB, DEFAULT_DATABASE_PATH, DEFAULT_MAX_UPLOAD_SIZE_MB, DEFAULT_OPERATION_TIMEOUT,
    DEFAULT_ORPHAN_GRACE, DEFAULT_UPLOAD_DIR,
};
use crate::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    upload_dir: PathBuf,
    database_path: PathBuf,
    max_upload_size: u64,
    operation_timeout: Duration,
    orphan_grace: Duration,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if:
    /// - `max_upload_size` is zero
    /// - `operation_timeout` is zero
    /// - `orphan_grace` does not exceed `operation_timeout`, which would let the sweep remove
    ///   a blob whose upload is still committing
    pub fn new(
        upload_dir: PathBuf,
        database_path: PathBuf,
        max_upload_size: u64,
        operation_timeout: Duration,
        orphan_grace: Duration,
    ) -> ConfigResult<Self> {
        if max_upload_size == 0 {
            return Err(ConfigError::Invalid(
                "max upload size must be greater than zero".into(),
            ));
        }
        if operation_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "operation timeout must be greater than zero".into(),
            ));
        }
        if orphan_grace <= operation_timeout {
            return Err(ConfigError::Invalid(format!(
                "orphan grace ({}s) must exceed the operation timeout ({}s)",
                orphan_grace.as_secs(),
                operation_timeout.as_secs()
            )));
        }

        Ok(Self {
            upload_dir,
            database_path,
            max_upload_size,
            operation_timeout,
            orphan_grace,
        })
    }

    /// Reads `UPLOAD_DIR`, `DATABASE_PATH`, `MAX_UPLOAD_SIZE_MB`, `OPERATION_TIMEOUT_SECS` and
    /// `ORPHAN_GRACE_SECS` from the process environment.
    ///
    /// Call this once from a binary's `main`.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Unset or blank keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let upload_dir = value("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR));
        let database_path = value("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH));

        let max_upload_mb = parse_u64("MAX_UPLOAD_SIZE_MB", value("MAX_UPLOAD_SIZE_MB"))?
            .unwrap_or(DEFAULT_MAX_UPLOAD_SIZE_MB);
        let max_upload_size = max_upload_mb.checked_mul(BYTES_PER_MB).ok_or_else(|| {
            ConfigError::InvalidValue {
                key: "MAX_UPLOAD_SIZE_MB".into(),
                value: max_upload_mb.to_string(),
                reason: "value is too large".into(),
            }
        })?;

        let operation_timeout =
            parse_u64("OPERATION_TIMEOUT_SECS", value("OPERATION_TIMEOUT_SECS"))?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_OPERATION_TIMEOUT);
        let orphan_grace = parse_u64("ORPHAN_GRACE_SECS", value("ORPHAN_GRACE_SECS"))?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_ORPHAN_GRACE);

        Self::new(
            upload_dir,
            database_path,
            max_upload_size,
            operation_timeout,
            orphan_grace,
        )
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// Maximum accepted payload, in bytes.
    pub fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    pub fn orphan_grace(&self) -> Duration {
        self.orphan_grace
    }
}

fn parse_u64(key: &str, value: Option<String>) -> ConfigResult<Option<u64>> {
    value
        .map(|v| {
            v.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: key.into(),
                value: v.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
