//! HTTP server settings, resolved once at startup alongside `CoreConfig`.

use axum::http::{HeaderValue, Method};
use filehub_core::{ConfigError, ConfigResult};
use std::time::Duration;
use tower_http::cors::CorsLayer;

pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_JWT_EXPIRES_IN_HOURS: u64 = 24;
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60 * 60;

#[derive(Clone)]
pub struct RestConfig {
    pub server_addr: String,
    pub allowed_origins: Vec<String>,
    pub jwt_secret: String,
    pub jwt_expiry: Duration,
    /// `None` disables the background reconciliation loop.
    pub reconcile_interval: Option<Duration>,
}

impl std::fmt::Debug for RestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConfig")
            .field("server_addr", &self.server_addr)
            .field("allowed_origins", &self.allowed_origins)
            .field("jwt_expiry", &self.jwt_expiry)
            .field("reconcile_interval", &self.reconcile_interval)
            .finish_non_exhaustive()
    }
}

impl RestConfig {
    /// Reads `SERVER_ADDR`, `ALLOWED_ORIGINS`, `JWT_SECRET`, `JWT_EXPIRES_IN_HOURS` and
    /// `RECONCILE_INTERVAL_SECS` from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `JWT_SECRET` is required; every other key has a default.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let server_addr = value("SERVER_ADDR").unwrap_or_else(|| DEFAULT_SERVER_ADDR.into());

        let allowed_origins = value("ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGIN.into())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let jwt_secret = value("JWT_SECRET")
            .ok_or_else(|| ConfigError::Invalid("JWT_SECRET must be set".into()))?;

        let hours = parse_u64("JWT_EXPIRES_IN_HOURS", value("JWT_EXPIRES_IN_HOURS"))?
            .unwrap_or(DEFAULT_JWT_EXPIRES_IN_HOURS);
        let jwt_expiry = Duration::from_secs(hours.saturating_mul(60 * 60));

        let interval = parse_u64("RECONCILE_INTERVAL_SECS", value("RECONCILE_INTERVAL_SECS"))?
            .unwrap_or(DEFAULT_RECONCILE_INTERVAL_SECS);
        let reconcile_interval = (interval > 0).then(|| Duration::from_secs(interval));

        Ok(Self {
            server_addr,
            allowed_origins,
            jwt_secret,
            jwt_expiry,
            reconcile_interval,
        })
    }

    /// CORS policy admitting exactly the configured origins.
    pub fn cors_layer(&self) -> ConfigResult<CorsLayer> {
        let origins = self
            .allowed_origins
            .iter()
            .map(|origin| {
                origin.parse::<HeaderValue>().map_err(|e| ConfigError::InvalidValue {
                    key: "ALLOWED_ORIGINS".into(),
                    value: origin.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ]))
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
