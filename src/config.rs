use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::upload::DEFAULT_MAX_UPLOAD_BYTES;

/// Process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Absent → in-memory store.
    pub database_url: Option<String>,
    pub blob_root: PathBuf,
    pub max_upload_bytes: usize,
    pub store_timeout: Duration,
    pub db_max_connections: u32,
    /// `None` disables the schedule; the startup pass always runs.
    pub reconcile_interval: Option<Duration>,
    pub users_file: Option<PathBuf>,
    pub frontend_url: Option<String>,
}

fn opt_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_env<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match opt_env(key) {
        Some(v) => v.trim().parse().with_context(|| format!("invalid {key}: {v:?}")),
        None => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let secs = |key, default| parsed_env::<u64>(key, default).map(Duration::from_secs);
        let reconcile = secs("RECONCILE_INTERVAL_SECS", 3600)?;
        Ok(Self {
            bind_addr: opt_env("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed_env("PORT", 8080)?,
            database_url: opt_env("DATABASE_URL"),
            blob_root: opt_env("BLOB_ROOT").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data/images")),
            max_upload_bytes: parsed_env("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            store_timeout: secs("STORE_TIMEOUT_SECS", 30)?,
            db_max_connections: parsed_env("DB_MAX_CONNECTIONS", 5)?,
            reconcile_interval: (!reconcile.is_zero()).then_some(reconcile),
            users_file: opt_env("USERS_FILE").map(PathBuf::from),
            frontend_url: opt_env("FRONTEND_URL"),
        })
    }
}
