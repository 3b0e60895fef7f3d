use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::NaiveDate;

use crate::blob::BlobStore;
use crate::cache::DEFAULT_TTL;

pub const DEFAULT_ECRI_BUCKET: &str = "rev-mgt";
pub const DEFAULT_ECRI_KEY: &str = "ecri/master_ecris.csv";

/// Runtime settings read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub blob_root: Option<PathBuf>,
    pub blob_endpoint: Option<String>,
    pub ecri_bucket: String,
    pub ecri_key: String,
    pub cache_ttl: Duration,
    pub series_start: NaiveDate,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let db_max_connections = match non_empty("DB_MAX_CONNECTIONS") {
            Some(value) => value
                .parse()
                .with_context(|| format!("DB_MAX_CONNECTIONS must be a positive integer, got {value:?}"))?,
            None => 5,
        };
        let cache_ttl = match non_empty("CACHE_TTL_SECS") {
            Some(value) => Duration::from_secs(
                value
                    .parse()
                    .with_context(|| format!("CACHE_TTL_SECS must be whole seconds, got {value:?}"))?,
            ),
            None => DEFAULT_TTL,
        };
        let series_start = match non_empty("SERIES_START") {
            Some(value) => NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                .with_context(|| format!("SERIES_START must be YYYY-MM-DD, got {value:?}"))?,
            None => NaiveDate::from_ymd_opt(2019, 5, 31).context("invalid date")?,
        };

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            db_max_connections,
            blob_root: non_empty("BLOB_ROOT").map(PathBuf::from),
            blob_endpoint: non_empty("BLOB_ENDPOINT"),
            ecri_bucket: non_empty("ECRI_BUCKET").unwrap_or_else(|| DEFAULT_ECRI_BUCKET.to_string()),
            ecri_key: non_empty("ECRI_KEY").unwrap_or_else(|| DEFAULT_ECRI_KEY.to_string()),
            cache_ttl,
            series_start,
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }

    /// A local root wins over an HTTP endpoint when both are set.
    pub fn blob_store(&self) -> anyhow::Result<BlobStore> {
        match (&self.blob_root, &self.blob_endpoint) {
            (Some(root), _) => Ok(BlobStore::local(root)),
            (None, Some(endpoint)) => Ok(BlobStore::http(endpoint)),
            (None, None) => bail!("set BLOB_ROOT or BLOB_ENDPOINT to locate the ECRI files"),
        }
    }
}
