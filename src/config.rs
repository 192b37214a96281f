use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Runtime settings, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Sleep between lock polling attempts.
    pub lock_backoff: Duration,
    /// Budget for one locked operation or progress scan.
    pub operation_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/annotations"),
            lock_backoff: Duration::from_millis(100),
            operation_timeout: Duration::from_millis(5000),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let data_dir = dotenv::var("ANNOTATOR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let lock_backoff = millis_var("ANNOTATOR_LOCK_BACKOFF_MS")?.unwrap_or(defaults.lock_backoff);
        let operation_timeout =
            millis_var("ANNOTATOR_OPERATION_TIMEOUT_MS")?.unwrap_or(defaults.operation_timeout);

        Ok(Self {
            data_dir,
            lock_backoff,
            operation_timeout,
        })
    }
}

fn millis_var(name: &str) -> Result<Option<Duration>> {
    match dotenv::var(name).ok().filter(|v| !v.trim().is_empty()) {
        Some(raw) => {
            let ms: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of milliseconds, got {:?}", name, raw))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        None => Ok(None),
    }
}
