use std::path::PathBuf;
use std::time::Duration;

use crate::error::QueueError;
use crate::types::Sampler;

/// Configuration for the invision queue.
///
/// Use [`QueueConfig::builder()`] for ergonomic construction,
/// [`QueueConfig::from_env()`] to read a `.env`-style deployment, or
/// [`QueueConfig::default()`] for sensible defaults (in-memory DB, no cooldown).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Path to the SQLite database file. `None` = in-memory database.
    pub db_path: Option<PathBuf>,

    /// How long the idle dispatch loop sleeps before re-checking the work list.
    /// Enqueues wake it immediately.
    pub poll_interval: Duration,

    /// Pause between two dispatches so the GPU can cool down (0 = none).
    pub cooldown: Duration,

    /// How often to ask the backend for progress during a generation.
    /// `None` disables progress updates.
    pub progress_interval: Option<Duration>,

    /// Sampler used when a Generate request doesn't name one.
    pub default_sampler: Sampler,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            poll_interval: Duration::from_secs(3),
            cooldown: Duration::from_secs(0),
            progress_interval: Some(Duration::from_secs(2)),
            default_sampler: Sampler::DpmPp2M,
        }
    }
}

impl QueueConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::default()
    }

    /// Build a config from the process environment, loading `.env` first if present.
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `INVISION_DB_PATH` | SQLite file (unset = in-memory) |
    /// | `INVISION_POLL_INTERVAL_MS` | idle poll interval |
    /// | `INVISION_COOLDOWN_MS` | pause between dispatches |
    /// | `INVISION_PROGRESS_INTERVAL_MS` | progress polling, `0` disables |
    /// | `INVISION_DEFAULT_SAMPLER` | sampler display name, e.g. `DPM++ 2M` |
    pub fn from_env() -> Result<Self, QueueError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, QueueError> {
        let mut builder = Self::builder();

        if let Some(path) = lookup("INVISION_DB_PATH").filter(|p| !p.is_empty()) {
            builder = builder.with_db_path(PathBuf::from(path));
        }
        if let Some(ms) = millis(&lookup, "INVISION_POLL_INTERVAL_MS")? {
            builder = builder.with_poll_interval(ms);
        }
        if let Some(ms) = millis(&lookup, "INVISION_COOLDOWN_MS")? {
            builder = builder.with_cooldown(ms);
        }
        if let Some(ms) = millis(&lookup, "INVISION_PROGRESS_INTERVAL_MS")? {
            builder = builder.with_progress_interval((!ms.is_zero()).then_some(ms));
        }
        if let Some(name) = lookup("INVISION_DEFAULT_SAMPLER") {
            let sampler = Sampler::parse(&name).ok_or_else(|| {
                QueueError::Validation(format!("INVISION_DEFAULT_SAMPLER: unknown sampler '{}'", name))
            })?;
            builder = builder.with_default_sampler(sampler);
        }

        Ok(builder.build())
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, QueueError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| QueueError::Validation(format!("{}: {}", key, e))),
    }
}

/// Builder for [`QueueConfig`].
#[derive(Default)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    /// Set the SQLite database path for persistence. Omit for in-memory.
    pub fn with_db_path(mut self, path: PathBuf) -> Self {
        self.config.db_path = Some(path);
        self
    }

    /// Set the idle polling interval of the dispatch loop.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the cooldown between consecutive dispatches.
    pub fn with_cooldown(mut self, duration: Duration) -> Self {
        self.config.cooldown = duration;
        self
    }

    /// Set (or disable with `None`) backend progress polling.
    pub fn with_progress_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.progress_interval = interval;
        self
    }

    pub fn with_default_sampler(mut self, sampler: Sampler) -> Self {
        self.config.default_sampler = sampler;
        self
    }

    /// Build the final [`QueueConfig`].
    pub fn build(self) -> QueueConfig {
        self.config
    }
}
