use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resilience::duration_millis;
use crate::{BatchError, ProcessError, Result};

/// Batch size used when none is configured
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Progress callback: `(completed_items, total_items)`
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Error callback: `(error, item, absolute_index)`
pub type ErrorCallback<T> = Arc<dyn Fn(&ProcessError, &T, usize) + Send + Sync>;

/// Options for one batch processing run
pub struct BatchOptions<T> {
    /// Items per batch
    pub batch_size: usize,
    /// Pause between batch launches
    pub delay: Duration,
    /// Maximum number of batches in flight at once
    pub concurrency: usize,
    /// Abort the run on the first item failure
    pub stop_on_error: bool,
    /// Invoked after every completed batch
    pub on_progress: Option<ProgressCallback>,
    /// Invoked for every failed item
    pub on_error: Option<ErrorCallback<T>>,
}

impl<T> BatchOptions<T> {
    /// Default options with the given batch size
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Self::default()
        }
    }

    /// Set the pause between batch launches
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the number of batches allowed in flight
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Abort on the first failing item instead of skipping it
    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    /// Set progress callback
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Set error callback
    pub fn with_error_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProcessError, &T, usize) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Check option values before a run
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(BatchError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(BatchError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Build options from plain settings, without callbacks
    pub fn from_settings(settings: &BatchSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            delay: settings.delay,
            concurrency: settings.concurrency,
            stop_on_error: settings.stop_on_error,
            on_progress: None,
            on_error: None,
        }
    }

    /// Overwrite the plain-data fields from `settings`, keeping callbacks
    pub fn apply_settings(&mut self, settings: &BatchSettings) {
        self.batch_size = settings.batch_size;
        self.delay = settings.delay;
        self.concurrency = settings.concurrency;
        self.stop_on_error = settings.stop_on_error;
    }

    /// Plain-data view of these options
    pub fn settings(&self) -> BatchSettings {
        BatchSettings {
            batch_size: self.batch_size,
            delay: self.delay,
            concurrency: self.concurrency,
            stop_on_error: self.stop_on_error,
        }
    }
}

impl<T> Default for BatchOptions<T> {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            delay: Duration::ZERO,
            concurrency: 1,
            stop_on_error: false,
            on_progress: None,
            on_error: None,
        }
    }
}

impl<T> Clone for BatchOptions<T> {
    fn clone(&self) -> Self {
        Self {
            batch_size: self.batch_size,
            delay: self.delay,
            concurrency: self.concurrency,
            stop_on_error: self.stop_on_error,
            on_progress: self.on_progress.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<T> std::fmt::Debug for BatchOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("batch_size", &self.batch_size)
            .field("delay", &self.delay)
            .field("concurrency", &self.concurrency)
            .field("stop_on_error", &self.stop_on_error)
            .field("on_progress", &self.on_progress.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Serializable subset of [`BatchOptions`]
///
/// Missing fields fall back to the defaults, so a settings file only needs the
/// values it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Items per batch
    pub batch_size: usize,
    /// Pause between batch launches, in milliseconds
    #[serde(rename = "delay_ms", with = "duration_millis")]
    pub delay: Duration,
    /// Maximum number of batches in flight
    pub concurrency: usize,
    /// Abort on the first failing item
    pub stop_on_error: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            delay: Duration::ZERO,
            concurrency: 1,
            stop_on_error: false,
        }
    }
}

impl BatchSettings {
    /// Parse settings from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl<T> From<BatchSettings> for BatchOptions<T> {
    fn from(settings: BatchSettings) -> Self {
        Self::from_settings(&settings)
    }
}

/// Statistics for one processing run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStats {
    /// Identifier of the run, also recorded on its tracing span
    pub run_id: Uuid,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Number of input items
    pub total_items: usize,
    /// Items that produced a result
    pub succeeded: usize,
    /// Items whose processor failed and were skipped
    pub failed: usize,
    /// Number of batches the input was split into
    pub batches: usize,
    /// Wall-clock time of the whole run
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

/// Results of a run together with its statistics
#[derive(Debug, Clone)]
pub struct BatchReport<R> {
    /// Successfully produced results
    pub results: Vec<R>,
    /// Statistics for the run
    pub stats: BatchStats,
}
