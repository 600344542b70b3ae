//! # batchflow
//!
//! Bounded-concurrency batch processing for async Rust.
//!
//! ## Overview
//!
//! `batchflow` applies a caller-supplied async transformation to a large ordered
//! collection of inputs. The input is split into fixed-size batches, a configurable
//! number of batches run at once, batch launches can be paced with a delay, and
//! individual item failures are contained instead of aborting the whole run.
//! It is meant as a building block for talking to rate-limited or
//! resource-constrained downstream targets.
//!
//! ## Quick Start
//!
//! ```rust
//! use batchflow::batch::{process_in_batches, BatchOptions};
//!
//! # async fn example() -> batchflow::Result<()> {
//! let items: Vec<u32> = (1..=10).collect();
//!
//! let options = BatchOptions::new(3)
//!     .with_concurrency(2)
//!     .with_progress_callback(|done, total| println!("{done}/{total}"));
//!
//! let doubled = process_in_batches(&items, |item: u32, _index: usize| async move {
//!     Ok::<_, std::io::Error>(item * 2)
//! }, options)
//! .await?;
//!
//! assert_eq!(doubled.len(), 10);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`batch`]: chunking, options, the processor seam and the batch scheduler
//! - [`resilience`]: delay primitive, exponential-backoff retry and timeouts

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for batchflow operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Boxed failure produced by an item processor
pub type ProcessError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for batchflow operations
#[derive(Error, Debug)]
pub enum BatchError {
    /// Invalid option values (zero batch size, zero concurrency, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// An item failed while `stop_on_error` was set, terminating the run
    #[error("Item {index} failed: {source}")]
    Item {
        /// Absolute index of the failing item in the original input
        index: usize,
        /// Underlying processor failure
        #[source]
        source: ProcessError,
    },

    /// An operation wrapped with a timeout did not finish in time
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Settings could not be parsed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Batch scheduling module
pub mod batch;

/// Delay, retry and timeout helpers
pub mod resilience;
