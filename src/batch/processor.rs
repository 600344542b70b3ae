//! The per-item processing seam.
//!
//! Anything that maps one item and its absolute index to a result can drive a
//! [`BatchProcessor`](super::BatchProcessor). Plain async closures work through
//! the blanket implementation; integrations with a specific downstream service
//! implement [`ItemProcessor`] on their own type.
//!
//! Closure futures must own their data (`'static`); clone an `Arc` into the
//! `async move` block instead of borrowing from the enclosing scope.

use std::future::Future;

use async_trait::async_trait;

use crate::ProcessError;

/// Processes a single item
#[async_trait]
pub trait ItemProcessor<T, R>: Send + Sync {
    /// Process `item`, located at `index` in the original input
    async fn process(&self, item: T, index: usize) -> Result<R, ProcessError>;
}

#[async_trait]
impl<T, R, E, F, Fut> ItemProcessor<T, R> for F
where
    F: Fn(T, usize) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    E: Into<ProcessError> + 'static,
    T: Send + 'static,
    R: Send + 'static,
{
    async fn process(&self, item: T, index: usize) -> Result<R, ProcessError> {
        (self)(item, index).await.map_err(Into::into)
    }
}
