//! Bounded-concurrency batch scheduler
//!
//! Splits the input into batches and drives them through an [`ItemProcessor`]:
//! - one batch at a time when `concurrency == 1`, preserving global order
//! - up to `concurrency` batches in flight otherwise, with results appended in
//!   completion order (item order within a batch is always preserved)
//! - optional pacing between batch launches
//! - per-item failure containment unless `stop_on_error` is set
//!
//! All in-flight work is polled by the calling task itself, so run state is
//! only ever touched from one place at a time and needs no locking.

use std::future::Future;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{join_all, try_join_all};
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, error, field, info, instrument, warn, Span};
use uuid::Uuid;

use crate::batch::chunk::chunk;
use crate::batch::processor::ItemProcessor;
use crate::batch::types::{BatchOptions, BatchReport, BatchStats, ProgressCallback};
use crate::resilience::delay;
use crate::{BatchError, Result};

/// Applies an item processor to an input collection in batches
///
/// Cheap to construct and reusable: every call to [`process`](Self::process)
/// builds its own batches and accumulator. Options can be replaced between
/// runs, never during one.
pub struct BatchProcessor<T, R, P> {
    processor: P,
    options: BatchOptions<T>,
    _result: PhantomData<fn() -> R>,
}

impl<T, R, P> std::fmt::Debug for BatchProcessor<T, R, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("processor", &"ItemProcessor")
            .field("options", &self.options)
            .finish()
    }
}

/// What one batch produced
struct BatchOutcome<R> {
    ordinal: usize,
    results: Vec<R>,
    failed: usize,
}

/// Accumulator for a single run
struct RunState<R> {
    results: Vec<R>,
    failed: usize,
    completed_batches: usize,
    total_items: usize,
}

impl<R> RunState<R> {
    fn new(total_items: usize) -> Self {
        Self {
            results: Vec::with_capacity(total_items),
            failed: 0,
            completed_batches: 0,
            total_items,
        }
    }

    fn record(&mut self, outcome: BatchOutcome<R>, on_progress: Option<&ProgressCallback>) {
        self.failed += outcome.failed;
        self.results.extend(outcome.results);
        self.completed_batches += 1;

        debug!(
            batch = outcome.ordinal,
            completed = self.results.len(),
            total = self.total_items,
            "Batch completed"
        );

        if let Some(callback) = on_progress {
            callback(self.results.len(), self.total_items);
        }
    }
}

impl<T, R, P> BatchProcessor<T, R, P>
where
    P: ItemProcessor<T, R>,
{
    /// Create a processor, rejecting invalid options
    pub fn new(processor: P, options: BatchOptions<T>) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            processor,
            options,
            _result: PhantomData,
        })
    }

    /// Current options
    pub fn options(&self) -> &BatchOptions<T> {
        &self.options
    }

    /// Replace the options used by subsequent runs
    pub fn set_options(&mut self, options: BatchOptions<T>) -> Result<()> {
        options.validate()?;
        self.options = options;
        Ok(())
    }

    /// Modify the options in place; an invalid result leaves them unchanged
    pub fn update_options<F>(&mut self, update: F) -> Result<()>
    where
        F: FnOnce(&mut BatchOptions<T>),
    {
        let mut next = self.options.clone();
        update(&mut next);
        self.set_options(next)
    }
}

impl<T, R, P> BatchProcessor<T, R, P>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    P: ItemProcessor<T, R>,
{
    /// Process all items and return the successful results
    ///
    /// With `concurrency == 1` the results follow input order. With higher
    /// concurrency they follow batch completion order. Failed items are
    /// omitted unless `stop_on_error` is set, in which case the first failure
    /// is returned as [`BatchError::Item`] and partial results are discarded.
    pub async fn process(&self, items: &[T]) -> Result<Vec<R>> {
        self.process_with_report(items)
            .await
            .map(|report| report.results)
    }

    /// Like [`process`](Self::process), with run statistics
    #[instrument(
        skip(self, items),
        fields(
            run_id = field::Empty,
            total_items = items.len(),
            batch_size = self.options.batch_size,
            concurrency = self.options.concurrency,
        )
    )]
    pub async fn process_with_report(&self, items: &[T]) -> Result<BatchReport<R>> {
        self.options.validate()?;

        let run_id = Uuid::new_v4();
        Span::current().record("run_id", field::display(run_id));
        let started_at = Utc::now();
        let start = Instant::now();

        let batches = chunk(items, self.options.batch_size)?;
        let batch_count = batches.len();
        let mut run = RunState::new(items.len());

        info!(
            batches = batch_count,
            delay_ms = self.options.delay.as_millis() as u64,
            stop_on_error = self.options.stop_on_error,
            "Starting batch run"
        );

        let outcome = if self.options.concurrency <= 1 {
            self.run_sequential(batches, &mut run).await
        } else {
            self.run_concurrent(batches, &mut run).await
        };

        let duration = start.elapsed();

        if let Err(err) = outcome {
            error!(
                error = %err,
                completed_batches = run.completed_batches,
                duration_ms = duration.as_millis() as u64,
                "Batch run aborted"
            );
            return Err(err);
        }

        let stats = BatchStats {
            run_id,
            started_at,
            total_items: items.len(),
            succeeded: run.results.len(),
            failed: run.failed,
            batches: batch_count,
            duration,
        };

        info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            duration_ms = duration.as_millis() as u64,
            "Batch run completed"
        );

        if stats.failed > 0 {
            warn!(failed = stats.failed, "Some items failed and were skipped");
        }

        Ok(BatchReport {
            results: run.results,
            stats,
        })
    }

    async fn run_sequential(&self, batches: Vec<Vec<T>>, run: &mut RunState<R>) -> Result<()> {
        let last = batches.len().saturating_sub(1);

        for (ordinal, batch) in batches.into_iter().enumerate() {
            let outcome = self.run_batch(ordinal, batch).await?;
            run.record(outcome, self.options.on_progress.as_ref());

            if !self.options.delay.is_zero() && ordinal < last {
                delay(self.options.delay).await;
            }
        }

        Ok(())
    }

    async fn run_concurrent(&self, batches: Vec<Vec<T>>, run: &mut RunState<R>) -> Result<()> {
        let limit = self.options.concurrency;
        let pacing = self.options.delay;
        let mut pending = batches.into_iter().enumerate().peekable();
        let mut in_flight = FuturesUnordered::new();
        let mut failure: Option<BatchError> = None;

        loop {
            while failure.is_none() && in_flight.len() < limit {
                let Some((ordinal, batch)) = pending.next() else {
                    break;
                };
                in_flight.push(self.run_batch(ordinal, batch));

                if !pacing.is_zero() && pending.peek().is_some() {
                    self.pace(pacing, &mut in_flight, run, &mut failure).await;
                }
            }

            // Every launched batch is awaited here, including after a failure.
            match in_flight.next().await {
                Some(outcome) => self.settle(outcome, run, &mut failure),
                None => break,
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Wait out the launch delay while still settling batches that finish meanwhile.
    ///
    /// In-flight batches are polled before the timer, so a batch launched just
    /// before the pause always gets started before the next launch.
    async fn pace<F>(
        &self,
        pause: Duration,
        in_flight: &mut FuturesUnordered<F>,
        run: &mut RunState<R>,
        failure: &mut Option<BatchError>,
    ) where
        F: Future<Output = Result<BatchOutcome<R>>>,
    {
        let timer = tokio::time::sleep(pause);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;

                Some(outcome) = in_flight.next(), if !in_flight.is_empty() => {
                    self.settle(outcome, run, failure);
                    if failure.is_some() {
                        break;
                    }
                }
                _ = &mut timer => break,
            }
        }
    }

    fn settle(
        &self,
        outcome: Result<BatchOutcome<R>>,
        run: &mut RunState<R>,
        failure: &mut Option<BatchError>,
    ) {
        match outcome {
            Ok(batch) => run.record(batch, self.options.on_progress.as_ref()),
            Err(err) if failure.is_none() => {
                warn!(error = %err, "Batch failed, no further batches will be launched");
                *failure = Some(err);
            }
            Err(err) => {
                warn!(error = %err, "Batch failed while draining after abort");
            }
        }
    }

    /// Run every item of one batch concurrently.
    async fn run_batch(&self, ordinal: usize, batch: Vec<T>) -> Result<BatchOutcome<R>> {
        let start = ordinal * self.options.batch_size;
        debug!(batch = ordinal, start, size = batch.len(), "Batch launched");

        let pending = batch
            .into_iter()
            .enumerate()
            .map(|(offset, item)| self.run_item(item, start + offset));

        // try_join_all drops the still-pending siblings on the first escalated failure
        let settled: Vec<Option<R>> = if self.options.stop_on_error {
            try_join_all(pending).await?
        } else {
            join_all(pending).await.into_iter().collect::<Result<_>>()?
        };

        let failed = settled.iter().filter(|slot| slot.is_none()).count();
        Ok(BatchOutcome {
            ordinal,
            results: settled.into_iter().flatten().collect(),
            failed,
        })
    }

    async fn run_item(&self, item: T, index: usize) -> Result<Option<R>> {
        match self.processor.process(item.clone(), index).await {
            Ok(result) => Ok(Some(result)),
            Err(source) => {
                warn!(index, error = %source, "Item failed");

                if let Some(on_error) = &self.options.on_error {
                    on_error(&source, &item, index);
                }

                if self.options.stop_on_error {
                    Err(BatchError::Item { index, source })
                } else {
                    Ok(None)
                }
            }
        }
    }
}

/// Construct a [`BatchProcessor`]
pub fn create_batch_processor<T, R, P>(
    processor: P,
    options: BatchOptions<T>,
) -> Result<BatchProcessor<T, R, P>>
where
    P: ItemProcessor<T, R>,
{
    BatchProcessor::new(processor, options)
}

/// Construct a [`BatchProcessor`] and run it once over `items`
pub async fn process_in_batches<T, R, P>(
    items: &[T],
    processor: P,
    options: BatchOptions<T>,
) -> Result<Vec<R>>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    P: ItemProcessor<T, R>,
{
    BatchProcessor::new(processor, options)?
        .process(items)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn doubler() -> impl Fn(u32, usize) -> std::future::Ready<std::result::Result<u32, String>> {
        |item, _index| std::future::ready(Ok(item * 2))
    }

    #[test]
    fn test_new_rejects_zero_batch_size() {
        let result = BatchProcessor::new(doubler(), BatchOptions::new(0));
        assert!(matches!(result, Err(BatchError::Config(_))));
    }

    #[test]
    fn test_new_rejects_zero_concurrency() {
        let result = BatchProcessor::new(doubler(), BatchOptions::new(2).with_concurrency(0));
        assert!(matches!(result, Err(BatchError::Config(_))));
    }

    #[tokio::test]
    async fn test_sequential_preserves_order() {
        let processor = BatchProcessor::new(doubler(), BatchOptions::new(3)).unwrap();
        let items: Vec<u32> = (1..=10).collect();

        let results = processor.process(&items).await.unwrap();
        assert_eq!(results, vec![2, 4, 6, 8, 10, 12, 14, 16, 18, 20]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let progress = Arc::new(AtomicUsize::new(0));
        let calls = progress.clone();
        let options = BatchOptions::new(3).with_progress_callback(move |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        let processor = BatchProcessor::new(doubler(), options).unwrap();

        let report = processor.process_with_report(&[]).await.unwrap();
        assert!(report.results.is_empty());
        assert_eq!(report.stats.batches, 0);
        assert_eq!(progress.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_report_counts_failures() {
        let processor = BatchProcessor::new(
            |item: u32, _index: usize| async move {
                if item.is_multiple_of(4) {
                    Err(format!("{item} rejected"))
                } else {
                    Ok(item)
                }
            },
            BatchOptions::new(3).with_concurrency(2),
        )
        .unwrap();
        let items: Vec<u32> = (1..=12).collect();

        let report = processor.process_with_report(&items).await.unwrap();
        assert_eq!(report.stats.total_items, 12);
        assert_eq!(report.stats.succeeded, 9);
        assert_eq!(report.stats.failed, 3);
        assert_eq!(report.stats.batches, 4);
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (active_c, peak_c) = (active.clone(), peak.clone());

        // Batch size 1 so in-flight items equal in-flight batches.
        let processor = BatchProcessor::new(
            move |item: u32, _index: usize| {
                let active = active_c.clone();
                let peak = peak_c.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(item)
                }
            },
            BatchOptions::new(1).with_concurrency(3),
        )
        .unwrap();
        let items: Vec<u32> = (0..12).collect();

        let results = processor.process(&items).await.unwrap();
        assert_eq!(results.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_update_options_applies_to_next_run() {
        let mut processor = BatchProcessor::new(doubler(), BatchOptions::new(5)).unwrap();
        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        processor
            .update_options(|opts| {
                opts.batch_size = 2;
                opts.on_progress = Some(Arc::new(move |done: usize, _total: usize| {
                    sink.lock().unwrap().push(done)
                }));
            })
            .unwrap();

        processor.process(&[1, 2, 3, 4, 5]).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![2, 4, 5]);
    }

    #[test]
    fn test_invalid_update_keeps_previous_options() {
        let mut processor = BatchProcessor::new(doubler(), BatchOptions::new(5)).unwrap();

        let result = processor.update_options(|opts| opts.batch_size = 0);
        assert!(matches!(result, Err(BatchError::Config(_))));
        assert_eq!(processor.options().batch_size, 5);
    }
}
