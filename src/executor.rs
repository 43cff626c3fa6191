//! Fan-out/fan-in execution.
//!
//! The [`Executor`] launches one task per input, each reporting a single
//! [`Outcome`] into a shared [`Aggregation`]. The call returns once the
//! aggregation has an outcome for every index, which with finite inputs,
//! finite timeouts or an eventually-set [`CancellationSignal`] always happens.
//!
//! Timeouts and cancellation only stop *waiting*. An operation that is parked
//! on an await point is dropped there; work running on another thread (see
//! [`run_blocking`]) keeps going in the background.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::cancel::CancellationSignal;
use crate::error::{Error, ErrorKind, Result};
use crate::outcome::{AggregateResult, Aggregation, Outcome, WorkItem};
use crate::traits::Operation;
use crate::util::{blocking, BlockingOperation};

/// Configuration for an executor run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutorConfig {
    /// Deadline for each item's operation
    pub per_item_timeout: Option<Duration>,
    /// Maximum number of operations in flight at once
    pub max_concurrency: Option<usize>,
    /// Delay between launching successive items
    pub launch_interval: Option<Duration>,
}

impl ExecutorConfig {
    /// Reject configurations that cannot run
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == Some(0) {
            return Err(Error::invalid_config("max_concurrency must be at least 1"));
        }
        Ok(())
    }
}

/// Runs a unit of work over a collection of inputs concurrently.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    /// Create an executor with no timeout, no concurrency bound and no stagger
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an executor from an existing configuration
    pub fn with_config(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Set the per-item timeout
    pub fn per_item_timeout(mut self, timeout: Duration) -> Self {
        self.config.per_item_timeout = Some(timeout);
        self
    }

    /// Set the maximum number of concurrent operations
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.config.max_concurrency = Some(max);
        self
    }

    /// Set the delay between launching successive items
    pub fn launch_interval(mut self, interval: Duration) -> Self {
        self.config.launch_interval = Some(interval);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `op` over every item and wait for all of them.
    pub async fn run<T, O>(&self, items: Vec<T>, op: O) -> Result<AggregateResult<O::Output>>
    where
        T: Send + 'static,
        O: Operation<T> + 'static,
    {
        self.config.validate()?;
        Ok(self.execute(items, op, None).await)
    }

    /// Run `op` over every item, stopping early for items that have not
    /// finished when `cancel` is set.
    pub async fn run_with_cancel<T, O>(
        &self,
        items: Vec<T>,
        op: O,
        cancel: &CancellationSignal,
    ) -> Result<AggregateResult<O::Output>>
    where
        T: Send + 'static,
        O: Operation<T> + 'static,
    {
        self.config.validate()?;
        Ok(self.execute(items, op, Some(cancel)).await)
    }

    /// Run a synchronous function over every item on the blocking pool.
    pub async fn run_blocking<T, F, R, E>(
        &self,
        items: Vec<T>,
        f: F,
    ) -> Result<AggregateResult<R>>
    where
        T: Send + 'static,
        F: Fn(T) -> std::result::Result<R, E> + Send + Sync + 'static,
        R: Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        self.config.validate()?;
        let op: BlockingOperation<F> = blocking(f);
        Ok(self.execute(items, op, None).await)
    }

    /// Run an operation that may drop its item by returning `None`.
    ///
    /// Kept values come back in index order; failures are returned alongside
    /// and logged.
    pub async fn filter_map<T, F, Fut, R, E>(
        &self,
        items: Vec<T>,
        f: F,
    ) -> Result<(Vec<R>, Vec<(usize, ErrorKind)>)>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Option<R>, E>> + Send + 'static,
        R: Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let result = self.run(items, f).await?;
        Ok(log_filtered(result))
    }

    async fn execute<T, O>(
        &self,
        items: Vec<T>,
        op: O,
        cancel: Option<&CancellationSignal>,
    ) -> AggregateResult<O::Output>
    where
        T: Send + 'static,
        O: Operation<T> + 'static,
    {
        let len = items.len();
        if len == 0 {
            return AggregateResult::empty();
        }

        let aggregation = Arc::new(Aggregation::new(len));
        let op = Arc::new(op);
        // An unset signal that nobody else holds is equivalent to "no cancellation"
        let cancel = cancel.cloned().unwrap_or_default();
        let limiter = self
            .config
            .max_concurrency
            .map(|permits| Arc::new(Semaphore::new(permits)));

        tracing::debug!(items = len, config = ?self.config, "launching items");

        let mut tasks = JoinSet::new();
        for (index, input) in items.into_iter().enumerate() {
            if index > 0 && !cancel.is_set() {
                if let Some(interval) = self.config.launch_interval {
                    // Later items record Cancelled straight away, no need to pace them
                    tokio::select! {
                        _ = sleep(interval) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
            }

            let task = ItemTask {
                item: WorkItem { index, input },
                op: op.clone(),
                aggregation: aggregation.clone(),
                cancel: cancel.clone(),
                limiter: limiter.clone(),
                timeout: self.config.per_item_timeout,
            };
            tasks.spawn(task.run());
        }

        tokio::select! {
            _ = aggregation.wait() => {}
            _ = reap(&mut tasks) => {}
        }
        // Every task has recorded by now; whatever is left is returning.
        tasks.detach_all();

        let result = aggregation.finish();
        tracing::info!(
            items = len,
            succeeded = len - result.errors.len(),
            failed = result.errors.len(),
            "run complete"
        );
        result
    }
}

/// Drain a join set, logging tasks that died without reporting.
async fn reap(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::warn!(error = %e, "item task ended abnormally");
        }
    }
}

struct ItemTask<T, O>
where
    T: Send + 'static,
    O: Operation<T>,
{
    item: WorkItem<T>,
    op: Arc<O>,
    aggregation: Arc<Aggregation<O::Output>>,
    cancel: CancellationSignal,
    limiter: Option<Arc<Semaphore>>,
    timeout: Option<Duration>,
}

impl<T, O> ItemTask<T, O>
where
    T: Send + 'static,
    O: Operation<T> + 'static,
{
    async fn run(self) {
        let WorkItem { index, input } = self.item;

        // Waiting for a permit still counts as pending.
        let _permit = match &self.limiter {
            Some(limiter) => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    permit = limiter.clone().acquire_owned() => permit.ok(),
                }
            }
            None => None,
        };

        let result = if self.cancel.is_set() {
            Err(ErrorKind::Cancelled)
        } else {
            tracing::debug!(index, "item running");
            let guarded = guard(self.op.call(input), self.timeout);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(ErrorKind::Cancelled),
                result = guarded => result,
            }
        };

        let outcome = Outcome::from_result(index, result);
        tracing::debug!(index, state = ?outcome.state(), "item finished");
        #[cfg(feature = "metrics")]
        crate::metrics::record_item(&outcome);

        self.aggregation.record(outcome);
    }
}

/// Apply the deadline and turn errors and panics into an [`ErrorKind`].
async fn guard<F, R, E>(call: F, timeout: Option<Duration>) -> std::result::Result<R, ErrorKind>
where
    F: Future<Output = std::result::Result<R, E>>,
    E: std::fmt::Display,
{
    let call = AssertUnwindSafe(call).catch_unwind();
    let caught = match timeout {
        Some(deadline) => match tokio::time::timeout(deadline, call).await {
            Ok(caught) => caught,
            Err(_) => return Err(ErrorKind::timed_out(deadline)),
        },
        None => call.await,
    };

    match caught {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ErrorKind::operation_failed(&e)),
        Err(panic) => Err(ErrorKind::OperationFailed(format!(
            "operation panicked: {}",
            panic_message(&*panic)
        ))),
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Run `op` over every item with no timeout or cancellation.
pub async fn run<T, O>(items: Vec<T>, op: O) -> AggregateResult<O::Output>
where
    T: Send + 'static,
    O: Operation<T> + 'static,
{
    Executor::new().execute(items, op, None).await
}

/// Run `op` over every item, bounding each by `per_item_timeout` and by the
/// shared `cancel` signal.
pub async fn run_bounded<T, O>(
    items: Vec<T>,
    op: O,
    per_item_timeout: Duration,
    cancel: &CancellationSignal,
) -> AggregateResult<O::Output>
where
    T: Send + 'static,
    O: Operation<T> + 'static,
{
    Executor::new()
        .per_item_timeout(per_item_timeout)
        .execute(items, op, Some(cancel))
        .await
}

/// Run a synchronous function over every item on tokio's blocking pool.
pub async fn run_blocking<T, F, R, E>(items: Vec<T>, f: F) -> AggregateResult<R>
where
    T: Send + 'static,
    F: Fn(T) -> std::result::Result<R, E> + Send + Sync + 'static,
    R: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Executor::new().execute(items, blocking(f), None).await
}

/// Run a filtering operation; see [`Executor::filter_map`].
pub async fn filter_map<T, F, Fut, R, E>(items: Vec<T>, f: F) -> (Vec<R>, Vec<(usize, ErrorKind)>)
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Option<R>, E>> + Send + 'static,
    R: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    log_filtered(Executor::new().execute(items, f, None).await)
}

/// Log every failed item of a filter-map run, then flatten it.
fn log_filtered<R>(result: AggregateResult<Option<R>>) -> (Vec<R>, Vec<(usize, ErrorKind)>) {
    for (index, error) in &result.errors {
        tracing::error!(index, %error, "filter-map item failed");
    }
    result.into_filtered()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn empty_input_completes_immediately() {
        let result = run(Vec::<u32>::new(), |x: u32| async move { Ok::<_, String>(x) }).await;
        assert!(result.is_empty());
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let err = Executor::new()
            .max_concurrency(0)
            .run(vec![1u32, 2], move |x: u32| {
                seen.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, String>(x) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let result = run(vec![0u32, 1], |x: u32| async move {
            if x == 1 {
                panic!("bad item");
            }
            Ok::<_, String>(x)
        })
        .await;

        assert_eq!(result.values, vec![Some(0), None]);
        assert_eq!(
            result.errors,
            vec![(
                1,
                ErrorKind::OperationFailed("operation panicked: bad item".to_string())
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_bound_is_respected() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (in_flight_op, peak_op) = (in_flight.clone(), peak.clone());

        let result = Executor::new()
            .max_concurrency(2)
            .run((0..6).collect::<Vec<u32>>(), move |x: u32| {
                let in_flight = in_flight_op.clone();
                let peak = peak_op.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(x)
                }
            })
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn launch_interval_staggers_starts() {
        let start = tokio::time::Instant::now();
        let result = Executor::new()
            .launch_interval(Duration::from_millis(100))
            .run(vec![0u64, 1, 2], move |x: u64| async move {
                Ok::<_, String>(start.elapsed().as_millis() as u64 / 100 * 100 + x)
            })
            .await
            .unwrap();

        assert_eq!(result.values, vec![Some(0), Some(101), Some(202)]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_pacing_remaining_launches() {
        let cancel = CancellationSignal::new();
        let _timer = cancel.set_after(Duration::from_millis(150));
        let start = tokio::time::Instant::now();

        let result = Executor::new()
            .launch_interval(Duration::from_millis(100))
            .run_with_cancel(
                vec![0u32, 1, 2, 3, 4],
                |x: u32| async move { Ok::<_, String>(x) },
                &cancel,
            )
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(result.values, vec![Some(0), Some(1), None, None, None]);
        assert_eq!(result.count_errors("cancelled"), 3);
    }

    #[tokio::test]
    async fn filter_map_keeps_index_order() {
        let (kept, errors) = filter_map(vec![1u32, 2, 3, 4, 5], |x: u32| async move {
            match x {
                3 => Err("three".to_string()),
                x if x % 2 == 0 => Ok(None),
                x => Ok(Some(x * 10)),
            }
        })
        .await;

        assert_eq!(kept, vec![10, 50]);
        assert_eq!(
            errors,
            vec![(2, ErrorKind::OperationFailed("three".to_string()))]
        );
    }

    #[tokio::test]
    async fn blocking_work_runs_off_the_runtime() {
        let result = run_blocking(vec!["1", "x", "3"], |s: &'static str| s.parse::<u32>()).await;
        assert_eq!(result.values, vec![Some(1), None, Some(3)]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].0, 1);
    }
}
