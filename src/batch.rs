//! Finite, rate-limited batch streams.
//!
//! A [`BatchStream`] yields `ceil(total / batch_size)` batches, sleeping for a
//! fixed delay before each one. Every batch holds exactly `batch_size`
//! generated elements, the last one included: asking for 25 elements in
//! batches of 10 generates 30. Callers that need an exact total must trim the
//! final batch themselves.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_core::Stream;
use tokio::time::{sleep, Sleep};
use tokio_stream::StreamExt;

use crate::error::{Error, ErrorKind, Result};
use crate::traits::Processor;

/// A lazy stream of fixed-size generated batches.
pub struct BatchStream<G> {
    generate: G,
    batch_size: usize,
    remaining: usize,
    delay: Duration,
    timer: Option<Pin<Box<Sleep>>>,
}

impl<G, T> BatchStream<G>
where
    G: FnMut() -> T + Unpin,
{
    /// Stream `ceil(total / batch_size)` batches of `batch_size` elements,
    /// each element drawn from `generate`.
    pub fn new(total: usize, batch_size: usize, delay: Duration, generate: G) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::invalid_config("batch_size must be at least 1"));
        }

        Ok(Self {
            generate,
            batch_size,
            remaining: total.div_ceil(batch_size),
            delay,
            timer: None,
        })
    }

    /// Batches not yet produced
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl<G, T> Stream for BatchStream<G>
where
    G: FnMut() -> T + Unpin,
{
    type Item = Vec<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.remaining == 0 {
            return Poll::Ready(None);
        }

        let delay = this.delay;
        let timer = this.timer.get_or_insert_with(|| Box::pin(sleep(delay)));
        if timer.as_mut().poll(cx).is_pending() {
            return Poll::Pending;
        }
        this.timer = None;

        this.remaining -= 1;
        let batch = (0..this.batch_size).map(|_| (this.generate)()).collect();
        Poll::Ready(Some(batch))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

/// Create a [`BatchStream`] with a fixed inter-batch delay.
pub fn stream<G, T>(
    total: usize,
    batch_size: usize,
    delay: Duration,
    generate: G,
) -> Result<BatchStream<G>>
where
    G: FnMut() -> T + Unpin,
{
    BatchStream::new(total, batch_size, delay, generate)
}

/// What happened while processing a batch stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport<O> {
    /// Number of batches pulled from the stream
    pub batches: usize,
    /// Outputs of every successful batch, in stream order
    pub outputs: Vec<O>,
    /// Failed batches by position in the stream
    pub errors: Vec<(usize, ErrorKind)>,
}

impl<O> BatchReport<O> {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Feed every batch of `batches` to `processor`.
///
/// A failing batch is recorded and the stream keeps going.
pub async fn process_batches<S, P>(mut batches: S, processor: &mut P) -> BatchReport<P::Output>
where
    S: Stream<Item = P::Input> + Unpin,
    P: Processor + Send,
{
    let mut report = BatchReport {
        batches: 0,
        outputs: Vec::new(),
        errors: Vec::new(),
    };

    while let Some(batch) = batches.next().await {
        let position = report.batches;
        report.batches += 1;

        match processor.process(batch).await {
            Ok(outputs) => {
                tracing::debug!(batch = position, outputs = outputs.len(), "batch processed");
                #[cfg(feature = "metrics")]
                crate::metrics::record_batch(true);
                report.outputs.extend(outputs);
            }
            Err(e) => {
                tracing::warn!(batch = position, error = %e, "batch failed");
                #[cfg(feature = "metrics")]
                crate::metrics::record_batch(false);
                report
                    .errors
                    .push((position, ErrorKind::StreamBatchFailed(e.to_string())));
            }
        }
    }

    tracing::info!(
        batches = report.batches,
        failed = report.errors.len(),
        "batch stream finished"
    );
    report
}
