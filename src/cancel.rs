//! Cooperative cancellation.
//!
//! A [`CancellationSignal`] is a one-way flag scoped to a single run: once set
//! it stays set, and every clone observes it. Cancellation is best-effort.
//! Work that has already started is only stopped at its next suspend point,
//! and blocking work on another thread keeps running until it returns; the
//! orchestrator merely stops waiting for it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture, WaitForCancellationFutureOwned};

use crate::error::{Error, Result};

/// A monotonic, shareable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    token: CancellationToken,
}

impl CancellationSignal {
    /// Create a signal that is not set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Setting it again is a no-op.
    pub fn set(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("cancellation signal set");
        }
        self.token.cancel();
    }

    /// Whether the signal has been set
    pub fn is_set(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal is set
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Owned variant of [`cancelled`](Self::cancelled)
    pub fn cancelled_owned(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }

    /// Set the signal after `delay` from a background timer.
    ///
    /// Dropping the returned handle does not stop the timer; abort it to
    /// disarm.
    pub fn set_after(&self, delay: Duration) -> JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            signal.set();
        })
    }
}

/// A future that stops as soon as a signal is set.
///
/// The inner future is dropped on cancellation, so any state it held is
/// discarded at whatever suspend point it was parked on.
pub struct Cancellable<F> {
    future: F,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<F> Cancellable<F> {
    /// Create a new cancellable future
    pub fn new(future: F, signal: &CancellationSignal) -> Self {
        Self {
            future,
            cancelled: Box::pin(signal.cancelled_owned()),
        }
    }
}

impl<F> Future for Cancellable<F>
where
    F: Future + Unpin,
{
    type Output = Result<F::Output>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Registers the waker on the signal too, so a parked future still
        // wakes up when cancellation happens.
        if self.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(Error::Shutdown));
        }

        match Pin::new(&mut self.future).poll(cx) {
            Poll::Ready(output) => Poll::Ready(Ok(output)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Extension trait for making futures cancellable
pub trait CancellableExt: Future + Sized {
    /// Make this future stop when `signal` is set
    fn cancellable(self, signal: &CancellationSignal) -> Cancellable<Self> {
        Cancellable::new(self, signal)
    }
}

impl<F: Future> CancellableExt for F {}
