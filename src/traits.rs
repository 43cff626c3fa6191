//! Collaborator contracts for the orchestration primitives.
//!
//! [`Operation`] is the unit of work applied per item by the executor.
//! [`Producer`], [`Consumer`] and [`Processor`] are the pluggable stages of
//! the queue and batch-stream patterns.

use std::fmt::Display;
use std::future::Future;

use async_trait::async_trait;

use crate::error::Result;

/// A unit of work applied to one input.
///
/// Operations are shared between concurrently running items, so `call` takes
/// `&self` and must be safe to invoke concurrently with independent inputs.
/// Any async closure returning a `Result` is an operation:
///
/// ```rust
/// use taskweld::traits::Operation;
///
/// # #[tokio::main]
/// # async fn main() {
/// let double = |x: u32| async move { Ok::<_, String>(x * 2) };
/// assert_eq!(double.call(21).await, Ok(42));
/// # }
/// ```
#[async_trait]
pub trait Operation<T>: Send + Sync
where
    T: Send + 'static,
{
    /// The value produced on success
    type Output: Send + 'static;
    /// The error produced on failure; only its message is kept
    type Error: Display + Send + 'static;

    /// Run the operation for a single input.
    async fn call(&self, input: T) -> std::result::Result<Self::Output, Self::Error>;
}

#[async_trait]
impl<F, Fut, T, R, E> Operation<T> for F
where
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    T: Send + 'static,
    R: Send + 'static,
    E: Display + Send + 'static,
{
    type Output = R;
    type Error = E;

    async fn call(&self, input: T) -> std::result::Result<R, E> {
        (self)(input).await
    }
}

/// A producer generates messages on demand.
///
/// Producers are pull-based: they only generate a message when asked, and
/// return `None` once they are exhausted.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use taskweld::error::Result;
/// use taskweld::traits::Producer;
///
/// struct Countdown(u32);
///
/// #[async_trait]
/// impl Producer for Countdown {
///     type Item = u32;
///
///     async fn produce(&mut self) -> Result<Option<Self::Item>> {
///         if self.0 == 0 {
///             return Ok(None);
///         }
///         self.0 -= 1;
///         Ok(Some(self.0))
///     }
/// }
/// ```
#[async_trait]
pub trait Producer {
    /// The type of messages this producer generates
    type Item: Send + 'static;

    /// Produce the next message, or None if the producer is exhausted.
    async fn produce(&mut self) -> Result<Option<Self::Item>>;
}

/// A consumer processes messages taken from a queue.
#[async_trait]
pub trait Consumer {
    /// The type of messages this consumer accepts
    type Item: Send + 'static;

    /// Process a single message.
    ///
    /// The message counts as handled whether or not this returns an error;
    /// errors are reported but the message is not redelivered.
    async fn consume(&mut self, item: Self::Item) -> Result<()>;
}

/// A processor transforms one input (typically a whole batch) into zero or
/// more outputs.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use taskweld::error::Result;
/// use taskweld::traits::Processor;
///
/// struct Sum;
///
/// #[async_trait]
/// impl Processor for Sum {
///     type Input = Vec<u64>;
///     type Output = u64;
///
///     async fn process(&mut self, batch: Self::Input) -> Result<Vec<Self::Output>> {
///         Ok(vec![batch.iter().sum()])
///     }
/// }
/// ```
#[async_trait]
pub trait Processor {
    /// The type of items this processor accepts
    type Input: Send + 'static;
    /// The type of items this processor produces
    type Output: Send + 'static;

    /// Process an input and produce zero or more outputs.
    async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>>;
}
