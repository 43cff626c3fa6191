//! Utility functions and helper types.

use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::traits::{Consumer, Operation, Processor, Producer};

/// Helper function to create a simple producer from a function
pub fn producer_from_fn<F, Fut, T>(f: F) -> FnProducer<F, Fut, T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Option<T>>> + Send,
    T: Send + 'static,
{
    FnProducer {
        f,
        _phantom: std::marker::PhantomData,
    }
}

/// A producer created from a function
pub struct FnProducer<F, Fut, T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Option<T>>> + Send,
    T: Send + 'static,
{
    pub f: F,
    _phantom: std::marker::PhantomData<(Fut, T)>,
}

#[async_trait]
impl<F, Fut, T> Producer for FnProducer<F, Fut, T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Option<T>>> + Send,
    T: Send + 'static,
{
    type Item = T;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        (self.f)().await
    }
}

/// Helper function to create a simple consumer from a function
pub fn consumer_from_fn<F, Fut, T>(f: F) -> FnConsumer<F, Fut, T>
where
    F: FnMut(T) -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
    T: Send + 'static,
{
    FnConsumer {
        f,
        _phantom: std::marker::PhantomData,
    }
}

/// A consumer created from a function
pub struct FnConsumer<F, Fut, T>
where
    F: FnMut(T) -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
    T: Send + 'static,
{
    pub f: F,
    _phantom: std::marker::PhantomData<(Fut, T)>,
}

#[async_trait]
impl<F, Fut, T> Consumer for FnConsumer<F, Fut, T>
where
    F: FnMut(T) -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
    T: Send + 'static,
{
    type Item = T;

    async fn consume(&mut self, item: Self::Item) -> Result<()> {
        (self.f)(item).await
    }
}

/// Helper function to create a simple processor from a function
pub fn processor_from_fn<F, Fut, T, U>(f: F) -> FnProcessor<F, Fut, T, U>
where
    F: FnMut(T) -> Fut + Send,
    Fut: Future<Output = Result<Vec<U>>> + Send,
    T: Send + 'static,
    U: Send + 'static,
{
    FnProcessor {
        f,
        _phantom: std::marker::PhantomData,
    }
}

/// A processor created from a function
pub struct FnProcessor<F, Fut, T, U>
where
    F: FnMut(T) -> Fut + Send,
    Fut: Future<Output = Result<Vec<U>>> + Send,
    T: Send + 'static,
    U: Send + 'static,
{
    pub f: F,
    _phantom: std::marker::PhantomData<(Fut, T, U)>,
}

#[async_trait]
impl<F, Fut, T, U> Processor for FnProcessor<F, Fut, T, U>
where
    F: FnMut(T) -> Fut + Send,
    Fut: Future<Output = Result<Vec<U>>> + Send,
    T: Send + 'static,
    U: Send + 'static,
{
    type Input = T;
    type Output = U;

    async fn process(&mut self, item: Self::Input) -> Result<Vec<Self::Output>> {
        (self.f)(item).await
    }
}

/// Wrap a synchronous function so each call runs on tokio's blocking pool.
///
/// A timeout or cancellation only abandons the wait; the thread runs the
/// function to completion regardless.
pub fn blocking<F>(f: F) -> BlockingOperation<F> {
    BlockingOperation { f: Arc::new(f) }
}

/// An [`Operation`] backed by a synchronous function
pub struct BlockingOperation<F> {
    f: Arc<F>,
}

#[async_trait]
impl<F, T, R, E> Operation<T> for BlockingOperation<F>
where
    F: Fn(T) -> std::result::Result<R, E> + Send + Sync + 'static,
    T: Send + 'static,
    R: Send + 'static,
    E: Display + Send + 'static,
{
    type Output = R;
    type Error = String;

    async fn call(&self, input: T) -> std::result::Result<R, String> {
        let f = self.f.clone();
        match tokio::task::spawn_blocking(move || f(input)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.to_string()),
            Err(join) => Err(format!("blocking task failed: {}", join)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_adapters_delegate() {
        let mut left = 2;
        let mut producer = producer_from_fn(move || {
            let next = if left == 0 {
                None
            } else {
                left -= 1;
                Some(left)
            };
            async move { Ok(next) }
        });
        assert_eq!(producer.produce().await.unwrap(), Some(1));
        assert_eq!(producer.produce().await.unwrap(), Some(0));
        assert_eq!(producer.produce().await.unwrap(), None);

        let mut processor =
            processor_from_fn(|batch: Vec<u8>| async move { Ok(vec![batch.len()]) });
        assert_eq!(processor.process(vec![1, 2, 3]).await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn blocking_operation_reports_errors() {
        let op = blocking(|x: i32| if x < 0 { Err("negative") } else { Ok(x) });
        assert_eq!(op.call(4).await, Ok(4));
        assert_eq!(op.call(-1).await, Err("negative".to_string()));
    }
}
