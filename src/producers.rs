//! Concrete producer implementations.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::Result;
use crate::traits::Producer;

/// A producer that generates a fixed number of messages from their position
pub struct SequenceProducer<F> {
    make: F,
    next: usize,
    count: usize,
}

impl<F> SequenceProducer<F> {
    /// Produce `count` messages, the i-th being `make(i)`
    pub fn new(count: usize, make: F) -> Self {
        Self {
            make,
            next: 0,
            count,
        }
    }
}

#[async_trait]
impl<F, M> Producer for SequenceProducer<F>
where
    F: FnMut(usize) -> M + Send,
    M: Send + 'static,
{
    type Item = M;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        if self.next >= self.count {
            return Ok(None);
        }
        let message = (self.make)(self.next);
        self.next += 1;
        Ok(Some(message))
    }
}

type Pacing = Box<dyn FnMut(usize) -> Duration + Send>;

/// A producer that waits before each message of an inner producer.
///
/// The delay before the n-th message (0-based) is `pace(n)`, so intervals can
/// be fixed or irregular.
pub struct PacedProducer<P> {
    inner: P,
    pace: Pacing,
    produced: usize,
}

impl<P> PacedProducer<P> {
    /// Wait `pace(n)` before the n-th message
    pub fn new<F>(inner: P, pace: F) -> Self
    where
        F: FnMut(usize) -> Duration + Send + 'static,
    {
        Self {
            inner,
            pace: Box::new(pace),
            produced: 0,
        }
    }

    /// Wait the same `interval` before every message
    pub fn fixed(inner: P, interval: Duration) -> Self {
        Self::new(inner, move |_| interval)
    }
}

#[async_trait]
impl<P: Producer + Send> Producer for PacedProducer<P> {
    type Item = P::Item;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        let delay = (self.pace)(self.produced);
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let result = self.inner.produce().await?;
        if result.is_some() {
            self.produced += 1;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_stops_after_count() {
        let mut producer = SequenceProducer::new(3, |i| format!("event {}", i));
        let mut seen = Vec::new();
        while let Some(message) = producer.produce().await.unwrap() {
            seen.push(message);
        }
        assert_eq!(seen, vec!["event 0", "event 1", "event 2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn paced_producer_waits_before_each_message() {
        let inner = SequenceProducer::new(3, |i| i);
        let mut producer = PacedProducer::new(inner, |n| Duration::from_millis(100 * (n as u64 + 1)));

        let start = tokio::time::Instant::now();
        assert_eq!(producer.produce().await.unwrap(), Some(0));
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(producer.produce().await.unwrap(), Some(1));
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert_eq!(producer.produce().await.unwrap(), Some(2));
        assert!(start.elapsed() >= Duration::from_millis(600));
    }
}
