//! FIFO work queue with acknowledgement tracking, and the multicast hub that
//! feeds it.
//!
//! A [`WorkQueue`] counts every enqueued message as pending until a consumer
//! acknowledges it, and [`WorkQueue::drain`] waits for that count to reach
//! zero. An [`EventHub`] pairs a queue with an [`EventEmitter`] so each
//! published message is first announced to listeners and then queued for
//! consumers.
//!
//! Consumers run until their [`ConsumerGroup`] is shut down. Shutdown is a
//! hard stop: a consumer parked in `consume`, or halfway through a message,
//! is dropped on the spot. A message taken but not yet acknowledged at that
//! moment is lost rather than redelivered, so shut down only after `drain`.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use tokio::task::JoinSet;

use crate::cancel::{CancellableExt, CancellationSignal};
use crate::emitter::EventEmitter;
use crate::error::{Error, Result};
use crate::executor::panic_message;
use crate::traits::{Consumer, Producer};

struct QueueInner<M> {
    sender: mpsc::UnboundedSender<M>,
    receiver: TokioMutex<mpsc::UnboundedReceiver<M>>,
    pending: watch::Sender<usize>,
}

/// Multi-consumer FIFO queue with a pending-message count.
pub struct WorkQueue<M> {
    inner: Arc<QueueInner<M>>,
}

impl<M> Clone for WorkQueue<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Send + 'static> WorkQueue<M> {
    /// Create an empty queue
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0);
        Self {
            inner: Arc::new(QueueInner {
                sender,
                receiver: TokioMutex::new(receiver),
                pending,
            }),
        }
    }

    /// Append a message and count it as pending
    pub fn enqueue(&self, message: M) -> Result<()> {
        // Count first so an early acknowledge can never underflow
        self.inner.pending.send_modify(|pending| *pending += 1);
        if self.inner.sender.send(message).is_err() {
            self.inner.pending.send_modify(|pending| *pending -= 1);
            return Err(Error::ChannelClosed);
        }
        self.report_pending();
        Ok(())
    }

    /// Wait for the oldest message and take it.
    ///
    /// Consumers are served one at a time, so messages leave in the order they
    /// were enqueued. Does not change the pending count.
    pub async fn consume(&self) -> Result<M> {
        let mut receiver = self.inner.receiver.lock().await;
        receiver.recv().await.ok_or(Error::ChannelClosed)
    }

    /// Mark one consumed message as fully handled
    pub fn acknowledge(&self) -> Result<()> {
        let acknowledged = self.inner.pending.send_if_modified(|pending| {
            if *pending == 0 {
                false
            } else {
                *pending -= 1;
                true
            }
        });
        if !acknowledged {
            return Err(Error::UnbalancedAcknowledge);
        }
        self.report_pending();
        Ok(())
    }

    /// Wait until every enqueued message has been acknowledged
    pub async fn drain(&self) -> Result<()> {
        let mut pending = self.inner.pending.subscribe();
        pending.wait_for(|pending| *pending == 0).await?;
        Ok(())
    }

    /// Messages enqueued but not yet acknowledged
    pub fn pending(&self) -> usize {
        *self.inner.pending.borrow()
    }

    fn report_pending(&self) {
        #[cfg(feature = "metrics")]
        crate::metrics::record_pending(self.pending());
    }
}

impl<M: Send + 'static> Default for WorkQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts reported by [`EventHub::run_session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub published: usize,
    pub consumed: usize,
}

/// An emitter and a queue fed by the same producer.
pub struct EventHub<M> {
    emitter: EventEmitter<M>,
    queue: WorkQueue<M>,
}

impl<M: Send + 'static> EventHub<M> {
    /// Create a hub with no listeners and an empty queue
    pub fn new() -> Self {
        Self {
            emitter: EventEmitter::new(),
            queue: WorkQueue::new(),
        }
    }

    pub fn emitter(&self) -> &EventEmitter<M> {
        &self.emitter
    }

    pub fn queue(&self) -> &WorkQueue<M> {
        &self.queue
    }

    /// Notify every listener, then queue the message for consumers.
    ///
    /// A failing listener aborts the publish before anything is queued.
    pub fn publish(&self, message: M) -> Result<()> {
        self.emitter.emit(&message)?;
        self.queue.enqueue(message)
    }

    /// Publish everything `producer` generates. Returns the number of
    /// messages published. Does not wait for consumers.
    pub async fn run_producer<P>(&self, mut producer: P) -> Result<usize>
    where
        P: Producer<Item = M> + Send,
    {
        let mut published = 0;
        while let Some(message) = producer.produce().await? {
            self.publish(message)?;
            published += 1;
            tracing::debug!(published, "message published");
        }
        tracing::info!(published, "producer finished");
        Ok(published)
    }

    /// Run a full session: start `consumers`, run `producer` to completion,
    /// wait for the queue to drain, then stop the consumers.
    pub async fn run_session<P, C>(&self, producer: P, consumers: Vec<C>) -> Result<SessionReport>
    where
        P: Producer<Item = M> + Send,
        C: Consumer<Item = M> + Send + 'static,
    {
        if consumers.is_empty() {
            return Err(Error::invalid_config("a session needs at least one consumer"));
        }

        let group = ConsumerGroup::spawn(&self.queue, consumers);
        let published = match self.run_producer(producer).await {
            Ok(published) => published,
            Err(e) => {
                tracing::warn!(error = %e, "producer failed, stopping consumers");
                if let Err(consumer_error) = group.shutdown().await {
                    tracing::warn!(error = %consumer_error, "consumers stopped with an error");
                }
                return Err(e);
            }
        };

        self.queue.drain().await?;
        let consumed = group.shutdown().await?;
        Ok(SessionReport {
            published,
            consumed,
        })
    }
}

impl<M: Send + 'static> Default for EventHub<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// A set of consumer loops draining one queue.
pub struct ConsumerGroup {
    stop: CancellationSignal,
    tasks: JoinSet<Result<()>>,
    consumed: Arc<AtomicUsize>,
}

impl ConsumerGroup {
    /// Spawn one loop per consumer: take a message, process it, acknowledge.
    pub fn spawn<M, C>(queue: &WorkQueue<M>, consumers: impl IntoIterator<Item = C>) -> Self
    where
        M: Send + 'static,
        C: Consumer<Item = M> + Send + 'static,
    {
        let stop = CancellationSignal::new();
        let consumed = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for (worker, consumer) in consumers.into_iter().enumerate() {
            let looped = Box::pin(consume_loop(
                worker,
                consumer,
                queue.clone(),
                consumed.clone(),
            ));
            let stopped = looped.cancellable(&stop);
            tasks.spawn(async move {
                match stopped.await {
                    Ok(result) => result,
                    Err(Error::Shutdown) => Ok(()),
                    Err(e) => Err(e),
                }
            });
        }

        Self {
            stop,
            tasks,
            consumed,
        }
    }

    /// Messages fully processed so far
    pub fn consumed(&self) -> usize {
        self.consumed.load(Ordering::SeqCst)
    }

    /// Stop every consumer and wait for the loops to exit. Returns the number
    /// of messages processed, or the first error a loop stopped with.
    pub async fn shutdown(mut self) -> Result<usize> {
        self.stop.set();

        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "consumer stopped with an error");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "consumer task ended abnormally");
                    first_error
                        .get_or_insert_with(|| Error::custom(format!("consumer task failed: {}", e)));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(self.consumed.load(Ordering::SeqCst)),
        }
    }
}

async fn consume_loop<M, C>(
    worker: usize,
    mut consumer: C,
    queue: WorkQueue<M>,
    consumed: Arc<AtomicUsize>,
) -> Result<()>
where
    M: Send + 'static,
    C: Consumer<Item = M>,
{
    loop {
        let message = queue.consume().await?;
        // A panicking consumer must still acknowledge, or drain never returns
        match AssertUnwindSafe(consumer.consume(message)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(worker, error = %e, "consumer failed to process message");
            }
            Err(panic) => {
                tracing::warn!(
                    worker,
                    panic = panic_message(&*panic),
                    "consumer panicked while processing message"
                );
            }
        }
        consumed.fetch_add(1, Ordering::SeqCst);
        queue.acknowledge()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = WorkQueue::new();
        for message in ["a", "b", "c"] {
            queue.enqueue(message).unwrap();
        }

        let mut taken = Vec::new();
        for _ in 0..3 {
            taken.push(queue.consume().await.unwrap());
            queue.acknowledge().unwrap();
        }
        assert_eq!(taken, vec!["a", "b", "c"]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn drain_waits_for_every_acknowledgement() {
        let queue = WorkQueue::new();
        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();

        queue.consume().await.unwrap();
        queue.consume().await.unwrap();
        queue.acknowledge().unwrap();

        let mut drain = task::spawn(queue.drain());
        assert_pending!(drain.poll());

        queue.acknowledge().unwrap();
        assert!(drain.is_woken());
        assert_ready_ok!(drain.poll());
    }

    #[tokio::test]
    async fn acknowledge_without_pending_is_rejected() {
        let queue: WorkQueue<()> = WorkQueue::new();
        assert!(matches!(
            queue.acknowledge(),
            Err(Error::UnbalancedAcknowledge)
        ));
    }

    #[tokio::test]
    async fn drain_on_an_idle_queue_returns() {
        let queue: WorkQueue<u8> = WorkQueue::new();
        queue.drain().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_parked_consumers() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        let consumers = (0..3).map(|_| {
            crate::util::consumer_from_fn(|_: u32| async { Ok(()) })
        });
        let group = ConsumerGroup::spawn(&queue, consumers);

        queue.enqueue(1).unwrap();
        queue.drain().await.unwrap();

        assert_eq!(group.shutdown().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failing_listener_keeps_message_out_of_the_queue() {
        let hub: EventHub<u32> = EventHub::new();
        hub.emitter().subscribe(|n| {
            if *n == 2 {
                Err(Error::custom("no twos"))
            } else {
                Ok(())
            }
        });

        hub.publish(1).unwrap();
        assert!(hub.publish(2).is_err());
        assert_eq!(hub.queue().pending(), 1);
    }
}
