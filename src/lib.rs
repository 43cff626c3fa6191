//! # Bounded fan-out/fan-in orchestration for tokio
//!
//! This crate runs a unit of work over many inputs concurrently and gathers
//! the results, with per-item timeouts, cooperative cancellation, a
//! multicast producer/consumer queue and rate-limited batch streams.
//!
//! ## Core Concepts
//!
//! - **Operation**: the async function applied to each input
//! - **Executor**: launches one task per input and aggregates index-addressed
//!   values and completion-ordered errors
//! - **CancellationSignal**: one-way flag that stops items that have not
//!   finished yet
//! - **EventHub**: announces each message to listeners, then queues it for
//!   consumers; `drain` waits until every message is acknowledged
//! - **BatchStream**: finite stream of fixed-size batches with a delay before
//!   each one
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use taskweld::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let orders = vec!["coffee", "tea", "pizza", "sushi"];
//!     let cancel = CancellationSignal::new();
//!
//!     let result = run_bounded(
//!         orders,
//!         |order: &'static str| async move {
//!             if order == "tea" {
//!                 Err(format!("cannot prepare {}", order))
//!             } else {
//!                 Ok(order.len())
//!             }
//!         },
//!         Duration::from_secs(1),
//!         &cancel,
//!     )
//!     .await;
//!
//!     assert_eq!(result.values, vec![Some(6), None, Some(5), Some(5)]);
//!     assert_eq!(result.errors.len(), 1);
//! }
//! ```

pub mod batch;
pub mod cancel;
pub mod channel;
pub mod emitter;
pub mod error;
pub mod executor;
pub mod outcome;
pub mod producers;
pub mod traits;
pub mod util;

// Re-export commonly used items
pub mod prelude {
    pub use crate::batch::{process_batches, stream, BatchReport, BatchStream};
    pub use crate::cancel::{CancellableExt, CancellationSignal};
    pub use crate::channel::{ConsumerGroup, EventHub, SessionReport, WorkQueue};
    pub use crate::emitter::{EventEmitter, SubscriberId};
    pub use crate::error::{Error, ErrorKind, IntoError, Result};
    pub use crate::executor::{filter_map, run, run_blocking, run_bounded, Executor, ExecutorConfig};
    pub use crate::outcome::{AggregateResult, ItemState, Outcome, WorkItem};
    pub use crate::producers::{PacedProducer, SequenceProducer};
    pub use crate::traits::{Consumer, Operation, Processor, Producer};
    pub use crate::util::{blocking, consumer_from_fn, processor_from_fn, producer_from_fn};
}

// Re-export main error type
pub use error::{Error, ErrorKind, Result};

#[cfg(feature = "metrics")]
pub mod metrics;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
