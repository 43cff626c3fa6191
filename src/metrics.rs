//! Counters and gauges exported through the `metrics` facade.
//!
//! Nothing is recorded unless a recorder is installed by the application.

use ::metrics::{counter, gauge};

use crate::outcome::Outcome;

/// Count one finished item, labelled by its terminal state
pub fn record_item<R>(outcome: &Outcome<R>) {
    let label = match outcome {
        Outcome::Success { .. } => "succeeded",
        Outcome::Failure { error, .. } => error.label(),
    };
    counter!("taskweld_items_total", "outcome" => label).increment(1);
}

/// Count one processed batch
pub fn record_batch(succeeded: bool) {
    let label = if succeeded { "succeeded" } else { "failed" };
    counter!("taskweld_batches_total", "outcome" => label).increment(1);
}

/// Current number of unacknowledged queue messages
pub fn record_pending(pending: usize) {
    gauge!("taskweld_queue_pending").set(pending as f64);
}
