//! Per-item outcomes and the shared aggregation sink.
//!
//! Every concurrently running item reports exactly one [`Outcome`] into an
//! [`Aggregation`]. Values land in a slot addressed by the item's original
//! index; errors are appended in the order they arrive. The recorded count and
//! the slots live behind a single lock, so "record and check for completion"
//! is one step and two simultaneous last completions cannot both miss it.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::error::ErrorKind;

/// One input together with its position in the submitted sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem<T> {
    pub index: usize,
    pub input: T,
}

/// Lifecycle of a single item.
///
/// `Pending -> Running -> (Succeeded | TimedOut | Failed)`. Cancellation can
/// end an item from either `Pending` or `Running`. Everything but `Pending` and `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ItemState {
    Pending,
    Running,
    Succeeded,
    TimedOut,
    Failed,
    Cancelled,
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ItemState::Pending | ItemState::Running)
    }
}

/// The result of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Outcome<R> {
    Success { index: usize, value: R },
    Failure { index: usize, error: ErrorKind },
}

impl<R> Outcome<R> {
    /// Build an outcome from a per-item result
    pub fn from_result(index: usize, result: std::result::Result<R, ErrorKind>) -> Self {
        match result {
            Ok(value) => Outcome::Success { index, value },
            Err(error) => Outcome::Failure { index, error },
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Outcome::Success { index, .. } | Outcome::Failure { index, .. } => *index,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Terminal state this outcome represents
    pub fn state(&self) -> ItemState {
        match self {
            Outcome::Success { .. } => ItemState::Succeeded,
            Outcome::Failure { error, .. } => match error {
                ErrorKind::TimedOut { .. } => ItemState::TimedOut,
                ErrorKind::Cancelled => ItemState::Cancelled,
                ErrorKind::OperationFailed(_) | ErrorKind::StreamBatchFailed(_) => {
                    ItemState::Failed
                }
            },
        }
    }
}

/// Index-addressed values plus completion-ordered errors.
///
/// Once a run completes, every index in `0..len()` has either a value or an
/// entry in `errors`, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AggregateResult<R> {
    pub values: Vec<Option<R>>,
    pub errors: Vec<(usize, ErrorKind)>,
}

impl<R> AggregateResult<R> {
    /// The result of running nothing
    pub fn empty() -> Self {
        Self {
            values: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Number of submitted items
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when no item failed
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// The error recorded for `index`, if any
    pub fn error_for(&self, index: usize) -> Option<&ErrorKind> {
        self.errors
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, error)| error)
    }

    /// Successful values in index order, skipping failed slots
    pub fn successes(&self) -> impl Iterator<Item = (usize, &R)> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(index, value)| value.as_ref().map(|v| (index, v)))
    }

    /// Count of errors with the given label (see [`ErrorKind::label`])
    pub fn count_errors(&self, label: &str) -> usize {
        self.errors.iter().filter(|(_, e)| e.label() == label).count()
    }

    /// Convert back into one outcome per index, in index order
    pub fn into_outcomes(self) -> Vec<Outcome<R>> {
        let mut errors: Vec<Option<ErrorKind>> = vec![None; self.values.len()];
        for (index, error) in self.errors {
            if let Some(slot) = errors.get_mut(index) {
                *slot = Some(error);
            }
        }

        self.values
            .into_iter()
            .zip(errors)
            .enumerate()
            .map(|(index, slot)| match slot {
                (Some(value), _) => Outcome::Success { index, value },
                (None, Some(error)) => Outcome::Failure { index, error },
                (None, None) => Outcome::Failure {
                    index,
                    error: ErrorKind::OperationFailed("no outcome recorded".to_string()),
                },
            })
            .collect()
    }
}

impl<R> AggregateResult<Option<R>> {
    /// Flatten a filter-map result: `Some` values in index order, `None`
    /// results dropped, errors kept as they were.
    pub fn into_filtered(self) -> (Vec<R>, Vec<(usize, ErrorKind)>) {
        let kept = self.values.into_iter().flatten().flatten().collect();
        (kept, self.errors)
    }
}

struct AggregationState<R> {
    values: Vec<Option<R>>,
    errors: Vec<(usize, ErrorKind)>,
    recorded: Vec<bool>,
    completed: usize,
}

/// Shared sink that concurrently running items report into.
pub struct Aggregation<R> {
    state: Mutex<AggregationState<R>>,
    done: Notify,
    len: usize,
}

impl<R> Aggregation<R> {
    /// Create a sink expecting `len` outcomes
    pub fn new(len: usize) -> Self {
        Self {
            state: Mutex::new(AggregationState {
                values: (0..len).map(|_| None).collect(),
                errors: Vec::new(),
                recorded: vec![false; len],
                completed: 0,
            }),
            done: Notify::new(),
            len,
        }
    }

    fn lock(&self) -> MutexGuard<'_, AggregationState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one outcome. Returns true if this was the last outstanding one.
    ///
    /// Outcomes for an index that was already recorded (or out of range) are
    /// ignored.
    pub fn record(&self, outcome: Outcome<R>) -> bool {
        let index = outcome.index();
        let mut state = self.lock();

        match state.recorded.get(index) {
            Some(false) => {}
            _ => {
                tracing::warn!(index, "ignoring duplicate or out-of-range outcome");
                return false;
            }
        }
        state.recorded[index] = true;

        match outcome {
            Outcome::Success { value, .. } => state.values[index] = Some(value),
            Outcome::Failure { error, .. } => state.errors.push((index, error)),
        }

        state.completed += 1;
        let finished = state.completed == self.len;
        drop(state);

        if finished {
            // notify_one stores a permit, so a waiter that arrives late still wakes
            self.done.notify_one();
        }
        finished
    }

    /// Number of outcomes recorded so far
    pub fn completed(&self) -> usize {
        self.lock().completed
    }

    pub fn is_complete(&self) -> bool {
        self.completed() == self.len
    }

    /// Wait until all expected outcomes are recorded
    pub async fn wait(&self) {
        if self.len == 0 {
            return;
        }
        loop {
            let notified = self.done.notified();
            if self.is_complete() {
                return;
            }
            notified.await;
        }
    }

    /// Take the aggregate out of the sink.
    ///
    /// Any index that never reported (its task was aborted before recording)
    /// is filled in as a failure so the result stays total.
    pub fn finish(&self) -> AggregateResult<R> {
        let mut state = self.lock();
        for index in 0..self.len {
            if !state.recorded[index] {
                state.recorded[index] = true;
                state.errors.push((
                    index,
                    ErrorKind::OperationFailed("task aborted before reporting".to_string()),
                ));
            }
        }

        AggregateResult {
            values: std::mem::take(&mut state.values),
            errors: std::mem::take(&mut state.errors),
        }
    }
}
