//! Error types for the orchestration primitives.
//!
//! There are two layers. [`ErrorKind`] describes why a single item or batch
//! failed; those are always recovered into an aggregate and never abort
//! sibling work. [`Error`] is the fatal layer returned through [`Result`]:
//! misconfiguration, closed channels, failing subscribers and the like.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error as ThisError;

use crate::emitter::SubscriberId;

/// Why a single work item or batch did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// The unit of work returned an error (or panicked)
    #[error("operation failed: {0}")]
    OperationFailed(String),

    /// The per-item deadline elapsed before the operation finished
    #[error("operation timed out after {duration_ms}ms")]
    TimedOut { duration_ms: u64 },

    /// Cancellation was observed before the operation could finish
    #[error("operation was cancelled")]
    Cancelled,

    /// A batch processor rejected a batch
    #[error("batch processing failed: {0}")]
    StreamBatchFailed(String),
}

impl ErrorKind {
    /// Create an operation failure from anything displayable
    pub fn operation_failed<S: ToString + ?Sized>(message: &S) -> Self {
        ErrorKind::OperationFailed(message.to_string())
    }

    /// Create a timeout error for the given deadline
    pub fn timed_out(deadline: Duration) -> Self {
        ErrorKind::TimedOut {
            duration_ms: deadline.as_millis() as u64,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ErrorKind::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ErrorKind::TimedOut { .. })
    }

    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::OperationFailed(_) => "failed",
            ErrorKind::TimedOut { .. } => "timed_out",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::StreamBatchFailed(_) => "batch_failed",
        }
    }
}

/// The fatal error type for the crate.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// A producer failed to generate a message
    #[error("Producer error: {0}")]
    Producer(Arc<dyn std::error::Error + Send + Sync>),

    /// A consumer failed to process a message
    #[error("Consumer error: {0}")]
    Consumer(Arc<dyn std::error::Error + Send + Sync>),

    /// A batch processor failed to handle a batch
    #[error("Processor error: {0}")]
    Processor(Arc<dyn std::error::Error + Send + Sync>),

    /// A subscriber callback failed during emit
    #[error("Subscriber {id} failed: {source}")]
    Subscriber {
        id: SubscriberId,
        #[source]
        source: Arc<Error>,
    },

    /// A channel was closed unexpectedly
    #[error("Channel was closed unexpectedly")]
    ChannelClosed,

    /// A task was stopped by its owner
    #[error("Task was shut down")]
    Shutdown,

    /// The caller supplied an unusable configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// More acknowledgements than consumed messages
    #[error("Acknowledge called with no pending messages")]
    UnbalancedAcknowledge,

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Create a producer error from any error type
    pub fn producer<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Producer(Arc::new(error))
    }

    /// Create a consumer error from any error type
    pub fn consumer<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Consumer(Arc::new(error))
    }

    /// Create a processor error from any error type
    pub fn processor<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Processor(Arc::new(error))
    }

    /// Create a configuration error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Error::InvalidConfig(message.into())
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    pub(crate) fn subscriber(id: SubscriberId, source: Error) -> Self {
        Error::Subscriber {
            id,
            source: Arc::new(source),
        }
    }
}

impl From<tokio::sync::watch::error::RecvError> for Error {
    fn from(_: tokio::sync::watch::error::RecvError) -> Self {
        Error::ChannelClosed
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for converting foreign errors into our Error type
pub trait IntoError<T> {
    fn into_producer_error(self) -> Result<T>;
    fn into_consumer_error(self) -> Result<T>;
    fn into_processor_error(self) -> Result<T>;
}

impl<T, E> IntoError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_producer_error(self) -> Result<T> {
        self.map_err(Error::producer)
    }

    fn into_consumer_error(self) -> Result<T> {
        self.map_err(Error::consumer)
    }

    fn into_processor_error(self) -> Result<T> {
        self.map_err(Error::processor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_reports_milliseconds() {
        let kind = ErrorKind::timed_out(Duration::from_millis(1500));
        assert_eq!(kind, ErrorKind::TimedOut { duration_ms: 1500 });
        assert_eq!(kind.to_string(), "operation timed out after 1500ms");
        assert!(kind.is_timeout());
    }

    #[test]
    fn subscriber_error_keeps_source() {
        let err = Error::subscriber(SubscriberId(3), Error::custom("boom"));
        assert_eq!(err.to_string(), "Subscriber 3 failed: boom");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn foreign_errors_convert() {
        let io: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        let err = io.into_processor_error().unwrap_err();
        assert!(matches!(err, Error::Processor(_)));
        assert_eq!(err.to_string(), "Processor error: disk");
    }
}
