//! Error types for the pipeline core.
//!
//! Cancellation is deliberately absent from [`Error`]: a fired token is a
//! normal way for a stage to finish, so cancellable operations report it
//! through [`Cancelled`] or their own outcome enums instead.

use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

/// The main error type for pipeline execution.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A stage task panicked
    #[error("stage `{stage}` panicked: {message}")]
    StagePanicked { stage: String, message: String },

    /// A fallible transform produced an item error while fail-fast was on
    #[error("stage `{stage}` failed on an item: {message}")]
    ItemFailed { stage: String, message: String },

    /// A user-defined stage returned an error
    #[error("stage `{stage}` failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// Stages did not unwind within the shutdown grace period
    #[error("stages still running after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A configuration value was rejected
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

// Convenience constructors
impl Error {
    /// Create a stage error from any error type
    pub fn stage<S, E>(stage: S, error: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Stage {
            stage: stage.into(),
            source: Arc::new(error),
        }
    }

    /// Create an item failure error
    pub fn item_failed<S: Into<String>, M: std::fmt::Display>(stage: S, message: M) -> Self {
        Error::ItemFailed {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Create a timeout error
    pub fn timeout(duration: std::time::Duration) -> Self {
        Error::Timeout {
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create a configuration error with a message
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Error::InvalidConfig(message.into())
    }

    pub(crate) fn panicked<S: Into<String>>(stage: S, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Error::StagePanicked {
            stage: stage.into(),
            message,
        }
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Marker returned by an operation that lost its race against a fired token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Why a channel write did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The token fired before a reader accepted the item
    #[error("send cancelled before the item was accepted")]
    Cancelled,

    /// Every reader of the channel is gone
    #[error("all receivers of the channel were dropped")]
    Disconnected,
}

impl From<Cancelled> for SendError {
    fn from(_: Cancelled) -> Self {
        SendError::Cancelled
    }
}
