#![forbid(unsafe_code)]

//! Error types for command execution.
//!
//! Two layers:
//!
//! - [`ExecutionError`] is what a failed unit of work produces. It travels on
//!   a command's `error` stream, so it is cheap to clone and carries any
//!   `std::error::Error` behind an `Arc`.
//! - [`CommandError`] is what `execute` itself can return: contract
//!   violations caught before any work starts, and synchronous failures
//!   handed back because nobody observes the `error` stream.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error accepted from units of work.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure of one execution, as published on a command's `error` stream.
#[derive(Clone)]
pub struct ExecutionError {
    inner: Arc<dyn StdError + Send + Sync + 'static>,
}

impl ExecutionError {
    /// Wrap any error (or `&str`/`String` message).
    pub fn new(error: impl Into<BoxError>) -> Self {
        Self {
            inner: Arc::from(error.into()),
        }
    }

    /// Error carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(message.into())
    }

    /// Convert a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(CommandError::Panicked { message })
    }

    /// The wrapped error.
    #[must_use]
    pub fn get_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.inner
    }

    /// Downcast the wrapped error to a concrete type.
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Whether both handles refer to the same failure.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl StdError for ExecutionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}

/// Errors returned by `execute`, and framework-generated execution failures.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// The unit of work failed while nobody observed the `error` stream.
    #[error("execution failed: {0}")]
    Execution(#[source] ExecutionError),

    /// `execute_empty` was called on a command that needs an input.
    #[error("command requires an input")]
    InputRequired,

    /// `execute` was called with an input on a command built without one.
    #[error("command does not accept an input")]
    UnexpectedInput,

    /// Composite children do not all share one input shape.
    #[error("composite children disagree on whether they take an input")]
    MixedInputShape,

    /// A composite was built without children.
    #[error("composite command needs at least one child")]
    EmptyComposite,

    /// The unit of work dropped its completer without completing it.
    #[error("unit of work finished without producing a result")]
    Abandoned,

    /// The unit of work panicked.
    #[error("unit of work panicked: {message}")]
    Panicked { message: String },
}

impl CommandError {
    /// The execution failure, if this error carries one.
    #[must_use]
    pub fn execution(&self) -> Option<&ExecutionError> {
        match self {
            Self::Execution(e) => Some(e),
            _ => None,
        }
    }
}
