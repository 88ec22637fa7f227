//! Error definitions
//!
//! Every failure a test can end with is one [`Error`] variant, so the host
//! can tell a missing fixture from a timeout from a failing body.

use std::time::Duration;

use thiserror::Error;

/// Failure raised from inside a test body.
pub type BodyError = Box<dyn std::error::Error + 'static>;

/// Main error type for looptest
#[derive(Error, Debug)]
pub enum Error {
    /// A required fixture is missing or failed to resolve
    #[error("Setup error: {0}")]
    Setup(String),

    /// The deadline elapsed before the test body settled
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The test body itself failed
    #[error("Test body failed: {0}")]
    Body(BodyError),

    /// A fixture finalizer failed
    #[error("Teardown error: {0}")]
    Teardown(String),

    /// The event loop was used after it was closed
    #[error("Event loop is closed")]
    LoopClosed,

    /// The event loop was driven while it was already running
    #[error("Event loop is already running")]
    LoopRunning,

    /// I/O error from a socket or the runtime
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(String),
}

impl Error {
    /// Create a setup error.
    #[must_use]
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup(message.into())
    }

    /// Create a teardown error.
    #[must_use]
    pub fn teardown(message: impl Into<String>) -> Self {
        Self::Teardown(message.into())
    }

    /// Create an HTTP error.
    #[must_use]
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http(message.into())
    }

    /// Wrap a failure raised by a test body.
    ///
    /// A body that propagated a looptest [`Error`] with `?` gets the original
    /// variant back instead of a nested `Body`.
    #[must_use]
    pub fn from_body(err: BodyError) -> Self {
        match err.downcast::<Error>() {
            Ok(inner) => *inner,
            Err(other) => Self::Body(other),
        }
    }

    /// Returns `true` for [`Error::Timeout`].
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns `true` for [`Error::Setup`].
    #[must_use]
    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
