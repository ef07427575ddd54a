//! Unified error type.

use std::io;

use thiserror::Error;

use crate::context::ContextError;

/// The error type returned by halyard's fallible operations.
///
/// Application-level errors (401, 405, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// lifecycle failures: binding, accepting, and shutting down.
#[derive(Debug, Error)]
pub enum Error {
    /// The listen address could not be resolved or bound.
    #[error("listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// A non-transient accept failure stopped the serve loop.
    #[error("accept: {0}")]
    Accept(#[source] io::Error),

    /// Shutdown has been initiated. Expected when serving ends normally;
    /// [`listen_and_serve`](crate::listen_and_serve) suppresses it.
    #[error("server closed")]
    ServerClosed,

    /// A context was cancelled or ran out of time.
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// The coordinator was woken by cancellation rather than a signal.
    /// The drain itself succeeded.
    #[error("shutdown triggered by cancellation: {0}")]
    Cancelled(#[source] ContextError),

    /// The shutdown coordinator task was cancelled before it finished.
    #[error("shutdown coordinator aborted")]
    CoordinatorAborted,

    /// The server could not shut down cleanly. `cancelled` carries the
    /// context error when cancellation is what triggered the shutdown.
    #[error("shutdown: {source}")]
    Shutdown {
        #[source]
        source: Box<Error>,
        cancelled: Option<ContextError>,
    },
}

impl Error {
    /// The cancellation cause behind this error, if any.
    pub fn cancellation(&self) -> Option<ContextError> {
        match self {
            Self::Cancelled(cause) => Some(*cause),
            Self::Shutdown { cancelled, .. } => *cancelled,
            _ => None,
        }
    }
}
