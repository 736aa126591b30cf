//! Error types for the reactive engine.
//!
//! There are only two ways the engine itself can fail:
//!
//! - Reading a reactive value outside of any running context. This is a
//!   programming error at the caller level and is always propagated.
//!
//! - A user computation inside a [`Derived`](crate::reactive::Derived)
//!   returning an error. The error is cached exactly like a value and
//!   re-surfaced to every subsequent reader until the derived value is
//!   invalidated again, which is why [`Error`] must be `Clone`.

use std::sync::Arc;

use thiserror::Error;

/// Boxed error type returned by user computations and observer bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the reactive engine.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// A dependency registration or context lookup happened outside of any
    /// running reactive context.
    #[error("no reactive context is active")]
    NoCurrentContext,

    /// The `Environment` that issued this context has been dropped, so the
    /// context can no longer run code or schedule flushes.
    #[error("the reactive environment has been dropped")]
    EnvironmentGone,

    /// A derived computation failed. The error is shared so it can be cached
    /// and handed out to every reader until the next invalidation.
    #[error("reactive computation failed: {0}")]
    Compute(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Wrap a user computation error for caching.
    pub(crate) fn compute(err: BoxError) -> Self {
        Error::Compute(Arc::from(err))
    }

    /// True if this error wraps a failed user computation.
    pub fn is_compute(&self) -> bool {
        matches!(self, Error::Compute(_))
    }
}
