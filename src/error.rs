//! Error types for the tierkit library.
//!
//! ## Key Components
//!
//! - [`CacheError`]: the single error type surfaced by coordinator and handle
//!   operations. Carries a [`CacheErrorKind`] plus a human-readable message.
//! - [`CacheResult`]: shorthand for `Result<T, CacheError>`.
//!
//! ## Example Usage
//!
//! ```
//! use tierkit::error::{CacheError, CacheErrorKind};
//! use tierkit::item::CacheItem;
//!
//! // Fallible constructors validate their arguments
//! let bad: Result<CacheItem<i32>, CacheError> = CacheItem::new("", 1);
//! assert_eq!(bad.unwrap_err().kind(), CacheErrorKind::InvalidArgument);
//! ```

use std::fmt;

/// Classification of cache failures.
///
/// Every [`CacheError`] belongs to exactly one kind; callers that need to
/// branch on failure class match on this instead of parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheErrorKind {
    /// Empty key or region, non-positive timeout, or a timeout below the
    /// target handle's resolution floor.
    InvalidArgument,
    /// A strict operation could not complete: update failures, exhausted
    /// `get_or_add` retries, or construction with zero handles.
    InvalidState,
    /// The cache was shut down before the call.
    Disposed,
    /// A handle observed the caller's cancellation signal.
    Canceled,
    /// A handle-level I/O or transport failure.
    Backend,
}

impl fmt::Display for CacheErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheErrorKind::InvalidArgument => "invalid argument",
            CacheErrorKind::InvalidState => "invalid state",
            CacheErrorKind::Disposed => "disposed",
            CacheErrorKind::Canceled => "canceled",
            CacheErrorKind::Backend => "backend failure",
        };
        f.write_str(s)
    }
}

/// Error returned by coordinator and handle operations.
///
/// Carries a kind for programmatic handling and a description of what went
/// wrong. Produced by fallible constructors (e.g.
/// [`CacheItem::new`](crate::item::CacheItem::new)), builder `build()`, and
/// the strict operation variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheError {
    kind: CacheErrorKind,
    message: String,
}

impl CacheError {
    /// Creates a new error with the given kind and description.
    #[inline]
    pub fn new(kind: CacheErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an [`CacheErrorKind::InvalidArgument`] error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(CacheErrorKind::InvalidArgument, message)
    }

    /// Shorthand for an [`CacheErrorKind::InvalidState`] error.
    #[inline]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(CacheErrorKind::InvalidState, message)
    }

    /// Shorthand for a [`CacheErrorKind::Disposed`] error naming the cache.
    #[inline]
    pub fn disposed(cache_name: &str) -> Self {
        Self::new(
            CacheErrorKind::Disposed,
            format!("cache '{}' has been shut down", cache_name),
        )
    }

    /// Shorthand for a [`CacheErrorKind::Canceled`] error.
    #[inline]
    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(CacheErrorKind::Canceled, message)
    }

    /// Shorthand for a [`CacheErrorKind::Backend`] error.
    #[inline]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::new(CacheErrorKind::Backend, message)
    }

    /// Returns the error classification.
    #[inline]
    pub fn kind(&self) -> CacheErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CacheError {}

/// Result alias used throughout the crate.
pub type CacheResult<T> = Result<T, CacheError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
