//! Error types for the template cache.
//!
//! The cache distinguishes four families of failure:
//! - **Construction**: [`CacheError::CyclicSchematic`] — the schematic graph
//!   contains an inheritance cycle and no cache is created.
//! - **Lifecycle**: [`CacheError::Shutdown`] — the cache no longer accepts
//!   requests. Never cached per-entry.
//! - **Request-scoped**: [`CacheError::Canceled`] and
//!   [`CacheError::DeadlineExceeded`] — the requester gave up. These are never
//!   promoted to permanent per-entry state.
//! - **Permanent per-name**: [`CacheError::SchematicNotFound`] and
//!   [`CacheError::Parse`] — cached in the entry and returned identically to
//!   every subsequent requester.
//!
//! Errors that travel through the request cycle are decorated with a
//! [`CacheError::Request`] envelope carrying the template name and the elapsed
//! request time. Because cached errors are delivered to an arbitrary number of
//! requesters, every variant is `Clone`; parse-layer sources are shared behind
//! an [`Arc`] via [`SharedFailure`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// A parse-layer failure shared by every requester of a cache entry.
///
/// Wraps the underlying [`anyhow::Error`] so that a single failed parse can be
/// cloned into any number of delivered results while keeping the full error
/// chain intact.
#[derive(Debug, Clone)]
pub struct SharedFailure(Arc<anyhow::Error>);

impl SharedFailure {
    pub(crate) fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

impl fmt::Display for SharedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SharedFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source: &(dyn std::error::Error + Send + Sync + 'static) = (*self.0).as_ref();
        Some(source)
    }
}

/// Every failure mode observable through the cache's public surface.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// The schematic graph contains an inheritance cycle. The payload lists
    /// the participating template names in traversal order, ending with the
    /// name that closed the cycle.
    #[error("schematic contains a cycle: {}", cycle.join(" -> "))]
    CyclicSchematic { cycle: Vec<String> },

    /// The cache has begun shutting down and no longer accepts requests.
    #[error("cache is shut down")]
    Shutdown,

    /// The requested name (or one of its ancestors) has no schematic.
    #[error("no schematic named {name:?}")]
    SchematicNotFound { name: String },

    /// The request's cancellation handle fired before a result was produced.
    #[error("request canceled")]
    Canceled,

    /// The request's deadline elapsed before a result was produced.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The external parser failed to produce an artifact for this template.
    #[error("failed to parse template {name:?}")]
    Parse {
        name: String,
        #[source]
        source: SharedFailure,
    },

    /// Cloning the cached artifact for delivery failed. Affects only the
    /// requester being served; the cached artifact remains valid.
    #[error("failed to clone cached template {name:?}")]
    CloneFailed {
        name: String,
        #[source]
        source: SharedFailure,
    },

    /// Envelope decorating any other error with request context.
    #[error("request for template {name:?} failed after {elapsed:?}")]
    Request {
        name: String,
        elapsed: Duration,
        #[source]
        source: Box<CacheError>,
    },

    /// A `global::get` was issued before `global::initialize`.
    #[error("global cache has not been initialized")]
    NotInitialized,

    /// `global::initialize` was called while a global cache is running.
    #[error("global cache is already running")]
    AlreadyInitialized,
}

impl CacheError {
    pub(crate) fn parse(name: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Parse {
            name: name.into(),
            source: SharedFailure::new(source),
        }
    }

    pub(crate) fn clone_failed(name: impl Into<String>, source: anyhow::Error) -> Self {
        Self::CloneFailed {
            name: name.into(),
            source: SharedFailure::new(source),
        }
    }

    pub(crate) fn request(name: impl Into<String>, elapsed: Duration, source: CacheError) -> Self {
        Self::Request {
            name: name.into(),
            elapsed,
            source: Box::new(source),
        }
    }

    /// The innermost error, with any [`CacheError::Request`] envelopes
    /// stripped. Nested requests decorate at each level, so a failure that
    /// crossed several inheritance hops may be wrapped more than once.
    pub fn root(&self) -> &CacheError {
        match self {
            Self::Request { source, .. } => source.root(),
            other => other,
        }
    }

    /// True if the request was canceled via its cancellation handle.
    pub fn is_canceled(&self) -> bool {
        matches!(self.root(), Self::Canceled)
    }

    /// True if the request's deadline elapsed.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.root(), Self::DeadlineExceeded)
    }

    /// True for either member of the cancellation family.
    pub fn is_cancellation(&self) -> bool {
        self.is_canceled() || self.is_deadline_exceeded()
    }
}
