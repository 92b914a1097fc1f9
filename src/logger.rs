//! Structured cache events and the sinks that receive them.
//!
//! Every observable step of the request cycle emits a [`CacheEvent`] to the
//! configured [`CacheLogger`]. The default sink, [`TracingLogger`], forwards
//! events to the `tracing` ecosystem; [`NullLogger`] discards them. Tests use
//! recording sinks to assert cache behavior that is otherwise invisible, such
//! as "this request was served without re-parsing".

/// One observable step in the life of the cache.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub enum CacheEvent<'a> {
    /// The work loop received a request.
    RequestReceived { name: &'a str },
    /// A request's cancellation handle fired before it could be served.
    RequestInterrupted { name: &'a str },
    /// A parser was started for an entry.
    ParseStarted { name: &'a str },
    /// A parser produced an artifact.
    ParseSucceeded { name: &'a str },
    /// A parser failed terminally; the error is now cached for the entry.
    ParseFailed { name: &'a str },
    /// The requested name has no schematic.
    SchematicMissing { name: &'a str },
    /// A parser is requesting its base template from the cache.
    FetchingBase { name: &'a str, base: &'a str },
    /// A parser aborted on a transient cancellation; the entry may be retried.
    RetryScheduled { name: &'a str },
    /// A deliverer returned the entry's cached terminal error.
    DeliveringCachedError { name: &'a str },
    /// A deliverer returned a clone of the cached artifact.
    DeliveringArtifact { name: &'a str },
    /// Cloning the cached artifact failed for one requester.
    CloneFailed { name: &'a str },
    /// Shutdown was initiated.
    ShutdownBegun,
    /// The request input was closed; the work loop will exit.
    ShutdownComplete,
}

/// Discriminant of a [`CacheEvent`], convenient for filtering and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EventKind {
    RequestReceived,
    RequestInterrupted,
    ParseStarted,
    ParseSucceeded,
    ParseFailed,
    SchematicMissing,
    FetchingBase,
    RetryScheduled,
    DeliveringCachedError,
    DeliveringArtifact,
    CloneFailed,
    ShutdownBegun,
    ShutdownComplete,
}

impl CacheEvent<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::RequestReceived { .. } => EventKind::RequestReceived,
            Self::RequestInterrupted { .. } => EventKind::RequestInterrupted,
            Self::ParseStarted { .. } => EventKind::ParseStarted,
            Self::ParseSucceeded { .. } => EventKind::ParseSucceeded,
            Self::ParseFailed { .. } => EventKind::ParseFailed,
            Self::SchematicMissing { .. } => EventKind::SchematicMissing,
            Self::FetchingBase { .. } => EventKind::FetchingBase,
            Self::RetryScheduled { .. } => EventKind::RetryScheduled,
            Self::DeliveringCachedError { .. } => EventKind::DeliveringCachedError,
            Self::DeliveringArtifact { .. } => EventKind::DeliveringArtifact,
            Self::CloneFailed { .. } => EventKind::CloneFailed,
            Self::ShutdownBegun => EventKind::ShutdownBegun,
            Self::ShutdownComplete => EventKind::ShutdownComplete,
        }
    }

    /// The template name the event concerns, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::RequestReceived { name }
            | Self::RequestInterrupted { name }
            | Self::ParseStarted { name }
            | Self::ParseSucceeded { name }
            | Self::ParseFailed { name }
            | Self::SchematicMissing { name }
            | Self::FetchingBase { name, .. }
            | Self::RetryScheduled { name }
            | Self::DeliveringCachedError { name }
            | Self::DeliveringArtifact { name }
            | Self::CloneFailed { name } => Some(name),
            Self::ShutdownBegun | Self::ShutdownComplete => None,
        }
    }
}

/// Sink for [`CacheEvent`]s.
///
/// Implementations must be cheap and non-blocking; events are emitted from
/// the work loop and from parse/deliver workers.
pub trait CacheLogger: Send + Sync {
    fn log(&self, event: CacheEvent<'_>);
}

/// Default sink: forwards events to `tracing` at debug level, with failures
/// at warn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl CacheLogger for TracingLogger {
    fn log(&self, event: CacheEvent<'_>) {
        match event {
            CacheEvent::RequestReceived { name } => {
                tracing::debug!(template = name, "request received");
            }
            CacheEvent::RequestInterrupted { name } => {
                tracing::debug!(template = name, "request interrupted");
            }
            CacheEvent::ParseStarted { name } => {
                tracing::debug!(template = name, "parsing template");
            }
            CacheEvent::ParseSucceeded { name } => {
                tracing::debug!(template = name, "template parsed");
            }
            CacheEvent::ParseFailed { name } => {
                tracing::warn!(template = name, "template parse failed");
            }
            CacheEvent::SchematicMissing { name } => {
                tracing::warn!(template = name, "no schematic for requested template");
            }
            CacheEvent::FetchingBase { name, base } => {
                tracing::debug!(template = name, base, "fetching base template");
            }
            CacheEvent::RetryScheduled { name } => {
                tracing::debug!(template = name, "parse aborted, retry scheduled");
            }
            CacheEvent::DeliveringCachedError { name } => {
                tracing::debug!(template = name, "delivering cached error");
            }
            CacheEvent::DeliveringArtifact { name } => {
                tracing::debug!(template = name, "delivering template");
            }
            CacheEvent::CloneFailed { name } => {
                tracing::warn!(template = name, "failed to clone cached template");
            }
            CacheEvent::ShutdownBegun => {
                tracing::info!("cache shutting down");
            }
            CacheEvent::ShutdownComplete => {
                tracing::info!("cache shutdown complete");
            }
        }
    }
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl CacheLogger for NullLogger {
    fn log(&self, _event: CacheEvent<'_>) {}
}
