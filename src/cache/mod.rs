//! The concurrent, non-blocking template cache.
//!
//! A [`TemplateCache`] lazily parses named composite templates assembled from
//! an inheritance graph of fragment files, and memoizes the result of every
//! parse — successful or terminally failed — for the lifetime of the cache.
//!
//! # Architecture
//!
//! - A single **work loop** task owns the name-to-entry map. Entry creation
//!   is serialized through it, so concurrent first-time requests for a name
//!   observe one entry and therefore one result.
//! - Each entry follows a **parse-once / deliver-many** contract: one parser
//!   task per retry cycle publishes the terminal outcome; one deliverer task
//!   per request waits for it and hands a safe clone to its requester.
//! - Cancellation is cooperative. A request's [`RequestScope`] preempts the
//!   front-end, its deliverer, and any recursive base-template requests made
//!   on its behalf. A parse aborted by cancellation is transient: the entry
//!   stays eligible for a retry instead of caching the error.
//!
//! # Example
//!
//! ```rust,no_run
//! use laminate::{CacheSchematic, RequestScope, TemplateCache, TemplateSchematic, TeraParser};
//!
//! # async fn example() -> Result<(), laminate::CacheError> {
//! let mut schematic = CacheSchematic::new();
//! schematic.insert("base", TemplateSchematic::root(["templates/base.html"]));
//! schematic.insert(
//!     "home",
//!     TemplateSchematic::extends("base", ["templates/home.html"]),
//! );
//!
//! let cache = TemplateCache::new(schematic, TeraParser::new())?;
//! let home = cache.get(&RequestScope::new(), "home").await?;
//! let html = home.render("home", &tera::Context::new()).expect("render");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::CacheError;
use crate::logger::{CacheEvent, CacheLogger, TracingLogger};
use crate::parser::TemplateParser;
use crate::schematic::CacheSchematic;
use crate::scope::RequestScope;

pub(crate) mod entry;
pub(crate) mod worker;

use worker::{Request, RequestMeta};

/// Submission queue depth between the front-end and the work loop. Kept
/// minimal so a stalled loop exerts immediate backpressure on submitters.
const REQUEST_BUFFER: usize = 1;

/// State shared by the cache handle, the work loop, and every worker task.
pub(crate) struct Shared<P: TemplateParser> {
    pub(crate) schematic: CacheSchematic,
    pub(crate) parser: P,
    pub(crate) logger: Arc<dyn CacheLogger>,
    global_timeout: Option<Duration>,
    retry_on_timeout: bool,
    request_tx: mpsc::Sender<Request<P::Artifact>>,
    heartbeat_rx: watch::Receiver<u64>,
    /// Fired when shutdown begins; `get` fails fast from then on.
    shutdown: CancellationToken,
    /// Fired when the work loop should stop receiving requests.
    pub(crate) input_closed: CancellationToken,
    /// Fired by the work loop when it has exited.
    pub(crate) done: CancellationToken,
    /// At-most-once guard across `shutdown` and `close`.
    shutdown_started: AtomicBool,
}

/// A concurrent, non-blocking cache of composable templates.
///
/// Cloning the handle is cheap and shares the underlying cache. The cache
/// runs until [`TemplateCache::shutdown`] or [`TemplateCache::close`]; it is
/// not torn down by dropping handles.
pub struct TemplateCache<P: TemplateParser> {
    pub(crate) shared: Arc<Shared<P>>,
}

impl<P: TemplateParser> Clone for TemplateCache<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: TemplateParser> std::fmt::Debug for TemplateCache<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateCache").finish_non_exhaustive()
    }
}

/// Configures and starts a [`TemplateCache`].
pub struct CacheBuilder<P: TemplateParser> {
    schematic: CacheSchematic,
    parser: P,
    global_timeout: Option<Duration>,
    logger: Option<Arc<dyn CacheLogger>>,
    retry_on_timeout: bool,
}

impl<P: TemplateParser> CacheBuilder<P> {
    /// Upper bound on any single `get`. Composes with the caller's deadline
    /// by taking the earlier of the two.
    pub fn global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = Some(timeout);
        self
    }

    /// Receive structured [`CacheEvent`]s. Defaults to [`TracingLogger`].
    pub fn logger(mut self, logger: Arc<dyn CacheLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Treat deadline-exceeded parse aborts as retryable instead of caching
    /// them. Cancellation is always retryable regardless of this option.
    pub fn retry_on_timeout(mut self) -> Self {
        self.retry_on_timeout = true;
        self
    }

    /// Validate the schematic and start the work loop.
    ///
    /// Fails with [`CacheError::CyclicSchematic`] if the inheritance graph
    /// contains a cycle; no cache is created in that case. Must be called
    /// from within a tokio runtime.
    pub fn build(self) -> Result<TemplateCache<P>, CacheError> {
        self.schematic.detect_cycle()?;

        let (request_tx, request_rx) = mpsc::channel(REQUEST_BUFFER);
        let (heartbeat_tx, heartbeat_rx) = watch::channel(0);

        let cache = TemplateCache {
            shared: Arc::new(Shared {
                schematic: self.schematic,
                parser: self.parser,
                logger: self.logger.unwrap_or_else(|| Arc::new(TracingLogger)),
                global_timeout: self.global_timeout,
                retry_on_timeout: self.retry_on_timeout,
                request_tx,
                heartbeat_rx,
                shutdown: CancellationToken::new(),
                input_closed: CancellationToken::new(),
                done: CancellationToken::new(),
                shutdown_started: AtomicBool::new(false),
            }),
        };

        tokio::spawn(worker::run_work_loop(
            cache.clone(),
            request_rx,
            heartbeat_tx,
        ));
        Ok(cache)
    }
}

impl<P: TemplateParser> TemplateCache<P> {
    /// Start a cache over `schematic` with default options.
    ///
    /// The schematic is taken by value: callers that keep a copy can mutate
    /// it freely afterwards without affecting the cache.
    pub fn new(schematic: CacheSchematic, parser: P) -> Result<Self, CacheError> {
        Self::builder(schematic, parser).build()
    }

    /// Configure a cache before starting it.
    pub fn builder(schematic: CacheSchematic, parser: P) -> CacheBuilder<P> {
        CacheBuilder {
            schematic,
            parser,
            global_timeout: None,
            logger: None,
            retry_on_timeout: false,
        }
    }

    /// Fetch the named template, parsing it (and, recursively, its base
    /// templates) on first reference.
    ///
    /// Returns a clone of the cached artifact that can be rendered
    /// independently of the original. Preemptible at every suspension point
    /// via `scope`; a preempted call returns a cancellation-family error
    /// decorated with the template name and elapsed time, and never leaves
    /// the entry in a permanently failed state.
    pub async fn get(&self, scope: &RequestScope, name: &str) -> Result<P::Artifact, CacheError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(CacheError::Shutdown);
        }

        let start = Instant::now();
        // Child scope: bounded by the global timeout, and cancelled on return
        // so recursive work spawned for this request is preempted with it.
        let (scope, _guard) = scope.bounded(self.shared.global_timeout);

        let (result_tx, result_rx) = oneshot::channel();
        let request = Request {
            meta: RequestMeta {
                name: name.to_owned(),
                start,
                scope: scope.clone(),
            },
            result_tx,
        };

        tokio::select! {
            reason = scope.fired() => {
                return Err(CacheError::request(name, start.elapsed(), reason));
            }
            _ = self.shared.shutdown.cancelled() => {
                return Err(CacheError::Shutdown);
            }
            sent = self.shared.request_tx.send(request) => {
                if sent.is_err() {
                    // The work loop has exited and drained its queue.
                    return Err(CacheError::Shutdown);
                }
            }
        }

        tokio::select! {
            reason = scope.fired() => {
                Err(CacheError::request(name, start.elapsed(), reason))
            }
            delivered = result_rx => match delivered {
                Ok(Ok(artifact)) => Ok(artifact),
                Ok(Err(err)) => Err(CacheError::request(name, start.elapsed(), err)),
                // The result slot was dropped without a send: either the loop
                // discarded the request on cancellation, or it exited.
                Err(_) => match scope.fire_reason() {
                    Some(reason) => Err(CacheError::request(name, start.elapsed(), reason)),
                    None => Err(CacheError::Shutdown),
                },
            },
        }
    }

    /// Subscribe to the work loop's heartbeat.
    ///
    /// The value increments once per received request; the channel closes
    /// when the loop exits, which is the observable signal that shutdown has
    /// completed.
    pub fn heartbeat(&self) -> watch::Receiver<u64> {
        self.shared.heartbeat_rx.clone()
    }

    /// Shut down gracefully. New `get` calls fail immediately with
    /// [`CacheError::Shutdown`]; requests already submitted continue to be
    /// served until `grace_period` elapses, after which the request input is
    /// closed and the work loop exits.
    ///
    /// Subsequent calls to `shutdown` or [`TemplateCache::close`] are no-ops.
    /// Must be called from within a tokio runtime.
    pub fn shutdown(&self, grace_period: Duration) {
        if self.shared.shutdown_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.logger.log(CacheEvent::ShutdownBegun);
        self.shared.shutdown.cancel();

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            shared.input_closed.cancel();
            shared.logger.log(CacheEvent::ShutdownComplete);
        });
    }

    /// Shut down immediately, abandoning queued requests. Subsequent calls to
    /// `close` or [`TemplateCache::shutdown`] are no-ops.
    pub fn close(&self) {
        if self.shared.shutdown_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.logger.log(CacheEvent::ShutdownBegun);
        self.shared.shutdown.cancel();
        self.shared.input_closed.cancel();
        self.shared.logger.log(CacheEvent::ShutdownComplete);
    }

    /// True once the work loop has exited. A terminated cache serves nothing
    /// and can be replaced.
    pub fn is_terminated(&self) -> bool {
        self.shared.done.is_cancelled()
    }

    /// Classification policy for parse aborts: cancellation is always
    /// transient; deadline expiry is transient only when the operator opted
    /// in to retrying timeouts.
    pub(crate) fn retryable(&self, err: &CacheError) -> bool {
        err.is_canceled() || (self.shared.retry_on_timeout && err.is_deadline_exceeded())
    }
}
