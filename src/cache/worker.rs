//! The work loop and its parse/deliver workers.
//!
//! One long-lived task owns the name-to-entry map and serializes entry
//! creation; parsing and delivery happen on short-lived spawned tasks so the
//! loop stays responsive. A parser runs at most once per entry per retry
//! cycle, and recursion across the inheritance graph happens between tasks —
//! a parser that needs its base template submits an ordinary request back
//! into the loop — so no future ever contains itself.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::cache::TemplateCache;
use crate::cache::entry::{CacheEntry, EntryOutcome};
use crate::error::CacheError;
use crate::logger::CacheEvent;
use crate::parser::TemplateParser;
use crate::scope::RequestScope;

/// A request in flight from the front-end to the work loop.
pub(crate) struct Request<A> {
    pub(crate) meta: RequestMeta,
    /// Capacity-one slot for the single result. A send racing a requester
    /// that already returned is absorbed harmlessly.
    pub(crate) result_tx: oneshot::Sender<EntryOutcome<A>>,
}

/// The request fields shared with workers spawned on its behalf.
#[derive(Clone)]
pub(crate) struct RequestMeta {
    pub(crate) name: String,
    pub(crate) start: Instant,
    pub(crate) scope: RequestScope,
}

/// Single-writer owner of the name-to-entry map.
///
/// Exits when the input-closed token fires or every sender is gone. On exit
/// the heartbeat sender drops (observable closure) and the cache's `done`
/// token is cancelled.
pub(crate) async fn run_work_loop<P: TemplateParser>(
    cache: TemplateCache<P>,
    mut requests: mpsc::Receiver<Request<P::Artifact>>,
    heartbeat: watch::Sender<u64>,
) {
    let mut entries: HashMap<String, Arc<CacheEntry<P::Artifact>>> = HashMap::new();
    let mut beats: u64 = 0;

    loop {
        let request = tokio::select! {
            _ = cache.shared.input_closed.cancelled() => break,
            received = requests.recv() => match received {
                Some(request) => request,
                None => break,
            },
        };

        beats += 1;
        heartbeat.send_replace(beats);

        let logger = &cache.shared.logger;
        logger.log(CacheEvent::RequestReceived {
            name: &request.meta.name,
        });

        // Heartbeat precedes this filter, so observable heartbeats include
        // requests dropped here. The front-end observes the cancellation
        // through its own handle; no reply is owed.
        if request.meta.scope.is_fired() {
            logger.log(CacheEvent::RequestInterrupted {
                name: &request.meta.name,
            });
            continue;
        }

        let entry = match entries.get(&request.meta.name) {
            Some(entry) => Arc::clone(entry),
            None => {
                let snapshot = cache.shared.schematic.get(&request.meta.name).cloned();
                let entry = Arc::new(CacheEntry::new(snapshot));
                entries.insert(request.meta.name.clone(), Arc::clone(&entry));
                spawn_parser(cache.clone(), Arc::clone(&entry), request.meta.clone());
                entry
            }
        };

        tokio::spawn(run_deliverer(cache.clone(), entry, request));
    }

    cache.shared.done.cancel();
}

/// Start a parser for `entry` on behalf of the request described by `meta`.
/// The loop calls this for freshly allocated entries; deliverers call it
/// after winning a retry claim.
pub(crate) fn spawn_parser<P: TemplateParser>(
    cache: TemplateCache<P>,
    entry: Arc<CacheEntry<P::Artifact>>,
    meta: RequestMeta,
) {
    cache.shared.logger.log(CacheEvent::ParseStarted { name: &meta.name });
    tokio::spawn(run_parser(cache, entry, meta));
}

async fn run_parser<P: TemplateParser>(
    cache: TemplateCache<P>,
    entry: Arc<CacheEntry<P::Artifact>>,
    meta: RequestMeta,
) {
    let outcome = attempt_parse(&cache, &entry, &meta).await;
    let logger = &cache.shared.logger;
    match outcome {
        Ok(artifact) => {
            logger.log(CacheEvent::ParseSucceeded { name: &meta.name });
            entry.complete(Ok(artifact));
        }
        Err(err) if cache.retryable(&err) => {
            logger.log(CacheEvent::RetryScheduled { name: &meta.name });
            entry.signal_retry();
        }
        Err(err) => {
            if !matches!(err.root(), CacheError::SchematicNotFound { .. }) {
                logger.log(CacheEvent::ParseFailed { name: &meta.name });
            }
            entry.complete(Err(err));
        }
    }
}

async fn attempt_parse<P: TemplateParser>(
    cache: &TemplateCache<P>,
    entry: &CacheEntry<P::Artifact>,
    meta: &RequestMeta,
) -> EntryOutcome<P::Artifact> {
    if let Some(reason) = meta.scope.fire_reason() {
        return Err(reason);
    }

    let Some(schematic) = entry.schematic() else {
        cache
            .shared
            .logger
            .log(CacheEvent::SchematicMissing { name: &meta.name });
        return Err(CacheError::SchematicNotFound {
            name: meta.name.clone(),
        });
    };

    match schematic.base.as_deref() {
        None => cache
            .shared
            .parser
            .parse(&schematic.filepaths)
            .await
            .map_err(|err| CacheError::parse(&meta.name, err)),
        Some(base) => {
            cache.shared.logger.log(CacheEvent::FetchingBase {
                name: &meta.name,
                base,
            });

            // The base request must honor the originating caller's
            // cancellation without being tied to this parser's own get
            // scope: a child token fires with the originator, and the guard
            // fires it when the parser exits.
            let (child, _guard) = meta.scope.child();
            let base_artifact = cache.get(&child, base).await?;

            cache
                .shared
                .parser
                .parse_onto(base_artifact, &schematic.filepaths)
                .await
                .map_err(|err| CacheError::parse(&meta.name, err))
        }
    }
}

/// Serve one request from its entry: wait for the terminal outcome, spawning
/// a replacement parser if this deliverer wins a pending retry, and give up
/// silently once the requester's scope fires.
async fn run_deliverer<P: TemplateParser>(
    cache: TemplateCache<P>,
    entry: Arc<CacheEntry<P::Artifact>>,
    request: Request<P::Artifact>,
) {
    let logger = &cache.shared.logger;
    let name = request.meta.name.as_str();
    let mut outcome_rx = entry.subscribe();

    let outcome = loop {
        {
            let published = outcome_rx.borrow_and_update();
            match published.as_ref() {
                Some(Ok(artifact)) => match cache.shared.parser.clone_artifact(artifact) {
                    Ok(clone) => {
                        logger.log(CacheEvent::DeliveringArtifact { name });
                        break Ok(clone);
                    }
                    Err(err) => {
                        logger.log(CacheEvent::CloneFailed { name });
                        break Err(CacheError::clone_failed(name, err));
                    }
                },
                Some(Err(err)) => {
                    logger.log(CacheEvent::DeliveringCachedError { name });
                    break Err(err.clone());
                }
                None => {}
            }
        }

        tokio::select! {
            _ = request.meta.scope.fired() => {
                logger.log(CacheEvent::RequestInterrupted { name });
                return;
            }
            _ = entry.claim_retry() => {
                // The previous parser emitted retry and exited, so no parser
                // is running; this deliverer restarts parsing for its own
                // request and keeps waiting.
                spawn_parser(cache.clone(), Arc::clone(&entry), request.meta.clone());
            }
            changed = outcome_rx.changed() => {
                // The entry owns the sender and this task holds the entry,
                // so closure cannot be observed here; bail out regardless.
                if changed.is_err() {
                    return;
                }
            }
        }
    };

    let _ = request.result_tx.send(outcome);
}
