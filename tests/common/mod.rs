//! Shared test harness: an instrumented fake parser, a recording logger,
//! and schematic fixtures.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use laminate::{
    CacheEvent, CacheLogger, CacheSchematic, EventKind, TemplateParser, TemplateSchematic,
};
use tokio::sync::{mpsc, watch};

/// Compiled-template stand-in: the ordered list of fragment paths that were
/// layered into it. Two artifacts "render identically" iff their layers are
/// equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layered {
    pub layers: Vec<String>,
}

struct ParserState {
    calls: Mutex<Vec<String>>,
    gates: Mutex<HashMap<String, watch::Receiver<bool>>>,
    gate_controls: Mutex<HashMap<String, watch::Sender<bool>>>,
    failing: Mutex<HashSet<String>>,
    fail_next_clone: AtomicBool,
    started_tx: mpsc::UnboundedSender<String>,
    started_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Instrumented [`TemplateParser`]: counts invocations, announces each parse
/// start, and can hold or fail parses for specific fragment keys.
///
/// The key of a parse is its fragment paths joined with `+`; the fixtures in
/// this harness use one fragment per template, so keys read like `nav.frag`.
#[derive(Clone)]
pub struct FakeParser {
    state: Arc<ParserState>,
}

impl FakeParser {
    pub fn new() -> Self {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(ParserState {
                calls: Mutex::new(Vec::new()),
                gates: Mutex::new(HashMap::new()),
                gate_controls: Mutex::new(HashMap::new()),
                failing: Mutex::new(HashSet::new()),
                fail_next_clone: AtomicBool::new(false),
                started_tx,
                started_rx: tokio::sync::Mutex::new(started_rx),
            }),
        }
    }

    fn key(filepaths: &[PathBuf]) -> String {
        filepaths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Block future parses of `key` until [`FakeParser::release`].
    pub fn hold(&self, key: &str) {
        let (tx, rx) = watch::channel(false);
        self.state
            .gate_controls
            .lock()
            .unwrap()
            .insert(key.to_owned(), tx);
        self.state.gates.lock().unwrap().insert(key.to_owned(), rx);
    }

    pub fn release(&self, key: &str) {
        if let Some(gate) = self.state.gate_controls.lock().unwrap().get(key) {
            let _ = gate.send(true);
        }
    }

    /// Make every parse of `key` fail.
    pub fn fail(&self, key: &str) {
        self.state.failing.lock().unwrap().insert(key.to_owned());
    }

    /// Make the next `clone_artifact` call fail, then recover.
    pub fn fail_next_clone(&self) {
        self.state.fail_next_clone.store(true, Ordering::SeqCst);
    }

    /// How many times `key` was parsed.
    pub fn calls(&self, key: &str) -> usize {
        self.state
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.as_str() == key)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.state.calls.lock().unwrap().len()
    }

    /// Next parse-start announcement, in invocation order.
    pub async fn started(&self) -> String {
        tokio::time::timeout(Duration::from_secs(5), async {
            self.state
                .started_rx
                .lock()
                .await
                .recv()
                .await
                .expect("parser state dropped")
        })
        .await
        .expect("timed out waiting for a parse to start")
    }

    async fn begin(&self, key: &str) -> Result<()> {
        self.state.calls.lock().unwrap().push(key.to_owned());
        let _ = self.state.started_tx.send(key.to_owned());

        let gate = self.state.gates.lock().unwrap().get(key).cloned();
        if let Some(mut gate) = gate {
            gate.wait_for(|open| *open)
                .await
                .map_err(|_| anyhow!("gate dropped for {key}"))?;
        }

        if self.state.failing.lock().unwrap().contains(key) {
            return Err(anyhow!("synthetic parse failure for {key}"));
        }
        Ok(())
    }
}

#[async_trait]
impl TemplateParser for FakeParser {
    type Artifact = Layered;

    async fn parse(&self, filepaths: &[PathBuf]) -> Result<Layered> {
        let key = Self::key(filepaths);
        self.begin(&key).await?;
        Ok(Layered {
            layers: filepaths.iter().map(|p| p.display().to_string()).collect(),
        })
    }

    async fn parse_onto(&self, base: Layered, filepaths: &[PathBuf]) -> Result<Layered> {
        let key = Self::key(filepaths);
        self.begin(&key).await?;
        let mut layers = base.layers;
        layers.extend(filepaths.iter().map(|p| p.display().to_string()));
        Ok(Layered { layers })
    }

    fn clone_artifact(&self, artifact: &Layered) -> Result<Layered> {
        if self.state.fail_next_clone.swap(false, Ordering::SeqCst) {
            return Err(anyhow!("synthetic clone failure"));
        }
        Ok(artifact.clone())
    }
}

/// [`CacheLogger`] that records every event for later assertions.
#[derive(Clone, Default)]
pub struct RecordingLogger {
    events: Arc<Mutex<Vec<(EventKind, Option<String>)>>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub fn count_for(&self, kind: EventKind, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, n)| *k == kind && n.as_deref() == Some(name))
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Poll until at least one `kind` event for `name` has been recorded.
    pub async fn wait_for(&self, kind: EventKind, name: &str) {
        for _ in 0..400 {
            if self.count_for(kind, name) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {kind:?} event for template {name:?}");
    }
}

impl CacheLogger for RecordingLogger {
    fn log(&self, event: CacheEvent<'_>) {
        self.events
            .lock()
            .unwrap()
            .push((event.kind(), event.name().map(str::to_owned)));
    }
}

/// base <- nav <- {body1, body2}, one fragment per template.
pub fn layered_schematic() -> CacheSchematic {
    let mut schematic = CacheSchematic::new();
    schematic.insert("base", TemplateSchematic::root(["base.frag"]));
    schematic.insert("nav", TemplateSchematic::extends("base", ["nav.frag"]));
    schematic.insert("body1", TemplateSchematic::extends("nav", ["body1.frag"]));
    schematic.insert("body2", TemplateSchematic::extends("nav", ["body2.frag"]));
    schematic
}
