//! The external parser seam and the Tera-backed implementation.
//!
//! The cache itself never reads template files; it delegates to a
//! [`TemplateParser`]. The contract has three operations: compile a root
//! template from fragment files, compile a child template onto an
//! already-compiled base, and clone a compiled artifact so it can be rendered
//! independently of the cached original. Cached artifacts are never handed
//! out directly — every delivery clones.
//!
//! [`TeraParser`] implements the contract over [`tera::Tera`]. Fragment files
//! are registered by file stem, so a child fragment can reference its parent
//! with Tera's native inheritance: `{% extends "base" %}`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tera::Tera;
use tokio::fs;

/// Compiles template fragments into executable artifacts.
///
/// Implementations are shared across the work loop and its workers, so they
/// must be `Send + Sync`. Parse operations are async because they typically
/// perform file I/O; cloning is sync and should be cheap.
#[async_trait]
pub trait TemplateParser: Send + Sync + 'static {
    /// The compiled, executable template type.
    type Artifact: Send + Sync + 'static;

    /// Compile a root template from `filepaths`.
    async fn parse(&self, filepaths: &[PathBuf]) -> Result<Self::Artifact>;

    /// Compile a child template by layering `filepaths` onto `base`.
    async fn parse_onto(
        &self,
        base: Self::Artifact,
        filepaths: &[PathBuf],
    ) -> Result<Self::Artifact>;

    /// Produce a copy of `artifact` that can be rendered without affecting
    /// the cached original.
    fn clone_artifact(&self, artifact: &Self::Artifact) -> Result<Self::Artifact>;
}

/// [`TemplateParser`] backed by the Tera template engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct TeraParser;

impl TeraParser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TemplateParser for TeraParser {
    type Artifact = Tera;

    async fn parse(&self, filepaths: &[PathBuf]) -> Result<Tera> {
        let mut tera = Tera::default();
        register_fragments(&mut tera, filepaths).await?;
        Ok(tera)
    }

    async fn parse_onto(&self, base: Tera, filepaths: &[PathBuf]) -> Result<Tera> {
        let mut tera = base;
        register_fragments(&mut tera, filepaths).await?;
        Ok(tera)
    }

    fn clone_artifact(&self, artifact: &Tera) -> Result<Tera> {
        Ok(artifact.clone())
    }
}

/// Read each fragment and register it under its file stem. Registration is
/// batched so Tera rebuilds its inheritance chains once, after all fragments
/// in the layer are present.
async fn register_fragments(tera: &mut Tera, filepaths: &[PathBuf]) -> Result<()> {
    let mut fragments = Vec::with_capacity(filepaths.len());
    for path in filepaths {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read template fragment {}", path.display()))?;
        fragments.push((fragment_name(path), contents));
    }
    tera.add_raw_templates(fragments)
        .context("failed to compile template fragments")?;
    Ok(())
}

fn fragment_name(path: &Path) -> String {
    match path.file_stem() {
        Some(stem) => stem.to_string_lossy().into_owned(),
        None => path.to_string_lossy().into_owned(),
    }
}
