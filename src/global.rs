//! Process-wide template cache.
//!
//! An opt-in convenience layer for applications that want a single shared
//! cache without threading a [`TemplateCache`] handle through every call
//! site. The global cache is backed by [`TeraParser`]; applications with a
//! custom parser should hold their own [`TemplateCache`] instead.
//!
//! [`initialize`] must be called before [`get`]. Once the running cache has
//! been shut down and its work loop has exited, [`initialize`] may be called
//! again to start a replacement.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tera::Tera;

use crate::cache::{CacheBuilder, TemplateCache};
use crate::error::CacheError;
use crate::parser::TeraParser;
use crate::schematic::CacheSchematic;
use crate::scope::RequestScope;

static GLOBAL: RwLock<Option<TemplateCache<TeraParser>>> = RwLock::new(None);

fn current() -> Option<TemplateCache<TeraParser>> {
    GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Start the global cache with default options.
///
/// Fails with [`CacheError::AlreadyInitialized`] while a previously started
/// global cache is still running. The caller is responsible for eventually
/// stopping the cache via [`shutdown`] or [`close`].
pub fn initialize(schematic: CacheSchematic) -> Result<(), CacheError> {
    initialize_with(TemplateCache::builder(schematic, TeraParser::new()))
}

/// Start the global cache from a configured builder.
pub fn initialize_with(builder: CacheBuilder<TeraParser>) -> Result<(), CacheError> {
    let mut slot = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(cache) = slot.as_ref()
        && !cache.is_terminated()
    {
        return Err(CacheError::AlreadyInitialized);
    }
    *slot = Some(builder.build()?);
    Ok(())
}

/// Fetch a template from the global cache.
///
/// Fails with [`CacheError::NotInitialized`] if [`initialize`] has not been
/// called.
pub async fn get(scope: &RequestScope, name: &str) -> Result<Tera, CacheError> {
    let cache = current().ok_or(CacheError::NotInitialized)?;
    cache.get(scope, name).await
}

/// Gracefully shut down the global cache. See [`TemplateCache::shutdown`].
pub fn shutdown(grace_period: Duration) -> Result<(), CacheError> {
    let cache = current().ok_or(CacheError::NotInitialized)?;
    cache.shutdown(grace_period);
    Ok(())
}

/// Force the global cache to shut down. See [`TemplateCache::close`].
pub fn close() -> Result<(), CacheError> {
    let cache = current().ok_or(CacheError::NotInitialized)?;
    cache.close();
    Ok(())
}
