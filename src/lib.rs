//! Laminate — a concurrent, non-blocking cache of composable templates.
//!
//! Templates are declared as a [`CacheSchematic`]: an acyclic inheritance
//! graph in which each named template lists an optional base template and the
//! fragment files layered on top of it. A [`TemplateCache`] parses each
//! template lazily on first request — recursively parsing base templates it
//! does not yet hold — and memoizes the compiled artifact for the lifetime of
//! the cache. Permanent parse failures are memoized too; transient
//! cancellations are not, leaving the entry eligible for retry.
//!
//! # Core Modules
//!
//! - [`cache`] - the work loop, request front-end, and lifecycle controller
//! - [`schematic`] - template descriptors and inheritance-graph validation
//! - [`parser`] - the external parser seam and the Tera-backed implementation
//! - [`scope`] - request cancellation handles with deadline composition
//! - [`logger`] - structured cache events and pluggable sinks
//! - [`error`] - the error taxonomy
//! - [`global`] - opt-in process-wide cache
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use laminate::{CacheSchematic, RequestScope, TemplateCache, TemplateSchematic, TeraParser};
//!
//! # async fn example() -> Result<(), laminate::CacheError> {
//! let mut schematic = CacheSchematic::new();
//! schematic.insert("base", TemplateSchematic::root(["templates/base.html"]));
//! schematic.insert("nav", TemplateSchematic::extends("base", ["templates/nav.html"]));
//! schematic.insert("home", TemplateSchematic::extends("nav", ["templates/home.html"]));
//!
//! let cache = TemplateCache::builder(schematic, TeraParser::new())
//!     .global_timeout(Duration::from_secs(5))
//!     .build()?;
//!
//! // First request parses base, nav, and home; later requests are served
//! // from memory with a freshly cloned, independently renderable artifact.
//! let home = cache.get(&RequestScope::new(), "home").await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod global;
pub mod logger;
pub mod parser;
pub mod schematic;
pub mod scope;

pub use cache::{CacheBuilder, TemplateCache};
pub use error::{CacheError, SharedFailure};
pub use logger::{CacheEvent, CacheLogger, EventKind, NullLogger, TracingLogger};
pub use parser::{TemplateParser, TeraParser};
pub use schematic::{CacheSchematic, TemplateSchematic};
pub use scope::RequestScope;
