//! # Source Bundler
//!
//! Incremental bundler for projects split into named bundles, each read from
//! `<projectRoot>/<Bundle>/Source`. Scripts are lowered and rewritten onto a
//! small runtime module registry, stylesheets are compiled against a shared
//! header built from every `*.global.scss`, and each bundle is packed into
//! `main.prebuilt.js`, `main.prebuilt.css` and `meta.json`.
//!
//! ```no_run
//! use source_bundler::{Builder, BuilderConfig};
//!
//! let config = BuilderConfig::new("/srv/app", &["UI", "Admin"]);
//! let builder = Builder::new(config)?;
//! builder.build()?;
//! # Ok::<(), source_bundler::BuildError>(())
//! ```

#[cfg(feature = "napi")]
use napi_derive::napi;

pub mod builder;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod global_map;
pub mod logging;
pub mod runtime;
pub mod source_file;
pub mod transform;
pub mod watch;

#[cfg(test)]
mod bundle_tests;

pub use builder::{BuildObserver, Builder, LoggingObserver, NoopObserver};
pub use bundle::{BuildSummary, Bundle, ChangeFlags};
pub use cache::BuildCache;
pub use config::BuilderConfig;
pub use error::{BuildError, BuildResult, FileError, TransformError};
pub use global_map::GlobalSourceFileMap;
pub use source_file::{FileKind, SourceFile};
pub use transform::{
    compile_stylesheet, transform_script, CompiledStylesheet, ScriptContext, ScriptOptions, ScriptOutput,
    StyleContext, TemplateLiteral, TypeDescriptor,
};
pub use watch::{watch, WatchHandle};

/// Build every configured bundle once. Takes the configuration as JSON and
/// returns the per-bundle summaries as JSON.
#[cfg(feature = "napi")]
#[napi]
pub fn build_bundles(config_json: String) -> napi::Result<String> {
    let config = BuilderConfig::from_json(&config_json)
        .map_err(|e| napi::Error::from_reason(e.to_string()))?;
    let builder = Builder::new(config).map_err(|e| napi::Error::from_reason(e.to_string()))?;
    let summaries = builder
        .build()
        .map_err(|e| napi::Error::from_reason(e.to_string()))?;
    serde_json::to_string(&summaries).map_err(|e| napi::Error::from_reason(e.to_string()))
}
