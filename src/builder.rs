//! Build Orchestrator
//!
//! Owns the bundles, the shared global stylesheet map and the build cache.
//! A one-shot build enumerates every bundle and loads the cache in
//! parallel, settles the global header, builds bundles wave by wave (a
//! bundle builds after every bundle it includes), then persists the cache.

use indexmap::IndexMap;
use rayon::prelude::*;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bundle::{
    lock, read_lock, write_lock, Bundle, BundleHandle, BuildSummary, ChangeFlags, SharedCache,
    SharedGlobals,
};
use crate::cache::BuildCache;
use crate::config::BuilderConfig;
use crate::error::{BuildError, BuildResult, FileError};
use crate::global_map::GlobalSourceFileMap;

// ═══════════════════════════════════════════════════════════════════════════════
// OBSERVER
// ═══════════════════════════════════════════════════════════════════════════════

/// Host callbacks. Every method defaults to doing nothing.
pub trait BuildObserver: Send + Sync {
    fn on_file_change(&self, _bundle: &str, _path: &Path) {}

    fn on_error(&self, _error: &FileError) {}

    fn on_rebuild(&self, _bundle: &str, _flags: ChangeFlags) {}
}

pub struct NoopObserver;

impl BuildObserver for NoopObserver {}

/// Reports through `tracing`.
pub struct LoggingObserver;

impl BuildObserver for LoggingObserver {
    fn on_file_change(&self, bundle: &str, path: &Path) {
        debug!("[{}] Changed: {:?}", bundle, path);
    }

    fn on_error(&self, error: &FileError) {
        error!("{}", error);
    }

    fn on_rebuild(&self, bundle: &str, flags: ChangeFlags) {
        info!(
            "[{}] Rebuilt (script: {}, style: {})",
            bundle, flags.script, flags.style
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Builder {
    config: BuilderConfig,
    bundles: IndexMap<String, BundleHandle>,
    globals: SharedGlobals,
    cache: SharedCache,
    observer: Arc<dyn BuildObserver>,
    /// Bundle names grouped so that every bundle comes after the bundles it
    /// includes.
    waves: Vec<Vec<String>>,
}

impl Builder {
    pub fn new(config: BuilderConfig) -> BuildResult<Self> {
        config.validate()?;
        let waves = build_waves(&config)?;

        let globals: SharedGlobals = Arc::new(RwLock::new(GlobalSourceFileMap::new()));
        let cache: SharedCache = Arc::new(Mutex::new(BuildCache::new(config.cache_file())));

        let mut bundles = IndexMap::new();
        for name in &config.bundles {
            let bundle = Bundle::new(name, &config, globals.clone(), cache.clone());
            bundles.insert(name.clone(), Arc::new(RwLock::new(bundle)));
        }
        for name in &config.bundles {
            for included in config.includes_of(name) {
                let handle = bundles[included.as_str()].clone();
                write_lock(&bundles[name.as_str()]).add_include(handle);
            }
        }

        Ok(Builder {
            config,
            bundles,
            globals,
            cache,
            observer: Arc::new(LoggingObserver),
            waves,
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn BuildObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn observer(&self) -> &dyn BuildObserver {
        self.observer.as_ref()
    }

    pub fn bundle(&self, name: &str) -> Option<&BundleHandle> {
        self.bundles.get(name)
    }

    pub fn bundles(&self) -> impl Iterator<Item = (&String, &BundleHandle)> {
        self.bundles.iter()
    }

    pub fn globals(&self) -> &SharedGlobals {
        &self.globals
    }

    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    /// Bundles that directly include `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.config
            .bundles
            .iter()
            .filter(|b| self.config.includes_of(b).iter().any(|i| i == name))
            .cloned()
            .collect()
    }

    /// One-shot build of every bundle.
    ///
    /// Fails with [`BuildError::Failed`] when any file failed to transform,
    /// unless `degradeErrors` is set, in which case failures are only logged.
    pub fn build(&self) -> BuildResult<Vec<BuildSummary>> {
        let started = Instant::now();
        write_lock(&self.globals).clear();

        let (_, starts) = rayon::join(
            || lock(&self.cache).start(),
            || {
                self.bundles
                    .par_values()
                    .map(|handle| write_lock(handle).start())
                    .collect::<Vec<_>>()
            },
        );

        {
            let mut globals = write_lock(&self.globals);
            for result in starts {
                for file in result? {
                    globals.add(file);
                }
            }
            globals.sort();

            let cache = lock(&self.cache);
            if globals.check_for_changes(cache.cached_globals()) {
                globals.recompute();
            } else {
                globals.use_cached_header(cache.cached_header().to_string());
                debug!("Global stylesheet set unchanged, reusing cached header");
            }
        }

        let mut summaries = Vec::with_capacity(self.bundles.len());
        for wave in &self.waves {
            let results: Vec<BuildResult<BuildSummary>> = wave
                .par_iter()
                .map(|name| write_lock(&self.bundles[name.as_str()]).build())
                .collect();
            for result in results {
                summaries.push(result?);
            }
        }

        let errors = self.errors();
        for error in &errors {
            self.observer.on_error(error);
        }

        if let Err(e) = self.save_cache() {
            warn!("Failed to save build cache: {}", e);
        }

        info!(
            "Built {} bundle(s) in {}ms ({} transformed, {} from cache, {} error(s))",
            summaries.len(),
            started.elapsed().as_millis(),
            summaries.iter().map(|s| s.transformed).sum::<usize>(),
            summaries.iter().map(|s| s.cache_hits).sum::<usize>(),
            errors.len()
        );

        if !errors.is_empty() && !self.config.degrade_errors {
            return Err(BuildError::Failed(errors));
        }
        Ok(summaries)
    }

    /// Every file error currently recorded across all bundles.
    pub fn errors(&self) -> Vec<FileError> {
        self.bundles
            .values()
            .flat_map(|handle| read_lock(handle).errors())
            .collect()
    }

    /// Persist every bundle's current outputs along with the global set.
    pub fn save_cache(&self) -> BuildResult<()> {
        let records = self
            .bundles
            .iter()
            .map(|(name, handle)| (name.clone(), read_lock(handle).cache_records()))
            .collect();
        let globals = read_lock(&self.globals);
        lock(&self.cache).save(&globals, records)?;
        Ok(())
    }
}

/// Group bundles into build waves by include depth. Include cycles are a
/// configuration error.
fn build_waves(config: &BuilderConfig) -> BuildResult<Vec<Vec<String>>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Visit {
        Pending,
        Active,
        Done(usize),
    }

    fn depth(
        name: &str,
        config: &BuilderConfig,
        state: &mut IndexMap<String, Visit>,
    ) -> BuildResult<usize> {
        match state.get(name).copied().unwrap_or(Visit::Pending) {
            Visit::Done(d) => return Ok(d),
            Visit::Active => {
                return Err(BuildError::Config(format!(
                    "include cycle through bundle \"{}\"",
                    name
                )))
            }
            Visit::Pending => {}
        }
        state.insert(name.to_string(), Visit::Active);
        let mut d = 0;
        for included in config.includes_of(name) {
            d = d.max(depth(included, config, state)? + 1);
        }
        state.insert(name.to_string(), Visit::Done(d));
        Ok(d)
    }

    let mut state = IndexMap::new();
    let mut waves: Vec<Vec<String>> = Vec::new();
    for name in &config.bundles {
        let d = depth(name, config, &mut state)?;
        if waves.len() <= d {
            waves.resize(d + 1, Vec::new());
        }
        waves[d].push(name.clone());
    }
    Ok(waves)
}
