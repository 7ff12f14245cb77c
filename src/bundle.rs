//! Bundle
//!
//! One named unit of the project: its own scripts and stylesheets, static
//! assets, `module.json` exclusions, and handles to the bundles whose
//! outputs it includes. A build cycle is
//! start → build files → construct outputs → copy static assets.

use flate2::write::GzEncoder;
use flate2::Compression;
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::cache::{BuildCache, CachedFile};
use crate::config::BuilderConfig;
use crate::discovery::{discover_source_files, is_ignored_relative};
use crate::error::{BuildError, BuildResult, FileError};
use crate::global_map::{natural_cmp, GlobalSourceFileMap};
use crate::runtime::{entry_call, failure_stub, PREAMBLE};
use crate::source_file::{FileKind, FileStat, SourceFile};
use crate::transform::resolve::registry_key;
use crate::transform::stylesheet::error_comment;
use crate::transform::{
    compile_stylesheet, transform_script, ScriptContext, ScriptOptions, StyleContext,
    TemplateLiteral, TypeDescriptor,
};

pub const SCRIPT_ARTIFACT: &str = "main.prebuilt.js";
pub const STYLE_ARTIFACT: &str = "main.prebuilt.css";
pub const META_ARTIFACT: &str = "meta.json";

pub type BundleHandle = Arc<RwLock<Bundle>>;
pub type SharedGlobals = Arc<RwLock<GlobalSourceFileMap>>;
pub type SharedCache = Arc<Mutex<BuildCache>>;

// ═══════════════════════════════════════════════════════════════════════════════
// LOCKING
// ═══════════════════════════════════════════════════════════════════════════════

// A panicked build leaves its lock poisoned; later builds enter it anyway.

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// What a batch of file events touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeFlags {
    pub script: bool,
    pub style: bool,
    /// A global stylesheet changed; the header must be recomputed.
    pub global: bool,
    /// A `module.json` changed; inclusion filters must be re-applied.
    pub meta: bool,
}

impl ChangeFlags {
    pub fn script() -> Self {
        ChangeFlags {
            script: true,
            ..Default::default()
        }
    }

    pub fn style() -> Self {
        ChangeFlags {
            style: true,
            ..Default::default()
        }
    }

    pub fn any(&self) -> bool {
        self.script || self.style || self.global || self.meta
    }

    pub fn merge(&mut self, other: ChangeFlags) {
        self.script |= other.script;
        self.style |= other.style;
        self.global |= other.global;
        self.meta |= other.meta;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSummary {
    pub bundle: String,
    pub scripts: usize,
    pub stylesheets: usize,
    pub transformed: usize,
    pub cache_hits: usize,
    pub errors: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ModuleMeta {
    exclude: Vec<String>,
}

#[derive(Debug, Clone)]
struct ModuleMetaEntry {
    path: PathBuf,
    exclude: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct ModuleRange {
    start: usize,
    end: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BundleMeta<'m> {
    compile_time: u64,
    modules: IndexMap<&'m str, ModuleRange>,
    types: IndexMap<&'m str, &'m [TypeDescriptor]>,
    templates: Vec<&'m TemplateLiteral>,
    packages: Vec<&'m str>,
}

/// Everything a file transform needs besides the file itself.
struct TransformSettings<'s> {
    bundle: &'s str,
    bundles: &'s [String],
    static_url: &'s str,
    header: &'s str,
    header_hash: &'s str,
    minify: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUNDLE
// ═══════════════════════════════════════════════════════════════════════════════

pub struct Bundle {
    name: String,
    source_dir: PathBuf,
    canonical_source: Option<PathBuf>,
    pack_dir: PathBuf,
    static_url: String,
    entry_module: String,
    bundle_names: Vec<String>,
    minified: bool,
    compress: bool,
    /// Scripts and stylesheets keyed by module path, in enumeration order.
    files: IndexMap<String, SourceFile>,
    /// Static assets keyed by source-relative path.
    statics: IndexMap<String, SourceFile>,
    /// Logical module directory → `module.json` exclusions.
    module_meta: IndexMap<String, ModuleMetaEntry>,
    includes: Vec<BundleHandle>,
    globals: SharedGlobals,
    cache: SharedCache,
}

impl Bundle {
    pub fn new(
        name: &str,
        config: &BuilderConfig,
        globals: SharedGlobals,
        cache: SharedCache,
    ) -> Self {
        Bundle {
            name: name.to_string(),
            source_dir: config.source_dir(name),
            canonical_source: None,
            pack_dir: config.pack_dir(name),
            static_url: config.static_url(name),
            entry_module: config.entry_module.clone(),
            bundle_names: config.bundles.clone(),
            minified: config.minified,
            compress: config.compress,
            files: IndexMap::new(),
            statics: IndexMap::new(),
            module_meta: IndexMap::new(),
            includes: Vec::new(),
            globals,
            cache,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn pack_dir(&self) -> &Path {
        &self.pack_dir
    }

    pub fn files(&self) -> &IndexMap<String, SourceFile> {
        &self.files
    }

    pub fn statics(&self) -> &IndexMap<String, SourceFile> {
        &self.statics
    }

    pub fn add_include(&mut self, bundle: BundleHandle) {
        self.includes.push(bundle);
    }

    /// Ensure the pack directory exists and enumerate the source tree.
    /// Global stylesheets are handed back for the shared map.
    pub fn start(&mut self) -> BuildResult<Vec<SourceFile>> {
        self.files.clear();
        self.statics.clear();
        self.module_meta.clear();

        fs::create_dir_all(&self.pack_dir).map_err(|e| BuildError::io(&self.pack_dir, e))?;
        self.canonical_source = fs::canonicalize(&self.source_dir).ok();

        let mut globals = Vec::new();
        for file in discover_source_files(&self.source_dir, &self.name) {
            if let Some(global) = self.add_file(file) {
                globals.push(global);
            }
        }

        debug!(
            "[{}] {} source file(s), {} static asset(s), {} global stylesheet(s)",
            self.name,
            self.files.len(),
            self.statics.len(),
            globals.len()
        );
        Ok(globals)
    }

    /// Route a classified file into the right map. Global stylesheets are
    /// returned instead.
    fn add_file(&mut self, file: SourceFile) -> Option<SourceFile> {
        match file.kind {
            FileKind::Javascript => self.insert_file(file),
            FileKind::Scss if file.is_global => return Some(file),
            FileKind::Scss => self.insert_file(file),
            FileKind::ModuleMeta => self.load_module_meta(&file),
            FileKind::StaticAsset => {
                self.statics.insert(file.relative_path.clone(), file);
            }
            FileKind::None => {}
        }
        None
    }

    /// Third-party files never replace a first-party file at the same
    /// module path; first-party files always replace third-party ones.
    fn insert_file(&mut self, file: SourceFile) {
        if let Some(existing) = self.files.get(&file.module_path) {
            if file.third_party && !existing.third_party {
                debug!(
                    "[{}] Keeping first-party {} over {:?}",
                    self.name, file.module_path, file.path
                );
                return;
            }
        }
        self.files.insert(file.module_path.clone(), file);
    }

    fn load_module_meta(&mut self, file: &SourceFile) {
        let meta = match fs::read_to_string(&file.path) {
            Ok(json) => match serde_json::from_str::<ModuleMeta>(&json) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("[{}] Ignoring malformed {:?}: {}", self.name, file.path, e);
                    ModuleMeta::default()
                }
            },
            Err(e) => {
                warn!("[{}] Failed to read {:?}: {}", self.name, file.path, e);
                ModuleMeta::default()
            }
        };
        self.module_meta.insert(
            file.module_dir().to_string(),
            ModuleMetaEntry {
                path: file.path.clone(),
                exclude: meta.exclude,
            },
        );
    }

    /// Whether `file` is excluded from `consumer` by a `module.json` in its
    /// directory or any parent directory.
    pub fn is_excluded_for(&self, file: &SourceFile, consumer: &str) -> bool {
        let dir = file.module_dir();
        self.module_meta.iter().any(|(meta_dir, entry)| {
            let applies = dir == meta_dir
                || (dir.starts_with(meta_dir.as_str())
                    && dir.as_bytes().get(meta_dir.len()) == Some(&b'/'));
            applies && entry.exclude.iter().any(|e| e.eq_ignore_ascii_case(consumer))
        })
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Building
    // ───────────────────────────────────────────────────────────────────────────

    /// Full cycle after `start`: transform, construct outputs, copy assets.
    pub fn build(&mut self) -> BuildResult<BuildSummary> {
        let started = Instant::now();
        let (transformed, cache_hits) = self.build_files();
        self.construct_outputs()?;
        self.copy_static_assets();
        Ok(self.summary(transformed, cache_hits, started.elapsed()))
    }

    /// Watch-triggered rebuild: re-transform invalidated files and
    /// reconstruct outputs without re-enumerating.
    pub fn rebuild(&mut self, flags: ChangeFlags) -> BuildResult<BuildSummary> {
        let started = Instant::now();
        let (transformed, cache_hits) = self.build_files();
        self.construct_outputs()?;
        let summary = self.summary(transformed, cache_hits, started.elapsed());
        info!(
            "[{}] Rebuilt ({:?}): {} transformed in {}ms",
            self.name, flags, summary.transformed, summary.duration_ms
        );
        Ok(summary)
    }

    fn summary(&self, transformed: usize, cache_hits: usize, elapsed: Duration) -> BuildSummary {
        BuildSummary {
            bundle: self.name.clone(),
            scripts: self.files.values().filter(|f| f.is_script()).count(),
            stylesheets: self.files.values().filter(|f| f.is_stylesheet()).count(),
            transformed,
            cache_hits,
            errors: self.files.values().filter(|f| f.error.is_some()).count(),
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    /// Bring every script and stylesheet up to date: keep in-memory output
    /// that is still current, restore from the cache where valid, and
    /// transform the rest in parallel. Returns `(transformed, cache_hits)`.
    pub fn build_files(&mut self) -> (usize, usize) {
        let (header, header_hash) = {
            let globals = read_lock(&self.globals);
            (globals.header().to_string(), globals.header_hash().to_string())
        };

        let mut cache_hits = 0;
        {
            let cache = lock(&self.cache);
            for file in self.files.values_mut() {
                let current = file.transpiled.is_some()
                    && (!file.is_stylesheet() || file.header_hash.as_deref() == Some(header_hash.as_str()));
                if current {
                    continue;
                }
                file.transpiled = None;
                if cache.restore(&self.name, file, &header_hash) {
                    cache_hits += 1;
                }
            }
        }

        let settings = TransformSettings {
            bundle: &self.name,
            bundles: &self.bundle_names,
            static_url: &self.static_url,
            header: &header,
            header_hash: &header_hash,
            minify: self.minified,
        };

        let transformed: usize = self
            .files
            .par_values_mut()
            .filter(|f| f.transpiled.is_none())
            .map(|f| {
                transform_file(f, &settings);
                1
            })
            .sum();

        debug!(
            "[{}] {} file(s) transformed, {} restored from cache",
            self.name, transformed, cache_hits
        );
        (transformed, cache_hits)
    }

    /// Merge included bundles, then write the script, stylesheet and
    /// metadata artifacts.
    pub fn construct_outputs(&self) -> BuildResult<()> {
        let included: Vec<RwLockReadGuard<Bundle>> =
            self.includes.iter().map(|h| read_lock(h)).collect();

        let mut merged: IndexMap<&str, &SourceFile> = IndexMap::new();
        for bundle in &included {
            for (path, file) in &bundle.files {
                if bundle.is_excluded_for(file, &self.name) {
                    debug!("[{}] {} excluded by module.json", self.name, path);
                    continue;
                }
                merged.entry(path.as_str()).or_insert(file);
            }
        }
        for (path, file) in &self.files {
            if let Some(existing) = merged.get(path.as_str()) {
                if file.third_party && !existing.third_party {
                    continue;
                }
            }
            merged.insert(path.as_str(), file);
        }

        // Scripts, in map order.
        let mut js = String::from(PREAMBLE);
        let mut modules = IndexMap::new();
        let mut templates = Vec::new();
        let mut types = IndexMap::new();
        let mut packages: Vec<&str> = Vec::new();
        for (path, file) in merged.iter().filter(|(_, f)| f.is_script()) {
            let Some(code) = file.transpiled.as_deref() else {
                continue;
            };
            let start = js.len();
            js.push_str(code);
            if !code.ends_with('\n') {
                js.push('\n');
            }
            modules.insert(
                *path,
                ModuleRange {
                    start,
                    end: start + code.len(),
                },
            );
            templates.extend(file.templates.iter());
            if !file.types.is_empty() {
                types.insert(*path, file.types.as_slice());
            }
            packages.extend(file.packages.iter().map(String::as_str));
        }
        packages.sort_unstable();
        packages.dedup();

        let entry = format!("{}/{}", self.name, self.entry_module);
        if merged.get(entry.as_str()).map(|f| f.is_script()).unwrap_or(false) {
            js.push_str(&entry_call(&registry_key(&entry)));
        }

        // Stylesheets, by priority then path.
        let mut styles: Vec<&SourceFile> = merged
            .values()
            .filter(|f| f.is_stylesheet() && !f.is_global)
            .copied()
            .collect();
        styles.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| natural_cmp(&a.module_path, &b.module_path))
        });
        let mut css = String::new();
        for file in styles {
            if let Some(text) = file.transpiled.as_deref() {
                css.push_str(text);
                if !text.ends_with('\n') {
                    css.push('\n');
                }
            }
        }

        let meta = BundleMeta {
            compile_time: now_millis(),
            modules,
            types,
            templates,
            packages,
        };
        let meta_json = serde_json::to_string_pretty(&meta)?;

        fs::create_dir_all(&self.pack_dir).map_err(|e| BuildError::io(&self.pack_dir, e))?;
        let js_written = write_artifact(&self.pack_dir.join(SCRIPT_ARTIFACT), js.as_bytes(), self.compress)?;
        let css_written =
            write_artifact(&self.pack_dir.join(STYLE_ARTIFACT), css.as_bytes(), self.compress)?;
        write_artifact(&self.pack_dir.join(META_ARTIFACT), meta_json.as_bytes(), self.compress)?;

        info!(
            "[{}] Outputs constructed: {} module(s){}, {} stylesheet byte(s){}",
            self.name,
            meta.modules.len(),
            if js_written { "" } else { " (unchanged)" },
            css.len(),
            if css_written { "" } else { " (unchanged)" }
        );
        Ok(())
    }

    /// Copy static assets whose target is missing or out of date. Failures
    /// are logged per asset. Returns the number copied.
    pub fn copy_static_assets(&self) -> usize {
        let mut copied = 0;
        for file in self.statics.values() {
            match copy_static(file, &self.pack_dir) {
                Ok(true) => copied += 1,
                Ok(false) => {}
                Err(e) => warn!("[{}] Failed to copy {:?}: {}", self.name, file.path, e),
            }
        }
        if copied > 0 {
            debug!("[{}] Copied {} static asset(s)", self.name, copied);
        }
        copied
    }

    pub fn errors(&self) -> Vec<FileError> {
        self.files
            .values()
            .filter_map(|f| {
                f.error.as_ref().map(|message| {
                    FileError::new(
                        &self.name,
                        &f.module_path,
                        &f.path.to_string_lossy(),
                        message,
                    )
                })
            })
            .collect()
    }

    /// Cacheable records for this bundle's own files.
    pub fn cache_records(&self) -> IndexMap<String, CachedFile> {
        self.files
            .iter()
            .filter_map(|(path, f)| CachedFile::from_source(f).map(|c| (path.clone(), c)))
            .collect()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Watch updates
    // ───────────────────────────────────────────────────────────────────────────

    /// Map an event path onto `source_dir`, whichever spelling of the root
    /// the watcher reported.
    fn normalize_event_path(&self, path: &Path) -> PathBuf {
        if path.starts_with(&self.source_dir) {
            return path.to_path_buf();
        }
        if let Some(canonical) = &self.canonical_source {
            if let Ok(rest) = path.strip_prefix(canonical) {
                return self.source_dir.join(rest);
            }
        }
        path.to_path_buf()
    }

    pub fn owns_path(&self, path: &Path) -> bool {
        self.normalize_event_path(path).starts_with(&self.source_dir)
    }

    /// Whether discovery would skip `path` for sitting under an ignored
    /// directory.
    pub fn ignores_path(&self, path: &Path) -> bool {
        is_ignored_relative(&self.source_dir, &self.normalize_event_path(path))
    }

    /// A file was created or modified.
    pub fn file_changed(&mut self, path: &Path) -> ChangeFlags {
        let path = self.normalize_event_path(path);
        if is_ignored_relative(&self.source_dir, &path) {
            return ChangeFlags::default();
        }
        let stat = match fs::metadata(&path) {
            Ok(metadata) => FileStat::from_metadata(&metadata),
            Err(e) => {
                debug!("[{}] {:?} vanished before it could be read: {}", self.name, path, e);
                return ChangeFlags::default();
            }
        };
        let Some(file) = SourceFile::classify(&path, &self.name, &self.source_dir, stat) else {
            return ChangeFlags::default();
        };

        let mut flags = ChangeFlags::default();
        match file.kind {
            FileKind::Javascript => {
                flags.script = true;
                self.insert_file(file);
            }
            FileKind::Scss if file.is_global => {
                flags.global = true;
                write_lock(&self.globals).add(file);
            }
            FileKind::Scss => {
                flags.style = true;
                self.insert_file(file);
            }
            FileKind::ModuleMeta => {
                self.load_module_meta(&file);
                flags.meta = true;
                flags.script = true;
                flags.style = true;
            }
            FileKind::StaticAsset => {
                match copy_static(&file, &self.pack_dir) {
                    Ok(true) => debug!("[{}] Copied {}", self.name, file.relative_path),
                    Ok(false) => {}
                    Err(e) => warn!("[{}] Failed to copy {:?}: {}", self.name, file.path, e),
                }
                self.statics.insert(file.relative_path.clone(), file);
            }
            FileKind::None => {}
        }
        flags
    }

    /// Bring back third-party files a removed first-party file was hiding.
    fn restore_third_party(&mut self, module_paths: &[String]) {
        for file in discover_source_files(&self.source_dir, &self.name) {
            if file.third_party
                && module_paths.contains(&file.module_path)
                && !self.files.contains_key(&file.module_path)
            {
                debug!("[{}] Restoring {:?}", self.name, file.path);
                self.files.insert(file.module_path.clone(), file);
            }
        }
    }

    /// A file or directory was deleted.
    pub fn path_removed(&mut self, path: &Path) -> ChangeFlags {
        let path = self.normalize_event_path(path);
        let mut flags = ChangeFlags::default();
        let mut uncovered = Vec::new();

        self.files.retain(|module_path, f| {
            if f.path.starts_with(&path) {
                if f.is_script() {
                    flags.script = true;
                } else {
                    flags.style = true;
                }
                if !f.third_party {
                    uncovered.push(module_path.clone());
                }
                return false;
            }
            true
        });
        if !uncovered.is_empty() {
            self.restore_third_party(&uncovered);
        }

        let pack_dir = &self.pack_dir;
        self.statics.retain(|_, f| {
            if f.path.starts_with(&path) {
                let target = f.static_target(pack_dir);
                if let Err(e) = fs::remove_file(&target) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove {:?}: {}", target, e);
                    }
                }
                return false;
            }
            true
        });

        let before = self.module_meta.len();
        self.module_meta.retain(|_, entry| !entry.path.starts_with(&path));
        if self.module_meta.len() != before {
            flags.meta = true;
            flags.script = true;
            flags.style = true;
        }

        if write_lock(&self.globals).remove_under(&path) {
            flags.global = true;
        }

        if flags.any() {
            debug!("[{}] Removed {:?} ({:?})", self.name, path, flags);
        }
        flags
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILE OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

fn transform_file(file: &mut SourceFile, settings: &TransformSettings) {
    let content = match fs::read_to_string(&file.path) {
        Ok(content) => content,
        Err(e) => {
            record_failure(file, settings, &format!("failed to read: {}", e));
            return;
        }
    };

    match file.kind {
        FileKind::Javascript => {
            let ctx = ScriptContext {
                module_path: &file.module_path,
                full_module_path: &file.full_module_path,
                bundles: settings.bundles,
                static_url: settings.static_url,
            };
            let options = ScriptOptions {
                minify: settings.minify,
                wrap: true,
                record_requires: file.third_party,
            };
            match transform_script(&content, &ctx, &options) {
                Ok(output) => {
                    file.transpiled = Some(output.code);
                    file.templates = output.templates;
                    file.types = output.types;
                    file.packages = output.packages;
                    file.error = None;
                }
                Err(e) => record_failure(file, settings, &e.to_string()),
            }
        }
        FileKind::Scss => {
            let ctx = StyleContext {
                module_path: &file.module_path,
                full_module_path: &file.full_module_path,
                static_url: settings.static_url,
                load_path: file.path.parent(),
            };
            match compile_stylesheet(&content, settings.header, &ctx, settings.minify) {
                Ok(compiled) => {
                    if !compiled.warnings.is_empty() {
                        debug!(
                            "[{}] {} compiled with {} warning(s)",
                            settings.bundle,
                            file.module_path,
                            compiled.warnings.len()
                        );
                    }
                    file.transpiled = Some(compiled.css);
                    file.error = None;
                }
                Err(e) => record_failure(file, settings, &e.to_string()),
            }
            file.header_hash = Some(settings.header_hash.to_string());
        }
        _ => {}
    }
}

/// Substitute a runtime-visible failure for the file's output.
fn record_failure(file: &mut SourceFile, settings: &TransformSettings, message: &str) {
    warn!("[{}] {}: {}", settings.bundle, file.module_path, message);
    file.templates.clear();
    file.types.clear();
    file.packages.clear();
    file.transpiled = Some(if file.is_stylesheet() {
        error_comment(&file.module_path, message)
    } else {
        failure_stub(&registry_key(&file.module_path), &file.module_path, message)
    });
    file.error = Some(message.to_string());
}

/// Write `content` unless the file already holds it. With `compress`, a
/// gzip sibling is kept alongside. Returns whether anything was written.
pub fn write_artifact(path: &Path, content: &[u8], compress: bool) -> BuildResult<bool> {
    let gz_path = gzip_path(path);
    let unchanged = fs::read(path).map(|existing| existing == content).unwrap_or(false);
    if unchanged && (!compress || gz_path.exists()) {
        return Ok(false);
    }

    fs::write(path, content).map_err(|e| BuildError::io(path, e))?;

    if compress {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        encoder
            .write_all(content)
            .map_err(|e| BuildError::io(&gz_path, e))?;
        let compressed = encoder.finish().map_err(|e| BuildError::io(&gz_path, e))?;
        fs::write(&gz_path, compressed).map_err(|e| BuildError::io(&gz_path, e))?;
    }
    Ok(true)
}

fn gzip_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

/// Copy-if-newer: skipped when the target has the same size and is at
/// least as new as the source. The target takes the source's mtime.
pub fn copy_static(file: &SourceFile, pack_dir: &Path) -> std::io::Result<bool> {
    let target = file.static_target(pack_dir);
    if let Ok(metadata) = fs::metadata(&target) {
        let stat = FileStat::from_metadata(&metadata);
        if stat.size == file.size && stat.modified >= file.modified {
            return Ok(false);
        }
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&file.path, &target)?;
    let modified = UNIX_EPOCH + Duration::from_millis(file.modified);
    fs::File::options()
        .write(true)
        .open(&target)?
        .set_modified(modified)?;
    Ok(true)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
