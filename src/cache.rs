//! Build Cache
//!
//! One JSON table holding the last build's transform outputs per bundle and
//! module path, plus the global stylesheet set and header they were built
//! against. A record is reused only while the file's stamp is unchanged and,
//! for stylesheets, the global header hash still matches.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::global_map::GlobalSourceFileMap;
use crate::source_file::{FileStamp, SourceFile};
use crate::transform::{TemplateLiteral, TypeDescriptor};

pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedFile {
    pub modified_time: u64,
    pub size: u64,
    pub path: String,
    pub transpiled_content: String,
    pub templates: Vec<TemplateLiteral>,
    #[serde(default)]
    pub types: Vec<TypeDescriptor>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub header_hash: Option<String>,
}

impl CachedFile {
    /// Snapshot of a built file. Files without output or with a recorded
    /// error are not cached so their failure is reported again next build.
    pub fn from_source(file: &SourceFile) -> Option<CachedFile> {
        if file.error.is_some() {
            return None;
        }
        let transpiled = file.transpiled.as_ref()?;
        Some(CachedFile {
            modified_time: file.modified,
            size: file.size,
            path: file.stamp().path,
            transpiled_content: transpiled.clone(),
            templates: file.templates.clone(),
            types: file.types.clone(),
            packages: file.packages.clone(),
            header_hash: file.header_hash.clone(),
        })
    }

    pub fn stamp(&self) -> FileStamp {
        FileStamp {
            modified_time: self.modified_time,
            size: self.size,
            path: self.path.clone(),
        }
    }

    pub fn restore_into(&self, file: &mut SourceFile) {
        file.transpiled = Some(self.transpiled_content.clone());
        file.templates = self.templates.clone();
        file.types = self.types.clone();
        file.packages = self.packages.clone();
        file.header_hash = self.header_hash.clone();
        file.error = None;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheTable {
    pub version: u32,
    pub globals: Vec<FileStamp>,
    pub global_header: String,
    pub bundles: IndexMap<String, IndexMap<String, CachedFile>>,
}

impl Default for CacheTable {
    fn default() -> Self {
        CacheTable {
            version: CACHE_VERSION,
            globals: Vec::new(),
            global_header: String::new(),
            bundles: IndexMap::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct BuildCache {
    path: Option<PathBuf>,
    table: CacheTable,
}

impl BuildCache {
    /// A cache persisted at `path`, or a purely in-memory one.
    pub fn new(path: Option<PathBuf>) -> Self {
        BuildCache {
            path,
            table: CacheTable::default(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the persisted table. A missing file is an empty cache; an
    /// unreadable or malformed one is logged and treated as empty.
    pub fn start(&mut self) {
        self.table = CacheTable::default();
        let Some(path) = &self.path else {
            return;
        };

        if !path.exists() {
            info!("No build cache found at {:?}, starting cold", path);
            return;
        }

        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to read build cache {:?}: {}", path, e);
                return;
            }
        };

        match serde_json::from_str::<CacheTable>(&json) {
            Ok(table) if table.version == CACHE_VERSION => {
                let files: usize = table.bundles.values().map(|b| b.len()).sum();
                debug!("Loaded build cache with {} file(s)", files);
                self.table = table;
            }
            Ok(table) => {
                info!(
                    "Build cache version {} does not match {}, starting cold",
                    table.version, CACHE_VERSION
                );
            }
            Err(e) => {
                warn!("Build cache {:?} is corrupt, starting cold: {}", path, e);
            }
        }
    }

    pub fn get_file(&self, bundle: &str, module_path: &str) -> Option<&CachedFile> {
        self.table.bundles.get(bundle)?.get(module_path)
    }

    /// True when either side is absent or any of time, size, or path differ.
    pub fn file_changed(a: Option<&FileStamp>, b: Option<&FileStamp>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => a != b,
            _ => true,
        }
    }

    /// Restore `file` from the cache if its record is still valid.
    /// `header_hash` is the current global header fingerprint.
    pub fn restore(&self, bundle: &str, file: &mut SourceFile, header_hash: &str) -> bool {
        let Some(cached) = self.get_file(bundle, &file.module_path) else {
            return false;
        };
        if Self::file_changed(Some(&cached.stamp()), Some(&file.stamp())) {
            return false;
        }
        if file.is_stylesheet() && cached.header_hash.as_deref() != Some(header_hash) {
            return false;
        }
        cached.restore_into(file);
        true
    }

    pub fn cached_globals(&self) -> &[FileStamp] {
        &self.table.globals
    }

    pub fn cached_header(&self) -> &str {
        &self.table.global_header
    }

    /// Replace the table with the current state and persist it. Modules not
    /// present in `bundles` are dropped.
    pub fn save(
        &mut self,
        globals: &GlobalSourceFileMap,
        bundles: IndexMap<String, IndexMap<String, CachedFile>>,
    ) -> Result<(), CacheError> {
        self.table = CacheTable {
            version: CACHE_VERSION,
            globals: globals.stamps(),
            global_header: globals.header().to_string(),
            bundles,
        };

        let Some(path) = &self.path else {
            return Ok(());
        };

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let json = serde_json::to_vec(&self.table)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| CacheError::Persist {
            path: path.clone(),
            source: e.error,
        })?;

        let files: usize = self.table.bundles.values().map(|b| b.len()).sum();
        debug!("Saved build cache with {} file(s) to {:?}", files, path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_file::FileStat;
    use tempfile::TempDir;

    fn built(rel: &str, modified: u64) -> SourceFile {
        let root = Path::new("/p/UI/Source");
        let mut file = SourceFile::classify(
            &root.join(rel),
            "UI",
            root,
            FileStat { modified, size: 10 },
        )
        .unwrap();
        file.transpiled = Some(format!("// {}", rel));
        file
    }

    fn records(files: &[&SourceFile]) -> IndexMap<String, IndexMap<String, CachedFile>> {
        let mut bundle = IndexMap::new();
        for file in files {
            if let Some(cached) = CachedFile::from_source(file) {
                bundle.insert(file.module_path.clone(), cached);
            }
        }
        let mut bundles = IndexMap::new();
        bundles.insert("UI".to_string(), bundle);
        bundles
    }

    #[test]
    fn test_file_changed() {
        let a = FileStamp {
            modified_time: 1,
            size: 2,
            path: "a".to_string(),
        };
        let mut b = a.clone();
        assert!(!BuildCache::file_changed(Some(&a), Some(&b)));
        b.size = 3;
        assert!(BuildCache::file_changed(Some(&a), Some(&b)));
        assert!(BuildCache::file_changed(None, Some(&a)));
        assert!(BuildCache::file_changed(Some(&a), None));
    }

    #[test]
    fn test_missing_and_corrupt_cache_start_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("build-cache.json");

        let mut cache = BuildCache::new(Some(path.clone()));
        cache.start();
        assert!(cache.get_file("UI", "UI/A/A.js").is_none());

        fs::write(&path, "{ not json").unwrap();
        cache.start();
        assert!(cache.cached_globals().is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("build-cache.json");
        let script = built("A/A.js", 5);

        let mut cache = BuildCache::new(Some(path.clone()));
        cache
            .save(&GlobalSourceFileMap::new(), records(&[&script]))
            .unwrap();

        let mut reloaded = BuildCache::new(Some(path));
        reloaded.start();
        let cached = reloaded.get_file("UI", "UI/A/A.js").unwrap();
        assert_eq!(cached.transpiled_content, "// A/A.js");

        let mut fresh = built("A/A.js", 5);
        fresh.transpiled = None;
        assert!(reloaded.restore("UI", &mut fresh, ""));
        assert_eq!(fresh.transpiled.as_deref(), Some("// A/A.js"));

        let mut touched = built("A/A.js", 6);
        touched.transpiled = None;
        assert!(!reloaded.restore("UI", &mut touched, ""));
    }

    #[test]
    fn test_stylesheet_requires_matching_header() {
        let mut style = built("A/A.scss", 5);
        style.header_hash = Some("h1".to_string());

        let mut cache = BuildCache::new(None);
        cache.save(&GlobalSourceFileMap::new(), records(&[&style])).unwrap();

        let mut again = built("A/A.scss", 5);
        assert!(cache.restore("UI", &mut again, "h1"));
        assert!(!cache.restore("UI", &mut again, "h2"));
    }

    #[test]
    fn test_errored_files_are_not_cached() {
        let mut script = built("A/A.js", 5);
        script.error = Some("boom".to_string());
        assert!(CachedFile::from_source(&script).is_none());
    }

    #[test]
    fn test_save_prunes_missing_modules() {
        let a = built("A/A.js", 1);
        let b = built("B/B.js", 1);
        let mut cache = BuildCache::new(None);
        cache.save(&GlobalSourceFileMap::new(), records(&[&a, &b])).unwrap();
        cache.save(&GlobalSourceFileMap::new(), records(&[&a])).unwrap();
        assert!(cache.get_file("UI", "UI/A/A.js").is_some());
        assert!(cache.get_file("UI", "UI/B/B.js").is_none());
    }
}
