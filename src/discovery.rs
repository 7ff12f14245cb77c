//! Discovery Module
//!
//! Recursively enumerates a bundle's source directory into classified
//! source files. Listings are sorted by file name so that enumeration order,
//! and therefore script concatenation order, is reproducible.

use std::fs;
use std::path::{Component, Path};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::source_file::{FileKind, FileStat, SourceFile};

const IGNORED_DIRECTORIES: &[&str] = &["ignore", "socialstack.ignore", ".git", "node_modules"];

fn is_ignored_name(name: &std::ffi::OsStr) -> bool {
    name.to_str()
        .map(|name| IGNORED_DIRECTORIES.contains(&name.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn is_ignored_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && is_ignored_name(entry.file_name())
}

/// Whether any segment of `path` below `source_root` names an ignored
/// directory. Paths outside the root are never ignored.
pub fn is_ignored_relative(source_root: &Path, path: &Path) -> bool {
    let Ok(rest) = path.strip_prefix(source_root) else {
        return false;
    };
    rest.components().any(|segment| match segment {
        Component::Normal(name) => is_ignored_name(name),
        _ => false,
    })
}

/// Walk `source_root` depth-first and classify every file. A missing root is
/// an empty result; unreadable entries are logged and skipped.
pub fn discover_source_files(source_root: &Path, bundle_root: &str) -> Vec<SourceFile> {
    let mut files = Vec::new();

    if !source_root.exists() {
        debug!(
            "Source directory {:?} does not exist, nothing to build",
            source_root
        );
        return files;
    }

    let walker = WalkDir::new(source_root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("[{}] Skipping unreadable entry: {}", bundle_root, e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let stat = match entry.metadata() {
            Ok(metadata) => FileStat::from_metadata(&metadata),
            Err(e) => {
                warn!("[{}] Failed to stat {:?}: {}", bundle_root, entry.path(), e);
                continue;
            }
        };

        if let Some(file) = SourceFile::classify(entry.path(), bundle_root, source_root, stat) {
            if file.kind != FileKind::None {
                files.push(file);
            }
        }
    }

    debug!(
        "[{}] Discovered {} file(s) under {:?}",
        bundle_root,
        files.len(),
        source_root
    );
    files
}

/// Immediate children of a directory, sorted. Used when a directory appears
/// while watching.
pub fn list_children(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut children: Vec<_> = match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(e) => {
            warn!("Failed to list {:?}: {}", dir, e);
            Vec::new()
        }
    };
    children.sort();
    children
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let files = discover_source_files(&dir.path().join("nope"), "UI");
        assert!(files.is_empty());
    }

    #[test]
    fn test_sorted_and_ignored() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "B/B.js", "export default 1;");
        write(root, "A/A.js", "export default 2;");
        write(root, "A/A.scss", ".a{}");
        write(root, "ignore/Skip.js", "nope");
        write(root, "C/socialstack.ignore/Skip.js", "nope");
        write(root, "C/types.d.ts", "declare const x: number;");

        let files = discover_source_files(root, "UI");
        let paths: Vec<_> = files.iter().map(|f| f.module_path.as_str()).collect();
        assert_eq!(paths, vec!["UI/A/A.js", "UI/A/A.scss", "UI/B/B.js"]);
    }

    #[test]
    fn test_ignored_relative_checks_every_segment() {
        let root = Path::new("/p/UI/Source");
        assert!(is_ignored_relative(root, &root.join("ignore/Skip.js")));
        assert!(is_ignored_relative(root, &root.join("A/Node_Modules/x/x.js")));
        assert!(is_ignored_relative(root, &root.join("C/socialstack.ignore")));
        assert!(!is_ignored_relative(root, &root.join("Ignored/A.js")));
        assert!(!is_ignored_relative(root, Path::new("/elsewhere/ignore/A.js")));
    }

    #[test]
    fn test_list_children_sorted() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.js", "");
        write(dir.path(), "a.js", "");
        let children = list_children(dir.path());
        assert_eq!(children.len(), 2);
        assert!(children[0].ends_with("a.js"));
    }
}
