//! Source File Model
//!
//! Classifies one filesystem path into a typed unit (script, stylesheet,
//! module metadata or static asset) and computes its logical module path.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::transform::{TemplateLiteral, TypeDescriptor};

pub const DEFAULT_PRIORITY: i32 = 100;
pub const MODULE_META_FILE: &str = "module.json";
const THIRD_PARTY_SEGMENT: &str = "thirdparty";
const BUNDLE_WRAPPER_SUFFIX: &str = ".bundle";

lazy_static! {
    /// `name.50.scss` → 50
    static ref PRIORITY_RE: Regex = Regex::new(r"\.(-?\d+)\.(?:s?css)$").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// FILE KIND & STATS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Javascript,
    Scss,
    ModuleMeta,
    StaticAsset,
    None,
}

/// Change-detection stamp: modification time (ms since epoch), size and path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStamp {
    pub modified_time: u64,
    pub size: u64,
    pub path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStat {
    pub modified: u64,
    pub size: u64,
}

impl FileStat {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        FileStat {
            modified,
            size: metadata.len(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE FILE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Absolute filesystem path.
    pub path: PathBuf,
    /// Path relative to the bundle source root, forward slashes.
    pub relative_path: String,
    pub file_name: String,
    /// Lowercased extension without the dot.
    pub extension: String,
    /// Logical path with `ThirdParty/` and `*.Bundle/` segments collapsed out.
    pub module_path: String,
    /// Logical path with every directory segment retained.
    pub full_module_path: String,
    pub kind: FileKind,
    pub is_global: bool,
    pub priority: i32,
    pub third_party: bool,
    pub modified: u64,
    pub size: u64,
    pub content: Option<String>,
    pub transpiled: Option<String>,
    pub templates: Vec<TemplateLiteral>,
    pub types: Vec<TypeDescriptor>,
    pub packages: Vec<String>,
    /// Fingerprint of the global header this stylesheet was compiled against.
    pub header_hash: Option<String>,
    pub error: Option<String>,
}

impl SourceFile {
    /// Classify `path` found under `source_root` of the bundle rooted at
    /// `bundle_root`. Returns `None` for paths that are not buildable files.
    pub fn classify(
        path: &Path,
        bundle_root: &str,
        source_root: &Path,
        stat: FileStat,
    ) -> Option<SourceFile> {
        let relative = path.strip_prefix(source_root).ok()?;
        let relative_path = to_forward_slashes(relative);
        if relative_path.is_empty() || relative_path.split('/').any(|s| s == ".git") {
            return None;
        }

        let file_name = path.file_name()?.to_str()?.to_string();
        let extension = match file_name.rfind('.') {
            Some(i) if i + 1 < file_name.len() => file_name[i + 1..].to_lowercase(),
            _ => return None,
        };

        let relative_dir = match relative_path.rfind('/') {
            Some(i) => &relative_path[..i],
            None => "",
        };
        let in_static = relative_dir
            .split('/')
            .any(|segment| segment.eq_ignore_ascii_case("static"));
        let lower_name = file_name.to_lowercase();

        let kind = if file_name == MODULE_META_FILE {
            FileKind::ModuleMeta
        } else if lower_name.ends_with(".d.ts") || lower_name.ends_with(".d.tsx") {
            FileKind::None
        } else if !in_static && matches!(extension.as_str(), "js" | "jsx" | "ts" | "tsx") {
            FileKind::Javascript
        } else if !in_static && matches!(extension.as_str(), "css" | "scss") {
            FileKind::Scss
        } else {
            FileKind::StaticAsset
        };

        let (module_path, full_module_path, third_party) =
            build_module_paths(bundle_root, relative_dir, &file_name);

        let is_global = kind == FileKind::Scss && lower_name.contains("global.");
        let priority = if kind == FileKind::Scss {
            PRIORITY_RE
                .captures(&lower_name)
                .and_then(|c| c[1].parse().ok())
                .unwrap_or(DEFAULT_PRIORITY)
        } else {
            DEFAULT_PRIORITY
        };

        Some(SourceFile {
            path: path.to_path_buf(),
            relative_path,
            file_name,
            extension,
            module_path,
            full_module_path,
            kind,
            is_global,
            priority,
            third_party,
            modified: stat.modified,
            size: stat.size,
            content: None,
            transpiled: None,
            templates: Vec::new(),
            types: Vec::new(),
            packages: Vec::new(),
            header_hash: None,
            error: None,
        })
    }

    pub fn stamp(&self) -> FileStamp {
        FileStamp {
            modified_time: self.modified,
            size: self.size,
            path: to_forward_slashes(&self.path),
        }
    }

    /// Directory part of the logical module path.
    pub fn module_dir(&self) -> &str {
        parent_of(&self.module_path)
    }

    pub fn full_module_dir(&self) -> &str {
        parent_of(&self.full_module_path)
    }

    /// Where a static asset is copied to: `<pack>/static/<relative-path-lowercased>`.
    pub fn static_target(&self, pack_dir: &Path) -> PathBuf {
        let mut target = pack_dir.join("static");
        for segment in self.relative_path.to_lowercase().split('/') {
            target.push(segment);
        }
        target
    }

    /// Public URL of a static asset under the bundle's static URL prefix.
    pub fn static_url(&self, static_base: &str) -> String {
        format!("{}{}", static_base, self.relative_path.to_lowercase())
    }

    pub fn is_stylesheet(&self) -> bool {
        self.kind == FileKind::Scss
    }

    pub fn is_script(&self) -> bool {
        self.kind == FileKind::Javascript
    }

    /// Drop everything derived from the previous content.
    pub fn invalidate(&mut self) {
        self.content = None;
        self.transpiled = None;
        self.templates.clear();
        self.types.clear();
        self.packages.clear();
        self.header_hash = None;
        self.error = None;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODULE PATHS
// ═══════════════════════════════════════════════════════════════════════════════

/// Returns `(module_path, full_module_path, third_party)`.
pub fn build_module_paths(
    bundle_root: &str,
    relative_dir: &str,
    file_name: &str,
) -> (String, String, bool) {
    let mut logical: Vec<&str> = vec![bundle_root];
    let mut full: Vec<&str> = vec![bundle_root];
    let mut third_party = false;

    for segment in relative_dir.split('/').filter(|s| !s.is_empty()) {
        full.push(segment);
        let lower = segment.to_lowercase();
        if lower == THIRD_PARTY_SEGMENT {
            third_party = true;
            continue;
        }
        if lower.ends_with(BUNDLE_WRAPPER_SUFFIX) {
            continue;
        }
        logical.push(segment);
    }

    if logical.last() != Some(&file_name) {
        logical.push(file_name);
    }
    if full.last() != Some(&file_name) {
        full.push(file_name);
    }

    (logical.join("/"), full.join("/"), third_party)
}

pub fn to_forward_slashes(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => s.to_str().map(|s| s.to_string()),
            std::path::Component::RootDir => Some(String::new()),
            std::path::Component::Prefix(p) => p.as_os_str().to_str().map(|s| s.to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(rel: &str) -> Option<SourceFile> {
        let root = Path::new("/project/UI/Source");
        SourceFile::classify(
            &root.join(rel),
            "UI",
            root,
            FileStat {
                modified: 1,
                size: 2,
            },
        )
    }

    #[test]
    fn test_script_classification() {
        for name in ["A.js", "A.jsx", "A.ts", "A.tsx"] {
            let file = classify(&format!("Start/{}", name)).unwrap();
            assert_eq!(file.kind, FileKind::Javascript, "{}", name);
            assert_eq!(file.module_path, format!("UI/Start/{}", name));
        }
        assert_eq!(classify("Start/types.d.ts").unwrap().kind, FileKind::None);
    }

    #[test]
    fn test_static_directory_wins() {
        let file = classify("Start/static/helper.js").unwrap();
        assert_eq!(file.kind, FileKind::StaticAsset);
        assert_eq!(
            file.static_target(Path::new("/pack")),
            PathBuf::from("/pack/static/start/static/helper.js")
        );
        assert_eq!(file.static_url("/ui/static/"), "/ui/static/start/static/helper.js");
    }

    #[test]
    fn test_stylesheet_priority_and_global() {
        let file = classify("Theme/Colours.global.20.scss").unwrap();
        assert_eq!(file.kind, FileKind::Scss);
        assert!(file.is_global);
        assert_eq!(file.priority, 20);

        let plain = classify("Widgets/Widget.scss").unwrap();
        assert!(!plain.is_global);
        assert_eq!(plain.priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn test_module_meta_and_invalid() {
        assert_eq!(classify("Widgets/module.json").unwrap().kind, FileKind::ModuleMeta);
        assert!(classify("Widgets/README").is_none());
        assert!(classify(".git/config.js").is_none());
    }

    #[test]
    fn test_third_party_and_bundle_wrappers_collapse() {
        let file = classify("ThirdParty/Charts.Bundle/Chart/Chart.js").unwrap();
        assert!(file.third_party);
        assert_eq!(file.module_path, "UI/Chart/Chart.js");
        assert_eq!(file.full_module_path, "UI/ThirdParty/Charts.Bundle/Chart/Chart.js");
        assert_eq!(file.module_dir(), "UI/Chart");

        let wrapped = classify("Editor.Bundle/Editor/Editor.js").unwrap();
        assert!(!wrapped.third_party);
        assert_eq!(wrapped.module_path, "UI/Editor/Editor.js");
    }

    #[test]
    fn test_stamp_uses_forward_slashes() {
        let file = classify("Start/Start.js").unwrap();
        let stamp = file.stamp();
        assert_eq!(stamp.path, "/project/UI/Source/Start/Start.js");
        assert_eq!(stamp.size, 2);
    }
}
