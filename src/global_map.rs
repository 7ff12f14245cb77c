//! Global Source File Map
//!
//! Every stylesheet flagged global, across every bundle, concatenated in
//! `(priority, modulePath)` order into one comment-stripped header that is
//! prepended to every other stylesheet compile.

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::source_file::{FileStamp, SourceFile};

#[derive(Debug, Default)]
pub struct GlobalSourceFileMap {
    files: IndexMap<String, SourceFile>,
    sorted: Vec<String>,
    header: String,
    header_hash: String,
    changed: bool,
}

impl GlobalSourceFileMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, file: SourceFile) {
        self.files.insert(file.module_path.clone(), file);
    }

    pub fn remove(&mut self, module_path: &str) -> Option<SourceFile> {
        self.files.shift_remove(module_path)
    }

    /// Remove every file at or below `path`. Returns whether any was removed.
    pub fn remove_under(&mut self, path: &Path) -> bool {
        let before = self.files.len();
        self.files.retain(|_, f| !f.path.starts_with(path));
        before != self.files.len()
    }

    pub fn clear(&mut self) {
        self.files.clear();
        self.sorted.clear();
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, module_path: &str) -> bool {
        self.files.contains_key(module_path)
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn header_hash(&self) -> &str {
        &self.header_hash
    }

    pub fn has_changed(&self) -> bool {
        self.changed
    }

    /// Order the accumulated files by priority, then module path.
    pub fn sort(&mut self) {
        let mut keys: Vec<String> = self.files.keys().cloned().collect();
        keys.sort_by(|a, b| {
            let fa = &self.files[a];
            let fb = &self.files[b];
            fa.priority
                .cmp(&fb.priority)
                .then_with(|| natural_cmp(&fa.module_path, &fb.module_path))
        });
        self.sorted = keys;
    }

    /// Stamps of the sorted set, as persisted in the build cache.
    pub fn stamps(&self) -> Vec<FileStamp> {
        self.sorted
            .iter()
            .filter_map(|k| self.files.get(k))
            .map(|f| f.stamp())
            .collect()
    }

    /// Compare the sorted set positionally against the cached set.
    pub fn check_for_changes(&mut self, cached: &[FileStamp]) -> bool {
        let current = self.stamps();
        self.changed = current.len() != cached.len()
            || current.iter().zip(cached.iter()).any(|(a, b)| a != b);
        if self.changed {
            debug!(
                "Global stylesheet set changed ({} cached, {} current)",
                cached.len(),
                current.len()
            );
        }
        self.changed
    }

    /// Reuse a header computed by a previous build.
    pub fn use_cached_header(&mut self, header: String) {
        self.header_hash = content_hash(&header);
        self.header = header;
    }

    /// Read the content of every global file that hasn't been loaded yet.
    pub fn load_contents(&mut self) {
        for file in self.files.values_mut() {
            if file.content.is_some() {
                continue;
            }
            match fs::read_to_string(&file.path) {
                Ok(content) => file.content = Some(content),
                Err(e) => {
                    warn!("Failed to read global stylesheet {:?}: {}", file.path, e);
                    file.content = Some(String::new());
                }
            }
        }
    }

    /// Load, concatenate and strip. Marks the map changed.
    pub fn recompute(&mut self) {
        self.sort();
        self.load_contents();
        self.header = self.get_scss_header();
        self.header_hash = content_hash(&self.header);
        self.changed = true;
        info!(
            "Recomputed global SCSS header from {} file(s) ({} bytes)",
            self.sorted.len(),
            self.header.len()
        );
    }

    pub fn get_scss_header(&self) -> String {
        let mut combined = String::new();
        for file in self.sorted.iter().filter_map(|k| self.files.get(k)) {
            if let Some(content) = file.content.as_deref() {
                combined.push_str(content);
                combined.push('\n');
            }
        }
        strip_scss_comments(&combined)
    }
}

pub fn content_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORDERING
// ═══════════════════════════════════════════════════════════════════════════════

/// Lexicographic comparison where runs of digits compare by numeric value,
/// so `Item2` sorts before `Item10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < a.len() && j < b.len() {
        if a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            let si = i;
            while i < a.len() && a[i].is_ascii_digit() {
                i += 1;
            }
            let sj = j;
            while j < b.len() && b[j].is_ascii_digit() {
                j += 1;
            }
            let na = trim_zeros(&a[si..i]);
            let nb = trim_zeros(&b[sj..j]);
            let ord = na.len().cmp(&nb.len()).then_with(|| na.cmp(nb));
            if ord != Ordering::Equal {
                return ord;
            }
        } else {
            let ord = a[i].cmp(&b[j]);
            if ord != Ordering::Equal {
                return ord;
            }
            i += 1;
            j += 1;
        }
    }

    (a.len() - i).cmp(&(b.len() - j))
}

fn trim_zeros(digits: &[u8]) -> &[u8] {
    let start = digits.iter().position(|&d| d != b'0').unwrap_or(digits.len());
    &digits[start..]
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMENT / WHITESPACE STRIPPING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, PartialEq)]
enum StripMode {
    Default,
    BlockComment,
    LineComment,
    SingleQuoted,
    DoubleQuoted,
    /// Unquoted `url(...)` body, where `//` is part of the URL.
    UrlBody,
}

fn ends_with_url_open(out: &str) -> bool {
    let bytes = out.as_bytes();
    bytes.len() >= 4 && bytes[bytes.len() - 4..].eq_ignore_ascii_case(b"url(")
}

/// Remove block and line comments and collapse whitespace runs to one space.
/// Nothing inside a string literal or an unquoted `url(...)` is touched.
pub fn strip_scss_comments(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut mode = StripMode::Default;
    let mut pending_space = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match mode {
            StripMode::BlockComment => {
                if c == '*' && next == Some('/') {
                    mode = StripMode::Default;
                    pending_space = true;
                    i += 2;
                    continue;
                }
            }
            StripMode::LineComment => {
                if c == '\n' {
                    mode = StripMode::Default;
                    pending_space = true;
                }
            }
            StripMode::SingleQuoted | StripMode::DoubleQuoted => {
                out.push(c);
                if c == '\\' {
                    if let Some(n) = next {
                        out.push(n);
                        i += 2;
                        continue;
                    }
                } else if (c == '\'' && mode == StripMode::SingleQuoted)
                    || (c == '"' && mode == StripMode::DoubleQuoted)
                {
                    mode = StripMode::Default;
                }
            }
            StripMode::UrlBody => {
                out.push(c);
                if c == ')' {
                    mode = StripMode::Default;
                }
            }
            StripMode::Default => {
                if c == '/' && next == Some('*') {
                    mode = StripMode::BlockComment;
                    i += 2;
                    continue;
                }
                if c == '/' && next == Some('/') {
                    mode = StripMode::LineComment;
                    i += 2;
                    continue;
                }
                if c.is_whitespace() {
                    pending_space = true;
                    i += 1;
                    continue;
                }
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
                match c {
                    '\'' => mode = StripMode::SingleQuoted,
                    '"' => mode = StripMode::DoubleQuoted,
                    '(' if ends_with_url_open(&out) => {
                        let rest = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                        if !matches!(rest, Some('\'') | Some('"')) {
                            mode = StripMode::UrlBody;
                        }
                    }
                    _ => {}
                }
            }
        }
        i += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_file::FileStat;
    use std::path::Path;

    fn global(rel: &str, content: &str, modified: u64) -> SourceFile {
        let root = Path::new("/p/UI/Source");
        let mut file = SourceFile::classify(
            &root.join(rel),
            "UI",
            root,
            FileStat {
                modified,
                size: content.len() as u64,
            },
        )
        .unwrap();
        file.content = Some(content.to_string());
        file
    }

    #[test]
    fn test_strip_comments_keeps_strings() {
        let src = "/* header */\n$a: 1px; // trailing\n$b: \"/* not a comment */\";\n$c: 'it\\'s // fine';";
        assert_eq!(
            strip_scss_comments(src),
            "$a: 1px; $b: \"/* not a comment */\"; $c: 'it\\'s // fine';"
        );
    }

    #[test]
    fn test_strip_keeps_unquoted_urls() {
        let src = "$bg: url(http://cdn.example/x.png); // c";
        assert_eq!(strip_scss_comments(src), "$bg: url(http://cdn.example/x.png);");
    }

    #[test]
    fn test_strip_url_match_is_case_insensitive() {
        let src = "$bg: URL(//cdn.example/x.png); $n: é(1); // c";
        assert_eq!(
            strip_scss_comments(src),
            "$bg: URL(//cdn.example/x.png); $n: é(1);"
        );
        assert!(!ends_with_url_open("rl("));
    }

    #[test]
    fn test_natural_cmp() {
        assert_eq!(natural_cmp("UI/Item2.scss", "UI/Item10.scss"), Ordering::Less);
        assert_eq!(natural_cmp("UI/a", "UI/b"), Ordering::Less);
        assert_eq!(natural_cmp("UI/a", "UI/a"), Ordering::Equal);
        assert_eq!(natural_cmp("UI/a1", "UI/a"), Ordering::Greater);
    }

    #[test]
    fn test_sort_by_priority_then_path() {
        let mut map = GlobalSourceFileMap::new();
        map.add(global("B/B.global.scss", "$b: 2;", 1));
        map.add(global("A/A.global.scss", "$a: 1;", 1));
        map.add(global("Z/Z.global.10.scss", "$z: 0;", 1));
        map.sort();
        assert_eq!(map.get_scss_header(), "$z: 0; $a: 1; $b: 2;");
    }

    #[test]
    fn test_check_for_changes_positional() {
        let mut map = GlobalSourceFileMap::new();
        map.add(global("A/A.global.scss", "$a: 1;", 5));
        map.sort();
        let stamps = map.stamps();
        assert!(!map.check_for_changes(&stamps));

        map.add(global("A/A.global.scss", "$a: 2;", 6));
        map.sort();
        assert!(map.check_for_changes(&stamps));
        assert!(map.check_for_changes(&[]));
    }

    #[test]
    fn test_header_changes_only_with_globals() {
        let mut map = GlobalSourceFileMap::new();
        map.add(global("A/A.global.scss", "$a: 1;", 1));
        map.recompute();
        let first = map.header_hash().to_string();

        map.recompute();
        assert_eq!(first, map.header_hash());

        map.add(global("A/A.global.scss", "$a: 3;", 2));
        map.recompute();
        assert_ne!(first, map.header_hash());
    }
}
