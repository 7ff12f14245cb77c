use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// FILE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// A failure recorded against one source file. Builds keep going after these;
/// they are collected into the build's error list and reported to the observer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileError {
    pub bundle: String,
    pub module_path: String,
    pub file: String,
    pub message: String,
}

impl FileError {
    pub fn new(bundle: &str, module_path: &str, file: &str, message: &str) -> Self {
        FileError {
            bundle: bundle.to_string(),
            module_path: module_path.to_string(),
            file: file.to_string(),
            message: message.to_string(),
        }
    }
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.bundle, self.module_path, self.message)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSFORM ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Failed to parse {module}: {}", messages.join("; "))]
    Parse {
        module: String,
        messages: Vec<String>,
    },

    #[error("Unsupported syntax in {module}: {construct}")]
    Unsupported { module: String, construct: String },

    #[error("Failed to transform {module}: {}", messages.join("; "))]
    Lowering {
        module: String,
        messages: Vec<String>,
    },

    #[error("SCSS error in {module}: {message}")]
    Scss { module: String, message: String },
}

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to persist cache file {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILD ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Build failed with {} error(s): {}", .0.len(), summarize(.0))]
    Failed(Vec<FileError>),
}

impl BuildError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }
}

fn summarize(errors: &[FileError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_build_lists_every_file() {
        let err = BuildError::Failed(vec![
            FileError::new("UI", "UI/A/A.js", "/p/UI/Source/A/A.js", "bad token"),
            FileError::new("UI", "UI/B/B.scss", "/p/UI/Source/B/B.scss", "undefined variable"),
        ]);
        let text = err.to_string();
        assert!(text.starts_with("Build failed with 2 error(s)"));
        assert!(text.contains("[UI] UI/A/A.js: bad token"));
        assert!(text.contains("[UI] UI/B/B.scss: undefined variable"));
    }

    #[test]
    fn test_unsupported_message_names_construct() {
        let err = TransformError::Unsupported {
            module: "UI/X/X.js".to_string(),
            construct: "export * from './y'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported syntax in UI/X/X.js: export * from './y'"
        );
    }
}
