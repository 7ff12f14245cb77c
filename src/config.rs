//! Build configuration.
//!
//! Mirrors the options object handed over by the command-line host. Everything
//! is optional except the bundle list; paths left unset are derived from the
//! project root.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BuildError, BuildResult};

pub const DEFAULT_DEBOUNCE_MS: u64 = 200;
pub const DEFAULT_ENTRY_MODULE: &str = "Start/Start.js";
pub const CACHE_FILE_NAME: &str = "build-cache.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuilderConfig {
    /// Bundle names, e.g. `["UI", "Admin", "Email"]`. Each reads from
    /// `<projectRoot>/<name>/Source`.
    pub bundles: Vec<String>,
    pub project_root: PathBuf,
    pub minified: bool,
    /// Also write gzip siblings of every artifact.
    pub compress: bool,
    /// Emit static-asset URLs relative to the pack directory.
    pub relative_paths: bool,
    /// Directory holding the persisted build cache. No cache is kept when unset.
    pub cache_dir: Option<PathBuf>,
    /// Output root. Defaults to `<projectRoot>/<Bundle>/public/pack`.
    pub out_dir: Option<PathBuf>,
    /// URL prefix for static assets; `{bundle}` is replaced with the
    /// lowercased bundle name.
    pub static_url: Option<String>,
    /// Bundle name → names of bundles whose outputs it includes.
    pub include: IndexMap<String, Vec<String>>,
    /// Entry module, relative to each bundle root.
    pub entry_module: String,
    /// Report file errors as warnings instead of failing the build.
    pub degrade_errors: bool,
    pub debounce_ms: u64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        BuilderConfig {
            bundles: vec!["UI".to_string(), "Admin".to_string(), "Email".to_string()],
            project_root: PathBuf::from("."),
            minified: false,
            compress: false,
            relative_paths: false,
            cache_dir: None,
            out_dir: None,
            static_url: None,
            include: IndexMap::new(),
            entry_module: DEFAULT_ENTRY_MODULE.to_string(),
            degrade_errors: false,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl BuilderConfig {
    pub fn new(project_root: impl Into<PathBuf>, bundles: &[&str]) -> Self {
        BuilderConfig {
            bundles: bundles.iter().map(|b| b.to_string()).collect(),
            project_root: project_root.into(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> BuildResult<Self> {
        let config: BuilderConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> BuildResult<Self> {
        let json = fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> BuildResult<()> {
        if self.bundles.is_empty() {
            return Err(BuildError::Config("no bundles configured".to_string()));
        }
        for (consumer, included) in &self.include {
            if !self.bundles.contains(consumer) {
                return Err(BuildError::Config(format!(
                    "include lists unknown bundle \"{}\"",
                    consumer
                )));
            }
            for name in included {
                if !self.bundles.contains(name) {
                    return Err(BuildError::Config(format!(
                        "bundle \"{}\" includes unknown bundle \"{}\"",
                        consumer, name
                    )));
                }
                if name == consumer {
                    return Err(BuildError::Config(format!(
                        "bundle \"{}\" includes itself",
                        consumer
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn source_dir(&self, bundle: &str) -> PathBuf {
        self.project_root.join(bundle).join("Source")
    }

    pub fn pack_dir(&self, bundle: &str) -> PathBuf {
        match &self.out_dir {
            Some(out) => out.join(bundle.to_lowercase()),
            None => self.project_root.join(bundle).join("public").join("pack"),
        }
    }

    pub fn static_url(&self, bundle: &str) -> String {
        let template = match &self.static_url {
            Some(url) => url.clone(),
            None if self.relative_paths => "static/".to_string(),
            None => "/{bundle}/static/".to_string(),
        };
        let mut url = template.replace("{bundle}", &bundle.to_lowercase());
        if !url.ends_with('/') {
            url.push('/');
        }
        url
    }

    pub fn cache_file(&self) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| dir.join(CACHE_FILE_NAME))
    }

    pub fn includes_of(&self, bundle: &str) -> &[String] {
        self.include.get(bundle).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_camel_case_options() {
        let config = BuilderConfig::from_json(
            r#"{
                "bundles": ["UI", "Admin"],
                "projectRoot": "/srv/app",
                "minified": true,
                "cacheDir": "/tmp/cache",
                "include": { "Admin": ["UI"] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.bundles, vec!["UI", "Admin"]);
        assert!(config.minified);
        assert!(!config.compress);
        assert_eq!(config.includes_of("Admin"), &["UI".to_string()]);
        assert_eq!(config.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(
            config.cache_file(),
            Some(PathBuf::from("/tmp/cache").join(CACHE_FILE_NAME))
        );
    }

    #[test]
    fn test_rejects_unknown_include() {
        let err = BuilderConfig::from_json(r#"{ "bundles": ["UI"], "include": { "UI": ["Admin"] } }"#)
            .unwrap_err();
        assert!(err.to_string().contains("unknown bundle"));
    }

    #[test]
    fn test_static_url_variants() {
        let mut config = BuilderConfig::new("/srv/app", &["UI"]);
        assert_eq!(config.static_url("UI"), "/ui/static/");
        config.relative_paths = true;
        assert_eq!(config.static_url("UI"), "static/");
        config.static_url = Some("https://cdn.example/{bundle}".to_string());
        assert_eq!(config.static_url("UI"), "https://cdn.example/ui/");
    }

    #[test]
    fn test_default_paths() {
        let config = BuilderConfig::new("/srv/app", &["UI"]);
        assert_eq!(config.source_dir("UI"), PathBuf::from("/srv/app/UI/Source"));
        assert_eq!(config.pack_dir("UI"), PathBuf::from("/srv/app/UI/public/pack"));
    }
}
