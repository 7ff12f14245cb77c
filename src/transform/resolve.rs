//! Import reference resolution.

use crate::source_file::parent_of;
use crate::transform::ScriptContext;

/// The expression a `react` import resolves to.
pub const REACT_GLOBAL: &str = "global.React";

const KEYED_EXTENSIONS: &[&str] = &[".js", ".jsx", ".ts", ".tsx", ".scss", ".css"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A module of this project, looked up in the registry by `key`.
    Module { key: String, path: String },
    /// A fixed global binding.
    Global(&'static str),
    /// A static asset; imports of it become its public URL.
    Static(String),
    /// A third-party package, looked up in the registry by its specifier.
    External { specifier: String, package: String },
}

impl Reference {
    /// Expression that evaluates to the referenced module's export object.
    pub fn module_expression(&self) -> String {
        match self {
            Reference::Module { key, .. } => require_call(key),
            Reference::Global(expr) => expr.to_string(),
            Reference::Static(url) => json_string(url),
            Reference::External { specifier, .. } => require_call(specifier),
        }
    }

    pub fn is_stylesheet(&self) -> bool {
        match self {
            Reference::Module { path, .. } => {
                let lower = path.to_lowercase();
                lower.ends_with(".scss") || lower.ends_with(".css")
            }
            _ => false,
        }
    }
}

pub fn require_call(key: &str) -> String {
    format!("_rq({})", json_string(key))
}

pub fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Registry key of a module path: lowercased, script/stylesheet extension removed.
pub fn registry_key(module_path: &str) -> String {
    let lower = module_path.to_lowercase();
    for ext in KEYED_EXTENSIONS {
        if let Some(stripped) = lower.strip_suffix(ext) {
            return stripped.to_string();
        }
    }
    lower
}

/// Join `relative` onto `base_dir`, folding `.` and `..` segments.
pub fn normalize_path(base_dir: &str, relative: &str) -> String {
    let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

pub fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
}

/// A reference whose first non-relative segment is `static`.
pub fn is_static_reference(specifier: &str) -> bool {
    specifier
        .split('/')
        .find(|s| !s.is_empty() && *s != "." && *s != "..")
        .map(|s| s.eq_ignore_ascii_case("static"))
        .unwrap_or(false)
}

/// Public URL of the static asset `specifier` refers to from a file whose
/// on-disk module path is `full_module_path`.
pub fn static_asset_url(full_module_path: &str, specifier: &str, static_url: &str) -> String {
    let resolved = normalize_path(parent_of(full_module_path), specifier);
    let within_bundle = match resolved.find('/') {
        Some(i) => &resolved[i + 1..],
        None => "",
    };
    format!("{}{}", static_url, within_bundle.to_lowercase())
}

pub fn package_name(specifier: &str) -> String {
    let mut parts = specifier.split('/');
    match (parts.next(), parts.next()) {
        (Some(scope), Some(name)) if scope.starts_with('@') => format!("{}/{}", scope, name),
        (Some(name), _) => name.to_string(),
        _ => specifier.to_string(),
    }
}

pub fn resolve_reference(specifier: &str, ctx: &ScriptContext) -> Reference {
    if specifier == "react" {
        return Reference::Global(REACT_GLOBAL);
    }

    if is_static_reference(specifier) {
        return Reference::Static(static_asset_url(
            ctx.full_module_path,
            specifier,
            ctx.static_url,
        ));
    }

    if is_relative(specifier) {
        let path = normalize_path(parent_of(ctx.module_path), specifier);
        return Reference::Module {
            key: registry_key(&path),
            path,
        };
    }

    let first = specifier.split('/').next().unwrap_or("");
    let in_bundle = specifier.contains('/') && ctx.bundles.iter().any(|b| b.eq_ignore_ascii_case(first));
    if in_bundle {
        let trimmed = specifier.trim_end_matches('/');
        let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
        let path = if last.contains('.') {
            trimmed.to_string()
        } else {
            format!("{}/{}.js", trimmed, last)
        };
        return Reference::Module {
            key: registry_key(&path),
            path,
        };
    }

    Reference::External {
        specifier: specifier.to_string(),
        package: package_name(specifier),
    }
}
