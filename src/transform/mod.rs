//! Transform Pipeline
//!
//! Pure functions from source text to output text:
//! - scripts: TS/JSX lowering, import/export rewrite onto the module
//!   registry, optional mangling, template-literal relocation, type harvest
//! - stylesheets: SCSS compile with the global header, `url()` remapping

pub mod modules;
pub mod resolve;
pub mod script;
pub mod stylesheet;
pub mod templates;
pub mod types;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use resolve::registry_key;
pub use script::transform_script;
pub use stylesheet::{compile_stylesheet, CompiledStylesheet};

/// One localizable string extracted from a script.
///
/// `start..end` is the byte range of the literal's body (between the
/// backticks) inside the module's final transformed source, so that
/// `&code[start..end] == target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateLiteral {
    pub module: String,
    pub original: String,
    pub target: String,
    pub start: usize,
    pub end: usize,
    /// Original interpolation text → final interpolation text. Absent for
    /// literals without interpolations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_map: Option<IndexMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeField {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub optional: bool,
}

/// Shape harvested from an `interface`, an object-literal `type` alias, or
/// the first parameter of a default-exported function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDescriptor {
    pub name: String,
    pub kind: TypeKind,
    pub fields: Vec<TypeField>,
    /// Named type the shape refers to instead of spelling it out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypeKind {
    Interface,
    Type,
    Props,
}

/// Where the script being transformed lives and what it may refer to.
#[derive(Debug, Clone)]
pub struct ScriptContext<'c> {
    pub module_path: &'c str,
    pub full_module_path: &'c str,
    /// Every configured bundle name; references starting with one of these
    /// are absolute module references.
    pub bundles: &'c [String],
    /// URL prefix of the owning bundle's static assets.
    pub static_url: &'c str,
}

#[derive(Debug, Clone, Copy)]
pub struct ScriptOptions {
    pub minify: bool,
    /// Wrap the body as a registry factory.
    pub wrap: bool,
    /// Rewrite relative `require("./x")` calls onto the registry.
    pub record_requires: bool,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        ScriptOptions {
            minify: false,
            wrap: true,
            record_requires: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptOutput {
    pub code: String,
    pub templates: Vec<TemplateLiteral>,
    pub types: Vec<TypeDescriptor>,
    pub packages: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StyleContext<'c> {
    pub module_path: &'c str,
    pub full_module_path: &'c str,
    pub static_url: &'c str,
    /// Directory searched for `@import`/`@use` targets.
    pub load_path: Option<&'c Path>,
}
