//! Registry runtime emitted into every script artifact.

use crate::transform::resolve::{json_string, require_call};

/// Global registry table: key → module factory.
pub const REGISTRY: &str = "__mm";

/// Bootstraps the registry and defines `_rq`, which instantiates a factory
/// once and returns its exports.
pub const PREAMBLE: &str = r#"var __mm = window.__mm = window.__mm || {};
var __mc = {};
function _rq(n) {
	var c = __mc[n];
	if (c) {
		return c.exports;
	}
	var f = __mm[n];
	if (!f) {
		throw new Error("Module not found: " + n);
	}
	c = __mc[n] = { exports: {} };
	f(window, c.exports, c);
	return c.exports;
}
"#;

pub fn wrap_module(key: &str, body: &str) -> String {
    format!(
        "{}[{}] = function(global, exports, module) {{\n{}\n}};\n",
        REGISTRY,
        json_string(key),
        body.trim_end()
    )
}

/// Factory for a module that failed to build: loading it throws.
pub fn failure_stub(key: &str, module_path: &str, message: &str) -> String {
    let text = format!("Failed to build {}: {}", module_path, message);
    wrap_module(key, &format!("throw new Error({});", json_string(&text)))
}

/// Invocation of the entry module at the end of the artifact.
pub fn entry_call(key: &str) -> String {
    format!("{};\n", require_call(key))
}
