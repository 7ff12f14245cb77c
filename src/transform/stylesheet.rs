//! Stylesheet transform: SCSS compile against the global header, then
//! `url()` remapping onto the bundle's static assets.

use codemap::SpanLoc;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::cell::RefCell;
use tracing::{debug, warn};

use crate::error::TransformError;
use crate::transform::resolve::static_asset_url;
use crate::transform::StyleContext;

lazy_static! {
    static ref URL_RE: Regex =
        Regex::new(r#"url\(\s*(?:'([^']*)'|"([^"]*)"|([^'"()\s]*))\s*\)"#).unwrap();
}

/// Compiled CSS and the warnings the compiler raised on the way.
#[derive(Debug, Clone, Default)]
pub struct CompiledStylesheet {
    pub css: String,
    pub warnings: Vec<String>,
}

/// Forwards `@warn`, `@debug` and deprecation output to tracing, keeping
/// the warnings for the caller.
#[derive(Debug)]
struct WarningCollector<'c> {
    module_path: &'c str,
    warnings: RefCell<Vec<String>>,
}

impl grass::Logger for WarningCollector<'_> {
    fn debug(&self, location: SpanLoc, message: &str) {
        debug!(
            "{}:{} @debug: {}",
            self.module_path,
            location.begin.line + 1,
            message
        );
    }

    fn warn(&self, location: SpanLoc, message: &str) {
        warn!(
            "{}:{}: SCSS warning: {}",
            self.module_path,
            location.begin.line + 1,
            message
        );
        self.warnings.borrow_mut().push(message.to_string());
    }
}

pub fn compile_stylesheet(
    source: &str,
    header: &str,
    ctx: &StyleContext,
    minify: bool,
) -> Result<CompiledStylesheet, TransformError> {
    let input = if header.is_empty() {
        source.to_string()
    } else {
        format!("{}\n{}", header, source)
    };

    let style = if minify {
        grass::OutputStyle::Compressed
    } else {
        grass::OutputStyle::Expanded
    };
    let collector = WarningCollector {
        module_path: ctx.module_path,
        warnings: RefCell::new(Vec::new()),
    };
    let mut options = grass::Options::default().style(style).logger(&collector);
    if let Some(dir) = ctx.load_path {
        options = options.load_path(dir);
    }

    let css = grass::from_string(input, &options).map_err(|e| TransformError::Scss {
        module: ctx.module_path.to_string(),
        message: e.to_string(),
    })?;

    Ok(CompiledStylesheet {
        css: rewrite_urls(&css, ctx),
        warnings: collector.warnings.into_inner(),
    })
}

/// Point `./` and `../` references at the copied static asset. Anything
/// else (absolute, protocol-relative, `data:`) is left alone.
pub fn rewrite_urls(css: &str, ctx: &StyleContext) -> String {
    URL_RE
        .replace_all(css, |caps: &Captures| {
            let (quote, path) = if let Some(m) = caps.get(1) {
                ("'", m.as_str())
            } else if let Some(m) = caps.get(2) {
                ("\"", m.as_str())
            } else {
                ("", caps.get(3).map(|m| m.as_str()).unwrap_or(""))
            };

            if path.starts_with("./") || path.starts_with("../") {
                let url = static_asset_url(ctx.full_module_path, path, ctx.static_url);
                format!("url({}{}{})", quote, url, quote)
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Inline replacement for a stylesheet that failed to compile.
pub fn error_comment(module_path: &str, message: &str) -> String {
    format!(
        "/* SCSS error in {}: {} */\n",
        module_path,
        message.replace("*/", "* /")
    )
}
