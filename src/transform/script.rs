//! Script transform: parse → lower TS/JSX → rewrite modules → wrap →
//! mangle → relocate templates.

use oxc_allocator::Allocator;
use oxc_ast::ast::Program;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_minifier::{MangleOptions, Minifier, MinifierOptions};
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{JsxOptions, JsxRuntime, TransformOptions, Transformer};
use std::path::Path;

use crate::error::TransformError;
use crate::runtime::wrap_module;
use crate::transform::modules::rewrite_modules;
use crate::transform::resolve::registry_key;
use crate::transform::templates::{collect_templates, relocate_templates};
use crate::transform::types::collect_types;
use crate::transform::{ScriptContext, ScriptOptions, ScriptOutput};

pub fn source_type_for(module_path: &str) -> SourceType {
    let lower = module_path.to_lowercase();
    if lower.ends_with(".tsx") {
        SourceType::tsx()
    } else if lower.ends_with(".ts") {
        SourceType::ts()
    } else {
        SourceType::jsx()
    }
}

pub fn transform_script(
    source: &str,
    ctx: &ScriptContext,
    options: &ScriptOptions,
) -> Result<ScriptOutput, TransformError> {
    let allocator = Allocator::default();
    let source_type = source_type_for(ctx.module_path);

    let parsed = Parser::new(&allocator, source, source_type).parse();
    if !parsed.errors.is_empty() {
        return Err(TransformError::Parse {
            module: ctx.module_path.to_string(),
            messages: parsed.errors.iter().map(|e| e.to_string()).collect(),
        });
    }
    let mut program = parsed.program;

    // Pass one runs on the untouched AST so records carry original text.
    let records = collect_templates(&program, source);
    let types = collect_types(&program, source);

    let lowered = lower(&allocator, &mut program, ctx.module_path)?;
    let rewrite = rewrite_modules(&lowered, ctx, options.record_requires)?;

    let mut code = if options.wrap {
        wrap_module(&registry_key(ctx.module_path), &rewrite.code)
    } else {
        rewrite.code
    };
    if options.minify {
        code = minify(&code, ctx.module_path)?;
    }

    let templates = relocate_templates(&records, &code, ctx.module_path);

    Ok(ScriptOutput {
        code,
        templates,
        types,
        packages: rewrite.packages,
    })
}

/// Strip TypeScript and lower JSX to classic `React.createElement` calls.
fn lower<'a>(
    allocator: &'a Allocator,
    program: &mut Program<'a>,
    module_path: &str,
) -> Result<String, TransformError> {
    let scoping = SemanticBuilder::new().build(program).semantic.into_scoping();

    let options = TransformOptions {
        jsx: JsxOptions {
            runtime: JsxRuntime::Classic,
            ..JsxOptions::default()
        },
        ..TransformOptions::default()
    };
    let ret = Transformer::new(allocator, Path::new(module_path), &options)
        .build_with_scoping(scoping, program);
    if !ret.errors.is_empty() {
        return Err(TransformError::Lowering {
            module: module_path.to_string(),
            messages: ret.errors.iter().map(|e| e.to_string()).collect(),
        });
    }

    Ok(Codegen::new().build(program).code)
}

/// Mangle local names and drop whitespace. The compressor stays off so
/// template literals survive one-to-one.
fn minify(code: &str, module_path: &str) -> Result<String, TransformError> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, code, SourceType::cjs()).parse();
    if !parsed.errors.is_empty() {
        return Err(TransformError::Lowering {
            module: module_path.to_string(),
            messages: parsed.errors.iter().map(|e| e.to_string()).collect(),
        });
    }
    let mut program = parsed.program;

    let options = MinifierOptions {
        mangle: Some(MangleOptions::default()),
        compress: None,
    };
    let ret = Minifier::new(options).minify(&allocator, &mut program);

    Ok(Codegen::new()
        .with_options(CodegenOptions::minify())
        .with_scoping(ret.scoping)
        .build(&program)
        .code)
}
