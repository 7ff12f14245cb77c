//! Import/export rewrite.
//!
//! Runs on lowered (plain ES module) code. Every module declaration becomes
//! ordinary statements against the registry: imports turn into `var`
//! bindings of `_rq(...)` lookups and exports into assignments onto the
//! factory's `exports` object. Edits are collected as span replacements
//! and applied in one pass so untouched code keeps its exact text.

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, BindingPattern, Declaration, ExportDefaultDeclaration, ExportDefaultDeclarationKind,
    ExportNamedDeclaration, Expression, ImportDeclaration, ImportDeclarationSpecifier,
    ModuleExportName, Statement,
};
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};
use oxc_syntax::identifier::is_identifier_name;

use crate::error::TransformError;
use crate::transform::resolve::{is_relative, require_call, resolve_reference, Reference};
use crate::transform::ScriptContext;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleRewrite {
    pub code: String,
    /// Bare package names referenced by imports, in first-seen order.
    pub packages: Vec<String>,
}

pub fn rewrite_modules(
    code: &str,
    ctx: &ScriptContext,
    record_requires: bool,
) -> Result<ModuleRewrite, TransformError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, code, SourceType::mjs()).parse();
    if !ret.errors.is_empty() {
        return Err(TransformError::Lowering {
            module: ctx.module_path.to_string(),
            messages: ret.errors.iter().map(|e| e.to_string()).collect(),
        });
    }

    let mut rewriter = ModuleRewriter {
        ctx,
        replacements: Vec::new(),
        packages: Vec::new(),
        trailing: Vec::new(),
    };
    for stmt in &ret.program.body {
        rewriter.rewrite_statement(stmt)?;
    }

    let mut replacements = rewriter.replacements;
    if !rewriter.trailing.is_empty() {
        // Local export lists may name bindings declared further down.
        let end = code.len() as u32;
        replacements.push((end, end, format!("\n{}\n", rewriter.trailing.join(" "))));
    }
    if record_requires {
        let mut requires = RequireRewriter {
            ctx,
            replacements: Vec::new(),
        };
        requires.visit_program(&ret.program);
        replacements.extend(requires.replacements);
    }

    Ok(ModuleRewrite {
        code: apply_replacements(code, replacements),
        packages: rewriter.packages,
    })
}

/// Apply `(start, end, text)` replacements. Overlapping edits after the
/// first are dropped.
pub fn apply_replacements(source: &str, mut replacements: Vec<(u32, u32, String)>) -> String {
    replacements.sort_by_key(|(start, end, _)| (*start, *end));
    let mut out = String::with_capacity(source.len() + replacements.len() * 16);
    let mut cursor = 0usize;
    for (start, end, text) in replacements {
        let (start, end) = (start as usize, end as usize);
        if start < cursor {
            continue;
        }
        out.push_str(&source[cursor..start]);
        out.push_str(&text);
        cursor = end;
    }
    out.push_str(&source[cursor..]);
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEXT HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn export_name(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::IdentifierName(id) => id.name.to_string(),
        ModuleExportName::IdentifierReference(id) => id.name.to_string(),
        ModuleExportName::StringLiteral(s) => s.value.to_string(),
    }
}

/// `.name` or `["name"]`.
fn member_access(name: &str) -> String {
    if is_identifier_name(name) {
        format!(".{}", name)
    } else {
        format!("[{}]", serde_json::Value::String(name.to_string()))
    }
}

fn export_assignment(exported: &str, value: &str) -> String {
    format!("exports{} = {};", member_access(exported), value)
}

/// The value a default import binds to. Fixed globals are their own default.
fn default_of(reference: &Reference, module: &str) -> String {
    match reference {
        Reference::Global(_) => module.to_string(),
        _ => format!("{}.default", module),
    }
}

fn imported_value(reference: &Reference, module: &str, imported: &str) -> String {
    if imported == "default" {
        default_of(reference, module)
    } else {
        format!("{}{}", module, member_access(imported))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REWRITER
// ═══════════════════════════════════════════════════════════════════════════════

struct ModuleRewriter<'c> {
    ctx: &'c ScriptContext<'c>,
    replacements: Vec<(u32, u32, String)>,
    packages: Vec<String>,
    /// Assignments from local `export { .. }` lists, emitted after the body.
    trailing: Vec<String>,
}

impl<'c> ModuleRewriter<'c> {
    fn unsupported(&self, construct: &str) -> TransformError {
        TransformError::Unsupported {
            module: self.ctx.module_path.to_string(),
            construct: construct.to_string(),
        }
    }

    fn resolve(&mut self, specifier: &str) -> Reference {
        let reference = resolve_reference(specifier, self.ctx);
        if let Reference::External { package, .. } = &reference {
            if !self.packages.contains(package) {
                self.packages.push(package.clone());
            }
        }
        reference
    }

    fn rewrite_statement(&mut self, stmt: &Statement) -> Result<(), TransformError> {
        match stmt {
            Statement::ImportDeclaration(decl) => {
                let text = self.rewrite_import(decl);
                self.replacements.push((decl.span.start, decl.span.end, text));
            }
            Statement::ExportNamedDeclaration(decl) => self.rewrite_named_export(decl)?,
            Statement::ExportDefaultDeclaration(decl) => self.rewrite_default_export(decl),
            Statement::ExportAllDeclaration(decl) => {
                let construct = match &decl.exported {
                    Some(name) => format!(
                        "export * as {} from \"{}\"",
                        export_name(name),
                        decl.source.value
                    ),
                    None => format!("export * from \"{}\"", decl.source.value),
                };
                return Err(self.unsupported(&construct));
            }
            _ => {}
        }
        Ok(())
    }

    fn rewrite_import(&mut self, decl: &ImportDeclaration) -> String {
        let reference = self.resolve(decl.source.value.as_str());
        let specifiers = match &decl.specifiers {
            Some(specifiers) if !specifiers.is_empty() => specifiers,
            _ => {
                return match reference {
                    Reference::Static(_) => String::new(),
                    _ if reference.is_stylesheet() => String::new(),
                    _ => format!("{};", reference.module_expression()),
                };
            }
        };

        let module = reference.module_expression();

        if let Reference::Static(_) = reference {
            return specifiers
                .iter()
                .map(|s| format!("var {} = {};", specifier_local(s), module))
                .collect::<Vec<_>>()
                .join(" ");
        }

        let mut namespace = None;
        let mut default = None;
        let mut named: Vec<(String, String)> = Vec::new();
        for specifier in specifiers {
            match specifier {
                ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                    namespace = Some(s.local.name.to_string())
                }
                ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                    default = Some(s.local.name.to_string())
                }
                ImportDeclarationSpecifier::ImportSpecifier(s) => {
                    named.push((export_name(&s.imported), s.local.name.to_string()))
                }
            }
        }

        let mut lines = Vec::new();

        if let Some(ns) = namespace {
            lines.push(format!("var {} = {};", ns, module));
            if let Some(d) = default {
                lines.push(format!("var {} = {};", d, default_of(&reference, &ns)));
            }
            for (imported, local) in &named {
                lines.push(format!(
                    "var {} = {};",
                    local,
                    imported_value(&reference, &ns, imported)
                ));
            }
            return lines.join(" ");
        }

        match (default, named.len()) {
            (Some(d), 0) => lines.push(format!("var {} = {};", d, default_of(&reference, &module))),
            (None, 1) => {
                let (imported, local) = &named[0];
                lines.push(format!(
                    "var {} = {};",
                    local,
                    imported_value(&reference, &module, imported)
                ));
            }
            (default, _) => {
                let mut fields = Vec::new();
                if let Some(d) = default {
                    if matches!(reference, Reference::Global(_)) {
                        lines.push(format!("var {} = {};", d, module));
                    } else {
                        fields.push(format!("default: {}", d));
                    }
                }
                for (imported, local) in &named {
                    fields.push(destructure_field(imported, local));
                }
                lines.push(format!("var {{ {} }} = {};", fields.join(", "), module));
            }
        }

        lines.join(" ")
    }

    fn rewrite_named_export(&mut self, decl: &ExportNamedDeclaration) -> Result<(), TransformError> {
        if let Some(declaration) = &decl.declaration {
            let names = self.declared_names(declaration)?;
            self.replacements
                .push((decl.span.start, declaration.span().start, String::new()));
            if !names.is_empty() {
                let assignments: Vec<String> =
                    names.iter().map(|n| export_assignment(n, n)).collect();
                self.replacements.push((
                    decl.span.end,
                    decl.span.end,
                    format!("\n{}", assignments.join(" ")),
                ));
            }
            return Ok(());
        }

        let mut assignments = Vec::new();
        match &decl.source {
            Some(source) => {
                let reference = self.resolve(source.value.as_str());
                if let Reference::Static(_) = reference {
                    return Err(self.unsupported(&format!(
                        "re-export of static asset \"{}\"",
                        source.value
                    )));
                }
                let module = reference.module_expression();
                for specifier in &decl.specifiers {
                    let local = export_name(&specifier.local);
                    let exported = export_name(&specifier.exported);
                    assignments.push(export_assignment(
                        &exported,
                        &imported_value(&reference, &module, &local),
                    ));
                }
            }
            None => {
                for specifier in &decl.specifiers {
                    let local = export_name(&specifier.local);
                    let exported = export_name(&specifier.exported);
                    self.trailing.push(export_assignment(&exported, &local));
                }
            }
        }

        self.replacements
            .push((decl.span.start, decl.span.end, assignments.join(" ")));
        Ok(())
    }

    fn declared_names(&self, declaration: &Declaration) -> Result<Vec<String>, TransformError> {
        match declaration {
            Declaration::VariableDeclaration(var) => {
                let mut names = Vec::new();
                for declarator in &var.declarations {
                    match &declarator.id {
                        BindingPattern::BindingIdentifier(id) => names.push(id.name.to_string()),
                        _ => return Err(self.unsupported("destructuring in an export declaration")),
                    }
                }
                Ok(names)
            }
            Declaration::FunctionDeclaration(func) => {
                Ok(func.id.iter().map(|id| id.name.to_string()).collect())
            }
            Declaration::ClassDeclaration(class) => {
                Ok(class.id.iter().map(|id| id.name.to_string()).collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    fn rewrite_default_export(&mut self, decl: &ExportDefaultDeclaration) {
        let inner = decl.declaration.span();
        let name = match &decl.declaration {
            ExportDefaultDeclarationKind::FunctionDeclaration(func) => {
                Some(func.id.as_ref().map(|id| id.name.to_string()))
            }
            ExportDefaultDeclarationKind::ClassDeclaration(class) => {
                Some(class.id.as_ref().map(|id| id.name.to_string()))
            }
            ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => {
                self.replacements
                    .push((decl.span.start, decl.span.end, String::new()));
                return;
            }
            _ => None,
        };

        match name {
            Some(Some(name)) => {
                self.replacements
                    .push((decl.span.start, inner.start, String::new()));
                self.replacements.push((
                    decl.span.end,
                    decl.span.end,
                    format!("\n{}", export_assignment("default", &name)),
                ));
            }
            Some(None) => {
                self.replacements
                    .push((decl.span.start, inner.start, "exports.default = ".to_string()));
                self.replacements
                    .push((decl.span.end, decl.span.end, ";".to_string()));
            }
            None => {
                self.replacements
                    .push((decl.span.start, inner.start, "exports.default = ".to_string()));
            }
        }
    }
}

fn specifier_local(specifier: &ImportDeclarationSpecifier) -> String {
    match specifier {
        ImportDeclarationSpecifier::ImportSpecifier(s) => s.local.name.to_string(),
        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => s.local.name.to_string(),
        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => s.local.name.to_string(),
    }
}

fn destructure_field(imported: &str, local: &str) -> String {
    if imported == local {
        local.to_string()
    } else if is_identifier_name(imported) {
        format!("{}: {}", imported, local)
    } else {
        format!("{}: {}", serde_json::Value::String(imported.to_string()), local)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REQUIRE CALLS
// ═══════════════════════════════════════════════════════════════════════════════

struct RequireRewriter<'c> {
    ctx: &'c ScriptContext<'c>,
    replacements: Vec<(u32, u32, String)>,
}

impl<'a, 'c> Visit<'a> for RequireRewriter<'c> {
    fn visit_call_expression(&mut self, call: &oxc_ast::ast::CallExpression<'a>) {
        if let Expression::Identifier(callee) = &call.callee {
            if callee.name == "require" && call.arguments.len() == 1 {
                if let Argument::StringLiteral(lit) = &call.arguments[0] {
                    if is_relative(lit.value.as_str()) {
                        if let Reference::Module { key, .. } =
                            resolve_reference(lit.value.as_str(), self.ctx)
                        {
                            self.replacements
                                .push((call.span.start, call.span.end, require_call(&key)));
                            return;
                        }
                    }
                }
            }
        }
        oxc_ast_visit::walk::walk_call_expression(self, call);
    }
}
