//! Type harvesting: interface and object-type shapes, plus the props shape
//! of a default-exported component.

use oxc_ast::ast::{
    ExportDefaultDeclaration, ExportDefaultDeclarationKind, FormalParameter, Program,
    TSInterfaceDeclaration, TSSignature, TSType, TSTypeAliasDeclaration, TSTypeAnnotation,
    TSTypeName,
};
use oxc_ast_visit::Visit;
use oxc_span::GetSpan;

use crate::transform::{TypeDescriptor, TypeField, TypeKind};

pub const DEFAULT_EXPORT_NAME: &str = "default";

fn span_text<'s>(source: &'s str, span: oxc_span::Span) -> &'s str {
    &source[span.start as usize..span.end as usize]
}

fn signature_fields(members: &[TSSignature], source: &str) -> Vec<TypeField> {
    let mut fields = Vec::new();
    for member in members {
        match member {
            TSSignature::TSPropertySignature(sig) => {
                let Some(name) = sig.key.static_name() else {
                    continue;
                };
                let type_name = sig
                    .type_annotation
                    .as_ref()
                    .map(|a| span_text(source, a.type_annotation.span()).to_string())
                    .unwrap_or_else(|| "any".to_string());
                fields.push(TypeField {
                    name: name.to_string(),
                    type_name,
                    optional: sig.optional,
                });
            }
            TSSignature::TSMethodSignature(sig) => {
                let Some(name) = sig.key.static_name() else {
                    continue;
                };
                fields.push(TypeField {
                    name: name.to_string(),
                    type_name: "function".to_string(),
                    optional: sig.optional,
                });
            }
            _ => {}
        }
    }
    fields
}

struct TypeCollector<'s> {
    source: &'s str,
    types: Vec<TypeDescriptor>,
}

impl<'a, 's> Visit<'a> for TypeCollector<'s> {
    fn visit_ts_interface_declaration(&mut self, decl: &TSInterfaceDeclaration<'a>) {
        self.types.push(TypeDescriptor {
            name: decl.id.name.to_string(),
            kind: TypeKind::Interface,
            fields: signature_fields(&decl.body.body, self.source),
            reference: None,
        });
    }

    fn visit_ts_type_alias_declaration(&mut self, decl: &TSTypeAliasDeclaration<'a>) {
        if let TSType::TSTypeLiteral(lit) = &decl.type_annotation {
            self.types.push(TypeDescriptor {
                name: decl.id.name.to_string(),
                kind: TypeKind::Type,
                fields: signature_fields(&lit.members, self.source),
                reference: None,
            });
        }
    }

    fn visit_export_default_declaration(&mut self, decl: &ExportDefaultDeclaration<'a>) {
        let (name, param) = match &decl.declaration {
            ExportDefaultDeclarationKind::FunctionDeclaration(func) => (
                func.id.as_ref().map(|id| id.name.to_string()),
                func.params.items.first(),
            ),
            ExportDefaultDeclarationKind::ArrowFunctionExpression(arrow) => {
                (None, arrow.params.items.first())
            }
            ExportDefaultDeclarationKind::FunctionExpression(func) => (
                func.id.as_ref().map(|id| id.name.to_string()),
                func.params.items.first(),
            ),
            _ => (None, None),
        };

        if let Some(param) = param {
            let mut finder = AnnotationFinder {
                source: self.source,
                found: None,
            };
            finder.visit_formal_parameter(param);
            if let Some((fields, reference)) = finder.found {
                self.types.push(TypeDescriptor {
                    name: name.unwrap_or_else(|| DEFAULT_EXPORT_NAME.to_string()),
                    kind: TypeKind::Props,
                    fields,
                    reference,
                });
            }
        }

        oxc_ast_visit::walk::walk_export_default_declaration(self, decl);
    }
}

/// Picks up the first type annotation on a parameter.
struct AnnotationFinder<'s> {
    source: &'s str,
    found: Option<(Vec<TypeField>, Option<String>)>,
}

impl<'a, 's> Visit<'a> for AnnotationFinder<'s> {
    fn visit_formal_parameter(&mut self, param: &FormalParameter<'a>) {
        oxc_ast_visit::walk::walk_formal_parameter(self, param);
    }

    fn visit_ts_type_annotation(&mut self, ann: &TSTypeAnnotation<'a>) {
        if self.found.is_some() {
            return;
        }
        self.found = match &ann.type_annotation {
            TSType::TSTypeLiteral(lit) => Some((signature_fields(&lit.members, self.source), None)),
            TSType::TSTypeReference(reference) => {
                let name = match &reference.type_name {
                    TSTypeName::IdentifierReference(id) => id.name.to_string(),
                    other => span_text(self.source, other.span()).to_string(),
                };
                Some((Vec::new(), Some(name)))
            }
            other => Some((Vec::new(), Some(span_text(self.source, other.span()).to_string()))),
        };
    }

    // Stop at default values and nested functions.
    fn visit_expression(&mut self, _expr: &oxc_ast::ast::Expression<'a>) {}
}

pub fn collect_types(program: &Program, source: &str) -> Vec<TypeDescriptor> {
    let mut collector = TypeCollector {
        source,
        types: Vec::new(),
    };
    collector.visit_program(program);
    collector.types
}
