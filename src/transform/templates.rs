//! Template literal extraction and relocation.
//!
//! Pass one walks the original AST and records each template literal's body
//! and interpolation texts, ordered by source position. Pass two scans the
//! final output character by character, finds every literal in opening
//! order, and pairs the two lists positionally. Mangling rewrites both the
//! literal bodies and the interpolations, which is why positions can't be
//! read off the original AST.

use indexmap::IndexMap;
use oxc_ast::ast::{Expression, Program, TSType};
use oxc_ast_visit::Visit;
use oxc_span::GetSpan;
use tracing::warn;

use crate::transform::TemplateLiteral;

// ═══════════════════════════════════════════════════════════════════════════════
// PASS ONE: EXTRACTION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRecord {
    /// Offset of the opening backtick in the original source.
    pub start: u32,
    pub original: String,
    pub expressions: Vec<String>,
    /// Every interpolation is an identifier or a property-access chain.
    pub localizable: bool,
}

struct TemplateCollector<'s> {
    source: &'s str,
    records: Vec<TemplateRecord>,
}

impl<'a, 's> Visit<'a> for TemplateCollector<'s> {
    fn visit_template_literal(&mut self, lit: &oxc_ast::ast::TemplateLiteral<'a>) {
        let start = lit.span.start as usize;
        let end = lit.span.end as usize;
        let original = if end >= start + 2 {
            self.source[start + 1..end - 1].to_string()
        } else {
            String::new()
        };

        let expressions = lit
            .expressions
            .iter()
            .map(|e| {
                let span = e.span();
                self.source[span.start as usize..span.end as usize].to_string()
            })
            .collect();
        let localizable = lit.expressions.iter().all(is_access_chain);

        self.records.push(TemplateRecord {
            start: lit.span.start,
            original,
            expressions,
            localizable,
        });

        oxc_ast_visit::walk::walk_template_literal(self, lit);
    }

    // Template literal types are erased before output.
    fn visit_ts_type(&mut self, _ty: &TSType<'a>) {}
}

fn is_access_chain(expr: &Expression) -> bool {
    match expr {
        Expression::Identifier(_) | Expression::ThisExpression(_) => true,
        Expression::StaticMemberExpression(member) => {
            !member.optional && is_access_chain(&member.object)
        }
        _ => false,
    }
}

/// Records for every template literal in `program`, sorted by position.
pub fn collect_templates(program: &Program, source: &str) -> Vec<TemplateRecord> {
    let mut collector = TemplateCollector {
        source,
        records: Vec::new(),
    };
    collector.visit_program(program);
    collector.records.sort_by_key(|r| r.start);
    collector.records
}

// ═══════════════════════════════════════════════════════════════════════════════
// PASS TWO: LOCATION
// ═══════════════════════════════════════════════════════════════════════════════

/// A literal found in final output. Ranges exclude the backticks and the
/// `${` `}` delimiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedTemplate {
    pub start: usize,
    pub end: usize,
    pub expressions: Vec<(usize, usize)>,
}

enum Frame {
    Template(usize),
    Interpolation { template: usize, depth: usize },
}

#[derive(Clone, Copy, PartialEq)]
enum Prev {
    Start,
    Punct(u8),
    Operand,
    Keyword,
}

const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

const REGEX_PREFIX_PUNCT: &[u8] = b"(,=:[!&|?{};+-*%<>~^";

fn regex_allowed(prev: Prev) -> bool {
    match prev {
        Prev::Start | Prev::Keyword => true,
        Prev::Punct(p) => REGEX_PREFIX_PUNCT.contains(&p),
        Prev::Operand => false,
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Every template literal in `code`, in order of its opening backtick.
/// A `/` directly after an operand (identifier, literal, `)`, `]`) is read
/// as division; anywhere else it opens a regular expression.
pub fn locate_templates(code: &str) -> Vec<LocatedTemplate> {
    let bytes = code.as_bytes();
    let len = bytes.len();
    let mut found: Vec<LocatedTemplate> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut prev = Prev::Start;
    let mut i = 0;

    while i < len {
        if let Some(Frame::Template(index)) = stack.last() {
            let index = *index;
            match bytes[i] {
                b'\\' => i += 2,
                b'`' => {
                    found[index].end = i;
                    stack.pop();
                    prev = Prev::Operand;
                    i += 1;
                }
                b'$' if bytes.get(i + 1) == Some(&b'{') => {
                    found[index].expressions.push((i + 2, i + 2));
                    stack.push(Frame::Interpolation {
                        template: index,
                        depth: 0,
                    });
                    prev = Prev::Punct(b'{');
                    i += 2;
                }
                _ => i += 1,
            }
            continue;
        }

        let c = bytes[i];
        match c {
            b'\'' | b'"' => {
                i += 1;
                while i < len {
                    match bytes[i] {
                        b'\\' => i += 2,
                        b'\n' => break,
                        b if b == c => {
                            i += 1;
                            break;
                        }
                        _ => i += 1,
                    }
                }
                prev = Prev::Operand;
            }
            b'`' => {
                found.push(LocatedTemplate {
                    start: i + 1,
                    end: len,
                    expressions: Vec::new(),
                });
                stack.push(Frame::Template(found.len() - 1));
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < len && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 2;
            }
            b'/' if regex_allowed(prev) => {
                i += 1;
                let mut in_class = false;
                while i < len {
                    match bytes[i] {
                        b'\\' => {
                            i += 2;
                            continue;
                        }
                        b'[' => in_class = true,
                        b']' => in_class = false,
                        b'/' if !in_class => {
                            i += 1;
                            break;
                        }
                        b'\n' => break,
                        _ => {}
                    }
                    i += 1;
                }
                while i < len && is_word_byte(bytes[i]) {
                    i += 1;
                }
                prev = Prev::Operand;
            }
            b'{' => {
                if let Some(Frame::Interpolation { depth, .. }) = stack.last_mut() {
                    *depth += 1;
                }
                prev = Prev::Punct(c);
                i += 1;
            }
            b'}' => {
                match stack.last_mut() {
                    Some(Frame::Interpolation { template, depth: 0 }) => {
                        let template = *template;
                        if let Some(last) = found[template].expressions.last_mut() {
                            last.1 = i;
                        }
                        stack.pop();
                    }
                    Some(Frame::Interpolation { depth, .. }) => *depth -= 1,
                    _ => {}
                }
                prev = Prev::Punct(c);
                i += 1;
            }
            c if c.is_ascii_whitespace() => i += 1,
            c if is_word_byte(c) => {
                let start = i;
                while i < len && is_word_byte(bytes[i]) {
                    i += 1;
                }
                let word = &code[start..i];
                prev = if REGEX_PREFIX_KEYWORDS.contains(&word) {
                    Prev::Keyword
                } else {
                    Prev::Operand
                };
            }
            b')' | b']' | b'.' => {
                prev = Prev::Operand;
                i += 1;
            }
            _ => {
                prev = Prev::Punct(c);
                i += 1;
            }
        }
    }

    found
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAIRING
// ═══════════════════════════════════════════════════════════════════════════════

/// Pair sorted extraction records with the literals located in `code`.
/// Non-localizable records hold their slot but produce nothing.
pub fn relocate_templates(
    records: &[TemplateRecord],
    code: &str,
    module: &str,
) -> Vec<TemplateLiteral> {
    let located = locate_templates(code);
    if located.len() != records.len() {
        warn!(
            "{}: found {} template literal(s) in output but extracted {}; skipping localization",
            module,
            located.len(),
            records.len()
        );
        return Vec::new();
    }

    let mut templates = Vec::new();
    for (record, found) in records.iter().zip(located.iter()) {
        if !record.localizable {
            continue;
        }
        if record.expressions.len() != found.expressions.len() {
            warn!(
                "{}: interpolation count changed for template at {}; skipping it",
                module, record.start
            );
            continue;
        }

        let variable_map = if record.expressions.is_empty() {
            None
        } else {
            Some(
                record
                    .expressions
                    .iter()
                    .zip(found.expressions.iter())
                    .map(|(original, &(s, e))| (original.clone(), code[s..e].trim().to_string()))
                    .collect::<IndexMap<_, _>>(),
            )
        };

        templates.push(TemplateLiteral {
            module: module.to_string(),
            original: record.original.clone(),
            target: code[found.start..found.end].to_string(),
            start: found.start,
            end: found.end,
            variable_map,
        });
    }
    templates
}
