//! Lightweight lexical analysis of JavaScript modules.
//!
//! This is not a parser. It understands enough of the token structure
//! (comments, string and template literals, bracket nesting) to locate
//! top-level `import`/`export` statements and declarations reliably. All
//! masking functions preserve byte offsets, so positions found in a masked
//! copy are valid in the original text.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*import[ \t]*(?:(?P<clause>[\w$\s{},*]+?)\s*from\s*)?["'](?P<spec>[^"'\n]+)["'][ \t]*;?"#,
    )
    .expect("import pattern")
});

static REEXPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*export[ \t]*(?:(?P<star>\*)(?:\s*as\s+(?P<ns>[\w$]+))?|\{(?P<names>[^}]*)\})\s*from\s*["'](?P<spec>[^"'\n]+)["'][ \t]*;?"#,
    )
    .expect("re-export pattern")
});

static EXPORT_LIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*export[ \t]*\{(?P<names>[^}]*)\}[ \t]*;?"#).expect("export list pattern")
});

static EXPORT_DEFAULT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*(?P<kw>export\s+default\s+)(?:(?:async\s+)?function\s*\*?\s*(?P<fname>[\w$]+)|class\s+(?P<cname>[\w$]+))?"#,
    )
    .expect("default export pattern")
});

static EXPORT_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*(?P<kw>export\s+)(?P<decl>(?:async\s+)?function\s*\*?\s*|class\s+|const\s+|let\s+|var\s+)(?P<name>[\w$]+)"#,
    )
    .expect("export declaration pattern")
});

static DYNAMIC_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\bimport\(\s*["'](?P<spec>[^"'\n]+)["']\s*\)"#).expect("dynamic import pattern")
});

/// Blank out comments, keeping string literals intact.
pub fn mask_comments(source: &str) -> String {
    mask(source, false)
}

/// Blank out comments and the contents of string and template literals.
pub fn mask_comments_and_strings(source: &str) -> String {
    mask(source, true)
}

fn mask(source: &str, blank_strings: bool) -> String {
    let bytes = source.as_bytes();
    let mut out = bytes.to_vec();
    let mut i = 0;

    let blank = |out: &mut Vec<u8>, range: Range<usize>| {
        for b in &mut out[range] {
            if *b != b'\n' {
                *b = b' ';
            }
        }
    };

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                let end = memchr_from(bytes, b'\n', i).unwrap_or(bytes.len());
                blank(&mut out, i..end);
                i = end;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = find_from(bytes, b"*/", i + 2)
                    .map(|p| p + 2)
                    .unwrap_or(bytes.len());
                blank(&mut out, i..end);
                i = end;
            }
            quote @ (b'"' | b'\'' | b'`') => {
                let end = string_end(bytes, i, quote);
                if blank_strings && end > i + 1 {
                    let inner_end = if end <= bytes.len() && bytes.get(end - 1) == Some(&quote) {
                        end - 1
                    } else {
                        end
                    };
                    blank(&mut out, i + 1..inner_end);
                }
                i = end;
            }
            _ => i += 1,
        }
    }

    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Index one past the closing quote of the literal starting at `start`.
fn string_end(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' if quote != b'`' => return i,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn memchr_from(bytes: &[u8], needle: u8, from: usize) -> Option<usize> {
    memchr::memchr(needle, bytes.get(from..)?).map(|p| p + from)
}

fn find_from(bytes: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    memchr::memmem::find(bytes.get(from..)?, needle).map(|p| p + from)
}

/// Given the index of an opening bracket in fully masked text, return the
/// index of its matching closing bracket.
pub fn matching_bracket(masked: &str, open: usize) -> Option<usize> {
    let bytes = masked.as_bytes();
    let (open_ch, close_ch) = match bytes.get(open)? {
        b'(' => (b'(', b')'),
        b'[' => (b'[', b']'),
        b'{' => (b'{', b'}'),
        _ => return None,
    };
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if b == open_ch {
            depth += 1;
        } else if b == close_ch {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Curly-brace depth at `index` in fully masked text.
pub fn brace_depth(masked: &str, index: usize) -> usize {
    let mut depth: isize = 0;
    for &b in &masked.as_bytes()[..index.min(masked.len())] {
        match b {
            b'{' => depth += 1,
            b'}' => depth -= 1,
            _ => {}
        }
    }
    depth.max(0) as usize
}

/// Whether `name` occurs as a standalone identifier in `text`.
pub fn contains_identifier(text: &str, name: &str) -> bool {
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_' || b == b'$';
    let bytes = text.as_bytes();
    let mut from = 0;
    while let Some(pos) = text[from..].find(name) {
        let start = from + pos;
        let end = start + name.len();
        let before_ok = start == 0 || !is_ident(bytes[start - 1]);
        let after_ok = end >= bytes.len() || !is_ident(bytes[end]);
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}

/// A binding introduced by an import: `imported as local`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedBinding {
    pub imported: String,
    pub local: String,
}

/// A static `import` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStatement {
    pub range: Range<usize>,
    pub specifier: String,
    pub default: Option<String>,
    pub namespace: Option<String>,
    pub named: Vec<NamedBinding>,
    /// `import type ...`, erased from output.
    pub type_only: bool,
}

impl ImportStatement {
    /// `import "x"` with no bindings.
    pub fn is_side_effect(&self) -> bool {
        self.default.is_none() && self.namespace.is_none() && self.named.is_empty() && !self.type_only
    }

    /// Local names this statement binds.
    pub fn locals(&self) -> Vec<&str> {
        self.default
            .iter()
            .chain(self.namespace.iter())
            .map(String::as_str)
            .chain(self.named.iter().map(|b| b.local.as_str()))
            .collect()
    }

    /// Re-render the statement with a different specifier.
    pub fn render(&self, specifier: &str) -> String {
        let mut parts = Vec::new();
        if let Some(d) = &self.default {
            parts.push(d.clone());
        }
        if let Some(ns) = &self.namespace {
            parts.push(format!("* as {ns}"));
        }
        if !self.named.is_empty() {
            let names = self
                .named
                .iter()
                .map(|b| {
                    if b.imported == b.local {
                        b.imported.clone()
                    } else {
                        format!("{} as {}", b.imported, b.local)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("{{ {names} }}"));
        }
        if parts.is_empty() {
            format!("import \"{specifier}\";")
        } else {
            format!("import {} from \"{specifier}\";", parts.join(", "))
        }
    }

    /// Bind this statement's names from an object expression, as `const`s.
    pub fn as_const_bindings(&self, namespace_expr: &str) -> String {
        let mut lines = Vec::new();
        if let Some(d) = &self.default {
            lines.push(format!("const {d} = {namespace_expr}.default;"));
        }
        if let Some(ns) = &self.namespace {
            lines.push(format!("const {ns} = {namespace_expr};"));
        }
        if !self.named.is_empty() {
            let names = self
                .named
                .iter()
                .map(|b| {
                    if b.imported == b.local {
                        b.local.clone()
                    } else {
                        format!("{}: {}", b.imported, b.local)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("const {{ {names} }} = {namespace_expr};"));
        }
        lines.join(" ")
    }
}

/// What an `export ... from` statement re-exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReExportKind {
    /// `export * from "x"`
    All,
    /// `export * as ns from "x"`
    Namespace(String),
    /// `export { a, b as c } from "x"`; `imported` is the source name and
    /// `local` the exported name.
    Named(Vec<NamedBinding>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReExport {
    pub range: Range<usize>,
    pub specifier: String,
    pub kind: ReExportKind,
}

/// `export { a, b as c }` without a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportList {
    pub range: Range<usize>,
    /// `imported` is the local name, `local` the exported name.
    pub names: Vec<NamedBinding>,
}

/// `export default ...`, `export function f`, `export const x`, ...
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDecl {
    /// Range of the `export ` / `export default ` keyword prefix.
    pub keyword: Range<usize>,
    /// Declared name; `None` for an anonymous default export.
    pub name: Option<String>,
    pub is_default: bool,
}

/// Every module-level import/export statement in a source file.
#[derive(Debug, Clone, Default)]
pub struct ModuleSyntax {
    pub imports: Vec<ImportStatement>,
    pub re_exports: Vec<ReExport>,
    pub export_lists: Vec<ExportList>,
    pub export_decls: Vec<ExportDecl>,
}

impl ModuleSyntax {
    /// Scan `source` for import and export statements at brace depth zero.
    pub fn scan(source: &str) -> Self {
        let code = mask_comments(source);
        let masked = mask_comments_and_strings(source);
        let top_level = |idx: usize| brace_depth(&masked, idx) == 0;

        let mut syntax = ModuleSyntax::default();

        for caps in IMPORT_RE.captures_iter(&code) {
            let (Some(whole), Some(spec)) = (caps.get(0), caps.name("spec")) else {
                continue;
            };
            if !top_level(whole.start()) {
                continue;
            }
            let clause = caps.name("clause").map(|m| m.as_str().trim()).unwrap_or("");
            syntax
                .imports
                .push(parse_import_clause(clause, whole.range(), spec.as_str()));
        }

        for caps in REEXPORT_RE.captures_iter(&code) {
            let (Some(whole), Some(spec)) = (caps.get(0), caps.name("spec")) else {
                continue;
            };
            if !top_level(whole.start()) {
                continue;
            }
            let kind = if caps.name("star").is_some() {
                match caps.name("ns") {
                    Some(ns) => ReExportKind::Namespace(ns.as_str().to_string()),
                    None => ReExportKind::All,
                }
            } else {
                ReExportKind::Named(parse_bindings(
                    caps.name("names").map(|m| m.as_str()).unwrap_or(""),
                ))
            };
            syntax.re_exports.push(ReExport {
                range: whole.range(),
                specifier: spec.as_str().to_string(),
                kind,
            });
        }

        for caps in EXPORT_LIST_RE.captures_iter(&code) {
            let Some(whole) = caps.get(0) else { continue };
            let rest = code[whole.end()..].trim_start();
            if rest.starts_with("from") || !top_level(whole.start()) {
                continue;
            }
            if syntax.re_exports.iter().any(|r| r.range.start == whole.start()) {
                continue;
            }
            syntax.export_lists.push(ExportList {
                range: whole.range(),
                names: parse_bindings(caps.name("names").map(|m| m.as_str()).unwrap_or("")),
            });
        }

        for caps in EXPORT_DEFAULT_RE.captures_iter(&code) {
            let Some(kw) = caps.name("kw") else { continue };
            if !top_level(kw.start()) {
                continue;
            }
            let name = caps
                .name("fname")
                .or_else(|| caps.name("cname"))
                .map(|m| m.as_str().to_string());
            syntax.export_decls.push(ExportDecl {
                keyword: kw.range(),
                name,
                is_default: true,
            });
        }

        for caps in EXPORT_DECL_RE.captures_iter(&code) {
            let (Some(kw), Some(name)) = (caps.name("kw"), caps.name("name")) else {
                continue;
            };
            if !top_level(kw.start()) {
                continue;
            }
            syntax.export_decls.push(ExportDecl {
                keyword: kw.range(),
                name: Some(name.as_str().to_string()),
                is_default: false,
            });
        }

        syntax
    }

    /// Names this module exports by itself, not counting `export *`.
    pub fn own_export_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for decl in &self.export_decls {
            if decl.is_default {
                names.push("default".to_string());
            } else if let Some(name) = &decl.name {
                names.push(name.clone());
            }
        }
        for list in &self.export_lists {
            names.extend(list.names.iter().map(|b| b.local.clone()));
        }
        for re in &self.re_exports {
            match &re.kind {
                ReExportKind::Namespace(ns) => names.push(ns.clone()),
                ReExportKind::Named(bindings) => {
                    names.extend(bindings.iter().map(|b| b.local.clone()))
                }
                ReExportKind::All => {}
            }
        }
        let mut seen = std::collections::HashSet::new();
        names.retain(|n| seen.insert(n.clone()));
        names
    }
}

fn parse_import_clause(clause: &str, range: Range<usize>, spec: &str) -> ImportStatement {
    let mut stmt = ImportStatement {
        range,
        specifier: spec.to_string(),
        default: None,
        namespace: None,
        named: Vec::new(),
        type_only: false,
    };

    let mut rest = clause.trim();
    if let Some(after) = rest.strip_prefix("type") {
        if after.starts_with(|c: char| c.is_whitespace() || c == '{') {
            stmt.type_only = true;
            return stmt;
        }
    }

    while !rest.is_empty() {
        if let Some(body) = rest.strip_prefix('{') {
            let close = body.find('}').unwrap_or(body.len());
            stmt.named = parse_bindings(&body[..close]);
            rest = body.get(close + 1..).unwrap_or("").trim_start_matches([',', ' ', '\t', '\n', '\r']);
        } else if let Some(body) = rest.strip_prefix('*') {
            let body = body.trim_start();
            let body = body.strip_prefix("as").unwrap_or(body).trim_start();
            let end = body.find([',', ' ', '\n']).unwrap_or(body.len());
            stmt.namespace = Some(body[..end].to_string());
            rest = body[end..].trim_start_matches([',', ' ', '\t', '\n', '\r']);
        } else {
            let end = rest.find([',', ' ', '\n', '\t']).unwrap_or(rest.len());
            stmt.default = Some(rest[..end].to_string());
            rest = rest[end..].trim_start_matches([',', ' ', '\t', '\n', '\r']);
        }
    }
    stmt
}

/// Parse `a, b as c, type T` into bindings; type-only entries are dropped.
pub fn parse_bindings(list: &str) -> Vec<NamedBinding> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty() && !item.starts_with("type "))
        .map(|item| {
            let mut parts = item.split_whitespace();
            let imported = parts.next().unwrap_or("").to_string();
            let local = match (parts.next(), parts.next()) {
                (Some("as"), Some(alias)) => alias.to_string(),
                _ => imported.clone(),
            };
            NamedBinding { imported, local }
        })
        .collect()
}

/// Dynamic `import("x")` calls: specifier and the range of the string literal contents.
pub fn dynamic_imports(source: &str) -> Vec<(String, Range<usize>)> {
    let code = mask_comments(source);
    DYNAMIC_IMPORT_RE
        .captures_iter(&code)
        .filter_map(|caps| caps.name("spec").map(|m| (m.as_str().to_string(), m.range())))
        .collect()
}

/// Apply non-overlapping `(range, replacement)` edits.
pub fn apply_edits(source: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by_key(|(range, _)| range.start);
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for (range, replacement) in edits {
        if range.start < cursor {
            continue;
        }
        out.push_str(&source[cursor..range.start]);
        out.push_str(&replacement);
        cursor = range.end;
    }
    out.push_str(&source[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masking_preserves_offsets() {
        let src = "const a = \"// not a comment\"; // comment\n/* block */ let b = 'x';";
        let code = mask_comments(src);
        let masked = mask_comments_and_strings(src);
        assert_eq!(code.len(), src.len());
        assert_eq!(masked.len(), src.len());
        assert!(code.contains("\"// not a comment\""));
        assert!(!code.contains("comment\n"));
        assert!(!masked.contains("not a comment"));
        assert!(masked.contains("let b = ' ';"));
    }

    #[test]
    fn test_import_forms() {
        let src = r#"
import React from "react";
import { a, b as c } from './util';
import * as ns from "../ns.js";
import Def, { x } from '@/lib';
import "./side-effect.css";
import type { Props } from "./types";
// import Hidden from "./commented";
function f() {
  const s = `
import Fake from "./fake";
`;
}
"#;
        let syntax = ModuleSyntax::scan(src);
        let specs: Vec<_> = syntax.imports.iter().map(|i| i.specifier.as_str()).collect();
        assert_eq!(
            specs,
            vec!["react", "./util", "../ns.js", "@/lib", "./side-effect.css", "./types"]
        );
        assert_eq!(syntax.imports[0].default.as_deref(), Some("React"));
        assert_eq!(
            syntax.imports[1].named,
            vec![
                NamedBinding { imported: "a".into(), local: "a".into() },
                NamedBinding { imported: "b".into(), local: "c".into() },
            ]
        );
        assert_eq!(syntax.imports[2].namespace.as_deref(), Some("ns"));
        assert_eq!(syntax.imports[3].default.as_deref(), Some("Def"));
        assert_eq!(syntax.imports[3].named.len(), 1);
        assert!(syntax.imports[4].is_side_effect());
        assert!(syntax.imports[5].type_only);
    }

    #[test]
    fn test_export_forms() {
        let src = r#"
export default function Page(props) { return null; }
export const title = "x";
export async function load() {}
export { helper as util, other };
export * from "./all";
export * as space from "./space";
export { a as b } from "./named";
"#;
        let syntax = ModuleSyntax::scan(src);
        assert_eq!(syntax.re_exports.len(), 3);
        assert_eq!(syntax.export_lists.len(), 1);
        let names = syntax.own_export_names();
        assert!(names.contains(&"default".to_string()));
        assert!(names.contains(&"title".to_string()));
        assert!(names.contains(&"load".to_string()));
        assert!(names.contains(&"util".to_string()));
        assert!(names.contains(&"space".to_string()));
        assert!(names.contains(&"b".to_string()));
    }

    #[test]
    fn test_nested_import_text_is_ignored() {
        let src = "function f() {\nimport x from './x';\n}\n";
        assert!(ModuleSyntax::scan(src).imports.is_empty());
    }

    #[test]
    fn test_matching_bracket_skips_strings() {
        let src = "f({ a: '}' }) + 1";
        let masked = mask_comments_and_strings(src);
        assert_eq!(matching_bracket(&masked, 1), Some(12));
    }

    #[test]
    fn test_contains_identifier() {
        assert!(contains_identifier("x = useState(0)", "useState"));
        assert!(!contains_identifier("x = useStateful(0)", "useState"));
        assert!(!contains_identifier("$useState", "useState"));
    }

    #[test]
    fn test_apply_edits() {
        let out = apply_edits("abcdef", vec![(4..5, "E".into()), (0..1, "A".into())]);
        assert_eq!(out, "AbcdEf");
    }
}
