//! Source-level transforms applied before and instead of bundling.

use crate::error::Result;
use crate::syntax::{
    ModuleSyntax, apply_edits, brace_depth, contains_identifier, dynamic_imports,
    mask_comments_and_strings, matching_bracket,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;

/// Exports that only run on the server and never reach the browser.
pub const SERVER_ONLY_EXPORTS: &[&str] = &["load", "metadata"];

/// Hook for source-to-source compilation (TypeScript, JSX, ...).
///
/// Runs on every module before import analysis. The default does nothing,
/// so sources must already be browser-compatible JavaScript unless a real
/// transpiler is plugged in here.
pub trait SourceTransform: Send + Sync {
    fn transform(&self, path: &Path, source: String) -> Result<String>;
}

/// Passes sources through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTransform;

impl SourceTransform for IdentityTransform {
    fn transform(&self, _path: &Path, source: String) -> Result<String> {
        Ok(source)
    }
}

impl<F> SourceTransform for F
where
    F: Fn(&Path, String) -> Result<String> + Send + Sync,
{
    fn transform(&self, path: &Path, source: String) -> Result<String> {
        self(path, source)
    }
}

static FUNCTION_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*(?:export\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>[\w$]+)\s*\("#)
        .expect("function declaration pattern")
});

static VAR_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*(?:export\s+)?(?:const|let|var)\s+(?P<name>[\w$]+)\s*(?::[^=\n]+)?="#)
        .expect("variable declaration pattern")
});

/// Remove server-only exports (`load`, `metadata`) and their declarations.
pub fn strip_server_exports(source: &str) -> String {
    strip_exports(source, SERVER_ONLY_EXPORTS)
}

/// Remove the named exports together with their top-level declarations.
pub fn strip_exports(source: &str, names: &[&str]) -> String {
    let syntax = ModuleSyntax::scan(source);
    let masked = mask_comments_and_strings(source);
    let strip: HashSet<&str> = names.iter().copied().collect();
    let mut edits: Vec<(Range<usize>, String)> = Vec::new();

    // Local names backing a stripped export.
    let mut doomed: HashSet<String> = HashSet::new();
    for decl in &syntax.export_decls {
        if let (false, Some(name)) = (decl.is_default, &decl.name) {
            if strip.contains(name.as_str()) {
                doomed.insert(name.clone());
            }
        }
    }

    for list in &syntax.export_lists {
        let (removed, kept): (Vec<_>, Vec<_>) = list
            .names
            .iter()
            .partition(|b| strip.contains(b.local.as_str()));
        if removed.is_empty() {
            continue;
        }
        doomed.extend(removed.iter().map(|b| b.imported.clone()));
        let replacement = if kept.is_empty() {
            String::new()
        } else {
            let names = kept
                .iter()
                .map(|b| {
                    if b.imported == b.local {
                        b.local.clone()
                    } else {
                        format!("{} as {}", b.imported, b.local)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("export {{ {names} }};")
        };
        edits.push((list.range.clone(), replacement));
    }

    for caps in FUNCTION_DECL_RE.captures_iter(&masked) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.name("name")) else {
            continue;
        };
        if !doomed.contains(name.as_str()) || brace_depth(&masked, whole.start()) != 0 {
            continue;
        }
        let paren = whole.end() - 1;
        let Some(close_paren) = matching_bracket(&masked, paren) else {
            continue;
        };
        let Some(body_open) = masked[close_paren..].find('{').map(|p| p + close_paren) else {
            continue;
        };
        let Some(body_close) = matching_bracket(&masked, body_open) else {
            continue;
        };
        edits.push((whole.start()..line_end(&masked, body_close + 1), String::new()));
    }

    for caps in VAR_DECL_RE.captures_iter(&masked) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.name("name")) else {
            continue;
        };
        if !doomed.contains(name.as_str()) || brace_depth(&masked, whole.start()) != 0 {
            continue;
        }
        let end = statement_end(&masked, whole.end());
        edits.push((whole.start()..line_end(&masked, end), String::new()));
    }

    apply_edits(source, edits)
}

/// Swallow the rest of the line (including `;` and the newline) when only
/// whitespace or a semicolon follows.
fn line_end(masked: &str, from: usize) -> usize {
    let bytes = masked.as_bytes();
    let mut i = from;
    while i < bytes.len() && matches!(bytes[i], b' ' | b'\t' | b';' | b'\r') {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'\n' {
        i + 1
    } else {
        from
    }
}

/// End of an expression statement starting at `from`: the first `;` at
/// bracket depth zero, or a newline at depth zero not followed by a
/// continuation.
fn statement_end(masked: &str, from: usize) -> usize {
    let bytes = masked.as_bytes();
    let mut depth: isize = 0;
    let mut seen_code = false;
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b';' if depth <= 0 => return i + 1,
            b'\n' if depth <= 0 && seen_code => {
                let next = masked[i + 1..].trim_start();
                let continues = next.starts_with(['.', '?', ':', '+', '-', '*', '/', '&', '|', ','])
                    || masked[from..i].trim_end().ends_with(['=', '(', ',', '+', '-', '?', ':', '&', '|']);
                if !continues {
                    return i;
                }
            }
            b if !b.is_ascii_whitespace() => seen_code = true,
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// Drop import bindings that are no longer referenced, and whole import
/// statements left without bindings. Side-effect imports are kept.
pub fn prune_unused_imports(source: &str) -> String {
    let syntax = ModuleSyntax::scan(source);
    let masked = mask_comments_and_strings(source);
    let mut edits = Vec::new();

    for import in &syntax.imports {
        if import.is_side_effect() {
            continue;
        }
        if import.type_only {
            edits.push((import.range.clone(), String::new()));
            continue;
        }

        // Search everywhere except the statement itself.
        let mut rest = String::with_capacity(masked.len());
        rest.push_str(&masked[..import.range.start]);
        rest.push_str(&masked[import.range.end..]);
        let used = |name: &str| contains_identifier(&rest, name);

        let mut pruned = import.clone();
        pruned.default = pruned.default.filter(|d| used(d));
        pruned.namespace = pruned.namespace.filter(|n| used(n));
        pruned.named.retain(|b| used(&b.local));

        if pruned.locals().len() == import.locals().len() {
            continue;
        }
        let replacement = if pruned.locals().is_empty() {
            String::new()
        } else {
            pruned.render(&import.specifier)
        };
        edits.push((import.range.clone(), replacement));
    }

    apply_edits(source, edits)
}

/// Rewrite every static, re-export and dynamic import specifier through `map`.
/// Specifiers for which `map` returns `None` are left alone.
pub fn rewrite_specifiers<F>(source: &str, mut map: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let syntax = ModuleSyntax::scan(source);
    let mut edits = Vec::new();

    for import in &syntax.imports {
        if import.type_only {
            edits.push((import.range.clone(), String::new()));
        } else if let Some(spec) = map(&import.specifier) {
            edits.push((import.range.clone(), import.render(&spec)));
        }
    }
    for re in &syntax.re_exports {
        if let Some(spec) = map(&re.specifier) {
            let text = &source[re.range.clone()];
            edits.push((re.range.clone(), replace_quoted(text, &re.specifier, &spec)));
        }
    }
    for (spec, range) in dynamic_imports(source) {
        if let Some(new_spec) = map(&spec) {
            edits.push((range, new_spec));
        }
    }

    apply_edits(source, edits)
}

pub(crate) fn replace_quoted(text: &str, old: &str, new: &str) -> String {
    for quote in ['"', '\''] {
        let needle = format!("{quote}{old}{quote}");
        if text.contains(&needle) {
            return text.replacen(&needle, &format!("\"{new}\""), 1);
        }
    }
    text.to_string()
}
