//! Single-file bundling of a page module and its local imports.
//!
//! Local dependencies are inlined as immediately-invoked scopes that return
//! their exports, in dependency order. Bare imports declared external stay
//! as ES imports for the browser to resolve. The entry keeps its own ES
//! exports minus the server-only ones.

use crate::config::{CompilerConfig, RESOLVE_EXTENSIONS};
use crate::error::{CompileError, Result};
use crate::import_map::{is_local_specifier, is_url_specifier};
use crate::syntax::{ModuleSyntax, ReExportKind, apply_edits, dynamic_imports};
use crate::transform::{SourceTransform, prune_unused_imports, replace_quoted, strip_server_exports};
use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::debug;
use trellis_core::module_url;

/// Where an import specifier points after alias resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedImport {
    /// A file below the project root (canonical path).
    Local(PathBuf),
    /// A package or URL left for the browser.
    External(String),
}

/// Resolve `specifier` as imported from `importer`.
///
/// Aliases apply first. Aliased local targets are relative to the project
/// root; plain relative specifiers are relative to the importing file.
pub fn resolve_import(
    root: &Path,
    config: &CompilerConfig,
    importer: &Path,
    specifier: &str,
) -> Result<ResolvedImport> {
    let (target, aliased) = match config.aliases.resolve(specifier) {
        Some(target) => (target, true),
        None => (specifier.to_string(), false),
    };

    if is_url_specifier(&target) {
        return Ok(ResolvedImport::External(target));
    }

    if is_local_specifier(&target) {
        let base = if let Some(abs) = target.strip_prefix('/') {
            root.join(abs)
        } else if aliased {
            root.join(&target)
        } else {
            importer.parent().unwrap_or(root).join(&target)
        };
        let file = resolve_file(&base).ok_or_else(|| CompileError::NotFound { path: base.clone() })?;
        let canonical = file.canonicalize()?;
        if !canonical.starts_with(root) {
            return Err(CompileError::Forbidden { path: canonical });
        }
        return Ok(ResolvedImport::Local(canonical));
    }

    if config.is_external(&target) {
        return Ok(ResolvedImport::External(target));
    }

    Err(CompileError::UnresolvedImport {
        specifier: specifier.to_string(),
        importer: importer.to_path_buf(),
    })
}

/// Find the file an extension-less or directory import refers to.
pub fn resolve_file(base: &Path) -> Option<PathBuf> {
    if base.is_file() {
        return Some(base.to_path_buf());
    }
    for ext in RESOLVE_EXTENSIONS {
        let mut name = base.as_os_str().to_owned();
        name.push(".");
        name.push(ext);
        let candidate = PathBuf::from(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    if base.is_dir() {
        for ext in RESOLVE_EXTENSIONS {
            let candidate = base.join(format!("index.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Browser URL for a file below `root`.
pub fn module_url_for(root: &Path, path: &Path) -> String {
    module_url(path.strip_prefix(root).unwrap_or(path))
}

fn is_script(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| RESOLVE_EXTENSIONS.contains(&e))
}

/// Output of rewriting one module.
struct Rewritten {
    code: String,
    /// `(export name, expression)` pairs for the module's export object.
    exports: Vec<(String, String)>,
    /// External namespaces spread into the export object (`export * from "pkg"`).
    spreads: Vec<String>,
}

/// Bundles one entry module. Not reusable across entries.
pub struct Bundler<'a> {
    root: &'a Path,
    config: &'a CompilerConfig,
    transform: &'a dyn SourceTransform,
    blocks: Vec<String>,
    ids: HashMap<PathBuf, usize>,
    export_names: Vec<Vec<String>>,
    externals: Vec<(String, String)>,
    stack: Vec<PathBuf>,
}

impl<'a> Bundler<'a> {
    /// `root` must already be canonical.
    pub fn new(root: &'a Path, config: &'a CompilerConfig, transform: &'a dyn SourceTransform) -> Self {
        Self {
            root,
            config,
            transform,
            blocks: Vec::new(),
            ids: HashMap::new(),
            export_names: Vec::new(),
            externals: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// Bundle `entry` (canonical path) into a single ES module.
    pub fn bundle(mut self, entry: &Path) -> Result<String> {
        let source = self.read(entry)?;
        let source = prune_unused_imports(&strip_server_exports(&source));

        self.stack.push(entry.to_path_buf());
        let rewritten = self.rewrite(entry, &source, true)?;
        self.stack.pop();

        debug!(
            entry = %entry.display(),
            inlined = self.blocks.len(),
            externals = self.externals.len(),
            "Bundled module"
        );

        let mut out = String::new();
        for (spec, var) in &self.externals {
            out.push_str(&format!("import * as {var} from \"{spec}\";\n"));
        }
        for block in &self.blocks {
            out.push_str(block);
        }
        out.push_str(&rewritten.code);
        Ok(out)
    }

    fn read(&self, path: &Path) -> Result<String> {
        let source = std::fs::read_to_string(path)?;
        self.transform.transform(path, source)
    }

    fn external_var(&mut self, spec: &str) -> String {
        if let Some((_, var)) = self.externals.iter().find(|(s, _)| s == spec) {
            return var.clone();
        }
        let var = format!("__trellis_ext{}", self.externals.len());
        self.externals.push((spec.to_string(), var.clone()));
        var
    }

    /// Inline a local module, returning its id.
    fn visit(&mut self, path: &Path) -> Result<usize> {
        if let Some(&id) = self.ids.get(path) {
            return Ok(id);
        }
        if let Some(pos) = self.stack.iter().position(|p| p == path) {
            let mut chain = self.stack[pos..].to_vec();
            chain.push(path.to_path_buf());
            return Err(CompileError::CircularImport { chain });
        }

        let (body, exports, spreads) = if is_script(path) {
            self.stack.push(path.to_path_buf());
            let source = self.read(path)?;
            let rewritten = self.rewrite(path, &source, false)?;
            self.stack.pop();
            (rewritten.code, rewritten.exports, rewritten.spreads)
        } else {
            (String::new(), self.asset_exports(path)?, Vec::new())
        };

        let id = self.blocks.len();
        let members = spreads
            .iter()
            .map(|s| format!("...{s}"))
            .chain(exports.iter().map(|(name, expr)| {
                if name == expr {
                    name.clone()
                } else {
                    format!("{name}: {expr}")
                }
            }))
            .collect::<Vec<_>>()
            .join(", ");
        self.blocks.push(format!(
            "const __trellis_m{id} = (() => {{\n{body}\nreturn {{ {members} }};\n}})();\n"
        ));
        self.export_names
            .push(exports.into_iter().map(|(name, _)| name).collect());
        self.ids.insert(path.to_path_buf(), id);
        Ok(id)
    }

    /// JSON files export their parsed value; other assets export their URL.
    fn asset_exports(&self, path: &Path) -> Result<Vec<(String, String)>> {
        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let value = if is_json {
            let text = std::fs::read_to_string(path)?;
            let parsed: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| CompileError::transform(path, e.to_string()))?;
            parsed.to_string()
        } else {
            let rel = path.strip_prefix(self.root).unwrap_or(path);
            serde_json::Value::String(format!("/{}", trellis_core::modules::to_slash_path(rel))).to_string()
        };
        Ok(vec![("default".to_string(), value)])
    }

    fn target_var(&mut self, importer: &Path, spec: &str) -> Result<(String, Option<usize>)> {
        match resolve_import(self.root, self.config, importer, spec)? {
            ResolvedImport::Local(path) => {
                let id = self.visit(&path)?;
                Ok((format!("__trellis_m{id}"), Some(id)))
            }
            ResolvedImport::External(target) => Ok((self.external_var(&target), None)),
        }
    }

    fn rewrite(&mut self, path: &Path, source: &str, is_entry: bool) -> Result<Rewritten> {
        let syntax = ModuleSyntax::scan(source);
        let mut edits: Vec<(Range<usize>, String)> = Vec::new();
        let mut exports: Vec<(String, String)> = Vec::new();
        let mut spreads = Vec::new();

        for import in &syntax.imports {
            if import.type_only {
                edits.push((import.range.clone(), String::new()));
                continue;
            }
            let (var, _) = self.target_var(path, &import.specifier)?;
            edits.push((import.range.clone(), import.as_const_bindings(&var)));
        }

        for re in &syntax.re_exports {
            let (var, local_id) = self.target_var(path, &re.specifier)?;
            let names = local_id
                .map(|id| self.export_names[id].clone())
                .unwrap_or_default();
            let star_names: Vec<&String> = names.iter().filter(|n| *n != "default").collect();

            if is_entry {
                let replacement = match (&re.kind, local_id) {
                    (ReExportKind::All, None) => {
                        let text = &source[re.range.clone()];
                        let spec = self
                            .externals
                            .iter()
                            .find(|(_, v)| *v == var)
                            .map(|(s, _)| s.clone())
                            .unwrap_or_else(|| re.specifier.clone());
                        replace_quoted(text, &re.specifier, &spec)
                    }
                    (ReExportKind::All, Some(_)) if star_names.is_empty() => String::new(),
                    (ReExportKind::All, Some(_)) => {
                        let list = star_names
                            .iter()
                            .map(|n| n.as_str())
                            .collect::<Vec<_>>()
                            .join(", ");
                        format!("export const {{ {list} }} = {var};")
                    }
                    (ReExportKind::Namespace(ns), _) => format!("export const {ns} = {var};"),
                    (ReExportKind::Named(bindings), _) => bindings
                        .iter()
                        .map(|b| {
                            if b.local == "default" {
                                format!("export default {var}.{};", b.imported)
                            } else {
                                format!("export const {} = {var}.{};", b.local, b.imported)
                            }
                        })
                        .collect::<Vec<_>>()
                        .join("\n"),
                };
                edits.push((re.range.clone(), replacement));
            } else {
                edits.push((re.range.clone(), String::new()));
                match &re.kind {
                    ReExportKind::All if local_id.is_none() => spreads.push(var),
                    ReExportKind::All => {
                        exports.extend(star_names.iter().map(|n| ((*n).clone(), format!("{var}.{n}"))));
                    }
                    ReExportKind::Namespace(ns) => exports.push((ns.clone(), var)),
                    ReExportKind::Named(bindings) => exports.extend(
                        bindings
                            .iter()
                            .map(|b| (b.local.clone(), format!("{var}.{}", b.imported))),
                    ),
                }
            }
        }

        if !is_entry {
            for decl in &syntax.export_decls {
                match (&decl.name, decl.is_default) {
                    (Some(name), true) => {
                        edits.push((decl.keyword.clone(), String::new()));
                        exports.push(("default".to_string(), name.clone()));
                    }
                    (None, true) => {
                        edits.push((decl.keyword.clone(), "const __trellis_default = ".to_string()));
                        exports.push(("default".to_string(), "__trellis_default".to_string()));
                    }
                    (Some(name), false) => {
                        edits.push((decl.keyword.clone(), String::new()));
                        exports.push((name.clone(), name.clone()));
                    }
                    (None, false) => {}
                }
            }
            for list in &syntax.export_lists {
                edits.push((list.range.clone(), String::new()));
                exports.extend(
                    list.names
                        .iter()
                        .map(|b| (b.local.clone(), b.imported.clone())),
                );
            }
        }

        for (spec, range) in dynamic_imports(source) {
            if let Ok(ResolvedImport::Local(target)) = resolve_import(self.root, self.config, path, &spec) {
                edits.push((range, module_url_for(self.root, &target)));
            }
        }

        let mut seen = std::collections::HashSet::new();
        exports.retain(|(name, _)| seen.insert(name.clone()));

        Ok(Rewritten {
            code: apply_edits(source, edits),
            exports,
            spreads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::IdentityTransform;
    use std::fs;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, body) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        dir
    }

    fn bundle(dir: &TempDir, entry: &str, config: &CompilerConfig) -> Result<String> {
        let root = dir.path().canonicalize().unwrap();
        let entry = root.join(entry);
        Bundler::new(&root, config, &IdentityTransform).bundle(&entry)
    }

    #[test]
    fn test_inlines_local_dependencies_in_order() {
        let dir = project(&[
            ("pages/index.js", "import { greet } from '../lib/greet';\nexport default function Page() { return greet('x'); }\n"),
            ("lib/greet.js", "import { upper } from './util';\nexport function greet(n) { return upper(n); }\n"),
            ("lib/util.js", "export const upper = (s) => s.toUpperCase();\n"),
        ]);
        let config = CompilerConfig::new(dir.path());
        let out = bundle(&dir, "pages/index.js", &config).unwrap();

        let util = out.find("const __trellis_m0").unwrap();
        let greet = out.find("const __trellis_m1").unwrap();
        assert!(util < greet);
        assert!(out.contains("return { upper };"));
        assert!(out.contains("const { greet } = __trellis_m1;"));
        assert!(out.contains("export default function Page()"));
        assert!(!out.contains("from '../lib/greet'"));
    }

    #[test]
    fn test_externals_are_hoisted() {
        let dir = project(&[
            ("pages/a.js", "import { h } from 'preact';\nimport { fmt } from './fmt';\nexport default () => h('p', null, fmt(1));\n"),
            ("pages/fmt.js", "import { useMemo } from 'preact/hooks';\nexport function fmt(n) { return String(n); }\n"),
        ]);
        let config = CompilerConfig::new(dir.path()).with_external("preact");
        let out = bundle(&dir, "pages/a.js", &config).unwrap();

        assert!(out.starts_with("import * as __trellis_ext0 from \"preact\";\nimport * as __trellis_ext1 from \"preact/hooks\";\n"));
        assert!(out.contains("const { h } = __trellis_ext0;"));
        assert!(out.contains("const { useMemo } = __trellis_ext1;"));
    }

    #[test]
    fn test_unresolved_bare_import() {
        let dir = project(&[("pages/a.js", "import _ from 'lodash';\nexport default _;\n")]);
        let config = CompilerConfig::new(dir.path());
        let err = bundle(&dir, "pages/a.js", &config).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedImport { ref specifier, .. } if specifier == "lodash"));
    }

    #[test]
    fn test_cycle_detected() {
        let dir = project(&[
            ("pages/a.js", "import { b } from './b';\nexport default b;\n"),
            ("pages/b.js", "import { c } from './c';\nexport const b = c;\n"),
            ("pages/c.js", "import { b } from './b';\nexport const c = 1;\n"),
        ]);
        let config = CompilerConfig::new(dir.path());
        let err = bundle(&dir, "pages/a.js", &config).unwrap_err();
        match err {
            CompileError::CircularImport { chain } => {
                assert_eq!(chain.len(), 3);
                assert!(chain[0].ends_with("b.js"));
                assert!(chain[2].ends_with("b.js"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_alias_and_index_resolution() {
        let dir = project(&[
            ("pages/a.js", "import ui from '@/components';\nexport default ui;\n"),
            ("src/components/index.ts", "export default function Button() {}\n"),
        ]);
        let config = CompilerConfig::new(dir.path()).with_alias("@/", "./src/");
        let out = bundle(&dir, "pages/a.js", &config).unwrap();
        assert!(out.contains("function Button() {}"));
        assert!(out.contains("return { default: Button };"));
        assert!(out.contains("const ui = __trellis_m0.default;"));
    }

    #[test]
    fn test_entry_reexports_and_server_exports() {
        let dir = project(&[
            ("pages/a.js", "export * from './shared';\nexport { x as y } from './shared';\nexport async function load() { return {}; }\nexport default function P() {}\n"),
            ("pages/shared.js", "export const x = 1;\nexport const z = 2;\n"),
        ]);
        let config = CompilerConfig::new(dir.path());
        let out = bundle(&dir, "pages/a.js", &config).unwrap();
        assert!(out.contains("export const { x, z } = __trellis_m0;"));
        assert!(out.contains("export const y = __trellis_m0.x;"));
        assert!(!out.contains("load"));
    }

    #[test]
    fn test_json_and_asset_imports() {
        let dir = project(&[
            ("pages/a.js", "import data from './data.json';\nimport logo from './logo.svg';\nexport default () => [data, logo];\n"),
            ("pages/data.json", "{\"a\": 1}"),
            ("pages/logo.svg", "<svg/>"),
        ]);
        let config = CompilerConfig::new(dir.path());
        let out = bundle(&dir, "pages/a.js", &config).unwrap();
        assert!(out.contains("return { default: {\"a\":1} };"));
        assert!(out.contains("return { default: \"/pages/logo.svg\" };"));
    }

    #[test]
    fn test_escape_is_forbidden() {
        let outer = project(&[
            ("outside.js", "export const s = 1;\n"),
            ("app/pages/a.js", "import { s } from '../../outside.js';\nexport default s;\n"),
        ]);
        let root = outer.path().join("app").canonicalize().unwrap();
        let config = CompilerConfig::new(&root);
        let err = Bundler::new(&root, &config, &IdentityTransform)
            .bundle(&root.join("pages/a.js"))
            .unwrap_err();
        assert!(matches!(err, CompileError::Forbidden { .. }));
    }
}
