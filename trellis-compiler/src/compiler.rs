//! Module compiler: bundling with graceful fallback and an mtime-keyed cache.

use crate::bundler::{Bundler, ResolvedImport, module_url_for, resolve_import};
use crate::cache::{CacheStats, CompiledModuleEntry, ModuleCache};
use crate::config::{CompilerConfig, RESOLVE_EXTENSIONS};
use crate::error::{CompileError, Result};
use crate::import_map::is_local_specifier;
use crate::transform::{
    IdentityTransform, SourceTransform, prune_unused_imports, rewrite_specifiers,
    strip_server_exports,
};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// How a module ended up being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CompileStrategy {
    /// Fully bundled; the only result that is cached.
    Bundled,
    /// Bundling failed; aliases resolved and local imports pointed at
    /// their own module URLs.
    AliasesOnly,
    /// Every transform failed; the raw source is served.
    Raw,
}

/// Result of one compilation.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub code: String,
    pub strategy: CompileStrategy,
}

/// Compiles page modules for the browser.
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct ModuleCompiler {
    config: Arc<CompilerConfig>,
    root: PathBuf,
    cache: Arc<ModuleCache>,
    transform: Arc<dyn SourceTransform>,
}

impl std::fmt::Debug for ModuleCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCompiler")
            .field("root", &self.root)
            .field("cache", &self.cache.stats())
            .finish()
    }
}

impl ModuleCompiler {
    /// Create a compiler. Fails if the root directory does not exist.
    pub fn new(config: CompilerConfig) -> Result<Self> {
        let root = config
            .root_dir
            .canonicalize()
            .map_err(|_| CompileError::NotFound {
                path: config.root_dir.clone(),
            })?;
        Ok(Self {
            cache: Arc::new(ModuleCache::new(config.cache_capacity)),
            config: Arc::new(config),
            root,
            transform: Arc::new(IdentityTransform),
        })
    }

    /// Plug in a source transform (TypeScript/JSX compiler).
    pub fn with_transform(mut self, transform: impl SourceTransform + 'static) -> Self {
        self.transform = Arc::new(transform);
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Canonical project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    /// Resolve a source path (absolute, or relative to the root) to its
    /// canonical form, refusing anything outside the root, anything under a
    /// dot-prefixed file or directory, and anything that is not a script.
    pub fn resolve_source(&self, source_path: &Path) -> Result<PathBuf> {
        let joined = if source_path.is_absolute() {
            source_path.to_path_buf()
        } else {
            self.root.join(source_path)
        };
        let canonical = joined.canonicalize().map_err(|_| CompileError::NotFound {
            path: source_path.to_path_buf(),
        })?;
        if !canonical.starts_with(&self.root) {
            return Err(CompileError::Forbidden {
                path: source_path.to_path_buf(),
            });
        }
        if !canonical.is_file() {
            return Err(CompileError::NotFound {
                path: source_path.to_path_buf(),
            });
        }
        if !is_servable_source(&self.root, &canonical) {
            return Err(CompileError::NotServable {
                path: source_path.to_path_buf(),
            });
        }
        Ok(canonical)
    }

    /// Browser-ready code for a source file.
    ///
    /// Served from cache when the file's mtime is unchanged, unless
    /// `bypass_cache` is set. Compilation runs on the blocking pool.
    #[instrument(skip(self), fields(path = %source_path.display()))]
    pub async fn get_compiled_module(&self, source_path: &Path, bypass_cache: bool) -> Result<Arc<str>> {
        let path = self.resolve_source(source_path)?;
        let mtime = tokio::fs::metadata(&path).await?.modified()?;

        if !bypass_cache {
            if let Some(code) = self.cache.get(&path, mtime) {
                debug!("Module cache hit");
                return Ok(code);
            }
        }
        debug!(bypass_cache, "Compiling module");

        let this = self.clone();
        let key = path.clone();
        let output = tokio::task::spawn_blocking(move || this.compile(&key))
            .await
            .map_err(|e| CompileError::Task(e.to_string()))??;

        let code: Arc<str> = Arc::from(output.code);
        if output.strategy == CompileStrategy::Bundled {
            self.cache.insert(CompiledModuleEntry {
                key: path,
                mtime,
                code: Arc::clone(&code),
            });
        }
        Ok(code)
    }

    /// Compile synchronously, falling back from a full bundle to alias-only
    /// rewriting to the raw source. Only a failure to read the file at all
    /// is an error.
    pub fn compile(&self, path: &Path) -> Result<CompileOutput> {
        let bundled = Bundler::new(&self.root, &self.config, self.transform.as_ref()).bundle(path);
        let err = match bundled {
            Ok(code) => {
                return Ok(CompileOutput {
                    code,
                    strategy: CompileStrategy::Bundled,
                });
            }
            Err(err) => err,
        };
        warn!(path = %path.display(), error = %err, "Bundling failed, resolving aliases only");

        match self.compile_aliases_only(path) {
            Ok(code) => Ok(CompileOutput {
                code,
                strategy: CompileStrategy::AliasesOnly,
            }),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Alias resolution failed, serving raw source");
                let bytes = std::fs::read(path)?;
                Ok(CompileOutput {
                    code: String::from_utf8_lossy(&bytes).into_owned(),
                    strategy: CompileStrategy::Raw,
                })
            }
        }
    }

    fn compile_aliases_only(&self, path: &Path) -> Result<String> {
        let source = std::fs::read_to_string(path)?;
        let source = self.transform.transform(path, source)?;
        let source = prune_unused_imports(&strip_server_exports(&source));

        Ok(rewrite_specifiers(&source, |spec| {
            let aliased = self.config.aliases.resolve(spec);
            let target = aliased.as_deref().unwrap_or(spec);
            if is_local_specifier(target) {
                if let Ok(ResolvedImport::Local(file)) =
                    resolve_import(&self.root, &self.config, path, spec)
                {
                    return Some(module_url_for(&self.root, &file));
                }
            }
            aliased
        }))
    }

    /// Drop the cached build of one file. Returns whether one existed.
    pub fn invalidate(&self, source_path: &Path) -> bool {
        match self.resolve_source(source_path) {
            Ok(path) => self.cache.invalidate(&path),
            Err(_) => false,
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

fn is_servable_source(root: &Path, path: &Path) -> bool {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let hidden = rel.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    });
    let script = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| RESOLVE_EXTENSIONS.contains(&e));
    !hidden && script
}
