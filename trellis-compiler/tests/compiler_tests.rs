use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use trellis_compiler::{CompileError, CompilerConfig, ModuleCompiler};

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn bump_mtime(root: &Path, rel: &str) {
    let file = File::options().write(true).open(root.join(rel)).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(5))
        .unwrap();
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(
        root,
        "pages/index.tsx",
        r#"import { h } from "preact";
import { db } from "@/server/db";
import { title } from "@/lib/title";

export const metadata = { title: "Home" };

export async function load() {
  return { rows: await db.all() };
}

export default function Home({ rows }) {
  return h("h1", null, title(rows.length));
}
"#,
    );
    write(root, "src/server/db.ts", "export const db = { all: async () => [] };\n");
    write(root, "src/lib/title.ts", "export function title(n) { return `${n} rows`; }\n");
    dir
}

fn compiler(dir: &TempDir) -> ModuleCompiler {
    let config = CompilerConfig::new(dir.path())
        .with_alias("@/", "./src/")
        .with_external("preact");
    ModuleCompiler::new(config).unwrap()
}

#[tokio::test]
async fn test_bundles_page_module() {
    let dir = project();
    let compiler = compiler(&dir);

    let code = compiler
        .get_compiled_module(Path::new("pages/index.tsx"), false)
        .await
        .unwrap();

    assert!(code.starts_with("import * as __trellis_ext0 from \"preact\";"));
    assert!(code.contains("function title(n)"));
    assert!(code.contains("export default function Home"));
    assert!(!code.contains("metadata"));
    assert!(!code.contains("load"));
    assert!(!code.contains("db.all"));
}

#[tokio::test]
async fn test_cache_hit_until_mtime_changes() {
    let dir = project();
    let compiler = compiler(&dir);
    let page = Path::new("pages/index.tsx");

    let first = compiler.get_compiled_module(page, false).await.unwrap();
    let second = compiler.get_compiled_module(page, false).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(compiler.stats().hits, 1);

    write(dir.path(), "pages/index.tsx", "export default function Home() { return 'v2'; }\n");
    bump_mtime(dir.path(), "pages/index.tsx");

    let third = compiler.get_compiled_module(page, false).await.unwrap();
    assert!(third.contains("'v2'"));
    assert_eq!(compiler.stats().entries, 1);
}

#[tokio::test]
async fn test_bypass_recompiles() {
    let dir = project();
    let compiler = compiler(&dir);
    let page = Path::new("pages/index.tsx");

    let first = compiler.get_compiled_module(page, false).await.unwrap();
    let fresh = compiler.get_compiled_module(page, true).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &fresh));
    assert_eq!(&*first, &*fresh);
}

#[tokio::test]
async fn test_fallback_results_not_cached() {
    let dir = project();
    write(
        dir.path(),
        "pages/broken.js",
        "import { a } from './missing';\nexport default a;\n",
    );
    let compiler = compiler(&dir);

    let code = compiler
        .get_compiled_module(Path::new("pages/broken.js"), false)
        .await
        .unwrap();
    assert!(code.contains("./missing"));
    assert!(compiler.cache().is_empty());
}

#[tokio::test]
async fn test_rejects_paths_outside_root() {
    let outer = TempDir::new().unwrap();
    write(outer.path(), "secret.js", "export const key = 1;\n");
    write(outer.path(), "app/pages/a.js", "export default 1;\n");
    let compiler = ModuleCompiler::new(CompilerConfig::new(outer.path().join("app"))).unwrap();

    let err = compiler
        .get_compiled_module(Path::new("../secret.js"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, CompileError::Forbidden { .. }));

    let err = compiler
        .get_compiled_module(Path::new("pages/nope.js"), false)
        .await
        .unwrap_err();
    assert!(matches!(err, CompileError::NotFound { .. }));
}

#[tokio::test]
async fn test_circular_imports_fall_back() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "pages/a.js", "import { b } from './b';\nexport default b;\n");
    write(dir.path(), "pages/b.js", "import { a } from './c';\nexport const b = a;\n");
    write(dir.path(), "pages/c.js", "import { b } from './b';\nexport const a = 1;\n");
    let compiler = ModuleCompiler::new(CompilerConfig::new(dir.path())).unwrap();

    let code = compiler
        .get_compiled_module(Path::new("pages/a.js"), false)
        .await
        .unwrap();
    assert!(code.contains("/__modules/pages%2Fb.js"));
}

#[tokio::test]
async fn test_invalidate_and_clear() {
    let dir = project();
    let compiler = compiler(&dir);
    let page = Path::new("pages/index.tsx");

    compiler.get_compiled_module(page, false).await.unwrap();
    assert!(compiler.invalidate(page));
    assert!(!compiler.invalidate(page));

    compiler.get_compiled_module(page, false).await.unwrap();
    compiler.clear_cache();
    assert!(compiler.cache().is_empty());
}
