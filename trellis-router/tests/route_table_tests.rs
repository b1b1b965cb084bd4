use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use trellis_router::{RouteKind, RouteTable, RouterError};

fn touch(root: &Path, rel: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, "export default function Page() {}\n").unwrap();
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    for file in [
        "pages/index.tsx",
        "pages/about.jsx",
        "pages/_app.tsx",
        "pages/_404.tsx",
        "pages/_error.tsx",
        "pages/_layout.tsx",
        "pages/_helpers.ts",
        "pages/users/[id].tsx",
        "pages/users/active.tsx",
        "pages/docs/_layout.tsx",
        "pages/docs/[...slug].mdx",
        "pages/docs/[...slug].tsx",
        "pages/blog/index.mjs",
        "pages/api/users/[id].ts",
        "pages/types.d.ts",
        "pages/.hidden/secret.tsx",
    ] {
        touch(root, file);
    }
    dir
}

#[test]
fn test_scan_builds_routes() {
    let dir = project();
    let table = RouteTable::scan(dir.path(), "pages").unwrap();

    let patterns: Vec<String> = table
        .routes()
        .iter()
        .map(|d| d.path_pattern.clone())
        .collect();
    assert_eq!(
        patterns,
        vec![
            "/",
            "/about",
            "/api/users/:id",
            "/blog",
            "/docs/*slug",
            "/users/active",
            "/users/:id",
        ]
    );
}

#[test]
fn test_special_files() {
    let dir = project();
    let table = RouteTable::scan(dir.path(), "pages").unwrap();

    assert_eq!(table.app_shell(), Some(Path::new("pages/_app.tsx")));
    assert_eq!(table.not_found_page(), Some(Path::new("pages/_404.tsx")));
    assert_eq!(table.error_page(), Some(Path::new("pages/_error.tsx")));
    assert!(table.lookup("/_helpers").is_none());
}

#[test]
fn test_lookup_through_scanned_table() {
    let dir = project();
    let table = RouteTable::scan(dir.path(), "pages").unwrap();

    let m = table.lookup("/users/active").unwrap();
    assert_eq!(m.descriptor.source_file, PathBuf::from("pages/users/active.tsx"));

    let m = table.lookup("/users/7").unwrap();
    assert_eq!(m.params.get("id"), Some("7"));
    assert_eq!(m.descriptor.kind, RouteKind::Page);

    let m = table.lookup("/api/users/9").unwrap();
    assert_eq!(m.descriptor.kind, RouteKind::Api);

    let m = table.lookup("/docs").unwrap();
    assert_eq!(m.descriptor.path_pattern, "/docs/*slug");
    assert_eq!(m.descriptor.client_bundle_ref, "/__modules/pages%2Fdocs%2F%5B...slug%5D.tsx");
}

#[test]
fn test_scanned_layouts() {
    let dir = project();
    let table = RouteTable::scan(dir.path(), "pages").unwrap();
    assert_eq!(
        table.layouts_for("/docs/*slug"),
        vec![
            PathBuf::from("pages/docs/_layout.tsx"),
            PathBuf::from("pages/_layout.tsx"),
        ]
    );
}

#[test]
fn test_rescan_picks_up_new_files() {
    let dir = project();
    let mut table = RouteTable::scan(dir.path(), "pages").unwrap();
    assert!(table.lookup("/contact").is_none());

    touch(dir.path(), "pages/contact.tsx");
    table.rescan().unwrap();
    assert!(table.lookup("/contact").is_some());
}

#[test]
fn test_missing_pages_dir() {
    let dir = TempDir::new().unwrap();
    let err = RouteTable::scan(dir.path(), "pages").unwrap_err();
    assert!(matches!(err, RouterError::PagesDirNotFound { .. }));
}

#[test]
fn test_failed_rescan_keeps_previous_routes() {
    let dir = project();
    let mut table = RouteTable::scan(dir.path(), "pages").unwrap();

    fs::rename(dir.path().join("pages"), dir.path().join("moved")).unwrap();
    let err = table.rescan().unwrap_err();
    assert!(matches!(err, RouterError::PagesDirNotFound { .. }));
    assert!(table.lookup("/about").is_some());
    assert_eq!(table.app_shell(), Some(Path::new("pages/_app.tsx")));
    assert_eq!(table.layouts_for("/about"), vec![PathBuf::from("pages/_layout.tsx")]);
    fs::rename(dir.path().join("moved"), dir.path().join("pages")).unwrap();
}

#[cfg(unix)]
#[test]
fn test_unreadable_subdirectory_keeps_previous_routes() {
    use std::os::unix::fs::PermissionsExt;

    let dir = project();
    let mut table = RouteTable::scan(dir.path(), "pages").unwrap();

    touch(dir.path(), "pages/locked/page.tsx");
    let locked = dir.path().join("pages/locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    let unreadable = fs::read_dir(&locked).is_err();

    let result = table.rescan();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    if unreadable {
        assert!(matches!(result, Err(RouterError::Io(_))));
        assert!(table.lookup("/locked/page").is_none());
    } else {
        // Permission bits do not bind a privileged user; the scan succeeds.
        result.unwrap();
        assert!(table.lookup("/locked/page").is_some());
    }
    assert!(table.lookup("/about").is_some());
    assert!(table.lookup("/users/7").is_some());
    assert_eq!(table.not_found_page(), Some(Path::new("pages/_404.tsx")));
}

#[cfg(unix)]
#[test]
fn test_directory_symlinks_are_not_followed() {
    let dir = project();
    std::os::unix::fs::symlink(dir.path().join("pages"), dir.path().join("pages/loop")).unwrap();

    let table = RouteTable::scan(dir.path(), "pages").unwrap();
    assert!(table.lookup("/about").is_some());
    assert!(table.lookup("/loop/about").is_none());
    assert!(
        table
            .routes()
            .iter()
            .all(|d| !d.path_pattern.starts_with("/loop"))
    );
}
