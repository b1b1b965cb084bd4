//! URLs of compiled browser modules.

use std::path::{Component, Path};

/// Prefix under which compiled browser modules are served.
pub const MODULES_PREFIX: &str = "/__modules/";

/// `/__modules/<url-encoded path>` for a source file relative to the project root.
pub fn module_url(rel_path: &Path) -> String {
    format!("{}{}", MODULES_PREFIX, urlencoding::encode(&to_slash_path(rel_path)))
}

/// Forward-slash form of a relative path, dropping `.` and root components.
pub fn to_slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_url() {
        assert_eq!(
            module_url(Path::new("./pages/blog/[slug].tsx")),
            "/__modules/pages%2Fblog%2F%5Bslug%5D.tsx"
        );
    }
}
