//! Static detection of browser-only API usage.

use crate::syntax::mask_comments_and_strings;
use serde::Serialize;

/// Globals that only exist in a browser.
pub const CLIENT_ONLY_GLOBALS: &[&str] = &[
    "window",
    "document",
    "localStorage",
    "sessionStorage",
    "navigator",
];

/// Where a module touches browser-only globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientApiUsage {
    /// No browser-only globals referenced.
    None,
    /// Only inside function bodies (effects, event handlers).
    InFunctions,
    /// At module top level, so evaluating the module on the server fails.
    TopLevel,
}

/// Scan a module for browser-only globals, ignoring comments and strings.
///
/// Property accesses such as `config.window` and `typeof window` guards are
/// not counted.
pub fn detect_client_apis(source: &str) -> ClientApiUsage {
    let masked = mask_comments_and_strings(source);
    let bytes = masked.as_bytes();
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_' || b == b'$';

    let mut usage = ClientApiUsage::None;
    let mut depth: isize = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'{' => depth += 1,
            b'}' => depth -= 1,
            _ if is_ident(b) && (i == 0 || !is_ident(bytes[i - 1])) => {
                let start = i;
                while i < bytes.len() && is_ident(bytes[i]) {
                    i += 1;
                }
                let word = &masked[start..i];
                if CLIENT_ONLY_GLOBALS.contains(&word)
                    && !is_property_access(&masked, start)
                    && !is_typeof_guard(&masked, start)
                {
                    if depth <= 0 {
                        return ClientApiUsage::TopLevel;
                    }
                    usage = ClientApiUsage::InFunctions;
                }
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    usage
}

fn is_property_access(masked: &str, start: usize) -> bool {
    let before = masked[..start].trim_end();
    before.ends_with('.') && !before.ends_with("...")
}

fn is_typeof_guard(masked: &str, start: usize) -> bool {
    masked[..start].trim_end().ends_with("typeof")
}
