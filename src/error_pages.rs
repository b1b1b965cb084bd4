//! Built-in error document, used when no `_404`/`_error` page exists or
//! when rendering one fails.

use trellis_core::HttpResponse;
use trellis_ssr::escape_html;

fn reason(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ if status >= 500 => "Server Error",
        _ => "Error",
    }
}

/// A minimal standalone HTML page. `message` is escaped.
pub fn fallback_html(status: u16, message: &str) -> String {
    let title = format!("{status} {}", reason(status));
    format!(
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"utf-8\"><title>{title}</title>\
<style>body{{font-family:system-ui,sans-serif;margin:4rem auto;max-width:40rem;color:#222}}\
h1{{font-size:1.5rem}}p{{color:#555}}</style></head>\
<body><h1>{title}</h1><p>{}</p></body></html>",
        escape_html(message)
    )
}

pub fn fallback_response(status: u16, message: &str) -> HttpResponse {
    HttpResponse::html(fallback_html(status, message)).with_status(status)
}
