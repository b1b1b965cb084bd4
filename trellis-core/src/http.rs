// HTTP request and response types

use crate::params::RouteParams;
use crate::streaming::{BoxByteStream, collect_stream};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// HTTP request wrapper
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    /// Path without the query string.
    pub path: String,
    /// Raw query string (without the leading `?`).
    pub query_string: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub path_params: RouteParams,
    pub query_params: HashMap<String, String>,
}

impl HttpRequest {
    /// Create a request. A `?query` suffix on `path` is split off and parsed.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        let (path, query_string) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path, None),
        };
        let query_params = query_string
            .as_deref()
            .map(parse_query_string)
            .unwrap_or_default();

        Self {
            method: method.into().to_uppercase(),
            path,
            query_string,
            headers: HashMap::new(),
            body: Vec::new(),
            path_params: RouteParams::new(),
            query_params,
        }
    }

    /// Shorthand for a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parse the request body as JSON
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, crate::Error> {
        serde_json::from_slice(&self.body).map_err(|e| crate::Error::BadRequest(e.to_string()))
    }

    /// Get a path parameter by name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name)
    }

    /// Get a query parameter by name
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(String::as_str)
    }

    /// Whether a query parameter is present at all, even without a value.
    pub fn has_query(&self, name: &str) -> bool {
        self.query_params.contains_key(name)
    }

    /// Cookies from the `Cookie` header.
    pub fn cookies(&self) -> HashMap<String, String> {
        self.header("cookie").map(parse_cookies).unwrap_or_default()
    }

    /// Path plus query string, as the client requested it.
    pub fn url(&self) -> String {
        match &self.query_string {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }
}

/// Response body: either fully buffered or streamed.
pub enum ResponseBody {
    Full(Bytes),
    Stream(BoxByteStream),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        ResponseBody::Full(Bytes::new())
    }
}

/// Header key under which queued cookies are stored.
pub const SET_COOKIE: &str = "set-cookie";

/// HTTP response wrapper
#[derive(Debug, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ResponseBody,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: ResponseBody::default(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn internal_server_error() -> Self {
        Self::new(500)
    }

    /// HTML response with the right content type.
    pub fn html(body: impl Into<String>) -> Self {
        Self::ok()
            .with_header("Content-Type", "text/html; charset=utf-8")
            .with_body(body.into().into_bytes())
    }

    /// JSON response with status 200.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, crate::Error> {
        Self::ok().with_json(value)
    }

    /// JavaScript module response.
    pub fn javascript(code: impl Into<Bytes>) -> Self {
        let mut resp = Self::ok().with_header("Content-Type", "application/javascript");
        resp.body = ResponseBody::Full(code.into());
        resp
    }

    /// Redirect to `location` with the given 3xx status.
    pub fn redirect(location: impl Into<String>, status: u16) -> Self {
        Self::new(status).with_header("Location", location)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = ResponseBody::Full(Bytes::from(body));
        self
    }

    pub fn with_stream(mut self, stream: BoxByteStream) -> Self {
        self.body = ResponseBody::Stream(stream);
        self
    }

    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, crate::Error> {
        let body =
            serde_json::to_vec(value).map_err(|e| crate::Error::Serialization(e.to_string()))?;
        self.body = ResponseBody::Full(Bytes::from(body));
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    /// Set a header, replacing any existing value regardless of case.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(&key));
        self.headers.insert(key, value.into());
        self
    }

    /// Add a `Set-Cookie` value. Several cookies share one newline-separated
    /// entry and are written as separate headers on the wire.
    pub fn append_cookie(self, cookie: impl Into<String>) -> Self {
        let cookie = cookie.into();
        let merged = match self.header(SET_COOKIE) {
            Some(existing) => format!("{existing}\n{cookie}"),
            None => cookie,
        };
        self.with_header(SET_COOKIE, merged)
    }

    /// Individual `Set-Cookie` values.
    pub fn set_cookies(&self) -> Vec<&str> {
        self.header(SET_COOKIE)
            .map(|v| v.split('\n').collect())
            .unwrap_or_default()
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    /// Buffered body bytes, if the body is not streamed.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            ResponseBody::Full(bytes) => Some(bytes),
            ResponseBody::Stream(_) => None,
        }
    }

    /// Consume the response and return the whole body, draining a stream if needed.
    pub async fn into_body_bytes(self) -> Result<Vec<u8>, crate::Error> {
        match self.body {
            ResponseBody::Full(bytes) => Ok(bytes.to_vec()),
            ResponseBody::Stream(stream) => collect_stream(stream).await,
        }
    }

    /// Consume the response and return the body as UTF-8 text.
    pub async fn into_text(self) -> Result<String, crate::Error> {
        let bytes = self.into_body_bytes().await?;
        String::from_utf8(bytes).map_err(|e| crate::Error::Internal(e.to_string()))
    }
}

/// Parse a query string into a map of decoded parameters
pub fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let mut split = part.splitn(2, '=');
            let key = decode_component(split.next()?);
            let value = decode_component(split.next().unwrap_or(""));
            Some((key, value))
        })
        .collect()
}

/// Parse a `Cookie` header value.
pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.trim().to_string(), decode_component(value.trim())))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let plus_decoded = raw.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(|s| s.into_owned())
        .unwrap_or(plus_decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_splits_query() {
        let req = HttpRequest::get("/modules/a.js?t=123&name=john%20doe");
        assert_eq!(req.path, "/modules/a.js");
        assert_eq!(req.query("t"), Some("123"));
        assert_eq!(req.query("name"), Some("john doe"));
        assert_eq!(req.url(), "/modules/a.js?t=123&name=john%20doe");
    }

    #[test]
    fn test_flag_query_without_value() {
        let req = HttpRequest::get("/x?t");
        assert!(req.has_query("t"));
        assert_eq!(req.query("t"), Some(""));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = HttpRequest::get("/").with_header("Cookie", "a=1; session=abc%3D");
        assert_eq!(req.header("cookie"), Some("a=1; session=abc%3D"));
        let cookies = req.cookies();
        assert_eq!(cookies.get("a").map(String::as_str), Some("1"));
        assert_eq!(cookies.get("session").map(String::as_str), Some("abc="));
    }

    #[test]
    fn test_cookies_accumulate() {
        let resp = HttpResponse::ok()
            .append_cookie("a=1; Path=/")
            .append_cookie("b=2; Path=/")
            .with_header("Content-Type", "text/plain")
            .with_header("content-type", "text/html");
        assert_eq!(resp.set_cookies(), vec!["a=1; Path=/", "b=2; Path=/"]);
        assert_eq!(resp.headers.len(), 2);
        assert_eq!(resp.header("Content-Type"), Some("text/html"));
    }

    #[test]
    fn test_redirect_response() {
        let resp = HttpResponse::redirect("/login", 302);
        assert_eq!(resp.status, 302);
        assert_eq!(resp.header("location"), Some("/login"));
    }

    #[tokio::test]
    async fn test_streamed_body_collects() {
        let resp = HttpResponse::ok().with_stream(crate::streaming::stream_from_chunks(vec![
            "a", "b",
        ]));
        assert!(resp.is_streaming());
        assert!(resp.body_bytes().is_none());
        assert_eq!(resp.into_text().await.unwrap(), "ab");
    }
}
