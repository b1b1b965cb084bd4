//! The context passed to `load()`, `metadata()` and API handlers.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use trellis_core::{HttpRequest, HttpResponse, RouteParams};

/// Status codes treated as redirects when paired with a `Location` header.
pub const REDIRECT_STATUSES: &[u16] = &[301, 302, 303, 307, 308];

/// Resolves the session for a request.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn get_session(&self, req: &HttpRequest) -> Option<Value>;
}

#[derive(Debug, Default)]
struct ResponseParts {
    status: Option<u16>,
    headers: Vec<(String, String)>,
    cookies: Vec<String>,
}

/// Response handle shared by every loader of one request.
///
/// Loaders use it to set status, headers, cookies and redirects; the page
/// server reads it back once loading is done.
#[derive(Debug, Clone, Default)]
pub struct ResponseState {
    inner: Arc<Mutex<ResponseParts>>,
}

impl ResponseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&self, status: u16) {
        self.inner.lock().status = Some(status);
    }

    pub fn status(&self) -> Option<u16> {
        self.inner.lock().status
    }

    /// Set a header, replacing any earlier value (case-insensitive).
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let mut parts = self.inner.lock();
        parts.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        parts.headers.push((name, value.into()));
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        self.inner.lock().headers.clone()
    }

    /// Queue a `Set-Cookie` with `Path=/`.
    pub fn set_cookie(&self, name: &str, value: &str) {
        self.set_raw_cookie(format!(
            "{}={}; Path=/",
            name,
            urlencode_cookie(value)
        ));
    }

    /// Queue a full `Set-Cookie` header value.
    pub fn set_raw_cookie(&self, cookie: impl Into<String>) {
        self.inner.lock().cookies.push(cookie.into());
    }

    pub fn cookies(&self) -> Vec<String> {
        self.inner.lock().cookies.clone()
    }

    /// Request a redirect. Statuses outside [`REDIRECT_STATUSES`] become 302.
    pub fn redirect(&self, location: impl Into<String>, status: u16) {
        let status = if REDIRECT_STATUSES.contains(&status) {
            status
        } else {
            302
        };
        self.set_status(status);
        self.set_header("Location", location);
    }

    /// `(status, location)` when a redirect has been requested.
    pub fn redirect_target(&self) -> Option<(u16, String)> {
        let status = self.status()?;
        if !REDIRECT_STATUSES.contains(&status) {
            return None;
        }
        self.header("location").map(|location| (status, location))
    }

    pub fn is_redirect(&self) -> bool {
        self.redirect_target().is_some()
    }

    /// Copy status, headers and cookies onto a response.
    pub fn apply_to(&self, mut response: HttpResponse) -> HttpResponse {
        let parts = self.inner.lock();
        if let Some(status) = parts.status {
            response.status = status;
        }
        for (k, v) in &parts.headers {
            response = response.with_header(k.clone(), v.clone());
        }
        for cookie in &parts.cookies {
            response = response.append_cookie(cookie.clone());
        }
        response
    }
}

fn urlencode_cookie(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            ';' | ',' | ' ' | '"' | '\\' => format!("%{:02X}", c as u32),
            c => c.to_string(),
        })
        .collect()
}

/// Request-scoped key/value store shared between layout and page loaders.
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<Map<String, Value>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.write().insert(key.into(), value.into());
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.inner.read().clone())
    }
}

/// Everything a loader can see about the current request.
#[derive(Clone)]
pub struct LoadContext {
    pub req: Arc<HttpRequest>,
    pub res: ResponseState,
    pub params: RouteParams,
    pub query: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub lang: String,
    /// Matched route pattern, e.g. `/users/:id`.
    pub route_path: String,
    /// Request URL (path and query).
    pub url: String,
    pub store: Store,
    session: Option<Arc<dyn SessionProvider>>,
    db: Option<Arc<dyn Any + Send + Sync>>,
}

impl LoadContext {
    pub fn new(req: HttpRequest, route_path: impl Into<String>) -> Self {
        Self {
            params: req.path_params.clone(),
            query: req.query_params.clone(),
            cookies: req.cookies(),
            url: req.url(),
            lang: "en".to_string(),
            route_path: route_path.into(),
            res: ResponseState::new(),
            store: Store::new(),
            session: None,
            db: None,
            req: Arc::new(req),
        }
    }

    pub fn with_params(mut self, params: RouteParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_response(mut self, res: ResponseState) -> Self {
        self.res = res;
        self
    }

    pub fn with_store(mut self, store: Store) -> Self {
        self.store = store;
        self
    }

    pub fn with_session_provider(mut self, provider: Arc<dyn SessionProvider>) -> Self {
        self.session = Some(provider);
        self
    }

    pub fn with_db(mut self, db: Arc<dyn Any + Send + Sync>) -> Self {
        self.db = Some(db);
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn get_cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Session for this request, if a provider is configured and has one.
    pub async fn get_session(&self) -> Option<Value> {
        match &self.session {
            Some(provider) => provider.get_session(&self.req).await,
            None => None,
        }
    }

    /// Database handle, downcast to its concrete type.
    pub fn db<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.db.as_ref().and_then(|db| db.downcast_ref::<T>())
    }

    /// Params as a JSON object, in path order.
    pub fn params_json(&self) -> Value {
        self.params.to_json()
    }
}

impl std::fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadContext")
            .field("route_path", &self.route_path)
            .field("url", &self.url)
            .field("params", &self.params)
            .field("lang", &self.lang)
            .finish_non_exhaustive()
    }
}

/// Pick the request language: `?lang=`, then the first `Accept-Language`
/// tag, then `default`.
pub fn detect_lang(req: &HttpRequest, default: &str) -> String {
    if let Some(lang) = req.query("lang").filter(|l| !l.is_empty()) {
        return lang.to_string();
    }
    req.header("accept-language")
        .and_then(|header| header.split(',').next())
        .map(|tag| tag.split(';').next().unwrap_or(tag).trim())
        .and_then(|tag| tag.split('-').next())
        .filter(|tag| !tag.is_empty() && *tag != "*")
        .map(str::to_lowercase)
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedSession;

    #[async_trait]
    impl SessionProvider for FixedSession {
        async fn get_session(&self, req: &HttpRequest) -> Option<Value> {
            req.cookies().get("sid").map(|sid| json!({ "sid": sid }))
        }
    }

    #[test]
    fn test_redirect_detection() {
        let res = ResponseState::new();
        assert!(!res.is_redirect());
        res.set_status(302);
        assert!(!res.is_redirect());
        res.set_header("Location", "/login");
        assert_eq!(res.redirect_target(), Some((302, "/login".to_string())));

        let other = ResponseState::new();
        other.redirect("/x", 200);
        assert_eq!(other.redirect_target(), Some((302, "/x".to_string())));
    }

    #[test]
    fn test_apply_to_response() {
        let res = ResponseState::new();
        res.set_status(201);
        res.set_header("X-Trace", "a");
        res.set_header("x-trace", "b");
        res.set_cookie("theme", "dark mode");
        let response = res.apply_to(HttpResponse::ok());
        assert_eq!(response.status, 201);
        assert_eq!(response.header("x-trace"), Some("b"));
        assert_eq!(response.header("set-cookie"), Some("theme=dark%20mode; Path=/"));
    }

    #[tokio::test]
    async fn test_context_surface() {
        let mut req = HttpRequest::get("/users/7?tab=posts").with_header("Cookie", "sid=abc");
        req.path_params.push("id", "7");
        let ctx = LoadContext::new(req, "/users/:id")
            .with_session_provider(Arc::new(FixedSession))
            .with_db(Arc::new(42u32));

        assert_eq!(ctx.param("id"), Some("7"));
        assert_eq!(ctx.query("tab"), Some("posts"));
        assert_eq!(ctx.get_cookie("sid"), Some("abc"));
        assert_eq!(ctx.url, "/users/7?tab=posts");
        assert_eq!(ctx.get_session().await, Some(json!({"sid": "abc"})));
        assert_eq!(ctx.db::<u32>(), Some(&42));
        assert!(ctx.db::<String>().is_none());
    }

    #[test]
    fn test_detect_lang() {
        let req = HttpRequest::get("/").with_header("Accept-Language", "fr-CA,fr;q=0.9");
        assert_eq!(detect_lang(&req, "en"), "fr");
        assert_eq!(detect_lang(&HttpRequest::get("/?lang=de"), "en"), "de");
        assert_eq!(detect_lang(&HttpRequest::get("/"), "en"), "en");
    }
}
