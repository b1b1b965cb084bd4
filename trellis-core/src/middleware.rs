// Middleware applied around route dispatch

use crate::{Error, HttpRequest, HttpResponse};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Boxed future returned by handlers and the next link of the chain.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>;

/// The next handler in the middleware chain
pub type Next = Box<dyn FnOnce(HttpRequest) -> HandlerFuture + Send>;

/// Terminal handler the chain eventually calls.
pub type HandlerFn = Arc<dyn Fn(HttpRequest) -> HandlerFuture + Send + Sync>;

/// Middleware trait for processing requests before they reach the handler
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process the request and optionally pass to next middleware
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error>;
}

/// Ordered list of middleware, cheap to clone.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Arc<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the end of the chain
    pub fn use_middleware<M: Middleware + 'static>(&mut self, middleware: M) {
        let mut mws = (*self.middlewares).clone();
        mws.push(Arc::new(middleware));
        self.middlewares = Arc::new(mws);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run the request through every middleware, then the handler.
    pub async fn apply(&self, req: HttpRequest, handler: HandlerFn) -> Result<HttpResponse, Error> {
        debug!(
            middleware_count = self.middlewares.len(),
            path = %req.path,
            method = %req.method,
            "Executing middleware chain"
        );
        self.execute_from(0, req, handler).await
    }

    fn execute_from(&self, index: usize, req: HttpRequest, handler: HandlerFn) -> HandlerFuture {
        let Some(middleware) = self.middlewares.get(index).cloned() else {
            trace!("Middleware chain complete, calling handler");
            return handler(req);
        };

        let chain = self.clone();
        trace!(middleware_index = index, "Executing middleware");
        Box::pin(async move {
            middleware
                .handle(
                    req,
                    Box::new(move |req| chain.execute_from(index + 1, req, handler)),
                )
                .await
        })
    }
}

/// Propagates `x-request-id`, generating one when the client sent none.
pub struct RequestIdMiddleware;

#[async_trait]
impl Middleware for RequestIdMiddleware {
    async fn handle(&self, mut req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        let request_id = req
            .header("x-request-id")
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        req.headers
            .insert("x-request-id".to_string(), request_id.clone());

        let mut response = next(req).await?;
        response
            .headers
            .insert("x-request-id".to_string(), request_id);
        Ok(response)
    }
}

/// Access log: one line per request with status and latency.
pub struct LoggingMiddleware {
    /// Requests slower than this are logged at warn level.
    pub slow_threshold_ms: u128,
}

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self {
            slow_threshold_ms: 1000,
        }
    }

    pub fn with_slow_threshold_ms(mut self, ms: u128) -> Self {
        self.slow_threshold_ms = ms;
        self
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
        let start = Instant::now();
        let method = req.method.clone();
        let path = req.path.clone();

        let result = next(req).await;
        let elapsed_ms = start.elapsed().as_millis();

        match &result {
            Ok(resp) if elapsed_ms >= self.slow_threshold_ms => warn!(
                method = %method,
                path = %path,
                status = resp.status,
                elapsed_ms,
                "Slow request"
            ),
            Ok(resp) => info!(
                method = %method,
                path = %path,
                status = resp.status,
                elapsed_ms,
                streaming = resp.is_streaming(),
                "Request completed"
            ),
            Err(err) => warn!(
                method = %method,
                path = %path,
                status = err.status_code(),
                elapsed_ms,
                error = %err,
                "Request failed"
            ),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Recorder {
        async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse, Error> {
            self.log.lock().unwrap().push(format!("before {}", self.name));
            let resp = next(req).await;
            self.log.lock().unwrap().push(format!("after {}", self.name));
            resp
        }
    }

    fn ok_handler() -> HandlerFn {
        Arc::new(|_req| Box::pin(async { Ok(HttpResponse::ok()) }))
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(Recorder {
            name: "a",
            log: log.clone(),
        });
        chain.use_middleware(Recorder {
            name: "b",
            log: log.clone(),
        });

        let resp = chain
            .apply(HttpRequest::get("/"), ok_handler())
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["before a", "before b", "after b", "after a"]
        );
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(RequestIdMiddleware);

        let req = HttpRequest::get("/").with_header("X-Request-Id", "abc");
        let resp = chain.apply(req, ok_handler()).await.unwrap();
        assert_eq!(resp.header("x-request-id"), Some("abc"));

        let resp = chain
            .apply(HttpRequest::get("/"), ok_handler())
            .await
            .unwrap();
        assert_eq!(resp.header("x-request-id").map(str::len), Some(36));
    }

    #[tokio::test]
    async fn test_logging_middleware_passes_errors_through() {
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(LoggingMiddleware::new());
        let failing: HandlerFn =
            Arc::new(|_req| Box::pin(async { Err(Error::NotFound("gone".into())) }));

        let err = chain
            .apply(HttpRequest::get("/x"), failing)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
