use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use trellis_core::*;

struct Tag(&'static str);

#[async_trait]
impl Middleware for Tag {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse> {
        let response = next(req).await?;
        let seen = response.header("x-trail").unwrap_or("").to_string();
        Ok(response.with_header("x-trail", format!("{seen}{}", self.0)))
    }
}

struct RequireAuth;

#[async_trait]
impl Middleware for RequireAuth {
    async fn handle(&self, req: HttpRequest, next: Next) -> Result<HttpResponse> {
        if req.header("authorization").is_none() {
            return Err(Error::Unauthorized("missing credentials".into()));
        }
        next(req).await
    }
}

fn counting_handler(calls: Arc<AtomicUsize>) -> HandlerFn {
    Arc::new(move |req: HttpRequest| -> HandlerFuture {
        calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let id = req.header("x-request-id").unwrap_or("").to_string();
            Ok(HttpResponse::ok().with_header("x-seen-id", id))
        })
    })
}

#[tokio::test]
async fn test_chain_runs_outermost_first() {
    let mut chain = MiddlewareChain::new();
    chain.use_middleware(Tag("a"));
    chain.use_middleware(Tag("b"));
    let calls = Arc::new(AtomicUsize::new(0));

    let response = chain
        .apply(HttpRequest::get("/"), counting_handler(calls.clone()))
        .await
        .unwrap();

    // Inner middleware writes first on the way out.
    assert_eq!(response.header("x-trail"), Some("ba"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejection_skips_handler() {
    let mut chain = MiddlewareChain::new();
    chain.use_middleware(RequireAuth);
    let calls = Arc::new(AtomicUsize::new(0));

    let err = chain
        .apply(HttpRequest::get("/admin"), counting_handler(calls.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
    assert_eq!(err.to_api_body()["error"], "missing credentials");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let ok = chain
        .apply(
            HttpRequest::get("/admin").with_header("Authorization", "Bearer t"),
            counting_handler(calls.clone()),
        )
        .await
        .unwrap();
    assert_eq!(ok.status, 200);
}

#[tokio::test]
async fn test_request_id_reaches_handler_and_response() {
    let mut chain = MiddlewareChain::new();
    chain.use_middleware(RequestIdMiddleware);
    chain.use_middleware(LoggingMiddleware::new());

    let response = chain
        .apply(
            HttpRequest::get("/").with_header("X-Request-Id", "req-7"),
            counting_handler(Arc::default()),
        )
        .await
        .unwrap();
    assert_eq!(response.header("x-seen-id"), Some("req-7"));
    assert_eq!(response.header("x-request-id"), Some("req-7"));

    let generated = chain
        .apply(HttpRequest::get("/"), counting_handler(Arc::default()))
        .await
        .unwrap();
    let id = generated.header("x-request-id").unwrap();
    assert_eq!(generated.header("x-seen-id"), Some(id));
    assert_eq!(id.len(), 36);
}

#[test]
fn test_api_error_body() {
    let err = Error::api_with_details(422, "title too long", serde_json::json!({ "max": 80 }));
    assert_eq!(err.status_code(), 422);
    assert!(err.is_client_error());
    assert_eq!(
        err.to_api_body(),
        serde_json::json!({ "success": false, "error": "title too long", "details": { "max": 80 } })
    );
}
