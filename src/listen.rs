//! HTTP/1.1 listener on hyper.

use crate::server::PageServer;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, error, info, warn};
use trellis_core::{Error, HttpRequest, HttpResponse, ResponseBody, Result, SET_COOKIE};

type Body = UnsyncBoxBody<Bytes, Error>;

impl PageServer {
    /// Bind `addr` and serve until the process ends. Starts hot reload
    /// when development mode is on.
    pub async fn listen(self, addr: impl ToSocketAddrs) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, std::future::pending()).await
    }

    /// Serve connections from `listener` until `shutdown` resolves.
    /// Connections already accepted run to completion on their own tasks.
    pub async fn serve(self, listener: TcpListener, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.start_hmr()?;
        let local = listener.local_addr()?;
        info!(addr = %local, "Listening on http://{local}");

        tokio::pin!(shutdown);
        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = &mut shutdown => {
                    info!("Shutting down listener");
                    return Ok(());
                }
            };
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(handle_request(&server, req).await) }
                });
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(peer = %peer, error = %err, "Connection closed with error");
                }
            });
        }
    }
}

async fn handle_request(server: &PageServer, req: Request<Incoming>) -> Response<Body> {
    let request = match to_http_request(req).await {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            return into_hyper_response(HttpResponse::new(400));
        }
    };
    into_hyper_response(server.handle(request).await)
}

/// Method, path with query, headers (lower-cased by hyper) and the
/// collected body.
async fn to_http_request(req: Request<Incoming>) -> std::result::Result<HttpRequest, hyper::Error> {
    let (parts, body) = req.into_parts();
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());
    let mut request = HttpRequest::new(parts.method.as_str(), target);
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            request
                .headers
                .entry(name.to_string())
                .and_modify(|existing| {
                    let sep = if *name == hyper::header::COOKIE { "; " } else { ", " };
                    existing.push_str(sep);
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
    }
    request.body = body.collect().await?.to_bytes().to_vec();
    Ok(request)
}

/// Headers are copied as-is except `set-cookie`, whose newline-joined
/// values become one header each. Streamed bodies are forwarded chunk by
/// chunk.
pub(crate) fn into_hyper_response(response: HttpResponse) -> Response<Body> {
    let mut builder = Response::builder().status(response.status);
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case(SET_COOKIE) {
            for cookie in value.split('\n').filter(|c| !c.is_empty()) {
                builder = builder.header(SET_COOKIE, cookie);
            }
        } else {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }

    let body: Body = match response.body {
        ResponseBody::Full(bytes) => Full::new(bytes).map_err(|never| match never {}).boxed_unsync(),
        ResponseBody::Stream(stream) => StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync(),
    };

    builder.body(body).unwrap_or_else(|e| {
        error!(error = %e, "Invalid response parts");
        let empty = Full::new(Bytes::new()).map_err(|never| match never {}).boxed_unsync();
        let mut fallback = Response::new(empty);
        *fallback.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}
