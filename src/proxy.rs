// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Intercepting reverse-proxy server: forwards traffic to the upstream origin
//! and, when inspection clients are attached, captures each exchange and hands
//! the completed event to the hub.

use crate::event::{EventSequence, IOEvent};
use crate::hub::Hub;

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::{service::service_fn, Request, Response, Uri};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client as LegacyClient;
use hyper_util::rt::TokioExecutor;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as AutoConnBuilder;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, info, trace};

type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<BoxBody<Bytes, Infallible>>, Infallible>> + Send>>;

// RFC 7230 Section 6.1: Hop-by-hop headers must not be forwarded by proxies.
static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

type UpstreamClient = LegacyClient<
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    Full<Bytes>,
>;

struct Shared {
    client: UpstreamClient,
    upstream: Uri,
    hub: Arc<Hub>,
    sequence: EventSequence,
}

/// In-memory record of what the upstream call produced, exactly as it is
/// relayed to the real client.
struct RecordedResponse {
    status: u16,
    headers: hyper::HeaderMap,
    body: Bytes,
}

pub async fn run_proxy(listen: SocketAddr, upstream: Uri, hub: Arc<Hub>) -> anyhow::Result<()> {
    // Default behavior: no accept limit (runs forever)
    run_proxy_with_limit(listen, upstream, hub, None).await
}

/// Testable variant of `run_proxy` that accepts an optional `accept_limit`.
/// When `accept_limit` is `Some(n)`, the accept loop will accept `n`
/// connections and then return. Connection handlers are spawned
/// asynchronously and may still be running when this function returns.
pub async fn run_proxy_with_limit(
    listen: SocketAddr,
    upstream: Uri,
    hub: Arc<Hub>,
    accept_limit: Option<usize>,
) -> anyhow::Result<()> {
    let https = HttpsConnectorBuilder::new()
        .with_native_roots()?
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();
    let client: UpstreamClient = LegacyClient::builder(TokioExecutor::new()).build(https);

    let shared = Arc::new(Shared {
        client,
        upstream,
        hub,
        sequence: EventSequence::new(),
    });

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, upstream = %shared.upstream, "proxy listening");

    let executor = TokioExecutor::new();
    let server_builder = AutoConnBuilder::new(executor);

    let mut remaining = accept_limit;
    loop {
        if let Some(0) = remaining {
            break;
        }

        let (stream, remote_addr) = listener.accept().await?;

        if let Some(ref mut n) = remaining {
            *n -= 1;
        }

        let shared = shared.clone();
        let builder_clone = server_builder.clone();
        tokio::spawn(async move {
            let conn = Arc::new(crate::connection::ConnectionMetadata::new(remote_addr));
            let service = service_fn(move |req: Request<Incoming>| {
                let shared = shared.clone();
                let conn = conn.clone();
                let fut: ServiceFuture =
                    Box::pin(async move { handle_request(req, shared, conn).await });
                fut
            });

            let io = TokioIo::new(stream);
            if let Err(e) = builder_clone.serve_connection(io, service).await {
                error!(%e, "proxy connection error");
            }
        });
    }

    Ok(())
}

async fn handle_request<B>(
    req: Request<B>,
    shared: Arc<Shared>,
    conn: Arc<crate::connection::ConnectionMetadata>,
) -> Result<Response<BoxBody<Bytes, Infallible>>, Infallible>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    // Fast bypass: nobody watching, so no capture structures are built at all.
    if !shared.hub.has_subscribers() {
        let (parts, body) = req.into_parts();
        let body_bytes = collect_body_lossy(body).await;
        let recorded = forward_upstream(&shared, &parts, body_bytes).await;
        return Ok(relay_response(recorded, false));
    }

    // Capture phase: reserve the id and buffer the request before forwarding.
    let id = shared.sequence.next_id();
    let (parts, body) = req.into_parts();
    let url = request_url(&parts.uri);
    let body_bytes = collect_body_lossy(body).await;

    let event = IOEvent::captured(
        id,
        url.clone(),
        String::from_utf8_lossy(&body_bytes).into_owned(),
        parts.headers.clone(),
    );
    trace!(conn = %conn.id, event = id, %url, "captured request");

    let recorded = forward_upstream(&shared, &parts, body_bytes).await;

    // Completion phase runs off the response path: the client is answered
    // from `recorded` immediately while a background task fills in the
    // response half and broadcasts. The event is moved into that task; after
    // broadcast it is shared read-only behind the Arc.
    let hub = shared.hub.clone();
    let status = recorded.status;
    let resp_headers = recorded.headers.clone();
    let resp_body = recorded.body.clone();
    tokio::spawn(async move {
        let mut event = event;
        event.complete(
            status,
            String::from_utf8_lossy(&resp_body).into_owned(),
            resp_headers,
        );
        hub.broadcast(Arc::new(event));
    });

    Ok(relay_response(recorded, true))
}

/// The request target as seen by the proxy: origin-form if that is what the
/// client sent, absolute-form otherwise.
fn request_url(uri: &Uri) -> String {
    uri.to_string()
}

/// Buffer an entire request body. Capture failures are non-fatal: forwarding
/// must proceed, so a failed read degrades to an empty body.
async fn collect_body_lossy<B>(body: B) -> Bytes
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let boxed: Box<dyn std::error::Error + Send + Sync> = e.into();
            error!("failed to collect request body: {}", boxed);
            Bytes::new()
        }
    }
}

/// Forward one request to the configured upstream origin and record the full
/// outcome in memory. Upstream failures are recorded as a synthetic 502, so
/// the client and any subscribers both observe the same result.
async fn forward_upstream(
    shared: &Shared,
    parts: &hyper::http::request::Parts,
    body: Bytes,
) -> RecordedResponse {
    let uri = match rewrite_uri(&shared.upstream, &parts.uri) {
        Ok(u) => u,
        Err(e) => {
            error!(%e, "failed to build upstream uri");
            return synthetic_error(502, format!("upstream uri error: {e}"));
        }
    };

    let mut builder = Request::builder().method(parts.method.clone()).uri(uri);
    for (name, value) in parts.headers.iter() {
        let name_str = name.as_str().to_ascii_lowercase();
        if name_str == "host" || HOP_BY_HOP_HEADERS.contains(&name_str.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }

    let upstream_req = match builder.body(Full::new(body)) {
        Ok(r) => r,
        Err(e) => {
            error!(%e, "failed to build upstream request");
            return synthetic_error(502, format!("request build error: {e}"));
        }
    };

    let resp = match shared.client.request(upstream_req).await {
        Ok(r) => r,
        Err(e) => {
            return synthetic_error(502, format!("upstream error: {e}"));
        }
    };

    let status = resp.status().as_u16();
    let headers = resp.headers().clone();
    let body = match resp.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return synthetic_error(502, format!("upstream body error: {e}"));
        }
    };

    RecordedResponse {
        status,
        headers,
        body,
    }
}

fn synthetic_error(status: u16, message: String) -> RecordedResponse {
    RecordedResponse {
        status,
        headers: hyper::HeaderMap::new(),
        body: Bytes::from(message),
    }
}

/// Single-host rewrite: the upstream's scheme and authority with the inbound
/// request's path and query.
fn rewrite_uri(upstream: &Uri, inbound: &Uri) -> anyhow::Result<Uri> {
    let mut parts = upstream.clone().into_parts();
    let path = inbound
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    parts.path_and_query = Some(path.parse()?);
    Ok(Uri::from_parts(parts)?)
}

/// Turn the recorded outcome into the response written to the real client,
/// stripping hop-by-hop headers and flagging inspected exchanges.
fn relay_response(recorded: RecordedResponse, inspected: bool) -> Response<BoxBody<Bytes, Infallible>> {
    let mut builder = Response::builder().status(recorded.status);
    for (name, value) in recorded.headers.iter() {
        let name_str = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&name_str.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }
    if inspected {
        builder = builder.header("X-Inspected", "true");
    }
    builder
        .body(Full::new(recorded.body.clone()).boxed())
        .unwrap_or_else(|e| {
            error!(%e, "failed to build relay response");
            Response::new(Full::new(recorded.body).boxed())
        })
}
