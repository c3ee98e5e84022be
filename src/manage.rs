// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Management server: exposes the hub as a live HTTP feed of
//! newline-delimited JSON events, one long-lived connection per inspector.

use crate::event::IOEvent;
use crate::hub::{Hub, Subscription};

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::{Body, Frame, Incoming};
use hyper::{service::service_fn, Method, Request, Response, StatusCode, Version};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoConnBuilder;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{error, info, trace, warn};

type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<BoxBody<Bytes, Infallible>>, Infallible>> + Send>>;

pub async fn run_management(listen: SocketAddr, hub: Arc<Hub>) -> anyhow::Result<()> {
    run_management_with_limit(listen, hub, None).await
}

/// Testable variant of `run_management` with an optional accept limit, same
/// shape as the proxy side.
pub async fn run_management_with_limit(
    listen: SocketAddr,
    hub: Arc<Hub>,
    accept_limit: Option<usize>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, "management listening");

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

        let hub = hub.clone();
        let builder_clone = server_builder.clone();
        tokio::spawn(async move {
            let conn = Arc::new(crate::connection::ConnectionMetadata::new(remote_addr));
            let conn_for_log = conn.clone();
            let service = service_fn(move |req: Request<Incoming>| {
                let hub = hub.clone();
                let conn = conn.clone();
                let fut: ServiceFuture =
                    Box::pin(async move { Ok(handle_stream_request(req, hub, conn)) });
                fut
            });

            let io = TokioIo::new(stream);
            if let Err(e) = builder_clone.serve_connection(io, service).await {
                // inspection clients hang up whenever they like
                trace!(%e, conn = %conn_for_log.id, "management connection ended");
            }
            trace!(conn = %conn_for_log.id, age = ?conn_for_log.age(), "inspector disconnected");
        });
    }

    Ok(())
}

fn handle_stream_request(
    req: Request<Incoming>,
    hub: Arc<Hub>,
    conn: Arc<crate::connection::ConnectionMetadata>,
) -> Response<BoxBody<Bytes, Infallible>> {
    if req.method() != Method::GET {
        return plain_status(StatusCode::METHOD_NOT_ALLOWED, "only GET is supported");
    }

    // Pre-HTTP/1.1 transports have no chunked framing, so the stream cannot
    // be flushed incrementally to the client.
    if matches!(req.version(), Version::HTTP_09 | Version::HTTP_10) {
        return plain_status(StatusCode::BAD_REQUEST, "response cannot be chunked");
    }

    let subscription = hub.subscribe();
    info!(conn = %conn.id, remote = %conn.remote_addr, "inspector attached");

    let stream = EventStream::new(subscription);
    Response::builder()
        .header("X-Content-Type-Options", "nosniff")
        .header("Content-Type", "application/x-ndjson")
        .header("Cache-Control", "no-cache")
        .body(stream.boxed())
        .unwrap_or_else(|e| {
            error!(%e, "failed to build stream response");
            plain_status(StatusCode::INTERNAL_SERVER_ERROR, "stream setup failed")
        })
}

fn plain_status(status: StatusCode, message: &'static str) -> Response<BoxBody<Bytes, Infallible>> {
    let mut resp = Response::new(Full::new(Bytes::from_static(message.as_bytes())).boxed());
    *resp.status_mut() = status;
    resp
}

/// Response body that yields one serialized event per frame as broadcasts
/// arrive. hyper writes each frame as its own chunk, so the inspector sees an
/// event the moment it is produced.
///
/// Holding the [`Subscription`] inside the body ties the registration to the
/// connection: when the client disconnects (or any write fails), hyper drops
/// the body, the subscription drops, and the hub slot is released. That is
/// the only teardown path, so it runs exactly once.
struct EventStream {
    subscription: Subscription,
}

impl EventStream {
    fn new(subscription: Subscription) -> Self {
        Self { subscription }
    }

    fn frame_for(event: &IOEvent) -> Option<Bytes> {
        match serde_json::to_vec(event) {
            Ok(mut line) => {
                line.push(b'\n');
                Some(Bytes::from(line))
            }
            Err(e) => {
                warn!(event = event.id, %e, "failed to serialize event, skipping");
                None
            }
        }
    }
}

impl Body for EventStream {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        loop {
            match this.subscription.poll_recv(cx) {
                Poll::Ready(Some(event)) => {
                    if let Some(line) = Self::frame_for(&event) {
                        return Poll::Ready(Some(Ok(Frame::data(line))));
                    }
                    // unserializable event: try the next one
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
