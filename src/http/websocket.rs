//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests
//! - Replay the upgrade handshake against the upstream
//! - Relay bytes in both directions once both sides switched protocols
//!
//! # Data Flow
//! ```text
//! Client ←──── raw bytes ────→ Proxy ←──── raw bytes ────→ Backend
//! ```
//!
//! # Design Decisions
//! - No frame parsing: the upstream answers the handshake and both upgraded
//!   streams are joined with `copy_bidirectional`
//! - A non-101 upstream answer is relayed as an ordinary response
//! - Each relay counts as a live connection and ends on force-close

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, Response, StatusCode};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;

use crate::error::{ProxyError, Result};
use crate::events::{EventBus, ProxyEvent};
use crate::http::forwarder::Forwarder;
use crate::http::request::{self, ClientContext};
use crate::http::response;
use crate::net::connection::{self, ConnectionGuard, DrainPhase};
use crate::routing::{Route, RouteId};
use crate::security::headers::connection_has_token;

/// `Upgrade: websocket` together with `Connection: upgrade`.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').any(|p| p.trim().eq_ignore_ascii_case("websocket")))
        .unwrap_or(false);
    upgrade && connection_has_token(headers, "upgrade")
}

pub(crate) async fn forward(
    forwarder: &Forwarder,
    route: Arc<Route>,
    mut request: Request<Body>,
    ctx: &ClientContext,
) -> Result<Response<Body>> {
    if !route.options.websocket_upgrade {
        return Err(ProxyError::ProtocolViolation {
            route: route.id,
            reason: "websocket upgrade is not enabled for this route".to_string(),
        });
    }

    let client_upgrade = request
        .extensions_mut()
        .remove::<OnUpgrade>()
        .ok_or_else(|| ProxyError::ProtocolViolation {
            route: route.id,
            reason: "connection cannot be upgraded".to_string(),
        })?;

    let started = Instant::now();
    let upstream = request::upstream_request(&route, request, ctx, forwarder.config().xfwd, true)?;
    let mut upstream_response = forwarder.send(&route, upstream).await?;

    if upstream_response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Ok(response::relay(
            upstream_response,
            &route,
            started + route.options.proxy_timeout(),
        ));
    }

    let upstream_upgrade = hyper::upgrade::on(&mut upstream_response);
    let session = Session {
        request_id: ctx.request_id.clone(),
        route: route.id,
        events: forwarder.events().clone(),
        _guard: forwarder.tracker().track(),
    };
    forwarder.events().publish(ProxyEvent::WebSocketOpened {
        request_id: ctx.request_id.clone(),
        route: route.id,
        target: route.target.to_string(),
    });

    let phase = forwarder.tracker().subscribe();
    tokio::spawn(relay(client_upgrade, upstream_upgrade, session, phase));

    let (parts, _) = upstream_response.into_parts();
    Ok(Response::from_parts(parts, Body::empty()))
}

struct Session {
    request_id: String,
    route: RouteId,
    events: EventBus,
    _guard: ConnectionGuard,
}

async fn relay(
    client: OnUpgrade,
    upstream: OnUpgrade,
    session: Session,
    phase: tokio::sync::watch::Receiver<DrainPhase>,
) {
    let from_client = Arc::new(AtomicU64::new(0));
    let from_upstream = Arc::new(AtomicU64::new(0));

    let pump = async {
        let (client, upstream) = tokio::try_join!(client, upstream).map_err(|e| e.to_string())?;
        let mut client = CountingIo::new(TokioIo::new(client), Arc::clone(&from_client));
        let mut upstream = CountingIo::new(TokioIo::new(upstream), Arc::clone(&from_upstream));
        tokio::io::copy_bidirectional(&mut client, &mut upstream)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    };

    let error = tokio::select! {
        result = pump => result.err(),
        _ = connection::closing(phase) => Some("closed by proxy shutdown".to_string()),
    };

    session.events.publish(ProxyEvent::WebSocketClosed {
        request_id: session.request_id.clone(),
        route: session.route,
        client_to_upstream: from_client.load(Ordering::Relaxed),
        upstream_to_client: from_upstream.load(Ordering::Relaxed),
        error,
    });
}

/// Counts bytes read from the wrapped stream. The count survives the relay
/// being cancelled part way through.
struct CountingIo<T> {
    inner: T,
    read: Arc<AtomicU64>,
}

impl<T> CountingIo<T> {
    fn new(inner: T, read: Arc<AtomicU64>) -> Self {
        Self { inner, read }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for CountingIo<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            let n = (buf.filled().len() - before) as u64;
            self.read.fetch_add(n, Ordering::Relaxed);
        }
        poll
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for CountingIo<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn detects_upgrade() {
        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(is_upgrade_request(&headers));

        headers.remove(header::CONNECTION);
        assert!(!is_upgrade_request(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
        assert!(!is_upgrade_request(&headers));
    }

    #[tokio::test]
    async fn counting_io_keeps_bytes_read() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut near, far) = tokio::io::duplex(64);
        let count = Arc::new(AtomicU64::new(0));
        let mut counted = CountingIo::new(far, Arc::clone(&count));

        near.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let n = counted.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        counted.write_all(b"ignored").await.unwrap();
        drop(counted);
        assert_eq!(count.load(Ordering::Relaxed), 5);
    }
}
