//! Response handling and transformation.
//!
//! # Responsibilities
//! - Transform the upstream response for the client
//! - Stream the body without buffering, bounded by the exchange deadline
//!
//! # Design Decisions
//! - Hop-by-hop headers stripped automatically
//! - A deadline that expires mid-body aborts the stream; the client sees a
//!   truncated response and a closed connection, never a second status line

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::Response;
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use tokio::time::{Instant, Sleep};

use crate::error::{ProxyError, TimeoutStage};
use crate::routing::Route;
use crate::security::headers;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body wrapper that fails once `deadline` passes.
pub struct DeadlineBody<B> {
    inner: B,
    sleep: Pin<Box<Sleep>>,
    route: crate::routing::RouteId,
    target: String,
    expired: bool,
}

impl<B> DeadlineBody<B> {
    pub fn new(inner: B, deadline: Instant, route: &Route) -> Self {
        Self {
            inner,
            sleep: Box::pin(tokio::time::sleep_until(deadline)),
            route: route.id,
            target: route.target.to_string(),
            expired: false,
        }
    }
}

impl<B> HttpBody for DeadlineBody<B>
where
    B: HttpBody<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        if this.expired {
            return Poll::Ready(None);
        }
        if this.sleep.as_mut().poll(cx).is_ready() {
            this.expired = true;
            return Poll::Ready(Some(Err(Box::new(ProxyError::UpstreamTimeout {
                route: this.route,
                target: this.target.clone(),
                stage: TimeoutStage::Exchange,
            }))));
        }
        Pin::new(&mut this.inner)
            .poll_frame(cx)
            .map(|frame| frame.map(|result| result.map_err(Into::into)))
    }

    fn is_end_stream(&self) -> bool {
        self.expired || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Turn an upstream response into the client response: hop-by-hop headers
/// removed, body streamed under the exchange deadline.
pub fn relay<B>(response: Response<B>, route: &Route, deadline: Instant) -> Response<Body>
where
    B: HttpBody<Data = Bytes> + Unpin + Send + 'static,
    B::Error: Into<BoxError>,
{
    let (mut parts, body) = response.into_parts();
    headers::strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(DeadlineBody::new(body, deadline, route)))
}
