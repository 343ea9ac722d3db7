//! Streaming adapter for the live feeds.
//!
//! A feed body is a sequence of `<json>\r\n` frames. The first frames are a
//! snapshot supplied by the handler; after that every message delivered to
//! the subscription is forwarded as it arrives, with a bare `\r\n` keepalive
//! whenever a second passes without one. The body ends when the subscription
//! is terminated. When the client disconnects the body is dropped, taking the
//! subscription and its registry entry with it.

use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::registry::{Delivery, ScopedSubscription};
use crate::errors::Result;

/// Silence after which a keepalive is written.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

pub const KEEPALIVE: &[u8] = b"\r\n";

/// Encode one message as a frame.
pub fn frame<T: Serialize>(message: &T) -> Result<Bytes> {
    let mut buffer = BytesMut::new().writer();
    serde_json::to_writer(&mut buffer, message)?;
    let mut buffer = buffer.into_inner();
    buffer.put_slice(KEEPALIVE);
    Ok(buffer.freeze())
}

/// Frames for `initial`, then live messages from `subscription` with keepalives.
pub fn feed<M>(
    initial: Vec<M>,
    mut subscription: ScopedSubscription<M>,
) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static
where
    M: Serialize + Send + 'static,
{
    stream! {
        for message in initial {
            match frame(&message) {
                Ok(bytes) => yield Ok(bytes),
                Err(e) => {
                    warn!(error = %e, "Failed to encode snapshot frame, closing feed");
                    return;
                }
            }
        }

        loop {
            match tokio::time::timeout(KEEPALIVE_INTERVAL, subscription.recv()).await {
                Err(_) => yield Ok(Bytes::from_static(KEEPALIVE)),
                Ok(Delivery::Update(message)) => match frame(&message) {
                    Ok(bytes) => yield Ok(bytes),
                    Err(e) => {
                        warn!(
                            subscription_id = %subscription.id(),
                            error = %e,
                            "Failed to encode update, closing feed"
                        );
                        break;
                    }
                },
                Ok(Delivery::Terminated) => {
                    debug!(subscription_id = %subscription.id(), "Subscription terminated, closing feed");
                    break;
                }
            }
        }
    }
}

/// Wrap a feed into a chunked event-stream response.
pub fn event_stream_response<S>(body: S) -> Response
where
    S: Stream<Item = std::result::Result<Bytes, Infallible>> + Send + 'static,
{
    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}
