//! Request body interception.
//!
//! The inbound body is a single-use stream. [`intercept`] copies up to a
//! byte ceiling of it into a pooled buffer and freezes the result, after
//! which the downstream handler and the telemetry path each get their own
//! reader over the same bytes. Bodies above the ceiling are truncated for
//! both readers; whatever was not read is left on the connection.

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use axum::http::request::Parts;
use axum::http::HeaderValue;
use bytes::{BufMut, Bytes};
use http_body_util::BodyExt;

use crate::buffer_pool::BufferPool;

/// Default byte ceiling on intercepted bodies (2 MiB).
pub const MAX_REQUEST_BODY_SIZE: usize = 2 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
#[error("error reading request body: {0}")]
pub struct BodyReadError(#[from] axum::Error);

/// A request body captured by [`intercept`].
#[derive(Debug, Clone)]
pub struct InterceptedBody {
    bytes: Bytes,
    truncated: bool,
}

impl InterceptedBody {
    /// A fresh, readable-from-the-start body for the downstream handler.
    #[must_use]
    pub fn downstream_body(&self) -> Body {
        Body::from(self.bytes.clone())
    }

    /// An independent copy for the telemetry path.
    #[must_use]
    pub fn telemetry_copy(&self) -> Bytes {
        self.bytes.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the original body was longer than the ceiling.
    #[must_use]
    pub const fn truncated(&self) -> bool {
        self.truncated
    }

    /// Rebuilds the request around the captured body.
    ///
    /// When the body was truncated, `Content-Length` is rewritten to match
    /// what the downstream handler will actually read.
    #[must_use]
    pub fn into_request(self, mut parts: Parts) -> Request {
        if self.truncated {
            parts.headers.remove(TRANSFER_ENCODING);
            parts
                .headers
                .insert(CONTENT_LENGTH, HeaderValue::from(self.bytes.len()));
        }
        Request::from_parts(parts, Body::from(self.bytes))
    }
}

/// Reads at most `ceiling` bytes of `body` using a buffer borrowed from `pool`.
///
/// Any read error other than end-of-stream aborts interception.
pub async fn intercept(
    mut body: Body,
    ceiling: usize,
    pool: &BufferPool,
) -> Result<InterceptedBody, BodyReadError> {
    let mut buf = pool.acquire();
    let mut truncated = false;

    while buf.len() < ceiling {
        let Some(frame) = body.frame().await else {
            break;
        };
        // Trailers carry no body bytes.
        let Ok(data) = frame?.into_data() else {
            continue;
        };
        let room = ceiling - buf.len();
        if data.len() > room {
            buf.put_slice(&data[..room]);
            truncated = true;
        } else {
            buf.put_slice(&data);
        }
    }

    // Filled exactly to the ceiling: only another data frame means more
    // bytes were sent. `is_end_stream` is not reliable for chunked bodies.
    if !truncated && buf.len() >= ceiling {
        truncated = has_more_data(&mut body).await?;
    }

    Ok(InterceptedBody {
        bytes: Bytes::copy_from_slice(&buf),
        truncated,
    })
}

async fn has_more_data(body: &mut Body) -> Result<bool, BodyReadError> {
    while let Some(frame) = body.frame().await {
        if let Ok(data) = frame?.into_data() {
            if !data.is_empty() {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use axum::body::HttpBody;
    use hyper::body::Frame;

    use super::*;

    /// Body yielding a fixed list of chunks, optionally failing afterwards.
    struct ChunkedBody {
        chunks: VecDeque<Bytes>,
        fail_at_end: bool,
    }

    impl HttpBody for ChunkedBody {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
            if let Some(chunk) = self.chunks.pop_front() {
                return Poll::Ready(Some(Ok(Frame::data(chunk))));
            }
            if self.fail_at_end {
                self.fail_at_end = false;
                return Poll::Ready(Some(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                ))));
            }
            Poll::Ready(None)
        }
    }

    fn chunked(chunks: &[&'static [u8]], fail_at_end: bool) -> Body {
        Body::new(ChunkedBody {
            chunks: chunks.iter().map(|c| Bytes::from_static(c)).collect(),
            fail_at_end,
        })
    }

    async fn read_all(body: Body) -> Bytes {
        body.collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn small_body_is_reproduced_exactly() {
        let pool = BufferPool::new(2, 16, 1024);
        let intercepted = intercept(Body::from("hello world"), 1024, &pool)
            .await
            .unwrap();

        assert!(!intercepted.truncated());
        assert_eq!(read_all(intercepted.downstream_body()).await, "hello world");
        assert_eq!(intercepted.telemetry_copy(), "hello world");
    }

    #[tokio::test]
    async fn copies_are_independently_readable() {
        let pool = BufferPool::new(2, 16, 1024);
        let intercepted = intercept(Body::from("payload"), 1024, &pool).await.unwrap();

        let first = read_all(intercepted.downstream_body()).await;
        let second = read_all(intercepted.downstream_body()).await;
        assert_eq!(first, second);
        assert_eq!(intercepted.telemetry_copy(), first);
    }

    #[tokio::test]
    async fn multi_frame_body_is_concatenated() {
        let pool = BufferPool::new(2, 16, 1024);
        let body = chunked(&[b"abc", b"def", b"ghi"], false);
        let intercepted = intercept(body, 1024, &pool).await.unwrap();
        assert_eq!(intercepted.telemetry_copy(), "abcdefghi");
    }

    #[tokio::test]
    async fn oversized_body_is_truncated_to_ceiling() {
        let pool = BufferPool::new(2, 16, 1024);
        let body = chunked(&[b"abcd", b"efgh", b"ijkl"], false);
        let intercepted = intercept(body, 6, &pool).await.unwrap();

        assert!(intercepted.truncated());
        assert_eq!(intercepted.len(), 6);
        assert_eq!(intercepted.telemetry_copy(), "abcdef");
        assert_eq!(read_all(intercepted.downstream_body()).await, "abcdef");
    }

    #[tokio::test]
    async fn body_of_exactly_the_ceiling_is_complete() {
        let pool = BufferPool::new(2, 16, 1024);
        let body = chunked(&[b"abc", b"def"], false);
        let intercepted = intercept(body, 6, &pool).await.unwrap();

        assert!(!intercepted.truncated());
        assert_eq!(intercepted.telemetry_copy(), "abcdef");
    }

    #[tokio::test]
    async fn chunked_body_at_the_ceiling_keeps_its_framing() {
        let pool = BufferPool::new(2, 16, 1024);
        let request = Request::builder()
            .header(TRANSFER_ENCODING, "chunked")
            .body(chunked(&[b"hello"], false))
            .unwrap();
        let (parts, body) = request.into_parts();

        let request = intercept(body, 5, &pool).await.unwrap().into_request(parts);

        assert_eq!(request.headers()[TRANSFER_ENCODING], "chunked");
        assert!(request.headers().get(CONTENT_LENGTH).is_none());
    }

    #[tokio::test]
    async fn stops_reading_at_ceiling() {
        let pool = BufferPool::new(2, 16, 1024);
        // The failure after the ceiling is never observed.
        let body = chunked(&[b"abcd", b"efgh"], true);
        let intercepted = intercept(body, 4, &pool).await.unwrap();
        assert!(intercepted.truncated());
        assert_eq!(intercepted.telemetry_copy(), "abcd");
    }

    #[tokio::test]
    async fn read_error_aborts_interception() {
        let pool = BufferPool::new(2, 16, 1024);
        let body = chunked(&[b"abc"], true);
        assert!(intercept(body, 1024, &pool).await.is_err());
    }

    #[tokio::test]
    async fn buffer_is_returned_after_interception() {
        let pool = BufferPool::new(2, 16, 1024);
        let _ = intercept(Body::from("abc"), 1024, &pool).await.unwrap();
        assert_eq!(pool.available(), 1);

        let body = chunked(&[b"abc"], true);
        let _ = intercept(body, 1024, &pool).await;
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn truncated_request_gets_matching_content_length() {
        let pool = BufferPool::new(2, 16, 1024);
        let request = Request::builder()
            .header(CONTENT_LENGTH, "11")
            .body(Body::from("hello world"))
            .unwrap();
        let (parts, body) = request.into_parts();

        let intercepted = intercept(body, 5, &pool).await.unwrap();
        let request = intercepted.into_request(parts);

        assert_eq!(request.headers()[CONTENT_LENGTH], "5");
        assert_eq!(read_all(request.into_body()).await, "hello");
    }
}
