//! Upstream forwarding.
//!
//! [`forward_handler`] is the fallback behind the middleware: it relays
//! every non-`/health` request to the configured upstream and streams the
//! collected response back. Header construction lives in [`headers`].

pub mod headers;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use http_body_util::Full;

use crate::outbound;
use crate::server::AppState;
use headers::CORRELATION_ID_HEADER;

/// Joins the upstream base URL with the request's path and query.
pub fn upstream_uri(base: &str, uri: &Uri) -> Result<Uri, axum::http::uri::InvalidUri> {
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    format!("{}{}", base.trim_end_matches('/'), path_and_query).parse()
}

pub async fn forward_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let correlation_id = parts
        .headers
        .get(&CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);
    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |ConnectInfo(addr)| addr.ip().to_string());

    let config = Arc::clone(&state.config.config);

    let target = match upstream_uri(&config.upstream.url, &parts.uri) {
        Ok(target) => target,
        Err(e) => {
            tracing::error!(correlation_id = %correlation_id, error = %e, "invalid upstream uri");
            state.stats.failed.fetch_add(1, Ordering::Relaxed);
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(correlation_id = %correlation_id, error = %e, "failed to read request body");
            return (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
        }
    };

    tracing::info!(
        correlation_id = %correlation_id,
        method = %parts.method,
        path = %parts.uri.path(),
        body_len = body.len(),
        "forwarding request"
    );

    let mut outbound_req = hyper::Request::new(Full::new(body));
    *outbound_req.method_mut() = parts.method.clone();
    *outbound_req.uri_mut() = target.clone();
    *outbound_req.headers_mut() = headers::build_forwarded_headers(
        &parts.headers,
        &client_ip,
        &target,
        &config.defaults,
        &correlation_id,
    );

    let timeout = Duration::from_millis(config.upstream.timeout);
    match outbound::exchange(&state.http_client, outbound_req, timeout).await {
        Ok(exchanged) => {
            state.stats.forwarded.fetch_add(1, Ordering::Relaxed);
            let mut resp_headers = exchanged.headers;
            headers::strip_response_hop_by_hop(&mut resp_headers);

            let mut response = Response::new(Body::from(exchanged.body));
            *response.status_mut() = exchanged.status;
            *response.headers_mut() = resp_headers;
            if let Ok(value) = correlation_id.parse() {
                response.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
            response
        }
        Err(e) => {
            tracing::error!(
                correlation_id = %correlation_id,
                upstream = %target,
                error = %e,
                "upstream request failed"
            );
            state.stats.failed.fetch_add(1, Ordering::Relaxed);
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_uri_keeps_path_and_query() {
        let uri: Uri = "/v1/abc?x=1".parse().unwrap();
        let target = upstream_uri("http://backend:8080/", &uri).unwrap();
        assert_eq!(target, "http://backend:8080/v1/abc?x=1");
    }

    #[test]
    fn upstream_uri_appends_to_base_path() {
        let uri: Uri = "/rpc".parse().unwrap();
        let target = upstream_uri("http://backend/api", &uri).unwrap();
        assert_eq!(target, "http://backend/api/rpc");
    }
}
