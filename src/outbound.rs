//! Bounded request/response exchange over the shared HTTP client.
//!
//! Every outbound call (upstream forwarding, collector delivery, plan-limit
//! lookups) goes through [`exchange`], which applies one timeout to the
//! whole round trip including reading the response body.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{HeaderMap, StatusCode};

use crate::server::HttpClient;

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("transport error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("body read error: {0}")]
    Body(#[from] hyper::Error),

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
}

#[derive(Debug)]
pub struct Exchanged {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub async fn exchange(
    client: &HttpClient,
    req: hyper::Request<Full<Bytes>>,
    timeout: Duration,
) -> Result<Exchanged, ExchangeError> {
    let round_trip = async {
        let response = client.request(req).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await?.to_bytes();
        Ok(Exchanged {
            status,
            headers,
            body,
        })
    };

    tokio::time::timeout(timeout, round_trip)
        .await
        .map_err(|_| ExchangeError::Timeout(timeout))?
}
