//! Delivery of encoded telemetry payloads to a remote collector.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode, Uri};
use bytes::Bytes;
use http_body_util::Full;

use crate::error::CrossoverError;
use crate::outbound::{self, ExchangeError};
use crate::server::HttpClient;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to build request: {0}")]
    Request(#[from] axum::http::Error),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("unexpected status code: {status}, body: {body}")]
    Status { status: StatusCode, body: String },
}

// async_trait: the aggregator holds collectors as Arc<dyn Collector>.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Sends one encoded JSON payload. Any error means the payload is lost.
    async fn deliver(&self, payload: Bytes) -> Result<(), DeliveryError>;
}

/// POSTs payloads as JSON with the `X-Api-Key` header.
#[derive(Clone)]
pub struct HttpCollector {
    client: HttpClient,
    uri: Uri,
    api_key: HeaderValue,
    timeout: Duration,
}

impl HttpCollector {
    pub fn new(
        client: HttpClient,
        remote_address: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, CrossoverError> {
        if remote_address.is_empty() {
            return Err(CrossoverError::MissingField {
                field: "remote_address",
            });
        }
        if api_key.is_empty() {
            return Err(CrossoverError::MissingField { field: "api_key" });
        }
        let uri = remote_address
            .parse::<Uri>()
            .map_err(|e| CrossoverError::UriParse {
                source: Box::new(e),
            })?;
        let mut api_key = HeaderValue::from_str(api_key)?;
        api_key.set_sensitive(true);

        Ok(Self {
            client,
            uri,
            api_key,
            timeout,
        })
    }

    #[must_use]
    pub const fn uri(&self) -> &Uri {
        &self.uri
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn deliver(&self, payload: Bytes) -> Result<(), DeliveryError> {
        let req = hyper::Request::post(self.uri.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(API_KEY_HEADER, self.api_key.clone())
            .body(Full::new(payload))?;

        let response = outbound::exchange(&self.client, req, self.timeout).await?;
        if response.status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            })
        }
    }
}
