//! Plan-limit lookups against the remote subscription service.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode, Uri};
use bytes::Bytes;
use http_body_util::Full;
use serde::Deserialize;

use crate::error::CrossoverError;
use crate::outbound::{self, ExchangeError};
use crate::server::HttpClient;
use crate::telemetry::collector::API_KEY_HEADER;

/// Placeholder substituted with the user id in the plan-limit URL.
pub const USER_ID_PLACEHOLDER: &str = ":userId";

#[derive(Debug, thiserror::Error)]
pub enum PlanLimitError {
    #[error("invalid plan limit URL '{url}': {source}")]
    Url {
        url: String,
        #[source]
        source: axum::http::uri::InvalidUri,
    },

    #[error("failed to build request: {0}")]
    Request(#[from] axum::http::Error),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("unexpected status code: {0}")]
    Status(StatusCode),

    #[error("malformed plan limit response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct PlanLimitResponse {
    data: PlanLimitData,
}

#[derive(Debug, Deserialize)]
struct PlanLimitData {
    request_limit: i64,
}

// async_trait: the rate limiter holds sources as Arc<dyn PlanLimitSource>.
#[async_trait]
pub trait PlanLimitSource: Send + Sync {
    async fn fetch_plan_limit(&self, user_id: &str) -> Result<i64, PlanLimitError>;
}

/// Fetches `{"data": {"request_limit": N}}` from a templated URL.
pub struct HttpPlanLimitSource {
    client: HttpClient,
    url_template: String,
    api_key: HeaderValue,
    timeout: Duration,
}

impl HttpPlanLimitSource {
    pub fn new(
        client: HttpClient,
        url_template: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, CrossoverError> {
        if url_template.is_empty() {
            return Err(CrossoverError::MissingField {
                field: "plan_limit_url",
            });
        }
        if api_key.is_empty() {
            return Err(CrossoverError::MissingField { field: "api_key" });
        }
        let mut api_key = HeaderValue::from_str(api_key)?;
        api_key.set_sensitive(true);

        Ok(Self {
            client,
            url_template: url_template.to_string(),
            api_key,
            timeout,
        })
    }

    /// Resolves the lookup URL for `user_id`.
    pub fn url_for(&self, user_id: &str) -> Result<Uri, PlanLimitError> {
        let url = self.url_template.replacen(USER_ID_PLACEHOLDER, user_id, 1);
        url.parse::<Uri>()
            .map_err(|source| PlanLimitError::Url { url, source })
    }
}

#[async_trait]
impl PlanLimitSource for HttpPlanLimitSource {
    async fn fetch_plan_limit(&self, user_id: &str) -> Result<i64, PlanLimitError> {
        let req = hyper::Request::get(self.url_for(user_id)?)
            .header(CONTENT_TYPE, "application/json")
            .header(API_KEY_HEADER, self.api_key.clone())
            .body(Full::new(Bytes::new()))?;

        let response = outbound::exchange(&self.client, req, self.timeout).await?;
        if !response.status.is_success() {
            return Err(PlanLimitError::Status(response.status));
        }

        let parsed: PlanLimitResponse = serde_json::from_slice(&response.body)?;
        Ok(parsed.data.request_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::build_http_client;

    fn source(template: &str) -> HttpPlanLimitSource {
        HttpPlanLimitSource::new(
            build_http_client(),
            template,
            "secret",
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn substitutes_user_id_once() {
        let source = source("http://subs:8083/api/v1/subscriptions/:userId/request-limit");
        assert_eq!(
            source.url_for("42").unwrap().to_string(),
            "http://subs:8083/api/v1/subscriptions/42/request-limit"
        );
    }

    #[tokio::test]
    async fn empty_template_is_rejected() {
        let result = HttpPlanLimitSource::new(build_http_client(), "", "k", Duration::from_secs(1));
        assert!(matches!(
            result,
            Err(CrossoverError::MissingField {
                field: "plan_limit_url"
            })
        ));
    }

    #[test]
    fn decodes_plan_limit_response() {
        let parsed: PlanLimitResponse =
            serde_json::from_str(r#"{"data": {"request_limit": 250, "plan": "pro"}}"#).unwrap();
        assert_eq!(parsed.data.request_limit, 250);
    }
}
