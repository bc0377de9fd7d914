//! Sub-request counting.
//!
//! A request counts as one logical unit of work unless it is a JSON array,
//! in which case every element counts once.

use axum::http::HeaderValue;
use serde::de::IgnoredAny;

/// Content type whose bodies may carry a batch of sub-requests.
pub const BATCH_CONTENT_TYPE: &str = "application/json";

/// Count reported for JSON bodies that do not decode as an array.
pub const UNDECODABLE_BATCH_COUNT: u64 = 1;

/// Counts the logical sub-requests carried by `body`.
///
/// Non-JSON requests count as 1 and the body is never inspected. For JSON
/// the first value in the body is decoded as a sequence of opaque elements;
/// anything that is not an array falls back to [`UNDECODABLE_BATCH_COUNT`].
#[must_use]
pub fn count_sub_requests(content_type: Option<&HeaderValue>, body: &[u8]) -> u64 {
    if !is_batch_content_type(content_type) {
        return 1;
    }

    let mut values = serde_json::Deserializer::from_slice(body).into_iter::<Vec<IgnoredAny>>();
    match values.next() {
        Some(Ok(items)) => items.len() as u64,
        _ => UNDECODABLE_BATCH_COUNT,
    }
}

fn is_batch_content_type(content_type: Option<&HeaderValue>) -> bool {
    content_type
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(BATCH_CONTENT_TYPE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json() -> HeaderValue {
        HeaderValue::from_static("application/json")
    }

    #[test]
    fn counts_array_elements() {
        let body = br#"[{"a":1},{"b":2},{"c":3}]"#;
        assert_eq!(count_sub_requests(Some(&json()), body), 3);
    }

    #[test]
    fn non_json_counts_one() {
        let text = HeaderValue::from_static("text/plain");
        assert_eq!(count_sub_requests(Some(&text), br#"[1,2,3]"#), 1);
    }

    #[test]
    fn missing_content_type_counts_one() {
        assert_eq!(count_sub_requests(None, br#"[1,2,3]"#), 1);
    }

    #[test]
    fn object_body_falls_back() {
        assert_eq!(
            count_sub_requests(Some(&json()), br#"{"a":1}"#),
            UNDECODABLE_BATCH_COUNT
        );
    }

    #[test]
    fn malformed_body_falls_back() {
        assert_eq!(
            count_sub_requests(Some(&json()), br#"[{"a":1},"#),
            UNDECODABLE_BATCH_COUNT
        );
        assert_eq!(count_sub_requests(Some(&json()), b""), UNDECODABLE_BATCH_COUNT);
    }

    #[test]
    fn empty_array_counts_zero() {
        assert_eq!(count_sub_requests(Some(&json()), b"[]"), 0);
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        let ct = HeaderValue::from_static("Application/JSON; charset=utf-8");
        assert_eq!(count_sub_requests(Some(&ct), b"[1,2]"), 2);
    }

    #[test]
    fn trailing_data_after_first_value_is_ignored() {
        assert_eq!(count_sub_requests(Some(&json()), b"[1,2] [3]"), 2);
    }
}
