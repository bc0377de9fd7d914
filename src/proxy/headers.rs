//! Header rewriting for requests forwarded to the upstream.
//!
//! [`build_forwarded_headers`] starts from the client's headers (or none,
//! when forwarding is off), drops hop-by-hop headers, points `Host` at the
//! upstream, appends the `X-Forwarded-*` chain, `Via` and the correlation
//! id, then applies the static `defaults.headers` rules.

use axum::http::header::{CONNECTION, HOST, TE, TRAILER, TRANSFER_ENCODING, UPGRADE, VIA};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Uri};

use crate::config::model::Defaults;

pub const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");
const PROXY_AUTHORIZATION: HeaderName = HeaderName::from_static("proxy-authorization");
const PROXY_AUTHENTICATE: HeaderName = HeaderName::from_static("proxy-authenticate");

const VIA_VALUE: &str = "1.1 crossover";

const HOP_BY_HOP: [HeaderName; 8] = [
    CONNECTION,
    KEEP_ALIVE,
    TRANSFER_ENCODING,
    TE,
    TRAILER,
    UPGRADE,
    PROXY_AUTHORIZATION,
    PROXY_AUTHENTICATE,
];

fn remove_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Drops hop-by-hop headers and `content-length` from an upstream response
/// whose body has already been collected.
pub fn strip_response_hop_by_hop(headers: &mut HeaderMap) {
    remove_hop_by_hop(headers);
    headers.remove(axum::http::header::CONTENT_LENGTH);
}

pub fn build_forwarded_headers(
    original: &HeaderMap,
    client_ip: &str,
    target: &Uri,
    defaults: &Defaults,
    correlation_id: &str,
) -> HeaderMap {
    let mut headers = if defaults.forward_headers {
        original.clone()
    } else {
        HeaderMap::new()
    };

    if defaults.strip_hop_by_hop {
        remove_hop_by_hop(&mut headers);
    }

    if let Some(authority) = target.authority() {
        if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
            headers.insert(HOST, value);
        }
    }

    if defaults.proxy_headers {
        add_proxy_headers(&mut headers, original, client_ip, target, correlation_id);
    }

    for (key, value) in &defaults.headers.add {
        match (key.parse::<HeaderName>(), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %key, "skipping invalid header in defaults.headers.add"),
        }
    }
    for key in &defaults.headers.strip {
        if let Ok(name) = key.parse::<HeaderName>() {
            headers.remove(name);
        }
    }

    headers
}

fn add_proxy_headers(
    headers: &mut HeaderMap,
    original: &HeaderMap,
    client_ip: &str,
    target: &Uri,
    correlation_id: &str,
) {
    let chain = original
        .get(&X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .map_or_else(
            || client_ip.to_string(),
            |existing| format!("{existing}, {client_ip}"),
        );
    let real_ip = chain.split(',').next().unwrap_or(client_ip).trim();
    if let Ok(value) = HeaderValue::from_str(real_ip) {
        headers.insert(X_REAL_IP, value);
    }
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    let proto = if target.scheme_str() == Some("https") {
        "https"
    } else {
        "http"
    };
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));

    if let Some(host) = original.get(HOST) {
        headers.insert(X_FORWARDED_HOST, host.clone());
    }

    headers.insert(VIA, HeaderValue::from_static(VIA_VALUE));

    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        headers.insert(CORRELATION_ID_HEADER, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Uri {
        "http://backend:9090/v1/rpc".parse().unwrap()
    }

    fn forward(original: &HeaderMap, defaults: &Defaults) -> HeaderMap {
        build_forwarded_headers(original, "10.0.0.1", &target(), defaults, "corr-1")
    }

    #[test]
    fn strips_hop_by_hop_and_keeps_the_rest() {
        let mut original = HeaderMap::new();
        original.insert(CONNECTION, "keep-alive".parse().unwrap());
        original.insert(TRANSFER_ENCODING, "chunked".parse().unwrap());
        original.insert("content-type", "application/json".parse().unwrap());

        let result = forward(&original, &Defaults::default());

        assert!(result.get(CONNECTION).is_none());
        assert!(result.get(TRANSFER_ENCODING).is_none());
        assert_eq!(result.get("content-type").unwrap(), "application/json");
    }

    #[test]
    fn host_points_at_upstream_and_original_is_kept() {
        let mut original = HeaderMap::new();
        original.insert(HOST, "api.example.com".parse().unwrap());

        let result = forward(&original, &Defaults::default());

        assert_eq!(result.get(HOST).unwrap(), "backend:9090");
        assert_eq!(result.get("x-forwarded-host").unwrap(), "api.example.com");
    }

    #[test]
    fn forwarded_for_chain_is_appended() {
        let mut original = HeaderMap::new();
        original.insert("x-forwarded-for", "1.2.3.4".parse().unwrap());

        let result = forward(&original, &Defaults::default());

        assert_eq!(result.get("x-forwarded-for").unwrap(), "1.2.3.4, 10.0.0.1");
        assert_eq!(result.get("x-real-ip").unwrap(), "1.2.3.4");
        assert_eq!(result.get(VIA).unwrap(), "1.1 crossover");
        assert_eq!(result.get("x-correlation-id").unwrap(), "corr-1");
    }

    #[test]
    fn proxy_headers_can_be_disabled() {
        let defaults = Defaults {
            proxy_headers: false,
            ..Defaults::default()
        };
        let result = forward(&HeaderMap::new(), &defaults);
        assert!(result.get("x-forwarded-for").is_none());
        assert!(result.get(VIA).is_none());
    }

    #[test]
    fn static_rules_add_and_strip() {
        let mut original = HeaderMap::new();
        original.insert("cookie", "session=1".parse().unwrap());
        let mut defaults = Defaults::default();
        defaults.headers.add.insert("x-env".into(), "prod".into());
        defaults.headers.strip.push("cookie".into());

        let result = forward(&original, &defaults);

        assert_eq!(result.get("x-env").unwrap(), "prod");
        assert!(result.get("cookie").is_none());
    }

    #[test]
    fn response_loses_length_and_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, "chunked".parse().unwrap());
        headers.insert("content-length", "12".parse().unwrap());
        headers.insert("etag", "\"abc\"".parse().unwrap());

        strip_response_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.get("etag").is_some());
    }
}
