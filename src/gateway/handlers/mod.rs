//! HTTP handlers

pub mod admin;
pub mod health;
pub mod transfer;
pub mod wallet;

use axum::http::HeaderMap;

/// Client idempotency key from the X-Request-ID header.
pub(crate) fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_request_id_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id(&headers), None);

        headers.insert("x-request-id", HeaderValue::from_static("req-1"));
        assert_eq!(request_id(&headers), Some("req-1".to_string()));

        headers.insert("x-request-id", HeaderValue::from_static(""));
        assert_eq!(request_id(&headers), None);
    }
}
