//! API-key authentication for both HTTP surfaces.
//!
//! The public surface takes `Authorization: Bearer <key>`; the internal
//! worker surface takes `X-Worker-Key`. Keys are compared through SHA-256
//! digests so the comparison cost never depends on secret content.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use crate::error::ApiError;

pub const WORKER_KEY_HEADER: &str = "x-worker-key";

/// Digest-equality comparison; both sides are trimmed first.
pub fn keys_match(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.trim().as_bytes()) == Sha256::digest(expected.trim().as_bytes())
}

pub fn require_bearer(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("missing Authorization bearer token"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("invalid Authorization header encoding"))?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("Authorization header must be a Bearer token"))?;
    if !keys_match(token, expected) {
        return Err(ApiError::unauthorized("invalid API key"));
    }
    Ok(())
}

pub fn require_worker_key(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let value = headers
        .get(WORKER_KEY_HEADER)
        .ok_or_else(|| ApiError::unauthorized("missing X-Worker-Key header"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("invalid X-Worker-Key header encoding"))?;
    if !keys_match(value, expected) {
        return Err(ApiError::unauthorized("invalid worker key"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    #[test]
    fn key_comparison_trims_whitespace() {
        assert!(keys_match("secret", "secret"));
        assert!(keys_match(" secret ", "secret"));
        assert!(!keys_match("secrets", "secret"));
    }

    #[test]
    fn bearer_header_is_parsed_strictly() {
        let mut headers = HeaderMap::new();
        assert!(require_bearer(&headers, "k").is_err());

        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert!(require_bearer(&headers, "k").is_err());

        headers.insert(AUTHORIZATION, "Bearer k".parse().unwrap());
        assert!(require_bearer(&headers, "k").is_ok());

        headers.insert(AUTHORIZATION, "Bearer wrong".parse().unwrap());
        assert!(require_bearer(&headers, "k").is_err());
    }

    #[test]
    fn worker_key_header_is_checked() {
        let mut headers = HeaderMap::new();
        assert!(require_worker_key(&headers, "wk").is_err());
        headers.insert(WORKER_KEY_HEADER, " wk ".parse().unwrap());
        assert!(require_worker_key(&headers, "wk").is_ok());
    }
}
