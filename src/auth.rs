//! Bearer-token gate for the blob API.
//!
//! The portal sits behind an identity provider; this service only checks
//! that callers present one of the configured API tokens in an
//! `Authorization: Bearer <token>` header.  Tokens are compared in constant
//! time so response timing does not leak how much of a token matched.

use axum::http::{HeaderMap, Method};
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;

/// Paths reachable without a token.
pub const AUTH_SKIP_PATHS: &[&str] = &["/health", "/metrics", "/openapi.json"];

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively; an empty token counts as absent.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Constant-time string equality.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Whether the request may proceed.
///
/// Every configured token is compared so the check takes the same time
/// whichever one matches.
pub fn is_authorized(config: &AuthConfig, method: &Method, path: &str, headers: &HeaderMap) -> bool {
    if !config.enabled || *method == Method::OPTIONS || AUTH_SKIP_PATHS.contains(&path) {
        return true;
    }
    let Some(presented) = bearer_token(headers) else {
        return false;
    };
    config
        .tokens
        .iter()
        .fold(false, |found, token| constant_time_eq(presented, token) | found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_str(auth).unwrap());
        headers
    }

    fn enabled(tokens: &[&str]) -> AuthConfig {
        AuthConfig {
            enabled: true,
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&headers("Bearer abc123")), Some("abc123"));
        assert_eq!(bearer_token(&headers("bearer  abc123 ")), Some("abc123"));
        assert_eq!(bearer_token(&headers("Basic dXNlcjpwYXNz")), None);
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secreT"));
        assert!(!constant_time_eq("secret", "secret-longer"));
        assert!(!constant_time_eq("", "x"));
    }

    #[test]
    fn test_disabled_auth_allows_everything() {
        let config = AuthConfig::default();
        assert!(is_authorized(&config, &Method::GET, "/blobs", &HeaderMap::new()));
    }

    #[test]
    fn test_enabled_auth_requires_known_token() {
        let config = enabled(&["one", "two"]);
        assert!(is_authorized(&config, &Method::GET, "/blobs", &headers("Bearer two")));
        assert!(!is_authorized(&config, &Method::GET, "/blobs", &headers("Bearer three")));
        assert!(!is_authorized(&config, &Method::DELETE, "/blobs/a", &HeaderMap::new()));
    }

    #[test]
    fn test_skip_paths_and_preflight() {
        let config = enabled(&["one"]);
        for path in AUTH_SKIP_PATHS {
            assert!(is_authorized(&config, &Method::GET, path, &HeaderMap::new()));
        }
        assert!(is_authorized(&config, &Method::OPTIONS, "/blobs", &HeaderMap::new()));
    }
}
