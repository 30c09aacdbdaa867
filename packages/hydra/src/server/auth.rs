//! Token authentication middleware.
//!
//! Callers present a domain token as `Authorization: Bearer`, `x-api-key`,
//! or `?token=`. The SHA-256 hash of the token resolves to a domain through
//! a short-lived coordination-store cache backed by the domains table. The
//! resolved [`AuthContext`] lands in request extensions.
//!
//! An optional admin token bypasses domain lookup and may target any domain
//! via `?domain=`. `OPTIONS`, `/health`, and `/events/stream` pass without
//! enforcement (with best-effort context when a token is present).

use anyhow::Result;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::common::hash_token;
use crate::models::Domain;

use super::app::AppState;
use super::error::ApiError;

/// Authenticated caller identity attached to each request.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub domain: String,
    pub is_admin: bool,
    pub token_hash: Option<String>,
}

fn is_exempt_path(path: &str) -> bool {
    path.starts_with("/health") || path.starts_with("/events/stream")
}

/// Pull a token from the Authorization header, `x-api-key`, or `?token=`.
fn extract_token(request: &Request<Body>) -> Option<String> {
    if let Some(value) = request.headers().get("x-api-key") {
        if let Ok(token) = value.to_str() {
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    if let Some(value) = request.headers().get("authorization") {
        if let Ok(raw) = value.to_str() {
            let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    query_param(request.uri().query(), "token")
}

/// Minimal query-string lookup; token and domain values are plain strings.
fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Resolve a token to its domain, consulting the cache first.
async fn resolve_token(state: &AppState, token: &str) -> Result<Option<AuthContext>> {
    let token_hash = hash_token(token);

    if let Some(domain) = state.coord.cached_token_domain(&token_hash).await? {
        return Ok(Some(AuthContext {
            domain,
            is_admin: false,
            token_hash: Some(token_hash),
        }));
    }

    let Some(doc) = Domain::find_by_token_hash(&token_hash, &state.db).await? else {
        return Ok(None);
    };
    state
        .coord
        .cache_token_domain(&token_hash, &doc.domain)
        .await?;
    Ok(Some(AuthContext {
        domain: doc.domain,
        is_admin: false,
        token_hash: Some(token_hash),
    }))
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    // CORS preflight passes untouched.
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let token = extract_token(&request);

    // Admin token short-circuit, honoring ?domain= for targeting.
    if let (Some(token), Some(admin_token)) = (&token, &state.config.admin_token) {
        if token == admin_token {
            let domain = query_param(request.uri().query(), "domain")
                .unwrap_or_else(|| state.config.admin_domain.clone());
            request.extensions_mut().insert(AuthContext {
                domain,
                is_admin: true,
                token_hash: None,
            });
            return next.run(request).await;
        }
    }

    if is_exempt_path(request.uri().path()) {
        // Best effort: attach context when a valid domain token came along.
        if let Some(token) = &token {
            if let Ok(Some(ctx)) = resolve_token(&state, token).await {
                request.extensions_mut().insert(ctx);
            }
        }
        return next.run(request).await;
    }

    let Some(token) = token else {
        return ApiError::Unauthorized.into_response();
    };
    match resolve_token(&state, &token).await {
        Ok(Some(ctx)) => {
            debug!(domain = %ctx.domain, "authenticated request");
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        Ok(None) => ApiError::Unauthorized.into_response(),
        Err(e) => ApiError::Internal(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn bearer_header_is_extracted() {
        let request = request_with("/jobs/", &[("authorization", "Bearer tok-123")]);
        assert_eq!(extract_token(&request), Some("tok-123".to_string()));
    }

    #[test]
    fn raw_authorization_header_works() {
        let request = request_with("/jobs/", &[("authorization", "tok-123")]);
        assert_eq!(extract_token(&request), Some("tok-123".to_string()));
    }

    #[test]
    fn api_key_header_wins_over_query() {
        let request = request_with("/jobs/?token=query-tok", &[("x-api-key", "header-tok")]);
        assert_eq!(extract_token(&request), Some("header-tok".to_string()));
    }

    #[test]
    fn query_token_is_a_fallback() {
        let request = request_with("/runs/abc/stream?token=tok-9", &[]);
        assert_eq!(extract_token(&request), Some("tok-9".to_string()));
    }

    #[test]
    fn missing_token_is_none() {
        let request = request_with("/jobs/", &[]);
        assert_eq!(extract_token(&request), None);
    }

    #[test]
    fn exempt_paths() {
        assert!(is_exempt_path("/health"));
        assert!(is_exempt_path("/events/stream"));
        assert!(!is_exempt_path("/jobs/"));
        assert!(!is_exempt_path("/admin/domains"));
    }

    #[test]
    fn query_param_parsing() {
        assert_eq!(
            query_param(Some("domain=team-a&token=t"), "domain"),
            Some("team-a".to_string())
        );
        assert_eq!(query_param(Some("token="), "token"), None);
        assert_eq!(query_param(None, "token"), None);
    }
}
