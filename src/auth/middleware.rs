//! Bearer-token extraction for the agent-facing Ingest/Decision APIs (§4.5,
//! §6, §7 Authentication/authorisation).
//!
//! Grounded on the teacher's `auth_middleware` shape (header extraction,
//! `req.extensions_mut().insert(..)`, `IntoResponse`-implementing error
//! enum) with the JWT validation step replaced by a Durable Store lookup,
//! since the agent authenticates with a raw API key (§6), not a signed
//! token.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use crate::auth::models::Identity;
use crate::durable_store::DurableStore;

/// Resolve the `Authorization: Bearer <api-key>` header to a tenant id via
/// [`DurableStore::lookup_api_key`] and attach it as an [`Identity`]
/// extension. Missing/malformed header and unknown/revoked key both map to
/// 401 (§7 Authentication/authorisation: last-used is bumped only on a
/// successful, non-revoked match, which `lookup_api_key` itself enforces).
pub async fn api_key_auth(
    State(durable_store): State<Arc<DurableStore>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingToken)?;

    let tenant_id = durable_store
        .lookup_api_key(token)
        .map_err(|err| {
            warn!(error = %err, "api key lookup failed");
            AuthError::InvalidToken
        })?
        .ok_or(AuthError::InvalidToken)?;

    req.extensions_mut().insert(Identity { tenant_id });
    Ok(next.run(req).await)
}

/// Extract the [`Identity`] attached by [`api_key_auth`].
pub fn extract_identity(req: &Request) -> Option<&Identity> {
    req.extensions().get::<Identity>()
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::MissingToken => "missing Authorization: Bearer <api-key> header",
            AuthError::InvalidToken => "invalid or revoked api key",
        };
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable_store::DurableStore;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    async fn ok_handler(req: Request) -> String {
        extract_identity(&req)
            .map(|identity| identity.tenant_id.clone())
            .unwrap_or_default()
    }

    fn app(durable_store: Arc<DurableStore>) -> Router {
        Router::new()
            .route("/", get(ok_handler))
            .layer(from_fn_with_state(durable_store.clone(), api_key_auth))
            .with_state(durable_store)
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let store = Arc::new(DurableStore::in_memory().unwrap());
        let response = app(store)
            .oneshot(HttpRequest::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_key_resolves_tenant() {
        let store = Arc::new(DurableStore::in_memory().unwrap());
        store.seed_api_key("key-1", "tenant-a").unwrap();
        let response = app(store)
            .oneshot(
                HttpRequest::builder()
                    .uri("/")
                    .header("Authorization", "Bearer key-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let store = Arc::new(DurableStore::in_memory().unwrap());
        let response = app(store)
            .oneshot(
                HttpRequest::builder()
                    .uri("/")
                    .header("Authorization", "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
