//! `POST /api/signals` (§4.5 Ingest API, §6 bit-exact wire contract).
//!
//! Grounded on the teacher's `auth/middleware.rs` bearer-extraction shape
//! for the handler signature and `src/middleware/logging.rs`'s span style
//! for structured logging; the body itself is new per §6.

use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use serde::Deserialize;

use crate::auth::Identity;
use crate::errors::AppError;
use crate::models::{Priority, Signal, SignalStatus};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignalPayload {
    pub service_name: String,
    pub endpoint: String,
    pub latency_ms: f64,
    pub status: String,
    /// Accepted for wire compatibility; the authenticated identity's tenant
    /// always wins (§7: validation never trusts an unauthenticated field
    /// for access control; this one is denial-of-confusion, not auth).
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub customer_identifier: Option<String>,
}

/// Validate and publish one signal onto `signals_queue` (§4.1 step 1).
/// 201 on success, 400 on a malformed payload, 503 if the queue publish
/// itself fails so the agent retries (§7 Transient infrastructure).
pub async fn ingest_signal(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(payload): Json<SignalPayload>,
) -> Result<(axum::http::StatusCode, Json<serde_json::Value>), AppError> {
    if payload.latency_ms < 0.0 {
        return Err(AppError::Validation("latency_ms must be >= 0".into()));
    }
    if payload.service_name.trim().is_empty() || payload.endpoint.trim().is_empty() {
        return Err(AppError::Validation(
            "service_name and endpoint must be non-empty".into(),
        ));
    }
    let status = SignalStatus::parse(&payload.status)
        .ok_or_else(|| AppError::Validation(format!("unknown status '{}'", payload.status)))?;
    let priority = match payload.priority.as_deref() {
        None => Priority::default(),
        Some(raw) => Priority::parse(raw)
            .ok_or_else(|| AppError::Validation(format!("unknown priority '{raw}'")))?,
    };

    let mut signal = Signal::new(
        identity.tenant_id.clone(),
        payload.service_name,
        payload.endpoint,
        status,
        payload.latency_ms,
    )
    .with_priority(priority);
    if let Some(customer) = payload.customer_identifier {
        signal = signal.with_customer(customer);
    }

    state
        .queue
        .publish(&signal)
        .map_err(|err| AppError::Unavailable(format!("queue publish failed: {err}")))?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(serde_json::json!({ "accepted": true })),
    ))
}
