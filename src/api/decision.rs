//! `GET /api/config/{service_name}/{endpoint...}` (§4.5 Decision API, §4.6
//! failure semantics, §6 bit-exact response contract).
//!
//! Grounded on the teacher's span-per-request logging convention and
//! `reqwest`-free background-task fan-out (`tokio::spawn`, not awaited) for
//! the alert emission (§5: "the Decision API does not await it").

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::alerts;
use crate::auth::Identity;
use crate::decision_engine;
use crate::errors::AppError;
use crate::models::{Metrics, Priority, ThresholdSource};
use crate::state::AppState;

const SNAPSHOT_STALENESS_LIMIT_MINUTES: i64 = 30;
const RAW_FALLBACK_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct DecisionQuery {
    pub tenant_id: Option<String>,
    pub priority: Option<String>,
    pub customer_identifier: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub service_name: String,
    pub endpoint: String,
    pub tenant_id: String,
    pub cache_enabled: bool,
    pub circuit_breaker: bool,
    pub rate_limited_customer: bool,
    pub queue_deferral: bool,
    pub load_shedding: bool,
    pub reason: String,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_delay: Option<u64>,
    pub source: &'static str,
}

/// The Decision Engine's tiered degradation path (§4.6 Failure semantics):
/// Fast Store → durable Snapshot (≤30 min stale) → last ≤20 raw Durable
/// Store rows → insufficient data. Only the first tier that yields live
/// data is used; we never blend tiers.
fn resolve_metrics(
    state: &AppState,
    tenant_id: &str,
    service_name: &str,
    endpoint: &str,
    customer_identifier: Option<&str>,
) -> Metrics {
    let aggregator = crate::aggregator::Aggregator::new(&state.fast_store);
    let fresh = aggregator.read_metrics(tenant_id, service_name, endpoint, customer_identifier);
    if fresh.signal_count > 0 {
        return fresh;
    }

    if let Ok(Some(snapshot)) =
        state
            .durable_store
            .latest_snapshot(tenant_id, service_name, endpoint, crate::aggregator::WINDOW_1H)
    {
        let age_minutes = (Utc::now() - snapshot.snapshot_at).num_minutes();
        if age_minutes <= SNAPSHOT_STALENESS_LIMIT_MINUTES {
            return Metrics {
                signal_count: snapshot.count,
                avg_latency_ms: snapshot.avg_latency_ms(),
                error_rate: snapshot.error_rate(),
                global_rpm: snapshot.count as f64 / 60.0,
                per_client_rpm: 0.0,
                p50_ms: snapshot.p50_latency_ms,
                p95_ms: snapshot.p95_latency_ms,
                p99_ms: snapshot.p99_latency_ms,
            };
        }
    }

    match state
        .durable_store
        .recent_signals(tenant_id, service_name, endpoint, RAW_FALLBACK_LIMIT)
    {
        Ok(rows) if rows.len() >= 3 => {
            let count = rows.len() as u64;
            let sum_latency: f64 = rows.iter().map(|s| s.latency_ms).sum();
            let error_count = rows.iter().filter(|s| s.status.is_error()).count() as u64;
            let mut sorted: Vec<f64> = rows.iter().map(|s| s.latency_ms).collect();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            Metrics {
                signal_count: count,
                avg_latency_ms: sum_latency / count as f64,
                error_rate: error_count as f64 / count as f64,
                global_rpm: count as f64,
                per_client_rpm: 0.0,
                p50_ms: percentile(&sorted, 50.0),
                p95_ms: percentile(&sorted, 95.0),
                p99_ms: percentile(&sorted, 99.0),
            }
        }
        _ => Metrics::insufficient(),
    }
}

/// Same linear-interpolation formula as `FastStore::CounterEntry::percentile`
/// (§4.2), applied to an already-sorted slice from the raw-row fallback.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let k = (q / 100.0) * (n as f64 - 1.0);
    let f = k.floor() as usize;
    let c = (f + 1).min(n - 1);
    let d = k - f as f64;
    sorted[f] + d * (sorted[c] - sorted[f])
}

fn advisory_status_code(verdict: &crate::models::Verdict) -> u16 {
    if verdict.rate_limit_customer {
        429
    } else if verdict.load_shedding {
        503
    } else if verdict.queue_deferral {
        202
    } else {
        200
    }
}

/// Invoke the Decision Engine for one (service, endpoint) and map its
/// Verdict onto §6's bit-exact response body. The HTTP status is always
/// 200; `status_code` is the advisory field the agent mirrors upstream.
pub async fn get_decision(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((service_name, endpoint)): Path<(String, String)>,
    Query(query): Query<DecisionQuery>,
) -> Result<Json<DecisionResponse>, AppError> {
    let tenant_id = query.tenant_id.unwrap_or(identity.tenant_id);
    let priority = match query.priority.as_deref() {
        None => Priority::default(),
        Some(raw) => Priority::parse(raw)
            .ok_or_else(|| AppError::Validation(format!("unknown priority '{raw}'")))?,
    };

    let metrics = resolve_metrics(
        &state,
        &tenant_id,
        &service_name,
        &endpoint,
        query.customer_identifier.as_deref(),
    );
    let thresholds = state
        .threshold_store
        .read_one(&tenant_id, &service_name, &endpoint)?;
    let verdict = decision_engine::evaluate(&metrics, &thresholds, priority, Utc::now());

    if verdict.send_alert {
        let config = state.config.clone();
        let subject = format!("{service_name}{endpoint} ({tenant_id})");
        let body = verdict.reasoning.clone();
        tokio::spawn(async move {
            alerts::send_alert(&config, &subject, &body).await;
        });
    }

    info!(
        tenant_id,
        service_name,
        endpoint,
        cache_enabled = verdict.cache_enabled,
        circuit_breaker = verdict.circuit_breaker,
        rate_limit_customer = verdict.rate_limit_customer,
        queue_deferral = verdict.queue_deferral,
        load_shedding = verdict.load_shedding,
        reason = %verdict.reasoning,
        "decision evaluated"
    );

    let status_code = advisory_status_code(&verdict);
    Ok(Json(DecisionResponse {
        service_name,
        endpoint,
        tenant_id,
        cache_enabled: verdict.cache_enabled,
        circuit_breaker: verdict.circuit_breaker,
        rate_limited_customer: verdict.rate_limit_customer,
        queue_deferral: verdict.queue_deferral,
        load_shedding: verdict.load_shedding,
        source: match verdict.source {
            ThresholdSource::Default => "default",
            ThresholdSource::Tuned => "tuned",
        },
        reason: verdict.reasoning,
        status_code,
        retry_after: verdict.retry_after_secs,
        estimated_delay: verdict.estimated_delay_secs,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_matches_fast_store_formula() {
        let sorted = vec![10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&sorted, 50.0), 30.0);
        assert_eq!(percentile(&sorted, 0.0), 10.0);
        assert_eq!(percentile(&sorted, 100.0), 50.0);
    }

    #[test]
    fn advisory_status_code_prioritizes_rate_limit_over_shed() {
        let mut verdict = crate::models::Verdict::healthy(ThresholdSource::Default, "");
        verdict.rate_limit_customer = true;
        verdict.load_shedding = true;
        assert_eq!(advisory_status_code(&verdict), 429);
    }

    #[test]
    fn advisory_status_code_healthy_is_200() {
        let verdict = crate::models::Verdict::healthy(ThresholdSource::Default, "");
        assert_eq!(advisory_status_code(&verdict), 200);
    }
}
