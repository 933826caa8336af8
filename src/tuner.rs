//! The Tuner background worker (§4.7): periodically asks the Advisor
//! collaborator for a fresh Threshold Record per busy endpoint and records
//! an Insight row either way.
//!
//! Grounded on `original_source/control-plane/app/ai_engine/llm_analyzer.py`'s
//! `analyze_service_patterns` for the Pattern/Anomaly summary shape, and the
//! teacher's `tokio::spawn` + `tokio::time::interval` background-loop idiom
//! in `src/main.rs`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::advisor::AdvisorClient;
use crate::aggregator::Aggregator;
use crate::fast_store::FastStore;
use crate::models::Metrics;
use crate::state::AppState;
use crate::threshold_store::ThresholdStore;

/// An endpoint needs at least this many signals in its 1h window before the
/// Tuner bothers spending an Advisor call on it (§4.7).
const MIN_SIGNALS_FOR_TUNING: u64 = 10;

#[derive(Debug, Serialize)]
struct PatternInfo {
    kind: &'static str,
    detail: String,
}

#[derive(Debug, Serialize)]
struct AnomalyInfo {
    severity: &'static str,
    detail: String,
}

/// Rule-based Pattern/Anomaly derivation from one endpoint's window metrics.
/// The Advisor contract (§6) only defines a threshold-recommendation schema,
/// not a second free-form analysis call, so Insight content is derived
/// locally rather than round-tripped through the Advisor a second time.
fn derive_patterns_and_anomalies(metrics: &Metrics) -> (Vec<PatternInfo>, Vec<AnomalyInfo>) {
    let mut patterns = Vec::new();
    let mut anomalies = Vec::new();

    if metrics.p99_ms > metrics.p50_ms * 3.0 && metrics.p50_ms > 0.0 {
        patterns.push(PatternInfo {
            kind: "latency_tail",
            detail: format!(
                "p99 ({:.1}ms) is more than 3x p50 ({:.1}ms), indicating a long tail",
                metrics.p99_ms, metrics.p50_ms
            ),
        });
    }
    if metrics.error_rate > 0.1 {
        anomalies.push(AnomalyInfo {
            severity: if metrics.error_rate > 0.25 { "high" } else { "medium" },
            detail: format!("error rate at {:.1}%", metrics.error_rate * 100.0),
        });
    }
    if metrics.global_rpm > 0.0 && metrics.per_client_rpm / metrics.global_rpm.max(1.0) > 0.5 {
        patterns.push(PatternInfo {
            kind: "single_client_dominance",
            detail: "one customer accounts for over half of traffic on this endpoint".to_string(),
        });
    }

    (patterns, anomalies)
}

fn tuning_prompt(
    tenant_id: &str,
    service_name: &str,
    endpoint: &str,
    metrics: &Metrics,
    current: &crate::models::ThresholdRecord,
) -> String {
    format!(
        "Endpoint {tenant_id}/{service_name}{endpoint} over the last hour: \
         {count} requests, avg latency {avg:.1}ms, p50 {p50:.1}ms, p95 {p95:.1}ms, \
         p99 {p99:.1}ms, error rate {err:.3}, global {rpm:.1} rpm, per-client {client_rpm:.1} rpm. \
         Current thresholds: cache_latency_ms={cache}, breaker_error_rate={breaker}, \
         queue_rpm={queue}, shed_rpm={shed}, per_client_rpm={per_client}. \
         Recommend a tuned threshold set as a single JSON object with keys \
         cache_latency_ms, circuit_breaker_error_rate, queue_deferral_rpm, \
         load_shedding_rpm, rate_limit_customer_rpm, reasoning, confidence \
         (low|medium|high).",
        count = metrics.signal_count,
        avg = metrics.avg_latency_ms,
        p50 = metrics.p50_ms,
        p95 = metrics.p95_ms,
        p99 = metrics.p99_ms,
        err = metrics.error_rate,
        rpm = metrics.global_rpm,
        client_rpm = metrics.per_client_rpm,
        cache = current.cache_latency_ms,
        breaker = current.breaker_error_rate,
        queue = current.queue_rpm,
        shed = current.shed_rpm,
        per_client = current.per_client_rpm,
    )
}

/// Evaluate and (if actionable) tune one endpoint. Never returns `Err` to
/// the caller: every failure is logged and treated as "skip this endpoint"
/// (§7 Worker exceptions).
async fn tune_one(
    advisor: &AdvisorClient,
    fast_store: &FastStore,
    threshold_store: &ThresholdStore,
    durable_store: &crate::durable_store::DurableStore,
    tenant_id: &str,
    service_name: &str,
    endpoint: &str,
) {
    let aggregator = Aggregator::new(fast_store);
    let metrics = aggregator.read_metrics(tenant_id, service_name, endpoint, None);
    if metrics.signal_count < MIN_SIGNALS_FOR_TUNING {
        return;
    }

    let current = match threshold_store.read_one(tenant_id, service_name, endpoint) {
        Ok(record) => record,
        Err(err) => {
            warn!(error = %err, tenant_id, service_name, endpoint, "threshold read failed, skipping");
            return;
        }
    };

    let prompt = tuning_prompt(tenant_id, service_name, endpoint, &metrics, &current);
    let (confidence, advice) = match advisor.advise(&prompt).await {
        Ok(advice) => match advice.validate() {
            Ok(confidence) => (Some(confidence), Some(advice)),
            Err(err) => {
                warn!(error = %err, tenant_id, service_name, endpoint, "advisor response failed validation");
                (None, None)
            }
        },
        Err(err) => {
            warn!(error = %err, tenant_id, service_name, endpoint, "advisor call failed");
            (None, None)
        }
    };

    if let (Some(confidence), Some(advice)) = (confidence, &advice) {
        if confidence.is_actionable() {
            let tuned = advice.into_threshold_record(confidence);
            if let Err(err) = threshold_store.upsert(tenant_id, service_name, endpoint, tuned) {
                warn!(error = %err, tenant_id, service_name, endpoint, "threshold upsert failed");
            } else {
                info!(tenant_id, service_name, endpoint, "thresholds tuned");
            }
        }
    }

    let (patterns, anomalies) = derive_patterns_and_anomalies(&metrics);
    let summary = match &advice {
        Some(advice) => advice.reasoning.clone(),
        None => format!(
            "avg latency {:.1}ms, error rate {:.3} over {} requests; advisor unavailable this cycle",
            metrics.avg_latency_ms, metrics.error_rate, metrics.signal_count
        ),
    };
    let insight = crate::durable_store::InsightRow {
        tenant_id: tenant_id.to_string(),
        service_name: service_name.to_string(),
        endpoint: endpoint.to_string(),
        summary,
        patterns_json: serde_json::to_string(&patterns).unwrap_or_else(|_| "[]".to_string()),
        anomalies_json: serde_json::to_string(&anomalies).unwrap_or_else(|_| "[]".to_string()),
        threshold_confidence: confidence.map(|c| c.as_f64()).unwrap_or(0.0),
        created_at: Utc::now(),
    };
    if let Err(err) = durable_store.insert_insight(&insight) {
        warn!(error = %err, tenant_id, service_name, endpoint, "insight insert failed");
    }
}

/// One tuning pass over every endpoint with live 1h traffic.
async fn tune_pass(state: &AppState, advisor: &AdvisorClient) {
    let aggregator = Aggregator::new(&state.fast_store);
    let endpoints = aggregator.distinct_tracked_endpoints();
    for (tenant_id, service_name, endpoint) in endpoints {
        tune_one(
            advisor,
            &state.fast_store,
            &state.threshold_store,
            &state.durable_store,
            &tenant_id,
            &service_name,
            &endpoint,
        )
        .await;
    }
}

/// Background loop: re-tune every 5 minutes (§4.7). Silently idles if no
/// `ADVISOR_API_KEY` is configured, since the Advisor is an optional
/// external collaborator, not a hard dependency of the rest of the system.
pub async fn run(state: Arc<AppState>, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let http = reqwest::Client::new();
    let advisor = match AdvisorClient::from_env(http) {
        Ok(client) => client,
        Err(err) => {
            info!(error = %err, "tuner disabled: no advisor configured");
            return;
        }
    };

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                info!("tuner loop shutting down");
                return;
            }
        }
        tune_pass(&state, &advisor).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_latency_pattern_detected() {
        let metrics = Metrics {
            signal_count: 20,
            avg_latency_ms: 100.0,
            error_rate: 0.0,
            global_rpm: 20.0,
            per_client_rpm: 0.0,
            p50_ms: 50.0,
            p95_ms: 180.0,
            p99_ms: 400.0,
        };
        let (patterns, _) = derive_patterns_and_anomalies(&metrics);
        assert!(patterns.iter().any(|p| p.kind == "latency_tail"));
    }

    #[test]
    fn elevated_error_rate_flagged_as_anomaly() {
        let metrics = Metrics {
            signal_count: 20,
            avg_latency_ms: 100.0,
            error_rate: 0.3,
            global_rpm: 20.0,
            per_client_rpm: 0.0,
            p50_ms: 50.0,
            p95_ms: 60.0,
            p99_ms: 70.0,
        };
        let (_, anomalies) = derive_patterns_and_anomalies(&metrics);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].severity, "high");
    }

    #[test]
    fn healthy_metrics_yield_no_findings() {
        let metrics = Metrics {
            signal_count: 20,
            avg_latency_ms: 100.0,
            error_rate: 0.01,
            global_rpm: 20.0,
            per_client_rpm: 2.0,
            p50_ms: 95.0,
            p95_ms: 110.0,
            p99_ms: 120.0,
        };
        let (patterns, anomalies) = derive_patterns_and_anomalies(&metrics);
        assert!(patterns.is_empty());
        assert!(anomalies.is_empty());
    }
}
