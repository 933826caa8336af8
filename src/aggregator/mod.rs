//! Real-time window aggregation over the Fast Store (§3 Window Aggregate,
//! §4.2).
//!
//! Grounded on `original_source/control-plane/app/realtime_aggregates.py`:
//! three rolling windows (`1m`, `1h`, `24h`) keyed by
//! `tenant:service:endpoint`, plus a `1m`-only per-client counter keyed by
//! `tenant:service:endpoint:customer`. Window TTLs give the bucket a grace
//! period past its nominal width so a reader mid-rollover still sees the
//! previous bucket's data (§4.2 edge cases).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::fast_store::FastStore;
use crate::models::Metrics;

pub const WINDOW_1M: &str = "1m";
pub const WINDOW_1H: &str = "1h";
pub const WINDOW_24H: &str = "24h";

const TTL_1M: Duration = Duration::from_secs(120);
const TTL_1H: Duration = Duration::from_secs(3900);
const TTL_24H: Duration = Duration::from_secs(90_000);
const CLIENT_TTL: Duration = Duration::from_secs(120);

/// `⌊epoch/60⌋` (§4.2: "the 1m aggregate is a time-bucketed key whose bucket
/// id is ⌊epoch/60⌋"). The per-client counter is 1m-only (§3), so it uses the
/// same bucket id.
fn current_minute_bucket() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        / 60
}

/// The 1m key carries the current minute bucket id so counts reset at the
/// minute boundary; 1h/24h keys are accumulating counters, refreshed by TTL
/// alone (§4.2).
fn window_key(tenant_id: &str, service_name: &str, endpoint: &str, window: &str) -> String {
    if window == WINDOW_1M {
        format!(
            "rt_agg:{tenant_id}:{service_name}:{endpoint}:1m:{}",
            current_minute_bucket()
        )
    } else {
        format!("rt_agg:{tenant_id}:{service_name}:{endpoint}:{window}")
    }
}

fn client_key(tenant_id: &str, service_name: &str, endpoint: &str, customer: &str) -> String {
    format!(
        "rt_agg_client:{tenant_id}:{service_name}:{endpoint}:{customer}:{}",
        current_minute_bucket()
    )
}

fn ttl_for(window: &str) -> Duration {
    match window {
        WINDOW_1M => TTL_1M,
        WINDOW_1H => TTL_1H,
        WINDOW_24H => TTL_24H,
        _ => TTL_1M,
    }
}

/// Thin wrapper over `FastStore` that knows the window-key naming scheme and
/// rpm-from-count math; holds no state of its own.
pub struct Aggregator<'a> {
    store: &'a FastStore,
}

impl<'a> Aggregator<'a> {
    pub fn new(store: &'a FastStore) -> Self {
        Self { store }
    }

    /// Record one Signal into all three window buckets, and into the
    /// per-client bucket if a `customer_identifier` was provided (§4.1
    /// step 3).
    pub fn record(
        &self,
        tenant_id: &str,
        service_name: &str,
        endpoint: &str,
        latency_ms: f64,
        is_error: bool,
        customer_identifier: Option<&str>,
    ) {
        for window in [WINDOW_1M, WINDOW_1H, WINDOW_24H] {
            let key = window_key(tenant_id, service_name, endpoint, window);
            self.store
                .record_window(&key, latency_ms, is_error, ttl_for(window));
        }
        if let Some(customer) = customer_identifier {
            let key = client_key(tenant_id, service_name, endpoint, customer);
            self.store.record_client(&key, CLIENT_TTL);
        }
    }

    /// Read the typed Metrics snapshot the Decision Engine consumes,
    /// combining the 1m window (for rpm and percentiles) with the
    /// per-client 1m counter. Returns `Metrics::insufficient()` when the 1m
    /// window has no samples yet (§4.2 edge case: cold window).
    pub fn read_metrics(
        &self,
        tenant_id: &str,
        service_name: &str,
        endpoint: &str,
        customer_identifier: Option<&str>,
    ) -> Metrics {
        let key_1m = window_key(tenant_id, service_name, endpoint, WINDOW_1M);
        let Some(entry) = self.store.read_window(&key_1m) else {
            return Metrics::insufficient();
        };
        if entry.count == 0 {
            return Metrics::insufficient();
        }

        let per_client_rpm = customer_identifier
            .map(|customer| {
                let key = client_key(tenant_id, service_name, endpoint, customer);
                self.store.read_client_count(&key) as f64
            })
            .unwrap_or(0.0);

        Metrics {
            signal_count: entry.count,
            avg_latency_ms: entry.avg_latency_ms(),
            error_rate: entry.error_rate(),
            global_rpm: entry.count as f64,
            per_client_rpm,
            p50_ms: entry.percentile(50.0),
            p95_ms: entry.percentile(95.0),
            p99_ms: entry.percentile(99.0),
        }
    }

    /// Read a single window's raw counter entry, for rollup/snapshot workers
    /// that need the 1h/24h buckets directly rather than the Decision
    /// Engine's 1m-centric `Metrics` view.
    pub fn read_window_entry(
        &self,
        tenant_id: &str,
        service_name: &str,
        endpoint: &str,
        window: &str,
    ) -> Option<crate::fast_store::CounterEntry> {
        let key = window_key(tenant_id, service_name, endpoint, window);
        self.store.read_window(&key)
    }

    /// All 1m window keys currently tracked, for the rollup worker to
    /// discover which endpoints had traffic this hour (§4.4).
    pub fn tracked_endpoints(&self) -> Vec<String> {
        self.store.scan_prefix("rt_agg:")
    }

    /// Distinct (tenant, service, endpoint) triples with a live 1h window,
    /// for the Tuner's candidate-selection pass (§4.7). Assumes none of the
    /// three fields contain a literal `:`, matching every other caller of
    /// `window_key` in this module.
    pub fn distinct_tracked_endpoints(&self) -> Vec<(String, String, String)> {
        self.store
            .scan_prefix("rt_agg:")
            .into_iter()
            .filter_map(|key| {
                let rest = key.strip_prefix("rt_agg:")?;
                let mut parts = rest.splitn(4, ':');
                let tenant = parts.next()?.to_string();
                let service = parts.next()?.to_string();
                let endpoint = parts.next()?.to_string();
                let window = parts.next()?;
                (window == WINDOW_1H).then_some((tenant, service, endpoint))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_window_yields_insufficient_metrics() {
        let store = FastStore::new(1024);
        let agg = Aggregator::new(&store);
        let metrics = agg.read_metrics("t1", "svc", "/ep", None);
        assert_eq!(metrics, Metrics::insufficient());
    }

    #[test]
    fn record_then_read_reflects_counts_and_percentiles() {
        let store = FastStore::new(1024);
        let agg = Aggregator::new(&store);
        for lat in [10.0, 20.0, 30.0, 40.0, 50.0] {
            agg.record("t1", "svc", "/ep", lat, false, Some("cust-1"));
        }
        let metrics = agg.read_metrics("t1", "svc", "/ep", Some("cust-1"));
        assert_eq!(metrics.signal_count, 5);
        assert_eq!(metrics.global_rpm, 5.0);
        assert_eq!(metrics.per_client_rpm, 5.0);
        assert_eq!(metrics.p50_ms, 30.0);
    }

    #[test]
    fn error_rate_reflects_mixed_outcomes() {
        let store = FastStore::new(1024);
        let agg = Aggregator::new(&store);
        agg.record("t1", "svc", "/ep", 10.0, false, None);
        agg.record("t1", "svc", "/ep", 10.0, true, None);
        agg.record("t1", "svc", "/ep", 10.0, true, None);
        let metrics = agg.read_metrics("t1", "svc", "/ep", None);
        assert!((metrics.error_rate - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn per_client_counter_isolated_from_other_clients() {
        let store = FastStore::new(1024);
        let agg = Aggregator::new(&store);
        agg.record("t1", "svc", "/ep", 10.0, false, Some("cust-a"));
        agg.record("t1", "svc", "/ep", 10.0, false, Some("cust-b"));
        agg.record("t1", "svc", "/ep", 10.0, false, Some("cust-a"));
        let metrics = agg.read_metrics("t1", "svc", "/ep", Some("cust-a"));
        assert_eq!(metrics.per_client_rpm, 2.0);
    }

    #[test]
    fn tracked_endpoints_covers_all_recorded_windows() {
        let store = FastStore::new(1024);
        let agg = Aggregator::new(&store);
        agg.record("t1", "svc", "/ep-a", 10.0, false, None);
        agg.record("t1", "svc", "/ep-b", 10.0, false, None);
        let keys = agg.tracked_endpoints();
        assert_eq!(keys.len(), 6); // 2 endpoints * 3 windows
    }
}
