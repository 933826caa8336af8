//! The Decision Engine: a stateless pure function over a metrics snapshot,
//! thresholds, and request priority (§4.6).
//!
//! Grounded on the re-architecture directed by the donor's own design notes
//! (§9): the source expresses this as a graph of "analyze" and "decide"
//! nodes mutating a shared state dictionary (`ai_engine/decision_graph.py`'s
//! langgraph `StateGraph`). That graph always visits the same nodes in the
//! same order for a given state, so it collapses cleanly into the T1..T7
//! evaluation ladder below — a single function, no graph runtime, no
//! mutable state threaded through node calls.
//!
//! `now` is an explicit parameter rather than read from the clock inside
//! the function, so the engine remains a pure function of its documented
//! inputs (§8 invariant 5) even though one rule's suggested Retry-After
//! depends on wall-clock phase.

use chrono::{DateTime, Utc};

use crate::models::{Metrics, Priority, ThresholdRecord, Verdict};

const MIN_SIGNALS: u64 = 3;

/// Evaluate one decision request. Mirrors §4.6's T1..T7 table exactly; the
/// first predicate that holds determines the return value.
pub fn evaluate(
    metrics: &Metrics,
    thresholds: &ThresholdRecord,
    priority: Priority,
    now: DateTime<Utc>,
) -> Verdict {
    if metrics.signal_count < MIN_SIGNALS {
        return Verdict::healthy(thresholds.source, "insufficient data");
    }

    // T1: per-client rate limit. Takes precedence over every global rule,
    // including for critical-priority callers (§8 invariant 6).
    if metrics.per_client_rpm > thresholds.per_client_rpm {
        let epoch = now.timestamp().max(0) as u64;
        let retry_after = 60 - (epoch % 60);
        let mut verdict = Verdict::healthy(thresholds.source, "");
        verdict.rate_limit_customer = true;
        verdict.send_alert = true;
        verdict.retry_after_secs = Some(retry_after);
        verdict.reasoning = format!(
            "per-client rate {:.1} rpm exceeds limit {:.1} rpm",
            metrics.per_client_rpm, thresholds.per_client_rpm
        );
        return verdict;
    }

    let is_critical = priority == Priority::Critical;

    // T2a: global overload, priority low or medium.
    if !is_critical && metrics.global_rpm > thresholds.shed_rpm && priority.is_low_or_medium() {
        let mut verdict = Verdict::healthy(thresholds.source, "");
        verdict.load_shedding = true;
        verdict.cache_enabled = true;
        verdict.retry_after_secs = Some(30);
        verdict.reasoning = format!(
            "global rate {:.1} rpm exceeds shed threshold {:.1} rpm at priority {}",
            metrics.global_rpm,
            thresholds.shed_rpm,
            priority.as_str()
        );
        return verdict;
    }

    // T2b: approaching overload, low priority only.
    if !is_critical
        && metrics.global_rpm > 0.8 * thresholds.shed_rpm
        && priority == Priority::Low
    {
        let mut verdict = Verdict::healthy(thresholds.source, "");
        verdict.load_shedding = true;
        verdict.cache_enabled = true;
        verdict.reasoning = format!(
            "global rate {:.1} rpm exceeds 80% of shed threshold {:.1} rpm at low priority",
            metrics.global_rpm,
            thresholds.shed_rpm
        );
        return verdict;
    }

    // T2c: moderate load, priority low or medium.
    if !is_critical && metrics.global_rpm > thresholds.queue_rpm && priority.is_low_or_medium() {
        let mut verdict = Verdict::healthy(thresholds.source, "");
        verdict.queue_deferral = true;
        verdict.cache_enabled = true;
        verdict.estimated_delay_secs = Some(10);
        verdict.reasoning = format!(
            "global rate {:.1} rpm exceeds queue threshold {:.1} rpm at priority {}",
            metrics.global_rpm,
            thresholds.queue_rpm,
            priority.as_str()
        );
        return verdict;
    }

    // T3: breaker trip.
    if metrics.error_rate >= thresholds.breaker_error_rate {
        let mut verdict = Verdict::healthy(thresholds.source, "");
        verdict.circuit_breaker = true;
        verdict.send_alert = true;
        verdict.reasoning = format!(
            "error rate {:.3} meets breaker threshold {:.3}",
            metrics.error_rate, thresholds.breaker_error_rate
        );
        return verdict;
    }

    // T4: elevated errors plus elevated latency.
    if metrics.error_rate >= 0.5 * thresholds.breaker_error_rate
        && metrics.avg_latency_ms >= 0.8 * thresholds.cache_latency_ms
    {
        let mut verdict = Verdict::healthy(thresholds.source, "");
        verdict.cache_enabled = true;
        verdict.reasoning = format!(
            "error rate {:.3} and avg latency {:.1} ms jointly elevated (breaker {:.3}, cache {:.1} ms)",
            metrics.error_rate, metrics.avg_latency_ms, thresholds.breaker_error_rate, thresholds.cache_latency_ms
        );
        return verdict;
    }

    // T5: latency alone.
    if metrics.avg_latency_ms >= thresholds.cache_latency_ms {
        let mut verdict = Verdict::healthy(thresholds.source, "");
        verdict.cache_enabled = true;
        verdict.reasoning = format!(
            "avg latency {:.1} ms meets cache threshold {:.1} ms",
            metrics.avg_latency_ms, thresholds.cache_latency_ms
        );
        return verdict;
    }

    // T6: elevated errors alone — observe only, no action, no alert.
    if metrics.error_rate >= 0.5 * thresholds.breaker_error_rate {
        return Verdict::healthy(
            thresholds.source,
            format!(
                "error rate {:.3} elevated relative to breaker threshold {:.3}; monitoring",
                metrics.error_rate, thresholds.breaker_error_rate
            ),
        );
    }

    // T7: healthy.
    Verdict::healthy(
        thresholds.source,
        format!(
            "within all thresholds (avg latency {:.1} ms, error rate {:.3}, global rpm {:.1})",
            metrics.avg_latency_ms, metrics.error_rate, metrics.global_rpm
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ThresholdSource;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-07-28T12:00:30Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn thresholds() -> ThresholdRecord {
        ThresholdRecord::defaults()
    }

    fn metrics(signal_count: u64) -> Metrics {
        Metrics {
            signal_count,
            avg_latency_ms: 50.0,
            error_rate: 0.01,
            global_rpm: 10.0,
            per_client_rpm: 2.0,
            p50_ms: 50.0,
            p95_ms: 60.0,
            p99_ms: 70.0,
        }
    }

    #[test]
    fn s1_client_burst_rate_limits() {
        let mut m = metrics(20);
        m.per_client_rpm = 20.0;
        let t = thresholds(); // per_client_rpm default 15.0
        let verdict = evaluate(&m, &t, Priority::Medium, now());
        assert!(verdict.rate_limit_customer);
        assert!(!verdict.cache_enabled);
        assert!(!verdict.circuit_breaker);
        assert!(!verdict.queue_deferral);
        assert!(!verdict.load_shedding);
        let retry = verdict.retry_after_secs.unwrap();
        assert!((1..=60).contains(&retry));
    }

    #[test]
    fn s2_overload_sheds() {
        let mut m = metrics(50);
        m.global_rpm = 170.0;
        m.per_client_rpm = 2.0;
        let mut t = thresholds();
        t.shed_rpm = 150.0;
        t.queue_rpm = 80.0;
        t.per_client_rpm = 15.0;
        let verdict = evaluate(&m, &t, Priority::Medium, now());
        assert!(verdict.load_shedding);
        assert!(verdict.cache_enabled);
    }

    #[test]
    fn s3_moderate_load_queues() {
        let mut m = metrics(50);
        m.global_rpm = 100.0;
        let mut t = thresholds();
        t.shed_rpm = 150.0;
        t.queue_rpm = 80.0;
        let verdict = evaluate(&m, &t, Priority::Low, now());
        assert!(verdict.queue_deferral);
        assert!(verdict.cache_enabled);
        assert_eq!(verdict.estimated_delay_secs, Some(10));
    }

    #[test]
    fn s4_critical_bypasses_global_rules() {
        let mut m = metrics(50);
        m.global_rpm = 200.0;
        m.avg_latency_ms = 100.0;
        m.error_rate = 0.01;
        let mut t = thresholds();
        t.cache_latency_ms = 500.0;
        t.breaker_error_rate = 0.30;
        t.shed_rpm = 150.0;
        t.queue_rpm = 80.0;
        t.source = ThresholdSource::Tuned;
        let verdict = evaluate(&m, &t, Priority::Critical, now());
        assert!(!verdict.load_shedding);
        assert!(!verdict.queue_deferral);
        assert!(!verdict.cache_enabled);
        assert!(!verdict.circuit_breaker);
        assert_eq!(verdict.source, ThresholdSource::Tuned);
    }

    #[test]
    fn s5_breaker_trips() {
        let mut m = metrics(50);
        m.error_rate = 0.35;
        m.avg_latency_ms = 120.0;
        let mut t = thresholds();
        t.breaker_error_rate = 0.30;
        let verdict = evaluate(&m, &t, Priority::Medium, now());
        assert!(verdict.circuit_breaker);
        assert!(verdict.send_alert);
    }

    #[test]
    fn s6_cache_on_latency() {
        let mut m = metrics(50);
        m.error_rate = 0.02;
        m.avg_latency_ms = 550.0;
        let mut t = thresholds();
        t.cache_latency_ms = 500.0;
        let verdict = evaluate(&m, &t, Priority::Medium, now());
        assert!(verdict.cache_enabled);
        assert!(!verdict.circuit_breaker);
    }

    #[test]
    fn s7_insufficient_data() {
        let m = metrics(2);
        let t = thresholds();
        let verdict = evaluate(&m, &t, Priority::Medium, now());
        assert!(!verdict.cache_enabled);
        assert!(!verdict.load_shedding);
        assert_eq!(verdict.reasoning, "insufficient data");
    }

    #[test]
    fn t1_precedence_holds_even_for_critical_priority() {
        let mut m = metrics(50);
        m.per_client_rpm = 999.0;
        m.global_rpm = 999.0;
        m.error_rate = 0.9;
        let t = thresholds();
        let verdict = evaluate(&m, &t, Priority::Critical, now());
        assert!(verdict.rate_limit_customer);
    }

    #[test]
    fn t2a_precedes_t2b_precedes_t2c() {
        let t = thresholds(); // shed=150, queue=80
        let mut m = metrics(50);
        m.global_rpm = 200.0; // triggers T2a for low/medium
        let verdict = evaluate(&m, &t, Priority::Low, now());
        assert!(verdict.load_shedding);
        assert_eq!(verdict.retry_after_secs, Some(30)); // T2a has a Retry-After, T2b does not

        m.global_rpm = 0.85 * t.shed_rpm; // below shed, above 0.8*shed -> T2b for low priority
        let verdict = evaluate(&m, &t, Priority::Low, now());
        assert!(verdict.load_shedding);
        assert_eq!(verdict.retry_after_secs, None);

        m.global_rpm = t.queue_rpm + 1.0; // above queue, below 0.8*shed -> T2c
        let verdict = evaluate(&m, &t, Priority::Low, now());
        assert!(verdict.queue_deferral);
        assert!(!verdict.load_shedding);
    }

    #[test]
    fn critical_priority_never_queues_or_sheds() {
        let mut m = metrics(50);
        m.global_rpm = 5000.0;
        let t = thresholds();
        let verdict = evaluate(&m, &t, Priority::Critical, now());
        assert!(!verdict.queue_deferral);
        assert!(!verdict.load_shedding);
    }

    #[test]
    fn t6_monitors_without_alert_or_action() {
        let mut m = metrics(50);
        let mut t = thresholds();
        t.breaker_error_rate = 0.30;
        t.cache_latency_ms = 500.0;
        m.error_rate = 0.16; // >= 0.5*0.30 but below breaker
        m.avg_latency_ms = 50.0; // well below 0.8*cache_latency_ms
        let verdict = evaluate(&m, &t, Priority::Medium, now());
        assert!(!verdict.circuit_breaker);
        assert!(!verdict.cache_enabled);
        assert!(!verdict.send_alert);
    }

    #[test]
    fn same_inputs_yield_identical_verdicts() {
        let m = metrics(50);
        let t = thresholds();
        let v1 = evaluate(&m, &t, Priority::Medium, now());
        let v2 = evaluate(&m, &t, Priority::Medium, now());
        assert_eq!(v1.reasoning, v2.reasoning);
        assert_eq!(v1.cache_enabled, v2.cache_enabled);
        assert_eq!(v1.circuit_breaker, v2.circuit_breaker);
    }

    #[test]
    fn t7_healthy_when_nothing_triggers() {
        let m = metrics(50);
        let t = thresholds();
        let verdict = evaluate(&m, &t, Priority::Medium, now());
        assert!(!verdict.cache_enabled);
        assert!(!verdict.circuit_breaker);
        assert!(!verdict.queue_deferral);
        assert!(!verdict.load_shedding);
        assert!(!verdict.rate_limit_customer);
    }
}
