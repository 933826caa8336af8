//! Core data model shared by every component: the Signal fact, the typed
//! Metrics/Verdict pair the Decision Engine operates on, and the Threshold
//! Record contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a handled request, as reported by the agent. Binary by design —
/// the donor system's HTTP-status-code strings are not carried over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Success,
    Error,
}

impl SignalStatus {
    pub fn is_error(self) -> bool {
        matches!(self, SignalStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalStatus::Success => "success",
            SignalStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(SignalStatus::Success),
            "error" => Some(SignalStatus::Error),
            _ => None,
        }
    }
}

/// Request priority. Ordered so `Priority::Critical > Priority::Low` etc.
/// holds under the derived `PartialOrd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }

    pub fn is_low_or_medium(self) -> bool {
        matches!(self, Priority::Low | Priority::Medium)
    }
}

/// One immutable telemetry fact. Created by the Consumer; never mutated;
/// deleted after 7 days (§4.4 cleanup).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Option<i64>,
    pub tenant_id: String,
    pub service_name: String,
    pub endpoint: String,
    pub status: SignalStatus,
    pub latency_ms: f64,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub customer_identifier: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        tenant_id: impl Into<String>,
        service_name: impl Into<String>,
        endpoint: impl Into<String>,
        status: SignalStatus,
        latency_ms: f64,
    ) -> Self {
        Self {
            id: None,
            tenant_id: tenant_id.into(),
            service_name: service_name.into(),
            endpoint: endpoint.into(),
            status,
            latency_ms,
            priority: Priority::default(),
            customer_identifier: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_customer(mut self, customer_identifier: impl Into<String>) -> Self {
        self.customer_identifier = Some(customer_identifier.into());
        self
    }
}

/// The snapshot of sliding-window statistics the Decision Engine reads.
/// Named and typed per §9 (replacing the donor's dynamic dictionaries).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub signal_count: u64,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub global_rpm: f64,
    pub per_client_rpm: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl Metrics {
    pub fn insufficient() -> Self {
        Self {
            signal_count: 0,
            avg_latency_ms: 0.0,
            error_rate: 0.0,
            global_rpm: 0.0,
            per_client_rpm: 0.0,
            p50_ms: 0.0,
            p95_ms: 0.0,
            p99_ms: 0.0,
        }
    }
}

/// Where a Threshold Record's values came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdSource {
    Default,
    Tuned,
}

impl ThresholdSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ThresholdSource::Default => "default",
            ThresholdSource::Tuned => "tuned",
        }
    }
}

/// Per (tenant, service, endpoint) threshold record (§3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRecord {
    pub cache_latency_ms: f64,
    pub breaker_error_rate: f64,
    pub queue_rpm: f64,
    pub shed_rpm: f64,
    pub per_client_rpm: f64,
    pub confidence: f64,
    pub reasoning: String,
    pub source: ThresholdSource,
    pub last_updated: DateTime<Utc>,
}

impl ThresholdRecord {
    pub fn defaults() -> Self {
        Self {
            cache_latency_ms: 500.0,
            breaker_error_rate: 0.30,
            queue_rpm: 80.0,
            shed_rpm: 150.0,
            per_client_rpm: 15.0,
            confidence: 1.0,
            reasoning: "system default".to_string(),
            source: ThresholdSource::Default,
            last_updated: Utc::now(),
        }
    }
}

/// The Decision Engine's output (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub cache_enabled: bool,
    pub circuit_breaker: bool,
    pub rate_limit_customer: bool,
    pub queue_deferral: bool,
    pub load_shedding: bool,
    pub send_alert: bool,
    pub reasoning: String,
    pub source: ThresholdSource,
    pub retry_after_secs: Option<u64>,
    pub estimated_delay_secs: Option<u64>,
}

impl Verdict {
    pub fn healthy(source: ThresholdSource, reasoning: impl Into<String>) -> Self {
        Self {
            cache_enabled: false,
            circuit_breaker: false,
            rate_limit_customer: false,
            queue_deferral: false,
            load_shedding: false,
            send_alert: false,
            reasoning: reasoning.into(),
            source,
            retry_after_secs: None,
            estimated_delay_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn status_round_trip() {
        assert_eq!(SignalStatus::parse("error"), Some(SignalStatus::Error));
        assert_eq!(SignalStatus::parse("bogus"), None);
        assert_eq!(SignalStatus::Error.as_str(), "error");
    }

    #[test]
    fn priority_default_is_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
    }
}
