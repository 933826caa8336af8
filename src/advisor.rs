//! HTTP client for the Advisor collaborator (§6 Advisor contract, §4.7
//! Tuner).
//!
//! Grounded on `src/vault/llm.rs`'s `OpenRouterClient`: a `reqwest::Client`
//! constructed once and reused, `from_env` reading the API key, a single
//! `chat_completion`-shaped call, and a line-oriented response parser that
//! rejects anything outside the declared schema rather than coercing it.
//! The response schema itself comes from §6's Advisor contract, not the
//! donor's own DSL.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::models::ThresholdRecord;

const ADVISOR_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const ADVISOR_MODEL: &str = "anthropic/claude-3-haiku";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Confidence::Low),
            "medium" => Some(Confidence::Medium),
            "high" => Some(Confidence::High),
            _ => None,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Confidence::Low => 0.3,
            Confidence::Medium => 0.6,
            Confidence::High => 0.9,
        }
    }

    pub fn is_actionable(self) -> bool {
        matches!(self, Confidence::Medium | Confidence::High)
    }
}

/// The validated record an Advisor response must decode into (§6). Field
/// ranges mirror `ThresholdRecord`'s but the Advisor's vocabulary differs
/// slightly (`circuit_breaker_error_rate`, not `breaker_error_rate`).
#[derive(Debug, Clone, Deserialize)]
pub struct AdvisorResponse {
    pub cache_latency_ms: i64,
    pub circuit_breaker_error_rate: f64,
    pub queue_deferral_rpm: i64,
    pub load_shedding_rpm: i64,
    pub rate_limit_customer_rpm: i64,
    pub reasoning: String,
    pub confidence: String,
}

impl AdvisorResponse {
    /// Enforce §6's schema: ranges, shed>queue, reasoning length, and a
    /// recognised confidence tag. An invalid record is treated as if the
    /// Advisor call had failed outright.
    pub fn validate(&self) -> Result<Confidence> {
        if !(10..=5000).contains(&self.cache_latency_ms) {
            return Err(anyhow!("cache_latency_ms out of range"));
        }
        if !(0.01..=1.0).contains(&self.circuit_breaker_error_rate) {
            return Err(anyhow!("circuit_breaker_error_rate out of range"));
        }
        if !(10..=1000).contains(&self.queue_deferral_rpm) {
            return Err(anyhow!("queue_deferral_rpm out of range"));
        }
        if !(20..=5000).contains(&self.load_shedding_rpm) {
            return Err(anyhow!("load_shedding_rpm out of range"));
        }
        if self.load_shedding_rpm <= self.queue_deferral_rpm {
            return Err(anyhow!("load_shedding_rpm must exceed queue_deferral_rpm"));
        }
        if !(5..=500).contains(&self.rate_limit_customer_rpm) {
            return Err(anyhow!("rate_limit_customer_rpm out of range"));
        }
        if !(50..=1000).contains(&self.reasoning.chars().count()) {
            return Err(anyhow!("reasoning length out of range [50,1000]"));
        }
        Confidence::parse(&self.confidence).ok_or_else(|| anyhow!("unrecognised confidence tag"))
    }

    pub fn into_threshold_record(
        &self,
        confidence: Confidence,
    ) -> ThresholdRecord {
        ThresholdRecord {
            cache_latency_ms: self.cache_latency_ms as f64,
            breaker_error_rate: self.circuit_breaker_error_rate,
            queue_rpm: self.queue_deferral_rpm as f64,
            shed_rpm: self.load_shedding_rpm as f64,
            per_client_rpm: self.rate_limit_customer_rpm as f64,
            confidence: confidence.as_f64(),
            reasoning: self.reasoning.clone(),
            source: crate::models::ThresholdSource::Tuned,
            last_updated: chrono::Utc::now(),
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

pub struct AdvisorClient {
    http: reqwest::Client,
    api_key: String,
}

impl AdvisorClient {
    pub fn from_env(http: reqwest::Client) -> Result<Self> {
        let api_key = std::env::var("ADVISOR_API_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .context("ADVISOR_API_KEY missing or empty")?;
        Ok(Self { http, api_key })
    }

    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
        }
    }

    /// Ask the Advisor for a tuned threshold recommendation given a prompt
    /// embedding the current snapshot and thresholds. Any exception along
    /// the way (network error, non-JSON body, schema violation) surfaces as
    /// `Err`; the Tuner treats that uniformly as "advisor failed" (§4.7).
    pub async fn advise(&self, prompt: &str) -> Result<AdvisorResponse> {
        let body = serde_json::json!({
            "model": ADVISOR_MODEL,
            "messages": [
                {"role": "system", "content": "You are a traffic threshold tuning advisor. Respond with a single JSON object matching the requested schema, nothing else."},
                {"role": "user", "content": prompt},
            ],
            "temperature": 0.2,
        });

        let resp = self
            .http
            .post(ADVISOR_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("advisor request failed")?
            .error_for_status()
            .context("advisor returned an error status")?;

        let parsed: ChatCompletionResponse =
            resp.json().await.context("advisor response not valid JSON")?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| anyhow!("advisor response had no choices"))?;

        serde_json::from_str(&content).context("advisor content did not match expected schema")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_response() -> AdvisorResponse {
        AdvisorResponse {
            cache_latency_ms: 450,
            circuit_breaker_error_rate: 0.25,
            queue_deferral_rpm: 70,
            load_shedding_rpm: 140,
            rate_limit_customer_rpm: 12,
            reasoning: "Latency and error rate have been stable over the observed window, allowing a modest tightening of thresholds.".to_string(),
            confidence: "medium".to_string(),
        }
    }

    #[test]
    fn valid_response_passes_validation() {
        let confidence = valid_response().validate().unwrap();
        assert_eq!(confidence, Confidence::Medium);
        assert!(confidence.is_actionable());
    }

    #[test]
    fn shed_not_exceeding_queue_is_rejected() {
        let mut response = valid_response();
        response.load_shedding_rpm = 70;
        response.queue_deferral_rpm = 70;
        assert!(response.validate().is_err());
    }

    #[test]
    fn short_reasoning_is_rejected() {
        let mut response = valid_response();
        response.reasoning = "too short".to_string();
        assert!(response.validate().is_err());
    }

    #[test]
    fn unrecognised_confidence_is_rejected() {
        let mut response = valid_response();
        response.confidence = "extremely-sure".to_string();
        assert!(response.validate().is_err());
    }

    #[test]
    fn low_confidence_is_not_actionable() {
        assert!(!Confidence::Low.is_actionable());
        assert!(Confidence::High.is_actionable());
    }

    #[test]
    fn out_of_range_cache_latency_is_rejected() {
        let mut response = valid_response();
        response.cache_latency_ms = 1;
        assert!(response.validate().is_err());
    }
}
