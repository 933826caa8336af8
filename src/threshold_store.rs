//! Per-(tenant, service, endpoint) threshold records with range validation
//! and atomic publication (§3 Threshold Record, §4.3).
//!
//! `ArcSwap` replaces the donor's direct mutable-dict write: the Tuner
//! builds a whole new `ThresholdRecord` and swaps it in atomically, so the
//! Decision Engine never observes a record with some fields updated and
//! others stale. Grounded on the teacher's own `arc_swap::ArcSwap` usage in
//! its market-data hot path for the same atomic-replace pattern, now
//! reused for threshold publication instead of price ticks.

use std::collections::HashMap;

use anyhow::{bail, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::durable_store::DurableStore;
use crate::models::{ThresholdRecord, ThresholdSource};

fn key(tenant_id: &str, service_name: &str, endpoint: &str) -> String {
    format!("{tenant_id}:{service_name}:{endpoint}")
}

/// Validate the five threshold fields against their declared ranges plus
/// the shed > queue invariant (§3, §8 invariant 4).
pub fn validate(record: &ThresholdRecord) -> Result<()> {
    if !(10.0..=5000.0).contains(&record.cache_latency_ms) {
        bail!(
            "cache_latency_ms {} out of range [10,5000]",
            record.cache_latency_ms
        );
    }
    if !(0.01..=1.0).contains(&record.breaker_error_rate) {
        bail!(
            "breaker_error_rate {} out of range [0.01,1.0]",
            record.breaker_error_rate
        );
    }
    if !(10.0..=1000.0).contains(&record.queue_rpm) {
        bail!("queue_rpm {} out of range [10,1000]", record.queue_rpm);
    }
    if !(20.0..=5000.0).contains(&record.shed_rpm) {
        bail!("shed_rpm {} out of range [20,5000]", record.shed_rpm);
    }
    if !(5.0..=500.0).contains(&record.per_client_rpm) {
        bail!(
            "per_client_rpm {} out of range [5,500]",
            record.per_client_rpm
        );
    }
    if !(0.0..=1.0).contains(&record.confidence) {
        bail!("confidence {} out of range [0,1]", record.confidence);
    }
    if record.shed_rpm <= record.queue_rpm {
        bail!(
            "shed_rpm {} must exceed queue_rpm {}",
            record.shed_rpm,
            record.queue_rpm
        );
    }
    Ok(())
}

pub struct ThresholdStore {
    durable: Arc<DurableStore>,
    cache: Mutex<HashMap<String, Arc<ArcSwap<ThresholdRecord>>>>,
}

impl ThresholdStore {
    pub fn new(durable: Arc<DurableStore>) -> Self {
        Self {
            durable,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn slot_for(&self, tenant_id: &str, service_name: &str, endpoint: &str) -> Arc<ArcSwap<ThresholdRecord>> {
        let k = key(tenant_id, service_name, endpoint);
        let mut cache = self.cache.lock();
        cache
            .entry(k)
            .or_insert_with(|| Arc::new(ArcSwap::from_pointee(ThresholdRecord::defaults())))
            .clone()
    }

    /// Read the current record, falling back to the durable row, falling
    /// back to defaults with `source=default` (§4.3 ReadOne).
    pub fn read_one(&self, tenant_id: &str, service_name: &str, endpoint: &str) -> Result<ThresholdRecord> {
        let slot = self.slot_for(tenant_id, service_name, endpoint);
        let current = slot.load();
        if current.source == ThresholdSource::Tuned || current.confidence < 1.0 {
            return Ok((**current).clone());
        }
        // Cache holds the untouched default; check the durable store once in
        // case a tuned record was committed by a previous process.
        if let Some(stored) = self.durable.read_threshold(tenant_id, service_name, endpoint)? {
            slot.store(Arc::new(stored.clone()));
            return Ok(stored);
        }
        Ok((**current).clone())
    }

    /// Validate and commit a new record: write through to the Durable Store
    /// first, then swap the in-memory record atomically so readers never
    /// see a partially-applied update (§4.3 Upsert, §9).
    pub fn upsert(
        &self,
        tenant_id: &str,
        service_name: &str,
        endpoint: &str,
        record: ThresholdRecord,
    ) -> Result<()> {
        validate(&record)?;
        self.durable
            .upsert_threshold(tenant_id, service_name, endpoint, &record)?;
        let slot = self.slot_for(tenant_id, service_name, endpoint);
        slot.store(Arc::new(record));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_record() -> ThresholdRecord {
        ThresholdRecord {
            cache_latency_ms: 400.0,
            breaker_error_rate: 0.25,
            queue_rpm: 70.0,
            shed_rpm: 140.0,
            per_client_rpm: 12.0,
            confidence: 0.8,
            reasoning: "tuned from recent traffic".to_string(),
            source: ThresholdSource::Tuned,
            last_updated: chrono::Utc::now(),
        }
    }

    #[test]
    fn read_one_defaults_when_nothing_stored() {
        let durable = Arc::new(DurableStore::in_memory().unwrap());
        let store = ThresholdStore::new(durable);
        let record = store.read_one("t1", "svc", "/ep").unwrap();
        assert_eq!(record.source, ThresholdSource::Default);
        assert_eq!(record.shed_rpm, 150.0);
    }

    #[test]
    fn upsert_then_read_one_reflects_tuned_values() {
        let durable = Arc::new(DurableStore::in_memory().unwrap());
        let store = ThresholdStore::new(durable);
        store.upsert("t1", "svc", "/ep", valid_record()).unwrap();
        let record = store.read_one("t1", "svc", "/ep").unwrap();
        assert_eq!(record.source, ThresholdSource::Tuned);
        assert_eq!(record.shed_rpm, 140.0);
    }

    #[test]
    fn upsert_rejects_shed_not_exceeding_queue() {
        let durable = Arc::new(DurableStore::in_memory().unwrap());
        let store = ThresholdStore::new(durable);
        let mut record = valid_record();
        record.shed_rpm = 70.0;
        record.queue_rpm = 70.0;
        assert!(store.upsert("t1", "svc", "/ep", record).is_err());
    }

    #[test]
    fn upsert_rejects_out_of_range_field() {
        let durable = Arc::new(DurableStore::in_memory().unwrap());
        let store = ThresholdStore::new(durable);
        let mut record = valid_record();
        record.cache_latency_ms = 5.0;
        assert!(store.upsert("t1", "svc", "/ep", record).is_err());
    }
}
