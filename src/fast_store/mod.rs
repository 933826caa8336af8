//! In-memory key/value store with atomic counter ops, a capped latency
//! reservoir, per-key TTL, and prefix pattern scan (§2 Fast Store, §4.2).
//!
//! Grounded on the teacher's `middleware/rate_limit.rs` sharded-state pattern
//! (`parking_lot::Mutex` guarding a `HashMap`) and `signals/storage.rs`'s
//! bounded ring buffer for capping + oldest-first eviction. The donor system
//! keeps a counter document and a `:latencies` sorted set as two Redis keys;
//! per §9 these are treated here as one logical aggregate behind a single
//! per-key lock, so a reader never sees the counters updated without the
//! matching reservoir sample or vice versa.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One window's accumulated counters plus its bounded latency reservoir.
#[derive(Debug, Clone, Default)]
pub struct CounterEntry {
    pub count: u64,
    pub sum_latency_ms: f64,
    pub error_count: u64,
    /// (ingest sequence, latency) pairs, oldest first, capped at
    /// `RESERVOIR_CAP` (§3 Window Aggregate, §8 invariant 3).
    pub reservoir: Vec<(u64, f64)>,
}

pub const RESERVOIR_CAP: usize = 1000;

impl CounterEntry {
    fn record(&mut self, seq: u64, latency_ms: f64, is_error: bool) {
        self.count += 1;
        self.sum_latency_ms += latency_ms;
        if is_error {
            self.error_count += 1;
        }
        self.reservoir.push((seq, latency_ms));
        if self.reservoir.len() > RESERVOIR_CAP {
            self.reservoir.remove(0);
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_latency_ms / self.count as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.count as f64
        }
    }

    /// Linear-interpolation percentile over the reservoir (§4.2, §8 Percentile
    /// property): k = (q/100)(n-1); returns S[f] + d*(S[min(f+1,n-1)]-S[f]).
    pub fn percentile(&self, q: f64) -> f64 {
        if self.reservoir.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.reservoir.iter().map(|(_, lat)| *lat).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let n = sorted.len();
        let k = (q / 100.0) * (n as f64 - 1.0);
        let f = k.floor() as usize;
        let c = (f + 1).min(n - 1);
        let d = k - f as f64;
        sorted[f] + d * (sorted[c] - sorted[f])
    }
}

struct Slot {
    entry: CounterEntry,
    expires_at: Instant,
}

/// Minimal per-customer counter (§3 Per-Client Aggregate): just a count and a
/// TTL, no reservoir.
struct ClientSlot {
    count: u64,
    expires_at: Instant,
}

/// The Fast Store itself. One `Mutex<HashMap<..>>` shard per logical
/// concern, matching the teacher's rate limiter's single-map-per-layer
/// approach rather than a single giant lock.
pub struct FastStore {
    windows: Mutex<HashMap<String, Slot>>,
    clients: Mutex<HashMap<String, ClientSlot>>,
    seq: Mutex<u64>,
    capacity: usize,
}

impl FastStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            clients: Mutex::new(HashMap::new()),
            seq: Mutex::new(0),
            capacity,
        }
    }

    fn next_seq(&self) -> u64 {
        let mut seq = self.seq.lock();
        *seq += 1;
        *seq
    }

    /// Read-modify-write a window counter, refreshing its TTL (§4.2).
    pub fn record_window(&self, key: &str, latency_ms: f64, is_error: bool, ttl: Duration) {
        let seq = self.next_seq();
        let mut windows = self.windows.lock();
        if windows.len() >= self.capacity && !windows.contains_key(key) {
            self.evict_one_expired(&mut windows);
        }
        let slot = windows.entry(key.to_string()).or_insert_with(|| Slot {
            entry: CounterEntry::default(),
            expires_at: Instant::now() + ttl,
        });
        slot.entry.record(seq, latency_ms, is_error);
        slot.expires_at = Instant::now() + ttl;
    }

    fn evict_one_expired(&self, windows: &mut HashMap<String, Slot>) {
        let now = Instant::now();
        if let Some(stale_key) = windows
            .iter()
            .find(|(_, slot)| slot.expires_at <= now)
            .map(|(k, _)| k.clone())
        {
            windows.remove(&stale_key);
        }
    }

    /// Read a window's counters if present and not expired.
    pub fn read_window(&self, key: &str) -> Option<CounterEntry> {
        let windows = self.windows.lock();
        windows.get(key).and_then(|slot| {
            if slot.expires_at > Instant::now() {
                Some(slot.entry.clone())
            } else {
                None
            }
        })
    }

    /// Read-modify-write the per-client minute bucket (§3 Per-Client
    /// Aggregate, TTL 120s).
    pub fn record_client(&self, key: &str, ttl: Duration) {
        let mut clients = self.clients.lock();
        let slot = clients.entry(key.to_string()).or_insert_with(|| ClientSlot {
            count: 0,
            expires_at: Instant::now() + ttl,
        });
        slot.count += 1;
        slot.expires_at = Instant::now() + ttl;
    }

    pub fn read_client_count(&self, key: &str) -> u64 {
        let clients = self.clients.lock();
        clients
            .get(key)
            .filter(|slot| slot.expires_at > Instant::now())
            .map(|slot| slot.count)
            .unwrap_or(0)
    }

    /// Prefix pattern scan over window keys (used by cache invalidation and
    /// the snapshot worker's "scan all Aggregator window keys" step).
    pub fn scan_prefix(&self, prefix: &str) -> Vec<String> {
        let windows = self.windows.lock();
        windows
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn delete(&self, key: &str) {
        self.windows.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_empty_reservoir_is_zero() {
        let entry = CounterEntry::default();
        assert_eq!(entry.percentile(50.0), 0.0);
        assert_eq!(entry.percentile(99.0), 0.0);
    }

    #[test]
    fn percentile_linear_interpolation() {
        let mut entry = CounterEntry::default();
        for (i, lat) in [10.0, 20.0, 30.0, 40.0, 50.0].into_iter().enumerate() {
            entry.record(i as u64, lat, false);
        }
        // n=5, q=50 -> k=2.0 -> S[2] = 30.0
        assert_eq!(entry.percentile(50.0), 30.0);
        // q=75 -> k=3.0 -> S[3] = 40.0
        assert_eq!(entry.percentile(75.0), 40.0);
    }

    #[test]
    fn reservoir_caps_and_evicts_oldest() {
        let mut entry = CounterEntry::default();
        for i in 0..(RESERVOIR_CAP + 10) {
            entry.record(i as u64, i as f64, false);
        }
        assert_eq!(entry.reservoir.len(), RESERVOIR_CAP);
        assert_eq!(entry.reservoir.first().unwrap().0, 10);
    }

    #[test]
    fn monotonic_count_and_error_bound() {
        let mut entry = CounterEntry::default();
        entry.record(1, 10.0, false);
        entry.record(2, 20.0, true);
        assert_eq!(entry.count, 2);
        assert!(entry.error_count <= entry.count);
        assert_eq!(entry.error_rate(), 0.5);
    }

    #[test]
    fn record_and_read_window_round_trip() {
        let store = FastStore::new(1024);
        store.record_window("k1", 100.0, false, Duration::from_secs(60));
        let entry = store.read_window("k1").unwrap();
        assert_eq!(entry.count, 1);
        assert_eq!(entry.avg_latency_ms(), 100.0);
    }

    #[test]
    fn client_counter_ttl_and_read() {
        let store = FastStore::new(1024);
        store.record_client("c1", Duration::from_secs(120));
        store.record_client("c1", Duration::from_secs(120));
        assert_eq!(store.read_client_count("c1"), 2);
        assert_eq!(store.read_client_count("missing"), 0);
    }

    #[test]
    fn scan_prefix_finds_matching_keys() {
        let store = FastStore::new(1024);
        store.record_window("rt_agg:tenant:a:1m", 1.0, false, Duration::from_secs(120));
        store.record_window("rt_agg:tenant:a:1h", 1.0, false, Duration::from_secs(3600));
        store.record_window("rt_agg:tenant:b:1m", 1.0, false, Duration::from_secs(120));
        let matches = store.scan_prefix("rt_agg:tenant:a:");
        assert_eq!(matches.len(), 2);
    }
}
