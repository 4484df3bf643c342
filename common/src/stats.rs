use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Append-only counter map shared with the crawler host.
///
/// Cloning is cheap and every clone observes the same counters, so the
/// exporter, the replay middleware and the host can all bump values without
/// coordination.
#[derive(Clone, Default)]
pub struct Stats {
    inner: Arc<Mutex<BTreeMap<String, u64>>>,
}

impl Stats {
    pub fn new() -> Stats {
        Stats::default()
    }

    pub fn inc(&self, key: &str) {
        self.add(key, 1);
    }

    pub fn add(&self, key: &str, amount: u64) {
        let mut counters = self.inner.lock().expect("stats lock poisoned");
        *counters.entry(key.to_owned()).or_insert(0) += amount;
    }

    pub fn get(&self, key: &str) -> u64 {
        let counters = self.inner.lock().expect("stats lock poisoned");
        counters.get(key).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.inner.lock().expect("stats lock poisoned").clone()
    }
}
