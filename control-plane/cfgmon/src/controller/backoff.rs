use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::crd::monitored_service::ResourceId;

/// Per-identity exponential backoff for failed reconcile passes. The delay
/// doubles with each consecutive failure up to `max` and resets after a
/// successful pass.
#[derive(Debug)]
pub struct FailureBackoff {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<ResourceId, u32>>,
}

impl FailureBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_delay(&self, id: &ResourceId) -> Duration {
        let mut failures =
            self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let n = failures.entry(id.clone()).or_insert(0);
        let exp = (*n).min(20);
        *n = n.saturating_add(1);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |d| d.min(self.max))
    }

    pub fn reset(&self, id: &ResourceId) {
        let mut failures =
            self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.remove(id);
    }

    /// Identities currently backing off.
    pub fn tracked(&self) -> usize {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
