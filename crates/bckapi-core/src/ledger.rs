use std::collections::HashMap;
use std::sync::Mutex;

use time::OffsetDateTime;

/// Consecutive failures of one operation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    pub count: u32,
    pub last_failure: OffsetDateTime,
}

/// Per-operation failure counters.
///
/// A key exists only while its operation keeps failing: the first success
/// removes it entirely.
#[derive(Debug, Default)]
pub struct ErrorLedger {
    entries: Mutex<HashMap<String, FailureRecord>>,
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&self, key: &str) -> FailureRecord {
        let mut entries = self.lock();
        let now = OffsetDateTime::now_utc();
        let record = entries
            .entry(key.to_owned())
            .and_modify(|record| {
                record.count = record.count.saturating_add(1);
                record.last_failure = now;
            })
            .or_insert(FailureRecord {
                count: 1,
                last_failure: now,
            });
        *record
    }

    pub fn record_success(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn get(&self, key: &str) -> Option<FailureRecord> {
        self.lock().get(key).copied()
    }

    pub fn is_failing(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, FailureRecord>> {
        self.entries.lock().expect("error ledger lock is not poisoned")
    }
}
