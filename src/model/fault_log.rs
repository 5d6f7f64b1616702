//! # Fault-Log Cache
//!
//! Bounded, insertion-ordered store for decoded controller fault-log entries
//! with a gap-detection fetch policy. The controller pushes entries in no
//! particular order; after each insert the cache computes the next missing
//! sequence number so the session loop can request it, turning the unordered
//! stream into a complete, monotonically filled log without a separate
//! reconciliation pass.
//!
//! A single mutex guards the map, the insertion order and the gap scan: the
//! scan must observe a consistent view of the inserted keys.

use crate::constants::FAULT_LOG_CAPACITY;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// One decoded fault-log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultLogEntry {
    /// Controller-assigned sequence number.
    pub number: u8,
    /// Fault code.
    pub code: u8,
    /// Occurrence time reconstructed from the days-ago/hour/minute fields.
    pub timestamp: DateTime<Utc>,
    /// Target temperature at fault time, Fahrenheit.
    pub target_temp: i32,
    /// Sensor A temperature at fault time, Fahrenheit.
    pub sensor_a_temp: i32,
    /// Sensor B temperature at fault time, Fahrenheit.
    pub sensor_b_temp: i32,
    /// Whether the panel was displaying Celsius when the fault occurred.
    pub celsius: bool,
    /// Set once the entry has been included in an uplink batch.
    pub sent: bool,
}

/// Dedup key: the controller may rebroadcast an entry verbatim.
type EntryKey = (u8, u8, DateTime<Utc>);

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<EntryKey, FaultLogEntry>,
    /// Insertion order, oldest at the front, for bounded eviction.
    order: VecDeque<EntryKey>,
    /// Next sequence number the session loop should request, if any.
    next_to_fetch: Option<u8>,
}

/// Bounded fault-log cache with gap-fill policy.
#[derive(Debug)]
pub struct FaultLogCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl Default for FaultLogCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Batch of entries handed to the uplink dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultLogBatch {
    pub entries: Vec<FaultLogEntry>,
}

impl FaultLogCache {
    pub fn new() -> FaultLogCache {
        Self::with_capacity(FAULT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> FaultLogCache {
        FaultLogCache {
            inner: Mutex::new(CacheInner::default()),
            capacity,
        }
    }

    /// Inserts an entry, returning true if it was newly added.
    ///
    /// On overflow the oldest entry is evicted. After an insert the
    /// next-to-fetch pointer moves to the entry number minus one and is then
    /// decremented past every number already present, stopping at the first
    /// gap.
    pub fn add_entry(&self, entry: FaultLogEntry) -> bool {
        let mut inner = self.inner.lock().expect("fault log lock poisoned");
        let key = (entry.number, entry.code, entry.timestamp);
        if inner.entries.contains_key(&key) {
            return false;
        }
        while inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
        let number = entry.number;
        inner.order.push_back(key);
        inner.entries.insert(key, entry);

        let present: HashSet<u8> = inner.entries.keys().map(|k| k.0).collect();
        let mut next = number.checked_sub(1);
        while let Some(n) = next {
            if !present.contains(&n) {
                break;
            }
            next = n.checked_sub(1);
        }
        inner.next_to_fetch = next;
        true
    }

    /// Sequence number of the first gap below the newest insert, if any.
    pub fn next_to_fetch(&self) -> Option<u8> {
        self.inner.lock().expect("fault log lock poisoned").next_to_fetch
    }

    /// True if any cached entry has not yet been uplinked.
    pub fn has_unsent(&self) -> bool {
        let inner = self.inner.lock().expect("fault log lock poisoned");
        inner.entries.values().any(|e| !e.sent)
    }

    /// Removes nothing, but marks every unsent entry sent and returns them in
    /// insertion order. Returns `None` when everything is already sent.
    pub fn take_unsent_batch(&self) -> Option<FaultLogBatch> {
        let mut inner = self.inner.lock().expect("fault log lock poisoned");
        let keys: Vec<EntryKey> = inner
            .order
            .iter()
            .filter(|k| inner.entries.get(k).map(|e| !e.sent).unwrap_or(false))
            .cloned()
            .collect();
        if keys.is_empty() {
            return None;
        }
        let mut batch = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.sent = true;
                batch.push(entry.clone());
            }
        }
        Some(FaultLogBatch { entries: batch })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("fault log lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(number: u8) -> FaultLogEntry {
        FaultLogEntry {
            number,
            code: 0x10,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, number as u32 % 60, 0).unwrap(),
            target_temp: 100,
            sensor_a_temp: 99,
            sensor_b_temp: 98,
            celsius: false,
            sent: false,
        }
    }

    #[test]
    fn test_gap_fill_monotonicity() {
        let cache = FaultLogCache::new();
        assert!(cache.add_entry(entry(10)));
        assert!(cache.add_entry(entry(8)));
        assert_eq!(cache.next_to_fetch(), Some(9));

        assert!(cache.add_entry(entry(9)));
        // 9, 8 now contiguous below 10; scan continues to the next gap.
        assert_eq!(cache.next_to_fetch(), Some(7));
    }

    #[test]
    fn test_duplicate_rejected() {
        let cache = FaultLogCache::new();
        assert!(cache.add_entry(entry(4)));
        assert!(!cache.add_entry(entry(4)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_bounded_eviction_oldest_first() {
        let cache = FaultLogCache::new();
        for i in 0..300u16 {
            let mut e = entry((i % 256) as u8);
            // Distinct timestamps keep all 300 inserts unique.
            e.timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::seconds(i as i64);
            assert!(cache.add_entry(e));
        }
        assert_eq!(cache.len(), FAULT_LOG_CAPACITY);
    }

    #[test]
    fn test_unsent_batch_marks_sent() {
        let cache = FaultLogCache::new();
        cache.add_entry(entry(1));
        cache.add_entry(entry(2));
        assert!(cache.has_unsent());

        let batch = cache.take_unsent_batch().unwrap();
        assert_eq!(batch.entries.len(), 2);
        assert!(!cache.has_unsent());
        assert!(cache.take_unsent_batch().is_none());
    }

    #[test]
    fn test_fetch_stops_at_zero() {
        let cache = FaultLogCache::new();
        cache.add_entry(entry(1));
        assert_eq!(cache.next_to_fetch(), Some(0));
        cache.add_entry(entry(0));
        assert_eq!(cache.next_to_fetch(), None);
    }
}
