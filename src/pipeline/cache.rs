//! Cross-request record cache keyed by content fingerprint.
//!
//! The processor asks the cache for a per-key slot and initializes it at most
//! once; callers racing on the same image share one computation. A failed
//! computation leaves the slot empty so the next caller retries.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use super::processor::ProcessRequest;
use super::structuring::StructuredRecord;

/// SHA-256 (hex) over the image bytes and every request parameter that can
/// change the resulting record.
pub fn content_fingerprint(image_bytes: &[u8], request: &ProcessRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_bytes);
    hasher.update([0u8]);
    hasher.update(request.confidence_threshold.to_bits().to_le_bytes());
    hasher.update(request.language.as_bytes());
    hasher.update([0u8, u8::from(request.include_unclassified)]);
    if let Some(hint) = &request.patient_hint {
        hasher.update(b"hint");
        hasher.update(hint.age.map_or(u32::MAX, |a| a).to_le_bytes());
        hasher.update(hint.sex.map_or("", |s| s.as_str()).as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Shared store of finished records.
pub trait RecordCache: Send + Sync {
    /// Slot for `key`. Every caller asking for the same live key gets the
    /// same cell.
    fn slot(&self, key: &str) -> Arc<OnceCell<StructuredRecord>>;
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<String, Arc<OnceCell<StructuredRecord>>>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

/// In-process cache holding at most `capacity` records, evicting the oldest.
pub struct MemoryRecordCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl MemoryRecordCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordCache for MemoryRecordCache {
    fn slot(&self, key: &str) -> Arc<OnceCell<StructuredRecord>> {
        if self.capacity == 0 {
            return Arc::new(OnceCell::new());
        }
        // A panic while holding the lock cannot leave the maps inconsistent.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = state.slots.get(key) {
            return Arc::clone(slot);
        }

        let slot = Arc::new(OnceCell::new());
        state.slots.insert(key.to_string(), Arc::clone(&slot));
        state.order.push_back(key.to_string());
        while state.order.len() > self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.slots.remove(&oldest);
                tracing::debug!(key = oldest.as_str(), "Record cache entry evicted");
            }
        }
        slot
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::models::enums::Sex;
    use crate::pipeline::structuring::PatientHint;

    fn request() -> ProcessRequest {
        ProcessRequest::default()
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = content_fingerprint(b"image", &request());
        let b = content_fingerprint(b"image", &request());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_covers_bytes_and_request() {
        let base = content_fingerprint(b"image", &request());
        assert_ne!(base, content_fingerprint(b"other", &request()));

        let mut stricter = request();
        stricter.confidence_threshold = 0.9;
        assert_ne!(base, content_fingerprint(b"image", &stricter));

        let mut hinted = request();
        hinted.patient_hint = Some(PatientHint {
            age: Some(30),
            sex: Some(Sex::Female),
        });
        assert_ne!(base, content_fingerprint(b"image", &hinted));

        let mut english = request();
        english.language = "en".to_string();
        assert_ne!(base, content_fingerprint(b"image", &english));
    }

    #[test]
    fn same_key_shares_slot() {
        let cache = MemoryRecordCache::new(4);
        let a = cache.slot("k");
        let b = cache.slot("k");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &cache.slot("other")));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn oldest_entry_is_evicted() {
        let cache = MemoryRecordCache::new(2);
        let first = cache.slot("a");
        cache.slot("b");
        cache.slot("c");
        assert_eq!(cache.len(), 2);
        assert!(!Arc::ptr_eq(&first, &cache.slot("a")));
    }

    #[test]
    fn zero_capacity_never_shares() {
        let cache = MemoryRecordCache::new(0);
        assert!(!Arc::ptr_eq(&cache.slot("k"), &cache.slot("k")));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn slot_initializes_once() {
        let cache = MemoryRecordCache::new(4);
        let runs = AtomicUsize::new(0);
        let init = || async {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(sample_record())
        };

        let slot_a = cache.slot("k");
        let slot_b = cache.slot("k");
        let (a, b) = tokio::join!(slot_a.get_or_try_init(init), slot_b.get_or_try_init(init));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_init_leaves_slot_empty() {
        let cache = MemoryRecordCache::new(4);
        let slot = cache.slot("k");
        let failed = slot
            .get_or_try_init(|| async { Err::<StructuredRecord, _>("ocr down") })
            .await;
        assert!(failed.is_err());
        assert!(cache.slot("k").get().is_none());
    }

    fn sample_record() -> StructuredRecord {
        StructuredRecord {
            patient: Default::default(),
            laboratory: Default::default(),
            exam_type: "unknown".to_string(),
            exam_corroborated: false,
            parameters: Vec::new(),
            total_parameters: 0,
            filtered_out: 0,
            unclassified: Vec::new(),
            statistics: Default::default(),
            categories: Default::default(),
            insights: Vec::new(),
            overall_confidence: 0.0,
            low_confidence: true,
            raw_text: String::new(),
        }
    }
}
