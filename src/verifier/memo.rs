//! Per-run memo of verification outcomes.
//!
//! One memo is created for each assembly and dropped with it; nothing is
//! carried between runs. Keys are xxHash64 digests of `(unit_id, color)`.

use lru::LruCache;
use parking_lot::RwLock;
use std::hash::Hasher;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use xxhash_rust::xxh64::Xxh64;

use super::Availability;
use crate::types::{ColorId, UnitTypeId};

/// Capacity used when zero is requested.
const FALLBACK_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(n) => n,
    None => unreachable!(),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MemoKey(u64);

impl MemoKey {
    fn compute(unit_id: &UnitTypeId, color: ColorId) -> Self {
        let mut hasher = Xxh64::new(0);
        hasher.write(unit_id.as_str().as_bytes());
        hasher.write(&[0xff]);
        hasher.write(&color.get().to_le_bytes());
        Self(hasher.finish())
    }
}

/// Memo statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoStats {
    /// Entries stored.
    pub len: usize,
    /// Capacity.
    pub cap: usize,
    /// Lookups answered from the memo.
    pub hits: usize,
}

/// Thread-safe LRU memo of availability outcomes.
#[derive(Debug, Clone)]
pub struct VerificationMemo {
    cache: Arc<RwLock<LruCache<MemoKey, Availability>>>,
    hits: Arc<AtomicUsize>,
}

impl VerificationMemo {
    /// Create a memo holding up to `capacity` outcomes.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(FALLBACK_CAPACITY);
        Self {
            cache: Arc::new(RwLock::new(LruCache::new(cap))),
            hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Look up an outcome.
    pub fn get(&self, unit_id: &UnitTypeId, color: ColorId) -> Option<Availability> {
        let key = MemoKey::compute(unit_id, color);
        let found = self.cache.read().peek(&key).copied();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Store an outcome. `Unknown` is not stored so it can be retried.
    pub fn put(&self, unit_id: &UnitTypeId, color: ColorId, outcome: Availability) {
        if outcome == Availability::Unknown {
            return;
        }
        self.cache
            .write()
            .put(MemoKey::compute(unit_id, color), outcome);
    }

    /// Current statistics.
    pub fn stats(&self) -> MemoStats {
        let cache = self.cache.read();
        MemoStats {
            len: cache.len(),
            cap: cache.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
        }
    }
}
