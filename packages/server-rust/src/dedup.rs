//! Bounded idempotency cache keyed by command id.
//!
//! Queue transports deliver at least once. When enabled, the processor asks
//! this cache before applying a command and skips ids it has already seen.
//! Retention is bounded: once the cache is full, older ids are evicted and a
//! very late redelivery of one of them is applied again.

use std::time::Duration;

use quick_cache::sync::{Cache, GuardResult};

/// Set of recently seen command ids.
pub struct IdempotencyCache {
    seen: Cache<String, ()>,
}

impl IdempotencyCache {
    /// Creates a cache retaining roughly `capacity` ids.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: Cache::new(capacity.max(1)),
        }
    }

    /// Records `id` and reports whether this is its first sighting.
    ///
    /// Empty ids carry no identity and always count as first sightings.
    /// Two workers racing on the same id see exactly one `true`.
    #[must_use]
    pub fn first_sighting(&self, id: &str) -> bool {
        if id.is_empty() {
            return true;
        }
        match self.seen.get_value_or_guard(id, Some(Duration::ZERO)) {
            GuardResult::Guard(guard) => {
                let _ = guard.insert(());
                true
            }
            // Timeout means another worker holds the placeholder for this id.
            GuardResult::Value(()) | GuardResult::Timeout => false,
        }
    }

    /// Number of ids currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
