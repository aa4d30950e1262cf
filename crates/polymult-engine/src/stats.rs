//! Atomic engine statistics for lock-free usage tracking.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of engine operation counters.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Number of forward transforms performed.
    pub forward_transforms: u64,
    /// Number of inverse transforms performed.
    pub inverse_transforms: u64,
    /// Largest rounding error observed when converting transform samples
    /// back to integer digits. Must stay well below 0.5 for correct results.
    pub max_roundoff: f64,
}

/// Atomic engine statistics for lock-free updates.
///
/// Helper-thread engine clones each carry their own instance; clones are
/// drained into the parent at pool barrier exits via [`AtomicEngineStats::absorb`].
pub struct AtomicEngineStats {
    forward_transforms: AtomicU64,
    inverse_transforms: AtomicU64,
    // f64 bits; valid because rounding errors are non-negative, so the
    // IEEE bit patterns order the same way the values do.
    max_roundoff_bits: AtomicU64,
}

impl AtomicEngineStats {
    /// Create new zeroed stats.
    #[must_use]
    pub fn new() -> Self {
        Self {
            forward_transforms: AtomicU64::new(0),
            inverse_transforms: AtomicU64::new(0),
            max_roundoff_bits: AtomicU64::new(0),
        }
    }

    /// Record one forward transform.
    pub fn record_forward(&self) {
        self.forward_transforms.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one inverse transform.
    pub fn record_inverse(&self) {
        self.inverse_transforms.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rounding error, keeping the maximum.
    pub fn record_roundoff(&self, err: f64) {
        self.max_roundoff_bits
            .fetch_max(err.to_bits(), Ordering::Relaxed);
    }

    /// Take a snapshot of current stats.
    #[must_use]
    pub fn snapshot(&self) -> EngineStats {
        EngineStats {
            forward_transforms: self.forward_transforms.load(Ordering::Relaxed),
            inverse_transforms: self.inverse_transforms.load(Ordering::Relaxed),
            max_roundoff: f64::from_bits(self.max_roundoff_bits.load(Ordering::Relaxed)),
        }
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.forward_transforms.store(0, Ordering::Relaxed);
        self.inverse_transforms.store(0, Ordering::Relaxed);
        self.max_roundoff_bits.store(0, Ordering::Relaxed);
    }

    /// Drain `other` into `self`: counters are added, the maximum rounding
    /// error is merged, and `other` is reset.
    pub fn absorb(&self, other: &AtomicEngineStats) {
        self.forward_transforms.fetch_add(
            other.forward_transforms.swap(0, Ordering::Relaxed),
            Ordering::Relaxed,
        );
        self.inverse_transforms.fetch_add(
            other.inverse_transforms.swap(0, Ordering::Relaxed),
            Ordering::Relaxed,
        );
        self.max_roundoff_bits.fetch_max(
            other.max_roundoff_bits.swap(0, Ordering::Relaxed),
            Ordering::Relaxed,
        );
    }
}

impl Default for AtomicEngineStats {
    fn default() -> Self {
        Self::new()
    }
}
