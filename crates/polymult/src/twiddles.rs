//! Twiddle tables and the shared twiddle cache.
//!
//! A table serves one poly-FFT length 2^a * 3^b * 5^c: per stage, the
//! sin/cos pairs for every (position, butterfly-leg) product, grouped into
//! one array for the radix-3 stages and one for the radix-2/4/5 stages.
//! Tables are immutable and handed out as `Arc`s, so a table in use by an
//! in-progress multiplication can never be replaced under it.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::sizes::smooth_factors;

/// Most twiddle tables the cache will hold.
pub const MAX_CACHED_TWIDDLES: usize = 40;

/// One butterfly pass of the mixed-radix transform.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Stage {
    pub radix: u8,
    /// Positions per block (`span / radix`).
    pub count: usize,
    /// Start of this stage's twiddles in its group table.
    pub offset: usize,
}

/// Sin/cos tables for one poly-FFT size.
pub struct TwiddleTable {
    size: usize,
    stages: Vec<Stage>,
    radix3: Vec<(f64, f64)>,
    radix45: Vec<(f64, f64)>,
}

impl TwiddleTable {
    /// Build the tables for a transform of `size` samples per line.
    #[must_use]
    pub(crate) fn new(size: usize) -> Self {
        let (twos, threes, fives) =
            smooth_factors(size).expect("poly-FFT size must be 2^a * 3^b * 5^c");

        let mut radices = Vec::new();
        radices.extend(std::iter::repeat(4u8).take((twos / 2) as usize));
        radices.extend(std::iter::repeat(2u8).take((twos % 2) as usize));
        radices.extend(std::iter::repeat(3u8).take(threes as usize));
        radices.extend(std::iter::repeat(5u8).take(fives as usize));

        let mut stages = Vec::with_capacity(radices.len());
        let mut radix3 = Vec::new();
        let mut radix45 = Vec::new();
        let mut span = size;
        for r in radices {
            let radix = r as usize;
            let count = span / radix;
            let table = if r == 3 { &mut radix3 } else { &mut radix45 };
            let offset = table.len();
            for j in 0..count {
                for q in 1..radix {
                    let theta = -2.0 * PI * (j * q) as f64 / span as f64;
                    let (sin, cos) = theta.sin_cos();
                    table.push((cos, sin));
                }
            }
            stages.push(Stage {
                radix: r,
                count,
                offset,
            });
            span = count;
        }

        Self {
            size,
            stages,
            radix3,
            radix45,
        }
    }

    /// Transform length this table serves.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The `(radix - 1)` twiddles of position `j` within a stage.
    #[inline]
    pub(crate) fn position_twiddles(&self, stage: &Stage, j: usize) -> &[(f64, f64)] {
        let legs = stage.radix as usize - 1;
        let table = if stage.radix == 3 {
            &self.radix3
        } else {
            &self.radix45
        };
        let start = stage.offset + j * legs;
        &table[start..start + legs]
    }
}

/// Cache of twiddle tables keyed by exact transform size.
///
/// On a miss the new table is built either way; it is only remembered when
/// additions are enabled and the cache has room. Cached tables live until
/// the owning handle is torn down.
pub struct TwiddleCache {
    entries: Mutex<Vec<Arc<TwiddleTable>>>,
    additions_enabled: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TwiddleCache {
    /// Create an empty cache with additions enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            additions_enabled: AtomicBool::new(true),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Gate for inserting new tables. Lookups are unaffected.
    pub fn set_additions_enabled(&self, enabled: bool) {
        self.additions_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Return a table for the given size, building one on a miss.
    pub fn ensure(&self, size: usize) -> Arc<TwiddleTable> {
        {
            let entries = self.entries.lock();
            if let Some(table) = entries.iter().find(|t| t.size() == size) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Arc::clone(table);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(size, "building twiddle table");
        let table = Arc::new(TwiddleTable::new(size));
        if self.additions_enabled.load(Ordering::Relaxed) {
            let mut entries = self.entries.lock();
            if entries.len() < MAX_CACHED_TWIDDLES && !entries.iter().any(|t| t.size() == size) {
                entries.push(Arc::clone(&table));
            }
        }
        table
    }

    /// Number of cached tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// (hits, misses) since creation.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl Default for TwiddleCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_all_stages() {
        let t = TwiddleTable::new(60); // 4 * 3 * 5
        let radices: Vec<u8> = t.stages().iter().map(|s| s.radix).collect();
        assert_eq!(radices, vec![4, 3, 5]);
        let product: usize = radices.iter().map(|&r| r as usize).product();
        assert_eq!(product, 60);
        // Spans shrink by the radix at each stage.
        assert_eq!(t.stages()[0].count, 15);
        assert_eq!(t.stages()[1].count, 5);
        assert_eq!(t.stages()[2].count, 1);
    }

    #[test]
    fn position_zero_twiddles_are_unity() {
        let t = TwiddleTable::new(45);
        for stage in t.stages() {
            for &(cos, sin) in t.position_twiddles(stage, 0) {
                assert!((cos - 1.0).abs() < 1e-12);
                assert!(sin.abs() < 1e-12);
            }
        }
    }

    #[test]
    fn cache_hit_returns_same_table() {
        let cache = TwiddleCache::new();
        let a = cache.ensure(24);
        let b = cache.ensure(24);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn cache_respects_additions_gate() {
        let cache = TwiddleCache::new();
        cache.set_additions_enabled(false);
        let a = cache.ensure(12);
        assert!(cache.is_empty());
        // Still valid to use the uncached table.
        assert_eq!(a.size(), 12);

        cache.set_additions_enabled(true);
        let b = cache.ensure(12);
        assert_eq!(cache.len(), 1);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn cache_caps_out() {
        let cache = TwiddleCache::new();
        let sizes: Vec<usize> = (1..2000)
            .filter(|&n| crate::sizes::is_smooth(n))
            .take(MAX_CACHED_TWIDDLES + 5)
            .collect();
        assert!(sizes.len() > MAX_CACHED_TWIDDLES);
        for size in sizes {
            cache.ensure(size);
        }
        assert_eq!(cache.len(), MAX_CACHED_TWIDDLES);
    }
}
