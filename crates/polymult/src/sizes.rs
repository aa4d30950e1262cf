//! Poly-FFT size selection, safety margin and memory estimation.
//!
//! These routines are usable before an engine is constructed: callers size
//! their engine with `safety_margin` and budget allocations with
//! `mem_required` ahead of the first multiplication.

use crate::karatsuba;
use crate::options::Options;

/// Factor `n` into its 2/3/5 exponents, returning `None` when a larger
/// prime remains.
pub(crate) fn smooth_factors(n: usize) -> Option<(u32, u32, u32)> {
    let mut n = n;
    let mut twos = 0;
    while n % 2 == 0 {
        n /= 2;
        twos += 1;
    }
    let mut threes = 0;
    while n % 3 == 0 {
        n /= 3;
        threes += 1;
    }
    let mut fives = 0;
    while n % 5 == 0 {
        n /= 5;
        fives += 1;
    }
    (n == 1).then_some((twos, threes, fives))
}

/// Whether `n` is a supported poly-FFT length (2^a * 3^b * 5^c).
pub(crate) fn is_smooth(n: usize) -> bool {
    n > 0 && smooth_factors(n).is_some()
}

/// Smallest supported poly-FFT length that can hold an `n`-coefficient
/// convolution.
#[must_use]
pub fn fft_size(n: usize) -> usize {
    let n = n.max(1);
    let mut best = usize::MAX;
    let mut p3 = 1usize;
    while p3 < 2 * n {
        let mut p35 = p3;
        while p35 < 2 * n {
            let mut candidate = p35;
            while candidate < n {
                candidate *= 2;
            }
            best = best.min(candidate);
            p35 = match p35.checked_mul(5) {
                Some(v) => v,
                None => break,
            };
        }
        p3 = match p3.checked_mul(3) {
            Some(v) => v,
            None => break,
        };
    }
    best
}

/// Relative butterfly work for a transform of length `n`, weighted per
/// radix, with a penalty once the per-line working set outgrows the cache
/// target.
fn transform_work(n: usize, l2_cache_kb: usize) -> f64 {
    let (twos, threes, fives) = smooth_factors(n).unwrap_or((0, 0, 0));
    let per_elem = 1.7 * f64::from(twos / 2) + f64::from(twos % 2) + 1.6 * f64::from(threes)
        + 2.8 * f64::from(fives);
    let mut work = n as f64 * per_elem;
    // One line of the transform occupies fft_size * 64 bytes.
    if n * 64 > l2_cache_kb * 1024 / 2 {
        work *= 1.25;
    }
    work
}

/// Pick the cheapest supported length >= `needed`, looking at every smooth
/// size up to twice the minimum and preferring cache-resident ones.
pub(crate) fn choose_fft_size(needed: usize, l2_cache_kb: usize) -> usize {
    let floor = fft_size(needed);
    let mut best = floor;
    let mut best_work = transform_work(floor, l2_cache_kb);
    let mut candidate = floor + 1;
    while candidate < 2 * floor {
        if is_smooth(candidate) {
            let work = transform_work(candidate, l2_cache_kb);
            if work < best_work {
                best = candidate;
                best_work = work;
            }
        }
        candidate += 1;
    }
    best
}

/// Extra bits of headroom the engine needs for an `n1` by `n2` multiply:
/// coefficient growth from summing products across the polynomial, plus
/// accumulated poly-FFT rounding.
#[must_use]
pub fn safety_margin(n1: usize, n2: usize) -> f64 {
    let nmin = n1.min(n2).max(1) as f64;
    let fft = fft_size(n1 + n2) as f64;
    nmin.log2() + 0.6 * fft.log2() + 2.0
}

/// Bytes of working memory an `n1` by `n2` multiplication needs, across
/// `num_threads` workers, for coefficients of `transform_size` doubles.
///
/// The estimate covers per-worker line scratch (expanded inputs, transform
/// images, the raw result, Karatsuba temporaries) plus the twiddle tables.
/// It intentionally ignores the caller-owned coefficient arrays.
#[must_use]
pub fn mem_required(
    n1: usize,
    n2: usize,
    options: &Options,
    num_threads: usize,
    transform_size: usize,
) -> u64 {
    let a1 = Options::full_len(options.invec1, n1.max(1));
    let a2 = Options::full_len(options.invec2, n2.max(1));
    let conv = a1 + a2 - 1;
    let fft = choose_fft_size(conv, 256);
    let tmp = karatsuba::scratch_len(a1, a2, 16);

    // Expanded inputs, two transform images, the raw result and the
    // Karatsuba scratch, all in 64-byte line elements.
    let per_worker = (a1 + a2 + 3 * fft + tmp) as u64 * 64;
    let twiddles = twiddle_bytes(fft);
    per_worker * num_threads.max(1) as u64 + twiddles + transform_size as u64 * 8
}

/// Approximate bytes of the sin/cos tables for a transform of length `n`.
fn twiddle_bytes(n: usize) -> u64 {
    let (twos, threes, fives) = smooth_factors(n).unwrap_or((0, 0, 0));
    let stages = u64::from(twos / 2 + twos % 2 + threes + fives);
    n as u64 * stages * 16
}
