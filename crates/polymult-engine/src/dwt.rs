//! Reference floating-point engine.
//!
//! A big integer is decomposed into balanced base-2^b digits which become
//! the real parts of a complex sample array; the per-number transform is an
//! in-place complex FFT. The transform is kept in decimation-scrambled
//! order: the engine's transform domain is only ever combined elementwise
//! (lane-wise products and sums), so the output permutation of the forward
//! pass cancels against the inverse pass and no reordering is needed.
//!
//! Balanced digits keep sample magnitudes small, which is what buys the
//! floating-point headroom the safety margin accounts for. The inverse
//! transform rounds every digit back to an integer and tracks the largest
//! rounding error seen; results are only trustworthy while that error stays
//! well below 0.5.

use std::f64::consts::PI;
use std::sync::Arc;

use num_bigint::{BigInt, Sign};
use num_traits::Zero;

use crate::engine::FftEngine;
use crate::stats::{AtomicEngineStats, EngineStats};

/// Coefficient handle of the reference engine.
pub struct DwtNum {
    data: Vec<f64>,
    transformed: bool,
}

impl DwtNum {
    fn zeroed(transform_size: usize) -> Self {
        Self {
            data: vec![0.0; transform_size],
            transformed: false,
        }
    }
}

/// Reference engine over balanced-digit complex FFT representations.
pub struct DwtEngine {
    bins: usize,
    digit_bits: u32,
    max_value_bits: u64,
    roots: Arc<Vec<(f64, f64)>>,
    stats: AtomicEngineStats,
}

impl DwtEngine {
    /// Create an engine able to hold products of values up to
    /// `max_value_bits` bits each, with `safety_margin` extra bits of
    /// floating-point headroom (see `polymult`'s `safety_margin`).
    ///
    /// Digit width and transform size are derived so that the largest
    /// possible digit-convolution value, grown by the margin, still rounds
    /// exactly in an f64.
    #[must_use]
    pub fn new(max_value_bits: u64, safety_margin: f64) -> Self {
        let margin = safety_margin.max(0.0);
        // Bits the transform must be able to carry: one full product plus
        // the margin's growth allowance.
        let value_bits = 2 * max_value_bits + margin.ceil() as u64 + 2;

        let mut chosen = None;
        for digit_bits in (4..=24u32).rev() {
            let digits = (value_bits as usize).div_ceil(digit_bits as usize) + 2;
            let bins = digits.next_power_of_two().max(4);
            let float_bits = 2.0 * f64::from(digit_bits - 1) + (bins as f64).log2() + margin;
            if float_bits <= 44.0 {
                chosen = Some((digit_bits, bins));
                break;
            }
        }
        let (digit_bits, bins) =
            chosen.expect("coefficient size exceeds the reference engine's f64 precision budget");

        let roots = (0..bins)
            .map(|k| {
                let theta = -2.0 * PI * k as f64 / bins as f64;
                let (sin, cos) = theta.sin_cos();
                (cos, sin)
            })
            .collect();

        Self {
            bins,
            digit_bits,
            max_value_bits,
            roots: Arc::new(roots),
            stats: AtomicEngineStats::new(),
        }
    }

    /// Largest coefficient bit-length this engine was sized for.
    #[must_use]
    pub fn max_value_bits(&self) -> u64 {
        self.max_value_bits
    }

    /// Bits per balanced digit.
    #[must_use]
    pub fn digit_bits(&self) -> u32 {
        self.digit_bits
    }

    /// Snapshot of the engine's operation counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.stats.snapshot()
    }

    /// Reset the engine's operation counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Build a coefficient from an integer value (untransformed).
    #[must_use]
    pub fn from_int(&self, v: &BigInt) -> DwtNum {
        assert!(
            v.bits() <= self.max_value_bits,
            "value of {} bits exceeds the engine's {}-bit sizing",
            v.bits(),
            self.max_value_bits
        );
        let mut num = DwtNum::zeroed(self.transform_size());
        let limbs = v.magnitude().to_u64_digits();
        let base = 1i64 << self.digit_bits;
        let half = base >> 1;

        let mut carry = 0i64;
        for i in 0..self.bins {
            let mut d = extract_bits(&limbs, i * self.digit_bits as usize, self.digit_bits) as i64
                + carry;
            if d > half {
                d -= base;
                carry = 1;
            } else {
                carry = 0;
            }
            num.data[2 * i] = d as f64;
        }
        debug_assert_eq!(carry, 0, "digit array too small for value");

        if v.sign() == Sign::Minus {
            for i in 0..self.bins {
                num.data[2 * i] = -num.data[2 * i];
            }
        }
        num
    }

    /// Read a coefficient's integer value. The handle must be untransformed.
    #[must_use]
    pub fn to_int(&self, num: &DwtNum) -> BigInt {
        assert!(!num.transformed, "cannot read a transformed coefficient");
        let mut value = BigInt::zero();
        for i in (0..self.bins).rev() {
            value <<= self.digit_bits;
            let d = num.data[2 * i];
            value += BigInt::from(d as i64);
        }
        value
    }

    fn forward_stages(&self, data: &mut [f64]) {
        let n = self.bins;
        let roots = &*self.roots;
        let mut span = n;
        while span >= 2 {
            let half = span / 2;
            let step = n / span;
            for block in (0..n).step_by(span) {
                for j in 0..half {
                    let (wr, wi) = roots[j * step];
                    let i0 = 2 * (block + j);
                    let i1 = 2 * (block + j + half);
                    let (ar, ai) = (data[i0], data[i0 + 1]);
                    let (br, bi) = (data[i1], data[i1 + 1]);
                    data[i0] = ar + br;
                    data[i0 + 1] = ai + bi;
                    let (dr, di) = (ar - br, ai - bi);
                    data[i1] = dr * wr - di * wi;
                    data[i1 + 1] = dr * wi + di * wr;
                }
            }
            span = half;
        }
    }

    fn inverse_stages(&self, data: &mut [f64]) {
        let n = self.bins;
        let roots = &*self.roots;
        let mut span = 2;
        while span <= n {
            let half = span / 2;
            let step = n / span;
            for block in (0..n).step_by(span) {
                for j in 0..half {
                    let (wr, wi) = roots[j * step];
                    let i0 = 2 * (block + j);
                    let i1 = 2 * (block + j + half);
                    let (ur, ui) = (data[i0], data[i0 + 1]);
                    let (vr, vi) = (data[i1], data[i1 + 1]);
                    // t = v * conj(w)
                    let tr = vr * wr + vi * wi;
                    let ti = vi * wr - vr * wi;
                    data[i0] = ur + tr;
                    data[i0 + 1] = ui + ti;
                    data[i1] = ur - tr;
                    data[i1 + 1] = ui - ti;
                }
            }
            span *= 2;
        }
        let scale = 1.0 / n as f64;
        for x in data.iter_mut() {
            *x *= scale;
        }
    }
}

impl FftEngine for DwtEngine {
    type Num = DwtNum;

    fn transform_size(&self) -> usize {
        2 * self.bins
    }

    fn alloc(&self) -> DwtNum {
        DwtNum::zeroed(self.transform_size())
    }

    fn fft(&self, num: &mut DwtNum) {
        if num.transformed {
            return;
        }
        self.forward_stages(&mut num.data);
        num.transformed = true;
        self.stats.record_forward();
    }

    fn unfft(&self, num: &mut DwtNum) {
        if !num.transformed {
            return;
        }
        self.inverse_stages(&mut num.data);
        let mut max_err = 0.0f64;
        for i in 0..self.bins {
            let re = num.data[2 * i];
            let rounded = re.round();
            max_err = max_err.max((re - rounded).abs()).max(num.data[2 * i + 1].abs());
            num.data[2 * i] = rounded;
            num.data[2 * i + 1] = 0.0;
        }
        self.stats.record_roundoff(max_err);
        num.transformed = false;
        self.stats.record_inverse();
    }

    fn start_next_fft(&self, num: &mut DwtNum) {
        self.unfft(num);
        self.fft(num);
    }

    fn is_transformed(&self, num: &DwtNum) -> bool {
        num.transformed
    }

    fn set_transformed(&self, num: &mut DwtNum) {
        num.transformed = true;
    }

    fn data<'a>(&self, num: &'a DwtNum) -> &'a [f64] {
        &num.data
    }

    fn data_mut<'a>(&self, num: &'a mut DwtNum) -> &'a mut [f64] {
        &mut num.data
    }

    fn add_into(&self, dst: &mut DwtNum, src: &DwtNum, negate: bool) {
        debug_assert_eq!(
            dst.transformed, src.transformed,
            "add requires both coefficients in the same domain"
        );
        if negate {
            for (d, s) in dst.data.iter_mut().zip(&src.data) {
                *d -= s;
            }
        } else {
            for (d, s) in dst.data.iter_mut().zip(&src.data) {
                *d += s;
            }
        }
    }

    fn add_small(&self, dst: &mut DwtNum, v: i64) {
        let v = v as f64;
        if dst.transformed {
            // The transform of the digit vector [v, 0, ...] is v in every bin.
            for i in 0..self.bins {
                dst.data[2 * i] += v;
            }
        } else {
            dst.data[0] += v;
        }
    }

    fn helper_clone(&self) -> Self {
        Self {
            bins: self.bins,
            digit_bits: self.digit_bits,
            max_value_bits: self.max_value_bits,
            roots: Arc::clone(&self.roots),
            stats: AtomicEngineStats::new(),
        }
    }

    fn absorb_stats(&self, helper: &Self) {
        self.stats.absorb(&helper.stats);
    }

    fn helper_started(&self, index: usize) {
        tracing::trace!(index, "engine helper clone attached");
    }

    fn helper_stopped(&self, index: usize) {
        tracing::trace!(index, "engine helper clone detached");
    }
}

/// Extract `width` bits starting at `bit_pos` from little-endian limbs.
fn extract_bits(limbs: &[u64], bit_pos: usize, width: u32) -> u64 {
    let limb = bit_pos / 64;
    let off = (bit_pos % 64) as u32;
    let mut v = limbs.get(limb).copied().unwrap_or(0) >> off;
    if off + width > 64 {
        v |= limbs.get(limb + 1).copied().unwrap_or(0) << (64 - off);
    }
    v & ((1u64 << width) - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> DwtEngine {
        DwtEngine::new(48, 8.0)
    }

    #[test]
    fn int_roundtrip() {
        let eng = engine();
        for v in [0i64, 1, -1, 42, -12345, (1 << 47) - 1, -(1 << 47)] {
            let num = eng.from_int(&BigInt::from(v));
            assert_eq!(eng.to_int(&num), BigInt::from(v), "roundtrip of {v}");
        }
    }

    #[test]
    fn transform_roundtrip() {
        let eng = engine();
        let mut num = eng.from_int(&BigInt::from(987_654_321i64));
        eng.fft(&mut num);
        assert!(eng.is_transformed(&num));
        eng.unfft(&mut num);
        assert_eq!(eng.to_int(&num), BigInt::from(987_654_321i64));
        assert!(eng.stats().max_roundoff < 0.25);
    }

    #[test]
    fn pointwise_product_multiplies() {
        let eng = engine();
        let a = 123_456_789i64;
        let b = -987_654i64;
        let mut na = eng.from_int(&BigInt::from(a));
        let mut nb = eng.from_int(&BigInt::from(b));
        eng.fft(&mut na);
        eng.fft(&mut nb);

        // Lane-wise complex multiply, the operation polymult's kernels do.
        let mut prod = eng.alloc();
        for i in 0..eng.transform_size() / 2 {
            let (ar, ai) = (na.data[2 * i], na.data[2 * i + 1]);
            let (br, bi) = (nb.data[2 * i], nb.data[2 * i + 1]);
            prod.data[2 * i] = ar * br - ai * bi;
            prod.data[2 * i + 1] = ar * bi + ai * br;
        }
        eng.set_transformed(&mut prod);
        eng.unfft(&mut prod);
        assert_eq!(eng.to_int(&prod), BigInt::from(a) * BigInt::from(b));
    }

    #[test]
    fn add_small_in_both_domains() {
        let eng = engine();
        let mut plain = eng.from_int(&BigInt::from(100));
        eng.add_small(&mut plain, 7);
        assert_eq!(eng.to_int(&plain), BigInt::from(107));

        let mut trans = eng.from_int(&BigInt::from(100));
        eng.fft(&mut trans);
        eng.add_small(&mut trans, -1);
        eng.unfft(&mut trans);
        assert_eq!(eng.to_int(&trans), BigInt::from(99));
    }

    #[test]
    fn add_into_with_negate() {
        let eng = engine();
        let mut dst = eng.from_int(&BigInt::from(500));
        let src = eng.from_int(&BigInt::from(123));
        eng.add_into(&mut dst, &src, false);
        assert_eq!(eng.to_int(&dst), BigInt::from(623));
        eng.add_into(&mut dst, &src, true);
        assert_eq!(eng.to_int(&dst), BigInt::from(500));
    }

    #[test]
    fn clone_stats_absorbed() {
        let eng = engine();
        let clone = eng.helper_clone();
        let mut num = clone.from_int(&BigInt::from(5));
        clone.fft(&mut num);
        eng.absorb_stats(&clone);
        assert_eq!(eng.stats().forward_transforms, 1);
        assert_eq!(clone.stats().forward_transforms, 0);
    }

    #[test]
    fn extract_bits_spans_limbs() {
        let limbs = [0xFFFF_FFFF_FFFF_FFFFu64, 0b1011];
        assert_eq!(extract_bits(&limbs, 0, 4), 0xF);
        assert_eq!(extract_bits(&limbs, 60, 8), 0b1011_1111);
        assert_eq!(extract_bits(&limbs, 64, 4), 0b1011);
        assert_eq!(extract_bits(&limbs, 128, 4), 0);
    }
}
