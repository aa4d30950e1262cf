//! Line elements and line I/O.
//!
//! A line is one cache-line-wide slice (8 doubles, four complex lanes)
//! taken at the same offset from every coefficient of a polynomial. The
//! kernels operate on vectors of [`Elem`]s, one per expanded coefficient;
//! all parallelism is across disjoint lines.

use crate::plan::LineSrc;

/// One coefficient's contribution to a line: four complex lanes stored as
/// interleaved (re, im) doubles.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[repr(transparent)]
pub(crate) struct Elem(pub [f64; 8]);

impl Elem {
    pub const ZERO: Elem = Elem([0.0; 8]);
    /// The transform image of the integer 1 is 1 in every bin.
    pub const ONE: Elem = Elem([1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);

    #[inline]
    pub fn from_slice(s: &[f64]) -> Elem {
        let mut e = [0.0; 8];
        e.copy_from_slice(s);
        Elem(e)
    }

    #[inline]
    pub fn add(self, o: Elem) -> Elem {
        let mut r = [0.0; 8];
        for i in 0..8 {
            r[i] = self.0[i] + o.0[i];
        }
        Elem(r)
    }

    #[inline]
    pub fn sub(self, o: Elem) -> Elem {
        let mut r = [0.0; 8];
        for i in 0..8 {
            r[i] = self.0[i] - o.0[i];
        }
        Elem(r)
    }

    #[inline]
    pub fn neg(self) -> Elem {
        let mut r = [0.0; 8];
        for i in 0..8 {
            r[i] = -self.0[i];
        }
        Elem(r)
    }

    #[inline]
    pub fn scale(self, s: f64) -> Elem {
        let mut r = [0.0; 8];
        for i in 0..8 {
            r[i] = self.0[i] * s;
        }
        Elem(r)
    }

    /// Lane-wise complex multiply.
    #[inline]
    pub fn cmul(self, o: Elem) -> Elem {
        let mut r = [0.0; 8];
        for lane in 0..4 {
            let (ar, ai) = (self.0[2 * lane], self.0[2 * lane + 1]);
            let (br, bi) = (o.0[2 * lane], o.0[2 * lane + 1]);
            r[2 * lane] = ar * br - ai * bi;
            r[2 * lane + 1] = ar * bi + ai * br;
        }
        Elem(r)
    }

    /// `acc + self * o`, lane-wise complex.
    #[inline]
    pub fn cmul_acc(self, o: Elem, acc: Elem) -> Elem {
        acc.add(self.cmul(o))
    }

    /// Multiply every lane by one complex twiddle factor.
    #[inline]
    pub fn twiddle(self, w: (f64, f64)) -> Elem {
        let (wr, wi) = w;
        let mut r = [0.0; 8];
        for lane in 0..4 {
            let (ar, ai) = (self.0[2 * lane], self.0[2 * lane + 1]);
            r[2 * lane] = ar * wr - ai * wi;
            r[2 * lane + 1] = ar * wi + ai * wr;
        }
        Elem(r)
    }

    /// `self + i * o`, lane-wise.
    #[inline]
    pub fn add_i(self, o: Elem) -> Elem {
        let mut r = [0.0; 8];
        for lane in 0..4 {
            r[2 * lane] = self.0[2 * lane] - o.0[2 * lane + 1];
            r[2 * lane + 1] = self.0[2 * lane + 1] + o.0[2 * lane];
        }
        Elem(r)
    }

    /// `self - i * o`, lane-wise.
    #[inline]
    pub fn sub_i(self, o: Elem) -> Elem {
        let mut r = [0.0; 8];
        for lane in 0..4 {
            r[2 * lane] = self.0[2 * lane] + o.0[2 * lane + 1];
            r[2 * lane + 1] = self.0[2 * lane + 1] - o.0[2 * lane];
        }
        Elem(r)
    }
}

/// Where one input polynomial's line data comes from.
pub(crate) enum LineData<'a> {
    /// Per-coefficient sample slices of a plain polynomial.
    Plain(&'a [&'a [f64]]),
    /// The already linearized (and possibly pre-FFTed) record of one line
    /// of a preprocessed polynomial.
    Record(&'a [Elem]),
}

impl LineData<'_> {
    /// Stored-order element `idx` of the given line.
    #[inline]
    fn stored(&self, idx: usize, line: usize) -> Elem {
        match self {
            LineData::Plain(coeffs) => {
                Elem::from_slice(&coeffs[idx][line * 8..line * 8 + 8])
            }
            LineData::Record(rec) => rec[idx],
        }
    }
}

/// Read one expanded line: RLP mirroring and implied monic ones are encoded
/// in `map`, negation applies to stored coefficients only.
pub(crate) fn read_line(data: &LineData, map: &[LineSrc], negate: bool, line: usize, out: &mut [Elem]) {
    for (slot, src) in out.iter_mut().zip(map) {
        *slot = match *src {
            LineSrc::One => Elem::ONE,
            LineSrc::Coeff(idx) => {
                let e = data.stored(idx as usize, line);
                if negate {
                    e.neg()
                } else {
                    e
                }
            }
        };
    }
}

/// Base pointer of one output coefficient's sample buffer.
///
/// Shared across helper threads; every access targets the 64-byte range of
/// one line, and each line index is claimed by exactly one helper through
/// the pool's atomic counter, so ranges written concurrently are disjoint.
#[derive(Clone, Copy)]
pub(crate) struct OutPtr(pub *mut f64);

unsafe impl Send for OutPtr {}
unsafe impl Sync for OutPtr {}

/// Store one element into an output coefficient at the given line offset.
///
/// # Safety
///
/// `ptr` must point at a live buffer of at least `(line + 1) * 8` doubles,
/// and no other thread may touch this line of this coefficient.
#[inline]
pub(crate) unsafe fn scatter(ptr: OutPtr, line: usize, e: Elem) {
    let dst = ptr.0.add(line * 8);
    std::ptr::copy_nonoverlapping(e.0.as_ptr(), dst, 8);
}
