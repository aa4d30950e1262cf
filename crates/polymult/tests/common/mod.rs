//! Shared test helpers: a BigInt reference implementation of every option
//! combination, and glue to run the real thing against it.

#![allow(dead_code)]

use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::{One, Zero};

use polymult::{
    CircularMode, FmaMode, Options, PolySource, Polymult, TailMode, VecOptions,
};
use polymult_engine::{DwtEngine, DwtNum, FftEngine};

/// Engine wide enough for every test in this suite: coefficients up to
/// 2^24, margins for polynomials up to a few dozen coefficients.
pub fn engine() -> Arc<DwtEngine> {
    Arc::new(DwtEngine::new(24, polymult::safety_margin(32, 32)))
}

pub fn handle() -> Polymult<DwtEngine> {
    Polymult::new(engine())
}

/// Deterministic pseudo-random values in a small range.
pub struct Lcg(pub u64);

impl Lcg {
    pub fn next_i64(&mut self) -> i64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 40) as i64 % 10_000) - 5_000
    }
}

pub fn ints(v: &[i64]) -> Vec<BigInt> {
    v.iter().map(|&x| BigInt::from(x)).collect()
}

/// Expand a stored vector per its options: RLP mirroring, negation of the
/// stored coefficients, implied monic ones (never negated).
pub fn expand(stored: &[BigInt], o: VecOptions) -> Vec<BigInt> {
    let mut v: Vec<BigInt> = if o.rlp {
        let s = stored.len();
        (0..2 * s - 1)
            .map(|j| stored[(s - 1).abs_diff(j)].clone())
            .collect()
    } else {
        stored.to_vec()
    };
    if o.negate {
        for x in &mut v {
            *x = -x.clone();
        }
    }
    if o.monic {
        if o.rlp {
            v.insert(0, BigInt::one());
            v.push(BigInt::one());
        } else {
            v.push(BigInt::one());
        }
    }
    v
}

/// Whether the result carries an implied leading 1 that is not stored.
pub fn output_implied_one(options: &Options) -> bool {
    options.invec1.monic
        && options.invec2.monic
        && !options.invec1.rlp
        && !options.invec2.rlp
        && options.tail == TailMode::Full
        && options.circular == CircularMode::Off
}

/// The natural output length for a Full-tail call.
pub fn full_out_len(n1: usize, n2: usize, options: &Options) -> usize {
    if let CircularMode::On(s) = options.circular {
        return s;
    }
    let f1 = expand(&ints(&vec![1; n1]), options.invec1).len();
    let f2 = expand(&ints(&vec![1; n2]), options.invec2).len();
    f1 + f2 - 1 - usize::from(output_implied_one(options))
}

/// Reference result: expanded schoolbook convolution, circular wrap, tail
/// slice, FMA fold. This is the semantics the kernels must reproduce.
pub fn reference(
    a: &[i64],
    b: &[i64],
    fma: Option<&[i64]>,
    options: &Options,
    out_len: usize,
) -> Vec<BigInt> {
    let ae = expand(&ints(a), options.invec1);
    let be = expand(&ints(b), options.invec2);
    let mut conv = vec![BigInt::zero(); ae.len() + be.len() - 1];
    for (i, x) in ae.iter().enumerate() {
        for (j, y) in be.iter().enumerate() {
            conv[i + j] += x * y;
        }
    }
    if output_implied_one(options) {
        let top = conv.pop();
        assert_eq!(top, Some(BigInt::one()));
    }

    let base = match options.circular {
        CircularMode::On(s) => {
            let mut wrapped = vec![BigInt::zero(); s];
            for (i, c) in conv.into_iter().enumerate() {
                wrapped[i % s] += c;
            }
            wrapped
        }
        CircularMode::Off => conv,
    };

    let lsws = match options.tail {
        TailMode::Full | TailMode::Low => 0,
        TailMode::High => base.len().saturating_sub(out_len),
        TailMode::Mid { first_skipped } => first_skipped,
    };

    let mut out = vec![BigInt::zero(); out_len];
    for (t, slot) in out.iter_mut().enumerate() {
        if let Some(c) = base.get(lsws + t) {
            *slot = c.clone();
        }
    }
    if let Some(f) = fma {
        assert_eq!(f.len(), out_len);
        for (slot, &fv) in out.iter_mut().zip(f) {
            match options.fma {
                FmaMode::Add => *slot += fv,
                FmaMode::Sub => *slot -= fv,
                FmaMode::SubFromFma => *slot = BigInt::from(fv) - slot.clone(),
                FmaMode::None => {}
            }
        }
    }
    out
}

pub fn coeffs(engine: &DwtEngine, v: &[i64]) -> Vec<DwtNum> {
    v.iter().map(|&x| engine.from_int(&BigInt::from(x))).collect()
}

pub fn out_slots(engine: &DwtEngine, n: usize) -> Vec<Option<DwtNum>> {
    (0..n).map(|_| Some(engine.alloc())).collect()
}

pub fn read_out(engine: &DwtEngine, out: &[Option<DwtNum>]) -> Vec<BigInt> {
    out.iter()
        .map(|o| engine.to_int(o.as_ref().expect("output slot")))
        .collect()
}

/// Run `mult` (or `mult_fma`) and return the integer outputs.
pub fn run_mult(
    pm: &mut Polymult<DwtEngine>,
    a: &[i64],
    b: &[i64],
    fma: Option<&[i64]>,
    options: &Options,
    out_len: usize,
) -> Vec<BigInt> {
    let engine = Arc::clone(pm.engine());
    let mut av = coeffs(&engine, a);
    let mut bv = coeffs(&engine, b);
    let mut out = out_slots(&engine, out_len);
    match fma {
        None => pm
            .mult(
                PolySource::Plain(&mut av),
                PolySource::Plain(&mut bv),
                &mut out,
                options,
            )
            .unwrap(),
        Some(f) => {
            let mut fv = coeffs(&engine, f);
            pm.mult_fma(
                PolySource::Plain(&mut av),
                PolySource::Plain(&mut bv),
                &mut out,
                &mut fv,
                options,
            )
            .unwrap();
        }
    }
    read_out(&engine, &out)
}

/// Assert the real path matches the reference for one configuration.
pub fn check(
    pm: &mut Polymult<DwtEngine>,
    a: &[i64],
    b: &[i64],
    fma: Option<&[i64]>,
    options: &Options,
    out_len: usize,
) {
    let got = run_mult(pm, a, b, fma, options, out_len);
    let want = reference(a, b, fma, options, out_len);
    assert_eq!(
        got, want,
        "mismatch for a={a:?} b={b:?} fma={fma:?} out_len={out_len} options={options:?}"
    );
    let stats = pm.engine().stats();
    assert!(
        stats.max_roundoff < 0.25,
        "rounding error {} too close to 0.5",
        stats.max_roundoff
    );
}
