#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use num_bigint::BigInt;
use num_traits::{One, Zero};

use polymult::{CircularMode, Options, PolySource, Polymult, VecOptions};
use polymult_engine::{DwtEngine, FftEngine};

fn expand(stored: &[i64], o: VecOptions) -> Vec<BigInt> {
    let mut v: Vec<BigInt> = if o.rlp {
        let s = stored.len();
        (0..2 * s - 1)
            .map(|j| BigInt::from(stored[(s - 1).abs_diff(j)]))
            .collect()
    } else {
        stored.iter().map(|&x| BigInt::from(x)).collect()
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

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }
    let n1 = (data[0] % 6 + 1) as usize;
    let n2 = (data[1] % 6 + 1) as usize;
    let invec1 = VecOptions {
        monic: data[2] & 1 != 0,
        rlp: data[2] & 2 != 0,
        negate: data[2] & 4 != 0,
    };
    let invec2 = VecOptions {
        monic: data[3] & 1 != 0,
        rlp: data[3] & 2 != 0,
        negate: data[3] & 4 != 0,
    };
    let circular = match data[4] % 4 {
        0 => CircularMode::On((data[4] / 4 % 8 + 1) as usize),
        _ => CircularMode::Off,
    };
    let options = Options {
        invec1,
        invec2,
        circular,
        ..Default::default()
    };
    let breaks = match data[5] % 3 {
        0 => (32usize, 128usize),
        1 => (2, 64),
        _ => (2, 2),
    };

    let mut bytes = data[8..].iter().copied();
    let mut value = || i64::from(bytes.next().unwrap_or(1) as i8);
    let a: Vec<i64> = (0..n1).map(|_| value()).collect();
    let b: Vec<i64> = (0..n2).map(|_| value()).collect();

    // Expanded schoolbook reference.
    let ae = expand(&a, invec1);
    let be = expand(&b, invec2);
    let mut conv = vec![BigInt::zero(); ae.len() + be.len() - 1];
    for (i, x) in ae.iter().enumerate() {
        for (j, y) in be.iter().enumerate() {
            conv[i + j] += x * y;
        }
    }
    let implied = invec1.monic && invec2.monic && !invec1.rlp && !invec2.rlp
        && circular == CircularMode::Off;
    if implied {
        conv.pop();
    }
    let want = match circular {
        CircularMode::On(s) => {
            let mut w = vec![BigInt::zero(); s];
            for (i, c) in conv.into_iter().enumerate() {
                w[i % s] += c;
            }
            w
        }
        CircularMode::Off => conv,
    };

    let engine = Arc::new(DwtEngine::new(16, polymult::safety_margin(16, 16)));
    let mut pm = Polymult::new(Arc::clone(&engine));
    pm.set_break_points(breaks.0, breaks.1).unwrap();

    let mut av: Vec<_> = a.iter().map(|&v| engine.from_int(&BigInt::from(v))).collect();
    let mut bv: Vec<_> = b.iter().map(|&v| engine.from_int(&BigInt::from(v))).collect();
    let mut out: Vec<_> = (0..want.len()).map(|_| Some(engine.alloc())).collect();
    pm.mult(
        PolySource::Plain(&mut av),
        PolySource::Plain(&mut bv),
        &mut out,
        &options,
    )
    .unwrap();

    for (slot, w) in out.iter().zip(&want) {
        assert_eq!(&engine.to_int(slot.as_ref().unwrap()), w);
    }
});
