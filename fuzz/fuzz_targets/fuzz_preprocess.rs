#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use num_bigint::BigInt;

use polymult::{Options, PolySource, Polymult, PreprocessOptions};
use polymult_engine::{DwtEngine, FftEngine};

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let n1 = (data[0] % 8 + 1) as usize;
    let n2 = (data[1] % 8 + 1) as usize;
    let pre_fft = data[2] & 1 != 0;
    let compress = data[2] & 2 != 0;
    let out_len = n1 + n2 - 1;

    let mut bytes = data[4..].iter().copied();
    let mut value = || i64::from(bytes.next().unwrap_or(3) as i8);
    let a: Vec<i64> = (0..n1).map(|_| value()).collect();
    let b: Vec<i64> = (0..n2).map(|_| value()).collect();

    let engine = Arc::new(DwtEngine::new(16, polymult::safety_margin(16, 16)));
    let mut pm = Polymult::new(Arc::clone(&engine));
    // The FFT kernel everywhere, so pre-FFT preprocessing always applies.
    pm.set_break_points(2, 2).unwrap();
    let options = Options::default();

    let mut av: Vec<_> = a.iter().map(|&v| engine.from_int(&BigInt::from(v))).collect();
    let pre = pm
        .preprocess(
            &mut av,
            n2,
            out_len,
            &PreprocessOptions {
                call: options,
                pre_fft,
                compress,
            },
        )
        .unwrap();

    let mut bv: Vec<_> = b.iter().map(|&v| engine.from_int(&BigInt::from(v))).collect();
    let mut out_pre: Vec<_> = (0..out_len).map(|_| Some(engine.alloc())).collect();
    pm.mult(
        PolySource::Pre(&pre),
        PolySource::Plain(&mut bv),
        &mut out_pre,
        &options,
    )
    .unwrap();

    let mut av2: Vec<_> = a.iter().map(|&v| engine.from_int(&BigInt::from(v))).collect();
    let mut bv2: Vec<_> = b.iter().map(|&v| engine.from_int(&BigInt::from(v))).collect();
    let mut out_plain: Vec<_> = (0..out_len).map(|_| Some(engine.alloc())).collect();
    pm.mult(
        PolySource::Plain(&mut av2),
        PolySource::Plain(&mut bv2),
        &mut out_plain,
        &options,
    )
    .unwrap();

    for (x, y) in out_pre.iter().zip(&out_plain) {
        assert_eq!(
            engine.to_int(x.as_ref().unwrap()),
            engine.to_int(y.as_ref().unwrap())
        );
    }
});
