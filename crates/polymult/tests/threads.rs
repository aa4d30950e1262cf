//! Thread invariance: for fixed inputs the result is bitwise identical
//! across any helper count.

mod common;

use std::sync::Arc;

use polymult::{Options, PolySource, Polymult, PostTransform};
use polymult_engine::{DwtEngine, FftEngine};

/// Multiply with a given thread budget and return the raw transform-domain
/// output samples (no inverse transform, so rounding never hides drift).
fn raw_result(threads: usize, karat: usize, fft: usize, a: &[i64], b: &[i64]) -> Vec<Vec<u64>> {
    let engine = Arc::new(DwtEngine::new(24, polymult::safety_margin(32, 32)));
    let mut pm = Polymult::new(Arc::clone(&engine));
    pm.set_max_num_threads(threads).unwrap();
    pm.set_break_points(karat, fft).unwrap();

    let options = Options {
        post: PostTransform::None,
        ..Default::default()
    };
    let mut av = common::coeffs(&engine, a);
    let mut bv = common::coeffs(&engine, b);
    let mut out = common::out_slots(&engine, a.len() + b.len() - 1);
    pm.mult(
        PolySource::Plain(&mut av),
        PolySource::Plain(&mut bv),
        &mut out,
        &options,
    )
    .unwrap();

    out.iter()
        .map(|o| {
            engine
                .data(o.as_ref().unwrap())
                .iter()
                .map(|v| v.to_bits())
                .collect()
        })
        .collect()
}

#[test]
fn bitwise_identical_across_thread_counts() {
    let mut rng = common::Lcg(1234);
    let a: Vec<i64> = (0..9).map(|_| rng.next_i64()).collect();
    let b: Vec<i64> = (0..8).map(|_| rng.next_i64()).collect();

    for (karat, fft) in [(32, 128), (2, 64), (2, 2)] {
        let baseline = raw_result(1, karat, fft, &a, &b);
        for threads in 2..=4 {
            let got = raw_result(threads, karat, fft, &a, &b);
            assert_eq!(
                got, baseline,
                "threads={threads} karat={karat} fft={fft} diverged"
            );
        }
    }
}

#[test]
fn integer_results_survive_thread_counts() {
    let mut rng = common::Lcg(77);
    let a: Vec<i64> = (0..12).map(|_| rng.next_i64()).collect();
    let b: Vec<i64> = (0..12).map(|_| rng.next_i64()).collect();
    let want = common::reference(&a, &b, None, &Options::default(), 23);

    for threads in 1..=4 {
        let mut pm = common::handle();
        pm.set_max_num_threads(threads).unwrap();
        pm.set_break_points(2, 2).unwrap();
        let got = common::run_mult(&mut pm, &a, &b, None, &Options::default(), 23);
        assert_eq!(got, want, "threads={threads}");
    }
}

#[test]
fn num_threads_can_shrink_between_calls() {
    let mut pm = common::handle();
    pm.set_max_num_threads(4).unwrap();
    let a = [1i64, 2, 3, 4, 5];
    let b = [6i64, 7, 8, 9];
    let want = common::reference(&a, &b, None, &Options::default(), 8);

    for n in [4usize, 2, 1, 3] {
        pm.set_num_threads(n);
        let got = common::run_mult(&mut pm, &a, &b, None, &Options::default(), 8);
        assert_eq!(got, want, "num_threads={n}");
    }
}
