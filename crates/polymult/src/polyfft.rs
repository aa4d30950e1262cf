//! Mixed-radix poly-FFT over line elements.
//!
//! Forward passes are decimation-in-frequency, leaving the spectrum in
//! digit-scrambled order; inverse passes run the same stages conjugated and
//! reversed. Pointwise products do not care about the ordering, so no
//! reordering pass exists anywhere. Each butterfly carries four complex
//! lanes per element, i.e. eight poly-coefficient doubles at once.

use crate::line::Elem;
use crate::twiddles::{Stage, TwiddleTable};

const S3: f64 = 0.866_025_403_784_438_6; // sin(pi/3)
const C51: f64 = 0.309_016_994_374_947_45; // cos(2*pi/5)
const C52: f64 = -0.809_016_994_374_947_5; // cos(4*pi/5)
const S51: f64 = 0.951_056_516_295_153_5; // sin(2*pi/5)
const S52: f64 = 0.587_785_252_292_473_1; // sin(4*pi/5)

/// In-place forward transform of one line.
pub(crate) fn forward(data: &mut [Elem], tw: &TwiddleTable) {
    debug_assert_eq!(data.len(), tw.size());
    for stage in tw.stages() {
        let m = stage.count;
        let span = m * stage.radix as usize;
        for block in (0..data.len()).step_by(span) {
            for j in 0..m {
                forward_butterfly(data, block + j, m, stage, tw.position_twiddles(stage, j));
            }
        }
    }
}

/// In-place inverse transform of one line, including the 1/size scale.
pub(crate) fn inverse(data: &mut [Elem], tw: &TwiddleTable) {
    debug_assert_eq!(data.len(), tw.size());
    for stage in tw.stages().iter().rev() {
        let m = stage.count;
        let span = m * stage.radix as usize;
        for block in (0..data.len()).step_by(span) {
            for j in 0..m {
                inverse_butterfly(data, block + j, m, stage, tw.position_twiddles(stage, j));
            }
        }
    }
    let scale = 1.0 / data.len() as f64;
    for e in data.iter_mut() {
        *e = e.scale(scale);
    }
}

/// Pointwise lane-wise complex product: `res[i] = a[i] * b[i]`.
pub(crate) fn pointwise(a: &[Elem], b: &[Elem], res: &mut [Elem]) {
    for ((r, x), y) in res.iter_mut().zip(a).zip(b) {
        *r = x.cmul(*y);
    }
}

#[inline]
fn forward_butterfly(data: &mut [Elem], base: usize, m: usize, stage: &Stage, tws: &[(f64, f64)]) {
    match stage.radix {
        2 => {
            let x0 = data[base];
            let x1 = data[base + m];
            data[base] = x0.add(x1);
            data[base + m] = x0.sub(x1).twiddle(tws[0]);
        }
        3 => {
            let x0 = data[base];
            let x1 = data[base + m];
            let x2 = data[base + 2 * m];
            let t1 = x1.add(x2);
            let t2 = x1.sub(x2);
            let m1 = x0.sub(t1.scale(0.5));
            let m2 = t2.scale(S3);
            data[base] = x0.add(t1);
            data[base + m] = m1.sub_i(m2).twiddle(tws[0]);
            data[base + 2 * m] = m1.add_i(m2).twiddle(tws[1]);
        }
        4 => {
            let x0 = data[base];
            let x1 = data[base + m];
            let x2 = data[base + 2 * m];
            let x3 = data[base + 3 * m];
            let t0 = x0.add(x2);
            let t1 = x0.sub(x2);
            let t2 = x1.add(x3);
            let t3 = x1.sub(x3);
            data[base] = t0.add(t2);
            data[base + m] = t1.sub_i(t3).twiddle(tws[0]);
            data[base + 2 * m] = t0.sub(t2).twiddle(tws[1]);
            data[base + 3 * m] = t1.add_i(t3).twiddle(tws[2]);
        }
        5 => {
            let x0 = data[base];
            let x1 = data[base + m];
            let x2 = data[base + 2 * m];
            let x3 = data[base + 3 * m];
            let x4 = data[base + 4 * m];
            let t1 = x1.add(x4);
            let t2 = x2.add(x3);
            let t3 = x1.sub(x4);
            let t4 = x2.sub(x3);
            let m1 = x0.add(t1.scale(C51)).add(t2.scale(C52));
            let m2 = x0.add(t1.scale(C52)).add(t2.scale(C51));
            let m3 = t3.scale(S51).add(t4.scale(S52));
            let m4 = t3.scale(S52).sub(t4.scale(S51));
            data[base] = x0.add(t1).add(t2);
            data[base + m] = m1.sub_i(m3).twiddle(tws[0]);
            data[base + 2 * m] = m2.sub_i(m4).twiddle(tws[1]);
            data[base + 3 * m] = m2.add_i(m4).twiddle(tws[2]);
            data[base + 4 * m] = m1.add_i(m3).twiddle(tws[3]);
        }
        _ => unreachable!("unsupported radix"),
    }
}

#[inline]
fn inverse_butterfly(data: &mut [Elem], base: usize, m: usize, stage: &Stage, tws: &[(f64, f64)]) {
    let conj = |w: (f64, f64)| (w.0, -w.1);
    match stage.radix {
        2 => {
            let x0 = data[base];
            let x1 = data[base + m].twiddle(conj(tws[0]));
            data[base] = x0.add(x1);
            data[base + m] = x0.sub(x1);
        }
        3 => {
            let x0 = data[base];
            let x1 = data[base + m].twiddle(conj(tws[0]));
            let x2 = data[base + 2 * m].twiddle(conj(tws[1]));
            let t1 = x1.add(x2);
            let t2 = x1.sub(x2);
            let m1 = x0.sub(t1.scale(0.5));
            let m2 = t2.scale(S3);
            data[base] = x0.add(t1);
            data[base + m] = m1.add_i(m2);
            data[base + 2 * m] = m1.sub_i(m2);
        }
        4 => {
            let x0 = data[base];
            let x1 = data[base + m].twiddle(conj(tws[0]));
            let x2 = data[base + 2 * m].twiddle(conj(tws[1]));
            let x3 = data[base + 3 * m].twiddle(conj(tws[2]));
            let t0 = x0.add(x2);
            let t1 = x0.sub(x2);
            let t2 = x1.add(x3);
            let t3 = x1.sub(x3);
            data[base] = t0.add(t2);
            data[base + m] = t1.add_i(t3);
            data[base + 2 * m] = t0.sub(t2);
            data[base + 3 * m] = t1.sub_i(t3);
        }
        5 => {
            let x0 = data[base];
            let x1 = data[base + m].twiddle(conj(tws[0]));
            let x2 = data[base + 2 * m].twiddle(conj(tws[1]));
            let x3 = data[base + 3 * m].twiddle(conj(tws[2]));
            let x4 = data[base + 4 * m].twiddle(conj(tws[3]));
            let t1 = x1.add(x4);
            let t2 = x2.add(x3);
            let t3 = x1.sub(x4);
            let t4 = x2.sub(x3);
            let m1 = x0.add(t1.scale(C51)).add(t2.scale(C52));
            let m2 = x0.add(t1.scale(C52)).add(t2.scale(C51));
            let m3 = t3.scale(S51).add(t4.scale(S52));
            let m4 = t3.scale(S52).sub(t4.scale(S51));
            data[base] = x0.add(t1).add(t2);
            data[base + m] = m1.add_i(m3);
            data[base + 2 * m] = m2.add_i(m4);
            data[base + 3 * m] = m2.sub_i(m4);
            data[base + 4 * m] = m1.sub_i(m3);
        }
        _ => unreachable!("unsupported radix"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twiddles::TwiddleTable;

    /// Deterministic pseudo-random element, all four lanes distinct.
    fn test_elem(state: &mut u64) -> Elem {
        let mut vals = [0.0; 8];
        for v in &mut vals {
            *state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            *v = ((*state >> 33) as i32 % 1000) as f64 / 8.0;
        }
        Elem(vals)
    }

    fn max_abs_diff(a: &[Elem], b: &[Elem]) -> f64 {
        a.iter()
            .zip(b)
            .flat_map(|(x, y)| x.0.iter().zip(y.0.iter()))
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max)
    }

    #[test]
    fn roundtrip_all_radix_mixes() {
        for size in [1usize, 2, 3, 4, 5, 6, 8, 9, 10, 12, 15, 16, 18, 20, 25, 27, 30, 45, 60] {
            let tw = TwiddleTable::new(size);
            let mut state = 0x1234_5678u64;
            let original: Vec<Elem> = (0..size).map(|_| test_elem(&mut state)).collect();
            let mut data = original.clone();
            forward(&mut data, &tw);
            inverse(&mut data, &tw);
            assert!(
                max_abs_diff(&data, &original) < 1e-9,
                "roundtrip failed for size {size}"
            );
        }
    }

    #[test]
    fn convolution_matches_schoolbook() {
        // Real data in lane 0, everything else zero: cyclic FFT convolution
        // must match the schoolbook product once zero-padded.
        for (la, lb, size) in [(3, 4, 6), (5, 5, 9), (4, 4, 8), (6, 7, 12), (8, 8, 15), (10, 11, 20)]
        {
            let tw = TwiddleTable::new(size);
            let av: Vec<f64> = (0..la).map(|i| (i as f64) - 1.5).collect();
            let bv: Vec<f64> = (0..lb).map(|i| (i as f64) * 0.5 + 1.0).collect();
            assert!(la + lb - 1 <= size);

            let lane = |v: f64| {
                let mut e = [0.0; 8];
                e[0] = v;
                Elem(e)
            };
            let mut a: Vec<Elem> = av.iter().map(|&v| lane(v)).collect();
            a.resize(size, Elem::ZERO);
            let mut b: Vec<Elem> = bv.iter().map(|&v| lane(v)).collect();
            b.resize(size, Elem::ZERO);

            forward(&mut a, &tw);
            forward(&mut b, &tw);
            let mut res = vec![Elem::ZERO; size];
            pointwise(&a, &b, &mut res);
            inverse(&mut res, &tw);

            let mut expected = vec![0.0f64; la + lb - 1];
            for (i, &x) in av.iter().enumerate() {
                for (j, &y) in bv.iter().enumerate() {
                    expected[i + j] += x * y;
                }
            }
            for (k, &want) in expected.iter().enumerate() {
                assert!(
                    (res[k].0[0] - want).abs() < 1e-9,
                    "size {size}: coefficient {k}: got {} want {want}",
                    res[k].0[0]
                );
            }
            for e in &res[la + lb - 1..] {
                assert!(e.0[0].abs() < 1e-9);
            }
        }
    }

    #[test]
    fn cyclic_wrap_at_exact_size() {
        // fft_size == circular size: the transform reduces mod (X^S - 1).
        let size = 4;
        let tw = TwiddleTable::new(size);
        let lane = |v: f64| {
            let mut e = [0.0; 8];
            e[0] = v;
            Elem(e)
        };
        let mut a: Vec<Elem> = [1.0, 2.0, 3.0, 4.0].iter().map(|&v| lane(v)).collect();
        let mut b: Vec<Elem> = [1.0, 0.0, 1.0, 0.0].iter().map(|&v| lane(v)).collect();
        forward(&mut a, &tw);
        forward(&mut b, &tw);
        let mut res = vec![Elem::ZERO; size];
        pointwise(&a, &b, &mut res);
        inverse(&mut res, &tw);
        // (1 + x^2) * a mod x^4 - 1 = [1+3, 2+4, 3+1, 4+2]
        let expected = [4.0, 6.0, 4.0, 6.0];
        for (k, &want) in expected.iter().enumerate() {
            assert!((res[k].0[0] - want).abs() < 1e-9);
        }
    }
}
