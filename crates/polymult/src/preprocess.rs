//! Preprocessed polynomials.
//!
//! A preprocessed poly stores its data line-major: one record per line,
//! each record holding that line's element from every stored coefficient.
//! Records can optionally be pre-FFTed (the forward poly-FFT image at the
//! planned size, with implied monic ones and any negation folded in) and
//! optionally compressed. The original array-header-before-the-pointer
//! recognition trick is replaced by this owned struct; call sites pass it
//! through [`crate::PolySource::Pre`].

use polymult_engine::FftEngine;

use crate::error::{PolymultError, Result};
use crate::line::{Elem, LineData};
use crate::options::PreprocessOptions;
use crate::plan::{self, ArgMeta, CallMeta, PreMeta};
use crate::polyfft;
use crate::twiddles::TwiddleCache;

/// A reusable, opaque polynomial representation.
///
/// Only valid in future multiplications whose sizes and options match the
/// ones given at preprocessing time; anything else is rejected while
/// planning. It cannot be used in engine operations.
pub struct PreprocessedPoly {
    num_lines: usize,
    stored_size: usize,
    other_size: usize,
    out_size: usize,
    options: crate::Options,
    pre_fft: bool,
    compressed: bool,
    fft_size: usize,
    monic_ones_included: bool,
    elems_per_line: usize,
    element_size: usize,
    padded_element_size: usize,
    offsets: Vec<usize>,
    data: Vec<u8>,
}

impl PreprocessedPoly {
    /// Number of line records.
    #[must_use]
    pub fn num_lines(&self) -> usize {
        self.num_lines
    }

    /// Bytes of one uncompressed record.
    #[must_use]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Bytes of the largest encoded record.
    #[must_use]
    pub fn padded_element_size(&self) -> usize {
        self.padded_element_size
    }

    /// Transform size the records were pre-FFTed at (0 when not pre-FFTed).
    #[must_use]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Whether records hold forward poly-FFT images.
    #[must_use]
    pub fn is_pre_ffted(&self) -> bool {
        self.pre_fft
    }

    /// Whether records are exponent-packed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Whether implied monic ones were folded into the pre-FFT images.
    #[must_use]
    pub fn monic_ones_included(&self) -> bool {
        self.monic_ones_included
    }

    /// Total bytes of the record data.
    #[must_use]
    pub fn poly_size(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn stored_size(&self) -> usize {
        self.stored_size
    }

    pub(crate) fn meta(&self) -> PreMeta {
        PreMeta {
            stored: self.stored_size,
            other: self.other_size,
            out: self.out_size,
            self_opts: self.options.invec1,
            other_opts: self.options.invec2,
            tail: self.options.tail,
            circular: self.options.circular,
            fma: self.options.fma,
            pre_fft: self.pre_fft,
            fft_size: self.fft_size,
        }
    }

    /// Decode one line record into `out` (resized to the record length).
    pub(crate) fn read_line(&self, line: usize, out: &mut Vec<Elem>) {
        out.resize(self.elems_per_line, Elem::ZERO);
        let bytes = &self.data[self.offsets[line]..self.offsets[line + 1]];
        if self.compressed {
            decode_line(bytes, out);
        } else {
            for (i, e) in out.iter_mut().enumerate() {
                for lane in 0..8 {
                    let at = (i * 8 + lane) * 8;
                    e.0[lane] = f64::from_le_bytes(bytes[at..at + 8].try_into().unwrap());
                }
            }
        }
    }
}

/// Build a preprocessed poly from a plain coefficient array.
pub(crate) fn build<E: FftEngine>(
    engine: &E,
    twiddles: &TwiddleCache,
    input: &mut [E::Num],
    other_size: usize,
    out_size: usize,
    opts: &PreprocessOptions,
    karat_break: usize,
    fft_break: usize,
    l2_cache_kb: usize,
) -> Result<PreprocessedPoly> {
    let n1 = input.len();
    let call = CallMeta {
        n1,
        invec1: opts.call.invec1,
        pre1: None,
        keep_ones1: opts.pre_fft,
    };
    let arg = ArgMeta {
        n2: other_size,
        out_len: out_size,
        fma_len: (opts.call.fma != crate::FmaMode::None).then_some(out_size),
        options: opts.call,
        pre2: None,
    };
    let plan = plan::build(
        engine.transform_size(),
        &call,
        std::slice::from_ref(&arg),
        karat_break,
        fft_break,
        l2_cache_kb,
    )?;
    let fft_size = plan.args[0].fft_size;
    if opts.pre_fft && fft_size == 0 {
        return Err(PolymultError::Config(
            "pre-FFT preprocessing requested but the planned sizes use a non-FFT kernel".into(),
        ));
    }

    for num in input.iter_mut() {
        engine.fft(num);
    }
    let slices: Vec<&[f64]> = input.iter().map(|n| engine.data(n)).collect();
    let table = opts.pre_fft.then(|| twiddles.ensure(fft_size));

    let num_lines = plan.num_lines;
    let elems_per_line = if opts.pre_fft { fft_size } else { n1 };
    let mut data = Vec::new();
    data.try_reserve(num_lines * elems_per_line * 64)
        .map_err(|e| PolymultError::Resource(format!("preprocessed poly allocation: {e}")))?;
    let mut offsets = Vec::with_capacity(num_lines + 1);
    offsets.push(0);

    let mut scratch = vec![Elem::ZERO; elems_per_line];
    let mut padded_element_size = 0;
    for line in 0..num_lines {
        if let Some(table) = &table {
            // Expanded image with ones and negation folded in.
            scratch.fill(Elem::ZERO);
            crate::line::read_line(
                &LineData::Plain(&slices),
                &plan.in1.map,
                plan.in1.negate,
                line,
                &mut scratch[..plan.a1],
            );
            polyfft::forward(&mut scratch, table);
        } else {
            // Raw stored order; expansion happens at use time.
            for (i, slice) in slices.iter().enumerate() {
                scratch[i] = Elem::from_slice(&slice[line * 8..line * 8 + 8]);
            }
        }

        let before = data.len();
        if opts.compress {
            encode_line(&scratch, &mut data);
        } else {
            for e in &scratch {
                for v in e.0 {
                    data.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
        padded_element_size = padded_element_size.max(data.len() - before);
        offsets.push(data.len());
    }

    tracing::debug!(
        n1,
        num_lines,
        fft_size,
        pre_fft = opts.pre_fft,
        compress = opts.compress,
        bytes = data.len(),
        "preprocessed poly built"
    );

    Ok(PreprocessedPoly {
        num_lines,
        stored_size: n1,
        other_size,
        out_size,
        options: opts.call,
        pre_fft: opts.pre_fft,
        compressed: opts.compress,
        fft_size: if opts.pre_fft { fft_size } else { 0 },
        monic_ones_included: opts.pre_fft && opts.call.invec1.monic,
        elems_per_line,
        element_size: elems_per_line * 64,
        padded_element_size,
        offsets,
        data,
    })
}

const MANTISSA_MASK: u64 = (1 << 52) - 1;
const EXP_MASK: u64 = 0x7FF;
const RAW_CHUNK: u16 = 0xFFFF;

/// Pack one 8-double chunk: a shared 2-byte exponent base plus 7-byte
/// entries carrying sign, a 3-bit exponent delta (7 marks a zero) and the
/// mantissa. Chunks whose exponents will not fit (or that hold subnormal
/// or non-finite values) are stored raw behind an escape header.
fn encode_chunk(e: &Elem, out: &mut Vec<u8>) {
    let bits = e.0.map(f64::to_bits);
    let mut base = u64::MAX;
    let mut max_exp = 0u64;
    let mut escape = false;
    for &b in &bits {
        let exp = (b >> 52) & EXP_MASK;
        let zero = b & !(1 << 63) == 0;
        if zero {
            continue;
        }
        if exp == 0 || exp == EXP_MASK {
            escape = true; // subnormal or non-finite
            break;
        }
        base = base.min(exp);
        max_exp = max_exp.max(exp);
    }
    if base == u64::MAX {
        base = 0;
        max_exp = 0;
    }
    if escape || max_exp - base > 6 {
        out.extend_from_slice(&RAW_CHUNK.to_le_bytes());
        for &b in &bits {
            out.extend_from_slice(&b.to_le_bytes());
        }
        return;
    }

    out.extend_from_slice(&(base as u16).to_le_bytes());
    for &b in &bits {
        let sign = b >> 63;
        let exp = (b >> 52) & EXP_MASK;
        let zero = b & !(1 << 63) == 0;
        let packed = if zero {
            (sign << 55) | (7 << 52)
        } else {
            (sign << 55) | ((exp - base) << 52) | (b & MANTISSA_MASK)
        };
        out.extend_from_slice(&packed.to_le_bytes()[..7]);
    }
}

/// Inverse of [`encode_chunk`]; returns bytes consumed.
fn decode_chunk(bytes: &[u8], e: &mut Elem) -> usize {
    let header = u16::from_le_bytes([bytes[0], bytes[1]]);
    if header == RAW_CHUNK {
        for (lane, v) in e.0.iter_mut().enumerate() {
            let at = 2 + lane * 8;
            *v = f64::from_le_bytes(bytes[at..at + 8].try_into().unwrap());
        }
        return 2 + 64;
    }
    let base = u64::from(header);
    for (lane, v) in e.0.iter_mut().enumerate() {
        let at = 2 + lane * 7;
        let mut raw = [0u8; 8];
        raw[..7].copy_from_slice(&bytes[at..at + 7]);
        let packed = u64::from_le_bytes(raw);
        let sign = (packed >> 55) & 1;
        let delta = (packed >> 52) & 7;
        let bits = if delta == 7 {
            sign << 63
        } else {
            (sign << 63) | ((base + delta) << 52) | (packed & MANTISSA_MASK)
        };
        *v = f64::from_bits(bits);
    }
    2 + 56
}

fn encode_line(elems: &[Elem], out: &mut Vec<u8>) {
    for e in elems {
        encode_chunk(e, out);
    }
}

fn decode_line(bytes: &[u8], out: &mut [Elem]) {
    let mut at = 0;
    for e in out {
        at += decode_chunk(&bytes[at..], e);
    }
}
