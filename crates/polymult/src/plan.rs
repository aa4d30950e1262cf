//! Call planning.
//!
//! The planner turns one request (sizes, per-input options, tail, circular,
//! FMA) into an immutable [`CallPlan`]: algorithm and FFT size, expansion
//! maps for the line reader, the output window each kernel result index
//! lands in, and the monic fix-ups applied after the line phase. All
//! validation happens here, before anything is written.

use crate::error::{PolymultError, Result};
use crate::karatsuba;
use crate::options::{CircularMode, FmaMode, Options, PostTransform, TailMode, VecOptions};
use crate::sizes::{choose_fft_size, is_smooth};

/// Kernel selected for one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Algorithm {
    Brute,
    Karatsuba,
    Fft,
}

/// Source of one expanded input element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineSrc {
    /// Stored coefficient by index.
    Coeff(u32),
    /// An implied monic 1 left in the kernel vector.
    One,
}

/// Expansion of one input vector into kernel order.
#[derive(Debug, Clone)]
pub(crate) struct VecPlan {
    /// Kernel element sources, lowest degree first.
    pub map: Vec<LineSrc>,
    /// Negate stored coefficients on load (never the implied ones).
    pub negate: bool,
    /// Degree in the true input of `map[0]`.
    pub offset: usize,
    /// True-input degrees of implied ones stripped out of the kernel.
    pub stripped_ones: Vec<usize>,
}

impl VecPlan {
    fn build(stored: usize, opts: VecOptions, strip: bool) -> Self {
        let mut map = Vec::new();
        let mut stripped_ones = Vec::new();
        let mut offset = 0;
        if opts.rlp {
            let center = stored - 1;
            if opts.monic && !strip {
                map.push(LineSrc::One);
            }
            for j in 0..2 * stored - 1 {
                map.push(LineSrc::Coeff(center.abs_diff(j) as u32));
            }
            if opts.monic && !strip {
                map.push(LineSrc::One);
            }
            if opts.monic && strip {
                offset = 1;
                stripped_ones.push(0);
                stripped_ones.push(2 * stored);
            }
        } else {
            for j in 0..stored {
                map.push(LineSrc::Coeff(j as u32));
            }
            if opts.monic {
                if strip {
                    stripped_ones.push(stored);
                } else {
                    map.push(LineSrc::One);
                }
            }
        }
        Self {
            map,
            negate: opts.negate,
            offset,
            stripped_ones,
        }
    }

    /// Degrees (in the true input) of every implied one, stripped or not.
    fn one_degrees(&self, stored: usize, opts: VecOptions) -> Vec<usize> {
        if !opts.monic {
            return Vec::new();
        }
        if opts.rlp {
            vec![0, 2 * stored]
        } else {
            vec![stored]
        }
    }

    /// The stored-coefficient part of the expansion with its degree offset,
    /// used when an implied one multiplies the whole other input.
    fn stored_part(stored: usize, opts: VecOptions) -> (Vec<u32>, usize) {
        if opts.rlp {
            let center = stored - 1;
            let map = (0..2 * stored - 1)
                .map(|j| center.abs_diff(j) as u32)
                .collect();
            (map, usize::from(opts.monic))
        } else {
            ((0..stored as u32).collect(), 0)
        }
    }
}

/// One whole-coefficient addition applied after the line phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VecAddin {
    /// Output slot receiving the addition.
    pub out_slot: usize,
    /// Which input vector the coefficient comes from (1 or 2).
    pub input: u8,
    /// Stored coefficient index within that input.
    pub coeff: usize,
    /// Subtract instead of add (a negated input's stored coefficients).
    pub negate: bool,
}

/// Metadata of a preprocessed input, checked against the call using it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PreMeta {
    pub stored: usize,
    pub other: usize,
    pub out: usize,
    pub self_opts: VecOptions,
    pub other_opts: VecOptions,
    pub tail: TailMode,
    pub circular: CircularMode,
    pub fma: FmaMode,
    pub pre_fft: bool,
    pub fft_size: usize,
}

/// Per-argument request fed to the planner.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ArgMeta {
    pub n2: usize,
    pub out_len: usize,
    pub fma_len: Option<usize>,
    pub options: Options,
    pub pre2: Option<PreMeta>,
}

/// Call-level request fed to the planner.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallMeta {
    pub n1: usize,
    pub invec1: VecOptions,
    pub pre1: Option<PreMeta>,
    /// Keep implied invec1 ones in the kernel regardless of profitability
    /// (used while building a pre-FFTed preprocessed poly).
    pub keep_ones1: bool,
}

/// Resolved plan for one argument.
#[derive(Debug, Clone)]
pub(crate) struct ArgPlan {
    pub algorithm: Algorithm,
    pub fft_size: usize,
    pub native_circular: bool,
    pub emulate_circular: bool,
    pub in2: VecPlan,
    pub a2: usize,
    pub adjusted_out: usize,
    pub true_out_len: usize,
    pub lsws_skipped: usize,
    pub msws_skipped: usize,
    pub adjusted_shift: usize,
    pub adjusted_pad: usize,
    /// Kernel result indices feeding each output slot.
    pub window: Vec<Vec<u32>>,
    /// Output slots receiving a +1 constant (at most four).
    pub const_addins: Vec<usize>,
    pub vec_addins: Vec<VecAddin>,
    /// Brute-force result range actually needed.
    pub kernel_lo: usize,
    pub kernel_hi: usize,
    pub tmp_len: usize,
    pub out_len: usize,
    pub fma: FmaMode,
    pub post: PostTransform,
}

/// Resolved plan for one call (one invec1 against one or more arguments).
#[derive(Debug, Clone)]
pub(crate) struct CallPlan {
    pub in1: VecPlan,
    pub a1: usize,
    pub num_lines: usize,
    pub args: Vec<ArgPlan>,
    /// Distinct FFT sizes across the arguments, for invec1 image reuse.
    pub fft_sizes: Vec<usize>,
}

/// Validate a preprocessed poly against the position it is used in.
fn check_pre(
    pre: &PreMeta,
    which: &str,
    self_opts: VecOptions,
    other_opts: VecOptions,
    self_n: usize,
    other_n: usize,
    out_len: usize,
    opts: &Options,
) -> Result<()> {
    if pre.stored != self_n || pre.other != other_n || pre.out != out_len {
        return Err(PolymultError::PreprocessMismatch(format!(
            "{which} was preprocessed for sizes {}x{} -> {}, call uses {}x{} -> {}",
            pre.stored, pre.other, pre.out, self_n, other_n, out_len
        )));
    }
    if pre.self_opts != self_opts || pre.other_opts != other_opts {
        return Err(PolymultError::PreprocessMismatch(format!(
            "{which} input options differ from the ones given at preprocessing"
        )));
    }
    if pre.tail != opts.tail || pre.circular != opts.circular || pre.fma != opts.fma {
        return Err(PolymultError::PreprocessMismatch(format!(
            "{which} call shape differs from the one given at preprocessing"
        )));
    }
    Ok(())
}

/// Build the plan for a call.
pub(crate) fn build(
    transform_size: usize,
    call: &CallMeta,
    args: &[ArgMeta],
    karat_break: usize,
    fft_break: usize,
    l2_cache_kb: usize,
) -> Result<CallPlan> {
    if transform_size == 0 || transform_size % 8 != 0 {
        return Err(PolymultError::Config(format!(
            "engine transform size {transform_size} is not a positive multiple of 8"
        )));
    }
    if call.n1 == 0 {
        return Err(PolymultError::Config("empty first input polynomial".into()));
    }
    if args.is_empty() {
        return Err(PolymultError::Config("no second polynomials given".into()));
    }
    for arg in args {
        if arg.n2 == 0 {
            return Err(PolymultError::Config("empty second input polynomial".into()));
        }
        if arg.out_len == 0 {
            return Err(PolymultError::Config("empty output polynomial".into()));
        }
        match (arg.options.fma, arg.fma_len) {
            (FmaMode::None, Some(_)) => {
                return Err(PolymultError::Config(
                    "FMA vector given without an FMA mode".into(),
                ))
            }
            (FmaMode::None, None) => {}
            (_, None) => {
                return Err(PolymultError::Config(
                    "FMA mode requires an FMA vector".into(),
                ))
            }
            (_, Some(len)) if len != arg.out_len => {
                return Err(PolymultError::Config(format!(
                    "FMA vector has {len} coefficients, output has {}",
                    arg.out_len
                )));
            }
            _ => {}
        }
        if let CircularMode::On(s) = arg.options.circular {
            if s == 0 {
                return Err(PolymultError::Config("circular size of zero".into()));
            }
        }
    }

    // Strip invec1's implied ones only when every argument tolerates the
    // resulting post add-ins: a sign-flipping FMA would turn them into
    // subtractions, and either side being preprocessed leaves no
    // caller-owned coefficients to add back from (the add-ins for a
    // stripped invec1 read the invec2 coefficients).
    let strip1 = call.invec1.monic
        && !call.keep_ones1
        && call.pre1.is_none()
        && args
            .iter()
            .all(|a| a.pre2.is_none() && a.options.fma != FmaMode::SubFromFma);
    let in1 = VecPlan::build(call.n1, call.invec1, strip1);
    let a1 = in1.map.len();
    let full1 = Options::full_len(call.invec1, call.n1);

    let num_lines = transform_size / 8;
    let mut planned = Vec::with_capacity(args.len());
    let mut fft_sizes: Vec<usize> = Vec::new();

    for arg in args {
        let opts = &arg.options;
        if let Some(pre) = &call.pre1 {
            check_pre(
                pre,
                "invec1",
                call.invec1,
                opts.invec2,
                call.n1,
                arg.n2,
                arg.out_len,
                opts,
            )?;
        }
        if let Some(pre) = &arg.pre2 {
            check_pre(
                pre,
                "invec2",
                opts.invec2,
                call.invec1,
                arg.n2,
                call.n1,
                arg.out_len,
                opts,
            )?;
        }

        // Mirror of strip1: a stripped invec2's add-ins read the invec1
        // coefficients, so both sides must be plain.
        let strip2 = opts.invec2.monic
            && arg.pre2.is_none()
            && call.pre1.is_none()
            && opts.fma != FmaMode::SubFromFma;
        let in2 = VecPlan::build(arg.n2, opts.invec2, strip2);
        let a2 = in2.map.len();
        let full2 = Options::full_len(opts.invec2, arg.n2);

        let true_out_full = full1 + full2 - 1;
        let implied_one = call.invec1.monic
            && opts.invec2.monic
            && !call.invec1.rlp
            && !opts.invec2.rlp
            && opts.tail == TailMode::Full
            && opts.circular == CircularMode::Off;
        let true_out_len = true_out_full - usize::from(implied_one);

        let circular = match opts.circular {
            CircularMode::Off => None,
            CircularMode::On(s) => Some(s),
        };
        let base_len = circular.unwrap_or(true_out_len);

        let lsws_skipped = match opts.tail {
            TailMode::Full => {
                if arg.out_len < base_len {
                    return Err(PolymultError::Config(format!(
                        "output of {} coefficients cannot hold the {base_len}-coefficient \
                         result; use a high or low tail",
                        arg.out_len
                    )));
                }
                0
            }
            TailMode::Low => 0,
            TailMode::High => base_len.saturating_sub(arg.out_len),
            TailMode::Mid { first_skipped } => first_skipped,
        };
        let msws_skipped = base_len.saturating_sub(lsws_skipped + arg.out_len);

        let adjusted_out = a1 + a2 - 1;
        let adjusted_shift = in1.offset + in2.offset;

        let algorithm = if adjusted_out < karat_break {
            Algorithm::Brute
        } else if adjusted_out < fft_break {
            Algorithm::Karatsuba
        } else {
            Algorithm::Fft
        };

        let mut native_circular = false;
        let mut fft_size = 0;
        if algorithm == Algorithm::Fft {
            if let Some(s) = circular {
                if is_smooth(s) && a1 <= s && a2 <= s {
                    native_circular = true;
                    fft_size = s;
                }
            }
            if !native_circular {
                fft_size = choose_fft_size(adjusted_out, l2_cache_kb);
            }
        }
        let emulate_circular = circular.is_some() && !native_circular;

        // A pre-FFTed input pins the transform size; the call must agree.
        for pre in [call.pre1.as_ref(), arg.pre2.as_ref()].into_iter().flatten() {
            if pre.pre_fft {
                if algorithm != Algorithm::Fft {
                    return Err(PolymultError::PreprocessMismatch(
                        "poly was pre-FFTed but this call does not use the FFT kernel".into(),
                    ));
                }
                if pre.fft_size != fft_size {
                    return Err(PolymultError::PreprocessMismatch(format!(
                        "poly was pre-FFTed at size {}, call plans size {fft_size}",
                        pre.fft_size
                    )));
                }
            }
        }
        if algorithm == Algorithm::Fft && !fft_sizes.contains(&fft_size) {
            fft_sizes.push(fft_size);
        }

        // Output window: which kernel result indices land in each slot.
        let mut window = vec![Vec::new(); arg.out_len];
        if native_circular {
            let s = fft_size;
            for (t, slot_sources) in window.iter_mut().enumerate() {
                let slot = t + lsws_skipped;
                if slot < s {
                    let k = (slot + s - adjusted_shift % s) % s;
                    slot_sources.push(k as u32);
                }
            }
        } else {
            let keeps_top_one = implied_one && !(strip1 && strip2);
            for k in 0..adjusted_out {
                let d = k + adjusted_shift;
                if keeps_top_one && d == true_out_full - 1 {
                    continue;
                }
                let slot = match circular {
                    Some(s) => d % s,
                    None => d,
                };
                if slot < lsws_skipped {
                    continue;
                }
                let t = slot - lsws_skipped;
                if t < arg.out_len {
                    window[t].push(k as u32);
                }
            }
        }

        // Fix-ups for products the kernel never saw: an implied one times
        // the other side's stored coefficients (whole-coefficient add-ins)
        // and implied one times implied one (+1 constants).
        let mut const_addins = Vec::new();
        let mut vec_addins = Vec::new();
        let slot_of = |d: usize| -> Option<usize> {
            let slot = match circular {
                Some(s) => d % s,
                None => d,
            };
            let t = slot.checked_sub(lsws_skipped)?;
            (t < arg.out_len).then_some(t)
        };

        let ones1 = in1.one_degrees(call.n1, call.invec1);
        let ones2 = in2.one_degrees(arg.n2, opts.invec2);
        if strip1 || strip2 {
            for &u in &ones1 {
                for &v in &ones2 {
                    let d = u + v;
                    if implied_one && d == true_out_full - 1 {
                        continue;
                    }
                    if let Some(t) = slot_of(d) {
                        const_addins.push(t);
                    }
                }
            }
        }
        if strip1 {
            let (stored2, off2) = VecPlan::stored_part(arg.n2, opts.invec2);
            for &u in &ones1 {
                for (j, &coeff) in stored2.iter().enumerate() {
                    if let Some(t) = slot_of(u + off2 + j) {
                        vec_addins.push(VecAddin {
                            out_slot: t,
                            input: 2,
                            coeff: coeff as usize,
                            negate: opts.invec2.negate,
                        });
                    }
                }
            }
        }
        if strip2 {
            let (stored1, off1) = VecPlan::stored_part(call.n1, call.invec1);
            for &v in &ones2 {
                for (j, &coeff) in stored1.iter().enumerate() {
                    if let Some(t) = slot_of(v + off1 + j) {
                        vec_addins.push(VecAddin {
                            out_slot: t,
                            input: 1,
                            coeff: coeff as usize,
                            negate: call.invec1.negate,
                        });
                    }
                }
            }
        }
        debug_assert!(const_addins.len() <= 4);

        let (kernel_lo, kernel_hi) = if algorithm == Algorithm::Brute {
            let mut lo = usize::MAX;
            let mut hi = 0;
            for sources in &window {
                for &k in sources {
                    lo = lo.min(k as usize);
                    hi = hi.max(k as usize + 1);
                }
            }
            if lo == usize::MAX {
                (0, 0)
            } else {
                (lo, hi)
            }
        } else {
            (0, adjusted_out)
        };

        let tmp_len = if algorithm == Algorithm::Karatsuba {
            karatsuba::scratch_len(a1, a2, karat_break)
        } else {
            0
        };

        let adjusted_pad = arg.out_len.saturating_sub(base_len.saturating_sub(lsws_skipped));
        tracing::debug!(
            ?algorithm,
            fft_size,
            adjusted_out,
            adjusted_shift,
            adjusted_pad,
            lsws_skipped,
            msws_skipped,
            native_circular,
            emulate_circular,
            "planned polymult argument"
        );

        planned.push(ArgPlan {
            algorithm,
            fft_size,
            native_circular,
            emulate_circular,
            in2,
            a2,
            adjusted_out,
            true_out_len,
            lsws_skipped,
            msws_skipped,
            adjusted_shift,
            adjusted_pad,
            window,
            const_addins,
            vec_addins,
            kernel_lo,
            kernel_hi,
            tmp_len,
            out_len: arg.out_len,
            fma: opts.fma,
            post: opts.post,
        });
    }

    Ok(CallPlan {
        in1,
        a1,
        num_lines,
        args: planned,
        fft_sizes,
    })
}
