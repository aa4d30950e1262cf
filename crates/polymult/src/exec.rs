//! Per-call execution.
//!
//! A call runs in three parallel phases over the helper pool, with the
//! plan's post add-ins applied by the main thread in between:
//!
//! 1. forward-transform every plain input coefficient,
//! 2. process lines: load, multiply with the planned kernel, window,
//!    fold the FMA vector, scatter into the outputs,
//! 3. inverse/forward-transform the output coefficients per the options.
//!
//! Phase 2 writes disjoint 64-byte ranges of shared output buffers through
//! raw pointers; the pool's atomic line counter guarantees each range has
//! exactly one writer, and the pool barrier publishes the writes back to
//! the main thread.

use std::sync::Arc;

use polymult_engine::FftEngine;

use crate::error::{PolymultError, Result};
use crate::line::{self, Elem, LineData, OutPtr};
use crate::options::{FmaMode, Options, PostTransform, VecOptions};
use crate::plan::{self, Algorithm, ArgMeta, CallMeta, CallPlan};
use crate::pool::HelperPool;
use crate::preprocess::PreprocessedPoly;
use crate::twiddles::{TwiddleCache, TwiddleTable};
use crate::{brute, karatsuba, polyfft};

/// One input polynomial: a plain coefficient array or a preprocessed poly.
pub enum PolySource<'a, E: FftEngine> {
    /// Caller-owned coefficients, lowest degree first. Transformed in place
    /// as a side effect of the call.
    Plain(&'a mut [E::Num]),
    /// A reusable preprocessed representation.
    Pre(&'a PreprocessedPoly),
}

impl<E: FftEngine> PolySource<'_, E> {
    fn stored_len(&self) -> usize {
        match self {
            PolySource::Plain(v) => v.len(),
            PolySource::Pre(p) => p.stored_size(),
        }
    }

    fn pre_meta(&self) -> Option<plan::PreMeta> {
        match self {
            PolySource::Plain(_) => None,
            PolySource::Pre(p) => Some(p.meta()),
        }
    }
}

/// One second-poly / output pairing of a several-call.
pub struct MultArg<'a, E: FftEngine> {
    /// Second input polynomial.
    pub invec2: PolySource<'a, E>,
    /// Output coefficients; `None` slots are computed but not stored.
    pub outvec: &'a mut [Option<E::Num>],
    /// FMA polynomial, same length as `outvec`. Cannot be preprocessed.
    pub fmavec: Option<&'a mut [E::Num]>,
    /// Options not related to the first input polynomial.
    pub options: Options,
}

/// Raw pointer to a coefficient handle, shared across one parallel phase.
/// Every handle appears once in the phase's work list, so each has exactly
/// one accessor.
struct NumPtr<E: FftEngine>(*mut E::Num);

unsafe impl<E: FftEngine> Send for NumPtr<E> {}
unsafe impl<E: FftEngine> Sync for NumPtr<E> {}

impl<E: FftEngine> Clone for NumPtr<E> {
    fn clone(&self) -> Self {
        NumPtr(self.0)
    }
}
impl<E: FftEngine> Copy for NumPtr<E> {}

/// Per-worker scratch, sized once from the plan.
struct Scratch {
    in1_raw: Vec<Elem>,
    in1_pre: Vec<Elem>,
    in1_fft: Vec<Vec<Elem>>,
    fft_ready: Vec<bool>,
    in2: Vec<Elem>,
    in2_pre: Vec<Elem>,
    res: Vec<Elem>,
    tmp: Vec<Elem>,
}

struct ScratchPtr(*mut Scratch);
unsafe impl Send for ScratchPtr {}
unsafe impl Sync for ScratchPtr {}

fn alloc_elems(len: usize) -> Result<Vec<Elem>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|e| PolymultError::Resource(format!("line scratch allocation: {e}")))?;
    v.resize(len, Elem::ZERO);
    Ok(v)
}

impl Scratch {
    fn for_plan(plan: &CallPlan) -> Result<Self> {
        let mut max_in2 = 0;
        let mut max_res = 0;
        let mut max_tmp = 0;
        for arg in &plan.args {
            let (in2_len, res_len) = if arg.algorithm == Algorithm::Fft {
                (arg.fft_size, arg.fft_size)
            } else {
                (arg.a2, arg.adjusted_out)
            };
            max_in2 = max_in2.max(in2_len);
            max_res = max_res.max(res_len);
            max_tmp = max_tmp.max(arg.tmp_len);
        }
        Ok(Self {
            in1_raw: alloc_elems(plan.a1)?,
            in1_pre: Vec::new(),
            in1_fft: plan
                .fft_sizes
                .iter()
                .map(|&s| alloc_elems(s))
                .collect::<Result<_>>()?,
            fft_ready: vec![false; plan.fft_sizes.len()],
            in2: alloc_elems(max_in2)?,
            in2_pre: Vec::new(),
            res: alloc_elems(max_res)?,
            tmp: alloc_elems(max_tmp)?,
        })
    }
}

/// Read-only view of one input during the line phase.
enum SourceCtx<'a> {
    Plain(Vec<&'a [f64]>),
    Pre(&'a PreprocessedPoly),
}

fn source_ctx<'a, E: FftEngine>(engine: &E, src: &'a PolySource<'_, E>) -> SourceCtx<'a> {
    match src {
        PolySource::Plain(v) => SourceCtx::Plain(v.iter().map(|n| engine.data(n)).collect()),
        PolySource::Pre(p) => SourceCtx::Pre(p),
    }
}

/// Per-argument view during the line phase.
struct ArgCtx<'a> {
    src: SourceCtx<'a>,
    outs: Vec<Option<OutPtr>>,
    fma: Option<Vec<&'a [f64]>>,
}

/// Everything the line job reads; no engine access happens inside.
struct LineCtx<'a> {
    plan: &'a CallPlan,
    in1: SourceCtx<'a>,
    args: Vec<ArgCtx<'a>>,
    tables: Vec<Arc<TwiddleTable>>,
    karat_break: usize,
}

/// Load the expanded invec1 line into `scratch.in1_raw`.
fn load_in1_raw(ctx: &LineCtx, scratch: &mut Scratch, line: usize) {
    let Scratch {
        in1_raw, in1_pre, ..
    } = scratch;
    let a1 = ctx.plan.in1.map.len();
    match &ctx.in1 {
        SourceCtx::Plain(slices) => line::read_line(
            &LineData::Plain(slices),
            &ctx.plan.in1.map,
            ctx.plan.in1.negate,
            line,
            &mut in1_raw[..a1],
        ),
        SourceCtx::Pre(p) => {
            debug_assert!(!p.is_pre_ffted());
            p.read_line(line, in1_pre);
            line::read_line(
                &LineData::Record(in1_pre),
                &ctx.plan.in1.map,
                ctx.plan.in1.negate,
                line,
                &mut in1_raw[..a1],
            );
        }
    }
}

fn process_line(ctx: &LineCtx, scratch: &mut Scratch, line: usize) {
    let mut in1_loaded = false;
    scratch.fft_ready.fill(false);

    for (ap, actx) in ctx.plan.args.iter().zip(&ctx.args) {
        match ap.algorithm {
            Algorithm::Brute | Algorithm::Karatsuba => {
                if !in1_loaded {
                    load_in1_raw(ctx, scratch, line);
                    in1_loaded = true;
                }
                if scratch.in2.len() < ap.a2 {
                    scratch.in2.resize(ap.a2, Elem::ZERO);
                }
                let Scratch {
                    in1_raw,
                    in2,
                    in2_pre,
                    res,
                    tmp,
                    ..
                } = scratch;
                let a1 = ctx.plan.a1;
                match &actx.src {
                    SourceCtx::Plain(slices) => line::read_line(
                        &LineData::Plain(slices),
                        &ap.in2.map,
                        ap.in2.negate,
                        line,
                        &mut in2[..ap.a2],
                    ),
                    SourceCtx::Pre(p) => {
                        p.read_line(line, in2_pre);
                        line::read_line(
                            &LineData::Record(in2_pre),
                            &ap.in2.map,
                            ap.in2.negate,
                            line,
                            &mut in2[..ap.a2],
                        );
                    }
                }
                let res = &mut res[..ap.adjusted_out];
                if ap.algorithm == Algorithm::Brute {
                    res.fill(Elem::ZERO);
                    brute::accumulate_window(
                        &in1_raw[..a1],
                        &in2[..ap.a2],
                        res,
                        ap.kernel_lo,
                        ap.kernel_hi,
                    );
                } else {
                    karatsuba::multiply(
                        &in1_raw[..a1],
                        &in2[..ap.a2],
                        res,
                        &mut tmp[..ap.tmp_len],
                        ctx.karat_break,
                    );
                }
            }
            Algorithm::Fft => {
                let sidx = ctx
                    .plan
                    .fft_sizes
                    .iter()
                    .position(|&s| s == ap.fft_size)
                    .unwrap();
                let table = &ctx.tables[sidx];
                if !scratch.fft_ready[sidx] {
                    match &ctx.in1 {
                        SourceCtx::Pre(p) if p.is_pre_ffted() => {
                            p.read_line(line, &mut scratch.in1_fft[sidx]);
                        }
                        _ => {
                            if !in1_loaded {
                                load_in1_raw(ctx, scratch, line);
                                in1_loaded = true;
                            }
                            let Scratch {
                                in1_raw, in1_fft, ..
                            } = scratch;
                            let buf = &mut in1_fft[sidx];
                            buf.fill(Elem::ZERO);
                            buf[..ctx.plan.a1].copy_from_slice(&in1_raw[..ctx.plan.a1]);
                            polyfft::forward(buf, table);
                        }
                    }
                    scratch.fft_ready[sidx] = true;
                }

                let fsz = ap.fft_size;
                let pre_ffted2 = matches!(&actx.src, SourceCtx::Pre(p) if p.is_pre_ffted());
                scratch.in2.resize(fsz.max(scratch.in2.len()), Elem::ZERO);
                if pre_ffted2 {
                    if let SourceCtx::Pre(p) = &actx.src {
                        p.read_line(line, &mut scratch.in2);
                    }
                } else {
                    let Scratch { in2, in2_pre, .. } = scratch;
                    in2[..fsz].fill(Elem::ZERO);
                    match &actx.src {
                        SourceCtx::Plain(slices) => line::read_line(
                            &LineData::Plain(slices),
                            &ap.in2.map,
                            ap.in2.negate,
                            line,
                            &mut in2[..ap.a2],
                        ),
                        SourceCtx::Pre(p) => {
                            p.read_line(line, in2_pre);
                            line::read_line(
                                &LineData::Record(in2_pre),
                                &ap.in2.map,
                                ap.in2.negate,
                                line,
                                &mut in2[..ap.a2],
                            );
                        }
                    }
                    polyfft::forward(&mut scratch.in2[..fsz], table);
                }

                let Scratch {
                    in1_fft, in2, res, ..
                } = scratch;
                res.resize(fsz.max(res.len()), Elem::ZERO);
                polyfft::pointwise(&in1_fft[sidx], &in2[..fsz], &mut res[..fsz]);
                polyfft::inverse(&mut res[..fsz], table);
            }
        }

        // Window, FMA, scatter.
        for (t, out) in actx.outs.iter().enumerate() {
            let Some(ptr) = out else { continue };
            let mut v = Elem::ZERO;
            for &k in &ap.window[t] {
                v = v.add(scratch.res[k as usize]);
            }
            if let Some(fma) = &actx.fma {
                let f = Elem::from_slice(&fma[t][line * 8..line * 8 + 8]);
                v = match ap.fma {
                    FmaMode::Add => v.add(f),
                    FmaMode::Sub => v.sub(f),
                    FmaMode::SubFromFma => f.sub(v),
                    FmaMode::None => v,
                };
            }
            // Safety: this line index was claimed by exactly one worker.
            unsafe { line::scatter(*ptr, line, v) };
        }
    }
}

/// Execute one call: one invec1 against one or more argument sets.
pub(crate) fn run_call<E: FftEngine>(
    engine: &E,
    pool: &HelperPool<E>,
    cache: &TwiddleCache,
    num_workers: usize,
    karat_break: usize,
    fft_break: usize,
    l2_cache_kb: usize,
    in1: &mut PolySource<'_, E>,
    invec1: VecOptions,
    args: &mut [MultArg<'_, E>],
) -> Result<()> {
    let call_meta = CallMeta {
        n1: in1.stored_len(),
        invec1,
        pre1: in1.pre_meta(),
        keep_ones1: false,
    };
    let arg_metas: Vec<ArgMeta> = args
        .iter()
        .map(|a| ArgMeta {
            n2: a.invec2.stored_len(),
            out_len: a.outvec.len(),
            fma_len: a.fmavec.as_deref().map(<[E::Num]>::len),
            options: a.options,
            pre2: a.invec2.pre_meta(),
        })
        .collect();
    let plan = plan::build(
        engine.transform_size(),
        &call_meta,
        &arg_metas,
        karat_break,
        fft_break,
        l2_cache_kb,
    )?;

    // A preprocessed poly must come from an engine with the same line count.
    let pres = std::iter::once(&*in1)
        .chain(args.iter().map(|a| &a.invec2))
        .filter_map(|s| match s {
            PolySource::Pre(p) => Some(*p),
            PolySource::Plain(_) => None,
        });
    for p in pres {
        if p.num_lines() != plan.num_lines {
            return Err(PolymultError::PreprocessMismatch(format!(
                "poly has {} lines, engine transform has {}",
                p.num_lines(),
                plan.num_lines
            )));
        }
    }

    let helper_count = (num_workers.max(1) - 1).min(pool.helpers());
    let workers = helper_count + 1;

    // Phase 1: forward-transform the plain inputs and FMA vectors.
    let mut transform_ptrs: Vec<NumPtr<E>> = Vec::new();
    if let PolySource::Plain(v) = in1 {
        transform_ptrs.extend(v.iter_mut().map(|n| NumPtr(n as *mut E::Num)));
    }
    for arg in args.iter_mut() {
        if let PolySource::Plain(v) = &mut arg.invec2 {
            transform_ptrs.extend(v.iter_mut().map(|n| NumPtr(n as *mut E::Num)));
        }
        if let Some(fma) = &mut arg.fmavec {
            transform_ptrs.extend(fma.iter_mut().map(|n| NumPtr(n as *mut E::Num)));
        }
    }
    if !transform_ptrs.is_empty() {
        let ptrs = &transform_ptrs;
        pool.run_internal(engine, helper_count, &|_worker, eng: &E| loop {
            let i = pool.next_item();
            if i >= ptrs.len() {
                break;
            }
            // Safety: each handle appears once and each index is claimed once.
            let p = ptrs[i].0;
            let num = unsafe { &mut *p };
            eng.fft(num);
        });
    }

    // Phase 2: the line kernels.
    let tables: Vec<Arc<TwiddleTable>> =
        plan.fft_sizes.iter().map(|&s| cache.ensure(s)).collect();

    let in1_ctx = source_ctx(engine, in1);
    let mut arg_ctxs = Vec::with_capacity(args.len());
    for arg in args.iter_mut() {
        let src = source_ctx(engine, &arg.invec2);
        let outs = arg
            .outvec
            .iter_mut()
            .map(|o| {
                o.as_mut()
                    .map(|n| OutPtr(engine.data_mut(n).as_mut_ptr()))
            })
            .collect();
        let fma = arg
            .fmavec
            .as_deref()
            .map(|f| f.iter().map(|n| engine.data(n)).collect());
        arg_ctxs.push(ArgCtx { src, outs, fma });
    }
    let ctx = LineCtx {
        plan: &plan,
        in1: in1_ctx,
        args: arg_ctxs,
        tables,
        karat_break,
    };

    let mut scratches = Vec::with_capacity(workers);
    for _ in 0..workers {
        scratches.push(Scratch::for_plan(&plan)?);
    }
    let scratch_ptr = ScratchPtr(scratches.as_mut_ptr());
    let num_lines = plan.num_lines;

    pool.run_internal(engine, helper_count, &|worker, _eng: &E| {
        let scratch_ptr = &scratch_ptr;
        // Safety: worker ranks are distinct and bounded by the scratch count.
        let scratch = unsafe { &mut *scratch_ptr.0.add(worker) };
        loop {
            let line = pool.next_item();
            if line >= num_lines {
                break;
            }
            process_line(&ctx, scratch, line);
        }
    });
    drop(ctx);
    drop(scratches);

    // The outputs now hold transform-domain samples.
    for arg in args.iter_mut() {
        for num in arg.outvec.iter_mut().flatten() {
            engine.set_transformed(num);
        }
    }

    // Monic fix-ups: whole-coefficient add-ins and +1 constants.
    let in1_handles: Option<&[E::Num]> = match &*in1 {
        PolySource::Plain(v) => Some(v),
        PolySource::Pre(_) => None,
    };
    for (arg, ap) in args.iter_mut().zip(&plan.args) {
        for &t in &ap.const_addins {
            if let Some(num) = &mut arg.outvec[t] {
                engine.add_small(num, 1);
            }
        }
        for va in &ap.vec_addins {
            let src = match va.input {
                1 => {
                    let handles =
                        in1_handles.expect("add-ins are never planned for preprocessed inputs");
                    &handles[va.coeff]
                }
                _ => match &arg.invec2 {
                    PolySource::Plain(v) => &v[va.coeff],
                    PolySource::Pre(_) => {
                        unreachable!("add-ins are never planned for preprocessed inputs")
                    }
                },
            };
            if let Some(num) = &mut arg.outvec[va.out_slot] {
                engine.add_into(num, src, va.negate);
            }
        }
    }

    // Phase 3: per-coefficient output post-processing.
    let mut posts: Vec<(NumPtr<E>, PostTransform)> = Vec::new();
    for (arg, ap) in args.iter_mut().zip(&plan.args) {
        if ap.post == PostTransform::None {
            continue;
        }
        for num in arg.outvec.iter_mut().flatten() {
            posts.push((NumPtr(num as *mut E::Num), ap.post));
        }
    }
    if !posts.is_empty() {
        let posts = &posts;
        pool.run_internal(engine, helper_count, &|_worker, eng: &E| loop {
            let i = pool.next_item();
            if i >= posts.len() {
                break;
            }
            let (ptr, post) = posts[i];
            // Safety: each output handle appears once in the list.
            let num = unsafe { &mut *ptr.0 };
            match post {
                PostTransform::Inverse => eng.unfft(num),
                PostTransform::StartNext => eng.start_next_fft(num),
                PostTransform::InverseThenForward => {
                    eng.unfft(num);
                    eng.fft(num);
                }
                PostTransform::None => unreachable!(),
            }
        });
    }

    Ok(())
}
