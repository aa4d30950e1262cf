//! The polymult handle and public entry points.

use std::sync::Arc;

use polymult_engine::FftEngine;

use crate::error::{PolymultError, Result};
use crate::exec::{self, MultArg, PolySource};
use crate::options::{CircularMode, Options, PreprocessOptions, TailMode, VecOptions};
use crate::pool::{HelperPool, WorkCounter};
use crate::preprocess::{self, PreprocessedPoly};
use crate::twiddles::TwiddleCache;

const DEFAULT_L2_CACHE_KB: usize = 256;
const DEFAULT_KARAT_BREAK: usize = 32;
const DEFAULT_FFT_BREAK: usize = 128;

/// Process-scoped polymult state: the engine reference, thread budget,
/// kernel breakpoints, cache target and the shared twiddle cache. Helper
/// threads are spawned on first use and torn down on drop.
pub struct Polymult<E: FftEngine> {
    engine: Arc<E>,
    max_num_threads: usize,
    num_threads: usize,
    l2_cache_kb: usize,
    karat_break: usize,
    fft_break: usize,
    twiddle_cache: TwiddleCache,
    pool: Option<HelperPool<E>>,
}

impl<E: FftEngine> Polymult<E> {
    /// Create a handle over the given engine. Single-threaded until
    /// [`Polymult::set_max_num_threads`] says otherwise.
    #[must_use]
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            max_num_threads: 1,
            num_threads: 1,
            l2_cache_kb: DEFAULT_L2_CACHE_KB,
            karat_break: DEFAULT_KARAT_BREAK,
            fft_break: DEFAULT_FFT_BREAK,
            twiddle_cache: TwiddleCache::new(),
            pool: None,
        }
    }

    /// The engine this handle multiplies over.
    #[must_use]
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Set the thread budget. Must happen before the first multiplication
    /// or helper launch; the pool is sized once.
    pub fn set_max_num_threads(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Err(PolymultError::Config("thread budget of zero".into()));
        }
        if self.pool.is_some() {
            return Err(PolymultError::Config(
                "thread budget must be set before the first use of the helper pool".into(),
            ));
        }
        self.max_num_threads = n;
        self.num_threads = n;
        Ok(())
    }

    /// Use fewer threads than the budget for subsequent calls.
    pub fn set_num_threads(&mut self, n: usize) {
        self.num_threads = n.clamp(1, self.max_num_threads);
    }

    /// Cache size (in KB) the FFT size selection optimizes for.
    pub fn set_cache_size(&mut self, kb: usize) {
        self.l2_cache_kb = kb.max(1);
    }

    /// Tune the output sizes where the kernels switch from brute force to
    /// Karatsuba and from Karatsuba to the poly-FFT.
    pub fn set_break_points(&mut self, karat_break: usize, fft_break: usize) -> Result<()> {
        if karat_break < 2 || fft_break < karat_break {
            return Err(PolymultError::Config(format!(
                "invalid break points {karat_break}/{fft_break}"
            )));
        }
        self.karat_break = karat_break;
        self.fft_break = fft_break;
        Ok(())
    }

    /// The shared twiddle cache (its additions gate included).
    #[must_use]
    pub fn twiddle_cache(&self) -> &TwiddleCache {
        &self.twiddle_cache
    }

    /// Multiply two polynomials: `outvec = invec1 * invec2` under `options`.
    ///
    /// For a plain multiply the output must hold `n1 + n2 - 1` coefficients
    /// (monic inputs shift that per their implied ones). Circular combined
    /// with a high or low tail, and middle slices, are only available
    /// through [`Polymult::mult_several`].
    pub fn mult(
        &mut self,
        in1: PolySource<'_, E>,
        in2: PolySource<'_, E>,
        outvec: &mut [Option<E::Num>],
        options: &Options,
    ) -> Result<()> {
        validate_plain(options)?;
        let mut in1 = in1;
        let mut args = [MultArg {
            invec2: in2,
            outvec,
            fmavec: None,
            options: *options,
        }];
        self.run(&mut in1, options.invec1, &mut args)
    }

    /// Multiply with a fused add: `invec1 * invec2 ± fmavec` per
    /// `options.fma`. The FMA vector has one coefficient per output slot.
    pub fn mult_fma(
        &mut self,
        in1: PolySource<'_, E>,
        in2: PolySource<'_, E>,
        outvec: &mut [Option<E::Num>],
        fmavec: &mut [E::Num],
        options: &Options,
    ) -> Result<()> {
        validate_plain(options)?;
        let mut in1 = in1;
        let mut args = [MultArg {
            invec2: in2,
            outvec,
            fmavec: Some(fmavec),
            options: *options,
        }];
        self.run(&mut in1, options.invec1, &mut args)
    }

    /// Multiply one polynomial against several others, reading and
    /// forward-transforming it only once. `invec1_opts` describes the
    /// shared first input; each argument's options cover everything else
    /// (and accept every tail/circular combination).
    pub fn mult_several(
        &mut self,
        in1: PolySource<'_, E>,
        invec1_opts: VecOptions,
        args: &mut [MultArg<'_, E>],
    ) -> Result<()> {
        for arg in args.iter() {
            if arg.options.invec1 != VecOptions::default() {
                return Err(PolymultError::Config(
                    "first-input options go in the invec1_opts argument, not per-argument options"
                        .into(),
                ));
            }
        }
        let mut in1 = in1;
        self.run(&mut in1, invec1_opts, args)
    }

    /// Build a reusable preprocessed poly for future calls with the given
    /// other-input size, output size and options.
    pub fn preprocess(
        &self,
        input: &mut [E::Num],
        other_size: usize,
        out_size: usize,
        options: &PreprocessOptions,
    ) -> Result<PreprocessedPoly> {
        preprocess::build(
            &*self.engine,
            &self.twiddle_cache,
            input,
            other_size,
            out_size,
            options,
            self.karat_break,
            self.fft_break,
            self.l2_cache_kb,
        )
    }

    /// Release the helper threads into a user callback. Each helper gets
    /// its worker rank and its private engine clone; work is shared through
    /// [`Polymult::claim_next_work_item`]. The caller does its own share
    /// and then calls [`Polymult::wait_on_helpers`].
    pub fn launch_helpers<F>(&mut self, f: F)
    where
        F: Fn(usize, &E) + Send + Sync + 'static,
    {
        self.ensure_pool();
        let pool = self.pool.as_ref().expect("pool spawned above");
        pool.launch_user(self.num_threads.max(1) - 1, Arc::new(f));
    }

    /// Claim the next work item index of the current launch.
    #[must_use]
    pub fn claim_next_work_item(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.next_item(),
            None => 0,
        }
    }

    /// The shared work counter, cloneable into a helper callback so the
    /// helpers and the main thread split the same item sequence.
    pub fn work_counter(&mut self) -> WorkCounter<E> {
        self.ensure_pool();
        let pool = self.pool.as_ref().expect("pool spawned above");
        pool.work_counter()
    }

    /// Wait for all launched helpers to finish their callback.
    pub fn wait_on_helpers(&self) {
        if let Some(pool) = &self.pool {
            pool.wait();
        }
    }

    fn ensure_pool(&mut self) {
        if self.pool.is_none() {
            self.pool = Some(HelperPool::spawn(&self.engine, self.max_num_threads - 1));
        }
    }

    fn run(
        &mut self,
        in1: &mut PolySource<'_, E>,
        invec1: VecOptions,
        args: &mut [MultArg<'_, E>],
    ) -> Result<()> {
        self.ensure_pool();
        let pool = self.pool.as_ref().expect("pool spawned above");
        exec::run_call(
            &*self.engine,
            pool,
            &self.twiddle_cache,
            self.num_threads,
            self.karat_break,
            self.fft_break,
            self.l2_cache_kb,
            in1,
            invec1,
            args,
        )
    }
}

fn validate_plain(options: &Options) -> Result<()> {
    if matches!(options.tail, TailMode::Mid { .. }) {
        return Err(PolymultError::Config(
            "middle slices are only available through mult_several".into(),
        ));
    }
    if matches!(options.circular, CircularMode::On(_))
        && matches!(options.tail, TailMode::High | TailMode::Low)
    {
        return Err(PolymultError::Config(
            "circular combined with a high or low tail is only available through mult_several"
                .into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polymult_engine::DwtEngine;

    fn handle() -> Polymult<DwtEngine> {
        Polymult::new(Arc::new(DwtEngine::new(32, 8.0)))
    }

    #[test]
    fn thread_budget_locked_after_first_use() {
        let mut pm = handle();
        pm.set_max_num_threads(3).unwrap();
        pm.launch_helpers(|_, _| {});
        pm.wait_on_helpers();
        assert!(pm.set_max_num_threads(4).is_err());
        // Shrinking the active count is still allowed.
        pm.set_num_threads(2);
        pm.set_num_threads(100);
    }

    #[test]
    fn break_points_validated() {
        let mut pm = handle();
        assert!(pm.set_break_points(1, 10).is_err());
        assert!(pm.set_break_points(8, 4).is_err());
        pm.set_break_points(4, 64).unwrap();
    }

    #[test]
    fn plain_entry_rejects_several_only_combinations() {
        let mid = Options {
            tail: TailMode::Mid { first_skipped: 1 },
            ..Default::default()
        };
        assert!(validate_plain(&mid).is_err());

        let circ_hi = Options {
            tail: TailMode::High,
            circular: CircularMode::On(4),
            ..Default::default()
        };
        assert!(validate_plain(&circ_hi).is_err());

        let circ = Options {
            circular: CircularMode::On(4),
            ..Default::default()
        };
        assert!(validate_plain(&circ).is_ok());
    }

    #[test]
    fn user_helpers_share_the_work_counter() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let mut pm = handle();
        pm.set_max_num_threads(3).unwrap();
        let counter = pm.work_counter();
        let done = Arc::new(AtomicUsize::new(0));
        let done2 = Arc::clone(&done);
        pm.launch_helpers(move |_rank, _engine| {
            while counter.next() < 100 {
                done2.fetch_add(1, Ordering::Relaxed);
            }
        });
        // The main thread takes its share of the same item sequence.
        while pm.claim_next_work_item() < 100 {
            done.fetch_add(1, Ordering::Relaxed);
        }
        pm.wait_on_helpers();
        assert_eq!(done.load(Ordering::Relaxed), 100);
    }
}
