//! # polymult
//!
//! Polynomial multiplication where every coefficient is an opaque
//! big-number living inside an external transform engine (see
//! `polymult-engine`). Three kernels are selected by size: schoolbook
//! brute force, Karatsuba, and a mixed-radix floating-point poly-FFT, all
//! operating on "lines" (matched cache-line slices read from every
//! coefficient in parallel). One plan drives each call; helper threads
//! split the independent lines among themselves.

pub mod error;
pub mod handle;
pub mod options;
pub mod preprocess;
pub mod sizes;
pub mod twiddles;

mod brute;
mod exec;
mod karatsuba;
mod line;
mod plan;
mod polyfft;
mod pool;

// Re-exports
pub use error::{PolymultError, Result};
pub use exec::{MultArg, PolySource};
pub use handle::Polymult;
pub use options::{
    CircularMode, FmaMode, Options, PostTransform, PreprocessOptions, TailMode, VecOptions,
};
pub use pool::WorkCounter;
pub use preprocess::PreprocessedPoly;
pub use sizes::{fft_size, mem_required, safety_margin};
pub use twiddles::{TwiddleCache, TwiddleTable, MAX_CACHED_TWIDDLES};
