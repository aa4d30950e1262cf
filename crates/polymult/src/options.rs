//! Call options.
//!
//! The option surface is a struct of typed fields validated once during
//! planning, rather than a bitmap with implicit combination rules.

/// Per-input-vector options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VecOptions {
    /// The input is monic: an implied leading coefficient of 1 is omitted
    /// from the stored vector (for an RLP, an implied 1 at both ends).
    pub monic: bool,
    /// The input is a reciprocal Laurent polynomial stored half-size: a
    /// stored vector of `s` coefficients represents the symmetric vector of
    /// `2s - 1` coefficients.
    pub rlp: bool,
    /// Stored coefficients are negated on load. The implied monic 1 is
    /// never negated.
    pub negate: bool,
}

/// Which slice of the full product to return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TailMode {
    /// The whole product.
    #[default]
    Full,
    /// Only the `outvec_size` highest-degree coefficients.
    High,
    /// Only the `outvec_size` lowest-degree coefficients.
    Low,
    /// `outvec_size` coefficients after skipping the given number of
    /// low-order ones. Only accepted by the several-variant entry.
    Mid {
        /// Number of least-significant coefficients not returned.
        first_skipped: usize,
    },
}

/// Circular reduction of the product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CircularMode {
    /// Plain multiplication.
    #[default]
    Off,
    /// Result modulo (X^size - 1). Wrapping happens before any tail slice
    /// is taken.
    On(usize),
}

/// Fused multiply-add against an extra polynomial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FmaMode {
    /// No FMA vector.
    #[default]
    None,
    /// `invec1 * invec2 + fmavec`.
    Add,
    /// `invec1 * invec2 - fmavec`.
    Sub,
    /// `fmavec - invec1 * invec2`.
    SubFromFma,
}

/// What to do with each output coefficient after the line kernels finish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PostTransform {
    /// Apply the engine's inverse transform (the default).
    #[default]
    Inverse,
    /// Leave outputs in the per-coefficient transform domain.
    None,
    /// Inverse transform, then begin a fresh forward transform through the
    /// engine's start-next hook.
    StartNext,
    /// Inverse transform followed by a full forward transform.
    InverseThenForward,
}

/// Options for one multiplication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Options for the first input vector.
    pub invec1: VecOptions,
    /// Options for the second input vector.
    pub invec2: VecOptions,
    /// Output slice selection.
    pub tail: TailMode,
    /// Circular reduction.
    pub circular: CircularMode,
    /// Fused multiply-add mode.
    pub fma: FmaMode,
    /// Output coefficient post-processing.
    pub post: PostTransform,
}

impl Options {
    /// Stored-size to full-length expansion for one input under these
    /// options: RLP mirroring plus any implied monic ones.
    #[must_use]
    pub(crate) fn full_len(vec: VecOptions, stored: usize) -> usize {
        let base = if vec.rlp { 2 * stored - 1 } else { stored };
        let ones = if vec.monic {
            if vec.rlp {
                2
            } else {
                1
            }
        } else {
            0
        };
        base + ones
    }
}

/// Options for building a preprocessed polynomial: the future call's
/// options plus the preprocessing-only switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreprocessOptions {
    /// The options of the future polymult calls this poly will be used in.
    pub call: Options,
    /// Store each line already forward poly-FFTed at the planned size.
    pub pre_fft: bool,
    /// Pack the stored doubles' exponents to shrink the representation.
    pub compress: bool,
}
