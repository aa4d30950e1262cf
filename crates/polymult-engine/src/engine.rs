//! The contract between the polymult core and a big-number engine.
//!
//! A big-number engine represents each large integer as an array of f64
//! samples in a per-number transform domain where multiplication of two
//! numbers is lane-wise complex multiplication of their sample arrays.
//! The polymult core only ever touches coefficients through this trait:
//! it transforms them, reads and writes fixed-width raw slices ("lines"),
//! adds whole coefficients during monic post-processing, and inverse
//! transforms the results.

/// Big-number engine operations required by the polymult core.
///
/// Sample buffers are `transform_size()` doubles per coefficient, with two
/// consecutive doubles forming one complex bin. Adding two coefficients is
/// an elementwise operation in either domain; multiplying them is only
/// meaningful in the transform domain.
pub trait FftEngine: Send + Sync + Sized + 'static {
    /// Opaque coefficient handle.
    type Num: Send + Sync;

    /// Doubles per transformed coefficient. Always a multiple of 8, so a
    /// coefficient is made of exactly `transform_size() / 8` lines.
    fn transform_size(&self) -> usize;

    /// Allocate one zero coefficient.
    fn alloc(&self) -> Self::Num;

    /// Allocate an array of zero coefficients.
    fn alloc_array(&self, n: usize) -> Vec<Self::Num> {
        (0..n).map(|_| self.alloc()).collect()
    }

    /// Forward transform in place. A no-op on an already transformed handle.
    fn fft(&self, num: &mut Self::Num);

    /// Inverse transform in place, recovering integer digits. A no-op on an
    /// untransformed handle.
    fn unfft(&self, num: &mut Self::Num);

    /// Inverse transform, then immediately begin the next forward transform.
    /// Engines that pipeline transforms can overlap the two passes here.
    fn start_next_fft(&self, num: &mut Self::Num);

    /// Whether the handle currently holds transform-domain samples.
    fn is_transformed(&self, num: &Self::Num) -> bool;

    /// Mark a handle whose samples were written directly (through
    /// [`FftEngine::data_mut`] or raw line scatter) as transform-domain.
    fn set_transformed(&self, num: &mut Self::Num);

    /// Raw sample access.
    fn data<'a>(&self, num: &'a Self::Num) -> &'a [f64];

    /// Mutable raw sample access.
    fn data_mut<'a>(&self, num: &'a mut Self::Num) -> &'a mut [f64];

    /// `dst += src` (or `dst -= src` when `negate`). Both handles must be in
    /// the same domain; the operation is elementwise in either.
    fn add_into(&self, dst: &mut Self::Num, src: &Self::Num, negate: bool);

    /// Add a small integer constant to a coefficient, in whichever domain it
    /// currently is.
    fn add_small(&self, dst: &mut Self::Num, v: i64);

    /// Create an independent engine instance for a helper thread. Clones
    /// share immutable tables but carry their own statistics.
    fn helper_clone(&self) -> Self;

    /// Drain a helper clone's statistics into this engine. Called at pool
    /// barrier exits.
    fn absorb_stats(&self, helper: &Self);

    /// A helper thread bound to a clone of this engine has started.
    fn helper_started(&self, index: usize) {
        let _ = index;
    }

    /// A helper thread bound to a clone of this engine is shutting down.
    fn helper_stopped(&self, index: usize) {
        let _ = index;
    }
}
