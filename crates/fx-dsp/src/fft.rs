//! FFT wrappers
//!
//! Thin owners around `realfft` / `rustfft` plans that pre-allocate their
//! scratch so every transform after construction is allocation-free.

use std::sync::Arc;

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::{Fft, FftPlanner};

pub use rustfft::num_complex::Complex;

/// Double-precision complex bin
pub type Complex64 = Complex<f64>;

pub const ZERO: Complex64 = Complex64::new(0.0, 0.0);

// ============ Real FFT ============

/// Forward/inverse real FFT of a fixed power-of-two size
pub struct RealFft {
    size: usize,
    forward: Arc<dyn RealToComplex<f64>>,
    inverse: Arc<dyn ComplexToReal<f64>>,
    scratch_forward: Vec<Complex64>,
    scratch_inverse: Vec<Complex64>,
}

impl RealFft {
    pub fn new(size: usize) -> Self {
        let mut planner = RealFftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_forward = forward.make_scratch_vec();
        let scratch_inverse = inverse.make_scratch_vec();
        Self {
            size,
            forward,
            inverse,
            scratch_forward,
            scratch_inverse,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of half-spectrum bins (`size/2 + 1`)
    #[inline]
    pub fn bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// Forward transform; `input` is used as scratch and left undefined
    #[inline]
    pub fn forward(&mut self, input: &mut [f64], output: &mut [Complex64]) {
        if self
            .forward
            .process_with_scratch(input, output, &mut self.scratch_forward)
            .is_err()
        {
            output.fill(ZERO);
        }
    }

    /// Inverse transform scaled by `1/size`; `input` is used as scratch
    #[inline]
    pub fn inverse(&mut self, input: &mut [Complex64], output: &mut [f64]) {
        // DC and Nyquist must be real for a real output
        if let Some(first) = input.first_mut() {
            first.im = 0.0;
        }
        if let Some(last) = input.last_mut() {
            last.im = 0.0;
        }
        if self
            .inverse
            .process_with_scratch(input, output, &mut self.scratch_inverse)
            .is_err()
        {
            output.fill(0.0);
            return;
        }
        let scale = 1.0 / self.size as f64;
        for x in output.iter_mut() {
            *x *= scale;
        }
    }
}

// ============ Complex FFT ============

/// In-place complex FFT pair of a fixed size
pub struct ComplexFft {
    size: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex64>,
}

impl ComplexFft {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        Self {
            size,
            forward,
            inverse,
            scratch: vec![ZERO; scratch_len],
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn forward(&mut self, buffer: &mut [Complex64]) {
        self.forward.process_with_scratch(buffer, &mut self.scratch);
    }

    /// Inverse transform scaled by `1/size`
    #[inline]
    pub fn inverse(&mut self, buffer: &mut [Complex64]) {
        self.inverse.process_with_scratch(buffer, &mut self.scratch);
        let scale = 1.0 / self.size as f64;
        for x in buffer.iter_mut() {
            *x *= scale;
        }
    }
}

// ============ Hermitian Reconstruction ============

/// Expand a half spectrum (`N/2 + 1` bins) into a full Hermitian spectrum.
///
/// `X[N−k] = conj(X[k])` for `0 < k < N/2`; DC and Nyquist are forced real.
pub fn hermitian_fill(half: &[Complex64], full: &mut [Complex64]) {
    let n = full.len();
    debug_assert_eq!(half.len(), n / 2 + 1);
    full[..half.len()].copy_from_slice(half);
    full[0].im = 0.0;
    full[n / 2].im = 0.0;
    for k in 1..n / 2 {
        full[n - k] = full[k].conj();
    }
}

/// Largest deviation from Hermitian symmetry (including DC/Nyquist imaginary parts)
pub fn hermitian_error(full: &[Complex64]) -> f64 {
    let n = full.len();
    let mut err = full[0].im.abs().max(full[n / 2].im.abs());
    for k in 1..n / 2 {
        err = err.max((full[n - k] - full[k].conj()).norm());
    }
    err
}

/// Principal argument: IEEE `remainder(x, 2π)`
#[inline(always)]
pub fn princarg(x: f64) -> f64 {
    use std::f64::consts::TAU;
    x - TAU * (x / TAU).round()
}
