//! Second-order sections in transposed direct form II
//!
//! The transposed form keeps state small and well-conditioned in floating
//! point. Coefficients and state are double precision; samples cross the
//! boundary as `f32`.
//!
//! [`Biquad`] caches its design key and recomputes coefficients only when
//! frequency moves more than 0.5 Hz, Q more than 0.005 or gain more than
//! 0.01 dB. A design that produces non-finite coefficients degrades the
//! filter to unity.

use fx_core::{Sample, sanitize_state};
use std::f64::consts::PI;

use crate::{MonoProcessor, Processor};

/// Response shapes for a biquad section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
    Allpass,
    Peaking,
    LowShelf,
    HighShelf,
}

/// Biquad coefficients (normalized by a0)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

/// Shared RBJ cookbook prelude
struct Prelude {
    cos_omega: f64,
    alpha: f64,
}

impl Prelude {
    fn new(freq: f64, q: f64, sample_rate: f64) -> Self {
        let nyquist_guard = sample_rate * 0.4999;
        let freq = freq.clamp(1.0, nyquist_guard);
        let omega = 2.0 * PI * freq / sample_rate;
        Self {
            cos_omega: omega.cos(),
            alpha: omega.sin() / (2.0 * q.max(1e-3)),
        }
    }
}

impl BiquadCoeffs {
    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        let c = Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        };
        if c.is_finite() { c } else { Self::bypass() }
    }

    /// RBJ lowpass coefficients
    pub fn lowpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let Prelude { cos_omega, alpha } = Prelude::new(freq, q, sample_rate);
        let b1 = 1.0 - cos_omega;
        Self::normalized(b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha)
    }

    /// RBJ highpass coefficients
    pub fn highpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let Prelude { cos_omega, alpha } = Prelude::new(freq, q, sample_rate);
        let b1 = -(1.0 + cos_omega);
        Self::normalized(-b1 / 2.0, b1, -b1 / 2.0, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha)
    }

    /// RBJ bandpass coefficients (constant 0 dB peak gain)
    pub fn bandpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let Prelude { cos_omega, alpha } = Prelude::new(freq, q, sample_rate);
        Self::normalized(alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_omega, 1.0 - alpha)
    }

    /// RBJ notch coefficients
    pub fn notch(freq: f64, q: f64, sample_rate: f64) -> Self {
        let Prelude { cos_omega, alpha } = Prelude::new(freq, q, sample_rate);
        let b1 = -2.0 * cos_omega;
        Self::normalized(1.0, b1, 1.0, 1.0 + alpha, b1, 1.0 - alpha)
    }

    /// RBJ allpass coefficients
    pub fn allpass(freq: f64, q: f64, sample_rate: f64) -> Self {
        let Prelude { cos_omega, alpha } = Prelude::new(freq, q, sample_rate);
        let b1 = -2.0 * cos_omega;
        Self::normalized(1.0 - alpha, b1, 1.0 + alpha, 1.0 + alpha, b1, 1.0 - alpha)
    }

    /// RBJ peaking EQ coefficients
    pub fn peaking(freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let Prelude { cos_omega, alpha } = Prelude::new(freq, q, sample_rate);
        let b1 = -2.0 * cos_omega;
        Self::normalized(
            1.0 + alpha * a,
            b1,
            1.0 - alpha * a,
            1.0 + alpha / a,
            b1,
            1.0 - alpha / a,
        )
    }

    /// RBJ low shelf coefficients
    pub fn low_shelf(freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let Prelude { cos_omega, alpha } = Prelude::new(freq, q, sample_rate);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega),
            a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha),
            (a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega),
            (a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha,
        )
    }

    /// RBJ high shelf coefficients
    pub fn high_shelf(freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let Prelude { cos_omega, alpha } = Prelude::new(freq, q, sample_rate);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega),
            a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos_omega),
            (a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha,
        )
    }

    /// Design by type
    pub fn design(kind: FilterType, freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        match kind {
            FilterType::Lowpass => Self::lowpass(freq, q, sample_rate),
            FilterType::Highpass => Self::highpass(freq, q, sample_rate),
            FilterType::Bandpass => Self::bandpass(freq, q, sample_rate),
            FilterType::Notch => Self::notch(freq, q, sample_rate),
            FilterType::Allpass => Self::allpass(freq, q, sample_rate),
            FilterType::Peaking => Self::peaking(freq, q, gain_db, sample_rate),
            FilterType::LowShelf => Self::low_shelf(freq, q, gain_db, sample_rate),
            FilterType::HighShelf => Self::high_shelf(freq, q, gain_db, sample_rate),
        }
    }

    /// Bypass (unity gain, no filtering)
    pub const fn bypass() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.b0.is_finite()
            && self.b1.is_finite()
            && self.b2.is_finite()
            && self.a1.is_finite()
            && self.a2.is_finite()
    }

    /// Magnitude response at `freq`
    pub fn magnitude_at(&self, freq: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * freq / sample_rate;
        let (c1, s1) = (w.cos(), w.sin());
        let (c2, s2) = ((2.0 * w).cos(), (2.0 * w).sin());
        let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
        let num_im = -(self.b1 * s1 + self.b2 * s2);
        let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
        let den_im = -(self.a1 * s1 + self.a2 * s2);
        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::bypass()
    }
}

// ============ TDF-II Core ============

/// Transposed Direct Form II biquad state + coefficients
#[derive(Debug, Clone)]
pub struct BiquadTDF2 {
    coeffs: BiquadCoeffs,
    z1: f64,
    z2: f64,
}

impl BiquadTDF2 {
    pub fn new() -> Self {
        Self::with_coeffs(BiquadCoeffs::bypass())
    }

    pub fn with_coeffs(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = if coeffs.is_finite() { coeffs } else { BiquadCoeffs::bypass() };
    }

    #[inline]
    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    #[inline(always)]
    pub fn process_f64(&mut self, input: f64) -> f64 {
        let c = &self.coeffs;
        let output = c.b0 * input + self.z1;
        self.z1 = c.b1 * input - c.a1 * output + self.z2;
        self.z2 = c.b2 * input - c.a2 * output;
        if !output.is_finite() {
            self.z1 = 0.0;
            self.z2 = 0.0;
            return 0.0;
        }
        output
    }

    /// Flush tiny states; call once per block
    #[inline]
    pub fn nudge(&mut self) {
        self.z1 = sanitize_state(self.z1);
        self.z2 = sanitize_state(self.z2);
    }
}

impl Default for BiquadTDF2 {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for BiquadTDF2 {
    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

impl MonoProcessor for BiquadTDF2 {
    #[inline(always)]
    fn process_sample(&mut self, input: Sample) -> Sample {
        self.process_f64(input as f64) as Sample
    }
}

// ============ Cached Biquad ============

/// Design key tolerance
const FREQ_EPSILON: f64 = 0.5;
const Q_EPSILON: f64 = 0.005;
const GAIN_EPSILON: f64 = 0.01;

/// Biquad that redesigns itself only on meaningful parameter change
#[derive(Debug, Clone)]
pub struct Biquad {
    filter: BiquadTDF2,
    kind: FilterType,
    freq: f64,
    q: f64,
    gain_db: f64,
    sample_rate: f64,
}

impl Biquad {
    pub fn new(kind: FilterType, freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let mut filter = Self {
            filter: BiquadTDF2::new(),
            kind,
            freq,
            q,
            gain_db,
            sample_rate,
        };
        filter.redesign();
        filter
    }

    pub fn lowpass(freq: f64, sample_rate: f64) -> Self {
        Self::new(FilterType::Lowpass, freq, std::f64::consts::FRAC_1_SQRT_2, 0.0, sample_rate)
    }

    pub fn highpass(freq: f64, sample_rate: f64) -> Self {
        Self::new(FilterType::Highpass, freq, std::f64::consts::FRAC_1_SQRT_2, 0.0, sample_rate)
    }

    fn redesign(&mut self) {
        let coeffs = if self.freq.is_finite() && self.q.is_finite() && self.gain_db.is_finite() {
            BiquadCoeffs::design(self.kind, self.freq, self.q, self.gain_db, self.sample_rate)
        } else {
            BiquadCoeffs::bypass()
        };
        self.filter.set_coeffs(coeffs);
    }

    /// Update the design; returns true if coefficients were recomputed
    #[inline]
    pub fn set(&mut self, freq: f64, q: f64, gain_db: f64) -> bool {
        if (freq - self.freq).abs() <= FREQ_EPSILON
            && (q - self.q).abs() <= Q_EPSILON
            && (gain_db - self.gain_db).abs() <= GAIN_EPSILON
        {
            return false;
        }
        self.freq = freq;
        self.q = q;
        self.gain_db = gain_db;
        self.redesign();
        true
    }

    #[inline]
    pub fn set_frequency(&mut self, freq: f64) -> bool {
        self.set(freq, self.q, self.gain_db)
    }

    #[inline]
    pub fn frequency(&self) -> f64 {
        self.freq
    }

    #[inline]
    pub fn coeffs(&self) -> &BiquadCoeffs {
        self.filter.coeffs()
    }

    #[inline(always)]
    pub fn process_f64(&mut self, input: f64) -> f64 {
        self.filter.process_f64(input)
    }

    #[inline]
    pub fn nudge(&mut self) {
        self.filter.nudge();
    }
}

impl Processor for Biquad {
    fn reset(&mut self) {
        self.filter.reset();
    }
}

impl MonoProcessor for Biquad {
    #[inline(always)]
    fn process_sample(&mut self, input: Sample) -> Sample {
        self.filter.process_f64(input as f64) as Sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f64 = 48000.0;

    fn response(filter: &mut BiquadTDF2, freq: f64) -> f64 {
        let mut peak: f64 = 0.0;
        for i in 0..(SAMPLE_RATE as usize) {
            let x = (2.0 * PI * freq * i as f64 / SAMPLE_RATE).sin();
            let y = filter.process_f64(x);
            if i > SAMPLE_RATE as usize / 2 {
                peak = peak.max(y.abs());
            }
        }
        peak
    }

    #[test]
    fn test_lowpass_response() {
        let mut f = BiquadTDF2::with_coeffs(BiquadCoeffs::lowpass(1000.0, 0.707, SAMPLE_RATE));
        assert!(response(&mut f, 100.0) > 0.95);
        f.reset();
        assert!(response(&mut f, 10000.0) < 0.05);
    }

    #[test]
    fn test_peaking_gain_at_center() {
        let c = BiquadCoeffs::peaking(1000.0, 1.0, 6.0, SAMPLE_RATE);
        let g = c.magnitude_at(1000.0, SAMPLE_RATE);
        assert!((20.0 * g.log10() - 6.0).abs() < 0.01);
        assert!((c.magnitude_at(20.0, SAMPLE_RATE) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_non_finite_design_bypasses() {
        let mut b = Biquad::new(FilterType::Peaking, 1000.0, 1.0, 0.0, SAMPLE_RATE);
        b.set(f64::NAN, 1.0, 3.0);
        assert_eq!(*b.coeffs(), BiquadCoeffs::bypass());
        assert_eq!(b.process_sample(0.25), 0.25);
    }

    #[test]
    fn test_epsilon_cache() {
        let mut b = Biquad::new(FilterType::Lowpass, 1000.0, 0.707, 0.0, SAMPLE_RATE);
        assert!(!b.set(1000.3, 0.709, 0.0));
        assert!(b.set(1001.0, 0.707, 0.0));
        assert!(b.set(1001.0, 0.72, 0.0));
    }

    #[test]
    fn test_bandpass_unity_peak() {
        let c = BiquadCoeffs::bandpass(2000.0, 2.0, SAMPLE_RATE);
        assert!((c.magnitude_at(2000.0, SAMPLE_RATE) - 1.0).abs() < 1e-6);
    }
}
