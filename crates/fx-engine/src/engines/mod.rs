//! Engine library
//!
//! One module per category. Each engine is a [`StereoKernel`] with a static
//! parameter table, wrapped by [`KernelEngine`]; only `Bypass` implements
//! [`Engine`](crate::Engine) directly.
//!
//! [`StereoKernel`]: crate::engine::StereoKernel
//! [`KernelEngine`]: crate::engine::KernelEngine

pub mod delay;
pub mod distortion;
pub mod dynamics;
pub mod eq;
pub mod experimental;
pub mod filters;
pub mod modulation;
pub mod pitch;
pub mod reverb;
pub mod spatial;
pub mod spectral;
pub mod utility;

use fx_dsp::biquad::{Biquad, FilterType};
use fx_dsp::Processor;

// ============ Shared Building Blocks ============

/// Two identical biquads, one per channel
#[derive(Debug, Clone)]
pub(crate) struct StereoBiquad {
    left: Biquad,
    right: Biquad,
}

impl StereoBiquad {
    pub fn new(kind: FilterType, freq: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let filter = Biquad::new(kind, freq, q, gain_db, sample_rate);
        Self {
            left: filter.clone(),
            right: filter,
        }
    }

    #[inline]
    pub fn set(&mut self, freq: f64, q: f64, gain_db: f64) {
        self.left.set(freq, q, gain_db);
        self.right.set(freq, q, gain_db);
    }

    #[inline(always)]
    pub fn process(&mut self, left: f64, right: f64) -> (f64, f64) {
        (self.left.process_f64(left), self.right.process_f64(right))
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}

/// Linkwitz-Riley 4th-order two-way split
#[derive(Debug, Clone)]
pub(crate) struct Crossover {
    low: [Biquad; 2],
    high: [Biquad; 2],
}

impl Crossover {
    pub fn new(freq: f64, sample_rate: f64) -> Self {
        let lp = Biquad::lowpass(freq, sample_rate);
        let hp = Biquad::highpass(freq, sample_rate);
        Self {
            low: [lp.clone(), lp],
            high: [hp.clone(), hp],
        }
    }

    #[inline]
    pub fn set_frequency(&mut self, freq: f64) {
        for f in self.low.iter_mut().chain(self.high.iter_mut()) {
            f.set_frequency(freq);
        }
    }

    /// Returns `(low, high)`
    #[inline(always)]
    pub fn split(&mut self, x: f64) -> (f64, f64) {
        let low = self.low[0].process_f64(x);
        let low = self.low[1].process_f64(low);
        let high = self.high[0].process_f64(x);
        let high = self.high[1].process_f64(high);
        (low, high)
    }

    pub fn reset(&mut self) {
        for f in self.low.iter_mut().chain(self.high.iter_mut()) {
            f.reset();
        }
    }
}

/// Normalized saturator: unity slope at zero, `tanh(k·x)/k`
#[inline(always)]
pub(crate) fn saturate(x: f64, drive: f64) -> f64 {
    let k = drive.max(1e-3);
    (k * x).tanh() / k
}

/// Biased saturator for even harmonics, zero at zero with unity slope.
///
/// `tanh(k·(x + b)) − tanh(k·b)`, normalized by its slope at the origin.
#[inline(always)]
pub(crate) fn saturate_biased(x: f64, drive: f64, bias: f64) -> f64 {
    let k = drive.max(1e-3);
    let offset = (k * bias).tanh();
    let slope = k * (1.0 - offset * offset);
    ((k * (x + bias)).tanh() - offset) / slope.max(1e-6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    #[test]
    fn test_crossover_bands_sum_flat() {
        for freq in [100.0, 1000.0, 8000.0] {
            let mut split = Crossover::new(1000.0, 48000.0);
            let (mut low, mut high, mut sum, mut input) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());
            for n in 0..48000 {
                let x = (TAU * freq * n as f64 / 48000.0).sin();
                let (l, h) = split.split(x);
                if n >= 24000 {
                    low.push(l);
                    high.push(h);
                    sum.push(l + h);
                    input.push(x);
                }
            }
            assert!((rms(&sum) / rms(&input) - 1.0).abs() < 0.01, "{freq} Hz");
            if freq < 1000.0 {
                assert!(rms(&high) < 0.05 * rms(&low), "{freq} Hz leaks high");
            } else if freq > 1000.0 {
                assert!(rms(&low) < 0.05 * rms(&high), "{freq} Hz leaks low");
            }
        }
    }
}
