//! Parameter smoothing
//!
//! One-pole ramp `current += (target − current)·α`, `α = 1 − exp(−1/(τ·fs))`.
//!
//! # Settling
//! A countdown of `⌈5·τ·fs⌉` samples starts on every retarget. When it
//! expires the value snaps to the target, so after at most that many
//! samples of constant target `|current − target| < 1e-6`.
//!
//! Coefficient-driven parameters call [`ParamSmoother::advance`] once per
//! control block; gain-like parameters call [`ParamSmoother::next`] per sample.

/// Default time constant for gain-like parameters
pub const GAIN_SMOOTHING_MS: f32 = 5.0;

/// Default time constant for cutoff/coefficient parameters
pub const COEFF_SMOOTHING_MS: f32 = 20.0;

/// One-pole smoother with guaranteed settling
#[derive(Debug, Clone)]
pub struct ParamSmoother {
    current: f32,
    target: f32,
    /// α per sample
    coeff: f64,
    time_ms: f32,
    settle_samples: u32,
    remaining: u32,
}

impl ParamSmoother {
    pub fn new(time_ms: f32) -> Self {
        let mut smoother = Self {
            current: 0.0,
            target: 0.0,
            coeff: 1.0,
            time_ms: time_ms.max(0.0),
            settle_samples: 0,
            remaining: 0,
        };
        smoother.prepare(48000.0);
        smoother
    }

    /// Recompute the coefficient for a sample rate; keeps the current value
    pub fn prepare(&mut self, sample_rate: f64) {
        let tau_samples = self.time_ms as f64 * 0.001 * sample_rate.max(1.0);
        if tau_samples <= 0.0 {
            self.coeff = 1.0;
            self.settle_samples = 0;
        } else {
            self.coeff = 1.0 - (-1.0 / tau_samples).exp();
            self.settle_samples = (5.0 * tau_samples).ceil().min(u32::MAX as f64) as u32;
        }
        self.remaining = self.remaining.min(self.settle_samples);
        if self.remaining == 0 {
            self.current = self.target;
        }
    }

    pub fn set_time_ms(&mut self, time_ms: f32, sample_rate: f64) {
        self.time_ms = time_ms.max(0.0);
        self.prepare(sample_rate);
    }

    /// Retarget; non-finite targets are ignored
    #[inline]
    pub fn set_target(&mut self, target: f32) {
        if !target.is_finite() || target == self.target {
            return;
        }
        self.target = target;
        self.remaining = self.settle_samples;
        if self.remaining == 0 {
            self.current = target;
        }
    }

    /// Jump straight to a value
    pub fn set_immediate(&mut self, value: f32) {
        if value.is_finite() {
            self.target = value;
            self.current = value;
            self.remaining = 0;
        }
    }

    /// Snap the current value to the target
    #[inline]
    pub fn snap(&mut self) {
        self.current = self.target;
        self.remaining = 0;
    }

    /// Advance one sample
    #[inline]
    pub fn next(&mut self) -> f32 {
        if self.remaining == 0 {
            return self.current;
        }
        self.remaining -= 1;
        let next = self.current as f64 + (self.target as f64 - self.current as f64) * self.coeff;
        self.current = next as f32;
        if self.remaining == 0 {
            self.current = self.target;
        }
        self.current
    }

    /// Advance `n` samples at once: `current = target + (current − target)·(1 − α)^n`
    #[inline]
    pub fn advance(&mut self, n: usize) -> f32 {
        if self.remaining == 0 || n == 0 {
            return self.current;
        }
        if n as u64 >= self.remaining as u64 {
            self.snap();
            return self.current;
        }
        self.remaining -= n as u32;
        let decay = (1.0 - self.coeff).powi(n as i32);
        let diff = self.current as f64 - self.target as f64;
        self.current = (self.target as f64 + diff * decay) as f32;
        self.current
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn is_smoothing(&self) -> bool {
        self.remaining > 0
    }

    /// Samples until the countdown snaps
    pub fn settle_samples(&self) -> u32 {
        self.settle_samples
    }
}

impl Default for ParamSmoother {
    fn default() -> Self {
        Self::new(GAIN_SMOOTHING_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f64 = 48000.0;

    #[test]
    fn test_settles_within_bound() {
        let mut s = ParamSmoother::new(20.0);
        s.prepare(SAMPLE_RATE);
        s.set_immediate(0.0);
        s.set_target(1.0);
        let bound = (5.0 * 0.020 * SAMPLE_RATE).ceil() as usize;
        assert_eq!(s.settle_samples() as usize, bound);
        for _ in 0..bound {
            s.next();
        }
        assert!((s.current() - 1.0).abs() < 1e-6);
        assert!(!s.is_smoothing());
    }

    #[test]
    fn test_monotonic_ramp() {
        let mut s = ParamSmoother::new(5.0);
        s.prepare(SAMPLE_RATE);
        s.set_target(1.0);
        let mut prev = 0.0;
        for _ in 0..100 {
            let v = s.next();
            assert!(v >= prev);
            assert!(v - prev < 0.01);
            prev = v;
        }
    }

    #[test]
    fn test_block_advance_matches_per_sample() {
        let mut a = ParamSmoother::new(10.0);
        let mut b = ParamSmoother::new(10.0);
        a.prepare(SAMPLE_RATE);
        b.prepare(SAMPLE_RATE);
        a.set_target(0.8);
        b.set_target(0.8);
        for _ in 0..64 {
            a.next();
        }
        b.advance(64);
        assert!((a.current() - b.current()).abs() < 1e-5);
    }

    #[test]
    fn test_zero_time_is_immediate() {
        let mut s = ParamSmoother::new(0.0);
        s.prepare(SAMPLE_RATE);
        s.set_target(0.3);
        assert_eq!(s.current(), 0.3);
    }

    #[test]
    fn test_non_finite_target_ignored() {
        let mut s = ParamSmoother::new(5.0);
        s.set_immediate(0.4);
        s.set_target(f32::NAN);
        assert_eq!(s.target(), 0.4);
    }
}
