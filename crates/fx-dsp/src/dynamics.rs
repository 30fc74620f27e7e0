//! Level detection and gain computation
//!
//! - `EnvelopeFollower`: peak follower with separate attack/release
//! - `RmsDetector`: one-pole mean-square detector
//! - `SlidingPeak`: maximum over a fixed look-ahead window
//! - `GainComputer`: soft-knee compression/expansion curve in dB

use fx_core::{Sample, flush_denormal};

use crate::Processor;

/// `exp(−1/(τ·fs))` for a time constant in milliseconds
#[inline]
pub fn time_coeff(time_ms: f64, sample_rate: f64) -> f64 {
    let samples = time_ms.max(0.001) * 0.001 * sample_rate;
    (-1.0 / samples).exp()
}

/// Envelope follower for dynamics processing
#[derive(Debug, Clone)]
pub struct EnvelopeFollower {
    attack_coeff: f64,
    release_coeff: f64,
    envelope: f64,
    sample_rate: f64,
}

impl EnvelopeFollower {
    pub fn new(sample_rate: f64) -> Self {
        let mut follower = Self {
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope: 0.0,
            sample_rate,
        };
        follower.set_times(10.0, 100.0);
        follower
    }

    /// Set attack and release times in milliseconds
    pub fn set_times(&mut self, attack_ms: f64, release_ms: f64) {
        self.attack_coeff = time_coeff(attack_ms, self.sample_rate);
        self.release_coeff = time_coeff(release_ms, self.sample_rate);
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    /// Track a non-negative level
    #[inline(always)]
    pub fn process_level(&mut self, level: f64) -> f64 {
        let coeff = if level > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = flush_denormal(level + coeff * (self.envelope - level));
        self.envelope
    }

    #[inline(always)]
    pub fn process(&mut self, input: Sample) -> f64 {
        self.process_level((input as f64).abs())
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }

    pub fn current(&self) -> f64 {
        self.envelope
    }
}

/// Mean-square detector returning RMS
#[derive(Debug, Clone)]
pub struct RmsDetector {
    coeff: f64,
    mean_square: f64,
}

impl RmsDetector {
    pub fn new(window_ms: f64, sample_rate: f64) -> Self {
        Self {
            coeff: time_coeff(window_ms, sample_rate),
            mean_square: 0.0,
        }
    }

    #[inline(always)]
    pub fn process(&mut self, x: f64) -> f64 {
        self.mean_square = flush_denormal(x * x + self.coeff * (self.mean_square - x * x));
        self.mean_square.sqrt()
    }

    pub fn rms(&self) -> f64 {
        self.mean_square.sqrt()
    }

    pub fn reset(&mut self) {
        self.mean_square = 0.0;
    }
}

/// Maximum absolute value over the last `window` samples
#[derive(Debug, Clone)]
pub struct SlidingPeak {
    history: Vec<f64>,
    pos: usize,
    peak: f64,
    peak_age: usize,
}

impl SlidingPeak {
    pub fn new(window: usize) -> Self {
        Self {
            history: vec![0.0; window.max(1)],
            pos: 0,
            peak: 0.0,
            peak_age: 0,
        }
    }

    #[inline]
    pub fn window(&self) -> usize {
        self.history.len()
    }

    #[inline]
    pub fn process(&mut self, level: f64) -> f64 {
        let len = self.history.len();
        self.history[self.pos] = level;
        self.pos = (self.pos + 1) % len;
        self.peak_age += 1;
        if level >= self.peak {
            self.peak = level;
            self.peak_age = 0;
        } else if self.peak_age >= len {
            // Held maximum left the window: rescan
            let mut peak = 0.0;
            let mut age = 0;
            for i in 0..len {
                let idx = (self.pos + len - 1 - i) % len;
                if self.history[idx] > peak {
                    peak = self.history[idx];
                    age = i;
                }
            }
            self.peak = peak;
            self.peak_age = age;
        }
        self.peak
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.pos = 0;
        self.peak = 0.0;
        self.peak_age = 0;
    }
}

/// Static gain curve direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GainMode {
    /// Reduce gain above threshold
    #[default]
    Compress,
    /// Reduce gain below threshold
    Expand,
}

/// Soft-knee gain computer in the log domain
#[derive(Debug, Clone, Copy)]
pub struct GainComputer {
    pub threshold_db: f64,
    pub ratio: f64,
    pub knee_db: f64,
    pub mode: GainMode,
}

impl Default for GainComputer {
    fn default() -> Self {
        Self {
            threshold_db: -20.0,
            ratio: 4.0,
            knee_db: 6.0,
            mode: GainMode::Compress,
        }
    }
}

impl GainComputer {
    /// Gain change in dB (≤ 0) for a detector level in dB
    #[inline]
    pub fn gain_db(&self, input_db: f64) -> f64 {
        let slope = 1.0 - 1.0 / self.ratio.max(1.0);
        let over = match self.mode {
            GainMode::Compress => input_db - self.threshold_db,
            GainMode::Expand => self.threshold_db - input_db,
        };
        let half_knee = self.knee_db * 0.5;
        let reduction = if over <= -half_knee {
            0.0
        } else if over >= half_knee || self.knee_db <= 0.0 {
            over * slope
        } else {
            let x = over + half_knee;
            slope * x * x / (2.0 * self.knee_db)
        };
        match self.mode {
            GainMode::Compress => -reduction,
            // Expansion is bounded so gates stay finite
            GainMode::Expand => -(reduction * self.ratio.max(1.0)).min(96.0),
        }
    }
}

impl Processor for EnvelopeFollower {
    fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_follower_attack_release() {
        let mut env = EnvelopeFollower::new(48000.0);
        env.set_times(1.0, 100.0);
        for _ in 0..480 {
            env.process(1.0);
        }
        assert!(env.current() > 0.99);
        for _ in 0..4800 {
            env.process(0.0);
        }
        let expected = (-4800.0 / (0.1 * 48000.0) as f64).exp();
        assert!((env.current() - expected).abs() < 0.01);
    }

    #[test]
    fn test_sliding_peak_window() {
        let mut peak = SlidingPeak::new(4);
        assert_eq!(peak.process(0.5), 0.5);
        assert_eq!(peak.process(0.1), 0.5);
        assert_eq!(peak.process(0.2), 0.5);
        assert_eq!(peak.process(0.3), 0.5);
        assert_eq!(peak.process(0.0), 0.3);
        assert_eq!(peak.process(0.0), 0.3);
        assert_eq!(peak.process(0.0), 0.3);
        assert_eq!(peak.process(0.0), 0.0);
    }

    #[test]
    fn test_gain_computer_hard_knee() {
        let gc = GainComputer {
            threshold_db: -20.0,
            ratio: 4.0,
            knee_db: 0.0,
            mode: GainMode::Compress,
        };
        assert_eq!(gc.gain_db(-30.0), 0.0);
        assert!((gc.gain_db(-8.0) + 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_gain_computer_expand() {
        let gc = GainComputer {
            threshold_db: -40.0,
            ratio: 2.0,
            knee_db: 0.0,
            mode: GainMode::Expand,
        };
        assert_eq!(gc.gain_db(-30.0), 0.0);
        assert!(gc.gain_db(-50.0) < -9.0);
    }

    #[test]
    fn test_rms_of_sine() {
        let mut rms = RmsDetector::new(50.0, 48000.0);
        let mut level = 0.0;
        for i in 0..48000 {
            level = rms.process((2.0 * std::f64::consts::PI * 1000.0 * i as f64 / 48000.0).sin());
        }
        assert!((level - std::f64::consts::FRAC_1_SQRT_2).abs() < 0.01);
    }
}
