//! Modulation building blocks
//!
//! - `Lfo`: phase-accumulator LFO with several shapes
//! - `HilbertPair`: 90° allpass pair (analytic signal) for frequency shifting
//! - `DelayPitchShifter`: two-head rotating delay-line pitch shifter

use std::f64::consts::{PI, TAU};

use fx_core::Sample;

use crate::ring_buffer::{DelayLine, Interpolation};

// ============ LFO ============

/// LFO waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LfoShape {
    #[default]
    Sine,
    Triangle,
    /// Band-limited-ish square (tanh-rounded edges)
    Square,
    Saw,
    /// Smoothed random steps
    Random,
}

impl LfoShape {
    pub fn from_index(index: usize) -> Self {
        match index {
            1 => Self::Triangle,
            2 => Self::Square,
            3 => Self::Saw,
            4 => Self::Random,
            _ => Self::Sine,
        }
    }
}

/// Bipolar LFO in `[−1, 1]`
#[derive(Debug, Clone)]
pub struct Lfo {
    phase: f64,
    increment: f64,
    shape: LfoShape,
    sample_rate: f64,
    random_state: u32,
    random_from: f64,
    random_to: f64,
}

impl Lfo {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            phase: 0.0,
            increment: 0.0,
            shape: LfoShape::Sine,
            sample_rate,
            random_state: 0x9E37_79B9,
            random_from: 0.0,
            random_to: 0.0,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        let rate = self.increment * self.sample_rate;
        self.sample_rate = sample_rate;
        self.set_rate(rate);
    }

    #[inline]
    pub fn set_rate(&mut self, hz: f64) {
        self.increment = (hz.max(0.0) / self.sample_rate).min(0.5);
    }

    pub fn set_shape(&mut self, shape: LfoShape) {
        self.shape = shape;
    }

    /// Phase in `[0, 1)`
    pub fn set_phase(&mut self, phase: f64) {
        self.phase = phase.rem_euclid(1.0);
    }

    #[inline]
    pub fn phase(&self) -> f64 {
        self.phase
    }

    fn next_random(&mut self) -> f64 {
        // xorshift32
        let mut x = self.random_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.random_state = x;
        (x as f64 / u32::MAX as f64) * 2.0 - 1.0
    }

    /// Value at the current phase without advancing
    #[inline]
    pub fn value(&self) -> f64 {
        let p = self.phase;
        match self.shape {
            LfoShape::Sine => (TAU * p).sin(),
            LfoShape::Triangle => 1.0 - 4.0 * ((p + 0.25).fract() - 0.5).abs(),
            LfoShape::Square => ((TAU * p).sin() * 8.0).tanh(),
            LfoShape::Saw => 2.0 * p - 1.0,
            LfoShape::Random => {
                // Cosine interpolation between random targets
                let t = 0.5 - 0.5 * (PI * p).cos();
                self.random_from + (self.random_to - self.random_from) * t
            }
        }
    }

    /// Advance one sample and return the new value
    #[inline]
    pub fn next(&mut self) -> f64 {
        let v = self.value();
        self.phase += self.increment;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
            if self.shape == LfoShape::Random {
                self.random_from = self.random_to;
                self.random_to = self.next_random();
            }
        }
        v
    }

    /// Advance `n` samples at once (control-rate use)
    #[inline]
    pub fn advance(&mut self, n: usize) -> f64 {
        let v = self.value();
        let next = self.phase + self.increment * n as f64;
        if next >= 1.0 && self.shape == LfoShape::Random {
            self.random_from = self.random_to;
            self.random_to = self.next_random();
        }
        self.phase = next.fract();
        v
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.random_from = 0.0;
        self.random_to = 0.0;
    }
}

// ============ Hilbert Pair ============

const HILBERT_A: [f64; 4] = [0.692_387_8, 0.936_065_432_295_9, 0.988_229_522_686, 0.998_748_845_273_7];
const HILBERT_B: [f64; 4] = [0.402_192_116_242_6, 0.856_171_088_242, 0.972_290_954_565_1, 0.995_288_479_127_8];

#[derive(Debug, Clone, Default)]
struct AllpassChain {
    coeffs: [f64; 4],
    x1: [f64; 4],
    x2: [f64; 4],
    y1: [f64; 4],
    y2: [f64; 4],
}

impl AllpassChain {
    fn new(coeffs: [f64; 4]) -> Self {
        let mut chain = Self::default();
        for (c, a) in chain.coeffs.iter_mut().zip(coeffs.iter()) {
            *c = a * a;
        }
        chain
    }

    #[inline(always)]
    fn process(&mut self, mut x: f64) -> f64 {
        for i in 0..4 {
            let y = self.coeffs[i] * (x + self.y2[i]) - self.x2[i];
            self.x2[i] = self.x1[i];
            self.x1[i] = x;
            self.y2[i] = self.y1[i];
            self.y1[i] = fx_core::flush_denormal(y);
            x = y;
        }
        x
    }

    fn reset(&mut self) {
        self.x1 = [0.0; 4];
        self.x2 = [0.0; 4];
        self.y1 = [0.0; 4];
        self.y2 = [0.0; 4];
    }
}

/// Two allpass chains whose outputs are ~90° apart across the audio band
#[derive(Debug, Clone)]
pub struct HilbertPair {
    a: AllpassChain,
    b: AllpassChain,
    a_delay: f64,
}

impl HilbertPair {
    pub fn new() -> Self {
        Self {
            a: AllpassChain::new(HILBERT_A),
            b: AllpassChain::new(HILBERT_B),
            a_delay: 0.0,
        }
    }

    /// Returns `(in_phase, quadrature)`
    #[inline(always)]
    pub fn process(&mut self, x: f64) -> (f64, f64) {
        let i = self.a_delay;
        self.a_delay = self.a.process(x);
        let q = self.b.process(x);
        (i, q)
    }

    pub fn reset(&mut self) {
        self.a.reset();
        self.b.reset();
        self.a_delay = 0.0;
    }
}

impl Default for HilbertPair {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Delay-Line Pitch Shifter ============

/// Rotating two-head pitch shifter.
///
/// Two read heads sweep a window of the input delay line at a rate set by
/// the pitch ratio, half a window apart, crossfaded with `sin²`/`cos²` so
/// their gains always sum to one.
#[derive(Debug, Clone)]
pub struct DelayPitchShifter {
    line: DelayLine,
    window: f64,
    base_delay: f64,
    phase: f64,
    ratio: f64,
}

impl DelayPitchShifter {
    /// `window_samples` sets the sweep length (grain size)
    pub fn new(window_samples: usize, interpolation: Interpolation) -> Self {
        Self::with_base_delay(window_samples, 0, interpolation)
    }

    /// Heads sweep `[base_delay, base_delay + window]`
    pub fn with_base_delay(window_samples: usize, base_delay: usize, interpolation: Interpolation) -> Self {
        let min_delay = match interpolation {
            Interpolation::Sinc => crate::ring_buffer::SINC_HALF + 1,
            _ => 2,
        };
        let base_delay = base_delay.max(min_delay);
        let window = window_samples.max(16);
        Self {
            line: DelayLine::new(window + base_delay + 4, interpolation),
            window: window as f64,
            base_delay: base_delay as f64,
            phase: 0.0,
            ratio: 1.0,
        }
    }

    /// Pitch ratio (0.25..4)
    #[inline]
    pub fn set_ratio(&mut self, ratio: f64) {
        if ratio.is_finite() {
            self.ratio = ratio.clamp(0.25, 4.0);
        }
    }

    /// Mean delay of the two heads
    pub fn latency(&self) -> usize {
        (self.base_delay + self.window * 0.5) as usize
    }

    #[inline]
    pub fn write(&mut self, x: Sample) {
        self.line.write(x);
    }

    /// Advance the heads and read the crossfaded output
    #[inline]
    pub fn read(&mut self) -> Sample {
        // delay shrinks by (ratio − 1) per sample
        self.phase = (self.phase - (self.ratio - 1.0) / self.window).rem_euclid(1.0);
        let p1 = self.phase;
        let p2 = (p1 + 0.5).rem_euclid(1.0);
        let d1 = self.base_delay + p1 * self.window;
        let d2 = self.base_delay + p2 * self.window;
        let g1 = (PI * p1).sin().powi(2);
        let g2 = 1.0 - g1;
        (self.line.read(d1 as f32) as f64 * g1 + self.line.read(d2 as f32) as f64 * g2) as Sample
    }

    #[inline]
    pub fn process(&mut self, x: Sample) -> Sample {
        self.write(x);
        self.read()
    }

    pub fn reset(&mut self) {
        self.line.reset();
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lfo_range_and_period() {
        let mut lfo = Lfo::new(1000.0);
        lfo.set_rate(10.0);
        for shape in [LfoShape::Sine, LfoShape::Triangle, LfoShape::Square, LfoShape::Saw, LfoShape::Random] {
            lfo.set_shape(shape);
            lfo.reset();
            for _ in 0..1000 {
                let v = lfo.next();
                assert!((-1.0..=1.0).contains(&v), "{shape:?}: {v}");
            }
        }
        lfo.set_shape(LfoShape::Sine);
        lfo.reset();
        lfo.advance(100);
        assert!(lfo.phase().abs() < 1e-9 || (1.0 - lfo.phase()).abs() < 1e-9);
    }

    #[test]
    fn test_triangle_shape() {
        let mut lfo = Lfo::new(4.0);
        lfo.set_shape(LfoShape::Triangle);
        lfo.set_phase(0.25);
        assert!((lfo.value() - 1.0).abs() < 1e-12);
        lfo.set_phase(0.75);
        assert!((lfo.value() + 1.0).abs() < 1e-12);
        lfo.set_phase(0.0);
        assert!(lfo.value().abs() < 1e-12);
    }

    #[test]
    fn test_hilbert_quadrature() {
        let fs = 48000.0;
        let freq = 1000.0;
        let mut h = HilbertPair::new();
        let mut max_mag: f64 = 0.0;
        let mut min_mag: f64 = f64::MAX;
        for n in 0..9600 {
            let (i, q) = h.process((TAU * freq * n as f64 / fs).sin());
            if n > 4800 {
                let mag = (i * i + q * q).sqrt();
                max_mag = max_mag.max(mag);
                min_mag = min_mag.min(mag);
            }
        }
        // Analytic-signal magnitude is flat when the pair is in quadrature
        assert!(max_mag - min_mag < 0.02, "ripple {}", max_mag - min_mag);
    }

    #[test]
    fn test_pitch_shifter_unity_passes_signal() {
        let mut ps = DelayPitchShifter::new(1024, Interpolation::Linear);
        ps.set_ratio(1.0);
        let mut out = 0.0f32;
        for _ in 0..4096 {
            out = ps.process(0.5);
        }
        assert!((out - 0.5).abs() < 1e-5);
    }
}
