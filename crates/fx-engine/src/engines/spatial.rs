//! Spatial engines: stereo widener, three-band imager, dimension expander
//!
//! All three work on a mid/side decomposition. Mid is always run through the
//! same crossover network as side so the two stay phase-matched.

use std::f64::consts::{FRAC_1_SQRT_2, PI};

use fx_core::{ParamDisplay, Sample, db_to_gain_f64, from_mid_side, to_mid_side};
use fx_dsp::modulation::Lfo;
use fx_dsp::ring_buffer::{DelayLine, Interpolation};

use super::Crossover;
use crate::engine::{StereoKernel, seconds_to_samples};
use crate::params::{ParamBank, ParamSpec};
use crate::registry::EngineId;

const WIDTH: ParamDisplay = ParamDisplay::Span { min: 0.0, max: 2.0 };

/// Three-way Linkwitz-Riley split, `(low, mid, high)`
#[derive(Debug, Clone)]
struct ThreeBand {
    low: Crossover,
    high: Crossover,
}

impl ThreeBand {
    fn new(low_hz: f64, high_hz: f64, sample_rate: f64) -> Self {
        Self {
            low: Crossover::new(low_hz, sample_rate),
            high: Crossover::new(high_hz, sample_rate),
        }
    }

    fn set(&mut self, low_hz: f64, high_hz: f64) {
        self.low.set_frequency(low_hz);
        self.high.set_frequency(high_hz.max(low_hz * 1.5));
    }

    #[inline(always)]
    fn split(&mut self, x: f64) -> (f64, f64, f64) {
        let (low, rest) = self.low.split(x);
        let (mid, high) = self.high.split(rest);
        (low, mid, high)
    }

    fn reset(&mut self) {
        self.low.reset();
        self.high.reset();
    }
}

// ============ Stereo Widener ============

/// Longest Haas offset (ms)
const HAAS_MAX_MS: f32 = 30.0;

pub const WIDENER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Width", 0.5, WIDTH).audio(),
    ParamSpec::new("Bass Mono", 0.5, ParamDisplay::Hertz { min: 20.0, max: 500.0 }),
    ParamSpec::new("Haas", 0.0, ParamDisplay::Span { min: 0.0, max: HAAS_MAX_MS }).audio(),
    ParamSpec::mix(1.0),
    ParamSpec::new("Output", 0.5, ParamDisplay::GainDb { min: -12.0, max: 12.0 }).audio(),
];

/// Side gain above a bass-mono crossover, plus an optional Haas offset on
/// the right channel
pub struct StereoWidener {
    sample_rate: f64,
    mid: Crossover,
    side: Crossover,
    haas: DelayLine,
}

impl StereoKernel for StereoWidener {
    const ID: EngineId = EngineId::StereoWidener;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let haas = DelayLine::with_seconds(HAAS_MAX_MS as f64 * 0.001 + 0.001, sample_rate, Interpolation::Linear);
        Self {
            sample_rate,
            mid: Crossover::new(100.0, sample_rate),
            side: Crossover::new(100.0, sample_rate),
            haas,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let freq = params.get(1);
        self.mid.set_frequency(freq);
        self.side.set_frequency(freq);
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (mid, side) = to_mid_side(left, right);
        let (mid_low, mid_high) = self.mid.split(mid);
        let (_, side_high) = self.side.split(side);
        let (l, r) = from_mid_side(mid_low + mid_high, side_high * params.get(0));

        let delay = (params.get(2) * 0.001 * self.sample_rate) as f32;
        self.haas.write(r as Sample);
        let r = self.haas.read(delay) as f64;

        let out = db_to_gain_f64(params.get(4));
        (l * out, r * out)
    }

    fn reset(&mut self) {
        self.mid.reset();
        self.side.reset();
        self.haas.reset();
    }

    fn tail_samples(&self, params: &ParamBank) -> usize {
        let hz = params.get(1).max(20.0);
        (8.0 * self.sample_rate / hz) as usize + seconds_to_samples(HAAS_MAX_MS as f64 * 0.001, self.sample_rate)
    }
}

// ============ Stereo Imager ============

pub const IMAGER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Low Width", 0.5, WIDTH).audio(),
    ParamSpec::new("Mid Width", 0.5, WIDTH).audio(),
    ParamSpec::new("High Width", 0.5, WIDTH).audio(),
    ParamSpec::new("Low Cross", 0.5, ParamDisplay::Hertz { min: 40.0, max: 1000.0 }),
    ParamSpec::new("High Cross", 0.5, ParamDisplay::Hertz { min: 1000.0, max: 12000.0 }),
    ParamSpec::new("Rotation", 0.5, ParamDisplay::Span { min: -45.0, max: 45.0 }),
    ParamSpec::mix(1.0),
];

/// Independent side width in three bands followed by a stereo rotation
pub struct StereoImager {
    sample_rate: f64,
    mid: ThreeBand,
    side: ThreeBand,
    cos: f64,
    sin: f64,
}

impl StereoKernel for StereoImager {
    const ID: EngineId = EngineId::StereoImager;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            sample_rate,
            mid: ThreeBand::new(200.0, 3500.0, sample_rate),
            side: ThreeBand::new(200.0, 3500.0, sample_rate),
            cos: 1.0,
            sin: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let (low, high) = (params.get(3), params.get(4));
        self.mid.set(low, high);
        self.side.set(low, high);
        let angle = params.get(5) * PI / 180.0;
        self.cos = angle.cos();
        self.sin = angle.sin();
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (mid, side) = to_mid_side(left, right);
        let (m_low, m_mid, m_high) = self.mid.split(mid);
        let (s_low, s_mid, s_high) = self.side.split(side);
        let side = s_low * params.get(0) + s_mid * params.get(1) + s_high * params.get(2);
        let (l, r) = from_mid_side(m_low + m_mid + m_high, side);
        (l * self.cos - r * self.sin, l * self.sin + r * self.cos)
    }

    fn reset(&mut self) {
        self.mid.reset();
        self.side.reset();
    }

    fn tail_samples(&self, params: &ParamBank) -> usize {
        let hz = params.get(3).max(40.0);
        (8.0 * self.sample_rate / hz) as usize
    }
}

// ============ Dimension Expander ============

pub const DIMENSION_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Rate", 0.5, ParamDisplay::Hertz { min: 0.1, max: 2.0 }),
    ParamSpec::new("Depth", 0.5, ParamDisplay::Percent),
    ParamSpec::new("Delay", 0.5, ParamDisplay::Millis { min: 2.0, max: 20.0 }),
    ParamSpec::new("Width", 0.5, ParamDisplay::Percent).audio(),
    ParamSpec::mix(1.0),
];

const DIMENSION_MAX_MS: f64 = 32.0;

/// Mono sum through two counter-modulated taps, fed back in with the
/// difference of the taps spread across the channels
pub struct DimensionExpander {
    sample_rate: f64,
    line: DelayLine,
    lfo: Lfo,
    base: f64,
    sweep: f64,
}

impl StereoKernel for DimensionExpander {
    const ID: EngineId = EngineId::DimensionExpander;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            sample_rate,
            line: DelayLine::with_seconds(DIMENSION_MAX_MS * 0.001, sample_rate, Interpolation::Cubic),
            lfo: Lfo::new(sample_rate),
            base: 0.0,
            sweep: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.lfo.set_rate(params.get(0));
        self.base = params.get(2) * 0.001 * self.sample_rate;
        // never sweep through zero delay
        self.sweep = 0.45 * self.base * params.get(1) * 0.01;
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (mono, _) = to_mid_side(left, right);
        self.line.write(mono as Sample);
        let m = self.lfo.next() * self.sweep;
        let a = self.line.read((self.base + m) as f32) as f64;
        let b = self.line.read((self.base - m) as f32) as f64;

        let common = 0.5 * (a + b);
        let spread = 0.5 * (a - b) * params.get(3) * 0.01;
        (
            (left + common + spread) * FRAC_1_SQRT_2,
            (right + common - spread) * FRAC_1_SQRT_2,
        )
    }

    fn reset(&mut self) {
        self.line.reset();
        self.lfo.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        seconds_to_samples(DIMENSION_MAX_MS * 0.001, self.sample_rate) + 64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, KernelEngine};
    use fx_core::ParameterMap;
    use std::f32::consts::TAU;

    fn run(engine: &mut dyn Engine, left: &mut [f32], right: &mut [f32]) {
        let mut block: [&mut [f32]; 2] = [left, right];
        engine.process(&mut block);
    }

    fn side_rms(engine: &mut dyn Engine, freq: f32) -> f32 {
        let mut acc = 0.0;
        for block in 0..100 {
            let mut left: Vec<f32> = (0..480)
                .map(|i| ((block * 480 + i) as f32 * TAU * freq / 48000.0).sin() * 0.5)
                .collect();
            let mut right: Vec<f32> = left.iter().map(|x| -x).collect();
            run(engine, &mut left, &mut right);
            if block >= 80 {
                acc += left.iter().zip(&right).map(|(l, r)| ((l - r) * 0.5).powi(2)).sum::<f32>();
            }
        }
        (acc / (20.0 * 480.0)).sqrt()
    }

    #[test]
    fn test_widener_zero_width_is_mono() {
        let mut engine = KernelEngine::<StereoWidener>::new(48000.0, 256);
        engine.apply_parameters(&ParameterMap::new().with(0, 0.0));
        let mut left: Vec<f32> = (0..256).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        let mut right: Vec<f32> = (0..256).map(|i| (i as f32 * 0.11).cos() * 0.3).collect();
        run(&mut engine, &mut left, &mut right);
        for (l, r) in left.iter().zip(&right) {
            assert!((l - r).abs() < 1e-6);
        }
    }

    #[test]
    fn test_widener_keeps_high_side() {
        let mut engine = KernelEngine::<StereoWidener>::new(48000.0, 480);
        let rms = side_rms(&mut engine, 2000.0);
        // 0.5 amplitude sine, unity width
        assert!((rms - 0.3536).abs() < 0.03, "side rms {rms}");
    }

    #[test]
    fn test_imager_low_width_collapses_bass() {
        let mut engine = KernelEngine::<StereoImager>::new(48000.0, 480);
        engine.apply_parameters(&ParameterMap::new().with(0, 0.0));
        assert!(side_rms(&mut engine, 50.0) < 0.05);

        let mut engine = KernelEngine::<StereoImager>::new(48000.0, 480);
        engine.apply_parameters(&ParameterMap::new().with(0, 0.0));
        assert!(side_rms(&mut engine, 8000.0) > 0.3);
    }

    #[test]
    fn test_imager_rotation_moves_center() {
        let mut engine = KernelEngine::<StereoImager>::new(48000.0, 4800);
        // +45 degrees
        engine.apply_parameters(&ParameterMap::new().with(5, 1.0));
        let mut left = vec![0.0f32; 4800];
        let mut right = vec![0.0f32; 4800];
        for i in 0..4800 {
            let x = (i as f32 * TAU * 1000.0 / 48000.0).sin() * 0.5;
            left[i] = x;
            right[i] = x;
        }
        run(&mut engine, &mut left, &mut right);
        let energy = |v: &[f32]| v[2400..].iter().map(|x| x * x).sum::<f32>();
        assert!(energy(&left) < 0.01 * energy(&right));
    }

    #[test]
    fn test_dimension_spreads_mono_input() {
        let mut engine = KernelEngine::<DimensionExpander>::new(48000.0, 4800);
        engine.apply_parameters(&ParameterMap::new().with(3, 1.0).with(1, 1.0));
        let mut left: Vec<f32> = (0..4800).map(|i| (i as f32 * TAU * 700.0 / 48000.0).sin() * 0.5).collect();
        let mut right = left.clone();
        run(&mut engine, &mut left, &mut right);
        let diff: f32 = left[2400..].iter().zip(&right[2400..]).map(|(l, r)| (l - r).abs()).sum();
        assert!(diff > 1.0);
        assert!(left.iter().chain(&right).all(|x| x.is_finite() && x.abs() < 2.0));
    }
}
