//! Experimental engines: Lorenz-driven modulator and a saturating feedback
//! delay network
//!
//! Neither engine generates sound on its own: the chaos source only scales,
//! filters or pans the input, and the network's loop is strictly contractive.

use std::f64::consts::{FRAC_PI_4, SQRT_2};

use fx_core::{ParamDisplay, Sample, db_to_gain_f64};
use fx_dsp::Processor;
use fx_dsp::filters::{OnePole, StateVariableFilter};
use fx_dsp::modulation::Lfo;
use fx_dsp::ring_buffer::{DelayLine, Interpolation};

use super::saturate;
use crate::engine::{StereoKernel, feedback_tail, seconds_to_samples};
use crate::params::{ParamBank, ParamSpec};
use crate::registry::EngineId;

const MIX: ParamSpec = ParamSpec::mix(0.5);

// ============ Chaos Generator ============

/// Lorenz system integrated with forward Euler
#[derive(Debug, Clone, Copy)]
struct Lorenz {
    x: f64,
    y: f64,
    z: f64,
}

impl Lorenz {
    const SIGMA: f64 = 10.0;
    const RHO: f64 = 28.0;
    const BETA: f64 = 8.0 / 3.0;
    const START: Self = Self { x: 0.1, y: 0.0, z: 0.0 };
    /// Euler diverges above this step
    const MAX_DT: f64 = 0.005;

    #[inline(always)]
    fn step(&mut self, dt: f64) {
        let dt = dt.min(Self::MAX_DT);
        let dx = Self::SIGMA * (self.y - self.x);
        let dy = self.x * (Self::RHO - self.z) - self.y;
        let dz = self.x * self.y - Self::BETA * self.z;
        self.x += dx * dt;
        self.y += dy * dt;
        self.z += dz * dt;
    }

    /// `x` scaled to `[−1, 1]`
    #[inline(always)]
    fn value(&self) -> f64 {
        (self.x / 20.0).clamp(-1.0, 1.0)
    }
}

/// What the attractor modulates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChaosTarget {
    Amplitude,
    Filter,
    Pan,
}

impl ChaosTarget {
    pub fn from_index(index: usize) -> Self {
        match index {
            1 => Self::Filter,
            2 => Self::Pan,
            _ => Self::Amplitude,
        }
    }
}

pub const CHAOS_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Rate", 0.5, ParamDisplay::Hertz { min: 0.1, max: 20.0 }),
    ParamSpec::new("Depth", 0.5, ParamDisplay::Percent),
    MIX,
    ParamSpec::new("Target", 0.0, ParamDisplay::Choice(3)).step(),
    ParamSpec::new("Cutoff", 0.5, ParamDisplay::Hertz { min: 200.0, max: 8000.0 }),
    ParamSpec::new("Resonance", 0.5, ParamDisplay::Span { min: 0.5, max: 2.0 }),
];

/// Filter sweep range either side of the cutoff (octaves)
const CHAOS_OCTAVES: f64 = 3.0;

/// Lorenz attractor driving gain, a lowpass cutoff or the stereo position
pub struct ChaosGenerator {
    sample_rate: f64,
    attractor: Lorenz,
    dt: f64,
    filters: [StateVariableFilter; 2],
}

impl StereoKernel for ChaosGenerator {
    const ID: EngineId = EngineId::ChaosGenerator;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let filter = StateVariableFilter::new(1000.0, 0.707, sample_rate);
        Self {
            sample_rate,
            attractor: Lorenz::START,
            dt: 0.0,
            filters: [filter.clone(), filter],
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.dt = params.get(0) / self.sample_rate;
        if ChaosTarget::from_index(params.choice(3)) == ChaosTarget::Filter {
            let depth = params.get(1) * 0.01;
            let nyquist = 0.45 * self.sample_rate;
            let cutoff = (params.get(4) * (CHAOS_OCTAVES * depth * self.attractor.value()).exp2()).clamp(20.0, nyquist);
            for filter in &mut self.filters {
                filter.set(cutoff, params.get(5));
            }
        }
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        self.attractor.step(self.dt);
        let m = self.attractor.value();
        let depth = params.get(1) * 0.01;
        match ChaosTarget::from_index(params.choice(3)) {
            ChaosTarget::Amplitude => {
                let gain = 1.0 - depth * 0.5 * (1.0 + m);
                (left * gain, right * gain)
            }
            ChaosTarget::Filter => (self.filters[0].process_f64(left), self.filters[1].process_f64(right)),
            ChaosTarget::Pan => {
                let angle = (m * depth + 1.0) * FRAC_PI_4;
                (left * angle.cos() * SQRT_2, right * angle.sin() * SQRT_2)
            }
        }
    }

    fn reset(&mut self) {
        self.attractor = Lorenz::START;
        for filter in &mut self.filters {
            filter.reset();
        }
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        seconds_to_samples(0.05, self.sample_rate)
    }
}

// ============ Feedback Network ============

pub const NETWORK_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Size", 0.5, ParamDisplay::Millis { min: 5.0, max: 500.0 }),
    ParamSpec::new("Feedback", 0.5, ParamDisplay::Span { min: 0.0, max: 0.95 }),
    MIX,
    ParamSpec::new("Damping", 0.5, ParamDisplay::Hertz { min: 500.0, max: 16000.0 }),
    ParamSpec::new("Drive", 0.5, ParamDisplay::GainDb { min: 0.0, max: 24.0 }),
    ParamSpec::new("Modulation", 0.5, ParamDisplay::Percent),
];

/// Line lengths relative to `Size`
const NETWORK_RATIOS: [f64; 4] = [1.0, 1.31, 1.73, 2.11];
const NETWORK_LFO_HZ: [f64; 4] = [0.13, 0.17, 0.23, 0.29];
const NETWORK_MAX_MS: f64 = 500.0;
/// Largest relative length wobble at full modulation
const NETWORK_WOBBLE: f64 = 0.005;

/// Orthonormal 4×4 Hadamard mix
#[inline(always)]
fn hadamard(x: [f64; 4]) -> [f64; 4] {
    let [a, b, c, d] = x;
    [
        0.5 * (a + b + c + d),
        0.5 * (a - b + c - d),
        0.5 * (a + b - c - d),
        0.5 * (a - b - c + d),
    ]
}

/// Four modulated delay lines cross-coupled through a Hadamard matrix, with
/// a damping lowpass and a unity-slope saturator in every loop
pub struct FeedbackNetwork {
    sample_rate: f64,
    lines: [DelayLine; 4],
    lfos: [Lfo; 4],
    damping: [OnePole; 4],
    lengths: [f64; 4],
    feedback: f64,
    drive: f64,
    wobble: f64,
}

impl FeedbackNetwork {
    fn longest(&self) -> f64 {
        self.lengths.iter().fold(0.0f64, |m, &l| m.max(l))
    }
}

impl StereoKernel for FeedbackNetwork {
    const ID: EngineId = EngineId::FeedbackNetwork;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let max_seconds = NETWORK_MAX_MS * 0.001 * NETWORK_RATIOS[3] * (1.0 + NETWORK_WOBBLE) + 0.002;
        let lfos = std::array::from_fn(|i| {
            let mut lfo = Lfo::new(sample_rate);
            lfo.set_rate(NETWORK_LFO_HZ[i]);
            lfo.set_phase(i as f64 * 0.25);
            lfo
        });
        Self {
            sample_rate,
            lines: std::array::from_fn(|_| DelayLine::with_seconds(max_seconds, sample_rate, Interpolation::Linear)),
            lfos,
            damping: std::array::from_fn(|_| OnePole::new(2800.0, sample_rate)),
            lengths: [0.0; 4],
            feedback: 0.0,
            drive: 1.0,
            wobble: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let base = params.get(0) * 0.001 * self.sample_rate;
        for (length, ratio) in self.lengths.iter_mut().zip(NETWORK_RATIOS) {
            *length = base * ratio;
        }
        self.feedback = params.get(1);
        for damping in &mut self.damping {
            damping.set_cutoff(params.get(3), self.sample_rate);
        }
        self.drive = db_to_gain_f64(params.get(4));
        self.wobble = params.get(5) * 0.01 * NETWORK_WOBBLE;
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let mut taps = [0.0; 4];
        for (i, tap) in taps.iter_mut().enumerate() {
            let wobble = 1.0 + self.lfos[i].next() * self.wobble;
            *tap = self.lines[i].read((self.lengths[i] * wobble) as f32) as f64;
        }

        let mixed = hadamard(taps);
        let inputs = [left, right, left, right];
        for i in 0..4 {
            let fed = self.damping[i].lowpass(inputs[i] + self.feedback * mixed[i]);
            self.lines[i].write(saturate(fed, self.drive) as Sample);
        }

        (0.5 * (taps[0] + taps[2]), 0.5 * (taps[1] + taps[3]))
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.reset();
        }
        for (i, lfo) in self.lfos.iter_mut().enumerate() {
            lfo.reset();
            lfo.set_phase(i as f64 * 0.25);
        }
        for damping in &mut self.damping {
            damping.reset();
        }
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        let loop_len = self.longest() * (1.0 + NETWORK_WOBBLE) + 2.0;
        feedback_tail(loop_len, self.feedback, 120.0) + seconds_to_samples(0.01, self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, KernelEngine};
    use fx_core::ParameterMap;

    const SR: f64 = 48000.0;

    fn run(engine: &mut dyn Engine, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.chunks_mut(256).zip(right.chunks_mut(256)) {
            let mut block: [&mut [f32]; 2] = [l, r];
            engine.process(&mut block);
        }
    }

    fn energy(x: &[f32]) -> f32 {
        x.iter().map(|v| v * v).sum()
    }

    #[test]
    fn test_hadamard_preserves_energy() {
        let x = [0.3, -0.7, 0.1, 0.9];
        let y = hadamard(x);
        let ex: f64 = x.iter().map(|v| v * v).sum();
        let ey: f64 = y.iter().map(|v| v * v).sum();
        assert!((ex - ey).abs() < 1e-12);
    }

    #[test]
    fn test_lorenz_stays_on_attractor() {
        let mut lorenz = Lorenz::START;
        for _ in 0..200_000 {
            lorenz.step(0.001);
        }
        assert!(lorenz.x.is_finite() && lorenz.x.abs() < 30.0);
        assert!(lorenz.z > 0.0 && lorenz.z < 60.0);
    }

    #[test]
    fn test_chaos_amplitude_stays_in_range() {
        let mut engine = KernelEngine::<ChaosGenerator>::new(SR, 256);
        // full depth, fast rate, fully wet
        engine.apply_parameters(&ParameterMap::new().with(0, 1.0).with(1, 1.0).with(2, 1.0));
        let mut left = vec![0.5f32; 96000];
        let mut right = vec![0.5f32; 96000];
        run(&mut engine, &mut left, &mut right);
        let (lo, hi) = left.iter().fold((f32::MAX, f32::MIN), |(lo, hi), &x| (lo.min(x), hi.max(x)));
        assert!(lo >= -1e-6 && hi <= 0.5 + 1e-6);
        assert!(hi - lo > 0.1, "modulation range {}", hi - lo);
    }

    #[test]
    fn test_chaos_silence_stays_silent() {
        for target in [0.0, 0.5, 1.0] {
            let mut engine = KernelEngine::<ChaosGenerator>::new(SR, 256);
            engine.apply_parameters(&ParameterMap::new().with(3, target).with(2, 1.0));
            let mut left = vec![0.0f32; 4800];
            let mut right = vec![0.0f32; 4800];
            run(&mut engine, &mut left, &mut right);
            assert!(left.iter().chain(&right).all(|&x| x == 0.0));
        }
    }

    #[test]
    fn test_network_without_feedback_is_single_pass() {
        let mut engine = KernelEngine::<FeedbackNetwork>::new(SR, 256);
        engine.apply_parameters(&ParameterMap::new().with(1, 0.0).with(2, 1.0));
        let mut left = vec![0.0f32; 24000];
        let mut right = vec![0.0f32; 24000];
        left[0] = 1.0;
        right[0] = 1.0;
        run(&mut engine, &mut left, &mut right);
        // longest line is 2.11 × the 50 ms base, plus wobble
        let longest = (0.05 * 2.11 * 1.01 * SR) as usize + 64;
        assert!(energy(&left[..longest]) > 0.01);
        assert!(energy(&left[longest..]) < 1e-9);
    }

    #[test]
    fn test_network_decays() {
        let mut engine = KernelEngine::<FeedbackNetwork>::new(SR, 256);
        engine.apply_parameters(&ParameterMap::new().with(2, 1.0));
        let mut left = vec![0.0f32; 144000];
        let mut right = vec![0.0f32; 144000];
        left[0] = 1.0;
        run(&mut engine, &mut left, &mut right);
        let early = energy(&left[12000..36000]);
        let late = energy(&left[96000..120000]);
        assert!(early > 0.0 && late < 0.1 * early, "early {early} late {late}");
    }
}
