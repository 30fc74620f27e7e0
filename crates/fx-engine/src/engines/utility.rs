//! Utility engines: bypass, mid/side, gain, mono maker, phase align

use std::f64::consts::FRAC_PI_4;

use fx_core::{ParamDisplay, ParameterMap, Sample, db_to_gain_f64};
use fx_dsp::filters::FirstOrderAllpass;
use fx_dsp::ring_buffer::{DelayLine, Interpolation};

use super::Crossover;
use crate::engine::{Engine, StereoKernel};
use crate::params::{ParamBank, ParamSpec};
use crate::registry::EngineId;

// ============ Bypass ============

/// Empty slot marker; leaves the block untouched
#[derive(Debug, Default)]
pub struct Bypass;

impl Engine for Bypass {
    fn id(&self) -> EngineId {
        EngineId::Bypass
    }

    fn prepare(&mut self, _sample_rate: f64, _max_block: usize) {}

    fn reset(&mut self) {}

    fn apply_parameters(&mut self, _params: &ParameterMap) {}

    fn process(&mut self, _block: &mut [&mut [Sample]]) {}

    fn tail_samples(&self) -> usize {
        0
    }
}

// ============ Mid/Side ============

pub const MID_SIDE_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Mid", 0.5, ParamDisplay::GainDb { min: -24.0, max: 24.0 }).audio(),
    ParamSpec::new("Side", 0.5, ParamDisplay::GainDb { min: -24.0, max: 24.0 }).audio(),
    ParamSpec::new("Width", 0.5, ParamDisplay::Span { min: 0.0, max: 2.0 }).audio(),
    ParamSpec::new("Output", 0.5, ParamDisplay::GainDb { min: -12.0, max: 12.0 }).audio(),
    ParamSpec::mix(1.0),
];

/// Independent mid and side gains plus a width scale on the side channel
pub struct MidSide;

impl StereoKernel for MidSide {
    const ID: EngineId = EngineId::MidSide;

    fn new(_sample_rate: f64, _max_block: usize) -> Self {
        Self
    }

    fn control(&mut self, _params: &ParamBank) {}

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let mid = (left + right) * 0.5 * db_to_gain_f64(params.get(0));
        let side = (left - right) * 0.5 * db_to_gain_f64(params.get(1)) * params.get(2);
        let out = db_to_gain_f64(params.get(3));
        ((mid + side) * out, (mid - side) * out)
    }

    fn reset(&mut self) {}

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        0
    }
}

// ============ Gain ============

pub const GAIN_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Gain", 0.5, ParamDisplay::GainDb { min: -24.0, max: 24.0 }).audio(),
    ParamSpec::new("Pan", 0.5, ParamDisplay::Span { min: -1.0, max: 1.0 }).audio(),
    ParamSpec::new("Invert L", 0.0, ParamDisplay::Switch).step(),
    ParamSpec::new("Invert R", 0.0, ParamDisplay::Switch).step(),
    ParamSpec::new("Swap", 0.0, ParamDisplay::Switch).step(),
    ParamSpec::mix(1.0),
];

/// Gain, constant-power balance, polarity and channel swap
pub struct GainUtility;

impl GainUtility {
    /// Constant-power law normalized to unity at center
    fn pan_gains(pan: f64) -> (f64, f64) {
        let angle = (pan.clamp(-1.0, 1.0) + 1.0) * FRAC_PI_4;
        let norm = std::f64::consts::SQRT_2;
        (angle.cos() * norm, angle.sin() * norm)
    }
}

impl StereoKernel for GainUtility {
    const ID: EngineId = EngineId::GainUtility;

    fn new(_sample_rate: f64, _max_block: usize) -> Self {
        Self
    }

    fn control(&mut self, _params: &ParamBank) {}

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (pan_left, pan_right) = Self::pan_gains(params.get(1));
        let gain = db_to_gain_f64(params.get(0));
        let (mut l, mut r) = if params.switch(4) { (right, left) } else { (left, right) };
        if params.switch(2) {
            l = -l;
        }
        if params.switch(3) {
            r = -r;
        }
        (l * gain * pan_left, r * gain * pan_right)
    }

    fn reset(&mut self) {}

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        0
    }
}

// ============ Mono Maker ============

pub const MONO_MAKER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Frequency", 0.5, ParamDisplay::Hertz { min: 20.0, max: 1000.0 }),
    ParamSpec::new("Amount", 1.0, ParamDisplay::Percent).audio(),
    ParamSpec::mix(1.0),
];

/// Removes side content below a crossover frequency.
///
/// Mid runs through a matching crossover summed back to its allpass so both
/// channels keep the same phase response.
pub struct MonoMaker {
    sample_rate: f64,
    mid: Crossover,
    side: Crossover,
}

impl StereoKernel for MonoMaker {
    const ID: EngineId = EngineId::MonoMaker;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            sample_rate,
            mid: Crossover::new(140.0, sample_rate),
            side: Crossover::new(140.0, sample_rate),
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let freq = params.get(0);
        self.mid.set_frequency(freq);
        self.side.set_frequency(freq);
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (mid_low, mid_high) = self.mid.split((left + right) * 0.5);
        let (side_low, side_high) = self.side.split((left - right) * 0.5);
        let mid = mid_low + mid_high;
        let side = side_high + side_low * (1.0 - params.get(1) * 0.01);
        (mid + side, mid - side)
    }

    fn reset(&mut self) {
        self.mid.reset();
        self.side.reset();
    }

    fn tail_samples(&self, params: &ParamBank) -> usize {
        // a few cycles of the crossover
        let hz = params.get(0).max(20.0);
        (8.0 * self.sample_rate / hz) as usize
    }
}

// ============ Phase Align ============

/// Largest inter-channel delay (ms)
const ALIGN_MAX_MS: f64 = 5.0;

pub const PHASE_ALIGN_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Delay", 0.5, ParamDisplay::Span { min: -5.0, max: 5.0 }).audio(),
    ParamSpec::new("Rotation", 0.5, ParamDisplay::Hertz { min: 20.0, max: 20000.0 }),
    ParamSpec::new("Rotate Amount", 0.0, ParamDisplay::Percent),
    ParamSpec::new("Polarity R", 0.0, ParamDisplay::Switch).step(),
    ParamSpec::mix(1.0),
];

/// Delays one channel against the other and rotates the right channel's phase.
///
/// Positive delay holds back the right channel, negative the left.
pub struct PhaseAlign {
    sample_rate: f64,
    left: DelayLine,
    right: DelayLine,
    rotator: FirstOrderAllpass,
    rotate_amount: f64,
}

impl StereoKernel for PhaseAlign {
    const ID: EngineId = EngineId::PhaseAlign;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let max = (ALIGN_MAX_MS * 0.001 * sample_rate).ceil() as usize + 2;
        Self {
            sample_rate,
            left: DelayLine::new(max, Interpolation::Linear),
            right: DelayLine::new(max, Interpolation::Linear),
            rotator: FirstOrderAllpass::default(),
            rotate_amount: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.rotator.set_frequency(params.get(1), self.sample_rate);
        self.rotate_amount = params.get(2) * 0.01;
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let delay = (params.get(0) * 0.001 * self.sample_rate) as f32;
        self.left.write(left as Sample);
        self.right.write(right as Sample);
        let l = self.left.read((-delay).max(0.0)) as f64;
        let mut r = self.right.read(delay.max(0.0)) as f64;
        let rotated = self.rotator.process(r);
        r += (rotated - r) * self.rotate_amount;
        if params.switch(3) {
            r = -r;
        }
        (l, r)
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
        self.rotator.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        (ALIGN_MAX_MS * 0.001 * self.sample_rate) as usize + 64
    }
}
