//! Reverb engines
//!
//! Index layout: 0 size, 1 damping, 2 predelay, 3 mix. Plate, spring, gated
//! and shimmer run a feedback tank; convolution runs the partitioned
//! convolver and exposes its impulse-response port.

use std::sync::Arc;

use fx_core::{ParamDisplay, Sample, db_to_gain_f64, from_mid_side, to_mid_side};
use fx_dsp::convolution::{IrExchange, PartitionedConvolver};
use fx_dsp::dynamics::{EnvelopeFollower, time_coeff};
use fx_dsp::filters::{OnePole, one_pole_coeff};
use fx_dsp::impulse::ImpulseResponse;
use fx_dsp::modulation::DelayPitchShifter;
use fx_dsp::reverb::{
    MAX_PREDELAY_MS, PlateReverb, ReverbSettings, SpringReverb, damping_to_cutoff, size_to_feedback,
};
use fx_dsp::ring_buffer::{DelayLine, Interpolation};

use crate::engine::{StereoKernel, feedback_tail, seconds_to_samples};
use crate::params::{ParamBank, ParamSpec};
use crate::registry::EngineId;

const SIZE: ParamSpec = ParamSpec::new("Size", 0.5, ParamDisplay::Span { min: 0.0, max: 1.0 });
const DAMPING: ParamSpec = ParamSpec::new("Damping", 0.5, ParamDisplay::Span { min: 0.0, max: 1.0 });
const PREDELAY: ParamSpec =
    ParamSpec::new("Predelay", 0.5, ParamDisplay::Span { min: 0.0, max: MAX_PREDELAY_MS as f32 });
const MIX: ParamSpec = ParamSpec::mix(0.3);
const LOW_CUT: ParamSpec = ParamSpec::new("Low Cut", 0.0, ParamDisplay::Hertz { min: 20.0, max: 1000.0 });
const HIGH_CUT: ParamSpec = ParamSpec::new("High Cut", 1.0, ParamDisplay::Hertz { min: 1000.0, max: 20000.0 });
const WIDTH: ParamSpec = ParamSpec::new("Width", 0.5, ParamDisplay::Span { min: 0.0, max: 2.0 });

/// Settings shared by the tank reverbs (indices 0..2 and 4..6)
fn tank_settings(params: &ParamBank) -> ReverbSettings {
    ReverbSettings {
        size: params.get(0),
        damping: params.get(1),
        predelay_ms: params.get(2),
        low_cut_hz: params.get(4),
        high_cut_hz: params.get(5),
        width: params.get(6),
        ..ReverbSettings::default()
    }
}

// ============ Plate ============

pub const PLATE_PARAMS: &[ParamSpec] = &[
    SIZE,
    DAMPING,
    PREDELAY,
    MIX,
    LOW_CUT,
    HIGH_CUT,
    WIDTH,
    ParamSpec::new("Modulation", 0.5, ParamDisplay::Span { min: 0.0, max: 0.6 }),
    ParamSpec::new("Drive", 0.0, ParamDisplay::Span { min: 0.0, max: 1.0 }),
];

pub struct Plate {
    core: PlateReverb,
}

impl StereoKernel for Plate {
    const ID: EngineId = EngineId::PlateReverb;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            core: PlateReverb::new(sample_rate),
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.core.set(&ReverbSettings {
            chirp: params.get(7),
            drive: params.get(8),
            ..tank_settings(params)
        });
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        self.core.process(left, right)
    }

    fn reset(&mut self) {
        self.core.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        self.core.tail_samples()
    }
}

// ============ Spring ============

pub const SPRING_PARAMS: &[ParamSpec] = &[
    SIZE,
    DAMPING,
    PREDELAY,
    MIX,
    LOW_CUT,
    HIGH_CUT,
    WIDTH,
    ParamSpec::new("Chirp", 0.5, ParamDisplay::Span { min: 0.0, max: 1.0 }),
    ParamSpec::new("Drive", 0.0, ParamDisplay::Span { min: 0.0, max: 1.0 }),
];

pub struct Spring {
    core: SpringReverb,
}

impl StereoKernel for Spring {
    const ID: EngineId = EngineId::SpringReverb;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            core: SpringReverb::new(sample_rate),
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.core.set(&ReverbSettings {
            chirp: params.get(7),
            drive: params.get(8),
            ..tank_settings(params)
        });
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        self.core.process(left, right)
    }

    fn reset(&mut self) {
        self.core.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        self.core.tail_samples()
    }
}

// ============ Convolution ============

pub const CONVOLUTION_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Size", 0.5, ParamDisplay::Span { min: 0.05, max: 1.0 }),
    DAMPING,
    PREDELAY,
    MIX,
    LOW_CUT,
    WIDTH,
    ParamSpec::new("Gain", 0.5, ParamDisplay::GainDb { min: -12.0, max: 12.0 }).audio(),
];

/// Decay of the built-in impulse response (seconds)
const DEFAULT_IR_RT60: f64 = 1.8;
const DEFAULT_IR_SEED: u64 = 0x1F_5EED;

/// Partitioned convolution with a replaceable impulse response.
///
/// Starts on a synthetic decaying-noise IR; new responses arrive through
/// [`IrExchange`] and are picked up at the next partition boundary. `Size`
/// truncates the response with a fade.
pub struct Convolution {
    sample_rate: f64,
    convolver: PartitionedConvolver,
    predelay: DelayLine,
    predelay_samples: f32,
    damping: [OnePole; 2],
    low_cut: [OnePole; 2],
    width: f64,
}

impl StereoKernel for Convolution {
    const ID: EngineId = EngineId::ConvolutionReverb;

    fn new(sample_rate: f64, max_block: usize) -> Self {
        let ir = ImpulseResponse::synthetic(sample_rate, DEFAULT_IR_RT60, DEFAULT_IR_SEED);
        Self {
            sample_rate,
            convolver: PartitionedConvolver::new(&ir, sample_rate, max_block),
            predelay: DelayLine::with_seconds(MAX_PREDELAY_MS * 0.001, sample_rate, Interpolation::Linear),
            predelay_samples: 0.0,
            damping: [OnePole::open(), OnePole::open()],
            low_cut: [OnePole::new(20.0, sample_rate), OnePole::new(20.0, sample_rate)],
            width: 1.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.convolver.set_length(params.get(0));
        let damping = params.get(1);
        let a = if damping <= 0.0 {
            1.0
        } else {
            one_pole_coeff(damping_to_cutoff(damping).min(self.sample_rate * 0.45), self.sample_rate)
        };
        for f in &mut self.damping {
            f.set_coeff(a);
        }
        self.predelay_samples = (params.get(2) * 0.001 * self.sample_rate) as f32;
        for f in &mut self.low_cut {
            f.set_cutoff(params.get(4), self.sample_rate);
        }
        self.width = params.get(5);
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let x = self.predelay.process((0.5 * (left + right)) as Sample, self.predelay_samples) as f64;
        let (l, r) = self.convolver.process(x);
        let l = self.low_cut[0].highpass(self.damping[0].lowpass(l));
        let r = self.low_cut[1].highpass(self.damping[1].lowpass(r));
        let (mid, side) = to_mid_side(l, r);
        let (l, r) = from_mid_side(mid, side * self.width);
        let gain = db_to_gain_f64(params.get(6));
        (l * gain, r * gain)
    }

    fn reset(&mut self) {
        self.convolver.reset();
        self.predelay.reset();
        for f in self.damping.iter_mut().chain(self.low_cut.iter_mut()) {
            f.reset();
        }
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        self.convolver.tail() + self.predelay_samples.ceil() as usize + seconds_to_samples(0.05, self.sample_rate)
    }

    fn latency(&self) -> usize {
        self.convolver.latency()
    }

    fn ir_port(&self) -> Option<Arc<IrExchange>> {
        Some(self.convolver.exchange())
    }
}

// ============ Shimmer ============

pub const SHIMMER_PARAMS: &[ParamSpec] = &[
    SIZE,
    DAMPING,
    PREDELAY,
    MIX,
    ParamSpec::new("Shimmer", 0.5, ParamDisplay::Span { min: 0.0, max: 0.5 }),
    ParamSpec::new("Interval", 0.0, ParamDisplay::Choice(2)).step(),
    WIDTH,
];

/// Tank delays @ 48 kHz
const SHIMMER_TANK: [usize; 4] = [1553, 1867, 2251, 2767];
/// Grain of the in-loop shifter (seconds)
const SHIMMER_WINDOW: f64 = 0.05;
const SHIMMER_INJECT: [f64; 4] = [0.5, -0.5, 0.5, -0.5];

/// Four-line feedback network with a pitch shifter in the loop.
///
/// Each pass sends `Shimmer` of the recirculating signal through an octave
/// (or fifth) up shifter, so the tail climbs in pitch as it decays.
pub struct Shimmer {
    sample_rate: f64,
    predelay: DelayLine,
    predelay_samples: f32,
    lines: [DelayLine; 4],
    lengths: [f32; 4],
    damping: [OnePole; 4],
    shifter: DelayPitchShifter,
    feedback: f64,
    amount: f64,
    width: f64,
}

impl Shimmer {
    #[inline]
    fn hadamard(v: [f64; 4]) -> [f64; 4] {
        let (a, b, c, d) = (v[0], v[1], v[2], v[3]);
        [
            0.5 * (a + b + c + d),
            0.5 * (a - b + c - d),
            0.5 * (a + b - c - d),
            0.5 * (a - b - c + d),
        ]
    }

    fn longest_line(&self) -> f64 {
        self.lengths.iter().fold(0.0f64, |m, &l| m.max(l as f64))
    }
}

impl StereoKernel for Shimmer {
    const ID: EngineId = EngineId::ShimmerReverb;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let scale = sample_rate / 48_000.0;
        let lengths = SHIMMER_TANK.map(|d| (d as f64 * scale) as f32);
        Self {
            sample_rate,
            predelay: DelayLine::with_seconds(MAX_PREDELAY_MS * 0.001, sample_rate, Interpolation::Linear),
            predelay_samples: 0.0,
            lines: lengths.map(|l| DelayLine::new(l as usize + 4, Interpolation::Linear)),
            lengths,
            damping: std::array::from_fn(|_| OnePole::open()),
            shifter: DelayPitchShifter::new(seconds_to_samples(SHIMMER_WINDOW, sample_rate), Interpolation::Linear),
            feedback: size_to_feedback(0.5),
            amount: 0.0,
            width: 1.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.feedback = size_to_feedback(params.get(0));
        let a = one_pole_coeff(damping_to_cutoff(params.get(1)).min(self.sample_rate * 0.45), self.sample_rate);
        for f in &mut self.damping {
            f.set_coeff(a);
        }
        self.predelay_samples = (params.get(2) * 0.001 * self.sample_rate) as f32;
        self.amount = params.get(4);
        self.shifter.set_ratio(if params.choice(5) == 1 { 1.5 } else { 2.0 });
        self.width = params.get(6);
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let x = self.predelay.process((0.5 * (left + right)) as Sample, self.predelay_samples) as f64;
        let mut taps = [0.0; 4];
        for i in 0..4 {
            taps[i] = self.damping[i].lowpass(self.lines[i].read(self.lengths[i]) as f64);
        }
        let mixed = Self::hadamard(taps);
        let shifted = self.shifter.process((0.25 * mixed.iter().sum::<f64>()) as Sample) as f64;
        for i in 0..4 {
            let recirculate = (1.0 - self.amount) * mixed[i] + self.amount * shifted;
            let v = SHIMMER_INJECT[i] * x + self.feedback * recirculate;
            self.lines[i].write(v.tanh() as Sample);
        }
        let (mid, side) = to_mid_side(taps[0] + taps[2], taps[1] + taps[3]);
        from_mid_side(0.5 * mid, 0.5 * side * self.width)
    }

    fn reset(&mut self) {
        self.predelay.reset();
        for line in &mut self.lines {
            line.reset();
        }
        for f in &mut self.damping {
            f.reset();
        }
        self.shifter.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        // slowest path: the longest line plus the shifter's deepest head
        let loop_len = self.longest_line() + 2.0 * self.shifter.latency() as f64;
        feedback_tail(loop_len, self.feedback, 120.0) + self.predelay_samples.ceil() as usize
    }
}

// ============ Gated ============

pub const GATED_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Size", 0.5, ParamDisplay::Span { min: 0.3, max: 1.0 }),
    DAMPING,
    PREDELAY,
    MIX,
    ParamSpec::new("Threshold", 0.5, ParamDisplay::Decibels),
    ParamSpec::new("Hold", 0.5, ParamDisplay::Millis { min: 10.0, max: 1000.0 }),
    ParamSpec::new("Release", 0.5, ParamDisplay::Millis { min: 5.0, max: 500.0 }),
];

/// Release of the input key detector (ms)
const KEY_RELEASE_MS: f64 = 40.0;

/// Plate tank cut off by a gate keyed from the dry input.
///
/// The gate opens on input above `Threshold`, stays open for `Hold` after
/// the key falls and closes over `Release`.
pub struct Gated {
    sample_rate: f64,
    core: PlateReverb,
    key: EnvelopeFollower,
    threshold: f64,
    hold: usize,
    held: usize,
    release: f64,
    gain: f64,
    attack: f64,
}

impl StereoKernel for Gated {
    const ID: EngineId = EngineId::GatedReverb;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let mut key = EnvelopeFollower::new(sample_rate);
        key.set_times(0.1, KEY_RELEASE_MS);
        Self {
            sample_rate,
            core: PlateReverb::new(sample_rate),
            key,
            threshold: 0.0,
            hold: 0,
            held: 0,
            release: 0.0,
            gain: 0.0,
            attack: time_coeff(0.5, sample_rate),
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.core.set(&ReverbSettings {
            size: params.get(0),
            damping: params.get(1),
            predelay_ms: params.get(2),
            ..ReverbSettings::default()
        });
        self.threshold = db_to_gain_f64(params.get(4));
        self.hold = seconds_to_samples(params.get(5) * 0.001, self.sample_rate);
        self.release = time_coeff(params.get(6), self.sample_rate);
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let level = self.key.process_level(left.abs().max(right.abs()));
        let open = if level > self.threshold {
            self.held = self.hold;
            true
        } else if self.held > 0 {
            self.held -= 1;
            true
        } else {
            false
        };
        self.gain = if open {
            1.0 + self.attack * (self.gain - 1.0)
        } else {
            self.release * self.gain
        };
        let (l, r) = self.core.process(left, right);
        (l * self.gain, r * self.gain)
    }

    fn reset(&mut self) {
        self.core.reset();
        self.key.reset();
        self.held = 0;
        self.gain = 0.0;
    }

    fn tail_samples(&self, params: &ParamBank) -> usize {
        // key falls from full scale to the threshold, then hold, then ~14 time constants
        let key_db = -params.get(4).min(-1.0);
        let key = seconds_to_samples(KEY_RELEASE_MS * 0.001 * key_db / 8.686, self.sample_rate);
        let release = seconds_to_samples(14.0 * params.get(6) * 0.001, self.sample_rate);
        self.core.tail_samples().min(key + self.hold + release)
    }
}
