//! Modulation engines
//!
//! Index layout: 0 rate, 1 depth, 2 mix. Every engine here is linear in its
//! input (or multiplies it), so silence in is silence out.

use std::f64::consts::{FRAC_PI_2, PI, TAU};

use fx_core::{ParamDisplay, Sample, db_to_gain_f64};
use fx_dsp::filters::{FirstOrderAllpass, OnePole};
use fx_dsp::modulation::{HilbertPair, Lfo, LfoShape};
use fx_dsp::ring_buffer::{DelayLine, Interpolation};

use super::{Crossover, saturate};
use crate::engine::{StereoKernel, feedback_tail, seconds_to_samples};
use crate::params::{ParamBank, ParamSpec};
use crate::registry::EngineId;

const RATE: ParamSpec = ParamSpec::new("Rate", 0.2, ParamDisplay::Hertz { min: 0.05, max: 10.0 });
const DEPTH: ParamSpec = ParamSpec::new("Depth", 0.3, ParamDisplay::Percent);
const MIX: ParamSpec = ParamSpec::mix(0.3);

/// Left/right LFO pair with a controllable phase offset
#[derive(Debug, Clone)]
struct StereoLfo {
    left: Lfo,
    right: Lfo,
}

impl StereoLfo {
    fn new(sample_rate: f64) -> Self {
        Self {
            left: Lfo::new(sample_rate),
            right: Lfo::new(sample_rate),
        }
    }

    /// `offset` in cycles
    fn set(&mut self, rate: f64, offset: f64) {
        self.left.set_rate(rate);
        self.right.set_rate(rate);
        self.right.set_phase(self.left.phase() + offset);
    }

    fn set_shape(&mut self, shape: LfoShape) {
        self.left.set_shape(shape);
        self.right.set_shape(shape);
    }

    #[inline]
    fn next(&mut self) -> (f64, f64) {
        (self.left.next(), self.right.next())
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}

// ============ Digital Chorus ============

pub const CHORUS_PARAMS: &[ParamSpec] = &[
    RATE,
    DEPTH,
    MIX,
    ParamSpec::new("Delay", 0.5, ParamDisplay::Millis { min: 5.0, max: 40.0 }),
    ParamSpec::new("Spread", 0.5, ParamDisplay::Percent),
    ParamSpec::new("Feedback", 0.5, ParamDisplay::Span { min: 0.0, max: 0.6 }),
];

const CHORUS_MAX_MS: f64 = 60.0;

/// Modulated short delay per channel, LFOs offset by `Spread`
pub struct DigitalChorus {
    sample_rate: f64,
    lines: [DelayLine; 2],
    lfo: StereoLfo,
    last: [f64; 2],
    base: f64,
    sweep: f64,
    feedback: f64,
}

impl StereoKernel for DigitalChorus {
    const ID: EngineId = EngineId::DigitalChorus;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let line = DelayLine::with_seconds(CHORUS_MAX_MS * 0.001, sample_rate, Interpolation::Cubic);
        Self {
            sample_rate,
            lines: [line.clone(), line],
            lfo: StereoLfo::new(sample_rate),
            last: [0.0; 2],
            base: 0.0,
            sweep: 0.0,
            feedback: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let ms = self.sample_rate * 0.001;
        self.base = params.get(3) * ms;
        // sweep stays below the base delay so the read head never crosses the write head
        self.sweep = self.base * 0.9 * params.get(1) * 0.01;
        self.lfo.set(params.get(0), 0.5 * params.get(4) * 0.01);
        self.feedback = params.get(5);
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (ml, mr) = self.lfo.next();
        let mut out = [0.0; 2];
        for (c, (x, m)) in [(left, ml), (right, mr)].into_iter().enumerate() {
            self.lines[c].write((x + self.feedback * self.last[c]) as Sample);
            let y = self.lines[c].read((self.base + self.sweep * m) as f32) as f64;
            self.last[c] = y;
            out[c] = y;
        }
        (out[0], out[1])
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.reset();
        }
        self.lfo.reset();
        self.last = [0.0; 2];
    }

    fn tail_samples(&self, params: &ParamBank) -> usize {
        feedback_tail(self.base + self.sweep + 4.0, params.get(5), 120.0)
    }
}

// ============ Resonant Chorus ============

pub const RESONANT_CHORUS_PARAMS: &[ParamSpec] = &[
    RATE,
    DEPTH,
    MIX,
    ParamSpec::new("Resonance", 0.5, ParamDisplay::Span { min: 0.0, max: 0.9 }),
    ParamSpec::new("Tone", 0.5, ParamDisplay::Hertz { min: 500.0, max: 12000.0 }),
    ParamSpec::new("Voices", 0.5, ParamDisplay::Choice(3)).step(),
    ParamSpec::new("Delay", 0.5, ParamDisplay::Millis { min: 2.0, max: 20.0 }),
];

const RESONANT_MAX_MS: f64 = 45.0;

/// Multi-voice chorus with a damped feedback path.
///
/// Up to three read heads share one delay line per channel; the first head
/// feeds back through a lowpass set by `Tone`.
pub struct ResonantChorus {
    sample_rate: f64,
    lines: [DelayLine; 2],
    lfos: [StereoLfo; 3],
    damping: [OnePole; 2],
    last: [f64; 2],
    base: f64,
    sweep: f64,
    resonance: f64,
    voices: usize,
}

impl StereoKernel for ResonantChorus {
    const ID: EngineId = EngineId::ResonantChorus;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let line = DelayLine::with_seconds(RESONANT_MAX_MS * 0.001, sample_rate, Interpolation::Cubic);
        let lfo = StereoLfo::new(sample_rate);
        let mut lfos = [lfo.clone(), lfo.clone(), lfo];
        for (v, lfo) in lfos.iter_mut().enumerate() {
            lfo.left.set_phase(v as f64 / 3.0);
        }
        Self {
            sample_rate,
            lines: [line.clone(), line],
            lfos,
            damping: [OnePole::open(), OnePole::open()],
            last: [0.0; 2],
            base: 0.0,
            sweep: 0.0,
            resonance: 0.0,
            voices: 1,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let ms = self.sample_rate * 0.001;
        self.base = params.get(6) * ms;
        self.sweep = self.base * 0.9 * params.get(1) * 0.01;
        for (v, lfo) in self.lfos.iter_mut().enumerate() {
            // voices run at slightly detuned rates
            lfo.set(params.get(0) * (1.0 + 0.13 * v as f64), 0.25);
        }
        let tone = params.get(4).min(self.sample_rate * 0.45);
        for f in &mut self.damping {
            f.set_cutoff(tone, self.sample_rate);
        }
        self.resonance = params.get(3);
        self.voices = params.choice(5) + 1;
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let mut mods = [(0.0, 0.0); 3];
        for (m, lfo) in mods.iter_mut().zip(self.lfos.iter_mut()) {
            *m = lfo.next();
        }
        let mut out = [0.0; 2];
        for (c, x) in [left, right].into_iter().enumerate() {
            let fb = self.damping[c].lowpass(self.last[c]) * self.resonance;
            self.lines[c].write((x + fb) as Sample);
            let mut sum = 0.0;
            for (v, m) in mods.iter().take(self.voices).enumerate() {
                let m = if c == 0 { m.0 } else { m.1 };
                let y = self.lines[c].read((self.base + self.sweep * m) as f32) as f64;
                if v == 0 {
                    self.last[c] = y;
                }
                sum += y;
            }
            out[c] = sum / (self.voices as f64).sqrt();
        }
        (out[0], out[1])
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.reset();
        }
        for (v, lfo) in self.lfos.iter_mut().enumerate() {
            lfo.reset();
            lfo.left.set_phase(v as f64 / 3.0);
        }
        for f in &mut self.damping {
            f.reset();
        }
        self.last = [0.0; 2];
    }

    fn tail_samples(&self, params: &ParamBank) -> usize {
        feedback_tail(self.base + self.sweep + 4.0, params.get(3), 120.0)
            + seconds_to_samples(0.01, self.sample_rate)
    }
}

// ============ Analog Phaser ============

pub const PHASER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Rate", 0.2, ParamDisplay::Hertz { min: 0.05, max: 8.0 }),
    DEPTH,
    MIX,
    ParamSpec::new("Feedback", 0.5, ParamDisplay::Span { min: 0.0, max: 0.85 }),
    ParamSpec::new("Stages", 0.5, ParamDisplay::Choice(4)).step(),
    ParamSpec::new("Center", 0.5, ParamDisplay::Hertz { min: 200.0, max: 2000.0 }),
    ParamSpec::new("Stereo", 0.5, ParamDisplay::Percent),
];

const PHASER_MAX_STAGES: usize = 8;

/// Swept first-order allpass cascade summed with its input.
///
/// Notches sit where the cascade reaches 180°; the sweep spans up to three
/// octaves either side of `Center`.
pub struct AnalogPhaser {
    sample_rate: f64,
    stages: [[FirstOrderAllpass; PHASER_MAX_STAGES]; 2],
    lfo: StereoLfo,
    last: [f64; 2],
    active: usize,
    center: f64,
    octaves: f64,
    feedback: f64,
}

impl StereoKernel for AnalogPhaser {
    const ID: EngineId = EngineId::AnalogPhaser;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let mut lfo = StereoLfo::new(sample_rate);
        lfo.set_shape(LfoShape::Triangle);
        Self {
            sample_rate,
            stages: Default::default(),
            lfo,
            last: [0.0; 2],
            active: 6,
            center: 630.0,
            octaves: 0.0,
            feedback: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.lfo.set(params.get(0), 0.5 * params.get(6) * 0.01);
        self.octaves = 3.0 * params.get(1) * 0.01;
        self.active = 2 * (params.choice(4) + 1);
        self.center = params.get(5);
        self.feedback = params.get(3);
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (ml, mr) = self.lfo.next();
        let mut out = [0.0; 2];
        for (c, (x, m)) in [(left, ml), (right, mr)].into_iter().enumerate() {
            let freq = self.center * (self.octaves * m).exp2();
            let mut y = x + self.feedback * self.last[c];
            for stage in self.stages[c].iter_mut().take(self.active) {
                stage.set_frequency(freq, self.sample_rate);
                y = stage.process(y);
            }
            self.last[c] = y;
            out[c] = 0.5 * (x + y);
        }
        (out[0], out[1])
    }

    fn reset(&mut self) {
        for stage in self.stages.iter_mut().flatten() {
            stage.reset();
        }
        self.lfo.reset();
        self.last = [0.0; 2];
    }

    fn tail_samples(&self, params: &ParamBank) -> usize {
        let settle = seconds_to_samples(0.2, self.sample_rate);
        settle + feedback_tail(self.active as f64 * 4.0, params.get(3), 120.0)
    }
}

// ============ Ring Modulator ============

pub const RING_MOD_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Frequency", 0.2, ParamDisplay::Hertz { min: 20.0, max: 5000.0 }),
    DEPTH,
    MIX,
    ParamSpec::new("Shape", 0.0, ParamDisplay::Percent),
    ParamSpec::new("Stereo", 0.0, ParamDisplay::Span { min: 0.0, max: 180.0 }),
    ParamSpec::new("Drift", 0.0, ParamDisplay::Percent),
];

/// Multiplies the input by a sine/square carrier.
///
/// `Depth` blends between unity and the carrier, so 100% is classic
/// ring modulation and lower settings leave some of the input through.
pub struct RingModulator {
    sample_rate: f64,
    phase: f64,
    drift: Lfo,
    increment: f64,
    square: f64,
    offset: f64,
    drift_amount: f64,
}

impl RingModulator {
    #[inline]
    fn carrier(&self, phase: f64) -> f64 {
        let s = (TAU * phase).sin();
        let q = (s * 12.0).tanh();
        s + (q - s) * self.square
    }
}

impl StereoKernel for RingModulator {
    const ID: EngineId = EngineId::RingModulator;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let mut drift = Lfo::new(sample_rate);
        drift.set_shape(LfoShape::Random);
        drift.set_rate(0.7);
        Self {
            sample_rate,
            phase: 0.0,
            drift,
            increment: 0.0,
            square: 0.0,
            offset: 0.0,
            drift_amount: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.increment = params.get(0) / self.sample_rate;
        self.square = params.get(3) * 0.01;
        self.offset = params.get(4) / 360.0;
        self.drift_amount = 0.05 * params.get(5) * 0.01;
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let drift = 1.0 + self.drift_amount * self.drift.next();
        self.phase = (self.phase + self.increment * drift).fract();
        let depth = params.get(1) * 0.01;
        let gl = 1.0 - depth + depth * self.carrier(self.phase);
        let gr = 1.0 - depth + depth * self.carrier(self.phase + self.offset);
        (left * gl, right * gr)
    }

    fn reset(&mut self) {
        self.phase = 0.0;
        self.drift.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        0
    }
}

// ============ Frequency Shifter ============

pub const FREQ_SHIFTER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Shift", 0.2, ParamDisplay::Span { min: -500.0, max: 500.0 }),
    ParamSpec::new("Feedback", 0.3, ParamDisplay::Span { min: 0.0, max: 0.9 }),
    MIX,
    ParamSpec::new("Spread", 0.0, ParamDisplay::Span { min: 0.0, max: 50.0 }),
    ParamSpec::new("Fine", 0.5, ParamDisplay::Span { min: -10.0, max: 10.0 }),
];

/// Single-sideband shifter on a Hilbert pair; every partial moves by the
/// same number of hertz
pub struct FrequencyShifter {
    sample_rate: f64,
    hilbert: [HilbertPair; 2],
    phase: [f64; 2],
    increment: [f64; 2],
    last: [f64; 2],
    feedback: f64,
}

impl StereoKernel for FrequencyShifter {
    const ID: EngineId = EngineId::FrequencyShifter;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            sample_rate,
            hilbert: [HilbertPair::new(), HilbertPair::new()],
            phase: [0.0; 2],
            increment: [0.0; 2],
            last: [0.0; 2],
            feedback: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let shift = params.get(0) + params.get(4);
        let spread = params.get(3) * 0.5;
        self.increment = [(shift - spread) / self.sample_rate, (shift + spread) / self.sample_rate];
        self.feedback = params.get(1);
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let mut out = [0.0; 2];
        for (c, x) in [left, right].into_iter().enumerate() {
            self.phase[c] = (self.phase[c] + self.increment[c]).rem_euclid(1.0);
            let (i, q) = self.hilbert[c].process(x + self.feedback * self.last[c]);
            let (s, co) = (TAU * self.phase[c]).sin_cos();
            let y = i * co + q * s;
            self.last[c] = y;
            out[c] = y;
        }
        (out[0], out[1])
    }

    fn reset(&mut self) {
        for h in &mut self.hilbert {
            h.reset();
        }
        self.phase = [0.0; 2];
        self.last = [0.0; 2];
    }

    fn tail_samples(&self, params: &ParamBank) -> usize {
        // allpass ring-out dominates the one-sample loop
        let ring = seconds_to_samples(0.1, self.sample_rate) as f64;
        feedback_tail(ring, params.get(1), 120.0)
    }
}

// ============ Harmonic Tremolo ============

pub const HARMONIC_TREMOLO_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Rate", 0.2, ParamDisplay::Hertz { min: 0.5, max: 15.0 }),
    DEPTH,
    MIX,
    ParamSpec::new("Crossover", 0.5, ParamDisplay::Hertz { min: 200.0, max: 2000.0 }),
    ParamSpec::new("Stereo", 0.0, ParamDisplay::Percent),
];

/// Low and high bands modulated in opposite phase
pub struct HarmonicTremolo {
    sample_rate: f64,
    split: [Crossover; 2],
    lfo: StereoLfo,
}

impl StereoKernel for HarmonicTremolo {
    const ID: EngineId = EngineId::HarmonicTremolo;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let split = Crossover::new(630.0, sample_rate);
        Self {
            sample_rate,
            split: [split.clone(), split],
            lfo: StereoLfo::new(sample_rate),
        }
    }

    fn control(&mut self, params: &ParamBank) {
        for s in &mut self.split {
            s.set_frequency(params.get(3));
        }
        self.lfo.set(params.get(0), 0.5 * params.get(4) * 0.01);
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let depth = params.get(1) * 0.01;
        let (ml, mr) = self.lfo.next();
        let mut out = [0.0; 2];
        for (c, (x, m)) in [(left, ml), (right, mr)].into_iter().enumerate() {
            let (low, high) = self.split[c].split(x);
            let gl = 1.0 - depth * (0.5 + 0.5 * m);
            let gh = 1.0 - depth * (0.5 - 0.5 * m);
            out[c] = low * gl + high * gh;
        }
        (out[0], out[1])
    }

    fn reset(&mut self) {
        for s in &mut self.split {
            s.reset();
        }
        self.lfo.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        seconds_to_samples(0.05, self.sample_rate)
    }
}

// ============ Classic Tremolo ============

pub const CLASSIC_TREMOLO_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Rate", 0.2, ParamDisplay::Hertz { min: 0.5, max: 20.0 }),
    DEPTH,
    MIX,
    ParamSpec::new("Shape", 0.0, ParamDisplay::Choice(3)).step(),
    ParamSpec::new("Stereo", 0.0, ParamDisplay::Percent),
];

/// Amplitude modulation, sine/triangle/square
pub struct ClassicTremolo {
    lfo: StereoLfo,
}

impl StereoKernel for ClassicTremolo {
    const ID: EngineId = EngineId::ClassicTremolo;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            lfo: StereoLfo::new(sample_rate),
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let shape = match params.choice(3) {
            1 => LfoShape::Triangle,
            2 => LfoShape::Square,
            _ => LfoShape::Sine,
        };
        self.lfo.set_shape(shape);
        self.lfo.set(params.get(0), 0.5 * params.get(4) * 0.01);
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let depth = params.get(1) * 0.01;
        let (ml, mr) = self.lfo.next();
        (
            left * (1.0 - depth * (0.5 + 0.5 * ml)),
            right * (1.0 - depth * (0.5 + 0.5 * mr)),
        )
    }

    fn reset(&mut self) {
        self.lfo.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        0
    }
}

// ============ Rotary Speaker ============

pub const ROTARY_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Speed", 0.2, ParamDisplay::Hertz { min: 0.5, max: 8.0 }),
    DEPTH,
    MIX,
    ParamSpec::new("Crossover", 0.5, ParamDisplay::Hertz { min: 400.0, max: 3000.0 }),
    ParamSpec::new("Drive", 0.0, ParamDisplay::Percent),
    ParamSpec::new("Mic Spacing", 0.5, ParamDisplay::Percent),
];

/// Horn rotor inertia (seconds)
const HORN_INERTIA: f64 = 0.6;
/// Drum rotor inertia (seconds)
const DRUM_INERTIA: f64 = 2.5;
/// Drum turns slower than the horn
const DRUM_RATIO: f64 = 0.85;
/// Horn radius as a delay swing (ms)
const HORN_SWING_MS: f64 = 1.0;

/// Rotating horn and drum with rotor inertia.
///
/// The horn band gets Doppler (modulated delay) and amplitude modulation,
/// the drum band amplitude modulation only. Two virtual mics sit
/// `Mic Spacing` apart around the cabinet.
pub struct RotarySpeaker {
    sample_rate: f64,
    split: Crossover,
    horn: [DelayLine; 2],
    horn_angle: f64,
    drum_angle: f64,
    horn_speed: f64,
    drum_speed: f64,
    target: f64,
    horn_coeff: f64,
    drum_coeff: f64,
    drive: f64,
    mic: f64,
    spun_up: bool,
}

impl StereoKernel for RotarySpeaker {
    const ID: EngineId = EngineId::RotarySpeaker;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let line = DelayLine::with_seconds(4.0 * HORN_SWING_MS * 0.001, sample_rate, Interpolation::Cubic);
        Self {
            sample_rate,
            split: Crossover::new(800.0, sample_rate),
            horn: [line.clone(), line],
            horn_angle: 0.0,
            drum_angle: 0.0,
            horn_speed: 0.0,
            drum_speed: 0.0,
            target: 0.0,
            horn_coeff: 1.0 - (-1.0 / (HORN_INERTIA * sample_rate)).exp(),
            drum_coeff: 1.0 - (-1.0 / (DRUM_INERTIA * sample_rate)).exp(),
            drive: 1.0,
            mic: FRAC_PI_2,
            spun_up: false,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.target = params.get(0);
        if !self.spun_up {
            self.horn_speed = self.target;
            self.drum_speed = self.target * DRUM_RATIO;
            self.spun_up = true;
        }
        self.split.set_frequency(params.get(3));
        self.drive = 1.0 + 4.0 * params.get(4) * 0.01;
        self.mic = PI * params.get(5) * 0.01;
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        self.horn_speed += (self.target - self.horn_speed) * self.horn_coeff;
        self.drum_speed += (self.target * DRUM_RATIO - self.drum_speed) * self.drum_coeff;
        self.horn_angle = (self.horn_angle + TAU * self.horn_speed / self.sample_rate).rem_euclid(TAU);
        self.drum_angle = (self.drum_angle + TAU * self.drum_speed / self.sample_rate).rem_euclid(TAU);

        let depth = params.get(1) * 0.01;
        let mono = saturate(0.5 * (left + right), self.drive);
        let (low, high) = self.split.split(mono);
        let swing = HORN_SWING_MS * 0.001 * self.sample_rate;

        let mut out = [0.0; 2];
        for (c, mic) in [-0.5 * self.mic, 0.5 * self.mic].into_iter().enumerate() {
            let horn_phase = self.horn_angle + mic;
            let drum_phase = self.drum_angle + mic;
            let delay = swing * (1.5 + depth * horn_phase.sin());
            self.horn[c].write(high as Sample);
            let horn = self.horn[c].read(delay as f32) as f64 * (1.0 + 0.4 * depth * horn_phase.cos());
            let drum = low * (1.0 + 0.2 * depth * drum_phase.cos());
            out[c] = horn + drum;
        }
        let makeup = db_to_gain_f64(-1.5);
        (out[0] * makeup, out[1] * makeup)
    }

    fn reset(&mut self) {
        self.split.reset();
        for line in &mut self.horn {
            line.reset();
        }
        self.horn_angle = 0.0;
        self.drum_angle = 0.0;
        self.spun_up = false;
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        seconds_to_samples(0.05, self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, KernelEngine};
    use fx_core::ParameterMap;

    fn sine(freq: f64, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (TAU * freq * i as f64 / 48000.0).sin() as f32 * 0.5)
            .collect()
    }

    fn render(engine: &mut dyn Engine, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(input.len());
        for chunk in input.chunks(256) {
            let mut l = chunk.to_vec();
            let mut r = chunk.to_vec();
            let mut block: [&mut [f32]; 2] = [&mut l, &mut r];
            engine.process(&mut block);
            out.extend_from_slice(&l);
        }
        out
    }

    #[test]
    fn test_ring_mod_full_depth_moves_energy() {
        let mut ring = KernelEngine::<RingModulator>::new(48000.0, 256);
        // 100 Hz carrier at full depth, fully wet
        let v = ((100.0f64 / 20.0).ln() / (5000.0f64 / 20.0).ln()) as f32;
        ring.apply_parameters(&ParameterMap::new().with(0, v).with(1, 1.0).with(2, 1.0));
        let out = render(&mut ring, &sine(1000.0, 4800));
        // product of sines: peak stays within the input peak
        let peak = out.iter().fold(0.0f32, |p, x| p.max(x.abs()));
        assert!(peak <= 0.5 + 1e-3, "{peak}");
        // and the 1 kHz component is gone
        let (mut re, mut im) = (0.0, 0.0);
        for (i, x) in out.iter().enumerate() {
            let w = TAU * 1000.0 * i as f64 / 48000.0;
            re += *x as f64 * w.cos();
            im += *x as f64 * w.sin();
        }
        let mag = (re * re + im * im).sqrt() * 2.0 / out.len() as f64;
        assert!(mag < 0.02, "{mag}");
    }

    fn magnitude_at(signal: &[f32], freq: f64) -> f64 {
        let (mut re, mut im) = (0.0, 0.0);
        for (i, x) in signal.iter().enumerate() {
            let w = TAU * freq * i as f64 / 48000.0;
            re += *x as f64 * w.cos();
            im += *x as f64 * w.sin();
        }
        (re * re + im * im).sqrt() * 2.0 / signal.len() as f64
    }

    #[test]
    fn test_frequency_shifter_rejects_image() {
        for (shift, wanted, image) in [(0.6, 1100.0, 900.0), (0.4, 900.0, 1100.0)] {
            let mut shifter = KernelEngine::<FrequencyShifter>::new(48000.0, 256);
            // ±100 Hz, no feedback, fully wet
            shifter.apply_parameters(&ParameterMap::new().with(0, shift).with(1, 0.0).with(2, 1.0));
            let out = render(&mut shifter, &sine(1000.0, 24000));
            let tail = &out[4800..];
            let wanted = magnitude_at(tail, wanted);
            let image = magnitude_at(tail, image);
            assert!(wanted > 0.4, "wanted sideband {wanted}");
            assert!(image < wanted * 0.03, "image {image} vs {wanted}");
        }
    }

    #[test]
    fn test_tremolo_depth_sets_minimum_gain() {
        let mut trem = KernelEngine::<ClassicTremolo>::new(48000.0, 256);
        trem.apply_parameters(&ParameterMap::new().with(1, 1.0).with(2, 1.0).with(0, 0.5));
        let input = vec![0.5f32; 48000];
        let out = render(&mut trem, &input);
        let min = out.iter().fold(1.0f32, |m, x| m.min(*x));
        let max = out.iter().fold(0.0f32, |m, x| m.max(*x));
        assert!(min < 0.01, "{min}");
        assert!((max - 0.5).abs() < 0.01, "{max}");
    }

    #[test]
    fn test_phaser_is_transparent_at_zero_depth_for_dc() {
        let mut phaser = KernelEngine::<AnalogPhaser>::new(48000.0, 256);
        phaser.apply_parameters(&ParameterMap::new().with(1, 0.0).with(2, 1.0).with(3, 0.0));
        let out = render(&mut phaser, &vec![0.25f32; 48000]);
        // allpasses pass DC with unit gain
        assert!((out[47999] - 0.25).abs() < 1e-3, "{}", out[47999]);
    }

    #[test]
    fn test_chorus_silence_stays_silent() {
        let mut chorus = KernelEngine::<DigitalChorus>::new(48000.0, 256);
        let out = render(&mut chorus, &vec![0.0f32; 4096]);
        assert!(out.iter().all(|x| *x == 0.0));
    }
}
