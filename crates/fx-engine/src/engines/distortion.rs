//! Distortion engines
//!
//! Index layout: 0 drive, 1 tone, 2 output, 6 mix. Indices 3..5 and 7+ are
//! engine specific. Every waveshaper maps zero to zero, so silence passes
//! through silent; a DC blocker follows any biased stage.

use fx_core::{DcBlocker, ParamDisplay, db_to_gain_f64};
use fx_dsp::biquad::FilterType;
use fx_dsp::dynamics::EnvelopeFollower;
use fx_dsp::filters::OnePole;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{Crossover, StereoBiquad, saturate, saturate_biased};
use crate::engine::StereoKernel;
use crate::params::{ParamBank, ParamSpec};
use crate::registry::EngineId;

/// DC blocker corner (Hz)
const DC_CUTOFF: f64 = 10.0;

/// Settling time of the DC blockers and tone filters (seconds)
const DISTORTION_TAIL_SECONDS: f64 = 0.5;

const OUTPUT: ParamSpec = ParamSpec::new("Output", 0.5, ParamDisplay::GainDb { min: -12.0, max: 12.0 }).audio();

/// Output tone as a post lowpass corner
const TONE: ParamSpec = ParamSpec::new("Tone", 0.5, ParamDisplay::Hertz { min: 1000.0, max: 20000.0 });

/// Per-channel DC blockers
#[derive(Debug, Clone)]
struct DcPair([DcBlocker; 2]);

impl DcPair {
    fn new(sample_rate: f64) -> Self {
        let dc = DcBlocker::new(DC_CUTOFF, sample_rate);
        Self([dc.clone(), dc])
    }

    #[inline]
    fn process(&mut self, left: f64, right: f64) -> (f64, f64) {
        (self.0[0].process(left), self.0[1].process(right))
    }

    fn reset(&mut self) {
        self.0[0].reset();
        self.0[1].reset();
    }
}

/// Per-channel one-pole lowpass
#[derive(Debug, Clone)]
struct TonePair([OnePole; 2]);

impl TonePair {
    fn new() -> Self {
        Self([OnePole::open(), OnePole::open()])
    }

    fn set(&mut self, cutoff: f64, sample_rate: f64) {
        let cutoff = cutoff.min(sample_rate * 0.45);
        for f in &mut self.0 {
            f.set_cutoff(cutoff, sample_rate);
        }
    }

    #[inline]
    fn process(&mut self, left: f64, right: f64) -> (f64, f64) {
        (self.0[0].lowpass(left), self.0[1].lowpass(right))
    }

    fn reset(&mut self) {
        self.0[0].reset();
        self.0[1].reset();
    }
}

// ============ Tube Preamp ============

pub const TUBE_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Drive", 0.3, ParamDisplay::GainDb { min: 0.0, max: 36.0 }),
    TONE,
    OUTPUT,
    ParamSpec::new("Bias", 0.5, ParamDisplay::Span { min: 0.0, max: 0.5 }),
    ParamSpec::new("Bass", 0.5, ParamDisplay::GainDb { min: -12.0, max: 12.0 }),
    ParamSpec::new("Treble", 0.5, ParamDisplay::GainDb { min: -12.0, max: 12.0 }),
    ParamSpec::mix(1.0),
];

/// Triode-style stage: shelving EQ into a biased tanh, then tone and DC removal
pub struct TubePreamp {
    sample_rate: f64,
    bass: StereoBiquad,
    treble: StereoBiquad,
    tone: TonePair,
    dc: DcPair,
    drive: f64,
    bias: f64,
}

impl StereoKernel for TubePreamp {
    const ID: EngineId = EngineId::TubePreamp;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            sample_rate,
            bass: StereoBiquad::new(FilterType::LowShelf, 120.0, 0.707, 0.0, sample_rate),
            treble: StereoBiquad::new(FilterType::HighShelf, 3200.0, 0.707, 0.0, sample_rate),
            tone: TonePair::new(),
            dc: DcPair::new(sample_rate),
            drive: 1.0,
            bias: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.drive = db_to_gain_f64(params.get(0));
        self.tone.set(params.get(1), self.sample_rate);
        self.bias = params.get(3);
        self.bass.set(120.0, 0.707, params.get(4));
        self.treble.set(3200.0_f64.min(self.sample_rate * 0.45), 0.707, params.get(5));
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (l, r) = self.bass.process(left, right);
        let (l, r) = self.treble.process(l, r);
        let l = saturate_biased(l, self.drive, self.bias);
        let r = saturate_biased(r, self.drive, self.bias);
        let (l, r) = self.tone.process(l, r);
        let (l, r) = self.dc.process(l, r);
        let out = db_to_gain_f64(params.get(2));
        (l * out, r * out)
    }

    fn reset(&mut self) {
        self.bass.reset();
        self.treble.reset();
        self.tone.reset();
        self.dc.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        (DISTORTION_TAIL_SECONDS * self.sample_rate) as usize
    }
}

// ============ Wave Folder ============

pub const WAVE_FOLDER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Drive", 0.3, ParamDisplay::GainDb { min: 0.0, max: 24.0 }),
    TONE,
    OUTPUT,
    ParamSpec::new("Symmetry", 0.5, ParamDisplay::Span { min: -0.5, max: 0.5 }),
    ParamSpec::new("Folds", 0.5, ParamDisplay::Span { min: 1.0, max: 6.0 }),
    ParamSpec::new("Shape", 0.5, ParamDisplay::Percent),
    ParamSpec::mix(1.0),
];

/// Triangle fold of `x` into `[-1, 1]`
#[inline]
fn triangle_fold(x: f64) -> f64 {
    let t = (x + 1.0).rem_euclid(4.0);
    if t < 2.0 { t - 1.0 } else { 3.0 - t }
}

/// Sine and triangle folder blended by `Shape`
pub struct WaveFolder {
    sample_rate: f64,
    tone: TonePair,
    dc: DcPair,
    gain: f64,
    offset: f64,
    shape: f64,
}

impl WaveFolder {
    #[inline]
    fn fold(&self, x: f64) -> f64 {
        let driven = x * self.gain;
        let zero = self.offset;
        let sine = (std::f64::consts::FRAC_PI_2 * (driven + zero)).sin()
            - (std::f64::consts::FRAC_PI_2 * zero).sin();
        let tri = triangle_fold(driven + zero) - triangle_fold(zero);
        sine + (tri - sine) * self.shape
    }
}

impl StereoKernel for WaveFolder {
    const ID: EngineId = EngineId::WaveFolder;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            sample_rate,
            tone: TonePair::new(),
            dc: DcPair::new(sample_rate),
            gain: 1.0,
            offset: 0.0,
            shape: 0.5,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        // folds scale how far past the rails the drive pushes
        self.gain = db_to_gain_f64(params.get(0)) * params.get(4) * 0.5;
        self.tone.set(params.get(1), self.sample_rate);
        self.offset = params.get(3);
        self.shape = params.get(5) * 0.01;
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (l, r) = self.tone.process(self.fold(left), self.fold(right));
        let (l, r) = self.dc.process(l, r);
        let out = db_to_gain_f64(params.get(2));
        (l * out, r * out)
    }

    fn reset(&mut self) {
        self.tone.reset();
        self.dc.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        (DISTORTION_TAIL_SECONDS * self.sample_rate) as usize
    }
}

// ============ Harmonic Exciter ============

pub const EXCITER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Drive", 0.3, ParamDisplay::Percent),
    ParamSpec::new("Tone", 0.5, ParamDisplay::Hertz { min: 1000.0, max: 10000.0 }),
    OUTPUT,
    ParamSpec::new("Character", 0.5, ParamDisplay::Percent),
    ParamSpec::new("Air", 0.5, ParamDisplay::GainDb { min: 0.0, max: 12.0 }),
    ParamSpec::new("Focus", 0.5, ParamDisplay::Scale { min: 0.5, max: 2.0 }),
    ParamSpec::mix(1.0),
];

/// Adds harmonics generated from the band above `Tone`.
///
/// Only the nonlinear residue of the saturator is added back, so the
/// original signal passes unchanged apart from the air shelf.
pub struct HarmonicExciter {
    sample_rate: f64,
    highpass: StereoBiquad,
    air: StereoBiquad,
    dc: DcPair,
    amount: f64,
    even: f64,
}

impl HarmonicExciter {
    #[inline]
    fn residue(&self, band: f64) -> f64 {
        const K: f64 = 4.0;
        let odd = saturate(band, K);
        let even = saturate_biased(band, K, 0.3);
        let shaped = odd + (even - odd) * self.even;
        (shaped - band) * self.amount
    }
}

impl StereoKernel for HarmonicExciter {
    const ID: EngineId = EngineId::HarmonicExciter;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            sample_rate,
            highpass: StereoBiquad::new(FilterType::Highpass, 3000.0, 0.707, 0.0, sample_rate),
            air: StereoBiquad::new(FilterType::HighShelf, 10000.0, 0.707, 0.0, sample_rate),
            dc: DcPair::new(sample_rate),
            amount: 0.0,
            even: 0.5,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let top = self.sample_rate * 0.45;
        self.highpass.set(params.get(1).min(top), 0.707 * params.get(5), 0.0);
        self.air.set(10000.0_f64.min(top), 0.707, params.get(4) * 0.5);
        self.amount = params.get(0) * 0.04;
        self.even = params.get(3) * 0.01;
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (hl, hr) = self.highpass.process(left, right);
        let (el, er) = self.dc.process(self.residue(hl), self.residue(hr));
        let (l, r) = self.air.process(left + el, right + er);
        let out = db_to_gain_f64(params.get(2));
        (l * out, r * out)
    }

    fn reset(&mut self) {
        self.highpass.reset();
        self.air.reset();
        self.dc.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        (DISTORTION_TAIL_SECONDS * self.sample_rate) as usize
    }
}

// ============ Bit Crusher ============

pub const BIT_CRUSHER_PARAMS: &[ParamSpec] = &[
    // 16 bits at 0, one bit from 0.9 up
    ParamSpec::new("Bits", 0.3, ParamDisplay::Span { min: 16.0, max: -2.0 / 3.0 }),
    ParamSpec::new("Downsample", 0.0, ParamDisplay::Span { min: 1.0, max: 32.0 }),
    OUTPUT,
    ParamSpec::new("Jitter", 0.0, ParamDisplay::Percent),
    ParamSpec::new("Dither", 0.0, ParamDisplay::Percent),
    ParamSpec::new("Tone", 1.0, ParamDisplay::Hertz { min: 500.0, max: 20000.0 }),
    ParamSpec::mix(1.0),
];

/// Fixed seed so renders are repeatable
const CRUSHER_SEED: u64 = 0x5EED_B175;

/// Sample-rate and word-length reduction.
///
/// Tone filtering happens before quantization so the crushed output stays
/// on the quantizer grid; output gain is applied last.
pub struct BitCrusher {
    sample_rate: f64,
    tone: TonePair,
    rng: ChaCha8Rng,
    step: f64,
    hold: f64,
    jitter: f64,
    dither: f64,
    counter: f64,
    period: f64,
    held: (f64, f64),
}

impl BitCrusher {
    /// Quantizer step for a bit depth (clamped to 1..16)
    pub fn step_for_bits(bits: f64) -> f64 {
        let bits = bits.clamp(1.0, 16.0).round();
        2.0 / bits.exp2()
    }

    #[inline]
    fn quantize(&mut self, x: f64) -> f64 {
        let noise = if self.dither > 0.0 && x.abs() > 1e-6 {
            (self.rng.random::<f64>() - self.rng.random::<f64>()) * self.dither * self.step
        } else {
            0.0
        };
        ((x + noise) / self.step).round() * self.step
    }
}

impl StereoKernel for BitCrusher {
    const ID: EngineId = EngineId::BitCrusher;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            sample_rate,
            tone: TonePair::new(),
            rng: ChaCha8Rng::seed_from_u64(CRUSHER_SEED),
            step: Self::step_for_bits(11.0),
            hold: 1.0,
            jitter: 0.0,
            dither: 0.0,
            counter: 0.0,
            period: 1.0,
            held: (0.0, 0.0),
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.step = Self::step_for_bits(params.get(0));
        self.hold = params.get(1).max(1.0);
        self.jitter = params.get(3) * 0.01;
        self.dither = params.get(4) * 0.01;
        self.tone.set(params.get(5), self.sample_rate);
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (l, r) = self.tone.process(left, right);
        self.counter += 1.0;
        if self.counter >= self.period {
            self.counter -= self.period;
            self.held = (self.quantize(l), self.quantize(r));
            self.period = if self.jitter > 0.0 {
                (self.hold * (1.0 + self.jitter * (self.rng.random::<f64>() - 0.5))).max(1.0)
            } else {
                self.hold
            };
        }
        let out = db_to_gain_f64(params.get(2));
        (self.held.0 * out, self.held.1 * out)
    }

    fn reset(&mut self) {
        self.tone.reset();
        self.counter = 0.0;
        self.period = 1.0;
        self.held = (0.0, 0.0);
        self.rng = ChaCha8Rng::seed_from_u64(CRUSHER_SEED);
    }

    fn tail_samples(&self, params: &ParamBank) -> usize {
        params.get(1).ceil() as usize + (0.05 * self.sample_rate) as usize
    }
}

// ============ Multiband Saturator ============

pub const MULTIBAND_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Drive", 0.3, ParamDisplay::GainDb { min: 0.0, max: 24.0 }),
    ParamSpec::new("Tone", 0.5, ParamDisplay::GainDb { min: -6.0, max: 6.0 }),
    OUTPUT,
    ParamSpec::new("Low Drive", 0.5, ParamDisplay::Percent),
    ParamSpec::new("Mid Drive", 0.5, ParamDisplay::Percent),
    ParamSpec::new("High Drive", 0.5, ParamDisplay::Percent),
    ParamSpec::mix(1.0),
    ParamSpec::new("Low Cross", 0.5, ParamDisplay::Hertz { min: 50.0, max: 1000.0 }),
    ParamSpec::new("High Cross", 0.5, ParamDisplay::Hertz { min: 1000.0, max: 10000.0 }),
];

/// Three-band saturator on LR4 crossovers with a tilt on the sum
pub struct MultibandSaturator {
    sample_rate: f64,
    low_split: [Crossover; 2],
    high_split: [Crossover; 2],
    tilt: StereoBiquad,
    drives: [f64; 3],
}

impl StereoKernel for MultibandSaturator {
    const ID: EngineId = EngineId::MultibandSaturator;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let low = Crossover::new(224.0, sample_rate);
        let high = Crossover::new(3162.0, sample_rate);
        Self {
            sample_rate,
            low_split: [low.clone(), low],
            high_split: [high.clone(), high],
            tilt: StereoBiquad::new(FilterType::HighShelf, 1000.0, 0.5, 0.0, sample_rate),
            drives: [1.0; 3],
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let global = db_to_gain_f64(params.get(0));
        for (band, drive) in self.drives.iter_mut().enumerate() {
            *drive = global * (0.25 + 1.5 * params.get(3 + band) * 0.01);
        }
        let low = params.get(7);
        let high = params.get(8).min(self.sample_rate * 0.4).max(low * 2.0);
        for c in 0..2 {
            self.low_split[c].set_frequency(low);
            self.high_split[c].set_frequency(high);
        }
        self.tilt.set(1000.0, 0.5, params.get(1));
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let mut out = [0.0; 2];
        for (c, x) in [left, right].into_iter().enumerate() {
            let (low, rest) = self.low_split[c].split(x);
            let (mid, high) = self.high_split[c].split(rest);
            out[c] = saturate(low, self.drives[0])
                + saturate(mid, self.drives[1])
                + saturate(high, self.drives[2]);
        }
        let (l, r) = self.tilt.process(out[0], out[1]);
        let gain = db_to_gain_f64(params.get(2));
        (l * gain, r * gain)
    }

    fn reset(&mut self) {
        for c in 0..2 {
            self.low_split[c].reset();
            self.high_split[c].reset();
        }
        self.tilt.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        (0.1 * self.sample_rate) as usize
    }
}

// ============ Muff Fuzz ============

pub const MUFF_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Sustain", 0.3, ParamDisplay::GainDb { min: 0.0, max: 48.0 }),
    ParamSpec::new("Tone", 0.5, ParamDisplay::Percent),
    OUTPUT,
    ParamSpec::new("Mids", 0.5, ParamDisplay::Percent),
    ParamSpec::new("Gate", 0.0, ParamDisplay::Percent),
    ParamSpec::new("Asymmetry", 0.5, ParamDisplay::Span { min: 0.0, max: 0.4 }),
    ParamSpec::mix(1.0),
];

/// Two cascaded clipping stages into a passive LP/HP tone blend.
///
/// `Mids` at zero is the full mid scoop; at one the tone stack is bypassed.
pub struct MuffFuzz {
    sample_rate: f64,
    pre: StereoBiquad,
    interstage: StereoBiquad,
    tone_low: TonePair,
    tone_high: TonePair,
    dc: DcPair,
    gate: EnvelopeFollower,
    gain: f64,
    tone: f64,
    mids: f64,
    gate_level: f64,
    asymmetry: f64,
}

impl MuffFuzz {
    #[inline]
    fn clip(&self, x: f64) -> f64 {
        saturate_biased(x, 1.0, self.asymmetry).clamp(-1.5, 1.5)
    }
}

impl StereoKernel for MuffFuzz {
    const ID: EngineId = EngineId::MuffFuzz;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let mut tone_high = TonePair::new();
        tone_high.set(1200.0, sample_rate);
        let mut tone_low = TonePair::new();
        tone_low.set(400.0, sample_rate);
        let mut gate = EnvelopeFollower::new(sample_rate);
        gate.set_times(1.0, 50.0);
        Self {
            sample_rate,
            pre: StereoBiquad::new(FilterType::Highpass, 60.0, 0.707, 0.0, sample_rate),
            interstage: StereoBiquad::new(FilterType::Lowpass, 5000.0, 0.707, 0.0, sample_rate),
            tone_low,
            tone_high,
            dc: DcPair::new(sample_rate),
            gate,
            gain: 1.0,
            tone: 0.5,
            mids: 0.5,
            gate_level: 0.0,
            asymmetry: 0.2,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.gain = db_to_gain_f64(params.get(0));
        self.tone = params.get(1) * 0.01;
        self.mids = params.get(3) * 0.01;
        let gate = params.get(4) * 0.01;
        self.gate_level = if gate > 0.0 { db_to_gain_f64(-90.0 + 50.0 * gate) } else { 0.0 };
        self.asymmetry = params.get(5);
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let env = self.gate.process_level(left.abs().max(right.abs()));
        let gate = if self.gate_level > 0.0 { (env / self.gate_level).min(1.0).powi(2) } else { 1.0 };

        let (l, r) = self.pre.process(left, right);
        let (l, r) = (self.clip(l * self.gain), self.clip(r * self.gain));
        let (l, r) = self.interstage.process(l, r);
        let (l, r) = (self.clip(l * 4.0), self.clip(r * 4.0));
        let (l, r) = self.dc.process(l, r);

        let (ll, lr) = self.tone_low.process(l, r);
        let (hl, hr) = self.tone_high.process(l, r);
        let (hl, hr) = (l - hl, r - hr);
        let stack_l = ll + (hl - ll) * self.tone;
        let stack_r = lr + (hr - lr) * self.tone;
        let l = stack_l + (l - stack_l) * self.mids;
        let r = stack_r + (r - stack_r) * self.mids;

        let out = db_to_gain_f64(params.get(2)) * gate * 0.5;
        (l * out, r * out)
    }

    fn reset(&mut self) {
        self.pre.reset();
        self.interstage.reset();
        self.tone_low.reset();
        self.tone_high.reset();
        self.dc.reset();
        self.gate.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        (DISTORTION_TAIL_SECONDS * self.sample_rate) as usize
    }
}

// ============ Rodent Distortion ============

pub const RODENT_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Distortion", 0.3, ParamDisplay::GainDb { min: 0.0, max: 60.0 }),
    ParamSpec::new("Filter", 0.5, ParamDisplay::Hertz { min: 500.0, max: 20000.0 }),
    OUTPUT,
    ParamSpec::new("Clip", 0.0, ParamDisplay::Choice(3)).step(),
    ParamSpec::new("Low Cut", 0.5, ParamDisplay::Hertz { min: 20.0, max: 500.0 }),
    ParamSpec::new("Slew", 0.5, ParamDisplay::Percent),
    ParamSpec::mix(1.0),
];

/// Clipping element after the op-amp gain stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClipDiode {
    Silicon,
    Led,
    Germanium,
}

impl ClipDiode {
    fn from_index(index: usize) -> Self {
        match index {
            1 => Self::Led,
            2 => Self::Germanium,
            _ => Self::Silicon,
        }
    }

    #[inline]
    fn clip(self, x: f64) -> f64 {
        match self {
            Self::Silicon => x / (1.0 + x.abs().powf(2.5)).powf(0.4),
            Self::Led => 1.6 * (x / 1.6).tanh(),
            Self::Germanium => saturate_biased(x, 1.2, 0.15),
        }
    }
}

/// Op-amp distortion: the gain stage's bandwidth shrinks as gain rises,
/// then hard diodes to ground and a variable lowpass filter.
pub struct RodentDistortion {
    sample_rate: f64,
    low_cut: StereoBiquad,
    opamp: TonePair,
    filter: TonePair,
    dc: DcPair,
    gain: f64,
    diode: ClipDiode,
}

impl StereoKernel for RodentDistortion {
    const ID: EngineId = EngineId::RodentDistortion;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            sample_rate,
            low_cut: StereoBiquad::new(FilterType::Highpass, 100.0, 0.707, 0.0, sample_rate),
            opamp: TonePair::new(),
            filter: TonePair::new(),
            dc: DcPair::new(sample_rate),
            gain: 1.0,
            diode: ClipDiode::Silicon,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.gain = db_to_gain_f64(params.get(0));
        self.filter.set(params.get(1), self.sample_rate);
        self.diode = ClipDiode::from_index(params.choice(3));
        self.low_cut.set(params.get(4), 0.707, 0.0);
        // gain-bandwidth product, scaled by the slew control
        let gbw = 1.0e6 * (0.2 + 1.6 * params.get(5) * 0.01);
        self.opamp.set((gbw / self.gain).clamp(1000.0, 20000.0), self.sample_rate);
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (l, r) = self.low_cut.process(left, right);
        let (l, r) = self.opamp.process(l * self.gain, r * self.gain);
        let (l, r) = (self.diode.clip(l), self.diode.clip(r));
        let (l, r) = self.filter.process(l, r);
        let (l, r) = self.dc.process(l, r);
        let out = db_to_gain_f64(params.get(2)) * 0.6;
        (l * out, r * out)
    }

    fn reset(&mut self) {
        self.low_cut.reset();
        self.opamp.reset();
        self.filter.reset();
        self.dc.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        (DISTORTION_TAIL_SECONDS * self.sample_rate) as usize
    }
}

// ============ K-Style Overdrive ============

pub const KSTYLE_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Gain", 0.3, ParamDisplay::GainDb { min: 0.0, max: 40.0 }),
    ParamSpec::new("Treble", 0.5, ParamDisplay::GainDb { min: -12.0, max: 12.0 }),
    OUTPUT,
    ParamSpec::new("Clean Blend", 0.5, ParamDisplay::Percent),
    ParamSpec::new("Headroom", 0.5, ParamDisplay::Span { min: 0.3, max: 1.5 }),
    ParamSpec::new("Bass", 0.5, ParamDisplay::GainDb { min: -6.0, max: 6.0 }),
    ParamSpec::mix(1.0),
];

/// Transparent overdrive.
///
/// A mid-humped, clipped path is summed with a clean path whose level falls
/// as the gain rises; the clean share is set by `Clean Blend`.
pub struct KStyleOverdrive {
    sample_rate: f64,
    hump: StereoBiquad,
    treble: StereoBiquad,
    bass: StereoBiquad,
    dc: DcPair,
    gain: f64,
    clean: f64,
    headroom: f64,
}

impl StereoKernel for KStyleOverdrive {
    const ID: EngineId = EngineId::KStyleOverdrive;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            sample_rate,
            hump: StereoBiquad::new(FilterType::Peaking, 1000.0, 0.7, 6.0, sample_rate),
            treble: StereoBiquad::new(FilterType::HighShelf, 2500.0, 0.707, 0.0, sample_rate),
            bass: StereoBiquad::new(FilterType::LowShelf, 150.0, 0.707, 0.0, sample_rate),
            dc: DcPair::new(sample_rate),
            gain: 1.0,
            clean: 0.5,
            headroom: 0.9,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.gain = db_to_gain_f64(params.get(0));
        self.treble.set(2500.0_f64.min(self.sample_rate * 0.45), 0.707, params.get(1));
        self.bass.set(150.0, 0.707, params.get(5));
        self.clean = params.get(3) * 0.01 / self.gain.sqrt();
        self.headroom = params.get(4);
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (hl, hr) = self.hump.process(left, right);
        let h = self.headroom;
        let dl = h * (hl * self.gain / h).tanh();
        let dr = h * (hr * self.gain / h).tanh();
        let (l, r) = self.dc.process(dl + left * self.clean, dr + right * self.clean);
        let (l, r) = self.bass.process(l, r);
        let (l, r) = self.treble.process(l, r);
        let out = db_to_gain_f64(params.get(2)) * 0.7;
        (l * out, r * out)
    }

    fn reset(&mut self) {
        self.hump.reset();
        self.treble.reset();
        self.bass.reset();
        self.dc.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        (DISTORTION_TAIL_SECONDS * self.sample_rate) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, KernelEngine};
    use fx_core::ParameterMap;
    use std::collections::BTreeSet;
    use std::f64::consts::PI;

    #[test]
    fn test_one_bit_has_three_levels() {
        let mut crusher = KernelEngine::<BitCrusher>::new(48000.0, 480);
        crusher.apply_parameters(&ParameterMap::new().with(0, 0.9).with(1, 0.0).with(6, 1.0));
        let mut values = BTreeSet::new();
        for b in 0..20 {
            let mut l: Vec<f32> = (0..480)
                .map(|i| ((2.0 * PI * 440.0 * (b * 480 + i) as f64 / 48000.0).sin() * 0.5) as f32)
                .collect();
            let mut r = l.clone();
            let mut block: [&mut [f32]; 2] = [&mut l, &mut r];
            crusher.process(&mut block);
            values.extend(block[0].iter().map(|x| (x * 1000.0).round() as i32));
        }
        assert!(values.len() <= 3, "{} levels", values.len());
    }

    #[test]
    fn test_step_for_bits() {
        assert_eq!(BitCrusher::step_for_bits(1.0), 1.0);
        assert_eq!(BitCrusher::step_for_bits(0.2), 1.0);
        assert_eq!(BitCrusher::step_for_bits(16.0), 2.0 / 65536.0);
    }

    #[test]
    fn test_triangle_fold() {
        assert_eq!(triangle_fold(0.0), 0.0);
        assert_eq!(triangle_fold(1.0), 1.0);
        assert!((triangle_fold(1.5) - 0.5).abs() < 1e-12);
        assert!((triangle_fold(-1.5) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_waveshapers_keep_silence() {
        for diode in [ClipDiode::Silicon, ClipDiode::Led, ClipDiode::Germanium] {
            assert_eq!(diode.clip(0.0), 0.0);
        }
        assert_eq!(saturate_biased(0.0, 3.0, 0.25), 0.0);
    }

    #[test]
    fn test_tube_small_signal_is_near_linear() {
        let mut tube = KernelEngine::<TubePreamp>::new(48000.0, 480);
        // no drive, bias, tone or eq
        tube.apply_parameters(&ParameterMap::new().with(0, 0.0).with(3, 0.0).with(1, 1.0));
        let mut l: Vec<f32> = (0..480)
            .map(|i| ((2.0 * PI * 1000.0 * i as f64 / 48000.0).sin() * 0.01) as f32)
            .collect();
        let mut r = l.clone();
        let mut block: [&mut [f32]; 2] = [&mut l, &mut r];
        tube.process(&mut block);
        let peak = block[0][240..].iter().fold(0.0f32, |p, x| p.max(x.abs()));
        assert!(peak > 0.008 && peak < 0.0105, "peak {peak}");
    }
}
