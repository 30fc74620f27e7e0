//! Filter engines
//!
//! Index layout: 0 cutoff, 1 resonance, 2 drive, 3 mix. Mix defaults to 0 so
//! a freshly inserted filter leaves the dry path on.

use fx_core::{ParamDisplay, Sample, db_to_gain_f64};
use fx_dsp::biquad::FilterType;
use fx_dsp::dynamics::EnvelopeFollower;
use fx_dsp::filters::{LadderFilter, OnePole, StateVariableFilter, SvfMode};
use fx_dsp::ring_buffer::{DelayLine, Interpolation};
use fx_dsp::Processor;

use super::{StereoBiquad, saturate};
use crate::engine::{StereoKernel, feedback_tail};
use crate::params::{ParamBank, ParamSpec};
use crate::registry::EngineId;

/// Ringing allowance for resonant filters (seconds)
const FILTER_TAIL_SECONDS: f64 = 0.5;

// ============ Ladder ============

pub const LADDER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Cutoff", 0.5, ParamDisplay::Frequency),
    ParamSpec::new("Resonance", 0.5, ParamDisplay::Percent),
    ParamSpec::new("Drive", 0.5, ParamDisplay::Percent),
    ParamSpec::mix(0.0),
    ParamSpec::new("Output", 0.5, ParamDisplay::GainDb { min: -12.0, max: 12.0 }).audio(),
];

/// Four-pole ladder lowpass
pub struct Ladder {
    sample_rate: f64,
    filters: [LadderFilter; 2],
}

impl StereoKernel for Ladder {
    const ID: EngineId = EngineId::LadderFilter;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            sample_rate,
            filters: [LadderFilter::new(sample_rate), LadderFilter::new(sample_rate)],
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let cutoff = params.get(0);
        let resonance = params.get(1) * 0.01;
        let drive = 1.0 + 0.09 * params.get(2);
        for f in &mut self.filters {
            f.set_cutoff(cutoff);
            f.set_resonance(resonance);
            f.set_drive(drive);
            f.nudge();
        }
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let out = db_to_gain_f64(params.get(4));
        let [fl, fr] = &mut self.filters;
        (fl.process_f64(left) * out, fr.process_f64(right) * out)
    }

    fn reset(&mut self) {
        for f in &mut self.filters {
            f.reset();
        }
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        (FILTER_TAIL_SECONDS * self.sample_rate) as usize
    }
}

// ============ State Variable ============

pub const SVF_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Cutoff", 0.5, ParamDisplay::Frequency),
    ParamSpec::new("Resonance", 0.5, ParamDisplay::Scale { min: 0.5, max: 20.0 }),
    ParamSpec::new("Drive", 0.5, ParamDisplay::Percent),
    ParamSpec::mix(0.0),
    ParamSpec::new("Mode", 0.0, ParamDisplay::Choice(4)).step(),
];

fn svf_mode(index: usize) -> SvfMode {
    match index {
        1 => SvfMode::Bandpass,
        2 => SvfMode::Highpass,
        3 => SvfMode::Notch,
        _ => SvfMode::Lowpass,
    }
}

/// Multimode TPT state-variable filter with input saturation
pub struct StateVariable {
    sample_rate: f64,
    filters: [StateVariableFilter; 2],
    drive: f64,
}

impl StereoKernel for StateVariable {
    const ID: EngineId = EngineId::StateVariableFilter;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let f = StateVariableFilter::new(632.0, 0.707, sample_rate);
        Self {
            sample_rate,
            filters: [f.clone(), f],
            drive: 1.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let mode = svf_mode(params.choice(4));
        for f in &mut self.filters {
            f.set(params.get(0), params.get(1));
            f.set_mode(mode);
            f.nudge();
        }
        self.drive = 0.1 + 0.04 * params.get(2);
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let [fl, fr] = &mut self.filters;
        (
            fl.process_f64(saturate(left, self.drive)),
            fr.process_f64(saturate(right, self.drive)),
        )
    }

    fn reset(&mut self) {
        for f in &mut self.filters {
            f.reset();
        }
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        (FILTER_TAIL_SECONDS * self.sample_rate) as usize
    }
}

// ============ Vowel Tables ============

/// Formant frequencies (Hz) for A, E, I, O, U
const VOWELS: [[f64; 5]; 5] = [
    [800.0, 1150.0, 2900.0, 3900.0, 4950.0],
    [350.0, 2000.0, 2800.0, 3600.0, 4950.0],
    [270.0, 2140.0, 2950.0, 3900.0, 4950.0],
    [450.0, 800.0, 2830.0, 3800.0, 4950.0],
    [325.0, 700.0, 2700.0, 3800.0, 4950.0],
];

/// Relative formant amplitudes
const FORMANT_GAINS: [f64; 5] = [1.0, 0.5, 0.25, 0.18, 0.1];

/// Formant `n` for a continuous vowel position in `[0, 4]`
fn vowel_formant(position: f64, n: usize) -> f64 {
    let position = position.clamp(0.0, 4.0);
    let i = (position.floor() as usize).min(3);
    let frac = position - i as f64;
    VOWELS[i][n] + (VOWELS[i + 1][n] - VOWELS[i][n]) * frac
}

// ============ Formant Filter ============

pub const FORMANT_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Vowel", 0.5, ParamDisplay::Span { min: 0.0, max: 4.0 }),
    ParamSpec::new("Resonance", 0.5, ParamDisplay::Percent),
    ParamSpec::new("Drive", 0.5, ParamDisplay::Percent),
    ParamSpec::mix(0.0),
    ParamSpec::new("Shift", 0.5, ParamDisplay::Scale { min: 0.5, max: 2.0 }),
];

/// Three parallel SVF bandpasses morphing across the vowel table
pub struct Formant {
    sample_rate: f64,
    bands: [[StateVariableFilter; 3]; 2],
    drive: f64,
}

impl StereoKernel for Formant {
    const ID: EngineId = EngineId::FormantFilter;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let band = |n: usize| StateVariableFilter::new(VOWELS[2][n], 5.0, sample_rate);
        Self {
            sample_rate,
            bands: [
                [band(0), band(1), band(2)],
                [band(0), band(1), band(2)],
            ],
            drive: 1.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let vowel = params.get(0);
        let q = 2.0 + 0.18 * params.get(1);
        let shift = params.get(4);
        let top = self.sample_rate * 0.45;
        for channel in &mut self.bands {
            for (n, band) in channel.iter_mut().enumerate() {
                band.set((vowel_formant(vowel, n) * shift).min(top), q);
                band.nudge();
            }
        }
        self.drive = 0.1 + 0.04 * params.get(2);
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let mut out = [0.0; 2];
        for (c, x) in [left, right].into_iter().enumerate() {
            let x = saturate(x, self.drive);
            out[c] = self.bands[c]
                .iter_mut()
                .zip(FORMANT_GAINS)
                .map(|(band, gain)| band.process_band_normalized(x) * gain)
                .sum::<f64>();
        }
        (out[0], out[1])
    }

    fn reset(&mut self) {
        for band in self.bands.iter_mut().flatten() {
            band.reset();
        }
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        (FILTER_TAIL_SECONDS * self.sample_rate) as usize
    }
}

// ============ Envelope Filter ============

pub const ENVELOPE_FILTER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Cutoff", 0.5, ParamDisplay::Frequency),
    ParamSpec::new("Resonance", 0.5, ParamDisplay::Scale { min: 0.5, max: 15.0 }),
    ParamSpec::new("Sensitivity", 0.5, ParamDisplay::Percent),
    ParamSpec::mix(0.0),
    ParamSpec::new("Attack", 0.5, ParamDisplay::Millis { min: 1.0, max: 100.0 }),
    ParamSpec::new("Release", 0.5, ParamDisplay::Millis { min: 10.0, max: 1000.0 }),
    ParamSpec::new("Range", 0.5, ParamDisplay::Span { min: 0.0, max: 4.0 }),
    ParamSpec::new("Mode", 0.5, ParamDisplay::Choice(3)).step(),
];

/// Auto-wah: an envelope follower sweeps an SVF upward from the base cutoff
pub struct EnvelopeFilter {
    sample_rate: f64,
    follower: EnvelopeFollower,
    filters: [StateVariableFilter; 2],
    base: f64,
    q: f64,
    sensitivity: f64,
    octaves: f64,
}

impl StereoKernel for EnvelopeFilter {
    const ID: EngineId = EngineId::EnvelopeFilter;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let f = StateVariableFilter::new(632.0, 3.0, sample_rate);
        Self {
            sample_rate,
            follower: EnvelopeFollower::new(sample_rate),
            filters: [f.clone(), f],
            base: 632.0,
            q: 3.0,
            sensitivity: 1.0,
            octaves: 2.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.base = params.get(0);
        self.q = params.get(1);
        self.sensitivity = db_to_gain_f64(params.get(2) * 0.36);
        self.follower.set_times(params.get(4), params.get(5));
        self.octaves = params.get(6);
        let mode = svf_mode(params.choice(7));
        for f in &mut self.filters {
            f.set_mode(mode);
            f.nudge();
        }
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let env = self.follower.process_level(left.abs().max(right.abs()));
        let sweep = (env * self.sensitivity).min(1.0);
        let cutoff = (self.base * (self.octaves * sweep).exp2()).min(self.sample_rate * 0.45);
        let [fl, fr] = &mut self.filters;
        fl.set(cutoff, self.q);
        fr.set(cutoff, self.q);
        (fl.process_f64(left), fr.process_f64(right))
    }

    fn reset(&mut self) {
        self.follower.reset();
        for f in &mut self.filters {
            f.reset();
        }
    }

    fn tail_samples(&self, params: &ParamBank) -> usize {
        ((FILTER_TAIL_SECONDS + params.get(5) * 0.005) * self.sample_rate) as usize
    }
}

// ============ Comb Resonator ============

/// Lowest tunable resonance (Hz)
const COMB_MIN_HZ: f64 = 20.0;

pub const COMB_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Frequency", 0.5, ParamDisplay::Frequency),
    ParamSpec::new("Feedback", 0.5, ParamDisplay::Percent),
    ParamSpec::new("Damping", 0.5, ParamDisplay::Percent),
    ParamSpec::mix(0.0),
    ParamSpec::new("Spread", 0.5, ParamDisplay::Percent),
];

/// Tuned feedback comb per channel, the right one detuned by `Spread`
pub struct CombResonator {
    sample_rate: f64,
    lines: [DelayLine; 2],
    damping: [OnePole; 2],
    periods: [f64; 2],
    feedback: f64,
    norm: f64,
}

impl StereoKernel for CombResonator {
    const ID: EngineId = EngineId::CombResonator;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let max = (sample_rate / COMB_MIN_HZ).ceil() as usize + 4;
        Self {
            sample_rate,
            lines: [
                DelayLine::new(max, Interpolation::Cubic),
                DelayLine::new(max, Interpolation::Cubic),
            ],
            damping: [OnePole::open(), OnePole::open()],
            periods: [sample_rate / 632.0; 2],
            feedback: 0.0,
            norm: 1.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let freq = params.get(0).clamp(COMB_MIN_HZ, self.sample_rate * 0.25);
        // up to a semitone apart
        let spread = (params.get(4) * 0.01 / 12.0).exp2();
        self.periods = [self.sample_rate / freq, self.sample_rate / (freq * spread)];
        self.feedback = 0.98 * params.get(1) * 0.01;
        self.norm = (1.0 - self.feedback).sqrt();
        let cutoff = 20000.0 * (1.0 - 0.9 * params.get(2) * 0.01);
        for d in &mut self.damping {
            d.set_cutoff(cutoff.min(self.sample_rate * 0.45), self.sample_rate);
        }
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let mut out = [0.0; 2];
        for (c, x) in [left, right].into_iter().enumerate() {
            // read happens before this sample's write
            let delayed = self.lines[c].read((self.periods[c] - 1.0) as f32) as f64;
            let fed = self.damping[c].lowpass(delayed).tanh();
            let y = x + self.feedback * fed;
            self.lines[c].write(y as Sample);
            out[c] = y * self.norm;
        }
        (out[0], out[1])
    }

    fn reset(&mut self) {
        for (line, d) in self.lines.iter_mut().zip(&mut self.damping) {
            line.reset();
            d.reset();
        }
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        let longest = self.periods[0].max(self.periods[1]);
        feedback_tail(longest, self.feedback, 120.0)
    }
}

// ============ Vocal Formant ============

pub const VOCAL_FORMANT_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Vowel", 0.5, ParamDisplay::Span { min: 0.0, max: 4.0 }),
    ParamSpec::new("Resonance", 0.5, ParamDisplay::Percent),
    ParamSpec::new("Gender", 0.5, ParamDisplay::Span { min: -1.0, max: 1.0 }),
    ParamSpec::mix(0.0),
];

/// Five-formant vocal tract model on biquad bandpasses.
///
/// `Gender` scales all formants by up to a third of an octave either way.
pub struct VocalFormant {
    sample_rate: f64,
    bands: [StereoBiquad; 5],
}

impl StereoKernel for VocalFormant {
    const ID: EngineId = EngineId::VocalFormant;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let band = |n: usize| StereoBiquad::new(FilterType::Bandpass, VOWELS[2][n], 8.0, 0.0, sample_rate);
        Self {
            sample_rate,
            bands: [band(0), band(1), band(2), band(3), band(4)],
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let vowel = params.get(0);
        let q = 4.0 + 0.16 * params.get(1);
        let scale = (params.get(2) / 3.0).exp2();
        let top = self.sample_rate * 0.45;
        for (n, band) in self.bands.iter_mut().enumerate() {
            band.set((vowel_formant(vowel, n) * scale).min(top), q, 0.0);
        }
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let mut out = (0.0, 0.0);
        for (band, gain) in self.bands.iter_mut().zip(FORMANT_GAINS) {
            let (l, r) = band.process(left, right);
            out.0 += l * gain;
            out.1 += r * gain;
        }
        out
    }

    fn reset(&mut self) {
        for band in &mut self.bands {
            band.reset();
        }
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        (FILTER_TAIL_SECONDS * self.sample_rate) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, KernelEngine};
    use fx_core::ParameterMap;
    use std::f64::consts::PI;

    fn rms_of(engine: &mut dyn Engine, freq: f64) -> f64 {
        let mut sum = 0.0;
        for b in 0..100 {
            let mut l: Vec<f32> = (0..480)
                .map(|i| ((2.0 * PI * freq * (b * 480 + i) as f64 / 48000.0).sin() * 0.3) as f32)
                .collect();
            let mut r = l.clone();
            {
                let mut block: [&mut [f32]; 2] = [&mut l, &mut r];
                engine.process(&mut block);
            }
            if b >= 50 {
                sum += l.iter().map(|x| (*x as f64).powi(2)).sum::<f64>();
            }
        }
        (sum / (50.0 * 480.0)).sqrt()
    }

    #[test]
    fn test_vowel_interpolation() {
        assert_eq!(vowel_formant(0.0, 0), 800.0);
        assert_eq!(vowel_formant(4.0, 1), 700.0);
        assert!((vowel_formant(0.5, 0) - 575.0).abs() < 1e-9);
    }

    #[test]
    fn test_filters_default_to_dry() {
        let mut ladder = KernelEngine::<Ladder>::new(48000.0, 480);
        let rms = rms_of(&mut ladder, 5000.0);
        assert!((rms - 0.3 / 2f64.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn test_ladder_attenuates_above_cutoff() {
        let mut ladder = KernelEngine::<Ladder>::new(48000.0, 480);
        ladder.apply_parameters(&ParameterMap::new().with(1, 0.0).with(2, 0.0).with(3, 1.0));
        let low = rms_of(&mut ladder, 100.0);
        let high = rms_of(&mut ladder, 8000.0);
        assert!(high < low * 0.05, "low {low} high {high}");
    }

    #[test]
    fn test_svf_highpass_mode() {
        let mut svf = KernelEngine::<StateVariable>::new(48000.0, 480);
        // highpass, mild resonance, no drive
        svf.apply_parameters(&ParameterMap::new().with(4, 0.6).with(1, 0.1).with(2, 0.0).with(3, 1.0));
        let low = rms_of(&mut svf, 50.0);
        let high = rms_of(&mut svf, 8000.0);
        assert!(low < high * 0.1, "low {low} high {high}");
    }

    #[test]
    fn test_comb_rings_at_tuning() {
        let mut comb = KernelEngine::<CombResonator>::new(48000.0, 480);
        comb.apply_parameters(&ParameterMap::new().with(3, 1.0).with(1, 0.9));
        let mut l = vec![0.0f32; 480];
        let mut r = vec![0.0f32; 480];
        l[0] = 1.0;
        r[0] = 1.0;
        let mut block: [&mut [f32]; 2] = [&mut l, &mut r];
        comb.process(&mut block);
        // period of 632 Hz is 76 samples
        assert!(block[0][76].abs() > 0.1 || block[0][75].abs() > 0.1 || block[0][77].abs() > 0.1);
        assert!(comb.tail_samples() > 76);
    }
}
