//! Pitch engines
//!
//! The wet path of every engine here is delayed by its shifter's latency;
//! the mix blends it with the undelayed dry input.

use fx_core::{ParamDisplay, Sample};
use fx_dsp::dynamics::time_coeff;
use fx_dsp::modulation::{DelayPitchShifter, Lfo, LfoShape};
use fx_dsp::pitch::{PeriodEstimator, PsolaShifter};
use fx_dsp::ring_buffer::{DelayLine, Interpolation, RingBuffer};

use crate::engine::{StereoKernel, seconds_to_samples};
use crate::params::{ParamBank, ParamSpec};
use crate::registry::EngineId;

/// Semitones to a frequency ratio
#[inline]
fn semitones_to_ratio(semitones: f64) -> f64 {
    (semitones / 12.0).exp2()
}

// ============ PSOLA Pitch Shifter ============

pub const PITCH_SHIFTER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Pitch", 0.5, ParamDisplay::Pitch),
    ParamSpec::new("Fine", 0.5, ParamDisplay::Span { min: -100.0, max: 100.0 }),
    ParamSpec::mix(0.5),
];

/// Pitch-synchronous shifter, one PSOLA track per channel
pub struct PitchShifter {
    shifters: [PsolaShifter; 2],
}

impl PitchShifter {
    /// Pitch ratio for the current parameters
    pub fn ratio(params: &ParamBank) -> f64 {
        params.get(0) * semitones_to_ratio(params.get(1) / 100.0)
    }
}

impl StereoKernel for PitchShifter {
    const ID: EngineId = EngineId::PitchShifter;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            shifters: [PsolaShifter::new(sample_rate), PsolaShifter::new(sample_rate)],
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let ratio = Self::ratio(params);
        for s in &mut self.shifters {
            s.set_ratio(ratio);
        }
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let l = self.shifters[0].process(left as Sample);
        let r = self.shifters[1].process(right as Sample);
        (l as f64, r as f64)
    }

    fn reset(&mut self) {
        for s in &mut self.shifters {
            s.reset();
        }
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        self.shifters[0].tail()
    }

    fn latency(&self) -> usize {
        self.shifters[0].latency()
    }
}

// ============ Detune Doubler ============

pub const DOUBLER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Detune", 0.5, ParamDisplay::Span { min: 0.0, max: 50.0 }),
    ParamSpec::new("Delay", 0.5, ParamDisplay::Millis { min: 5.0, max: 60.0 }),
    ParamSpec::new("Spread", 0.5, ParamDisplay::Percent),
    ParamSpec::mix(0.5),
    ParamSpec::new("Drift", 0.5, ParamDisplay::Percent),
];

/// Doubling voice grain size (seconds)
const DOUBLER_WINDOW: f64 = 0.03;
const DOUBLER_MAX_DELAY: f64 = 0.07;

/// Two slightly detuned, delayed copies, one sharp and one flat.
///
/// `Spread` pans the copies apart; `Drift` wobbles their detune slowly.
pub struct DetuneDoubler {
    sample_rate: f64,
    voices: [DelayPitchShifter; 2],
    delays: [DelayLine; 2],
    drift: Lfo,
    cents: f64,
    delay: f64,
    spread: f64,
    wobble: f64,
}

impl StereoKernel for DetuneDoubler {
    const ID: EngineId = EngineId::DetuneDoubler;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let window = seconds_to_samples(DOUBLER_WINDOW, sample_rate);
        let shifter = DelayPitchShifter::new(window, Interpolation::Cubic);
        let line = DelayLine::with_seconds(DOUBLER_MAX_DELAY, sample_rate, Interpolation::Cubic);
        let mut drift = Lfo::new(sample_rate);
        drift.set_shape(LfoShape::Random);
        drift.set_rate(0.4);
        Self {
            sample_rate,
            voices: [shifter.clone(), shifter],
            delays: [line.clone(), line],
            drift,
            cents: 0.0,
            delay: 0.0,
            spread: 1.0,
            wobble: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.cents = params.get(0);
        self.delay = params.get(1) * 0.001 * self.sample_rate;
        self.spread = params.get(2) * 0.01;
        self.wobble = params.get(4) * 0.01;
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let cents = self.cents * (1.0 + 0.5 * self.wobble * self.drift.next());
        self.voices[0].set_ratio(semitones_to_ratio(cents / 100.0));
        self.voices[1].set_ratio(semitones_to_ratio(-cents / 100.0));

        let mut v = [0.0; 2];
        for (c, x) in [left, right].into_iter().enumerate() {
            let shifted = self.voices[c].process(x as Sample);
            v[c] = self.delays[c].process(shifted, self.delay as f32) as f64;
        }
        let near = 0.5 + 0.5 * self.spread;
        let far = 1.0 - near;
        (v[0] * near + v[1] * far, v[1] * near + v[0] * far)
    }

    fn reset(&mut self) {
        for v in &mut self.voices {
            v.reset();
        }
        for d in &mut self.delays {
            d.reset();
        }
        self.drift.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        self.voices[0].latency() * 2 + seconds_to_samples(DOUBLER_MAX_DELAY, self.sample_rate)
    }

    fn latency(&self) -> usize {
        self.voices[0].latency()
    }
}

// ============ Intelligent Harmonizer ============

/// Scale intervals from the tonic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Major,
    Minor,
    Dorian,
    Chromatic,
}

impl Scale {
    pub fn from_index(index: usize) -> Self {
        match index {
            1 => Self::Minor,
            2 => Self::Dorian,
            3 => Self::Chromatic,
            _ => Self::Major,
        }
    }

    pub fn degrees(self) -> &'static [i32] {
        match self {
            Self::Major => &[0, 2, 4, 5, 7, 9, 11],
            Self::Minor => &[0, 2, 3, 5, 7, 8, 10],
            Self::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            Self::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        }
    }
}

/// Semitones from the detected note to the note `steps` scale degrees away.
///
/// The detected note is snapped to the nearest degree of `scale` in `key`
/// first, so the harmony stays diatonic.
pub fn harmony_semitones(note: f64, key: usize, scale: Scale, steps: i32) -> i32 {
    let degrees = scale.degrees();
    let n = degrees.len() as i32;
    let rel = note.round() as i32 - key as i32;
    let pc = rel.rem_euclid(12);
    let mut degree = 0;
    let mut best = i32::MAX;
    for (d, &iv) in degrees.iter().enumerate() {
        let dist = (pc - iv).abs().min(12 - (pc - iv).abs());
        if dist < best {
            best = dist;
            degree = d as i32;
        }
    }
    let target = degree + steps;
    let octave = target.div_euclid(n);
    let interval = degrees[target.rem_euclid(n) as usize] + 12 * octave;
    interval - degrees[degree as usize]
}

pub const HARMONIZER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Interval", 0.5, ParamDisplay::Span { min: -7.0, max: 7.0 }),
    ParamSpec::new("Key", 0.5, ParamDisplay::Choice(12)).step(),
    ParamSpec::new("Scale", 0.5, ParamDisplay::Choice(4)).step(),
    ParamSpec::mix(0.5),
    ParamSpec::new("Glide", 0.5, ParamDisplay::Millis { min: 2.0, max: 200.0 }),
];

/// Pitch re-detection cadence (samples)
const DETECT_EVERY: usize = 1024;
const HARMONY_WINDOW: f64 = 0.03;

/// Scale-aware harmony voice.
///
/// The mono sum is analysed every [`DETECT_EVERY`] samples; the detected
/// note picks the interval that keeps the harmony in key. Unvoiced input
/// keeps the last interval.
pub struct IntelligentHarmonizer {
    sample_rate: f64,
    history: RingBuffer,
    estimator: PeriodEstimator,
    voices: [DelayPitchShifter; 2],
    counter: usize,
    semitones: f64,
    ratio: f64,
    glide: f64,
}

impl IntelligentHarmonizer {
    fn detect(&mut self, params: &ParamBank) {
        let Some(period) = self.estimator.estimate(&self.history) else {
            return;
        };
        let freq = self.sample_rate / period;
        let note = 69.0 + 12.0 * (freq / 440.0).log2();
        let steps = params.get(0).round() as i32;
        let scale = Scale::from_index(params.choice(2));
        self.semitones = harmony_semitones(note, params.choice(1), scale, steps) as f64;
    }
}

impl StereoKernel for IntelligentHarmonizer {
    const ID: EngineId = EngineId::IntelligentHarmonizer;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let estimator = PeriodEstimator::new(sample_rate);
        let window = seconds_to_samples(HARMONY_WINDOW, sample_rate);
        let shifter = DelayPitchShifter::new(window, Interpolation::Cubic);
        Self {
            sample_rate,
            history: RingBuffer::new(estimator.history()),
            estimator,
            voices: [shifter.clone(), shifter],
            counter: 0,
            semitones: 0.0,
            ratio: 1.0,
            glide: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.glide = time_coeff(params.get(4), self.sample_rate);
        if params.choice(2) == 3 {
            // chromatic intervals do not depend on the detected note
            self.semitones = params.get(0).round();
        }
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        self.history.push((0.5 * (left + right)) as Sample);
        self.counter += 1;
        if self.counter >= DETECT_EVERY {
            self.counter = 0;
            self.detect(params);
        }

        let target = semitones_to_ratio(self.semitones);
        self.ratio = target + self.glide * (self.ratio - target);
        let mut out = [0.0; 2];
        for (c, x) in [left, right].into_iter().enumerate() {
            self.voices[c].set_ratio(self.ratio);
            out[c] = self.voices[c].process(x as Sample) as f64;
        }
        (out[0], out[1])
    }

    fn reset(&mut self) {
        self.history.clear();
        for v in &mut self.voices {
            v.reset();
        }
        self.counter = 0;
        self.semitones = 0.0;
        self.ratio = 1.0;
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        self.voices[0].latency() * 2 + 8
    }

    fn latency(&self) -> usize {
        self.voices[0].latency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, KernelEngine};
    use fx_core::ParameterMap;

    #[test]
    fn test_harmony_stays_in_key() {
        // E up a diatonic third in C major is G
        assert_eq!(harmony_semitones(64.0, 0, Scale::Major, 2), 3);
        // C up a third is E
        assert_eq!(harmony_semitones(60.0, 0, Scale::Major, 2), 4);
        // A down a third in C major is F
        assert_eq!(harmony_semitones(69.0, 0, Scale::Major, -2), -4);
        // a full octave of degrees
        assert_eq!(harmony_semitones(62.0, 0, Scale::Dorian, 7), 12);
        assert_eq!(harmony_semitones(61.3, 0, Scale::Chromatic, 7), 7);
    }

    #[test]
    fn test_octave_up_ratio() {
        let mut engine = KernelEngine::<PitchShifter>::new(48000.0, 512);
        engine.apply_parameters(&ParameterMap::new().with(0, 0.75));
        assert!((PitchShifter::ratio(engine.params()) - 2.0).abs() < 1e-4);
        assert!(engine.latency_samples() > 0);
    }

    #[test]
    fn test_doubler_unity_at_zero_detune() {
        let mut engine = KernelEngine::<DetuneDoubler>::new(48000.0, 512);
        engine.apply_parameters(
            &ParameterMap::new().with(0, 0.0).with(2, 1.0).with(3, 1.0).with(4, 0.0),
        );
        let mut l = vec![0.3f32; 512];
        let mut r = vec![0.3f32; 512];
        for _ in 0..20 {
            l.fill(0.3);
            r.fill(0.3);
            let mut block: [&mut [f32]; 2] = [&mut l, &mut r];
            engine.process(&mut block);
        }
        assert!((l[511] - 0.3).abs() < 1e-3, "{}", l[511]);
    }
}
