//! Spectral engines
//!
//! - Spectral freeze and spectral gate: 2048-point STFT, Hann analysis and
//!   synthesis windows at quarter-frame hop, per channel
//! - Phased vocoder: streaming pitch/time vocoder per channel
//! - Granular cloud: windowed grains read back from a two-second history

use std::f64::consts::{FRAC_PI_4, PI, SQRT_2, TAU};

use fx_core::{ParamDisplay, Sample, db_to_gain_f64};
use fx_dsp::fft::{Complex64, RealFft, ZERO, princarg};
use fx_dsp::phase_vocoder::PhaseVocoder;
use fx_dsp::ring_buffer::RingBuffer;
use fx_dsp::window::{OverlapAdd, WindowKind, ola_gain};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::engine::{StereoKernel, seconds_to_samples};
use crate::params::{ParamBank, ParamSpec};
use crate::registry::EngineId;

const FRAME: usize = 2048;
const HOP: usize = FRAME / 4;

/// Bin magnitude of a full-scale sine under a Hann window is `FRAME/4`
const MAG_SCALE: f64 = 4.0 / FRAME as f64;

const MIX: ParamSpec = ParamSpec::mix(0.5);

// ============ STFT Channel ============

/// One channel of windowed analysis, spectral edit, resynthesis
struct StftChannel {
    ola: OverlapAdd,
    fft: RealFft,
    window: Vec<f64>,
    norm: f64,
    time: Vec<f64>,
    spectrum: Vec<Complex64>,
}

impl StftChannel {
    fn new() -> Self {
        let window = WindowKind::Hann.table(FRAME, true);
        let norm = 1.0 / ola_gain(&window, &window, HOP);
        let fft = RealFft::new(FRAME);
        let spectrum = vec![ZERO; fft.bins()];
        Self {
            ola: OverlapAdd::new(FRAME, HOP),
            fft,
            window,
            norm,
            time: vec![0.0; FRAME],
            spectrum,
        }
    }

    /// Push one sample; `edit` sees the half spectrum once per hop
    #[inline]
    fn process<F>(&mut self, x: f64, mut edit: F) -> f64
    where
        F: FnMut(&mut [Complex64]),
    {
        let Self {
            ola,
            fft,
            window,
            norm,
            time,
            spectrum,
        } = self;
        ola.push(x, |input, synth| {
            for ((t, &s), &w) in time.iter_mut().zip(input).zip(window.iter()) {
                *t = s * w;
            }
            fft.forward(time, spectrum);
            edit(spectrum);
            fft.inverse(spectrum, time);
            for ((o, &t), &w) in synth.iter_mut().zip(time.iter()).zip(window.iter()) {
                *o = t * w * *norm;
            }
        })
    }

    fn reset(&mut self) {
        self.ola.reset();
    }
}

// ============ Spectral Freeze ============

pub const FREEZE_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Freeze", 0.0, ParamDisplay::Switch).step(),
    ParamSpec::new("Blend", 0.5, ParamDisplay::Percent),
    MIX,
    ParamSpec::new("Drift", 0.5, ParamDisplay::Percent),
];

const FREEZE_SEED: u64 = 0xF2EE_2E;

/// Held magnitudes and running synthesis phases of one channel
struct FreezeState {
    magnitude: Vec<f64>,
    phase: Vec<f64>,
    captured: bool,
}

impl FreezeState {
    fn new(bins: usize) -> Self {
        Self {
            magnitude: vec![0.0; bins],
            phase: vec![0.0; bins],
            captured: false,
        }
    }

    fn apply(&mut self, spectrum: &mut [Complex64], hold: bool, blend: f64, drift: f64, rng: &mut ChaCha8Rng) {
        if !hold {
            self.captured = false;
            for (p, bin) in self.phase.iter_mut().zip(spectrum.iter()) {
                *p = bin.arg();
            }
            return;
        }
        if !self.captured {
            for (m, bin) in self.magnitude.iter_mut().zip(spectrum.iter()) {
                *m = bin.norm();
            }
            self.captured = true;
        }
        for (k, bin) in spectrum.iter_mut().enumerate() {
            let advance = TAU * (k * HOP) as f64 / FRAME as f64;
            let jitter = drift * rng.random_range(-PI..PI);
            self.phase[k] = princarg(self.phase[k] + advance + jitter);
            let magnitude = self.magnitude[k] * blend + bin.norm() * (1.0 - blend);
            *bin = Complex64::from_polar(magnitude, self.phase[k]);
        }
    }

    fn reset(&mut self) {
        self.magnitude.fill(0.0);
        self.phase.fill(0.0);
        self.captured = false;
    }
}

/// Captures the spectrum when `Freeze` engages and resynthesizes it with
/// advancing phases for as long as it stays engaged
pub struct SpectralFreeze {
    channels: [StftChannel; 2],
    states: [FreezeState; 2],
    rng: ChaCha8Rng,
}

impl StereoKernel for SpectralFreeze {
    const ID: EngineId = EngineId::SpectralFreeze;

    fn new(_sample_rate: f64, _max_block: usize) -> Self {
        let bins = FRAME / 2 + 1;
        Self {
            channels: [StftChannel::new(), StftChannel::new()],
            states: [FreezeState::new(bins), FreezeState::new(bins)],
            rng: ChaCha8Rng::seed_from_u64(FREEZE_SEED),
        }
    }

    fn control(&mut self, _params: &ParamBank) {}

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let hold = params.switch(0);
        let blend = params.get(1) * 0.01;
        let drift = params.get(3) * 0.01;
        let mut out = [0.0; 2];
        for (ch, x) in [left, right].into_iter().enumerate() {
            let state = &mut self.states[ch];
            let rng = &mut self.rng;
            out[ch] = self.channels[ch].process(x, |spectrum| state.apply(spectrum, hold, blend, drift, rng));
        }
        (out[0], out[1])
    }

    fn reset(&mut self) {
        for (channel, state) in self.channels.iter_mut().zip(self.states.iter_mut()) {
            channel.reset();
            state.reset();
        }
        self.rng = ChaCha8Rng::seed_from_u64(FREEZE_SEED);
    }

    /// Unbounded while frozen
    fn tail_samples(&self, params: &ParamBank) -> usize {
        if params.switch(0) { usize::MAX } else { 2 * FRAME }
    }

    fn latency(&self) -> usize {
        FRAME
    }
}

// ============ Spectral Gate ============

pub const GATE_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Threshold", 0.5, ParamDisplay::GainDb { min: -90.0, max: 0.0 }),
    ParamSpec::new("Reduction", 0.5, ParamDisplay::GainDb { min: -80.0, max: 0.0 }),
    MIX,
    ParamSpec::new("Attack", 0.5, ParamDisplay::Millis { min: 1.0, max: 100.0 }),
    ParamSpec::new("Release", 0.5, ParamDisplay::Millis { min: 10.0, max: 1000.0 }),
];

/// Per-bin gate: bins under the threshold fall to the reduction floor
pub struct SpectralGate {
    sample_rate: f64,
    channels: [StftChannel; 2],
    gains: [Vec<f64>; 2],
    threshold: f64,
    floor: f64,
    attack: f64,
    release: f64,
}

impl SpectralGate {
    /// Per-frame one-pole coefficient for a time constant in ms
    fn frame_coeff(&self, ms: f64) -> f64 {
        let frames = ms * 0.001 * self.sample_rate / HOP as f64;
        (-1.0 / frames.max(1e-3)).exp()
    }
}

impl StereoKernel for SpectralGate {
    const ID: EngineId = EngineId::SpectralGate;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let bins = FRAME / 2 + 1;
        Self {
            sample_rate,
            channels: [StftChannel::new(), StftChannel::new()],
            gains: [vec![1.0; bins], vec![1.0; bins]],
            threshold: 0.0,
            floor: 0.0,
            attack: 0.0,
            release: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.threshold = db_to_gain_f64(params.get(0));
        self.floor = db_to_gain_f64(params.get(1));
        self.attack = self.frame_coeff(params.get(3));
        self.release = self.frame_coeff(params.get(4));
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (threshold, floor, attack, release) = (self.threshold, self.floor, self.attack, self.release);
        let mut out = [0.0; 2];
        for (ch, x) in [left, right].into_iter().enumerate() {
            let gains = &mut self.gains[ch];
            out[ch] = self.channels[ch].process(x, |spectrum| {
                for (bin, g) in spectrum.iter_mut().zip(gains.iter_mut()) {
                    let target = if bin.norm() * MAG_SCALE > threshold { 1.0 } else { floor };
                    // closing uses the attack constant
                    let coeff = if target < *g { attack } else { release };
                    *g = target + coeff * (*g - target);
                    *bin *= *g;
                }
            });
        }
        (out[0], out[1])
    }

    fn reset(&mut self) {
        for (channel, gains) in self.channels.iter_mut().zip(self.gains.iter_mut()) {
            channel.reset();
            gains.fill(1.0);
        }
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        2 * FRAME
    }

    fn latency(&self) -> usize {
        FRAME
    }
}

// ============ Phased Vocoder ============

pub const VOCODER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Pitch", 0.5, ParamDisplay::Pitch),
    ParamSpec::new("Stretch", 0.5, ParamDisplay::Scale { min: 0.0625, max: 16.0 }),
    MIX,
];

/// Phase-vocoder pitch shift and time stretch, one vocoder per channel
pub struct PhasedVocoder {
    voices: [PhaseVocoder; 2],
}

impl StereoKernel for PhasedVocoder {
    const ID: EngineId = EngineId::PhasedVocoder;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            voices: [PhaseVocoder::new(sample_rate), PhaseVocoder::new(sample_rate)],
        }
    }

    fn control(&mut self, params: &ParamBank) {
        for voice in &mut self.voices {
            voice.set_pitch(params.get(0));
            voice.set_stretch(params.get(1));
        }
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        (
            self.voices[0].process(left as Sample) as f64,
            self.voices[1].process(right as Sample) as f64,
        )
    }

    fn reset(&mut self) {
        for voice in &mut self.voices {
            voice.reset();
        }
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        self.voices[0].tail()
    }

    fn latency(&self) -> usize {
        self.voices[0].latency()
    }
}

// ============ Granular Cloud ============

pub const GRANULAR_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Grain Size", 0.5, ParamDisplay::Millis { min: 10.0, max: 200.0 }),
    ParamSpec::new("Density", 0.5, ParamDisplay::Hertz { min: 2.0, max: 100.0 }),
    MIX,
    ParamSpec::new("Spread", 0.5, ParamDisplay::Span { min: 0.0, max: 500.0 }),
    ParamSpec::new("Pitch", 0.5, ParamDisplay::Pitch),
    ParamSpec::new("Pitch Jitter", 0.5, ParamDisplay::Span { min: 0.0, max: 1.0 }),
    ParamSpec::new("Stereo", 0.5, ParamDisplay::Percent),
];

const GRAIN_COUNT: usize = 32;
const GRAIN_HISTORY_SECONDS: f64 = 2.0;
const GRAIN_SEED: u64 = 0x6_7A1E;

#[derive(Debug, Clone, Copy, Default)]
struct Grain {
    active: bool,
    /// Read position behind the newest input sample
    delay: f64,
    increment: f64,
    age: usize,
    length: usize,
    gain_left: f64,
    gain_right: f64,
}

/// Up to 32 overlapping Hann-windowed grains read back from recent input
/// at randomized positions, pitches and pans
pub struct GranularCloud {
    sample_rate: f64,
    history: [RingBuffer; 2],
    grains: [Grain; GRAIN_COUNT],
    rng: ChaCha8Rng,
    countdown: usize,
    interval: usize,
    length: usize,
    spread: f64,
    ratio: f64,
    jitter: f64,
    stereo: f64,
    norm: f64,
}

impl GranularCloud {
    fn spawn(&mut self) {
        let Some(grain) = self.grains.iter_mut().find(|g| !g.active) else {
            return;
        };
        let semitones = self.jitter * self.rng.random_range(-1.0..=1.0);
        let increment = self.ratio * 2f64.powf(semitones / 12.0);
        // fast grains start far enough back to never overtake the input
        let lead = ((increment - 1.0) * self.length as f64).max(0.0);
        let pan = self.stereo * self.rng.random_range(-1.0..=1.0);
        let angle = (pan + 1.0) * FRAC_PI_4;
        *grain = Grain {
            active: true,
            delay: 2.0 + lead + self.spread * self.rng.random::<f64>(),
            increment,
            age: 0,
            length: self.length,
            gain_left: angle.cos() * SQRT_2,
            gain_right: angle.sin() * SQRT_2,
        };
    }
}

impl StereoKernel for GranularCloud {
    const ID: EngineId = EngineId::GranularCloud;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let history = seconds_to_samples(GRAIN_HISTORY_SECONDS, sample_rate);
        Self {
            sample_rate,
            history: [RingBuffer::new(history), RingBuffer::new(history)],
            grains: [Grain::default(); GRAIN_COUNT],
            rng: ChaCha8Rng::seed_from_u64(GRAIN_SEED),
            countdown: 0,
            interval: 1,
            length: 1,
            spread: 0.0,
            ratio: 1.0,
            jitter: 0.0,
            stereo: 0.0,
            norm: 1.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.length = seconds_to_samples(params.get(0) * 0.001, self.sample_rate).max(16);
        self.interval = ((self.sample_rate / params.get(1).max(0.1)) as usize).max(1);
        self.spread = params.get(3) * 0.001 * self.sample_rate;
        self.ratio = params.get(4).clamp(0.25, 4.0);
        self.jitter = params.get(5);
        self.stereo = params.get(6) * 0.01;
        let overlap = self.length as f64 / self.interval as f64;
        self.norm = 1.0 / overlap.max(1.0).sqrt();
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        self.history[0].push(left as Sample);
        self.history[1].push(right as Sample);
        if self.countdown == 0 {
            self.spawn();
            self.countdown = self.interval;
        }
        self.countdown -= 1;

        let (mut l, mut r) = (0.0, 0.0);
        for grain in self.grains.iter_mut().filter(|g| g.active) {
            let t = grain.age as f64 / grain.length as f64;
            let env = (PI * t).sin().powi(2);
            let d = grain.delay as f32;
            l += self.history[0].read_cubic(d) as f64 * env * grain.gain_left;
            r += self.history[1].read_cubic(d) as f64 * env * grain.gain_right;
            grain.delay += 1.0 - grain.increment;
            grain.age += 1;
            if grain.age >= grain.length {
                grain.active = false;
            }
        }
        (l * self.norm, r * self.norm)
    }

    fn reset(&mut self) {
        for history in &mut self.history {
            history.clear();
        }
        self.grains = [Grain::default(); GRAIN_COUNT];
        self.rng = ChaCha8Rng::seed_from_u64(GRAIN_SEED);
        self.countdown = 0;
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        // oldest read of a grain spawned just after the input stopped
        (self.spread + 6.0 * self.length as f64) as usize + self.interval + 64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, KernelEngine};
    use fx_core::ParameterMap;
    use std::f32::consts::TAU as TAU32;

    const SR: f64 = 48000.0;

    fn run(engine: &mut dyn Engine, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.chunks_mut(512).zip(right.chunks_mut(512)) {
            let mut block: [&mut [f32]; 2] = [l, r];
            engine.process(&mut block);
        }
    }

    fn sine(freq: f32, amp: f32, len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32 * TAU32 * freq / SR as f32).sin() * amp).collect()
    }

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt()
    }

    #[test]
    fn test_freeze_off_reconstructs_input() {
        let mut engine = KernelEngine::<SpectralFreeze>::new(SR, 512);
        engine.apply_parameters(&ParameterMap::new().with(2, 1.0));
        let input = sine(1000.0, 0.5, 24000);
        let (mut left, mut right) = (input.clone(), input.clone());
        run(&mut engine, &mut left, &mut right);
        let latency = engine.latency_samples();
        for n in 3 * FRAME..left.len() {
            assert!((left[n] - input[n - latency]).abs() < 1e-3);
        }
    }

    #[test]
    fn test_freeze_sustains_after_input_stops() {
        let mut engine = KernelEngine::<SpectralFreeze>::new(SR, 512);
        engine.apply_parameters(&ParameterMap::new().with(2, 1.0).with(1, 1.0));
        let mut left = sine(440.0, 0.5, 24000);
        let mut right = left.clone();
        run(&mut engine, &mut left, &mut right);

        engine.apply_parameters(&ParameterMap::new().with(0, 1.0));
        let mut left = sine(440.0, 0.5, 4096);
        let mut right = left.clone();
        run(&mut engine, &mut left, &mut right);

        let mut left = vec![0.0f32; 24000];
        let mut right = vec![0.0f32; 24000];
        run(&mut engine, &mut left, &mut right);
        assert!(rms(&left[12000..]) > 0.05, "frozen rms {}", rms(&left[12000..]));
        assert!(left.iter().all(|x| x.is_finite() && x.abs() < 2.0));
    }

    #[test]
    fn test_gate_passes_loud_tone() {
        let mut engine = KernelEngine::<SpectralGate>::new(SR, 512);
        engine.apply_parameters(&ParameterMap::new().with(2, 1.0));
        let mut left = sine(1000.0, 0.5, 48000);
        let mut right = left.clone();
        run(&mut engine, &mut left, &mut right);
        let level = rms(&left[24000..]);
        assert!((level - 0.3536).abs() < 0.02, "gated tone rms {level}");
    }

    #[test]
    fn test_gate_removes_low_noise() {
        let mut engine = KernelEngine::<SpectralGate>::new(SR, 512);
        engine.apply_parameters(&ParameterMap::new().with(2, 1.0));
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let input: Vec<f32> = (0..48000).map(|_| rng.random_range(-1e-3f32..1e-3)).collect();
        let (mut left, mut right) = (input.clone(), input.clone());
        run(&mut engine, &mut left, &mut right);
        assert!(rms(&left[24000..]) < 0.1 * rms(&input[24000..]));
    }

    #[test]
    fn test_vocoder_defaults_are_identity() {
        let mut engine = KernelEngine::<PhasedVocoder>::new(SR, 512);
        engine.apply_parameters(&ParameterMap::new().with(2, 1.0));
        let mut left = sine(1000.0, 0.5, 24000);
        let mut right = left.clone();
        run(&mut engine, &mut left, &mut right);
        let level = rms(&left[12000..]);
        assert!((level - 0.3536).abs() < 0.01, "vocoder rms {level}");
    }

    #[test]
    fn test_granular_is_deterministic_across_reset() {
        let mut engine = KernelEngine::<GranularCloud>::new(SR, 512);
        engine.apply_parameters(&ParameterMap::new().with(2, 1.0));
        let input = sine(330.0, 0.5, 48000);

        let (mut first, mut right) = (input.clone(), input.clone());
        run(&mut engine, &mut first, &mut right);
        assert!(rms(&first[24000..]) > 0.01);
        assert!(first.iter().all(|x| x.is_finite() && x.abs() < 2.0));

        engine.reset();
        let (mut second, mut right) = (input.clone(), input);
        run(&mut engine, &mut second, &mut right);
        assert_eq!(first, second);
    }

    #[test]
    fn test_granular_silence_stays_silent() {
        let mut engine = KernelEngine::<GranularCloud>::new(SR, 512);
        let mut left = vec![0.0f32; 9600];
        let mut right = vec![0.0f32; 9600];
        run(&mut engine, &mut left, &mut right);
        assert!(left.iter().chain(&right).all(|&x| x == 0.0));
    }
}
