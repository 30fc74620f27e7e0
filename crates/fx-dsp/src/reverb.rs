//! Plate and spring reverb cores
//!
//! Both return the wet signal only; mixing happens in the engine.
//!
//! ## Plate
//! Mono sum → pre-delay → drive → four input diffusers → four parallel
//! damped delays mixed through a Householder matrix. Early taps on the
//! pre-delayed input give the attack; the tank gives the tail.
//!
//! ## Spring
//! Three parallel tanks, each a damped delay with four nested allpasses in
//! the loop (dispersion), a ten-mode resonator bank and a chirp generator
//! triggered by input transients (triangular FM, 2 kHz ↔ 400 Hz).
//!
//! Feedback runs from 0.6 to 0.95 with `size`; damping is a one-pole with
//! coefficient `1 − exp(−2π·fc/fs)`.

use std::f64::consts::TAU;

use crate::biquad::{BiquadCoeffs, BiquadTDF2};
use crate::dynamics::EnvelopeFollower;
use crate::filters::{NestedAllpass, OnePole, SchroederAllpass, one_pole_coeff};
use crate::modulation::Lfo;
use crate::ring_buffer::{DelayLine, Interpolation};
use fx_core::flush_denormal;

/// Longest pre-delay (ms)
pub const MAX_PREDELAY_MS: f64 = 250.0;

/// Feedback gain for a size in `[0, 1]`
#[inline]
pub fn size_to_feedback(size: f64) -> f64 {
    0.6 + 0.35 * size.clamp(0.0, 1.0)
}

/// Damping cutoff: 20 kHz at 0 down to 200 Hz at 1
#[inline]
pub fn damping_to_cutoff(damping: f64) -> f64 {
    200.0 * 100f64.powf(1.0 - damping.clamp(0.0, 1.0))
}

/// Shared reverb controls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbSettings {
    /// 0..1, drives the feedback gain
    pub size: f64,
    /// 0..1, drives the in-loop lowpass
    pub damping: f64,
    pub predelay_ms: f64,
    /// Dispersion modulation depth 0..1
    pub chirp: f64,
    /// Input saturation 0..1
    pub drive: f64,
    pub low_cut_hz: f64,
    pub high_cut_hz: f64,
    /// 0 = mono, 1 = unchanged, 2 = double side
    pub width: f64,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        Self {
            size: 0.5,
            damping: 0.5,
            predelay_ms: 0.0,
            chirp: 0.3,
            drive: 0.0,
            low_cut_hz: 20.0,
            high_cut_hz: 20_000.0,
            width: 1.0,
        }
    }
}

/// Samples for a loop of mean length `loop_samples` at gain `g` to fall 120 dB
fn decay_samples(feedback: f64, loop_samples: f64) -> usize {
    let per_pass_db = -20.0 * feedback.clamp(1e-3, 0.999).log10();
    (120.0 / per_pass_db * loop_samples).ceil() as usize
}

#[inline]
fn drive_stage(x: f64, drive: f64) -> f64 {
    if drive <= 0.0 {
        x
    } else {
        let k = 1.0 + 4.0 * drive;
        (k * x).tanh() / k
    }
}

// ============ Post Stage ============

/// Pre-delay plus wet-path cuts and M/S width
#[derive(Debug, Clone)]
struct ReverbPost {
    sample_rate: f64,
    predelay: DelayLine,
    predelay_samples: f32,
    low_cut: [OnePole; 2],
    high_cut: [OnePole; 2],
    width: f64,
}

impl ReverbPost {
    fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            predelay: DelayLine::with_seconds(MAX_PREDELAY_MS * 0.001, sample_rate, Interpolation::Linear),
            predelay_samples: 0.0,
            low_cut: [OnePole::new(20.0, sample_rate), OnePole::new(20.0, sample_rate)],
            high_cut: [OnePole::open(), OnePole::open()],
            width: 1.0,
        }
    }

    fn set(&mut self, settings: &ReverbSettings) {
        let ms = settings.predelay_ms.clamp(0.0, MAX_PREDELAY_MS);
        self.predelay_samples = (ms * 0.001 * self.sample_rate) as f32;
        let nyquist = 0.45 * self.sample_rate;
        let low = settings.low_cut_hz.clamp(1.0, nyquist);
        let high = settings.high_cut_hz.clamp(low, nyquist);
        for f in &mut self.low_cut {
            f.set_cutoff(low, self.sample_rate);
        }
        for f in &mut self.high_cut {
            if settings.high_cut_hz >= nyquist {
                f.set_coeff(1.0);
            } else {
                f.set_cutoff(high, self.sample_rate);
            }
        }
        self.width = settings.width.clamp(0.0, 2.0);
    }

    #[inline]
    fn delay(&mut self, x: f64) -> f64 {
        self.predelay.process(x as f32, self.predelay_samples) as f64
    }

    #[inline]
    fn finish(&mut self, l: f64, r: f64) -> (f64, f64) {
        let l = self.high_cut[0].lowpass(self.low_cut[0].highpass(l));
        let r = self.high_cut[1].lowpass(self.low_cut[1].highpass(r));
        let mid = 0.5 * (l + r);
        let side = 0.5 * (l - r) * self.width;
        (mid + side, mid - side)
    }

    fn predelay_samples(&self) -> usize {
        self.predelay_samples.ceil() as usize
    }

    fn reset(&mut self) {
        self.predelay.reset();
        for f in self.low_cut.iter_mut().chain(self.high_cut.iter_mut()) {
            f.reset();
        }
    }
}

// ============ Plate ============

/// Input diffusers: (delay @ 48 kHz, gain)
const PLATE_DIFFUSERS: [(usize, f64); 4] = [(142, 0.75), (107, 0.75), (379, 0.625), (277, 0.625)];

/// Tank delays @ 48 kHz
const PLATE_TANK: [usize; 4] = [1447, 1811, 2137, 2591];

/// Early taps (ms, gain) per output
const PLATE_EARLY_LEFT: [(f64, f64); 3] = [(3.1, 0.7), (5.3, 0.45), (8.3, 0.3)];
const PLATE_EARLY_RIGHT: [(f64, f64); 3] = [(3.7, 0.65), (6.1, 0.42), (9.1, 0.28)];

/// Tank output weights per line
const PLATE_OUT_LEFT: [f64; 4] = [0.6, -0.35, 0.45, 0.0];
const PLATE_OUT_RIGHT: [f64; 4] = [0.0, 0.45, -0.35, 0.6];

/// Largest dispersion excursion (samples)
const PLATE_CHIRP_SAMPLES: f64 = 12.0;

/// Four-line plate reverb
#[derive(Debug, Clone)]
pub struct PlateReverb {
    sample_rate: f64,
    post: ReverbPost,
    diffusers: [SchroederAllpass; 4],
    early: DelayLine,
    early_left: [(f32, f64); 3],
    early_right: [(f32, f64); 3],
    lines: [DelayLine; 4],
    lengths: [f64; 4],
    damping: [OnePole; 4],
    lfos: [Lfo; 4],
    feedback: f64,
    chirp: f64,
    drive: f64,
}

impl PlateReverb {
    pub fn new(sample_rate: f64) -> Self {
        let scale = sample_rate / 48_000.0;
        let scaled = |d: usize| ((d as f64 * scale).round() as usize).max(1);
        let early_taps = |taps: [(f64, f64); 3]| taps.map(|(ms, g)| ((ms * 0.001 * sample_rate) as f32, g));
        let lengths = PLATE_TANK.map(|d| d as f64 * scale);
        let lfos = std::array::from_fn(|i| {
            let mut lfo = Lfo::new(sample_rate);
            lfo.set_rate(0.6 + 0.17 * i as f64);
            lfo.set_phase(i as f64 * 0.25);
            lfo
        });

        let mut plate = Self {
            sample_rate,
            post: ReverbPost::new(sample_rate),
            diffusers: PLATE_DIFFUSERS.map(|(d, g)| SchroederAllpass::new(scaled(d), scaled(d), g)),
            early: DelayLine::with_seconds(0.012, sample_rate, Interpolation::Linear),
            early_left: early_taps(PLATE_EARLY_LEFT),
            early_right: early_taps(PLATE_EARLY_RIGHT),
            lines: lengths.map(|len| DelayLine::new(len as usize + PLATE_CHIRP_SAMPLES as usize + 8, Interpolation::Cubic)),
            lengths,
            damping: std::array::from_fn(|_| OnePole::open()),
            lfos,
            feedback: size_to_feedback(0.5),
            chirp: 0.0,
            drive: 0.0,
        };
        plate.set(&ReverbSettings::default());
        plate
    }

    /// Apply controls (allocation-free)
    pub fn set(&mut self, settings: &ReverbSettings) {
        self.feedback = size_to_feedback(settings.size);
        let a = one_pole_coeff(damping_to_cutoff(settings.damping), self.sample_rate);
        for d in &mut self.damping {
            d.set_coeff(a);
        }
        self.chirp = settings.chirp.clamp(0.0, 1.0);
        self.drive = settings.drive.clamp(0.0, 1.0);
        self.post.set(settings);
    }

    pub fn feedback(&self) -> f64 {
        self.feedback
    }

    /// Wet stereo output for one input frame
    #[inline]
    pub fn process(&mut self, left: f64, right: f64) -> (f64, f64) {
        let input = self.post.delay(0.5 * (left + right));
        let input = drive_stage(input, self.drive);
        self.early.write(input as f32);

        let mut diffused = input;
        for ap in &mut self.diffusers {
            diffused = ap.process(diffused);
        }

        let mut taps = [0.0f64; 4];
        for i in 0..4 {
            let offset = self.lfos[i].next() * self.chirp * PLATE_CHIRP_SAMPLES;
            let delay = (self.lengths[i] + offset).max(2.0);
            taps[i] = self.damping[i].lowpass(self.lines[i].read(delay as f32) as f64);
        }

        // Householder: H = I − (2/N)·11ᵀ
        let half_sum = 0.5 * taps.iter().sum::<f64>();
        for i in 0..4 {
            let sign = if i % 2 == 0 { 0.5 } else { -0.5 };
            let v = diffused * sign + self.feedback * (taps[i] - half_sum);
            self.lines[i].write(flush_denormal(v) as f32);
        }

        let mut wet_l: f64 = PLATE_OUT_LEFT.iter().zip(&taps).map(|(g, t)| g * t).sum();
        let mut wet_r: f64 = PLATE_OUT_RIGHT.iter().zip(&taps).map(|(g, t)| g * t).sum();
        for &(d, g) in &self.early_left {
            wet_l += g * self.early.read(d) as f64;
        }
        for &(d, g) in &self.early_right {
            wet_r += g * self.early.read(d) as f64;
        }

        self.post.finish(wet_l, wet_r)
    }

    /// Samples after the last input until the tail is below −120 dB
    pub fn tail_samples(&self) -> usize {
        let mean = self.lengths.iter().sum::<f64>() / 4.0;
        let diffusion: usize = PLATE_DIFFUSERS.iter().map(|(d, _)| d * 12).sum();
        decay_samples(self.feedback, mean)
            + self.post.predelay_samples()
            + (diffusion as f64 * self.sample_rate / 48_000.0) as usize
    }

    pub fn reset(&mut self) {
        self.post.reset();
        for ap in &mut self.diffusers {
            ap.reset();
        }
        self.early.reset();
        for line in &mut self.lines {
            line.reset();
        }
        for d in &mut self.damping {
            d.reset();
        }
        for (i, lfo) in self.lfos.iter_mut().enumerate() {
            lfo.set_phase(i as f64 * 0.25);
        }
    }
}

// ============ Spring ============

/// Tank loop delays @ 48 kHz
const SPRING_TANK: [usize; 3] = [1709, 2011, 2399];

/// Dispersion allpasses per tank: (delay, gain, inner delay, inner gain)
const SPRING_DISPERSION: [[(usize, f64, usize, f64); 4]; 3] = [
    [(13, 0.6, 5, 0.4), (17, 0.6, 7, 0.4), (23, 0.55, 11, 0.35), (29, 0.55, 13, 0.35)],
    [(11, 0.6, 5, 0.4), (19, 0.6, 7, 0.4), (27, 0.55, 11, 0.35), (31, 0.55, 13, 0.35)],
    [(15, 0.6, 7, 0.4), (21, 0.6, 5, 0.4), (25, 0.55, 13, 0.35), (35, 0.55, 11, 0.35)],
];

/// Resonator modes (Hz, Q); higher modes damp faster
const SPRING_MODES: [(f64, f64); 10] = [
    (110.0, 24.0),
    (190.0, 22.0),
    (310.0, 20.0),
    (470.0, 18.0),
    (660.0, 16.0),
    (900.0, 14.0),
    (1250.0, 12.0),
    (1700.0, 10.0),
    (2300.0, 8.0),
    (3100.0, 6.0),
];

const MODE_GAIN: f64 = 0.06;

const CHIRP_HIGH_HZ: f64 = 2000.0;
const CHIRP_LOW_HZ: f64 = 400.0;
const CHIRP_SECONDS: f64 = 0.08;

#[derive(Debug, Clone)]
struct SpringTank {
    line: DelayLine,
    length: f64,
    dispersion: [NestedAllpass; 4],
    damping: OnePole,
    lfo: Lfo,
}

impl SpringTank {
    #[inline]
    fn process(&mut self, x: f64, feedback: f64, chirp: f64) -> f64 {
        let offset = self.lfo.next() * chirp * 6.0;
        let y = self.damping.lowpass(self.line.read((self.length + offset).max(2.0) as f32) as f64);
        let mut v = x + feedback * y;
        for ap in &mut self.dispersion {
            v = ap.process(v);
        }
        self.line.write(flush_denormal(v) as f32);
        y
    }

    fn reset(&mut self) {
        self.line.reset();
        for ap in &mut self.dispersion {
            ap.reset();
        }
        self.damping.reset();
    }
}

/// Transient-triggered falling/rising chirp
#[derive(Debug, Clone)]
struct ChirpGenerator {
    sample_rate: f64,
    fast: EnvelopeFollower,
    slow: EnvelopeFollower,
    phase: f64,
    position: usize,
    length: usize,
    amplitude: f64,
    decay: f64,
    holdoff: usize,
}

impl ChirpGenerator {
    fn new(sample_rate: f64) -> Self {
        let mut fast = EnvelopeFollower::new(sample_rate);
        fast.set_times(1.0, 30.0);
        let mut slow = EnvelopeFollower::new(sample_rate);
        slow.set_times(50.0, 200.0);
        let length = (CHIRP_SECONDS * sample_rate) as usize;
        Self {
            sample_rate,
            fast,
            slow,
            phase: 0.0,
            position: length,
            length,
            amplitude: 0.0,
            decay: (-1.0 / (0.04 * sample_rate)).exp(),
            holdoff: 0,
        }
    }

    #[inline]
    fn process(&mut self, x: f64, depth: f64) -> f64 {
        let fast = self.fast.process_level(x.abs());
        let slow = self.slow.process_level(x.abs());
        self.holdoff = self.holdoff.saturating_sub(1);
        if depth > 0.0 && self.holdoff == 0 && fast > 0.05 && fast > 1.8 * slow {
            self.position = 0;
            self.phase = 0.0;
            self.amplitude = fast.min(1.0) * depth * 0.3;
            self.holdoff = self.length;
        }
        if self.position >= self.length {
            return 0.0;
        }
        // triangle: 1 → 0 → 1 across the chirp
        let t = self.position as f64 / self.length as f64;
        let tri = (2.0 * t - 1.0).abs();
        let freq = CHIRP_LOW_HZ + (CHIRP_HIGH_HZ - CHIRP_LOW_HZ) * tri;
        self.phase = (self.phase + freq / self.sample_rate).fract();
        self.position += 1;
        self.amplitude = flush_denormal(self.amplitude * self.decay);
        (TAU * self.phase).sin() * self.amplitude
    }

    fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.position = self.length;
        self.amplitude = 0.0;
        self.holdoff = 0;
    }
}

/// Three-tank spring reverb with modal bank and chirp
#[derive(Debug, Clone)]
pub struct SpringReverb {
    sample_rate: f64,
    post: ReverbPost,
    tanks: [SpringTank; 3],
    modes: [BiquadTDF2; 10],
    chirp_gen: ChirpGenerator,
    feedback: f64,
    chirp: f64,
    drive: f64,
}

impl SpringReverb {
    pub fn new(sample_rate: f64) -> Self {
        let scale = sample_rate / 48_000.0;
        let scaled = |d: usize| ((d as f64 * scale).round() as usize).max(1);
        let tanks = std::array::from_fn(|t| {
            let length = SPRING_TANK[t] as f64 * scale;
            let mut lfo = Lfo::new(sample_rate);
            lfo.set_rate(0.9 + 0.31 * t as f64);
            lfo.set_phase(t as f64 / 3.0);
            SpringTank {
                line: DelayLine::new(length as usize + 16, Interpolation::Cubic),
                length,
                dispersion: SPRING_DISPERSION[t]
                    .map(|(d, g, di, gi)| NestedAllpass::new(scaled(d), g, scaled(di), gi)),
                damping: OnePole::open(),
                lfo,
            }
        });
        let modes = SPRING_MODES.map(|(f, q)| {
            BiquadTDF2::with_coeffs(BiquadCoeffs::bandpass(f, q, sample_rate))
        });

        let mut spring = Self {
            sample_rate,
            post: ReverbPost::new(sample_rate),
            tanks,
            modes,
            chirp_gen: ChirpGenerator::new(sample_rate),
            feedback: size_to_feedback(0.5),
            chirp: 0.0,
            drive: 0.0,
        };
        spring.set(&ReverbSettings::default());
        spring
    }

    pub fn set(&mut self, settings: &ReverbSettings) {
        self.feedback = size_to_feedback(settings.size);
        let a = one_pole_coeff(damping_to_cutoff(settings.damping), self.sample_rate);
        for tank in &mut self.tanks {
            tank.damping.set_coeff(a);
        }
        self.chirp = settings.chirp.clamp(0.0, 1.0);
        self.drive = settings.drive.clamp(0.0, 1.0);
        self.post.set(settings);
    }

    #[inline]
    pub fn process(&mut self, left: f64, right: f64) -> (f64, f64) {
        let input = self.post.delay(0.5 * (left + right));
        let input = drive_stage(input, self.drive);

        let t0 = self.tanks[0].process(input, self.feedback, self.chirp);
        let t1 = self.tanks[1].process(input, self.feedback, self.chirp);
        let t2 = self.tanks[2].process(-input, self.feedback, self.chirp);

        let mut modal_l = 0.0;
        let mut modal_r = 0.0;
        for (i, mode) in self.modes.iter_mut().enumerate() {
            let y = mode.process_f64(input) * MODE_GAIN;
            modal_l += y;
            modal_r += if i % 2 == 0 { y } else { -y };
        }

        let chirp = self.chirp_gen.process(input, self.chirp);

        let wet_l = 0.6 * t0 + 0.3 * t2 + modal_l + chirp;
        let wet_r = 0.6 * t1 - 0.3 * t2 + modal_r - chirp;
        self.post.finish(wet_l, wet_r)
    }

    pub fn tail_samples(&self) -> usize {
        let mean = self.tanks.iter().map(|t| t.length).sum::<f64>() / 3.0;
        // slowest mode: Q / (π·f) seconds per neper, ~14 nepers for 120 dB
        let (f, q) = SPRING_MODES[0];
        let modal = (14.0 * q / (std::f64::consts::PI * f) * self.sample_rate) as usize;
        decay_samples(self.feedback, mean + 200.0).max(modal)
            + self.post.predelay_samples()
            + self.chirp_gen.length
    }

    pub fn reset(&mut self) {
        self.post.reset();
        for tank in &mut self.tanks {
            tank.reset();
        }
        for mode in &mut self.modes {
            *mode = BiquadTDF2::with_coeffs(*mode.coeffs());
        }
        self.chirp_gen.reset();
    }
}
