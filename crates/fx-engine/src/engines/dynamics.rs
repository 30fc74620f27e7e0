//! Dynamics engines
//!
//! Compressors share the index layout threshold/ratio/attack/release at 0..3,
//! makeup at 5 and mix at 6. Gain is always computed in the log domain and
//! applied multiplicatively, so silence in is silence out.

use fx_core::{ParamDisplay, db_to_gain_f64, flush_denormal, gain_to_db_f64};
use fx_dsp::biquad::{Biquad, FilterType};
use fx_dsp::dynamics::{EnvelopeFollower, GainComputer, GainMode, SlidingPeak, time_coeff};
use fx_dsp::ring_buffer::{DelayLine, Interpolation};
use fx_dsp::Processor;

use crate::engine::StereoKernel;
use crate::params::{ParamBank, ParamSpec};
use crate::registry::EngineId;

/// Detector floor (−120 dB)
const LEVEL_FLOOR: f64 = 1e-6;

// ============ Classic Compressor ============

pub const CLASSIC_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Threshold", 0.7, ParamDisplay::Decibels),
    ParamSpec::new("Ratio", 0.2, ParamDisplay::Ratio),
    ParamSpec::new("Attack", 0.3, ParamDisplay::Millis { min: 0.1, max: 100.0 }),
    ParamSpec::new("Release", 0.4, ParamDisplay::Millis { min: 5.0, max: 2000.0 }),
    ParamSpec::new("Knee", 0.5, ParamDisplay::GainDb { min: 0.0, max: 12.0 }),
    ParamSpec::new("Makeup", 0.5, ParamDisplay::GainDb { min: -12.0, max: 12.0 }).audio(),
    ParamSpec::mix(1.0),
    ParamSpec::new("SC HPF", 0.0, ParamDisplay::Hertz { min: 20.0, max: 500.0 }),
];

/// Feed-forward peak compressor with a soft knee and a sidechain highpass
pub struct ClassicCompressor {
    detector: EnvelopeFollower,
    sidechain: [Biquad; 2],
    computer: GainComputer,
    gain_db: f64,
}

impl StereoKernel for ClassicCompressor {
    const ID: EngineId = EngineId::ClassicCompressor;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let hp = Biquad::highpass(20.0, sample_rate);
        Self {
            detector: EnvelopeFollower::new(sample_rate),
            sidechain: [hp.clone(), hp],
            computer: GainComputer::default(),
            gain_db: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.computer = GainComputer {
            threshold_db: params.get(0),
            ratio: params.get(1),
            knee_db: params.get(4),
            mode: GainMode::Compress,
        };
        self.detector.set_times(params.get(2), params.get(3));
        let hpf = params.get(7);
        for f in &mut self.sidechain {
            f.set_frequency(hpf);
        }
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let sl = self.sidechain[0].process_f64(left);
        let sr = self.sidechain[1].process_f64(right);
        let level = self.detector.process_level(sl.abs().max(sr.abs()));
        self.gain_db = self.computer.gain_db(gain_to_db_f64(level.max(LEVEL_FLOOR)));
        let gain = db_to_gain_f64(self.gain_db + params.get(5));
        (left * gain, right * gain)
    }

    fn reset(&mut self) {
        self.detector.reset();
        for f in &mut self.sidechain {
            f.reset();
        }
        self.gain_db = 0.0;
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        0
    }
}

// ============ Opto Compressor ============

pub const OPTO_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Threshold", 0.7, ParamDisplay::Decibels),
    ParamSpec::new("Ratio", 0.15, ParamDisplay::Ratio),
    ParamSpec::new("Attack", 0.3, ParamDisplay::Millis { min: 1.0, max: 100.0 }),
    ParamSpec::new("Release", 0.4, ParamDisplay::Millis { min: 40.0, max: 4000.0 }),
    ParamSpec::new("Emphasis", 0.0, ParamDisplay::GainDb { min: 0.0, max: 12.0 }),
    ParamSpec::new("Makeup", 0.5, ParamDisplay::GainDb { min: -12.0, max: 12.0 }).audio(),
    ParamSpec::mix(1.0),
];

/// Optical-cell compressor.
///
/// RMS detection with a wide knee. The gain cell releases fast at first and
/// slows the longer it has been held down, tracked by a one-second memory of
/// the applied reduction.
pub struct OptoCompressor {
    sample_rate: f64,
    emphasis: [Biquad; 2],
    mean_square: f64,
    rms_coeff: f64,
    computer: GainComputer,
    attack: f64,
    release_ms: f64,
    memory_coeff: f64,
    /// Applied reduction (dB, ≥ 0)
    reduction: f64,
    memory: f64,
}

impl StereoKernel for OptoCompressor {
    const ID: EngineId = EngineId::OptoCompressor;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let shelf = Biquad::new(FilterType::HighShelf, 2000.0, 0.707, 0.0, sample_rate);
        Self {
            sample_rate,
            emphasis: [shelf.clone(), shelf],
            mean_square: 0.0,
            rms_coeff: time_coeff(5.0, sample_rate),
            computer: GainComputer::default(),
            attack: time_coeff(10.0, sample_rate),
            release_ms: 300.0,
            memory_coeff: time_coeff(1000.0, sample_rate),
            reduction: 0.0,
            memory: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.computer = GainComputer {
            threshold_db: params.get(0),
            ratio: params.get(1),
            knee_db: 10.0,
            mode: GainMode::Compress,
        };
        self.attack = time_coeff(params.get(2), self.sample_rate);
        self.release_ms = params.get(3);
        let emphasis = params.get(4);
        for f in &mut self.emphasis {
            f.set(2000.0, 0.707, emphasis);
        }
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let sl = self.emphasis[0].process_f64(left);
        let sr = self.emphasis[1].process_f64(right);
        let power = 0.5 * (sl * sl + sr * sr);
        self.mean_square = flush_denormal(power + self.rms_coeff * (self.mean_square - power));
        let level_db = gain_to_db_f64(self.mean_square.sqrt().max(LEVEL_FLOOR));
        let target = -self.computer.gain_db(level_db);

        self.memory = flush_denormal(target + self.memory_coeff * (self.memory - target));
        let coeff = if target > self.reduction {
            self.attack
        } else {
            // up to 5x slower after sustained reduction
            let slow = 1.0 + 4.0 * (self.memory / 12.0).min(1.0);
            time_coeff(self.release_ms * slow, self.sample_rate)
        };
        self.reduction = flush_denormal(target + coeff * (self.reduction - target));
        let gain = db_to_gain_f64(params.get(5) - self.reduction);
        (left * gain, right * gain)
    }

    fn reset(&mut self) {
        for f in &mut self.emphasis {
            f.reset();
        }
        self.mean_square = 0.0;
        self.reduction = 0.0;
        self.memory = 0.0;
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        0
    }
}

// ============ Transient Shaper ============

pub const TRANSIENT_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Attack", 0.5, ParamDisplay::GainDb { min: -15.0, max: 15.0 }),
    ParamSpec::new("Sustain", 0.5, ParamDisplay::GainDb { min: -15.0, max: 15.0 }),
    ParamSpec::new("Speed", 0.5, ParamDisplay::Millis { min: 5.0, max: 200.0 }),
    ParamSpec::new("Output", 0.5, ParamDisplay::GainDb { min: -12.0, max: 12.0 }).audio(),
    ParamSpec::mix(1.0),
];

/// Level-independent transient shaper.
///
/// Compares a fast and a slow envelope: where the fast one leads, the attack
/// gain applies; where it trails, the sustain gain applies.
pub struct TransientShaper {
    fast: EnvelopeFollower,
    slow: EnvelopeFollower,
    gain_smooth: f64,
    gain_db: f64,
    attack_db: f64,
    sustain_db: f64,
}

/// Envelope difference (dB) for full attack/sustain gain
const SHAPER_SPAN_DB: f64 = 6.0;

impl StereoKernel for TransientShaper {
    const ID: EngineId = EngineId::TransientShaper;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            fast: EnvelopeFollower::new(sample_rate),
            slow: EnvelopeFollower::new(sample_rate),
            gain_smooth: time_coeff(1.0, sample_rate),
            gain_db: 0.0,
            attack_db: 0.0,
            sustain_db: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let speed = params.get(2);
        self.fast.set_times(0.5, speed);
        self.slow.set_times(speed * 0.5, speed * 4.0);
        self.attack_db = params.get(0);
        self.sustain_db = params.get(1);
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let level = left.abs().max(right.abs());
        let fast = self.fast.process_level(level).max(LEVEL_FLOOR);
        let slow = self.slow.process_level(level).max(LEVEL_FLOOR);
        let diff = gain_to_db_f64(fast) - gain_to_db_f64(slow);
        let target = if diff >= 0.0 {
            self.attack_db * (diff / SHAPER_SPAN_DB).min(1.0)
        } else {
            self.sustain_db * (-diff / SHAPER_SPAN_DB).min(1.0)
        };
        self.gain_db = target + self.gain_smooth * (self.gain_db - target);
        let gain = db_to_gain_f64(self.gain_db + params.get(3));
        (left * gain, right * gain)
    }

    fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.gain_db = 0.0;
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        0
    }
}

// ============ Noise Gate ============

pub const GATE_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Threshold", 0.3, ParamDisplay::Decibels),
    ParamSpec::new("Range", 0.0, ParamDisplay::GainDb { min: -90.0, max: 0.0 }),
    ParamSpec::new("Attack", 0.3, ParamDisplay::Millis { min: 0.1, max: 50.0 }),
    ParamSpec::new("Hold", 0.3, ParamDisplay::Millis { min: 1.0, max: 500.0 }),
    ParamSpec::new("Release", 0.4, ParamDisplay::Millis { min: 5.0, max: 2000.0 }),
    ParamSpec::new("Hysteresis", 0.3, ParamDisplay::GainDb { min: 0.0, max: 12.0 }),
    ParamSpec::mix(1.0),
];

/// Gate with hold and hysteresis; closes to `Range` rather than silence
pub struct NoiseGate {
    sample_rate: f64,
    detector: EnvelopeFollower,
    open: bool,
    hold_left: usize,
    hold_samples: usize,
    open_db: f64,
    close_db: f64,
    floor: f64,
    attack: f64,
    release: f64,
    gain: f64,
}

impl StereoKernel for NoiseGate {
    const ID: EngineId = EngineId::NoiseGate;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let mut detector = EnvelopeFollower::new(sample_rate);
        detector.set_times(0.1, 20.0);
        Self {
            sample_rate,
            detector,
            open: false,
            hold_left: 0,
            hold_samples: 0,
            open_db: -40.0,
            close_db: -44.0,
            floor: 0.0,
            attack: 0.0,
            release: 0.0,
            gain: 0.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.open_db = params.get(0);
        self.close_db = self.open_db - params.get(5);
        self.floor = db_to_gain_f64(params.get(1));
        self.attack = time_coeff(params.get(2), self.sample_rate);
        self.hold_samples = (params.get(3) * 0.001 * self.sample_rate) as usize;
        self.release = time_coeff(params.get(4), self.sample_rate);
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let level_db = gain_to_db_f64(self.detector.process_level(left.abs().max(right.abs())).max(LEVEL_FLOOR));
        if level_db >= self.open_db {
            self.open = true;
            self.hold_left = self.hold_samples;
        } else if level_db < self.close_db {
            if self.hold_left > 0 {
                self.hold_left -= 1;
            } else {
                self.open = false;
            }
        }
        let (target, coeff) = if self.open { (1.0, self.attack) } else { (self.floor, self.release) };
        self.gain = flush_denormal(target + coeff * (self.gain - target));
        (left * self.gain, right * self.gain)
    }

    fn reset(&mut self) {
        self.detector.reset();
        self.open = false;
        self.hold_left = 0;
        self.gain = self.floor;
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        0
    }
}

// ============ Mastering Limiter ============

/// Look-ahead (ms)
const LIMITER_LOOKAHEAD_MS: f64 = 5.0;

pub const LIMITER_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Threshold", 0.7, ParamDisplay::GainDb { min: -24.0, max: 0.0 }),
    ParamSpec::new("Ceiling", 0.9, ParamDisplay::GainDb { min: -12.0, max: 0.0 }).audio(),
    ParamSpec::new("Release", 0.4, ParamDisplay::Millis { min: 1.0, max: 1000.0 }),
    ParamSpec::new("Link", 1.0, ParamDisplay::Percent),
    ParamSpec::mix(1.0),
];

/// Moving average over a fixed window of gains
#[derive(Debug, Clone)]
struct Boxcar {
    values: Vec<f64>,
    pos: usize,
    sum: f64,
}

impl Boxcar {
    fn new(len: usize) -> Self {
        let len = len.max(1);
        Self {
            values: vec![1.0; len],
            pos: 0,
            sum: len as f64,
        }
    }

    #[inline]
    fn process(&mut self, x: f64) -> f64 {
        self.sum += x - self.values[self.pos];
        self.values[self.pos] = x;
        self.pos += 1;
        if self.pos == self.values.len() {
            self.pos = 0;
            // drop accumulated rounding once per lap
            self.sum = self.values.iter().sum();
        }
        self.sum / self.values.len() as f64
    }

    fn reset(&mut self) {
        self.values.fill(1.0);
        self.pos = 0;
        self.sum = self.values.len() as f64;
    }
}

/// Per-channel limiter gain path
#[derive(Debug, Clone)]
struct LimiterChannel {
    delay: DelayLine,
    hold: SlidingPeak,
    smooth: Boxcar,
    envelope: f64,
}

impl LimiterChannel {
    fn new(lookahead: usize) -> Self {
        Self {
            delay: DelayLine::new(lookahead + 1, Interpolation::Linear),
            // one longer than the delay so every averaged gain covers the outgoing sample
            hold: SlidingPeak::new(lookahead + 1),
            smooth: Boxcar::new(lookahead),
            envelope: 1.0,
        }
    }

    /// `reduction` is the level over threshold as a factor (≥ 1)
    #[inline]
    fn gain(&mut self, reduction: f64, release: f64) -> f64 {
        let target = 1.0 / self.hold.process(reduction).max(1.0);
        self.envelope = if target < self.envelope {
            target
        } else {
            target + release * (self.envelope - target)
        };
        self.smooth.process(self.envelope)
    }

    fn reset(&mut self) {
        self.delay.reset();
        self.hold.reset();
        self.smooth.reset();
        self.envelope = 1.0;
    }
}

/// Brickwall look-ahead limiter.
///
/// The required gain is held for the look-ahead window and then averaged over
/// the same window, so the gain has fully settled by the time the peak leaves
/// the delay line.
pub struct MasteringLimiter {
    sample_rate: f64,
    lookahead: usize,
    channels: [LimiterChannel; 2],
    threshold: f64,
    release: f64,
    link: f64,
}

impl StereoKernel for MasteringLimiter {
    const ID: EngineId = EngineId::MasteringLimiter;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        let lookahead = ((LIMITER_LOOKAHEAD_MS * 0.001 * sample_rate) as usize).max(1);
        Self {
            sample_rate,
            lookahead,
            channels: [LimiterChannel::new(lookahead), LimiterChannel::new(lookahead)],
            threshold: 1.0,
            release: 0.0,
            link: 1.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        self.threshold = db_to_gain_f64(params.get(0));
        self.release = time_coeff(params.get(2), self.sample_rate);
        self.link = params.get(3) * 0.01;
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let rl = left.abs() / self.threshold;
        let rr = right.abs() / self.threshold;
        let linked = rl.max(rr);
        let rl = rl + (linked - rl) * self.link;
        let rr = rr + (linked - rr) * self.link;

        // threshold maps onto the ceiling
        let makeup = db_to_gain_f64(params.get(1)) / self.threshold;
        let [cl, cr] = &mut self.channels;
        let gl = cl.gain(rl, self.release);
        let gr = cr.gain(rr, self.release);
        let dl = cl.delay.process(left as f32, self.lookahead as f32) as f64;
        let dr = cr.delay.process(right as f32, self.lookahead as f32) as f64;
        (dl * gl * makeup, dr * gr * makeup)
    }

    fn reset(&mut self) {
        for c in &mut self.channels {
            c.reset();
        }
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        self.lookahead * 2
    }

    fn latency(&self) -> usize {
        self.lookahead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, KernelEngine};
    use fx_core::ParameterMap;
    use std::f32::consts::PI;

    const SR: f64 = 48000.0;

    fn sine(freq: f32, amp: f32, start: usize, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * (start + i) as f32 / SR as f32).sin() * amp)
            .collect()
    }

    fn peak_after(engine: &mut dyn Engine, amp: f32, seconds: f64) -> f32 {
        let blocks = (seconds * SR / 480.0) as usize;
        let mut peak = 0.0f32;
        for b in 0..blocks {
            let mut l = sine(1000.0, amp, b * 480, 480);
            let mut r = l.clone();
            {
                let mut block: [&mut [f32]; 2] = [&mut l, &mut r];
                engine.process(&mut block);
            }
            if b + 10 >= blocks {
                peak = l.iter().fold(peak, |p, x| p.max(x.abs()));
            }
        }
        peak
    }

    #[test]
    fn test_classic_reduces_dynamic_range() {
        let mut comp = KernelEngine::<ClassicCompressor>::new(SR, 480);
        comp.apply_parameters(&ParameterMap::new().with(0, 0.3).with(1, 0.6));
        let quiet = peak_after(&mut comp, 0.2, 0.5);
        let loud = peak_after(&mut comp, 0.8, 0.5);
        assert!(loud / quiet < 2.0, "loud {loud} quiet {quiet}");
    }

    #[test]
    fn test_opto_reduces_loud_input() {
        let mut comp = KernelEngine::<OptoCompressor>::new(SR, 480);
        let peak = peak_after(&mut comp, 0.9, 1.0);
        assert!(peak < 0.8, "peak {peak}");
    }

    #[test]
    fn test_gate_closes_below_threshold() {
        let mut gate = KernelEngine::<NoiseGate>::new(SR, 480);
        let open = peak_after(&mut gate, 0.5, 0.5);
        assert!(open > 0.45);
        // −60 dBFS is below the −38 dB threshold
        let closed = peak_after(&mut gate, 0.001, 1.5);
        assert!(closed < 1e-5, "closed {closed}");
    }

    #[test]
    fn test_limiter_holds_ceiling() {
        let mut limiter = KernelEngine::<MasteringLimiter>::new(SR, 480);
        let ceiling = db_to_gain_f64(-1.2) as f32;
        let peak = peak_after(&mut limiter, 1.0, 0.5);
        assert!(peak <= ceiling + 1e-3, "peak {peak}");
        assert_eq!(limiter.latency_samples(), 240);
    }

    #[test]
    fn test_boxcar_settles_to_input() {
        let mut boxcar = Boxcar::new(8);
        let mut y = 0.0;
        for _ in 0..8 {
            y = boxcar.process(0.5);
        }
        assert!((y - 0.5).abs() < 1e-12);
    }
}
