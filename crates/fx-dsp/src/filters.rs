//! Filter primitives beyond the biquad
//!
//! - `StateVariableFilter`: topology-preserving (TPT) SVF, all outputs
//! - `LadderFilter`: four-stage ladder with tanh-saturated feedback
//! - `OnePole`: lowpass/highpass one-pole with `1 − exp(−2π·fc/fs)` coefficient
//! - `ThiranAllpass`: first-order fractional-delay allpass
//! - `FirstOrderAllpass`: frequency-tuned allpass (phasers, dispersion)
//! - `SchroederAllpass` / `NestedAllpass`: delay-based diffusers

use std::f64::consts::PI;

use fx_core::{Sample, flush_denormal, sanitize_state};

use crate::ring_buffer::RingBuffer;
use crate::{MonoProcessor, Processor};

// ============ TPT State Variable Filter ============

/// Simultaneous SVF outputs
#[derive(Debug, Clone, Copy, Default)]
pub struct SvfOutputs {
    pub low: f64,
    pub band: f64,
    pub high: f64,
    pub notch: f64,
}

/// Which SVF output a mono path uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SvfMode {
    #[default]
    Lowpass,
    Bandpass,
    Highpass,
    Notch,
}

/// Topology-preserving state-variable filter (Zavalishin)
#[derive(Debug, Clone)]
pub struct StateVariableFilter {
    ic1eq: f64,
    ic2eq: f64,
    a1: f64,
    a2: f64,
    a3: f64,
    k: f64,
    freq: f64,
    q: f64,
    sample_rate: f64,
    mode: SvfMode,
    bypass: bool,
}

impl StateVariableFilter {
    pub fn new(freq: f64, q: f64, sample_rate: f64) -> Self {
        let mut f = Self {
            ic1eq: 0.0,
            ic2eq: 0.0,
            a1: 1.0,
            a2: 0.0,
            a3: 0.0,
            k: 1.0,
            freq: -1.0,
            q: -1.0,
            sample_rate,
            mode: SvfMode::Lowpass,
            bypass: false,
        };
        f.set(freq, q);
        f
    }

    pub fn set_mode(&mut self, mode: SvfMode) {
        self.mode = mode;
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        let (freq, q) = (self.freq, self.q);
        self.freq = -1.0;
        self.set(freq, q);
    }

    /// Retune; skipped when within 0.5 Hz / 0.005 Q of the current design
    pub fn set(&mut self, freq: f64, q: f64) {
        if (freq - self.freq).abs() <= 0.5 && (q - self.q).abs() <= 0.005 {
            return;
        }
        self.freq = freq;
        self.q = q;
        self.bypass = !freq.is_finite() || !q.is_finite();
        if self.bypass {
            return;
        }
        let fc = freq.clamp(5.0, self.sample_rate * 0.49);
        let g = (PI * fc / self.sample_rate).tan();
        self.k = 1.0 / q.max(0.05);
        self.a1 = 1.0 / (1.0 + g * (g + self.k));
        self.a2 = g * self.a1;
        self.a3 = g * self.a2;
    }

    #[inline(always)]
    pub fn process_all(&mut self, x: f64) -> SvfOutputs {
        if self.bypass {
            return SvfOutputs {
                low: x,
                band: x,
                high: x,
                notch: x,
            };
        }
        let v3 = x - self.ic2eq;
        let v1 = self.a1 * self.ic1eq + self.a2 * v3;
        let v2 = self.ic2eq + self.a2 * self.ic1eq + self.a3 * v3;
        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;
        SvfOutputs {
            low: v2,
            band: v1,
            high: x - self.k * v1 - v2,
            notch: x - self.k * v1,
        }
    }

    #[inline(always)]
    pub fn process_f64(&mut self, x: f64) -> f64 {
        let out = self.process_all(x);
        match self.mode {
            SvfMode::Lowpass => out.low,
            SvfMode::Bandpass => out.band,
            SvfMode::Highpass => out.high,
            SvfMode::Notch => out.notch,
        }
    }

    /// Normalized bandpass (unity peak)
    #[inline(always)]
    pub fn process_band_normalized(&mut self, x: f64) -> f64 {
        let k = if self.bypass { 1.0 } else { self.k };
        self.process_all(x).band * k
    }

    #[inline]
    pub fn nudge(&mut self) {
        self.ic1eq = sanitize_state(self.ic1eq);
        self.ic2eq = sanitize_state(self.ic2eq);
    }
}

impl Processor for StateVariableFilter {
    fn reset(&mut self) {
        self.ic1eq = 0.0;
        self.ic2eq = 0.0;
    }
}

impl MonoProcessor for StateVariableFilter {
    #[inline(always)]
    fn process_sample(&mut self, input: Sample) -> Sample {
        self.process_f64(input as f64) as Sample
    }
}

// ============ Ladder Filter ============

/// Four cascaded one-poles with saturating global feedback
#[derive(Debug, Clone)]
pub struct LadderFilter {
    stage: [f64; 4],
    g: f64,
    k: f64,
    drive: f64,
    sample_rate: f64,
    freq: f64,
}

impl LadderFilter {
    /// Feedback ceiling, kept below the self-oscillation threshold
    pub const MAX_FEEDBACK: f64 = 3.6;

    pub fn new(sample_rate: f64) -> Self {
        let mut f = Self {
            stage: [0.0; 4],
            g: 0.0,
            k: 0.0,
            drive: 1.0,
            sample_rate,
            freq: -1.0,
        };
        f.set_cutoff(1000.0);
        f
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        let freq = self.freq;
        self.freq = -1.0;
        self.set_cutoff(freq);
    }

    pub fn set_cutoff(&mut self, freq: f64) {
        if (freq - self.freq).abs() <= 0.5 {
            return;
        }
        self.freq = freq;
        let fc = if freq.is_finite() { freq.clamp(10.0, self.sample_rate * 0.45) } else { 1000.0 };
        self.g = (1.0 - (-2.0 * PI * fc / self.sample_rate).exp()).min(0.7);
    }

    /// Resonance in `[0, 1]`
    pub fn set_resonance(&mut self, resonance: f64) {
        self.k = resonance.clamp(0.0, 1.0) * Self::MAX_FEEDBACK;
    }

    /// Input drive gain (≥ 1 saturates harder)
    pub fn set_drive(&mut self, drive: f64) {
        self.drive = drive.clamp(0.1, 20.0);
    }

    #[inline(always)]
    pub fn process_f64(&mut self, x: f64) -> f64 {
        let feedback = self.k * self.stage[3];
        // Input gain offsets the passband loss that resonance causes
        let u = (self.drive * x * (1.0 + 0.5 * self.k) - feedback).tanh() / self.drive.max(1.0).sqrt();
        self.stage[0] += self.g * (u - self.stage[0]);
        self.stage[1] += self.g * (self.stage[0] - self.stage[1]);
        self.stage[2] += self.g * (self.stage[1] - self.stage[2]);
        self.stage[3] += self.g * (self.stage[2] - self.stage[3]);
        self.stage[3]
    }

    #[inline]
    pub fn nudge(&mut self) {
        for s in &mut self.stage {
            *s = sanitize_state(*s);
        }
    }
}

impl Processor for LadderFilter {
    fn reset(&mut self) {
        self.stage = [0.0; 4];
    }
}

impl MonoProcessor for LadderFilter {
    #[inline(always)]
    fn process_sample(&mut self, input: Sample) -> Sample {
        self.process_f64(input as f64) as Sample
    }
}

// ============ One-Pole ============

/// One-pole smoothing coefficient for a cutoff
#[inline]
pub fn one_pole_coeff(cutoff_hz: f64, sample_rate: f64) -> f64 {
    (1.0 - (-2.0 * PI * cutoff_hz.max(0.0) / sample_rate).exp()).clamp(0.0, 1.0)
}

/// One-pole lowpass; `highpass` returns the complement
#[derive(Debug, Clone)]
pub struct OnePole {
    a: f64,
    z: f64,
}

impl OnePole {
    pub fn new(cutoff_hz: f64, sample_rate: f64) -> Self {
        Self {
            a: one_pole_coeff(cutoff_hz, sample_rate),
            z: 0.0,
        }
    }

    /// Pass-through (coefficient 1)
    pub fn open() -> Self {
        Self { a: 1.0, z: 0.0 }
    }

    #[inline]
    pub fn set_cutoff(&mut self, cutoff_hz: f64, sample_rate: f64) {
        self.a = one_pole_coeff(cutoff_hz, sample_rate);
    }

    #[inline]
    pub fn set_coeff(&mut self, a: f64) {
        self.a = a.clamp(0.0, 1.0);
    }

    #[inline(always)]
    pub fn lowpass(&mut self, x: f64) -> f64 {
        self.z += self.a * (x - self.z);
        self.z = flush_denormal(self.z);
        self.z
    }

    #[inline(always)]
    pub fn highpass(&mut self, x: f64) -> f64 {
        x - self.lowpass(x)
    }

    #[inline]
    pub fn state(&self) -> f64 {
        self.z
    }

    pub fn reset(&mut self) {
        self.z = 0.0;
    }
}

// ============ Allpass Family ============

/// First-order Thiran allpass for fractional delay `d` (best in 0.5..1.5)
#[derive(Debug, Clone, Default)]
pub struct ThiranAllpass {
    a: f64,
    x1: f64,
    y1: f64,
}

impl ThiranAllpass {
    pub fn new(delay: f64) -> Self {
        let mut ap = Self::default();
        ap.set_delay(delay);
        ap
    }

    #[inline]
    pub fn set_delay(&mut self, delay: f64) {
        let d = delay.clamp(0.1, 10.0);
        self.a = (1.0 - d) / (1.0 + d);
    }

    #[inline(always)]
    pub fn process(&mut self, x: f64) -> f64 {
        let y = self.a * x + self.x1 - self.a * self.y1;
        self.x1 = x;
        self.y1 = flush_denormal(y);
        self.y1
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.y1 = 0.0;
    }
}

/// First-order allpass tuned by break frequency
#[derive(Debug, Clone, Default)]
pub struct FirstOrderAllpass {
    a: f64,
    x1: f64,
    y1: f64,
}

impl FirstOrderAllpass {
    #[inline]
    pub fn set_frequency(&mut self, freq: f64, sample_rate: f64) {
        let t = (PI * freq.clamp(1.0, sample_rate * 0.49) / sample_rate).tan();
        self.a = (t - 1.0) / (t + 1.0);
    }

    #[inline]
    pub fn set_coeff(&mut self, a: f64) {
        self.a = a.clamp(-0.999, 0.999);
    }

    #[inline(always)]
    pub fn process(&mut self, x: f64) -> f64 {
        let y = self.a * x + self.x1 - self.a * self.y1;
        self.x1 = x;
        self.y1 = flush_denormal(y);
        self.y1
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.y1 = 0.0;
    }
}

/// Delay-based Schroeder allpass: `H = (−g + z^−D) / (1 − g·z^−D)`
#[derive(Debug, Clone)]
pub struct SchroederAllpass {
    ring: RingBuffer,
    delay: usize,
    gain: f64,
}

impl SchroederAllpass {
    /// `max_delay` bounds later [`set_delay`](Self::set_delay) calls
    pub fn new(delay: usize, max_delay: usize, gain: f64) -> Self {
        Self {
            ring: RingBuffer::new(max_delay.max(delay) + 4),
            delay: delay.max(1),
            gain: gain.clamp(-0.98, 0.98),
        }
    }

    pub fn set_delay(&mut self, delay: usize) {
        self.delay = delay.clamp(1, self.ring.capacity() - 2);
    }

    #[inline(always)]
    pub fn process(&mut self, x: f64) -> f64 {
        let s = self.ring.read(self.delay - 1) as f64;
        let v = x + self.gain * s;
        self.ring.push(flush_denormal(v) as f32);
        s - self.gain * v
    }

    pub fn reset(&mut self) {
        self.ring.clear();
    }
}

/// Allpass whose delay path contains a second allpass
#[derive(Debug, Clone)]
pub struct NestedAllpass {
    ring: RingBuffer,
    delay: usize,
    gain: f64,
    inner: SchroederAllpass,
}

impl NestedAllpass {
    pub fn new(delay: usize, gain: f64, inner_delay: usize, inner_gain: f64) -> Self {
        Self {
            ring: RingBuffer::new(delay + 4),
            delay: delay.max(1),
            gain: gain.clamp(-0.98, 0.98),
            inner: SchroederAllpass::new(inner_delay, inner_delay, inner_gain),
        }
    }

    #[inline(always)]
    pub fn process(&mut self, x: f64) -> f64 {
        let s = self.inner.process(self.ring.read(self.delay - 1) as f64);
        let v = x + self.gain * s;
        self.ring.push(flush_denormal(v) as f32);
        s - self.gain * v
    }

    pub fn reset(&mut self) {
        self.ring.clear();
        self.inner.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f64 = 48000.0;

    fn sine_peak<F: FnMut(f64) -> f64>(mut f: F, freq: f64) -> f64 {
        let mut peak: f64 = 0.0;
        for i in 0..24000 {
            let y = f((2.0 * PI * freq * i as f64 / SAMPLE_RATE).sin());
            if i > 12000 {
                peak = peak.max(y.abs());
            }
        }
        peak
    }

    #[test]
    fn test_svf_lowpass_and_highpass() {
        let mut lp = StateVariableFilter::new(1000.0, 0.707, SAMPLE_RATE);
        assert!(sine_peak(|x| lp.process_f64(x), 100.0) > 0.95);
        let mut hp = StateVariableFilter::new(1000.0, 0.707, SAMPLE_RATE);
        hp.set_mode(SvfMode::Highpass);
        assert!(sine_peak(|x| hp.process_f64(x), 100.0) < 0.05);
    }

    #[test]
    fn test_svf_bandpass_normalized_peak() {
        let mut bp = StateVariableFilter::new(2000.0, 4.0, SAMPLE_RATE);
        let peak = sine_peak(|x| bp.process_band_normalized(x), 2000.0);
        assert!((peak - 1.0).abs() < 0.02);
    }

    #[test]
    fn test_ladder_decays_at_max_resonance() {
        let mut ladder = LadderFilter::new(SAMPLE_RATE);
        ladder.set_cutoff(800.0);
        ladder.set_resonance(1.0);
        ladder.process_f64(1.0);
        let mut tail = 0.0f64;
        for i in 0..(SAMPLE_RATE as usize * 3) {
            let y = ladder.process_f64(0.0);
            if i > SAMPLE_RATE as usize * 2 {
                tail = tail.max(y.abs());
            }
        }
        assert!(tail < 1e-6);
    }

    #[test]
    fn test_one_pole_coefficient() {
        let a = one_pole_coeff(1000.0, SAMPLE_RATE);
        assert!((a - (1.0 - (-2.0 * PI * 1000.0 / SAMPLE_RATE).exp())).abs() < 1e-12);
        let mut open = OnePole::open();
        assert_eq!(open.lowpass(0.3), 0.3);
    }

    #[test]
    fn test_schroeder_allpass_preserves_energy() {
        let mut ap = SchroederAllpass::new(113, 113, 0.7);
        let mut energy = 0.0;
        for i in 0..20000 {
            let y = ap.process(if i == 0 { 1.0 } else { 0.0 });
            energy += y * y;
        }
        assert!((energy - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_nested_allpass_preserves_energy() {
        let mut ap = NestedAllpass::new(211, 0.6, 37, 0.5);
        let mut energy = 0.0;
        for i in 0..40000 {
            let y = ap.process(if i == 0 { 1.0 } else { 0.0 });
            energy += y * y;
        }
        assert!((energy - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_thiran_group_delay() {
        let mut ap = ThiranAllpass::new(0.5);
        // DC passes with unity gain
        let mut y = 0.0;
        for _ in 0..1000 {
            y = ap.process(1.0);
        }
        assert!((y - 1.0).abs() < 1e-9);
    }
}
