//! Equalizers: dynamic band, three-band parametric, passive-style console EQ

use fx_core::{ParamDisplay, db_to_gain_f64};
use fx_dsp::biquad::FilterType;
use fx_dsp::dynamic_eq::{DynamicEqBand, DynamicEqSettings, LOOKAHEAD};
use fx_dsp::dynamics::GainMode;

use super::{StereoBiquad, saturate_biased};
use crate::engine::StereoKernel;
use crate::params::{ParamBank, ParamSpec};
use crate::registry::EngineId;

/// Seconds for biquad ringing to fall well below −120 dB
const EQ_TAIL_SECONDS: f64 = 0.1;

// ============ Dynamic EQ ============

pub const DYNAMIC_EQ_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Frequency", 0.5, ParamDisplay::Frequency),
    ParamSpec::new("Threshold", 0.5, ParamDisplay::Decibels),
    ParamSpec::new("Ratio", 0.5, ParamDisplay::Ratio),
    ParamSpec::new("Attack", 0.5, ParamDisplay::Millis { min: 0.1, max: 100.0 }),
    ParamSpec::new("Release", 0.5, ParamDisplay::Millis { min: 5.0, max: 2000.0 }),
    ParamSpec::new("Q", 0.5, ParamDisplay::Scale { min: 0.2, max: 20.0 }),
    ParamSpec::new("Band Gain", 0.5, ParamDisplay::GainDb { min: -18.0, max: 18.0 }),
    ParamSpec::new("Mode", 0.0, ParamDisplay::Choice(2)).step(),
    ParamSpec::mix(1.0),
];

/// One look-ahead dynamic band per channel
pub struct DynamicEq {
    sample_rate: f64,
    bands: [DynamicEqBand; 2],
}

impl DynamicEq {
    fn settings(params: &ParamBank) -> DynamicEqSettings {
        DynamicEqSettings {
            frequency: params.get(0),
            threshold_db: params.get(1),
            ratio: params.get(2),
            attack_ms: params.get(3),
            release_ms: params.get(4),
            q: params.get(5),
            band_gain_db: params.get(6),
            mode: if params.choice(7) == 1 { GainMode::Expand } else { GainMode::Compress },
        }
    }
}

impl StereoKernel for DynamicEq {
    const ID: EngineId = EngineId::DynamicEq;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            sample_rate,
            bands: [DynamicEqBand::new(sample_rate), DynamicEqBand::new(sample_rate)],
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let settings = Self::settings(params);
        for band in &mut self.bands {
            band.set(settings);
        }
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let [bl, br] = &mut self.bands;
        (bl.process(left as f32) as f64, br.process(right as f32) as f64)
    }

    fn reset(&mut self) {
        for band in &mut self.bands {
            band.reset();
        }
    }

    fn tail_samples(&self, params: &ParamBank) -> usize {
        // release of the gain plus band ringing
        let release = params.get(4) * 0.001 * 5.0;
        LOOKAHEAD + ((release + EQ_TAIL_SECONDS) * self.sample_rate) as usize
    }

    fn latency(&self) -> usize {
        LOOKAHEAD
    }
}

// ============ Parametric EQ ============

pub const PARAMETRIC_EQ_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Low Freq", 0.5, ParamDisplay::Hertz { min: 20.0, max: 1000.0 }),
    ParamSpec::new("Low Gain", 0.5, ParamDisplay::GainDb { min: -15.0, max: 15.0 }),
    ParamSpec::new("Mid Freq", 0.5, ParamDisplay::Frequency),
    ParamSpec::new("Mid Gain", 0.5, ParamDisplay::GainDb { min: -15.0, max: 15.0 }),
    ParamSpec::new("Mid Q", 0.5, ParamDisplay::Scale { min: 0.2, max: 10.0 }),
    ParamSpec::new("High Freq", 0.5, ParamDisplay::Hertz { min: 1000.0, max: 20000.0 }),
    ParamSpec::new("High Gain", 0.5, ParamDisplay::GainDb { min: -15.0, max: 15.0 }),
    ParamSpec::new("Output", 0.5, ParamDisplay::GainDb { min: -12.0, max: 12.0 }).audio(),
    ParamSpec::mix(1.0),
];

/// Low shelf, mid peak, high shelf
pub struct ParametricEq {
    sample_rate: f64,
    low: StereoBiquad,
    mid: StereoBiquad,
    high: StereoBiquad,
}

impl StereoKernel for ParametricEq {
    const ID: EngineId = EngineId::ParametricEq;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            sample_rate,
            low: StereoBiquad::new(FilterType::LowShelf, 140.0, 0.707, 0.0, sample_rate),
            mid: StereoBiquad::new(FilterType::Peaking, 630.0, 1.4, 0.0, sample_rate),
            high: StereoBiquad::new(FilterType::HighShelf, 4500.0, 0.707, 0.0, sample_rate),
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let top = self.sample_rate * 0.45;
        self.low.set(params.get(0), 0.707, params.get(1));
        self.mid.set(params.get(2).min(top), params.get(4), params.get(3));
        self.high.set(params.get(5).min(top), 0.707, params.get(6));
    }

    #[inline]
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (l, r) = self.low.process(left, right);
        let (l, r) = self.mid.process(l, r);
        let (l, r) = self.high.process(l, r);
        let out = db_to_gain_f64(params.get(7));
        (l * out, r * out)
    }

    fn reset(&mut self) {
        self.low.reset();
        self.mid.reset();
        self.high.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        (EQ_TAIL_SECONDS * self.sample_rate) as usize
    }
}

// ============ Vintage Console EQ ============

const CONSOLE_LOW_FREQS: [f64; 4] = [20.0, 30.0, 60.0, 100.0];
const CONSOLE_HIGH_FREQS: [f64; 6] = [3000.0, 4000.0, 5000.0, 8000.0, 10000.0, 12000.0];
const CONSOLE_ATTEN_FREQ: f64 = 10000.0;

pub const CONSOLE_EQ_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("Low Freq", 0.5, ParamDisplay::Choice(4)).step(),
    ParamSpec::new("Low Boost", 0.5, ParamDisplay::GainDb { min: 0.0, max: 12.0 }),
    ParamSpec::new("Low Atten", 0.5, ParamDisplay::GainDb { min: 0.0, max: 12.0 }),
    ParamSpec::new("High Freq", 0.5, ParamDisplay::Choice(6)).step(),
    ParamSpec::new("High Boost", 0.5, ParamDisplay::GainDb { min: 0.0, max: 12.0 }),
    ParamSpec::new("Bandwidth", 0.5, ParamDisplay::Scale { min: 0.3, max: 3.0 }),
    ParamSpec::new("High Atten", 0.5, ParamDisplay::GainDb { min: 0.0, max: 12.0 }),
    ParamSpec::new("Drive", 0.5, ParamDisplay::Percent),
    ParamSpec::mix(1.0),
];

/// Passive-style program EQ.
///
/// Low boost and attenuation shelves sit at slightly different corners, so
/// using both at once gives the familiar dip above a low-end lift. The output
/// stage is a gently biased tube saturator.
pub struct VintageConsoleEq {
    sample_rate: f64,
    low_boost: StereoBiquad,
    low_atten: StereoBiquad,
    high_boost: StereoBiquad,
    high_atten: StereoBiquad,
    drive: f64,
}

impl StereoKernel for VintageConsoleEq {
    const ID: EngineId = EngineId::VintageConsoleEq;

    fn new(sample_rate: f64, _max_block: usize) -> Self {
        Self {
            sample_rate,
            low_boost: StereoBiquad::new(FilterType::LowShelf, 60.0, 0.6, 0.0, sample_rate),
            low_atten: StereoBiquad::new(FilterType::LowShelf, 120.0, 0.6, 0.0, sample_rate),
            high_boost: StereoBiquad::new(FilterType::Peaking, 8000.0, 1.0, 0.0, sample_rate),
            high_atten: StereoBiquad::new(FilterType::HighShelf, CONSOLE_ATTEN_FREQ, 0.707, 0.0, sample_rate),
            drive: 1.0,
        }
    }

    fn control(&mut self, params: &ParamBank) {
        let top = self.sample_rate * 0.45;
        let low = CONSOLE_LOW_FREQS[params.choice(0).min(CONSOLE_LOW_FREQS.len() - 1)];
        let high = CONSOLE_HIGH_FREQS[params.choice(3).min(CONSOLE_HIGH_FREQS.len() - 1)];
        self.low_boost.set(low, 0.6, params.get(1));
        self.low_atten.set(low * 2.0, 0.6, -params.get(2));
        self.high_boost.set(high.min(top), params.get(5), params.get(4));
        self.high_atten.set(CONSOLE_ATTEN_FREQ.min(top), 0.707, -params.get(6));
        self.drive = 0.1 + 1.5 * params.get(7) * 0.01;
    }

    #[inline]
    fn tick(&mut self, _params: &ParamBank, left: f64, right: f64) -> (f64, f64) {
        let (l, r) = self.low_boost.process(left, right);
        let (l, r) = self.low_atten.process(l, r);
        let (l, r) = self.high_boost.process(l, r);
        let (l, r) = self.high_atten.process(l, r);
        (
            saturate_biased(l, self.drive, 0.1),
            saturate_biased(r, self.drive, 0.1),
        )
    }

    fn reset(&mut self) {
        self.low_boost.reset();
        self.low_atten.reset();
        self.high_boost.reset();
        self.high_atten.reset();
    }

    fn tail_samples(&self, _params: &ParamBank) -> usize {
        // 20 Hz shelves ring longest
        (4.0 * EQ_TAIL_SECONDS * self.sample_rate) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, KernelEngine};
    use fx_core::ParameterMap;
    use std::f64::consts::PI;

    fn sine_rms(engine: &mut dyn Engine, freq: f64, amp: f64) -> f64 {
        let sr = 48000.0;
        let mut sum = 0.0;
        let mut count = 0;
        for b in 0..200 {
            let mut l: Vec<f32> = (0..240)
                .map(|i| ((2.0 * PI * freq * (b * 240 + i) as f64 / sr).sin() * amp) as f32)
                .collect();
            let mut r = l.clone();
            {
                let mut block: [&mut [f32]; 2] = [&mut l, &mut r];
                engine.process(&mut block);
            }
            if b >= 100 {
                sum += l.iter().map(|x| (*x as f64).powi(2)).sum::<f64>();
                count += l.len();
            }
        }
        (sum / count as f64).sqrt()
    }

    #[test]
    fn test_parametric_flat_at_defaults() {
        let mut eq = KernelEngine::<ParametricEq>::new(48000.0, 240);
        let rms = sine_rms(&mut eq, 1000.0, 0.5);
        assert!((rms - 0.5 / 2f64.sqrt()).abs() < 1e-3, "rms {rms}");
    }

    #[test]
    fn test_parametric_mid_boost() {
        let mut eq = KernelEngine::<ParametricEq>::new(48000.0, 240);
        // mid at ~632 Hz, +12 dB
        eq.apply_parameters(&ParameterMap::new().with(3, 0.9));
        let rms = sine_rms(&mut eq, 632.0, 0.1);
        let gain_db = 20.0 * (rms / (0.1 / 2f64.sqrt())).log10();
        assert!((gain_db - 12.0).abs() < 0.5, "gain {gain_db}");
    }

    #[test]
    fn test_dynamic_eq_reports_lookahead() {
        let eq = KernelEngine::<DynamicEq>::new(48000.0, 256);
        assert_eq!(eq.latency_samples(), LOOKAHEAD);
    }
}
