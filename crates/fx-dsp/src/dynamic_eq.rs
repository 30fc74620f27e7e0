//! Single-band dynamic EQ
//!
//! ## Algorithm
//! 1. DC blocker on the input
//! 2. Bandpass biquad extracts the controlled band
//! 3. Sliding peak over the look-ahead window, then attack/release smoothing
//! 4. Gain lookup (4096 entries over levels `[0, 2]`, linear interpolation)
//! 5. One-pole gain smoothing
//! 6. `out = dry + band · (g − 1)`, both paths delayed by the look-ahead
//!
//! The lookup table is rebuilt only when threshold, ratio or mode change.

use fx_core::{DcBlocker, Sample, db_to_gain_f64, flush_denormal, gain_to_db_f64};

use crate::biquad::{BiquadCoeffs, BiquadTDF2};
use crate::dynamics::{GainComputer, GainMode, SlidingPeak, time_coeff};
use crate::Processor;
use crate::ring_buffer::RingBuffer;

/// Look-ahead applied to both dry and band paths (samples)
pub const LOOKAHEAD: usize = 64;
/// Gain table resolution
pub const LUT_SIZE: usize = 4096;
/// Highest detector level covered by the table
pub const LUT_MAX_LEVEL: f64 = 2.0;
/// Gain smoothing time constant (ms)
const GAIN_SMOOTH_MS: f64 = 10.0;

/// Band settings in physical units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicEqSettings {
    pub frequency: f64,
    pub q: f64,
    pub threshold_db: f64,
    pub ratio: f64,
    pub attack_ms: f64,
    pub release_ms: f64,
    /// Static gain applied to the band on top of the dynamic gain
    pub band_gain_db: f64,
    pub mode: GainMode,
}

impl Default for DynamicEqSettings {
    fn default() -> Self {
        Self {
            frequency: 1000.0,
            q: 1.0,
            threshold_db: -20.0,
            ratio: 4.0,
            attack_ms: 10.0,
            release_ms: 100.0,
            band_gain_db: 0.0,
            mode: GainMode::Compress,
        }
    }
}

/// One dynamic band for a single channel
#[derive(Debug, Clone)]
pub struct DynamicEqBand {
    sample_rate: f64,
    settings: DynamicEqSettings,
    dc: DcBlocker,
    band: BiquadTDF2,
    dry_delay: RingBuffer,
    band_delay: RingBuffer,
    peak: SlidingPeak,
    attack_coeff: f64,
    release_coeff: f64,
    envelope: f64,
    lut: Vec<f64>,
    static_gain: f64,
    gain: f64,
    gain_coeff: f64,
}

impl DynamicEqBand {
    pub fn new(sample_rate: f64) -> Self {
        let settings = DynamicEqSettings::default();
        let mut band = Self {
            sample_rate,
            settings,
            dc: DcBlocker::new(5.0, sample_rate),
            band: BiquadTDF2::with_coeffs(BiquadCoeffs::bandpass(
                settings.frequency,
                settings.q,
                sample_rate,
            )),
            dry_delay: RingBuffer::new(LOOKAHEAD + 1),
            band_delay: RingBuffer::new(LOOKAHEAD + 1),
            peak: SlidingPeak::new(LOOKAHEAD),
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope: 0.0,
            lut: vec![1.0; LUT_SIZE],
            static_gain: 1.0,
            gain: 1.0,
            gain_coeff: time_coeff(GAIN_SMOOTH_MS, sample_rate),
        };
        band.rebuild_lut();
        band.apply_times();
        band
    }

    /// Update settings; filter and table are rebuilt only when their inputs change
    pub fn set(&mut self, settings: DynamicEqSettings) {
        let nyquist_guard = self.sample_rate * 0.45;
        let settings = DynamicEqSettings {
            frequency: settings.frequency.clamp(20.0, nyquist_guard),
            q: settings.q.clamp(0.1, 20.0),
            ratio: settings.ratio.max(1.0),
            ..settings
        };
        let old = self.settings;
        self.settings = settings;

        if old.frequency != settings.frequency || old.q != settings.q {
            let coeffs = BiquadCoeffs::bandpass(settings.frequency, settings.q, self.sample_rate);
            if coeffs.is_finite() {
                self.band.set_coeffs(coeffs);
            }
        }
        if old.threshold_db != settings.threshold_db
            || old.ratio != settings.ratio
            || old.mode != settings.mode
        {
            self.rebuild_lut();
        }
        if old.attack_ms != settings.attack_ms || old.release_ms != settings.release_ms {
            self.apply_times();
        }
        self.static_gain = db_to_gain_f64(settings.band_gain_db);
    }

    pub fn settings(&self) -> &DynamicEqSettings {
        &self.settings
    }

    pub fn latency(&self) -> usize {
        LOOKAHEAD
    }

    /// Current dynamic gain change on the band (dB)
    pub fn gain_change_db(&self) -> f64 {
        gain_to_db_f64(self.gain.max(1e-9))
    }

    #[inline]
    pub fn process(&mut self, input: Sample) -> Sample {
        let x = self.dc.process(input as f64);
        let band = self.band.process_f64(x);

        let level = self.peak.process(band.abs());
        let coeff = if level > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = flush_denormal(level + coeff * (self.envelope - level));

        let target = self.lookup(self.envelope);
        self.gain = flush_denormal(target + self.gain_coeff * (self.gain - target));

        self.dry_delay.push(x as Sample);
        self.band_delay.push(band as Sample);
        let dry = self.dry_delay.read(LOOKAHEAD) as f64;
        let delayed_band = self.band_delay.read(LOOKAHEAD) as f64;

        let g = self.gain * self.static_gain;
        (dry + delayed_band * (g - 1.0)) as Sample
    }

    pub fn reset(&mut self) {
        self.dc.reset();
        Processor::reset(&mut self.band);
        self.dry_delay.clear();
        self.band_delay.clear();
        self.peak.reset();
        self.envelope = 0.0;
        self.gain = 1.0;
    }

    #[inline]
    fn lookup(&self, level: f64) -> f64 {
        let pos = (level / LUT_MAX_LEVEL).clamp(0.0, 1.0) * (LUT_SIZE - 1) as f64;
        let i = (pos as usize).min(LUT_SIZE - 2);
        let frac = pos - i as f64;
        self.lut[i] + (self.lut[i + 1] - self.lut[i]) * frac
    }

    fn rebuild_lut(&mut self) {
        let computer = GainComputer {
            threshold_db: self.settings.threshold_db,
            ratio: self.settings.ratio,
            knee_db: 0.0,
            mode: self.settings.mode,
        };
        for (i, entry) in self.lut.iter_mut().enumerate() {
            let level = i as f64 / (LUT_SIZE - 1) as f64 * LUT_MAX_LEVEL;
            let level_db = gain_to_db_f64(level.max(1e-9));
            *entry = db_to_gain_f64(computer.gain_db(level_db));
        }
    }

    fn apply_times(&mut self) {
        self.attack_coeff = time_coeff(self.settings.attack_ms, self.sample_rate);
        self.release_coeff = time_coeff(self.settings.release_ms, self.sample_rate);
    }
}
