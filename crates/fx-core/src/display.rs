//! Parameter value display semantics
//!
//! Maps a normalized value to the engineering value an engine uses and to
//! a host-facing string. The six canonical mappings:
//! - Pitch: `(v − 0.5)·48` semitones → `2^(st/12)` ratio
//! - Frequency: `20·1000^v` Hz
//! - Time: `v·2000` ms
//! - Decibels: `v·72 − 60` dB
//! - Ratio: `1 : 1 + v·19`
//! - Percent: `v·100`
//!
//! Ranged variants cover engines whose natural span differs.

use serde::{Deserialize, Serialize};

/// How a normalized parameter maps to a plain value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParamDisplay {
    Pitch,
    Frequency,
    Time,
    Decibels,
    Ratio,
    Percent,
    /// Linear dB span
    GainDb { min: f32, max: f32 },
    /// Exponential millisecond span
    Millis { min: f32, max: f32 },
    /// Exponential frequency span
    Hertz { min: f32, max: f32 },
    /// Linear unitless span
    Span { min: f32, max: f32 },
    /// Exponential unitless span (factors, Q)
    Scale { min: f32, max: f32 },
    /// Off below 0.5, on at or above
    Switch,
    /// `n` discrete choices
    Choice(u8),
}

impl ParamDisplay {
    /// Engineering value for a normalized input
    pub fn plain(self, v: f32) -> f32 {
        let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        match self {
            Self::Pitch => 2.0_f32.powf(pitch_semitones(v) / 12.0),
            Self::Frequency => 20.0 * 1000.0_f32.powf(v),
            Self::Time => v * 2000.0,
            Self::Decibels => v * 72.0 - 60.0,
            Self::Ratio => 1.0 + v * 19.0,
            Self::Percent => v * 100.0,
            Self::GainDb { min, max } | Self::Span { min, max } => min + (max - min) * v,
            Self::Millis { min, max } | Self::Hertz { min, max } | Self::Scale { min, max } => {
                exp_span(min, max, v)
            }
            Self::Switch => {
                if v >= 0.5 { 1.0 } else { 0.0 }
            }
            Self::Choice(n) => choice_index(v, n) as f32,
        }
    }

    /// Unit label
    pub fn unit(self) -> &'static str {
        match self {
            Self::Pitch => "st",
            Self::Frequency | Self::Hertz { .. } => "Hz",
            Self::Time | Self::Millis { .. } => "ms",
            Self::Decibels | Self::GainDb { .. } => "dB",
            Self::Ratio => ":1",
            Self::Percent => "%",
            Self::Span { .. } | Self::Scale { .. } | Self::Switch | Self::Choice(_) => "",
        }
    }

    /// Host-facing text for a normalized value (control thread only)
    pub fn format(self, v: f32) -> String {
        match self {
            Self::Pitch => format!("{:+.1} st", pitch_semitones(v.clamp(0.0, 1.0))),
            Self::Ratio => format!("1:{:.1}", self.plain(v)),
            Self::Switch => {
                if self.plain(v) > 0.5 { "On".into() } else { "Off".into() }
            }
            Self::Choice(_) => format!("{}", self.plain(v) as u32 + 1),
            Self::Frequency | Self::Hertz { .. } => {
                let hz = self.plain(v);
                if hz >= 1000.0 {
                    format!("{:.2} kHz", hz / 1000.0)
                } else {
                    format!("{:.1} Hz", hz)
                }
            }
            Self::Span { .. } | Self::Scale { .. } => format!("{:.2}", self.plain(v)),
            _ => format!("{:.1} {}", self.plain(v), self.unit()),
        }
    }
}

/// Semitone offset for the pitch mapping
#[inline]
pub fn pitch_semitones(v: f32) -> f32 {
    (v - 0.5) * 48.0
}

/// `min·(max/min)^v`
#[inline]
pub fn exp_span(min: f32, max: f32, v: f32) -> f32 {
    min * (max / min).powf(v)
}

/// Discrete choice for a normalized value
#[inline]
pub fn choice_index(v: f32, n: u8) -> usize {
    let n = n.max(1) as usize;
    ((v.clamp(0.0, 1.0) * n as f32) as usize).min(n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_canonical_mappings() {
        assert_relative_eq!(ParamDisplay::Pitch.plain(0.5), 1.0);
        assert_relative_eq!(ParamDisplay::Pitch.plain(0.75), 2.0, epsilon = 1e-5);
        assert_relative_eq!(ParamDisplay::Frequency.plain(0.0), 20.0);
        assert_relative_eq!(ParamDisplay::Frequency.plain(1.0), 20000.0, epsilon = 0.5);
        assert_relative_eq!(ParamDisplay::Time.plain(0.25), 500.0);
        assert_relative_eq!(ParamDisplay::Decibels.plain(0.5), -24.0);
        assert_relative_eq!(ParamDisplay::Ratio.plain(1.0), 20.0);
        assert_relative_eq!(ParamDisplay::Percent.plain(0.3), 30.0, epsilon = 1e-5);
    }

    #[test]
    fn test_ranged_mappings() {
        let ms = ParamDisplay::Millis { min: 1.0, max: 100.0 };
        assert_relative_eq!(ms.plain(0.5), 10.0, epsilon = 1e-4);
        let gain = ParamDisplay::GainDb { min: -12.0, max: 12.0 };
        assert_relative_eq!(gain.plain(0.5), 0.0);
        assert_eq!(ParamDisplay::Switch.plain(0.49), 0.0);
        assert_eq!(ParamDisplay::Switch.plain(0.5), 1.0);
        assert_eq!(ParamDisplay::Choice(4).plain(1.0), 3.0);
        assert_eq!(ParamDisplay::Choice(4).plain(0.26), 1.0);
        assert_relative_eq!(ParamDisplay::Span { min: 0.0, max: 250.0 }.plain(0.2), 50.0);
        assert_relative_eq!(ParamDisplay::Scale { min: 0.25, max: 4.0 }.plain(0.5), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_format() {
        assert_eq!(ParamDisplay::Pitch.format(0.75), "+12.0 st");
        assert_eq!(ParamDisplay::Ratio.format(0.0), "1:1.0");
        assert_eq!(ParamDisplay::Frequency.format(1.0 / 3.0), "200.0 Hz");
        assert_eq!(ParamDisplay::Switch.format(0.9), "On");
        assert_eq!(ParamDisplay::Time.format(0.5), "1000.0 ms");
    }
}
