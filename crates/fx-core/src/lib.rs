//! fx-core: Shared types and sample utilities for the effects rack
//!
//! This crate provides the foundational types used across all rack crates:
//! sample type and per-sample hygiene, the sparse parameter map, parameter
//! display semantics, and the configuration error taxonomy.

mod denormal;
mod display;
mod error;
mod params;
mod sample;

pub use denormal::*;
pub use display::*;
pub use error::*;
pub use params::*;
pub use sample::*;

/// Lowest sample rate the rack accepts
pub const MIN_SAMPLE_RATE: f64 = 8_000.0;

/// Highest sample rate the rack accepts
pub const MAX_SAMPLE_RATE: f64 = 384_000.0;

/// Largest block a host may deliver
pub const MAX_BLOCK_SIZE: usize = 8192;

/// Validate a `(sample_rate, max_block_size)` pair before `prepare`
pub fn validate_stream(sample_rate: f64, max_block_size: usize) -> FxResult<()> {
    if !sample_rate.is_finite() || !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        return Err(FxError::UnsupportedSampleRate(sample_rate));
    }
    if max_block_size == 0 || max_block_size > MAX_BLOCK_SIZE {
        return Err(FxError::InvalidBlockSize(max_block_size));
    }
    Ok(())
}

/// Decibel value wrapper
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Decibels(pub f64);

impl Decibels {
    pub const ZERO: Self = Self(0.0);
    pub const NEG_INF: Self = Self(f64::NEG_INFINITY);

    #[inline]
    pub fn from_gain(gain: f64) -> Self {
        if gain <= 0.0 {
            Self::NEG_INF
        } else {
            Self(20.0 * gain.log10())
        }
    }

    #[inline]
    pub fn to_gain(self) -> f64 {
        if self.0 <= -144.0 {
            0.0
        } else {
            10.0_f64.powf(self.0 / 20.0)
        }
    }
}

impl Default for Decibels {
    fn default() -> Self {
        Self::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_stream() {
        assert!(validate_stream(48000.0, 512).is_ok());
        assert!(validate_stream(44100.0, 1).is_ok());
        assert!(matches!(
            validate_stream(1000.0, 512),
            Err(FxError::UnsupportedSampleRate(_))
        ));
        assert!(matches!(
            validate_stream(f64::NAN, 512),
            Err(FxError::UnsupportedSampleRate(_))
        ));
        assert!(matches!(
            validate_stream(48000.0, 0),
            Err(FxError::InvalidBlockSize(0))
        ));
        assert!(validate_stream(48000.0, MAX_BLOCK_SIZE + 1).is_err());
    }

    #[test]
    fn test_decibels() {
        assert!((Decibels(-6.0).to_gain() - 0.501187).abs() < 1e-5);
        assert_eq!(Decibels(-200.0).to_gain(), 0.0);
        assert_eq!(Decibels::from_gain(0.0), Decibels::NEG_INF);
        assert!((Decibels::from_gain(2.0).0 - 6.0206).abs() < 1e-3);
    }
}
