//! Rack configuration

use fx_core::{FxError, FxResult, validate_stream};
use serde::{Deserialize, Serialize};

/// Number of slots in a rack
pub const RACK_SLOTS: usize = 6;

/// Longest engine-swap crossfade
pub const MAX_SWAP_FADE: usize = 48_000;

/// Stream and behavior settings for an [`EngineRack`](crate::EngineRack)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RackConfig {
    pub sample_rate: f64,
    pub max_block_size: usize,
    /// 1 or 2
    pub channels: usize,
    /// Crossfade length when a slot changes engine
    pub swap_fade_samples: usize,
}

impl Default for RackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            max_block_size: 512,
            channels: 2,
            swap_fade_samples: 64,
        }
    }
}

impl RackConfig {
    /// Create config for minimum latency
    pub fn low_latency() -> Self {
        Self {
            max_block_size: 64,
            swap_fade_samples: 32,
            ..Self::default()
        }
    }

    /// Create config for maximum quality
    pub fn high_quality() -> Self {
        Self {
            sample_rate: 96000.0,
            max_block_size: 1024,
            swap_fade_samples: 256,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> FxResult<()> {
        validate_stream(self.sample_rate, self.max_block_size)?;
        if !(1..=2).contains(&self.channels) {
            return Err(FxError::Config(format!(
                "channels must be 1 or 2, got {}",
                self.channels
            )));
        }
        if self.swap_fade_samples > MAX_SWAP_FADE {
            return Err(FxError::Config(format!(
                "swap fade of {} samples exceeds {MAX_SWAP_FADE}",
                self.swap_fade_samples
            )));
        }
        Ok(())
    }

    /// Parse and validate; missing fields take their defaults
    pub fn from_json(json: &str) -> FxResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| FxError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> FxResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| FxError::Config(e.to_string()))
    }
}
