//! Impulse responses for the convolution reverb
//!
//! Loading and validation run on control threads only. A response is
//! stereo, at the rack sample rate, at most 4 s long with samples in
//! `[−1, 1]`. Mono files are spread to stereo through two short,
//! mutually decorrelated allpass chains.

use std::path::Path;

use fx_core::FxError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::filters::SchroederAllpass;

/// Longest accepted impulse response (seconds)
pub const MAX_IR_SECONDS: f64 = 4.0;

/// Allpass delays/gains for the left and right decorrelation chains
const DECORRELATE_LEFT: [(usize, f64); 3] = [(142, 0.6), (107, -0.55), (379, 0.5)];
const DECORRELATE_RIGHT: [(usize, f64); 3] = [(151, -0.6), (113, 0.55), (337, -0.5)];

/// Impulse-response validation failure
#[derive(Error, Debug)]
pub enum IrError {
    #[error("Unreadable WAV: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported channel count: {0} (expected 1 or 2)")]
    Channels(u16),

    #[error("Sample rate mismatch: rack={expected}Hz, file={found}Hz")]
    SampleRate { expected: f64, found: u32 },

    #[error("Impulse response too long: {0:.2}s (max 4s)")]
    TooLong(f64),

    #[error("Sample out of range: {0}")]
    OutOfRange(f32),

    #[error("Impulse response is empty")]
    Empty,

    #[error("Partition size {found} does not match engine block size {expected}")]
    BlockSize { expected: usize, found: usize },
}

impl From<IrError> for FxError {
    fn from(err: IrError) -> Self {
        FxError::ImpulseResponse(err.to_string())
    }
}

/// Validated stereo impulse response
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    left: Vec<f32>,
    right: Vec<f32>,
    sample_rate: f64,
}

impl ImpulseResponse {
    /// Stereo response from two equal-length channels
    pub fn from_channels(left: Vec<f32>, right: Vec<f32>, sample_rate: f64) -> Result<Self, IrError> {
        let len = left.len().max(right.len());
        if len == 0 {
            return Err(IrError::Empty);
        }
        let seconds = len as f64 / sample_rate;
        if seconds > MAX_IR_SECONDS {
            return Err(IrError::TooLong(seconds));
        }
        if let Some(&bad) = left
            .iter()
            .chain(right.iter())
            .find(|x| !x.is_finite() || x.abs() > 1.0)
        {
            return Err(IrError::OutOfRange(bad));
        }
        let mut left = left;
        let mut right = right;
        left.resize(len, 0.0);
        right.resize(len, 0.0);
        Ok(Self {
            left,
            right,
            sample_rate,
        })
    }

    /// Mono response spread through the decorrelation chains
    pub fn from_mono(mono: Vec<f32>, sample_rate: f64) -> Result<Self, IrError> {
        let validated = Self::from_channels(mono.clone(), mono, sample_rate)?;
        let left = decorrelate(&validated.left, &DECORRELATE_LEFT);
        let right = decorrelate(&validated.left, &DECORRELATE_RIGHT);
        Ok(Self {
            left,
            right,
            sample_rate,
        })
    }

    /// Load a 1- or 2-channel WAV recorded at `rack_rate`
    pub fn from_wav(path: impl AsRef<Path>, rack_rate: f64) -> Result<Self, IrError> {
        let path = path.as_ref();
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();

        if spec.channels == 0 || spec.channels > 2 {
            return Err(IrError::Channels(spec.channels));
        }
        if (spec.sample_rate as f64 - rack_rate).abs() > 0.5 {
            return Err(IrError::SampleRate {
                expected: rack_rate,
                found: spec.sample_rate,
            });
        }
        let frames = reader.duration() as f64;
        if frames / rack_rate > MAX_IR_SECONDS {
            return Err(IrError::TooLong(frames / rack_rate));
        }

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max_val))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        let ir = if spec.channels == 1 {
            Self::from_mono(samples, rack_rate)?
        } else {
            let (left, right): (Vec<f32>, Vec<f32>) = samples
                .chunks_exact(2)
                .map(|frame| (frame[0], frame[1]))
                .unzip();
            Self::from_channels(left, right, rack_rate)?
        };
        log::debug!(
            "loaded impulse response {} ({} ch, {:.2}s)",
            path.display(),
            spec.channels,
            ir.seconds()
        );
        Ok(ir)
    }

    /// Decaying, decorrelated noise used until a file is loaded
    pub fn synthetic(sample_rate: f64, rt60_seconds: f64, seed: u64) -> Self {
        let rt60 = rt60_seconds.clamp(0.1, MAX_IR_SECONDS * 0.5);
        let len = ((rt60 * 1.2 * sample_rate) as usize).max(1);
        let fade_in = (0.001 * sample_rate).max(1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut left = Vec::with_capacity(len);
        let mut right = Vec::with_capacity(len);
        for n in 0..len {
            let t = n as f64 / sample_rate;
            // −60 dB at rt60
            let envelope = 10f64.powf(-3.0 * t / rt60) * (n as f64 / fade_in).min(1.0);
            left.push((rng.random_range(-1.0..1.0) * envelope) as f32);
            right.push((rng.random_range(-1.0..1.0) * envelope) as f32);
        }
        normalize_energy(&mut left);
        normalize_energy(&mut right);
        Self {
            left,
            right,
            sample_rate,
        }
    }

    pub fn left(&self) -> &[f32] {
        &self.left
    }

    pub fn right(&self) -> &[f32] {
        &self.right
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn seconds(&self) -> f64 {
        self.len() as f64 / self.sample_rate
    }
}

fn decorrelate(mono: &[f32], chain: &[(usize, f64)]) -> Vec<f32> {
    let mut stages: Vec<SchroederAllpass> = chain
        .iter()
        .map(|&(delay, gain)| SchroederAllpass::new(delay, delay, gain))
        .collect();
    mono.iter()
        .map(|&x| {
            let y = stages.iter_mut().fold(x as f64, |acc, ap| ap.process(acc));
            y.clamp(-1.0, 1.0) as f32
        })
        .collect()
}

/// Scale to unit energy, keeping every sample within ±1
fn normalize_energy(ir: &mut [f32]) {
    let energy: f64 = ir.iter().map(|&x| (x as f64) * (x as f64)).sum();
    if energy <= 0.0 {
        return;
    }
    let peak = ir.iter().fold(0.0f32, |m, &x| m.max(x.abs())) as f64;
    let scale = (1.0 / energy.sqrt()).min(1.0 / peak);
    for x in ir.iter_mut() {
        *x = (*x as f64 * scale) as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(matches!(
            ImpulseResponse::from_channels(vec![], vec![], 48_000.0),
            Err(IrError::Empty)
        ));
        assert!(matches!(
            ImpulseResponse::from_channels(vec![1.5], vec![0.0], 48_000.0),
            Err(IrError::OutOfRange(_))
        ));
        assert!(matches!(
            ImpulseResponse::from_channels(vec![0.0; 48_000 * 5], vec![], 48_000.0),
            Err(IrError::TooLong(_))
        ));
        let ir = ImpulseResponse::from_channels(vec![0.5, 0.25], vec![0.1], 48_000.0).unwrap();
        assert_eq!(ir.right(), &[0.1, 0.0]);
    }

    #[test]
    fn test_mono_is_decorrelated() {
        let mut mono = vec![0.0f32; 4800];
        mono[0] = 1.0;
        let ir = ImpulseResponse::from_mono(mono, 48_000.0).unwrap();
        let dot: f64 = ir.left().iter().zip(ir.right()).map(|(&a, &b)| a as f64 * b as f64).sum();
        let el: f64 = ir.left().iter().map(|&a| (a as f64).powi(2)).sum();
        let er: f64 = ir.right().iter().map(|&b| (b as f64).powi(2)).sum();
        assert!((dot / (el * er).sqrt()).abs() < 0.5);
    }

    #[test]
    fn test_synthetic_is_deterministic_and_bounded() {
        let a = ImpulseResponse::synthetic(48_000.0, 1.5, 7);
        let b = ImpulseResponse::synthetic(48_000.0, 1.5, 7);
        assert_eq!(a, b);
        assert!(a.left().iter().all(|x| x.abs() <= 1.0));
        assert!(a.seconds() > 1.0);
    }

    #[test]
    fn test_error_converts() {
        let err: FxError = IrError::Empty.into();
        assert!(matches!(err, FxError::ImpulseResponse(_)));
    }
}
