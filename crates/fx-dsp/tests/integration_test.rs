//! Kernel integration tests
//!
//! Verifies:
//! - PSOLA output pitch follows the shift ratio without clicks, including
//!   the resampler fallback at √2/2
//! - Convolution with the synthetic response has a long, decorrelated tail
//! - Plate reverb decorrelates a mono input
//! - Impulse responses load from WAV files and reject bad files

use std::f64::consts::{FRAC_1_SQRT_2, PI};

use fx_dsp::convolution::PartitionedConvolver;
use fx_dsp::impulse::{ImpulseResponse, IrError};
use fx_dsp::pitch::{PeriodEstimator, PsolaShifter};
use fx_dsp::reverb::{PlateReverb, ReverbSettings};

const SAMPLE_RATE: f64 = 48000.0;

/// Smooth pulse train: 1 ms Hann pulses at `freq`
fn pulse_train(freq: f64, samples: usize) -> Vec<f32> {
    let width = 0.001 * freq;
    (0..samples)
        .map(|n| {
            let phase = (n as f64 * freq / SAMPLE_RATE).fract();
            if phase < width {
                (0.8 * (PI * phase / width).sin().powi(2)) as f32
            } else {
                0.0
            }
        })
        .collect()
}

fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let ea: f64 = a.iter().map(|x| x * x).sum();
    let eb: f64 = b.iter().map(|y| y * y).sum();
    dot / (ea * eb).sqrt().max(1e-30)
}

fn cents(measured: f64, expected: f64) -> f64 {
    1200.0 * (measured / expected).log2()
}

#[test]
fn test_psola_tracks_ratio() {
    let f0 = 220.0;
    for ratio in [0.5, FRAC_1_SQRT_2, 1.0, 1.5, 2.0] {
        let mut psola = PsolaShifter::new(SAMPLE_RATE);
        psola.set_ratio(ratio);
        let output: Vec<f32> = pulse_train(f0, SAMPLE_RATE as usize * 2)
            .into_iter()
            .map(|x| psola.process(x))
            .collect();

        let mut estimator = PeriodEstimator::new(SAMPLE_RATE);
        let span = estimator.history();
        let mut estimates: Vec<f64> = (0..8)
            .filter_map(|k| {
                let end = SAMPLE_RATE as usize + k * 4000 + span;
                estimator.estimate_slice(&output[..end])
            })
            .map(|period| SAMPLE_RATE / period)
            .collect();
        assert!(estimates.len() >= 6, "ratio {ratio}: unvoiced output");
        estimates.sort_by(f64::total_cmp);
        let median = estimates[estimates.len() / 2];
        let error = cents(median, f0 * ratio);
        assert!(error.abs() < 50.0, "ratio {ratio}: {median} Hz ({error} cents)");

        // one second of settled output
        let settled = &output[SAMPLE_RATE as usize..];
        let jumps = settled
            .windows(2)
            .filter(|w| (w[1] - w[0]).abs() >= 0.3)
            .count();
        assert!(jumps < 5, "ratio {ratio}: {jumps} discontinuities per second");
    }
}

#[test]
fn test_convolution_tail_is_long_and_wide() {
    let ir = ImpulseResponse::synthetic(SAMPLE_RATE, 1.5, 42);
    let mut conv = PartitionedConvolver::new(&ir, SAMPLE_RATE, 256);
    let mut left = Vec::new();
    let mut right = Vec::new();
    for n in 0..SAMPLE_RATE as usize {
        let (l, r) = conv.process(if n == 0 { 1.0 } else { 0.0 });
        left.push(l);
        right.push(r);
    }

    let start = conv.latency() + (0.1 * SAMPLE_RATE) as usize;
    let late_energy: f64 = left[start..].iter().map(|x| x * x).sum();
    assert!(late_energy > 1e-4, "late energy {late_energy}");
    assert!(correlation(&left, &right).abs() < 0.95);
}

#[test]
fn test_plate_decorrelates_mono_input() {
    let mut plate = PlateReverb::new(SAMPLE_RATE);
    plate.set(&ReverbSettings {
        size: 0.7,
        ..Default::default()
    });
    let mut left = Vec::new();
    let mut right = Vec::new();
    for n in 0..SAMPLE_RATE as usize {
        let (l, r) = plate.process(if n == 0 { 1.0 } else { 0.0 }, if n == 0 { 1.0 } else { 0.0 });
        left.push(l);
        right.push(r);
    }
    let tail = (0.05 * SAMPLE_RATE) as usize;
    assert!(correlation(&left[tail..], &right[tail..]).abs() < 0.95);
    assert!(left.iter().chain(&right).all(|x| x.is_finite()));
}

// ============ WAV loading ============

fn write_wav(path: &std::path::Path, channels: u16, sample_rate: u32, samples: &[f32]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn test_load_stereo_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stereo.wav");
    write_wav(&path, 2, 48000, &[0.5, -0.25, 0.1, 0.2, 0.0, 0.0]);

    let ir = ImpulseResponse::from_wav(&path, SAMPLE_RATE).unwrap();
    assert_eq!(ir.len(), 3);
    assert_eq!(ir.left(), &[0.5, 0.1, 0.0]);
    assert_eq!(ir.right(), &[-0.25, 0.2, 0.0]);
}

#[test]
fn test_load_int_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("int.wav");
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 48000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for s in [16384i16, -16384, 0, 0] {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();

    let ir = ImpulseResponse::from_wav(&path, SAMPLE_RATE).unwrap();
    assert!((ir.left()[0] - 0.5).abs() < 1e-6);
    assert!((ir.right()[0] + 0.5).abs() < 1e-6);
}

#[test]
fn test_load_mono_wav_spreads_to_stereo() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mono.wav");
    let mut mono = vec![0.0f32; 4800];
    mono[0] = 1.0;
    write_wav(&path, 1, 48000, &mono);

    let ir = ImpulseResponse::from_wav(&path, SAMPLE_RATE).unwrap();
    assert_eq!(ir.len(), 4800);
    assert_ne!(ir.left(), ir.right());
}

#[test]
fn test_rejects_bad_files() {
    let dir = tempfile::tempdir().unwrap();

    let rate = dir.path().join("rate.wav");
    write_wav(&rate, 2, 44100, &[0.1, 0.1]);
    assert!(matches!(
        ImpulseResponse::from_wav(&rate, SAMPLE_RATE),
        Err(IrError::SampleRate { found: 44100, .. })
    ));

    let loud = dir.path().join("loud.wav");
    write_wav(&loud, 2, 48000, &[1.5, 0.0]);
    assert!(matches!(
        ImpulseResponse::from_wav(&loud, SAMPLE_RATE),
        Err(IrError::OutOfRange(_))
    ));

    let missing = dir.path().join("missing.wav");
    assert!(matches!(
        ImpulseResponse::from_wav(&missing, SAMPLE_RATE),
        Err(IrError::Wav(_))
    ));
}
