//! End-to-end scenarios at 48 kHz
//!
//! Verifies:
//! - Empty slots pass a sine through unchanged
//! - Plate reverb impulse response: early energy, tail, decorrelation, RT60
//! - PSOLA octave-up on a 220 Hz pulse train lands near 440 Hz
//! - One-bit crushing yields at most three output levels
//! - The classic compressor narrows a 4:1 loud/quiet swing
//! - The dynamic EQ band stays under 0.5% THD while compressing

use std::collections::BTreeSet;
use std::f64::consts::PI;

use fx_dsp::pitch::PeriodEstimator;
use fx_engine::{Engine, EngineId, EngineRack, ParameterMap, RackConfig, create_engine};

const SR: f64 = 48000.0;
const N: usize = 512;

fn sine(freq: f64, start: usize, len: usize, amp: f64) -> Vec<f32> {
    (start..start + len)
        .map(|n| (amp * (2.0 * PI * freq * n as f64 / SR).sin()) as f32)
        .collect()
}

fn rms(x: &[f32]) -> f64 {
    (x.iter().map(|&v| (v as f64).powi(2)).sum::<f64>() / x.len() as f64).sqrt()
}

fn process_engine(engine: &mut dyn Engine, left: &mut [f32], right: &mut [f32]) {
    for (l, r) in left.chunks_mut(N).zip(right.chunks_mut(N)) {
        let mut block: [&mut [f32]; 2] = [l, r];
        engine.process(&mut block);
    }
}

fn process_rack(rack: &mut EngineRack, left: &mut [f32], right: &mut [f32]) {
    for (l, r) in left.chunks_mut(N).zip(right.chunks_mut(N)) {
        let mut block: [&mut [f32]; 2] = [l, r];
        rack.process(&mut block);
    }
}

fn correlation(a: &[f32], b: &[f32]) -> f64 {
    let (mut ab, mut aa, mut bb) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        ab += x * y;
        aa += x * x;
        bb += y * y;
    }
    ab / (aa * bb).sqrt().max(1e-30)
}

#[test]
fn test_identity_chain() {
    let (mut rack, mut controller) = EngineRack::new(RackConfig::default()).unwrap();
    for slot in 0..4 {
        controller.set_slot_engine(slot, EngineId::Bypass).unwrap();
    }
    for b in 0..8 {
        let input = sine(1000.0, b * N, N, 0.5);
        let mut l = input.clone();
        let mut r = input.clone();
        process_rack(&mut rack, &mut l, &mut r);
        assert!((rms(&l) - rms(&input)).abs() < 1e-4, "block {b}");
        assert!((rms(&r) - rms(&input)).abs() < 1e-4, "block {b}");
    }
}

/// RT60 from the Schroeder backward integral, −5 to −35 dB doubled
fn schroeder_rt60(left: &[f32], right: &[f32]) -> f64 {
    let mut edc: Vec<f64> = left
        .iter()
        .zip(right)
        .map(|(&l, &r)| (l as f64).powi(2) + (r as f64).powi(2))
        .collect();
    for i in (0..edc.len() - 1).rev() {
        edc[i] += edc[i + 1];
    }
    let total = edc[0];
    let crossing = |db: f64| {
        edc.iter()
            .position(|&e| 10.0 * (e / total).log10() <= db)
            .unwrap_or(edc.len())
    };
    2.0 * (crossing(-35.0) - crossing(-5.0)) as f64 / SR
}

#[test]
fn test_plate_reverb_impulse() {
    let (mut rack, mut controller) = EngineRack::new(RackConfig::default()).unwrap();
    let params = ParameterMap::new()
        .with(0, 0.7)
        .with(1, 0.4)
        .with(2, 0.0)
        .with(3, 1.0);
    controller
        .set_slot_engine_with(0, EngineId::PlateReverb, &params)
        .unwrap();

    // let the swap crossfade finish on silence
    let (mut l, mut r) = (vec![0.0; N], vec![0.0; N]);
    process_rack(&mut rack, &mut l, &mut r);

    let len = 8 * SR as usize;
    let mut left = vec![0.0f32; len];
    let mut right = vec![0.0f32; len];
    left[0] = 1.0;
    process_rack(&mut rack, &mut left, &mut right);

    let ms = |t: f64| (t * 0.001 * SR) as usize;
    let early = left[..ms(10.0)]
        .iter()
        .chain(&right[..ms(10.0)])
        .fold(0.0f32, |m, x| m.max(x.abs()));
    assert!(early > 0.1, "early peak {early}");

    let late = rms(&left[ms(100.0)..ms(200.0)]);
    assert!(late > 1e-4, "tail rms {late}");

    let corr = correlation(&left[ms(100.0)..ms(1000.0)], &right[ms(100.0)..ms(1000.0)]);
    assert!(corr < 0.8, "tail correlation {corr}");

    let rt60 = schroeder_rt60(&left, &right);
    assert!((0.3..=5.0).contains(&rt60), "rt60 {rt60}s");
}

fn pulse_train(freq: f64, len: usize) -> Vec<f32> {
    let width = 0.001 * freq;
    (0..len)
        .map(|n| {
            let phase = (n as f64 * freq / SR).fract();
            if phase < width {
                (0.8 * (PI * phase / width).sin().powi(2)) as f32
            } else {
                0.0
            }
        })
        .collect()
}

#[test]
fn test_psola_octave_up() {
    let mut engine = create_engine(EngineId::PitchShifter, SR, N);
    engine.apply_parameters(&ParameterMap::new().with(0, 0.75).with(2, 1.0));

    let len = (1.5 * SR) as usize;
    let mut left = pulse_train(220.0, len);
    let mut right = left.clone();
    process_engine(engine.as_mut(), &mut left, &mut right);

    let mut estimator = PeriodEstimator::new(SR);
    let history = estimator.history();
    let mut freqs: Vec<f64> = (len - SR as usize / 2 + history..=len)
        .step_by(1200)
        .filter_map(|end| estimator.estimate_slice(&left[..end]))
        .map(|period| SR / period)
        .collect();
    assert!(freqs.len() >= 10, "{} voiced frames", freqs.len());
    freqs.sort_by(f64::total_cmp);
    let median = freqs[freqs.len() / 2];
    assert!((420.0..=460.0).contains(&median), "median {median} Hz");
}

#[test]
fn test_bit_crusher_one_bit() {
    let mut engine = create_engine(EngineId::BitCrusher, SR, N);
    engine.apply_parameters(&ParameterMap::new().with(0, 0.9).with(1, 0.0).with(6, 1.0));

    let mut values = BTreeSet::new();
    for b in 0..40 {
        let mut l = sine(440.0, b * N, N, 0.5);
        let mut r = l.clone();
        process_engine(engine.as_mut(), &mut l, &mut r);
        values.extend(l.iter().chain(&r).map(|x| (x * 1000.0).round() as i32));
    }
    assert!(values.len() <= 3, "levels {values:?}");
}

#[test]
fn test_compressor_narrows_swing() {
    let (mut rack, mut controller) = EngineRack::new(RackConfig::default()).unwrap();
    let params = ParameterMap::new()
        .with(0, 0.3)
        .with(1, 0.6)
        .with(2, 0.1)
        .with(3, 0.3)
        .with(6, 1.0);
    controller
        .set_slot_engine_with(0, EngineId::ClassicCompressor, &params)
        .unwrap();

    let segment = (0.25 * SR) as usize;
    let window = (0.1 * SR) as usize;
    let (mut quiet, mut loud) = (Vec::new(), Vec::new());
    for s in 0..8 {
        let amp = if s % 2 == 0 { 0.2 } else { 0.8 };
        let mut l = sine(440.0, s * segment, segment, amp);
        let mut r = l.clone();
        process_rack(&mut rack, &mut l, &mut r);
        // skip the first cycle while the detector settles
        if s >= 2 {
            let peak = l[segment - window..].iter().fold(0.0f32, |m, x| m.max(x.abs()));
            if s % 2 == 0 { quiet.push(peak) } else { loud.push(peak) }
        }
    }

    for (q, l) in quiet.iter().zip(&loud) {
        assert!(*q > 0.0);
        let ratio = l / q;
        assert!(ratio < 0.5 * 4.0, "output swing {ratio}");
    }
}

/// THD of a capture holding a whole number of cycles
fn thd(out: &[f64], freq: f64) -> f64 {
    let n = out.len() as f64;
    let mean = out.iter().sum::<f64>() / n;
    let (mut a, mut b) = (0.0, 0.0);
    for (i, &y) in out.iter().enumerate() {
        let w = 2.0 * PI * freq * i as f64 / SR;
        a += (y - mean) * w.sin();
        b += (y - mean) * w.cos();
    }
    a *= 2.0 / n;
    b *= 2.0 / n;
    let (mut fund, mut resid) = (0.0, 0.0);
    for (i, &y) in out.iter().enumerate() {
        let w = 2.0 * PI * freq * i as f64 / SR;
        let f = a * w.sin() + b * w.cos();
        fund += f * f;
        resid += (y - mean - f).powi(2);
    }
    (resid / fund).sqrt()
}

#[test]
fn test_dynamic_eq_low_distortion() {
    let mut engine = create_engine(EngineId::DynamicEq, SR, N);
    // 1 kHz, −30 dB, 4:1, 10 ms attack, Q 1
    let params = ParameterMap::new()
        .with(0, (50f32).ln() / (1000f32).ln())
        .with(1, 30.0 / 72.0)
        .with(2, 3.0 / 19.0)
        .with(3, 2.0 / 3.0)
        .with(5, (5f32).ln() / (100f32).ln())
        .with(8, 1.0);
    engine.apply_parameters(&params);

    let warmup = N * 47;
    let capture = SR as usize;
    let mut left = sine(1000.0, 0, warmup + capture, 0.707);
    let mut right = left.clone();
    process_engine(engine.as_mut(), &mut left, &mut right);

    // the input phase is shifted by the warm-up, which the fit absorbs
    let out: Vec<f64> = left[warmup..].iter().map(|&y| y as f64).collect();
    let d = thd(&out, 1000.0);
    assert!(d < 0.005, "thd {d}");
    assert!(rms(&left[warmup..]) < 0.4, "band did not compress");
}
