//! Rack integration tests
//!
//! Verifies:
//! - Engine swaps crossfade without a step
//! - Updates sent after a swap reach the new engine
//! - Slot bypass, mix and post gain
//! - Master gain and peak meter
//! - WAV impulse responses reach convolution slots only
//! - Latency and engine introspection
//! - JSON-configured racks split oversized host blocks

use std::f64::consts::PI;

use approx::assert_abs_diff_eq;
use fx_engine::{EngineId, EngineRack, FxError, ParameterMap, RackConfig, RackController};

const SR: f64 = 48000.0;
const N: usize = 512;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn rack() -> (EngineRack, RackController) {
    init();
    EngineRack::new(RackConfig::default()).unwrap()
}

fn sine(freq: f64, start: usize, len: usize, amp: f64) -> Vec<f32> {
    (start..start + len)
        .map(|n| (amp * (2.0 * PI * freq * n as f64 / SR).sin()) as f32)
        .collect()
}

/// Process one block of a sine, returning the left channel
fn run_block(rack: &mut EngineRack, index: usize, amp: f64) -> (Vec<f32>, Vec<f32>) {
    let input = sine(100.0, index * N, N, amp);
    let mut l = input.clone();
    let mut r = input.clone();
    let mut block: [&mut [f32]; 2] = [&mut l, &mut r];
    rack.process(&mut block);
    (input, l)
}

fn max_step(signal: &[f32]) -> f32 {
    signal
        .windows(2)
        .fold(0.0f32, |m, w| m.max((w[1] - w[0]).abs()))
}

#[test]
fn test_engine_swap_is_crossfaded() {
    let (mut rack, mut controller) = rack();
    // −12 dB, then a flat EQ at unity
    controller
        .set_slot_engine_with(0, EngineId::GainUtility, &ParameterMap::new().with(0, 0.25))
        .unwrap();
    let mut output = Vec::new();
    for b in 0..4 {
        output.extend(run_block(&mut rack, b, 0.5).1);
    }
    controller.set_slot_engine(0, EngineId::ParametricEq).unwrap();
    for b in 4..8 {
        output.extend(run_block(&mut rack, b, 0.5).1);
    }

    assert_eq!(controller.active_engine(0).unwrap(), Some(EngineId::ParametricEq));
    let step = max_step(&output[N..]);
    assert!(step < 0.05, "step {step}");

    // the old engine is released once the fade has finished
    let mut released = controller.collect_garbage();
    run_block(&mut rack, 8, 0.5);
    released += controller.collect_garbage();
    assert_eq!(released, 1);
}

#[test]
fn test_updates_follow_queued_engine() {
    init();
    let config = RackConfig {
        max_block_size: 32,
        swap_fade_samples: 64,
        ..RackConfig::default()
    };
    let (mut rack, mut controller) = EngineRack::new(config).unwrap();
    let dc = |rack: &mut EngineRack| {
        let (mut l, mut r) = (vec![0.1f32; 32], vec![0.1f32; 32]);
        let mut block: [&mut [f32]; 2] = [&mut l, &mut r];
        rack.process(&mut block);
        (l, r)
    };

    controller.set_slot_engine(0, EngineId::MonoMaker).unwrap();
    dc(&mut rack);
    // queued while the first fade is still running
    controller.set_slot_engine(0, EngineId::GainUtility).unwrap();
    controller
        .update_slot_parameters(0, &ParameterMap::new().with(2, 1.0))
        .unwrap();

    let mut out = dc(&mut rack);
    for _ in 0..19 {
        out = dc(&mut rack);
    }
    let (l, r) = out;
    assert_eq!(controller.active_engine(0).unwrap(), Some(EngineId::GainUtility));
    assert!(l.iter().all(|y| *y < -0.09), "left {:?}", &l[..4]);
    assert!(r.iter().all(|y| *y > 0.09), "right {:?}", &r[..4]);
}

#[test]
fn test_bypass_passes_dry() {
    let (mut rack, mut controller) = rack();
    controller
        .set_slot_engine_with(0, EngineId::GainUtility, &ParameterMap::new().with(0, 0.0))
        .unwrap();
    run_block(&mut rack, 0, 0.5);
    let (input, out) = run_block(&mut rack, 1, 0.5);
    assert!(out.iter().zip(&input).any(|(y, x)| (y - x).abs() > 0.1));

    controller.set_slot_bypass(0, true).unwrap();
    assert!(controller.is_bypassed(0).unwrap());
    run_block(&mut rack, 2, 0.5);
    let (input, out) = run_block(&mut rack, 3, 0.5);
    for (y, x) in out.iter().zip(&input) {
        assert_abs_diff_eq!(*y, *x, epsilon = 1e-6);
    }
}

#[test]
fn test_slot_mix_and_post_gain() {
    let (mut rack, mut controller) = rack();
    controller.set_slot_engine(0, EngineId::ParametricEq).unwrap();

    controller.set_slot_mix(0, 0.0).unwrap();
    run_block(&mut rack, 0, 0.1);
    run_block(&mut rack, 1, 0.1);
    let (input, out) = run_block(&mut rack, 2, 0.1);
    for (y, x) in out.iter().zip(&input) {
        assert_abs_diff_eq!(*y, *x, epsilon = 1e-6);
    }

    controller.set_slot_mix(0, 1.0).unwrap();
    controller.set_slot_post_gain(0, -6.0).unwrap();
    run_block(&mut rack, 3, 0.1);
    let (input, out) = run_block(&mut rack, 4, 0.1);
    let gain = 10f32.powf(-6.0 / 20.0);
    for (y, x) in out.iter().zip(&input) {
        assert_abs_diff_eq!(*y, *x * gain, epsilon = 1e-3);
    }

    // out-of-range mix clamps
    controller.set_slot_mix(0, 3.0).unwrap();
    assert!(matches!(controller.set_slot_mix(9, 0.5), Err(FxError::InvalidSlot(9))));
}

#[test]
fn test_master_gain_and_meter() {
    let (mut rack, controller) = rack();
    controller.set_master_gain(-6.0);
    run_block(&mut rack, 0, 0.5);
    let (input, out) = run_block(&mut rack, 1, 0.5);
    let gain = 10f32.powf(-6.0 / 20.0);
    for (y, x) in out.iter().zip(&input) {
        assert_abs_diff_eq!(*y, *x * gain, epsilon = 1e-6);
    }

    // the first block still rose from unity; let the meter fall back
    for b in 2..40 {
        run_block(&mut rack, b, 0.5);
    }
    let peak = controller.master_peak();
    assert!(peak > 0.2 && peak <= 0.5 * gain + 1e-6, "peak {peak}");

    // non-finite requests are ignored
    controller.set_master_gain(f32::NAN);
    let (_, out) = run_block(&mut rack, 40, 0.5);
    assert!(out.iter().all(|y| y.is_finite()));
}

fn write_ir(path: &std::path::Path, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for n in 0..(sample_rate / 5) {
        let t = n as f64 / sample_rate as f64;
        let v = (-t * 20.0).exp() * (2.0 * PI * 997.0 * t).sin();
        writer.write_sample(v as f32).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn test_impulse_response_loading() {
    let (mut rack, mut controller) = rack();
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("room.wav");
    let wrong_rate = dir.path().join("room_44k.wav");
    write_ir(&good, 48000);
    write_ir(&wrong_rate, 44100);

    controller.set_slot_engine(0, EngineId::ConvolutionReverb).unwrap();
    controller.set_slot_engine(1, EngineId::PlateReverb).unwrap();

    controller.load_impulse_response_wav(0, &good).unwrap();
    assert!(matches!(
        controller.load_impulse_response_wav(0, &wrong_rate),
        Err(FxError::ImpulseResponse(_))
    ));
    assert!(matches!(
        controller.load_impulse_response_wav(1, &good),
        Err(FxError::NoImpulseInput)
    ));
    assert!(matches!(
        controller.load_impulse_response_wav(2, &good),
        Err(FxError::NoImpulseInput)
    ));
    assert!(controller
        .load_impulse_response_wav(0, dir.path().join("missing.wav"))
        .is_err());

    let mut heard = 0.0f32;
    for b in 0..20 {
        let (_, out) = run_block(&mut rack, b, 0.3);
        assert!(out.iter().all(|y| y.is_finite()));
        heard = heard.max(out.iter().fold(0.0f32, |m, y| m.max(y.abs())));
    }
    assert!(heard > 0.0);
    controller.collect_garbage();
}

#[test]
fn test_latency_introspection() {
    let (mut rack, mut controller) = rack();
    controller.set_slot_engine(2, EngineId::MasteringLimiter).unwrap();
    assert_eq!(controller.slot_engine(2).unwrap(), EngineId::MasteringLimiter);
    assert_eq!(controller.active_engine(2).unwrap(), None);

    run_block(&mut rack, 0, 0.2);
    assert_eq!(controller.active_engine(2).unwrap(), Some(EngineId::MasteringLimiter));
    let latency = controller.slot_latency(2).unwrap();
    assert!(latency > 0);
    assert_eq!(controller.total_latency(), latency);
    assert_eq!(rack.latency_samples(), latency);
    assert!(controller.slot_tail(2).unwrap() > 0);

    controller.set_slot_bypass(2, true).unwrap();
    assert_eq!(controller.total_latency(), 0);

    controller.clear_slot(2).unwrap();
    run_block(&mut rack, 1, 0.2);
    run_block(&mut rack, 2, 0.2);
    assert_eq!(controller.active_engine(2).unwrap(), None);
    assert_eq!(controller.slot_latency(2).unwrap(), 0);
}

#[test]
fn test_engine_requests_validate() {
    let (_rack, mut controller) = rack();
    assert!(matches!(
        controller.set_slot_engine(6, EngineId::TapeEcho),
        Err(FxError::InvalidSlot(6))
    ));
    assert!(matches!(
        controller.set_slot_engine_by_id(0, 999),
        Err(FxError::UnknownEngine(999))
    ));
    controller.set_slot_engine_by_id(0, 35).unwrap();
    assert_eq!(controller.slot_engine(0).unwrap(), EngineId::from_u32(35).unwrap());
    assert!(controller.update_slot_parameters(0, &ParameterMap::new().with(0, 0.4)).is_ok());
    assert!(controller.update_slot_parameters(7, &ParameterMap::new()).is_err());
}

#[test]
fn test_json_config_splits_host_blocks() {
    init();
    let config = RackConfig::from_json(r#"{ "max_block_size": 64, "swap_fade_samples": 16 }"#).unwrap();
    let (mut rack, mut controller) = EngineRack::new(config).unwrap();
    assert_eq!(rack.config().max_block_size, 64);
    controller.set_slot_engine(0, EngineId::DigitalDelay).unwrap();

    for b in 0..10 {
        let (_, out) = run_block(&mut rack, b, 0.5);
        assert_eq!(out.len(), N);
        assert!(out.iter().all(|y| y.is_finite() && y.abs() <= 2.0));
    }
    assert_eq!(controller.stream(), (SR, 64));
}
