//! Engine contract properties, checked for every registered engine
//!
//! Verifies:
//! - Output falls below −100 dBFS once the declared tail has passed
//! - Bounded input gives finite output under ±2.0
//! - `mix = 0` reproduces the dry input
//! - After `reset`, silence in gives silence out within one block
//! - Ramping a parameter over 100 ms adds no click

use std::f64::consts::PI;

use fx_engine::{Engine, EngineId, ParameterMap, Smoothing, create_engine, default_parameters};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const SR: f64 = 48000.0;
const BLOCK: usize = 256;

fn noise(seed: u64, len: usize, amp: f32) -> (Vec<f32>, Vec<f32>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let l = (0..len).map(|_| rng.random_range(-amp..=amp)).collect();
    let r = (0..len).map(|_| rng.random_range(-amp..=amp)).collect();
    (l, r)
}

fn sine(freq: f64, start: usize, len: usize, amp: f64) -> Vec<f32> {
    (start..start + len)
        .map(|n| (amp * (2.0 * PI * freq * n as f64 / SR).sin()) as f32)
        .collect()
}

fn process(engine: &mut dyn Engine, left: &mut [f32], right: &mut [f32]) {
    for (l, r) in left.chunks_mut(BLOCK).zip(right.chunks_mut(BLOCK)) {
        let mut block: [&mut [f32]; 2] = [l, r];
        engine.process(&mut block);
    }
}

fn peak(left: &[f32], right: &[f32]) -> f32 {
    left.iter().chain(right).fold(0.0f32, |m, x| m.max(x.abs()))
}

fn silent_blocks(engine: &mut dyn Engine, samples: usize) -> f32 {
    let mut last = 0.0;
    let mut done = 0;
    while done < samples {
        let (mut l, mut r) = (vec![0.0; BLOCK], vec![0.0; BLOCK]);
        process(engine, &mut l, &mut r);
        last = peak(&l, &r);
        done += BLOCK;
    }
    last
}

#[test]
fn test_silent_after_tail() {
    for id in EngineId::ALL {
        let mut engine = create_engine(id, SR, BLOCK);
        let (mut l, mut r) = noise(id as u64, 4800, 0.5);
        process(engine.as_mut(), &mut l, &mut r);

        let tail = engine.tail_samples();
        assert!(tail <= 20 * SR as usize, "{id:?}: tail of {tail} samples");
        let wait = tail + engine.latency_samples() + BLOCK;
        silent_blocks(engine.as_mut(), wait);
        let residual = silent_blocks(engine.as_mut(), BLOCK);
        assert!(residual < 1e-5, "{id:?}: {residual} after {wait} samples");
    }
}

#[test]
fn test_bounded_and_finite() {
    for id in EngineId::ALL {
        let mut engine = create_engine(id, SR, BLOCK);
        let (mut l, mut r) = noise(100 + id as u64, 24000, 1.0);
        process(engine.as_mut(), &mut l, &mut r);
        assert!(
            l.iter().chain(&r).all(|x| x.is_finite() && x.abs() < 2.0),
            "{id:?}: peak {}",
            peak(&l, &r)
        );
    }
}

#[test]
fn test_zero_mix_is_dry() {
    for id in EngineId::ALL {
        let Some(mix) = id.info().mix_index else {
            continue;
        };
        let mut engine = create_engine(id, SR, BLOCK);
        engine.apply_parameters(&default_parameters(id).with(mix, 0.0));
        let (dry_l, dry_r) = noise(200 + id as u64, 9600, 0.7);
        let (mut l, mut r) = (dry_l.clone(), dry_r.clone());
        process(engine.as_mut(), &mut l, &mut r);
        let diff = l
            .iter()
            .zip(&dry_l)
            .chain(r.iter().zip(&dry_r))
            .fold(0.0f32, |m, (y, x)| m.max((y - x).abs()));
        assert!(diff < 1e-4, "{id:?}: {diff}");
    }
}

#[test]
fn test_reset_then_silence() {
    for id in EngineId::ALL {
        let mut engine = create_engine(id, SR, BLOCK);
        let (mut l, mut r) = noise(300 + id as u64, 9600, 0.8);
        process(engine.as_mut(), &mut l, &mut r);
        engine.reset();
        silent_blocks(engine.as_mut(), BLOCK);
        let residual = silent_blocks(engine.as_mut(), BLOCK);
        assert!(residual < 1e-5, "{id:?}: {residual}");
    }
}

/// Largest sample-to-sample step after a 50 ms warm-up while `index`
/// moves from `from` to `to` over 100 ms, then holds for 50 ms
fn max_step(id: EngineId, index: usize, from: f32, to: f32) -> f32 {
    const STEP: usize = 48;
    const WARM: usize = 2400;
    const RAMP: usize = 4800;
    const TOTAL: usize = WARM + RAMP + 2400;

    let mut engine = create_engine(id, SR, BLOCK);
    let mut prev = [0.0f32; 2];
    let mut largest = 0.0f32;
    let mut pos = 0;
    while pos < TOTAL {
        let value = if pos < WARM {
            from
        } else if pos < WARM + RAMP {
            from + (to - from) * (pos - WARM) as f32 / RAMP as f32
        } else {
            to
        };
        engine.apply_parameters(&ParameterMap::new().with(index, value));

        let mut l = sine(110.0, pos, STEP, 0.25);
        let mut r = l.clone();
        process(engine.as_mut(), &mut l, &mut r);
        for (ch, out) in [&l, &r].into_iter().enumerate() {
            for &y in out.iter() {
                if pos >= WARM {
                    largest = largest.max((y - prev[ch]).abs());
                }
                prev[ch] = y;
            }
        }
        pos += STEP;
    }
    largest
}

#[test]
fn test_parameter_ramps_do_not_click() {
    for id in EngineId::ALL {
        for (index, spec) in id.info().params.iter().enumerate() {
            if spec.smoothing == Smoothing::Step {
                continue;
            }
            let still = max_step(id, index, 0.25, 0.25).max(max_step(id, index, 0.75, 0.75));
            let ramp = max_step(id, index, 0.25, 0.75);
            assert!(
                ramp <= still + 0.2,
                "{id:?} {}: ramp step {ramp}, static {still}",
                spec.name
            );
        }
    }
}

#[test]
fn test_parameter_introspection() {
    for id in EngineId::ALL {
        let engine = create_engine(id, SR, BLOCK);
        for (index, spec) in id.info().params.iter().enumerate() {
            assert_eq!(engine.parameter_name(index), Some(spec.name));
            assert!(!spec.display.format(spec.default).is_empty());
        }
        assert_eq!(engine.parameter_name(engine.parameter_count()), None);
    }
}
