//! Kernel benchmarks: one 512-frame block per iteration

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use fx_dsp::MonoProcessor;
use fx_dsp::biquad::{BiquadCoeffs, BiquadTDF2};
use fx_dsp::convolution::PartitionedConvolver;
use fx_dsp::dynamic_eq::DynamicEqBand;
use fx_dsp::impulse::ImpulseResponse;
use fx_dsp::phase_vocoder::PhaseVocoder;
use fx_dsp::pitch::PsolaShifter;
use fx_dsp::reverb::PlateReverb;

const SR: f64 = 48000.0;
const BLOCK: usize = 512;

fn signal() -> Vec<f32> {
    (0..BLOCK).map(|i| (i as f32 * 0.05).sin() * 0.5).collect()
}

fn bench_biquad(c: &mut Criterion) {
    let mut filter = BiquadTDF2::with_coeffs(BiquadCoeffs::lowpass(1000.0, 0.707, SR));
    let mut buffer = signal();

    c.bench_function("biquad_tdf2_512", |b| {
        b.iter(|| filter.process_block(black_box(&mut buffer)))
    });
}

fn bench_convolution(c: &mut Criterion) {
    let ir = ImpulseResponse::synthetic(SR, 2.0, 1);
    let mut conv = PartitionedConvolver::new(&ir, SR, BLOCK);
    let input = signal();

    c.bench_function("convolution_2s_ir_512", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for &x in &input {
                let (l, r) = conv.process(x as f64);
                acc += l + r;
            }
            black_box(acc)
        })
    });
}

fn bench_plate(c: &mut Criterion) {
    let mut plate = PlateReverb::new(SR);
    let input = signal();

    c.bench_function("plate_reverb_512", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for &x in &input {
                let (l, r) = plate.process(x as f64, x as f64);
                acc += l + r;
            }
            black_box(acc)
        })
    });
}

fn bench_phase_vocoder(c: &mut Criterion) {
    let mut pv = PhaseVocoder::new(SR);
    pv.set_pitch(1.5);
    let input = signal();

    c.bench_function("phase_vocoder_512", |b| {
        b.iter(|| {
            let mut acc = 0.0f32;
            for &x in &input {
                acc += pv.process(x);
            }
            black_box(acc)
        })
    });
}

fn bench_psola(c: &mut Criterion) {
    let mut psola = PsolaShifter::new(SR);
    psola.set_ratio(1.5);
    let input = signal();

    c.bench_function("psola_512", |b| {
        b.iter(|| {
            let mut acc = 0.0f32;
            for &x in &input {
                acc += psola.process(x);
            }
            black_box(acc)
        })
    });
}

fn bench_dynamic_eq(c: &mut Criterion) {
    let mut band = DynamicEqBand::new(SR);
    let input = signal();

    c.bench_function("dynamic_eq_512", |b| {
        b.iter(|| {
            let mut acc = 0.0f32;
            for &x in &input {
                acc += band.process(x);
            }
            black_box(acc)
        })
    });
}

criterion_group!(
    benches,
    bench_biquad,
    bench_convolution,
    bench_plate,
    bench_phase_vocoder,
    bench_psola,
    bench_dynamic_eq
);
criterion_main!(benches);
