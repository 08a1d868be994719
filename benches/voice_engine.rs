//! Voice Engine Benchmarks
//!
//! Per-sample cost of each module at several polyphony levels, plus a small
//! rack patch. Block boundaries fall once every [`BLOCK_SIZE`] samples, so
//! every measurement runs whole blocks to average the boundary work in.
//!
//! ```text
//! time_budget = buffer_size / sample_rate
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rackpoly::prelude::*;

const SAMPLE_RATE: f32 = 48000.0;
const VOICE_COUNTS: [usize; 4] = [1, 4, 8, 16];
const BUFFER: usize = 4 * BLOCK_SIZE;

fn pitch_cv(voices: usize) -> Vec<f32> {
    (0..voices).map(|v| v as f32 / 12.0).collect()
}

fn run_buffer<M: PolyModule>(module: &mut M, io: &mut ModuleIo, frame: &mut u64) -> f32 {
    let mut acc = 0.0;
    for _ in 0..BUFFER {
        module.process(io, &ProcessArgs::new(SAMPLE_RATE, *frame));
        acc += io.output(0).voltage(0);
        *frame += 1;
    }
    acc
}

// ============================================================================
// Module Benchmarks
// ============================================================================

fn bench_vco(c: &mut Criterion) {
    let mut group = c.benchmark_group("modules/vco");

    for kind in [
        OscillatorKind::Classic,
        OscillatorKind::Sine,
        OscillatorKind::Wavetable,
    ] {
        for voices in VOICE_COUNTS {
            group.throughput(Throughput::Elements((BUFFER * voices) as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{kind:?}"), voices),
                &voices,
                |b, &voices| {
                    let mut vco = Vco::new(kind, SAMPLE_RATE);
                    let mut io = ModuleIo::for_module(&vco);
                    io.input_mut(Vco::PITCH_CV).drive(&pitch_cv(voices));
                    io.output_mut(Vco::OUTPUT_L).set_connected(true);
                    let mut frame = 0;

                    b.iter(|| run_buffer(black_box(&mut vco), &mut io, &mut frame));
                },
            );
        }
    }

    group.finish();
}

fn bench_vcf(c: &mut Criterion) {
    let mut group = c.benchmark_group("modules/vcf");

    for voices in VOICE_COUNTS {
        group.throughput(Throughput::Elements((BUFFER * voices) as u64));
        group.bench_with_input(BenchmarkId::new("lowpass", voices), &voices, |b, &voices| {
            let mut vcf = Vcf::new(SAMPLE_RATE);
            let mut io = ModuleIo::for_module(&vcf);
            io.input_mut(Vcf::INPUT_AUDIO).drive(&vec![1.0; voices]);
            io.input_mut(Vcf::MOD_INPUT_0).drive(&[2.5]);
            io.set_param(Vcf::mod_depth_param(Vcf::CUTOFF, 0), 0.5).ok();
            let mut frame = 0;

            b.iter(|| run_buffer(black_box(&mut vcf), &mut io, &mut frame));
        });
    }

    group.finish();
}

fn bench_lfo(c: &mut Criterion) {
    let mut group = c.benchmark_group("modules/lfo");

    for voices in VOICE_COUNTS {
        group.throughput(Throughput::Elements((BUFFER * voices) as u64));
        group.bench_with_input(BenchmarkId::new("gated", voices), &voices, |b, &voices| {
            let mut lfo = Lfo::new(SAMPLE_RATE);
            let mut io = ModuleIo::for_module(&lfo);
            io.input_mut(Lfo::INPUT_TRIGGER).drive(&vec![5.0; voices]);
            let mut frame = 0;

            b.iter(|| run_buffer(black_box(&mut lfo), &mut io, &mut frame));
        });
    }

    group.finish();
}

fn bench_dual_function(c: &mut Criterion) {
    let mut group = c.benchmark_group("modules/dual_function");

    for voices in VOICE_COUNTS {
        group.throughput(Throughput::Elements((BUFFER * voices) as u64));
        group.bench_with_input(
            BenchmarkId::new("two_functions", voices),
            &voices,
            |b, &voices| {
                let mut env = DualFunction::new(SAMPLE_RATE);
                let mut io = ModuleIo::for_module(&env);
                io.input_mut(DualFunction::TRIGGER_0).drive(&vec![5.0; voices]);
                io.input_mut(DualFunction::TRIGGER_1).drive(&vec![5.0; voices]);
                let mut frame = 0;

                b.iter(|| run_buffer(black_box(&mut env), &mut io, &mut frame));
            },
        );
    }

    group.finish();
}

fn bench_fx(c: &mut Criterion) {
    let mut group = c.benchmark_group("modules/fx");
    group.throughput(Throughput::Elements(BUFFER as u64));

    for kind in [EffectKind::Chorus, EffectKind::Reverb, EffectKind::Spring] {
        group.bench_function(format!("{kind:?}"), |b| {
            let mut fx = Fx::new(kind, SAMPLE_RATE);
            let mut io = ModuleIo::for_module(&fx);
            io.input_mut(Fx::INPUT_L).drive(&[1.0]);
            let mut frame = 0;

            b.iter(|| run_buffer(black_box(&mut fx), &mut io, &mut frame));
        });
    }

    group.finish();
}

// ============================================================================
// Rack Benchmarks
// ============================================================================

/// VCO → VCF with an LFO on cutoff
fn create_patch(voices: usize) -> (Rack, ModuleId) {
    let mut rack = Rack::new(SAMPLE_RATE);
    let lfo = rack.add(Lfo::new(SAMPLE_RATE));
    let vco = rack.add(Vco::new(OscillatorKind::Classic, SAMPLE_RATE));
    let vcf = rack.add(Vcf::new(SAMPLE_RATE));

    rack.connect(vco, Vco::OUTPUT_L, vcf, Vcf::INPUT_AUDIO).unwrap();
    rack.connect(lfo, Lfo::OUTPUT_MIX, vcf, Vcf::MOD_INPUT_0).unwrap();
    rack.set_param(vcf, Vcf::mod_depth_param(Vcf::CUTOFF, 0), 0.3)
        .unwrap();
    rack.input_mut(vco, Vco::PITCH_CV)
        .unwrap()
        .drive(&pitch_cv(voices));
    (rack, vcf)
}

fn bench_rack_patch(c: &mut Criterion) {
    let mut group = c.benchmark_group("rack/patch");

    for voices in VOICE_COUNTS {
        group.throughput(Throughput::Elements(BUFFER as u64));
        group.bench_with_input(BenchmarkId::new("vco_vcf_lfo", voices), &voices, |b, &voices| {
            let (mut rack, vcf) = create_patch(voices);

            b.iter(|| {
                for _ in 0..BUFFER {
                    rack.step();
                }
                rack.output(vcf, Vcf::OUTPUT).map(|p| p.voltage(0)).unwrap_or(0.0)
            });
        });
    }

    group.finish();
}

fn bench_respawn(c: &mut Criterion) {
    let mut group = c.benchmark_group("rack/respawn");

    group.bench_function("sample_rate_change", |b| {
        let (mut rack, vcf) = create_patch(16);
        for _ in 0..BUFFER {
            rack.step();
        }

        b.iter(|| {
            rack.set_sample_rate(black_box(SAMPLE_RATE));
            rack.step();
            rack.output(vcf, Vcf::OUTPUT).map(|p| p.voltage(0)).unwrap_or(0.0)
        });
    });

    group.finish();
}

criterion_group!(
    module_benches,
    bench_vco,
    bench_vcf,
    bench_lfo,
    bench_dual_function,
    bench_fx,
);

criterion_group!(rack_benches, bench_rack_patch, bench_respawn);

criterion_main!(module_benches, rack_benches);
