use criterion::{black_box, criterion_group, criterion_main, Criterion};

use strandstream::assembler::FrameAssembler;
use strandstream::config::AssemblerLimits;
use strandstream::fsm::PrimarySelector;
use strandstream::metric::{Grade, PathMetric};
use strandstream::varint;

fn bench_varint_round_trip(c: &mut Criterion) {
    c.bench_function("varint_encode_decode_4kib", |b| {
        b.iter(|| {
            let enc = varint::encode_to_vec(black_box(4096));
            let (v, _) = varint::decode(&enc).unwrap();
            black_box(v);
        })
    });
}

fn bench_assembler_throughput(c: &mut Criterion) {
    let payload = vec![0x42u8; 200 * 1024];
    let mut wire = Vec::new();
    varint::encode(payload.len() as u64, &mut wire);
    wire.extend_from_slice(&payload);

    c.bench_function("assembler_on_bytes_200kib_frame", |b| {
        b.iter(|| {
            let mut asm = FrameAssembler::new(AssemblerLimits::defaults());
            let mut emitted = 0;
            asm.on_bytes(black_box(1), black_box(&wire), |_, _| emitted += 1)
                .unwrap();
            black_box(emitted);
        })
    });
}

fn bench_fsm_select(c: &mut Criterion) {
    let metric = PathMetric {
        grade: Grade::Good,
        rtt_ms: 40.0,
        loss_pct: 0.0,
    };
    c.bench_function("fsm_select_steady_state", |b| {
        b.iter(|| {
            let mut fsm = PrimarySelector::new();
            let chosen = fsm.select(black_box(metric), black_box(metric), 0, 1, 0);
            black_box(chosen);
        })
    });
}

criterion_group!(
    benches,
    bench_varint_round_trip,
    bench_assembler_throughput,
    bench_fsm_select
);
criterion_main!(benches);
