use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lidarmap::io::{decode, encode_capture, DecodeOptions, FormatDescriptor, PointLayout, RawPoint, ScanRecord};
use lidarmap::Pose;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn capture(scans: usize, points: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(3);
    let records: Vec<ScanRecord> = (0..scans)
        .map(|i| ScanRecord {
            offset: 0,
            timestamp: Some(i as f64 * 0.1),
            pose: Some(Pose::from_yaw(i as f64 * 0.01, [i as f64 * 0.2, 0.0, 0.0])),
            points: (0..points)
                .map(|_| RawPoint {
                    intensity: Some(rng.gen_range(0.0..255.0f32) as f64),
                    ..RawPoint::xyz(
                        rng.gen_range(-30.0..30.0f32) as f64,
                        rng.gen_range(-30.0..30.0f32) as f64,
                        rng.gen_range(-2.0..2.0f32) as f64,
                    )
                })
                .collect(),
        })
        .collect();
    encode_capture(&records, &FormatDescriptor::new(PointLayout::xyzi_f32())).unwrap_or_default()
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for scans in [10, 100] {
        let bytes = capture(scans, 10_000);
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("binary", scans), &bytes, |b, bytes| {
            b.iter(|| decode(bytes, &DecodeOptions::default()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
