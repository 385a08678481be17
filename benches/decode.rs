use camera_acquisition::capture::{decode, PixelFormat};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 1024;

fn raw_buffer(format: PixelFormat) -> Vec<u8> {
    let bytes_per_pixel = format.bytes_per_pixel().unwrap_or(1);
    (0..(WIDTH * HEIGHT) as usize * bytes_per_pixel)
        .map(|i| (i.wrapping_mul(31) % 251) as u8)
        .collect()
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(u64::from(WIDTH * HEIGHT)));

    for format in [
        PixelFormat::Bgr8,
        PixelFormat::Rgb8,
        PixelFormat::BayerRg8,
        PixelFormat::BayerGb8,
    ] {
        let raw = raw_buffer(format);
        group.bench_with_input(BenchmarkId::from_parameter(format), &raw, |b, raw| {
            b.iter(|| decode(black_box(raw), WIDTH, HEIGHT, format))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
