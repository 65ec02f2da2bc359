use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use image::{ImageFormat, Rgb, RgbImage};
use std::hint::black_box;
use tempfile::TempDir;
use umbra_core::HiddenRegion;
use umbra_render::{fill_polygon, Compositor};

fn regions(n: usize) -> Vec<HiddenRegion> {
    (0..n)
        .map(|i| {
            let o = (i % 10) as f64 * 0.08;
            HiddenRegion::new(vec![(o, o), (o + 0.2, o), (o + 0.1, o + 0.2)], "#202020")
        })
        .collect()
}

fn bench_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("Raster");
    let square = [(100, 100), (900, 100), (900, 900), (100, 900)];
    group.throughput(Throughput::Elements(800 * 800));

    group.bench_function("fill_800x800_square", |b| {
        let mut img = RgbImage::new(1024, 1024);
        b.iter(|| fill_polygon(&mut img, black_box(&square), Rgb([0, 0, 0])))
    });
    group.finish();
}

fn bench_composite(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("map.png");
    RgbImage::from_pixel(1280, 720, Rgb([180, 160, 120]))
        .save_with_format(&src, ImageFormat::Png)
        .unwrap();
    let compositor = Compositor::new();

    let mut group = c.benchmark_group("Composite");
    group.sample_size(20);
    for count in [0usize, 10, 100] {
        let rs = regions(count);
        group.bench_with_input(BenchmarkId::new("jpeg_1280x720", count), &rs, |b, rs| {
            b.iter(|| black_box(compositor.composite_bytes(&src, rs).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fill, bench_composite);
criterion_main!(benches);
