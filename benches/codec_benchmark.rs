use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fecal::{gf256, Decoder, Encoder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

fn random_block(input_count: usize, symbol_bytes: usize, seed: u64) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..input_count)
        .map(|_| (0..symbol_bytes).map(|_| rng.gen()).collect())
        .collect()
}

/// Raw field throughput: the muladd kernel dominates both encode and decode
fn bench_gf256_muladd(c: &mut Criterion) {
    let mut group = c.benchmark_group("gf256_muladd");

    for &size in &[64usize, 1300, 64 * 1024] {
        let src = vec![0xA7u8; size];
        let mut dst = vec![0x11u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| gf256::muladd_mem(black_box(&mut dst), 0x8E, black_box(&src)));
        });
    }

    group.finish();
}

/// Recovery symbol synthesis across block sizes
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let symbol_bytes = 1300;

    for &input_count in &[10usize, 100, 1000] {
        let block = random_block(input_count, symbol_bytes, 1);
        let total = (input_count * symbol_bytes) as u64;
        let refs: Vec<&[u8]> = block.iter().map(|b| b.as_slice()).collect();
        let mut encoder = Encoder::new(&refs, total).unwrap();
        let mut out = vec![0u8; symbol_bytes];
        let mut row = 0u32;

        group.throughput(Throughput::Bytes(symbol_bytes as u64));
        group.bench_with_input(
            BenchmarkId::new("symbols", input_count),
            &input_count,
            |b, _| {
                b.iter(|| {
                    encoder.encode(row, black_box(&mut out)).unwrap();
                    row = row.wrapping_add(1);
                });
            },
        );
    }

    group.finish();
}

/// Full decode with 10% of the block lost
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.sample_size(20);
    let symbol_bytes = 1300;

    for &input_count in &[100usize, 500] {
        let block = random_block(input_count, symbol_bytes, 2);
        let total = (input_count * symbol_bytes) as u64;
        let refs: Vec<&[u8]> = block.iter().map(|b| b.as_slice()).collect();
        let mut encoder = Encoder::new(&refs, total).unwrap();

        let loss_count = input_count / 10;
        let mut rng = StdRng::seed_from_u64(3);
        let mut lost: Vec<usize> = Vec::new();
        while lost.len() < loss_count {
            let column = rng.gen_range(0..input_count);
            if !lost.contains(&column) {
                lost.push(column);
            }
        }

        // Two spare rows so the solve virtually never stalls inside the bench
        let symbols: Vec<(u32, Vec<u8>)> = (0..(loss_count + 2) as u32)
            .map(|row| {
                let mut out = vec![0u8; symbol_bytes];
                encoder.encode(row, &mut out).unwrap();
                (row, out)
            })
            .collect();

        group.throughput(Throughput::Bytes(total));
        group.bench_with_input(
            BenchmarkId::new("block", input_count),
            &input_count,
            |b, _| {
                b.iter(|| {
                    let mut decoder = Decoder::new(input_count, total).unwrap();
                    for (column, data) in block.iter().enumerate() {
                        if !lost.contains(&column) {
                            decoder.add_original(column, data).unwrap();
                        }
                    }
                    for (row, data) in &symbols {
                        decoder.add_recovery(*row, data.clone()).unwrap();
                    }
                    // A stalled solve is possible in principle; count it as
                    // zero instead of aborting the whole run
                    black_box(decoder.decode().map(|r| r.len()).unwrap_or(0))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_gf256_muladd, bench_encode, bench_decode);
criterion_main!(benches);
