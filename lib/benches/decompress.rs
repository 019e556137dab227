use std::hint::black_box;
use std::io::{Cursor, Read, Write};

use bgzf2::{BytesWrapper, Reader, WriteOptions};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};

fn text(len: usize) -> Vec<u8> {
    b"the quick brown fox jumps over the lazy dog 0123456789 "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

fn archive(data: &[u8]) -> Vec<u8> {
    let mut writer = WriteOptions::new()
        .compression_level(1)
        .into_writer(Vec::new())
        .unwrap();
    writer.write_all(data).unwrap();
    writer.finish().unwrap()
}

fn decompression(c: &mut Criterion) {
    let data = text(8 << 20);
    let file = archive(&data);
    let mut out = vec![0u8; data.len()];

    let mut group = c.benchmark_group("decompression");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("sequential", |b| {
        b.iter(|| {
            let mut reader = Reader::new(BytesWrapper::new(black_box(&file))).unwrap();
            reader.read_exact(&mut out).unwrap();
        });
    });

    group.bench_function("threaded", |b| {
        b.iter(|| {
            let mut reader = Reader::new(Cursor::new(file.clone()))
                .unwrap()
                .attach_thread_pool(4, 0)
                .unwrap();
            reader.read_exact(&mut out).unwrap();
        });
    });

    group.finish();
}

fn seeks(c: &mut Criterion) {
    let data = text(8 << 20);
    let file = archive(&data);

    let mut group = c.benchmark_group("seek");
    group.bench_function("random_offsets", |b| {
        let mut reader = Reader::new(BytesWrapper::new(&file)).unwrap();
        let mut buf = [0u8; 64];
        let mut offset = 0x5DEE_CE66u64;
        b.iter(|| {
            offset =
                (offset.wrapping_mul(25_214_903_917).wrapping_add(11)) % (data.len() as u64 - 64);
            reader.set_offset(black_box(offset)).unwrap();
            reader.read_exact(&mut buf).unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, decompression, seeks);
criterion_main!(benches);
