use std::{
    hint::black_box,
    io::{Cursor, Read},
};

use criterion::*;
use frameline::{ByteBuffer, Channel};

const CHUNK_SIZE: usize = 4096;

#[inline]
fn read_all(mut stream: impl Read) -> usize {
    let mut buffer = ByteBuffer::with_chunk_size(CHUNK_SIZE);
    while buffer.read_from(&mut stream).unwrap() != 0 {}
    buffer.len(Channel::Inbound)
}

#[inline]
fn read_and_consume(mut stream: impl Read) -> usize {
    let mut buffer = ByteBuffer::with_chunk_size(CHUNK_SIZE);
    let mut total = 0;
    while buffer.read_from(&mut stream).unwrap() != 0 {
        // Typical frame-sized bites off the front.
        while buffer.len(Channel::Inbound) >= 1000 {
            total += buffer.consume(Channel::Inbound, 1000).len();
        }
    }
    total + buffer.len(Channel::Inbound)
}

fn benchmark(c: &mut Criterion) {
    const STREAM_SIZE: usize = 1024 * 1024 * 4;
    let data: Vec<u8> = (0..STREAM_SIZE).map(|_| rand::random()).collect();
    let stream = Cursor::new(data);

    let mut group = c.benchmark_group("buffers");
    group.throughput(Throughput::Bytes(STREAM_SIZE as u64));
    group.bench_function("ByteBuffer::read_from", |b| {
        b.iter(|| read_all(black_box(stream.clone())))
    });
    group.bench_function("ByteBuffer::consume", |b| {
        b.iter(|| read_and_consume(black_box(stream.clone())))
    });
    group.finish();
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
