//! Criterion benchmark untuk Ring Buffer
//!
//! Run dengan: cargo bench

use std::io::{self, Read, Write};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use courier::core::RingBuffer;
use courier::protocol::LengthFieldCodec;
use courier::Codec;

/// Sink/source tanpa syscall untuk mengukur jalur vectored
struct Null;

impl Write for Null {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        Ok(bufs.iter().map(|b| b.len()).sum())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for Null {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(buf.len())
    }
}

fn bench_write_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");

    for size in [64usize, 1024, 16 * 1024].iter() {
        let payload = vec![0xABu8; *size];
        group.throughput(Throughput::Bytes(*size as u64));

        // Write lalu read, posisi cursor terus berputar
        group.bench_function(format!("write_read_{}", size), |b| {
            let mut rb = RingBuffer::with_capacity(64 * 1024);
            let mut out = vec![0u8; *size];
            b.iter(|| {
                rb.write(black_box(&payload)).unwrap();
                black_box(rb.read(&mut out));
            });
        });

        group.bench_function(format!("write_release_{}", size), |b| {
            let mut rb = RingBuffer::with_capacity(64 * 1024);
            b.iter(|| {
                rb.write(black_box(&payload)).unwrap();
                rb.release(black_box(*size));
            });
        });
    }

    group.finish();
}

fn bench_vectored(c: &mut Criterion) {
    let mut group = c.benchmark_group("vectored");
    group.throughput(Throughput::Bytes(64 * 1024));

    // Cursor digeser supaya transfer melewati batas wrap
    group.bench_function("copy_from_write_to", |b| {
        let mut rb = RingBuffer::with_capacity(64 * 1024);
        rb.write(&vec![0u8; 40 * 1024]).unwrap();
        rb.release(40 * 1024);
        b.iter(|| {
            let n = rb.copy_from(&mut Null).unwrap();
            black_box(n);
            while !rb.is_empty() {
                rb.write_to(&mut Null).unwrap();
            }
        });
    });

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("length_field");
    let codec = LengthFieldCodec::new();
    let payload = vec![7u8; 512];
    let frame = codec.encode(&payload).unwrap();
    group.throughput(Throughput::Bytes(frame.len() as u64));

    group.bench_function("encode_512", |b| {
        b.iter(|| black_box(codec.encode(black_box(&payload)).unwrap()));
    });

    group.bench_function("decode_512", |b| {
        b.iter(|| black_box(codec.decode(black_box(&frame)).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_write_read, bench_vectored, bench_codec);
criterion_main!(benches);
