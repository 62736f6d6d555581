//! Criterion benchmarks for the produce and drain hot paths.
//!
//! Run with: cargo bench -p ring-buffer --bench produce_consume

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ring_buffer::{InternalMemory, RingBuffer, SimulatedSramBus, Sram};
use sd_protocol::{BlockSource, BLOCK_SIZE};

/// One interrupt's worth of work: a single 16-bit sample
fn produce_sample(c: &mut Criterion) {
    let (mut producer, mut consumer) = RingBuffer::new(InternalMemory::new(1 << 16))
        .unwrap()
        .split();

    let mut group = c.benchmark_group("produce");
    group.throughput(Throughput::Bytes(2));
    group.bench_function("sample_internal", |b| {
        b.iter(|| {
            if consumer.pending() > (1 << 15) {
                consumer.consume_block(|_| Ok::<_, ()>(()));
            }
            producer.produce_sample(black_box(0x1234)).unwrap();
        });
    });
    group.finish();
}

/// Draining a block through the same byte-at-a-time path the card uses
fn drain_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain_block");
    group.throughput(Throughput::Bytes(BLOCK_SIZE as u64));

    for bits in [12u32, 19] {
        let memory = Sram::new(SimulatedSramBus::new(bits), bits);
        let (mut producer, mut consumer) = RingBuffer::new(memory).unwrap().split();

        group.bench_with_input(BenchmarkId::new("sram", bits), &bits, |b, _| {
            b.iter(|| {
                for i in 0..BLOCK_SIZE {
                    producer.produce(i as u8).unwrap();
                }
                let sum = consumer.consume_block(|reader| {
                    let mut acc = 0u32;
                    for i in 0..BLOCK_SIZE {
                        acc = acc.wrapping_add(reader.byte_at(i) as u32);
                    }
                    Ok::<_, ()>(acc)
                });
                black_box(sum)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, produce_sample, drain_block);
criterion_main!(benches);
