// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Channel throughput benchmarks.
//!
//! Compares the shared memory handoff channel across slot capacities against
//! the in-process two-thread pipeline.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shmcopy_benchmark::{channel_transfer, payload, PAYLOAD_SIZES, SLOT_CAPACITIES};
use shmcopy_core::{copy_local, SlotCapacity};
use std::time::Duration;

/// Full transfer through a fresh channel, setup and teardown included.
fn bench_channel_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_transfer");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(10));

    for &size in PAYLOAD_SIZES {
        let data = payload(size);
        group.throughput(Throughput::Bytes(size as u64));

        for &capacity in SLOT_CAPACITIES {
            let slot = SlotCapacity::new(capacity).expect("valid capacity");
            let id = BenchmarkId::new(format!("slot_{}", capacity), size);

            group.bench_with_input(id, &data, |b, data| {
                b.iter(|| {
                    let stats = channel_transfer(black_box(data), slot).expect("transfer failed");
                    black_box(stats);
                });
            });
        }
    }

    group.finish();
}

/// Same payloads through the local reader/writer thread pair.
fn bench_local_copy(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_copy");
    group.sample_size(20);

    for &size in PAYLOAD_SIZES {
        let data = payload(size);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| {
                let mut source: &[u8] = black_box(data);
                let mut sink = Vec::with_capacity(data.len());
                let stats = copy_local(&mut source, &mut sink, 64 * 1024).expect("copy failed");
                black_box(stats);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_channel_transfer, bench_local_copy);
criterion_main!(benches);
