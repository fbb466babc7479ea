// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use criterion::{criterion_group, criterion_main, Criterion};
use dmabuf_streamer::{
    device::BufferKind,
    pipeline::{Pipeline, PipelineConfig},
    pool::BufferPool,
    shm::Allocator,
};
use std::rc::Rc;

#[path = "../tests/common/mod.rs"]
mod common;

use common::{CallLog, MemfdAllocator, MockDevice};

pub fn benchmark_checkout(c: &mut Criterion) {
    let mut group = c.benchmark_group("checkout");
    for capacity in [1, 4, 8, 32] {
        let log = CallLog::default();
        let device = MockDevice::new(&log);
        let allocator: Rc<dyn Allocator> = MemfdAllocator::new();
        let pool =
            BufferPool::create(device, BufferKind::Capture, capacity, 614400, &allocator).unwrap();

        group.bench_function(format!("capacity-{}", capacity), |b| {
            b.iter(|| {
                let handle = pool.checkout().unwrap();
                handle.release().unwrap();
                log.borrow_mut().clear();
            })
        });
    }
    group.finish();
}

pub fn benchmark_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    for (width, height) in [(640, 480), (1920, 1080)] {
        let log = CallLog::default();
        let config = PipelineConfig {
            width,
            height,
            ..Default::default()
        };
        let mut pipeline = Pipeline::new(
            MockDevice::new(&log),
            MockDevice::new(&log),
            MemfdAllocator::new(),
            &config,
        )
        .unwrap();
        pipeline.start_streaming().unwrap();
        let mut sink: Vec<u8> = Vec::new();

        group.bench_function(format!("{}x{}", width, height), |b| {
            b.iter(|| {
                pipeline.next_frame(&mut sink).unwrap();
                sink.clear();
                log.borrow_mut().clear();
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_checkout, benchmark_frame);
criterion_main!(benches);
