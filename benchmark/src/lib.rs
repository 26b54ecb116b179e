// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! shmcopy Benchmarking Helpers
//!
//! Shared setup for the criterion benches: payload generation, unique channel
//! names, and a complete two-sided channel transfer driven from one process.
//!
//! # Benchmark Groups
//!
//! - **channel_transfer**: producer and consumer threads over a real channel
//! - **local_copy**: the in-process two-thread pipeline

use std::thread;

use shmcopy_core::{
    run_consumer, run_producer, Channel, ChannelName, ChannelOptions, CopyResult,
    HardValidationError, SlotCapacity, TransferStats,
};

/// Payload sizes used across benches.
pub const PAYLOAD_SIZES: &[usize] = &[64 * 1024, 1024 * 1024, 16 * 1024 * 1024];

/// Slot capacities used across benches.
pub const SLOT_CAPACITIES: &[usize] = &[4 * 1024, 64 * 1024, 1024 * 1024];

/// Deterministic, non-constant payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Channel name no other bench iteration or process is using.
pub fn unique_channel(prefix: &str) -> Result<ChannelName, HardValidationError> {
    ChannelName::new(format!("{}-{}", prefix, uuid::Uuid::new_v4().simple()))
}

/// Move `data` through a fresh channel with the producer on this thread and
/// the consumer on a helper thread. Returns the consumer's stats.
pub fn channel_transfer(data: &[u8], capacity: SlotCapacity) -> CopyResult<TransferStats> {
    let name = unique_channel("bench")?;
    let options = ChannelOptions::default().with_capacity(capacity);

    let mut producer = Channel::attach(&name, options.clone())?;

    let consumer = thread::spawn({
        let name = name.clone();
        let expected = data.len();
        move || -> CopyResult<TransferStats> {
            let mut channel = Channel::attach(&name, options)?;
            let mut sink = Vec::with_capacity(expected);
            let stats = run_consumer(&mut channel, &mut sink)?;
            channel.detach()?;
            Ok(stats)
        }
    });

    let mut source = data;
    run_producer(&mut producer, &mut source)?;
    producer.detach()?;

    match consumer.join() {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
