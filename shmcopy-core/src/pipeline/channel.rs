// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Channel-mediated driver: one process per side.

use std::time::Instant;

use crate::error::{ChannelError, CopyError, CopyResult};
use crate::io::{ByteSink, ByteSource};
use crate::pipeline::TransferStats;
use crate::shm::Channel;

/// Fill slots from `source` until it is exhausted, then signal end-of-stream.
///
/// On any failure the channel is aborted so the consumer stops waiting.
pub fn run_producer<S>(channel: &mut Channel, source: &mut S) -> CopyResult<TransferStats>
where
    S: ByteSource + ?Sized,
{
    let started = Instant::now();
    let mut stats = TransferStats::default();

    let result = produce(channel, source, &mut stats);
    stats.elapsed = started.elapsed();

    match result {
        Ok(()) => {
            tracing::info!(channel = %channel.name(), %stats, "Producer finished");
            Ok(stats)
        }
        Err(e) => Err(abort_with(channel, e)),
    }
}

fn produce<S>(channel: &mut Channel, source: &mut S, stats: &mut TransferStats) -> CopyResult<()>
where
    S: ByteSource + ?Sized,
{
    loop {
        let mut slot = channel.acquire_for_write()?;
        let len = source.read_chunk(slot.as_mut_slice())?;
        if len == 0 {
            break;
        }
        slot.publish(len)?;
        stats.record(len);
    }

    channel.finish()?;
    Ok(())
}

/// Drain the channel into `sink` until the producer has finished and the last
/// chunk is written.
///
/// On any failure the channel is aborted so the producer stops waiting.
pub fn run_consumer<K>(channel: &mut Channel, sink: &mut K) -> CopyResult<TransferStats>
where
    K: ByteSink + ?Sized,
{
    let started = Instant::now();
    let mut stats = TransferStats::default();

    let result = consume(channel, sink, &mut stats);
    stats.elapsed = started.elapsed();

    match result {
        Ok(()) => {
            tracing::info!(channel = %channel.name(), %stats, "Consumer finished");
            Ok(stats)
        }
        Err(e) => Err(abort_with(channel, e)),
    }
}

fn consume<K>(channel: &mut Channel, sink: &mut K, stats: &mut TransferStats) -> CopyResult<()>
where
    K: ByteSink + ?Sized,
{
    let mut chunk = Vec::with_capacity(channel.capacity());

    while !channel.is_complete()? {
        let len = channel.consume_into(&mut chunk)?;
        if len > 0 {
            sink.write_chunk(&chunk)?;
            stats.record(len);
        }
    }

    sink.flush()
}

/// Tell the peer the transfer failed, then hand back the original error.
fn abort_with(channel: &Channel, error: CopyError) -> CopyError {
    if matches!(
        error,
        CopyError::Channel(ChannelError::PeerAborted { .. } | ChannelError::RoleMismatch { .. })
    ) {
        return error;
    }

    tracing::error!(channel = %channel.name(), role = %channel.role(), error = %error, "Transfer failed");
    if let Err(abort_error) = channel.abort() {
        tracing::error!(
            channel = %channel.name(),
            error = %abort_error,
            "Failed to abort channel"
        );
    }
    error
}
