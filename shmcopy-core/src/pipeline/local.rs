// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Local driver: a reader thread and a writer thread joined by a queue.
//!
//! The queue is unbounded: the reader never waits for the writer, trading
//! memory for throughput. Channel mode is the bounded alternative.

use std::collections::VecDeque;
use std::thread;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::CopyResult;
use crate::io::{ByteSink, ByteSource};
use crate::pipeline::TransferStats;

#[derive(Default)]
struct QueueState {
    chunks: VecDeque<Vec<u8>>,
    /// Reader hit end of stream.
    done: bool,
    /// Either side failed; both stop doing I/O.
    errored: bool,
}

/// Ordered chunk queue shared by the two threads.
#[derive(Default)]
struct ChunkQueue {
    state: Mutex<QueueState>,
    changed: Condvar,
}

impl ChunkQueue {
    /// Returns `false` if the writer already failed.
    fn push(&self, chunk: Vec<u8>) -> bool {
        let mut state = self.state.lock();
        if state.errored {
            return false;
        }
        state.chunks.push_back(chunk);
        self.changed.notify_one();
        true
    }

    /// Next chunk, or `None` once the queue is drained and done, or on error.
    fn pop(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        loop {
            if state.errored {
                return None;
            }
            if let Some(chunk) = state.chunks.pop_front() {
                return Some(chunk);
            }
            if state.done {
                return None;
            }
            self.changed.wait(&mut state);
        }
    }

    fn finish(&self) {
        self.state.lock().done = true;
        self.changed.notify_all();
    }

    fn fail(&self) {
        let mut state = self.state.lock();
        state.errored = true;
        state.chunks.clear();
        self.changed.notify_all();
    }

    fn is_errored(&self) -> bool {
        self.state.lock().errored
    }
}

/// Copy `source` into `sink` on two threads, reading `chunk_size` bytes at a time.
///
/// Returns the first I/O error from either side.
pub fn copy_local<S, K>(source: &mut S, sink: &mut K, chunk_size: usize) -> CopyResult<TransferStats>
where
    S: ByteSource + Send + ?Sized,
    K: ByteSink + Send + ?Sized,
{
    let started = Instant::now();
    let chunk_size = chunk_size.max(1);
    let queue = ChunkQueue::default();

    let (read_result, write_result) = thread::scope(|scope| {
        let reader = scope.spawn(|| read_into(&queue, source, chunk_size));
        let writer = scope.spawn(|| write_from(&queue, sink));

        let read_result = reader
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
        let write_result = writer
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
        (read_result, write_result)
    });

    read_result?;
    let mut stats = write_result?;
    stats.elapsed = started.elapsed();

    tracing::info!(%stats, "Local copy finished");
    Ok(stats)
}

fn read_into<S>(queue: &ChunkQueue, source: &mut S, chunk_size: usize) -> CopyResult<()>
where
    S: ByteSource + ?Sized,
{
    loop {
        if queue.is_errored() {
            return Ok(());
        }

        let mut chunk = vec![0u8; chunk_size];
        match source.read_chunk(&mut chunk) {
            Ok(0) => {
                queue.finish();
                return Ok(());
            }
            Ok(len) => {
                chunk.truncate(len);
                if !queue.push(chunk) {
                    return Ok(());
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Reader failed");
                queue.fail();
                return Err(e);
            }
        }
    }
}

fn write_from<K>(queue: &ChunkQueue, sink: &mut K) -> CopyResult<TransferStats>
where
    K: ByteSink + ?Sized,
{
    let mut stats = TransferStats::default();

    while let Some(chunk) = queue.pop() {
        if let Err(e) = sink.write_chunk(&chunk) {
            tracing::error!(error = %e, "Writer failed");
            queue.fail();
            return Err(e);
        }
        stats.record(chunk.len());
    }

    if !queue.is_errored() {
        if let Err(e) = sink.flush() {
            queue.fail();
            return Err(e);
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CopyError;

    struct BrokenSink {
        accepted: usize,
    }

    impl ByteSink for BrokenSink {
        fn write_chunk(&mut self, _chunk: &[u8]) -> CopyResult<()> {
            if self.accepted == 2 {
                return Err(CopyError::io(
                    "writing test sink",
                    std::io::Error::from(std::io::ErrorKind::WriteZero),
                ));
            }
            self.accepted += 1;
            Ok(())
        }
    }

    #[test]
    fn test_local_copy_preserves_bytes() {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut source: &[u8] = &payload;
        let mut sink = Vec::new();

        let stats = copy_local(&mut source, &mut sink, 333).unwrap();
        assert_eq!(sink, payload);
        assert_eq!(stats.bytes, payload.len() as u64);
        assert_eq!(stats.chunks, payload.len().div_ceil(333) as u64);
    }

    #[test]
    fn test_local_copy_empty_source() {
        let mut source: &[u8] = &[];
        let mut sink = Vec::new();
        let stats = copy_local(&mut source, &mut sink, 64).unwrap();
        assert!(sink.is_empty());
        assert_eq!(stats.chunks, 0);
    }

    #[test]
    fn test_sink_failure_stops_reader() {
        let payload = vec![1u8; 1024 * 1024];
        let mut source: &[u8] = &payload;
        let mut sink = BrokenSink { accepted: 0 };

        let err = copy_local(&mut source, &mut sink, 16).unwrap_err();
        assert!(matches!(err, CopyError::Io { .. }));
        assert_eq!(sink.accepted, 2);
    }

    #[test]
    fn test_pop_after_done_drains_remaining() {
        let queue = ChunkQueue::default();
        assert!(queue.push(vec![1]));
        queue.finish();
        assert_eq!(queue.pop(), Some(vec![1]));
        assert_eq!(queue.pop(), None);
    }
}
