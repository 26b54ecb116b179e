// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Copy pipeline drivers.
//!
//! Two shapes share the same source → sink contract:
//! - channel mode drives one side of a shared memory [`Channel`](crate::shm::Channel),
//! - local mode moves chunks between two threads of one process.

mod channel;
mod local;

use std::fmt;
use std::time::Duration;

pub use channel::{run_consumer, run_producer};
pub use local::copy_local;

/// Summary of one side of a finished transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Non-empty chunks moved.
    pub chunks: u64,
    /// Total bytes moved.
    pub bytes: u64,
    /// Wall-clock time spent in the driver.
    pub elapsed: Duration,
}

impl TransferStats {
    pub(crate) fn record(&mut self, len: usize) {
        self.chunks += 1;
        self.bytes += len as u64;
    }
}

impl fmt::Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes in {} chunks ({:.1} ms)",
            self.bytes,
            self.chunks,
            self.elapsed.as_secs_f64() * 1000.0
        )
    }
}
