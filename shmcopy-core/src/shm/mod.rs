// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared Memory IPC module.
//!
//! Cross-process handoff channel built on POSIX shared memory, a robust
//! process-shared mutex/condvar pair, and a named semaphore that serializes
//! first-time construction.

mod channel;
mod init_lock;
mod region;
mod sync;

pub use channel::{Channel, ChannelOptions, DetachOutcome, WriteSlot};
