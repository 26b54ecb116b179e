//! shmcopy Core Library
//!
//! Brokerless file copy between two processes. Provides the shared memory
//! handoff channel, the copy pipeline drivers, file sources and sinks, and
//! configuration parsing.

pub mod config;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod shm;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigLoader, PipelineConfig};
pub use error::{ChannelError, ChannelResult, CopyError, CopyResult, HardValidationError};
pub use io::{ByteSink, ByteSource, FileSink, FileSource};
pub use pipeline::{copy_local, run_consumer, run_producer, TransferStats};
pub use shm::{Channel, ChannelOptions, DetachOutcome};
pub use types::{ChannelName, Role, Slot, SlotCapacity};
