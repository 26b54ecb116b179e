//! Custom error types for shmcopy.
//!
//! This module defines explicit enum error types as per coding guidelines.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{ChannelName, Role};

/// Top-level error type for a copy operation.
/// All errors are explicit variants - no catch-all or generic handling.
#[derive(Debug, Error)]
pub enum CopyError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Channel Errors - No Retry, No Fallback to Local Mode
    // =========================================================================
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // =========================================================================
    // Source / Sink Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl CopyError {
    /// Wrap an IO error with the operation and path it happened on.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Hard validation errors stop the copy before any OS object is touched.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Shared memory channel errors - every one is fatal to the caller.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel '{name}' already has a producer and a consumer attached")]
    Occupied { name: ChannelName },

    #[error("Channel '{name}' timed out after {waited:?} waiting to {operation}")]
    Timeout {
        name: ChannelName,
        operation: &'static str,
        waited: Duration,
    },

    #[error("Peer on channel '{name}' aborted the transfer")]
    PeerAborted { name: ChannelName },

    #[error("Channel protocol invariant violated: {reason}")]
    ProtocolInvariant { reason: String },

    #[error("Channel '{name}' was created with slot capacity {actual}, requested {expected}")]
    CapacityMismatch {
        name: ChannelName,
        expected: usize,
        actual: usize,
    },

    #[error("Operation requires the {expected} role, but this handle is the {actual}")]
    RoleMismatch { expected: Role, actual: Role },

    #[error("Slot checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Failed to create shared memory region: {name} - {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Failed to map shared memory: {reason}")]
    MapFailed { reason: String },

    #[error("System call failed: {syscall} - {reason}")]
    Syscall {
        syscall: &'static str,
        reason: String,
    },
}

impl ChannelError {
    /// Build a `Syscall` error from a pthread/semaphore style return code.
    pub(crate) fn from_errno(syscall: &'static str, errno: i32) -> Self {
        Self::Syscall {
            syscall,
            reason: std::io::Error::from_raw_os_error(errno).to_string(),
        }
    }
}

/// Result type alias using CopyError.
pub type CopyResult<T> = Result<T, CopyError>;

/// Result type alias for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
