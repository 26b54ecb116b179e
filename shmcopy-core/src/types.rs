// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! All types validate their invariants at creation time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Prefix applied to every OS object name derived from a channel name.
const OBJECT_PREFIX: &str = "shmcopy.";

/// Maximum channel name length. Leaves room for the prefix, the `.init`
/// suffix and glibc's `sem.` prefix inside NAME_MAX (255).
const MAX_CHANNEL_NAME_LEN: usize = 200;

/// Minimum slot capacity: 1 byte.
const MIN_SLOT_CAPACITY: usize = 1;
/// Maximum slot capacity: 1 GB.
const MAX_SLOT_CAPACITY: usize = 1024 * 1024 * 1024;

/// Validated channel name shared by the two participants.
/// Must be non-empty, alphanumeric with hyphens/underscores/dots, max 200 chars.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    /// Create a new ChannelName with validation.
    pub fn new(name: impl Into<String>) -> Result<Self, HardValidationError> {
        let name = name.into();

        if name.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "channel_name",
                value: name,
                reason: "Channel name cannot be empty".to_string(),
            });
        }

        if name.len() > MAX_CHANNEL_NAME_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "channel_name",
                value: name.clone(),
                reason: format!(
                    "Channel name too long: {} chars (max {})",
                    name.len(),
                    MAX_CHANNEL_NAME_LEN
                ),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(HardValidationError::InvalidFieldValue {
                field: "channel_name",
                value: name,
                reason: "Channel name must contain only ASCII alphanumeric characters, hyphens, underscores, and dots".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// POSIX name of the shared memory object backing this channel.
    pub fn shm_object_name(&self) -> String {
        format!("/{}{}", OBJECT_PREFIX, self.0)
    }

    /// POSIX name of the named semaphore serializing header construction.
    pub fn init_lock_name(&self) -> String {
        format!("/{}{}.init", OBJECT_PREFIX, self.0)
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ChannelName {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelName> for String {
    fn from(name: ChannelName) -> Self {
        name.0
    }
}

/// Validated per-slot capacity in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct SlotCapacity(usize);

impl SlotCapacity {
    /// Default slot capacity: 64 KB.
    pub const DEFAULT: Self = Self(64 * 1024);

    /// Create a new SlotCapacity with validation.
    pub fn new(bytes: usize) -> Result<Self, HardValidationError> {
        if !(MIN_SLOT_CAPACITY..=MAX_SLOT_CAPACITY).contains(&bytes) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "slot_capacity",
                value: bytes.to_string(),
                reason: format!(
                    "Must be between {} and {} bytes",
                    MIN_SLOT_CAPACITY, MAX_SLOT_CAPACITY
                ),
            });
        }
        Ok(Self(bytes))
    }

    /// Get the capacity in bytes.
    pub fn bytes(&self) -> usize {
        self.0
    }
}

impl Default for SlotCapacity {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for SlotCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.0)
    }
}

impl TryFrom<usize> for SlotCapacity {
    type Error = HardValidationError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SlotCapacity> for usize {
    fn from(capacity: SlotCapacity) -> Self {
        capacity.0
    }
}

/// Role negotiated at attach time, fixed for the lifetime of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// First participant: reads the source and fills slots.
    Producer,
    /// Second participant: drains slots into the sink.
    Consumer,
}

impl Role {
    /// Role for the participant whose attach produced `process_count`.
    pub(crate) const fn from_arrival(process_count: u32) -> Self {
        if process_count == 2 {
            Self::Consumer
        } else {
            Self::Producer
        }
    }

    /// Get the role name for log and error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One of the two fixed-capacity data slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    /// Decode the slot index stored in shared memory.
    /// Any value other than 0 maps to B so a corrupted byte cannot index out of range.
    pub(crate) const fn from_index(index: u8) -> Self {
        if index == 0 {
            Self::A
        } else {
            Self::B
        }
    }

    /// Index of this slot in the shared arrays.
    pub(crate) const fn index(&self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    /// The slot used for the next handoff.
    pub const fn other(&self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_valid() {
        let name = ChannelName::new("shared_mem").unwrap();
        assert_eq!(name.as_str(), "shared_mem");
        assert_eq!(name.shm_object_name(), "/shmcopy.shared_mem");
        assert_eq!(name.init_lock_name(), "/shmcopy.shared_mem.init");
    }

    #[test]
    fn test_channel_name_invalid() {
        assert!(ChannelName::new("").is_err());
        assert!(ChannelName::new("a/b").is_err());
        assert!(ChannelName::new("with space").is_err());
        assert!(ChannelName::new("x".repeat(MAX_CHANNEL_NAME_LEN + 1)).is_err());
        assert!(ChannelName::new("x".repeat(MAX_CHANNEL_NAME_LEN)).is_ok());
    }

    #[test]
    fn test_slot_capacity_bounds() {
        assert!(SlotCapacity::new(0).is_err());
        assert!(SlotCapacity::new(MAX_SLOT_CAPACITY + 1).is_err());
        assert_eq!(SlotCapacity::new(1).unwrap().bytes(), 1);
        assert_eq!(SlotCapacity::default().bytes(), 64 * 1024);
    }

    #[test]
    fn test_role_from_arrival() {
        assert_eq!(Role::from_arrival(1), Role::Producer);
        assert_eq!(Role::from_arrival(2), Role::Consumer);
        assert_eq!(Role::Consumer.to_string(), "consumer");
    }

    #[test]
    fn test_slot_alternation() {
        assert_eq!(Slot::A.other(), Slot::B);
        assert_eq!(Slot::B.other().other(), Slot::B);
        assert_eq!(Slot::from_index(0), Slot::A);
        assert_eq!(Slot::from_index(7), Slot::B);
        assert_eq!(Slot::B.index(), 1);
    }
}
