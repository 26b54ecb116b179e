// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Every field has a default, so an absent file means "use defaults".
//! Any invalid field results in a HardValidationError before a channel is opened.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CopyError, CopyResult, HardValidationError};
use crate::shm::ChannelOptions;
use crate::types::SlotCapacity;

/// Longest accepted wait bound: 1 hour.
const MAX_TIMEOUT_MS: u64 = 3_600_000;

/// Largest local-mode read: 64 MB.
const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Raw channel configuration as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawChannelConfig {
    #[serde(default = "default_slot_capacity")]
    slot_capacity: usize,
    #[serde(default = "default_wait_timeout_ms")]
    wait_timeout_ms: u64,
    #[serde(default = "default_wait_timeout_ms")]
    drain_timeout_ms: u64,
    #[serde(default = "default_init_lock_timeout_ms")]
    init_lock_timeout_ms: u64,
    #[serde(default = "default_verify_checksums")]
    verify_checksums: bool,
}

fn default_slot_capacity() -> usize {
    64 * 1024 // 64KB
}

fn default_wait_timeout_ms() -> u64 {
    10_000 // 10 seconds
}

fn default_init_lock_timeout_ms() -> u64 {
    5_000
}

fn default_verify_checksums() -> bool {
    true
}

impl Default for RawChannelConfig {
    fn default() -> Self {
        Self {
            slot_capacity: default_slot_capacity(),
            wait_timeout_ms: default_wait_timeout_ms(),
            drain_timeout_ms: default_wait_timeout_ms(),
            init_lock_timeout_ms: default_init_lock_timeout_ms(),
            verify_checksums: default_verify_checksums(),
        }
    }
}

/// Raw local pipeline configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPipelineConfig {
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
}

fn default_chunk_size() -> usize {
    64 * 1024
}

impl Default for RawPipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

/// Raw root configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    channel: RawChannelConfig,
    #[serde(default)]
    pipeline: RawPipelineConfig,
}

/// Validated local pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub chunk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

/// Complete validated configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub channel: ChannelOptions,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Override the slot capacity (CLI `--capacity`).
    pub fn set_capacity(&mut self, bytes: usize) -> CopyResult<()> {
        self.channel.capacity = SlotCapacity::new(bytes)?;
        Ok(())
    }

    /// Override both the data and drain wait bounds (CLI `--timeout-ms`).
    pub fn set_timeout_ms(&mut self, timeout_ms: u64) -> CopyResult<()> {
        let timeout = ConfigLoader::validate_timeout("timeout_ms", timeout_ms)?;
        self.channel = self.channel.clone().with_timeout(timeout);
        Ok(())
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    /// Returns HardValidationError for any invalid fields.
    pub fn load_file(path: impl AsRef<Path>) -> CopyResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(CopyError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| CopyError::io(format!("reading config file {}", path.display()), e))?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> CopyResult<Config> {
        if content.trim().is_empty() {
            return Self::validate(RawConfig::default());
        }

        let raw: RawConfig = serde_yaml::from_str(content).map_err(|e| CopyError::ConfigParse {
            message: format!("YAML parse error: {}", e),
        })?;

        Self::validate(raw)
    }

    /// Validate raw configuration and convert to validated types.
    fn validate(raw: RawConfig) -> CopyResult<Config> {
        let channel = Self::validate_channel(raw.channel)?;
        let pipeline = Self::validate_pipeline(raw.pipeline)?;
        Ok(Config { channel, pipeline })
    }

    /// Validate channel configuration.
    fn validate_channel(raw: RawChannelConfig) -> CopyResult<ChannelOptions> {
        let capacity = SlotCapacity::new(raw.slot_capacity)?;

        Ok(ChannelOptions {
            capacity,
            wait_timeout: Self::validate_timeout("wait_timeout_ms", raw.wait_timeout_ms)?,
            drain_timeout: Self::validate_timeout("drain_timeout_ms", raw.drain_timeout_ms)?,
            init_lock_timeout: Self::validate_timeout(
                "init_lock_timeout_ms",
                raw.init_lock_timeout_ms,
            )?,
            verify_checksums: raw.verify_checksums,
        })
    }

    /// Validate local pipeline configuration.
    fn validate_pipeline(raw: RawPipelineConfig) -> CopyResult<PipelineConfig> {
        if raw.chunk_size == 0 || raw.chunk_size > MAX_CHUNK_SIZE {
            return Err(HardValidationError::InvalidFieldValue {
                field: "chunk_size",
                value: raw.chunk_size.to_string(),
                reason: format!("Must be between 1 and {} bytes", MAX_CHUNK_SIZE),
            }
            .into());
        }

        Ok(PipelineConfig {
            chunk_size: raw.chunk_size,
        })
    }

    /// Every wait is bounded: zero and absurdly long bounds are both rejected.
    fn validate_timeout(field: &'static str, timeout_ms: u64) -> CopyResult<Duration> {
        if timeout_ms == 0 || timeout_ms > MAX_TIMEOUT_MS {
            return Err(HardValidationError::InvalidFieldValue {
                field,
                value: timeout_ms.to_string(),
                reason: format!("Must be between 1 and {}ms", MAX_TIMEOUT_MS),
            }
            .into());
        }
        Ok(Duration::from_millis(timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"
channel:
  slot_capacity: 4096
  wait_timeout_ms: 2500
  drain_timeout_ms: 3000
  init_lock_timeout_ms: 1000
  verify_checksums: false

pipeline:
  chunk_size: 8192
"#;

    #[test]
    fn test_valid_config() {
        let config = ConfigLoader::load_string(VALID_CONFIG).unwrap();
        assert_eq!(config.channel.capacity.bytes(), 4096);
        assert_eq!(config.channel.wait_timeout, Duration::from_millis(2500));
        assert_eq!(config.channel.drain_timeout, Duration::from_millis(3000));
        assert_eq!(config.channel.init_lock_timeout, Duration::from_secs(1));
        assert!(!config.channel.verify_checksums);
        assert_eq!(config.pipeline.chunk_size, 8192);
    }

    #[test]
    fn test_defaults_applied() {
        let config = ConfigLoader::load_string("channel:\n  slot_capacity: 128\n").unwrap();
        assert_eq!(config.channel.capacity.bytes(), 128);
        assert_eq!(config.channel.wait_timeout, Duration::from_secs(10));
        assert!(config.channel.verify_checksums);
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = ConfigLoader::load_string("").unwrap();
        assert_eq!(config.channel.capacity, SlotCapacity::DEFAULT);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let yaml = "channel:\n  slot_capacity: 0\n";
        assert!(matches!(
            ConfigLoader::load_string(yaml),
            Err(CopyError::HardValidation(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let yaml = "channel:\n  wait_timeout_ms: 0\n";
        assert!(ConfigLoader::load_string(yaml).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "channel:\n  slots: 3\n";
        assert!(matches!(
            ConfigLoader::load_string(yaml),
            Err(CopyError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ConfigLoader::load_file("/definitely/not/here.yaml"),
            Err(CopyError::ConfigNotFound { .. })
        ));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = Config::default();
        config.set_capacity(512).unwrap();
        config.set_timeout_ms(750).unwrap();
        assert_eq!(config.channel.capacity.bytes(), 512);
        assert_eq!(config.channel.wait_timeout, Duration::from_millis(750));
        assert_eq!(config.channel.drain_timeout, Duration::from_millis(750));
        assert!(config.set_timeout_ms(0).is_err());
        assert!(config.set_capacity(0).is_err());
    }
}
