// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmcopy copy` command - Copy a file locally or through a channel.

use std::path::Path;

use shmcopy_core::io::same_file;
use shmcopy_core::{
    copy_local, run_consumer, run_producer, Channel, ChannelName, Config, CopyError, CopyResult,
    FileSink, FileSource, Role, TransferStats,
};

pub fn execute(
    config: &Config,
    source: &Path,
    dest: &Path,
    channel: Option<&str>,
) -> CopyResult<()> {
    if same_file(source, dest) {
        tracing::info!(path = %source.display(), "Source and destination are the same file");
        println!("○ Source and destination are the same file, nothing to copy");
        return Ok(());
    }

    match channel {
        None => copy_in_process(config, source, dest),
        Some(channel) => copy_through_channel(config, source, dest, channel),
    }
}

fn copy_in_process(config: &Config, source: &Path, dest: &Path) -> CopyResult<()> {
    tracing::info!(
        source = %source.display(),
        dest = %dest.display(),
        chunk_size = config.pipeline.chunk_size,
        "Copying locally"
    );

    let mut reader = FileSource::open(source)?;
    let mut writer = FileSink::create(dest)?;
    let stats = copy_local(&mut reader, &mut writer, config.pipeline.chunk_size)?;

    report("Copied", &stats);
    Ok(())
}

fn copy_through_channel(
    config: &Config,
    source: &Path,
    dest: &Path,
    channel: &str,
) -> CopyResult<()> {
    let name = ChannelName::new(channel)?;
    let mut channel = Channel::attach(&name, config.channel.clone())?;

    println!("→ Joined channel '{}' as {}", name, channel.role());

    let stats = match channel.role() {
        Role::Producer => {
            let mut reader = match FileSource::open(source) {
                Ok(reader) => reader,
                Err(e) => return Err(abort_before_transfer(&channel, e)),
            };
            run_producer(&mut channel, &mut reader)?
        }
        Role::Consumer => {
            let mut writer = match FileSink::create(dest) {
                Ok(writer) => writer,
                Err(e) => return Err(abort_before_transfer(&channel, e)),
            };
            run_consumer(&mut channel, &mut writer)?
        }
    };

    let outcome = channel.detach()?;
    tracing::debug!(channel = %name, ?outcome, "Detached");

    report("Transferred", &stats);
    Ok(())
}

/// Release the peer when this side cannot even open its file.
fn abort_before_transfer(channel: &Channel, error: CopyError) -> CopyError {
    if let Err(abort_error) = channel.abort() {
        tracing::warn!(channel = %channel.name(), error = %abort_error, "Failed to abort channel");
    }
    error
}

fn report(verb: &str, stats: &TransferStats) {
    println!("✓ {} {}", verb, stats);
}
