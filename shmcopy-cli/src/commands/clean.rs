// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmcopy clean` command - Remove stale channel objects.

use shmcopy_core::{Channel, ChannelName, CopyResult};

pub fn execute(channel: &str) -> CopyResult<()> {
    let name = ChannelName::new(channel)?;
    tracing::info!(channel = %name, "Cleaning channel");

    if Channel::remove(&name)? {
        println!("✓ Removed shared memory objects for channel '{}'", name);
    } else {
        println!("○ Nothing to remove for channel '{}'", name);
    }
    Ok(())
}
