// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! System-wide named lock serializing channel header construction.
//!
//! Backed by a POSIX named semaphore with an initial count of 1. It lives
//! outside the shared region so it exists before the region's own mutex does.

use std::ffi::CString;
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use crate::error::{ChannelError, ChannelResult};
use crate::shm::sync::deadline_after;
use crate::types::ChannelName;

/// Handle to the init lock of one channel.
pub(crate) struct InitLock {
    channel: ChannelName,
    sem: NonNull<libc::sem_t>,
}

// SAFETY: POSIX semaphores may be used from any thread.
unsafe impl Send for InitLock {}

// SAFETY: sem_timedwait/sem_post are thread-safe.
unsafe impl Sync for InitLock {}

impl InitLock {
    /// Open the init lock for `channel`, creating it unlocked if missing.
    pub fn open(channel: &ChannelName) -> ChannelResult<Self> {
        let c_name = Self::c_name(channel)?;

        // SAFETY: c_name is a valid CString; mode and value are passed as the
        // promoted unsigned ints sem_open expects with O_CREAT.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                0o600 as libc::c_uint,
                1 as libc::c_uint,
            )
        };

        if sem == libc::SEM_FAILED {
            return Err(ChannelError::Syscall {
                syscall: "sem_open",
                reason: std::io::Error::last_os_error().to_string(),
            });
        }

        let sem = NonNull::new(sem).ok_or_else(|| ChannelError::Syscall {
            syscall: "sem_open",
            reason: "returned null".to_string(),
        })?;

        Ok(Self {
            channel: channel.clone(),
            sem,
        })
    }

    /// Acquire the lock, giving up after `timeout`.
    ///
    /// A holder that crashed never posts the semaphore back, so the wait is
    /// always bounded.
    pub fn acquire(&self, timeout: Duration) -> ChannelResult<InitLockGuard<'_>> {
        let started = Instant::now();
        let deadline = deadline_after(libc::CLOCK_REALTIME, timeout)?;

        loop {
            // SAFETY: sem is a live semaphore handle from sem_open.
            if unsafe { libc::sem_timedwait(self.sem.as_ptr(), &deadline) } == 0 {
                return Ok(InitLockGuard { lock: self });
            }

            let error = std::io::Error::last_os_error();
            match error.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => {
                    return Err(ChannelError::Timeout {
                        name: self.channel.clone(),
                        operation: "acquire the init lock",
                        waited: started.elapsed(),
                    })
                }
                _ => {
                    return Err(ChannelError::Syscall {
                        syscall: "sem_timedwait",
                        reason: error.to_string(),
                    })
                }
            }
        }
    }

    /// Remove the named semaphore. Returns `false` if it did not exist.
    pub fn unlink(channel: &ChannelName) -> ChannelResult<bool> {
        let c_name = Self::c_name(channel)?;

        // SAFETY: c_name is a valid CString.
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == 0 {
            tracing::debug!(channel = %channel, "Unlinked init lock");
            return Ok(true);
        }

        let error = std::io::Error::last_os_error();
        if error.raw_os_error() == Some(libc::ENOENT) {
            return Ok(false);
        }
        Err(ChannelError::Syscall {
            syscall: "sem_unlink",
            reason: error.to_string(),
        })
    }

    fn c_name(channel: &ChannelName) -> ChannelResult<CString> {
        CString::new(channel.init_lock_name()).map_err(|e| ChannelError::CreateFailed {
            name: channel.to_string(),
            reason: format!("Invalid init lock name: {}", e),
        })
    }
}

impl Drop for InitLock {
    fn drop(&mut self) {
        // SAFETY: sem came from sem_open and is closed exactly once.
        if unsafe { libc::sem_close(self.sem.as_ptr()) } != 0 {
            tracing::error!(
                channel = %self.channel,
                error = %std::io::Error::last_os_error(),
                "Failed to close init lock"
            );
        }
    }
}

/// Held init lock; released on drop.
pub(crate) struct InitLockGuard<'a> {
    lock: &'a InitLock,
}

impl Drop for InitLockGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: this guard holds one count of the semaphore.
        unsafe { libc::sem_post(self.lock.sem.as_ptr()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_channel(tag: &str) -> ChannelName {
        ChannelName::new(format!("initlock-{}-{}", tag, std::process::id())).unwrap()
    }

    #[test]
    fn test_second_acquire_times_out() {
        let channel = unique_channel("timeout");
        let lock = InitLock::open(&channel).unwrap();

        let guard = lock.acquire(Duration::from_secs(1)).unwrap();
        let err = lock.acquire(Duration::from_millis(50)).err().unwrap();
        assert!(matches!(err, ChannelError::Timeout { .. }));

        drop(guard);
        assert!(lock.acquire(Duration::from_millis(50)).is_ok());
        assert!(InitLock::unlink(&channel).unwrap());
    }

    #[test]
    fn test_unlink_missing() {
        let channel = unique_channel("missing");
        assert!(!InitLock::unlink(&channel).unwrap());
    }
}
