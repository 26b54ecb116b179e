// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Process-shared pthread primitives placed inside a shared mapping.
//!
//! Both types are `#[repr(C)]` wrappers that are constructed in place by
//! whichever process builds the channel header, then used by reference from
//! every mapping of the region.

use std::cell::UnsafeCell;
use std::ptr;
use std::time::Duration;

use crate::error::{ChannelError, ChannelResult};

/// Outcome of a bounded condition wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// Absolute deadline `timeout` from now on `clock`.
pub(crate) fn deadline_after(
    clock: libc::clockid_t,
    timeout: Duration,
) -> ChannelResult<libc::timespec> {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `now` is a valid, writable timespec.
    if unsafe { libc::clock_gettime(clock, &mut now) } != 0 {
        return Err(ChannelError::Syscall {
            syscall: "clock_gettime",
            reason: std::io::Error::last_os_error().to_string(),
        });
    }

    let mut sec = now.tv_sec.saturating_add(timeout.as_secs() as libc::time_t);
    let mut nsec = now.tv_nsec + timeout.subsec_nanos() as libc::c_long;
    if nsec >= 1_000_000_000 {
        sec = sec.saturating_add(1);
        nsec -= 1_000_000_000;
    }

    Ok(libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec,
    })
}

/// Robust, process-shared mutex.
#[repr(C)]
pub(crate) struct SharedMutex(UnsafeCell<libc::pthread_mutex_t>);

impl SharedMutex {
    /// Construct the mutex in place.
    ///
    /// # Safety
    /// `this` must point into a writable shared mapping that no other thread or
    /// process is using as a mutex yet.
    pub(crate) unsafe fn init(this: *mut Self) -> ChannelResult<()> {
        let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
        check("pthread_mutexattr_init", libc::pthread_mutexattr_init(&mut attr))?;

        let result = check(
            "pthread_mutexattr_setpshared",
            libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED),
        )
        .and_then(|()| {
            check(
                "pthread_mutexattr_setrobust",
                libc::pthread_mutexattr_setrobust(&mut attr, libc::PTHREAD_MUTEX_ROBUST),
            )
        })
        .and_then(|()| {
            check(
                "pthread_mutex_init",
                libc::pthread_mutex_init(UnsafeCell::raw_get(ptr::addr_of!((*this).0)), &attr),
            )
        });

        libc::pthread_mutexattr_destroy(&mut attr);
        result
    }

    /// Lock the mutex, recovering it if the previous owner died while holding it.
    pub(crate) fn lock(&self) -> ChannelResult<()> {
        // SAFETY: the mutex was initialized by `init` before the header was published.
        let rc = unsafe { libc::pthread_mutex_lock(self.0.get()) };
        self.recover(rc, "pthread_mutex_lock")
    }

    pub(crate) fn unlock(&self) {
        // SAFETY: only called by the guard that holds the lock.
        let rc = unsafe { libc::pthread_mutex_unlock(self.0.get()) };
        if rc != 0 {
            tracing::error!(
                error = %std::io::Error::from_raw_os_error(rc),
                "Failed to unlock channel mutex"
            );
        }
    }

    /// Destroy the mutex.
    ///
    /// # Safety
    /// No process may use the mutex afterwards.
    pub(crate) unsafe fn destroy(&self) {
        libc::pthread_mutex_destroy(self.0.get());
    }

    fn recover(&self, rc: i32, syscall: &'static str) -> ChannelResult<()> {
        match rc {
            0 => Ok(()),
            libc::EOWNERDEAD => {
                tracing::warn!("Channel peer died holding the lock; marking mutex consistent");
                // SAFETY: we own the lock after EOWNERDEAD.
                check("pthread_mutex_consistent", unsafe {
                    libc::pthread_mutex_consistent(self.0.get())
                })
            }
            errno => Err(ChannelError::from_errno(syscall, errno)),
        }
    }
}

/// Process-shared condition variable timed against `CLOCK_MONOTONIC`.
#[repr(C)]
pub(crate) struct SharedCondvar(UnsafeCell<libc::pthread_cond_t>);

impl SharedCondvar {
    /// Clock used for every deadline passed to `wait_until`.
    pub(crate) const CLOCK: libc::clockid_t = libc::CLOCK_MONOTONIC;

    /// Construct the condition variable in place.
    ///
    /// # Safety
    /// Same contract as [`SharedMutex::init`].
    pub(crate) unsafe fn init(this: *mut Self) -> ChannelResult<()> {
        let mut attr: libc::pthread_condattr_t = std::mem::zeroed();
        check("pthread_condattr_init", libc::pthread_condattr_init(&mut attr))?;

        let result = check(
            "pthread_condattr_setpshared",
            libc::pthread_condattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED),
        )
        .and_then(|()| {
            check(
                "pthread_condattr_setclock",
                libc::pthread_condattr_setclock(&mut attr, Self::CLOCK),
            )
        })
        .and_then(|()| {
            check(
                "pthread_cond_init",
                libc::pthread_cond_init(UnsafeCell::raw_get(ptr::addr_of!((*this).0)), &attr),
            )
        });

        libc::pthread_condattr_destroy(&mut attr);
        result
    }

    /// Wait on the condition. `mutex` must be held by the caller.
    pub(crate) fn wait_until(
        &self,
        mutex: &SharedMutex,
        deadline: &libc::timespec,
    ) -> ChannelResult<WaitOutcome> {
        // SAFETY: both primitives are initialized and the caller holds `mutex`.
        let rc = unsafe { libc::pthread_cond_timedwait(self.0.get(), mutex.0.get(), deadline) };
        match rc {
            libc::ETIMEDOUT => Ok(WaitOutcome::TimedOut),
            rc => mutex
                .recover(rc, "pthread_cond_timedwait")
                .map(|()| WaitOutcome::Signaled),
        }
    }

    pub(crate) fn notify_all(&self) {
        // SAFETY: the condvar is initialized.
        unsafe { libc::pthread_cond_broadcast(self.0.get()) };
    }

    /// Destroy the condition variable.
    ///
    /// # Safety
    /// No process may wait on it afterwards.
    pub(crate) unsafe fn destroy(&self) {
        libc::pthread_cond_destroy(self.0.get());
    }
}

fn check(syscall: &'static str, rc: i32) -> ChannelResult<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(ChannelError::from_errno(syscall, rc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_normalizes_nanoseconds() {
        let deadline = deadline_after(libc::CLOCK_MONOTONIC, Duration::from_millis(999)).unwrap();
        assert!(deadline.tv_nsec >= 0 && deadline.tv_nsec < 1_000_000_000);
    }

    #[test]
    fn test_timed_wait_expires() {
        let mut mutex = std::mem::MaybeUninit::<SharedMutex>::uninit();
        let mut condvar = std::mem::MaybeUninit::<SharedCondvar>::uninit();
        unsafe {
            SharedMutex::init(mutex.as_mut_ptr()).unwrap();
            SharedCondvar::init(condvar.as_mut_ptr()).unwrap();
        }
        let (mutex, condvar) = unsafe { (mutex.assume_init_ref(), condvar.assume_init_ref()) };

        let started = std::time::Instant::now();
        mutex.lock().unwrap();
        let deadline = deadline_after(SharedCondvar::CLOCK, Duration::from_millis(50)).unwrap();
        let mut outcome = WaitOutcome::Signaled;
        while outcome == WaitOutcome::Signaled {
            outcome = condvar.wait_until(mutex, &deadline).unwrap();
        }
        mutex.unlock();

        assert!(started.elapsed() >= Duration::from_millis(50));
        unsafe {
            condvar.destroy();
            mutex.destroy();
        }
    }

    #[test]
    fn test_lock_recovers_from_dead_owner() {
        let mut mutex = std::mem::MaybeUninit::<SharedMutex>::uninit();
        unsafe { SharedMutex::init(mutex.as_mut_ptr()).unwrap() };
        let mutex = unsafe { mutex.assume_init_ref() };

        // The owner exits without unlocking, like a crashed peer.
        let addr = mutex as *const SharedMutex as usize;
        std::thread::spawn(move || {
            let owner = unsafe { &*(addr as *const SharedMutex) };
            owner.lock().unwrap();
        })
        .join()
        .unwrap();

        mutex.lock().expect("robust mutex must be recovered");
        mutex.unlock();

        // Marked consistent, so later lockers see a healthy mutex.
        mutex.lock().unwrap();
        mutex.unlock();
        unsafe { mutex.destroy() };
    }
}
