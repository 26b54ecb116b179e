// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Two-party, double-buffered handoff channel over POSIX shared memory.
//!
//! Region layout:
//!
//! ```text
//! +--------------------+---------------+---------------+
//! | ChannelHeader      | slot A        | slot B        |
//! | (padded to 64 B)   | capacity B    | capacity B    |
//! +--------------------+---------------+---------------+
//! ```
//!
//! The first participant to attach is the producer, the second the consumer.
//! At most one chunk is in flight: the producer fills the active slot, sets
//! `ready`, and the consumer drains it, clears `ready` and moves the active
//! slot to the other buffer. The last handle to detach tears everything down.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{ChannelError, ChannelResult};
use crate::shm::init_lock::{InitLock, InitLockGuard};
use crate::shm::region::SharedMemoryRegion;
use crate::shm::sync::{deadline_after, SharedCondvar, SharedMutex, WaitOutcome};
use crate::types::{ChannelName, Role, Slot, SlotCapacity};

/// Marks a fully constructed header ("SHMCOPY1").
const HEADER_MAGIC: u64 = 0x5348_4D43_4F50_5931;

/// Slot data starts on a cache line boundary.
const DATA_ALIGNMENT: usize = 64;

/// Maximum number of attached participants.
const MAX_PARTICIPANTS: u32 = 2;

/// Header stored at the start of shared memory.
#[repr(C)]
struct ChannelHeader {
    /// HEADER_MAGIC once constructed. Only touched under the init lock.
    magic: AtomicU64,
    /// Slot capacity chosen by the creator.
    capacity: u64,
    lock: SharedMutex,
    signal: SharedCondvar,
    /// Guarded by `lock`.
    state: UnsafeCell<ChannelState>,
}

/// Protocol state shared by both participants.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ChannelState {
    process_count: u32,
    finished: bool,
    ready: bool,
    aborted: bool,
    consumer_joined: bool,
    active_slot: u8,
    sizes: [u64; 2],
    checksums: [u32; 2],
}

impl ChannelState {
    const fn initial() -> Self {
        Self {
            process_count: 0,
            finished: false,
            ready: false,
            aborted: false,
            consumer_joined: false,
            active_slot: 0,
            sizes: [0; 2],
            checksums: [0; 2],
        }
    }

    fn active(&self) -> Slot {
        Slot::from_index(self.active_slot)
    }

    /// Stream is over and nothing remains buffered.
    fn is_complete(&self) -> bool {
        self.finished && !self.ready
    }
}

/// Byte offsets of the header and slots for a given capacity.
#[derive(Debug, Clone, Copy)]
struct Layout {
    capacity: usize,
    data_offset: usize,
    region_size: usize,
}

impl Layout {
    fn new(capacity: usize) -> Self {
        let data_offset = align_up(std::mem::size_of::<ChannelHeader>(), DATA_ALIGNMENT);
        let region_size = align_up(data_offset + 2 * capacity, page_size());
        Self {
            capacity,
            data_offset,
            region_size,
        }
    }

    fn slot_offset(&self, slot: Slot) -> usize {
        self.data_offset + slot.index() * self.capacity
    }
}

const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

/// Timeouts and limits for one channel handle.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Capacity of each of the two slots.
    pub capacity: SlotCapacity,
    /// Bound on acquire-for-write and consume waits.
    pub wait_timeout: Duration,
    /// Bound on the producer's wait for the final chunk to drain.
    pub drain_timeout: Duration,
    /// Bound on acquiring the system-wide init lock.
    pub init_lock_timeout: Duration,
    /// Verify slot checksums on consume.
    pub verify_checksums: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            capacity: SlotCapacity::DEFAULT,
            wait_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(10),
            init_lock_timeout: Duration::from_secs(5),
            verify_checksums: true,
        }
    }
}

impl ChannelOptions {
    pub fn with_capacity(mut self, capacity: SlotCapacity) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set both the data wait and the drain wait.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self.drain_timeout = timeout;
        self
    }
}

/// What `detach` did to the shared objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachOutcome {
    /// The peer is still attached; the region stays alive.
    Released { remaining: u32 },
    /// This was the last participant; the region and init lock were removed.
    TornDown,
}

/// An attached participant. Detaches on drop.
pub struct Channel {
    name: ChannelName,
    role: Role,
    options: ChannelOptions,
    layout: Layout,
    init_lock: InitLock,
    /// `None` once detached.
    region: Option<SharedMemoryRegion>,
    /// Chunks this handle has drained as the consumer.
    drained: u64,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("capacity", &self.layout.capacity)
            .field("attached", &self.region.is_some())
            .finish()
    }
}

impl Channel {
    /// Attach to the channel `name`, creating it if this is the first participant.
    ///
    /// # Errors
    /// `Occupied` if two participants are already attached, `CapacityMismatch`
    /// if the existing channel uses another slot capacity, `Timeout` if the
    /// init lock cannot be acquired.
    pub fn attach(name: &ChannelName, options: ChannelOptions) -> ChannelResult<Self> {
        let layout = Layout::new(options.capacity.bytes());
        let init_lock = InitLock::open(name)?;

        // The count is raised under the init lock so a concurrent last detach
        // cannot destroy the header between validation and registration.
        let (region, role) = {
            let _guard = init_lock.acquire(options.init_lock_timeout)?;
            let region =
                SharedMemoryRegion::open_or_create(&name.shm_object_name(), layout.region_size)?;

            let registered = Self::ensure_header(name, &region, layout)
                .and_then(|()| Self::register(name, &region));
            match registered {
                Ok(role) => (region, role),
                Err(e) => {
                    if region.created() {
                        let object = region.name().to_string();
                        drop(region);
                        let _ = SharedMemoryRegion::unlink(&object);
                    }
                    return Err(e);
                }
            }
        };

        tracing::info!(
            channel = %name,
            role = %role,
            capacity = layout.capacity,
            "Attached to channel"
        );

        Ok(Self {
            name: name.clone(),
            role,
            options,
            layout,
            init_lock,
            region: Some(region),
            drained: 0,
        })
    }

    /// Construct the header if the region is fresh, otherwise validate it.
    /// Must be called with the init lock held.
    fn ensure_header(
        name: &ChannelName,
        region: &SharedMemoryRegion,
        layout: Layout,
    ) -> ChannelResult<()> {
        if region.size() < std::mem::size_of::<ChannelHeader>() {
            return Err(ChannelError::CreateFailed {
                name: name.to_string(),
                reason: format!("Existing region too small: {} bytes", region.size()),
            });
        }

        let header = region.as_ptr() as *mut ChannelHeader;

        // SAFETY: the region is at least one header long and page aligned.
        // The init lock serializes construction, so no other process reads
        // the header before `magic` is published.
        unsafe {
            if (*header).magic.load(Ordering::Acquire) == HEADER_MAGIC {
                let actual = (*header).capacity as usize;
                if actual != layout.capacity {
                    return Err(ChannelError::CapacityMismatch {
                        name: name.clone(),
                        expected: layout.capacity,
                        actual,
                    });
                }
                if region.size() < Layout::new(actual).region_size {
                    return Err(ChannelError::ProtocolInvariant {
                        reason: format!(
                            "region of {} bytes cannot hold two {} byte slots",
                            region.size(),
                            actual
                        ),
                    });
                }
                return Ok(());
            }

            if region.size() < layout.region_size {
                return Err(ChannelError::CreateFailed {
                    name: name.to_string(),
                    reason: format!(
                        "Unconstructed region of {} bytes is smaller than the {} required",
                        region.size(),
                        layout.region_size
                    ),
                });
            }

            ptr::addr_of_mut!((*header).capacity).write(layout.capacity as u64);
            SharedMutex::init(ptr::addr_of_mut!((*header).lock))?;
            SharedCondvar::init(ptr::addr_of_mut!((*header).signal))?;
            ptr::addr_of_mut!((*header).state).write(UnsafeCell::new(ChannelState::initial()));
            (*header).magic.store(HEADER_MAGIC, Ordering::Release);
        }

        tracing::debug!(channel = %name, capacity = layout.capacity, "Constructed channel header");
        Ok(())
    }

    /// Take one of the two places. Must be called with the init lock held.
    fn register(name: &ChannelName, region: &SharedMemoryRegion) -> ChannelResult<Role> {
        // SAFETY: ensure_header validated the header.
        let header = unsafe { &*(region.as_ptr() as *const ChannelHeader) };
        let mut guard = StateGuard::lock(header)?;
        let state = guard.state_mut();

        if state.process_count >= MAX_PARTICIPANTS {
            tracing::warn!(channel = %name, "Rejected attach to full channel");
            return Err(ChannelError::Occupied { name: name.clone() });
        }

        state.process_count += 1;
        if state.process_count == MAX_PARTICIPANTS {
            state.consumer_joined = true;
        }
        let role = Role::from_arrival(state.process_count);
        guard.notify_all();
        Ok(role)
    }

    /// Channel name.
    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    /// Role negotiated at attach time.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Capacity of each slot in bytes.
    pub fn capacity(&self) -> usize {
        self.layout.capacity
    }

    /// Number of participants currently attached.
    pub fn process_count(&self) -> ChannelResult<u32> {
        let guard = StateGuard::lock(self.header()?)?;
        Ok(guard.state().process_count)
    }

    /// Wait until the previous chunk has been drained, then lend out the
    /// active slot for filling.
    ///
    /// # Errors
    /// `Timeout` if the consumer does not drain within `wait_timeout`.
    pub fn acquire_for_write(&mut self) -> ChannelResult<WriteSlot<'_>> {
        self.require_role(Role::Producer)?;

        let slot = {
            let mut guard = StateGuard::lock(self.header()?)?;
            self.wait_for(
                &mut guard,
                self.options.wait_timeout,
                "acquire a slot for writing",
                |state| !state.ready,
            )?;
            guard.state().active()
        };
        let base = self.slot_ptr(slot)?;

        Ok(WriteSlot {
            channel: self,
            slot,
            base,
        })
    }

    /// Hand the filled slot to the consumer.
    fn publish(&mut self, slot: Slot, len: usize) -> ChannelResult<()> {
        if len > self.layout.capacity {
            return Err(ChannelError::ProtocolInvariant {
                reason: format!(
                    "published {} bytes into a {} byte slot",
                    len, self.layout.capacity
                ),
            });
        }

        // SAFETY: the producer owns the slot until `ready` is set below.
        let checksum = crc32fast::hash(unsafe { self.slot_bytes(slot, len)? });

        let mut guard = StateGuard::lock(self.header()?)?;
        let state = guard.state_mut();
        if state.ready || state.active() != slot {
            return Err(ChannelError::ProtocolInvariant {
                reason: format!(
                    "publish into slot {:?} while ready={} active={:?}",
                    slot,
                    state.ready,
                    state.active()
                ),
            });
        }

        state.sizes[slot.index()] = len as u64;
        state.checksums[slot.index()] = checksum;
        state.ready = true;
        guard.notify_all();

        tracing::trace!(channel = %self.name, slot = ?slot, len = len, "Published chunk");
        Ok(())
    }

    /// Wait for the next chunk and return a copy of it.
    ///
    /// Returns an empty vector when the producer finished with nothing pending.
    pub fn consume(&mut self) -> ChannelResult<Vec<u8>> {
        let mut chunk = Vec::new();
        self.consume_into(&mut chunk)?;
        Ok(chunk)
    }

    /// Like [`Channel::consume`], reusing `buf`. Returns the chunk length.
    ///
    /// # Errors
    /// `Timeout` if no chunk or end-of-stream arrives within `wait_timeout`.
    pub fn consume_into(&mut self, buf: &mut Vec<u8>) -> ChannelResult<usize> {
        self.require_role(Role::Consumer)?;
        buf.clear();

        let mut guard = StateGuard::lock(self.header()?)?;
        self.wait_for(
            &mut guard,
            self.options.wait_timeout,
            "consume a chunk",
            |state| state.ready || state.finished,
        )?;

        let state = *guard.state();
        if !state.ready {
            return Ok(0);
        }

        let slot = state.active();
        let len = state.sizes[slot.index()] as usize;
        if len > self.layout.capacity {
            return Err(ChannelError::ProtocolInvariant {
                reason: format!(
                    "slot {:?} claims {} bytes, capacity is {}",
                    slot, len, self.layout.capacity
                ),
            });
        }

        // SAFETY: `ready` is set, so the producer does not touch this slot.
        buf.extend_from_slice(unsafe { self.slot_bytes(slot, len)? });

        if self.options.verify_checksums {
            let expected = state.checksums[slot.index()];
            let actual = crc32fast::hash(buf);
            if actual != expected {
                return Err(ChannelError::ChecksumMismatch { expected, actual });
            }
        }

        let state = guard.state_mut();
        state.ready = false;
        state.active_slot = slot.other().index() as u8;
        guard.notify_all();
        drop(guard);
        self.drained += 1;

        tracing::trace!(channel = %self.name, slot = ?slot, len = len, "Consumed chunk");
        Ok(len)
    }

    /// True once the producer finished and the last chunk was drained.
    pub fn is_complete(&self) -> ChannelResult<bool> {
        let guard = StateGuard::lock(self.header()?)?;
        Ok(guard.state().is_complete())
    }

    /// Declare end-of-stream and wait for the consumer to drain what is left.
    ///
    /// Also waits for a consumer to have attached at least once, so a producer
    /// that finishes early does not tear the channel down before its peer arrives.
    pub fn finish(&mut self) -> ChannelResult<()> {
        self.require_role(Role::Producer)?;

        let mut guard = StateGuard::lock(self.header()?)?;
        guard.state_mut().finished = true;
        guard.notify_all();
        tracing::debug!(channel = %self.name, "Signaled end of stream");

        self.wait_for(
            &mut guard,
            self.options.drain_timeout,
            "drain the final chunk",
            |state| !state.ready && state.consumer_joined,
        )
    }

    /// Mark the transfer as failed and wake the peer.
    pub fn abort(&self) -> ChannelResult<()> {
        let mut guard = StateGuard::lock(self.header()?)?;
        guard.state_mut().aborted = true;
        guard.notify_all();
        tracing::warn!(channel = %self.name, role = %self.role, "Aborted transfer");
        Ok(())
    }

    /// Detach explicitly, reporting whether the channel was torn down.
    pub fn detach(mut self) -> ChannelResult<DetachOutcome> {
        self.release()
    }

    /// Whether the shared memory object for `name` exists.
    pub fn exists(name: &ChannelName) -> ChannelResult<bool> {
        SharedMemoryRegion::exists(&name.shm_object_name())
    }

    /// Remove the OS objects of `name` without attaching.
    ///
    /// Recovery for a pair that crashed before detaching. Returns `true` if
    /// anything was removed.
    pub fn remove(name: &ChannelName) -> ChannelResult<bool> {
        let region = SharedMemoryRegion::unlink(&name.shm_object_name())?;
        let lock = InitLock::unlink(name)?;
        if region || lock {
            tracing::info!(channel = %name, "Removed channel objects");
        }
        Ok(region || lock)
    }

    fn release(&mut self) -> ChannelResult<DetachOutcome> {
        let Some(region) = self.region.take() else {
            return Err(ChannelError::ProtocolInvariant {
                reason: "channel already detached".to_string(),
            });
        };

        let init_guard = match self.init_lock.acquire(self.options.init_lock_timeout) {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::warn!(
                    channel = %self.name,
                    error = %e,
                    "Detaching without the init lock"
                );
                None
            }
        };

        // SAFETY: the header was validated at attach and the mapping is still live.
        let header = unsafe { &*(region.as_ptr() as *const ChannelHeader) };
        let remaining = {
            let mut guard = StateGuard::lock(header)?;
            let role = self.role;
            let drained = self.drained;
            let state = guard.state_mut();

            if state.process_count == 0 {
                return Err(ChannelError::ProtocolInvariant {
                    reason: "process count underflow on detach".to_string(),
                });
            }
            state.process_count -= 1;

            // A consumer that drained nothing leaves no gap in the stream,
            // so a later consumer can take its place.
            let left_early = match role {
                Role::Producer => !state.finished,
                Role::Consumer => drained > 0 && !state.is_complete(),
            };
            if left_early && state.process_count > 0 {
                state.aborted = true;
            }

            let remaining = state.process_count;
            if remaining == 0 {
                header.magic.store(0, Ordering::Release);
            } else {
                guard.notify_all();
            }
            remaining
        };

        if remaining > 0 {
            tracing::info!(
                channel = %self.name,
                role = %self.role,
                remaining = remaining,
                "Detached from channel"
            );
            return Ok(DetachOutcome::Released { remaining });
        }

        self.tear_down(header, region, init_guard)
    }

    /// Destroy the header and remove the OS objects. Only the last participant
    /// gets here.
    fn tear_down(
        &self,
        header: &ChannelHeader,
        region: SharedMemoryRegion,
        init_guard: Option<InitLockGuard<'_>>,
    ) -> ChannelResult<DetachOutcome> {
        // SAFETY: process_count is 0 and magic is cleared, so nobody else uses
        // the primitives; new arrivals construct a fresh header.
        unsafe {
            header.signal.destroy();
            header.lock.destroy();
        }
        drop(region);

        let unlinked = SharedMemoryRegion::unlink(&self.name.shm_object_name());
        drop(init_guard);
        let lock_unlinked = InitLock::unlink(&self.name);
        unlinked?;
        lock_unlinked?;

        tracing::info!(channel = %self.name, role = %self.role, "Tore down channel");
        Ok(DetachOutcome::TornDown)
    }

    fn header(&self) -> ChannelResult<&ChannelHeader> {
        let region = self
            .region
            .as_ref()
            .ok_or_else(|| ChannelError::ProtocolInvariant {
                reason: "channel already detached".to_string(),
            })?;
        // SAFETY: the header was validated at attach and lives as long as the region.
        Ok(unsafe { &*(region.as_ptr() as *const ChannelHeader) })
    }

    /// View `len` bytes of `slot`.
    ///
    /// # Safety
    /// The caller must own the slot under the ready-flag protocol.
    unsafe fn slot_bytes(&self, slot: Slot, len: usize) -> ChannelResult<&[u8]> {
        let base = self.slot_ptr(slot)?;
        Ok(std::slice::from_raw_parts(base, len))
    }

    fn slot_ptr(&self, slot: Slot) -> ChannelResult<*mut u8> {
        let region = self
            .region
            .as_ref()
            .ok_or_else(|| ChannelError::ProtocolInvariant {
                reason: "channel already detached".to_string(),
            })?;
        // SAFETY: the slot lies inside the region (checked in ensure_header).
        Ok(unsafe { region.as_ptr().add(self.layout.slot_offset(slot)) })
    }

    fn require_role(&self, expected: Role) -> ChannelResult<()> {
        if self.role != expected {
            return Err(ChannelError::RoleMismatch {
                expected,
                actual: self.role,
            });
        }
        Ok(())
    }

    /// Block on the condition until `done` holds, the peer aborts, or `timeout` passes.
    fn wait_for(
        &self,
        guard: &mut StateGuard<'_>,
        timeout: Duration,
        operation: &'static str,
        done: impl Fn(&ChannelState) -> bool,
    ) -> ChannelResult<()> {
        let started = Instant::now();
        let deadline = deadline_after(SharedCondvar::CLOCK, timeout)?;

        loop {
            let state = guard.state();
            if state.aborted {
                return Err(ChannelError::PeerAborted {
                    name: self.name.clone(),
                });
            }
            if done(state) {
                return Ok(());
            }

            if guard.wait_until(&deadline)? == WaitOutcome::TimedOut {
                let state = guard.state();
                if !state.aborted && done(state) {
                    return Ok(());
                }
                if state.aborted {
                    return Err(ChannelError::PeerAborted {
                        name: self.name.clone(),
                    });
                }
                tracing::error!(
                    channel = %self.name,
                    role = %self.role,
                    operation = operation,
                    "Channel wait timed out"
                );
                return Err(ChannelError::Timeout {
                    name: self.name.clone(),
                    operation,
                    waited: started.elapsed(),
                });
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.region.is_none() {
            return;
        }
        if let Err(e) = self.release() {
            tracing::error!(
                channel = %self.name,
                role = %self.role,
                error = %e,
                "Failed to detach from channel"
            );
        }
    }
}

/// The producer's view of the active slot between acquire and publish.
pub struct WriteSlot<'a> {
    channel: &'a mut Channel,
    slot: Slot,
    /// Start of the slot inside the mapping, which outlives the borrow.
    base: *mut u8,
}

impl WriteSlot<'_> {
    /// Which of the two buffers is being filled.
    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Bytes available for filling.
    pub fn capacity(&self) -> usize {
        self.channel.layout.capacity
    }

    /// The whole slot, writable. Contents from earlier handoffs are unspecified.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `base` points at `capacity` mapped bytes, the mapping stays
        // alive while the channel is borrowed, `ready` is clear so the consumer
        // does not read this slot, and `&mut self` prevents local aliasing.
        unsafe { std::slice::from_raw_parts_mut(self.base, self.channel.layout.capacity) }
    }

    /// Publish the first `len` bytes of the slot to the consumer.
    pub fn publish(self, len: usize) -> ChannelResult<()> {
        self.channel.publish(self.slot, len)
    }
}

/// Held header mutex. Unlocks on drop.
struct StateGuard<'a> {
    header: &'a ChannelHeader,
}

impl<'a> StateGuard<'a> {
    fn lock(header: &'a ChannelHeader) -> ChannelResult<Self> {
        header.lock.lock()?;
        Ok(Self { header })
    }

    fn state(&self) -> &ChannelState {
        // SAFETY: the mutex is held.
        unsafe { &*self.header.state.get() }
    }

    fn state_mut(&mut self) -> &mut ChannelState {
        // SAFETY: the mutex is held and `&mut self` excludes other borrows.
        unsafe { &mut *self.header.state.get() }
    }

    fn wait_until(&mut self, deadline: &libc::timespec) -> ChannelResult<WaitOutcome> {
        self.header.signal.wait_until(&self.header.lock, deadline)
    }

    fn notify_all(&self) {
        self.header.signal.notify_all();
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.header.lock.unlock();
    }
}
