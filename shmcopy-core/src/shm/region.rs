//! SharedMemoryRegion - POSIX shared memory wrapper.
//!
//! Provides safe abstraction over mmap and shm_open for zero-copy IPC.
//! The region never unlinks itself: removal of the OS object is decided by
//! the channel's cross-process reference count.

use std::fs::File;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;

use crate::error::ChannelError;

/// Represents a mapped shared memory region.
///
/// This struct owns the mapping and will unmap it on drop.
/// The memory can be shared between processes using the same name.
pub(crate) struct SharedMemoryRegion {
    /// POSIX name of the shared memory object (leading `/`).
    name: String,
    /// Pointer to the mapped memory.
    ptr: NonNull<u8>,
    /// Size of the mapped region in bytes.
    size: usize,
    /// Backing shared memory object, closed on drop.
    _file: File,
    /// Whether this call sized a fresh object.
    created: bool,
}

// SAFETY: SharedMemoryRegion can be sent between threads as it owns its mapping.
unsafe impl Send for SharedMemoryRegion {}

// SAFETY: The region only hands out raw pointers; the channel header's
// process-shared mutex provides the synchronization.
unsafe impl Sync for SharedMemoryRegion {}

impl SharedMemoryRegion {
    /// Maximum size for a shared memory region (2 GB + header).
    pub const MAX_SIZE: usize = 2 * 1024 * 1024 * 1024 + 64 * 1024;

    /// Open the named object, creating it with `size` bytes if it does not exist
    /// or is still empty.
    ///
    /// An existing non-empty object is mapped at its current size, which may
    /// differ from `size`; callers validate the contents.
    ///
    /// # Errors
    /// Returns ChannelError if opening, sizing or mapping fails.
    pub fn open_or_create(name: &str, size: usize) -> Result<Self, ChannelError> {
        if size == 0 || size > Self::MAX_SIZE {
            return Err(ChannelError::CreateFailed {
                name: name.to_string(),
                reason: format!("Size {} must be between 1 and {}", size, Self::MAX_SIZE),
            });
        }

        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|e| ChannelError::CreateFailed {
            name: name.to_string(),
            reason: format!("shm_open failed: {}", e),
        })?;
        let file = File::from(fd);

        let current = file
            .metadata()
            .map_err(|e| ChannelError::CreateFailed {
                name: name.to_string(),
                reason: format!("fstat failed: {}", e),
            })?
            .len() as usize;

        let (size, created) = if current == 0 {
            file.set_len(size as u64)
                .map_err(|e| ChannelError::CreateFailed {
                    name: name.to_string(),
                    reason: format!("ftruncate failed: {}", e),
                })?;
            (size, true)
        } else {
            (current, false)
        };

        let length = NonZeroUsize::new(size).ok_or_else(|| ChannelError::MapFailed {
            reason: "zero-length mapping".to_string(),
        })?;

        // Map the memory
        // SAFETY: file is a valid shared memory object at least `size` bytes long.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )
        };

        let ptr = match ptr {
            Ok(ptr) => ptr.cast::<u8>(),
            Err(e) => {
                if created {
                    let _ = shm_unlink(name);
                }
                return Err(ChannelError::MapFailed {
                    reason: format!("mmap failed: {}", e),
                });
            }
        };

        tracing::debug!(name = %name, size = size, created = created, "Mapped shared memory region");

        Ok(Self {
            name: name.to_string(),
            ptr,
            size,
            _file: file,
            created,
        })
    }

    /// Whether a shared memory object with this name currently exists.
    pub fn exists(name: &str) -> Result<bool, ChannelError> {
        match shm_open(name, OFlag::O_RDONLY, Mode::empty()) {
            Ok(_fd) => Ok(true),
            Err(Errno::ENOENT) => Ok(false),
            Err(e) => Err(ChannelError::Syscall {
                syscall: "shm_open",
                reason: e.to_string(),
            }),
        }
    }

    /// Remove the named object. Returns `false` if it did not exist.
    ///
    /// Existing mappings stay valid until unmapped.
    pub fn unlink(name: &str) -> Result<bool, ChannelError> {
        match shm_unlink(name) {
            Ok(()) => {
                tracing::debug!(name = %name, "Unlinked shared memory region");
                Ok(true)
            }
            Err(Errno::ENOENT) => Ok(false),
            Err(e) => Err(ChannelError::Syscall {
                syscall: "shm_unlink",
                reason: e.to_string(),
            }),
        }
    }

    /// Get the POSIX name of this shared memory region.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the size of this shared memory region.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether this mapping sized a fresh object.
    pub fn created(&self) -> bool {
        self.created
    }

    /// Get a raw pointer to the shared memory.
    ///
    /// # Safety
    /// Caller must ensure proper synchronization when accessing the memory.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        // SAFETY: ptr and size describe the mapping created in open_or_create.
        if let Err(e) = unsafe { munmap(self.ptr.cast(), self.size) } {
            tracing::error!(
                name = %self.name,
                error = %e,
                "Failed to unmap shared memory"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/shmcopy-region-{}-{}", tag, std::process::id())
    }

    #[test]
    fn test_shm_size_validation() {
        assert!(SharedMemoryRegion::open_or_create(&unique_name("zero"), 0).is_err());
        assert!(SharedMemoryRegion::open_or_create(
            &unique_name("large"),
            SharedMemoryRegion::MAX_SIZE + 1
        )
        .is_err());
    }

    #[test]
    fn test_second_open_sees_first_writes() {
        let name = unique_name("share");
        let first = SharedMemoryRegion::open_or_create(&name, 4096).unwrap();
        assert!(first.created());

        // Existing objects keep their size regardless of the requested one.
        let second = SharedMemoryRegion::open_or_create(&name, 8192).unwrap();
        assert!(!second.created());
        assert_eq!(second.size(), 4096);

        unsafe { first.as_ptr().write(0x5A) };
        assert_eq!(unsafe { second.as_ptr().read() }, 0x5A);

        assert!(SharedMemoryRegion::exists(&name).unwrap());
        assert!(SharedMemoryRegion::unlink(&name).unwrap());
        assert!(!SharedMemoryRegion::exists(&name).unwrap());
        assert!(!SharedMemoryRegion::unlink(&name).unwrap());
    }
}
