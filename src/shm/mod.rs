//! Shared-memory segment lifecycle
//!
//! The judge owns one POSIX shared-memory object under a well-known name so
//! that solution processes can attach to it without a handshake. Ownership
//! is marked by an exclusive `flock` held for the lifetime of the segment:
//! a leftover object whose lock can be taken belongs to a crashed judge and
//! is removed before the new one is created.

use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::os::fd::OwnedFd;
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg, OFlag};
use nix::libc::off_t;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap, shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

/// Shared-memory errors
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    /// The segment could not be exclusively created
    #[error("Shared memory segment {name} unavailable: {reason}")]
    ResourceUnavailable { name: String, reason: String },

    #[error("{op} failed: {source}")]
    System {
        op: &'static str,
        #[source]
        source: Errno,
    },

    #[error("Access of {len} bytes at offset {offset} exceeds segment size {size}")]
    OutOfBounds { offset: usize, len: usize, size: usize },

    #[error("Shared memory segment already released")]
    Released,
}

struct Mapping {
    ptr: NonNull<c_void>,
    lock: Flock<OwnedFd>,
}

/// An exclusively owned, mapped shared-memory segment
pub struct SharedMemorySegment {
    name: String,
    size: usize,
    mapping: Option<Mapping>,
}

// SAFETY: the mapping is plain shared memory. Writes need `&mut self`, and
// the pointer stays valid until `release` unmaps it.
unsafe impl Send for SharedMemorySegment {}
unsafe impl Sync for SharedMemorySegment {}

impl SharedMemorySegment {
    /// Create the segment, removing a stale one left by a crashed owner.
    ///
    /// Fails with `ResourceUnavailable` when a live owner holds the name or
    /// the exclusive creation fails.
    pub fn acquire(name: &str, size: usize) -> Result<Self, ShmError> {
        let name = normalize_name(name);
        let unavailable = |reason: String| ShmError::ResourceUnavailable {
            name: name.clone(),
            reason,
        };

        let length =
            NonZeroUsize::new(size).ok_or_else(|| unavailable("segment size is zero".to_string()))?;
        let file_length =
            off_t::try_from(size).map_err(|_| unavailable(format!("size {} too large", size)))?;

        remove_stale(&name)?;

        let fd = shm_open(
            name.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|errno| unavailable(format!("exclusive create failed: {}", errno)))?;

        let lock = match Flock::lock(fd, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, errno)) => {
                let _ = shm_unlink(name.as_str());
                return Err(unavailable(format!("could not lock new segment: {}", errno)));
            }
        };

        if let Err(errno) = ftruncate(&*lock, file_length) {
            let _ = shm_unlink(name.as_str());
            return Err(ShmError::System {
                op: "ftruncate",
                source: errno,
            });
        }

        // SAFETY: fresh mapping of an object we just sized; no other Rust
        // reference aliases it.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &*lock,
                0,
            )
        };
        let ptr = match ptr {
            Ok(ptr) => ptr,
            Err(errno) => {
                let _ = shm_unlink(name.as_str());
                return Err(ShmError::System {
                    op: "mmap",
                    source: errno,
                });
            }
        };

        tracing::info!(name = %name, size, "Shared memory segment created");

        Ok(Self {
            name,
            size,
            mapping: Some(Mapping { ptr, lock }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_open(&self) -> bool {
        self.mapping.is_some()
    }

    /// Copy `data` into the segment at `offset`
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<(), ShmError> {
        self.check_bounds(offset, data.len())?;
        let mapping = self.mapping.as_ref().ok_or(ShmError::Released)?;

        // SAFETY: bounds checked above; the destination lies inside the
        // mapping and cannot overlap `data`, which is a Rust-owned slice.
        unsafe {
            let dst = mapping.ptr.as_ptr().cast::<u8>().add(offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    /// Borrow `len` bytes of the segment starting at `offset`
    pub fn read_at(&self, offset: usize, len: usize) -> Result<&[u8], ShmError> {
        self.check_bounds(offset, len)?;
        let mapping = self.mapping.as_ref().ok_or(ShmError::Released)?;

        // SAFETY: bounds checked; the slice lives no longer than `&self`
        // and writers need `&mut self`.
        Ok(unsafe {
            std::slice::from_raw_parts(mapping.ptr.as_ptr().cast::<u8>().add(offset), len)
        })
    }

    /// Unmap and unlink the segment. Calling it again is a no-op.
    pub fn release(&mut self) -> Result<(), ShmError> {
        let Some(mapping) = self.mapping.take() else {
            return Ok(());
        };

        // SAFETY: the pointer and length come from the `mmap` in `acquire`,
        // and `mapping` was taken so nothing can use it afterwards.
        let unmapped = unsafe { munmap(mapping.ptr, self.size) };
        let unlinked = match shm_unlink(self.name.as_str()) {
            Err(Errno::ENOENT) => Ok(()),
            other => other,
        };
        drop(mapping.lock);

        unmapped.map_err(|source| ShmError::System {
            op: "munmap",
            source,
        })?;
        unlinked.map_err(|source| ShmError::System {
            op: "shm_unlink",
            source,
        })?;

        tracing::info!(name = %self.name, "Shared memory segment released");
        Ok(())
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<(), ShmError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(ShmError::OutOfBounds {
                offset,
                len,
                size: self.size,
            }),
        }
    }
}

impl Drop for SharedMemorySegment {
    fn drop(&mut self) {
        if self.mapping.is_some() {
            tracing::warn!(name = %self.name, "Shared memory segment dropped without release");
            if let Err(e) = self.release() {
                tracing::error!(name = %self.name, "Failed to release shared memory segment: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for SharedMemorySegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemorySegment")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("open", &self.is_open())
            .finish()
    }
}

/// POSIX names must start with a single slash
fn normalize_name(name: &str) -> String {
    format!("/{}", name.trim_start_matches('/'))
}

/// Remove a segment left behind by an owner that no longer holds its lock
fn remove_stale(name: &str) -> Result<(), ShmError> {
    let fd = match shm_open(name, OFlag::O_RDWR, Mode::empty()) {
        Ok(fd) => fd,
        Err(Errno::ENOENT) => return Ok(()),
        Err(source) => {
            return Err(ShmError::System {
                op: "shm_open",
                source,
            });
        }
    };

    match Flock::lock(fd, FlockArg::LockExclusiveNonblock) {
        Ok(probe) => {
            tracing::warn!(name, "Removing stale shared memory segment");
            match shm_unlink(name) {
                Ok(()) | Err(Errno::ENOENT) => {}
                Err(source) => {
                    return Err(ShmError::System {
                        op: "shm_unlink",
                        source,
                    });
                }
            }
            drop(probe);
            Ok(())
        }
        Err((_, errno)) if errno == Errno::EWOULDBLOCK => Err(ShmError::ResourceUnavailable {
            name: name.to_string(),
            reason: "segment is held by a running judge".to_string(),
        }),
        Err((_, source)) => Err(ShmError::System {
            op: "flock",
            source,
        }),
    }
}
