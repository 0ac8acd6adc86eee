//! Low-level page-mapping primitives used by the GC's page pool.
//!
//! This crate isolates every OS-specific call (`mmap`/`VirtualAlloc`,
//! page-size discovery) behind a narrow, platform-neutral boundary so the
//! rest of the runtime never has to branch on `cfg(unix)` / `cfg(windows)`.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Returns the system allocation granularity.
///
/// On Windows, this is typically 64KB. On Unix, this is typically the system page size.
/// When requesting a specific address, it should be aligned to this granularity.
pub fn allocation_granularity() -> usize {
    #[cfg(windows)]
    {
        os::allocation_granularity()
    }
    #[cfg(unix)]
    {
        os::page_size()
    }
}

/// A handle to a memory mapped region.
///
/// The region is automatically unmapped when this handle is dropped.
pub struct Mmap {
    inner: os::MmapInner,
}

impl Mmap {
    /// Returns a pointer to the start of the memory mapping.
    #[must_use]
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Returns the length of the memory mapping in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the mapping has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// Ensures visibility of writes to the mapping. For anonymous mappings
    /// this is effectively a no-op.
    pub fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

/// Configuration for creating a memory mapping.
#[derive(Debug, Clone)]
pub struct MmapOptions {
    len: usize,
    hint_addr: usize,
    populate: bool,
    no_reserve: bool,
    strict: bool,
}

impl MmapOptions {
    /// Creates a new `MmapOptions` with default settings (length 0).
    /// You must set a length before mapping.
    #[must_use]
    pub fn new() -> Self {
        Self {
            len: 0,
            hint_addr: 0,
            populate: false,
            no_reserve: false,
            strict: false,
        }
    }

    /// Sets the length of the mapping in bytes.
    #[must_use]
    pub fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Sets a hint address for the mapping.
    ///
    /// This is a request to the OS to place the mapping at this specific
    /// virtual address; the OS is not required to honor it.
    #[must_use]
    pub fn with_hint(mut self, addr: usize) -> Self {
        self.hint_addr = addr;
        self
    }

    /// Sets whether to pre-populate (prefault) the page tables.
    #[must_use]
    pub fn populate(mut self, populate: bool) -> Self {
        self.populate = populate;
        self
    }

    /// Sets whether to reserve swap space (on supported platforms).
    #[must_use]
    pub fn no_reserve(mut self, no_reserve: bool) -> Self {
        self.no_reserve = no_reserve;
        self
    }

    /// Sets whether the hint address is strict.
    ///
    /// If true, `map_anon` will return an error if the OS cannot map the
    /// memory at the exact requested `hint_addr`.
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Creates an anonymous memory map.
    ///
    /// # Safety
    ///
    /// Creates a raw memory mapping. The returned `Mmap` owns the memory for
    /// as long as it lives; using raw pointers derived from it after it is
    /// dropped is undefined behavior.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is zero, the underlying OS call fails,
    /// or (with `strict(true)`) the returned address does not match the hint.
    pub unsafe fn map_anon(&self) -> io::Result<Mmap> {
        if self.len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }

        let inner = unsafe {
            let inner =
                os::MmapInner::map_anon(self.hint_addr, self.len, self.populate, self.no_reserve)?;

            if self.strict && self.hint_addr != 0 {
                let ptr = inner.ptr() as usize;
                if ptr != self.hint_addr {
                    return Err(io::Error::new(
                        io::ErrorKind::AddrNotAvailable,
                        format!(
                            "strict hint failed: requested {:#x}, got {:#x}",
                            self.hint_addr, ptr
                        ),
                    ));
                }
            }

            inner
        };

        Ok(Mmap { inner })
    }
}

impl Default for MmapOptions {
    fn default() -> Self {
        Self::new()
    }
}
