//! Manually allocated context stacks.
//!
//! Each stack is an anonymous private mapping with a `PROT_NONE` guard page
//! at its low end, so running off the bottom faults instead of silently
//! corrupting the neighbouring mapping.

use crate::arch::STACK_ALIGN;
use crate::error::{Error, Result};
use std::io;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

/// Smallest usable stack handed to a context. The bootstrap trap pushes a
/// full signal frame before any user code runs, so this stays well above
/// the platform's signal stack size.
pub const MIN_STACK_SIZE: usize = if 4 * libc::SIGSTKSZ > 32 * 1024 {
    4 * libc::SIGSTKSZ
} else {
    32 * 1024
};

pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize })
}

/// Round up to a whole number of pages, using the fact that the page size
/// is a power of two. `None` if that overflows.
pub fn round_to_pages(size: usize) -> Option<usize> {
    let page = page_size();
    Some(size.checked_add(page - 1)? & !(page - 1))
}

/// Usable and mapped bytes for a stack of at least `size` usable bytes, or
/// `None` if the mapping would not fit in the address space.
pub fn geometry(size: usize) -> Option<(usize, usize)> {
    let usable = round_to_pages(size.max(MIN_STACK_SIZE))?;
    Some((usable, usable.checked_add(page_size())?))
}

#[cfg(not(any(target_os = "freebsd", target_os = "dragonfly")))]
const STACK_FLAGS: libc::c_int = libc::MAP_STACK | libc::MAP_PRIVATE | libc::MAP_ANON;
#[cfg(any(target_os = "freebsd", target_os = "dragonfly"))]
const STACK_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON;

/// A stack exclusively owned by one context. Unmapped on drop.
#[derive(Debug)]
pub struct Stack {
    /// Start of the mapping, i.e. the guard page.
    base: NonNull<u8>,
    /// Whole mapping, guard page included.
    len: usize,
}

impl Stack {
    /// Map a stack with at least `size` usable bytes.
    pub fn new(size: usize) -> Result<Stack> {
        let Some((usable, len)) = geometry(size) else {
            return Err(Error::StackAllocation {
                size,
                source: io::ErrorKind::OutOfMemory.into(),
            });
        };
        let err = |source: io::Error| Error::StackAllocation {
            size: usable,
            source,
        };

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                STACK_FLAGS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(err(io::Error::last_os_error()));
        }
        let base = NonNull::new(ptr as *mut u8)
            .ok_or_else(|| err(io::ErrorKind::OutOfMemory.into()))?;
        let stack = Stack { base, len };

        if unsafe { libc::mprotect(ptr, page_size(), libc::PROT_NONE) } != 0 {
            // `stack` unmaps on the way out.
            return Err(err(io::Error::last_os_error()));
        }

        Ok(stack)
    }

    /// Highest address, aligned for a call boundary. Stacks grow down.
    pub fn top(&self) -> usize {
        (self.base.as_ptr() as usize + self.len) & !(STACK_ALIGN - 1)
    }

    /// Lowest usable address, just above the guard page.
    pub fn limit(&self) -> usize {
        self.base.as_ptr() as usize + page_size()
    }

    /// First byte of the usable region, for registering as a signal stack.
    pub fn usable_ptr(&self) -> *mut u8 {
        self.limit() as *mut u8
    }

    /// Usable bytes, guard page excluded.
    pub fn usable_len(&self) -> usize {
        self.len - page_size()
    }

    /// Bytes mapped, guard page included.
    pub fn mapped_len(&self) -> usize {
        self.len
    }

    /// Whether `addr` falls inside the usable region.
    #[cfg(test)]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.limit() && addr < self.base.as_ptr() as usize + self.len
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        let ret = unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len) };
        if ret != 0 {
            panic!(
                "munmap for stack {:p} of size {} failed: {}",
                self.base,
                self.len,
                io::Error::last_os_error()
            );
        }
    }
}
