// src/stack.rs

use core::cell::Cell;
use core::ptr::{self, NonNull};
use x86_64::VirtAddr;

use crate::error::{Error, Result};

/// Allocation counters for thread stacks, kept per OS thread.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StackStats {
    pub allocated: usize,
    pub released: usize,
}

impl StackStats {
    /// Stacks allocated and not yet released.
    pub fn outstanding(&self) -> usize {
        self.allocated - self.released
    }
}

thread_local! {
    static STATS: Cell<StackStats> = const {
        Cell::new(StackStats { allocated: 0, released: 0 })
    };
}

/// Stack counters for the calling OS thread.
pub fn stats() -> StackStats {
    STATS.with(|stats| stats.get())
}

pub fn log_stack_status() {
    let stats = stats();
    log::info!(
        "Stacks: {} allocated, {} released, {} outstanding",
        stats.allocated,
        stats.released,
        stats.outstanding()
    );
}

fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 4096,
    }
}

/// Execution stack owned by one thread: an anonymous mapping whose lowest
/// page is a `PROT_NONE` guard, so running off the end faults instead of
/// scribbling over a neighbour.
pub struct Stack {
    base: NonNull<u8>,
    mapping_size: usize,
    guard_size: usize,
}

impl Stack {
    pub fn allocate(size: usize) -> Result<Stack> {
        let page = page_size();
        let mapping_size = size
            .div_ceil(page)
            .checked_mul(page)
            .and_then(|usable| usable.checked_add(page))
            .ok_or(Error::AllocationError("thread stack"))?;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapping_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(Error::AllocationError("thread stack"));
        }

        if unsafe { libc::mprotect(base, page, libc::PROT_NONE) } == -1 {
            unsafe { libc::munmap(base, mapping_size) };
            return Err(Error::AllocationError("stack guard page"));
        }

        let base = NonNull::new(base.cast::<u8>()).ok_or(Error::AllocationError("thread stack"))?;
        STATS.with(|stats| {
            let mut current = stats.get();
            current.allocated += 1;
            stats.set(current);
        });

        Ok(Stack {
            base,
            mapping_size,
            guard_size: page,
        })
    }

    /// Lowest usable address, just above the guard page.
    pub fn bottom(&self) -> VirtAddr {
        VirtAddr::new(self.base.as_ptr() as u64 + self.guard_size as u64)
    }

    /// One past the highest usable address.
    pub fn top(&self) -> VirtAddr {
        VirtAddr::new(self.base.as_ptr() as u64 + self.mapping_size as u64)
    }

    pub fn size(&self) -> usize {
        self.mapping_size - self.guard_size
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.mapping_size);
        }
        STATS.with(|stats| {
            let mut current = stats.get();
            current.released += 1;
            stats.set(current);
        });
    }
}
