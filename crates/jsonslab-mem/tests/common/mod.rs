// Common test utilities for integration tests
//
// Allocators that make buffer relocation and refused requests observable.

#![allow(dead_code)]

use std::cell::Cell;
use std::ptr::{self, NonNull};

use jsonslab_mem::{Allocator, SystemAllocator};

/// Allocator that never resizes in place: every reallocation copies into a
/// fresh buffer and fills the old one with `#` before freeing it, so a stale
/// reference reads garbage instead of the right content.
#[derive(Debug, Default)]
pub struct ArmoredAllocator {
    live: Cell<Option<(usize, usize)>>,
    reallocations: Cell<usize>,
}

impl ArmoredAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(address, size)` of the buffer currently handed out.
    pub fn live(&self) -> Option<(usize, usize)> {
        self.live.get()
    }

    pub fn reallocations(&self) -> usize {
        self.reallocations.get()
    }

    fn check_live(&self, ptr: NonNull<u8>, size: usize) {
        assert_eq!(
            self.live.get(),
            Some((ptr.as_ptr().addr(), size)),
            "buffer was not handed out by this allocator"
        );
    }
}

unsafe impl Allocator for ArmoredAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        assert!(self.live.get().is_none(), "one buffer at a time");
        let ptr = SystemAllocator.allocate(size)?;
        self.live.set(Some((ptr.as_ptr().addr(), size)));
        Some(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        self.check_live(ptr, size);
        unsafe { SystemAllocator.deallocate(ptr, size) };
        self.live.set(None);
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        self.check_live(ptr, old_size);
        let new_ptr = SystemAllocator.allocate(new_size)?;
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(new_size));
            ptr.as_ptr().write_bytes(b'#', old_size);
            SystemAllocator.deallocate(ptr, old_size);
        }
        self.live.set(Some((new_ptr.as_ptr().addr(), new_size)));
        self.reallocations.set(self.reallocations.get() + 1);
        Some(new_ptr)
    }
}

/// Allocator that refuses every reallocation.
#[derive(Debug, Default)]
pub struct DenyingAllocator {
    denied: Cell<usize>,
}

impl DenyingAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denied(&self) -> usize {
        self.denied.get()
    }
}

unsafe impl Allocator for DenyingAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        SystemAllocator.allocate(size)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        unsafe { SystemAllocator.deallocate(ptr, size) }
    }

    unsafe fn reallocate(
        &self,
        _ptr: NonNull<u8>,
        _old_size: usize,
        _new_size: usize,
    ) -> Option<NonNull<u8>> {
        self.denied.set(self.denied.get() + 1);
        None
    }
}

/// Allocator whose shrink keeps the buffer where it is, so relocation runs
/// with a zero address delta. Releases with the size it first allocated.
#[derive(Debug, Default)]
pub struct InPlaceAllocator {
    allocated: Cell<usize>,
}

impl InPlaceAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

unsafe impl Allocator for InPlaceAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let ptr = SystemAllocator.allocate(size)?;
        self.allocated.set(size);
        Some(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _size: usize) {
        unsafe { SystemAllocator.deallocate(ptr, self.allocated.get()) }
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        _old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        (new_size <= self.allocated.get()).then_some(ptr)
    }
}
