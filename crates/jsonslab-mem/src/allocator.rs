//! Allocator capability consumed by the arena.
//!
//! The arena never touches the system allocator directly. It asks an
//! [`Allocator`] for one buffer at construction, gives it back on drop or on
//! a destructive resize, and asks for at most one in-place shrink per
//! [`Arena::shrink_to_fit`](crate::arena::Arena::shrink_to_fit) call.
//!
//! A reallocation is allowed to move the buffer. The arena measures the
//! displacement and rewrites every internal reference itself, so allocators
//! that always relocate (handy for tests) are as valid as ones that shrink in
//! place.
//!
//! # Examples
//!
//! ```
//! use jsonslab_mem::allocator::{Allocator, SystemAllocator};
//!
//! let alloc = SystemAllocator;
//! let ptr = alloc.allocate(64).unwrap();
//!
//! unsafe {
//!     ptr.as_ptr().write_bytes(0xAB, 64);
//!     let ptr = alloc.reallocate(ptr, 64, 16).unwrap();
//!     assert_eq!(*ptr.as_ptr().add(15), 0xAB);
//!     alloc.deallocate(ptr, 16);
//! }
//! ```

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::arena::ALIGNMENT;

/// A provider of raw byte buffers.
///
/// # Safety
///
/// Implementors must uphold the following:
///
/// - A pointer returned by `allocate(size)` or `reallocate(_, _, size)` is
///   valid for reads and writes of `size` bytes until it is passed back to
///   `deallocate` or `reallocate`.
/// - Returned pointers are aligned to [`ALIGNMENT`].
/// - `reallocate` preserves the first `min(old_size, new_size)` bytes of the
///   buffer, whether or not the returned address differs from `ptr`.
/// - On failure (`None`), the original buffer is left untouched and stays
///   owned by the caller.
pub unsafe trait Allocator {
    /// Allocates a buffer of `size` bytes, or returns `None`.
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// Releases a buffer.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator for a buffer of
    /// exactly `size` bytes, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize);

    /// Resizes a buffer, possibly moving it.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this allocator for a buffer of
    /// exactly `old_size` bytes. On success `ptr` must no longer be used.
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>>;
}

// SAFETY: forwards every call to the referenced allocator, which upholds
// the contract itself.
unsafe impl<A: Allocator + ?Sized> Allocator for &A {
    #[inline]
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        (**self).allocate(size)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: the caller upholds the contract for `ptr` and `size`.
        unsafe { (**self).deallocate(ptr, size) }
    }

    #[inline]
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // SAFETY: the caller upholds the contract for `ptr` and `old_size`.
        unsafe { (**self).reallocate(ptr, old_size, new_size) }
    }
}

/// Allocator backed by the global Rust allocator (`std::alloc`).
///
/// Zero-sized requests are refused; the arena never makes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemAllocator;

impl SystemAllocator {
    fn layout(size: usize) -> Option<Layout> {
        if size == 0 {
            return None;
        }
        Layout::from_size_align(size, ALIGNMENT).ok()
    }
}

// SAFETY: `std::alloc` returns buffers aligned to the requested layout, and
// `alloc::realloc` copies the preserved prefix when it moves the block.
unsafe impl Allocator for SystemAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = Self::layout(size)?;
        // SAFETY: layout has a non-zero size (checked in `layout`).
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: the caller guarantees `ptr` came from `allocate(size)`,
        // which only succeeds for sizes that form a valid layout.
        unsafe {
            let layout = Layout::from_size_align_unchecked(size, ALIGNMENT);
            alloc::dealloc(ptr.as_ptr(), layout);
        }
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        // Validates that `new_size` rounds to a legal layout.
        Self::layout(new_size)?;

        // SAFETY: the caller guarantees `ptr` came from this allocator with
        // `old_size` bytes; `new_size` is non-zero and forms a valid layout.
        unsafe {
            let layout = Layout::from_size_align_unchecked(old_size, ALIGNMENT);
            NonNull::new(alloc::realloc(ptr.as_ptr(), layout, new_size))
        }
    }
}
