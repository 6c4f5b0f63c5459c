//! Two-region arena backing a document tree.
//!
//! The arena owns one contiguous buffer obtained from an [`Allocator`].
//! Strings are packed upward from the low end, fixed-size slots are stacked
//! downward from the high end, and the free gap sits in between:
//!
//! ```text
//! begin                                          end
//! v                                                v
//! +--------------+------------------+--------------+
//! | strings...   |     (free)       |  ...slots    |
//! +--------------+------------------+--------------+
//!                ^                  ^
//!              left               right
//! ```
//!
//! - **No implicit growth**: when the gap is too small the allocation fails,
//!   the arena is marked as overflowed, and stays so until [`Arena::clear`].
//! - **No individual frees**: the whole arena is reset at once.
//! - **Shrink-to-fit**: the slot region is squashed against the strings and
//!   the buffer is reallocated to the exact size, rewriting every internal
//!   address of the tree (see [`Arena::shrink_to_fit`]).
//!
//! # Examples
//!
//! ```
//! use jsonslab_mem::arena::{Arena, SLOT_SIZE};
//! use jsonslab_mem::variant::{Collection, VariantData};
//!
//! let mut arena = Arena::new(1024);
//!
//! let name = arena.save_string(b"hello").unwrap();
//! let at = arena.alloc_slot().unwrap();
//!
//! let mut items = Collection::default();
//! items.push(&mut arena, at);
//! let mut root = VariantData::Array(items);
//!
//! assert_eq!(arena.size(), SLOT_SIZE + 6);
//! assert_eq!(name.as_str(&arena), Some("hello"));
//!
//! arena.shrink_to_fit(&mut root).unwrap();
//! assert_eq!(arena.capacity(), SLOT_SIZE + 8);
//! ```

use std::fmt;
use std::mem::{MaybeUninit, align_of, size_of};
use std::ptr::{self, NonNull};
use std::slice;

#[cfg(feature = "string-dedup")]
use tracing::trace;
use tracing::{debug, warn};

use crate::allocator::{Allocator, SystemAllocator};
use crate::error::{PoolError, Result};
use crate::variant::{Distance, SlotRef, StrRef, VariantData, VariantSlot};

/// Alignment of the buffer, of `right`, and of every slot.
///
/// This is the pointer alignment, raised to the slot alignment on targets
/// where 64-bit scalars are more strictly aligned than pointers.
pub const ALIGNMENT: usize = if align_of::<VariantSlot>() > align_of::<usize>() {
    align_of::<VariantSlot>()
} else {
    align_of::<usize>()
};

/// Size in bytes of one slot.
pub const SLOT_SIZE: usize = size_of::<VariantSlot>();

const _: () = assert!(ALIGNMENT.is_power_of_two());
const _: () = assert!(SLOT_SIZE % ALIGNMENT == 0);

/// Rounds `n` up to the next multiple of [`ALIGNMENT`].
#[must_use]
pub const fn add_padding(n: usize) -> usize {
    n.saturating_add(ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Returns the size in bytes of an array with `n` elements.
#[must_use]
pub const fn sizeof_array(n: usize) -> usize {
    n * SLOT_SIZE
}

/// Returns the size in bytes of an object with `n` members.
#[must_use]
pub const fn sizeof_object(n: usize) -> usize {
    n * SLOT_SIZE
}

/// Returns the size in bytes of a copied string with `n` bytes of content.
#[must_use]
pub const fn sizeof_string(n: usize) -> usize {
    n + 1
}

/// Fixed-capacity arena with a string region and a slot region.
///
/// The four cursors are absolute addresses inside the buffer. All accesses
/// rebuild a pointer from `buffer`, so they stay valid after the allocator
/// moves the buffer and the cursors are rebased.
///
/// # Invariants
///
/// - `begin <= left <= right <= end`
/// - `begin`, `right` and `end` are multiples of [`ALIGNMENT`]
/// - `[begin, left)` holds initialized, NUL-terminated strings
/// - every `SLOT_SIZE` step of `[right, end)` holds an initialized slot
/// - `buffer` is `None` exactly when the capacity is zero
pub struct Arena<A: Allocator = SystemAllocator> {
    allocator: A,
    buffer: Option<NonNull<u8>>,
    begin: usize,
    left: usize,
    right: usize,
    end: usize,
    overflowed: bool,
}

// SAFETY: the arena uniquely owns its buffer; the only data it stores that
// is not owned bytes is `&'static str`, which is `Sync`.
unsafe impl<A: Allocator + Send> Send for Arena<A> {}

impl Arena<SystemAllocator> {
    /// Creates an arena of `capacity` bytes backed by the global allocator.
    ///
    /// The capacity is padded up to [`ALIGNMENT`]. If the allocation fails
    /// the arena starts with a capacity of zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_allocator(capacity, SystemAllocator)
    }
}

impl<A: Allocator> Arena<A> {
    /// Creates an arena of `capacity` bytes obtained from `allocator`.
    ///
    /// A capacity of zero is legal; the arena then never touches the
    /// allocator until it is resized.
    #[must_use]
    pub fn with_allocator(capacity: usize, allocator: A) -> Self {
        let mut arena = Self {
            allocator,
            buffer: None,
            begin: 0,
            left: 0,
            right: 0,
            end: 0,
            overflowed: false,
        };

        if let Err(err) = arena.alloc_pool(add_padding(capacity)) {
            warn!(%err, "starting with an empty pool");
        }

        arena
    }

    /// Returns the allocator backing this arena.
    pub const fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Returns the capacity of the buffer in bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.end - self.begin
    }

    /// Returns the number of bytes used by strings and slots.
    #[must_use]
    pub const fn size(&self) -> usize {
        (self.left - self.begin) + (self.end - self.right)
    }

    /// Returns the size of the gap between the two regions.
    #[must_use]
    pub const fn free_bytes(&self) -> usize {
        self.right - self.left
    }

    /// Returns true once an allocation has failed since the last clear.
    #[must_use]
    pub const fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Marks the arena as overflowed.
    ///
    /// Used by writers that detect on their own that their content cannot
    /// fit in the free zone.
    pub fn mark_as_overflowed(&mut self) {
        if !self.overflowed {
            debug!(
                capacity = self.capacity(),
                free = self.free_bytes(),
                "pool overflowed"
            );
        }
        self.overflowed = true;
    }

    /// Returns true if `bytes` more bytes fit in the gap.
    #[must_use]
    pub const fn can_alloc(&self, bytes: usize) -> bool {
        bytes <= self.right - self.left
    }

    /// Returns true if `addr` lies inside the buffer.
    #[must_use]
    pub const fn owns(&self, addr: usize) -> bool {
        self.begin <= addr && addr < self.end
    }

    /// Resets both regions and the overflow flag.
    ///
    /// The buffer itself is left untouched. Every string and slot reference
    /// handed out before is invalidated.
    pub fn clear(&mut self) {
        self.left = self.begin;
        self.right = self.end;
        self.overflowed = false;
    }

    /// Replaces the buffer with an empty one of `required_size` bytes.
    ///
    /// The size is padded to [`ALIGNMENT`]; if it already matches the
    /// current capacity this is a no-op. Otherwise the content is discarded
    /// (use [`Arena::shrink_to_fit`] to keep it) and the overflow flag is
    /// cleared.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::AllocationFailed`] if the allocator refuses the
    /// new buffer; the arena is then left empty with a capacity of zero.
    pub fn reallocate_pool(&mut self, required_size: usize) -> Result<()> {
        let capacity = add_padding(required_size);
        if capacity == self.capacity() {
            return Ok(());
        }

        debug!(from = self.capacity(), to = capacity, "resizing pool");
        self.release();
        self.overflowed = false;
        self.alloc_pool(capacity)
    }

    /// Allocates one slot from the high end, initialized to `null`.
    ///
    /// Returns `None` and marks the arena as overflowed if the gap is too
    /// small.
    pub fn alloc_slot(&mut self) -> Option<SlotRef> {
        let addr = self.alloc_right(SLOT_SIZE)?;
        let ptr = self.ptr_at(addr)?.cast::<VariantSlot>();

        // SAFETY: `[addr, addr + SLOT_SIZE)` was just carved out of the gap,
        // lies inside the buffer, and `addr` is ALIGNMENT-aligned.
        unsafe { ptr.as_ptr().write(VariantSlot::default()) };

        SlotRef::new(addr)
    }

    /// Appends `n` zeroed bytes to the string region.
    ///
    /// Returns the address of the first byte together with the bytes
    /// themselves, or `None` (marking the arena as overflowed) if they do
    /// not fit. The caller is responsible for terminating its string.
    pub fn alloc_string(&mut self, n: usize) -> Option<(usize, &mut [u8])> {
        let addr = self.alloc_left(n)?;
        let Some(ptr) = self.ptr_at(addr) else {
            return Some((addr, &mut []));
        };

        // SAFETY: `[addr, addr + n)` was just carved out of the gap and is
        // not aliased; zeroing it keeps the string region initialized.
        let bytes = unsafe {
            ptr.as_ptr().write_bytes(0, n);
            slice::from_raw_parts_mut(ptr.as_ptr(), n)
        };
        Some((addr, bytes))
    }

    /// Copies `content` into the string region, or finds an identical copy.
    ///
    /// With the `string-dedup` feature, the string region is scanned first
    /// and an existing copy is returned without allocating. Otherwise
    /// `content.len() + 1` bytes are appended.
    ///
    /// Returns `None` (marking the arena as overflowed) if the copy does not
    /// fit.
    pub fn save_string(&mut self, content: &[u8]) -> Option<StrRef> {
        #[cfg(feature = "string-dedup")]
        if let Some(addr) = self.find_string(content) {
            trace!(addr, len = content.len(), "string deduplicated");
            return StrRef::owned(addr, content.len());
        }

        let n = content.len();
        let addr = self.alloc_left(sizeof_string(n))?;
        if let Some(ptr) = self.ptr_at(addr) {
            // SAFETY: `[addr, addr + n + 1)` was just carved out of the gap
            // and does not overlap `content`, which is borrowed immutably.
            unsafe {
                ptr::copy_nonoverlapping(content.as_ptr(), ptr.as_ptr(), n);
                ptr.as_ptr().add(n).write(0);
            }
        }
        StrRef::owned(addr, n)
    }

    /// Exposes the gap between the two regions for in-place writes.
    ///
    /// A streaming writer can fill the returned bytes while it scans input
    /// of unknown length, then commit them with
    /// [`Arena::save_string_from_free_zone`]. The zone includes the room for
    /// the terminator, so at most `len() - 1` content bytes can be committed.
    pub fn free_zone(&mut self) -> &mut [MaybeUninit<u8>] {
        let len = self.free_bytes();
        match self.ptr_at(self.left) {
            // SAFETY: `[left, right)` is inside the buffer and not referenced
            // by any string or slot; `MaybeUninit` allows uninitialized bytes.
            Some(ptr) => unsafe { slice::from_raw_parts_mut(ptr.as_ptr().cast(), len) },
            None => &mut [],
        }
    }

    /// Commits the first `len` bytes of the free zone as a string.
    ///
    /// With the `string-dedup` feature an identical existing string is
    /// returned instead and the written bytes are discarded. Returns `None`
    /// (marking the arena as overflowed) if there is no room for `len` bytes
    /// plus the terminator.
    ///
    /// # Safety
    ///
    /// The first `len` bytes of [`Arena::free_zone`] must have been
    /// initialized since the last allocation.
    pub unsafe fn save_string_from_free_zone(&mut self, len: usize) -> Option<StrRef> {
        if len >= self.free_bytes() {
            self.mark_as_overflowed();
            return None;
        }
        let ptr = self.ptr_at(self.left)?;

        #[cfg(feature = "string-dedup")]
        {
            // SAFETY: the caller initialized `[left, left + len)`, which lies
            // inside the gap (checked above).
            let written = unsafe { slice::from_raw_parts(ptr.as_ptr(), len) };
            if let Some(addr) = self.find_string(written) {
                trace!(addr, len, "string deduplicated");
                return StrRef::owned(addr, len);
            }
        }

        // SAFETY: `left + len < right`, so the terminator stays in the gap.
        unsafe { ptr.as_ptr().add(len).write(0) };

        let addr = self.left;
        self.left += sizeof_string(len);
        self.check_invariants();
        StrRef::owned(addr, len)
    }

    /// Returns the `len` content bytes of the string starting at `addr`.
    ///
    /// # Panics
    ///
    /// Panics if the string is not inside the live string region.
    #[must_use]
    pub fn string_bytes(&self, addr: usize, len: usize) -> &[u8] {
        let strings = self.strings();
        let start = addr
            .checked_sub(self.begin)
            .filter(|&start| start + len < strings.len())
            .unwrap_or_else(|| panic!("string reference {addr:#x} is outside the string region"));
        &strings[start..start + len]
    }

    /// Returns the slot at `at`.
    ///
    /// # Panics
    ///
    /// Panics if `at` does not address a live slot (for example a reference
    /// kept across [`Arena::clear`]).
    #[must_use]
    pub fn slot(&self, at: SlotRef) -> &VariantSlot {
        match self.slot_ptr(at) {
            // SAFETY: live slots are initialized, aligned, and only handed out
            // through `&self` / `&mut self` borrows of the arena.
            Some(ptr) => unsafe { ptr.as_ref() },
            None => panic!("slot reference {:#x} is outside the slot region", at.addr()),
        }
    }

    /// Mutable access to the slot at `at`.
    ///
    /// # Panics
    ///
    /// Panics if `at` does not address a live slot.
    pub fn slot_mut(&mut self, at: SlotRef) -> &mut VariantSlot {
        match self.slot_ptr(at) {
            // SAFETY: as in `slot`, and `&mut self` guarantees exclusivity.
            Some(mut ptr) => unsafe { ptr.as_mut() },
            None => panic!("slot reference {:#x} is outside the slot region", at.addr()),
        }
    }

    /// Shrinks the buffer to the minimum size holding the live content.
    ///
    /// Squashes the slot region against the string region, reallocates the
    /// buffer to the new capacity, then rebases the cursors and relocates
    /// every address reachable from `root`. Calling it again without new
    /// allocations reclaims nothing and does not call the allocator.
    ///
    /// Returns the number of bytes reclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ReallocationDenied`] if the allocator refuses the
    /// smaller buffer. The squash is then undone and the arena, its buffer
    /// and the tree are left exactly as they were.
    pub fn shrink_to_fit(&mut self, root: &mut VariantData) -> Result<usize> {
        let (old_right, old_end) = (self.right, self.end);
        let old_capacity = self.capacity();

        let reclaimed = self.squash();
        if reclaimed == 0 {
            return Ok(0);
        }
        let Some(old_ptr) = self.buffer else {
            return Ok(0);
        };

        let new_capacity = self.capacity();
        if new_capacity == 0 {
            // SAFETY: `old_ptr` came from this allocator with `old_capacity`
            // bytes and nothing live points into it.
            unsafe { self.allocator.deallocate(old_ptr, old_capacity) };
            self.buffer = None;
            self.begin = 0;
            self.left = 0;
            self.right = 0;
            self.end = 0;
            debug!(reclaimed, "pool released");
            return Ok(reclaimed);
        }

        // SAFETY: `old_ptr` came from this allocator with `old_capacity`
        // bytes, and the live content fits in its first `new_capacity`.
        let new_ptr = unsafe { self.allocator.reallocate(old_ptr, old_capacity, new_capacity) };
        let Some(new_ptr) = new_ptr else {
            self.unsquash(old_right, old_end);
            warn!(requested = new_capacity, "allocator denied shrink");
            return Err(PoolError::ReallocationDenied {
                requested: new_capacity,
            });
        };

        let address_delta = new_ptr.as_ptr().addr().wrapping_sub(old_ptr.as_ptr().addr()) as isize;
        self.buffer = Some(new_ptr);
        self.move_cursors(address_delta);

        root.relocate(
            self,
            Distance {
                strings: address_delta,
                slots: address_delta.wrapping_sub_unsigned(reclaimed),
            },
        );

        debug!(
            reclaimed,
            capacity = new_capacity,
            address_delta,
            "pool shrunk to fit"
        );
        Ok(reclaimed)
    }

    /// Moves the slot region down against the string region.
    ///
    /// ```text
    /// begin                        end
    /// v                               v
    /// +--------------+----------------+
    /// | strings...   |   ...slots     |
    /// +--------------+----------------+
    ///                ^
    ///          left  right
    /// ```
    ///
    /// Returns the number of bytes removed from the gap; slots move down by
    /// exactly that amount while strings stay in place.
    fn squash(&mut self) -> usize {
        let new_right = add_padding(self.left);
        if new_right >= self.right {
            return 0;
        }

        let right_size = self.end - self.right;
        if let (Some(src), Some(dst)) = (self.ptr_at(self.right), self.ptr_at(new_right)) {
            // SAFETY: both ranges lie inside the buffer; `ptr::copy` handles
            // the overlap.
            unsafe { ptr::copy(src.as_ptr(), dst.as_ptr(), right_size) };
        }

        let reclaimed = self.right - new_right;
        self.right = new_right;
        self.end = new_right + right_size;
        self.check_invariants();
        reclaimed
    }

    /// Reverts a `squash` whose reallocation was denied.
    fn unsquash(&mut self, old_right: usize, old_end: usize) {
        let right_size = self.end - self.right;
        let src = self.ptr_at(self.right);
        self.end = old_end;
        if let (Some(src), Some(dst)) = (src, self.ptr_at(old_right)) {
            // SAFETY: the original buffer is still allocated with its full
            // capacity; `ptr::copy` handles the overlap.
            unsafe { ptr::copy(src.as_ptr(), dst.as_ptr(), right_size) };
        }
        self.right = old_right;
        self.check_invariants();
    }

    /// Shifts the four cursors after the buffer moved.
    fn move_cursors(&mut self, delta: isize) {
        self.begin = self.begin.wrapping_add_signed(delta);
        self.left = self.left.wrapping_add_signed(delta);
        self.right = self.right.wrapping_add_signed(delta);
        self.end = self.end.wrapping_add_signed(delta);
        debug_assert_eq!(self.buffer.map(|b| b.as_ptr().addr()), Some(self.begin));
        self.check_invariants();
    }

    #[cfg(feature = "string-dedup")]
    fn find_string(&self, content: &[u8]) -> Option<usize> {
        let strings = self.strings();
        let n = content.len();

        let mut at = 0;
        while at + n < strings.len() {
            if strings[at + n] == 0 && &strings[at..at + n] == content {
                return Some(self.begin + at);
            }
            // jump past the next terminator
            at += memchr::memchr(0, &strings[at..])? + 1;
        }
        None
    }

    /// The initialized string region `[begin, left)`.
    fn strings(&self) -> &[u8] {
        match self.buffer {
            // SAFETY: `[begin, left)` only contains bytes written by
            // `save_string`, `alloc_string` or a committed free zone.
            Some(ptr) => unsafe { slice::from_raw_parts(ptr.as_ptr(), self.left - self.begin) },
            None => &[],
        }
    }

    fn alloc_left(&mut self, bytes: usize) -> Option<usize> {
        if !self.can_alloc(bytes) {
            self.mark_as_overflowed();
            return None;
        }
        let addr = self.left;
        self.left += bytes;
        self.check_invariants();
        Some(addr)
    }

    fn alloc_right(&mut self, bytes: usize) -> Option<usize> {
        if !self.can_alloc(bytes) {
            self.mark_as_overflowed();
            return None;
        }
        self.right -= bytes;
        self.check_invariants();
        Some(self.right)
    }

    fn slot_ptr(&self, at: SlotRef) -> Option<NonNull<VariantSlot>> {
        let addr = at.addr();
        let live = self.right <= addr && addr < self.end && (self.end - addr) % SLOT_SIZE == 0;
        if !live {
            return None;
        }
        self.ptr_at(addr).map(NonNull::cast)
    }

    /// Rebuilds a pointer to `addr` from the buffer, keeping its provenance.
    fn ptr_at(&self, addr: usize) -> Option<NonNull<u8>> {
        debug_assert!(self.begin <= addr && addr <= self.end);
        let base = self.buffer?;
        // SAFETY: `addr` lies within `[begin, end]` of the live buffer.
        Some(unsafe { base.add(addr - self.begin) })
    }

    fn alloc_pool(&mut self, capacity: usize) -> Result<()> {
        self.buffer = None;
        self.begin = 0;
        self.left = 0;
        self.right = 0;
        self.end = 0;

        if capacity == 0 {
            return Ok(());
        }

        let ptr = self
            .allocator
            .allocate(capacity)
            .ok_or(PoolError::AllocationFailed { size: capacity })?;
        debug_assert_eq!(ptr.as_ptr().addr() % ALIGNMENT, 0);

        self.buffer = Some(ptr);
        self.begin = ptr.as_ptr().addr();
        self.left = self.begin;
        self.end = self.begin + capacity;
        self.right = self.end;
        self.check_invariants();
        Ok(())
    }

    fn release(&mut self) {
        if let Some(ptr) = self.buffer.take() {
            // SAFETY: `ptr` came from this allocator with `capacity()` bytes.
            unsafe { self.allocator.deallocate(ptr, self.capacity()) };
        }
        self.begin = 0;
        self.left = 0;
        self.right = 0;
        self.end = 0;
    }

    #[inline]
    fn check_invariants(&self) {
        debug_assert!(self.begin <= self.left);
        debug_assert!(self.left <= self.right);
        debug_assert!(self.right <= self.end);
        debug_assert_eq!(self.right % ALIGNMENT, 0);
    }
}

impl<A: Allocator> Drop for Arena<A> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<A: Allocator> fmt::Debug for Arena<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .field("free", &self.free_bytes())
            .field("overflowed", &self.overflowed)
            .finish()
    }
}
