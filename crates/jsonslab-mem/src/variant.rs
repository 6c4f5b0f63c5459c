//! Relocatable node tree stored in the arena's slot region.
//!
//! Every value of a document is a [`VariantData`]. Scalars are stored inline;
//! strings and collections hold *addresses* into the arena buffer instead of
//! Rust references:
//!
//! - [`StrRef::Owned`] points into the string region,
//! - [`SlotRef`] points into the slot region (collection heads and tails,
//!   sibling links).
//!
//! Addresses are plain integers and every dereference goes back through the
//! [`Arena`], which rebuilds a pointer from its own buffer. When the buffer
//! is compacted or moved by the allocator, [`VariantData::relocate`] walks
//! the tree once and shifts each address by the [`Distance`] of the region
//! it points into.
//!
//! ```text
//!  root (outside the arena)
//!   Array { head ──────────────────────────┐ , tail ──┐ }
//!                                          v          v
//!  +-----------+-------------+--------+--------+--------+
//!  | "abc\0"   |   (free)    | slot 2 | slot 1 | slot 0 |
//!  +-----------+-------------+--------+--------+--------+
//!    ^  string region           slot region (grows down)
//!    └──────────── StrRef::Owned ─────────┘
//! ```

use std::num::NonZeroUsize;

use crate::allocator::Allocator;
use crate::arena::Arena;

/// Address of a slot inside an arena's slot region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef(NonZeroUsize);

impl SlotRef {
    pub(crate) fn new(addr: usize) -> Option<Self> {
        NonZeroUsize::new(addr).map(Self)
    }

    /// Returns the absolute address of the slot.
    #[must_use]
    pub const fn addr(self) -> usize {
        self.0.get()
    }

    fn moved(self, distance: isize) -> Self {
        let addr = self.addr().wrapping_add_signed(distance);
        debug_assert!(addr != 0, "slot relocated to the null address");
        Self::new(addr).unwrap_or(self)
    }
}

/// Reference to string content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrRef {
    /// Caller-owned content; costs the arena nothing.
    Linked(&'static str),
    /// Content copied into the arena's string region.
    Owned {
        /// Absolute address of the first byte.
        addr: NonZeroUsize,
        /// Length in bytes, excluding the terminator.
        len: usize,
    },
}

impl StrRef {
    pub(crate) fn owned(addr: usize, len: usize) -> Option<Self> {
        NonZeroUsize::new(addr).map(|addr| Self::Owned { addr, len })
    }

    /// Returns the length of the content in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::Linked(s) => s.len(),
            Self::Owned { len, .. } => *len,
        }
    }

    /// Returns true if the content is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the content lives in the arena.
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        matches!(self, Self::Owned { .. })
    }

    /// Returns the address of an owned string, or `None` for linked content.
    #[must_use]
    pub const fn addr(&self) -> Option<usize> {
        match self {
            Self::Linked(_) => None,
            Self::Owned { addr, .. } => Some(addr.get()),
        }
    }

    /// Resolves the content bytes.
    ///
    /// # Panics
    ///
    /// Panics if an owned reference does not point at a live string of
    /// `arena` (for example after [`Arena::clear`]).
    #[must_use]
    pub fn as_bytes<'a, A: Allocator>(&self, arena: &'a Arena<A>) -> &'a [u8] {
        match *self {
            Self::Linked(s) => s.as_bytes(),
            Self::Owned { addr, len } => arena.string_bytes(addr.get(), len),
        }
    }

    /// Resolves the content as UTF-8, or `None` if the bytes are not valid
    /// UTF-8.
    #[must_use]
    pub fn as_str<'a, A: Allocator>(&self, arena: &'a Arena<A>) -> Option<&'a str> {
        std::str::from_utf8(self.as_bytes(arena)).ok()
    }

    fn relocated(self, distance: isize) -> Self {
        match self {
            Self::Linked(_) => self,
            Self::Owned { addr, len } => {
                let moved = addr.get().wrapping_add_signed(distance);
                debug_assert!(moved != 0, "string relocated to the null address");
                Self::owned(moved, len).unwrap_or(self)
            }
        }
    }
}

/// Displacements applied by [`VariantData::relocate`].
///
/// The two regions move independently during a shrink: strings only move
/// with the buffer, slots move with the buffer *and* by the compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Distance {
    /// Added to every address pointing into the string region.
    pub strings: isize,
    /// Added to every address pointing into the slot region.
    pub slots: isize,
}

/// Linked list of slots forming an array or an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Collection {
    head: Option<SlotRef>,
    tail: Option<SlotRef>,
}

impl Collection {
    /// Returns the first slot.
    #[must_use]
    pub const fn head(&self) -> Option<SlotRef> {
        self.head
    }

    /// Returns true if the collection has no slots.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Appends `slot` after the current tail.
    pub fn push<A: Allocator>(&mut self, arena: &mut Arena<A>, slot: SlotRef) {
        match self.tail {
            Some(tail) => arena.slot_mut(tail).next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    /// Iterates over the slots of the collection.
    pub fn slots<'a, A: Allocator>(&self, arena: &'a Arena<A>) -> Slots<'a, A> {
        Slots {
            arena,
            cursor: self.head,
        }
    }

    /// Counts the slots.
    #[must_use]
    pub fn len<A: Allocator>(&self, arena: &Arena<A>) -> usize {
        self.slots(arena).count()
    }

    /// Returns the slot at `index`.
    #[must_use]
    pub fn get<A: Allocator>(&self, arena: &Arena<A>, index: usize) -> Option<SlotRef> {
        self.slots(arena).nth(index)
    }

    /// Returns the first slot whose key equals `key`.
    #[must_use]
    pub fn find<A: Allocator>(&self, arena: &Arena<A>, key: &str) -> Option<SlotRef> {
        self.slots(arena).find(|&at| {
            arena
                .slot(at)
                .key
                .is_some_and(|k| k.as_bytes(arena) == key.as_bytes())
        })
    }

    fn relocate(&mut self, distance: isize) {
        self.head = self.head.map(|at| at.moved(distance));
        self.tail = self.tail.map(|at| at.moved(distance));
    }
}

/// Iterator over the slots of a [`Collection`].
pub struct Slots<'a, A: Allocator> {
    arena: &'a Arena<A>,
    cursor: Option<SlotRef>,
}

impl<A: Allocator> Iterator for Slots<'_, A> {
    type Item = SlotRef;

    fn next(&mut self) -> Option<SlotRef> {
        let at = self.cursor?;
        self.cursor = self.arena.slot(at).next;
        Some(at)
    }
}

/// One value of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum VariantData {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(StrRef),
    /// Pre-serialized text emitted verbatim by a serializer.
    Raw(StrRef),
    Array(Collection),
    Object(Collection),
}

impl VariantData {
    /// Returns the collection of an array or object.
    #[must_use]
    pub const fn collection(&self) -> Option<&Collection> {
        match self {
            Self::Array(c) | Self::Object(c) => Some(c),
            _ => None,
        }
    }

    /// Mutable access to the collection of an array or object.
    pub const fn collection_mut(&mut self) -> Option<&mut Collection> {
        match self {
            Self::Array(c) | Self::Object(c) => Some(c),
            _ => None,
        }
    }

    /// Rewrites every internal address reachable from this value.
    ///
    /// Owned strings and owned keys move by `distance.strings`; collection
    /// heads, tails and sibling links move by `distance.slots`. The arena
    /// must already be rebased so the relocated addresses resolve; each
    /// reachable slot is visited exactly once.
    pub fn relocate<A: Allocator>(&mut self, arena: &mut Arena<A>, distance: Distance) {
        match self {
            Self::Str(s) | Self::Raw(s) => *s = s.relocated(distance.strings),
            Self::Array(c) | Self::Object(c) => {
                c.relocate(distance.slots);

                let mut cursor = c.head;
                while let Some(at) = cursor {
                    let mut slot = *arena.slot(at);
                    slot.next = slot.next.map(|next| next.moved(distance.slots));
                    slot.key = slot.key.map(|key| key.relocated(distance.strings));
                    slot.data.relocate(arena, distance);
                    *arena.slot_mut(at) = slot;
                    cursor = slot.next;
                }
            }
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Float(_) => {}
        }
    }
}

/// Fixed-size record in the slot region: one array element or one object
/// member.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VariantSlot {
    pub(crate) data: VariantData,
    pub(crate) next: Option<SlotRef>,
    pub(crate) key: Option<StrRef>,
}

impl VariantSlot {
    /// Returns the value held by the slot.
    #[must_use]
    pub const fn data(&self) -> &VariantData {
        &self.data
    }

    /// Returns the next sibling.
    #[must_use]
    pub const fn next(&self) -> Option<SlotRef> {
        self.next
    }

    /// Returns the member key, if the slot belongs to an object.
    #[must_use]
    pub const fn key(&self) -> Option<StrRef> {
        self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::SLOT_SIZE;

    fn array_of(arena: &mut Arena, values: &[i64]) -> VariantData {
        let mut items = Collection::default();
        for &v in values {
            let at = arena.alloc_slot().unwrap();
            arena.slot_mut(at).data = VariantData::Int(v);
            items.push(arena, at);
        }
        VariantData::Array(items)
    }

    #[test]
    fn test_collection_push_links_in_order() {
        let mut arena = Arena::new(SLOT_SIZE * 4);
        let root = array_of(&mut arena, &[1, 2, 3]);

        let items = root.collection().unwrap();
        assert_eq!(items.len(&arena), 3);

        let values: Vec<_> = items
            .slots(&arena)
            .map(|at| *arena.slot(at).data())
            .collect();
        assert_eq!(
            values,
            [VariantData::Int(1), VariantData::Int(2), VariantData::Int(3)]
        );
    }

    #[test]
    fn test_collection_get_and_find() {
        let mut arena = Arena::new(SLOT_SIZE * 4 + 32);
        let mut members = Collection::default();

        for (name, v) in [("a", 1), ("bb", 2)] {
            let key = arena.save_string(name.as_bytes()).unwrap();
            let at = arena.alloc_slot().unwrap();
            let slot = arena.slot_mut(at);
            slot.key = Some(key);
            slot.data = VariantData::Int(v);
            members.push(&mut arena, at);
        }

        let bb = members.find(&arena, "bb").unwrap();
        assert_eq!(*arena.slot(bb).data(), VariantData::Int(2));
        assert_eq!(members.get(&arena, 1), Some(bb));
        assert!(members.find(&arena, "c").is_none());
        assert!(members.get(&arena, 2).is_none());
    }

    #[test]
    fn test_relocate_zero_distance_is_identity() {
        let mut arena = Arena::new(SLOT_SIZE * 4);
        let mut root = array_of(&mut arena, &[7, 8]);
        let before = root;

        root.relocate(&mut arena, Distance::default());
        assert_eq!(root, before);
    }

    #[test]
    fn test_str_ref_relocation_skips_linked() {
        let linked = StrRef::Linked("hello");
        assert_eq!(linked.relocated(128), linked);

        let owned = StrRef::owned(0x1000, 3).unwrap();
        assert_eq!(owned.relocated(-0x100).addr(), Some(0xF00));
        assert_eq!(owned.relocated(0x10).len(), 3);
    }

    #[test]
    fn test_slot_ref_moves_by_distance() {
        let at = SlotRef::new(0x2000).unwrap();
        assert_eq!(at.moved(-64).addr(), 0x2000 - 64);
        assert_eq!(at.moved(64).addr(), 0x2000 + 64);
    }
}
