//! Document handles over an arena and its root value.
//!
//! A [`Document`] pairs an [`Arena`] with the root [`VariantData`]. The root
//! lives outside the arena, so an empty document costs no arena bytes at
//! all; every array element and object member costs one slot.
//!
//! Reads go through [`VariantRef`], writes through [`VariantMut`]. Both
//! resolve slot and string addresses through the arena on every access, so
//! they never observe a stale address after [`Document::shrink_to_fit`].
//!
//! # Examples
//!
//! ```
//! use jsonslab_mem::Document;
//! use jsonslab_mem::document::StringSource;
//!
//! let mut doc = Document::new(4096);
//!
//! doc.member("name")?.set_str(StringSource::Copied("slab"))?;
//! doc.member("size")?.set_int(42);
//!
//! let root = doc.root();
//! assert_eq!(root.get_member("name").and_then(|v| v.as_str()), Some("slab"));
//! assert_eq!(root.get_member("size").and_then(|v| v.as_i64()), Some(42));
//!
//! doc.shrink_to_fit()?;
//! assert_eq!(format!("{:?}", doc.root()), r#"{"name": "slab", "size": 42}"#);
//! # Ok::<(), jsonslab_mem::PoolError>(())
//! ```

use std::fmt;

use crate::allocator::{Allocator, SystemAllocator};
use crate::arena::{Arena, SLOT_SIZE, sizeof_string};
use crate::error::{PoolError, Result};
use crate::variant::{Collection, SlotRef, StrRef, VariantData};
use crate::writer::FreeZoneWriter;

/// Where string content comes from, and therefore how it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringSource<'s> {
    /// Referenced in place; the arena stores nothing.
    Linked(&'static str),
    /// Copied into the arena's string region (deduplicated when enabled).
    Copied(&'s str),
    /// Already stored in this document's arena, e.g. by a [`FreeZoneWriter`].
    Stored(StrRef),
}

impl From<&'static str> for StringSource<'_> {
    fn from(s: &'static str) -> Self {
        Self::Linked(s)
    }
}

impl<'s> From<&'s String> for StringSource<'s> {
    fn from(s: &'s String) -> Self {
        Self::Copied(s)
    }
}

impl From<StrRef> for StringSource<'_> {
    fn from(s: StrRef) -> Self {
        Self::Stored(s)
    }
}

impl StringSource<'_> {
    fn matches<A: Allocator>(&self, arena: &Arena<A>, other: &[u8]) -> bool {
        match self {
            Self::Linked(s) => s.as_bytes() == other,
            Self::Copied(s) => s.as_bytes() == other,
            Self::Stored(s) => s.as_bytes(arena) == other,
        }
    }

    fn store<A: Allocator>(self, arena: &mut Arena<A>) -> Result<StrRef> {
        match self {
            Self::Linked(s) => Ok(StrRef::Linked(s)),
            Self::Stored(s) => Ok(s),
            Self::Copied(s) => arena.save_string(s.as_bytes()).ok_or(PoolError::OutOfMemory {
                requested: sizeof_string(s.len()),
                available: arena.free_bytes(),
            }),
        }
    }
}

/// A tree of values backed by a single arena.
pub struct Document<A: Allocator = SystemAllocator> {
    arena: Arena<A>,
    root: VariantData,
}

impl Document<SystemAllocator> {
    /// Creates a document with an arena of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_allocator(capacity, SystemAllocator)
    }
}

impl<A: Allocator> Document<A> {
    /// Creates a document whose arena is obtained from `allocator`.
    #[must_use]
    pub fn with_allocator(capacity: usize, allocator: A) -> Self {
        Self {
            arena: Arena::with_allocator(capacity, allocator),
            root: VariantData::Null,
        }
    }

    /// Returns the arena backing this document.
    #[must_use]
    pub const fn arena(&self) -> &Arena<A> {
        &self.arena
    }

    /// Returns the arena capacity in bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Returns the number of arena bytes used by the tree.
    #[must_use]
    pub const fn memory_usage(&self) -> usize {
        self.arena.size()
    }

    /// Returns true once an allocation has failed since the last clear.
    #[must_use]
    pub const fn overflowed(&self) -> bool {
        self.arena.overflowed()
    }

    /// Empties the document, keeping the arena buffer.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.root = VariantData::Null;
    }

    /// Empties the document and replaces the arena buffer with one of
    /// `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::AllocationFailed`] if the allocator refuses; the
    /// document is then left empty with a capacity of zero.
    pub fn reserve(&mut self, capacity: usize) -> Result<()> {
        self.root = VariantData::Null;
        self.arena.clear();
        self.arena.reallocate_pool(capacity)
    }

    /// Reduces the arena to the exact size of the tree.
    ///
    /// Returns the number of bytes reclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ReallocationDenied`] if the allocator refuses the
    /// smaller buffer; the document is unchanged.
    pub fn shrink_to_fit(&mut self) -> Result<usize> {
        self.arena.shrink_to_fit(&mut self.root)
    }

    /// Returns a read handle on the root value.
    #[must_use]
    pub fn root(&self) -> VariantRef<'_, A> {
        VariantRef {
            arena: &self.arena,
            data: &self.root,
        }
    }

    /// Returns a write handle on the root value.
    pub fn root_mut(&mut self) -> VariantMut<'_, A> {
        VariantMut { doc: self, at: None }
    }

    /// Appends an element to the root array; see [`VariantMut::add`].
    ///
    /// # Errors
    ///
    /// See [`VariantMut::add`].
    pub fn add(&mut self) -> Result<VariantMut<'_, A>> {
        VariantMut { doc: self, at: None }.into_add()
    }

    /// Finds or inserts a member of the root object; see
    /// [`VariantMut::member`].
    ///
    /// # Errors
    ///
    /// See [`VariantMut::member`].
    pub fn member<'s>(&mut self, key: impl Into<StringSource<'s>>) -> Result<VariantMut<'_, A>> {
        VariantMut { doc: self, at: None }.into_member(key.into())
    }

    /// Starts writing a string directly into the arena's free zone.
    pub fn string_writer(&mut self) -> FreeZoneWriter<'_, A> {
        FreeZoneWriter::new(&mut self.arena)
    }
}

impl<A: Allocator> fmt::Debug for Document<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("arena", &self.arena)
            .field("root", &self.root())
            .finish()
    }
}

/// Read handle on one value of a document.
pub struct VariantRef<'d, A: Allocator = SystemAllocator> {
    arena: &'d Arena<A>,
    data: &'d VariantData,
}

impl<A: Allocator> Clone for VariantRef<'_, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: Allocator> Copy for VariantRef<'_, A> {}

impl<'d, A: Allocator> VariantRef<'d, A> {
    fn at(arena: &'d Arena<A>, at: SlotRef) -> Self {
        Self {
            arena,
            data: arena.slot(at).data(),
        }
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn data(&self) -> &'d VariantData {
        self.data
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self.data, VariantData::Null)
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match *self.data {
            VariantData::Bool(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match *self.data {
            VariantData::Int(n) => Some(n),
            _ => None,
        }
    }

    /// Returns the value as a float; integers are converted.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match *self.data {
            VariantData::Float(x) => Some(x),
            VariantData::Int(n) => Some(n as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&'d str> {
        match self.data {
            VariantData::Str(s) => s.as_str(self.arena),
            _ => None,
        }
    }

    /// Returns the pre-serialized text of a raw value.
    #[must_use]
    pub fn as_raw(&self) -> Option<&'d str> {
        match self.data {
            VariantData::Raw(s) => s.as_str(self.arena),
            _ => None,
        }
    }

    /// Returns the number of elements or members; zero for scalars.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.collection().map_or(0, |c| c.len(self.arena))
    }

    /// Returns true for scalars and empty collections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.collection().is_none_or(Collection::is_empty)
    }

    /// Returns the element at `index` of an array.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Self> {
        let VariantData::Array(items) = self.data else {
            return None;
        };
        items.get(self.arena, index).map(|at| Self::at(self.arena, at))
    }

    /// Returns the member named `key` of an object.
    #[must_use]
    pub fn get_member(&self, key: &str) -> Option<Self> {
        let VariantData::Object(members) = self.data else {
            return None;
        };
        members.find(self.arena, key).map(|at| Self::at(self.arena, at))
    }

    /// Iterates over the elements of an array (or the values of an object).
    pub fn elements(self) -> impl Iterator<Item = VariantRef<'d, A>> {
        let arena = self.arena;
        self.data
            .collection()
            .into_iter()
            .flat_map(move |c| c.slots(arena))
            .map(move |at| Self::at(arena, at))
    }

    /// Iterates over the members of an object as `(key, value)` pairs.
    pub fn members(self) -> impl Iterator<Item = (&'d str, VariantRef<'d, A>)> {
        let arena = self.arena;
        let members = match self.data {
            VariantData::Object(c) => Some(c),
            _ => None,
        };
        members
            .into_iter()
            .flat_map(move |c| c.slots(arena))
            .map(move |at| {
                let key = arena
                    .slot(at)
                    .key()
                    .and_then(|k| k.as_str(arena))
                    .unwrap_or_default();
                (key, Self::at(arena, at))
            })
    }
}

/// Renders the value in a JSON-like notation.
impl<A: Allocator> fmt::Debug for VariantRef<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data {
            VariantData::Null => f.write_str("null"),
            VariantData::Bool(b) => write!(f, "{b}"),
            VariantData::Int(n) => write!(f, "{n}"),
            VariantData::Float(x) => write!(f, "{x:?}"),
            VariantData::Str(s) => match s.as_str(self.arena) {
                Some(s) => write!(f, "{s:?}"),
                None => write!(f, "{:?}", s.as_bytes(self.arena)),
            },
            VariantData::Raw(s) => f.write_str(s.as_str(self.arena).unwrap_or_default()),
            VariantData::Array(_) => f.debug_list().entries(self.elements()).finish(),
            VariantData::Object(_) => f.debug_map().entries(self.members()).finish(),
        }
    }
}

/// Write handle on one value of a document.
///
/// Holds the document mutably, so only one write handle exists at a time;
/// child handles returned by [`VariantMut::add`] and friends reborrow it.
pub struct VariantMut<'d, A: Allocator = SystemAllocator> {
    doc: &'d mut Document<A>,
    /// `None` for the root.
    at: Option<SlotRef>,
}

impl<'d, A: Allocator> VariantMut<'d, A> {
    fn data(&mut self) -> &mut VariantData {
        match self.at {
            None => &mut self.doc.root,
            Some(at) => &mut self.doc.arena.slot_mut(at).data,
        }
    }

    fn set(&mut self, data: VariantData) {
        *self.data() = data;
    }

    /// Returns a read handle on the same value.
    #[must_use]
    pub fn view(&self) -> VariantRef<'_, A> {
        let arena = &self.doc.arena;
        match self.at {
            None => VariantRef {
                arena,
                data: &self.doc.root,
            },
            Some(at) => VariantRef::at(arena, at),
        }
    }

    pub fn set_null(&mut self) {
        self.set(VariantData::Null);
    }

    pub fn set_bool(&mut self, value: bool) {
        self.set(VariantData::Bool(value));
    }

    pub fn set_int(&mut self, value: i64) {
        self.set(VariantData::Int(value));
    }

    pub fn set_float(&mut self, value: f64) {
        self.set(VariantData::Float(value));
    }

    /// Stores a string value, linked or copied according to its source.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::OutOfMemory`] if a copy does not fit; the value
    /// is left unchanged.
    pub fn set_str<'s>(&mut self, value: impl Into<StringSource<'s>>) -> Result<()> {
        let stored = value.into().store(&mut self.doc.arena)?;
        self.set(VariantData::Str(stored));
        Ok(())
    }

    /// Stores pre-serialized text, emitted verbatim by a serializer.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::OutOfMemory`] if a copy does not fit.
    pub fn set_raw<'s>(&mut self, value: impl Into<StringSource<'s>>) -> Result<()> {
        let stored = value.into().store(&mut self.doc.arena)?;
        self.set(VariantData::Raw(stored));
        Ok(())
    }

    /// Turns the value into an empty array.
    ///
    /// Slots of the previous content stay allocated until the document is
    /// cleared.
    pub fn to_array(&mut self) {
        self.set(VariantData::Array(Collection::default()));
    }

    /// Turns the value into an empty object.
    pub fn to_object(&mut self) {
        self.set(VariantData::Object(Collection::default()));
    }

    /// Appends a `null` element; a `null` value becomes an array first.
    ///
    /// # Errors
    ///
    /// - [`PoolError::NotAContainer`] if the value is neither null nor an
    ///   array.
    /// - [`PoolError::OutOfMemory`] if no slot is left.
    pub fn add(&mut self) -> Result<VariantMut<'_, A>> {
        VariantMut {
            doc: &mut *self.doc,
            at: self.at,
        }
        .into_add()
    }

    /// Finds the member named `key`, or inserts a `null` one; a `null` value
    /// becomes an object first.
    ///
    /// # Errors
    ///
    /// - [`PoolError::NotAContainer`] if the value is neither null nor an
    ///   object.
    /// - [`PoolError::OutOfMemory`] if the key copy or the slot does not fit.
    pub fn member<'s>(&mut self, key: impl Into<StringSource<'s>>) -> Result<VariantMut<'_, A>> {
        VariantMut {
            doc: &mut *self.doc,
            at: self.at,
        }
        .into_member(key.into())
    }

    /// Returns the element at `index` of an array.
    ///
    /// # Errors
    ///
    /// - [`PoolError::NotAContainer`] if the value is not an array.
    /// - [`PoolError::IndexOutOfBounds`] past the last element.
    pub fn at(&mut self, index: usize) -> Result<VariantMut<'_, A>> {
        let VariantData::Array(items) = *self.data() else {
            return Err(PoolError::NotAContainer);
        };
        let arena = &self.doc.arena;
        let at = items
            .get(arena, index)
            .ok_or_else(|| PoolError::IndexOutOfBounds {
                index,
                len: items.len(arena),
            })?;
        Ok(VariantMut {
            doc: &mut *self.doc,
            at: Some(at),
        })
    }

    fn into_add(mut self) -> Result<Self> {
        if matches!(self.data(), VariantData::Null) {
            self.to_array();
        }
        let VariantData::Array(mut items) = *self.data() else {
            return Err(PoolError::NotAContainer);
        };

        let slot = self.alloc_slot()?;
        items.push(&mut self.doc.arena, slot);
        self.set(VariantData::Array(items));

        Ok(Self {
            doc: self.doc,
            at: Some(slot),
        })
    }

    fn into_member(mut self, key: StringSource<'_>) -> Result<Self> {
        if matches!(self.data(), VariantData::Null) {
            self.to_object();
        }
        let VariantData::Object(mut members) = *self.data() else {
            return Err(PoolError::NotAContainer);
        };

        let arena = &self.doc.arena;
        let existing = members.slots(arena).find(|&at| {
            arena
                .slot(at)
                .key()
                .is_some_and(|k| key.matches(arena, k.as_bytes(arena)))
        });
        if let Some(at) = existing {
            return Ok(Self {
                doc: self.doc,
                at: Some(at),
            });
        }

        let key = key.store(&mut self.doc.arena)?;
        let slot = self.alloc_slot()?;
        self.doc.arena.slot_mut(slot).key = Some(key);
        members.push(&mut self.doc.arena, slot);
        self.set(VariantData::Object(members));

        Ok(Self {
            doc: self.doc,
            at: Some(slot),
        })
    }

    fn alloc_slot(&mut self) -> Result<SlotRef> {
        let arena = &mut self.doc.arena;
        arena.alloc_slot().ok_or(PoolError::OutOfMemory {
            requested: SLOT_SIZE,
            available: arena.free_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{sizeof_array, sizeof_object};

    #[test]
    fn test_empty_document() {
        let doc = Document::new(1024);
        assert!(doc.root().is_null());
        assert_eq!(doc.memory_usage(), 0);
        assert_eq!(format!("{:?}", doc.root()), "null");
    }

    #[test]
    fn test_scalars_cost_nothing_at_root() {
        let mut doc = Document::new(1024);
        doc.root_mut().set_int(-7);
        assert_eq!(doc.root().as_i64(), Some(-7));
        assert_eq!(doc.root().as_f64(), Some(-7.0));

        doc.root_mut().set_bool(true);
        assert_eq!(doc.root().as_bool(), Some(true));
        assert_eq!(doc.memory_usage(), 0);
    }

    #[test]
    fn test_linked_and_copied_strings() {
        let mut doc = Document::new(1024);

        doc.root_mut().set_str("hello").unwrap();
        assert_eq!(doc.memory_usage(), 0);
        assert_eq!(doc.root().as_str(), Some("hello"));

        let owned = String::from("abcdefg");
        doc.root_mut().set_str(&owned).unwrap();
        assert_eq!(doc.memory_usage(), 8);
        assert_eq!(doc.root().as_str(), Some("abcdefg"));
    }

    #[test]
    fn test_array_elements() {
        let mut doc = Document::new(1024);
        doc.add().unwrap().set_int(1);
        doc.add().unwrap().set_str("two").unwrap();
        doc.add().unwrap().add().unwrap().set_float(3.5);

        let root = doc.root();
        assert_eq!(root.len(), 3);
        assert_eq!(root.get(0).and_then(|v| v.as_i64()), Some(1));
        assert_eq!(root.get(1).and_then(|v| v.as_str()), Some("two"));
        assert!(root.get(3).is_none());
        assert_eq!(doc.memory_usage(), sizeof_array(4));
        assert_eq!(format!("{:?}", doc.root()), r#"[1, "two", [3.5]]"#);
    }

    #[test]
    fn test_object_members_reuse_keys() {
        let mut doc = Document::new(1024);
        doc.member("a").unwrap().set_int(1);
        doc.member("b").unwrap().set_int(2);
        doc.member("a").unwrap().set_int(3);

        let root = doc.root();
        assert_eq!(root.len(), 2);
        assert_eq!(root.get_member("a").and_then(|v| v.as_i64()), Some(3));
        assert_eq!(doc.memory_usage(), sizeof_object(2));

        let keys: Vec<_> = doc.root().members().map(|(k, _)| k).collect();
        assert_eq!(keys, ["a", "b"]);
    }

    #[test]
    fn test_copied_member_key_matches_linked_lookup() {
        let mut doc = Document::new(1024);
        let key = String::from("abcdefg");
        doc.member(&key).unwrap().set_int(42);
        doc.member("abcdefg").unwrap().set_int(43);

        assert_eq!(doc.root().len(), 1);
        assert_eq!(doc.memory_usage(), sizeof_object(1) + 8);
        assert_eq!(format!("{:?}", doc.root()), r#"{"abcdefg": 43}"#);
    }

    #[test]
    fn test_not_a_container() {
        let mut doc = Document::new(1024);
        doc.root_mut().set_int(1);

        assert_eq!(doc.add().err(), Some(PoolError::NotAContainer));
        assert_eq!(doc.member("k").err(), Some(PoolError::NotAContainer));
        assert_eq!(doc.root_mut().at(0).err(), Some(PoolError::NotAContainer));
    }

    #[test]
    fn test_at_index() {
        let mut doc = Document::new(1024);
        doc.add().unwrap();
        doc.add().unwrap();

        doc.root_mut().at(1).unwrap().set_int(9);
        assert_eq!(doc.root().get(1).and_then(|v| v.as_i64()), Some(9));
        assert_eq!(
            doc.root_mut().at(5).err(),
            Some(PoolError::IndexOutOfBounds { index: 5, len: 2 })
        );
    }

    #[test]
    fn test_out_of_memory() {
        let mut doc = Document::new(SLOT_SIZE);
        doc.add().unwrap().set_int(1);

        let err = doc.add().err().unwrap();
        assert_eq!(
            err,
            PoolError::OutOfMemory {
                requested: SLOT_SIZE,
                available: 0
            }
        );
        assert!(doc.overflowed());
        assert_eq!(format!("{:?}", doc.root()), "[1]");
    }

    #[test]
    fn test_clear_and_reserve() {
        let mut doc = Document::new(1024);
        doc.add().unwrap().set_int(1);

        doc.clear();
        assert!(doc.root().is_null());
        assert_eq!(doc.memory_usage(), 0);
        assert_eq!(doc.capacity(), 1024);

        doc.add().unwrap().set_int(2);
        doc.reserve(2048).unwrap();
        assert!(doc.root().is_null());
        assert_eq!(doc.capacity(), 2048);
    }

    #[test]
    fn test_raw_values() {
        let mut doc = Document::new(1024);
        doc.root_mut().set_raw("[{},123]").unwrap();
        assert_eq!(doc.root().as_raw(), Some("[{},123]"));
        assert_eq!(doc.memory_usage(), 0);
        assert_eq!(format!("{:?}", doc.root()), "[{},123]");
    }

    #[test]
    fn test_string_writer_into_member() {
        let mut doc = Document::new(1024);

        let mut writer = doc.string_writer();
        writer.push_str("stream");
        writer.push('e');
        writer.push('d');
        let key = writer.finish().unwrap();

        doc.member(key).unwrap().set_int(1);
        assert_eq!(format!("{:?}", doc.root()), r#"{"streamed": 1}"#);
    }
}
