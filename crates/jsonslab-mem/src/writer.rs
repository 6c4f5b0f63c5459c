//! Incremental string construction in the arena's free zone.
//!
//! A deserializer usually does not know how long a string is until it has
//! read its closing quote. [`FreeZoneWriter`] writes characters straight into
//! the gap between the two regions and commits them in one step, so the
//! string never needs a temporary buffer.

use tracing::trace;

use crate::allocator::Allocator;
use crate::arena::{Arena, sizeof_string};
use crate::error::{PoolError, Result};
use crate::variant::StrRef;

/// Writes one string into the free zone of an arena.
///
/// Nothing is reserved until [`FreeZoneWriter::finish`]. If the content
/// outgrows the free zone the writer stops copying, marks the arena as
/// overflowed and `finish` fails.
pub struct FreeZoneWriter<'a, A: Allocator> {
    arena: &'a mut Arena<A>,
    len: usize,
    requested: usize,
}

impl<'a, A: Allocator> FreeZoneWriter<'a, A> {
    /// Starts an empty string.
    pub fn new(arena: &'a mut Arena<A>) -> Self {
        Self {
            arena,
            len: 0,
            requested: 0,
        }
    }

    /// Appends a character.
    pub fn push(&mut self, c: char) {
        let mut buf = [0; 4];
        self.push_str(c.encode_utf8(&mut buf));
    }

    /// Appends a string slice.
    pub fn push_str(&mut self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let overflowed = self.is_overflowed();
        self.requested += bytes.len();
        if overflowed {
            return;
        }

        let zone = self.arena.free_zone();
        // One byte stays free for the terminator.
        if self.requested >= zone.len() {
            self.arena.mark_as_overflowed();
            return;
        }
        for (dst, &b) in zone[self.len..].iter_mut().zip(bytes) {
            dst.write(b);
        }
        self.len = self.requested;
    }

    /// Returns the number of bytes written so far.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true once some content did not fit.
    #[must_use]
    pub const fn is_overflowed(&self) -> bool {
        self.requested != self.len
    }

    /// Commits the string, reusing an identical stored string when
    /// deduplication is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::OutOfMemory`] if the content did not fit.
    pub fn finish(self) -> Result<StrRef> {
        let error = PoolError::OutOfMemory {
            requested: sizeof_string(self.requested),
            available: self.arena.free_bytes(),
        };
        if self.is_overflowed() {
            return Err(error);
        }

        // SAFETY: `push_bytes` initialized the first `len` bytes of the free
        // zone, and the exclusive borrow kept the arena from reusing them.
        let stored = unsafe { self.arena.save_string_from_free_zone(self.len) };
        if stored.is_some() {
            trace!(len = self.len, "committed free zone string");
        }
        stored.ok_or(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streamed_string() {
        let mut arena = Arena::new(64);
        let mut writer = FreeZoneWriter::new(&mut arena);
        writer.push_str("hel");
        writer.push('l');
        writer.push('o');
        assert_eq!(writer.len(), 5);

        let s = writer.finish().unwrap();
        assert_eq!(s.as_str(&arena), Some("hello"));
        assert_eq!(arena.size(), 6);
    }

    #[test]
    fn test_multibyte_chars() {
        let mut arena = Arena::new(64);
        let mut writer = FreeZoneWriter::new(&mut arena);
        writer.push('é');
        writer.push('€');
        let s = writer.finish().unwrap();
        assert_eq!(s.as_str(&arena), Some("é€"));
        assert_eq!(s.len(), 5);
    }

    #[test]
    fn test_empty_string() {
        let mut arena = Arena::new(64);
        let writer = FreeZoneWriter::new(&mut arena);
        assert!(writer.is_empty());

        let s = writer.finish().unwrap();
        assert!(s.is_empty());
        assert_eq!(arena.size(), 1);
    }

    #[cfg(feature = "string-dedup")]
    #[test]
    fn test_finish_reuses_identical_string() {
        let mut arena = Arena::new(64);
        let first = arena.save_string(b"dup").unwrap();

        let mut writer = FreeZoneWriter::new(&mut arena);
        writer.push_str("dup");
        let second = writer.finish().unwrap();

        assert_eq!(first, second);
        assert_eq!(arena.size(), 4);
    }

    #[test]
    fn test_overflow_marks_arena() {
        let mut arena = Arena::new(16);
        let mut writer = FreeZoneWriter::new(&mut arena);
        writer.push_str("0123456789");
        writer.push_str("0123456789");
        writer.push('x');
        assert!(writer.is_overflowed());
        assert_eq!(writer.len(), 10);

        assert_eq!(
            writer.finish(),
            Err(PoolError::OutOfMemory {
                requested: 22,
                available: 16
            })
        );
        assert!(arena.overflowed());
        assert_eq!(arena.size(), 0);
    }

    #[test]
    fn test_content_filling_whole_zone_is_rejected() {
        let mut arena = Arena::new(16);
        let mut writer = FreeZoneWriter::new(&mut arena);
        writer.push_str("0123456789abcdef");
        assert!(writer.finish().is_err());
    }
}
