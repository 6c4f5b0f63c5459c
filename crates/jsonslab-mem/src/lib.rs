//! `jsonslab` memory pool
//!
//! This crate provides the fixed-capacity memory pool behind a JSON-like
//! document tree, including:
//!
//! - **Two-region arena**: strings grow up from the start of one buffer,
//!   fixed-size node slots grow down from its end
//! - **String deduplication**: identical content is stored once (requires the
//!   default `string-dedup` feature)
//! - **Free-zone writes**: strings of unknown length are written in place and
//!   committed in one step
//! - **Shrink-to-fit**: the gap between the regions is squeezed out and every
//!   reference in the tree is relocated
//! - **Document handles**: typed read and write access to the tree
//!
//! Allocation failures never abort. Primitives return `None` and set a
//! sticky overflow flag; document operations return [`PoolError`].

pub mod allocator;
pub mod arena;
pub mod document;
pub mod error;
pub mod variant;
pub mod writer;

pub use allocator::{Allocator, SystemAllocator};
pub use arena::{ALIGNMENT, Arena, SLOT_SIZE};
pub use document::{Document, StringSource, VariantMut, VariantRef};
pub use error::{PoolError, Result};
pub use variant::{SlotRef, StrRef, VariantData};
pub use writer::FreeZoneWriter;
