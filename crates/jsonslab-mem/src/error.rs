//! Error types for the memory pool and the document handles built on it.
//!
//! The arena primitives themselves never return these: they signal failure
//! with `None` and the sticky overflow flag. Operations that cross the
//! allocator capability, and the document layer, surface failures as
//! [`PoolError`].

/// Errors that can occur while allocating from or resizing a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool has no room left between the string and slot regions.
    #[error("Out of memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory {
        /// The requested allocation size.
        requested: usize,
        /// The free bytes left in the pool.
        available: usize,
    },

    /// The allocator refused to resize the pool buffer.
    #[error("Reallocation denied: allocator could not provide {requested} bytes")]
    ReallocationDenied {
        /// The capacity the pool asked for.
        requested: usize,
    },

    /// The allocator refused to provide a fresh pool buffer.
    #[error("Failed to allocate pool buffer of size {size} bytes")]
    AllocationFailed {
        /// The requested buffer size.
        size: usize,
    },

    /// A child was addressed on a value that is neither an array nor an object.
    #[error("Value is not a container")]
    NotAContainer,

    /// An array index past the last element.
    #[error("Index {index} out of bounds for collection of length {len}")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The collection length.
        len: usize,
    },
}

/// Result type for pool and document operations.
pub type Result<T> = std::result::Result<T, PoolError>;
