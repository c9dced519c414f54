//! Error handling for the collector.
//!
//! Covers the four failure conditions the collector can surface: an exhausted allocator, a
//! constructor that raised during allocation, a bad configuration, and dereferencing a null
//! smart pointer.

use std::sync::PoisonError;

/// Collector result type.
///
/// Type alias for the standard library's [`Result`](core::result::Result) type with the error
/// type defaulting to [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors that can occur during allocation, configuration, and garbage collection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The global allocator could not satisfy an allocation request.
    #[error("out of memory: failed to allocate {size} bytes")]
    OutOfMemory {
        /// The size, in bytes, of the failed allocation.
        size: usize,
    },
    /// The object's constructor raised an error; the allocation was rolled back.
    #[error("constructor failed: {0}")]
    ConstructorFailed(String),
    /// The collector was initialized with an invalid configuration, or initialized twice.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// A smart pointer was dereferenced while holding a null value.
    #[error("attempted to dereference a null pointer")]
    NullDereference,
    /// A lock guarding collector state was poisoned by a panicking thread.
    #[error("failed to acquire lock: {0}")]
    LockError(String),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(error: PoisonError<T>) -> Self {
        Error::LockError(format!("poisoned lock: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_poison_error() {
        let poison_error: PoisonError<()> = PoisonError::new(());
        let error: Error = poison_error.into();
        assert!(matches!(error, Error::LockError(_)));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::OutOfMemory { size: 32 }.to_string(),
            "out of memory: failed to allocate 32 bytes"
        );
        assert_eq!(
            Error::ConstructorFailed("boom".to_string()).to_string(),
            "constructor failed: boom"
        );
        assert_eq!(
            Error::InvalidConfiguration("alloc_limit too small".to_string()).to_string(),
            "invalid configuration: alloc_limit too small"
        );
        assert_eq!(
            Error::NullDereference.to_string(),
            "attempted to dereference a null pointer"
        );
    }
}
