//! Core traits for abstracting memory access.
//!
//! The [`MemoryLayer`] trait lets the image wrapper work with any memory
//! source: a flat mapped file, an ELF core, or a test buffer.

use crate::memory::error::MemoryResult;

/// Trait for reading from a memory layer.
pub trait MemoryLayer: Send + Sync {
    /// Read `length` bytes starting at `offset`.
    fn read(&self, offset: u64, length: usize) -> MemoryResult<Vec<u8>>;

    /// Check if the address range `[offset, offset+length)` is valid.
    fn is_valid(&self, offset: u64, length: u64) -> bool;

    /// The name of this layer.
    fn name(&self) -> &str;

    /// Maximum valid address in this layer.
    fn maximum_address(&self) -> u64;
}
