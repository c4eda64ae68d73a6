//! Error types for memory operations.

use thiserror::Error;

/// Errors that can occur in memory operations.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// The address is not backed by data in the image.
    #[error("Invalid address {invalid_address:#x} in layer '{layer_name}': {message}")]
    InvalidAddress {
        layer_name: String,
        invalid_address: u64,
        message: String,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not a usable ELF core.
    #[error("ELF core error in '{path}': {message}")]
    ElfCore { path: String, message: String },
}

impl MemoryError {
    /// Create an InvalidAddress error.
    pub fn invalid_address(layer_name: impl Into<String>, addr: u64, msg: impl Into<String>) -> Self {
        MemoryError::InvalidAddress {
            layer_name: layer_name.into(),
            invalid_address: addr,
            message: msg.into(),
        }
    }

    pub fn elf_core(path: impl Into<String>, msg: impl std::fmt::Display) -> Self {
        MemoryError::ElfCore {
            path: path.into(),
            message: msg.to_string(),
        }
    }
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
