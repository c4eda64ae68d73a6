//! Error types for the ISF crate.

use thiserror::Error;

/// ISF parsing/reading errors.
#[derive(Debug, Clone, Error)]
pub enum IsfError {
    #[error("ISF file not found: {0}")]
    FileNotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("XZ/LZMA decompression error: {0}")]
    Decompression(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("Type not found: {0}")]
    TypeNotFound(String),

    #[error("Field not found: {field} in type {type_name}")]
    FieldNotFound { type_name: String, field: String },

    /// The backing memory for the address is not present in the image.
    #[error("Memory read error at offset {offset:#x}: {msg}")]
    MemoryRead { offset: u64, msg: String },

    #[error("Invalid pointer: {0:#x}")]
    InvalidPointer(u64),

    #[error("Cannot resolve size of {type_name}.{field}")]
    UnresolvedSize { type_name: String, field: String },

    #[error("Unsupported integer width {size} for {type_name}.{field}")]
    UnsupportedWidth {
        type_name: String,
        field: String,
        size: usize,
    },
}

impl IsfError {
    /// True when the error means the requested memory is missing from the image,
    /// as opposed to a layout or symbol problem.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, IsfError::MemoryRead { .. } | IsfError::InvalidPointer(_))
    }
}

pub type IsfResult<T> = Result<T, IsfError>;
