//! Top-level error type.
//!
//! Layer-local failures (an unreadable object in a chain) never reach this
//! type; they are rendered in place. What does reach it means the requested
//! operation cannot work against this image at all.

use crate::cache::syscache::ConfigDataError;
use crate::memory::MemoryError;
use crate::storage::DecodeError;
use isf::IsfError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrashError {
    /// A kernel symbol the operation needs is absent: a stripped or
    /// incompatible kernel.
    #[error("Missing kernel symbol: {0}")]
    MissingSymbol(String),

    #[error("Kernel type '{0}' not found in the symbol table")]
    MissingType(String),

    #[error("Field {type_name}.{field} not found in the symbol table")]
    MissingField { type_name: String, field: String },

    #[error("Cannot decode a '{type_name}' at {address:#x}")]
    UnsupportedObject { type_name: String, address: u64 },

    /// State that is filled in from symbol callbacks has not been loaded.
    #[error("{0} is not available yet")]
    DelayedAttribute(String),

    #[error("Unknown architecture: {0}")]
    UnknownArchitecture(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Isf(IsfError),

    #[error(transparent)]
    ConfigData(#[from] ConfigDataError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl From<IsfError> for CrashError {
    fn from(err: IsfError) -> Self {
        match err {
            IsfError::TypeNotFound(name) => CrashError::MissingType(name),
            IsfError::FieldNotFound { type_name, field } => {
                CrashError::MissingField { type_name, field }
            }
            other => CrashError::Isf(other),
        }
    }
}

pub type CrashResult<T> = Result<T, CrashError>;
