//! The decoder capability and lazy field interpretation.

use isf::IsfError;
use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Failure to produce one of a decoder's fields.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// A page the decoder needed is not in the image.
    #[error("memory at {address:#x} is unavailable: {msg}")]
    Unavailable { address: u64, msg: String },

    /// The decoder has been interpreted and does not expose `name`.
    #[error("{decoder} has no attribute '{name}'")]
    NoSuchAttribute { decoder: &'static str, name: String },

    /// The symbol table lacks a type or field the decoder reads.
    #[error("kernel layout: {0}")]
    Layout(String),
}

impl DecodeError {
    pub fn no_such_attribute(decoder: &'static str, name: &str) -> Self {
        DecodeError::NoSuchAttribute {
            decoder,
            name: name.to_string(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, DecodeError::Unavailable { .. })
    }
}

impl From<IsfError> for DecodeError {
    fn from(err: IsfError) -> Self {
        match err {
            IsfError::MemoryRead { offset, msg } => DecodeError::Unavailable {
                address: offset,
                msg,
            },
            IsfError::InvalidPointer(address) => DecodeError::Unavailable {
                address,
                msg: "invalid pointer".to_string(),
            },
            other => DecodeError::Layout(other.to_string()),
        }
    }
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// A field value exposed through [`Decoder::attribute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Address(u64),
    Number(u64),
    Text(String),
}

impl AttrValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttrValue::Address(v) | AttrValue::Number(v) => Some(*v),
            AttrValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Address(v) => write!(f, "{:#x}", v),
            AttrValue::Number(v) => write!(f, "{}", v),
            AttrValue::Text(s) => f.write_str(s),
        }
    }
}

/// Interprets one kernel I/O object (`bio` or `buffer_head`).
///
/// Construction reads nothing. The first call that needs a field runs the
/// decoder's interpretation exactly once; its outcome, success or failure,
/// is kept for the life of the decoder.
pub trait Decoder<'a> {
    /// Short identifier of the decoder variant.
    fn name(&self) -> &'static str;

    /// Address of the wrapped object.
    fn address(&self) -> u64;

    /// Kernel type of the wrapped object.
    fn object_type(&self) -> &'static str;

    /// One human-readable line. Never fails; unreadable state is rendered.
    fn describe(&self) -> String;

    /// The object this layer was produced from, if it tracks one.
    fn next(&self) -> Option<BoxedDecoder<'a>>;

    /// A named field. Interprets on first use.
    fn attribute(&self, name: &str) -> DecodeResult<AttrValue>;

    fn is_interpreted(&self) -> bool;
}

pub type BoxedDecoder<'a> = Box<dyn Decoder<'a> + 'a>;

/// A decoder handed out by a walk that still needs it to find the next layer.
pub type SharedDecoder<'a> = Rc<dyn Decoder<'a> + 'a>;

impl<'a, 'b> fmt::Display for dyn Decoder<'a> + 'b {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Two-state holder for a decoder's interpreted fields.
pub struct Interpreted<T> {
    cell: OnceCell<DecodeResult<T>>,
}

impl<T> Default for Interpreted<T> {
    fn default() -> Self {
        Interpreted {
            cell: OnceCell::new(),
        }
    }
}

impl<T> Interpreted<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The interpreted fields, running `interpret` if this is the first
    /// access. Later calls return the cached outcome without running it.
    pub fn get_or_interpret(
        &self,
        interpret: impl FnOnce() -> DecodeResult<T>,
    ) -> DecodeResult<&T> {
        match self.cell.get_or_init(interpret) {
            Ok(fields) => Ok(fields),
            Err(err) => Err(err.clone()),
        }
    }

    pub fn is_interpreted(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// Description used when a decoder's own interpretation failed.
pub(crate) fn unreadable(address: u64, object_type: &str, err: &DecodeError) -> String {
    format!("{:x} {}: unreadable ({})", address, object_type, err)
}
