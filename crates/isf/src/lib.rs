//! ISF (Intermediate Symbol Format) support for Linux kernel images.
//!
//! This crate parses the JSON-based ISF files that `dwarf2json` produces from
//! a `vmlinux` with debug info, and reads kernel structures out of a memory
//! image with them. It provides:
//!
//! - Parsing of `.json` and `.json.xz` (LZMA-compressed) ISF files
//! - Type definitions for all ISF constructs (structs, base types, enums, symbols)
//! - `StructReader` for reading kernel structures from memory using ISF offsets
//! - `ListIterator` for walking `struct list_head` lists
//!
//! # Example
//!
//! ```rust,ignore
//! use isf::{parse_isf_file, StructReader};
//!
//! let symbols = parse_isf_file("vmlinux-5.14.json.xz")?;
//! let bio = StructReader::new(&symbols, &memory, addr, "bio")?;
//! let end_io = bio.read_pointer("bi_end_io")?;
//! ```

pub mod error;
pub mod parser;
pub mod reader;
pub mod types;

pub use error::{IsfError, IsfResult};
pub use parser::{parse_isf_bytes, parse_isf_file, parse_isf_str};
pub use reader::{read_pointer, ListIterator, MemoryAccess, StructReader, MAX_CSTRING};
pub use types::{BaseType, EnumType, FieldDef, IsfSymbols, Symbol, TypeInfo, UserType};
