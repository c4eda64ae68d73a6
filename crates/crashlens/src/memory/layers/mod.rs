//! Layer implementations.
//!
//! `MmapFileLayer` maps a dump file flat; `ElfCoreLayer` interprets a kdump
//! `vmcore` on top of it so reads use kernel virtual addresses.

pub mod elf_core;
pub mod mmap_file;

pub use elf_core::{ElfCoreLayer, LoadSegment};
pub use mmap_file::MmapFileLayer;
