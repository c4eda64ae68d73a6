//! Memory-mapped file layer implementation.
//!
//! Dumps are immutable, so the layer is strictly read-only: one map, shared
//! by every reader, no locking.

use crate::memory::error::{MemoryError, MemoryResult};
use crate::memory::traits::MemoryLayer;
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::{Path, PathBuf};

/// A read-only memory-mapped file layer.
///
/// # Example
///
/// ```rust,ignore
/// use crashlens::memory::layers::MmapFileLayer;
///
/// let layer = MmapFileLayer::open("file", "/var/crash/vmcore")?;
/// let header = layer.read_bytes(0, 64, false)?;
/// ```
pub struct MmapFileLayer {
    name: String,
    path: PathBuf,
    /// `None` for an empty file; `memmap2` refuses to map zero bytes.
    mmap: Option<Mmap>,
}

impl MmapFileLayer {
    /// Open and map a file.
    pub fn open(name: impl Into<String>, path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();

        let mmap = if size == 0 {
            None
        } else {
            // SAFETY: the map is read-only; a dump being truncated underneath
            // us is outside what any reader can defend against.
            Some(unsafe { MmapOptions::new().map(&file)? })
        };

        Ok(MmapFileLayer {
            name: name.into(),
            path,
            mmap,
        })
    }

    /// The whole file as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    /// File size in bytes.
    pub fn size(&self) -> u64 {
        self.as_slice().len() as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read bytes from the layer.
    ///
    /// * `pad` - If true, pad with zeros for out-of-range reads; otherwise return an error
    pub fn read_bytes(&self, offset: u64, length: usize, pad: bool) -> MemoryResult<Vec<u8>> {
        let data = self.as_slice();
        let size = data.len() as u64;

        if offset > size || (offset == size && length > 0) {
            if pad {
                return Ok(vec![0u8; length]);
            }
            return Err(MemoryError::invalid_address(
                &self.name,
                offset,
                "Offset outside of the file",
            ));
        }

        let start = offset as usize;
        let available = (size - offset) as usize;

        if length <= available {
            Ok(data[start..start + length].to_vec())
        } else if pad {
            let mut result = Vec::with_capacity(length);
            result.extend_from_slice(&data[start..]);
            result.resize(length, 0);
            Ok(result)
        } else {
            Err(MemoryError::invalid_address(
                &self.name,
                offset + available as u64,
                "Could not read sufficient bytes from the file",
            ))
        }
    }
}

impl MemoryLayer for MmapFileLayer {
    fn read(&self, offset: u64, length: usize) -> MemoryResult<Vec<u8>> {
        self.read_bytes(offset, length, false)
    }

    fn is_valid(&self, offset: u64, length: u64) -> bool {
        if length == 0 {
            return false;
        }
        match offset.checked_add(length) {
            Some(end) => end <= self.size(),
            None => false,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn maximum_address(&self) -> u64 {
        self.size().saturating_sub(1)
    }
}
