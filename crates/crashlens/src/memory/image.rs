//! Memory image abstraction over the file and ELF core layers.

use crate::memory::error::{MemoryError, MemoryResult};
use crate::memory::layers::{ElfCoreLayer, MmapFileLayer};
use crate::memory::traits::MemoryLayer;
use isf::MemoryAccess;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// How to interpret a dump file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ImageFormat {
    /// ELF if the file starts with the ELF magic, otherwise raw at base 0.
    #[default]
    Auto,
    /// kdump / `/proc/vmcore` style ELF core.
    Elf,
    /// Flat image; kernel address `base` is file offset 0.
    Raw { base: u64 },
}

/// An opened kernel memory image.
pub struct MemoryImage {
    layer: Arc<dyn MemoryLayer>,
    /// Address that file offset 0 corresponds to (raw images only).
    base: u64,
    kernel_offset: Option<u64>,
}

impl MemoryImage {
    /// Open a memory dump file.
    pub fn open(path: impl AsRef<Path>, format: ImageFormat) -> MemoryResult<Self> {
        let path = path.as_ref();
        let file = MmapFileLayer::open("file", path)?;

        let is_elf = file.as_slice().starts_with(ELF_MAGIC);
        let image = match format {
            ImageFormat::Elf => Self::elf(file)?,
            ImageFormat::Auto if is_elf => Self::elf(file)?,
            ImageFormat::Auto => Self::raw(file, 0),
            ImageFormat::Raw { base } => Self::raw(file, base),
        };

        info!(
            "Opened {} through the '{}' layer (max address {:#x})",
            path.display(),
            image.layer.name(),
            image.layer.maximum_address()
        );
        Ok(image)
    }

    fn elf(file: MmapFileLayer) -> MemoryResult<Self> {
        let core = ElfCoreLayer::from_file("vmcore", file)?;
        let kernel_offset = core.kernel_offset();
        Ok(MemoryImage {
            layer: Arc::new(core),
            base: 0,
            kernel_offset,
        })
    }

    fn raw(file: MmapFileLayer, base: u64) -> Self {
        MemoryImage {
            layer: Arc::new(file),
            base,
            kernel_offset: None,
        }
    }

    /// Wrap an existing layer, e.g. one assembled in memory.
    pub fn from_layer(layer: Arc<dyn MemoryLayer>) -> Self {
        MemoryImage {
            layer,
            base: 0,
            kernel_offset: None,
        }
    }

    /// KASLR offset recorded in the image itself, if it carries one.
    pub fn kernel_offset(&self) -> Option<u64> {
        self.kernel_offset
    }

    pub fn layer(&self) -> &dyn MemoryLayer {
        self.layer.as_ref()
    }

    /// Read bytes at a kernel address.
    pub fn read(&self, address: u64, length: usize) -> MemoryResult<Vec<u8>> {
        let offset = address.checked_sub(self.base).ok_or_else(|| {
            MemoryError::invalid_address(self.layer.name(), address, "below image base")
        })?;
        self.layer.read(offset, length)
    }
}

/// Implement ISF's MemoryAccess trait for direct use with StructReader.
impl MemoryAccess for MemoryImage {
    fn read(
        &self,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
        MemoryImage::read(self, offset, length)
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    }

    fn is_valid(&self, offset: u64, length: u64) -> bool {
        offset
            .checked_sub(self.base)
            .is_some_and(|o| self.layer.is_valid(o, length))
    }
}
