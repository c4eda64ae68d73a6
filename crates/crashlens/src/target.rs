//! The inspection target: one memory image plus the symbol table that
//! describes the kernel inside it.

use crate::config::InspectConfig;
use crate::error::{CrashError, CrashResult};
use crate::memory::MemoryImage;
use crate::storage::{DecoderRegistry, StorageContext};
use crate::symbols::SymbolNotifier;
use isf::{IsfError, IsfSymbols, MemoryAccess, StructReader};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Target {
    memory: Arc<dyn MemoryAccess>,
    symbols: Arc<IsfSymbols>,
    /// KASLR slide added to every link-time symbol address.
    kernel_offset: u64,
    notifier: SymbolNotifier,
}

impl Target {
    /// Assemble a target and publish its symbols through `notifier`.
    pub fn new(
        memory: Arc<dyn MemoryAccess>,
        symbols: Arc<IsfSymbols>,
        kernel_offset: u64,
        notifier: SymbolNotifier,
    ) -> Self {
        let fired = notifier.attach(symbols.clone(), kernel_offset);
        debug!(
            "Attached {} symbols (offset {:#x}), {} deferred registrations fired",
            symbols.symbols.len(),
            kernel_offset,
            fired
        );
        Target {
            memory,
            symbols,
            kernel_offset,
            notifier,
        }
    }

    /// Open the image and symbol table named by `config`.
    ///
    /// The kernel offset comes from the configuration if set, otherwise
    /// from the dump's VMCOREINFO note, otherwise zero.
    pub fn open(config: &InspectConfig) -> CrashResult<Self> {
        let vmcore = config
            .vmcore
            .as_ref()
            .ok_or_else(|| CrashError::Config("no memory image configured".into()))?;
        let symbols_path = config
            .symbols
            .as_ref()
            .ok_or_else(|| CrashError::Config("no symbol table configured".into()))?;

        let image = MemoryImage::open(vmcore, config.format)?;
        let symbols = isf::parse_isf_file(symbols_path)?;
        if let Some(banner) = symbols.metadata.linux.as_ref().and_then(|l| l.banner.as_deref()) {
            info!("Symbols for: {}", banner.trim());
        }

        let kernel_offset = config
            .kernel_offset
            .or_else(|| image.kernel_offset())
            .unwrap_or(0);
        info!("Kernel offset {:#x}", kernel_offset);

        Ok(Self::new(
            Arc::new(image),
            Arc::new(symbols),
            kernel_offset,
            SymbolNotifier::global().clone(),
        ))
    }

    pub fn symbols(&self) -> &IsfSymbols {
        &self.symbols
    }

    pub fn memory(&self) -> &dyn MemoryAccess {
        self.memory.as_ref()
    }

    /// Owned handles for work that outlives a borrow, e.g. symbol callbacks.
    pub fn shared_symbols(&self) -> Arc<IsfSymbols> {
        self.symbols.clone()
    }

    pub fn shared_memory(&self) -> Arc<dyn MemoryAccess> {
        self.memory.clone()
    }

    pub fn kernel_offset(&self) -> u64 {
        self.kernel_offset
    }

    pub fn notifier(&self) -> &SymbolNotifier {
        &self.notifier
    }

    /// Runtime address of a kernel symbol.
    pub fn symbol_address(&self, name: &str) -> Option<u64> {
        self.symbols
            .get_symbol(name)
            .map(|addr| addr.wrapping_add(self.kernel_offset))
    }

    pub fn require_symbol(&self, name: &str) -> CrashResult<u64> {
        self.symbol_address(name)
            .ok_or_else(|| CrashError::MissingSymbol(name.to_string()))
    }

    /// Size of a symbol's declared type.
    pub fn symbol_size(&self, name: &str) -> CrashResult<usize> {
        self.symbols
            .symbol_size(name)
            .ok_or_else(|| CrashError::MissingSymbol(name.to_string()))
    }

    pub fn reader(&self, address: u64, type_name: &str) -> CrashResult<StructReader<'_>> {
        Ok(StructReader::new(
            &self.symbols,
            self.memory.as_ref(),
            address,
            type_name,
        )?)
    }

    /// A reader for the object a symbol names.
    pub fn symbol_reader(&self, name: &str, type_name: &str) -> CrashResult<StructReader<'_>> {
        let address = self.require_symbol(name)?;
        self.reader(address, type_name)
    }

    pub fn read(&self, address: u64, length: usize) -> CrashResult<Vec<u8>> {
        let bytes = self
            .memory
            .read(address, length)
            .map_err(|e| IsfError::MemoryRead {
                offset: address,
                msg: e.to_string(),
            })?;
        if bytes.len() < length {
            return Err(IsfError::MemoryRead {
                offset: address,
                msg: format!("short read: {} of {} bytes", bytes.len(), length),
            }
            .into());
        }
        Ok(bytes)
    }

    pub fn read_u64(&self, address: u64) -> CrashResult<u64> {
        let bytes = self.read(address, 8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(word))
    }

    /// Storage decoding over this target, checked against its layout.
    pub fn storage<'a>(&'a self, registry: &'a DecoderRegistry) -> CrashResult<StorageContext<'a>> {
        StorageContext::new(&self.symbols, self.memory.as_ref(), registry)
    }
}
