//! Per-architecture register recovery for kernel tasks.

pub mod aarch64;

pub use aarch64::Aarch64Architecture;

use crate::error::{CrashError, CrashResult};
use isf::StructReader;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// Register values recovered for one thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadRegisters {
    registers: BTreeMap<String, u64>,
    /// Stack pointer used to unwind a scheduled-out task.
    pub stack_pointer: Option<u64>,
    pub valid_stack: bool,
}

impl ThreadRegisters {
    pub fn set(&mut self, name: &str, value: u64) {
        self.registers.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.registers.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.registers.iter().map(|(n, &v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

pub trait Architecture: Send + Sync {
    /// Canonical name, as `uname -m` reports it.
    fn ident(&self) -> &'static str;

    /// Other names the architecture is known by (BFD target names).
    fn aliases(&self) -> &'static [&'static str];

    fn register_names(&self) -> &'static [&'static str];

    /// Registers of a task that was running on a CPU, from the set saved
    /// when the CPU stopped. Names this architecture does not know are
    /// ignored.
    fn fetch_active(&self, saved: &BTreeMap<String, u64>, thread: &mut ThreadRegisters) {
        for (name, &value) in saved {
            if self.register_names().contains(&name.as_str()) {
                thread.set(name, value);
            }
        }
    }

    /// Registers of a scheduled-out task, from its `task_struct`.
    fn fetch_scheduled(&self, task: &StructReader<'_>, thread: &mut ThreadRegisters) -> CrashResult<()>;

    /// Saved stack pointer from a `thread_struct`.
    fn stack_pointer(&self, thread_struct: &StructReader<'_>) -> CrashResult<u64>;

    fn thread_info_address(&self, task: &StructReader<'_>) -> CrashResult<u64>;
}

/// Architectures by ident and alias.
pub struct ArchRegistry {
    arches: RwLock<Vec<Arc<dyn Architecture>>>,
}

static GLOBAL: LazyLock<ArchRegistry> = LazyLock::new(|| {
    let registry = ArchRegistry::new();
    registry.register(Arc::new(Aarch64Architecture));
    registry
});

impl Default for ArchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchRegistry {
    pub fn new() -> Self {
        ArchRegistry {
            arches: RwLock::new(Vec::new()),
        }
    }

    /// The process-wide registry with every built-in architecture.
    pub fn global() -> &'static ArchRegistry {
        &GLOBAL
    }

    pub fn register(&self, arch: Arc<dyn Architecture>) {
        debug!("Registered architecture {}", arch.ident());
        self.arches.write().push(arch);
    }

    pub fn get(&self, name: &str) -> CrashResult<Arc<dyn Architecture>> {
        self.arches
            .read()
            .iter()
            .find(|arch| arch.ident() == name || arch.aliases().contains(&name))
            .cloned()
            .ok_or_else(|| CrashError::UnknownArchitecture(name.to_string()))
    }

    pub fn idents(&self) -> Vec<&'static str> {
        self.arches.read().iter().map(|arch| arch.ident()).collect()
    }
}
