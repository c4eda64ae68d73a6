//! Callback-address → decoder factory table.
//!
//! Kernel I/O objects carry the completion callback that will run when the
//! I/O finishes (`bio.bi_end_io`, `buffer_head.b_end_io`). The callback
//! identifies the subsystem that issued the object, so decoders are keyed
//! by its address. Addresses are only known once symbols are loaded, so
//! registration by name is deferred through the [`SymbolNotifier`].

use crate::storage::decode::StorageContext;
use crate::storage::decoder::BoxedDecoder;
use crate::symbols::SymbolNotifier;
use isf::StructReader;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// What a decoder is registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchKey {
    /// A resolved callback address.
    Address(u64),
    /// One or more callback symbol names, registered as they resolve.
    Symbols(Vec<String>),
}

impl From<u64> for DispatchKey {
    fn from(address: u64) -> Self {
        DispatchKey::Address(address)
    }
}

impl From<&str> for DispatchKey {
    fn from(name: &str) -> Self {
        DispatchKey::Symbols(vec![name.to_string()])
    }
}

impl From<&[&str]> for DispatchKey {
    fn from(names: &[&str]) -> Self {
        DispatchKey::Symbols(names.iter().map(|n| n.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for DispatchKey {
    fn from(names: [&str; N]) -> Self {
        DispatchKey::from(&names[..])
    }
}

pub type BuildDecoder = for<'a> fn(StorageContext<'a>, StructReader<'a>) -> BoxedDecoder<'a>;

/// Constructs a decoder for an object whose callback matched.
///
/// `bio` and `buffer_head` callbacks share one table, so each factory
/// names the kernel type it builds from.
#[derive(Clone, Copy)]
pub struct DecoderFactory {
    name: &'static str,
    object_type: &'static str,
    build: BuildDecoder,
}

impl DecoderFactory {
    pub const fn new(name: &'static str, object_type: &'static str, build: BuildDecoder) -> Self {
        DecoderFactory {
            name,
            object_type,
            build,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Kernel type this factory accepts.
    pub fn object_type(&self) -> &'static str {
        self.object_type
    }

    pub fn accepts(&self, object: &StructReader<'_>) -> bool {
        self.object_type == object.type_name()
    }

    pub fn build<'a>(&self, ctx: StorageContext<'a>, object: StructReader<'a>) -> BoxedDecoder<'a> {
        (self.build)(ctx, object)
    }
}

impl fmt::Debug for DecoderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderFactory")
            .field("name", &self.name)
            .field("object_type", &self.object_type)
            .finish()
    }
}

impl PartialEq for DecoderFactory {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for DecoderFactory {}

/// Shared decoder table. Clones refer to the same table.
#[derive(Clone)]
pub struct DecoderRegistry {
    table: Arc<RwLock<HashMap<u64, DecoderFactory>>>,
    notifier: SymbolNotifier,
}

static GLOBAL: LazyLock<DecoderRegistry> = LazyLock::new(|| {
    let registry = DecoderRegistry::new(SymbolNotifier::global().clone());
    crate::storage::decoders::install(&registry);
    registry
});

impl DecoderRegistry {
    /// An empty registry whose symbolic keys resolve through `notifier`.
    pub fn new(notifier: SymbolNotifier) -> Self {
        DecoderRegistry {
            table: Arc::new(RwLock::new(HashMap::new())),
            notifier,
        }
    }

    /// The process-wide registry, with the built-in subsystem decoders.
    pub fn global() -> &'static DecoderRegistry {
        &GLOBAL
    }

    /// Register `factory` under `key`.
    ///
    /// Symbolic keys take effect when each name resolves. For an address
    /// already registered, the last registration wins.
    pub fn register(&self, key: impl Into<DispatchKey>, factory: DecoderFactory) {
        match key.into() {
            DispatchKey::Address(address) => self.insert(address, factory),
            DispatchKey::Symbols(names) => {
                for name in names {
                    debug!("Decoder {} waits for symbol {}", factory.name, name);
                    let registry = self.clone();
                    self.notifier
                        .on_resolved(&name, move |address| registry.insert(address, factory));
                }
            }
        }
    }

    fn insert(&self, address: u64, factory: DecoderFactory) {
        let previous = self.table.write().insert(address, factory);
        match previous {
            Some(old) if old != factory => warn!(
                "Decoder {} replaces {} for callback {:#x}",
                factory.name, old.name, address
            ),
            Some(_) => {}
            None => debug!("Registered decoder {} for {:#x}", factory.name, address),
        }
    }

    pub fn lookup(&self, address: u64) -> Option<DecoderFactory> {
        self.table.read().get(&address).copied()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    /// Registered (address, decoder name) pairs in address order.
    pub fn entries(&self) -> Vec<(u64, &'static str)> {
        let mut entries: Vec<_> = self
            .table
            .read()
            .iter()
            .map(|(&address, factory)| (address, factory.name))
            .collect();
        entries.sort_unstable();
        entries
    }
}

/// Register a decoder in the process-wide registry.
pub fn register_decoder(key: impl Into<DispatchKey>, factory: DecoderFactory) {
    DecoderRegistry::global().register(key, factory);
}
