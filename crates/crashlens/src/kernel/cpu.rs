//! Online and possible CPU sets.
//!
//! The masks are read as soon as their symbols resolve. Until then the
//! lists are empty and the `highest_*` queries report the data as delayed.

use crate::error::{CrashError, CrashResult};
use crate::target::Target;
use isf::{IsfResult, IsfSymbols, MemoryAccess, StructReader};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MaskKind {
    Online,
    Possible,
}

/// Symbols are `struct cpumask __cpu_*_mask` on current kernels and
/// `const struct cpumask *const cpu_*_mask` on older ones.
const MASK_SYMBOLS: &[(&str, MaskKind)] = &[
    ("cpu_online_mask", MaskKind::Online),
    ("__cpu_online_mask", MaskKind::Online),
    ("cpu_possible_mask", MaskKind::Possible),
    ("__cpu_possible_mask", MaskKind::Possible),
];

#[derive(Debug, Default)]
struct MaskState {
    online: Vec<u32>,
    possible: Vec<u32>,
}

#[derive(Clone, Default)]
pub struct CpuMasks {
    state: Arc<RwLock<MaskState>>,
}

impl CpuMasks {
    /// Subscribe to the mask symbols of `target`.
    pub fn watch(target: &Target) -> Self {
        let masks = CpuMasks::default();
        for &(name, kind) in MASK_SYMBOLS {
            let state = masks.state.clone();
            let symbols = target.shared_symbols();
            let memory = target.shared_memory();
            target.notifier().on_resolved(name, move |address| {
                match read_mask(&symbols, memory.as_ref(), name, address) {
                    Ok(cpus) => {
                        debug!("{}: {} cpus", name, cpus.len());
                        let mut state = state.write();
                        match kind {
                            MaskKind::Online => state.online = cpus,
                            MaskKind::Possible => state.possible = cpus,
                        }
                    }
                    Err(err) => warn!("Cannot read {} at {:#x}: {}", name, address, err),
                }
            });
        }
        masks
    }

    pub fn online_cpus(&self) -> Vec<u32> {
        self.state.read().online.clone()
    }

    pub fn possible_cpus(&self) -> Vec<u32> {
        self.state.read().possible.clone()
    }

    pub fn highest_online_cpu_nr(&self) -> CrashResult<u32> {
        self.state
            .read()
            .online
            .last()
            .copied()
            .ok_or_else(|| CrashError::DelayedAttribute("cpus_online".into()))
    }

    pub fn highest_possible_cpu_nr(&self) -> CrashResult<u32> {
        self.state
            .read()
            .possible
            .last()
            .copied()
            .ok_or_else(|| CrashError::DelayedAttribute("cpus_possible".into()))
    }
}

fn read_mask(
    symbols: &IsfSymbols,
    memory: &dyn MemoryAccess,
    name: &str,
    address: u64,
) -> IsfResult<Vec<u32>> {
    let is_pointer = symbols
        .symbols
        .get(name)
        .and_then(|sym| sym.type_info.as_ref())
        .is_some_and(|t| t.is_pointer());
    let address = if is_pointer {
        isf::read_pointer(symbols, memory, address)?
    } else {
        address
    };
    let mask = StructReader::new(symbols, memory, address, "cpumask")?;
    Ok(for_each_set_bit(&mask.read_words("bits")?).collect())
}

/// Indices of the set bits in a bitmap of 64-bit words, ascending.
pub fn for_each_set_bit(words: &[u64]) -> impl Iterator<Item = u32> + '_ {
    words.iter().enumerate().flat_map(|(i, &word)| {
        (0..64u32)
            .filter(move |bit| word & (1u64 << bit) != 0)
            .map(move |bit| i as u32 * 64 + bit)
    })
}
