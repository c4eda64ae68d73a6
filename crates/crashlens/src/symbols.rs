//! Symbol-availability notifications.
//!
//! Kernel symbols become known when a symbol table is attached to the
//! session (or when a module's symbols are loaded later). Subsystems that
//! key tables by symbol addresses subscribe by name and are called back
//! once the address is known, so their registration never blocks or fails
//! at startup.

use isf::IsfSymbols;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, trace};

type Callback = Box<dyn FnOnce(u64) + Send>;
type Source = Arc<dyn Fn(&str) -> Option<u64> + Send + Sync>;

#[derive(Default)]
struct NotifierState {
    resolved: HashMap<String, u64>,
    pending: HashMap<String, Vec<Callback>>,
    source: Option<Source>,
}

/// One-shot callbacks keyed by symbol name.
///
/// Each name resolves at most once; callbacks subscribed after that fire
/// immediately with the recorded address. Callbacks never run with the
/// internal lock held, so they may subscribe further names.
#[derive(Clone, Default)]
pub struct SymbolNotifier {
    state: Arc<Mutex<NotifierState>>,
}

static GLOBAL: LazyLock<SymbolNotifier> = LazyLock::new(SymbolNotifier::new);

impl SymbolNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide notifier used by the default target and registry.
    pub fn global() -> &'static SymbolNotifier {
        &GLOBAL
    }

    /// Call `callback` with the address of `name` once it is known.
    pub fn on_resolved(&self, name: &str, callback: impl FnOnce(u64) + Send + 'static) {
        let mut state = self.state.lock();
        if let Some(&addr) = state.resolved.get(name) {
            drop(state);
            callback(addr);
            return;
        }

        let from_source = state.source.clone().and_then(|source| source(name));
        match from_source {
            Some(addr) => {
                state.resolved.insert(name.to_string(), addr);
                drop(state);
                trace!("{} resolved from attached symbols at {:#x}", name, addr);
                callback(addr);
            }
            None => {
                debug!("Deferring callback until {} is resolved", name);
                state
                    .pending
                    .entry(name.to_string())
                    .or_default()
                    .push(Box::new(callback));
            }
        }
    }

    /// Record the address of `name` and fire its pending callbacks.
    ///
    /// Returns the number of callbacks fired. A name that is already
    /// resolved is left untouched and fires nothing.
    pub fn resolve(&self, name: &str, addr: u64) -> usize {
        let callbacks = {
            let mut state = self.state.lock();
            if state.resolved.contains_key(name) {
                trace!("{} already resolved, ignoring {:#x}", name, addr);
                return 0;
            }
            state.resolved.insert(name.to_string(), addr);
            state.pending.remove(name).unwrap_or_default()
        };

        let fired = callbacks.len();
        for callback in callbacks {
            callback(addr);
        }
        if fired > 0 {
            debug!("{} resolved at {:#x}, fired {} callbacks", name, addr, fired);
        }
        fired
    }

    /// Attach a symbol table as the source of addresses.
    ///
    /// Every pending name the table knows is resolved now; later
    /// subscriptions consult the table directly. `kernel_offset` is added
    /// to each link-time address.
    pub fn attach(&self, symbols: Arc<IsfSymbols>, kernel_offset: u64) -> usize {
        let source: Source = Arc::new(move |name: &str| {
            symbols
                .get_symbol(name)
                .map(|addr| addr.wrapping_add(kernel_offset))
        });

        let ready: Vec<(String, u64)> = {
            let mut state = self.state.lock();
            state.source = Some(source.clone());
            state
                .pending
                .keys()
                .filter_map(|name| source(name).map(|addr| (name.clone(), addr)))
                .collect()
        };

        ready
            .into_iter()
            .map(|(name, addr)| self.resolve(&name, addr))
            .sum()
    }

    pub fn is_resolved(&self, name: &str) -> bool {
        self.state.lock().resolved.contains_key(name)
    }

    /// Names with callbacks still waiting.
    pub fn pending_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().pending.keys().cloned().collect();
        names.sort();
        names
    }
}
