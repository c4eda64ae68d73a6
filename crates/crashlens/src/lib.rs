//! crashlens: inspect Linux kernel crash dumps.
//!
//! Reads kernel structures out of a kdump `vmcore` (or raw image) using an
//! ISF symbol table, and reconstructs storage I/O chains, the build
//! configuration, uptime, CPU sets, modules and task registers.

pub mod arch;
pub mod cache;
pub mod config;
pub mod error;
pub mod kernel;
pub mod logging;
pub mod memory;
pub mod storage;
pub mod symbols;
pub mod target;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::InspectConfig;
pub use error::{CrashError, CrashResult};
pub use symbols::SymbolNotifier;
pub use target::Target;
