//! Kernel data structures outside the storage stack.

pub mod cpu;
pub mod modules;

pub use cpu::{for_each_set_bit, CpuMasks};
pub use modules::{for_each_module, module_sections, Module, ModuleSection, Modules};
