//! arm64.

use crate::arch::{Architecture, ThreadRegisters};
use crate::error::CrashResult;
use isf::StructReader;

const REGISTERS: &[&str] = &[
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13",
    "x14", "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26",
    "x27", "x28", "x29", "x30", "sp", "pc", "cpsr",
];

/// Callee-saved registers `cpu_switch_to` stores in `thread.cpu_context`.
const CALLEE_SAVED: &[&str] = &[
    "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27", "x28",
];

pub struct Aarch64Architecture;

impl Aarch64Architecture {
    fn cpu_context<'a>(thread_struct: &StructReader<'a>) -> CrashResult<StructReader<'a>> {
        Ok(thread_struct.nested("cpu_context", "cpu_context")?)
    }
}

impl Architecture for Aarch64Architecture {
    fn ident(&self) -> &'static str {
        "aarch64"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["elf64-aarch64"]
    }

    fn register_names(&self) -> &'static [&'static str] {
        REGISTERS
    }

    fn fetch_scheduled(&self, task: &StructReader<'_>, thread: &mut ThreadRegisters) -> CrashResult<()> {
        let context = Self::cpu_context(&task.nested("thread", "thread_struct")?)?;
        for &reg in CALLEE_SAVED {
            thread.set(reg, context.read_u64(reg)?);
        }
        thread.set("x29", context.read_u64("fp")?);

        let sp = context.read_u64("sp")?;
        thread.set("sp", sp);
        thread.set("pc", context.read_u64("pc")?);

        thread.stack_pointer = Some(sp);
        thread.valid_stack = true;
        Ok(())
    }

    fn stack_pointer(&self, thread_struct: &StructReader<'_>) -> CrashResult<u64> {
        Ok(Self::cpu_context(thread_struct)?.read_u64("sp")?)
    }

    /// arm64 keeps `thread_info` at the start of `task_struct`.
    fn thread_info_address(&self, task: &StructReader<'_>) -> CrashResult<u64> {
        Ok(task.field_address("thread_info")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const TASK: u64 = 0x70000;
    const CONTEXT: u64 = TASK + 24;

    fn put_context(memory: &MockMemory) {
        for i in 0..10u64 {
            memory.write_u64(CONTEXT + i * 8, 0x1900 + i);
        }
        memory.write_u64(CONTEXT + 80, 0xfffffe0000012340);
        memory.write_u64(CONTEXT + 88, 0xfffffe0000012300);
        memory.write_u64(CONTEXT + 96, 0xffff800008001234);
    }

    #[test]
    fn test_fetch_scheduled() {
        let memory = Arc::new(MockMemory::new());
        put_context(&memory);
        let target = test_target(memory);
        let task = target.reader(TASK, "task_struct").unwrap();

        let arch = Aarch64Architecture;
        let mut regs = ThreadRegisters::default();
        arch.fetch_scheduled(&task, &mut regs).unwrap();

        assert_eq!(regs.get("x19"), Some(0x1900));
        assert_eq!(regs.get("x28"), Some(0x1909));
        assert_eq!(regs.get("x29"), Some(0xfffffe0000012340));
        assert_eq!(regs.get("sp"), Some(0xfffffe0000012300));
        assert_eq!(regs.get("pc"), Some(0xffff800008001234));
        assert_eq!(regs.get("x0"), None);
        assert_eq!(regs.len(), 13);
        assert_eq!(regs.stack_pointer, Some(0xfffffe0000012300));
        assert!(regs.valid_stack);

        let thread = task.nested("thread", "thread_struct").unwrap();
        assert_eq!(arch.stack_pointer(&thread).unwrap(), 0xfffffe0000012300);
        assert_eq!(arch.thread_info_address(&task).unwrap(), TASK);
    }

    #[test]
    fn test_fetch_scheduled_unreadable() {
        let target = test_target(Arc::new(MockMemory::new()));
        let task = target.reader(TASK, "task_struct").unwrap();
        let mut regs = ThreadRegisters::default();
        assert!(Aarch64Architecture.fetch_scheduled(&task, &mut regs).is_err());
        assert!(!regs.valid_stack);
    }

    #[test]
    fn test_fetch_active_ignores_unknown_registers() {
        let saved: BTreeMap<String, u64> = [("x0", 1), ("pc", 2), ("rip", 3), ("sp", 4)]
            .into_iter()
            .map(|(n, v)| (n.to_string(), v))
            .collect();
        let mut regs = ThreadRegisters::default();
        Aarch64Architecture.fetch_active(&saved, &mut regs);
        assert_eq!(regs.get("x0"), Some(1));
        assert_eq!(regs.get("pc"), Some(2));
        assert_eq!(regs.get("rip"), None);
        assert_eq!(regs.len(), 3);
    }
}
