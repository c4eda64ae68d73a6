//! Loaded kernel modules.

use crate::error::{CrashError, CrashResult};
use crate::target::Target;
use isf::{IsfResult, ListIterator, StructReader};
use tracing::warn;

/// `nsections` above this is treated as a corrupt `module_sect_attrs`.
const MAX_SECTIONS: u64 = 1024;

/// One `struct module` on the `modules` list.
#[derive(Clone)]
pub struct Module<'t> {
    reader: StructReader<'t>,
}

/// A loaded ELF section of a module and its load address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSection {
    pub name: String,
    pub address: u64,
}

impl<'t> Module<'t> {
    pub fn address(&self) -> u64 {
        self.reader.base_addr()
    }

    pub fn reader(&self) -> &StructReader<'t> {
        &self.reader
    }

    pub fn name(&self) -> CrashResult<String> {
        Ok(self.reader.read_string("name", 64)?)
    }

    /// Sections from the in-memory `sect_attrs`, except `.text`.
    pub fn sections(&self) -> CrashResult<Vec<ModuleSection>> {
        module_sections(&self.reader)
    }
}

/// Iterator over the `modules` list. Stops after the first read failure.
pub struct Modules<'t> {
    list: ListIterator<'t>,
    done: bool,
}

impl<'t> Iterator for Modules<'t> {
    type Item = CrashResult<Module<'t>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.list.next_entry() {
            Ok(Some(reader)) => Some(Ok(Module { reader })),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(CrashError::from(err)))
            }
        }
    }
}

pub fn for_each_module(target: &Target) -> CrashResult<Modules<'_>> {
    let head = target.require_symbol("modules")?;
    let list = ListIterator::new(target.symbols(), target.memory(), head, "module", "list")?;
    Ok(Modules { list, done: false })
}

pub fn module_sections(module: &StructReader<'_>) -> CrashResult<Vec<ModuleSection>> {
    let attrs = module.deref("sect_attrs", "module_sect_attrs")?;
    let count = attrs.read_unsigned("nsections")?;
    if count > MAX_SECTIONS {
        warn!(
            "module {:#x} claims {} sections, ignoring them",
            module.base_addr(),
            count
        );
        return Ok(Vec::new());
    }

    let base = attrs.field_address("attrs")?;
    let stride = module
        .symbols()
        .type_size("module_sect_attr")
        .ok_or_else(|| CrashError::MissingType("module_sect_attr".into()))? as u64;

    let mut sections = Vec::new();
    for i in 0..count {
        let attr = attrs.at(base + i * stride, "module_sect_attr")?;
        let name = section_name(&attr)?;
        if name == ".text" {
            continue;
        }
        sections.push(ModuleSection {
            name,
            address: attr.read_unsigned("address")?,
        });
    }
    Ok(sections)
}

/// `module_sect_attr.name` until 5.8, `battr.attr.name` since.
fn section_name(attr: &StructReader<'_>) -> IsfResult<String> {
    if attr.has_field("name") {
        attr.read_cstring("name", isf::MAX_CSTRING)
    } else {
        attr.nested("battr", "bin_attribute")?
            .nested("attr", "attribute")?
            .read_cstring("name", isf::MAX_CSTRING)
    }
}
