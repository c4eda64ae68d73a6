//! Type definitions for parsed ISF (Intermediate Symbol Format) data.
//!
//! Linux ISF files are produced by `dwarf2json` from a `vmlinux` with debug
//! info. Struct names carry no `struct ` prefix (`bio`, `buffer_head`).

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Top-level ISF file structure.
#[derive(Debug, Deserialize)]
pub struct IsfFile {
    pub metadata: Metadata,
    #[serde(default)]
    pub base_types: HashMap<String, BaseType>,
    #[serde(default)]
    pub user_types: HashMap<String, UserType>,
    #[serde(default)]
    pub symbols: HashMap<String, Symbol>,
    #[serde(default)]
    pub enums: HashMap<String, EnumType>,
}

/// ISF metadata block.
#[derive(Debug, Deserialize)]
pub struct Metadata {
    pub format: String,
    #[serde(default)]
    pub producer: Option<Producer>,
    #[serde(default)]
    pub linux: Option<LinuxMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct Producer {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub datetime: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LinuxMetadata {
    /// `linux_banner` of the kernel the symbols were generated from.
    #[serde(default)]
    pub banner: Option<String>,
}

/// A base (primitive) type definition.
#[derive(Debug, Clone, Deserialize)]
pub struct BaseType {
    pub size: usize,
    pub signed: bool,
    pub kind: String,
    #[serde(default = "default_endian")]
    pub endian: String,
}

fn default_endian() -> String {
    "little".to_string()
}

/// A user-defined (struct/union) type.
#[derive(Debug, Clone, Deserialize)]
pub struct UserType {
    pub size: usize,
    #[serde(default)]
    pub fields: HashMap<String, FieldDef>,
    /// `struct` or `union`.
    #[serde(default)]
    pub kind: Option<String>,
}

/// A field within a user type.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    pub offset: usize,
    #[serde(rename = "type")]
    pub type_info: TypeInfo,
}

/// Type information for a field, recursive to handle nested types.
#[derive(Debug, Clone, Deserialize)]
pub struct TypeInfo {
    pub kind: String,

    /// For kind="struct", "union" or "base": the type name.
    #[serde(default)]
    pub name: Option<String>,

    /// For kind="pointer" or "array": the pointed-to / element type.
    #[serde(default)]
    pub subtype: Option<Box<TypeInfo>>,

    /// For kind="array": element count.
    #[serde(default)]
    pub count: Option<usize>,

    /// For kind="bitfield": bit position and bit length.
    #[serde(default)]
    pub bit_position: Option<usize>,
    #[serde(default)]
    pub bit_length: Option<usize>,

    /// For kind="bitfield": the underlying storage type.
    #[serde(default, rename = "type")]
    pub element_type: Option<Box<TypeInfo>>,

    /// Size override.
    #[serde(default)]
    pub size: Option<usize>,
}

impl TypeInfo {
    /// A bare type reference of the given kind.
    pub fn of_kind(kind: &str, name: Option<&str>) -> Self {
        TypeInfo {
            kind: kind.to_string(),
            name: name.map(str::to_string),
            subtype: None,
            count: None,
            bit_position: None,
            bit_length: None,
            element_type: None,
            size: None,
        }
    }

    pub fn is_pointer(&self) -> bool {
        self.kind == "pointer"
    }
}

/// A symbol (named address).
#[derive(Debug, Clone, Deserialize)]
pub struct Symbol {
    pub address: u64,
    #[serde(default, rename = "type")]
    pub type_info: Option<TypeInfo>,
    #[serde(default)]
    pub constant_data: Option<String>,
}

/// An enumeration type.
#[derive(Debug, Clone, Deserialize)]
pub struct EnumType {
    pub size: usize,
    pub base: String,
    pub constants: HashMap<String, i64>,
}

// ============================================================================
// Resolved/processed types for runtime use
// ============================================================================

/// Fully resolved symbol table ready for use.
#[derive(Debug)]
pub struct IsfSymbols {
    pub base_types: HashMap<String, BaseType>,
    pub user_types: HashMap<String, UserType>,
    pub symbols: HashMap<String, Symbol>,
    pub enums: HashMap<String, EnumType>,
    pub metadata: Metadata,
    /// Pointer size in bytes (4 or 8).
    pub pointer_size: usize,
    /// Link-time address -> symbol name, for reverse lookups.
    pub(crate) by_address: BTreeMap<u64, String>,
}

impl IsfSymbols {
    /// Look up a struct definition by name.
    pub fn get_type(&self, name: &str) -> Option<&UserType> {
        self.user_types.get(name)
    }

    /// Look up a symbol address by name.
    pub fn get_symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).map(|s| s.address)
    }

    /// Name of the symbol at exactly `address` (link-time).
    pub fn symbol_at(&self, address: u64) -> Option<&str> {
        self.by_address.get(&address).map(String::as_str)
    }

    /// Look up a field definition within a struct.
    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDef> {
        self.user_types
            .get(type_name)
            .and_then(|t| t.fields.get(field_name))
    }

    /// Look up a field offset within a struct.
    pub fn field_offset(&self, type_name: &str, field_name: &str) -> Option<usize> {
        self.field(type_name, field_name).map(|f| f.offset)
    }

    pub fn has_field(&self, type_name: &str, field_name: &str) -> bool {
        self.field(type_name, field_name).is_some()
    }

    /// Size in bytes of a field's declared type.
    pub fn field_size(&self, type_name: &str, field_name: &str) -> Option<usize> {
        self.field(type_name, field_name)
            .and_then(|f| self.resolve_type_size(&f.type_info))
    }

    /// Size of the object a symbol names, from its type information.
    pub fn symbol_size(&self, name: &str) -> Option<usize> {
        self.symbols
            .get(name)
            .and_then(|s| s.type_info.as_ref())
            .and_then(|t| self.resolve_type_size(t))
    }

    /// Get the size of a type (user type or base type).
    pub fn type_size(&self, type_name: &str) -> Option<usize> {
        if let Some(ut) = self.user_types.get(type_name) {
            Some(ut.size)
        } else {
            self.base_types.get(type_name).map(|bt| bt.size)
        }
    }

    /// Resolve the size of a TypeInfo in bytes.
    pub fn resolve_type_size(&self, type_info: &TypeInfo) -> Option<usize> {
        if let Some(size) = type_info.size {
            return Some(size);
        }
        match type_info.kind.as_str() {
            "pointer" | "function" => Some(self.pointer_size),
            "struct" | "union" | "base" => {
                type_info.name.as_ref().and_then(|n| self.type_size(n))
            }
            "array" => {
                let count = type_info.count.unwrap_or(0);
                let elem_size = type_info
                    .subtype
                    .as_ref()
                    .and_then(|st| self.resolve_type_size(st))?;
                Some(count * elem_size)
            }
            "bitfield" => type_info
                .element_type
                .as_ref()
                .and_then(|et| self.resolve_type_size(et)),
            "enum" => type_info
                .name
                .as_ref()
                .and_then(|n| self.enums.get(n))
                .map(|e| e.size),
            _ => None,
        }
    }

    /// Look up an enum value by name.
    pub fn enum_value(&self, enum_name: &str, constant_name: &str) -> Option<i64> {
        self.enums
            .get(enum_name)
            .and_then(|e| e.constants.get(constant_name))
            .copied()
    }
}
