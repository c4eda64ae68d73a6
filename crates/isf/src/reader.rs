//! StructReader: reads Linux kernel structures from memory using ISF offsets.
//!
//! This is the bridge between ISF symbol definitions and raw memory. Given a
//! base address and a struct type name, it reads individual fields using the
//! offsets and sizes from the ISF file.

use crate::error::{IsfError, IsfResult};
use crate::types::IsfSymbols;

/// Trait for reading raw bytes from a memory image.
///
/// Any read failure means the region is not available in the image.
pub trait MemoryAccess: Send + Sync {
    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;
    fn is_valid(&self, offset: u64, length: u64) -> bool;
}

/// Longest C string followed through a `char *` before giving up.
pub const MAX_CSTRING: usize = 4096;

/// Reads fields from a kernel structure at a given base address.
///
/// Construction checks only that the type exists; no memory is touched
/// until a field is read.
///
/// # Example
///
/// ```rust,ignore
/// let bio = StructReader::new(&symbols, &memory, addr, "bio")?;
/// let end_io = bio.read_pointer("bi_end_io")?;
/// let bdev = bio.deref("bi_bdev", "block_device")?;
/// ```
#[derive(Clone)]
pub struct StructReader<'a> {
    symbols: &'a IsfSymbols,
    memory: &'a dyn MemoryAccess,
    base_addr: u64,
    type_name: String,
}

impl<'a> StructReader<'a> {
    /// Create a new StructReader for a struct at the given address.
    pub fn new(
        symbols: &'a IsfSymbols,
        memory: &'a dyn MemoryAccess,
        base_addr: u64,
        type_name: &str,
    ) -> IsfResult<Self> {
        if !symbols.user_types.contains_key(type_name) {
            return Err(IsfError::TypeNotFound(type_name.to_string()));
        }
        Ok(StructReader {
            symbols,
            memory,
            base_addr,
            type_name: type_name.to_string(),
        })
    }

    /// The base address of this struct in memory.
    pub fn base_addr(&self) -> u64 {
        self.base_addr
    }

    /// The type name of this struct.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn symbols(&self) -> &'a IsfSymbols {
        self.symbols
    }

    pub fn memory(&self) -> &'a dyn MemoryAccess {
        self.memory
    }

    /// Whether this struct's type declares `field`.
    pub fn has_field(&self, field: &str) -> bool {
        self.symbols.has_field(&self.type_name, field)
    }

    fn field_offset(&self, field: &str) -> IsfResult<usize> {
        self.symbols
            .field_offset(&self.type_name, field)
            .ok_or_else(|| self.field_not_found(field))
    }

    fn field_not_found(&self, field: &str) -> IsfError {
        IsfError::FieldNotFound {
            type_name: self.type_name.clone(),
            field: field.to_string(),
        }
    }

    /// Address of a field within this struct.
    pub fn field_address(&self, field: &str) -> IsfResult<u64> {
        Ok(self.base_addr + self.field_offset(field)? as u64)
    }

    /// Size of a field's declared type.
    pub fn field_size(&self, field: &str) -> IsfResult<usize> {
        if !self.has_field(field) {
            return Err(self.field_not_found(field));
        }
        self.symbols
            .field_size(&self.type_name, field)
            .ok_or_else(|| IsfError::UnresolvedSize {
                type_name: self.type_name.clone(),
                field: field.to_string(),
            })
    }

    fn read_raw(&self, addr: u64, length: usize) -> IsfResult<Vec<u8>> {
        let bytes = self
            .memory
            .read(addr, length)
            .map_err(|e| IsfError::MemoryRead {
                offset: addr,
                msg: e.to_string(),
            })?;
        if bytes.len() < length {
            return Err(IsfError::MemoryRead {
                offset: addr,
                msg: format!("short read: {} of {} bytes", bytes.len(), length),
            });
        }
        Ok(bytes)
    }

    /// Read raw bytes at a field's offset.
    pub fn read_field_bytes(&self, field: &str, length: usize) -> IsfResult<Vec<u8>> {
        let addr = self.field_address(field)?;
        self.read_raw(addr, length)
    }

    /// Read raw bytes at a specific offset from base.
    pub fn read_at_offset(&self, offset: usize, length: usize) -> IsfResult<Vec<u8>> {
        self.read_raw(self.base_addr + offset as u64, length)
    }

    pub fn read_u8(&self, field: &str) -> IsfResult<u8> {
        let bytes = self.read_field_bytes(field, 1)?;
        Ok(bytes[0])
    }

    pub fn read_u16(&self, field: &str) -> IsfResult<u16> {
        let bytes = self.read_field_bytes(field, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&self, field: &str) -> IsfResult<u32> {
        let bytes = self.read_field_bytes(field, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&self, field: &str) -> IsfResult<u64> {
        let bytes = self.read_field_bytes(field, 8)?;
        Ok(le_u64(&bytes))
    }

    pub fn read_i32(&self, field: &str) -> IsfResult<i32> {
        let bytes = self.read_field_bytes(field, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i64(&self, field: &str) -> IsfResult<i64> {
        Ok(self.read_u64(field)? as i64)
    }

    /// Read an unsigned integer field, taking its width from the ISF type.
    ///
    /// Kernels change the width of fields like `bd_partno` or `b_size`
    /// between releases; this keeps callers independent of that.
    pub fn read_unsigned(&self, field: &str) -> IsfResult<u64> {
        match self.field_size(field)? {
            1 => self.read_u8(field).map(u64::from),
            2 => self.read_u16(field).map(u64::from),
            4 => self.read_u32(field).map(u64::from),
            8 => self.read_u64(field),
            size => Err(IsfError::UnsupportedWidth {
                type_name: self.type_name.clone(),
                field: field.to_string(),
                size,
            }),
        }
    }

    /// Read a pointer-sized value (4 or 8 bytes depending on ISF pointer_size).
    pub fn read_pointer(&self, field: &str) -> IsfResult<u64> {
        let addr = self.field_address(field)?;
        self.read_pointer_at(addr)
    }

    /// Read a pointer at a raw address (not field-based).
    pub fn read_pointer_at(&self, addr: u64) -> IsfResult<u64> {
        read_pointer(self.symbols, self.memory, addr)
    }

    /// Read a fixed-size byte array field.
    pub fn read_bytes(&self, field: &str, length: usize) -> IsfResult<Vec<u8>> {
        self.read_field_bytes(field, length)
    }

    /// Read a NUL-terminated string stored inline in a `char[]` field.
    ///
    /// The read length is the array size from the ISF, capped at `max_length`.
    pub fn read_string(&self, field: &str, max_length: usize) -> IsfResult<String> {
        let length = self
            .field_size(field)
            .map(|size| size.min(max_length))
            .unwrap_or(max_length);
        let bytes = self.read_field_bytes(field, length)?;
        Ok(c_string(&bytes))
    }

    /// Follow a `char *` field and read the string it points to.
    pub fn read_cstring(&self, field: &str, max_length: usize) -> IsfResult<String> {
        let ptr = self.read_pointer(field)?;
        if ptr == 0 {
            return Err(IsfError::InvalidPointer(0));
        }
        self.read_cstring_at(ptr, max_length)
    }

    /// Read a NUL-terminated string at a raw address.
    ///
    /// Reads in small chunks so a string ending just before an unmapped
    /// page still comes back intact.
    pub fn read_cstring_at(&self, addr: u64, max_length: usize) -> IsfResult<String> {
        const CHUNK: usize = 64;
        let mut out = Vec::new();
        let mut cursor = addr;
        let limit = max_length.min(MAX_CSTRING);
        while out.len() < limit {
            let chunk = match self.read_raw(cursor, CHUNK) {
                Ok(chunk) => chunk,
                // Near the end of a mapped region: fall back to single bytes.
                Err(_) => self.read_tail(cursor, (limit - out.len()).min(CHUNK))?,
            };
            if let Some(end) = chunk.iter().position(|&b| b == 0) {
                out.extend_from_slice(&chunk[..end]);
                break;
            }
            if chunk.len() < CHUNK {
                out.extend_from_slice(&chunk);
                break;
            }
            out.extend_from_slice(&chunk);
            cursor += CHUNK as u64;
        }
        out.truncate(max_length);
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Byte-wise read that stops at the first NUL or unreadable byte.
    /// Fails only if the very first byte is unreadable.
    fn read_tail(&self, addr: u64, limit: usize) -> IsfResult<Vec<u8>> {
        let mut out = Vec::new();
        for i in 0..limit as u64 {
            match self.read_raw(addr + i, 1) {
                Ok(byte) => {
                    out.push(byte[0]);
                    if byte[0] == 0 {
                        break;
                    }
                }
                Err(e) if out.is_empty() => return Err(e),
                Err(_) => break,
            }
        }
        Ok(out)
    }

    /// Read an array of pointer-sized words (e.g. `unsigned long bits[]`).
    pub fn read_words(&self, field: &str) -> IsfResult<Vec<u64>> {
        let size = self.field_size(field)?;
        let ptr_size = self.symbols.pointer_size;
        let bytes = self.read_field_bytes(field, size)?;
        Ok(bytes
            .chunks_exact(ptr_size)
            .map(|chunk| match ptr_size {
                4 => u64::from(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
                _ => le_u64(chunk),
            })
            .collect())
    }

    /// Create a sub-reader for an embedded (nested) struct field.
    pub fn nested(&self, field: &str, nested_type: &str) -> IsfResult<StructReader<'a>> {
        let nested_addr = self.field_address(field)?;
        StructReader::new(self.symbols, self.memory, nested_addr, nested_type)
    }

    /// Create a reader for a struct at a pointer field's target address.
    pub fn deref(&self, field: &str, target_type: &str) -> IsfResult<StructReader<'a>> {
        let ptr = self.read_pointer(field)?;
        if ptr == 0 {
            return Err(IsfError::InvalidPointer(0));
        }
        StructReader::new(self.symbols, self.memory, ptr, target_type)
    }

    /// A reader for another struct at an arbitrary address, sharing this
    /// reader's symbols and memory.
    pub fn at(&self, addr: u64, type_name: &str) -> IsfResult<StructReader<'a>> {
        StructReader::new(self.symbols, self.memory, addr, type_name)
    }

    /// Iterate over a Linux `struct list_head` embedded in this struct.
    ///
    /// `field` is the list head in this struct; `containing_type` and
    /// `containing_field` name the entry type and its `list_head` member,
    /// as with the kernel's `list_for_each_entry`.
    pub fn walk_list(
        &self,
        field: &str,
        containing_type: &str,
        containing_field: &str,
    ) -> IsfResult<ListIterator<'a>> {
        let head_addr = self.field_address(field)?;
        ListIterator::new(
            self.symbols,
            self.memory,
            head_addr,
            containing_type,
            containing_field,
        )
    }
}

/// Iterator over a `struct list_head` circular list.
///
/// Yields a `StructReader` for each containing entry.
pub struct ListIterator<'a> {
    symbols: &'a IsfSymbols,
    memory: &'a dyn MemoryAccess,
    /// Address of the list head (sentinel).
    head_addr: u64,
    /// Address of the current `list_head`.
    current_addr: u64,
    /// Offset of the list_head within the containing struct.
    entry_offset: u64,
    containing_type: String,
    /// Corrupt lists can loop without passing the head again.
    max_iterations: usize,
    iteration_count: usize,
}

impl<'a> ListIterator<'a> {
    /// Start a walk at a bare `list_head` address (e.g. the `modules` symbol).
    pub fn new(
        symbols: &'a IsfSymbols,
        memory: &'a dyn MemoryAccess,
        head_addr: u64,
        containing_type: &str,
        containing_field: &str,
    ) -> IsfResult<Self> {
        let entry_offset = symbols
            .field_offset(containing_type, containing_field)
            .ok_or_else(|| IsfError::FieldNotFound {
                type_name: containing_type.to_string(),
                field: containing_field.to_string(),
            })?;

        Ok(ListIterator {
            symbols,
            memory,
            head_addr,
            current_addr: head_addr,
            entry_offset: entry_offset as u64,
            containing_type: containing_type.to_string(),
            max_iterations: 65536,
            iteration_count: 0,
        })
    }

    /// Get the next entry in the list, or None once we loop back to the head.
    pub fn next_entry(&mut self) -> IsfResult<Option<StructReader<'a>>> {
        if self.iteration_count >= self.max_iterations {
            return Ok(None);
        }

        // list_head.next is the first member.
        let next = read_pointer(self.symbols, self.memory, self.current_addr)?;
        if next == self.head_addr || next == 0 {
            return Ok(None);
        }
        self.current_addr = next;
        self.iteration_count += 1;

        let struct_base = next.wrapping_sub(self.entry_offset);
        let reader =
            StructReader::new(self.symbols, self.memory, struct_base, &self.containing_type)?;
        Ok(Some(reader))
    }

    /// Collect all entries into a vector.
    pub fn collect_all(&mut self) -> IsfResult<Vec<StructReader<'a>>> {
        let mut results = Vec::new();
        while let Some(entry) = self.next_entry()? {
            results.push(entry);
        }
        Ok(results)
    }
}

/// Read a pointer-sized little-endian value at `addr`.
pub fn read_pointer(symbols: &IsfSymbols, memory: &dyn MemoryAccess, addr: u64) -> IsfResult<u64> {
    let length = symbols.pointer_size;
    let bytes = memory.read(addr, length).map_err(|e| IsfError::MemoryRead {
        offset: addr,
        msg: e.to_string(),
    })?;
    if bytes.len() < length {
        return Err(IsfError::MemoryRead {
            offset: addr,
            msg: format!("short read: {} of {} bytes", bytes.len(), length),
        });
    }
    match length {
        4 => Ok(u64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))),
        8 => Ok(le_u64(&bytes)),
        _ => Err(IsfError::MemoryRead {
            offset: addr,
            msg: format!("unsupported pointer size: {}", length),
        }),
    }
}

fn le_u64(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
