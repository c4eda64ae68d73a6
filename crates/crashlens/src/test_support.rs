//! Shared fixtures for unit tests: a byte-addressed mock memory with a
//! read counter and a small Linux symbol table.

use crate::symbols::SymbolNotifier;
use crate::target::Target;
use isf::{IsfSymbols, MemoryAccess};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) const INIT_UTS_NS: u64 = 0x20000;
pub(crate) const JIFFIES_64: u64 = 0x21000;
pub(crate) const JIFFIES: u64 = 0x21008;
pub(crate) const CPU_ONLINE_MASK: u64 = 0x22000;
pub(crate) const CPU_POSSIBLE_MASK: u64 = 0x22008;
pub(crate) const MODULES: u64 = 0x23000;
pub(crate) const KERNEL_CONFIG_DATA: u64 = 0x30000;
/// Declared size of `kernel_config_data` in [`TEST_ISF`].
pub(crate) const KERNEL_CONFIG_LEN: usize = 512;

pub(crate) const END_BIO_BH_IO_SYNC: u64 = 0x100000;
pub(crate) const END_BUFFER_READ_SYNC: u64 = 0x100100;
pub(crate) const END_BUFFER_WRITE_SYNC: u64 = 0x100200;
pub(crate) const END_BUFFER_ASYNC_READ: u64 = 0x100300;
pub(crate) const END_BUFFER_ASYNC_WRITE: u64 = 0x100400;
pub(crate) const CLONE_ENDIO: u64 = 0x100500;
pub(crate) const MPAGE_END_IO: u64 = 0x100600;

pub(crate) const TEST_ISF: &str = r#"{
    "metadata": {
        "format": "6.2.0",
        "producer": { "name": "dwarf2json", "version": "0.8.0" },
        "linux": { "banner": "Linux version 6.4.0-test (gcc) #1 SMP" }
    },
    "base_types": {
        "pointer": { "size": 8, "signed": false, "kind": "int", "endian": "little" },
        "char": { "size": 1, "signed": true, "kind": "char", "endian": "little" },
        "unsigned char": { "size": 1, "signed": false, "kind": "char", "endian": "little" },
        "short unsigned int": { "size": 2, "signed": false, "kind": "int", "endian": "little" },
        "int": { "size": 4, "signed": true, "kind": "int", "endian": "little" },
        "unsigned int": { "size": 4, "signed": false, "kind": "int", "endian": "little" },
        "long unsigned int": { "size": 8, "signed": false, "kind": "int", "endian": "little" },
        "long long unsigned int": { "size": 8, "signed": false, "kind": "int", "endian": "little" }
    },
    "user_types": {
        "list_head": { "size": 16, "kind": "struct", "fields": {
            "next": { "offset": 0, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "list_head" } } },
            "prev": { "offset": 8, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "list_head" } } }
        } },
        "bvec_iter": { "size": 16, "kind": "struct", "fields": {
            "bi_sector": { "offset": 0, "type": { "kind": "base", "name": "long long unsigned int" } },
            "bi_size": { "offset": 8, "type": { "kind": "base", "name": "unsigned int" } }
        } },
        "bio_vec": { "size": 16, "kind": "struct", "fields": {
            "bv_page": { "offset": 0, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "page" } } },
            "bv_len": { "offset": 8, "type": { "kind": "base", "name": "unsigned int" } },
            "bv_offset": { "offset": 12, "type": { "kind": "base", "name": "unsigned int" } }
        } },
        "bio": { "size": 56, "kind": "struct", "fields": {
            "bi_end_io": { "offset": 0, "type": { "kind": "pointer", "subtype": { "kind": "function" } } },
            "bi_bdev": { "offset": 8, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "block_device" } } },
            "bi_private": { "offset": 16, "type": { "kind": "pointer", "subtype": { "kind": "base", "name": "void" } } },
            "bi_iter": { "offset": 24, "type": { "kind": "struct", "name": "bvec_iter" } },
            "bi_io_vec": { "offset": 40, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "bio_vec" } } },
            "bi_vcnt": { "offset": 48, "type": { "kind": "base", "name": "short unsigned int" } }
        } },
        "buffer_head": { "size": 48, "kind": "struct", "fields": {
            "b_end_io": { "offset": 0, "type": { "kind": "pointer", "subtype": { "kind": "function" } } },
            "b_bdev": { "offset": 8, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "block_device" } } },
            "b_private": { "offset": 16, "type": { "kind": "pointer", "subtype": { "kind": "base", "name": "void" } } },
            "b_blocknr": { "offset": 24, "type": { "kind": "base", "name": "long long unsigned int" } },
            "b_size": { "offset": 32, "type": { "kind": "base", "name": "long unsigned int" } },
            "b_page": { "offset": 40, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "page" } } }
        } },
        "block_device": { "size": 16, "kind": "struct", "fields": {
            "bd_disk": { "offset": 0, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "gendisk" } } },
            "bd_partno": { "offset": 8, "type": { "kind": "base", "name": "unsigned char" } }
        } },
        "gendisk": { "size": 32, "kind": "struct", "fields": {
            "disk_name": { "offset": 0, "type": { "kind": "array", "count": 32, "subtype": { "kind": "base", "name": "char" } } }
        } },
        "dm_target_io": { "size": 16, "kind": "struct", "fields": {
            "io": { "offset": 0, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "dm_io" } } }
        } },
        "dm_io": { "size": 16, "kind": "struct", "fields": {
            "orig_bio": { "offset": 0, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "bio" } } }
        } },
        "page": { "size": 16, "kind": "struct", "fields": {
            "mapping": { "offset": 0, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "address_space" } } },
            "index": { "offset": 8, "type": { "kind": "base", "name": "long unsigned int" } }
        } },
        "address_space": { "size": 8, "kind": "struct", "fields": {
            "host": { "offset": 0, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "inode" } } }
        } },
        "inode": { "size": 16, "kind": "struct", "fields": {
            "i_ino": { "offset": 0, "type": { "kind": "base", "name": "long unsigned int" } },
            "i_sb": { "offset": 8, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "super_block" } } }
        } },
        "super_block": { "size": 32, "kind": "struct", "fields": {
            "s_id": { "offset": 0, "type": { "kind": "array", "count": 32, "subtype": { "kind": "base", "name": "char" } } }
        } },
        "new_utsname": { "size": 390, "kind": "struct", "fields": {
            "sysname": { "offset": 0, "type": { "kind": "array", "count": 65, "subtype": { "kind": "base", "name": "char" } } },
            "nodename": { "offset": 65, "type": { "kind": "array", "count": 65, "subtype": { "kind": "base", "name": "char" } } },
            "release": { "offset": 130, "type": { "kind": "array", "count": 65, "subtype": { "kind": "base", "name": "char" } } },
            "version": { "offset": 195, "type": { "kind": "array", "count": 65, "subtype": { "kind": "base", "name": "char" } } },
            "machine": { "offset": 260, "type": { "kind": "array", "count": 65, "subtype": { "kind": "base", "name": "char" } } },
            "domainname": { "offset": 325, "type": { "kind": "array", "count": 65, "subtype": { "kind": "base", "name": "char" } } }
        } },
        "uts_namespace": { "size": 400, "kind": "struct", "fields": {
            "name": { "offset": 8, "type": { "kind": "struct", "name": "new_utsname" } }
        } },
        "cpumask": { "size": 8, "kind": "struct", "fields": {
            "bits": { "offset": 0, "type": { "kind": "array", "count": 1, "subtype": { "kind": "base", "name": "long unsigned int" } } }
        } },
        "attribute": { "size": 8, "kind": "struct", "fields": {
            "name": { "offset": 0, "type": { "kind": "pointer", "subtype": { "kind": "base", "name": "char" } } }
        } },
        "bin_attribute": { "size": 16, "kind": "struct", "fields": {
            "attr": { "offset": 0, "type": { "kind": "struct", "name": "attribute" } }
        } },
        "module_sect_attr": { "size": 24, "kind": "struct", "fields": {
            "battr": { "offset": 0, "type": { "kind": "struct", "name": "bin_attribute" } },
            "address": { "offset": 16, "type": { "kind": "base", "name": "long unsigned int" } }
        } },
        "module_sect_attrs": { "size": 48, "kind": "struct", "fields": {
            "nsections": { "offset": 40, "type": { "kind": "base", "name": "unsigned int" } },
            "attrs": { "offset": 48, "type": { "kind": "array", "count": 0, "subtype": { "kind": "struct", "name": "module_sect_attr" } } }
        } },
        "module": { "size": 96, "kind": "struct", "fields": {
            "state": { "offset": 0, "type": { "kind": "base", "name": "unsigned int" } },
            "list": { "offset": 8, "type": { "kind": "struct", "name": "list_head" } },
            "name": { "offset": 24, "type": { "kind": "array", "count": 56, "subtype": { "kind": "base", "name": "char" } } },
            "sect_attrs": { "offset": 80, "type": { "kind": "pointer", "subtype": { "kind": "struct", "name": "module_sect_attrs" } } }
        } },
        "cpu_context": { "size": 104, "kind": "struct", "fields": {
            "x19": { "offset": 0, "type": { "kind": "base", "name": "long unsigned int" } },
            "x20": { "offset": 8, "type": { "kind": "base", "name": "long unsigned int" } },
            "x21": { "offset": 16, "type": { "kind": "base", "name": "long unsigned int" } },
            "x22": { "offset": 24, "type": { "kind": "base", "name": "long unsigned int" } },
            "x23": { "offset": 32, "type": { "kind": "base", "name": "long unsigned int" } },
            "x24": { "offset": 40, "type": { "kind": "base", "name": "long unsigned int" } },
            "x25": { "offset": 48, "type": { "kind": "base", "name": "long unsigned int" } },
            "x26": { "offset": 56, "type": { "kind": "base", "name": "long unsigned int" } },
            "x27": { "offset": 64, "type": { "kind": "base", "name": "long unsigned int" } },
            "x28": { "offset": 72, "type": { "kind": "base", "name": "long unsigned int" } },
            "fp": { "offset": 80, "type": { "kind": "base", "name": "long unsigned int" } },
            "sp": { "offset": 88, "type": { "kind": "base", "name": "long unsigned int" } },
            "pc": { "offset": 96, "type": { "kind": "base", "name": "long unsigned int" } }
        } },
        "thread_struct": { "size": 104, "kind": "struct", "fields": {
            "cpu_context": { "offset": 0, "type": { "kind": "struct", "name": "cpu_context" } }
        } },
        "thread_info": { "size": 8, "kind": "struct", "fields": {
            "flags": { "offset": 0, "type": { "kind": "base", "name": "long unsigned int" } }
        } },
        "task_struct": { "size": 128, "kind": "struct", "fields": {
            "thread_info": { "offset": 0, "type": { "kind": "struct", "name": "thread_info" } },
            "stack": { "offset": 8, "type": { "kind": "pointer", "subtype": { "kind": "base", "name": "void" } } },
            "pid": { "offset": 16, "type": { "kind": "base", "name": "int" } },
            "thread": { "offset": 24, "type": { "kind": "struct", "name": "thread_struct" } }
        } }
    },
    "symbols": {
        "init_uts_ns": { "address": 131072, "type": { "kind": "struct", "name": "uts_namespace" } },
        "jiffies_64": { "address": 135168, "type": { "kind": "base", "name": "long long unsigned int" } },
        "jiffies": { "address": 135176, "type": { "kind": "base", "name": "long unsigned int" } },
        "__cpu_online_mask": { "address": 139264, "type": { "kind": "struct", "name": "cpumask" } },
        "__cpu_possible_mask": { "address": 139272, "type": { "kind": "struct", "name": "cpumask" } },
        "modules": { "address": 143360, "type": { "kind": "struct", "name": "list_head" } },
        "kernel_config_data": { "address": 196608, "type": { "kind": "array", "count": 512, "subtype": { "kind": "base", "name": "char" } } },
        "end_bio_bh_io_sync": { "address": 1048576, "type": { "kind": "function" } },
        "end_buffer_read_sync": { "address": 1048832, "type": { "kind": "function" } },
        "end_buffer_write_sync": { "address": 1049088, "type": { "kind": "function" } },
        "end_buffer_async_read": { "address": 1049344, "type": { "kind": "function" } },
        "end_buffer_async_write": { "address": 1049600, "type": { "kind": "function" } },
        "clone_endio": { "address": 1049856, "type": { "kind": "function" } },
        "mpage_end_io": { "address": 1050112, "type": { "kind": "function" } }
    }
}"#;

pub(crate) fn test_symbols() -> Arc<IsfSymbols> {
    Arc::new(isf::parse_isf_str(TEST_ISF).expect("test ISF parses"))
}

/// Sparse byte-addressed memory. A read succeeds only if every byte in the
/// range has been written.
#[derive(Default)]
pub(crate) struct MockMemory {
    bytes: RwLock<HashMap<u64, u8>>,
    reads: AtomicUsize,
}

impl MockMemory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn write(&self, addr: u64, data: &[u8]) {
        let mut bytes = self.bytes.write();
        for (i, &b) in data.iter().enumerate() {
            bytes.insert(addr + i as u64, b);
        }
    }

    pub(crate) fn write_u64(&self, addr: u64, value: u64) {
        self.write(addr, &value.to_le_bytes());
    }

    pub(crate) fn write_u32(&self, addr: u64, value: u32) {
        self.write(addr, &value.to_le_bytes());
    }

    pub(crate) fn write_u8(&self, addr: u64, value: u8) {
        self.write(addr, &[value]);
    }

    /// Write `s` followed by a NUL.
    pub(crate) fn write_cstr(&self, addr: u64, s: &str) {
        self.write(addr, s.as_bytes());
        self.write_u8(addr + s.len() as u64, 0);
    }

    /// Number of successful or failed `read` calls so far.
    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// `block_device` at `bdev` whose disk `name` lives at `disk`.
    pub(crate) fn put_bdev(&self, bdev: u64, disk: u64, name: &str, partno: u8) {
        self.write_u64(bdev, disk);
        self.write_u8(bdev + 8, partno);
        let mut disk_name = [0u8; 32];
        disk_name[..name.len()].copy_from_slice(name.as_bytes());
        self.write(disk, &disk_name);
    }

    /// `bio` header fields: end_io, bdev, private, sector, size.
    pub(crate) fn put_bio(&self, bio: u64, end_io: u64, bdev: u64, private: u64) {
        self.write_u64(bio, end_io);
        self.write_u64(bio + 8, bdev);
        self.write_u64(bio + 16, private);
        self.write_u64(bio + 24, 2048);
        self.write_u32(bio + 32, 4096);
        self.write_u64(bio + 40, 0);
    }

    pub(crate) fn put_bh(
        &self,
        bh: u64,
        end_io: u64,
        bdev: u64,
        private: u64,
        blocknr: u64,
        size: u64,
    ) {
        self.write_u64(bh, end_io);
        self.write_u64(bh + 8, bdev);
        self.write_u64(bh + 16, private);
        self.write_u64(bh + 24, blocknr);
        self.write_u64(bh + 32, size);
        self.write_u64(bh + 40, 0);
    }
}

impl MemoryAccess for MockMemory {
    fn read(
        &self,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let bytes = self.bytes.read();
        (0..length as u64)
            .map(|i| {
                bytes
                    .get(&(offset + i))
                    .copied()
                    .ok_or_else(|| format!("address {:#x} not in image", offset + i).into())
            })
            .collect()
    }

    fn is_valid(&self, offset: u64, length: u64) -> bool {
        let bytes = self.bytes.read();
        (0..length).all(|i| bytes.contains_key(&(offset + i)))
    }
}

/// A target over `memory` with its own notifier, so tests never share
/// process-wide state.
pub(crate) fn test_target(memory: Arc<MockMemory>) -> Target {
    Target::new(memory, test_symbols(), 0, SymbolNotifier::new())
}
