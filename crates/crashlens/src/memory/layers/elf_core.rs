//! ELF core (`vmcore`) layer.
//!
//! kdump writes the crashed kernel's memory as an `ET_CORE` ELF file: each
//! `PT_LOAD` segment maps a range of kernel virtual addresses to a file
//! offset, and a `PT_NOTE` segment carries `VMCOREINFO`. Pages that
//! `makedumpfile` excluded show up as segments whose file-backed size is
//! shorter than their memory size, or as holes between segments. Both read
//! as unavailable.

use crate::memory::error::{MemoryError, MemoryResult};
use crate::memory::layers::MmapFileLayer;
use crate::memory::traits::MemoryLayer;
use object::elf::{FileHeader64, ET_CORE, PT_LOAD, PT_NOTE};
use object::read::elf::{FileHeader, ProgramHeader};
use object::Endianness;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// One `PT_LOAD` program header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSegment {
    pub vaddr: u64,
    pub paddr: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub mem_size: u64,
}

impl LoadSegment {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.vaddr && addr - self.vaddr < self.mem_size
    }
}

/// Kernel virtual memory served from an ELF core file.
pub struct ElfCoreLayer {
    name: String,
    file: MmapFileLayer,
    /// Sorted by `vaddr`.
    segments: Vec<LoadSegment>,
    vmcoreinfo: BTreeMap<String, String>,
}

impl ElfCoreLayer {
    /// Open and parse a vmcore.
    pub fn open(name: impl Into<String>, path: impl AsRef<Path>) -> MemoryResult<Self> {
        let file = MmapFileLayer::open("file", path)?;
        Self::from_file(name, file)
    }

    /// Parse the program headers of an already mapped file.
    pub fn from_file(name: impl Into<String>, file: MmapFileLayer) -> MemoryResult<Self> {
        let path = file.path().display().to_string();
        let data = file.as_slice();

        let header = FileHeader64::<Endianness>::parse(data)
            .map_err(|e| MemoryError::elf_core(&path, e))?;
        let endian = header
            .endian()
            .map_err(|e| MemoryError::elf_core(&path, e))?;
        if header.e_type(endian) != ET_CORE {
            return Err(MemoryError::elf_core(&path, "not an ET_CORE file"));
        }

        let mut segments = Vec::new();
        let mut vmcoreinfo = BTreeMap::new();
        let program_headers = header
            .program_headers(endian, data)
            .map_err(|e| MemoryError::elf_core(&path, e))?;

        for ph in program_headers {
            match ph.p_type(endian) {
                PT_LOAD => segments.push(LoadSegment {
                    vaddr: ph.p_vaddr(endian),
                    paddr: ph.p_paddr(endian),
                    file_offset: ph.p_offset(endian),
                    file_size: ph.p_filesz(endian),
                    mem_size: ph.p_memsz(endian),
                }),
                PT_NOTE => {
                    let Some(mut notes) = ph
                        .notes(endian, data)
                        .map_err(|e| MemoryError::elf_core(&path, e))?
                    else {
                        continue;
                    };
                    while let Some(note) = notes.next().map_err(|e| MemoryError::elf_core(&path, e))? {
                        if trim_nul(note.name()) == b"VMCOREINFO" {
                            parse_vmcoreinfo(note.desc(), &mut vmcoreinfo);
                        }
                    }
                }
                _ => {}
            }
        }

        segments.sort_by_key(|s| s.vaddr);
        debug!(
            "{}: {} PT_LOAD segments, {} VMCOREINFO entries",
            path,
            segments.len(),
            vmcoreinfo.len()
        );

        Ok(ElfCoreLayer {
            name: name.into(),
            file,
            segments,
            vmcoreinfo,
        })
    }

    pub fn segments(&self) -> &[LoadSegment] {
        &self.segments
    }

    /// Parsed `VMCOREINFO` key/value pairs (empty if the note is absent).
    pub fn vmcoreinfo(&self) -> &BTreeMap<String, String> {
        &self.vmcoreinfo
    }

    /// KASLR slide recorded by the crashed kernel, if any.
    pub fn kernel_offset(&self) -> Option<u64> {
        self.vmcoreinfo
            .get("KERNELOFFSET")
            .and_then(|v| u64::from_str_radix(v.trim_start_matches("0x"), 16).ok())
    }

    fn segment_for(&self, addr: u64) -> Option<&LoadSegment> {
        let idx = self.segments.partition_point(|s| s.vaddr <= addr);
        let seg = self.segments.get(idx.checked_sub(1)?)?;
        seg.contains(addr).then_some(seg)
    }
}

impl MemoryLayer for ElfCoreLayer {
    fn read(&self, offset: u64, length: usize) -> MemoryResult<Vec<u8>> {
        let mut out = Vec::with_capacity(length);
        let mut cursor = offset;

        // A read may straddle adjacent segments.
        while out.len() < length {
            let seg = self.segment_for(cursor).ok_or_else(|| {
                MemoryError::invalid_address(&self.name, cursor, "not present in the dump")
            })?;
            let within = cursor - seg.vaddr;
            if within >= seg.file_size {
                return Err(MemoryError::invalid_address(
                    &self.name,
                    cursor,
                    "page excluded from the dump",
                ));
            }
            let piece = (seg.file_size - within).min((length - out.len()) as u64);
            let bytes = self
                .file
                .read_bytes(seg.file_offset + within, piece as usize, false)?;
            out.extend_from_slice(&bytes);
            cursor += piece;
        }

        Ok(out)
    }

    fn is_valid(&self, offset: u64, length: u64) -> bool {
        length > 0 && self.read(offset, length as usize).is_ok()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn maximum_address(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| s.vaddr.saturating_add(s.mem_size).saturating_sub(1))
            .max()
            .unwrap_or(0)
    }
}

fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

fn parse_vmcoreinfo(desc: &[u8], out: &mut BTreeMap<String, String>) {
    let text = String::from_utf8_lossy(trim_nul(desc));
    for line in text.lines() {
        if let Some((key, value)) = line.split_once('=') {
            out.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
}

/// Builders for small synthetic vmcores used by tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    /// A `PT_LOAD` to emit: virtual address, file-backed bytes, memory size.
    pub struct Load<'a> {
        pub vaddr: u64,
        pub data: &'a [u8],
        pub mem_size: u64,
    }

    fn note(name: &str, desc: &[u8]) -> Vec<u8> {
        let pad = |n: usize| (n + 3) & !3;
        let mut name_bytes = name.as_bytes().to_vec();
        name_bytes.push(0);
        let mut out = Vec::new();
        out.extend_from_slice(&(name_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&(desc.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        let name_len = name_bytes.len();
        out.extend_from_slice(&name_bytes);
        out.resize(out.len() + pad(name_len) - name_len, 0);
        out.extend_from_slice(desc);
        out.resize(out.len() + pad(desc.len()) - desc.len(), 0);
        out
    }

    /// Assemble a little-endian ELF64 `ET_CORE` image.
    pub fn build_vmcore(loads: &[Load<'_>], vmcoreinfo: Option<&str>) -> Vec<u8> {
        const EHDR: usize = 64;
        const PHDR: usize = 56;

        let note_blob = vmcoreinfo.map(|info| note("VMCOREINFO", info.as_bytes()));
        let phnum = loads.len() + usize::from(note_blob.is_some());
        let mut data_offset = EHDR + PHDR * phnum;

        let mut out = vec![0u8; EHDR];
        out[0..4].copy_from_slice(b"\x7fELF");
        out[4] = 2; // ELFCLASS64
        out[5] = 1; // ELFDATA2LSB
        out[6] = 1; // EV_CURRENT
        out[16..18].copy_from_slice(&4u16.to_le_bytes()); // ET_CORE
        out[18..20].copy_from_slice(&183u16.to_le_bytes()); // EM_AARCH64
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[32..40].copy_from_slice(&(EHDR as u64).to_le_bytes());
        out[52..54].copy_from_slice(&(EHDR as u16).to_le_bytes());
        out[54..56].copy_from_slice(&(PHDR as u16).to_le_bytes());
        out[56..58].copy_from_slice(&(phnum as u16).to_le_bytes());

        let mut payload = Vec::new();
        let phdr = |p_type: u32, offset: usize, vaddr: u64, filesz: u64, memsz: u64, align: u64| {
            let mut ph = vec![0u8; PHDR];
            ph[0..4].copy_from_slice(&p_type.to_le_bytes());
            ph[4..8].copy_from_slice(&4u32.to_le_bytes());
            ph[8..16].copy_from_slice(&(offset as u64).to_le_bytes());
            ph[16..24].copy_from_slice(&vaddr.to_le_bytes());
            ph[32..40].copy_from_slice(&filesz.to_le_bytes());
            ph[40..48].copy_from_slice(&memsz.to_le_bytes());
            ph[48..56].copy_from_slice(&align.to_le_bytes());
            ph
        };

        let mut headers = Vec::new();
        if let Some(blob) = &note_blob {
            headers.extend(phdr(4, data_offset, 0, blob.len() as u64, 0, 4));
            payload.extend_from_slice(blob);
            data_offset += blob.len();
        }
        for load in loads {
            headers.extend(phdr(
                1,
                data_offset,
                load.vaddr,
                load.data.len() as u64,
                load.mem_size,
                0x1000,
            ));
            payload.extend_from_slice(load.data);
            data_offset += load.data.len();
        }

        out.extend(headers);
        out.extend(payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{build_vmcore, Load};
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const KVA: u64 = 0xffff_0000_1000_0000;

    fn open(bytes: &[u8]) -> (NamedTempFile, ElfCoreLayer) {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(bytes).unwrap();
        tmp.flush().unwrap();
        let layer = ElfCoreLayer::open("vmcore", tmp.path()).unwrap();
        (tmp, layer)
    }

    #[test]
    fn test_reads_by_virtual_address() {
        let first: Vec<u8> = (0u8..=255).collect();
        let second = [0xAAu8; 64];
        let image = build_vmcore(
            &[
                Load { vaddr: KVA, data: &first, mem_size: 256 },
                Load { vaddr: KVA + 256, data: &second, mem_size: 64 },
            ],
            None,
        );
        let (_tmp, layer) = open(&image);

        assert_eq!(layer.segments().len(), 2);
        assert_eq!(layer.read(KVA + 16, 4).unwrap(), vec![16, 17, 18, 19]);
        // Straddles both segments.
        assert_eq!(layer.read(KVA + 254, 4).unwrap(), vec![254, 255, 0xAA, 0xAA]);
        assert_eq!(layer.maximum_address(), KVA + 319);
    }

    #[test]
    fn test_excluded_and_missing_pages_are_unavailable() {
        let data = [1u8; 128];
        let image = build_vmcore(&[Load { vaddr: KVA, data: &data, mem_size: 4096 }], None);
        let (_tmp, layer) = open(&image);

        assert!(layer.is_valid(KVA, 128));
        assert!(matches!(
            layer.read(KVA + 200, 8),
            Err(MemoryError::InvalidAddress { .. })
        ));
        assert!(layer.read(KVA - 8, 8).is_err());
        assert!(layer.read(KVA + 0x10_0000, 8).is_err());
    }

    #[test]
    fn test_vmcoreinfo_kernel_offset() {
        let data = [0u8; 16];
        let image = build_vmcore(
            &[Load { vaddr: KVA, data: &data, mem_size: 16 }],
            Some("OSRELEASE=6.1.0\nKERNELOFFSET=1a200000\n"),
        );
        let (_tmp, layer) = open(&image);

        assert_eq!(layer.vmcoreinfo().get("OSRELEASE").map(String::as_str), Some("6.1.0"));
        assert_eq!(layer.kernel_offset(), Some(0x1a20_0000));
    }

    #[test]
    fn test_rejects_non_elf() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 256]).unwrap();
        tmp.flush().unwrap();
        assert!(matches!(
            ElfCoreLayer::open("vmcore", tmp.path()),
            Err(MemoryError::ElfCore { .. })
        ));
    }
}
