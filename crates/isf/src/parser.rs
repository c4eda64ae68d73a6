//! ISF file parser for plain JSON and `.json.xz` files.

use crate::error::{IsfError, IsfResult};
use crate::types::{IsfFile, IsfSymbols};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use xz2::read::XzDecoder;

/// Stream header of an `.xz` container.
const XZ_MAGIC: &[u8; 6] = b"\xFD7zXZ\x00";

/// Parse an ISF file from a filesystem path.
///
/// Compression is detected from the content, not the file name, so a
/// renamed `vmlinux.json.xz` still loads.
pub fn parse_isf_file(path: impl AsRef<Path>) -> IsfResult<IsfSymbols> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(IsfError::FileNotFound(path.display().to_string()));
    }

    let raw = fs::read(path)
        .map_err(|e| IsfError::Io(format!("reading {}: {}", path.display(), e)))?;

    if raw.starts_with(XZ_MAGIC) {
        let mut decoder = XzDecoder::new(raw.as_slice());
        let mut json = Vec::new();
        decoder
            .read_to_end(&mut json)
            .map_err(|e| IsfError::Decompression(format!("{}: {}", path.display(), e)))?;
        parse_isf_bytes(&json)
    } else {
        parse_isf_bytes(&raw)
    }
}

/// Parse ISF from raw JSON bytes (already decompressed).
pub fn parse_isf_bytes(json_bytes: &[u8]) -> IsfResult<IsfSymbols> {
    let isf_file: IsfFile =
        serde_json::from_slice(json_bytes).map_err(|e| IsfError::JsonParse(e.to_string()))?;
    Ok(convert_to_symbols(isf_file))
}

/// Parse ISF from a JSON string.
pub fn parse_isf_str(json_str: &str) -> IsfResult<IsfSymbols> {
    parse_isf_bytes(json_str.as_bytes())
}

fn convert_to_symbols(isf_file: IsfFile) -> IsfSymbols {
    let pointer_size = isf_file
        .base_types
        .get("pointer")
        .map(|bt| bt.size)
        .unwrap_or(8);

    // Several names can alias one address; keep the lexically first so
    // reverse lookups are stable across runs.
    let mut by_address: BTreeMap<u64, String> = BTreeMap::new();
    for (name, symbol) in &isf_file.symbols {
        by_address
            .entry(symbol.address)
            .and_modify(|existing| {
                if name < existing {
                    *existing = name.clone();
                }
            })
            .or_insert_with(|| name.clone());
    }

    IsfSymbols {
        base_types: isf_file.base_types,
        user_types: isf_file.user_types,
        symbols: isf_file.symbols,
        enums: isf_file.enums,
        metadata: isf_file.metadata,
        pointer_size,
        by_address,
    }
}
