//! Dispatch from an object to its decoder, and the chain walk.

use crate::error::{CrashError, CrashResult};
use crate::storage::decoder::{BoxedDecoder, SharedDecoder};
use crate::storage::generic::{BadBhDecoder, BadBioDecoder, GenericBhDecoder, GenericBioDecoder};
use crate::storage::registry::DecoderRegistry;
use crate::storage::{BIO, BUFFER_HEAD};
use isf::{IsfResult, IsfSymbols, MemoryAccess, StructReader};
use std::collections::HashSet;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Deepest storage stack walked before the chain is treated as corrupt.
pub const MAX_STACK_DEPTH: usize = 64;

/// Types and fields every decoder relies on.
const REQUIRED_LAYOUT: &[(&str, &[&str])] = &[
    (BIO, &["bi_end_io", "bi_bdev", "bi_private"]),
    (BUFFER_HEAD, &["b_end_io", "b_bdev", "b_blocknr", "b_size"]),
    ("block_device", &["bd_disk"]),
    ("gendisk", &["disk_name"]),
];

/// Everything a decoder needs to read its object and find the next one.
#[derive(Clone, Copy)]
pub struct StorageContext<'a> {
    symbols: &'a IsfSymbols,
    memory: &'a dyn MemoryAccess,
    registry: &'a DecoderRegistry,
}

impl<'a> StorageContext<'a> {
    /// Fails if the kernel's layout lacks a type or field decoding needs.
    pub fn new(
        symbols: &'a IsfSymbols,
        memory: &'a dyn MemoryAccess,
        registry: &'a DecoderRegistry,
    ) -> CrashResult<Self> {
        for (type_name, fields) in REQUIRED_LAYOUT {
            if symbols.get_type(type_name).is_none() {
                return Err(CrashError::MissingType(type_name.to_string()));
            }
            if let Some(field) = fields.iter().find(|f| !symbols.has_field(type_name, f)) {
                return Err(CrashError::MissingField {
                    type_name: type_name.to_string(),
                    field: field.to_string(),
                });
            }
        }
        Ok(StorageContext {
            symbols,
            memory,
            registry,
        })
    }

    pub fn symbols(&self) -> &'a IsfSymbols {
        self.symbols
    }

    pub fn memory(&self) -> &'a dyn MemoryAccess {
        self.memory
    }

    pub fn registry(&self) -> &'a DecoderRegistry {
        self.registry
    }

    /// A reader for the `type_name` object at `address`.
    pub fn object(&self, address: u64, type_name: &str) -> IsfResult<StructReader<'a>> {
        StructReader::new(self.symbols, self.memory, address, type_name)
    }
}

/// Decoder for one `bio`.
///
/// An unreadable `bi_end_io` gives a [`BadBioDecoder`]; a callback with no
/// registered decoder, or one registered for `buffer_head`s, gives a
/// [`GenericBioDecoder`].
pub fn decode_bio<'a>(ctx: StorageContext<'a>, bio: StructReader<'a>) -> BoxedDecoder<'a> {
    let end_io = match bio.read_pointer("bi_end_io") {
        Ok(end_io) => end_io,
        Err(err) => {
            debug!("bio {:#x} is unreadable: {}", bio.base_addr(), err);
            return Box::new(BadBioDecoder::new(bio.base_addr()));
        }
    };
    match ctx.registry.lookup(end_io) {
        Some(factory) if factory.accepts(&bio) => {
            trace!("bio {:#x} -> {}", bio.base_addr(), factory.name());
            factory.build(ctx, bio)
        }
        Some(factory) => {
            debug!(
                "bio {:#x} has {} callback {:#x} for {}",
                bio.base_addr(),
                factory.object_type(),
                end_io,
                factory.name()
            );
            Box::new(GenericBioDecoder::new(bio, end_io))
        }
        None => Box::new(GenericBioDecoder::new(bio, end_io)),
    }
}

/// Decoder for one `buffer_head`, with the same fallbacks as [`decode_bio`].
pub fn decode_bh<'a>(ctx: StorageContext<'a>, bh: StructReader<'a>) -> BoxedDecoder<'a> {
    let end_io = match bh.read_pointer("b_end_io") {
        Ok(end_io) => end_io,
        Err(err) => {
            debug!("buffer_head {:#x} is unreadable: {}", bh.base_addr(), err);
            return Box::new(BadBhDecoder::new(bh.base_addr()));
        }
    };
    match ctx.registry.lookup(end_io) {
        Some(factory) if factory.accepts(&bh) => {
            trace!("buffer_head {:#x} -> {}", bh.base_addr(), factory.name());
            factory.build(ctx, bh)
        }
        Some(factory) => {
            debug!(
                "buffer_head {:#x} has {} callback {:#x} for {}",
                bh.base_addr(),
                factory.object_type(),
                end_io,
                factory.name()
            );
            Box::new(GenericBhDecoder::new(bh))
        }
        None => Box::new(GenericBhDecoder::new(bh)),
    }
}

/// [`decode_bio`] for a bare address, as found in another object's fields.
pub fn decode_bio_at<'a>(ctx: StorageContext<'a>, address: u64) -> BoxedDecoder<'a> {
    match ctx.object(address, BIO) {
        Ok(bio) => decode_bio(ctx, bio),
        Err(err) => {
            debug!("No bio at {:#x}: {}", address, err);
            Box::new(BadBioDecoder::new(address))
        }
    }
}

pub fn decode_bh_at<'a>(ctx: StorageContext<'a>, address: u64) -> BoxedDecoder<'a> {
    match ctx.object(address, BUFFER_HEAD) {
        Ok(bh) => decode_bh(ctx, bh),
        Err(err) => {
            debug!("No buffer_head at {:#x}: {}", address, err);
            Box::new(BadBhDecoder::new(address))
        }
    }
}

/// Decoder for an object of any supported type.
pub fn decode_top<'a>(ctx: StorageContext<'a>, object: StructReader<'a>) -> CrashResult<BoxedDecoder<'a>> {
    match object.type_name() {
        BIO => Ok(decode_bio(ctx, object)),
        BUFFER_HEAD => Ok(decode_bh(ctx, object)),
        other => Err(CrashError::UnsupportedObject {
            type_name: other.to_string(),
            address: object.base_addr(),
        }),
    }
}

/// Decoders for every layer of the storage stack under `object`, top first.
pub fn walk_chain<'a>(ctx: StorageContext<'a>, object: StructReader<'a>) -> CrashResult<StorageStack<'a>> {
    let top = decode_top(ctx, object)?;
    Ok(StorageStack {
        top: Some(top),
        last: None,
        seen: HashSet::new(),
        depth: 0,
    })
}

/// Lazy walk down a storage stack.
///
/// A layer is asked for the one below it only when the caller requests the
/// next item, so stopping early leaves the rest of the stack unread.
pub struct StorageStack<'a> {
    top: Option<BoxedDecoder<'a>>,
    last: Option<SharedDecoder<'a>>,
    seen: HashSet<(&'static str, u64)>,
    depth: usize,
}

impl<'a> Iterator for StorageStack<'a> {
    type Item = SharedDecoder<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let current: SharedDecoder<'a> = match self.top.take() {
            Some(top) => Rc::from(top),
            None => {
                let last = self.last.take()?;
                let next = last.next()?;
                if self.depth >= MAX_STACK_DEPTH {
                    warn!(
                        "Storage stack at {:#x} is deeper than {} layers, stopping",
                        last.address(),
                        MAX_STACK_DEPTH
                    );
                    return None;
                }
                if self.seen.contains(&(next.object_type(), next.address())) {
                    warn!(
                        "Storage stack loops back to {} {:#x}, stopping",
                        next.object_type(),
                        next.address()
                    );
                    return None;
                }
                Rc::from(next)
            }
        };
        self.depth += 1;
        self.seen.insert((current.object_type(), current.address()));
        self.last = Some(Rc::clone(&current));
        Some(current)
    }
}
