//! Buffer-cache I/O: `buffer_head`s and the `bio`s submitted for them.

use crate::storage::decode::{decode_bh_at, StorageContext};
use crate::storage::decoder::{unreadable, AttrValue, BoxedDecoder, DecodeError, DecodeResult, Decoder, Interpreted};
use crate::storage::registry::DecoderFactory;
use crate::storage::{owning_device, BIO, BUFFER_HEAD};
use isf::StructReader;

/// `bio`s completed by `end_bio_bh_io_sync`.
pub const BIO_FOR_BH: DecoderFactory = DecoderFactory::new("bio-for-bh", BIO, build_bio_for_bh);
/// `buffer_head`s completed by `end_buffer_{read,write}_sync`.
pub const SYNC_BH: DecoderFactory = DecoderFactory::new("sync-bh", BUFFER_HEAD, build_sync_bh);
/// `buffer_head`s completed by `end_buffer_async_{read,write}`.
pub const ASYNC_BH: DecoderFactory = DecoderFactory::new("async-bh", BUFFER_HEAD, build_async_bh);

fn build_bio_for_bh<'a>(ctx: StorageContext<'a>, bio: StructReader<'a>) -> BoxedDecoder<'a> {
    Box::new(BioForBhDecoder {
        ctx,
        bio,
        fields: Interpreted::new(),
    })
}

fn build_sync_bh<'a>(_ctx: StorageContext<'a>, bh: StructReader<'a>) -> BoxedDecoder<'a> {
    Box::new(BufferHeadDecoder::new(bh, BhOrigin::Sync))
}

fn build_async_bh<'a>(_ctx: StorageContext<'a>, bh: StructReader<'a>) -> BoxedDecoder<'a> {
    Box::new(BufferHeadDecoder::new(bh, BhOrigin::Async))
}

struct BioForBh {
    bh: u64,
    device: String,
}

/// A `bio` built by `submit_bh`; `bi_private` is the `buffer_head`.
pub struct BioForBhDecoder<'a> {
    ctx: StorageContext<'a>,
    bio: StructReader<'a>,
    fields: Interpreted<BioForBh>,
}

impl<'a> BioForBhDecoder<'a> {
    fn fields(&self) -> DecodeResult<&BioForBh> {
        self.fields.get_or_interpret(|| {
            Ok(BioForBh {
                bh: self.bio.read_pointer("bi_private")?,
                device: owning_device(&self.bio, "bi_bdev"),
            })
        })
    }
}

impl<'a> Decoder<'a> for BioForBhDecoder<'a> {
    fn name(&self) -> &'static str {
        BIO_FOR_BH.name()
    }

    fn address(&self) -> u64 {
        self.bio.base_addr()
    }

    fn object_type(&self) -> &'static str {
        BIO
    }

    fn describe(&self) -> String {
        match self.fields() {
            Ok(f) => format!(
                "{:x} bio: submitted for buffer_head {:x} on {}",
                self.address(),
                f.bh,
                f.device
            ),
            Err(err) => unreadable(self.address(), BIO, &err),
        }
    }

    fn next(&self) -> Option<BoxedDecoder<'a>> {
        let bh = self.fields().ok()?.bh;
        (bh != 0).then(|| decode_bh_at(self.ctx, bh))
    }

    fn attribute(&self, name: &str) -> DecodeResult<AttrValue> {
        let f = self.fields()?;
        match name {
            "bh" => Ok(AttrValue::Address(f.bh)),
            "device" => Ok(AttrValue::Text(f.device.clone())),
            _ => Err(DecodeError::no_such_attribute(self.name(), name)),
        }
    }

    fn is_interpreted(&self) -> bool {
        self.fields.is_interpreted()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BhOrigin {
    /// Synchronous `__bread`/`sync_dirty_buffer` style I/O.
    Sync,
    /// Page-cache I/O through `block_read_full_folio`/`__block_write_full_folio`.
    Async,
}

struct BufferHead {
    device: String,
    block: u64,
    size: u64,
    page: u64,
}

/// A `buffer_head` at the top of its stack: nothing above it is tracked.
pub struct BufferHeadDecoder<'a> {
    bh: StructReader<'a>,
    origin: BhOrigin,
    fields: Interpreted<BufferHead>,
}

impl<'a> BufferHeadDecoder<'a> {
    fn new(bh: StructReader<'a>, origin: BhOrigin) -> Self {
        BufferHeadDecoder {
            bh,
            origin,
            fields: Interpreted::new(),
        }
    }

    fn fields(&self) -> DecodeResult<&BufferHead> {
        self.fields.get_or_interpret(|| {
            let page = if self.bh.has_field("b_page") {
                self.bh.read_pointer("b_page")?
            } else {
                0
            };
            Ok(BufferHead {
                device: owning_device(&self.bh, "b_bdev"),
                block: self.bh.read_unsigned("b_blocknr")?,
                size: self.bh.read_unsigned("b_size")?,
                page,
            })
        })
    }
}

impl<'a> Decoder<'a> for BufferHeadDecoder<'a> {
    fn name(&self) -> &'static str {
        match self.origin {
            BhOrigin::Sync => SYNC_BH.name(),
            BhOrigin::Async => ASYNC_BH.name(),
        }
    }

    fn address(&self) -> u64 {
        self.bh.base_addr()
    }

    fn object_type(&self) -> &'static str {
        BUFFER_HEAD
    }

    fn describe(&self) -> String {
        let f = match self.fields() {
            Ok(f) => f,
            Err(err) => return unreadable(self.address(), BUFFER_HEAD, &err),
        };
        let origin = match self.origin {
            BhOrigin::Sync => "unassociated".to_string(),
            BhOrigin::Async => format!("page {:x}", f.page),
        };
        format!(
            "{:x} buffer_head: for dev {}, block {}, size {} ({})",
            self.address(),
            f.device,
            f.block,
            f.size,
            origin
        )
    }

    fn next(&self) -> Option<BoxedDecoder<'a>> {
        None
    }

    fn attribute(&self, name: &str) -> DecodeResult<AttrValue> {
        let f = self.fields()?;
        match name {
            "device" => Ok(AttrValue::Text(f.device.clone())),
            "block" => Ok(AttrValue::Number(f.block)),
            "size" => Ok(AttrValue::Number(f.size)),
            "page" => Ok(AttrValue::Address(f.page)),
            _ => Err(DecodeError::no_such_attribute(self.name(), name)),
        }
    }

    fn is_interpreted(&self) -> bool {
        self.fields.is_interpreted()
    }
}
