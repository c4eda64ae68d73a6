//! Device-mapper clones.
//!
//! dm submits a clone of each incoming `bio` to the target device. The
//! clone's `bi_private` is the `dm_target_io`, whose `dm_io` remembers the
//! original `bio`.

use crate::storage::decode::{decode_bio_at, StorageContext};
use crate::storage::generic::BadBioDecoder;
use crate::storage::decoder::{unreadable, AttrValue, BoxedDecoder, DecodeError, DecodeResult, Decoder, Interpreted};
use crate::storage::registry::DecoderFactory;
use crate::storage::{owning_device, BIO};
use isf::StructReader;

/// `bio`s completed by `clone_endio`.
pub const DM_CLONE: DecoderFactory = DecoderFactory::new("dm-clone", BIO, build_dm_clone);

fn build_dm_clone<'a>(ctx: StorageContext<'a>, bio: StructReader<'a>) -> BoxedDecoder<'a> {
    Box::new(DmCloneDecoder {
        ctx,
        bio,
        fields: Interpreted::new(),
    })
}

struct DmClone {
    tio: u64,
    io: u64,
    orig_bio: u64,
    device: String,
}

pub struct DmCloneDecoder<'a> {
    ctx: StorageContext<'a>,
    bio: StructReader<'a>,
    fields: Interpreted<DmClone>,
}

impl<'a> DmCloneDecoder<'a> {
    fn fields(&self) -> DecodeResult<&DmClone> {
        self.fields.get_or_interpret(|| {
            let tio = self.bio.deref("bi_private", "dm_target_io")?;
            let io = tio.deref("io", "dm_io")?;
            // Renamed from `bio` to `orig_bio` in 4.x.
            let orig_bio = if io.has_field("orig_bio") {
                io.read_pointer("orig_bio")?
            } else {
                io.read_pointer("bio")?
            };
            Ok(DmClone {
                tio: tio.base_addr(),
                io: io.base_addr(),
                orig_bio,
                device: owning_device(&self.bio, "bi_bdev"),
            })
        })
    }
}

impl<'a> Decoder<'a> for DmCloneDecoder<'a> {
    fn name(&self) -> &'static str {
        DM_CLONE.name()
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
                "{:x} bio: device mapper clone of {:x} on {}",
                self.address(),
                f.orig_bio,
                f.device
            ),
            Err(err) => unreadable(self.address(), BIO, &err),
        }
    }

    /// An unreadable `dm_target_io` or `dm_io` ends the walk with an
    /// invalid bio at the address that could not be read.
    fn next(&self) -> Option<BoxedDecoder<'a>> {
        match self.fields() {
            Ok(f) => (f.orig_bio != 0).then(|| decode_bio_at(self.ctx, f.orig_bio)),
            Err(DecodeError::Unavailable { address, .. })
                if address != 0 && address != self.address() =>
            {
                Some(Box::new(BadBioDecoder::new(address)))
            }
            Err(_) => None,
        }
    }

    fn attribute(&self, name: &str) -> DecodeResult<AttrValue> {
        let f = self.fields()?;
        match name {
            "tio" => Ok(AttrValue::Address(f.tio)),
            "io" => Ok(AttrValue::Address(f.io)),
            "orig_bio" => Ok(AttrValue::Address(f.orig_bio)),
            "device" => Ok(AttrValue::Text(f.device.clone())),
            _ => Err(DecodeError::no_such_attribute(self.name(), name)),
        }
    }

    fn is_interpreted(&self) -> bool {
        self.fields.is_interpreted()
    }
}
