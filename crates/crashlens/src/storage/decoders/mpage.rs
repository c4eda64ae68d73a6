//! Multi-page page-cache I/O issued by `mpage_readahead` and
//! `mpage_writepages`.

use crate::storage::decode::StorageContext;
use crate::storage::decoder::{unreadable, AttrValue, BoxedDecoder, DecodeError, DecodeResult, Decoder, Interpreted};
use crate::storage::registry::DecoderFactory;
use crate::storage::{bio_sector_and_size, owning_device, BIO, UNAVAILABLE};
use isf::{IsfResult, StructReader};
use tracing::debug;

/// `bio`s completed by `mpage_end_io`.
pub const MPAGE: DecoderFactory = DecoderFactory::new("mpage", BIO, build_mpage);

fn build_mpage<'a>(_ctx: StorageContext<'a>, bio: StructReader<'a>) -> BoxedDecoder<'a> {
    Box::new(MpageDecoder {
        bio,
        fields: Interpreted::new(),
    })
}

struct Mpage {
    sector: u64,
    size: u64,
    device: String,
    /// Inode number and filesystem id of the file the first page belongs to.
    inode: Option<(u64, String)>,
}

pub struct MpageDecoder<'a> {
    bio: StructReader<'a>,
    fields: Interpreted<Mpage>,
}

impl<'a> MpageDecoder<'a> {
    fn fields(&self) -> DecodeResult<&Mpage> {
        self.fields.get_or_interpret(|| {
            let (sector, size) = bio_sector_and_size(&self.bio)?;
            let inode = match self.first_page_inode() {
                Ok(inode) => Some(inode),
                Err(err) => {
                    debug!("mpage bio {:#x}: no inode: {}", self.bio.base_addr(), err);
                    None
                }
            };
            Ok(Mpage {
                sector,
                size,
                device: owning_device(&self.bio, "bi_bdev"),
                inode,
            })
        })
    }

    fn first_page_inode(&self) -> IsfResult<(u64, String)> {
        let inode = self
            .bio
            .deref("bi_io_vec", "bio_vec")?
            .deref("bv_page", "page")?
            .deref("mapping", "address_space")?
            .deref("host", "inode")?;
        let ino = inode.read_unsigned("i_ino")?;
        let fs = inode
            .deref("i_sb", "super_block")
            .and_then(|sb| sb.read_string("s_id", 32))
            .unwrap_or_else(|_| UNAVAILABLE.to_string());
        Ok((ino, fs))
    }
}

impl<'a> Decoder<'a> for MpageDecoder<'a> {
    fn name(&self) -> &'static str {
        MPAGE.name()
    }

    fn address(&self) -> u64 {
        self.bio.base_addr()
    }

    fn object_type(&self) -> &'static str {
        BIO
    }

    fn describe(&self) -> String {
        let f = match self.fields() {
            Ok(f) => f,
            Err(err) => return unreadable(self.address(), BIO, &err),
        };
        let inode = match &f.inode {
            Some((ino, fs)) => format!("inode {} on {}", ino, fs),
            None => format!("inode {}", UNAVAILABLE),
        };
        format!(
            "{:x} bio: multipage I/O on {}, sector {}, size {}, {}",
            self.address(),
            f.device,
            f.sector,
            f.size,
            inode
        )
    }

    fn next(&self) -> Option<BoxedDecoder<'a>> {
        None
    }

    fn attribute(&self, name: &str) -> DecodeResult<AttrValue> {
        let f = self.fields()?;
        match (name, &f.inode) {
            ("sector", _) => Ok(AttrValue::Number(f.sector)),
            ("size", _) => Ok(AttrValue::Number(f.size)),
            ("device", _) => Ok(AttrValue::Text(f.device.clone())),
            ("inode", Some((ino, _))) => Ok(AttrValue::Number(*ino)),
            ("filesystem", Some((_, fs))) => Ok(AttrValue::Text(fs.clone())),
            _ => Err(DecodeError::no_such_attribute(self.name(), name)),
        }
    }

    fn is_interpreted(&self) -> bool {
        self.fields.is_interpreted()
    }
}
