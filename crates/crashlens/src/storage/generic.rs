//! Fallback decoders: objects whose callback is unreadable or unknown.

use crate::storage::decoder::{AttrValue, BoxedDecoder, DecodeError, DecodeResult, Decoder, Interpreted};
use crate::storage::{owning_device, BIO, BUFFER_HEAD};
use isf::StructReader;

/// A `bio` whose callback could not be read. Never touches memory.
pub struct BadBioDecoder {
    address: u64,
}

impl BadBioDecoder {
    pub fn new(address: u64) -> Self {
        BadBioDecoder { address }
    }
}

impl<'a> Decoder<'a> for BadBioDecoder {
    fn name(&self) -> &'static str {
        "bad-bio"
    }

    fn address(&self) -> u64 {
        self.address
    }

    fn object_type(&self) -> &'static str {
        BIO
    }

    fn describe(&self) -> String {
        format!("{:x} bio: invalid bio", self.address)
    }

    fn next(&self) -> Option<BoxedDecoder<'a>> {
        None
    }

    fn attribute(&self, name: &str) -> DecodeResult<AttrValue> {
        Err(DecodeError::no_such_attribute("bad-bio", name))
    }

    /// Nothing to interpret.
    fn is_interpreted(&self) -> bool {
        true
    }
}

/// A `buffer_head` whose callback could not be read. Never touches memory.
pub struct BadBhDecoder {
    address: u64,
}

impl BadBhDecoder {
    pub fn new(address: u64) -> Self {
        BadBhDecoder { address }
    }
}

impl<'a> Decoder<'a> for BadBhDecoder {
    fn name(&self) -> &'static str {
        "bad-bh"
    }

    fn address(&self) -> u64 {
        self.address
    }

    fn object_type(&self) -> &'static str {
        BUFFER_HEAD
    }

    fn describe(&self) -> String {
        format!("{:x} bh: invalid buffer_head", self.address)
    }

    fn next(&self) -> Option<BoxedDecoder<'a>> {
        None
    }

    fn attribute(&self, name: &str) -> DecodeResult<AttrValue> {
        Err(DecodeError::no_such_attribute("bad-bh", name))
    }

    fn is_interpreted(&self) -> bool {
        true
    }
}

struct GenericBio {
    device: String,
}

/// A readable `bio` with no registered decoder for its callback.
pub struct GenericBioDecoder<'a> {
    bio: StructReader<'a>,
    end_io: u64,
    fields: Interpreted<GenericBio>,
}

impl<'a> GenericBioDecoder<'a> {
    /// `end_io` is the callback value the dispatcher already read.
    pub fn new(bio: StructReader<'a>, end_io: u64) -> Self {
        GenericBioDecoder {
            bio,
            end_io,
            fields: Interpreted::new(),
        }
    }

    fn fields(&self) -> DecodeResult<&GenericBio> {
        self.fields.get_or_interpret(|| {
            Ok(GenericBio {
                device: owning_device(&self.bio, "bi_bdev"),
            })
        })
    }
}

impl<'a> Decoder<'a> for GenericBioDecoder<'a> {
    fn name(&self) -> &'static str {
        "generic-bio"
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
                "{:x} bio: undecoded bio on {} ({:#x})",
                self.address(),
                f.device,
                self.end_io
            ),
            Err(err) => crate::storage::decoder::unreadable(self.address(), BIO, &err),
        }
    }

    fn next(&self) -> Option<BoxedDecoder<'a>> {
        None
    }

    fn attribute(&self, name: &str) -> DecodeResult<AttrValue> {
        let f = self.fields()?;
        match name {
            "device" => Ok(AttrValue::Text(f.device.clone())),
            "end_io" => Ok(AttrValue::Address(self.end_io)),
            _ => Err(DecodeError::no_such_attribute(self.name(), name)),
        }
    }

    fn is_interpreted(&self) -> bool {
        self.fields.is_interpreted()
    }
}

struct GenericBh {
    device: String,
    block: u64,
    size: u64,
}

/// A readable `buffer_head` with no registered decoder for its callback.
pub struct GenericBhDecoder<'a> {
    bh: StructReader<'a>,
    fields: Interpreted<GenericBh>,
}

impl<'a> GenericBhDecoder<'a> {
    pub fn new(bh: StructReader<'a>) -> Self {
        GenericBhDecoder {
            bh,
            fields: Interpreted::new(),
        }
    }

    fn fields(&self) -> DecodeResult<&GenericBh> {
        self.fields.get_or_interpret(|| {
            Ok(GenericBh {
                device: owning_device(&self.bh, "b_bdev"),
                block: self.bh.read_unsigned("b_blocknr")?,
                size: self.bh.read_unsigned("b_size")?,
            })
        })
    }
}

impl<'a> Decoder<'a> for GenericBhDecoder<'a> {
    fn name(&self) -> &'static str {
        "generic-bh"
    }

    fn address(&self) -> u64 {
        self.bh.base_addr()
    }

    fn object_type(&self) -> &'static str {
        BUFFER_HEAD
    }

    fn describe(&self) -> String {
        match self.fields() {
            Ok(f) => format!(
                "{:x} buffer_head: for dev {}, block {}, size {} (undecoded)",
                self.address(),
                f.device,
                f.block,
                f.size
            ),
            Err(err) => crate::storage::decoder::unreadable(self.address(), BUFFER_HEAD, &err),
        }
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
            _ => Err(DecodeError::no_such_attribute(self.name(), name)),
        }
    }

    fn is_interpreted(&self) -> bool {
        self.fields.is_interpreted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_symbols, MockMemory};

    #[test]
    fn test_bad_decoders_never_read() {
        let bio = BadBioDecoder::new(0xffff8800dead0000);
        assert_eq!(bio.describe(), "ffff8800dead0000 bio: invalid bio");
        assert!(Decoder::next(&bio).is_none());

        let bh = BadBhDecoder::new(0x1234);
        assert_eq!(bh.describe(), "1234 bh: invalid buffer_head");
        assert!(matches!(
            bh.attribute("size"),
            Err(DecodeError::NoSuchAttribute { .. })
        ));
    }

    #[test]
    fn test_generic_bio_description() {
        let symbols = test_symbols();
        let memory = MockMemory::new();
        memory.put_bdev(0x5000, 0x6000, "nvme0n1", 2);
        memory.put_bio(0x8000, 0xdead, 0x5000, 0);

        let bio = StructReader::new(&symbols, &memory, 0x8000, "bio").unwrap();
        let decoder = GenericBioDecoder::new(bio, 0xdead);
        assert!(!decoder.is_interpreted());
        assert_eq!(memory.reads(), 0);

        let text = decoder.describe();
        assert_eq!(text, "8000 bio: undecoded bio on nvme0n1p2 (0xdead)");
        assert!(decoder.is_interpreted());
    }

    #[test]
    fn test_generic_bio_unreadable_device() {
        let symbols = test_symbols();
        let memory = MockMemory::new();
        memory.put_bio(0x8000, 0xdead, 0x5000, 0);

        let bio = StructReader::new(&symbols, &memory, 0x8000, "bio").unwrap();
        let decoder = GenericBioDecoder::new(bio, 0xdead);
        assert!(decoder.describe().contains("<unavailable>"));
    }

    #[test]
    fn test_generic_bh_fields_are_read_once() {
        let symbols = test_symbols();
        let memory = MockMemory::new();
        memory.put_bdev(0x5000, 0x6000, "sda", 1);
        memory.put_bh(0x9000, 0xbeef, 0x5000, 0, 77, 4096);

        let bh = StructReader::new(&symbols, &memory, 0x9000, "buffer_head").unwrap();
        let decoder = GenericBhDecoder::new(bh);
        assert_eq!(
            decoder.describe(),
            "9000 buffer_head: for dev sda1, block 77, size 4096 (undecoded)"
        );
        let reads = memory.reads();

        assert_eq!(decoder.attribute("block").unwrap(), AttrValue::Number(77));
        assert_eq!(decoder.attribute("size").unwrap(), AttrValue::Number(4096));
        let _ = decoder.describe();
        assert_eq!(memory.reads(), reads);

        let err = decoder.attribute("sector").unwrap_err();
        assert!(matches!(err, DecodeError::NoSuchAttribute { ref name, .. } if name == "sector"));
        assert_eq!(memory.reads(), reads);
    }

    #[test]
    fn test_generic_bh_unreadable_fields() {
        let symbols = test_symbols();
        let memory = MockMemory::new();
        memory.write_u64(0x9000, 0xbeef);

        let bh = StructReader::new(&symbols, &memory, 0x9000, "buffer_head").unwrap();
        let decoder = GenericBhDecoder::new(bh);
        assert!(decoder.describe().starts_with("9000 buffer_head: unreadable"));
        assert!(decoder.attribute("block").unwrap_err().is_unavailable());
    }
}
