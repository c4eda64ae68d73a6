//! Storage I/O decoding.
//!
//! Walks a block I/O request back through the layers that produced it:
//! a `bio` submitted for a `buffer_head`, a `bio` cloned by device-mapper
//! from an upper `bio`, and so on. Each layer is identified by the
//! completion callback stored in the object and interpreted by the decoder
//! registered for that callback.

pub mod decode;
pub mod decoder;
pub mod decoders;
pub mod generic;
pub mod registry;

pub use decode::{
    decode_bh, decode_bh_at, decode_bio, decode_bio_at, decode_top, walk_chain, StorageContext,
    StorageStack, MAX_STACK_DEPTH,
};
pub use decoder::{AttrValue, BoxedDecoder, DecodeError, DecodeResult, Decoder, Interpreted, SharedDecoder};
pub use generic::{BadBhDecoder, BadBioDecoder, GenericBhDecoder, GenericBioDecoder};
pub use registry::{register_decoder, DecoderFactory, DecoderRegistry, DispatchKey};

use isf::{IsfResult, StructReader};
use tracing::debug;

pub(crate) const BIO: &str = "bio";
pub(crate) const BUFFER_HEAD: &str = "buffer_head";

/// Rendered in place of a device name that cannot be read.
pub const UNAVAILABLE: &str = "<unavailable>";

const DISK_NAME_LEN: usize = 32;

/// Name of a block device as the kernel prints it (`sda1`, `nvme0n1p1`).
pub fn block_device_name(bdev: &StructReader<'_>) -> IsfResult<String> {
    let disk = bdev.deref("bd_disk", "gendisk")?;
    let name = disk.read_string("disk_name", DISK_NAME_LEN)?;
    let partno = if bdev.has_field("bd_partno") {
        bdev.read_unsigned("bd_partno")?
    } else {
        0
    };
    Ok(partition_name(&name, partno))
}

fn partition_name(disk: &str, partno: u64) -> String {
    if partno == 0 {
        disk.to_string()
    } else if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{}p{}", disk, partno)
    } else {
        format!("{}{}", disk, partno)
    }
}

/// Device name behind the `block_device *` in `field`, or [`UNAVAILABLE`].
pub(crate) fn owning_device(object: &StructReader<'_>, field: &str) -> String {
    object
        .deref(field, "block_device")
        .and_then(|bdev| block_device_name(&bdev))
        .unwrap_or_else(|err| {
            debug!(
                "No device for {} {:#x}: {}",
                object.type_name(),
                object.base_addr(),
                err
            );
            UNAVAILABLE.to_string()
        })
}

/// Starting sector and byte count of a `bio`.
///
/// Kernels since 3.14 keep both in `bi_iter`; older ones in the bio itself.
pub fn bio_sector_and_size(bio: &StructReader<'_>) -> IsfResult<(u64, u64)> {
    if bio.has_field("bi_iter") {
        let iter = bio.nested("bi_iter", "bvec_iter")?;
        Ok((iter.read_unsigned("bi_sector")?, iter.read_unsigned("bi_size")?))
    } else {
        Ok((bio.read_unsigned("bi_sector")?, bio.read_unsigned("bi_size")?))
    }
}
