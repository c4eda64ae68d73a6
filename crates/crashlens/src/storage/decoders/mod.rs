//! Subsystem decoders, keyed by the completion callbacks that identify them.

pub mod buffer_head;
pub mod device_mapper;
pub mod mpage;

use crate::storage::registry::DecoderRegistry;

/// Register every built-in subsystem decoder. Each takes effect once its
/// callback symbol resolves.
pub fn install(registry: &DecoderRegistry) {
    registry.register("end_bio_bh_io_sync", buffer_head::BIO_FOR_BH);
    registry.register(
        ["end_buffer_read_sync", "end_buffer_write_sync"],
        buffer_head::SYNC_BH,
    );
    registry.register(
        ["end_buffer_async_read", "end_buffer_async_write"],
        buffer_head::ASYNC_BH,
    );
    registry.register("clone_endio", device_mapper::DM_CLONE);
    registry.register("mpage_end_io", mpage::MPAGE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::SymbolNotifier;
    use crate::test_support::*;
    use std::sync::Arc;

    #[test]
    fn test_install_before_symbols_are_loaded() {
        let notifier = SymbolNotifier::new();
        let registry = DecoderRegistry::new(notifier.clone());
        install(&registry);
        assert!(registry.is_empty());
        assert_eq!(notifier.pending_names().len(), 7);

        notifier.attach(test_symbols(), 0);
        assert_eq!(
            registry.entries(),
            vec![
                (END_BIO_BH_IO_SYNC, "bio-for-bh"),
                (END_BUFFER_READ_SYNC, "sync-bh"),
                (END_BUFFER_WRITE_SYNC, "sync-bh"),
                (END_BUFFER_ASYNC_READ, "async-bh"),
                (END_BUFFER_ASYNC_WRITE, "async-bh"),
                (CLONE_ENDIO, "dm-clone"),
                (MPAGE_END_IO, "mpage"),
            ]
        );
        assert!(notifier.pending_names().is_empty());
    }

    #[test]
    fn test_decoders_only_build_their_own_type() {
        let memory = Arc::new(MockMemory::new());
        memory.put_bdev(0x5000, 0x6000, "sda", 0);
        memory.put_bh(0x9000, CLONE_ENDIO, 0x5000, 0, 12, 4096);
        memory.put_bio(0x8000, END_BUFFER_ASYNC_READ, 0x5000, 0);
        let target = test_target(memory);
        let registry = DecoderRegistry::new(target.notifier().clone());
        install(&registry);
        let ctx = target.storage(&registry).unwrap();

        let bh = crate::storage::decode_bh_at(ctx, 0x9000);
        assert_eq!(bh.name(), "generic-bh");
        assert_eq!(bh.describe(), "9000 buffer_head: for dev sda, block 12, size 4096 (undecoded)");

        let bio = crate::storage::decode_bio_at(ctx, 0x8000);
        assert_eq!(bio.name(), "generic-bio");
        assert_eq!(
            bio.describe(),
            format!("8000 bio: undecoded bio on sda ({:#x})", END_BUFFER_ASYNC_READ)
        );
    }

    #[test]
    fn test_full_stack() {
        // dm clone -> original bio for a buffer_head -> buffer_head
        let memory = Arc::new(MockMemory::new());
        memory.put_bdev(0x5000, 0x6000, "dm-1", 0);
        memory.put_bdev(0x5100, 0x6100, "nvme0n1", 3);
        memory.put_bio(0x8000, CLONE_ENDIO, 0x5100, 0x7000);
        memory.write_u64(0x7000, 0x7100);
        memory.write_u64(0x7100, 0x8800);
        memory.put_bio(0x8800, END_BIO_BH_IO_SYNC, 0x5000, 0x9000);
        memory.put_bh(0x9000, END_BUFFER_READ_SYNC, 0x5000, 0, 99, 512);
        let target = test_target(memory);
        let registry = DecoderRegistry::new(target.notifier().clone());
        install(&registry);
        let ctx = target.storage(&registry).unwrap();

        let lines: Vec<String> = crate::storage::walk_chain(ctx, ctx.object(0x8000, "bio").unwrap())
            .unwrap()
            .map(|d| d.to_string())
            .collect();
        assert_eq!(
            lines,
            vec![
                "8000 bio: device mapper clone of 8800 on nvme0n1p3",
                "8800 bio: submitted for buffer_head 9000 on dm-1",
                "9000 buffer_head: for dev dm-1, block 99, size 512 (unassociated)",
            ]
        );
    }
}
