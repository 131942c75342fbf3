//! Userspace engine for the FATX filesystem (Xbox / Xbox 360).
//!
//! This crate owns the on-disk FATX volume: superblock/endianness
//! detection, the cluster allocation table, the flat directory record
//! format, path resolution, and the file operations built on top of them.
//! It does not provide a kernel-filesystem bridge, a CLI, or a `mkfs` tool —
//! those are adapters built on top of [`Volume`].

pub mod device;
pub mod dir;
pub mod error;
pub mod fat;
pub mod layout;
pub mod ops;
pub mod path;
pub mod volume;

pub use device::{BlockDevice, FileDevice, MemDevice};
pub use error::{Error, ErrorKind, Result};
pub use ops::Stat;
pub use volume::{Volume, VolumeOptions};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{
        CLUSTER_SIZE, DIR_RECORDS_PER_CLUSTER, DIR_RECORD_SIZE, FATX_MAGIC, FAT_OFFSET, NAME_END,
    };
    use std::sync::Arc;

    /// Synthesize a minimal valid FATX image: little-endian superblock, a
    /// 2-byte-wide FAT sized for a small volume, and an empty root
    /// directory cluster.
    fn synth_image(data_clusters: u64) -> Arc<MemDevice> {
        let fat_width = 2usize;
        let fat_bytes = (data_clusters as usize + 1) * fat_width;
        let fat_start = FAT_OFFSET;

        // Mirror Volume::open_device's width=2 root-directory-offset
        // formula, which is self-referential (it depends on device length,
        // which depends on it); fixed-point iterate to the value the engine
        // will itself derive once opened.
        let mut root_dir_offset = crate::layout::round_up_4k(fat_start + fat_bytes as u64);
        for _ in 0..8 {
            let end = root_dir_offset + data_clusters * CLUSTER_SIZE;
            let next = crate::layout::round_up_4k((end >> 13) + 1) + fat_start;
            if next == root_dir_offset {
                break;
            }
            root_dir_offset = next;
        }
        let total_len = root_dir_offset + data_clusters * CLUSTER_SIZE;

        let device = MemDevice::new(total_len as usize);
        // Superblock magic, big-endian-encoded bytes so detect() reads it
        // as little-endian storage (matching fatx.c's convention).
        device.write_at(0, &FATX_MAGIC.to_be_bytes()).unwrap();

        // FAT[0] and FAT[1] reserved/terminator, rest free (zero).
        let mut fat_buf = vec![0u8; fat_bytes];
        fat_buf[2] = 0xFF;
        fat_buf[3] = 0xFF; // FAT[1] = terminator (root directory's own slot)
        device.write_at(fat_start, &fat_buf).unwrap();

        // Root directory cluster: all slots marked end-of-directory.
        let mut blank = [0u8; DIR_RECORD_SIZE];
        blank[0] = NAME_END;
        for slot in 0..DIR_RECORDS_PER_CLUSTER {
            device
                .write_at(
                    root_dir_offset + (slot * DIR_RECORD_SIZE) as u64,
                    &blank,
                )
                .unwrap();
        }

        Arc::new(device)
    }

    /// Same image as `synth_image`, but stored big-endian ("XTAF" volumes,
    /// as written by the original Xbox rather than the Xbox 360).
    fn synth_image_big_endian(data_clusters: u64) -> Arc<MemDevice> {
        let fat_width = 2usize;
        let fat_bytes = (data_clusters as usize + 1) * fat_width;
        let fat_start = FAT_OFFSET;

        let mut root_dir_offset = crate::layout::round_up_4k(fat_start + fat_bytes as u64);
        for _ in 0..8 {
            let end = root_dir_offset + data_clusters * CLUSTER_SIZE;
            let next = crate::layout::round_up_4k((end >> 13) + 1) + fat_start;
            if next == root_dir_offset {
                break;
            }
            root_dir_offset = next;
        }
        let total_len = root_dir_offset + data_clusters * CLUSTER_SIZE;

        let device = MemDevice::new(total_len as usize);
        // Little-endian-encoded bytes so detect() reads it as big-endian
        // storage (the "XTAF" orientation).
        device.write_at(0, &FATX_MAGIC.to_le_bytes()).unwrap();

        let mut fat_buf = vec![0u8; fat_bytes];
        fat_buf[2] = 0xFF;
        fat_buf[3] = 0xFF;
        device.write_at(fat_start, &fat_buf).unwrap();

        let mut blank = [0u8; DIR_RECORD_SIZE];
        blank[0] = NAME_END;
        for slot in 0..DIR_RECORDS_PER_CLUSTER {
            device
                .write_at(root_dir_offset + (slot * DIR_RECORD_SIZE) as u64, &blank)
                .unwrap();
        }

        Arc::new(device)
    }

    fn open(device: Arc<MemDevice>) -> Volume {
        let _ = env_logger::builder().is_test(true).try_init();
        Volume::open_device(device, 0, VolumeOptions::default()).unwrap()
    }

    #[test]
    fn open_and_stat_root() {
        let volume = open(synth_image(4));
        let stat = volume.stat("/").unwrap();
        assert!(stat.is_dir);
        assert_eq!(stat.size, 0);
    }

    #[test]
    fn create_write_read_roundtrip() {
        let volume = open(synth_image(4));
        volume.create("/a.bin").unwrap();
        volume.write("/a.bin", &[0x01, 0x02, 0x03], 0).unwrap();
        let mut buf = [0u8; 3];
        let n = volume.read("/a.bin", &mut buf, 0).unwrap();
        assert_eq!(n, 3);
        assert_eq!(buf, [0x01, 0x02, 0x03]);
        assert_eq!(volume.stat("/a.bin").unwrap().size, 3);
    }

    #[test]
    fn cross_cluster_read() {
        let volume = open(synth_image(8));
        volume.create("/b.bin").unwrap();
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        volume.write("/b.bin", &data, 0).unwrap();
        let mut buf = vec![0u8; 20_000];
        let n = volume.read("/b.bin", &mut buf, 0).unwrap();
        assert_eq!(n, 20_000);
        assert_eq!(buf, data);
    }

    #[test]
    fn truncate_grows_and_shrinks() {
        let volume = open(synth_image(8));
        volume.create("/c.bin").unwrap();
        volume.truncate("/c.bin", 40_000).unwrap();
        assert_eq!(volume.stat("/c.bin").unwrap().size, 40_000);
        volume.truncate("/c.bin", 10).unwrap();
        assert_eq!(volume.stat("/c.bin").unwrap().size, 10);
        volume.unlink("/c.bin").unwrap();
        assert!(volume.stat("/c.bin").is_err());
    }

    #[test]
    fn directory_iteration_skips_deleted() {
        let volume = open(synth_image(8));
        volume.mkdir("/d").unwrap();
        volume.create("/d/x").unwrap();
        volume.create("/d/y").unwrap();
        volume.create("/d/z").unwrap();
        volume.unlink("/d/y").unwrap();
        let mut names = volume.list("/d").unwrap();
        names.sort();
        assert_eq!(names, vec!["x".to_string(), "z".to_string()]);
    }

    #[test]
    fn mkdir_then_create_child_and_stat() {
        let volume = open(synth_image(8));
        volume.mkdir("/dir").unwrap();
        assert!(volume.stat("/dir").unwrap().is_dir);
        volume.create("/dir/file.txt").unwrap();
        volume.write("/dir/file.txt", b"hi", 0).unwrap();
        let mut buf = [0u8; 2];
        volume.read("/dir/file.txt", &mut buf, 0).unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn rename_within_same_directory() {
        let volume = open(synth_image(8));
        volume.create("/old.txt").unwrap();
        volume.rename("/old.txt", "/new.txt").unwrap();
        assert!(volume.stat("/old.txt").is_err());
        assert!(volume.stat("/new.txt").is_ok());
    }

    #[test]
    fn rename_across_directories_preserves_data() {
        let volume = open(synth_image(8));
        volume.mkdir("/src").unwrap();
        volume.mkdir("/dst").unwrap();
        volume.create("/src/f.bin").unwrap();
        volume.write("/src/f.bin", b"payload", 0).unwrap();
        volume.rename("/src/f.bin", "/dst/f.bin").unwrap();
        assert!(volume.stat("/src/f.bin").is_err());
        let mut buf = [0u8; 7];
        volume.read("/dst/f.bin", &mut buf, 0).unwrap();
        assert_eq!(&buf, b"payload");
    }

    #[test]
    fn rmdir_requires_empty() {
        let volume = open(synth_image(8));
        volume.mkdir("/d").unwrap();
        volume.create("/d/f").unwrap();
        assert!(volume.rmdir("/d").is_err());
        volume.unlink("/d/f").unwrap();
        volume.rmdir("/d").unwrap();
        assert!(volume.stat("/d").is_err());
    }

    #[test]
    fn case_insensitive_lookup() {
        let volume = open(synth_image(8));
        volume.create("/Foo.txt").unwrap();
        assert!(volume.stat("/foo.txt").is_ok());
        assert!(volume.stat("/FOO.TXT").is_ok());
    }

    #[test]
    fn read_only_volume_rejects_mutation() {
        let device = synth_image(4);
        let volume = Volume::open_device(
            device,
            0,
            VolumeOptions {
                read_only: true,
                ..Default::default()
            },
        )
        .unwrap();
        let err = volume.create("/x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadOnly);
    }

    #[test]
    fn corruption_detected_on_self_referential_cluster() {
        let volume = open(synth_image(8));
        volume.create("/z").unwrap();
        let stat = volume.stat("/z").unwrap();
        let _ = stat;
        // Force FAT[first_cluster] to point at itself.
        let resolved = volume.resolve("/z").unwrap();
        let first = resolved.first_cluster();
        volume.write("/z", &[0u8; 100_000], 0).ok();
        // Overwrite the chain's own entry with a self-cycle directly via
        // the raw FAT buffer to simulate on-disk corruption.
        {
            let mut buf = volume.fat_buf.write().unwrap();
            let offset = first as usize * 2;
            buf[offset] = (first & 0xFF) as u8;
            buf[offset + 1] = ((first >> 8) & 0xFF) as u8;
        }
        let mut buf = vec![0u8; 100_000];
        let err = volume.read("/z", &mut buf, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn name_and_time_roundtrip() {
        let (encoded, len) = crate::layout::encode_name("hello.bin").unwrap();
        assert_eq!(len as usize, "hello.bin".len());
        assert_eq!(crate::layout::decode_name(&encoded, len), "hello.bin");

        let t = crate::layout::FatxTime {
            year: 2006,
            month: 11,
            day: 22,
            hour: 13,
            minute: 45,
            second: 30,
        };
        let decoded = crate::layout::FatxTime::decode(t.encode());
        assert_eq!(decoded, t);
    }

    #[test]
    fn endianness_roundtrip() {
        assert_eq!(
            crate::layout::Endianness::detect(FATX_MAGIC.to_be_bytes()),
            Some(crate::layout::Endianness::Little)
        );
        assert_eq!(
            crate::layout::Endianness::detect(FATX_MAGIC.to_le_bytes()),
            Some(crate::layout::Endianness::Big)
        );
        assert_eq!(crate::layout::Endianness::detect([0, 0, 0, 0]), None);
    }

    #[test]
    fn not_fatx_without_magic() {
        let device = Arc::new(MemDevice::new(0x10000));
        let err = Volume::open_device(device, 0, VolumeOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFatx);
    }

    #[test]
    fn big_endian_volume_roundtrip() {
        let volume = open(synth_image_big_endian(8));
        volume.create("/big.bin").unwrap();
        let data: Vec<u8> = (0..5_000u32).map(|i| (i % 250) as u8).collect();
        volume.write("/big.bin", &data, 0).unwrap();
        let stat = volume.stat("/big.bin").unwrap();
        assert_eq!(stat.size, 5_000);
        assert!(!stat.is_dir);
        let mut buf = vec![0u8; 5_000];
        let n = volume.read("/big.bin", &mut buf, 0).unwrap();
        assert_eq!(n, 5_000);
        assert_eq!(buf, data);
    }
}
