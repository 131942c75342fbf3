//! Volume: opens a device/image, parses the superblock, and derives the
//! layout constants every other component needs.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use log::{debug, warn};

use crate::device::{BlockDevice, FileDevice};
use crate::error::{Error, ErrorKind, Result};
use crate::layout::{self, Endianness, CLUSTER_SIZE, FATX_MAGIC, FAT_OFFSET, WIDTH_THRESHOLD};

/// Caller-supplied knobs, mirroring the language-neutral `options` this
/// engine exposes to an adapter.
#[derive(Debug, Clone)]
pub struct VolumeOptions {
    /// Absolute byte offset of the FATX partition within the backing store.
    /// `None` selects the default: 0 for a regular file, the legacy Xbox 360
    /// raw-disk offset otherwise.
    pub partition_start: Option<u64>,
    pub read_only: bool,
    /// When set, any corruption signal poisons the volume for all subsequent
    /// operations rather than being scoped to the operation that found it.
    pub strict_corruption: bool,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            partition_start: None,
            read_only: false,
            strict_corruption: false,
        }
    }
}

/// Derived, immutable-after-open layout of a FATX volume.
pub struct Volume {
    pub(crate) device: Arc<dyn BlockDevice>,
    pub(crate) options: VolumeOptions,
    pub(crate) endianness: Endianness,
    pub(crate) partition_start: u64,
    pub(crate) fat_start: u64,
    pub(crate) fat_width: u8,
    pub(crate) fat_entry_count: u64,
    pub(crate) root_dir_offset: u64,
    pub(crate) fat_buf: RwLock<Vec<u8>>,
    pub(crate) poisoned: AtomicBool,
}

impl Volume {
    /// Open a FATX volume backed by a regular file or block device at
    /// `path`.
    pub fn open(path: impl AsRef<Path>, options: VolumeOptions) -> Result<Self> {
        let path = path.as_ref();
        let is_regular_file = path
            .metadata()
            .map(|m| m.is_file())
            .unwrap_or(false);
        let device = FileDevice::open(path, options.read_only)?;
        let partition_start = options.partition_start.unwrap_or(if is_regular_file {
            0
        } else {
            crate::layout::DEFAULT_PARTITION_START
        });
        Self::open_device(Arc::new(device), partition_start, options)
    }

    /// Open a FATX volume over an already-constructed [`BlockDevice`], e.g.
    /// the in-memory `MemDevice` used by tests.
    pub fn open_device(
        device: Arc<dyn BlockDevice>,
        partition_start: u64,
        options: VolumeOptions,
    ) -> Result<Self> {
        let mut magic = [0u8; 4];
        device.read_at(partition_start, &mut magic)?;
        let endianness = Endianness::detect(magic).ok_or_else(|| {
            warn!("superblock magic did not decode as FATX at offset {partition_start:#x}");
            Error::with(
                ErrorKind::NotFatx,
                format!("no FATX magic at offset {partition_start:#x}"),
            )
        })?;

        let fat_start = partition_start + FAT_OFFSET;
        let end = device.len()?;
        if end <= fat_start {
            return Err(Error::with(ErrorKind::NotFatx, "device shorter than FAT offset"));
        }

        // Width is derived from the data-region size, which itself depends
        // on the root-directory offset, which depends on width — so we
        // compute both candidate layouts and pick the one the original
        // tool's formula actually selects, following fatx.c's
        // `fatx_calc_size_and_table_offset`.
        let approx_data_size = end - fat_start;
        let fat_width: u8 = if approx_data_size >= WIDTH_THRESHOLD { 4 } else { 2 };

        let root_dir_offset = if fat_width == 4 {
            layout::round_up_4k(((end - partition_start) >> 12) + 1) + fat_start
        } else {
            layout::round_up_4k(((end - partition_start) >> 13) + 1) + fat_start
        };

        if root_dir_offset >= end {
            return Err(Error::with(
                ErrorKind::NotFatx,
                "computed root directory offset beyond end of device",
            ));
        }

        let data_size = end - root_dir_offset;
        let fat_entry_count = data_size / CLUSTER_SIZE;
        let fat_buf_len = (fat_entry_count as usize + 1) * fat_width as usize;
        let mut fat_buf = vec![0u8; fat_buf_len];
        device.read_at(fat_start, &mut fat_buf)?;

        debug!(
            "opened FATX volume: start={partition_start:#x} endianness={endianness:?} width={fat_width} \
             entries={fat_entry_count} root_dir_offset={root_dir_offset:#x}"
        );

        Ok(Self {
            device,
            options,
            endianness,
            partition_start,
            fat_start,
            fat_width,
            fat_entry_count,
            root_dir_offset,
            fat_buf: RwLock::new(fat_buf),
            poisoned: AtomicBool::new(false),
        })
    }

    pub fn cluster_offset(&self, cluster: u32) -> u64 {
        self.root_dir_offset + (cluster as u64 - layout::FAT_ROOT_CLUSTER as u64) * CLUSTER_SIZE
    }

    pub fn read_only(&self) -> bool {
        self.options.read_only
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.options.read_only {
            return Err(Error::new(ErrorKind::ReadOnly));
        }
        if self.poisoned.load(Ordering::Acquire) {
            return Err(Error::with(
                ErrorKind::Corrupt,
                "volume poisoned by a previous FAT flush failure",
            ));
        }
        Ok(())
    }

    pub(crate) fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    /// Build a `Corrupt` error for `context`. When the volume was opened with
    /// `strict_corruption`, this also poisons the volume so every subsequent
    /// operation fails instead of attempting to carry on past the damage;
    /// otherwise the corruption is scoped to the operation that found it.
    pub(crate) fn corrupt(&self, context: impl std::fmt::Display) -> Error {
        if self.options.strict_corruption {
            self.poison();
        }
        Error::with(ErrorKind::Corrupt, context)
    }

    /// Flush the in-memory FAT buffer and the backing device.
    pub fn sync(&self) -> Result<()> {
        let buf = self.fat_buf.read().expect("fat buffer lock poisoned");
        self.device.write_at(self.fat_start, &buf)?;
        drop(buf);
        self.device.sync()
    }

    /// Flush and release the volume. Equivalent to calling `sync` and
    /// dropping the handle; also ran implicitly by `Drop` for callers that
    /// don't call it explicitly.
    pub fn close(self) -> Result<()> {
        self.sync()
    }
}

impl Drop for Volume {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            warn!("failed to flush FAT on drop: {e}");
        }
    }
}
