//! Block device interface.
//!
//! Consolidates what the upstream crate split across `block_device.rs` and
//! `device.rs` into one trait, and moves it from block-aligned `read_blocks`/
//! `write_blocks` to byte-granular positional I/O, since FATX superblock and
//! directory fields are not block-aligned the way a FAT32 BPB's fields are.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Mutex, RwLock};

use crate::error::{Error, ErrorKind, Result};

/// Positional, blocking access to the bytes backing a volume.
pub trait BlockDevice: Send + Sync {
    /// Read `buf.len()` bytes starting at `offset`. Returns the number of
    /// bytes actually read; a short read is only expected at end of device.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `buf` at `offset`.
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Total addressable length of the device, in bytes.
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Flush any buffering down to stable storage.
    fn sync(&self) -> Result<()>;
}

/// `std::fs::File`-backed device, grounded in the upstream crate's own
/// `example/fat32-fs-std` demo, which wraps a `File` the same way but with
/// block-aligned assertions; this version is byte-granular.
pub struct FileDevice {
    file: Mutex<File>,
    len: u64,
}

impl FileDevice {
    pub fn open(path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl BlockDevice for FileDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut file = self.file.lock().expect("file device mutex poisoned");
        file.seek(SeekFrom::Start(offset))?;
        let mut read = 0;
        while read < buf.len() {
            match file.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(read)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut file = self.file.lock().expect("file device mutex poisoned");
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn sync(&self) -> Result<()> {
        self.file
            .lock()
            .expect("file device mutex poisoned")
            .sync_data()?;
        Ok(())
    }
}

/// In-memory device for tests: lets the test-tooling synthesize a FATX image
/// without touching the filesystem, the way the upstream crate's own tests
/// fake a `BlockDevice` over a byte buffer.
pub struct MemDevice {
    data: RwLock<Vec<u8>>,
}

impl MemDevice {
    pub fn new(size: usize) -> Self {
        Self {
            data: RwLock::new(vec![0u8; size]),
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }
}

impl BlockDevice for MemDevice {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.data.read().expect("mem device lock poisoned");
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let end = (offset + buf.len()).min(data.len());
        let n = end - offset;
        buf[..n].copy_from_slice(&data[offset..end]);
        Ok(n)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut data = self.data.write().expect("mem device lock poisoned");
        let offset = offset as usize;
        let needed = offset + buf.len();
        if needed > data.len() {
            if needed as u64 > u32::MAX as u64 * 2 {
                return Err(Error::new(ErrorKind::NoSpace));
            }
            data.resize(needed, 0);
        }
        data[offset..needed].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.read().expect("mem device lock poisoned").len() as u64)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
