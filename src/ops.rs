//! File operations facade: `stat`/`list`/`read`/`write`/`create`/`mkdir`/
//! `rename`/`unlink`/`rmdir`/`truncate`, composed from the volume, FAT
//! manager, directory engine, and path resolver.
//!
//! The original tool dispatched directory-record mutation through a
//! function pointer (`x360_modify_file_record` takes a callback). This
//! module replaces that with [`SlotMutation`], a plain sum type consumed by
//! one `apply_mutation` routine — the locate/mutate/rewrite shape survives,
//! the indirection doesn't.

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, trace};

use crate::dir::Record;
use crate::error::{Error, ErrorKind, Result};
use crate::fat::Next;
use crate::layout::{FatxTime, CLUSTER_SIZE, NAME_MAX};
use crate::path::Resolved;
use crate::volume::Volume;

fn now_fatx() -> u32 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    FatxTime::from_unix(secs).encode()
}

/// Metadata returned by [`Volume::stat`].
#[derive(Debug, Clone)]
pub struct Stat {
    pub is_dir: bool,
    pub size: u64,
    pub created: u32,
    pub modified: u32,
    pub accessed: u32,
}

enum SlotMutation<'a> {
    Rename { new_name: &'a str },
    Unlink,
    SetSize { size: u32, first_cluster: u32 },
}

impl Volume {
    fn apply_mutation(
        &self,
        slot_offset: u64,
        mut record: Record,
        mutation: SlotMutation<'_>,
    ) -> Result<()> {
        match mutation {
            SlotMutation::Rename { new_name } => {
                if new_name.len() > NAME_MAX {
                    return Err(Error::new(ErrorKind::NameTooLong));
                }
                record.name = new_name.to_string();
                self.dir_write_slot(slot_offset, &record)
            }
            SlotMutation::Unlink => self.dir_delete_slot(slot_offset),
            SlotMutation::SetSize { size, first_cluster } => {
                record.size = size;
                record.first_cluster = first_cluster;
                record.modified = now_fatx();
                self.dir_write_slot(slot_offset, &record)
            }
        }
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        match self.resolve(path)? {
            Resolved::Root => Ok(Stat {
                is_dir: true,
                size: 0,
                created: 0,
                modified: 0,
                accessed: 0,
            }),
            Resolved::Entry { record, .. } => Ok(Stat {
                is_dir: record.is_dir,
                size: record.size as u64,
                created: record.created,
                modified: record.modified,
                accessed: record.accessed,
            }),
        }
    }

    /// List the names of the active entries of the directory at `path`.
    /// Does not synthesize `.`/`..` — that is the adapter's job.
    pub fn list(&self, path: &str) -> Result<Vec<String>> {
        let resolved = self.resolve(path)?;
        if !resolved.is_dir() {
            return Err(Error::new(ErrorKind::NotDirectory));
        }
        Ok(self
            .dir_iter(resolved.first_cluster())?
            .into_iter()
            .map(|(_, record)| record.name)
            .collect())
    }

    /// Read up to `buf.len()` bytes of the file at `path`, starting at
    /// `offset`. Returns the number of bytes actually read.
    pub fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            return Err(Error::new(ErrorKind::IsDirectory));
        }
        let size = match &resolved {
            Resolved::Entry { record, .. } => record.size as u64,
            Resolved::Root => unreachable!(),
        };
        if offset >= size {
            return Ok(0);
        }
        let to_read = buf.len().min((size - offset) as usize);
        let first_cluster = resolved.first_cluster();
        self.read_chain(first_cluster, &mut buf[..to_read], offset)?;
        Ok(to_read)
    }

    fn read_chain(&self, first_cluster: u32, mut buf: &mut [u8], offset: u64) -> Result<()> {
        let cluster_size = CLUSTER_SIZE;
        let mut cluster = self.fat_walk(first_cluster, (offset / cluster_size) as usize)?;
        let mut intra_offset = offset % cluster_size;
        let mut visited = std::collections::HashSet::new();
        while !buf.is_empty() {
            if !visited.insert(cluster) {
                return Err(self.corrupt("cluster chain cycle detected"));
            }
            let cluster_base = self.cluster_offset(cluster);
            let chunk = buf.len().min((cluster_size - intra_offset) as usize);
            let n = self
                .device
                .read_at(cluster_base + intra_offset, &mut buf[..chunk])?;
            if n < chunk {
                return Err(self.corrupt("short read from cluster chain"));
            }
            buf = &mut buf[chunk..];
            intra_offset = 0;
            if !buf.is_empty() {
                cluster = match self.fat_next(cluster)? {
                    Next::Cluster(c) => c,
                    _ => return Err(self.corrupt("cluster chain ended early")),
                };
            }
        }
        Ok(())
    }

    fn write_chain(&self, first_cluster: u32, mut buf: &[u8], offset: u64) -> Result<()> {
        let cluster_size = CLUSTER_SIZE;
        let mut cluster = self.fat_walk(first_cluster, (offset / cluster_size) as usize)?;
        let mut intra_offset = offset % cluster_size;
        let mut visited = std::collections::HashSet::new();
        while !buf.is_empty() {
            if !visited.insert(cluster) {
                return Err(self.corrupt("cluster chain cycle detected"));
            }
            let cluster_base = self.cluster_offset(cluster);
            let chunk = buf.len().min((cluster_size - intra_offset) as usize);
            self.device
                .write_at(cluster_base + intra_offset, &buf[..chunk])?;
            buf = &buf[chunk..];
            intra_offset = 0;
            if !buf.is_empty() {
                cluster = match self.fat_next(cluster)? {
                    Next::Cluster(c) => c,
                    _ => return Err(self.corrupt("cluster chain ended early")),
                };
            }
        }
        Ok(())
    }

    /// Write `buf` to the file at `path` starting at `offset`, growing the
    /// file (and its cluster chain) if the write extends past the current
    /// size.
    pub fn write(&self, path: &str, buf: &[u8], offset: u64) -> Result<usize> {
        self.check_writable()?;
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            return Err(Error::new(ErrorKind::IsDirectory));
        }
        let (slot_offset, record) = match resolved {
            Resolved::Entry { slot_offset, record, .. } => (slot_offset, record),
            Resolved::Root => unreachable!(),
        };
        let needed_size = offset + buf.len() as u64;
        let first_cluster = record.first_cluster;
        if needed_size > record.size as u64 {
            let new_clusters = needed_size.div_ceil(CLUSTER_SIZE).max(1) as usize;
            self.fat_extend(first_cluster, new_clusters)?;
        }
        self.write_chain(first_cluster, buf, offset)?;
        let new_size = needed_size.max(record.size as u64) as u32;
        self.apply_mutation(
            slot_offset,
            record,
            SlotMutation::SetSize {
                size: new_size,
                first_cluster,
            },
        )?;
        trace!("wrote {} bytes to {path} at offset {offset}", buf.len());
        Ok(buf.len())
    }

    fn create_entry(&self, path: &str, is_dir: bool) -> Result<()> {
        self.check_writable()?;
        let (parent_cluster, basename) = self.resolve_parent(path)?;
        if basename.is_empty() || basename.len() > NAME_MAX {
            return Err(Error::new(ErrorKind::NameTooLong));
        }
        if self.dir_lookup(parent_cluster, basename).is_ok() {
            return Err(Error::new(ErrorKind::Exists));
        }
        let first_cluster = self.fat_alloc_one()?;
        if is_dir {
            if let Err(e) = self.dir_init_cluster(first_cluster) {
                self.fat_free_chain(first_cluster).ok();
                return Err(e);
            }
        }
        let slot_offset = match self.dir_find_free_slot(parent_cluster) {
            Ok(offset) => offset,
            Err(e) => {
                // No slot for the new entry: free the cluster we just
                // allocated for it rather than leaking it.
                self.fat_free_chain(first_cluster).ok();
                return Err(e);
            }
        };
        let now = now_fatx();
        let record = Record {
            name: basename.to_string(),
            is_dir,
            first_cluster,
            size: 0,
            created: now,
            modified: now,
            accessed: now,
        };
        self.dir_write_slot(slot_offset, &record)?;
        debug!("created {} at {path}", if is_dir { "directory" } else { "file" });
        Ok(())
    }

    pub fn create(&self, path: &str) -> Result<()> {
        self.create_entry(path, false)
    }

    pub fn mkdir(&self, path: &str) -> Result<()> {
        self.create_entry(path, true)
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        self.check_writable()?;
        let resolved = self.resolve(path)?;
        let (slot_offset, record) = match resolved {
            Resolved::Entry { slot_offset, record, .. } => (slot_offset, record),
            Resolved::Root => return Err(Error::new(ErrorKind::IsDirectory)),
        };
        if record.is_dir {
            return Err(Error::new(ErrorKind::IsDirectory));
        }
        self.fat_free_chain(record.first_cluster)?;
        self.apply_mutation(slot_offset, record, SlotMutation::Unlink)
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        self.check_writable()?;
        let resolved = self.resolve(path)?;
        let (slot_offset, record) = match resolved {
            Resolved::Entry { slot_offset, record, .. } => (slot_offset, record),
            Resolved::Root => return Err(Error::new(ErrorKind::NotEmpty)),
        };
        if !record.is_dir {
            return Err(Error::new(ErrorKind::NotDirectory));
        }
        if !self.dir_is_empty(record.first_cluster)? {
            return Err(Error::new(ErrorKind::NotEmpty));
        }
        self.fat_free_chain(record.first_cluster)?;
        self.apply_mutation(slot_offset, record, SlotMutation::Unlink)
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        self.check_writable()?;
        let resolved = self.resolve(old)?;
        let (slot_offset, old_parent_cluster, record) = match resolved {
            Resolved::Entry {
                slot_offset,
                parent_first_cluster,
                record,
            } => (slot_offset, parent_first_cluster, record),
            Resolved::Root => return Err(Error::new(ErrorKind::IsDirectory)),
        };
        let (new_parent_cluster, new_basename) = self.resolve_parent(new)?;
        if new_basename.len() > NAME_MAX {
            return Err(Error::new(ErrorKind::NameTooLong));
        }

        if self.dir_lookup(new_parent_cluster, new_basename).is_ok() {
            return Err(Error::new(ErrorKind::Exists));
        }

        if old_parent_cluster == new_parent_cluster {
            return self.apply_mutation(
                slot_offset,
                record,
                SlotMutation::Rename { new_name: new_basename },
            );
        }

        // Cross-directory rename: allocate a slot in the destination
        // directory carrying the same data, then remove the source slot.
        let mut moved = record.clone();
        moved.name = new_basename.to_string();
        let new_slot = self.dir_find_free_slot(new_parent_cluster)?;
        self.dir_write_slot(new_slot, &moved)?;
        self.apply_mutation(slot_offset, record, SlotMutation::Unlink)
    }

    pub fn truncate(&self, path: &str, new_size: u64) -> Result<()> {
        self.check_writable()?;
        let resolved = self.resolve(path)?;
        let (slot_offset, record) = match resolved {
            Resolved::Entry { slot_offset, record, .. } => (slot_offset, record),
            Resolved::Root => return Err(Error::new(ErrorKind::IsDirectory)),
        };
        if record.is_dir {
            return Err(Error::new(ErrorKind::IsDirectory));
        }
        let first_cluster = record.first_cluster;
        let needed_clusters = new_size.div_ceil(CLUSTER_SIZE).max(1) as usize;
        let current_clusters = self.fat_chain_length(first_cluster)?;
        if needed_clusters > current_clusters {
            self.fat_extend(first_cluster, needed_clusters)?;
        } else if needed_clusters < current_clusters {
            self.fat_shrink(first_cluster, needed_clusters)?;
        }
        self.apply_mutation(
            slot_offset,
            record,
            SlotMutation::SetSize {
                size: new_size as u32,
                first_cluster,
            },
        )
    }
}
