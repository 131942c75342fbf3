//! Directory engine: iterates, looks up, and mutates the flat 64-byte
//! records inside a directory's cluster chain.
//!
//! Grounded in the upstream crate's `dir.rs` scan-with-sentinel pattern
//! (`empty_entry_index`/`ls_with_attr`), but FATX has no long/short name
//! split: one record is the whole entry.

use crate::error::{Error, ErrorKind, Result};
use crate::fat::Next;
use crate::layout::{
    decode_name, encode_name, names_match, ATTR_DIRECTORY, DIR_RECORDS_PER_CLUSTER,
    DIR_RECORD_SIZE, NAME_DELETED, NAME_END, NAME_MAX,
};
use crate::volume::Volume;

/// A decoded 64-byte directory record.
#[derive(Debug, Clone)]
pub struct Record {
    pub name: String,
    pub is_dir: bool,
    pub first_cluster: u32,
    pub size: u32,
    pub created: u32,
    pub modified: u32,
    pub accessed: u32,
}

impl Record {
    fn decode(raw: &[u8; DIR_RECORD_SIZE], endianness: crate::layout::Endianness) -> Option<Self> {
        let name_length = raw[0];
        if name_length == NAME_END || name_length == NAME_DELETED {
            return None;
        }
        if name_length == 0 || name_length as usize > NAME_MAX {
            return None;
        }
        let attr = raw[1];
        let mut name_bytes = [0u8; NAME_MAX];
        name_bytes.copy_from_slice(&raw[2..2 + NAME_MAX]);
        Some(Self {
            name: decode_name(&name_bytes, name_length),
            is_dir: attr & ATTR_DIRECTORY != 0,
            first_cluster: endianness.read_u32(&raw[44..48]),
            size: endianness.read_u32(&raw[48..52]),
            modified: endianness.read_u32(&raw[52..56]),
            created: endianness.read_u32(&raw[56..60]),
            accessed: endianness.read_u32(&raw[60..64]),
        })
    }

    fn encode(&self, endianness: crate::layout::Endianness) -> Result<[u8; DIR_RECORD_SIZE]> {
        let (name_bytes, name_length) = encode_name(&self.name)
            .ok_or_else(|| Error::new(ErrorKind::NameTooLong))?;
        let mut raw = [0u8; DIR_RECORD_SIZE];
        raw[0] = name_length;
        raw[1] = if self.is_dir { ATTR_DIRECTORY } else { 0 };
        raw[2..2 + NAME_MAX].copy_from_slice(&name_bytes);
        endianness.write_u32(self.first_cluster, &mut raw[44..48]);
        endianness.write_u32(self.size, &mut raw[48..52]);
        endianness.write_u32(self.modified, &mut raw[52..56]);
        endianness.write_u32(self.created, &mut raw[56..60]);
        endianness.write_u32(self.accessed, &mut raw[60..64]);
        Ok(raw)
    }
}

/// Absolute byte offset of a 64-byte slot inside a directory's cluster
/// chain.
pub type SlotOffset = u64;

impl Volume {
    fn read_slot(&self, offset: SlotOffset) -> Result<[u8; DIR_RECORD_SIZE]> {
        let mut raw = [0u8; DIR_RECORD_SIZE];
        self.device.read_at(offset, &mut raw)?;
        Ok(raw)
    }

    fn write_slot_raw(&self, offset: SlotOffset, raw: &[u8; DIR_RECORD_SIZE]) -> Result<()> {
        self.check_writable()?;
        self.device.write_at(offset, raw)
    }

    /// Write (or overwrite) the record at `offset`.
    pub fn dir_write_slot(&self, offset: SlotOffset, record: &Record) -> Result<()> {
        let raw = record.encode(self.endianness)?;
        self.write_slot_raw(offset, &raw)
    }

    /// Mark a slot deleted without disturbing the rest of the directory.
    pub fn dir_delete_slot(&self, offset: SlotOffset) -> Result<()> {
        self.check_writable()?;
        self.device.write_at(offset, &[NAME_DELETED])
    }

    /// Iterate the active (non-free, non-deleted) entries of the directory
    /// whose first cluster is `first_cluster`, yielding `(slot_offset,
    /// Record)`. Stops the first time a `0xFF` sentinel is found, in
    /// whichever cluster that is, following the whole chain if needed.
    pub fn dir_iter(&self, first_cluster: u32) -> Result<Vec<(SlotOffset, Record)>> {
        let mut out = Vec::new();
        let mut cluster = first_cluster;
        loop {
            let cluster_base = self.cluster_offset(cluster);
            for slot in 0..DIR_RECORDS_PER_CLUSTER {
                let offset = cluster_base + (slot * DIR_RECORD_SIZE) as u64;
                let raw = self.read_slot(offset)?;
                if raw[0] == NAME_END {
                    return Ok(out);
                }
                if raw[0] == NAME_DELETED {
                    continue;
                }
                match Record::decode(&raw, self.endianness) {
                    Some(record) => out.push((offset, record)),
                    None => continue,
                }
            }
            match self.fat_next(cluster)? {
                Next::Cluster(c) => cluster = c,
                _ => return Ok(out),
            }
        }
    }

    /// Case-insensitive, exact-length lookup of `name` within the
    /// directory at `first_cluster`.
    pub fn dir_lookup(&self, first_cluster: u32, name: &str) -> Result<(SlotOffset, Record)> {
        self.dir_iter(first_cluster)?
            .into_iter()
            .find(|(_, record)| names_match(name, &record.name))
            .ok_or_else(|| Error::new(ErrorKind::NotFound))
    }

    /// Find a free (`0xFF` or `0xE5`) slot in the directory, extending it by
    /// one cluster if none exists.
    pub fn dir_find_free_slot(&self, first_cluster: u32) -> Result<SlotOffset> {
        let mut cluster = first_cluster;
        loop {
            let cluster_base = self.cluster_offset(cluster);
            for slot in 0..DIR_RECORDS_PER_CLUSTER {
                let offset = cluster_base + (slot * DIR_RECORD_SIZE) as u64;
                let raw = self.read_slot(offset)?;
                if raw[0] == NAME_END || raw[0] == NAME_DELETED {
                    return Ok(offset);
                }
            }
            match self.fat_next(cluster)? {
                Next::Cluster(c) => cluster = c,
                _ => break,
            }
        }
        // No free slot in the existing chain: grow it by one cluster and
        // initialize every slot in it to the end-of-directory sentinel.
        let chain_len = self.fat_chain_length(first_cluster)?;
        self.fat_extend(first_cluster, chain_len + 1)?;
        let new_cluster = self.fat_walk(first_cluster, chain_len)?;
        self.dir_init_cluster(new_cluster)?;
        Ok(self.cluster_offset(new_cluster))
    }

    /// Zero-fill a freshly allocated directory cluster's sentinels so
    /// iteration still terminates inside it.
    pub fn dir_init_cluster(&self, cluster: u32) -> Result<()> {
        self.check_writable()?;
        let mut blank = [0u8; DIR_RECORD_SIZE];
        blank[0] = NAME_END;
        let base = self.cluster_offset(cluster);
        for slot in 0..DIR_RECORDS_PER_CLUSTER {
            self.device
                .write_at(base + (slot * DIR_RECORD_SIZE) as u64, &blank)?;
        }
        Ok(())
    }

    /// True if `first_cluster`'s directory has no active entries.
    pub fn dir_is_empty(&self, first_cluster: u32) -> Result<bool> {
        Ok(self.dir_iter(first_cluster)?.is_empty())
    }
}
