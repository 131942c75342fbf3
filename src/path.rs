//! Path resolver: walks a slash-delimited path from the root directory to a
//! record location and data location.

use crate::dir::{Record, SlotOffset};
use crate::error::{Error, ErrorKind, Result};
use crate::layout::FAT_ROOT_CLUSTER;
use crate::volume::Volume;

/// Outcome of resolving a path: either the root (no backing directory
/// slot), or a named entry with the slot it lives in.
pub enum Resolved {
    Root,
    Entry {
        slot_offset: SlotOffset,
        parent_first_cluster: u32,
        record: Record,
    },
}

impl Resolved {
    pub fn is_dir(&self) -> bool {
        match self {
            Resolved::Root => true,
            Resolved::Entry { record, .. } => record.is_dir,
        }
    }

    pub fn first_cluster(&self) -> u32 {
        match self {
            Resolved::Root => FAT_ROOT_CLUSTER,
            Resolved::Entry { record, .. } => record.first_cluster,
        }
    }
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

impl Volume {
    /// Resolve `path` (an absolute, slash-delimited path rooted at `/`) to
    /// its directory entry.
    pub fn resolve(&self, path: &str) -> Result<Resolved> {
        let components = split(path);
        if components.is_empty() {
            return Ok(Resolved::Root);
        }
        let mut dir_cluster = FAT_ROOT_CLUSTER;
        let last = components.len() - 1;
        for (i, component) in components.iter().enumerate() {
            let (slot_offset, record) = self.dir_lookup(dir_cluster, component)?;
            if i == last {
                return Ok(Resolved::Entry {
                    slot_offset,
                    parent_first_cluster: dir_cluster,
                    record,
                });
            }
            if !record.is_dir {
                return Err(Error::new(ErrorKind::NotDirectory));
            }
            dir_cluster = record.first_cluster;
        }
        unreachable!("split() only returns an empty vec when path has no components")
    }

    /// Resolve the parent directory of `path`, returning its first cluster
    /// and the basename of `path`.
    pub fn resolve_parent<'a>(&self, path: &'a str) -> Result<(u32, &'a str)> {
        let components = split(path);
        let basename = *components
            .last()
            .ok_or_else(|| Error::with(ErrorKind::NotFound, "empty path"))?;
        let mut dir_cluster = FAT_ROOT_CLUSTER;
        for component in &components[..components.len() - 1] {
            let (_, record) = self.dir_lookup(dir_cluster, component)?;
            if !record.is_dir {
                return Err(Error::new(ErrorKind::NotDirectory));
            }
            dir_cluster = record.first_cluster;
        }
        Ok((dir_cluster, basename))
    }
}
