//! FAT manager: cluster allocation table reads, writes, and chain walking.
//!
//! The upstream crate's `ClusterChain`/`FatManager` pair (an `Iterator` over
//! on-disk 32-bit entries, plus a linear free-cluster scan) is the template;
//! this version generalizes the entry width to 2 or 4 bytes and adds the
//! cycle/bounds defense the design notes call for.

use log::warn;

use crate::error::{Error, ErrorKind, Result};
use crate::layout::FAT_ROOT_CLUSTER;
use crate::volume::Volume;

/// Result of following one FAT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Cluster(u32),
    EndOfChain,
    Bad,
}

impl Volume {
    fn fat_entry_offset(&self, cluster: u32) -> usize {
        cluster as usize * self.fat_width as usize
    }

    fn read_fat_raw(&self, cluster: u32) -> u32 {
        let buf = self.fat_buf.read().expect("fat buffer lock poisoned");
        let offset = self.fat_entry_offset(cluster);
        if self.fat_width == 4 {
            self.endianness.read_u32(&buf[offset..offset + 4])
        } else {
            self.endianness.read_u16(&buf[offset..offset + 2]) as u32
        }
    }

    fn write_fat_raw(&self, cluster: u32, value: u32) {
        let mut buf = self.fat_buf.write().expect("fat buffer lock poisoned");
        let offset = self.fat_entry_offset(cluster);
        if self.fat_width == 4 {
            self.endianness.write_u32(value, &mut buf[offset..offset + 4]);
        } else {
            self.endianness.write_u16(value as u16, &mut buf[offset..offset + 2]);
        }
    }

    fn flush_fat(&self) -> Result<()> {
        let buf = self.fat_buf.read().expect("fat buffer lock poisoned");
        if let Err(e) = self.device.write_at(self.fat_start, &buf) {
            self.poison();
            return Err(e);
        }
        Ok(())
    }

    fn in_range(&self, cluster: u32) -> bool {
        cluster >= 1 && (cluster as u64) <= self.fat_entry_count
    }

    /// Look up the successor of `cluster`.
    pub fn fat_next(&self, cluster: u32) -> Result<Next> {
        if cluster == FAT_ROOT_CLUSTER {
            return Ok(Next::EndOfChain);
        }
        if !self.in_range(cluster) {
            return Err(self.corrupt(format!("cluster {cluster} out of range")));
        }
        let raw = self.read_fat_raw(cluster);
        Ok(if self.fat_width == 4 {
            let masked = raw & 0x0FFF_FFFF;
            if masked == 0 {
                Next::Cluster(0)
            } else if masked == 0xFFF_FFF7 {
                Next::Bad
            } else if masked > 0xFFF_FFF5 {
                Next::EndOfChain
            } else {
                Next::Cluster(masked)
            }
        } else {
            let v = raw as u16;
            if v == 0 {
                Next::Cluster(0)
            } else if v == 0xFFF7 {
                Next::Bad
            } else if v > 0xFFF5 {
                Next::EndOfChain
            } else {
                Next::Cluster(v as u32)
            }
        })
    }

    /// Walk `k` steps from `first`, returning the cluster reached.
    pub fn fat_walk(&self, first: u32, k: usize) -> Result<u32> {
        let mut cluster = first;
        for step in 0..k {
            match self.fat_next(cluster)? {
                Next::Cluster(c) => cluster = c,
                Next::EndOfChain => {
                    return Err(self.corrupt(format!(
                        "chain ended after {step} clusters, wanted {k}"
                    )))
                }
                Next::Bad => return Err(self.corrupt("bad cluster in chain")),
            }
            if step as u64 > self.fat_entry_count {
                warn!("cluster chain from {first} exceeded volume entry count, assuming a cycle");
                return Err(self.corrupt("cluster chain cycle detected"));
            }
        }
        Ok(cluster)
    }

    /// Number of clusters in the chain starting at `first`.
    pub fn fat_chain_length(&self, first: u32) -> Result<usize> {
        let mut count = 1usize;
        let mut cluster = first;
        loop {
            match self.fat_next(cluster)? {
                Next::Cluster(c) => {
                    cluster = c;
                    count += 1;
                }
                Next::EndOfChain => return Ok(count),
                Next::Bad => return Err(self.corrupt("bad cluster in chain")),
            }
            if count as u64 > self.fat_entry_count {
                return Err(self.corrupt("cluster chain cycle detected"));
            }
        }
    }

    /// First entry in the FAT equal to 0, i.e. free.
    pub fn fat_find_free(&self) -> Result<u32> {
        let buf = self.fat_buf.read().expect("fat buffer lock poisoned");
        let width = self.fat_width as usize;
        for cluster in 1..=self.fat_entry_count {
            let offset = cluster as usize * width;
            let value = if width == 4 {
                self.endianness.read_u32(&buf[offset..offset + 4])
            } else {
                self.endianness.read_u16(&buf[offset..offset + 2]) as u32
            };
            if value == 0 {
                return Ok(cluster as u32);
            }
        }
        Err(Error::new(ErrorKind::NoSpace))
    }

    fn terminator(&self) -> u32 {
        if self.fat_width == 4 {
            0xFFFF_FFFF
        } else {
            0xFFFF
        }
    }

    /// Allocate and link one new free cluster onto `first`. Returns the new
    /// chain's final cluster.
    pub fn fat_append_cluster(&self, current_tail: u32) -> Result<u32> {
        let free = self.fat_find_free()?;
        self.write_fat_raw(current_tail, free);
        self.write_fat_raw(free, self.terminator());
        self.flush_fat()?;
        Ok(free)
    }

    /// Extend the chain starting at `first` until it has `new_count`
    /// clusters. Rolls back clusters allocated during this call if a later
    /// allocation fails.
    pub fn fat_extend(&self, first: u32, new_count: usize) -> Result<()> {
        let current_count = self.fat_chain_length(first)?;
        if new_count <= current_count {
            return Ok(());
        }
        let mut tail = self.fat_walk(first, current_count - 1)?;
        let mut allocated = Vec::new();
        for _ in current_count..new_count {
            match self.fat_append_cluster(tail) {
                Ok(new_tail) => {
                    allocated.push(new_tail);
                    tail = new_tail;
                }
                Err(e) => {
                    for c in allocated {
                        self.write_fat_raw(c, 0);
                    }
                    let _ = self.flush_fat();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Shrink the chain starting at `first` down to `new_count` clusters,
    /// freeing the tail.
    pub fn fat_shrink(&self, first: u32, new_count: usize) -> Result<()> {
        let new_count = new_count.max(1);
        let current_count = self.fat_chain_length(first)?;
        if new_count >= current_count {
            return Ok(());
        }
        let new_tail = self.fat_walk(first, new_count - 1)?;
        let mut to_free = self.fat_walk(first, new_count)?;
        self.write_fat_raw(new_tail, self.terminator());
        loop {
            let next = self.fat_next(to_free)?;
            self.write_fat_raw(to_free, 0);
            match next {
                Next::Cluster(c) => to_free = c,
                _ => break,
            }
        }
        self.flush_fat()
    }

    /// Free every cluster in the chain starting at `first`.
    pub fn fat_free_chain(&self, first: u32) -> Result<()> {
        let mut cluster = first;
        loop {
            let next = self.fat_next(cluster)?;
            self.write_fat_raw(cluster, 0);
            match next {
                Next::Cluster(c) => cluster = c,
                _ => break,
            }
        }
        self.flush_fat()
    }

    /// Allocate a single free cluster, terminate it, and return its index.
    /// Used by `create`/`mkdir` for a brand new file's first cluster.
    pub fn fat_alloc_one(&self) -> Result<u32> {
        let free = self.fat_find_free()?;
        self.write_fat_raw(free, self.terminator());
        self.flush_fat()?;
        Ok(free)
    }
}
