//! ### File allocation table (FAT)
//!
//! Module for manipulating the FAT on FAT volumes.  This module assumes the
//! entire FAT is buffered (as usual we suppose small retro volumes).
//!
//! The FAT can be thought of as a cluster pool with forward links.
//! The links in the FAT form chains of clusters, each chain points to a file's data.
//! A cluster value tells us:
//! * state of cluster, can be damaged, free, or allocated
//! * if allocated, is this the last cluster
//! * if allocated and not the last cluster, where is the next cluster
//!
//! The first two entries are reserved, so that the first data cluster is cluster 2.
//! This is encoded in the `Cluster` type, which cannot be constructed for 0 or 1,
//! so the arena can only be indexed by data clusters.
//!
//! Chains on damaged disks may loop or run off the table.  `FatTable::walk` never
//! panics or loops, it reports how the chain ended instead.

use std::collections::HashSet;
use std::fmt;
use log::trace;

// end of cluster chain (EOC), if FAT entry is >= the value it is EOC.
const EOC12_MIN: u32 = 0xff8;
const EOC16_MIN: u32 = 0xfff8;
const EOC32_MIN: u32 = 0xffffff8; // remember FAT32 is really 28 bits
const EOC12_SET: u32 = 0xfff;
const EOC16_SET: u32 = 0xffff;
const EOC32_SET: u32 = 0xfffffff;

const BAD_CLUSTER12: u32 = 0xff7;
const BAD_CLUSTER16: u32 = 0xfff7;
const BAD_CLUSTER32: u32 = 0xffffff7;

const FREE_CLUSTER: u32 = 0;
pub const FIRST_DATA_CLUSTER: u32 = 2;
/// Backstop on the length of any chain we follow
pub const CHAIN_LIMIT: usize = 1000;

const MAX_FAT12_CLUSTERS: usize = 4085;
const MAX_FAT16_CLUSTERS: usize = 65525;

#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum FatWidth {
    Fat12,
    Fat16,
    Fat32
}

/// Index of a data cluster, always >= 2
#[derive(Clone,Copy,PartialEq,Eq,Hash,PartialOrd,Ord,Debug)]
pub struct Cluster(u32);

/// Decoded value of a FAT entry
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum Link {
    Free,
    /// values 1 or anything that cannot be a data cluster of this width
    Reserved(u32),
    Bad,
    Last,
    Next(Cluster)
}

/// How a chain walk ended
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum ChainEnd {
    /// end of chain marker, the normal case
    Eoc,
    /// the walk was stopped by the caller, usually because enough bytes were collected
    Enough,
    /// a free or reserved link inside the chain
    Broken(u32),
    Bad,
    /// link points past the table
    OutOfRange(u32),
    /// link points to a cluster already visited
    Cycle(Cluster),
    /// chain exceeded `CHAIN_LIMIT`
    Limit
}

/// The clusters of a chain, in order, and how the walk ended
#[derive(Clone,Debug)]
pub struct Chain {
    pub clusters: Vec<Cluster>,
    pub end: ChainEnd
}

/// The whole FAT in one buffer.
pub struct FatTable {
    width: FatWidth,
    buf: Vec<u8>
}

impl FatWidth {
    /// Width is decided by the count of data clusters, never by labels on the disk.
    pub fn from_cluster_count(clusters: usize) -> Self {
        match clusters {
            c if c < MAX_FAT12_CLUSTERS => Self::Fat12,
            c if c < MAX_FAT16_CLUSTERS => Self::Fat16,
            _ => Self::Fat32
        }
    }
    pub fn bits(&self) -> usize {
        match self {
            Self::Fat12 => 12,
            Self::Fat16 => 16,
            Self::Fat32 => 32
        }
    }
    pub fn eoc_min(&self) -> u32 {
        match self {
            Self::Fat12 => EOC12_MIN,
            Self::Fat16 => EOC16_MIN,
            Self::Fat32 => EOC32_MIN
        }
    }
    fn eoc_set(&self) -> u32 {
        match self {
            Self::Fat12 => EOC12_SET,
            Self::Fat16 => EOC16_SET,
            Self::Fat32 => EOC32_SET
        }
    }
    fn bad(&self) -> u32 {
        match self {
            Self::Fat12 => BAD_CLUSTER12,
            Self::Fat16 => BAD_CLUSTER16,
            Self::Fat32 => BAD_CLUSTER32
        }
    }
}

impl fmt::Display for FatWidth {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,"FAT{}",self.bits())
    }
}

impl Cluster {
    pub fn new(n: u32) -> Option<Self> {
        match n >= FIRST_DATA_CLUSTER {
            true => Some(Self(n)),
            false => None
        }
    }
    pub fn first() -> Self {
        Self(FIRST_DATA_CLUSTER)
    }
    pub fn value(&self) -> u32 {
        self.0
    }
    /// zero based position of the cluster within the data region
    pub fn data_index(&self) -> usize {
        (self.0 - FIRST_DATA_CLUSTER) as usize
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,"{}",self.0)
    }
}

impl fmt::Display for ChainEnd {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eoc => write!(f,"end of chain"),
            Self::Enough => write!(f,"enough data"),
            Self::Broken(v) => write!(f,"broken link {:#x}",v),
            Self::Bad => write!(f,"bad cluster"),
            Self::OutOfRange(v) => write!(f,"link {} out of range",v),
            Self::Cycle(c) => write!(f,"cycle back to cluster {}",c),
            Self::Limit => write!(f,"chain longer than {} clusters",CHAIN_LIMIT)
        }
    }
}

impl ChainEnd {
    /// true if the chain was cut short by damage
    pub fn is_damage(&self) -> bool {
        !matches!(self,Self::Eoc | Self::Enough)
    }
}

impl FatTable {
    pub fn from_bytes(buf: &[u8],width: FatWidth) -> Self {
        Self { width, buf: buf.to_vec() }
    }
    pub fn width(&self) -> FatWidth {
        self.width
    }
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.clone()
    }
    /// Count of entries, including the 2 reserved ones, that fit in the buffer.
    pub fn len(&self) -> usize {
        match self.width {
            FatWidth::Fat12 => self.buf.len() * 2 / 3,
            FatWidth::Fat16 => self.buf.len() / 2,
            FatWidth::Fat32 => self.buf.len() / 4
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() <= FIRST_DATA_CLUSTER as usize
    }
    /// Iterate over every data cluster in the table
    pub fn clusters(&self) -> impl Iterator<Item = Cluster> {
        (FIRST_DATA_CLUSTER..self.len() as u32).map(Cluster)
    }
    /// get the raw value of entry `n`, including reserved entries
    pub fn raw(&self,n: usize) -> Option<u32> {
        if n >= self.len() {
            return None;
        }
        Some(match self.width {
            FatWidth::Fat12 => {
                let offset = n + (n/2);
                let val16 = u16::from_le_bytes([self.buf[offset],self.buf[offset+1]]);
                match n & 1 {
                    1 => (val16 >> 4) as u32,
                    _ => (val16 & 0x0fff) as u32
                }
            },
            FatWidth::Fat16 => {
                let offset = n*2;
                u16::from_le_bytes([self.buf[offset],self.buf[offset+1]]) as u32
            },
            FatWidth::Fat32 => {
                let offset = n*4;
                let b = &self.buf[offset..offset+4];
                u32::from_le_bytes([b[0],b[1],b[2],b[3]]) & 0x0fffffff
            }
        })
    }
    fn set_raw(&mut self,n: usize,val: u32) {
        if n >= self.len() {
            return;
        }
        match self.width {
            FatWidth::Fat12 => {
                let offset = n + (n/2);
                let old = u16::from_le_bytes([self.buf[offset],self.buf[offset+1]]);
                let val16 = match n & 1 {
                    1 => ((val as u16) << 4) | (old & 0x000f),
                    _ => ((val as u16) & 0x0fff) | (old & 0xf000)
                };
                self.buf[offset..offset+2].copy_from_slice(&val16.to_le_bytes());
            },
            FatWidth::Fat16 => {
                let offset = n*2;
                self.buf[offset..offset+2].copy_from_slice(&(val as u16).to_le_bytes());
            },
            FatWidth::Fat32 => {
                let offset = n*4;
                let b = &self.buf[offset..offset+4];
                let high4 = 0xf0000000 & u32::from_le_bytes([b[0],b[1],b[2],b[3]]);
                self.buf[offset..offset+4].copy_from_slice(&(high4 | (val & 0x0fffffff)).to_le_bytes());
            }
        }
    }
    fn decode(&self,val: u32) -> Link {
        match val {
            FREE_CLUSTER => Link::Free,
            v if v >= self.width.eoc_min() => Link::Last,
            v if v == self.width.bad() => Link::Bad,
            v => match Cluster::new(v) {
                Some(c) => Link::Next(c),
                None => Link::Reserved(v)
            }
        }
    }
    /// Decoded link stored for cluster `c`, `None` if `c` is beyond the table.
    pub fn get(&self,c: Cluster) -> Option<Link> {
        self.raw(c.0 as usize).map(|v| self.decode(v))
    }
    pub fn set(&mut self,c: Cluster,link: Link) {
        let val = match link {
            Link::Free => FREE_CLUSTER,
            Link::Reserved(v) => v,
            Link::Bad => self.width.bad(),
            Link::Last => self.width.eoc_set(),
            Link::Next(next) => next.0
        };
        self.set_raw(c.0 as usize,val);
    }
    pub fn is_free(&self,c: Cluster) -> bool {
        self.get(c)==Some(Link::Free)
    }
    /// Follow the chain from `start`.  The closure is called with the count of clusters
    /// collected so far and can stop the walk early by returning false.
    pub fn walk<F>(&self,start: Cluster,mut more: F) -> Chain where F: FnMut(usize) -> bool {
        let mut clusters: Vec<Cluster> = Vec::new();
        let mut visited: HashSet<Cluster> = HashSet::new();
        let mut curr = start;
        if start.0 as usize >= self.len() {
            return Chain { clusters, end: ChainEnd::OutOfRange(start.0) };
        }
        loop {
            if !visited.insert(curr) {
                return Chain { clusters, end: ChainEnd::Cycle(curr) };
            }
            clusters.push(curr);
            if !more(clusters.len()) {
                return Chain { clusters, end: ChainEnd::Enough };
            }
            if clusters.len() >= CHAIN_LIMIT {
                return Chain { clusters, end: ChainEnd::Limit };
            }
            let link = match self.get(curr) {
                Some(l) => l,
                None => return Chain { clusters, end: ChainEnd::OutOfRange(curr.0) }
            };
            trace!("cluster {} -> {:?}",curr,link);
            curr = match link {
                Link::Last => return Chain { clusters, end: ChainEnd::Eoc },
                Link::Bad => return Chain { clusters, end: ChainEnd::Bad },
                Link::Free => return Chain { clusters, end: ChainEnd::Broken(FREE_CLUSTER) },
                Link::Reserved(v) => return Chain { clusters, end: ChainEnd::Broken(v) },
                Link::Next(c) if c.0 as usize >= self.len() => return Chain { clusters, end: ChainEnd::OutOfRange(c.0) },
                Link::Next(c) => c
            };
        }
    }
    /// Follow the whole chain from `start`
    pub fn chain(&self,start: Cluster) -> Chain {
        self.walk(start,|_| true)
    }
    /// Free every cluster in the chain, returns the count freed
    pub fn free_chain(&mut self,start: Cluster) -> usize {
        let chain = self.chain(start);
        for c in &chain.clusters {
            self.set(*c,Link::Free);
        }
        chain.clusters.len()
    }
    /// Link the clusters into a chain terminated by EOC
    pub fn link_chain(&mut self,clusters: &[Cluster]) {
        for (i,c) in clusters.iter().enumerate() {
            match clusters.get(i+1) {
                Some(next) => self.set(*c,Link::Next(*next)),
                None => self.set(*c,Link::Last)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fat12(entries: &[u32]) -> FatTable {
        let mut fat = FatTable::from_bytes(&vec![0;12],FatWidth::Fat12);
        for (i,v) in entries.iter().enumerate() {
            fat.set_raw(i,*v);
        }
        fat
    }

    #[test]
    fn fat12_packing() {
        let fat = fat12(&[0xff0,0xfff,3,0xfff]);
        assert_eq!(fat.to_bytes()[0..6],[0xf0,0xff,0xff,0x03,0xf0,0xff]);
        assert_eq!(fat.len(),8);
        assert_eq!(fat.get(Cluster::first()),Some(Link::Next(Cluster(3))));
        assert_eq!(fat.get(Cluster(3)),Some(Link::Last));
        assert_eq!(fat.get(Cluster(8)),None);
    }

    #[test]
    fn reserved_clusters_unaddressable() {
        assert!(Cluster::new(0).is_none());
        assert!(Cluster::new(1).is_none());
        assert_eq!(Cluster::new(2).map(|c| c.data_index()),Some(0));
    }

    #[test]
    fn normal_chain() {
        let fat = fat12(&[0xff0,0xfff,3,0xfff]);
        let chain = fat.chain(Cluster::first());
        assert_eq!(chain.clusters,vec![Cluster(2),Cluster(3)]);
        assert_eq!(chain.end,ChainEnd::Eoc);
    }

    #[test]
    fn cycle_terminates() {
        let fat = fat12(&[0xff0,0xfff,3,4,2]);
        let chain = fat.chain(Cluster::first());
        assert_eq!(chain.clusters.len(),3);
        assert_eq!(chain.end,ChainEnd::Cycle(Cluster(2)));
        assert!(chain.end.is_damage());
    }

    #[test]
    fn out_of_range_and_free() {
        let fat = fat12(&[0xff0,0xfff,0x200,0]);
        assert_eq!(fat.chain(Cluster(2)).end,ChainEnd::OutOfRange(0x200));
        assert_eq!(fat.chain(Cluster(3)).end,ChainEnd::Broken(0));
    }

    #[test]
    fn limit_backstop() {
        let mut fat = FatTable::from_bytes(&vec![0;4000],FatWidth::Fat16);
        let all: Vec<Cluster> = fat.clusters().collect();
        fat.link_chain(&all);
        let chain = fat.chain(Cluster::first());
        assert_eq!(chain.end,ChainEnd::Limit);
        assert_eq!(chain.clusters.len(),CHAIN_LIMIT);
    }

    #[test]
    fn link_and_free() {
        let mut fat = FatTable::from_bytes(&vec![0;64],FatWidth::Fat32);
        fat.link_chain(&[Cluster(5),Cluster(2),Cluster(9)]);
        assert_eq!(fat.chain(Cluster(5)).clusters,vec![Cluster(5),Cluster(2),Cluster(9)]);
        assert_eq!(fat.free_chain(Cluster(5)),3);
        assert!(fat.is_free(Cluster(2)));
        assert!(fat.is_free(Cluster(9)));
    }

    #[test]
    fn width_by_count() {
        assert_eq!(FatWidth::from_cluster_count(4084),FatWidth::Fat12);
        assert_eq!(FatWidth::from_cluster_count(4085),FatWidth::Fat16);
        assert_eq!(FatWidth::from_cluster_count(65525),FatWidth::Fat32);
    }
}
