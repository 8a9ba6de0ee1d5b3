//! ## FAT file system module
//!
//! The File Allocation Table (FAT) file system is named after the structure that
//! keeps track of allocated clusters.
//! The FAT itself is implemented in `crate::bios::fat`, this module makes use of the FAT
//! as part of managing the overall file system.
//!
//! Two dialects are handled by the same `Disk`:
//! * standard FAT12/16/32, layout from the BPB or its fallbacks, see `bios::bpb::acquire`
//! * HP-150, 256 byte sectors, fixed FAT location, directory found from a table of offsets
//!
//! Only the root directory is read.  Writing is limited to overwriting a file within
//! its existing allocation, creating a new file in the root directory, and deleting.

pub mod directory;
pub mod pack;
mod display;

use std::collections::HashSet;
use log::{debug,error,info};
use crate::bios::{bpb,tables};
use crate::bios::fat::{Cluster,ChainEnd,FatTable,FatWidth};
use crate::diag::{Diagnostics,Kind};
use crate::fs::{DiskFS,DiskUsage,FileData,FileEntry,Error,attr};
use crate::{DYNERR,STDRESULT};
pub use directory::{Dialect,Directory,RootMethod};

pub const FS_NAME: &str = "fat";
pub const HP150_FS_NAME: &str = "fat_hp150";

/// Where everything is, resolved once when the disk is opened
#[derive(Clone,Debug)]
pub struct Layout {
    pub params: bpb::BootParameters,
    /// how the parameters were found
    pub source: String,
    pub fat_start: usize,
    /// bytes in one copy of the FAT
    pub fat_size: usize,
    /// copies updated when the FAT is written back
    pub fat_copies_written: usize,
    pub data_start: usize,
    pub cluster_size: usize,
    pub width: FatWidth
}

/// The primary interface for disk operations.
pub struct Disk {
    img: Vec<u8>,
    dialect: Dialect,
    layout: Layout,
    fat: FatTable,
    dir: Directory,
    diagnostics: Diagnostics
}

fn load_fat(img: &[u8],layout: &Layout) -> FatTable {
    let beg = layout.fat_start.min(img.len());
    let end = (layout.fat_start + layout.fat_size).min(img.len());
    FatTable::from_bytes(&img[beg..end],layout.width)
}

impl Disk {
    /// Open a standard FAT volume.  The DiskFS takes ownership of the image.
    /// Damage in the boot sector or directory goes into the diagnostics, the open only
    /// fails if the FAT would lie outside the image.
    pub fn open(img: Vec<u8>) -> Result<Self,DYNERR> {
        let mut diagnostics = Diagnostics::new();
        let acq = bpb::acquire(&img,&mut diagnostics);
        let params = acq.params;
        if params.cluster_size()==0 || params.fat_start() >= img.len() {
            error!("FAT region is outside the image");
            return Err(Box::new(Error::BpbInvalid));
        }
        let layout = Layout {
            params,
            source: acq.source.to_string(),
            fat_start: params.fat_start(),
            fat_size: params.fat_size(),
            fat_copies_written: params.fat_copies as usize,
            data_start: params.data_start(),
            cluster_size: params.cluster_size(),
            width: params.fat_width(img.len())
        };
        debug!("{} with {} byte clusters, parameters from {}",layout.width,layout.cluster_size,layout.source);
        let (offset,method) = directory::locate_root(&img,params.root_dir_start(),params.root_dir_size(),acq.root_hint,&mut diagnostics);
        let slots = (params.root_entries as usize).min(img.len().saturating_sub(offset) / directory::DIR_ENTRY_SIZE);
        let dir = directory::load(&img,offset,slots,method,Dialect::Standard,&mut diagnostics);
        let fat = load_fat(&img,&layout);
        Ok(Self { img, dialect: Dialect::Standard, layout, fat, dir, diagnostics })
    }
    /// Open an HP-150 volume.  The DiskFS takes ownership of the image.
    pub fn open_hp150(img: Vec<u8>) -> Result<Self,DYNERR> {
        let mut diagnostics = Diagnostics::new();
        let params = bpb::BootParameters::new(
            tables::HP150_SECTOR_SIZE,
            tables::HP150_SECTORS_PER_CLUSTER,
            (tables::HP150_FAT_START / tables::HP150_SECTOR_SIZE as usize) as u16,
            tables::HP150_FAT_COPIES,
            (tables::HP150_FAT_SIZE / tables::HP150_SECTOR_SIZE as usize) as u32,
            tables::HP150_DIR_ENTRIES as u16
        );
        let (offset,method) = match directory::locate_hp150_root(&img) {
            Some((offset,count)) => {
                debug!("HP-150 directory at {:#x} with {} entries",offset,count);
                (offset,RootMethod::Alternate)
            },
            None => {
                diagnostics.warn(Kind::DirectoryNotFound,"no HP-150 directory found, using the first known offset");
                (tables::HP150_DIR_OFFSETS[0],RootMethod::Fallback)
            }
        };
        let layout = Layout {
            params,
            source: "HP-150 layout".to_string(),
            fat_start: tables::HP150_FAT_START,
            fat_size: tables::HP150_FAT_SIZE,
            // the second copy would run into a directory at 0x700
            fat_copies_written: 1,
            data_start: tables::hp150_data_start(offset),
            cluster_size: params.cluster_size(),
            width: FatWidth::Fat12
        };
        let dir = directory::load(&img,offset,tables::HP150_DIR_ENTRIES,method,Dialect::Hp150,&mut diagnostics);
        let fat = load_fat(&img,&layout);
        Ok(Self { img, dialect: Dialect::Hp150, layout, fat, dir, diagnostics })
    }
    pub fn layout(&self) -> &Layout {
        &self.layout
    }
    pub fn root_dir(&self) -> &Directory {
        &self.dir
    }
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
    fn cluster_offset(&self,c: Cluster) -> usize {
        self.layout.data_start + c.data_index() * self.layout.cluster_size
    }
    /// count of clusters that fit in the data region
    fn data_clusters(&self) -> usize {
        self.img.len().saturating_sub(self.layout.data_start) / self.layout.cluster_size
    }
    /// Every cluster reachable from a directory entry
    fn referenced(&self) -> HashSet<Cluster> {
        let mut ans = HashSet::new();
        for f in &self.dir.files {
            if let Some(start) = Cluster::new(f.start) {
                ans.extend(self.fat.chain(start).clusters);
            }
        }
        ans
    }
    /// Free clusters in ascending order, skipping anything a chain refers to
    fn free_clusters(&self) -> Vec<Cluster> {
        let limit = self.fat.len().min(self.data_clusters() + 2);
        let used = self.referenced();
        self.fat.clusters()
            .take_while(|c| (c.value() as usize) < limit)
            .filter(|c| self.fat.is_free(*c) && !used.contains(c))
            .collect()
    }
    /// Copy `dat` into the clusters, the last cluster is padded with zeros
    fn write_clusters(&mut self,clusters: &[Cluster],dat: &[u8],pad: bool) {
        let cs = self.layout.cluster_size;
        for (i,c) in clusters.iter().enumerate() {
            let off = self.cluster_offset(*c);
            let beg = (i*cs).min(dat.len());
            let end = ((i+1)*cs).min(dat.len());
            self.img[off..off+end-beg].copy_from_slice(&dat[beg..end]);
            if pad {
                self.img[off+end-beg..off+cs].fill(0);
            }
        }
    }
    fn clusters_in_image(&self,clusters: &[Cluster]) -> bool {
        clusters.iter().all(|c| self.cluster_offset(*c) + self.layout.cluster_size <= self.img.len())
    }
    fn writeback_fat(&mut self) {
        let buf = self.fat.to_bytes();
        for copy in 0..self.layout.fat_copies_written {
            let off = self.layout.fat_start + copy * self.layout.fat_size;
            let end = (off + buf.len()).min(self.img.len());
            if off >= end {
                break;
            }
            self.img[off..end].copy_from_slice(&buf[0..end-off]);
        }
    }
    /// Re-read the directory after a change, diagnostics from the first read are kept
    fn reload(&mut self) {
        let mut scratch = Diagnostics::new();
        self.dir = directory::load(&self.img,self.dir.offset,self.dir.slots,self.dir.method,self.dialect,&mut scratch);
    }
    fn overwrite(&mut self,entry: &FileEntry,dat: &[u8]) -> Result<usize,DYNERR> {
        let chain = match Cluster::new(entry.start) {
            Some(c) => self.fat.chain(c).clusters,
            None => Vec::new()
        };
        let cs = self.layout.cluster_size;
        let needed = dat.len().div_ceil(cs);
        if dat.len() > chain.len() * cs || !self.clusters_in_image(&chain[0..needed]) {
            error!("{} bytes will not fit in the {} clusters of {}",dat.len(),chain.len(),entry.full_name());
            return Err(Box::new(Error::FileTooLarge));
        }
        self.write_clusters(&chain[0..needed],dat,false);
        let off = entry.entry_offset;
        self.img[off+22..off+24].copy_from_slice(&pack::pack_time(None));
        self.img[off+24..off+26].copy_from_slice(&pack::pack_date(None));
        self.img[off+28..off+32].copy_from_slice(&(dat.len() as u32).to_le_bytes());
        self.reload();
        Ok(dat.len())
    }
    /// Create a new file in the root directory
    pub fn create_file(&mut self,name: &str,dat: &[u8]) -> Result<usize,DYNERR> {
        if self.dir.files.iter().any(|f| f.matches(name)) {
            error!("{} already exists",name);
            return Err(Box::new(Error::DuplicateFile));
        }
        if !pack::is_name_valid(name) {
            error!("{} is not a valid file name",name);
            return Err(Box::new(Error::InvalidName));
        }
        let needed = usize::max(1,dat.len().div_ceil(self.layout.cluster_size));
        let free = self.free_clusters();
        if free.len() < needed {
            error!("need {} clusters, {} are free",needed,free.len());
            return Err(Box::new(Error::NoFreeSpace));
        }
        let slot = match directory::free_slot(&self.img,&self.dir) {
            Some(s) => s,
            None => {
                error!("directory is full");
                return Err(Box::new(Error::NoFreeDirectoryEntry));
            }
        };
        let clusters = free[0..needed].to_vec();
        debug!("{} gets clusters starting at {}",name,clusters[0]);
        self.write_clusters(&clusters,dat,true);
        self.fat.link_chain(&clusters);
        let entry = directory::create_entry(name,attr::ARCHIVE,clusters[0].value(),dat.len(),None);
        self.img[slot..slot+directory::DIR_ENTRY_SIZE].copy_from_slice(&entry);
        self.writeback_fat();
        self.reload();
        Ok(dat.len())
    }
}

impl DiskFS for Disk {
    fn fs_name(&self) -> &'static str {
        match self.dialect {
            Dialect::Standard => FS_NAME,
            Dialect::Hp150 => HP150_FS_NAME
        }
    }
    fn list_files(&self) -> Vec<FileEntry> {
        self.dir.files.clone()
    }
    fn read_entry(&mut self,entry: &FileEntry) -> Result<FileData,DYNERR> {
        let mut data: Vec<u8> = Vec::new();
        if entry.size==0 {
            return Ok(FileData { data, truncated: false });
        }
        let start = match Cluster::new(entry.start) {
            Some(c) => c,
            None => {
                self.diagnostics.warn(Kind::ClusterChainBroken,&format!("{} has no start cluster",entry.full_name()));
                return Ok(FileData { data, truncated: true });
            }
        };
        let cs = self.layout.cluster_size;
        let chain = self.fat.walk(start,|n| n*cs < entry.size);
        let mut damaged = chain.end.is_damage();
        for c in &chain.clusters {
            let off = self.cluster_offset(*c);
            if off >= self.img.len() {
                self.diagnostics.warn(Kind::ClusterChainOutOfRange,&format!("cluster {} of {} is beyond the image",c,entry.full_name()));
                damaged = true;
                break;
            }
            let remaining = entry.size - data.len();
            let end = usize::min(off + usize::min(cs,remaining),self.img.len());
            data.extend_from_slice(&self.img[off..end]);
        }
        let msg = format!("{}: {}",entry.full_name(),chain.end);
        match chain.end {
            ChainEnd::Cycle(_) => self.diagnostics.warn(Kind::ClusterChainCycle,&msg),
            ChainEnd::OutOfRange(_) => self.diagnostics.warn(Kind::ClusterChainOutOfRange,&msg),
            ChainEnd::Broken(_) | ChainEnd::Bad => self.diagnostics.warn(Kind::ClusterChainBroken,&msg),
            ChainEnd::Limit => self.diagnostics.warn(Kind::ClusterChainLimit,&msg),
            ChainEnd::Eoc | ChainEnd::Enough => {}
        }
        let truncated = damaged || data.len() < entry.size;
        if truncated {
            info!("{} truncated at {} of {} bytes",entry.full_name(),data.len(),entry.size);
        }
        Ok(FileData { data, truncated })
    }
    fn write_file(&mut self,name: &str,dat: &[u8]) -> Result<usize,DYNERR> {
        match self.dir.files.iter().find(|f| f.matches(name)).cloned() {
            Some(entry) => self.overwrite(&entry,dat),
            None => self.create_file(name,dat)
        }
    }
    fn delete_file(&mut self,name: &str) -> STDRESULT {
        let entry = self.find(name)?;
        if let Some(start) = Cluster::new(entry.start) {
            let count = self.fat.free_chain(start);
            debug!("freed {} clusters of {}",count,entry.full_name());
        }
        self.img[entry.entry_offset] = directory::FREE;
        self.writeback_fat();
        self.reload();
        Ok(())
    }
    fn disk_usage(&self) -> DiskUsage {
        let total = self.img.len();
        let free = self.free_clusters().len() * self.layout.cluster_size;
        DiskUsage {
            total,
            used: total.saturating_sub(free),
            free,
            unit: self.layout.cluster_size
        }
    }
    fn volume_label(&self) -> Option<String> {
        self.dir.label.clone()
    }
    fn catalog_to_stdout(&mut self,pattern: &str) -> STDRESULT {
        display::dir(self.dir.label.as_deref(),&self.list_visible_files(),pattern,self.disk_usage().free)
    }
    fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
    fn layout_json(&self) -> json::JsonValue {
        json::object! {
            fs: self.fs_name(),
            bpb: self.layout.params.to_json(),
            bpb_source: self.layout.source.clone(),
            fat_width: self.layout.width.to_string(),
            fat_start: self.layout.fat_start,
            fat_size: self.layout.fat_size,
            root_dir: self.dir.offset,
            root_method: format!("{:?}",self.dir.method).to_lowercase(),
            root_slots: self.dir.slots,
            data_start: self.layout.data_start,
            cluster_size: self.layout.cluster_size
        }
    }
    fn to_bytes(&self) -> Vec<u8> {
        self.img.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: usize = 0xa00;
    const DATA: usize = 0x1800;

    fn put_entry(img: &mut [u8],slot: usize,name: &[u8;11],attributes: u8,cluster: u16,size: u32) {
        let off = ROOT + slot*32;
        img[off..off+11].copy_from_slice(name);
        img[off+11] = attributes;
        img[off+26..off+28].copy_from_slice(&cluster.to_le_bytes());
        img[off+28..off+32].copy_from_slice(&size.to_le_bytes());
    }

    /// 360K, 512 byte sectors, 2 sectors per cluster, 2 FATs of 2 sectors, 112 root entries
    fn std_image(fat: &[u8]) -> Vec<u8> {
        let mut img = vec![0;368640];
        img[0..3].copy_from_slice(&[0xeb,0x3c,0x90]);
        img[3..11].copy_from_slice(b"MSDOS3.3");
        img[11..13].copy_from_slice(&512u16.to_le_bytes());
        img[13] = 2;
        img[14..16].copy_from_slice(&1u16.to_le_bytes());
        img[16] = 2;
        img[17..19].copy_from_slice(&112u16.to_le_bytes());
        img[22..24].copy_from_slice(&2u16.to_le_bytes());
        img[510..512].copy_from_slice(&[0x55,0xaa]);
        for copy in 0..2 {
            let off = 0x200 + copy*0x400;
            img[off..off+fat.len()].copy_from_slice(fat);
        }
        put_entry(&mut img,0,b"README  TXT",attr::ARCHIVE,2,2048);
        put_entry(&mut img,1,b"DATA    BIN",attr::ARCHIVE,4,100);
        img[DATA..DATA+1024].fill(b'A');
        img[DATA+1024..DATA+2048].fill(b'B');
        img[DATA+2048..DATA+2148].fill(b'C');
        img
    }

    // 2 -> 3 -> EOC, 4 -> EOC
    const GOOD_FAT: [u8;9] = [0xf9,0xff,0xff,0x03,0xf0,0xff,0xff,0x0f,0x00];
    // 2 -> 3 -> 2, 4 -> EOC
    const CYCLE_FAT: [u8;9] = [0xf9,0xff,0xff,0x03,0x20,0x00,0xff,0x0f,0x00];

    #[test]
    fn chain_read() {
        let mut disk = Disk::open(std_image(&GOOD_FAT)).unwrap();
        assert_eq!(disk.root_dir().offset,ROOT);
        assert_eq!(disk.root_dir().method,RootMethod::Calculated);
        assert_eq!(disk.layout().data_start,DATA);
        let f = disk.read_file("readme.txt").unwrap();
        assert!(!f.truncated);
        assert_eq!(f.data.len(),2048);
        assert_eq!(f.data[1023],b'A');
        assert_eq!(f.data[1024],b'B');
        let f = disk.read_file("DATA.BIN").unwrap();
        assert_eq!(f.data,vec![b'C';100]);
        assert!(disk.diagnostics().is_empty());
    }

    #[test]
    fn cycle_truncates() {
        let mut img = std_image(&CYCLE_FAT);
        put_entry(&mut img,0,b"README  TXT",attr::ARCHIVE,2,4096);
        let mut disk = Disk::open(img).unwrap();
        let f = disk.read_file("README.TXT").unwrap();
        assert!(f.truncated);
        assert_eq!(f.data.len(),2048);
        assert!(disk.diagnostics().has(Kind::ClusterChainCycle));
    }

    #[test]
    fn overwrite_in_place() {
        let mut disk = Disk::open(std_image(&GOOD_FAT)).unwrap();
        assert!(disk.write_file("README.TXT",&vec![1;3000]).is_err());
        assert_eq!(disk.write_file("README.TXT",&vec![1;1500]).unwrap(),1500);
        let f = disk.read_file("README.TXT").unwrap();
        assert_eq!(f.data,vec![1;1500]);
        assert_eq!(disk.find("README.TXT").unwrap().size,1500);
    }

    #[test]
    fn create_and_delete() {
        let mut disk = Disk::open(std_image(&GOOD_FAT)).unwrap();
        let free_before = disk.disk_usage().free;
        assert_eq!(disk.write_file("new.txt",&vec![7;1500]).unwrap(),1500);
        let entry = disk.find("NEW.TXT").unwrap();
        assert_eq!(entry.start,5);
        assert_eq!(entry.entry_offset,ROOT + 64);
        assert_eq!(disk.read_file("NEW.TXT").unwrap().data,vec![7;1500]);
        assert_eq!(disk.disk_usage().free,free_before - 2048);
        // both copies of the FAT were updated
        let img = disk.to_bytes();
        assert_eq!(img[0x200..0x200+12],img[0x600..0x600+12]);
        assert!(disk.create_file("README.TXT",&[0]).is_err());
        assert!(disk.create_file("BAD*NAME",&[0]).is_err());
        disk.delete_file("README.TXT").unwrap();
        assert_eq!(disk.to_bytes()[ROOT],directory::FREE);
        assert_eq!(disk.list_files().len(),2);
        assert_eq!(disk.disk_usage().free,free_before);
    }

    #[test]
    fn hp150_layout() {
        let mut img = vec![0;270336];
        img[0x200..0x209].copy_from_slice(&[0xfe,0xff,0xff,0xff,0x0f,0x00,0x00,0x00,0x00]);
        let entries: [(&[u8;11],u8,u16,u32);3] = [
            (b"HPSYS      ",attr::HIDDEN|attr::SYSTEM,0,0),
            (b"VC      COM",attr::ARCHIVE,2,300),
            (b"AUTOST  BAT",attr::ARCHIVE,3,10)
        ];
        for (i,(name,a,c,s)) in entries.iter().enumerate() {
            let off = 0x700 + i*32;
            img[off..off+11].copy_from_slice(*name);
            img[off+11] = *a;
            img[off+26..off+28].copy_from_slice(&c.to_le_bytes());
            img[off+28..off+32].copy_from_slice(&s.to_le_bytes());
        }
        img[0x1000..0x1000+300].fill(0x42);
        let mut disk = Disk::open_hp150(img).unwrap();
        assert_eq!(disk.fs_name(),"fat_hp150");
        assert_eq!(disk.layout().data_start,0x1000);
        assert_eq!(disk.list_files().len(),3);
        let visible = disk.list_visible_files();
        assert_eq!(visible.len(),2);
        assert_eq!(visible[0].full_name(),"VC.COM");
        assert_eq!(disk.read_file("VC.COM").unwrap().data,vec![0x42;300]);
    }
}
