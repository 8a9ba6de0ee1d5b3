//! ## CP/M file system module
//!
//! CP/M encompasses a broad space of computer hardware and disk formats.
//! Generally, when we are handed a recovered disk image, we are not given the disk
//! parameter block, and the boot tracks are of unknown length.  So the directory is
//! found by probing a table of track boundaries, and the layout defaults to the
//! Osborne-1: 1024 byte sectors, 5 sectors per track, 1024 byte blocks, and a
//! directory of 2 tracks.
//!
//! The key concept of the CP/M directory is the "extent," which is a subset of a file's data.
//! Extents of the same file are merged when the directory is loaded, see
//! `directory::merge_extents`.
//!
//! This module only reads.  Writing and deleting are refused.

pub mod directory;
mod display;

use std::collections::HashSet;
use log::{debug,error,info};
use directory::{CpmFileInfo,Probe};
use crate::diag::{Diagnostics,Kind};
use crate::fs::{DiskFS,DiskUsage,FileData,FileEntry,Error,attr};
use crate::{DYNERR,STDRESULT};

pub const FS_NAME: &str = "cpm";

/// Osborne-1 style layout parameters
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub struct Layout {
    pub sector_size: usize,
    pub sectors_per_track: usize,
    pub block_size: usize,
    pub directory_tracks: usize
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            sector_size: 1024,
            sectors_per_track: 5,
            block_size: 1024,
            directory_tracks: 2
        }
    }
}

impl Layout {
    pub fn track_size(&self) -> usize {
        self.sector_size * self.sectors_per_track
    }
    /// Data begins on the track boundary `directory_tracks` past the one holding the directory
    pub fn data_start(&self,dir_offset: usize) -> usize {
        (dir_offset / self.track_size() + self.directory_tracks) * self.track_size()
    }
}

/// The primary interface for disk operations.
pub struct Disk {
    img: Vec<u8>,
    layout: Layout,
    dir_offset: Option<usize>,
    files: Vec<CpmFileInfo>,
    diagnostics: Diagnostics
}

impl Disk {
    /// Open the image as CP/M.  The DiskFS takes ownership of the image.
    /// If no directory is found the disk opens with no files and a diagnostic.
    pub fn open(img: Vec<u8>) -> Result<Self,DYNERR> {
        let mut diagnostics = Diagnostics::new();
        let dir_offset = directory::locate(&img,Probe::Strict);
        let files = match dir_offset {
            Some(off) => {
                debug!("CP/M directory at {:#x}",off);
                directory::merge_extents(&directory::parse_entries(&img,off))
            },
            None => {
                diagnostics.warn(Kind::DirectoryNotFound,"could not locate CP/M directory");
                Vec::new()
            }
        };
        Ok(Self { img, layout: Layout::default(), dir_offset, files, diagnostics })
    }
    pub fn directory_offset(&self) -> Option<usize> {
        self.dir_offset
    }
    /// merged files in directory order
    pub fn files(&self) -> &[CpmFileInfo] {
        &self.files
    }
    fn data_start(&self) -> Option<usize> {
        self.dir_offset.map(|off| self.layout.data_start(off))
    }
    /// Copy out the blocks of `finfo`, stopping at the file size
    pub fn extract(&mut self,finfo: &CpmFileInfo) -> FileData {
        let mut data: Vec<u8> = Vec::new();
        let data_start = match self.data_start() {
            Some(s) => s,
            None => return FileData { data, truncated: finfo.size > 0 }
        };
        let bs = self.layout.block_size;
        for block in &finfo.blocks {
            if data.len() >= finfo.size {
                break;
            }
            let off = data_start + *block as usize * bs;
            if off >= self.img.len() {
                self.diagnostics.warn(Kind::ClusterChainOutOfRange,&format!("block {} of {} is beyond the image",block,finfo.full_name()));
                break;
            }
            let n = usize::min(bs,finfo.size - data.len());
            let end = usize::min(off + n,self.img.len());
            data.extend_from_slice(&self.img[off..end]);
        }
        let truncated = data.len() < finfo.size;
        if truncated {
            info!("{} truncated at {} of {} bytes",finfo.full_name(),data.len(),finfo.size);
        }
        FileData { data, truncated }
    }
}

fn to_entry(f: &CpmFileInfo) -> FileEntry {
    let mut attributes = attr::ARCHIVE;
    if f.read_only {
        attributes |= attr::READ_ONLY;
    }
    if f.system {
        attributes |= attr::SYSTEM;
    }
    FileEntry {
        name: f.name.clone(),
        ext: f.ext.clone(),
        attributes,
        start: f.blocks.first().copied().unwrap_or(0) as u32,
        size: f.size,
        entry_offset: f.offset,
        user: Some(f.user),
        modified: None,
        system_file: false
    }
}

impl DiskFS for Disk {
    fn fs_name(&self) -> &'static str {
        FS_NAME
    }
    fn list_files(&self) -> Vec<FileEntry> {
        self.files.iter().map(to_entry).collect()
    }
    fn read_entry(&mut self,entry: &FileEntry) -> Result<FileData,DYNERR> {
        let finfo = match self.files.iter().find(|f| f.offset==entry.entry_offset) {
            Some(f) => f.clone(),
            None => {
                error!("{} is not in the directory",entry.full_name());
                return Err(Box::new(Error::FileNotFound));
            }
        };
        Ok(self.extract(&finfo))
    }
    fn write_file(&mut self,_name: &str,_dat: &[u8]) -> Result<usize,DYNERR> {
        error!("CP/M images are read only");
        Err(Box::new(Error::Unsupported))
    }
    fn delete_file(&mut self,_name: &str) -> STDRESULT {
        error!("CP/M images are read only");
        Err(Box::new(Error::Unsupported))
    }
    fn disk_usage(&self) -> DiskUsage {
        let total = self.img.len();
        let used = match self.data_start() {
            Some(start) => {
                let blocks: HashSet<u8> = self.files.iter().flat_map(|f| f.blocks.iter().copied()).collect();
                usize::min(total,start + blocks.len() * self.layout.block_size)
            },
            None => total
        };
        DiskUsage { total, used, free: total - used, unit: self.layout.block_size }
    }
    fn catalog_to_stdout(&mut self,pattern: &str) -> STDRESULT {
        display::dir(&self.files,pattern)
    }
    fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
    fn layout_json(&self) -> json::JsonValue {
        let mut ans = json::object! {
            fs: FS_NAME,
            sector_size: self.layout.sector_size,
            sectors_per_track: self.layout.sectors_per_track,
            block_size: self.layout.block_size,
            directory_tracks: self.layout.directory_tracks,
            files: self.files.len()
        };
        if let (Some(off),Some(start)) = (self.dir_offset,self.data_start()) {
            ans["directory"] = off.into();
            ans["data_start"] = start.into();
        }
        ans
    }
    fn to_bytes(&self) -> Vec<u8> {
        self.img.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIR: usize = 0x3c00;

    fn put_entry(img: &mut [u8],slot: usize,user: u8,name: &[u8;11],extent: u8,records: u8,blocks: &[u8]) {
        let off = DIR + slot*32;
        img[off] = user;
        img[off+1..off+12].copy_from_slice(name);
        img[off+12] = extent;
        img[off+13..off+32].fill(0);
        img[off+15] = records;
        img[off+16..off+16+blocks.len()].copy_from_slice(blocks);
    }

    fn osborne() -> Vec<u8> {
        let mut img = vec![0xe5;204800];
        img[DIR..DIR+2048].fill(0xe5);
        put_entry(&mut img,0,0,b"README  TXT",0,3,&[2]);
        put_entry(&mut img,1,0,b"WS      COM",0,16,&[3,4]);
        // data starts 2 tracks past the directory track, 0x3c00/5120 = 3, so 5*5120
        let data = 5*5120;
        img[data+2048..data+2048+384].fill(b'r');
        img[data+3072..data+5120].fill(b'w');
        img
    }

    #[test]
    fn open_and_extract() {
        let mut disk = Disk::open(osborne()).unwrap();
        assert_eq!(disk.directory_offset(),Some(DIR));
        let files = disk.list_files();
        assert_eq!(files.len(),2);
        assert_eq!(files[0].user,Some(0));
        let f = disk.read_file("readme.txt").unwrap();
        assert_eq!(f.data,vec![b'r';384]);
        assert!(!f.truncated);
        let f = disk.read_file("WS.COM").unwrap();
        assert_eq!(f.data.len(),2048);
        assert!(disk.write_file("NEW.TXT",&[0]).is_err());
        assert!(disk.delete_file("WS.COM").is_err());
    }

    #[test]
    fn usage() {
        let disk = Disk::open(osborne()).unwrap();
        let usage = disk.disk_usage();
        assert_eq!(usage.used,5*5120 + 3*1024);
        assert_eq!(usage.used + usage.free,204800);
    }

    #[test]
    fn no_directory() {
        let disk = Disk::open(vec![0;204800]).unwrap();
        assert!(disk.list_files().is_empty());
        assert!(disk.diagnostics().has(Kind::DirectoryNotFound));
    }
}
