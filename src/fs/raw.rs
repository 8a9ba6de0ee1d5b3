//! ## Raw fallback
//!
//! When no file system is recognized the image is opened as `raw`.  There are no files,
//! instead the image can be inspected through a set of analysis products, each of which
//! is a named byte buffer that the caller can print or save.

use std::fmt::Write;
use log::error;
use crate::diag::{Diagnostics,Kind};
use crate::fs::{DiskFS,DiskUsage,FileData,FileEntry,Error};
use crate::{DYNERR,STDRESULT};

pub const FS_NAME: &str = "raw";
const HEX_DUMP_LEN: usize = 8192;
const BOOT_SECTOR_LEN: usize = 512;
const MIN_STRING_LEN: usize = 4;
const ANALYSIS_SECTORS: usize = 8;
const GEOMETRY_SECTOR_SIZES: [usize;4] = [128,256,512,1024];
const GEOMETRY_HEADS: [usize;2] = [1,2];
const GEOMETRY_SECTORS: [usize;8] = [5,8,9,10,15,16,18,26];
const MAX_TRACKS: usize = 100;

pub struct Disk {
    img: Vec<u8>,
    diagnostics: Diagnostics
}

fn is_printable(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

/// Hex dump with 16 bytes per line, offset and ASCII columns
pub fn hex_dump(buf: &[u8]) -> String {
    let mut ans = String::new();
    for (i,chunk) in buf.chunks(16).enumerate() {
        let hex = chunk.iter().map(|b| format!("{:02X}",b)).collect::<Vec<String>>().join(" ");
        let txt: String = chunk.iter().map(|b| match is_printable(*b) { true => *b as char, false => '.' }).collect();
        let _ = writeln!(ans,"{:08X}: {:<48} |{}|",i*16,hex,txt);
    }
    ans
}

/// Runs of at least 4 printable characters, one per line with the offset
pub fn ascii_strings(buf: &[u8]) -> String {
    let mut ans = String::new();
    let mut start = 0;
    let mut curr = String::new();
    for (i,b) in buf.iter().enumerate() {
        if is_printable(*b) {
            if curr.is_empty() {
                start = i;
            }
            curr.push(*b as char);
        } else {
            if curr.len() >= MIN_STRING_LEN {
                let _ = writeln!(ans,"{:08X}: {}",start,curr);
            }
            curr.clear();
        }
    }
    if curr.len() >= MIN_STRING_LEN {
        let _ = writeln!(ans,"{:08X}: {}",start,curr);
    }
    ans
}

/// (cylinders,heads,sectors,sector size) layouts that exactly fill `size` bytes
pub fn potential_geometries(size: usize) -> Vec<(usize,usize,usize,usize)> {
    let mut ans = Vec::new();
    for bps in GEOMETRY_SECTOR_SIZES {
        let sectors = size / bps;
        for heads in GEOMETRY_HEADS {
            for spt in GEOMETRY_SECTORS {
                if sectors % (heads*spt) == 0 {
                    let tracks = sectors / (heads*spt);
                    if tracks <= MAX_TRACKS {
                        ans.push((tracks,heads,spt,bps));
                    }
                }
            }
        }
    }
    ans
}

/// Label describing the content of one sector
pub fn sector_label(sec: &[u8]) -> String {
    let zero = sec.iter().filter(|b| **b==0).count();
    let ff = sec.iter().filter(|b| **b==0xff).count();
    let text = sec.iter().filter(|b| is_printable(**b)).count();
    let mut ans = match (zero,ff) {
        (z,_) if z==sec.len() => "[EMPTY]".to_string(),
        (_,f) if f==sec.len() => "[ERASED]".to_string(),
        (z,_) if z*5 > sec.len()*4 => "[MOSTLY EMPTY]".to_string(),
        _ => "[DATA]".to_string()
    };
    if text*10 > sec.len()*3 {
        ans += " [TEXT?]";
    }
    ans
}

/// Report of potential geometries and the content of the first few sectors
pub fn sector_analysis(img: &[u8]) -> String {
    let mut ans = String::new();
    let _ = writeln!(ans,"Disk Image Sector Analysis");
    let _ = writeln!(ans);
    let _ = writeln!(ans,"File size: {} bytes",img.len());
    let _ = writeln!(ans,"Potential geometries:");
    for bps in GEOMETRY_SECTOR_SIZES {
        let _ = writeln!(ans,"  {} bytes/sector: {} sectors",bps,img.len()/bps);
        for (c,h,s,_) in potential_geometries(img.len()).iter().filter(|g| g.3==bps) {
            let _ = writeln!(ans,"    -> {}C/{}H/{}S",c,h,s);
        }
    }
    let _ = writeln!(ans);
    let _ = writeln!(ans,"Sector Analysis:");
    for bps in [512,1024] {
        let _ = writeln!(ans);
        let _ = writeln!(ans,"Using {}-byte sectors:",bps);
        for (i,sec) in img.chunks_exact(bps).take(ANALYSIS_SECTORS).enumerate() {
            let zero = sec.iter().filter(|b| **b==0).count();
            let ff = sec.iter().filter(|b| **b==0xff).count();
            let _ = writeln!(ans,"  Sector {}: Zero={} FF={} {}",i,zero,ff,sector_label(sec));
        }
    }
    ans
}

impl Disk {
    pub fn open(img: Vec<u8>) -> Self {
        let mut diagnostics = Diagnostics::new();
        diagnostics.note(Kind::Info,"no file system recognized, raw analysis only");
        Self { img, diagnostics }
    }
    /// Named analysis products, in the order they should be presented
    pub fn analysis(&self) -> Vec<(String,Vec<u8>)> {
        let mut ans = vec![
            ("first_sectors.hex".to_string(),hex_dump(&self.img[0..self.img.len().min(HEX_DUMP_LEN)]).into_bytes())
        ];
        if self.img.len() >= BOOT_SECTOR_LEN {
            ans.push(("boot_sector.bin".to_string(),self.img[0..BOOT_SECTOR_LEN].to_vec()));
        }
        ans.push(("ascii_dump.txt".to_string(),ascii_strings(&self.img).into_bytes()));
        ans.push(("sector_analysis.txt".to_string(),sector_analysis(&self.img).into_bytes()));
        ans
    }
}

impl DiskFS for Disk {
    fn fs_name(&self) -> &'static str {
        FS_NAME
    }
    fn list_files(&self) -> Vec<FileEntry> {
        Vec::new()
    }
    fn read_entry(&mut self,entry: &FileEntry) -> Result<FileData,DYNERR> {
        error!("{} not found, raw images have no files",entry.full_name());
        Err(Box::new(Error::FileNotFound))
    }
    fn write_file(&mut self,_name: &str,_dat: &[u8]) -> Result<usize,DYNERR> {
        error!("cannot write files to an unrecognized image");
        Err(Box::new(Error::Unsupported))
    }
    fn delete_file(&mut self,_name: &str) -> STDRESULT {
        error!("cannot delete files from an unrecognized image");
        Err(Box::new(Error::Unsupported))
    }
    fn disk_usage(&self) -> DiskUsage {
        DiskUsage { total: self.img.len(), used: self.img.len(), free: 0, unit: BOOT_SECTOR_LEN }
    }
    fn catalog_to_stdout(&mut self,_pattern: &str) -> STDRESULT {
        println!();
        println!("Unknown format, {} bytes",self.img.len());
        println!("use `extract` to produce the raw analysis");
        println!();
        Ok(())
    }
    fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
    fn layout_json(&self) -> json::JsonValue {
        json::object! {
            fs: FS_NAME,
            size: self.img.len()
        }
    }
    fn to_bytes(&self) -> Vec<u8> {
        self.img.clone()
    }
}
