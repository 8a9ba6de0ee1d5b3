//! ## BIOS Parameter Block Module
//!
//! This contains the handful of BPB fields needed to lay out a FAT volume.
//! Field offsets follow Microsoft Hardware White Paper,
//! "FAT: General Overview of On-Disk Format," Dec. 6, 2000.
//!
//! Damaged or non-standard disks often carry no usable BPB, so acquisition is an explicit
//! chain of fallbacks: the boot sector, an alternate BPB location, a table of known floppy
//! sizes, a scored search over plausible layouts, and finally a guess keyed on the image size.
//! Each step is a function returning `Option<Acquired>`, see `acquire`.

use std::fmt;
use log::{debug,trace};
use super::tables;
use super::select;
use super::fat::FatWidth;
use crate::diag::{Diagnostics,Kind};

pub const BOOT_SIGNATURE: [u8;2] = [0x55,0xaa];
/// Where some HP-150 tooling leaves a copy of the BPB
pub const ALT_BPB_OFFSET: usize = 0x100;
/// Root directory location that goes with a BPB found at `ALT_BPB_OFFSET`
pub const ALT_ROOT_HINT: usize = 0x1100;
const BPB_END: usize = 36;
const VALID_SECTOR_SIZES: [u16;5] = [256,512,1024,2048,4096];

/// The layout parameters of a FAT volume.
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub struct BootParameters {
    /// 256, 512, 1024, 2048, or 4096
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    /// usually 2
    pub fat_copies: u8,
    /// count of sectors occupied by one FAT
    pub sectors_per_fat: u32,
    /// directory entries in the root directory
    pub root_entries: u16
}

/// Which link of the acquisition chain produced the parameters
#[derive(Clone,Debug,PartialEq)]
pub enum Source {
    /// parsed from the boot sector or the alternate location, value is the offset
    BootSector(usize),
    /// matched the image size against the known size table
    KnownSize(&'static str),
    /// first layout candidate whose FAT region looks plausible
    Scored,
    /// guessed from the size bracket
    Bracket(&'static str)
}

/// Boot parameters together with how they were found
#[derive(Clone,Debug)]
pub struct Acquired {
    pub params: BootParameters,
    pub source: Source,
    /// root directory location suggested by the acquisition step
    pub root_hint: Option<usize>
}

impl fmt::Display for Source {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BootSector(0) => write!(f,"boot sector"),
            Self::BootSector(off) => write!(f,"BPB at offset {:#x}",off),
            Self::KnownSize(name) => write!(f,"known size {}",name),
            Self::Scored => write!(f,"layout search"),
            Self::Bracket(name) => write!(f,"size heuristic, {}",name)
        }
    }
}

impl BootParameters {
    /// Arguments in the order they are usually tabulated: sector size, sectors per cluster,
    /// reserved sectors, FAT copies, sectors per FAT, root entries.
    pub const fn new(bps: u16,spc: u8,res: u16,fats: u8,fat_secs: u32,root: u16) -> Self {
        Self {
            bytes_per_sector: bps,
            sectors_per_cluster: spc,
            reserved_sectors: res,
            fat_copies: fats,
            sectors_per_fat: fat_secs,
            root_entries: root
        }
    }
    /// Read the BPB fields of a boot sector that starts at `offset`.
    /// Returns `None` if the buffer is too short, the result is not verified.
    pub fn from_bytes(buf: &[u8],offset: usize) -> Option<Self> {
        let bpb = buf.get(offset..offset+BPB_END)?;
        let fat16 = u16::from_le_bytes([bpb[22],bpb[23]]) as u32;
        let fat_secs = match fat16 {
            0 => match buf.get(offset+BPB_END..offset+BPB_END+4) {
                Some(x) => u32::from_le_bytes([x[0],x[1],x[2],x[3]]),
                None => 0
            },
            n => n
        };
        Some(Self {
            bytes_per_sector: u16::from_le_bytes([bpb[11],bpb[12]]),
            sectors_per_cluster: bpb[13],
            reserved_sectors: u16::from_le_bytes([bpb[14],bpb[15]]),
            fat_copies: bpb[16],
            sectors_per_fat: fat_secs,
            root_entries: u16::from_le_bytes([bpb[17],bpb[18]])
        })
    }
    /// Reject parameters that cannot describe a volume.
    pub fn verify(&self) -> bool {
        let mut ans = true;
        if !VALID_SECTOR_SIZES.contains(&self.bytes_per_sector) {
            debug!("invalid bytes per sector {}",self.bytes_per_sector);
            ans = false;
        }
        if self.sectors_per_cluster==0 {
            debug!("invalid sectors per cluster 0");
            ans = false;
        }
        if self.fat_copies==0 {
            debug!("invalid count of FATs 0");
            ans = false;
        }
        ans
    }
    pub fn sec_size(&self) -> usize {
        self.bytes_per_sector as usize
    }
    pub fn cluster_size(&self) -> usize {
        self.sectors_per_cluster as usize * self.sec_size()
    }
    pub fn fat_start(&self) -> usize {
        self.reserved_sectors as usize * self.sec_size()
    }
    /// bytes in one copy of the FAT
    pub fn fat_size(&self) -> usize {
        self.sectors_per_fat as usize * self.sec_size()
    }
    pub fn root_dir_start(&self) -> usize {
        self.fat_start() + self.fat_copies as usize * self.fat_size()
    }
    pub fn root_dir_size(&self) -> usize {
        self.root_entries as usize * 32
    }
    pub fn data_start(&self) -> usize {
        self.root_dir_start() + self.root_dir_size()
    }
    /// Count of data clusters that fit in an image of `image_size` bytes
    pub fn data_clusters(&self,image_size: usize) -> usize {
        match self.cluster_size() {
            0 => 0,
            cs => image_size.saturating_sub(self.data_start()) / cs
        }
    }
    /// FAT entry width implied by the cluster count
    pub fn fat_width(&self,image_size: usize) -> FatWidth {
        FatWidth::from_cluster_count(self.data_clusters(image_size))
    }
    pub fn to_json(&self) -> json::JsonValue {
        json::object! {
            bytes_per_sector: self.bytes_per_sector,
            sectors_per_cluster: self.sectors_per_cluster,
            reserved_sectors: self.reserved_sectors,
            fat_copies: self.fat_copies,
            sectors_per_fat: self.sectors_per_fat,
            root_entries: self.root_entries
        }
    }
}

fn from_boot_sector(img: &[u8],offset: usize) -> Option<Acquired> {
    let params = BootParameters::from_bytes(img,offset)?;
    trace!("BPB at {:#x}: {:?}",offset,params);
    match params.verify() {
        true => Some(Acquired {
            params,
            source: Source::BootSector(offset),
            root_hint: match offset { ALT_BPB_OFFSET => Some(ALT_ROOT_HINT), _ => None }
        }),
        false => None
    }
}

fn from_known_size(img: &[u8]) -> Option<Acquired> {
    tables::FAT_KNOWN_SIZES.iter()
        .find(|k| k.size==img.len())
        .map(|k| Acquired { params: k.params, source: Source::KnownSize(k.name), root_hint: None })
}

/// An image that is almost entirely 0x00 or 0xff at the start was never formatted.
fn is_blank(img: &[u8]) -> bool {
    let head = &img[0..img.len().min(1024)];
    let ff = head.iter().filter(|b| **b==0xff).count();
    let zero = head.iter().filter(|b| **b==0x00).count();
    ff > 800 || zero > 800
}

/// Does the FAT region implied by `params` look like the start of a FAT12.
pub fn fat_region_plausible(img: &[u8],params: &BootParameters) -> bool {
    let data_start = params.data_start();
    if data_start >= img.len() {
        return false;
    }
    let start = params.fat_start();
    let end = (start + params.fat_size().min(1024)).min(img.len());
    if end < start + 3 {
        return false;
    }
    let fat = &img[start..end];
    if fat[0..fat.len().min(100)].iter().all(|b| *b==0xff) {
        return false;
    }
    if !tables::MEDIA_DESCRIPTORS.contains(&fat[0]) && fat[0]!=0 {
        return false;
    }
    let clusters = params.data_clusters(img.len());
    clusters > 0 && params.fat_size()*8/12 >= clusters
}

fn from_scored_candidates(img: &[u8]) -> Option<Acquired> {
    if is_blank(img) {
        debug!("image looks unformatted, skipping layout search");
        return None;
    }
    let candidates = tables::scored_candidates();
    select::first_accepted(&candidates,|p| fat_region_plausible(img,p))
        .map(|p| Acquired { params: *p, source: Source::Scored, root_hint: None })
}

fn from_size_bracket(img: &[u8]) -> Acquired {
    let bracket = tables::size_bracket(img.len());
    Acquired { params: bracket.params, source: Source::Bracket(bracket.name), root_hint: None }
}

/// Acquire boot parameters for `img`, falling back as needed.  This always produces
/// something, the steps that were skipped are recorded in `diagnostics`.
pub fn acquire(img: &[u8],diagnostics: &mut Diagnostics) -> Acquired {
    if let Some(ans) = from_boot_sector(img,0) {
        return ans;
    }
    diagnostics.warn(Kind::BpbInvalid,"boot sector BPB is invalid, trying fallbacks");
    let ans = from_boot_sector(img,ALT_BPB_OFFSET)
        .or_else(|| from_known_size(img))
        .or_else(|| from_scored_candidates(img))
        .unwrap_or_else(|| from_size_bracket(img));
    diagnostics.note(Kind::BpbInvalid,&format!("using parameters from {}",ans.source));
    ans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boot_sector(bps: u16,spc: u8,res: u16,fats: u8,root: u16,fat_secs: u16) -> Vec<u8> {
        let mut ans = vec![0;512];
        ans[0..3].copy_from_slice(&[0xeb,0x3c,0x90]);
        ans[3..11].copy_from_slice(b"MSDOS3.3");
        ans[11..13].copy_from_slice(&bps.to_le_bytes());
        ans[13] = spc;
        ans[14..16].copy_from_slice(&res.to_le_bytes());
        ans[16] = fats;
        ans[17..19].copy_from_slice(&root.to_le_bytes());
        ans[22..24].copy_from_slice(&fat_secs.to_le_bytes());
        ans[510..512].copy_from_slice(&BOOT_SIGNATURE);
        ans
    }

    #[test]
    fn layout_arithmetic() {
        let p = BootParameters::new(512,2,1,2,3,112);
        assert_eq!(p.fat_start(),0x200);
        assert_eq!(p.fat_size(),0x600);
        assert_eq!(p.root_dir_start(),0xe00);
        assert_eq!(p.data_start(),0xe00 + 112*32);
        assert_eq!(p.cluster_size(),1024);
        assert_eq!(p.fat_width(368640),FatWidth::Fat12);
    }

    #[test]
    fn boot_sector_wins() {
        let mut img = boot_sector(512,2,1,2,112,2);
        img.resize(368640,0);
        let mut diag = Diagnostics::new();
        let acq = acquire(&img,&mut diag);
        assert_eq!(acq.source,Source::BootSector(0));
        assert_eq!(acq.params,BootParameters::new(512,2,1,2,2,112));
        assert!(diag.is_empty());
    }

    #[test]
    fn alternate_offset() {
        let mut img = vec![0;0x100];
        img.append(&mut boot_sector(256,4,2,2,128,3));
        img.resize(0x8000,0);
        let mut diag = Diagnostics::new();
        let acq = acquire(&img,&mut diag);
        assert_eq!(acq.source,Source::BootSector(ALT_BPB_OFFSET));
        assert_eq!(acq.root_hint,Some(ALT_ROOT_HINT));
        assert!(diag.has(Kind::BpbInvalid));
    }

    #[test]
    fn known_size_prefers_first_entry() {
        let img = vec![0;368640];
        let mut diag = Diagnostics::new();
        let acq = acquire(&img,&mut diag);
        assert_eq!(acq.params.bytes_per_sector,256);
        assert!(matches!(acq.source,Source::KnownSize(_)));
    }

    #[test]
    fn scored_then_bracket() {
        // FAT12 media byte at 256 (reserved 1 sector of 256), odd size so no table match
        let mut img = vec![0x4e;300000];
        img[0..256].fill(0);
        img[256..259].copy_from_slice(&[0xf9,0xff,0xff]);
        let mut diag = Diagnostics::new();
        let acq = acquire(&img,&mut diag);
        assert_eq!(acq.source,Source::Scored);
        assert_eq!(acq.params.fat_start(),256);
        let blank = vec![0xff;300000];
        let acq = acquire(&blank,&mut diag);
        assert!(matches!(acq.source,Source::Bracket(_)));
        assert_eq!(acq.params.bytes_per_sector,256);
    }
}
