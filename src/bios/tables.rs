//! ## Candidate Tables
//!
//! Recovery of damaged or undocumented disks leans on lists of layouts and offsets that
//! have been observed on real media.  They are collected here as plain data, so the search
//! code never hard codes a magic number and a table can be swapped without touching control flow.
//!
//! The HP-150 entries are a compatibility table reverse engineered from a handful of
//! software titles, they should not be taken as general filesystem theory.

use super::bpb::BootParameters;

/// Flat image size with its geometry
pub struct ImgSize {
    pub size: usize,
    pub cylinders: usize,
    pub heads: usize,
    pub sectors: usize,
    pub sector_size: usize,
    pub name: &'static str,
    /// true for the 256 byte sector geometries used by the HP-150
    pub hp150: bool
}

/// Image size with exact FAT parameters
pub struct FatSize {
    pub size: usize,
    pub params: BootParameters,
    pub name: &'static str
}

/// Parameters to assume when nothing else works, applies up to `max_size`
pub struct SizeBracket {
    pub max_size: usize,
    pub params: BootParameters,
    pub name: &'static str
}

/// Known directory location on HP-150 software, with the start of its data region
pub struct Hp150Layout {
    pub dir_offset: usize,
    pub data_start: usize
}

const fn img(size: usize,cylinders: usize,heads: usize,sectors: usize,sector_size: usize,name: &'static str,hp150: bool) -> ImgSize {
    ImgSize { size, cylinders, heads, sectors, sector_size, name, hp150 }
}

/// Recognized flat image sizes, searched before any arithmetic inference
pub const IMG_KNOWN_SIZES: [ImgSize;8] = [
    img(163840,40,1,16,256,"160K HP-150 single sided",true),
    img(327680,40,2,16,256,"320K HP-150 double sided",true),
    img(368640,40,2,18,256,"360K",false),
    img(655360,80,1,32,256,"640K HP-150",true),
    img(737280,80,2,18,256,"720K",false),
    img(1228800,80,2,30,256,"1.2M",false),
    img(1310720,80,2,32,256,"1.28M HP-150",true),
    img(1474560,80,2,36,256,"1.44M",false)
];

/// Sector sizes tried when inferring geometry from the image size
pub const IMG_SECTOR_SIZES: [usize;4] = [128,256,512,1024];
/// (cylinders,heads) tried when inferring geometry from the image size
pub const IMG_CYL_HEAD: [(usize,usize);6] = [(40,1),(40,2),(80,1),(80,2),(77,1),(77,2)];
pub const IMG_MAX_SECTORS: usize = 50;
/// Images at least this large get the default geometry when nothing else fits
pub const IMG_DEFAULT_MIN_SIZE: usize = 163840;
/// Images larger than this are assumed double sided by the default geometry
pub const IMG_DEFAULT_SINGLE_SIDED_MAX: usize = 500000;

/// Known FAT floppy sizes.  Order matters, the first match wins, and the 256 byte
/// sector 360K layout deliberately precedes the PC one.
pub const FAT_KNOWN_SIZES: [FatSize;8] = [
    FatSize { size: 368640, params: BootParameters::new(256,4,2,2,3,128), name: "256-byte sector 360K" },
    FatSize { size: 737280, params: BootParameters::new(512,2,1,2,3,224), name: "720K" },
    FatSize { size: 1474560, params: BootParameters::new(512,1,1,2,9,224), name: "1.44M" },
    FatSize { size: 2949120, params: BootParameters::new(512,2,1,2,9,224), name: "2.88M" },
    FatSize { size: 163840, params: BootParameters::new(512,1,1,2,2,64), name: "160K" },
    FatSize { size: 184320, params: BootParameters::new(512,1,1,2,2,64), name: "180K" },
    FatSize { size: 327680, params: BootParameters::new(512,2,1,2,2,112), name: "320K" },
    FatSize { size: 368640, params: BootParameters::new(512,2,1,2,2,112), name: "360K" }
];

/// Sector sizes for the layout search
pub const CANDIDATE_SECTOR_SIZES: [u16;4] = [256,512,1024,2048];
/// (sectors per cluster, reserved sectors, FAT copies, sectors per FAT) for the layout search
pub const CANDIDATE_LAYOUTS: [(u8,u16,u8,u32);6] = [
    (1,1,2,3),
    (2,1,2,3),
    (4,2,2,3),
    (1,1,2,9),
    (2,1,2,9),
    (4,1,2,9)
];
pub const CANDIDATE_ROOT_ENTRIES: [u16;5] = [64,112,128,224,256];

/// Last resort parameters by image size
pub const SIZE_BRACKETS: [SizeBracket;3] = [
    SizeBracket { max_size: 400000, params: BootParameters::new(256,4,2,2,3,128), name: "small image" },
    SizeBracket { max_size: 800000, params: BootParameters::new(512,2,1,2,3,224), name: "medium image" },
    SizeBracket { max_size: usize::MAX, params: BootParameters::new(512,1,1,2,9,224), name: "large image" }
];

/// Media descriptors allowed in the first FAT byte
pub const MEDIA_DESCRIPTORS: [u8;9] = [0xf0,0xf8,0xf9,0xfa,0xfb,0xfc,0xfd,0xfe,0xff];

/// Root directory locations seen on disks whose BPB does not point to them,
/// in the order they should be tried.
pub const FAT_ALT_DIR_OFFSETS: [usize;8] = [0x700,0x800,0x1100,0x2400,0x5000,0x6000,0x4a00,0x3000];
/// Stride of the exhaustive directory scan
pub const DIR_SCAN_STRIDE: usize = 256;

/// HP-150 directory locations, most likely first
pub const HP150_DIR_OFFSETS: [usize;6] = [0x700,0x800,0x1100,0x2400,0x5000,0x6000];
/// Directory locations whose data region is known, others use `HP150_DEFAULT_DATA_START`
pub const HP150_LAYOUTS: [Hp150Layout;1] = [
    Hp150Layout { dir_offset: 0x700, data_start: 0x1000 }
];
pub const HP150_DEFAULT_DATA_START: usize = 0x1800;
pub const HP150_FAT_START: usize = 0x200;
pub const HP150_FAT_SIZE: usize = 0x300;
pub const HP150_SECTOR_SIZE: u16 = 256;
pub const HP150_SECTORS_PER_CLUSTER: u8 = 4;
pub const HP150_FAT_COPIES: u8 = 2;
/// Entries read from an HP-150 directory
pub const HP150_DIR_ENTRIES: usize = 16;
/// HP-150 images are no larger than this
pub const HP150_MAX_SIZE: usize = 400000;
/// Name fragments typical of HP-150 software, each found in the directory adds to the score
pub const HP150_NAME_PATTERNS: [&[u8];10] = [b"CAL",b"OVL",b"PAS",b"EXE",b"IN$",b"BAT",b"HLP",b"MSG",b"US",b"VC"];
/// System files that are hidden from ordinary listings
pub const HP150_SYSTEM_NAMES: [&str;2] = ["HPSYS","HP150SYS"];

/// CP/M directory locations (track boundaries on common layouts), most likely first
pub const CPM_DIR_OFFSETS: [usize;7] = [0x3000,0x3c00,0x1400,0x2800,0x1100,0x2000,0x2400];
/// CP/M image sizes, a match is anything within `CPM_SIZE_TOLERANCE`
pub const CPM_KNOWN_SIZES: [usize;7] = [200704,400896,1024000,204800,212075,746496,102400];
pub const CPM_SIZE_TOLERANCE: usize = 2048;

/// Find the geometry entry for a flat image size
pub fn img_known_size(size: usize) -> Option<&'static ImgSize> {
    IMG_KNOWN_SIZES.iter().find(|k| k.size==size)
}

/// Expand the layout grid into a candidate list in search order
pub fn scored_candidates() -> Vec<BootParameters> {
    let mut ans = Vec::new();
    for bps in CANDIDATE_SECTOR_SIZES {
        for (spc,res,fats,fat_secs) in CANDIDATE_LAYOUTS {
            for root in CANDIDATE_ROOT_ENTRIES {
                ans.push(BootParameters::new(bps,spc,res,fats,fat_secs,root));
            }
        }
    }
    ans
}

/// Bracket containing `size`
pub fn size_bracket(size: usize) -> &'static SizeBracket {
    // last bracket is unbounded
    SIZE_BRACKETS.iter().find(|b| size <= b.max_size).unwrap_or(&SIZE_BRACKETS[SIZE_BRACKETS.len()-1])
}

/// Data region start that goes with an HP-150 directory offset
pub fn hp150_data_start(dir_offset: usize) -> usize {
    HP150_LAYOUTS.iter()
        .find(|l| l.dir_offset==dir_offset)
        .map(|l| l.data_start)
        .unwrap_or(HP150_DEFAULT_DATA_START)
}
