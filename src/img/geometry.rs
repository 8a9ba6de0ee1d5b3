//! ## Geometry Classifier
//!
//! Works out cylinders, heads, sectors per track, and sector size, either from the track
//! records of a container, or from nothing but the size of a flat image.
//!
//! Track based classification uses the statistical mode for the sector count and size,
//! since real formats vary the count on some tracks (e.g. the boot track).

use std::collections::BTreeMap;
use std::fmt;
use log::debug;
use super::{TrackRecord,SectorClass,ImageType};
use crate::bios::tables;

const HP150_SECTOR_SIZE: usize = 256;
const HP150_SECTOR_COUNTS: [usize;2] = [16,32];
const PC_SECTOR_SIZE: usize = 512;
const PC_SECTOR_COUNTS: [usize;5] = [8,9,15,18,36];
const HP150_OEM: &[u8;8] = b"HP150   ";

#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum GeometryKind {
    /// phantom sectors were seen
    WithPhantom,
    /// sector count varies across tracks
    Variable,
    Hp150Standard,
    PcStandard,
    Custom,
    /// flat image of a recognized size
    Standard,
    /// flat image, worked out from its size or its BPB
    Inferred,
    /// flat image, nothing fit and a default was assumed
    Assumed,
    /// given by the user
    Forced,
    Unknown
}

#[derive(Clone,Debug)]
pub struct GeometryInfo {
    pub kind: GeometryKind,
    pub cylinders: usize,
    pub heads: usize,
    pub sectors_per_track: usize,
    pub bytes_per_sector: usize,
    pub has_phantom: bool,
    pub total_sectors: usize,
    /// distinct retained sectors on each (cylinder,head)
    pub per_track_sector_counts: BTreeMap<(u8,u8),usize>,
    /// sector size in bytes -> count of sectors with that size
    pub sector_sizes: BTreeMap<usize,usize>,
    pub source: Option<ImageType>,
    pub file_size: usize,
    pub notes: Vec<String>
}

impl fmt::Display for GeometryKind {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WithPhantom => "with_phantom",
            Self::Variable => "variable",
            Self::Hp150Standard => "hp150_standard",
            Self::PcStandard => "pc_standard",
            Self::Custom => "custom",
            Self::Standard => "standard",
            Self::Inferred => "inferred",
            Self::Assumed => "assumed",
            Self::Forced => "forced",
            Self::Unknown => "unknown"
        };
        write!(f,"{}",s)
    }
}

/// Most frequent value, ties go to the larger value
fn mode<I: Iterator<Item = usize>>(vals: I) -> Option<usize> {
    let mut counts: BTreeMap<usize,usize> = BTreeMap::new();
    for v in vals {
        *counts.entry(v).or_insert(0) += 1;
    }
    // BTreeMap iterates ascending, so `max_by_key` keeps the last (largest) of equal counts
    counts.into_iter().max_by_key(|(_,n)| *n).map(|(v,_)| v)
}

impl GeometryInfo {
    fn empty(source: Option<ImageType>,file_size: usize) -> Self {
        Self {
            kind: GeometryKind::Unknown,
            cylinders: 0,
            heads: 0,
            sectors_per_track: 0,
            bytes_per_sector: 0,
            has_phantom: false,
            total_sectors: 0,
            per_track_sector_counts: BTreeMap::new(),
            sector_sizes: BTreeMap::new(),
            source,
            file_size,
            notes: Vec::new()
        }
    }
    fn set_layout(&mut self,c: usize,h: usize,s: usize,b: usize) {
        self.cylinders = c;
        self.heads = h;
        self.sectors_per_track = s;
        self.bytes_per_sector = b;
        self.total_sectors = c*h*s;
    }
    /// Geometry given explicitly, as from `--geometry C,H,S,B`
    pub fn forced(cylinders: usize,heads: usize,sectors: usize,sector_size: usize) -> Self {
        let mut ans = Self::empty(None,0);
        ans.kind = GeometryKind::Forced;
        ans.set_layout(cylinders,heads,sectors,sector_size);
        ans.notes.push(format!("forced geometry {}x{}x{}x{}",cylinders,heads,sectors,sector_size));
        ans
    }
    /// True if the geometry describes a nonempty image
    pub fn is_resolved(&self) -> bool {
        self.image_size() > 0
    }
    /// Size of the flat image this geometry describes
    pub fn image_size(&self) -> usize {
        self.cylinders * self.heads * self.sectors_per_track * self.bytes_per_sector
    }
    pub fn to_json(&self) -> json::JsonValue {
        let mut counts = json::JsonValue::new_object();
        for ((c,h),n) in &self.per_track_sector_counts {
            counts[format!("{},{}",c,h)] = json::JsonValue::from(*n);
        }
        let mut sizes = json::JsonValue::new_object();
        for (sz,n) in &self.sector_sizes {
            sizes[sz.to_string()] = json::JsonValue::from(*n);
        }
        let source = match self.source {
            Some(t) => t.to_string(),
            None => "none".to_string()
        };
        json::object! {
            "type": self.kind.to_string(),
            cylinders: self.cylinders,
            heads: self.heads,
            sectors_per_track: self.sectors_per_track,
            bytes_per_sector: self.bytes_per_sector,
            has_phantom: self.has_phantom,
            total_sectors: self.total_sectors,
            image_size: self.image_size(),
            source_format: source,
            file_size: self.file_size,
            sector_counts: counts,
            sector_sizes: sizes,
            notes: self.notes.clone()
        }
    }
}

/// Classify the geometry of parsed container tracks.  This is a pure function of the records.
pub fn classify(tracks: &[TrackRecord],source: Option<ImageType>,file_size: usize) -> GeometryInfo {
    let mut ans = GeometryInfo::empty(source,file_size);
    if tracks.is_empty() {
        ans.notes.push("no tracks found".to_string());
        return ans;
    }
    ans.cylinders = tracks.iter().map(|t| t.cylinder as usize).max().unwrap_or(0) + 1;
    ans.heads = tracks.iter().map(|t| t.head as usize).max().unwrap_or(0) + 1;
    let mut numbers: BTreeMap<(u8,u8),Vec<u8>> = BTreeMap::new();
    for trk in tracks {
        for sec in &trk.sectors {
            if sec.class==SectorClass::Phantom {
                ans.has_phantom = true;
            }
            if !sec.is_retained() {
                continue;
            }
            let list = numbers.entry((trk.cylinder,trk.head)).or_default();
            if !list.contains(&sec.sector_number) {
                list.push(sec.sector_number);
            }
            *ans.sector_sizes.entry(sec.byte_size()).or_insert(0) += 1;
        }
    }
    for (k,v) in numbers {
        ans.per_track_sector_counts.insert(k,v.len());
    }
    ans.total_sectors = ans.per_track_sector_counts.values().sum();
    ans.sectors_per_track = mode(ans.per_track_sector_counts.values().copied()).unwrap_or(0);
    ans.bytes_per_sector = mode(ans.sector_sizes.iter().flat_map(|(sz,n)| std::iter::repeat(*sz).take(*n))).unwrap_or(0);
    let varies = {
        let mut it = ans.per_track_sector_counts.values();
        match it.next() {
            Some(first) => it.any(|n| n!=first),
            None => false
        }
    };
    ans.kind = match (ans.has_phantom,varies,ans.bytes_per_sector,ans.sectors_per_track) {
        (true,_,_,_) => GeometryKind::WithPhantom,
        (_,true,_,_) => GeometryKind::Variable,
        (_,_,HP150_SECTOR_SIZE,s) if HP150_SECTOR_COUNTS.contains(&s) => GeometryKind::Hp150Standard,
        (_,_,PC_SECTOR_SIZE,s) if PC_SECTOR_COUNTS.contains(&s) => GeometryKind::PcStandard,
        _ => GeometryKind::Custom
    };
    debug!("classified {} tracks as {}",tracks.len(),ans.kind);
    ans.notes.push(format!("{} cylinders, {} heads, {} sectors of {} bytes",
        ans.cylinders,ans.heads,ans.sectors_per_track,ans.bytes_per_sector));
    if ans.has_phantom {
        ans.notes.push("phantom sectors present".to_string());
    }
    ans
}

fn search_layout(size: usize) -> Option<(usize,usize,usize,usize)> {
    for bps in tables::IMG_SECTOR_SIZES {
        if size % bps != 0 {
            continue;
        }
        let total = size / bps;
        for (c,h) in tables::IMG_CYL_HEAD {
            let spt = total / (c*h);
            if spt > 0 && spt <= tables::IMG_MAX_SECTORS && total == c*h*spt {
                return Some((c,h,spt,bps));
            }
        }
    }
    None
}

/// Geometry fields of a boot sector BPB, if they are sensible
fn bpb_layout(img: &[u8]) -> Option<(usize,usize,usize,usize)> {
    let b = img.get(0..28)?;
    let bps = u16::from_le_bytes([b[11],b[12]]) as usize;
    let spt = u16::from_le_bytes([b[24],b[25]]) as usize;
    let heads = u16::from_le_bytes([b[26],b[27]]) as usize;
    if !tables::IMG_SECTOR_SIZES.contains(&bps) || spt==0 || spt > tables::IMG_MAX_SECTORS || heads==0 || heads > 2 {
        return None;
    }
    match img.len() / (bps*spt*heads) {
        0 => None,
        c => Some((c,heads,spt,bps))
    }
}

fn boot_notes(img: &[u8],ans: &mut GeometryInfo) {
    if img.len() < 512 || img[510..512]!=crate::bios::bpb::BOOT_SIGNATURE {
        return;
    }
    ans.notes.push("valid boot signature found".to_string());
    if &img[3..11]==HP150_OEM {
        ans.notes.push("HP150 OEM ID detected".to_string());
    }
}

/// Infer the geometry of a flat image from its size, with help from the boot sector.
pub fn infer_from_size(img: &[u8]) -> GeometryInfo {
    let size = img.len();
    let mut ans = GeometryInfo::empty(Some(ImageType::IMG),size);
    if let Some(k) = tables::img_known_size(size) {
        ans.set_layout(k.cylinders,k.heads,k.sectors,k.sector_size);
        ans.kind = match k.hp150 {
            true => GeometryKind::Hp150Standard,
            false => GeometryKind::Standard
        };
        ans.notes.push(format!("recognized {} image",k.name));
    } else if let Some((c,h,s,b)) = search_layout(size) {
        ans.set_layout(c,h,s,b);
        ans.kind = GeometryKind::Inferred;
        ans.notes.push(format!("inferred geometry {}x{}x{}x{} from file size",c,h,s,b));
        if b==HP150_SECTOR_SIZE && HP150_SECTOR_COUNTS.contains(&s) {
            ans.notes.push("layout matches HP150".to_string());
        }
    } else if let Some((c,h,s,b)) = bpb_layout(img) {
        ans.set_layout(c,h,s,b);
        ans.kind = GeometryKind::Inferred;
        ans.notes.push(format!("geometry {}x{}x{}x{} taken from BPB",c,h,s,b));
    } else if size >= tables::IMG_DEFAULT_MIN_SIZE {
        let heads = match size <= tables::IMG_DEFAULT_SINGLE_SIDED_MAX { true => 1, false => 2 };
        ans.set_layout(80,heads,16,HP150_SECTOR_SIZE);
        ans.total_sectors = size / HP150_SECTOR_SIZE;
        ans.kind = GeometryKind::Assumed;
        ans.notes.push("could not determine geometry, assuming HP150 layout".to_string());
    } else {
        ans.notes.push("could not determine geometry".to_string());
    }
    boot_notes(img,&mut ans);
    ans
}
