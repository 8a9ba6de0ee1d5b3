//! ## Image Assembler
//!
//! Lays the retained sectors of a container out into a flat image.  The flat image is
//! track-major within cylinder, i.e., the sector at (c,h,i) is found at
//! `((c*heads + h)*sectors_per_track + i)*bytes_per_sector`.
//!
//! Sectors that were never captured stay as fill bytes and are counted as missing,
//! so a partial recovery is visible to the caller.

use std::collections::HashSet;
use log::{debug,trace};
use super::TrackRecord;
use super::geometry::GeometryInfo;
use crate::diag::{Diagnostics,Kind};

pub const HP150_OEM: [u8;8] = *b"HP150   ";
const OEM_RANGE: std::ops::Range<usize> = 3..11;
const SIGNATURE_RANGE: std::ops::Range<usize> = 254..256;

/// Options controlling the layout of the flat image
#[derive(Clone,Debug,Default)]
pub struct AssemblyOptions {
    /// value for bytes that no sector covers
    pub fill_byte: u8,
    /// write the boot signature at 254..256 and the HP-150 OEM ID
    pub boot_fixup: bool,
    /// use this instead of the classified geometry
    pub forced_geometry: Option<GeometryInfo>
}

#[derive(Clone,Copy,Debug,Default,PartialEq,Eq)]
pub struct AssemblyStats {
    pub sectors_written: usize,
    /// slots in the geometry that no captured sector filled
    pub sectors_missing: usize,
    /// captured sectors whose address falls outside the geometry
    pub sectors_out_of_range: usize,
    /// payloads that were truncated or padded to the sector size
    pub sectors_resized: usize,
    pub image_size: usize
}

impl AssemblyStats {
    pub fn to_json(&self) -> json::JsonValue {
        json::object! {
            sectors_written: self.sectors_written,
            sectors_missing: self.sectors_missing,
            sectors_out_of_range: self.sectors_out_of_range,
            sectors_resized: self.sectors_resized,
            image_size: self.image_size
        }
    }
}

/// Force the boot signature and the OEM ID, leaving the rest of the boot sector alone.
/// Returns true if anything changed.
pub fn fix_boot_sector(img: &mut [u8]) -> bool {
    if img.len() < SIGNATURE_RANGE.end {
        return false;
    }
    let mut changed = false;
    if img[SIGNATURE_RANGE]!=crate::bios::bpb::BOOT_SIGNATURE {
        debug!("boot signature {} fixed to 55aa",hex::encode(&img[SIGNATURE_RANGE]));
        img[SIGNATURE_RANGE].copy_from_slice(&crate::bios::bpb::BOOT_SIGNATURE);
        changed = true;
    }
    if img[OEM_RANGE]!=HP150_OEM {
        debug!("OEM ID {:?} normalized",String::from_utf8_lossy(&img[OEM_RANGE]));
        img[OEM_RANGE].copy_from_slice(&HP150_OEM);
        changed = true;
    }
    changed
}

/// Lay out the retained sectors of `tracks` according to `geometry`.
/// The sector index is the sector number less the lowest sector number on the disk,
/// which is 1 unless some track has a sector 0.
pub fn assemble(tracks: &[TrackRecord],geometry: &GeometryInfo,opt: &AssemblyOptions,diagnostics: &mut Diagnostics) -> (Vec<u8>,AssemblyStats) {
    let geom = match &opt.forced_geometry {
        Some(g) => g,
        None => geometry
    };
    let (heads,spt,bps) = (geom.heads,geom.sectors_per_track,geom.bytes_per_sector);
    let mut stats = AssemblyStats { image_size: geom.image_size(), ..AssemblyStats::default() };
    let mut img = vec![opt.fill_byte;stats.image_size];
    let first = match tracks.iter().flat_map(|t| t.sectors.iter()).any(|s| s.is_retained() && s.sector_number==0) {
        true => 0,
        false => 1
    };
    trace!("first sector number is {}",first);
    // later captures of the same address replace earlier ones
    let mut filled: HashSet<usize> = HashSet::new();
    for trk in tracks {
        for sec in trk.sectors.iter().filter(|s| s.is_retained()) {
            let payload = match &sec.payload {
                Some(p) => p,
                None => continue
            };
            let (c,h) = (trk.cylinder as usize,trk.head as usize);
            let idx = (sec.sector_number as usize).checked_sub(first);
            let slot = match idx {
                Some(i) if c < geom.cylinders && h < heads && i < spt => (c*heads + h)*spt + i,
                _ => {
                    stats.sectors_out_of_range += 1;
                    trace!("sector {} on cyl {} head {} is outside the geometry",sec.sector_number,c,h);
                    continue;
                }
            };
            let offset = slot * bps;
            let n = payload.len().min(bps);
            if payload.len()!=bps {
                stats.sectors_resized += 1;
            }
            img[offset..offset+n].copy_from_slice(&payload[0..n]);
            // short payloads are padded with zero, not the fill byte
            img[offset+n..offset+bps].fill(0);
            filled.insert(slot);
        }
    }
    stats.sectors_written = filled.len();
    stats.sectors_missing = geom.total_slots().saturating_sub(stats.sectors_written);
    if stats.sectors_out_of_range > 0 {
        diagnostics.warn(Kind::MissingSectors,&format!("{} sectors fall outside the geometry and were dropped",stats.sectors_out_of_range));
    }
    if stats.sectors_missing > 0 {
        diagnostics.warn(Kind::MissingSectors,&format!("{} sectors missing, filled with {:#04x}",stats.sectors_missing,opt.fill_byte));
    }
    if opt.boot_fixup && fix_boot_sector(&mut img) {
        diagnostics.note(Kind::Info,"boot sector signature and OEM ID were fixed");
    }
    (img,stats)
}

impl GeometryInfo {
    /// Count of sector slots in the image
    pub fn total_slots(&self) -> usize {
        self.cylinders * self.heads * self.sectors_per_track
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::img::{SectorRecord,SectorClass};
    use crate::img::geometry::classify;

    fn track(c: u8,h: u8,numbers: &[u8],len: usize) -> TrackRecord {
        TrackRecord {
            cylinder: c,
            head: h,
            declared_sector_count: numbers.len() as u8,
            mode: None,
            sectors: numbers.iter().map(|n| SectorRecord {
                cylinder: c,
                head: h,
                sector_number: *n,
                size_code: 1,
                flags: 0,
                class: SectorClass::Normal,
                payload: Some(vec![*n;len])
            }).collect()
        }
    }

    #[test]
    fn layout_and_missing() {
        let tracks = vec![track(0,0,&[1,2,3,4],256),track(0,1,&[1,2,3,4],256),track(1,0,&[1,2,4],256),track(1,1,&[1,2,3,4],256)];
        let mut geom = classify(&tracks,None,0);
        geom.sectors_per_track = 4;
        let mut diag = Diagnostics::new();
        let (img,stats) = assemble(&tracks,&geom,&AssemblyOptions { fill_byte: 0xe5, ..Default::default() },&mut diag);
        assert_eq!(img.len(),2*2*4*256);
        assert_eq!(stats.sectors_written,15);
        assert_eq!(stats.sectors_missing,1);
        // cyl 1 head 0 sector 3 is slot 10
        assert_eq!(img[10*256],0xe5);
        assert_eq!(img[11*256],4);
        assert_eq!(img[5*256],2);
        assert!(diag.has(Kind::MissingSectors));
    }

    #[test]
    fn zero_based_and_resized() {
        let tracks = vec![track(0,0,&[0,1],100)];
        let geom = GeometryInfo::forced(1,1,2,128);
        let mut diag = Diagnostics::new();
        let (img,stats) = assemble(&tracks,&geom,&AssemblyOptions::default(),&mut diag);
        assert_eq!(stats.sectors_resized,2);
        assert_eq!(img[128],1);
        assert_eq!(img[99],0);
        assert_eq!(stats.sectors_missing,0);
    }

    #[test]
    fn out_of_range() {
        let tracks = vec![track(0,0,&[1,2,9],128)];
        let geom = GeometryInfo::forced(1,1,2,128);
        let mut diag = Diagnostics::new();
        let (_,stats) = assemble(&tracks,&geom,&AssemblyOptions::default(),&mut diag);
        assert_eq!(stats.sectors_out_of_range,1);
        assert_eq!(stats.sectors_written,2);
    }

    #[test]
    fn boot_fixup_touches_only_its_bytes() {
        let mut img = vec![0x11;512];
        assert!(fix_boot_sector(&mut img));
        assert_eq!(img[254..256],[0x55,0xaa]);
        assert_eq!(&img[3..11],b"HP150   ");
        assert_eq!(img[2],0x11);
        assert_eq!(img[11],0x11);
        assert_eq!(img[253],0x11);
        assert_eq!(img[256],0x11);
        assert!(!fix_boot_sector(&mut img));
    }
}
