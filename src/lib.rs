//! # `flopkit` main library
//!
//! This library recovers floppy disk images and the files on them, with emphasis on damaged
//! or undocumented media such as HP-150 and Osborne disks.
//!
//! ## Architecture
//!
//! Recovery proceeds in two stages:
//! * `img` turns a container (TD0, IMD) into track records, classifies the geometry, and lays
//!   the sectors out into a flat image
//! * `fs` imposes a file system on the flat image, after `fs::detect` decides which one
//!
//! The `bios` module sits between the two, holding the boot parameters, the FAT itself, and the
//! candidate tables used when a layout has to be guessed.
//!
//! Damage is not an error.  Anything unexpected that can be worked around is recorded in a
//! `diag::Diagnostics` collector that travels with the result, so that a recovery of 80% of
//! the sectors is still a result, with the missing 20% counted.
//!
//! ## File Systems
//!
//! * FAT12/16/32, with the HP-150 dialect
//! * CP/M (Osborne-1 layout, read only)
//! * raw, i.e., no file system, analysis products only
//!
//! ## Disk Images
//!
//! * TD0 (normal and advanced compression)
//! * IMD
//! * IMG (flat sector dump)

pub mod diag;
pub mod bios;
pub mod img;
pub mod fs;
pub mod commands;

use std::io::Read;
use log::{debug,info,warn};
use diag::{Diagnostics,Kind};
use img::{Container,ImageType,ParseOptions,ParseStats,TrackRecord};
use img::geometry::GeometryInfo;
use img::assemble::{AssemblyOptions,AssemblyStats};
use fs::{DiskFS,Format,Handle};

type DYNERR = Box<dyn std::error::Error>;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;

const DEFAULT_GEOMETRY: (usize,usize,usize,usize) = (80,2,16,256);

/// Expand data that was packed with the TD0 advanced compression (LZSS with adaptive Huffman).
/// Truncated input yields whatever could be expanded.
pub fn decompress(compressed: &[u8]) -> Vec<u8> {
    img::lzhuf::expand(compressed)
}

/// Parse a TD0 or IMD container, the type is decided by the signature.
pub fn parse_container(bytes: &[u8],opt: &ParseOptions) -> Result<Container,img::Error> {
    img::parse_container(bytes,opt)
}

/// Classify the geometry of container tracks, see `img::geometry::classify`
pub fn classify_geometry(tracks: &[TrackRecord]) -> GeometryInfo {
    img::geometry::classify(tracks,None,0)
}

/// Lay the sectors of `tracks` out into a flat image, see `img::assemble::assemble`
pub fn assemble_image(tracks: &[TrackRecord],geometry: &GeometryInfo,opt: &AssemblyOptions,diagnostics: &mut Diagnostics) -> (Vec<u8>,AssemblyStats) {
    img::assemble::assemble(tracks,geometry,opt,diagnostics)
}

/// Open a flat image as FAT, choosing the HP-150 dialect if the classifier prefers it.
pub fn open_fat(img: Vec<u8>) -> Result<fs::fat::Disk,DYNERR> {
    let hp150 = fs::detect::detect(&img).iter()
        .find(|d| d.format==Format::Hp150Fat || d.format==Format::Fat)
        .map(|d| d.format==Format::Hp150Fat)
        .unwrap_or(false);
    match hp150 {
        true => fs::fat::Disk::open_hp150(img),
        false => fs::fat::Disk::open(img)
    }
}

/// Open a flat image as CP/M
pub fn open_cpm(img: Vec<u8>) -> Result<fs::cpm::Disk,DYNERR> {
    fs::cpm::Disk::open(img)
}

/// Everything produced by turning a disk image into a flat image
pub struct Recovery {
    pub image: Vec<u8>,
    pub source: ImageType,
    pub geometry: GeometryInfo,
    /// container parse statistics, `None` for a flat image
    pub parse_stats: Option<ParseStats>,
    /// assembly statistics, `None` for a flat image
    pub assembly: Option<AssemblyStats>,
    /// container header metadata, `None` for a flat image
    pub metadata: Option<json::JsonValue>,
    pub diagnostics: Diagnostics
}

impl Recovery {
    /// Summary of the recovery, without the image itself
    pub fn to_json(&self) -> json::JsonValue {
        let mut ans = json::object! {
            source: self.source.to_string(),
            image_size: self.image.len(),
            geometry: self.geometry.to_json(),
            diagnostics: self.diagnostics.to_json()
        };
        if let Some(meta) = &self.metadata {
            ans["metadata"] = meta.clone();
        }
        if let Some(stats) = &self.assembly {
            ans["assembly"] = stats.to_json();
        }
        ans
    }
}

/// Turn container or flat image bytes into a flat image.
/// Flat images pass through unchanged apart from the optional boot fixup.
/// Only a bad container header, or anything at all in strict mode, is an error.
pub fn recover_image(bytes: &[u8],parse_opt: &ParseOptions,asm_opt: &AssemblyOptions) -> Result<Recovery,DYNERR> {
    let container = match img::container_type(bytes) {
        Some(_) => parse_container(bytes,parse_opt)?,
        None => {
            info!("no container signature, treating as flat image");
            let mut diagnostics = Diagnostics::new();
            let geometry = match &asm_opt.forced_geometry {
                Some(g) => g.clone(),
                None => img::geometry::infer_from_size(bytes)
            };
            if !geometry.is_resolved() {
                diagnostics.note(Kind::GeometryUnresolved,"flat image geometry could not be determined");
            }
            let mut image = bytes.to_vec();
            if asm_opt.boot_fixup && img::assemble::fix_boot_sector(&mut image) {
                diagnostics.note(Kind::Info,"boot sector signature and OEM ID were fixed");
            }
            return Ok(Recovery {
                image,
                source: ImageType::IMG,
                geometry,
                parse_stats: None,
                assembly: None,
                metadata: None,
                diagnostics
            });
        }
    };
    let metadata = container.metadata();
    let Container { kind, tracks, stats, mut diagnostics, .. } = container;
    let mut geometry = img::geometry::classify(&tracks,Some(kind),bytes.len());
    if !geometry.is_resolved() && asm_opt.forced_geometry.is_none() {
        let (c,h,s,b) = DEFAULT_GEOMETRY;
        diagnostics.note(Kind::GeometryUnresolved,&format!("geometry unresolved, assuming {}x{}x{}x{}",c,h,s,b));
        geometry = GeometryInfo::forced(c,h,s,b);
    }
    if let Some(g) = &asm_opt.forced_geometry {
        geometry = g.clone();
    }
    debug!("assembling {} geometry",geometry.kind);
    let (image,assembly) = assemble_image(&tracks,&geometry,asm_opt,&mut diagnostics);
    Ok(Recovery {
        image,
        source: kind,
        geometry,
        parse_stats: Some(stats),
        assembly: Some(assembly),
        metadata: Some(metadata),
        diagnostics
    })
}

/// Save the flat image (make changes permanent)
pub fn save_img(disk: &dyn DiskFS,img_path: &str) -> STDRESULT {
    std::fs::write(img_path,disk.to_bytes())?;
    Ok(())
}

/// Given a bytestream return a file system handle.  Containers are recovered first
/// with default options, then the format classifier picks the file system.
/// The raw fallback means this only fails if the bytes cannot be read as an image at all.
pub fn create_fs_from_bytestream(disk_img_data: &[u8]) -> Result<Handle,DYNERR> {
    if disk_img_data.is_empty() {
        warn!("image is empty");
        return Err(Box::new(fs::Error::EmptyImage));
    }
    let recovery = recover_image(disk_img_data,&ParseOptions::default(),&AssemblyOptions::default())?;
    let detection = fs::detect::best(&recovery.image);
    info!("identified {} file system",detection.format);
    match Handle::open(recovery.image.clone(),detection.format) {
        Err(e) if detection.format!=Format::Raw => {
            warn!("{} did not open ({}), falling back to raw",detection.format,e);
            Handle::open(recovery.image,Format::Raw)
        },
        result => result
    }
}

/// Calls `create_fs_from_bytestream` getting the bytes from a file.
pub fn create_fs_from_file(img_path: &str) -> Result<Handle,DYNERR> {
    match std::fs::read(img_path) {
        Ok(disk_img_data) => create_fs_from_bytestream(&disk_img_data),
        Err(e) => Err(Box::new(e))
    }
}

/// Calls `create_fs_from_bytestream` getting the bytes from stdin.
pub fn create_fs_from_stdin() -> Result<Handle,DYNERR> {
    let mut disk_img_data = Vec::new();
    match std::io::stdin().read_to_end(&mut disk_img_data) {
        Ok(_n) => create_fs_from_bytestream(&disk_img_data),
        Err(e) => Err(Box::new(e))
    }
}

/// Display binary to stdout in columns of hex and ascii
pub fn display_block(start_addr: usize,block: &[u8]) {
    for (i,slice) in block.chunks(16).enumerate() {
        let txt: String = slice.iter().map(|c| match *c {
            x if x<32 => '.',
            x if x<127 => x as char,
            _ => '.'
        }).collect();
        print!("{:06X} : ",start_addr + i*16);
        for byte in slice {
            print!("{:02X} ",byte);
        }
        for _blank in slice.len()..16 {
            print!("   ");
        }
        println!("|{}|",txt);
    }
}
