//! # Disk Image Module
//!
//! Container images (TD0, IMD) store a capture of each track as a list of sector records,
//! which need not be complete, ordered, or even genuine.  This module turns such a capture into
//! a `Container`, i.e., an ordered list of `TrackRecord`s with classified `SectorRecord`s,
//! plus the header metadata, parse statistics, and diagnostics.
//!
//! ## Pipeline
//!
//! * `lzhuf` expands the advanced compression used by `td` images
//! * `td0` and `imd` walk the container bytes and produce the track records
//! * `geometry` infers the disk layout from the records, or from the size of a flat image
//! * `assemble` lays the sectors out into a flat image
//!
//! Parsing is lenient by default: sequence errors and CRC mismatches become diagnostics.
//! Only a bad container header stops the parse outright, unless `ParseOptions::strict` is set.

pub mod lzhuf;
pub mod td0;
pub mod imd;
pub mod geometry;
pub mod assemble;

use std::fmt;
use std::str::FromStr;
use crate::diag::Diagnostics;

/// Enumerates image errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("container header is invalid")]
    ContainerHeaderInvalid,
    #[error("sector sequence mismatch: {0}")]
    SectorSequenceMismatch(SequenceFault),
    #[error("unexpected end of image data")]
    UnexpectedEnd,
    #[error("unknown sector size")]
    UnknownSectorSize,
    #[error("invalid track mode")]
    InvalidTrackMode,
    #[error("invalid track header")]
    InvalidTrackHeader,
    #[error("invalid sector data record")]
    InvalidSectorData,
    #[error("geometry could not be resolved")]
    GeometryUnresolved
}

/// Ways the sector numbering on a track can depart from the expected sequence
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum SequenceFault {
    /// this many sector numbers were jumped over
    Skip(usize),
    /// a sector number at or below one already seen
    Repeat(u8)
}

impl fmt::Display for SequenceFault {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip(n) => write!(f,"skipped {} sectors",n),
            Self::Repeat(s) => write!(f,"repeated sector {}",s)
        }
    }
}

#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum ImageType {
    TD0,
    IMD,
    IMG
}

impl FromStr for ImageType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s {
            "td0" => Ok(Self::TD0),
            "imd" => Ok(Self::IMD),
            "img" | "ima" | "dsk" => Ok(Self::IMG),
            _ => Err(Error::ContainerHeaderInvalid)
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TD0 => write!(f,"td0"),
            Self::IMD => write!(f,"imd"),
            Self::IMG => write!(f,"img")
        }
    }
}

/// How the parser classified a sector header
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum SectorClass {
    Normal,
    /// padding inserted by some duplicators, never stored
    Phantom,
    /// header present but no data recorded
    Skipped,
    /// sector number already seen on this track
    Repeated,
    /// end of the track's useful sectors
    Terminator
}

impl fmt::Display for SectorClass {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f,"normal"),
            Self::Phantom => write!(f,"phantom"),
            Self::Skipped => write!(f,"skipped"),
            Self::Repeated => write!(f,"repeated"),
            Self::Terminator => write!(f,"terminator")
        }
    }
}

#[derive(Clone,Debug)]
pub struct SectorRecord {
    /// cylinder as written in the sector ID
    pub cylinder: u8,
    /// head as written in the sector ID
    pub head: u8,
    pub sector_number: u8,
    pub size_code: u8,
    /// container specific flags, TD0 flags are kept as is, IMD data type goes here
    pub flags: u8,
    pub class: SectorClass,
    /// expanded sector data, absent for phantom, skipped, and terminator sectors
    pub payload: Option<Vec<u8>>
}

#[derive(Clone,Debug)]
pub struct TrackRecord {
    pub cylinder: u8,
    pub head: u8,
    pub declared_sector_count: u8,
    /// IMD recording mode, if known
    pub mode: Option<u8>,
    pub sectors: Vec<SectorRecord>
}

/// Options controlling the container parsers
#[derive(Clone,Copy,Debug,Default)]
pub struct ParseOptions {
    /// treat sequence errors and truncation as fatal
    pub strict: bool
}

#[derive(Clone,Copy,Debug,Default,PartialEq,Eq)]
pub struct ParseStats {
    pub sectors_read: usize,
    pub sectors_skipped: usize,
    pub sectors_repeated: usize,
    pub phantom_sectors: usize,
    pub crc_errors: usize,
    pub tracks_processed: usize
}

/// Header information particular to the container format
#[derive(Clone,Debug)]
pub enum HeaderInfo {
    Td0(td0::Header),
    Imd(imd::Header)
}

/// Result of parsing a container image
pub struct Container {
    pub kind: ImageType,
    pub header: HeaderInfo,
    pub comment: Option<String>,
    pub timestamp: Option<chrono::NaiveDateTime>,
    pub tracks: Vec<TrackRecord>,
    pub stats: ParseStats,
    pub diagnostics: Diagnostics
}

impl SectorRecord {
    /// Nominal size of the sector in bytes according to its size code.
    pub fn byte_size(&self) -> usize {
        sector_size(self.size_code)
    }
    /// True if the sector should be laid out in the image
    pub fn is_retained(&self) -> bool {
        match self.class {
            SectorClass::Phantom | SectorClass::Terminator => false,
            _ => true
        }
    }
}

impl Container {
    /// All sector records in stream order
    pub fn sectors(&self) -> impl Iterator<Item = &SectorRecord> {
        self.tracks.iter().flat_map(|t| t.sectors.iter())
    }
    pub fn metadata(&self) -> json::JsonValue {
        let mut root = json::JsonValue::new_object();
        let key = self.kind.to_string();
        root[&key] = json::JsonValue::new_object();
        root[&key]["header"] = match &self.header {
            HeaderInfo::Td0(h) => h.to_json(),
            HeaderInfo::Imd(h) => h.to_json()
        };
        if let Some(ts) = &self.timestamp {
            root[&key]["timestamp"] = json::JsonValue::String(ts.format("%Y-%m-%d %H:%M:%S").to_string());
        }
        if let Some(c) = &self.comment {
            root[&key]["comment"] = json::JsonValue::String(c.to_string());
        }
        root[&key]["stats"] = json::object! {
            tracks_processed: self.stats.tracks_processed,
            sectors_read: self.stats.sectors_read,
            sectors_skipped: self.stats.sectors_skipped,
            sectors_repeated: self.stats.sectors_repeated,
            phantom_sectors: self.stats.phantom_sectors,
            crc_errors: self.stats.crc_errors
        };
        root
    }
}

/// Size in bytes of a TD0/IMD sector size code, codes beyond 7 are taken as 256.
pub fn sector_size(code: u8) -> usize {
    match code {
        0..=7 => 128 << code,
        _ => 256
    }
}

pub fn file_extensions() -> Vec<String> {
    vec!["td0".to_string(),"imd".to_string(),"img".to_string(),"ima".to_string(),"dsk".to_string()]
}

/// Identify a container by its signature, `None` means treat as a flat image.
pub fn container_type(bytes: &[u8]) -> Option<ImageType> {
    if bytes.len() >= 2 && (&bytes[0..2]==b"TD" || &bytes[0..2]==b"td") {
        return Some(ImageType::TD0);
    }
    if bytes.len() >= 3 && &bytes[0..3]==b"IMD" {
        return Some(ImageType::IMD);
    }
    None
}

/// Parse a TD0 or IMD container, the type is decided by the signature.
pub fn parse_container(bytes: &[u8],opt: &ParseOptions) -> Result<Container,Error> {
    match container_type(bytes) {
        Some(ImageType::TD0) => td0::parse(bytes,opt),
        Some(ImageType::IMD) => imd::parse(bytes,opt),
        _ => {
            log::error!("container signature not recognized");
            Err(Error::ContainerHeaderInvalid)
        }
    }
}
