//! ## Support for IMD disk images
//!
//! ImageDisk stores a text header and comment, terminated by 0x1a, followed by
//! track records.  Each track record names its recording mode, its sector size,
//! and the sector numbers as they were found on the track, followed by one data
//! record per sector.  Uniform sectors are compressed to a single fill byte.

use num_traits::FromPrimitive;
use num_derive::FromPrimitive;
use log::{trace,debug,info};
use super::{Error,SectorClass,SectorRecord,TrackRecord,ParseOptions,ParseStats,Container,HeaderInfo,ImageType};
use crate::diag::{Diagnostics,Kind};

pub const CYL_MAP_FLAG: u8 = 0x80;
pub const HEAD_MAP_FLAG: u8 = 0x40;
pub const HEAD_MASK: u8 = 0b1111;
const COMMENT_END: u8 = 0x1a;
const MAX_MODE: u8 = 6;
const MAX_CYLINDER: u8 = 80;
const MAX_SIZE_CODE: u8 = 6;

pub const MODE_NAMES: [&str;6] = ["500K FM","300K FM","250K FM","500K MFM","300K MFM","250K MFM"];

pub fn file_extensions() -> Vec<String> {
    vec!["imd".to_string()]
}

#[derive(FromPrimitive,PartialEq,Clone,Copy)]
pub enum SectorData {
    None = 0,
    Normal = 1,
    NormalCompressed = 2,
    NormalDeleted = 3,
    NormalCompressedDeleted = 4,
    Error = 5,
    ErrorCompressed = 6,
    ErrorDeleted = 7,
    ErrorCompressedDeleted = 8
}

macro_rules! verified_get_slice {
    ($buf:expr,$ptr:expr,$len:expr,$loc:expr) => {
        match $ptr + $len <= $buf.len() {
            true => {
                $ptr += $len;
                &$buf[$ptr-$len..$ptr]
            },
            false => {
                debug!("out of data in {}",$loc);
                return Err(Error::UnexpectedEnd);
            }
        }
    };
}

/// Header line of an IMD image, e.g., `IMD 1.18: 12/03/2021 10:11:12`
#[derive(Clone,Debug)]
pub struct Header {
    pub line: String
}

impl Header {
    /// version string following the signature, if it can be found
    pub fn version(&self) -> Option<String> {
        let rest = self.line.strip_prefix("IMD ")?;
        rest.split(':').next().map(|v| v.trim().to_string())
    }
    pub fn to_json(&self) -> json::JsonValue {
        let mut ans = json::object! {
            line: self.line.clone()
        };
        if let Some(v) = self.version() {
            ans["version"] = json::JsonValue::String(v);
        }
        ans
    }
}

/// Name of an IMD recording mode
pub fn mode_name(mode: u8) -> &'static str {
    match MODE_NAMES.get(mode as usize) {
        Some(s) => s,
        None => "unknown"
    }
}

impl SectorData {
    fn is_compressed(&self) -> bool {
        match self {
            Self::NormalCompressed | Self::NormalCompressedDeleted | Self::ErrorCompressed | Self::ErrorCompressedDeleted => true,
            _ => false
        }
    }
    fn is_error(&self) -> bool {
        match self {
            Self::Error | Self::ErrorCompressed | Self::ErrorDeleted | Self::ErrorCompressedDeleted => true,
            _ => false
        }
    }
}

fn parse_track(buf: &[u8],ptr: &mut usize,stats: &mut ParseStats,diagnostics: &mut Diagnostics) -> Result<TrackRecord,Error> {
    let mut p = *ptr;
    let h = verified_get_slice!(buf,p,5,"track header");
    let (mode,cylinder,head_byte,count,size_code) = (h[0],h[1],h[2],h[3],h[4]);
    if mode > MAX_MODE {
        log::error!("invalid mode {}, stream out of sync",mode);
        return Err(Error::InvalidTrackMode);
    }
    let head = head_byte & HEAD_MASK;
    if cylinder > MAX_CYLINDER || head > 1 {
        log::error!("invalid cylinder {} or head {}, stream out of sync",cylinder,head);
        return Err(Error::InvalidTrackHeader);
    }
    if size_code > MAX_SIZE_CODE {
        log::error!("unknown sector size indicator {}",size_code);
        return Err(Error::UnknownSectorSize);
    }
    let sec_size = super::sector_size(size_code);
    debug!("cylinder {}, head {}: {} sectors x {} bytes, {}",cylinder,head,count,sec_size,mode_name(mode));
    let n = count as usize;
    let sector_map = verified_get_slice!(buf,p,n,"sector map").to_vec();
    trace!("sector map {:?}",sector_map);
    let cylinder_map = match head_byte & CYL_MAP_FLAG {
        0 => vec![cylinder;n],
        _ => verified_get_slice!(buf,p,n,"cylinder map").to_vec()
    };
    let head_map = match head_byte & HEAD_MAP_FLAG {
        0 => vec![head;n],
        _ => verified_get_slice!(buf,p,n,"head map").to_vec()
    };
    let mut trk = TrackRecord {
        cylinder,
        head,
        declared_sector_count: count,
        mode: Some(mode),
        sectors: Vec::new()
    };
    for i in 0..n {
        let code = verified_get_slice!(buf,p,1,"sector data type")[0];
        let data_type = match SectorData::from_u8(code) {
            Some(t) => t,
            None => {
                log::error!("unknown sector data type {} in cyl {} head {}",code,cylinder,head);
                return Err(Error::InvalidSectorData);
            }
        };
        let payload = match data_type {
            SectorData::None => None,
            t if t.is_compressed() => Some(vec![verified_get_slice!(buf,p,1,"fill byte")[0];sec_size]),
            _ => Some(verified_get_slice!(buf,p,sec_size,"sector data").to_vec())
        };
        if data_type.is_error() {
            stats.crc_errors += 1;
            diagnostics.warn(Kind::CrcMismatch,&format!("sector {} on cyl {} head {} was read with a data error",
                sector_map[i],cylinder,head));
        }
        let class = match payload {
            Some(_) => {
                stats.sectors_read += 1;
                SectorClass::Normal
            },
            None => {
                stats.sectors_skipped += 1;
                SectorClass::Skipped
            }
        };
        trk.sectors.push(SectorRecord {
            cylinder: cylinder_map[i],
            head: head_map[i] & HEAD_MASK,
            sector_number: sector_map[i],
            size_code,
            flags: code,
            class,
            payload
        });
    }
    *ptr = p;
    Ok(trk)
}

/// Parse an IMD image.  The strict option makes a truncated final track fatal.
pub fn parse(bytes: &[u8],opt: &ParseOptions) -> Result<Container,Error> {
    if bytes.len() < 3 || &bytes[0..3] != b"IMD" {
        return Err(Error::ContainerHeaderInvalid);
    }
    let end = match bytes.iter().position(|b| *b==COMMENT_END) {
        Some(i) => i,
        None => {
            log::error!("IMD comment terminator not found");
            return Err(Error::ContainerHeaderInvalid);
        }
    };
    let text = String::from_utf8_lossy(&bytes[0..end]).replace("\r\n","\n");
    let (line,comment) = match text.split_once('\n') {
        Some((l,c)) => (l.trim().to_string(),c.trim().to_string()),
        None => (text.trim().to_string(),String::new())
    };
    info!("identified IMD header `{}`",line);
    let header = Header { line };
    let mut stats = ParseStats::default();
    let mut diagnostics = Diagnostics::new();
    let mut tracks: Vec<TrackRecord> = Vec::new();
    let mut ptr = end + 1;
    while ptr < bytes.len() {
        match parse_track(bytes,&mut ptr,&mut stats,&mut diagnostics) {
            Ok(trk) => tracks.push(trk),
            Err(Error::UnexpectedEnd) if !opt.strict => {
                diagnostics.warn(Kind::UnexpectedEnd,&format!("image ends inside a track record, keeping {} tracks",tracks.len()));
                break;
            },
            Err(e) => return Err(e)
        }
    }
    stats.tracks_processed = tracks.len();
    Ok(Container {
        kind: ImageType::IMD,
        header: HeaderInfo::Imd(header),
        comment: match comment.len() { 0 => None, _ => Some(comment) },
        timestamp: None,
        tracks,
        stats,
        diagnostics
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut ans = b"IMD 1.18: 01/02/1985 10:11:12\r\nsample disk\r\n".to_vec();
        ans.push(COMMENT_END);
        // mode 5, cyl 0, head 0 with head map, 2 sectors of 128 bytes
        ans.extend_from_slice(&[5,0,HEAD_MAP_FLAG,2,0]);
        ans.extend_from_slice(&[1,2]);
        ans.extend_from_slice(&[0,0]);
        ans.push(SectorData::NormalCompressed as u8);
        ans.push(0xe5);
        ans.push(SectorData::Normal as u8);
        ans.extend_from_slice(&[0x42;128]);
        ans
    }

    #[test]
    fn header_and_comment() {
        let c = parse(&sample(),&ParseOptions::default()).expect("parse failed");
        match &c.header {
            HeaderInfo::Imd(h) => assert_eq!(h.version(),Some("1.18".to_string())),
            _ => panic!("wrong header")
        }
        assert_eq!(c.comment,Some("sample disk".to_string()));
        assert_eq!(c.tracks.len(),1);
        assert_eq!(c.tracks[0].sectors[0].payload,Some(vec![0xe5;128]));
        assert_eq!(c.tracks[0].sectors[1].payload,Some(vec![0x42;128]));
        assert_eq!(c.stats.sectors_read,2);
    }

    #[test]
    fn bad_mode() {
        let mut img = sample();
        let start = img.iter().position(|b| *b==COMMENT_END).unwrap() + 1;
        img[start] = 7;
        assert!(matches!(parse(&img,&ParseOptions::default()),Err(Error::InvalidTrackMode)));
    }

    #[test]
    fn truncated_track() {
        let mut img = sample();
        img.truncate(img.len() - 10);
        let c = parse(&img,&ParseOptions::default()).expect("parse failed");
        assert_eq!(c.tracks.len(),0);
        assert!(c.diagnostics.has(Kind::UnexpectedEnd));
        assert!(parse(&img,&ParseOptions { strict: true }).is_err());
    }

    #[test]
    fn modes() {
        assert_eq!(mode_name(0),"500K FM");
        assert_eq!(mode_name(5),"250K MFM");
        assert_eq!(mode_name(6),"unknown");
    }
}
