//! ## Support for TD0 disk images
//!
//! The assumptions herein are largely based on Dave Dunfield's notes found in the
//! ImageDisk package.  The creators of the TD0 format never revealed its details, so
//! the parser is lenient: anything it has to guess about goes into the diagnostics.
//!
//! Layout of the (expanded) stream:
//! * 12 byte image header, signature `TD` (normal) or `td` (advanced compression)
//! * optional comment block, present if the high bit of the stepping byte is set
//! * track records, each a 4 byte header followed by sector records, until a track
//!   header whose sector count is 0xff
//! * sector records, each a 6 byte header optionally followed by a data record

use num_traits::FromPrimitive;
use num_derive::FromPrimitive;
use log::{trace,debug,info};
use super::{Error,SectorClass,SectorRecord,TrackRecord,ParseOptions,ParseStats,Container,HeaderInfo,ImageType,SequenceFault};
use super::lzhuf;
use crate::diag::{Diagnostics,Kind};

macro_rules! verified_get_byte {
    ($buf:expr,$ptr:expr,$loc:expr) => {
        match $ptr < $buf.len() {
            true => {
                $ptr += 1;
                $buf[$ptr-1]
            },
            false => {
                debug!("out of data in {}",$loc);
                return Err(Error::UnexpectedEnd);
            }
        }
    };
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

#[derive(FromPrimitive)]
pub enum SectorEncoding {
    Raw = 0,
    Repeated = 1,
    RunLength = 2
}

const HEAD_MASK: u8 = 0x01;
const NO_DATA_MASK: u8 = 0x30;
const RATE_MASK: u8 = 0x03;
const FM_MASK: u8 = 0x80;
const STEPPING_MASK: u8 = 0x03;
const COMMENT_MASK: u8 = 0x80;
const END_OF_TRACKS: u8 = 0xff;
/// sector numbers with both of these bits set are duplicator padding
pub const PHANTOM_MASK: u8 = 0x60;
/// sector number that ends the useful part of a track
pub const TERMINATOR: u8 = 0x65;

pub const FLAG_DUP_SEC: u8 = 0x01;
pub const FLAG_CRC_ERR: u8 = 0x02;
pub const FLAG_DEL_DAT: u8 = 0x04;
pub const FLAG_SKIPPED: u8 = 0x10;
pub const FLAG_NO_DAT: u8 = 0x20;
pub const FLAG_NO_ID: u8 = 0x40;

pub fn file_extensions() -> Vec<String> {
    vec!["td0".to_string()]
}

/// Calculate the checksum for the TD0 data in `buf`
pub fn crc16(crc_seed: u16, buf: &[u8]) -> u16
{
    let mut crc: u16 = crc_seed;
    for b in buf {
        crc ^= (*b as u16) << 8;
        for _bit in 0..8 {
            crc = (crc << 1) ^ match crc & 0x8000 { 0 => 0, _ => 0xa097 };
        }
    }
    crc
}

/// Short description of the sector flags, e.g., `crc,deleted`
pub fn describe_flags(flags: u8) -> String {
    let names = [
        (FLAG_DUP_SEC,"duplicate"),
        (FLAG_CRC_ERR,"crc"),
        (FLAG_DEL_DAT,"deleted"),
        (FLAG_SKIPPED,"dos-skipped"),
        (FLAG_NO_DAT,"no-data"),
        (FLAG_NO_ID,"no-id")
    ];
    let ans: Vec<&str> = names.iter().filter(|(m,_)| flags & m > 0).map(|(_,s)| *s).collect();
    ans.join(",")
}

/// Classify a sector by its number and flags.  The terminator takes precedence over
/// the phantom pattern, which it would otherwise match.
pub fn classify(sector_number: u8,flags: u8) -> SectorClass {
    if sector_number == TERMINATOR {
        SectorClass::Terminator
    } else if sector_number & PHANTOM_MASK == PHANTOM_MASK {
        SectorClass::Phantom
    } else if flags & NO_DATA_MASK > 0 {
        SectorClass::Skipped
    } else {
        SectorClass::Normal
    }
}

/// Decoded TD0 image header
#[derive(Clone,Debug)]
pub struct Header {
    /// signature was `td`
    pub compressed: bool,
    /// usually 0, could increment for each disk in a set
    pub sequence: u8,
    pub check_sequence: u8,
    /// major version in high nibble, minor version in low nibble
    pub version: u8,
    /// 0=250kpbs,1=300kpbs,2=500kpbs, high bit on=FM
    pub data_rate: u8,
    pub drive_type: u8,
    /// high bit indicates comment block
    pub stepping: u8,
    pub dos_alloc_flag: u8,
    pub sides: u8,
    pub crc: u16
}

struct CommentHeader {
    crc: u16,
    data_length: u16,
    /// bytes: year since 1900, month, day, hour, minute, second
    timestamp: [u8;6]
}

impl Header {
    fn from_bytes(buf: &[u8]) -> Result<Self,Error> {
        if buf.len() < 12 {
            return Err(Error::ContainerHeaderInvalid);
        }
        let compressed = match &buf[0..2] {
            b"td" => true,
            b"TD" => false,
            _ => return Err(Error::ContainerHeaderInvalid)
        };
        Ok(Self {
            compressed,
            sequence: buf[2],
            check_sequence: buf[3],
            version: buf[4],
            data_rate: buf[5],
            drive_type: buf[6],
            stepping: buf[7],
            dos_alloc_flag: buf[8],
            sides: buf[9],
            crc: u16::from_le_bytes([buf[10],buf[11]])
        })
    }
    pub fn has_comment(&self) -> bool {
        self.stepping & COMMENT_MASK > 0
    }
    pub fn heads(&self) -> usize {
        match self.sides { 1 => 1, _ => 2 }
    }
    pub fn to_json(&self) -> json::JsonValue {
        let rate = match (self.data_rate & RATE_MASK,self.data_rate & FM_MASK) {
            (0,0) => "MFM 250 kpbs",
            (1,0) => "MFM 300 kbps",
            (2,0) => "MFM 500 kbps",
            (0,128) => "FM 250 kbps",
            (1,128) => "FM 300 kbps",
            (2,128) => "FM 500 kbps",
            _ => "unexpected value"
        };
        let drive = match self.drive_type {
            0 | 1 | 2 => "5.25in",
            3 => "3.0in",
            4 | 6 => "3.5in",
            5 => "8.0in",
            _ => "unexpected value"
        };
        let stepping = match self.stepping & STEPPING_MASK {
            0 => "single step",
            1 => "double step",
            2 => "even only step (96 tpi disk in 48 tpi drive)",
            _ => "unexpected value"
        };
        let compression = match self.compressed { true => "advanced", false => "normal" };
        json::object! {
            compression: compression,
            sequence: self.sequence,
            check_sequence: self.check_sequence,
            version: format!("{}.{}",self.version >> 4,self.version & 0x0f),
            data_rate: rate,
            drive_type: drive,
            stepping: stepping,
            dos_alloc_flag: self.dos_alloc_flag,
            sides: self.heads()
        }
    }
}

impl CommentHeader {
    fn unpack_timestamp(&self) -> Option<chrono::NaiveDateTime> {
        match chrono::NaiveDate::from_ymd_opt(1900+self.timestamp[0] as i32,
            self.timestamp[1] as u32, self.timestamp[2] as u32) {
            Some(d) => d.and_hms_opt(self.timestamp[3] as u32,self.timestamp[4] as u32,self.timestamp[5] as u32),
            None => None
        }
    }
}

/// Result of unpacking a data record
pub struct Unpacked {
    pub data: Vec<u8>,
    /// the encoded data produced a full sector
    pub complete: bool
}

/// Unpack sector data.  Decoding stops early if the encoded bytes run out, whatever was
/// produced is returned, truncated to `sector_size`.  An unknown encoding is passed through raw.
pub fn unpack(encoding: u8,dat: &[u8],sector_size: usize) -> Unpacked {
    let mut ans: Vec<u8> = Vec::new();
    let mut ptr: usize = 0;
    match SectorEncoding::from_u8(encoding) {
        Some(SectorEncoding::Repeated) => {
            trace!("found repeating pattern chunk");
            while ans.len() < sector_size && ptr + 4 <= dat.len() {
                let count = u16::from_le_bytes([dat[ptr],dat[ptr+1]]) as usize;
                for _i in 0..count {
                    ans.push(dat[ptr+2]);
                    ans.push(dat[ptr+3]);
                }
                ptr += 4;
            }
        },
        Some(SectorEncoding::RunLength) => {
            trace!("found run length encoded chunk");
            while ans.len() < sector_size && ptr < dat.len() {
                let read_count = 2*(dat[ptr] as usize);
                ptr += 1;
                if ptr >= dat.len() {
                    break;
                }
                if read_count==0 {
                    let rw_count = dat[ptr] as usize;
                    ptr += 1;
                    let end = usize::min(ptr + rw_count,dat.len());
                    ans.extend_from_slice(&dat[ptr..end]);
                    ptr = end;
                } else {
                    let repeat = dat[ptr] as usize;
                    ptr += 1;
                    if ptr + read_count > dat.len() {
                        break;
                    }
                    for _i in 0..repeat {
                        ans.extend_from_slice(&dat[ptr..ptr+read_count]);
                    }
                    ptr += read_count;
                }
            }
        },
        _ => {
            trace!("found raw chunk");
            ans.extend_from_slice(&dat[0..usize::min(sector_size,dat.len())]);
        }
    }
    let complete = ans.len() >= sector_size;
    ans.truncate(sector_size);
    Unpacked { data: ans, complete }
}

struct Parser<'a> {
    buf: &'a [u8],
    ptr: usize,
    strict: bool,
    stats: ParseStats,
    diagnostics: Diagnostics
}

impl <'a> Parser<'a> {
    /// Read a data record and unpack it.  A record that runs past the end of the stream
    /// yields what is there, the next read will then report the end.
    fn read_data(&mut self,trk: &TrackRecord,id: u8,sector_size: usize) -> Result<Vec<u8>,Error> {
        let buf = self.buf;
        let loc = "data header of sector ".to_string() + &u8::to_string(&id);
        let len_bytes = verified_get_slice!(buf,self.ptr,2,&loc);
        let declared = u16::from_le_bytes([len_bytes[0],len_bytes[1]]) as usize;
        let available = usize::min(declared,buf.len() - self.ptr);
        let rec = &buf[self.ptr..self.ptr+available];
        self.ptr += available;
        if available < declared {
            self.diagnostics.warn(Kind::UnexpectedEnd,&format!("data record of cyl {} head {} sector {} is cut short",
                trk.cylinder,trk.head,id));
        }
        if rec.len() == 0 {
            return Ok(Vec::new());
        }
        if SectorEncoding::from_u8(rec[0]).is_none() {
            self.diagnostics.warn(Kind::Info,&format!("unknown encoding {} in cyl {} sector {}, taken as raw",
                rec[0],trk.cylinder,id));
        }
        let unpacked = unpack(rec[0],&rec[1..],sector_size);
        if !unpacked.complete {
            self.diagnostics.warn(Kind::UnexpectedEnd,&format!("cyl {} head {} sector {} decoded to {} of {} bytes",
                trk.cylinder,trk.head,id,unpacked.data.len(),sector_size));
        }
        Ok(unpacked.data)
    }
    /// Check the next normal sector number against the expected one.
    /// Returns the class the sector should carry.
    fn check_sequence(&mut self,trk: &TrackRecord,expected: usize,actual: u8) -> Result<SectorClass,Error> {
        let fault = match actual as usize {
            n if n == expected => return Ok(SectorClass::Normal),
            n if n > expected => SequenceFault::Skip(n - expected),
            _ => SequenceFault::Repeat(actual)
        };
        if self.strict {
            log::error!("cyl {} head {}: {}",trk.cylinder,trk.head,fault);
            return Err(Error::SectorSequenceMismatch(fault));
        }
        match fault {
            SequenceFault::Skip(n) => {
                self.stats.sectors_skipped += n;
                let msg = format!("skipping {} sectors ({} through {}) on cyl {} head {}",
                    n,expected,actual as usize - 1,trk.cylinder,trk.head);
                // a track numbered from 1 is only noted
                match (expected,actual) {
                    (0,1) => self.diagnostics.note(Kind::SectorSkip,&msg),
                    _ => self.diagnostics.warn(Kind::SectorSkip,&msg)
                }
                Ok(SectorClass::Normal)
            },
            SequenceFault::Repeat(_) => {
                self.stats.sectors_repeated += 1;
                self.diagnostics.warn(Kind::SectorRepeat,&format!("repeating sector {} on cyl {} head {}",
                    actual,trk.cylinder,trk.head));
                Ok(SectorClass::Repeated)
            }
        }
    }
    fn parse_sectors(&mut self,trk: &mut TrackRecord) -> Result<(),Error> {
        let buf = self.buf;
        let mut expected: usize = 0;
        for i in 0..trk.declared_sector_count {
            let h = verified_get_slice!(buf,self.ptr,6,"sector header");
            let (cylinder,head,id,size_code,flags,crc) = (h[0],h[1],h[2],h[3],h[4],h[5]);
            let sector_size = super::sector_size(size_code);
            trace!("get sector {}, size {}",id,sector_size);
            if flags != 0 {
                debug!("sector {} flags {}",id,describe_flags(flags));
            }
            let payload = match flags & NO_DATA_MASK {
                0 => Some(self.read_data(trk,id,sector_size)?),
                _ => None
            };
            let mut class = classify(id,flags);
            let mut rec = SectorRecord { cylinder, head, sector_number: id, size_code, flags, class, payload: None };
            match class {
                SectorClass::Terminator => {
                    debug!("terminator sector in record {} of cyl {}",i,trk.cylinder);
                    trk.sectors.push(rec);
                    break;
                },
                SectorClass::Phantom => {
                    self.stats.phantom_sectors += 1;
                    self.diagnostics.note(Kind::PhantomSector,&format!("dropping phantom sector {:#04x} on cyl {} head {}",
                        id,trk.cylinder,trk.head));
                    trk.sectors.push(rec);
                    continue;
                },
                SectorClass::Skipped => {
                    self.stats.sectors_skipped += 1;
                    trace!("sector {} has no data",id);
                    trk.sectors.push(rec);
                    continue;
                },
                _ => {}
            }
            class = self.check_sequence(trk,expected,id)?;
            self.stats.sectors_read += 1;
            expected = id as usize + 1;
            if let Some(dat) = &payload {
                if dat.len() == sector_size && crc != (crc16(0,dat) & 0xff) as u8 {
                    self.stats.crc_errors += 1;
                    self.diagnostics.warn(Kind::CrcMismatch,&format!("sector CRC mismatch in cyl {} head {} sector {}",
                        trk.cylinder,trk.head,id));
                }
            }
            rec.class = class;
            rec.payload = payload;
            trk.sectors.push(rec);
        }
        Ok(())
    }
    /// Parse one track record, returns false when the end marker is reached.
    fn parse_track(&mut self,tracks: &mut Vec<TrackRecord>) -> Result<bool,Error> {
        let buf = self.buf;
        let count = verified_get_byte!(buf,self.ptr,"track header");
        if count == END_OF_TRACKS {
            return Ok(false);
        }
        let h = verified_get_slice!(buf,self.ptr,3,"track header");
        let (cylinder,head,crc) = (h[0],h[1],h[2]);
        // We will not stop for bad track CRC, but do warn
        if crc != (crc16(0,&[count,cylinder,head]) & 0xff) as u8 {
            self.stats.crc_errors += 1;
            self.diagnostics.warn(Kind::CrcMismatch,&format!("track header CRC mismatch at cyl {} head {}",cylinder,head));
        }
        trace!("found cyl {} head {} with {} sectors",cylinder,head,count);
        tracks.push(TrackRecord {
            cylinder,
            head: head & HEAD_MASK,
            declared_sector_count: count,
            mode: None,
            sectors: Vec::new()
        });
        let n = tracks.len() - 1;
        self.parse_sectors(&mut tracks[n])?;
        Ok(true)
    }
}

/// Parse a TD0 image, expanding it first if needed.
pub fn parse(bytes: &[u8],opt: &ParseOptions) -> Result<Container,Error> {
    let mut ptr: usize = 0;
    let header = Header::from_bytes(verified_get_slice!(bytes,ptr,12,"image header"))?;
    let mut diagnostics = Diagnostics::new();
    let mut stats = ParseStats::default();
    match header.compressed {
        true => info!("TD0 signature found (advanced compression)"),
        false => info!("TD0 signature found (no advanced compression)")
    }
    if header.crc != crc16(0,&bytes[0..10]) {
        stats.crc_errors += 1;
        diagnostics.warn(Kind::CrcMismatch,"image header CRC mismatch");
    }
    let expanded = match header.compressed {
        true => [bytes[0..12].to_vec(),lzhuf::expand(&bytes[12..])].concat(),
        false => bytes.to_vec()
    };
    let mut comment: Option<String> = None;
    let mut timestamp: Option<chrono::NaiveDateTime> = None;
    if header.has_comment() {
        let h = verified_get_slice!(expanded,ptr,10,"comment header");
        let comment_header = CommentHeader {
            crc: u16::from_le_bytes([h[0],h[1]]),
            data_length: u16::from_le_bytes([h[2],h[3]]),
            timestamp: [h[4],h[5],h[6],h[7],h[8],h[9]]
        };
        let comment_len = comment_header.data_length as usize;
        let text = verified_get_slice!(expanded,ptr,comment_len,"comment data");
        // CRC of comment
        if comment_header.crc != crc16(0,&expanded[14..22+comment_len]) {
            stats.crc_errors += 1;
            diagnostics.warn(Kind::CrcMismatch,"comment area CRC mismatch");
        }
        let s = String::from_utf8_lossy(text).replace('\x00',"\n");
        debug!("comment data `{}`",s);
        comment = Some(s.trim_end().to_string());
        timestamp = comment_header.unpack_timestamp();
    }
    let mut parser = Parser {
        buf: &expanded,
        ptr,
        strict: opt.strict,
        stats,
        diagnostics
    };
    let mut tracks: Vec<TrackRecord> = Vec::new();
    let status = loop {
        match parser.parse_track(&mut tracks) {
            Ok(true) => continue,
            Ok(false) => break Ok(()),
            Err(e) => break Err(e)
        }
    };
    match status {
        Ok(()) => {},
        Err(Error::UnexpectedEnd) if !opt.strict => {
            let kind = match header.compressed { true => Kind::DecompressionTruncated, false => Kind::UnexpectedEnd };
            parser.diagnostics.warn(kind,&format!("image ended before the end of tracks marker, keeping {} tracks",tracks.len()));
        },
        Err(e) => return Err(e)
    }
    parser.stats.tracks_processed = tracks.len();
    debug!("parsed {} tracks",tracks.len());
    Ok(Container {
        kind: ImageType::TD0,
        header: HeaderInfo::Td0(header),
        comment,
        timestamp,
        tracks,
        stats: parser.stats,
        diagnostics: parser.diagnostics
    })
}
