//! ### FAT directory structures
//!
//! This module encapsulates the FAT root directory.  The FAT itself is implemented in
//! `crate::bios::fat`.  The BPB is in `crate::bios::bpb`.
//!
//! On damaged disks the root directory is often not where the BPB says it is, so much of
//! this module is about deciding whether a run of bytes looks like a directory, and finding
//! the run that looks most like one.  Entries themselves may be damaged, an entry with an
//! absurd size gets a second reading before it is thrown out.

use log::{debug,trace};
use super::pack;
use crate::bios::{tables,select};
use crate::diag::{Diagnostics,Kind};
use crate::fs::{FileEntry,attr};

/// Size of the directory entry in bytes, always 32
pub const DIR_ENTRY_SIZE: usize = 32;
/// first name byte for a free entry.
pub const FREE: u8 = 0xe5;
/// first name byte for a free entry, but also indicating no more entries to follow.
const FREE_AND_NO_MORE: u8 = 0x00;
/// first name byte of `.` and `..`
const DOT: u8 = 0x2e;
/// Anything larger cannot be on a floppy
pub const MAX_PLAUSIBLE_SIZE: usize = 2*1024*1024;
/// Counting entries, anything larger is not believed at all
const MAX_COUNTED_SIZE: u32 = 10_000_000;
/// Bytes examined when testing a candidate location
const PROBE_LEN: usize = 512;
/// Entries with this combination are known to be laid out differently
const ODD_LAYOUT: (u32,usize,u8) = (384,0,0x32);

/// Directory dialect, governs name decoding and how damaged entries are treated
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum Dialect {
    Standard,
    Hp150
}

/// How the root directory was located
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum RootMethod {
    /// location suggested by the BPB acquisition
    Hint,
    Calculated,
    /// one of the offsets in `tables::FAT_ALT_DIR_OFFSETS` or `tables::HP150_DIR_OFFSETS`
    Alternate,
    /// exhaustive scan of the image
    Scan,
    /// nothing looked like a directory, the calculated offset is used anyway
    Fallback
}

/// The root directory as loaded
#[derive(Clone,Debug)]
pub struct Directory {
    pub offset: usize,
    /// count of 32 byte slots
    pub slots: usize,
    pub method: RootMethod,
    pub files: Vec<FileEntry>,
    pub label: Option<String>
}

fn u16_at(buf: &[u8],offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset],buf[offset+1]])
}

fn u32_at(buf: &[u8],offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset],buf[offset+1],buf[offset+2],buf[offset+3]])
}

/// Bytes `offset..offset+len` clipped to the image
fn window(img: &[u8],offset: usize,len: usize) -> &[u8] {
    let beg = offset.min(img.len());
    let end = offset.saturating_add(len).min(img.len());
    &img[beg..end]
}

/// Name as ASCII, ignoring anything that is not
fn ascii_name(raw: &[u8]) -> String {
    raw.iter().filter(|b| b.is_ascii()).map(|b| *b as char).collect::<String>().trim().to_string()
}

/// Decode a name field.  Standard names drop unprintable bytes and stop at NUL.
/// HP-150 names also stop at the first space.
pub fn decode_name(raw: &[u8],dialect: Dialect) -> String {
    let mut ans = String::new();
    for b in raw {
        match (*b,dialect) {
            (0x00,_) => break,
            (0x20,Dialect::Hp150) => break,
            (0x20..=0x7e,_) => ans.push(*b as char),
            _ => continue
        }
    }
    ans.trim_end().to_string()
}

/// An entry counted when deciding if a location holds the directory.
/// The name must have 2 or more characters with at least one alphanumeric.
fn is_countable(entry: &[u8]) -> bool {
    let name = ascii_name(&entry[0..8]);
    name.len() >= 2
        && name.chars().any(|c| c.is_ascii_alphanumeric())
        && entry[11] < 0x80
        && u32_at(entry,28) < MAX_COUNTED_SIZE
}

/// Looser form of `is_countable`, a single character, or punctuation seen on HP-150 names, will do.
pub fn is_countable_loose(entry: &[u8]) -> bool {
    let name = ascii_name(&entry[0..8]);
    !name.is_empty()
        && name.chars().any(|c| c.is_ascii_alphanumeric() || "._-+$".contains(c))
        && entry[11] < 0x80
        && u32_at(entry,28) < MAX_COUNTED_SIZE
}

/// Count plausible entries in `buf`, stopping at the end marker.
/// Free entries and entries starting with a control character are not counted.
pub fn count_entries<F>(buf: &[u8],test: F) -> usize where F: Fn(&[u8]) -> bool {
    let mut ans = 0;
    for entry in buf.chunks_exact(DIR_ENTRY_SIZE) {
        match entry[0] {
            FREE_AND_NO_MORE => break,
            FREE => continue,
            b if b < 0x20 => continue,
            _ => if test(entry) {
                ans += 1;
            }
        }
    }
    ans
}

/// Score a scan window as (valid entries, valid/total).  Free entries count toward the total.
fn score_window(buf: &[u8]) -> Option<(usize,f64)> {
    let mut valid = 0;
    let mut total = 0;
    for entry in buf.chunks_exact(DIR_ENTRY_SIZE) {
        match entry[0] {
            FREE_AND_NO_MORE => break,
            FREE => total += 1,
            b if b < 0x20 => continue,
            _ => {
                total += 1;
                if is_countable(entry) {
                    valid += 1;
                }
            }
        }
    }
    match valid >= 3 && total > 0 {
        true => {
            let ratio = valid as f64 / total as f64;
            match ratio >= 0.5 {
                true => Some((valid,ratio)),
                false => None
            }
        },
        false => None
    }
}

/// Find the root directory of a standard FAT volume.  Tries the hint and the calculated
/// location, then the alternate offsets, then a scan of the whole image.
/// If all of that fails the calculated offset is returned along with a diagnostic.
pub fn locate_root(img: &[u8],calculated: usize,dir_size: usize,hint: Option<usize>,diagnostics: &mut Diagnostics) -> (usize,RootMethod) {
    let mut primary: Vec<(usize,RootMethod)> = Vec::new();
    if let Some(h) = hint {
        primary.push((h,RootMethod::Hint));
    }
    primary.push((calculated,RootMethod::Calculated));
    if let Some((offset,method)) = select::first_accepted(&primary,|(offset,_)| {
        let count = count_entries(window(img,*offset,dir_size),is_countable);
        trace!("{} valid entries at {:#x}",count,offset);
        count >= 2
    }) {
        return (*offset,*method);
    }
    debug!("too few entries at {:#x}, searching",calculated);
    let limit = img.len().saturating_sub(tables::DIR_SCAN_STRIDE);
    if let Some(offset) = select::first_accepted(&tables::FAT_ALT_DIR_OFFSETS,|offset| {
        *offset < limit && count_entries(window(img,*offset,PROBE_LEN),is_countable) >= 3
    }) {
        diagnostics.note(Kind::Info,&format!("root directory found at alternate offset {:#x}",offset));
        return (*offset,RootMethod::Alternate);
    }
    let scan: Vec<usize> = (0..limit).step_by(tables::DIR_SCAN_STRIDE).collect();
    if let Some((offset,(valid,_))) = select::best_candidate(&scan,|offset| score_window(window(img,*offset,tables::DIR_SCAN_STRIDE))) {
        diagnostics.note(Kind::Info,&format!("root directory found by scan at {:#x} with {} entries",offset,valid));
        return (*offset,RootMethod::Scan);
    }
    diagnostics.warn(Kind::DirectoryNotFound,&format!("no directory found, using calculated offset {:#x}",calculated));
    (calculated,RootMethod::Fallback)
}

/// Find the root directory of an HP-150 disk, best count over the compatibility offsets, needing at least 3.
pub fn locate_hp150_root(img: &[u8]) -> Option<(usize,usize)> {
    select::best_above(&tables::HP150_DIR_OFFSETS,3,|offset| {
        match *offset < img.len() {
            true => Some(count_entries(window(img,*offset,PROBE_LEN),is_countable_loose)),
            false => None
        }
    }).map(|(offset,count)| (*offset,count))
}

/// Second reading of an entry whose fields do not make sense.  Looks for a small cluster
/// number and a small size anywhere in the reserved and time fields.
/// Returns (ext,attributes,cluster,size).
fn reinterpret(entry: &[u8]) -> (String,u8,u32,usize) {
    let ext_raw = ascii_name(&entry[8..11]);
    let ext = match ext_raw.chars().all(|c| c.is_ascii_alphanumeric() || c=='.' || c=='_') {
        true => ext_raw,
        false => String::new()
    };
    let cluster = (12..30).step_by(2)
        .map(|i| u16_at(entry,i) as u32)
        .find(|v| (2..=1000).contains(v))
        .unwrap_or(0);
    let size = (12..28).step_by(2)
        .map(|i| u16_at(entry,i) as usize)
        .find(|v| *v > 0)
        .or_else(|| (12..26).step_by(4).map(|i| u32_at(entry,i) as usize).find(|v| *v > 0 && *v < 100000))
        .unwrap_or(1024);
    (ext,attr::ARCHIVE,cluster,size)
}

fn is_system_name(name: &str) -> bool {
    tables::HP150_SYSTEM_NAMES.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// Parse the directory at `offset` with `slots` entries
pub fn load(img: &[u8],offset: usize,slots: usize,method: RootMethod,dialect: Dialect,diagnostics: &mut Diagnostics) -> Directory {
    let mut ans = Directory { offset, slots, method, files: Vec::new(), label: None };
    let buf = window(img,offset,slots*DIR_ENTRY_SIZE);
    for (i,entry) in buf.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
        match entry[0] {
            FREE_AND_NO_MORE => break,
            FREE | DOT => continue,
            b if b < 0x20 => continue,
            _ => {}
        }
        let mut attributes = entry[11];
        if attributes==attr::LONG_NAME {
            trace!("skipping long name entry {}",i);
            continue;
        }
        let name = decode_name(&entry[0..8],dialect);
        let mut ext = decode_name(&entry[8..11],dialect);
        let mut cluster = u16_at(entry,26) as u32;
        let mut size = u32_at(entry,28) as usize;
        if name.is_empty() {
            continue;
        }
        if size > MAX_PLAUSIBLE_SIZE || (cluster,size,attributes)==ODD_LAYOUT {
            if dialect==Dialect::Hp150 {
                diagnostics.warn(Kind::EntryDiscarded,&format!("{} has implausible size {}, skipping",name,size));
                continue;
            }
            (ext,attributes,cluster,size) = reinterpret(entry);
            diagnostics.warn(Kind::EntryReinterpreted,&format!("{} reinterpreted as cluster {} size {}",name,cluster,size));
            if size > MAX_PLAUSIBLE_SIZE {
                diagnostics.warn(Kind::EntryDiscarded,&format!("{} still has implausible size, skipping",name));
                continue;
            }
        }
        if attributes & attr::VOLUME_ID > 0 {
            let label = match ext.len() {
                0 => name.clone(),
                _ => [name.as_str(),".",ext.as_str()].concat()
            };
            debug!("volume label {}",label);
            ans.label = Some(label);
            continue;
        }
        let system_file = dialect==Dialect::Hp150 && attributes & attr::HIDDEN > 0 && is_system_name(&name);
        ans.files.push(FileEntry {
            modified: pack::unpack_timestamp([entry[22],entry[23]],[entry[24],entry[25]]),
            name,
            ext,
            attributes,
            start: cluster,
            size,
            entry_offset: offset + i*DIR_ENTRY_SIZE,
            user: None,
            system_file
        });
    }
    ans
}

/// Offset of the first free slot in the directory
pub fn free_slot(img: &[u8],dir: &Directory) -> Option<usize> {
    (0..dir.slots)
        .map(|i| dir.offset + i*DIR_ENTRY_SIZE)
        .take_while(|off| off + DIR_ENTRY_SIZE <= img.len())
        .find(|off| img[*off]==FREE_AND_NO_MORE || img[*off]==FREE)
}

/// Build a fresh entry, the time stamp is the current local time unless `time` is given
pub fn create_entry(name: &str,attributes: u8,cluster: u32,size: usize,time: Option<chrono::NaiveDateTime>) -> [u8;DIR_ENTRY_SIZE] {
    let mut ans = [0;DIR_ENTRY_SIZE];
    let (base,ext) = pack::string_to_file_name(name);
    ans[0..8].copy_from_slice(&base);
    ans[8..11].copy_from_slice(&ext);
    ans[11] = attributes;
    ans[22..24].copy_from_slice(&pack::pack_time(time));
    ans[24..26].copy_from_slice(&pack::pack_date(time));
    ans[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
    ans[28..32].copy_from_slice(&(size as u32).to_le_bytes());
    ans
}
