//! ### CP/M directory structures
//!
//! The fundamental structure is a 32-byte entry.  The directory is nothing other than
//! a packed sequence of entries.  Every entry is an "extent," i.e., a partial directory
//! entry pointing to up to 16K of a file's data.  Larger files need more extents, which
//! share the name and are told apart by the extent index.
//!
//! All information about file locations is contained in the extents, in
//! particular, there is no separate file index or volume bitmap.

use log::{debug,trace};
use crate::bios::{tables,select};

pub const ENTRY_SIZE: usize = 32;
/// user number of a deleted or unused entry
pub const DELETED: u8 = 0xe5;
/// user numbers are less than this
pub const USER_END: u8 = 16;
pub const RECORD_SIZE: usize = 128;
/// capacity of one (logical) extent in bytes
pub const EXTENT_CAPACITY: usize = 16384;
/// bytes read from the directory location
pub const DIR_WINDOW: usize = 2048;
/// entries examined when deciding if an offset holds a directory
const MAX_CHECKED: usize = 16;

/// How strictly a candidate directory is examined
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum Probe {
    /// examine the first 1024 bytes, a name must start with printable characters
    Strict,
    /// examine the first 512 bytes, any printable character in the name will do
    Quick
}

/// One directory entry, or after merging, one file.
#[derive(Clone,Debug,PartialEq)]
pub struct CpmFileInfo {
    pub name: String,
    pub ext: String,
    pub user: u8,
    /// extent index, after merging this is the highest index
    pub extent: u8,
    /// records used in the (last) extent
    pub records: u8,
    /// nonzero allocation blocks in extent order
    pub blocks: Vec<u8>,
    /// bytes implied by the extents and record count
    pub size: usize,
    pub read_only: bool,
    pub system: bool,
    /// image offset of the first entry seen for this file
    pub offset: usize
}

impl CpmFileInfo {
    pub fn full_name(&self) -> String {
        match self.ext.len() {
            0 => self.name.clone(),
            _ => [self.name.as_str(),".",self.ext.as_str()].concat()
        }
    }
}

/// Mask the attribute bits and keep the printable characters, spaces are dropped
pub fn clean_name(raw: &[u8]) -> String {
    raw.iter()
        .map(|b| b & 0x7f)
        .filter(|b| *b > 0x20 && *b < 0x7f)
        .map(|b| b as char)
        .collect()
}

fn is_printable(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

/// Printable characters in the 11 byte name area.  The strict count stops
/// at the first byte that is neither printable nor padding.
fn printable_in_name(area: &[u8],probe: Probe) -> usize {
    match probe {
        Probe::Quick => area.iter().filter(|b| is_printable(**b)).count(),
        Probe::Strict => {
            let mut ans = 0;
            for b in area {
                match *b {
                    b if is_printable(b) => ans += 1,
                    0x00 => continue,
                    _ => break
                }
            }
            ans
        }
    }
}

/// Does `offset` look like the start of a CP/M directory.  Needs at least 2 entries with
/// a user number and a name among the first 16 live entries.
pub fn looks_like_directory(img: &[u8],offset: usize,probe: Probe) -> bool {
    let (read,span) = match probe {
        Probe::Strict => (DIR_WINDOW,1024),
        Probe::Quick => (1024,512)
    };
    if offset >= img.len() {
        return false;
    }
    let buf = &img[offset..usize::min(offset+read,img.len())];
    let buf = &buf[0..usize::min(span,buf.len())];
    let mut valid = 0;
    let mut checked = 0;
    for entry in buf.chunks_exact(ENTRY_SIZE) {
        match entry[0] {
            DELETED => continue,
            u if u < USER_END => {
                if printable_in_name(&entry[1..12],probe) >= 1 {
                    valid += 1;
                }
                checked += 1;
                if checked >= MAX_CHECKED {
                    break;
                }
            },
            _ => continue
        }
    }
    trace!("{} of {} entries valid at {:#x}",valid,checked,offset);
    valid >= 2 && checked > 0
}

/// First offset in the CP/M candidate table that holds a directory
pub fn locate(img: &[u8],probe: Probe) -> Option<usize> {
    select::first_accepted(&tables::CPM_DIR_OFFSETS,|off| looks_like_directory(img,*off,probe)).copied()
}

/// Parse every live entry in the directory window, in directory order
pub fn parse_entries(img: &[u8],offset: usize) -> Vec<CpmFileInfo> {
    let mut ans = Vec::new();
    if offset >= img.len() {
        return ans;
    }
    let buf = &img[offset..usize::min(offset+DIR_WINDOW,img.len())];
    for (i,entry) in buf.chunks_exact(ENTRY_SIZE).enumerate() {
        if entry[0]==DELETED || entry[0] >= USER_END {
            continue;
        }
        let name = clean_name(&entry[1..9]);
        if name.is_empty() {
            continue;
        }
        let records = entry[15];
        ans.push(CpmFileInfo {
            name,
            ext: clean_name(&entry[9..12]),
            user: entry[0],
            extent: entry[12],
            records,
            blocks: entry[16..32].iter().copied().filter(|b| *b!=0).collect(),
            size: records as usize * RECORD_SIZE,
            read_only: entry[9] & 0x80 > 0,
            system: entry[10] & 0x80 > 0,
            offset: offset + i*ENTRY_SIZE
        });
    }
    ans
}

/// Merge the extents of each file.  Blocks are concatenated in extent order, every extent
/// but the last counts as full, the last contributes its record count.
/// Files are kept in the order their first entry appears.
pub fn merge_extents(entries: &[CpmFileInfo]) -> Vec<CpmFileInfo> {
    let mut order: Vec<String> = Vec::new();
    for e in entries {
        let key = e.full_name();
        if !order.contains(&key) {
            order.push(key);
        }
    }
    let mut ans = Vec::new();
    for key in order {
        let mut group: Vec<&CpmFileInfo> = entries.iter().filter(|e| e.full_name()==key).collect();
        // stable, so duplicate indices keep directory order
        group.sort_by_key(|e| e.extent);
        let first = group[0];
        let last = group[group.len()-1];
        let mut file = first.clone();
        file.blocks = group.iter().flat_map(|e| e.blocks.iter().copied()).collect();
        file.extent = last.extent;
        file.records = last.records;
        file.size = (group.len()-1) * EXTENT_CAPACITY + last.records as usize * RECORD_SIZE;
        file.offset = group.iter().map(|e| e.offset).min().unwrap_or(first.offset);
        if group.len() > 1 {
            debug!("{} has {} extents, {} bytes",key,group.len(),file.size);
        }
        ans.push(file);
    }
    ans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(user: u8,name: &[u8;11],extent: u8,records: u8,blocks: &[u8]) -> Vec<u8> {
        let mut ans = vec![0;32];
        ans[0] = user;
        ans[1..12].copy_from_slice(name);
        ans[12] = extent;
        ans[15] = records;
        ans[16..16+blocks.len()].copy_from_slice(blocks);
        ans
    }

    #[test]
    fn names() {
        assert_eq!(clean_name(b"LETTER  "),"LETTER");
        assert_eq!(clean_name(&[b'T'|0x80,b'X',b'T']),"TXT");
        assert_eq!(clean_name(&[0x01,b'A',0x20]),"A");
    }

    #[test]
    fn probing() {
        let mut img = vec![DELETED;0x4000];
        let dir = [entry(0,b"LETTER  TXT",0,10,&[2]),entry(0,b"WS      COM",0,64,&[3,4,5,6,7,8,9,10])].concat();
        img[0x3c00..0x3c00+64].copy_from_slice(&dir);
        assert!(looks_like_directory(&img,0x3c00,Probe::Strict));
        assert!(looks_like_directory(&img,0x3c00,Probe::Quick));
        assert!(!looks_like_directory(&img,0x3000,Probe::Strict));
        assert_eq!(locate(&img,Probe::Strict),Some(0x3c00));
        // attribute bit on the first name byte fails the strict probe only
        img[0x3c01] |= 0x80;
        img[0x3c21] |= 0x80;
        assert!(!looks_like_directory(&img,0x3c00,Probe::Strict));
        assert!(looks_like_directory(&img,0x3c00,Probe::Quick));
    }

    #[test]
    fn extents_merge_in_order() {
        let blocks0: Vec<u8> = (10..26).collect();
        let mut img = vec![0;4096];
        let dir = [
            entry(0,b"LETTER  TXT",1,10,&[30,31]),
            entry(DELETED,b"OLD     TXT",0,1,&[40]),
            entry(0,b"LETTER  TXT",0,128,&blocks0),
            entry(1,b"NOTE    DOC",0,3,&[50])
        ].concat();
        img[0..128].copy_from_slice(&dir);
        let entries = parse_entries(&img,0);
        assert_eq!(entries.len(),3);
        let files = merge_extents(&entries);
        assert_eq!(files.len(),2);
        assert_eq!(files[0].full_name(),"LETTER.TXT");
        assert_eq!(files[0].size,128*128 + 10*128);
        assert_eq!(files[0].blocks.len(),18);
        assert_eq!(files[0].blocks[0],10);
        assert_eq!(files[0].blocks[17],31);
        assert_eq!(files[0].offset,0);
        assert_eq!(files[1].user,1);
        assert_eq!(files[1].size,384);
    }
}
