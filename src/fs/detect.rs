//! ## Format classifier
//!
//! Decides which file system to open an image with.  Each candidate format is scored
//! independently with a confidence between 0 and 1, formats below their acceptance
//! threshold are dropped, and the highest confidence wins.  Raw is always a candidate
//! with a confidence of 0.1, so there is always an answer.
//!
//! Each scorer records the evidence it found as notes, so the decision can be reported.

use log::{debug,trace};
use crate::bios::{bpb,tables};
use crate::fs::Format;
use crate::fs::fat::directory as fat_dir;
use crate::fs::cpm::directory as cpm_dir;

const HP150_THRESHOLD: f64 = 0.3;
const HP150_MAX_INDICATORS: f64 = 8.0;
const FAT_THRESHOLD: f64 = 0.35;
const CPM_THRESHOLD: f64 = 0.4;
const RAW_CONFIDENCE: f64 = 0.1;
const PROBE_LEN: usize = 512;

/// One candidate format with the evidence for it
#[derive(Clone,Debug,PartialEq)]
pub struct Detection {
    pub format: Format,
    pub confidence: f64,
    pub notes: Vec<String>
}

impl Detection {
    fn new(format: Format) -> Self {
        Self { format, confidence: 0.0, notes: Vec::new() }
    }
    pub fn to_json(&self) -> json::JsonValue {
        json::object! {
            format: self.format.to_string(),
            confidence: (self.confidence * 1000.0).round() / 1000.0,
            notes: self.notes.clone()
        }
    }
}

fn u16_at(buf: &[u8],offset: usize) -> Option<u16> {
    buf.get(offset..offset+2).map(|x| u16::from_le_bytes([x[0],x[1]]))
}

fn window(img: &[u8],offset: usize,len: usize) -> &[u8] {
    let beg = offset.min(img.len());
    let end = offset.saturating_add(len).min(img.len());
    &img[beg..end]
}

fn score_hp150(img: &[u8]) -> Detection {
    let mut ans = Detection::new(Format::Hp150Fat);
    let mut indicators = 0.0;
    if img.len() <= tables::HP150_MAX_SIZE {
        indicators += 1.0;
        ans.notes.push(format!("file size ({} bytes) matches HP150 floppy",img.len()));
    }
    if img.len() >= PROBE_LEN {
        match u16_at(img,11) {
            Some(256) => {
                indicators += 2.0;
                ans.notes.push("256-byte sectors detected".to_string());
            },
            Some(bps) if bps==512 || bps==1024 => {
                indicators += 0.5;
                ans.notes.push(format!("{}-byte sectors detected",bps));
            },
            _ => {}
        }
    }
    if let Some((offset,count)) = fat_dir::locate_hp150_root(img) {
        indicators += 3.0;
        ans.notes.push(format!("HP150 directory found at {:#x} with {} entries",offset,count));
        let dir = window(img,offset,PROBE_LEN);
        let patterns = tables::HP150_NAME_PATTERNS.iter()
            .filter(|p| dir.windows(p.len()).any(|w| w==**p))
            .count();
        if patterns > 0 {
            indicators += patterns as f64;
            ans.notes.push(format!("found {} HP150-style names",patterns));
        }
    }
    ans.confidence = f64::min(indicators / HP150_MAX_INDICATORS,1.0);
    ans
}

/// Score out of 6 for how reasonable the BPB fields are
fn bpb_score(boot: &[u8]) -> usize {
    let bps = u16_at(boot,11).unwrap_or(0);
    let spc = boot[13];
    let res = u16_at(boot,14).unwrap_or(0);
    let fats = boot[16];
    let root = u16_at(boot,17).unwrap_or(0);
    let fat_secs = u16_at(boot,22).unwrap_or(0);
    [
        tables::CANDIDATE_SECTOR_SIZES.contains(&bps),
        spc.is_power_of_two() && spc <= 64,
        (1..=32).contains(&res),
        (1..=3).contains(&fats),
        (1..=512).contains(&root),
        (1..=20).contains(&fat_secs)
    ].iter().filter(|x| **x).count()
}

/// Confidence in the FAT header from its media byte and second entry
fn fat_header_score(fat: &[u8]) -> f64 {
    if fat.len() < 3 || !tables::MEDIA_DESCRIPTORS.contains(&fat[0]) {
        return 0.0;
    }
    let entry1 = (fat[1] as u32 >> 4) | ((fat[2] as u32) << 4);
    match entry1 {
        e if e >= 0xff8 => 0.8,
        e if e >= 0xff0 => 0.6,
        _ => 0.5
    }
}

/// Entries with printable names and plausible fields
fn directory_score(root: &[u8]) -> usize {
    let printable = |b: &u8| (0x20..=0x7e).contains(b);
    let mut ans = 0;
    for entry in window(root,0,PROBE_LEN).chunks_exact(32) {
        match entry[0] {
            0x00 => break,
            fat_dir::FREE => continue,
            b if b < 0x20 => continue,
            _ => {}
        }
        let cluster = u16::from_le_bytes([entry[26],entry[27]]);
        let size = u32::from_le_bytes([entry[28],entry[29],entry[30],entry[31]]);
        if entry[0..11].iter().all(printable) && entry[11] < 0x80 && cluster < 1000 && size < 2_000_000 {
            ans += 1;
        }
    }
    ans
}

/// Fraction of the first few files whose start cluster and size are consistent
fn chain_score(root: &[u8],fat: &[u8]) -> f64 {
    // first 8 byte triples of a FAT12 give 16 entries
    let entries = fat.len().saturating_sub(2).min(24).div_ceil(3) * 2;
    let mut consistent = 0;
    let mut total = 0;
    for entry in window(root,0,160).chunks_exact(32) {
        if entry[0]==0 || entry[0]==fat_dir::FREE || entry[0] < 0x20 || entry[11] & 0x18 > 0 {
            continue;
        }
        total += 1;
        let cluster = u16::from_le_bytes([entry[26],entry[27]]) as usize;
        let size = u32::from_le_bytes([entry[28],entry[29],entry[30],entry[31]]) as usize;
        match (size,cluster) {
            (s,c) if s > 0 && c >= 2 && c < entries && s.div_ceil(512) <= 10 => consistent += 1,
            (0,0) => consistent += 1,
            _ => {}
        }
    }
    match total {
        0 => 0.0,
        t => consistent as f64 / t as f64
    }
}

fn score_fat(img: &[u8]) -> Detection {
    let mut ans = Detection::new(Format::Fat);
    if img.len() < PROBE_LEN {
        return ans;
    }
    let boot = &img[0..PROBE_LEN];
    if boot[510..512]==bpb::BOOT_SIGNATURE {
        ans.confidence += 0.15;
        ans.notes.push("valid boot signature found".to_string());
    }
    let score = bpb_score(boot);
    if score >= 5 {
        ans.confidence += 0.4;
        ans.notes.push(format!("strong BPB structure: {}/6 valid fields",score));
        let params = bpb::BootParameters::from_bytes(boot,0).unwrap_or(bpb::BootParameters::new(512,1,1,2,1,1));
        let fat_start = params.fat_start();
        let fat = window(img,fat_start,usize::min(params.fat_size(),PROBE_LEN));
        let header = fat_header_score(fat);
        ans.confidence += header * 0.25;
        if header > 0.5 {
            ans.notes.push("valid FAT table structure detected".to_string());
        }
        let root_start = params.root_dir_start();
        if root_start < img.len() {
            let root = window(img,root_start,params.root_dir_size());
            let valid = directory_score(root);
            if valid > 0 {
                ans.confidence += f64::min(valid as f64 / 10.0,0.2);
                ans.notes.push(format!("found {} valid FAT directory entries",valid));
                let chains = chain_score(root,window(img,fat_start,params.fat_size()));
                ans.confidence += chains * 0.15;
                if chains > 0.5 {
                    ans.notes.push("file cluster chains are consistent".to_string());
                }
            }
        }
    } else if score >= 4 {
        ans.confidence += 0.1;
        ans.notes.push("good BPB but no valid directory entries".to_string());
    }
    let oem: String = boot[3..11].iter().filter(|b| b.is_ascii() && **b!=0).map(|b| *b as char).collect();
    let oem = oem.trim();
    if oem.len() >= 3 {
        ans.confidence += 0.05;
        ans.notes.push(format!("OEM ID: '{}'",oem));
    }
    ans.confidence = f64::min(ans.confidence,1.0);
    ans
}

fn score_cpm(img: &[u8]) -> Detection {
    let mut ans = Detection::new(Format::Cpm);
    if tables::CPM_KNOWN_SIZES.iter().any(|s| s.abs_diff(img.len()) < tables::CPM_SIZE_TOLERANCE) {
        ans.confidence += 0.25;
        ans.notes.push("file size matches CP/M format".to_string());
        if let Some(offset) = cpm_dir::locate(img,cpm_dir::Probe::Quick) {
            ans.confidence += 0.4;
            ans.notes.push(format!("CP/M directory found at {:#x}",offset));
        }
    }
    if img.len()==368640 {
        ans.confidence *= 0.7;
        ans.notes.push("360K size, could be FAT".to_string());
    }
    ans
}

/// Score every format, returning the accepted candidates, most confident first.
/// Raw is always last or better.
pub fn detect(img: &[u8]) -> Vec<Detection> {
    let mut ans: Vec<Detection> = [
        (score_hp150(img),HP150_THRESHOLD),
        (score_fat(img),FAT_THRESHOLD),
        (score_cpm(img),CPM_THRESHOLD)
    ].into_iter().filter_map(|(d,threshold)| {
        trace!("{} scored {:.3}",d.format,d.confidence);
        match d.confidence >= threshold {
            true => Some(d),
            false => None
        }
    }).collect();
    ans.push(Detection {
        format: Format::Raw,
        confidence: RAW_CONFIDENCE,
        notes: vec!["unknown format, hex analysis only".to_string()]
    });
    // stable sort, so ties go to the more specific format
    ans.sort_by(|a,b| b.confidence.total_cmp(&a.confidence));
    ans
}

/// The winning format
pub fn best(img: &[u8]) -> Detection {
    let mut all = detect(img);
    let ans = all.remove(0);
    debug!("detected {} with confidence {:.3}",ans.format,ans.confidence);
    ans
}
