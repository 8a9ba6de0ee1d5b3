//! # File System Module
//!
//! File system modules handle interactions with directories and files.  There is a sub-module for
//! each supported file system:
//! * `fat` handles FAT12/16/32 volumes, including the HP-150 variant with its own layout
//! * `cpm` handles CP/M directories (Osborne-1 style layout)
//! * `raw` is the fallback when nothing is recognized, it only offers analysis
//!
//! File systems are represented by the `DiskFS` trait.  The trait object takes ownership of
//! the flat image bytes, which it uses as storage.  Changes are not permanent until the bytes
//! are saved to whatever file system is hosting flopkit.
//!
//! The file system on an image is chosen once, by the scoring in `detect`, and the result
//! is kept in the closed enumeration `Handle`.

pub mod fat;
pub mod cpm;
pub mod raw;
pub mod detect;

use std::fmt;
use log::error;
use crate::diag::Diagnostics;
use crate::{DYNERR,STDRESULT};

/// Enumerates file system errors.  The `Display` trait will print equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("boot parameters are invalid")]
    BpbInvalid,
    #[error("directory not found")]
    DirectoryNotFound,
    #[error("file not found")]
    FileNotFound,
    #[error("file too large for its allocation")]
    FileTooLarge,
    #[error("not enough free space")]
    NoFreeSpace,
    #[error("no free directory entry")]
    NoFreeDirectoryEntry,
    #[error("file already exists")]
    DuplicateFile,
    #[error("invalid file name")]
    InvalidName,
    #[error("operation not supported by this file system")]
    Unsupported,
    #[error("image is empty")]
    EmptyImage
}

/// FAT attribute bits, CP/M entries are given `ARCHIVE` so they look like plain files.
pub mod attr {
    pub const READ_ONLY: u8 = 1;
    pub const HIDDEN: u8 = 2;
    pub const SYSTEM: u8 = 4;
    pub const VOLUME_ID: u8 = 8;
    pub const DIRECTORY: u8 = 16;
    pub const ARCHIVE: u8 = 32;
    pub const LONG_NAME: u8 = 15;
}

/// A file as found in a directory.  This is a snapshot, it is rebuilt whenever
/// the directory changes.
#[derive(Clone,Debug,PartialEq)]
pub struct FileEntry {
    pub name: String,
    pub ext: String,
    /// FAT attribute bits, see `attr`
    pub attributes: u8,
    /// first cluster for FAT, first allocation block for CP/M
    pub start: u32,
    pub size: usize,
    /// offset of the (first) directory entry in the image
    pub entry_offset: usize,
    /// CP/M user number
    pub user: Option<u8>,
    pub modified: Option<chrono::NaiveDateTime>,
    /// internal file of the operating system, left out of ordinary listings
    pub system_file: bool
}

/// File contents, `truncated` is set if the data stops short of the directory size
#[derive(Clone,Debug,PartialEq)]
pub struct FileData {
    pub data: Vec<u8>,
    pub truncated: bool
}

#[derive(Clone,Copy,Debug,Default,PartialEq,Eq)]
pub struct DiskUsage {
    pub total: usize,
    pub used: usize,
    pub free: usize,
    /// allocation unit in bytes
    pub unit: usize
}

impl FileEntry {
    /// `NAME.EXT`, or just `NAME` if there is no extension
    pub fn full_name(&self) -> String {
        match self.ext.len() {
            0 => self.name.clone(),
            _ => [self.name.as_str(),".",self.ext.as_str()].concat()
        }
    }
    pub fn is_directory(&self) -> bool {
        self.attributes & attr::DIRECTORY > 0
    }
    pub fn is_volume(&self) -> bool {
        self.attributes & attr::VOLUME_ID > 0
    }
    pub fn is_hidden(&self) -> bool {
        self.attributes & attr::HIDDEN > 0
    }
    /// Case insensitive match on the full name
    pub fn matches(&self,name: &str) -> bool {
        self.full_name().eq_ignore_ascii_case(name.trim())
    }
    pub fn to_json(&self) -> json::JsonValue {
        let mut ans = json::object! {
            name: self.full_name(),
            size: self.size,
            start: self.start,
            attributes: hex::encode([self.attributes]),
            entry_offset: self.entry_offset
        };
        if let Some(u) = self.user {
            ans["user"] = u.into();
        }
        if let Some(t) = self.modified {
            ans["modified"] = t.format("%Y-%m-%d %H:%M").to_string().into();
        }
        if self.system_file {
            ans["system"] = true.into();
        }
        ans
    }
}

impl DiskUsage {
    pub fn to_json(&self) -> json::JsonValue {
        json::object! {
            total: self.total,
            used: self.used,
            free: self.free,
            unit: self.unit
        }
    }
}

impl fmt::Display for DiskUsage {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,"{} bytes total, {} used, {} free",self.total,self.used,self.free)
    }
}

/// Build a case insensitive matcher for `*` and `?` wildcards.
/// An empty pattern gives `None`, meaning everything matches.
pub fn name_matcher(pattern: &str) -> Result<Option<globset::GlobMatcher>,DYNERR> {
    if pattern.trim().is_empty() {
        return Ok(None);
    }
    match globset::GlobBuilder::new(pattern.trim()).case_insensitive(true).literal_separator(true).build() {
        Ok(glob) => Ok(Some(glob.compile_matcher())),
        Err(e) => {
            error!("bad wildcard pattern {}",pattern);
            Err(Box::new(e))
        }
    }
}

/// Make a name safe to use on the host file system
pub fn safe_host_name(name: &str) -> String {
    name.chars().map(|c| match c {
        c if c.is_ascii_alphanumeric() || ".-_".contains(c) => c,
        _ => '_'
    }).collect()
}

/// Abstract file system interface.  Presumed to own the flat image bytes.
pub trait DiskFS {
    /// short name of the file system, e.g. `fat`
    fn fs_name(&self) -> &'static str;
    /// All files in the directory, including hidden and system files
    fn list_files(&self) -> Vec<FileEntry>;
    /// Files for an ordinary listing, hidden system files are left out
    fn list_visible_files(&self) -> Vec<FileEntry> {
        self.list_files().into_iter().filter(|f| !f.system_file).collect()
    }
    /// Read the file named `name`, see `read_entry`
    fn read_file(&mut self,name: &str) -> Result<FileData,DYNERR> {
        let entry = self.find(name)?;
        self.read_entry(&entry)
    }
    /// Read a file from its directory entry.  Damage found along the way truncates the
    /// data and goes into the diagnostics, it is not an error.
    fn read_entry(&mut self,entry: &FileEntry) -> Result<FileData,DYNERR>;
    /// Overwrite a file in place or create a new one, returns bytes written
    fn write_file(&mut self,name: &str,dat: &[u8]) -> Result<usize,DYNERR>;
    /// Delete a file
    fn delete_file(&mut self,name: &str) -> STDRESULT;
    fn disk_usage(&self) -> DiskUsage;
    /// Volume label if there is one
    fn volume_label(&self) -> Option<String> {
        None
    }
    /// List files to standard output, `pattern` may use `*` and `?` wildcards
    fn catalog_to_stdout(&mut self,pattern: &str) -> STDRESULT;
    /// Diagnostics accumulated since the image was opened
    fn diagnostics(&self) -> &Diagnostics;
    /// Layout information as JSON
    fn layout_json(&self) -> json::JsonValue;
    /// Get the underlying image bytes
    fn to_bytes(&self) -> Vec<u8>;
    /// Find the directory entry for `name`
    fn find(&self,name: &str) -> Result<FileEntry,DYNERR> {
        match self.list_files().into_iter().find(|f| f.matches(name)) {
            Some(f) => Ok(f),
            None => {
                error!("{} not found",name);
                Err(Box::new(Error::FileNotFound))
            }
        }
    }
}

/// The file systems we know how to open
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum Format {
    Hp150Fat,
    Fat,
    Cpm,
    Raw
}

impl fmt::Display for Format {
    fn fmt(&self,f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hp150Fat => write!(f,"fat_hp150"),
            Self::Fat => write!(f,"fat"),
            Self::Cpm => write!(f,"cpm"),
            Self::Raw => write!(f,"raw")
        }
    }
}

/// An opened file system, the variant is selected once when the image is opened.
pub enum Handle {
    Fat(fat::Disk),
    Hp150Fat(fat::Disk),
    Cpm(cpm::Disk),
    Raw(raw::Disk)
}

impl Handle {
    /// Open the image as the given format
    pub fn open(img: Vec<u8>,format: Format) -> Result<Self,DYNERR> {
        if img.is_empty() {
            return Err(Box::new(Error::EmptyImage));
        }
        Ok(match format {
            Format::Hp150Fat => Self::Hp150Fat(fat::Disk::open_hp150(img)?),
            Format::Fat => Self::Fat(fat::Disk::open(img)?),
            Format::Cpm => Self::Cpm(cpm::Disk::open(img)?),
            Format::Raw => Self::Raw(raw::Disk::open(img))
        })
    }
    pub fn format(&self) -> Format {
        match self {
            Self::Fat(_) => Format::Fat,
            Self::Hp150Fat(_) => Format::Hp150Fat,
            Self::Cpm(_) => Format::Cpm,
            Self::Raw(_) => Format::Raw
        }
    }
    pub fn fs(&self) -> &dyn DiskFS {
        match self {
            Self::Fat(d) | Self::Hp150Fat(d) => d,
            Self::Cpm(d) => d,
            Self::Raw(d) => d
        }
    }
    pub fn fs_mut(&mut self) -> &mut dyn DiskFS {
        match self {
            Self::Fat(d) | Self::Hp150Fat(d) => d,
            Self::Cpm(d) => d,
            Self::Raw(d) => d
        }
    }
}
