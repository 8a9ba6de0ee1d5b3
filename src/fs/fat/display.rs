//! ### FAT Display Module
//!
//! This module is concerned with displaying the directory.

use colored::Colorize;
use crate::fs::{FileEntry,name_matcher};
use crate::STDRESULT;

fn format_name(finfo: &FileEntry) {
    let hidden = finfo.is_hidden() || finfo.system_file;
    let read_only = finfo.attributes & crate::fs::attr::READ_ONLY > 0;
    let system = finfo.attributes & crate::fs::attr::SYSTEM > 0;
    print!("{:8} {:3}",
        match (finfo.is_directory(),system,read_only,hidden) {
            (true,_,_,_) => finfo.name.blue().bold(),
            (_,true,_,_) => finfo.name.bold(),
            (_,_,true,true) => finfo.name.red().dimmed(),
            (_,_,true,false) => finfo.name.red(),
            (_,_,false,true) => finfo.name.dimmed(),
            _ => finfo.name.normal()
        },
        match (finfo.is_directory(),system,read_only,hidden) {
            (true,_,_,_) => finfo.ext.blue().bold(),
            (_,true,_,_) => finfo.ext.bold(),
            (_,_,true,true) => finfo.ext.red().dimmed(),
            (_,_,true,false) => finfo.ext.red(),
            (_,_,false,true) => finfo.ext.dimmed(),
            _ => finfo.ext.normal()
        },
    );
}

/// Display one line of directory listing
fn dir_line(finfo: &FileEntry,count: &mut usize) {
    format_name(finfo);
    if finfo.is_directory() {
        print!(" <DIR>     ");
    } else {
        print!(" {:8}  ",finfo.size);
    }
    if let Some(t) = finfo.modified {
        print!("{}   {}",t.format("%m-%d-%y"),t.format("%H:%M"));
    }
    println!();
    *count += 1;
}

/// Display FAT directory in the manner of MS-DOS, except for color highlights.
/// Files are shown in directory order.
pub fn dir(vol_lab: Option<&str>,files: &[FileEntry],pattern: &str,free: usize) -> STDRESULT {
    let matcher = name_matcher(pattern)?;
    println!();
    match vol_lab {
        Some(lab) => println!(" Volume in drive A is {}",lab.blue().bold()),
        None => println!(" Volume in drive A has no label")
    }
    println!(" Directory of A:\\");
    println!();
    let mut count = 0;
    for f in files {
        let shown = match &matcher {
            Some(m) => m.is_match(f.full_name()),
            None => true
        };
        if shown && !f.is_volume() {
            dir_line(f,&mut count);
        }
    }
    if count==0 {
        println!("No File");
    }
    println!("{:9} File(s)   {} bytes free",count,free);
    println!();
    Ok(())
}
