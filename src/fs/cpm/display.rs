//! ### CP/M Display Module
//!
//! This module is concerned with displaying the directory.  The listing follows the
//! CP/M v3 `DIR [SIZE]` form, three files per row, one group for each user number.

use std::collections::BTreeSet;
use colored::Colorize;
use super::directory::CpmFileInfo;
use crate::fs::name_matcher;
use crate::STDRESULT;

const COLS: usize = 3;

struct UserStats {
    total_kbytes: usize,
    file_count: usize
}

fn dir_table(finfo: &CpmFileInfo,stats: &mut UserStats) {
    let kbytes = match finfo.size { b if b>0 => 1+(b-1)/1024, _ => 0 };
    if stats.file_count%COLS==0 {
        print!("A: ");
    } else {
        print!(" : ");
    }
    print!("{:8} {:3}",
        match (finfo.read_only,finfo.system) {
            (true,true) => finfo.name.red().dimmed(),
            (true,false) => finfo.name.red(),
            (false,true) => finfo.name.dimmed(),
            (false,false) => finfo.name.normal()
        },
        match (finfo.read_only,finfo.system) {
            (true,true) => finfo.ext.red().dimmed(),
            (true,false) => finfo.ext.red(),
            (false,true) => finfo.ext.dimmed(),
            (false,false) => finfo.ext.normal()
        },
    );
    print!(" {:4}k",kbytes);
    if stats.file_count%COLS==COLS-1 {
        println!();
    }
    stats.file_count += 1;
    stats.total_kbytes += kbytes;
}

/// Display the merged files, `pattern` may use `*` and `?` wildcards
pub fn dir(files: &[CpmFileInfo],pattern: &str) -> STDRESULT {
    let matcher = name_matcher(pattern)?;
    let users: BTreeSet<u8> = files.iter().map(|f| f.user).collect();
    if users.is_empty() {
        println!();
        println!("No File");
        println!();
        return Ok(());
    }
    for user in users {
        let mut stats = UserStats { total_kbytes: 0, file_count: 0 };
        println!();
        println!("Directory for Drive A: User {}",user);
        println!();
        for f in files.iter().filter(|f| f.user==user) {
            let shown = match &matcher {
                Some(m) => m.is_match(f.full_name()),
                None => true
            };
            if shown {
                dir_table(f,&mut stats);
            }
        }
        if stats.file_count % COLS > 0 {
            println!();
        }
        if stats.file_count==0 {
            println!("No File");
        } else {
            println!();
            println!("Total Bytes     = {:6}k  Files Found = {:4}",stats.total_kbytes,stats.file_count);
        }
        println!();
    }
    Ok(())
}
