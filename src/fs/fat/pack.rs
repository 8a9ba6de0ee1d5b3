//! ### FAT Packing Module
//!
//! Functions to help pack or unpack dates and file names.

use chrono::{Timelike,Datelike};
use regex::Regex;

/// Characters allowed in an 8.3 name besides letters and digits
const NAME_CHARS: &str = r"A-Z0-9!#$%&'()@^_`{}~\-";

/// pack the date into the FAT format, if the year is not between 1980
/// and 2107 it will be pegged to the nearest representable date.
pub fn pack_date(time: Option<chrono::NaiveDateTime>) -> [u8;2] {
    let now = match time {
        Some(t) => t,
        _ => chrono::Local::now().naive_local()
    };
    let year = match now.year() {
        y if y < 1980 => {
            log::warn!("date prior to reference date, pegging to reference date");
            1980
        },
        y if y > 2107 => {
            log::warn!("date is pegged to maximum of 2107");
            2107
        },
        y => y
    };
    let ans16 = now.day() as u16 + ((now.month() as u16) << 5) + ((year as u16 - 1980) << 9);
    u16::to_le_bytes(ans16)
}

pub fn pack_time(time: Option<chrono::NaiveDateTime>) -> [u8;2] {
    let now = match time {
        Some(t) => t,
        _ => chrono::Local::now().naive_local()
    };
    let ans16 = (now.second() as u16) / 2 + ((now.minute() as u16) << 5) + ((now.hour() as u16) << 11);
    u16::to_le_bytes(ans16)
}

pub fn unpack_date(fat_date: [u8;2]) -> Option<chrono::NaiveDate> {
    if fat_date==[0,0] {
        return None;
    }
    let date16 = u16::from_le_bytes(fat_date);
    let year = 1980 + (date16 >> 9) as i32;
    let month = ((date16 & 0b0000_0001_1110_0000) >> 5) as u32;
    let day = (date16 & 0b1_1111) as u32;
    chrono::NaiveDate::from_ymd_opt(year, month, day)
}

pub fn unpack_time(fat_time: [u8;2]) -> Option<chrono::NaiveTime> {
    let time16 = u16::from_le_bytes(fat_time);
    let hour = (time16 >> 11) as u32;
    let min = ((time16 & 0b0000_0111_1110_0000) >> 5) as u32;
    let sec2 = (time16 & 0b1_1111) as u32;
    chrono::NaiveTime::from_hms_opt(hour, min, sec2*2)
}

/// Date and time of a directory entry, `None` if the date is unset or garbage.
/// A garbage time with a good date gives midnight.
pub fn unpack_timestamp(fat_time: [u8;2],fat_date: [u8;2]) -> Option<chrono::NaiveDateTime> {
    let date = unpack_date(fat_date)?;
    let time = unpack_time(fat_time).unwrap_or_default();
    Some(chrono::NaiveDateTime::new(date,time))
}

/// Accepts lower case, case is raised by `string_to_file_name`.
/// "." and ".." are not accepted here.
pub fn is_name_valid(s: &str) -> bool {
    let patt = format!(r"^[{}]{{1,8}}(\.[{}]{{1,3}})?$",NAME_CHARS,NAME_CHARS);
    match Regex::new(&patt) {
        Ok(re) => {
            let ans = re.is_match(&s.to_uppercase());
            if !ans {
                log::info!("{} is not a valid 8.3 name",s);
            }
            ans
        },
        Err(_) => false
    }
}

/// Put the name into the padded upper case form stored in the directory
pub fn string_to_file_name(s: &str) -> ([u8;8],[u8;3]) {
    let upper = s.to_uppercase();
    let mut it = upper.splitn(2,'.');
    let mut name = [0x20;8];
    let mut ext = [0x20;3];
    if let Some(base) = it.next() {
        for (i,b) in base.bytes().take(8).enumerate() {
            name[i] = b;
        }
    }
    if let Some(x) = it.next() {
        for (i,b) in x.bytes().take(3).enumerate() {
            ext[i] = b;
        }
    }
    (name,ext)
}
