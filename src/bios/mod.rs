//! # BIOS module
//!
//! This module is a place for any middleware we may require
//! between the `fs` and `img` modules.  It is named in analogy
//! with the CP/M concept of a BIOS as being (in part) a layer between
//! the BDOS and the physical disk.
//!
//! The boot parameters, the FAT itself, and all the candidate tables used to
//! recover damaged layouts are kept in this module.

pub mod bpb;
pub mod fat;
pub mod tables;
pub mod select;
