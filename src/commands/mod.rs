//! # CLI Subcommands
//!
//! Contains modules that run the subcommands.

pub mod convert;
pub mod stat;
pub mod get;
pub mod put;
pub mod extract;
pub mod completions;

use log::error;
use crate::img::ParseOptions;
use crate::img::assemble::AssemblyOptions;
use crate::img::geometry::GeometryInfo;

#[derive(thiserror::Error,Debug)]
pub enum CommandError {
    #[error("Command could not be interpreted")]
    InvalidCommand,
    #[error("Input source could not be interpreted")]
    UnknownFormat,
    #[error("File not found")]
    FileNotFound
}

/// JSON to string, pretty printed if `indent` is given
pub fn stringify(obj: json::JsonValue,indent: Option<u16>) -> String {
    match indent {
        Some(spaces) => json::stringify_pretty(obj,spaces),
        None => json::stringify(obj)
    }
}

/// Parse a byte in decimal or `0x` hex
pub fn parse_byte(s: &str) -> Result<u8,CommandError> {
    let ans = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex,16),
        None => s.parse::<u8>()
    };
    ans.map_err(|_| {
        error!("{} is not a byte value",s);
        CommandError::InvalidCommand
    })
}

/// Parse `C,H,S,B` into a forced geometry
pub fn parse_geometry(s: &str) -> Result<GeometryInfo,CommandError> {
    let vals: Vec<usize> = s.split(',').filter_map(|x| x.trim().parse::<usize>().ok()).collect();
    let size = match vals[..] {
        [c,h,s,b] => c.checked_mul(h).and_then(|x| x.checked_mul(s)).and_then(|x| x.checked_mul(b)),
        _ => None
    };
    match (size,&vals[..]) {
        (Some(n),[c,h,s,b]) if n > 0 => Ok(GeometryInfo::forced(*c,*h,*s,*b)),
        _ => {
            error!("geometry should be 4 positive numbers like 40,2,9,512, got {}",s);
            Err(CommandError::InvalidCommand)
        }
    }
}

/// Collect the parse and assembly options from the subcommand arguments that have them
pub fn recovery_options(cmd: &clap::ArgMatches) -> Result<(ParseOptions,AssemblyOptions),CommandError> {
    let has = |id: &str| cmd.try_get_raw(id).is_ok();
    let parse_opt = ParseOptions {
        strict: has("strict") && cmd.get_flag("strict")
    };
    let mut asm_opt = AssemblyOptions::default();
    if has("fill") {
        if let Some(s) = cmd.get_one::<String>("fill") {
            asm_opt.fill_byte = parse_byte(s)?;
        }
    }
    if has("fix-boot") {
        asm_opt.boot_fixup = cmd.get_flag("fix-boot");
    }
    if has("geometry") {
        if let Some(s) = cmd.get_one::<String>("geometry") {
            asm_opt.forced_geometry = Some(parse_geometry(s)?);
        }
    }
    Ok((parse_opt,asm_opt))
}
