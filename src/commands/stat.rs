use clap;
use log::error;
use crate::img::assemble::AssemblyOptions;
use crate::STDRESULT;
use super::{stringify,CommandError};

fn img_path(cmd: &clap::ArgMatches) -> Result<&String,CommandError> {
    match cmd.get_one::<String>("dimg") {
        Some(p) => Ok(p),
        None => {
            error!("disk image path is required");
            Err(CommandError::InvalidCommand)
        }
    }
}

pub fn geometry(cmd: &clap::ArgMatches) -> STDRESULT {
    let (parse_opt,_) = super::recovery_options(cmd)?;
    let bytes = std::fs::read(img_path(cmd)?)?;
    let recovery = crate::recover_image(&bytes,&parse_opt,&AssemblyOptions::default())?;
    let mut obj = recovery.geometry.to_json();
    if let Some(stats) = &recovery.assembly {
        obj["assembly"] = stats.to_json();
    }
    if let Some(meta) = recovery.metadata {
        obj["container"] = meta;
    }
    println!("{}",stringify(obj,cmd.get_one::<u16>("indent").copied()));
    Ok(())
}

pub fn detect(cmd: &clap::ArgMatches) -> STDRESULT {
    let bytes = std::fs::read(img_path(cmd)?)?;
    let recovery = crate::recover_image(&bytes,&Default::default(),&AssemblyOptions::default())?;
    let candidates = crate::fs::detect::detect(&recovery.image);
    let mut list = json::JsonValue::new_array();
    for c in &candidates {
        list.push(c.to_json())?;
    }
    let obj = json::object! {
        source: recovery.source.to_string(),
        image_size: recovery.image.len(),
        best: candidates.first().map(|c| c.format.to_string()).unwrap_or_default(),
        candidates: list
    };
    println!("{}",stringify(obj,cmd.get_one::<u16>("indent").copied()));
    Ok(())
}

pub fn catalog(cmd: &clap::ArgMatches) -> STDRESULT {
    let default_pattern = String::new();
    let pattern = cmd.get_one::<String>("file").unwrap_or(&default_pattern);
    let mut disk = crate::create_fs_from_file(img_path(cmd)?)?;
    disk.fs_mut().catalog_to_stdout(pattern)
}

pub fn usage(cmd: &clap::ArgMatches) -> STDRESULT {
    let disk = crate::create_fs_from_file(img_path(cmd)?)?;
    let mut obj = disk.fs().disk_usage().to_json();
    obj["fs"] = disk.format().to_string().into();
    println!("{}",stringify(obj,cmd.get_one::<u16>("indent").copied()));
    Ok(())
}
