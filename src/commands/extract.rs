use clap;
use std::path::Path;
use log::{error,info,warn};
use super::CommandError;
use crate::fs::{Handle,safe_host_name};
use crate::STDRESULT;

/// Host name for a file, CP/M users other than 0 get a prefix so names cannot collide
fn host_name(name: &str,user: Option<u8>) -> String {
    match user {
        Some(u) if u > 0 => format!("user{}_{}",u,safe_host_name(name)),
        _ => safe_host_name(name)
    }
}

pub fn extract(cmd: &clap::ArgMatches) -> STDRESULT {
    let (Some(img_path),Some(out_dir)) = (cmd.get_one::<String>("dimg"),cmd.get_one::<String>("output")) else {
        error!("extract needs a disk image and an output directory");
        return Err(Box::new(CommandError::InvalidCommand));
    };
    let out = Path::new(out_dir);
    std::fs::create_dir_all(out)?;
    let mut disk = crate::create_fs_from_file(img_path)?;
    if let Handle::Raw(raw) = &disk {
        for (name,dat) in raw.analysis() {
            std::fs::write(out.join(&name),dat)?;
            eprintln!("wrote {}",name);
        }
        return Ok(());
    }
    let mut count = 0;
    let mut truncated = 0;
    for entry in disk.fs().list_files() {
        if entry.is_volume() || entry.is_directory() {
            continue;
        }
        let file = match disk.fs_mut().read_entry(&entry) {
            Ok(f) => f,
            Err(e) => {
                warn!("skipping {}: {}",entry.full_name(),e);
                continue;
            }
        };
        let mut name = host_name(&entry.full_name(),entry.user);
        while out.join(&name).exists() {
            name = ["_",&name].concat();
        }
        std::fs::write(out.join(&name),&file.data)?;
        info!("extracted {} as {}",entry.full_name(),name);
        count += 1;
        if file.truncated {
            truncated += 1;
            eprintln!("{}: {} of {} bytes (truncated)",name,file.data.len(),entry.size);
        } else {
            eprintln!("{}: {} bytes",name,file.data.len());
        }
    }
    eprintln!("extracted {} files from {} image, {} truncated",count,disk.format(),truncated);
    for d in disk.fs().diagnostics().iter() {
        eprintln!("{}",d);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::host_name;

    #[test]
    fn user_prefix() {
        assert_eq!(host_name("WS.COM",Some(0)),"WS.COM");
        assert_eq!(host_name("WS.COM",Some(3)),"user3_WS.COM");
        assert_eq!(host_name("A B$.TXT",None),"A_B_.TXT");
    }
}
