use clap;
use std::io::Read;
use log::{error,info};
use super::CommandError;
use crate::img;
use crate::STDRESULT;

/// Writes go back to the image in place, so a container would be clobbered by a flat image
fn writable_img_path(cmd: &clap::ArgMatches,verb: &str) -> Result<(String,Vec<u8>),CommandError> {
    let Some(img_path) = cmd.get_one::<String>("dimg") else {
        error!("{} needs a disk image",verb);
        return Err(CommandError::InvalidCommand);
    };
    let bytes = match std::fs::read(img_path) {
        Ok(b) => b,
        Err(e) => {
            error!("could not read {}: {}",img_path,e);
            return Err(CommandError::FileNotFound);
        }
    };
    if let Some(typ) = img::container_type(&bytes) {
        error!("cannot {} on a {} image, convert it to a flat image first",verb,typ);
        return Err(CommandError::UnknownFormat);
    }
    Ok((img_path.to_string(),bytes))
}

pub fn put(cmd: &clap::ArgMatches) -> STDRESULT {
    if atty::is(atty::Stream::Stdin) {
        error!("cannot use `put` with console input, please pipe something in");
        return Err(Box::new(CommandError::InvalidCommand));
    }
    let Some(dest_name) = cmd.get_one::<String>("file") else {
        error!("put needs a file name");
        return Err(Box::new(CommandError::InvalidCommand));
    };
    let (img_path,bytes) = writable_img_path(cmd,"put")?;
    let mut file_data = Vec::new();
    std::io::stdin().read_to_end(&mut file_data)?;
    let mut disk = crate::create_fs_from_bytestream(&bytes)?;
    let n = disk.fs_mut().write_file(dest_name,&file_data)?;
    info!("wrote {} bytes to {}",n,dest_name);
    crate::save_img(disk.fs(),&img_path)
}

pub fn delete(cmd: &clap::ArgMatches) -> STDRESULT {
    let Some(name) = cmd.get_one::<String>("file") else {
        error!("delete needs a file name");
        return Err(Box::new(CommandError::InvalidCommand));
    };
    let (img_path,bytes) = writable_img_path(cmd,"delete")?;
    let mut disk = crate::create_fs_from_bytestream(&bytes)?;
    disk.fs_mut().delete_file(name)?;
    crate::save_img(disk.fs(),&img_path)
}
