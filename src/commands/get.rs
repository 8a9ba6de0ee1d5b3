use clap;
use std::io::Write;
use log::{error,warn};
use super::CommandError;
use crate::STDRESULT;

pub fn get(cmd: &clap::ArgMatches) -> STDRESULT {
    let (Some(img_path),Some(src_name)) = (cmd.get_one::<String>("dimg"),cmd.get_one::<String>("file")) else {
        error!("get needs a disk image and a file name");
        return Err(Box::new(CommandError::InvalidCommand));
    };
    let mut disk = crate::create_fs_from_file(img_path)?;
    let file = match disk.fs_mut().read_file(src_name) {
        Ok(f) => f,
        Err(e) => {
            error!("could not read {}: {}",src_name,e);
            return Err(Box::new(CommandError::FileNotFound));
        }
    };
    if file.truncated {
        warn!("{} is truncated, {} bytes recovered",src_name,file.data.len());
    }
    if atty::is(atty::Stream::Stdout) || cmd.get_flag("console") {
        crate::display_block(0,&file.data);
    } else {
        std::io::stdout().write_all(&file.data)?;
    }
    Ok(())
}
