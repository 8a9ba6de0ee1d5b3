use clap;
use log::{error,info};
use crate::STDRESULT;

pub fn convert(cmd: &clap::ArgMatches) -> STDRESULT {
    let (Some(src_path),Some(dst_path)) = (cmd.get_one::<String>("dimg"),cmd.get_one::<String>("output")) else {
        error!("convert needs both the source and destination");
        return Err(Box::new(super::CommandError::InvalidCommand));
    };
    let (parse_opt,asm_opt) = super::recovery_options(cmd)?;
    let bytes = std::fs::read(src_path)?;
    let recovery = crate::recover_image(&bytes,&parse_opt,&asm_opt)?;
    std::fs::write(dst_path,&recovery.image)?;
    info!("wrote {} bytes to {}",recovery.image.len(),dst_path);
    eprintln!("source:      {}",recovery.source);
    eprintln!("geometry:    {} {}x{}x{}x{}",recovery.geometry.kind,recovery.geometry.cylinders,recovery.geometry.heads,
        recovery.geometry.sectors_per_track,recovery.geometry.bytes_per_sector);
    if let Some(stats) = &recovery.parse_stats {
        eprintln!("tracks:      {}",stats.tracks_processed);
        eprintln!("sectors:     {} read, {} skipped, {} repeated, {} phantom",
            stats.sectors_read,stats.sectors_skipped,stats.sectors_repeated,stats.phantom_sectors);
        eprintln!("CRC errors:  {}",stats.crc_errors);
    }
    if let Some(stats) = &recovery.assembly {
        eprintln!("written:     {} sectors, {} missing",stats.sectors_written,stats.sectors_missing);
    }
    eprintln!("image size:  {}",recovery.image.len());
    for d in recovery.diagnostics.iter() {
        eprintln!("{}",d);
    }
    Ok(())
}
