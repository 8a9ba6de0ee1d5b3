// test of TD0 container recovery
use flopkit::img::{self,td0,ParseOptions,SectorClass,HeaderInfo};
use flopkit::img::assemble::AssemblyOptions;
use flopkit::img::geometry::{self,GeometryKind};
use flopkit::diag::{Kind,Severity};

const TRAILER: [u8;7] = [0x27,0x09,0xe1,0xc5,0x89,0x05,0x76];

fn header(sig: &[u8;2],stepping: u8) -> Vec<u8> {
    let mut ans = vec![sig[0],sig[1],0,0,0x15,0x02,0x04,stepping,0x00,0x01];
    let crc = td0::crc16(0,&ans);
    ans.extend_from_slice(&crc.to_le_bytes());
    ans
}

/// Track record with raw encoded sectors of 256 bytes, `(id,flags,data)`
fn track(cyl: u8,head: u8,sectors: &[(u8,u8,Vec<u8>)]) -> Vec<u8> {
    let count = sectors.len() as u8;
    let mut ans = vec![count,cyl,head,(td0::crc16(0,&[count,cyl,head]) & 0xff) as u8];
    for (id,flags,dat) in sectors {
        ans.extend_from_slice(&[cyl,head,*id,1,*flags,(td0::crc16(0,dat) & 0xff) as u8]);
        if flags & 0x30 == 0 {
            ans.extend_from_slice(&((dat.len() + 1) as u16).to_le_bytes());
            ans.push(0);
            ans.extend_from_slice(dat);
        }
    }
    ans
}

fn boot_track() -> Vec<(u8,u8,Vec<u8>)> {
    let mut ans = Vec::new();
    for id in 1..=16 {
        let mut dat = vec![0;256];
        if id==1 {
            dat[254] = 0x55;
            dat[255] = 0xaa;
        }
        ans.push((id,0,dat));
    }
    ans
}

fn td0_image(tracks: &[Vec<u8>]) -> Vec<u8> {
    let mut ans = header(b"TD",0);
    for t in tracks {
        ans.extend_from_slice(t);
    }
    ans.push(0xff);
    ans
}

#[test]
fn boot_sector_survives() {
    let bytes = td0_image(&[track(0,0,&boot_track())]);
    let recovery = flopkit::recover_image(&bytes,&ParseOptions::default(),&AssemblyOptions::default()).expect("recovery failed");
    assert_eq!(recovery.geometry.kind,GeometryKind::Hp150Standard);
    assert_eq!(recovery.image.len(),16*256);
    assert_eq!(&recovery.image[254..256],&[0x55,0xaa]);
    let stats = recovery.parse_stats.expect("no stats");
    assert_eq!(stats.sectors_read,16);
    assert_eq!(stats.crc_errors,0);
    assert_eq!(recovery.assembly.expect("no stats").sectors_missing,0);
    // numbering from 1 is only a note
    assert_eq!(recovery.diagnostics.worst(),Some(Severity::Note));
}

#[test]
fn advanced_compression_matches_retrocompressor() {
    let mut plain = td0_image(&[track(0,0,&boot_track()),track(1,0,&boot_track())]);
    plain.extend_from_slice(&TRAILER);
    let packed = retrocompressor::td0::compress_slice(&plain).expect("advanced compression failed");
    // our own header, so the signature and CRC do not depend on the compressor
    let mut bytes = header(b"td",0);
    bytes.extend_from_slice(&packed[12..]);

    // the trailing bytes only pad the bit stream, compare through the end marker
    let end = plain.len() - TRAILER.len();
    let expanded = flopkit::decompress(&packed[12..]);
    assert!(expanded.len() >= end - 12);
    assert_eq!(&expanded[0..end-12],&plain[12..end]);

    let c = flopkit::parse_container(&bytes,&ParseOptions::default()).expect("parse failed");
    match &c.header {
        HeaderInfo::Td0(h) => assert!(h.compressed),
        _ => panic!("wrong header")
    }
    assert_eq!(c.tracks.len(),2);
    assert_eq!(c.stats.sectors_read,32);
    assert_eq!(c.stats.crc_errors,0);
    assert_eq!(c.tracks[1].sectors[0].payload.as_ref().map(|p| p[255]),Some(0xaa));
}

#[test]
fn decompression_is_deterministic() {
    let mut plain = td0_image(&[track(0,0,&boot_track())]);
    plain.extend_from_slice(&TRAILER);
    let packed = retrocompressor::td0::compress_slice(&plain).expect("advanced compression failed");
    assert_eq!(flopkit::decompress(&packed[12..]),flopkit::decompress(&packed[12..]));
}

#[test]
fn sequence_faults() {
    let sectors: Vec<(u8,u8,Vec<u8>)> = [1,2,4,4].iter().map(|id| (*id,0,vec![*id;256])).collect();
    let bytes = td0_image(&[track(0,0,&sectors)]);
    let c = flopkit::parse_container(&bytes,&ParseOptions::default()).expect("parse failed");
    // sector 0 and sector 3
    assert_eq!(c.stats.sectors_skipped,2);
    assert_eq!(c.stats.sectors_repeated,1);
    assert!(c.diagnostics.has(Kind::SectorSkip));
    assert!(c.diagnostics.has(Kind::SectorRepeat));
    assert_eq!(c.tracks[0].sectors[3].class,SectorClass::Repeated);
    match flopkit::parse_container(&bytes,&ParseOptions { strict: true }) {
        Err(img::Error::SectorSequenceMismatch(img::SequenceFault::Skip(1))) => {},
        _ => panic!("strict parse should fail on the skip")
    }
}

#[test]
fn one_based_track() {
    let sectors: Vec<(u8,u8,Vec<u8>)> = [1,2,3].iter().map(|id| (*id,0,vec![*id;256])).collect();
    let bytes = td0_image(&[track(0,0,&sectors)]);
    let c = flopkit::parse_container(&bytes,&ParseOptions::default()).expect("parse failed");
    assert_eq!(c.stats.sectors_skipped,1);
    assert_eq!(c.stats.sectors_read,3);
    assert_eq!(c.diagnostics.count(Kind::SectorSkip),1);
    assert_eq!(c.diagnostics.worst(),Some(Severity::Note));
    match flopkit::parse_container(&bytes,&ParseOptions { strict: true }) {
        Err(img::Error::SectorSequenceMismatch(img::SequenceFault::Skip(1))) => {},
        _ => panic!("strict parse should fail when sector 0 is absent")
    }
    // a track that starts at 0 is clean
    let sectors: Vec<(u8,u8,Vec<u8>)> = [0,1,2].iter().map(|id| (*id,0,vec![*id;256])).collect();
    let bytes = td0_image(&[track(0,0,&sectors)]);
    let c = flopkit::parse_container(&bytes,&ParseOptions { strict: true }).expect("parse failed");
    assert_eq!(c.stats.sectors_skipped,0);
    assert!(c.diagnostics.is_empty());
}

#[test]
fn phantoms_and_terminator() {
    let sectors = vec![
        (1,0,vec![1;256]),
        (2,0,vec![2;256]),
        (0x61,0,vec![0x61;256]),
        (3,0,vec![3;256]),
        (0x65,0,vec![0;256])
    ];
    let bytes = td0_image(&[track(0,0,&sectors)]);
    let recovery = flopkit::recover_image(&bytes,&ParseOptions::default(),&AssemblyOptions::default()).expect("recovery failed");
    let stats = recovery.parse_stats.expect("no stats");
    assert_eq!(stats.phantom_sectors,1);
    assert_eq!(stats.sectors_read,3);
    assert!(recovery.geometry.has_phantom);
    assert_eq!(recovery.geometry.kind,GeometryKind::WithPhantom);
    assert_eq!(recovery.geometry.sectors_per_track,3);
    assert_eq!(recovery.image,[vec![1;256],vec![2;256],vec![3;256]].concat());
    assert!(recovery.diagnostics.has(Kind::PhantomSector));
}

#[test]
fn skipped_sector_is_missing() {
    let sectors = vec![
        (1,0,vec![1;256]),
        (2,td0::FLAG_NO_DAT,Vec::new()),
        (3,0,vec![3;256])
    ];
    let bytes = td0_image(&[track(0,0,&sectors)]);
    let opt = AssemblyOptions { fill_byte: 0xe5, ..AssemblyOptions::default() };
    let recovery = flopkit::recover_image(&bytes,&ParseOptions::default(),&opt).expect("recovery failed");
    // sector 0, the header of sector 2, then sector 2 again when 3 arrives
    assert_eq!(recovery.parse_stats.expect("no stats").sectors_skipped,3);
    assert_eq!(recovery.assembly.expect("no stats").sectors_missing,1);
    assert_eq!(&recovery.image[256..512],&[0xe5;256]);
    assert!(recovery.diagnostics.has(Kind::MissingSectors));
}

#[test]
fn missing_end_marker() {
    let mut bytes = td0_image(&[track(0,0,&boot_track())]);
    bytes.pop();
    let c = flopkit::parse_container(&bytes,&ParseOptions::default()).expect("parse failed");
    assert_eq!(c.tracks.len(),1);
    assert!(c.diagnostics.has(Kind::UnexpectedEnd));
    assert!(flopkit::parse_container(&bytes,&ParseOptions { strict: true }).is_err());
}

#[test]
fn bad_crcs_are_counted() {
    let mut bytes = td0_image(&[track(0,0,&boot_track())]);
    // corrupt the header CRC and the first sector's data
    bytes[10] ^= 0xff;
    bytes[12+4+6+3+100] ^= 0xff;
    let c = flopkit::parse_container(&bytes,&ParseOptions::default()).expect("parse failed");
    assert_eq!(c.stats.crc_errors,2);
    assert_eq!(c.diagnostics.count(Kind::CrcMismatch),2);
    assert_eq!(c.tracks[0].sectors.len(),16);
}

#[test]
fn comment_block() {
    let text = b"HP150 SYSTEM\0DISK 1\0";
    let mut comment = Vec::new();
    comment.extend_from_slice(&(text.len() as u16).to_le_bytes());
    comment.extend_from_slice(&[85,3,14,10,30,0]);
    comment.extend_from_slice(text);
    let crc = td0::crc16(0,&comment);
    let mut bytes = header(b"TD",0x80);
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes.extend_from_slice(&comment);
    bytes.extend_from_slice(&track(0,0,&boot_track()));
    bytes.push(0xff);
    let c = flopkit::parse_container(&bytes,&ParseOptions::default()).expect("parse failed");
    assert_eq!(c.comment,Some("HP150 SYSTEM\nDISK 1".to_string()));
    let ts = c.timestamp.expect("no timestamp");
    assert_eq!(ts.format("%Y-%m-%d %H:%M:%S").to_string(),"1985-03-14 10:30:00");
    assert_eq!(c.stats.crc_errors,0);
    assert_eq!(c.metadata()["td0"]["comment"],"HP150 SYSTEM\nDISK 1");
}

#[test]
fn bad_signature() {
    assert!(matches!(flopkit::parse_container(b"XX\0\0\0\0\0\0\0\0\0\0",&ParseOptions::default()),
        Err(img::Error::ContainerHeaderInvalid)));
}

#[test]
fn flat_image_size_gives_back_geometry() {
    for (cylinders,heads,spt) in [(40u8,2u8,9u8),(77,1,26),(80,2,9)] {
        let mut tracks = Vec::new();
        for cyl in 0..cylinders {
            for head in 0..heads {
                let sectors: Vec<(u8,u8,Vec<u8>)> = (1..=spt).map(|id| (id,0,vec![cyl ^ id;256])).collect();
                tracks.push(track(cyl,head,&sectors));
            }
        }
        let bytes = td0_image(&tracks);
        let recovery = flopkit::recover_image(&bytes,&ParseOptions::default(),&AssemblyOptions::default()).expect("recovery failed");
        assert_eq!(recovery.assembly.expect("no stats").sectors_missing,0);
        let g = &recovery.geometry;
        let expected = cylinders as usize * heads as usize * spt as usize * 256;
        assert_eq!(g.cylinders*g.heads*g.sectors_per_track*g.bytes_per_sector,expected);
        assert_eq!(recovery.image.len(),expected);
        let inferred = geometry::infer_from_size(&recovery.image);
        assert!(inferred.is_resolved());
        assert_eq!(inferred.cylinders*inferred.heads*inferred.sectors_per_track*inferred.bytes_per_sector,expected);
    }
}
