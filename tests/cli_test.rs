use assert_cmd::prelude::*; // Add methods on commands
use predicates::prelude::*; // Used for writing assertions
use std::process::Command; // Run programs
use std::path::{Path,PathBuf};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn crc16(buf: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for b in buf {
        crc ^= (*b as u16) << 8;
        for _bit in 0..8 {
            crc = (crc << 1) ^ match crc & 0x8000 { 0 => 0, _ => 0xa097 };
        }
    }
    crc
}

/// Uncompressed TD0 with one track of 16 sectors of 256 bytes, boot signature in sector 1
fn hp150_td0() -> Vec<u8> {
    let mut ans = vec![b'T',b'D',0,0,0x15,0x02,0x04,0x00,0x00,0x01];
    let crc = crc16(&ans);
    ans.extend_from_slice(&crc.to_le_bytes());
    ans.extend_from_slice(&[16,0,0,(crc16(&[16,0,0]) & 0xff) as u8]);
    for id in 1..=16u8 {
        let mut dat = vec![id;256];
        if id==1 {
            dat[254] = 0x55;
            dat[255] = 0xaa;
        }
        ans.extend_from_slice(&[0,0,id,1,0,(crc16(&dat) & 0xff) as u8]);
        ans.extend_from_slice(&257u16.to_le_bytes());
        ans.push(0);
        ans.extend_from_slice(&dat);
    }
    ans.push(0xff);
    ans
}

fn put_fat_entry(img: &mut [u8],offset: usize,name: &[u8;11],cluster: u16,size: u32) {
    img[offset..offset+11].copy_from_slice(name);
    img[offset+11] = 0x20;
    img[offset+26..offset+28].copy_from_slice(&cluster.to_le_bytes());
    img[offset+28..offset+32].copy_from_slice(&size.to_le_bytes());
}

/// 360K PC disk with two files, root at 0xa00, data at 0x1800, 1024 byte clusters
fn pc_disk() -> Vec<u8> {
    let mut img = vec![0;368640];
    img[0..3].copy_from_slice(&[0xeb,0x34,0x90]);
    img[3..11].copy_from_slice(b"IBM  3.1");
    img[11..13].copy_from_slice(&512u16.to_le_bytes());
    img[13] = 2;
    img[14..16].copy_from_slice(&1u16.to_le_bytes());
    img[16] = 2;
    img[17..19].copy_from_slice(&112u16.to_le_bytes());
    img[22..24].copy_from_slice(&2u16.to_le_bytes());
    img[510..512].copy_from_slice(&[0x55,0xaa]);
    // 2 -> 3 -> EOC, 4 -> EOC
    let fat = [0xfd,0xff,0xff,0x03,0xf0,0xff,0xff,0x0f,0x00];
    img[0x200..0x209].copy_from_slice(&fat);
    img[0x600..0x609].copy_from_slice(&fat);
    put_fat_entry(&mut img,0xa00,b"REPORT  TXT",2,1500);
    put_fat_entry(&mut img,0xa20,b"HELLO   TXT",4,13);
    img[0x1800..0x1800+1500].fill(b'r');
    img[0x2000..0x2000+13].copy_from_slice(b"hello, world\n");
    img
}

/// Osborne CP/M disk with a file for user 0 and one for user 2, data starts at 0x5000
fn cpm_disk() -> Vec<u8> {
    let mut img = vec![0xe5;204800];
    let entries: [(u8,&[u8;11],u8,u8);2] = [(0,b"LETTER  TXT",3,1),(2,b"MEMO    TXT",4,2)];
    for (i,(user,name,records,block)) in entries.iter().enumerate() {
        let off = 0x3000 + i*32;
        img[off] = *user;
        img[off+1..off+12].copy_from_slice(*name);
        img[off+12..off+32].fill(0);
        img[off+15] = *records;
        img[off+16] = *block;
    }
    img[0x5000+1024..0x5000+2048].fill(b'a');
    img[0x5000+2048..0x5000+3072].fill(b'b');
    img
}

fn fixture(dir: &Path,name: &str,dat: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path,dat).expect("could not write fixture");
    path
}

#[test]
fn convert_td0() -> TestResult {
    let dir = tempfile::tempdir()?;
    let src = fixture(dir.path(),"boot.td0",&hp150_td0());
    let dst = dir.path().join("boot.img");
    Command::cargo_bin("flopkit")?
        .arg("convert")
        .arg("-d").arg(&src)
        .arg("-o").arg(&dst)
        .assert()
        .success()
        .stderr(predicate::str::contains("source:      td0"))
        .stderr(predicate::str::contains("image size:  4096"));
    let img = std::fs::read(&dst)?;
    assert_eq!(img.len(),4096);
    assert_eq!(&img[254..256],&[0x55,0xaa]);
    assert_eq!(img[4095],16);
    Ok(())
}

#[test]
fn convert_forced_geometry() -> TestResult {
    let dir = tempfile::tempdir()?;
    let src = fixture(dir.path(),"boot.td0",&hp150_td0());
    let dst = dir.path().join("boot.img");
    Command::cargo_bin("flopkit")?
        .arg("convert")
        .arg("-d").arg(&src)
        .arg("-o").arg(&dst)
        .arg("--geometry").arg("1,1,18,256")
        .arg("--fill").arg("0xe5")
        .assert()
        .success()
        .stderr(predicate::str::contains("2 missing"));
    let img = std::fs::read(&dst)?;
    assert_eq!(img.len(),18*256);
    assert_eq!(img[17*256],0xe5);
    Command::cargo_bin("flopkit")?
        .arg("convert")
        .arg("-d").arg(&src)
        .arg("-o").arg(&dst)
        .arg("--geometry").arg("1,2")
        .assert()
        .failure();
    Ok(())
}

#[test]
fn geometry_json() -> TestResult {
    let dir = tempfile::tempdir()?;
    let src = fixture(dir.path(),"boot.td0",&hp150_td0());
    Command::cargo_bin("flopkit")?
        .arg("geometry")
        .arg("-d").arg(&src)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"type\":\"hp150_standard\""))
        .stdout(predicate::str::contains("\"sectors_per_track\":16"));
    Ok(())
}

#[test]
fn bad_container() -> TestResult {
    let dir = tempfile::tempdir()?;
    // signature present, header cut short
    let src = fixture(dir.path(),"bad.td0",b"TD\x00\x00");
    Command::cargo_bin("flopkit")?
        .arg("geometry")
        .arg("-d").arg(&src)
        .assert()
        .failure();
    Ok(())
}

#[test]
fn detect_fat() -> TestResult {
    let dir = tempfile::tempdir()?;
    let src = fixture(dir.path(),"pc.img",&pc_disk());
    Command::cargo_bin("flopkit")?
        .arg("detect")
        .arg("-d").arg(&src)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"best\":\"fat\""))
        .stdout(predicate::str::contains("IBM  3.1"));
    Ok(())
}

#[test]
fn catalog_fat() -> TestResult {
    let dir = tempfile::tempdir()?;
    let src = fixture(dir.path(),"pc.img",&pc_disk());
    Command::cargo_bin("flopkit")?
        .env("NO_COLOR","1")
        .arg("catalog")
        .arg("-d").arg(&src)
        .assert()
        .success()
        .stdout(predicate::str::contains("REPORT"))
        .stdout(predicate::str::contains("HELLO"))
        .stdout(predicate::str::contains("2 File(s)"));
    Command::cargo_bin("flopkit")?
        .env("NO_COLOR","1")
        .arg("dir")
        .arg("-d").arg(&src)
        .arg("-f").arg("h*.txt")
        .assert()
        .success()
        .stdout(predicate::str::contains("HELLO"))
        .stdout(predicate::str::contains("REPORT").not());
    Ok(())
}

#[test]
fn get_fat() -> TestResult {
    let dir = tempfile::tempdir()?;
    let src = fixture(dir.path(),"pc.img",&pc_disk());
    let output = Command::cargo_bin("flopkit")?
        .arg("get")
        .arg("-d").arg(&src)
        .arg("-f").arg("hello.txt")
        .output()?;
    assert!(output.status.success());
    assert_eq!(output.stdout,b"hello, world\n".to_vec());
    Command::cargo_bin("flopkit")?
        .arg("get")
        .arg("-d").arg(&src)
        .arg("-f").arg("missing.txt")
        .assert()
        .failure();
    Ok(())
}

#[test]
fn put_and_delete_fat() -> TestResult {
    let dir = tempfile::tempdir()?;
    let src = fixture(dir.path(),"pc.img",&pc_disk());
    assert_cmd::Command::cargo_bin("flopkit")?
        .arg("put")
        .arg("-d").arg(&src)
        .arg("-f").arg("notes.txt")
        .write_stdin("remember the milk\n")
        .assert()
        .success();
    let output = Command::cargo_bin("flopkit")?
        .arg("get")
        .arg("-d").arg(&src)
        .arg("-f").arg("NOTES.TXT")
        .output()?;
    assert_eq!(output.stdout,b"remember the milk\n".to_vec());
    Command::cargo_bin("flopkit")?
        .arg("delete")
        .arg("-d").arg(&src)
        .arg("-f").arg("report.txt")
        .assert()
        .success();
    Command::cargo_bin("flopkit")?
        .env("NO_COLOR","1")
        .arg("catalog")
        .arg("-d").arg(&src)
        .assert()
        .success()
        .stdout(predicate::str::contains("NOTES"))
        .stdout(predicate::str::contains("REPORT").not());
    Ok(())
}

#[test]
fn put_refuses_container() -> TestResult {
    let dir = tempfile::tempdir()?;
    let td0 = hp150_td0();
    let src = fixture(dir.path(),"boot.td0",&td0);
    assert_cmd::Command::cargo_bin("flopkit")?
        .arg("put")
        .arg("-d").arg(&src)
        .arg("-f").arg("notes.txt")
        .write_stdin("abc")
        .assert()
        .failure();
    assert_eq!(std::fs::read(&src)?,td0);
    Ok(())
}

#[test]
fn usage_fat() -> TestResult {
    let dir = tempfile::tempdir()?;
    let src = fixture(dir.path(),"pc.img",&pc_disk());
    Command::cargo_bin("flopkit")?
        .arg("usage")
        .arg("-d").arg(&src)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"fs\":\"fat\""))
        .stdout(predicate::str::contains("\"unit\":1024"));
    Ok(())
}

#[test]
fn extract_cpm() -> TestResult {
    let dir = tempfile::tempdir()?;
    let src = fixture(dir.path(),"osborne.img",&cpm_disk());
    let out = dir.path().join("files");
    Command::cargo_bin("flopkit")?
        .arg("extract")
        .arg("-d").arg(&src)
        .arg("-o").arg(&out)
        .assert()
        .success()
        .stderr(predicate::str::contains("extracted 2 files from cpm image"));
    assert_eq!(std::fs::read(out.join("LETTER.TXT"))?,vec![b'a';384]);
    assert_eq!(std::fs::read(out.join("user2_MEMO.TXT"))?,vec![b'b';512]);
    Ok(())
}

#[test]
fn extract_raw() -> TestResult {
    let dir = tempfile::tempdir()?;
    let junk: Vec<u8> = (0..100000usize).map(|i| (i % 7) as u8).collect();
    let src = fixture(dir.path(),"junk.img",&junk);
    let out = dir.path().join("analysis");
    Command::cargo_bin("flopkit")?
        .arg("extract")
        .arg("-d").arg(&src)
        .arg("-o").arg(&out)
        .assert()
        .success();
    assert!(out.join("first_sectors.hex").exists());
    assert_eq!(std::fs::read(out.join("boot_sector.bin"))?,junk[0..512].to_vec());
    assert!(out.join("sector_analysis.txt").exists());
    Ok(())
}

#[test]
fn completions() -> TestResult {
    Command::cargo_bin("flopkit")?
        .arg("completions")
        .arg("-s").arg("bash")
        .assert()
        .success()
        .stdout(predicate::str::contains("flopkit"));
    Ok(())
}
