// test of FAT volumes, standard and HP-150
use flopkit::fs::{DiskFS,attr};
use flopkit::fs::fat::RootMethod;
use flopkit::diag::Kind;

const FAT: usize = 0x200;
const FAT_COPY: usize = 0x600;
const ROOT: usize = 0xa00;
const DATA: usize = 0x1800;
const CLUSTER: usize = 1024;

fn put_entry(img: &mut [u8],offset: usize,name: &[u8;11],attributes: u8,cluster: u16,size: u32) {
    img[offset..offset+11].copy_from_slice(name);
    img[offset+11] = attributes;
    img[offset+26..offset+28].copy_from_slice(&cluster.to_le_bytes());
    img[offset+28..offset+32].copy_from_slice(&size.to_le_bytes());
}

/// Pack 12 bit entries into FAT bytes
fn fat12(entries: &[u16]) -> Vec<u8> {
    let mut ans = vec![0;entries.len()*3/2 + 1];
    for (n,e) in entries.iter().enumerate() {
        let offset = n + n/2;
        match n & 1 {
            0 => {
                ans[offset] = (*e & 0xff) as u8;
                ans[offset+1] = (ans[offset+1] & 0xf0) | (*e >> 8) as u8;
            },
            _ => {
                ans[offset] = (ans[offset] & 0x0f) | ((*e & 0x0f) << 4) as u8;
                ans[offset+1] = (*e >> 4) as u8;
            }
        }
    }
    ans
}

/// 360K PC disk, 2 sectors per cluster, 2 FATs of 2 sectors, 112 root entries
fn pc_disk(fat: &[u8]) -> Vec<u8> {
    let mut img = vec![0;368640];
    img[0..3].copy_from_slice(&[0xeb,0x34,0x90]);
    img[3..11].copy_from_slice(b"IBM  3.1");
    img[11..13].copy_from_slice(&512u16.to_le_bytes());
    img[13] = 2;
    img[14..16].copy_from_slice(&1u16.to_le_bytes());
    img[16] = 2;
    img[17..19].copy_from_slice(&112u16.to_le_bytes());
    img[19..21].copy_from_slice(&720u16.to_le_bytes());
    img[21] = 0xfd;
    img[22..24].copy_from_slice(&2u16.to_le_bytes());
    img[510..512].copy_from_slice(&[0x55,0xaa]);
    img[FAT..FAT+fat.len()].copy_from_slice(fat);
    img[FAT_COPY..FAT_COPY+fat.len()].copy_from_slice(fat);
    put_entry(&mut img,ROOT,b"MYDISK     ",attr::VOLUME_ID,0,0);
    put_entry(&mut img,ROOT+32,b"REPORT  TXT",attr::ARCHIVE,2,2*CLUSTER as u32);
    put_entry(&mut img,ROOT+64,b"AUTOEXECBAT",attr::ARCHIVE,0,0);
    img[DATA..DATA+CLUSTER].fill(b'1');
    img[DATA+CLUSTER..DATA+2*CLUSTER].fill(b'2');
    img[DATA+2*CLUSTER..DATA+3*CLUSTER].fill(b'3');
    img
}

#[test]
fn two_cluster_chain() {
    let fat = fat12(&[0xff0,0xfff,3,0xfff]);
    assert_eq!(fat[0..6],[0xf0,0xff,0xff,0x03,0xf0,0xff]);
    let mut disk = flopkit::open_fat(pc_disk(&fat)).expect("could not open");
    assert_eq!(disk.fs_name(),"fat");
    assert_eq!(disk.root_dir().offset,ROOT);
    assert_eq!(disk.volume_label(),Some("MYDISK".to_string()));
    assert_eq!(disk.list_files().len(),2);
    let f = disk.read_file("report.txt").expect("read failed");
    assert!(!f.truncated);
    assert_eq!(f.data.len(),2*CLUSTER);
    assert_eq!(f.data[CLUSTER-1],b'1');
    assert_eq!(f.data[CLUSTER],b'2');
    assert_eq!(*f.data.last().expect("empty"),b'2');
    let f = disk.read_file("AUTOEXEC.BAT").expect("read failed");
    assert!(f.data.is_empty());
    assert!(disk.diagnostics().is_empty());
}

#[test]
fn chain_damage() {
    // 2 -> 3 -> 2
    let mut disk = flopkit::open_fat(pc_disk(&fat12(&[0xff0,0xfff,3,2]))).expect("could not open");
    let mut img = disk.to_bytes();
    put_entry(&mut img,ROOT+32,b"REPORT  TXT",attr::ARCHIVE,2,4*CLUSTER as u32);
    disk = flopkit::open_fat(img).expect("could not open");
    let f = disk.read_file("REPORT.TXT").expect("read failed");
    assert!(f.truncated);
    assert_eq!(f.data.len(),2*CLUSTER);
    assert!(disk.diagnostics().has(Kind::ClusterChainCycle));

    // 2 -> free
    let mut disk = flopkit::open_fat(pc_disk(&fat12(&[0xff0,0xfff,0,0]))).expect("could not open");
    let f = disk.read_file("REPORT.TXT").expect("read failed");
    assert!(f.truncated);
    assert_eq!(f.data,vec![b'1';CLUSTER]);
    assert!(disk.diagnostics().has(Kind::ClusterChainBroken));
}

#[test]
fn write_and_delete() {
    let mut disk = flopkit::open_fat(pc_disk(&fat12(&[0xff0,0xfff,3,0xfff]))).expect("could not open");
    let free_before = disk.disk_usage().free;
    assert_eq!(disk.write_file("NOTES.TXT",b"hello").expect("write failed"),5);
    let entry = disk.find("notes.txt").expect("not found");
    assert_eq!(entry.start,4);
    assert_eq!(disk.read_file("NOTES.TXT").expect("read failed").data,b"hello".to_vec());
    assert_eq!(disk.disk_usage().free,free_before - CLUSTER);
    // the new chain is in both copies of the FAT
    let img = disk.to_bytes();
    assert_eq!(img[FAT..FAT+8],img[FAT_COPY..FAT_COPY+8]);

    // shrink in place
    assert_eq!(disk.write_file("REPORT.TXT",&vec![b'x';1500]).expect("write failed"),1500);
    assert_eq!(disk.find("REPORT.TXT").expect("not found").size,1500);
    assert!(disk.write_file("REPORT.TXT",&vec![b'x';3*CLUSTER]).is_err());

    disk.delete_file("REPORT.TXT").expect("delete failed");
    assert!(disk.find("REPORT.TXT").is_err());
    assert_eq!(disk.disk_usage().free,free_before + CLUSTER);
    assert!(disk.delete_file("REPORT.TXT").is_err());

    // changes persist in the bytes
    let disk = flopkit::open_fat(disk.to_bytes()).expect("could not open");
    assert_eq!(disk.list_files().len(),2);
}

#[test]
fn directory_found_by_offset_table() {
    // 5 entries at 0x1100, the rest of the image is garbage
    let mut img: Vec<u8> = (0..368640usize).map(|i| (i*7 % 31) as u8).collect();
    let names: [&[u8;11];5] = [b"README  TXT",b"LETTER  DOC",b"NOTES   TXT",b"CONFIG  SYS",b"DATA    DAT"];
    for (i,name) in names.iter().enumerate() {
        put_entry(&mut img,0x1100 + i*32,name,attr::ARCHIVE,2 + i as u16,100);
    }
    let disk = flopkit::open_fat(img.clone()).expect("could not open");
    assert_eq!(disk.root_dir().offset,0x1100);
    assert_eq!(disk.list_files().len(),5);
    assert_eq!(disk.list_files()[1].full_name(),"LETTER.DOC");

    let disk = flopkit::fs::fat::Disk::open(img).expect("could not open");
    assert_eq!(disk.root_dir().offset,0x1100);
    assert_eq!(disk.root_dir().method,RootMethod::Alternate);
    assert_eq!(disk.list_files().len(),5);
    assert!(disk.diagnostics().has(Kind::BpbInvalid));
}

#[test]
fn hp150_disk() {
    let mut img = vec![0;270336];
    img[11..13].copy_from_slice(&256u16.to_le_bytes());
    img[FAT..FAT+6].copy_from_slice(&fat12(&[0xffe,0xfff,0xfff,0xfff])[0..6]);
    put_entry(&mut img,0x700,b"HPSYS      ",attr::HIDDEN|attr::SYSTEM,0,0);
    put_entry(&mut img,0x720,b"VC      COM",attr::ARCHIVE,2,300);
    put_entry(&mut img,0x740,b"MEMOMAKRCAL",attr::ARCHIVE,3,1024);
    img[0x1000..0x1000+300].fill(0x56);
    img[0x1400..0x1800].fill(0x43);
    let mut disk = flopkit::open_fat(img).expect("could not open");
    assert_eq!(disk.fs_name(),"fat_hp150");
    assert_eq!(disk.list_files().len(),3);
    assert_eq!(disk.list_visible_files().len(),2);
    assert_eq!(disk.read_file("VC.COM").expect("read failed").data,vec![0x56;300]);
    assert_eq!(disk.read_file("MEMOMAKR.CAL").expect("read failed").data,vec![0x43;1024]);
    assert_eq!(disk.layout_json()["data_start"],0x1000);
}
