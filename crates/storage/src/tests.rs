use super::*;
use common::PageKind;
use tempfile::tempdir;

#[test]
fn write_then_read_round_trips() {
    let dir = tempdir().unwrap();
    let mut driver = PosixFileDriver::open(dir.path().join("md.bin")).unwrap();

    driver
        .write(PageKind::Metadata, 0, &[1, 2, 3, 4])
        .unwrap();
    let buf = driver.read(PageKind::Metadata, 0, 4).unwrap();

    assert_eq!(buf, vec![1, 2, 3, 4]);
}

#[test]
fn read_past_eof_is_zero_filled() {
    let dir = tempdir().unwrap();
    let mut driver = PosixFileDriver::open(dir.path().join("md.bin")).unwrap();

    let buf = driver.read(PageKind::RawData, 4096, 16).unwrap();

    assert_eq!(buf, vec![0u8; 16]);
}

#[test]
fn eoa_tracks_independently_per_kind() {
    let dir = tempdir().unwrap();
    let mut driver = PosixFileDriver::open(dir.path().join("f.bin")).unwrap();

    driver.write(PageKind::Metadata, 0, &[0u8; 4096]).unwrap();
    driver.write(PageKind::RawData, 8192, &[0u8; 4096]).unwrap();

    assert_eq!(driver.get_eoa(PageKind::Metadata), 4096);
    assert_eq!(driver.get_eoa(PageKind::RawData), 8192 + 4096);
}

#[test]
fn set_eoa_is_explicit() {
    let dir = tempdir().unwrap();
    let mut driver = PosixFileDriver::open(dir.path().join("f.bin")).unwrap();

    driver.set_eoa(PageKind::Metadata, 65536).unwrap();
    assert_eq!(driver.get_eoa(PageKind::Metadata), 65536);
}

#[test]
fn truncate_shrinks_to_eoa() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("f.bin");
    let mut driver = PosixFileDriver::open(&path).unwrap();

    driver.write(PageKind::Metadata, 0, &[7u8; 4096]).unwrap();
    driver.write(PageKind::RawData, 0, &[7u8; 2048]).unwrap();
    driver.truncate(true).unwrap();

    assert_eq!(driver.get_eof().unwrap(), 4096);
}

#[test]
fn lock_unlock_round_trips() {
    let dir = tempdir().unwrap();
    let mut driver = PosixFileDriver::open(dir.path().join("f.bin")).unwrap();

    assert!(!driver.is_locked());
    driver.lock(true).unwrap();
    assert!(driver.is_locked());
    driver.unlock().unwrap();
    assert!(!driver.is_locked());
}

#[test]
fn partial_read_near_eof_is_zero_padded() {
    let dir = tempdir().unwrap();
    let mut driver = PosixFileDriver::open(dir.path().join("f.bin")).unwrap();

    driver.write(PageKind::Metadata, 0, &[9u8; 10]).unwrap();
    let buf = driver.read(PageKind::Metadata, 5, 10).unwrap();

    assert_eq!(&buf[..5], &[9u8; 5]);
    assert_eq!(&buf[5..], &[0u8; 5]);
}
