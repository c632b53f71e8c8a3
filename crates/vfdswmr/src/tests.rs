use super::*;
use buffer::{PageBuffer, TickListEntry};
use common::{PageBufferConfig, PageKind, PbError};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use storage::PosixFileDriver;
use tempfile::tempdir;

fn config() -> PageBufferConfig {
    PageBufferConfig::builder().page_size(64).build()
}

fn tick_entry(addr: u64, byte: u8) -> TickListEntry {
    TickListEntry {
        page: addr,
        addr,
        kind: PageKind::Metadata,
        size: 64,
        dirty: true,
        delay_until: 0,
        image: vec![byte; 64],
    }
}

#[test]
fn writer_then_reader_round_trip_a_published_page() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("md.bin");
    let cfg = config();

    let mut writer = MetadataFileWriter::create(&path, &cfg).unwrap();
    let stats = writer
        .publish_tick(&[tick_entry(0, 7)], |_| true)
        .unwrap();
    assert_eq!(stats.added, 1);
    assert_eq!(stats.modified, 0);

    let mut reader = MetadataFileReader::open(&path, &cfg).unwrap();
    let bytes = reader.try_read(0, 64).unwrap().unwrap();
    assert_eq!(bytes, vec![7u8; 64]);
}

#[test]
fn reader_reports_none_for_unpublished_page() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("md.bin");
    let cfg = config();
    MetadataFileWriter::create(&path, &cfg).unwrap();

    let mut reader = MetadataFileReader::open(&path, &cfg).unwrap();
    assert!(reader.try_read(128, 64).unwrap().is_none());
}

#[test]
fn second_tick_modifying_same_page_reuses_its_slot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("md.bin");
    let cfg = config();
    let mut writer = MetadataFileWriter::create(&path, &cfg).unwrap();

    writer.publish_tick(&[tick_entry(0, 1)], |_| true).unwrap();
    let slot_before = writer.index().entries()[0].md_file_page_offset;

    let stats = writer.publish_tick(&[tick_entry(0, 2)], |_| true).unwrap();
    assert_eq!(stats.modified, 1);
    assert_eq!(stats.added, 0);
    let slot_after = writer.index().entries()[0].md_file_page_offset;
    assert_eq!(slot_before, slot_after);

    let mut reader = MetadataFileReader::open(&path, &cfg).unwrap();
    let bytes = reader.try_read(0, 64).unwrap().unwrap();
    assert_eq!(bytes, vec![2u8; 64]);
}

#[test]
fn dropping_protection_frees_the_entry_and_its_slot_is_reused() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("md.bin");
    let cfg = config();
    let mut writer = MetadataFileWriter::create(&path, &cfg).unwrap();

    writer.publish_tick(&[tick_entry(0, 1)], |_| true).unwrap();
    let freed_slot = writer.index().entries()[0].md_file_page_offset;

    // Page 0 is no longer in the tick list and the caller reports it has
    // since been flushed to the real file, so it drops out of the index.
    let stats = writer.publish_tick(&[], |_| false).unwrap();
    assert_eq!(stats.not_in_tl_flushed, 1);
    assert!(writer.index().entries().is_empty());

    // A fresh page should be handed the slot just freed rather than a new one.
    writer.publish_tick(&[tick_entry(64, 9)], |_| true).unwrap();
    assert_eq!(writer.index().entries()[0].md_file_page_offset, freed_slot);
}

#[test]
fn still_protected_entries_survive_ticks_that_do_not_touch_them() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("md.bin");
    let cfg = config();
    let mut writer = MetadataFileWriter::create(&path, &cfg).unwrap();

    writer.publish_tick(&[tick_entry(0, 1)], |_| true).unwrap();
    let stats = writer.publish_tick(&[tick_entry(64, 2)], |_| true).unwrap();
    assert_eq!(stats.not_in_tl, 1);
    assert_eq!(writer.index().entries().len(), 2);
}

#[test]
fn publish_merge_is_pure_and_matches_writer_behavior() {
    let current = vec![IndexEntry {
        hdf5_page_offset: 0,
        md_file_page_offset: 1,
        length: 64,
        checksum: crc32fast::hash(&[1u8; 64]),
    }];
    let mut next_slot = 2u32;
    let (new_index, writes, freed, stats) = publish(
        &current,
        &[tick_entry(0, 5), tick_entry(64, 6)],
        |_| true,
        || {
            let slot = next_slot;
            next_slot += 1;
            slot
        },
    );

    assert_eq!(stats.modified, 1);
    assert_eq!(stats.added, 1);
    assert!(freed.is_empty());
    assert_eq!(new_index.len(), 2);
    assert_eq!(writes.len(), 2);
}

/// Overwrites the header + index at the front of the metadata file with a
/// hand-built pair at `tick_num`, bypassing `MetadataFileWriter` entirely.
/// Used to simulate a writer that has gone backwards or skipped ticks.
fn forge_header_and_index(path: &std::path::Path, cfg: &PageBufferConfig, tick_num: u64) {
    let index = MetadataIndex {
        tick_num,
        entries: Vec::new(),
    };
    let index_bytes = index.encode();
    let index_offset = cfg.page_size as u64;
    let header = MetadataHeader {
        page_size: cfg.page_size as u32,
        tick_num,
        index_offset,
        index_length: index_bytes.len() as u64,
    };

    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(index_offset)).unwrap();
    file.write_all(&index_bytes).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(&header.encode()).unwrap();
    file.sync_data().unwrap();
}

#[test]
fn reload_rejects_a_header_that_goes_backwards() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("md.bin");
    let cfg = config();

    let mut writer = MetadataFileWriter::create(&path, &cfg).unwrap();
    writer.publish_tick(&[tick_entry(0, 1)], |_| true).unwrap();

    let mut reader = MetadataFileReader::open(&path, &cfg).unwrap();
    assert_eq!(reader.header().tick_num, 1);

    // A consistent header/index pair, but at a tick older than what this
    // reader already observed — the writer cannot have gone backwards.
    forge_header_and_index(&path, &cfg, 0);

    let err = reader.reload().unwrap_err();
    assert!(matches!(err, PbError::Corrupt(_)));
}

#[test]
fn reload_is_a_no_op_when_the_header_tick_is_unchanged() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("md.bin");
    let cfg = config();

    let mut writer = MetadataFileWriter::create(&path, &cfg).unwrap();
    writer.publish_tick(&[tick_entry(0, 1)], |_| true).unwrap();

    let mut reader = MetadataFileReader::open(&path, &cfg).unwrap();
    assert_eq!(reader.try_read(0, 64).unwrap().unwrap(), vec![1u8; 64]);

    reader.reload().unwrap();
    assert_eq!(reader.header().tick_num, 1);
    assert_eq!(reader.try_read(0, 64).unwrap().unwrap(), vec![1u8; 64]);
}

#[test]
fn reload_hard_errors_when_header_outpaces_index_by_more_than_one_tick() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("md.bin");
    let cfg = config();

    let mut writer = MetadataFileWriter::create(&path, &cfg).unwrap();
    writer.publish_tick(&[tick_entry(0, 1)], |_| true).unwrap();
    let mut reader = MetadataFileReader::open(&path, &cfg).unwrap();
    let real_header = *reader.header();

    // Hand-write a header claiming tick 5, pointing at the same
    // index_offset/index_length as the real one, while leaving the
    // on-disk index itself (still at tick 1) untouched: a gap no amount
    // of retrying can close.
    let header = MetadataHeader {
        tick_num: 5,
        ..real_header
    };
    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.write_all(&header.encode()).unwrap();
    file.sync_data().unwrap();

    let err = reader.reload().unwrap_err();
    assert!(matches!(err, PbError::Invariant(_)));
}

#[test]
fn writer_publish_round_trip_with_a_real_delayed_write_and_reader_observation() {
    let dir = tempdir().unwrap();
    let data_path = dir.path().join("data.h5");
    let md_path = dir.path().join("md.bin");
    let cfg = PageBufferConfig::builder()
        .page_size(64)
        .max_size(64 * 8)
        .swmr_writer(true)
        .build();

    let driver = PosixFileDriver::open(&data_path).unwrap();
    let mut pb = PageBuffer::create(driver, cfg.clone()).unwrap();
    let mut md_writer = MetadataFileWriter::create(&md_path, &cfg).unwrap();

    // Tick 1: first write to a never-loaded page is never delayed. Publish
    // it and drain so the page counts as reader-visible from here on.
    pb.write(PageKind::Metadata, 0, 4, &[1, 1, 1, 1]).unwrap();
    let snapshot = pb.tick_list_snapshot();
    md_writer.publish_tick(&snapshot, still_protected_by(&pb)).unwrap();
    pb.drain_tick_list().unwrap();

    let mut reader = MetadataFileReader::open(&md_path, &cfg).unwrap();
    assert_eq!(reader.try_read(0, 4).unwrap().unwrap(), vec![1, 1, 1, 1]);

    // Tick 2: a second write to the now-loaded page goes through the real
    // `PublishDelay` collaborator and lands on the delayed-write list.
    pb.set_swmr_delay(Box::new(PublishDelay::new(2)));
    pb.write(PageKind::Metadata, 0, 4, &[2, 2, 2, 2]).unwrap();
    assert_eq!(pb.stats().dwl_insertions, 1);

    let snapshot = pb.tick_list_snapshot();
    md_writer.publish_tick(&snapshot, still_protected_by(&pb)).unwrap();
    pb.drain_tick_list().unwrap();

    reader.reload().unwrap();
    assert_eq!(reader.try_read(0, 4).unwrap().unwrap(), vec![2, 2, 2, 2]);

    // Advance past the delay and release it: the page rejoins the LRU but
    // is still resident and dirty, so it is still protected.
    pb.advance_tick(1).unwrap();
    pb.advance_tick(2).unwrap();
    pb.advance_tick(3).unwrap();
    let released = pb.release_delayed_writes().unwrap();
    assert_eq!(released, vec![0]);

    // Once the page buffer actually flushes the page to the real file, it
    // is no longer `still_protected`, and the next publish drops it.
    pb.flush().unwrap();
    let stats = md_writer.publish_tick(&[], still_protected_by(&pb)).unwrap();
    assert_eq!(stats.not_in_tl_flushed, 1);

    reader.reload().unwrap();
    assert!(reader.try_read(0, 4).unwrap().is_none());
}
