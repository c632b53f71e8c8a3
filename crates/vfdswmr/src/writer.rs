//! Writer side of the shared metadata file: the per-tick merge between the
//! page buffer's tick list and the persistent, reader-visible index, plus
//! the physical slot allocation and file I/O to make that merge durable.

use crate::format::{IndexEntry, MetadataHeader, MetadataIndex};
use buffer::{PageBuffer, SwmrDelay, TickListEntry};
use common::{PageBufferConfig, PageNum, PbResult, PublishStats};
use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use storage::FileDriver;

/// The `SwmrDelay` a real writer installs on its page buffer: every
/// metadata write is held on the delayed-write list for a fixed number of
/// ticks, giving a reader that is mid-read when a publish happens time to
/// finish against the previous version before its raw-file slot is reused.
#[derive(Debug)]
pub struct PublishDelay {
    lag_ticks: u64,
}

impl PublishDelay {
    pub fn new(lag_ticks: u64) -> Self {
        Self { lag_ticks }
    }
}

impl SwmrDelay for PublishDelay {
    fn request_write_delay(&mut self, _page: PageNum) -> u64 {
        self.lag_ticks
    }
}

/// Builds the `still_protected` predicate `publish_tick` needs, straight
/// from the page buffer it is publishing on behalf of: a previously
/// published page stays protected as long as the buffer still holds it
/// resident and dirty, i.e. the real file does not yet hold its current
/// bytes. Once the buffer has flushed or evicted it, the metadata file no
/// longer needs to shadow it.
pub fn still_protected_by<D: FileDriver>(pb: &PageBuffer<D>) -> impl Fn(u32) -> bool + '_ {
    let page_size = pb.page_size() as u64;
    move |hdf5_page_offset: u32| {
        let addr = hdf5_page_offset as u64;
        let page = addr / page_size;
        pb.is_resident(addr) && pb.entry_dirty(page) == Some(true)
    }
}

/// A thin, sorted view over the entries currently published to readers.
/// Kept distinct from the raw `Vec<IndexEntry>` the wire format uses so
/// lookups read as intent rather than a bare binary search.
#[derive(Clone, Debug, Default)]
pub struct PersistentIndex {
    entries: Vec<IndexEntry>,
}

impl PersistentIndex {
    pub fn new(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Binary-search position of `hdf5_page_offset`, `Ok` if present.
    pub fn position(&self, hdf5_page_offset: u32) -> Result<usize, usize> {
        self.entries
            .binary_search_by_key(&hdf5_page_offset, |e| e.hdf5_page_offset)
    }
}

/// Merges a tick's modified pages into the persistent index.
///
/// `still_protected` is consulted for every currently-published page that
/// the tick list did *not* touch: returning `true` keeps it published
/// (it is still ahead of the stable HDF5 file), `false` drops it from the
/// index and frees its slot (the normal file now holds the current bytes,
/// so VFD-SWMR no longer needs to shadow it).
pub fn publish(
    current: &[IndexEntry],
    tick_entries: &[TickListEntry],
    still_protected: impl Fn(u32) -> bool,
    mut alloc_slot: impl FnMut() -> u32,
) -> (Vec<IndexEntry>, Vec<(u32, Vec<u8>)>, Vec<u32>, PublishStats) {
    let mut merged: BTreeMap<u32, IndexEntry> = current
        .iter()
        .map(|e| (e.hdf5_page_offset, *e))
        .collect();
    let mut stats = PublishStats::default();
    let mut writes = Vec::with_capacity(tick_entries.len());

    let touched: std::collections::HashSet<u32> = tick_entries
        .iter()
        .map(|te| te.addr as u32)
        .collect();

    for te in tick_entries {
        let hdf5_page_offset = te.addr as u32;
        let checksum = crc32fast::hash(&te.image);
        let slot = match merged.get(&hdf5_page_offset) {
            Some(existing) => {
                stats.modified += 1;
                existing.md_file_page_offset
            }
            None => {
                stats.added += 1;
                alloc_slot()
            }
        };
        merged.insert(
            hdf5_page_offset,
            IndexEntry {
                hdf5_page_offset,
                md_file_page_offset: slot,
                length: te.image.len() as u32,
                checksum,
            },
        );
        writes.push((slot, te.image.clone()));
    }

    let mut freed = Vec::new();
    for entry in current {
        if touched.contains(&entry.hdf5_page_offset) {
            continue;
        }
        if still_protected(entry.hdf5_page_offset) {
            stats.not_in_tl += 1;
        } else {
            stats.not_in_tl_flushed += 1;
            freed.push(entry.md_file_page_offset);
            merged.remove(&entry.hdf5_page_offset);
        }
    }

    let new_index: Vec<IndexEntry> = merged.into_values().collect();
    (new_index, writes, freed, stats)
}

/// Owns the shared metadata file on the writer side: physical slot
/// allocation, page writes, and header/index publication.
pub struct MetadataFileWriter {
    file: File,
    page_size: usize,
    md_pages_reserved: u64,
    tick_num: u64,
    index: PersistentIndex,
    next_free_slot: u32,
    free_slots: VecDeque<u32>,
}

impl MetadataFileWriter {
    pub fn create(path: impl AsRef<Path>, config: &PageBufferConfig) -> PbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut writer = Self {
            file,
            page_size: config.page_size,
            md_pages_reserved: config.md_pages_reserved,
            tick_num: 0,
            index: PersistentIndex::default(),
            next_free_slot: config.md_pages_reserved as u32,
            free_slots: VecDeque::new(),
        };
        writer.write_header_and_index()?;
        Ok(writer)
    }

    /// Runs one tick's publish merge, writes the changed pages, and makes
    /// the new index visible to readers via the header/index rewrite.
    pub fn publish_tick(
        &mut self,
        tick_entries: &[TickListEntry],
        still_protected: impl Fn(u32) -> bool,
    ) -> PbResult<PublishStats> {
        let current = self.index.entries().to_vec();
        let mut next_free_slot = self.next_free_slot;
        let mut free_slots = self.free_slots.clone();
        let alloc = || {
            free_slots.pop_front().unwrap_or_else(|| {
                let slot = next_free_slot;
                next_free_slot += 1;
                slot
            })
        };
        let (new_entries, writes, freed, stats) = publish(&current, tick_entries, &still_protected, alloc);
        self.next_free_slot = next_free_slot;
        self.free_slots = free_slots;

        for (slot, bytes) in &writes {
            let offset = *slot as u64 * self.page_size as u64;
            self.file.seek(SeekFrom::Start(offset))?;
            self.file.write_all(bytes)?;
        }
        for slot in freed {
            self.free_slots.push_back(slot);
        }

        self.tick_num += 1;
        self.index = PersistentIndex::new(new_entries);
        self.write_header_and_index()?;
        Ok(stats)
    }

    fn write_header_and_index(&mut self) -> PbResult<()> {
        let index = MetadataIndex {
            tick_num: self.tick_num,
            entries: self.index.entries().to_vec(),
        };
        let index_bytes = index.encode();
        let index_offset = self.page_size as u64;

        let header = MetadataHeader {
            page_size: self.page_size as u32,
            tick_num: self.tick_num,
            index_offset,
            index_length: index_bytes.len() as u64,
        };

        // Index first, header last: a reader that sees the new header
        // before the index is written would read garbage, but the
        // checksum in the header's own framing catches a torn header
        // write, and the index's own checksum catches a torn index
        // write. Ordering here just minimizes the retry window.
        self.file.seek(SeekFrom::Start(index_offset))?;
        self.file.write_all(&index_bytes)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.encode())?;
        self.file.sync_data()?;
        Ok(())
    }

    pub fn tick_num(&self) -> u64 {
        self.tick_num
    }

    pub fn index(&self) -> &PersistentIndex {
        &self.index
    }
}
