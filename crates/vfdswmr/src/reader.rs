//! Reader-side access to the shared metadata file.
//!
//! A VFD-SWMR reader has no lock on the writer and may observe the file
//! mid-update, so every load is retried under a [`BackoffPolicy`] and
//! verified by checksum before being trusted. This mirrors the page
//! buffer's own "read, validate, retry on failure" shape rather than
//! introducing a new one.

use crate::format::{IndexEntry, MetadataHeader, MetadataIndex, HEADER_SIZE};
use common::{Addr, BackoffPolicy, PageBufferConfig, PbError, PbResult};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

pub struct MetadataFileReader {
    file: File,
    header_backoff: BackoffPolicy,
    index_backoff: BackoffPolicy,
    stat_backoff: BackoffPolicy,
    entry_backoff: BackoffPolicy,
    header_retry_max: u32,
    index_retry_max: u32,
    stat_retry_max: u32,
    entry_retry_max: u32,
    header: MetadataHeader,
    index: MetadataIndex,
    /// Tick of the last snapshot we actually accepted, so `reload` can
    /// detect a header that has gone backwards. `None` until the first
    /// successful load.
    last_tick: Option<u64>,
}

impl MetadataFileReader {
    /// Opens the shared metadata file and loads an initial, validated
    /// header + index snapshot.
    pub fn open(path: impl AsRef<Path>, config: &PageBufferConfig) -> PbResult<Self> {
        let file = File::open(path)?;
        let mut reader = Self {
            file,
            header_backoff: BackoffPolicy::default(),
            index_backoff: BackoffPolicy::default(),
            stat_backoff: BackoffPolicy::default(),
            entry_backoff: BackoffPolicy::default(),
            header_retry_max: config.header_retry_max,
            index_retry_max: config.index_retry_max,
            stat_retry_max: config.stat_retry_max,
            entry_retry_max: config.entry_retry_max,
            header: MetadataHeader {
                page_size: config.page_size as u32,
                tick_num: 0,
                index_offset: 0,
                index_length: 0,
            },
            index: MetadataIndex::default(),
            last_tick: None,
        };
        reader.reload()?;
        Ok(reader)
    }

    pub fn header(&self) -> &MetadataHeader {
        &self.header
    }

    pub fn index(&self) -> &MetadataIndex {
        &self.index
    }

    fn file_len(&self) -> PbResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Blocks (with backoff) until the file has grown to at least `min_len`.
    /// A writer that has just bumped `index_length` in its header may not
    /// yet have flushed the corresponding bytes.
    fn wait_until_len(&mut self, min_len: u64) -> PbResult<()> {
        for attempt in 0..self.stat_retry_max {
            if self.file_len()? >= min_len {
                return Ok(());
            }
            self.stat_backoff.sleep(attempt);
        }
        Err(PbError::RetryExhausted(format!(
            "file never reached length {min_len}"
        )))
    }

    fn read_range(&mut self, offset: u64, len: usize) -> PbResult<Vec<u8>> {
        self.wait_until_len(offset + len as u64)?;
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn load_header_once(&mut self) -> PbResult<MetadataHeader> {
        let bytes = self.read_range(0, HEADER_SIZE)?;
        MetadataHeader::decode(&bytes)
    }

    fn load_header_retried(&mut self) -> PbResult<MetadataHeader> {
        let mut last_err = None;
        for attempt in 0..self.header_retry_max {
            match self.load_header_once() {
                Ok(header) => return Ok(header),
                Err(err) => {
                    last_err = Some(err);
                    self.header_backoff.sleep(attempt);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| PbError::RetryExhausted("header load".into())))
    }

    /// Reads and decodes the index bytes named by `header`, with no
    /// tick-skew judgment — just "are these bytes a well-formed, correctly
    /// checksummed index". Tick-skew handling lives in `reload`, where it
    /// has the header in hand to decide whether to retry or give up.
    fn load_index_once(&mut self, header: &MetadataHeader) -> PbResult<MetadataIndex> {
        let bytes = self.read_range(header.index_offset, header.index_length as usize)?;
        MetadataIndex::decode(&bytes)
    }

    fn load_index_retried(&mut self, header: &MetadataHeader) -> PbResult<MetadataIndex> {
        let mut last_err = None;
        for attempt in 0..self.index_retry_max {
            match self.load_index_once(header) {
                Ok(index) => return Ok(index),
                Err(err) => {
                    last_err = Some(err);
                    self.index_backoff.sleep(attempt);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| PbError::RetryExhausted("index load".into())))
    }

    /// Reloads header and index as a consistent pair.
    ///
    /// A header whose tick matches what we already have is a no-op. A
    /// header/index pair that disagree by more than one tick (or where the
    /// index is somehow ahead of the header) is a hard, non-retriable
    /// error — no amount of retrying fixes a writer that skipped a
    /// publish. A one-tick gap is the ordinary torn-snapshot window (we
    /// read the index just before the writer's header catch-up write) and
    /// is handled by going back and re-reading the header. A header whose
    /// tick has gone backwards relative to the last snapshot we accepted
    /// is corruption, not a race: ticks only ever move forward.
    pub fn reload(&mut self) -> PbResult<()> {
        let cached_tick = self.last_tick;
        let mut last_err = None;
        for attempt in 0..self.header_retry_max.max(1) {
            let header = match self.load_header_retried() {
                Ok(header) => header,
                Err(err) => {
                    last_err = Some(err);
                    self.header_backoff.sleep(attempt);
                    continue;
                }
            };

            let index = match self.load_index_retried(&header) {
                Ok(index) => index,
                Err(err) => {
                    last_err = Some(err);
                    self.header_backoff.sleep(attempt);
                    continue;
                }
            };

            if header.tick_num != index.tick_num {
                let forward_gap = header.tick_num.saturating_sub(index.tick_num);
                if index.tick_num > header.tick_num || forward_gap > 1 {
                    return Err(PbError::Invariant(format!(
                        "tick skew exceeds one publish: header={} index={}",
                        header.tick_num, index.tick_num
                    )));
                }
                // The writer published a new index but hasn't yet
                // overwritten the header to match. Re-read the header.
                last_err = Some(PbError::Corrupt(format!(
                    "tick skew: header={} index={}",
                    header.tick_num, index.tick_num
                )));
                self.header_backoff.sleep(attempt);
                continue;
            }

            if Some(header.tick_num) == cached_tick {
                return Ok(());
            }
            if let Some(cached) = cached_tick {
                if header.tick_num < cached {
                    return Err(PbError::Corrupt(format!(
                        "observed tick went backwards: cached={cached} new={}",
                        header.tick_num
                    )));
                }
            }

            self.header = header;
            self.last_tick = Some(self.header.tick_num);
            self.index = index;
            return Ok(());
        }
        Err(last_err.unwrap_or_else(|| PbError::RetryExhausted("header/index reload".into())))
    }

    fn find_entry(&self, hdf5_page_offset: u32) -> Option<IndexEntry> {
        self.index
            .entries
            .binary_search_by_key(&hdf5_page_offset, |e| e.hdf5_page_offset)
            .ok()
            .map(|i| self.index.entries[i])
    }

    /// Reads one full page's worth of bytes from the metadata file for
    /// `entry`, retrying on checksum mismatch (a torn concurrent write).
    fn read_entry_page(&mut self, entry: &IndexEntry) -> PbResult<Vec<u8>> {
        let offset = entry.md_file_page_offset as u64 * self.header.page_size as u64;
        let mut last_err = None;
        for attempt in 0..self.entry_retry_max {
            match self.read_range(offset, entry.length as usize) {
                Ok(bytes) => {
                    if crc32fast::hash(&bytes) == entry.checksum {
                        return Ok(bytes);
                    }
                    last_err = Some(PbError::Corrupt("entry page checksum mismatch".into()));
                }
                Err(err) => last_err = Some(err),
            }
            self.entry_backoff.sleep(attempt);
        }
        Err(last_err.unwrap_or_else(|| PbError::RetryExhausted("entry page read".into())))
    }

    /// Attempts to satisfy a read of `size` bytes at `addr` from the
    /// metadata file. Returns `Ok(None)` when `addr` is not currently
    /// published there, so the caller can fall back to the main HDF5 file.
    pub fn try_read(&mut self, addr: Addr, size: usize) -> PbResult<Option<Vec<u8>>> {
        let hdf5_page_offset = u32::try_from(addr)
            .map_err(|_| PbError::Invariant("hdf5 offset exceeds u32 range".into()))?;
        let Some(entry) = self.find_entry(hdf5_page_offset) else {
            return Ok(None);
        };
        if size > entry.length as usize {
            return Err(PbError::Invariant(
                "requested read is larger than the published page".into(),
            ));
        }
        let page = self.read_entry_page(&entry)?;
        Ok(Some(page[..size].to_vec()))
    }
}
