//! The page buffer engine: read/write classification, eviction, and the
//! VFD-SWMR tick machinery, wired around the `Index`/`Lru`/`Dwl`/`TickList`
//! components.

use crate::dwl::Dwl;
use crate::entry::Entry;
use crate::index::Index;
use crate::lru::Lru;
use crate::swmr::{NoDelay, SwmrDelay};
use crate::ticklist::TickList;
use common::{Addr, PageBufferConfig, PageBufferStats, PageKind, PageNum, PbError, PbResult};
use storage::FileDriver;

/// A tick-list member as handed to the VFD-SWMR writer for publication.
/// Owns a copy of the entry's image so the writer crate never has to reach
/// back into engine internals.
#[derive(Clone, Debug)]
pub struct TickListEntry {
    pub page: PageNum,
    pub addr: Addr,
    pub kind: PageKind,
    pub size: usize,
    pub dirty: bool,
    pub delay_until: u64,
    pub image: Vec<u8>,
}

/// The page buffer: a page-granular write-back cache in front of a
/// [`FileDriver`], with split metadata/raw-data admission control and,
/// optionally, VFD-SWMR's delayed-write and tick-list machinery.
#[derive(Debug)]
pub struct PageBuffer<D: FileDriver> {
    config: PageBufferConfig,
    max_pages: usize,
    min_md_pages: usize,
    min_rd_pages: usize,
    driver: D,
    index: Index,
    lru: Lru,
    dwl: Dwl,
    tl: TickList,
    curr_md_pages: usize,
    curr_rd_pages: usize,
    mpmde_count: usize,
    current_tick: u64,
    last_meta_read_addr: Option<Addr>,
    swmr: Box<dyn SwmrDelay>,
    stats: PageBufferStats,
}

impl<D: FileDriver> PageBuffer<D> {
    pub fn create(driver: D, config: PageBufferConfig) -> PbResult<Self> {
        config.validate()?;
        let max_pages = config.max_pages()?;
        let min_md_pages = config.min_md_pages()?;
        let min_rd_pages = config.min_rd_pages()?;
        Ok(Self {
            config,
            max_pages,
            min_md_pages,
            min_rd_pages,
            driver,
            index: Index::default(),
            lru: Lru::new(),
            dwl: Dwl::default(),
            tl: TickList::default(),
            curr_md_pages: 0,
            curr_rd_pages: 0,
            mpmde_count: 0,
            current_tick: 0,
            last_meta_read_addr: None,
            swmr: Box::new(NoDelay),
            stats: PageBufferStats::default(),
        })
    }

    pub fn set_swmr_delay(&mut self, swmr: Box<dyn SwmrDelay>) {
        self.swmr = swmr;
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    pub fn is_swmr_writer(&self) -> bool {
        self.config.swmr_writer
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn curr_pages(&self) -> usize {
        self.curr_md_pages + self.curr_rd_pages + self.mpmde_count
    }

    pub fn stats(&self) -> &PageBufferStats {
        &self.stats
    }

    pub fn is_resident(&self, addr: Addr) -> bool {
        self.index.contains(self.page_of(addr))
    }

    pub fn entry_dirty(&self, page: PageNum) -> Option<bool> {
        self.index.get(page).map(|e| e.dirty)
    }

    fn page_of(&self, addr: Addr) -> PageNum {
        addr / self.config.page_size as u64
    }

    fn page_addr(&self, page: PageNum) -> Addr {
        page * self.config.page_size as u64
    }

    // ---- load / flush / evict primitives ----------------------------------

    fn load_single_page(&mut self, kind: PageKind, page: PageNum) -> PbResult<()> {
        if self.index.contains(page) {
            return Ok(());
        }
        self.make_space(kind)?;
        let addr = self.page_addr(page);
        let bytes = self.driver.read(kind, addr, self.config.page_size)?;
        let eof = self.driver.get_eof()?;
        let loaded = addr < eof;
        let entry = Entry {
            addr,
            kind,
            image: bytes,
            dirty: false,
            loaded,
            modified_this_tick: false,
            delay_until: 0,
        };
        self.index.insert(page, entry);
        self.lru.touch(page);
        match kind {
            PageKind::Metadata => self.curr_md_pages += 1,
            PageKind::RawData => self.curr_rd_pages += 1,
        }
        self.stats.pages_loaded += 1;
        Ok(())
    }

    /// Walk the replacement policy tail-to-head, flushing-and-keeping or
    /// evicting candidates until `curr_pages < max_pages`. Entries that are
    /// tick-list members, or that would push a class below its minimum
    /// reservation, are skipped without being reordered.
    fn make_space(&mut self, inserted_kind: PageKind) -> PbResult<()> {
        match inserted_kind {
            PageKind::Metadata if self.min_rd_pages == self.max_pages => {
                return Err(PbError::Capacity(
                    "raw-data minimum reservation consumes the entire buffer".into(),
                ));
            }
            PageKind::RawData if self.min_md_pages == self.max_pages => {
                return Err(PbError::Capacity(
                    "metadata minimum reservation consumes the entire buffer".into(),
                ));
            }
            _ => {}
        }

        let order = self.lru.tail_to_head();
        for page in order {
            if self.curr_pages() < self.max_pages {
                break;
            }
            let Some(entry) = self.index.get(page) else {
                continue;
            };
            if entry.modified_this_tick {
                continue;
            }
            match entry.kind {
                PageKind::RawData
                    if inserted_kind == PageKind::Metadata
                        && self.curr_rd_pages <= self.min_rd_pages =>
                {
                    continue;
                }
                PageKind::Metadata
                    if inserted_kind == PageKind::RawData
                        && self.curr_md_pages <= self.min_md_pages =>
                {
                    continue;
                }
                _ => {}
            }
            if entry.dirty {
                self.flush_entry(page)?;
            } else {
                self.evict_entry(page, false)?;
            }
        }
        Ok(())
    }

    /// Writes a dirty entry's full image and marks it clean. Updates the
    /// LRU, as every caller — `make_space`'s eviction walk and the public
    /// [`PageBuffer::flush`]/[`PageBuffer::destroy`] alike — relies on a
    /// flushed page becoming the most-recently-used one. MPMDEs are never
    /// LRU-tracked, so they are left out of this touch.
    fn flush_entry(&mut self, page: PageNum) -> PbResult<()> {
        let Some(entry) = self.index.get(page) else {
            return Ok(());
        };
        if !entry.dirty {
            return Ok(());
        }
        let kind = entry.kind;
        let addr = entry.addr;
        let image = entry.image.clone();
        let is_mpmde = entry.is_mpmde(self.config.page_size);
        let end = addr + image.len() as u64;
        if end > self.driver.get_eoa(kind) {
            self.driver.set_eoa(kind, end)?;
        }
        self.driver.write(kind, addr, &image)?;
        let entry = self.index.get_mut(page).expect("entry present");
        entry.dirty = false;
        if !is_mpmde {
            self.lru.touch(page);
        }
        self.stats.pages_flushed += 1;
        Ok(())
    }

    /// Remove an entry from every list and the index.
    ///
    /// `force = false` enforces the normal eviction precondition (clean,
    /// not a tick-list member, not delayed); `force = true` discards the
    /// entry regardless, used for raw-data overwrite and explicit removal.
    fn evict_entry(&mut self, page: PageNum, force: bool) -> PbResult<()> {
        let Some(entry) = self.index.get(page) else {
            return Ok(());
        };
        if !force && (entry.dirty || entry.modified_this_tick || entry.delay_until != 0) {
            return Err(PbError::Invariant(format!(
                "cannot evict page {page}: dirty={} modified_this_tick={} delay_until={}",
                entry.dirty, entry.modified_this_tick, entry.delay_until
            )));
        }
        let kind = entry.kind;
        let is_mpmde = entry.is_mpmde(self.config.page_size);

        self.lru.remove(page);
        self.dwl.remove(page);
        self.tl.remove(page);
        self.index.remove(page);

        if is_mpmde {
            self.mpmde_count = self.mpmde_count.saturating_sub(1);
        } else {
            match kind {
                PageKind::Metadata => self.curr_md_pages = self.curr_md_pages.saturating_sub(1),
                PageKind::RawData => self.curr_rd_pages = self.curr_rd_pages.saturating_sub(1),
            }
        }
        self.stats.pages_evicted += 1;
        Ok(())
    }

    /// For the writer and only when the entry was loaded from file and is
    /// metadata, consult the SWMR collaborator for a write delay before
    /// marking the entry dirty; MPMDEs and non-delayed writes just mark
    /// dirty and touch the LRU.
    fn mark_entry_dirty(&mut self, page: PageNum) -> PbResult<()> {
        let page_size = self.config.page_size;
        let (kind, loaded, is_mpmde) = {
            let entry = self.index.get(page).ok_or_else(|| {
                PbError::Invariant(format!("mark_entry_dirty: no entry at page {page}"))
            })?;
            (entry.kind, entry.loaded, entry.is_mpmde(page_size))
        };

        if self.config.swmr_writer && kind == PageKind::Metadata && loaded {
            let delay = self.swmr.request_write_delay(page);
            if delay > 0 {
                if !is_mpmde {
                    self.lru.remove(page);
                }
                let delay_until = self.current_tick + delay;
                let entry = self.index.get_mut(page).unwrap();
                entry.dirty = true;
                entry.delay_until = delay_until;
                self.dwl.insert(page, delay_until);
                self.stats.dwl_insertions += 1;
                return Ok(());
            }
        }

        let entry = self.index.get_mut(page).unwrap();
        entry.dirty = true;
        if !is_mpmde {
            self.lru.touch(page);
        }
        Ok(())
    }

    // ---- public read/write API ---------------------------------------

    pub fn read(&mut self, kind: PageKind, addr: Addr, size: usize, buf: &mut [u8]) -> PbResult<()> {
        if buf.len() < size {
            return Err(PbError::Invariant("read buffer shorter than size".into()));
        }
        match kind {
            PageKind::RawData => self.read_raw(addr, size, buf),
            PageKind::Metadata => self.read_meta(addr, size, buf),
        }
    }

    pub fn write(&mut self, kind: PageKind, addr: Addr, size: usize, buf: &[u8]) -> PbResult<()> {
        if buf.len() < size {
            return Err(PbError::Invariant("write buffer shorter than size".into()));
        }
        match kind {
            PageKind::RawData => self.write_raw(addr, size, buf),
            PageKind::Metadata => self.write_meta(addr, size, buf),
        }
    }

    fn read_raw(&mut self, addr: Addr, size: usize, buf: &mut [u8]) -> PbResult<()> {
        let page_size = self.config.page_size as u64;
        if size as u64 >= page_size {
            let bytes = self.driver.read(PageKind::RawData, addr, size)?;
            buf[..size].copy_from_slice(&bytes);
            let first_page = addr / page_size;
            let last_page = (addr + size as u64 - 1) / page_size;
            for page in first_page..=last_page {
                if let Some(entry) = self.index.get(page) {
                    if entry.dirty && entry.kind == PageKind::RawData {
                        entry.copy_overlap_into(addr, &mut buf[..size]);
                    }
                }
            }
            Ok(())
        } else {
            let first_page = addr / page_size;
            let last_page = (addr + size as u64 - 1) / page_size;
            self.load_single_page(PageKind::RawData, first_page)?;
            if last_page != first_page {
                self.load_single_page(PageKind::RawData, last_page)?;
            }
            self.lru.touch(first_page);
            if last_page != first_page {
                self.lru.touch(last_page);
            }
            for page in first_page..=last_page {
                let entry = self.index.get(page).ok_or_else(|| {
                    PbError::Invariant(format!("expected resident page {page}"))
                })?;
                entry.copy_overlap_into(addr, &mut buf[..size]);
            }
            Ok(())
        }
    }

    fn write_raw(&mut self, addr: Addr, size: usize, buf: &[u8]) -> PbResult<()> {
        let page_size = self.config.page_size as u64;
        if size as u64 >= page_size {
            self.driver.write(PageKind::RawData, addr, &buf[..size])?;
            let first_page = addr / page_size;
            let last_page = (addr + size as u64 - 1) / page_size;
            for page in first_page..=last_page {
                let Some(entry) = self.index.get(page) else {
                    continue;
                };
                if entry.kind != PageKind::RawData {
                    continue;
                }
                let e_start = entry.addr;
                let e_end = entry.addr + entry.image.len() as u64;
                let fully_covered = addr <= e_start && e_end <= addr + size as u64;
                if fully_covered {
                    let entry = self.index.get_mut(page).unwrap();
                    entry.dirty = false;
                    self.evict_entry(page, true)?;
                } else {
                    let entry = self.index.get_mut(page).unwrap();
                    entry.patch_overlap_from(addr, &buf[..size]);
                    self.mark_entry_dirty(page)?;
                }
            }
            Ok(())
        } else {
            let first_page = addr / page_size;
            let last_page = (addr + size as u64 - 1) / page_size;
            self.load_single_page(PageKind::RawData, first_page)?;
            if last_page != first_page {
                self.load_single_page(PageKind::RawData, last_page)?;
            }
            for page in first_page..=last_page {
                let entry = self.index.get_mut(page).unwrap();
                entry.patch_overlap_from(addr, &buf[..size]);
                self.mark_entry_dirty(page)?;
            }
            Ok(())
        }
    }

    fn read_meta(&mut self, addr: Addr, size: usize, buf: &mut [u8]) -> PbResult<()> {
        let page_size = self.config.page_size as u64;
        let page = addr / page_size;
        let aligned = addr % page_size == 0;

        if !aligned {
            let offset_in_page = addr % page_size;
            let avail = (page_size - offset_in_page) as usize;
            let to_copy = size.min(avail);
            if let Some(entry) = self.index.get(page) {
                if entry.is_mpmde(self.config.page_size) {
                    return Err(PbError::Corrupt(format!(
                        "unaligned metadata read at {addr} targets an MPMDE"
                    )));
                }
            } else {
                self.load_single_page(PageKind::Metadata, page)?;
            }
            self.lru.touch(page);
            let entry = self.index.get(page).expect("just loaded");
            entry.copy_overlap_into(addr, &mut buf[..to_copy]);
            self.last_meta_read_addr = Some(addr);
            return Ok(());
        }

        if size as u64 >= page_size {
            match self.index.get(page) {
                None => {
                    let bytes = self.driver.read(PageKind::Metadata, addr, size)?;
                    buf[..size].copy_from_slice(&bytes);
                }
                Some(entry) if entry.is_mpmde(self.config.page_size) => {
                    if !self.config.swmr_writer {
                        return Err(PbError::Corrupt(
                            "MPMDE encountered outside SWMR-writer context".into(),
                        ));
                    }
                    let to_copy = size.min(entry.image.len());
                    buf[..to_copy].copy_from_slice(&entry.image[..to_copy]);
                }
                Some(_) => {
                    if self.last_meta_read_addr == Some(addr) {
                        self.evict_entry(page, false)?;
                        let bytes = self.driver.read(PageKind::Metadata, addr, size)?;
                        buf[..size].copy_from_slice(&bytes);
                    } else {
                        let entry = self.index.get(page).unwrap();
                        let to_copy = size.min(entry.image.len());
                        buf[..to_copy].copy_from_slice(&entry.image[..to_copy]);
                        self.lru.touch(page);
                    }
                }
            }
        } else {
            if self.index.get(page).is_none() {
                self.load_single_page(PageKind::Metadata, page)?;
            }
            let entry = self.index.get(page).expect("present");
            if entry.is_mpmde(self.config.page_size) && !self.config.swmr_writer {
                return Err(PbError::Corrupt(
                    "MPMDE encountered outside SWMR-writer context".into(),
                ));
            }
            buf[..size].copy_from_slice(&entry.image[..size]);
            if !entry.is_mpmde(self.config.page_size) {
                self.lru.touch(page);
            }
        }

        self.last_meta_read_addr = Some(addr);
        Ok(())
    }

    fn write_meta(&mut self, addr: Addr, size: usize, buf: &[u8]) -> PbResult<()> {
        let page_size = self.config.page_size as u64;

        if (size as u64) <= page_size {
            let offset_in_page = addr % page_size;
            if offset_in_page + size as u64 > page_size {
                return Err(PbError::Invariant(
                    "small metadata write crosses a page boundary".into(),
                ));
            }
            let page = addr / page_size;
            if self.index.get(page).is_none() {
                self.load_single_page(PageKind::Metadata, page)?;
            }
            {
                let entry = self.index.get(page).unwrap();
                if entry.is_mpmde(self.config.page_size) {
                    return Err(PbError::Corrupt(format!(
                        "small metadata write targets an MPMDE at page {page}"
                    )));
                }
            }
            let entry = self.index.get_mut(page).unwrap();
            entry.patch_overlap_from(addr, &buf[..size]);
            self.mark_entry_dirty(page)?;
            if self.config.swmr_writer {
                self.tl.insert(page);
                let entry = self.index.get_mut(page).unwrap();
                entry.modified_this_tick = true;
            }
            Ok(())
        } else {
            if addr % page_size != 0 {
                return Err(PbError::Invariant(
                    "metadata writes larger than one page must be page-aligned".into(),
                ));
            }
            if !self.config.swmr_writer {
                self.driver.write(PageKind::Metadata, addr, &buf[..size])?;
                return Ok(());
            }
            if size as u64 % page_size != 0 {
                return Err(PbError::Configuration(
                    "MPMDE size must be a multiple of page_size".into(),
                ));
            }
            let page = addr / page_size;
            match self.index.get(page) {
                Some(entry) if !entry.is_mpmde(self.config.page_size) => {
                    return Err(PbError::Corrupt(format!(
                        "page {page} already holds a regular page entry, cannot become an MPMDE"
                    )));
                }
                Some(entry) if entry.image.len() != size => {
                    return Err(PbError::Invariant("MPMDE resize is not supported".into()));
                }
                _ => {}
            }
            if self.index.get(page).is_none() {
                self.make_space(PageKind::Metadata)?;
                let entry = Entry {
                    addr,
                    kind: PageKind::Metadata,
                    image: vec![0u8; size],
                    dirty: false,
                    loaded: false,
                    modified_this_tick: false,
                    delay_until: 0,
                };
                self.index.insert(page, entry);
                self.mpmde_count += 1;
            }
            {
                let entry = self.index.get_mut(page).unwrap();
                entry.image.copy_from_slice(&buf[..size]);
            }
            self.mark_entry_dirty(page)?;
            self.tl.insert(page);
            let entry = self.index.get_mut(page).unwrap();
            entry.modified_this_tick = true;
            Ok(())
        }
    }

    // ---- allocator-facing API -------------------------------------------

    /// Insert a zeroed page at `page_addr` without consulting `make_space`;
    /// `curr_pages` may exceed `max_pages` until the next eviction pass.
    pub fn add_new_page(&mut self, kind: PageKind, page_addr: Addr) -> PbResult<()> {
        let page_size = self.config.page_size as u64;
        if page_addr % page_size != 0 {
            return Err(PbError::Invariant(
                "add_new_page address must be page-aligned".into(),
            ));
        }
        let page = page_addr / page_size;
        if self.index.get(page).is_some() {
            return Err(PbError::Invariant(format!(
                "entry already exists at page {page}"
            )));
        }
        let entry = Entry {
            addr: page_addr,
            kind,
            image: vec![0u8; self.config.page_size],
            dirty: false,
            loaded: false,
            modified_this_tick: false,
            delay_until: 0,
        };
        self.index.insert(page, entry);
        self.lru.touch(page);
        match kind {
            PageKind::Metadata => self.curr_md_pages += 1,
            PageKind::RawData => self.curr_rd_pages += 1,
        }
        Ok(())
    }

    /// Forcibly discard the entry at `addr`, e.g. on allocator deallocation.
    pub fn remove_entry(&mut self, addr: Addr) -> PbResult<()> {
        let page = self.page_of(addr);
        let Some(entry) = self.index.get(page) else {
            return Ok(());
        };
        if entry.is_mpmde(self.config.page_size) && !self.config.swmr_writer {
            return Err(PbError::Corrupt(
                "cannot remove an MPMDE outside SWMR-writer context".into(),
            ));
        }
        self.evict_entry(page, true)
    }

    /// Patch a resident entry's image in place without marking it dirty
    /// (parallel I/O: the caller already wrote the bytes through).
    pub fn update_entry(&mut self, addr: Addr, buf: &[u8]) -> PbResult<()> {
        let page = self.page_of(addr);
        if let Some(entry) = self.index.get_mut(page) {
            entry.patch_overlap_from(addr, buf);
        }
        Ok(())
    }

    // ---- lifecycle --------------------------------------------------------

    pub fn flush(&mut self) -> PbResult<PageBufferStats> {
        let pages: Vec<PageNum> = self.index.pages().collect();
        for page in pages {
            self.flush_entry(page)?;
        }
        Ok(self.stats.clone())
    }

    /// Flush every dirty entry (including delayed writes, which outstanding
    /// readers can no longer observe once the file handle is closing) and
    /// evict everything, leaving the buffer empty.
    pub fn destroy(mut self) -> PbResult<()> {
        let pages: Vec<PageNum> = self.index.pages().collect();
        for page in &pages {
            self.flush_entry(*page)?;
        }
        let pages: Vec<PageNum> = self.index.pages().collect();
        for page in pages {
            self.evict_entry(page, true)?;
        }
        if !self.lru.is_empty() || !self.dwl.is_empty() || !self.tl.is_empty() || !self.index.is_empty()
        {
            return Err(PbError::Invariant("destroy left residual state".into()));
        }
        Ok(())
    }

    // ---- tick machinery -----------------------------------------------

    /// Advance to `next_tick`, which must be exactly one past the current
    /// tick.
    pub fn advance_tick(&mut self, next_tick: u64) -> PbResult<()> {
        if next_tick != self.current_tick + 1 {
            return Err(PbError::Invariant(format!(
                "tick must advance by exactly 1 (have {}, requested {})",
                self.current_tick, next_tick
            )));
        }
        self.current_tick = next_tick;
        Ok(())
    }

    /// A snapshot of every tick-list member, for the writer to merge into
    /// the persistent index before the tick list is drained.
    pub fn tick_list_snapshot(&self) -> Vec<TickListEntry> {
        self.tl
            .iter()
            .filter_map(|page| {
                self.index.get(page).map(|e| TickListEntry {
                    page,
                    addr: e.addr,
                    kind: e.kind,
                    size: e.image.len(),
                    dirty: e.dirty,
                    delay_until: e.delay_until,
                    image: e.image.clone(),
                })
            })
            .collect()
    }

    /// Drain the tick list after publication: MPMDEs not subject to delay
    /// are flushed-and-evicted, regular pages move back onto the LRU, and
    /// delayed entries are left exactly where `mark_entry_dirty` put them.
    pub fn drain_tick_list(&mut self) -> PbResult<Vec<PageNum>> {
        let pages = self.tl.drain();
        for &page in &pages {
            self.stats.tl_drained += 1;
            let Some((is_mpmde, delayed)) = self.index.get(page).map(|e| {
                (
                    e.is_mpmde(self.config.page_size),
                    e.delay_until != 0,
                )
            }) else {
                continue;
            };
            if let Some(entry) = self.index.get_mut(page) {
                entry.modified_this_tick = false;
                // Once a tick publishes this entry it is reader-visible, so
                // from here on a dirty write needs the same delay
                // protection as one that started out loaded from file.
                entry.loaded = true;
            }
            if is_mpmde {
                if !delayed {
                    self.flush_entry(page)?;
                    self.evict_entry(page, false)?;
                }
            } else if !delayed {
                self.lru.touch(page);
            }
        }
        Ok(pages)
    }

    /// Release every delayed write whose deadline has passed: MPMDEs are
    /// flushed-and-evicted, regular pages rejoin the LRU clean-to-dirty as
    /// they were before the delay.
    pub fn release_delayed_writes(&mut self) -> PbResult<Vec<PageNum>> {
        let mut released = Vec::new();
        loop {
            let Some((page, delay_until)) = self.dwl.peek_tail() else {
                break;
            };
            if delay_until >= self.current_tick {
                break;
            }
            self.dwl.pop_tail();
            let Some(is_mpmde) = self
                .index
                .get(page)
                .map(|e| e.is_mpmde(self.config.page_size))
            else {
                continue;
            };
            if let Some(entry) = self.index.get_mut(page) {
                entry.delay_until = 0;
            }
            if is_mpmde {
                self.flush_entry(page)?;
                self.evict_entry(page, false)?;
            } else {
                self.lru.touch(page);
            }
            self.stats.dwl_releases += 1;
            released.push(page);
        }
        Ok(released)
    }
}
