//! Block-level file driver: the page buffer's external I/O collaborator.
//!
//! This crate plays the role the page buffer specification calls the
//! "underlying file driver" — it speaks only in raw bytes at absolute
//! offsets, tracks end-of-allocation (EOA) independently per access class,
//! and knows nothing about pages, caching, or the VFD-SWMR metadata
//! protocol. Everything page-shaped lives one layer up in `buffer`.

#[cfg(test)]
mod tests;

use common::{Addr, PageKind, PbResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Operations the page buffer issues against the backing file.
///
/// Raw data and metadata are modeled as independent address spaces with
/// their own EOA markers (matching a split-file VFD), even when a single
/// implementation backs both with one physical file.
pub trait FileDriver {
    /// Read `size` bytes at `addr`. Reads that extend past EOF are
    /// zero-filled rather than failing, matching the "load" failure
    /// semantics the page buffer relies on for never-written pages.
    fn read(&mut self, kind: PageKind, addr: Addr, size: usize) -> PbResult<Vec<u8>>;

    /// Write `buf` at `addr`, extending the relevant EOA marker if needed.
    fn write(&mut self, kind: PageKind, addr: Addr, buf: &[u8]) -> PbResult<()>;

    /// Current end-of-allocation for the given access class.
    fn get_eoa(&self, kind: PageKind) -> Addr;

    /// Explicitly set the end-of-allocation marker (used by the allocator
    /// when it reserves space ahead of writing it).
    fn set_eoa(&mut self, kind: PageKind, addr: Addr) -> PbResult<()>;

    /// Physical end-of-file; may lag EOA when newly allocated pages have not
    /// yet been physically written.
    fn get_eof(&self) -> PbResult<Addr>;

    /// Acquire an advisory file lock (`rw = true` for exclusive).
    fn lock(&mut self, rw: bool) -> PbResult<()>;

    /// Release a previously acquired lock.
    fn unlock(&mut self) -> PbResult<()>;

    /// Truncate the file to its current EOA, e.g. on close.
    fn truncate(&mut self, closing: bool) -> PbResult<()>;
}

/// A `FileDriver` backed by a single POSIX-style file handle.
#[derive(Debug)]
pub struct PosixFileDriver {
    file: File,
    eoa_meta: Addr,
    eoa_raw: Addr,
    locked: bool,
}

impl PosixFileDriver {
    pub fn open(path: impl AsRef<Path>) -> PbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            eoa_meta: len,
            eoa_raw: len,
            locked: false,
        })
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl FileDriver for PosixFileDriver {
    fn read(&mut self, _kind: PageKind, addr: Addr, size: usize) -> PbResult<Vec<u8>> {
        let mut buf = vec![0u8; size];
        let eof = self.get_eof()?;
        if addr >= eof {
            return Ok(buf);
        }
        self.file.seek(SeekFrom::Start(addr))?;
        let readable = ((eof - addr) as usize).min(size);
        self.file.read_exact(&mut buf[..readable])?;
        Ok(buf)
    }

    fn write(&mut self, kind: PageKind, addr: Addr, buf: &[u8]) -> PbResult<()> {
        self.file.seek(SeekFrom::Start(addr))?;
        self.file.write_all(buf)?;
        self.file.flush()?;
        let end = addr + buf.len() as u64;
        match kind {
            PageKind::Metadata => self.eoa_meta = self.eoa_meta.max(end),
            PageKind::RawData => self.eoa_raw = self.eoa_raw.max(end),
        }
        Ok(())
    }

    fn get_eoa(&self, kind: PageKind) -> Addr {
        match kind {
            PageKind::Metadata => self.eoa_meta,
            PageKind::RawData => self.eoa_raw,
        }
    }

    fn set_eoa(&mut self, kind: PageKind, addr: Addr) -> PbResult<()> {
        match kind {
            PageKind::Metadata => self.eoa_meta = addr,
            PageKind::RawData => self.eoa_raw = addr,
        }
        Ok(())
    }

    fn get_eof(&self) -> PbResult<Addr> {
        Ok(self.file.metadata()?.len())
    }

    fn lock(&mut self, _rw: bool) -> PbResult<()> {
        self.locked = true;
        Ok(())
    }

    fn unlock(&mut self) -> PbResult<()> {
        self.locked = false;
        Ok(())
    }

    fn truncate(&mut self, _closing: bool) -> PbResult<()> {
        let eof = self.eoa_meta.max(self.eoa_raw);
        self.file.set_len(eof)?;
        Ok(())
    }
}
