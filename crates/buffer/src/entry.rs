//! A single cached page (or multi-page metadata entry).

use common::{Addr, PageKind};

/// One resident page-buffer entry.
///
/// A "multi-page metadata entry" (MPMDE) is represented the same way as a
/// regular page, just with an `image` longer than one page; [`Entry::is_mpmde`]
/// is the only place that distinction is tested.
#[derive(Clone, Debug)]
pub struct Entry {
    /// Byte offset this entry's image starts at. Always page-aligned.
    pub addr: Addr,
    /// Which admission class this entry belongs to.
    pub kind: PageKind,
    /// Cached bytes. `page_size` long for a regular page, a multiple of it
    /// for an MPMDE.
    pub image: Vec<u8>,
    /// Unwritten changes are pending relative to the underlying file.
    pub dirty: bool,
    /// True if `image` came from a real read (vs. a zero-filled allocation
    /// from `add_new_page` or a freshly created MPMDE).
    pub loaded: bool,
    /// Set while this entry is a tick-list member; cleared when the tick
    /// list is drained.
    pub modified_this_tick: bool,
    /// Nonzero while on the delayed-write list: the tick number after which
    /// the dirty write may be released to the delayed-write list's consumer.
    pub delay_until: u64,
}

impl Entry {
    /// True if this entry spans more than one page, i.e. is an MPMDE.
    pub fn is_mpmde(&self, page_size: usize) -> bool {
        self.image.len() > page_size
    }

    /// Copy the overlap between `[addr, addr + buf.len())` and this entry's
    /// image into `buf`. Bytes outside the overlap are left untouched.
    pub fn copy_overlap_into(&self, addr: Addr, buf: &mut [u8]) {
        let req_start = addr;
        let req_end = addr + buf.len() as u64;
        let e_start = self.addr;
        let e_end = self.addr + self.image.len() as u64;
        let start = req_start.max(e_start);
        let end = req_end.min(e_end);
        if start >= end {
            return;
        }
        let buf_off = (start - req_start) as usize;
        let img_off = (start - e_start) as usize;
        let len = (end - start) as usize;
        buf[buf_off..buf_off + len].copy_from_slice(&self.image[img_off..img_off + len]);
    }

    /// Inverse of [`Entry::copy_overlap_into`]: patch this entry's image
    /// from the overlap with `[addr, addr + src.len())`.
    pub fn patch_overlap_from(&mut self, addr: Addr, src: &[u8]) {
        let req_start = addr;
        let req_end = addr + src.len() as u64;
        let e_start = self.addr;
        let e_end = self.addr + self.image.len() as u64;
        let start = req_start.max(e_start);
        let end = req_end.min(e_end);
        if start >= end {
            return;
        }
        let src_off = (start - req_start) as usize;
        let img_off = (start - e_start) as usize;
        let len = (end - start) as usize;
        self.image[img_off..img_off + len].copy_from_slice(&src[src_off..src_off + len]);
    }
}
