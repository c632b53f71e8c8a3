//! The page buffer's VFD-SWMR collaborator seam.
//!
//! The engine never talks to the metadata-file writer directly; it asks
//! this trait whether a dirty metadata write needs to be held back, and
//! otherwise stays ignorant of ticks, the shared metadata file, or readers.

use common::PageNum;

/// Consulted by `mark_entry_dirty` for the writer, and only for metadata
/// entries that were loaded from file (never for brand-new pages or
/// freshly created MPMDEs).
pub trait SwmrDelay: std::fmt::Debug {
    /// Returns the number of ticks this write must be held back, or `0` to
    /// write through immediately.
    fn request_write_delay(&mut self, page: PageNum) -> u64;
}

/// The collaborator used outside SWMR-writer mode: never delays.
#[derive(Debug, Default)]
pub struct NoDelay;

impl SwmrDelay for NoDelay {
    fn request_write_delay(&mut self, _page: PageNum) -> u64 {
        0
    }
}
