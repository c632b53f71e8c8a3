//! The page buffer: a page-granular write-back cache sitting between the
//! VFD-SWMR metadata protocol and the block-level [`storage::FileDriver`].
//!
//! - [`index`] — the page-number-to-entry lookup table
//! - [`lru`] — replacement-policy ordering, honoring per-class minimums
//! - [`dwl`] — the delayed-write list VFD-SWMR holds dirty metadata on
//! - [`ticklist`] — the current tick's modified-entry set
//! - [`engine`] — [`PageBuffer`] itself, tying the above together
//!
//! # Example
//!
//! ```no_run
//! use buffer::PageBuffer;
//! use common::{PageBufferConfig, PageKind};
//! use storage::PosixFileDriver;
//!
//! let driver = PosixFileDriver::open("/tmp/example.h5").unwrap();
//! let config = PageBufferConfig::builder().page_size(4096).build();
//! let mut pb = PageBuffer::create(driver, config).unwrap();
//!
//! let mut buf = [0u8; 4096];
//! pb.read(PageKind::Metadata, 0, 4096, &mut buf).unwrap();
//! ```

mod dwl;
mod entry;
mod index;
mod lru;
mod swmr;
mod ticklist;

mod engine;


pub use engine::{PageBuffer, TickListEntry};
pub use entry::Entry;
pub use swmr::{NoDelay, SwmrDelay};
