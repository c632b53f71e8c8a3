//! The VFD-SWMR shared metadata file: the channel a single writer and any
//! number of readers use to exchange metadata pages that have not yet
//! landed in the stable HDF5 file.
//!
//! - [`format`] — the on-disk header/index wire layout
//! - [`reader`] — [`reader::MetadataFileReader`], the retrying reader side
//! - [`writer`] — [`writer::MetadataFileWriter`] and the per-tick `publish` merge
//!
//! The page buffer in the `buffer` crate is this module's collaborator: its
//! tick list is the input to [`writer::publish`], and its
//! [`buffer::SwmrDelay`] hook is what a writer uses to make a page wait in
//! the delayed-write list until this module has published it.

mod format;
mod reader;
mod writer;

#[cfg(test)]
mod tests;

pub use format::{IndexEntry, MetadataHeader, MetadataIndex, HEADER_SIZE};
pub use reader::MetadataFileReader;
pub use writer::{publish, still_protected_by, MetadataFileWriter, PersistentIndex, PublishDelay};
