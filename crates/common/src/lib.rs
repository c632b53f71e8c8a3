//! Shared types for the page buffer / VFD-SWMR workspace.
//!
//! Mirrors of other subsystems pull their page/address newtypes, error type,
//! and configuration record from here, the same way `common` anchors the
//! broader workspace this crate is descended from.

pub mod backoff;

pub use backoff::BackoffPolicy;

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Absolute byte offset into a file. Always a multiple of `page_size` when
/// naming a page-aligned address.
pub type Addr = u64;

/// `addr / page_size`: the page-aligned index of an address.
pub type PageNum = u64;

/// Which admission class an access belongs to. Raw data and metadata are
/// tracked under independent minimum-reservation quotas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageKind {
    RawData,
    Metadata,
}

/// Canonical error type shared across the page buffer and VFD-SWMR crates.
///
/// One variant per error kind this system reports: configuration, I/O
/// passthrough, corruption (checksum/magic/tick skew), internal invariant
/// violation, retry exhaustion, and capacity refusal.
#[derive(Error, Debug)]
pub enum PbError {
    #[error("configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("corrupt: {0}")]
    Corrupt(String),
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("retry exhausted: {0}")]
    RetryExhausted(String),
    #[error("capacity: {0}")]
    Capacity(String),
}

/// Result alias that carries a `PbError`.
pub type PbResult<T> = Result<T, PbError>;

/// Runtime configuration for the page buffer and the VFD-SWMR metadata file
/// protocol.
///
/// # Example
/// ```
/// use common::PageBufferConfig;
///
/// let config = PageBufferConfig::builder()
///     .page_size(4096)
///     .max_size(4096 * 64)
///     .min_meta_pct(25)
///     .min_raw_pct(25)
///     .swmr_writer(true)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct PageBufferConfig {
    /// Fixed-size page allocation in bytes, derived from the file's
    /// page-allocation strategy.
    #[builder(default = 4096)]
    pub page_size: usize,
    /// Total page buffer capacity in bytes; must be a nonzero multiple of
    /// `page_size` (rounded down if it isn't).
    #[builder(default = 4096 * 256)]
    pub max_size: usize,
    /// Percentage (0..=100) of pages reserved for metadata; sum with
    /// `min_raw_pct` must not exceed 100.
    #[builder(default = 10)]
    pub min_meta_pct: u8,
    /// Percentage (0..=100) of pages reserved for raw data.
    #[builder(default = 10)]
    pub min_raw_pct: u8,
    /// Whether this file handle is the single VFD-SWMR writer.
    #[builder(default = false)]
    pub swmr_writer: bool,
    /// How many pages at the start of the metadata file are reserved for
    /// header + index.
    #[builder(default = 1)]
    pub md_pages_reserved: u64,
    /// Maximum header-read retries before `RetryExhausted`.
    #[builder(default = 8)]
    pub header_retry_max: u32,
    /// Maximum index-read retries before `RetryExhausted`.
    #[builder(default = 8)]
    pub index_retry_max: u32,
    /// Maximum file-stat retries while waiting for a file to grow to an
    /// expected size.
    #[builder(default = 100)]
    pub stat_retry_max: u32,
    /// Maximum per-entry page-read retries before `RetryExhausted`.
    #[builder(default = 8)]
    pub entry_retry_max: u32,
}

impl Default for PageBufferConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            max_size: 4096 * 256,
            min_meta_pct: 10,
            min_raw_pct: 10,
            swmr_writer: false,
            md_pages_reserved: 1,
            header_retry_max: 8,
            index_retry_max: 8,
            stat_retry_max: 100,
            entry_retry_max: 8,
        }
    }
}

impl PageBufferConfig {
    /// Validated page capacity, in whole pages.
    ///
    /// `max_size` must be a nonzero multiple of `page_size`; if it is larger
    /// than the nearest multiple it is rounded down, per the engine's
    /// `create` contract.
    pub fn max_pages(&self) -> PbResult<usize> {
        if self.page_size == 0 {
            return Err(PbError::Configuration("page_size must be nonzero".into()));
        }
        if self.max_size == 0 {
            return Err(PbError::Configuration("max_size must be nonzero".into()));
        }
        let pages = self.max_size / self.page_size;
        if pages == 0 {
            return Err(PbError::Configuration(
                "max_size smaller than one page".into(),
            ));
        }
        Ok(pages)
    }

    /// Minimum number of metadata pages the replacement policy must never
    /// evict below.
    pub fn min_md_pages(&self) -> PbResult<usize> {
        self.min_class_pages(self.min_meta_pct)
    }

    /// Minimum number of raw-data pages the replacement policy must never
    /// evict below.
    pub fn min_rd_pages(&self) -> PbResult<usize> {
        self.min_class_pages(self.min_raw_pct)
    }

    fn min_class_pages(&self, pct: u8) -> PbResult<usize> {
        if pct as u32 > 100 {
            return Err(PbError::Configuration(
                "minimum percentage must be 0..=100".into(),
            ));
        }
        let max_pages = self.max_pages()?;
        Ok(max_pages * pct as usize / 100)
    }

    /// Validates invariant 7 (`min_md_pages + min_rd_pages <= max_pages`) and
    /// the percentage/retry-bound sanity checks.
    pub fn validate(&self) -> PbResult<()> {
        if self.min_meta_pct as u32 + self.min_raw_pct as u32 > 100 {
            return Err(PbError::Configuration(
                "min_meta_pct + min_raw_pct must not exceed 100".into(),
            ));
        }
        let max_pages = self.max_pages()?;
        let min_md = self.min_md_pages()?;
        let min_rd = self.min_rd_pages()?;
        if min_md + min_rd > max_pages {
            return Err(PbError::Configuration(
                "min_md_pages + min_rd_pages exceeds max_pages".into(),
            ));
        }
        if self.header_retry_max == 0 || self.index_retry_max == 0 || self.entry_retry_max == 0 {
            return Err(PbError::Configuration(
                "retry bounds must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time counters for page buffer activity, returned by `flush` and
/// `make_space` so callers can observe engine behavior without a logging
/// dependency.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageBufferStats {
    pub pages_loaded: u64,
    pub pages_flushed: u64,
    pub pages_evicted: u64,
    pub dwl_insertions: u64,
    pub dwl_releases: u64,
    pub tl_drained: u64,
}

/// Counts returned by the writer's per-tick publish merge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub added: u64,
    pub modified: u64,
    pub not_in_tl: u64,
    pub not_in_tl_flushed: u64,
}
