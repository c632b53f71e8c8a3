//! Replacement-policy ordering, kept separate from the entries it orders.
//!
//! Only page numbers live here; entry state (dirty, kind, size, ...) stays
//! in the [`crate::index::Index`]. `make_space` takes a snapshot of the
//! tail-to-head order up front and walks it, so touching entries while
//! scanning never invalidates the walk.

use common::PageNum;
use lru::LruCache;
use std::num::NonZeroUsize;

#[derive(Debug)]
pub struct Lru {
    order: LruCache<PageNum, ()>,
}

impl Default for Lru {
    fn default() -> Self {
        Self::new()
    }
}

impl Lru {
    /// `lru::LruCache`'s own capacity is unrelated to `max_pages`: eviction
    /// decisions belong to `make_space`, not to the cache's internal
    /// capacity-triggered `put`. So it is sized effectively unbounded and
    /// only ever shrunk by our own explicit `remove` calls.
    pub fn new() -> Self {
        Self {
            order: LruCache::new(NonZeroUsize::new(usize::MAX).unwrap()),
        }
    }

    /// Move `page` to the most-recently-used position, inserting it if it
    /// wasn't already tracked.
    pub fn touch(&mut self, page: PageNum) {
        self.order.put(page, ());
    }

    pub fn remove(&mut self, page: PageNum) {
        self.order.pop(&page);
    }

    pub fn contains(&self, page: PageNum) -> bool {
        self.order.contains(&page)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// A consistent snapshot of tracked pages ordered from least- to
    /// most-recently used, i.e. the order `make_space` walks.
    pub fn tail_to_head(&self) -> Vec<PageNum> {
        self.order.iter().rev().map(|(&page, _)| page).collect()
    }
}
