//! Page-number-keyed index over resident entries.
//!
//! Collapses the entry arena and the lookup table into one `HashMap`: a
//! page number is already a stable, unique identity, so there is no need
//! for a separate slot handle the way a general-purpose arena would need.

use crate::entry::Entry;
use common::PageNum;
use hashbrown::HashMap;

#[derive(Debug, Default)]
pub struct Index {
    table: HashMap<PageNum, Entry>,
}

impl Index {
    pub fn contains(&self, page: PageNum) -> bool {
        self.table.contains_key(&page)
    }

    pub fn get(&self, page: PageNum) -> Option<&Entry> {
        self.table.get(&page)
    }

    pub fn get_mut(&mut self, page: PageNum) -> Option<&mut Entry> {
        self.table.get_mut(&page)
    }

    pub fn insert(&mut self, page: PageNum, entry: Entry) {
        self.table.insert(page, entry);
    }

    pub fn remove(&mut self, page: PageNum) -> Option<Entry> {
        self.table.remove(&page)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PageNum, &Entry)> {
        self.table.iter()
    }

    pub fn pages(&self) -> impl Iterator<Item = PageNum> + '_ {
        self.table.keys().copied()
    }
}
