//! Delayed-write list: dirty pages held back from the underlying file until
//! enough ticks have passed for SWMR readers to stop needing the old image.
//!
//! Kept sorted by decreasing deadline, so the tail (`Vec::last`) always
//! holds the entry soonest eligible for release.

use common::PageNum;

#[derive(Debug, Default)]
pub struct Dwl {
    /// `(page, delay_until)`, sorted descending by `delay_until`.
    order: Vec<(PageNum, u64)>,
}

impl Dwl {
    pub fn insert(&mut self, page: PageNum, delay_until: u64) {
        let pos = self.order.partition_point(|&(_, d)| d > delay_until);
        self.order.insert(pos, (page, delay_until));
    }

    pub fn remove(&mut self, page: PageNum) -> bool {
        if let Some(pos) = self.order.iter().position(|&(p, _)| p == page) {
            self.order.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, page: PageNum) -> bool {
        self.order.iter().any(|&(p, _)| p == page)
    }

    pub fn peek_tail(&self) -> Option<(PageNum, u64)> {
        self.order.last().copied()
    }

    pub fn pop_tail(&mut self) -> Option<(PageNum, u64)> {
        self.order.pop()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Invariant 4: the list is sorted by strictly non-increasing deadline.
    pub fn is_sorted_descending(&self) -> bool {
        self.order.windows(2).all(|w| w[0].1 >= w[1].1)
    }
}
