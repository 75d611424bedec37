//! Simulated page-IO accounting.
//!
//! The index is memory resident; IO is a cost model used to compare layouts.
//! Every page-touching operation takes an `&mut IoCost` and charges it.

use serde::{Deserialize, Serialize};

/// Bytes per simulated disk page.
pub const PAGE_SIZE: usize = 4096;

/// Bytes charged per stored partition model.
pub const MODEL_SIZE: usize = 2000;

/// Bytes per stored item: two `f64` coordinates, a 4-byte id and the key.
pub const ITEM_SIZE: usize = 28;

/// Items that fit in one page.
pub const ITEMS_PER_PAGE: usize = PAGE_SIZE / ITEM_SIZE;

/// Running counter of simulated page reads and writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IoCost {
    pub pages: u64,
}

impl IoCost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Charge `pages` pages.
    pub fn charge(&mut self, pages: u64) {
        self.pages = self.pages.saturating_add(pages);
    }

    /// Charge the pages needed to hold `items` items.
    pub fn charge_items(&mut self, items: usize) {
        self.charge(pages_for_items(items));
    }

    /// Pages charged since an earlier reading of the same counter.
    pub fn since(&self, earlier: IoCost) -> u64 {
        self.pages.saturating_sub(earlier.pages)
    }
}

/// Pages occupied by `items` items, rounded up.
pub fn pages_for_items(items: usize) -> u64 {
    items.div_ceil(ITEMS_PER_PAGE) as u64
}
