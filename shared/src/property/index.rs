//! Frame-striped scheduling index for convergence.
//!
//! Each property type owns two of these (active and resting). An index is a
//! row of stripes, one of which is visited per frame; properties are placed
//! in the least-loaded stripe so convergence work spreads evenly across the
//! convergence interval.

use std::sync::{RwLock, Weak};

use log::warn;

use super::PropertyInner;
use crate::types::FrameId;

pub(super) type PropertyRef = Weak<RwLock<PropertyInner>>;
pub(super) type PropertyStrongRef = std::sync::Arc<RwLock<PropertyInner>>;

/// A property's location within an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct IndexSlot {
    pub list: usize,
    pub position: usize,
}

pub(super) struct PropertyIndex {
    lists: Vec<Vec<PropertyRef>>,
    counts: Vec<usize>,
    total: usize,
}

impl PropertyIndex {
    pub fn new() -> Self {
        Self {
            lists: Vec::new(),
            counts: Vec::new(),
            total: 0,
        }
    }

    /// Allocates the stripes. Resizing a populated index would strand
    /// scheduled properties, so this requires the index to be empty.
    pub fn create_lists(&mut self, count: usize) {
        debug_assert!(self.is_empty());
        self.lists = (0..count).map(|_| Vec::new()).collect();
        self.counts = vec![0; count];
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Places a property in the least-loaded stripe (ties go to the first
    /// seen) and returns its slot. `None` when no stripes exist yet.
    pub fn insert(&mut self, property: PropertyRef) -> Option<IndexSlot> {
        let mut list = None;
        let mut smallest = usize::MAX;
        for (i, count) in self.counts.iter().enumerate() {
            if *count < smallest {
                smallest = *count;
                list = Some(i);
            }
        }
        let list = list?;
        self.lists[list].push(property);
        self.counts[list] += 1;
        self.total += 1;
        Some(IndexSlot {
            list,
            position: self.lists[list].len() - 1,
        })
    }

    /// Removes the entry at `slot`. The displaced tail entry, if any, gets
    /// its stored slot position corrected.
    pub fn remove(&mut self, slot: IndexSlot) {
        self.counts[slot.list] -= 1;
        self.total -= 1;
        self.lists[slot.list].swap_remove(slot.position);
        self.fix_moved(slot.list, slot.position);
    }

    fn fix_moved(&self, list: usize, position: usize) {
        let Some(entry) = self.lists[list].get(position) else {
            return;
        };
        let Some(strong) = entry.upgrade() else {
            return;
        };
        let Ok(mut inner) = strong.write() else {
            return;
        };
        if let Some(entry) = inner.sched.as_mut() {
            entry.slot.position = position;
        }
    }

    /// Collects the stripe for `frame_id`, pruning entries whose property
    /// was dropped while still scheduled (which the owner should have
    /// prevented by unscheduling first).
    pub fn collect_stripe(&mut self, frame_id: FrameId) -> Vec<PropertyStrongRef> {
        if self.lists.is_empty() {
            return Vec::new();
        }
        let list = (frame_id % self.lists.len() as u64) as usize;
        let mut live = Vec::new();
        let mut i = self.lists[list].len();
        while i > 0 {
            i -= 1;
            match self.lists[list][i].upgrade() {
                Some(strong) => live.push(strong),
                None => {
                    warn!("scheduled property was dropped without being unscheduled");
                    self.counts[list] -= 1;
                    self.total -= 1;
                    self.lists[list].swap_remove(i);
                    self.fix_moved(list, i);
                }
            }
        }
        live.reverse();
        live
    }
}
