//! Frame lookup by mfn or physical address.
//!
//! Answers come straight from the descriptor table, so they always reflect
//! the last completed allocation or release.

use super::{FrameManager, PagingBackend};
use crate::mm::page::{Frame, FrameSlot};
use crate::mm::{Mfn, Order, PhysicalAddr};

/// Which descriptors a lookup may return.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Scope {
    Free,
    Busy,
    Any,
}

impl Scope {
    fn admits(self, slot: &FrameSlot) -> bool {
        match self {
            Scope::Free => slot.is_free(),
            Scope::Busy => slot.is_busy(),
            Scope::Any => true,
        }
    }
}

impl<B: PagingBackend, const ORDERS: usize> FrameManager<B, ORDERS> {
    /// The block containing `mfn`. When `order` is given, the block must be
    /// of that order.
    pub fn find_mfn(&self, mfn: Mfn, order: Option<Order>, scope: Scope) -> Option<Frame> {
        let id = self.table.covering(mfn)?;
        let slot = &self.table[id];
        let order_matches = order.map_or(true, |order| order == slot.order());

        (order_matches && scope.admits(slot)).then(|| slot.frame())
    }

    /// The block containing `pa`.
    pub fn find_paddr(&self, pa: PhysicalAddr, scope: Scope) -> Option<Frame> {
        if self.paddr_invalid(pa) {
            return None;
        }
        self.table
            .iter()
            .filter(|(_, slot)| scope.admits(slot))
            .map(|(_, slot)| slot.frame())
            .find(|frame| frame.has_paddr(pa))
    }

    pub fn find_free_mfn_frame(&self, mfn: Mfn, order: Option<Order>) -> Option<Frame> {
        self.find_mfn(mfn, order, Scope::Free)
    }

    pub fn find_busy_mfn_frame(&self, mfn: Mfn, order: Option<Order>) -> Option<Frame> {
        self.find_mfn(mfn, order, Scope::Busy)
    }

    pub fn find_mfn_frame(&self, mfn: Mfn, order: Option<Order>) -> Option<Frame> {
        self.find_mfn(mfn, order, Scope::Any)
    }

    pub fn find_free_paddr_frame(&self, pa: PhysicalAddr) -> Option<Frame> {
        self.find_paddr(pa, Scope::Free)
    }

    pub fn find_busy_paddr_frame(&self, pa: PhysicalAddr) -> Option<Frame> {
        self.find_paddr(pa, Scope::Busy)
    }

    pub fn find_paddr_frame(&self, pa: PhysicalAddr) -> Option<Frame> {
        self.find_paddr(pa, Scope::Any)
    }
}
