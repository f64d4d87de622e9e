//! Buddy System Implemention
//!
//! Allocation splits the smallest free block that fits, keeping the lower
//! half and freeing the upper one at each step. Release merges a block
//! with its buddy for as long as the buddy is free and of the same order.

use bit_field::BitField;
use log::{trace, warn};

use super::{FrameManager, PagingBackend};
use crate::mm::page::{Frame, FrameFlags, FrameId};
use crate::mm::{Error, Mfn, Order, Result, PAGE_ORDER_4K};

/// Why [`FrameManager::take_block`] came back empty-handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shortage {
    /// No free block of the order or above.
    Blocks,
    /// A larger block is free, but the table has no room for its halves.
    Descriptors,
}

/// The block that pairs with the block of `order` at `mfn`.
pub(crate) fn buddy_of(mfn: Mfn, order: Order) -> Mfn {
    if mfn.0.get_bit(order) {
        mfn.prev(order)
    } else {
        mfn.next(order)
    }
}

impl<B: PagingBackend, const ORDERS: usize> FrameManager<B, ORDERS> {
    /// Allocates a block of `order`, refilling from paging when every free
    /// list that could serve it is empty.
    ///
    /// Paging is left alone when free blocks exist but cannot be split for
    /// lack of descriptors: more frames would not help.
    pub fn allocate(&mut self, order: Order) -> Result<Frame> {
        self.check_ready()?;
        self.check_order(order)?;

        self.ensure_spare_slots();
        match self.take_block(order) {
            Ok(id) => return Ok(self.frame(id)),
            Err(Shortage::Descriptors) => return Err(Error::OutOfMemory),
            Err(Shortage::Blocks) => {}
        }

        self.refill(order)?;
        self.ensure_spare_slots();
        self.take_block(order)
            .map(|id| self.frame(id))
            .map_err(|_| Error::OutOfMemory)
    }

    pub fn get_free_frame(&mut self) -> Result<Frame> {
        self.allocate(PAGE_ORDER_4K)
    }

    /// Allocates one page without ever calling back into paging.
    pub fn allocate_no_refill(&mut self) -> Option<Frame> {
        self.check_ready().ok()?;
        self.ensure_spare_slots();
        self.take_block(PAGE_ORDER_4K).ok().map(|id| self.frame(id))
    }

    /// Allocates the first free block, of any order, accepted by `pred`.
    ///
    /// Blocks are offered by ascending order, then ascending mfn, and are
    /// handed out whole. Running dry is not an error and never refills.
    pub fn allocate_matching<F>(&mut self, mut pred: F) -> Option<Frame>
    where
        F: FnMut(&Frame) -> bool,
    {
        self.check_ready().ok()?;
        for order in 0..ORDERS {
            let found = self.free_lists[order].find(&self.table, |slot| pred(&slot.frame()));
            if let Some(id) = found {
                self.free_lists[order].remove(&mut self.table, id);
                self.table[id].get();
                return Some(self.frame(id));
            }
        }
        None
    }

    /// Pops a free block of `order`, splitting a larger one if needed, and
    /// marks it busy.
    pub(super) fn take_block(&mut self, order: Order) -> core::result::Result<FrameId, Shortage> {
        if let Some(id) = self.free_lists[order].pop(&mut self.table) {
            self.table[id].get();
            return Ok(id);
        }

        let found = (order + 1..ORDERS)
            .find(|&o| !self.free_lists[o].is_empty())
            .ok_or(Shortage::Blocks)?;
        // Every split level needs a descriptor for the upper half.
        if self.table.spare_slots() < found - order {
            warn!("no spare frame descriptors to split an order {} block", found);
            return Err(Shortage::Descriptors);
        }

        let id = self.free_lists[found]
            .pop(&mut self.table)
            .ok_or(Shortage::Blocks)?;
        for cur in (order + 1..=found).rev() {
            let half = cur - 1;
            let upper = self.table[id].mfn().next(half);
            self.table[id].set_order(half);

            let buddy = self
                .table
                .new_descriptor(upper, half)
                .ok_or(Shortage::Descriptors)?;
            self.free_lists[half].insert(&mut self.table, buddy);
            trace!("split: {:#x} order {} free", upper, half);
        }

        self.table[id].get();
        Ok(id)
    }

    /// Drops one reference to the busy block of `order` at `mfn`, freeing it
    /// when the last one goes.
    pub fn release(&mut self, mfn: Mfn, order: Order) -> Result<()> {
        self.check_ready()?;
        self.check_order(order)?;
        if self.block_invalid(mfn, order) {
            return Err(Error::InvalidFrame(mfn));
        }
        if self.table.is_host(mfn) {
            return Err(Error::DescriptorPage(mfn));
        }

        let id = match self.busy_head(mfn, order) {
            Ok(id) => id,
            Err(err) => {
                warn!("release of {:#x} order {} refused: {}", mfn, order, err);
                return Err(err);
            }
        };
        if self.table[id].put() > 0 {
            return Ok(());
        }
        self.free_block(id);
        Ok(())
    }

    pub fn put_free_frame(&mut self, mfn: Mfn) -> Result<()> {
        self.release(mfn, PAGE_ORDER_4K)
    }

    /// Hands frames that were never allocated here over to the free lists.
    ///
    /// A busy block of exactly this shape is freed whatever its refcount.
    pub fn reclaim(&mut self, mfn: Mfn, order: Order) -> Result<()> {
        self.check_ready()?;
        self.check_order(order)?;
        if self.block_invalid(mfn, order) {
            return Err(Error::InvalidFrame(mfn));
        }
        if self.table.is_host(mfn) {
            return Err(Error::DescriptorPage(mfn));
        }

        let overlapping = self
            .table
            .iter()
            .find(|(_, slot)| slot.contains(mfn) || mfn.block_contains(order, slot.mfn()))
            .map(|(id, slot)| (id, slot.is_busy() && slot.mfn() == mfn && slot.order() == order));
        match overlapping {
            Some((id, true)) => {
                self.table[id].clear_refcount();
                self.free_block(id);
                return Ok(());
            }
            Some(_) => return Err(Error::Overlap(mfn)),
            None => {}
        }

        self.ensure_spare_slots();
        let id = self
            .table
            .new_descriptor(mfn, order)
            .ok_or(Error::OutOfMemory)?;
        self.free_block(id);
        Ok(())
    }

    /// Takes another reference to the busy block starting at `mfn`.
    pub fn retain(&mut self, mfn: Mfn) -> Result<Frame> {
        let id = self.busy_block_at(mfn)?;
        self.table[id].get();
        Ok(self.frame(id))
    }

    pub fn set_uncacheable(&mut self, mfn: Mfn, uncacheable: bool) -> Result<Frame> {
        self.set_attr(mfn, FrameFlags::UNCACHEABLE, uncacheable)
    }

    pub fn set_pagetable(&mut self, mfn: Mfn, pagetable: bool) -> Result<Frame> {
        self.set_attr(mfn, FrameFlags::PAGETABLE, pagetable)
    }

    fn set_attr(&mut self, mfn: Mfn, attr: FrameFlags, value: bool) -> Result<Frame> {
        let id = self.busy_block_at(mfn)?;
        self.table[id].set_attr(attr, value);
        Ok(self.frame(id))
    }

    fn busy_block_at(&self, mfn: Mfn) -> Result<FrameId> {
        self.check_ready()?;
        if self.table.is_host(mfn) {
            return Err(Error::DescriptorPage(mfn));
        }
        self.table
            .descriptor_for(mfn)
            .filter(|&id| self.table[id].is_busy())
            .ok_or(Error::InvalidFrame(mfn))
    }

    /// The busy block of `order` that starts at `mfn`.
    fn busy_head(&self, mfn: Mfn, order: Order) -> Result<FrameId> {
        let id = self.table.covering(mfn).ok_or(Error::InvalidFrame(mfn))?;
        let slot = &self.table[id];

        if slot.is_free() {
            return Err(Error::DoubleRelease(mfn));
        }
        if slot.mfn() != mfn || slot.order() != order {
            return Err(Error::OrderMismatch {
                mfn,
                expected: order,
                found: slot.order(),
            });
        }
        Ok(id)
    }

    /// Frees a busy block with no references left, merging it upwards.
    pub(super) fn free_block(&mut self, mut id: FrameId) {
        debug_assert_eq!(self.table[id].refcount(), 0);
        self.table[id].set_attr(FrameFlags::all(), false);

        loop {
            let mfn = self.table[id].mfn();
            let order = self.table[id].order();
            if order >= Self::MAX_ORDER {
                break;
            }

            let buddy_mfn = buddy_of(mfn, order);
            let buddy = self.free_lists[order].find_mfn(&self.table, buddy_mfn);
            let Some(buddy) = buddy else {
                break;
            };
            self.free_lists[order].remove(&mut self.table, buddy);

            let (low, high) = if buddy_mfn < mfn { (buddy, id) } else { (id, buddy) };
            self.table.release_descriptor(high);
            self.table[low].set_order(order + 1);
            trace!("merge: {:#x} order {}", self.table[low].mfn(), order + 1);
            id = low;
        }

        let order = self.table[id].order();
        self.free_lists[order].insert(&mut self.table, id);
    }
}
