//! Refilling the free lists from paging.

use log::{debug, warn};

use super::{FrameManager, PagingBackend};
use crate::mm::{pages_of_order, Error, Order, Result, PAGE_ORDER_4K};

impl<B: PagingBackend, const ORDERS: usize> FrameManager<B, ORDERS> {
    /// Pulls frames back from paging, returning how many were admitted.
    pub fn refill_from_paging(&mut self) -> Result<usize> {
        self.check_ready()?;
        self.refill(PAGE_ORDER_4K)
    }

    /// Asks paging for up to `2^order` pages and frees each one as an
    /// order-0 block, merging with whatever is already free.
    ///
    /// Admitting a page may grow the descriptor table, which allocates
    /// without refilling, so this never nests.
    pub(super) fn refill(&mut self, order: Order) -> Result<usize> {
        let mut admitted = 0;

        for _ in 0..pages_of_order(order) {
            let Some(mfn) = self.backend.take_backing_page() else {
                break;
            };
            match self.reclaim(mfn, PAGE_ORDER_4K) {
                Ok(()) => admitted += 1,
                Err(err) => warn!("refill: dropping frame {:#x}: {}", mfn, err),
            }
        }

        if admitted == 0 {
            warn!("refill: paging has no frames to give back");
            return Err(Error::OutOfMemory);
        }
        debug!("refill: {} frames admitted for an order {} request", admitted, order);
        Ok(admitted)
    }
}
