//! Buddy System Page Allocator
//!
//! [`FrameManager`] owns the descriptor table and one free list per order.
//! Blocks are split on allocation and merged with their buddy on release.
//! Share it between contexts as `Spin<FrameManager<..>>`; every operation,
//! lookups included, expects exclusive access.

mod buddy;
mod linked_list;
mod lookup;
mod refill;

use core::fmt;
use core::ptr::NonNull;

use log::{debug, info, warn};

use super::page::{display_frame, Frame, FrameId};
use super::memblock::{MemBlock, MemBlockType};
use super::table::FrameTable;
use super::{
    lesser_order_of, max_order_from, pages_of_order, Error, Mfn, Order, PhysicalAddr, Result,
    MAX_PAGE_ORDER, PAGE_ORDER_4K, PAGE_SIZE,
};

pub(crate) use linked_list::{FreeList, Link};
pub use lookup::Scope;

/// Number of free lists by default: orders `0..=MAX_PAGE_ORDER`.
pub const DEFAULT_ORDERS: usize = MAX_PAGE_ORDER + 1;

/// Memory regions the manager can remember from the boot memory map.
pub const MAX_MEMORY_REGIONS: usize = 32;

/// The paging code, as seen from the frame manager.
///
/// # Safety
///
/// The descriptor table is stored in the frames passed to `map_frame`.
/// The returned pointer must give `PAGE_SIZE` bytes of read and write
/// access to the frame, showing its current contents, and must stay valid
/// until `map_frame` is called again for the same frame.
pub unsafe trait PagingBackend {
    /// Hands back one frame the paging code no longer needs, if any.
    fn take_backing_page(&mut self) -> Option<Mfn>;

    /// Makes `mfn` addressable by the kernel and returns where it is.
    fn map_frame(&mut self, mfn: Mfn) -> Result<NonNull<u8>>;
}

/// No paging yet: nothing to give back, physical memory is identity mapped.
unsafe impl PagingBackend for () {
    fn take_backing_page(&mut self) -> Option<Mfn> {
        None
    }

    fn map_frame(&mut self, mfn: Mfn) -> Result<NonNull<u8>> {
        mfn.checked_start_paddr()
            .and_then(|pa| NonNull::new(pa.0 as *mut u8))
            .ok_or(Error::MapFailed(mfn))
    }
}

pub struct FrameManager<B, const ORDERS: usize = DEFAULT_ORDERS> {
    table: FrameTable,
    free_lists: [FreeList; ORDERS],
    /// Present physical memory, reserved ranges included.
    memory: MemBlockType<MAX_MEMORY_REGIONS>,
    backend: B,
    initialized: bool,
}

impl<B, const ORDERS: usize> FrameManager<B, ORDERS> {
    pub const MAX_ORDER: Order = ORDERS - 1;

    pub const fn new(backend: B) -> Self {
        Self {
            table: FrameTable::new(),
            free_lists: [FreeList::new(); ORDERS],
            memory: MemBlockType::new(),
            backend,
            initialized: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: PagingBackend, const ORDERS: usize> FrameManager<B, ORDERS> {
    /// Builds the descriptor table and free lists from the boot memory map.
    ///
    /// The highest usable page hosts the first descriptor page.
    pub fn init<const N: usize, const M: usize>(&mut self, memblock: &MemBlock<N, M>) -> Result<()> {
        if self.initialized {
            return Err(Error::AlreadyInitialized);
        }

        self.memory = MemBlockType::new();
        for region in memblock.memory() {
            self.memory.add(region.base, region.size)?;
        }

        let Some((_, last_end)) = memblock.free_ranges().last() else {
            warn!("no usable memory in the memory map");
            return Err(Error::OutOfMemory);
        };
        let host = last_end.prev(PAGE_ORDER_4K);
        let mem = self.backend.map_frame(host)?;
        // SAFETY: `host` is free in the memory map and is never handed out,
        // since seeding stops right below it.
        unsafe { self.table.bootstrap(host, mem)? };
        self.initialized = true;

        for (start, end) in memblock.free_ranges() {
            let end = if end == last_end { host } else { end };
            self.seed(start, end)?;
        }

        info!(
            "frame manager: {} free pages, descriptor table at {:#x}",
            self.frames_count().free_pages,
            host
        );
        Ok(())
    }

    /// Adds `[start, end)` to the free lists in the largest aligned blocks.
    fn seed(&mut self, start: Mfn, end: Mfn) -> Result<()> {
        let mut mfn = start;
        while mfn < end {
            let order = max_order_from(mfn)
                .min(lesser_order_of(end.0 - mfn.0))
                .min(Self::MAX_ORDER);

            self.ensure_spare_slots();
            let id = self
                .table
                .new_descriptor(mfn, order)
                .ok_or(Error::OutOfMemory)?;
            self.free_block(id);
            mfn = mfn.next(order);
        }
        Ok(())
    }

    /// Grows the descriptor table while there is still room for the split
    /// that growing itself may need.
    ///
    /// A failure here is not fatal: the caller checks for the slots it
    /// actually consumes.
    fn ensure_spare_slots(&mut self) {
        if self.table.spare_slots() > ORDERS {
            return;
        }
        if let Err(err) = self.grow_table() {
            warn!("cannot grow frame descriptor table: {}", err);
        }
    }

    fn grow_table(&mut self) -> Result<()> {
        let id = self
            .take_block(PAGE_ORDER_4K)
            .map_err(|_| Error::OutOfMemory)?;
        let host = self.table[id].mfn();

        let pushed = self.backend.map_frame(host).and_then(|mem| {
            // SAFETY: `host` was just taken off the free lists and is pinned
            // from now on.
            unsafe { self.table.push_page(host, mem) }
        });
        if let Err(err) = pushed {
            self.table[id].clear_refcount();
            self.free_block(id);
            return Err(err);
        }
        debug!(
            "frame descriptor table grown to {} pages, new page at {:#x}",
            self.table.pages(),
            host
        );
        Ok(())
    }

    /// Maps every descriptor page again and moves the table to the new
    /// mappings, e.g. once the kernel leaves the boot identity map. Pages
    /// added later are mapped as they are allocated.
    pub fn map_descriptor_table(&mut self) -> Result<()> {
        self.check_ready()?;
        let backend = &mut self.backend;
        // SAFETY: `PagingBackend` guarantees what `remap` asks of `map`.
        unsafe { self.table.remap(|host| backend.map_frame(host)) }
    }

    pub fn paddr_invalid(&self, pa: PhysicalAddr) -> bool {
        pa == PhysicalAddr::INVALID || !self.memory.contains(pa)
    }

    /// Frames whose address does not fit in a `PhysicalAddr` are invalid.
    pub fn mfn_invalid(&self, mfn: Mfn) -> bool {
        mfn.checked_start_paddr()
            .map_or(true, |pa| self.paddr_invalid(pa))
    }

    /// Whether `[mfn, mfn + 2^order)` is not an aligned block inside a
    /// single memory region.
    fn block_invalid(&self, mfn: Mfn, order: Order) -> bool {
        if !mfn.is_aligned(order) {
            return true;
        }
        let first = mfn.checked_start_paddr();
        let last = mfn
            .0
            .checked_add(pages_of_order(order) - 1)
            .and_then(|last| Mfn(last).checked_start_paddr());

        match (first, last) {
            (Some(first), Some(last)) => !self.memory.contains_range(first, last + (PAGE_SIZE - 1)),
            _ => true,
        }
    }

    fn check_ready(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn check_order(&self, order: Order) -> Result<()> {
        if order > Self::MAX_ORDER {
            Err(Error::InvalidOrder(order))
        } else {
            Ok(())
        }
    }

    fn frame(&self, id: FrameId) -> Frame {
        self.table[id].frame()
    }

    /// Every active descriptor, free and busy.
    pub fn frames(&self) -> impl Iterator<Item = Frame> + '_ {
        self.table.iter().map(|(_, slot)| slot.frame())
    }

    pub fn dump_frames(&self) {
        for frame in self.frames() {
            display_frame(&frame);
        }
    }

    pub fn frames_count(&self) -> FramesCount<ORDERS> {
        let mut count = FramesCount {
            free_blocks: [0; ORDERS],
            free_pages: 0,
            busy_pages: 0,
            table_pages: self.table.pages(),
        };
        for (order, list) in self.free_lists.iter().enumerate() {
            count.free_blocks[order] = list.len();
            count.free_pages += list.len() * pages_of_order(order);
        }
        count.busy_pages = self
            .table
            .iter()
            .filter(|(_, slot)| slot.is_busy())
            .map(|(_, slot)| pages_of_order(slot.order()))
            .sum();
        count
    }

    pub fn display_frames_count(&self) {
        info!("{}", self.frames_count());
    }
}

/// Aggregate free and used page counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramesCount<const ORDERS: usize = DEFAULT_ORDERS> {
    /// Free blocks per order.
    pub free_blocks: [usize; ORDERS],
    pub free_pages: usize,
    /// Pages held by clients, descriptor table pages included.
    pub busy_pages: usize,
    pub table_pages: usize,
}

impl<const ORDERS: usize> FramesCount<ORDERS> {
    pub fn total_pages(&self) -> usize {
        self.free_pages + self.busy_pages
    }
}

impl<const ORDERS: usize> fmt::Display for FramesCount<ORDERS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Avail memory frames: (total size: {} KB)",
            self.free_pages * (PAGE_SIZE / 1024)
        )?;
        for (order, count) in self.free_blocks.iter().enumerate() {
            if *count > 0 {
                writeln!(f, "  order {:2}: {}", order, count)?;
            }
        }
        write!(
            f,
            "Used frames: {} pages ({} descriptor table pages)",
            self.busy_pages, self.table_pages
        )
    }
}
