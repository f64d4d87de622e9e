//! Frame descriptor table
//!
//! Descriptors live in page-sized containers, and every container is stored
//! in a frame of the memory it describes: the first one in a frame taken
//! straight from the region map, the following ones in frames allocated from
//! the buddy allocator. Containers are chained through their headers and are
//! never given back, so the table needs no heap.
//!
//! Reaching a slot by [`FrameId`] walks the chain, one step per container.
//! Searching by mfn scans every active slot.

use core::iter;
use core::mem::{align_of, size_of};
use core::ops::{Index, IndexMut};
use core::ptr::{self, NonNull};

use super::page::{FrameId, FrameSlot};
use super::{Error, Mfn, Order, Result, PAGE_SIZE};

/// Summary kept at the start of every descriptor page.
#[repr(C)]
struct PageHeader {
    host: Mfn,
    free_count: u32,
    next: Option<NonNull<DescriptorPage>>,
}

/// Number of descriptors that fit in one page next to its header.
pub(crate) const SLOTS_PER_PAGE: usize =
    (PAGE_SIZE - size_of::<PageHeader>()) / size_of::<FrameSlot>();

/// The layout of a frame hosting descriptors.
#[repr(C)]
struct DescriptorPage {
    meta: PageHeader,
    slots: [FrameSlot; SLOTS_PER_PAGE],
}

const _: () = assert!(size_of::<DescriptorPage>() <= PAGE_SIZE);

pub(crate) struct FrameTable {
    first: Option<NonNull<DescriptorPage>>,
    last: Option<NonNull<DescriptorPage>>,
    pages: usize,
}

// SAFETY: the table is the only user of the frames it is stored in.
unsafe impl Send for FrameTable {}

impl FrameTable {
    pub(crate) const fn new() -> Self {
        Self {
            first: None,
            last: None,
            pages: 0,
        }
    }

    /// Formats the first page in `host` and describes `host` itself as a
    /// busy order-0 frame.
    ///
    /// # Safety
    ///
    /// Same as [`FrameTable::push_page`].
    pub(crate) unsafe fn bootstrap(&mut self, host: Mfn, mem: NonNull<u8>) -> Result<FrameId> {
        debug_assert!(self.first.is_none());
        self.push_page(host, mem)?;
        let id = self.new_descriptor(host, 0).ok_or(Error::OutOfMemory)?;
        self[id].get();
        Ok(id)
    }

    /// Formats `mem`, where frame `host` is mapped, as an empty descriptor
    /// page and appends it to the chain.
    ///
    /// # Safety
    ///
    /// `mem` must point to `PAGE_SIZE` writable bytes that nothing but this
    /// table uses for as long as the table lives.
    pub(crate) unsafe fn push_page(&mut self, host: Mfn, mem: NonNull<u8>) -> Result<()> {
        if mem.as_ptr().align_offset(align_of::<DescriptorPage>()) != 0 {
            return Err(Error::MapFailed(host));
        }
        let page = mem.cast::<DescriptorPage>();
        let raw = page.as_ptr();

        ptr::addr_of_mut!((*raw).meta).write(PageHeader {
            host,
            free_count: SLOTS_PER_PAGE as u32,
            next: None,
        });
        let slots = ptr::addr_of_mut!((*raw).slots).cast::<FrameSlot>();
        for s in 0..SLOTS_PER_PAGE {
            slots.add(s).write(FrameSlot::UNUSED);
        }

        match self.last {
            Some(last) => (*last.as_ptr()).meta.next = Some(page),
            None => self.first = Some(page),
        }
        self.last = Some(page);
        self.pages += 1;
        Ok(())
    }

    /// Points the chain at new mappings of its pages, as handed out by
    /// `map` for each host frame.
    ///
    /// # Safety
    ///
    /// Every pointer `map` returns must satisfy [`FrameTable::push_page`]
    /// and show the current contents of the page. The old mapping of a page
    /// must stay valid until `map` has been called for it.
    pub(crate) unsafe fn remap<F>(&mut self, mut map: F) -> Result<()>
    where
        F: FnMut(Mfn) -> Result<NonNull<u8>>,
    {
        let mut prev: Option<NonNull<DescriptorPage>> = None;
        let mut cur = self.first;

        while let Some(old) = cur {
            let host = (*old.as_ptr()).meta.host;
            cur = (*old.as_ptr()).meta.next;

            let mem = map(host)?;
            if mem.as_ptr().align_offset(align_of::<DescriptorPage>()) != 0 {
                return Err(Error::MapFailed(host));
            }
            let page = mem.cast::<DescriptorPage>();
            match prev {
                Some(prev) => (*prev.as_ptr()).meta.next = Some(page),
                None => self.first = Some(page),
            }
            prev = Some(page);
        }
        self.last = prev;
        Ok(())
    }

    fn chain(&self) -> impl Iterator<Item = NonNull<DescriptorPage>> + '_ {
        // SAFETY: every link was written by `push_page` or `remap`.
        iter::successors(self.first, |page| unsafe { (*page.as_ptr()).meta.next })
    }

    fn descriptor_pages(&self) -> impl Iterator<Item = &DescriptorPage> + '_ {
        // SAFETY: the pages belong to the table, see `push_page`.
        self.chain().map(|page| unsafe { &*page.as_ptr() })
    }

    fn page(&self, p: usize) -> NonNull<DescriptorPage> {
        match self.chain().nth(p) {
            Some(page) => page,
            None => panic!("descriptor page {} out of {}", p, self.pages),
        }
    }

    pub(crate) fn pages(&self) -> usize {
        self.pages
    }

    pub(crate) fn hosts(&self) -> impl Iterator<Item = Mfn> + '_ {
        self.descriptor_pages().map(|page| page.meta.host)
    }

    pub(crate) fn is_host(&self, mfn: Mfn) -> bool {
        self.hosts().any(|host| host == mfn)
    }

    pub(crate) fn spare_slots(&self) -> usize {
        self.descriptor_pages()
            .map(|page| page.meta.free_count as usize)
            .sum()
    }

    /// Takes an unused slot for a block of `order` at `mfn`.
    ///
    /// The new descriptor is busy with a zero refcount.
    pub(crate) fn new_descriptor(&mut self, mfn: Mfn, order: Order) -> Option<FrameId> {
        let (p, page) = self
            .chain()
            .enumerate()
            .find(|(_, page)| unsafe { (*page.as_ptr()).meta.free_count > 0 })?;
        // SAFETY: `&mut self` makes this the only reference into the page.
        let page = unsafe { &mut *page.as_ptr() };
        let s = page.slots.iter().position(FrameSlot::is_unused)?;

        page.slots[s] = FrameSlot::new(mfn, order);
        page.meta.free_count -= 1;
        Some(FrameId((p * SLOTS_PER_PAGE + s) as u32))
    }

    /// Returns a slot to its page. The descriptor must not be listed.
    pub(crate) fn release_descriptor(&mut self, id: FrameId) {
        let (p, s) = split(id);
        // SAFETY: as in `new_descriptor`.
        let page = unsafe { &mut *self.page(p).as_ptr() };
        debug_assert!(!page.slots[s].is_free());
        debug_assert!(!page.slots[s].is_unused());

        page.slots[s] = FrameSlot::UNUSED;
        page.meta.free_count += 1;
    }

    /// Iterates over every active descriptor.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (FrameId, &FrameSlot)> + '_ {
        self.descriptor_pages()
            .enumerate()
            .filter(|(_, page)| page.meta.free_count as usize != SLOTS_PER_PAGE)
            .flat_map(|(p, page)| {
                page.slots
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| !slot.is_unused())
                    .map(move |(s, slot)| (FrameId((p * SLOTS_PER_PAGE + s) as u32), slot))
            })
    }

    /// The active descriptor whose block starts exactly at `mfn`.
    pub(crate) fn descriptor_for(&self, mfn: Mfn) -> Option<FrameId> {
        self.iter()
            .find(|(_, slot)| slot.mfn() == mfn)
            .map(|(id, _)| id)
    }

    /// The active descriptor whose block contains `mfn`.
    pub(crate) fn covering(&self, mfn: Mfn) -> Option<FrameId> {
        self.iter()
            .find(|(_, slot)| slot.contains(mfn))
            .map(|(id, _)| id)
    }
}

fn split(id: FrameId) -> (usize, usize) {
    (id.index() / SLOTS_PER_PAGE, id.index() % SLOTS_PER_PAGE)
}

impl Index<FrameId> for FrameTable {
    type Output = FrameSlot;

    fn index(&self, id: FrameId) -> &Self::Output {
        let (p, s) = split(id);
        // SAFETY: the pages belong to the table, see `push_page`.
        unsafe { &(*self.page(p).as_ptr()).slots[s] }
    }
}

impl IndexMut<FrameId> for FrameTable {
    fn index_mut(&mut self, id: FrameId) -> &mut Self::Output {
        let (p, s) = split(id);
        // SAFETY: `&mut self` makes this the only reference into the page.
        unsafe { &mut (*self.page(p).as_ptr()).slots[s] }
    }
}

/// A page-aligned page of memory for tests to host descriptors in.
#[cfg(test)]
#[repr(C, align(4096))]
pub(crate) struct PageBuf(pub(crate) [u8; PAGE_SIZE]);

#[cfg(test)]
impl PageBuf {
    pub(crate) fn leak() -> NonNull<u8> {
        NonNull::from(Box::leak(Box::new(PageBuf([0; PAGE_SIZE])))).cast()
    }
}
