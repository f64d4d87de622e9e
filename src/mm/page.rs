//! Struct for per frame

use core::fmt;

use bitflags::bitflags;
use log::info;

use super::buddy::Link;
use super::{size_of_order, Mfn, Order, PhysicalAddr};

bitflags! {
    /// Frame attributes, packed the way the boot code lays them out.
    ///
    /// `FREE` is derived from free-list membership; the other two are
    /// advisory tags that the allocator never looks at.
    pub struct FrameFlags: u16 {
        const UNCACHEABLE = 1 << 12;
        const FREE =        1 << 13;
        const PAGETABLE =   1 << 14;
    }
}

/// Index of a descriptor slot in the descriptor table.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub(crate) struct FrameId(pub(crate) u32);

impl FrameId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A frame descriptor as stored in the descriptor table.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FrameSlot {
    pub(crate) link: Link,
    mfn: Mfn,
    refcount: u32,
    order: u16,
    attrs: FrameFlags,
}

impl FrameSlot {
    pub(crate) const UNUSED: FrameSlot = FrameSlot {
        link: Link::new(),
        mfn: Mfn::INVALID,
        refcount: 0,
        order: 0,
        attrs: FrameFlags::empty(),
    };

    pub(crate) fn new(mfn: Mfn, order: Order) -> Self {
        FrameSlot {
            mfn,
            order: order as u16,
            ..Self::UNUSED
        }
    }

    pub(crate) fn is_unused(&self) -> bool {
        self.mfn.is_invalid()
    }

    pub(crate) fn mfn(&self) -> Mfn {
        self.mfn
    }

    pub(crate) fn order(&self) -> Order {
        self.order as Order
    }

    pub(crate) fn set_order(&mut self, order: Order) {
        self.order = order as u16;
    }

    pub(crate) fn refcount(&self) -> u32 {
        self.refcount
    }

    pub(crate) fn get(&mut self) -> u32 {
        self.refcount += 1;
        self.refcount
    }

    pub(crate) fn put(&mut self) -> u32 {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount
    }

    pub(crate) fn clear_refcount(&mut self) {
        self.refcount = 0;
    }

    pub(crate) fn is_free(&self) -> bool {
        self.link.is_listed()
    }

    pub(crate) fn is_busy(&self) -> bool {
        !self.is_unused() && !self.is_free()
    }

    pub(crate) fn contains(&self, mfn: Mfn) -> bool {
        !self.is_unused() && self.mfn.block_contains(self.order(), mfn)
    }

    pub(crate) fn set_attr(&mut self, attr: FrameFlags, value: bool) {
        self.attrs.set(attr - FrameFlags::FREE, value);
    }

    pub(crate) fn flags(&self) -> FrameFlags {
        let mut flags = self.attrs;
        flags.set(FrameFlags::FREE, self.is_free());
        flags
    }

    pub(crate) fn frame(&self) -> Frame {
        Frame {
            mfn: self.mfn,
            order: self.order(),
            refcount: self.refcount,
            flags: self.flags(),
        }
    }
}

/// A snapshot of one frame descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Frame {
    pub mfn: Mfn,
    pub order: Order,
    pub refcount: u32,
    pub flags: FrameFlags,
}

impl Frame {
    pub fn is_used(&self) -> bool {
        self.refcount > 0
    }

    pub fn is_free(&self) -> bool {
        !self.is_used() && self.flags.contains(FrameFlags::FREE)
    }

    pub fn is_uncacheable(&self) -> bool {
        self.flags.contains(FrameFlags::UNCACHEABLE)
    }

    pub fn is_pagetable(&self) -> bool {
        self.flags.contains(FrameFlags::PAGETABLE)
    }

    pub fn start_paddr(&self) -> PhysicalAddr {
        self.mfn.start_paddr()
    }

    pub fn size(&self) -> usize {
        size_of_order(self.order)
    }

    /// Whether `pa` falls inside this block.
    pub fn has_paddr(&self, pa: PhysicalAddr) -> bool {
        let start = self.start_paddr();
        pa >= start && pa - start < self.size()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame: mfn: {:x}, order: {}, refcnt: {}, uc: {}, free: {}, pt: {}",
            self.mfn,
            self.order,
            self.refcount,
            self.is_uncacheable() as u8,
            self.flags.contains(FrameFlags::FREE) as u8,
            self.is_pagetable() as u8,
        )
    }
}

pub fn display_frame(frame: &Frame) {
    info!("{}", frame);
}
