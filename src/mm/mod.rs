//! Memory subsystem
//!
//! Physical frames are named by their machine frame number ([`Mfn`]). The
//! translation to and from physical addresses is a plain shift by
//! [`PAGE_SHIFT`].

use core::fmt;
use core::ops::{Add, Sub};

pub mod buddy;
mod error;
pub mod memblock;
pub mod page;
mod table;

pub use error::{Error, Result};

pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

pub const PAGE_ORDER_4K: Order = 0;
pub const PAGE_ORDER_2M: Order = 9;
pub const PAGE_ORDER_1G: Order = 18;
pub const MAX_PAGE_ORDER: Order = PAGE_ORDER_1G;

/// The order of a buddy block.
///
/// A block of order `k` spans `1 << k` pages.
pub type Order = usize;

#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PhysicalAddr(pub usize);

impl PhysicalAddr {
    pub const INVALID: PhysicalAddr = PhysicalAddr(usize::MAX);

    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    pub const fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    /// The frame holding this address.
    pub const fn page_frame(&self) -> Mfn {
        Mfn(self.0 >> PAGE_SHIFT)
    }

    /// The first frame that starts at or above this address.
    pub const fn next_page_frame(&self) -> Mfn {
        Mfn((self.0 + PAGE_SIZE - 1) >> PAGE_SHIFT)
    }
}

impl Add<usize> for PhysicalAddr {
    type Output = PhysicalAddr;

    fn add(self, rhs: usize) -> Self::Output {
        PhysicalAddr(self.0 + rhs)
    }
}

impl Sub<PhysicalAddr> for PhysicalAddr {
    type Output = usize;

    fn sub(self, rhs: PhysicalAddr) -> Self::Output {
        self.0 - rhs.0
    }
}

impl fmt::Debug for PhysicalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalAddr({:#x})", self.0)
    }
}

impl fmt::LowerHex for PhysicalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Machine frame number.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Mfn(pub usize);

impl Mfn {
    pub const INVALID: Mfn = Mfn(usize::MAX);
    /// The highest frame whose start address fits in a `PhysicalAddr`.
    pub const MAX: Mfn = Mfn(usize::MAX >> PAGE_SHIFT);

    pub const fn new(mfn: usize) -> Self {
        Self(mfn)
    }

    pub const fn is_invalid(&self) -> bool {
        self.0 == Self::INVALID.0
    }

    pub const fn start_paddr(&self) -> PhysicalAddr {
        PhysicalAddr(self.0 << PAGE_SHIFT)
    }

    /// Like [`Mfn::start_paddr`], but `None` past the end of the address space.
    pub const fn checked_start_paddr(&self) -> Option<PhysicalAddr> {
        if self.0 > Self::MAX.0 {
            None
        } else {
            Some(self.start_paddr())
        }
    }

    /// Whether a block of `order` may start here.
    pub const fn is_aligned(&self, order: Order) -> bool {
        self.0 & (pages_of_order(order) - 1) == 0
    }

    /// The frame `1 << order` pages above this one.
    pub const fn next(&self, order: Order) -> Mfn {
        Mfn(self.0 + pages_of_order(order))
    }

    /// The frame `1 << order` pages below this one.
    pub const fn prev(&self, order: Order) -> Mfn {
        Mfn(self.0 - pages_of_order(order))
    }

    /// Whether `other` lies in the block of `order` starting here.
    pub const fn block_contains(&self, order: Order, other: Mfn) -> bool {
        other.0 >= self.0 && other.0 - self.0 < pages_of_order(order)
    }
}

impl From<Mfn> for PhysicalAddr {
    fn from(mfn: Mfn) -> Self {
        mfn.start_paddr()
    }
}

impl From<PhysicalAddr> for Mfn {
    fn from(addr: PhysicalAddr) -> Self {
        addr.page_frame()
    }
}

impl fmt::Debug for Mfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mfn({:#x})", self.0)
    }
}

impl fmt::LowerHex for Mfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Returns the number of pages in a block of the given order.
pub const fn pages_of_order(order: Order) -> usize {
    1 << order
}

/// Returns the size in bytes of a block of the given order.
pub const fn size_of_order(order: Order) -> usize {
    PAGE_SIZE << order
}

/// Returns the largest order a block starting at `mfn` may have.
///
/// Frame 0 is aligned to every order, so the result saturates.
pub const fn max_order_from(mfn: Mfn) -> Order {
    if mfn.0 == 0 {
        usize::BITS as Order
    } else {
        mfn.0.trailing_zeros() as Order
    }
}

/// Returns the largest order that covers at most `pages` pages.
pub const fn lesser_order_of(pages: usize) -> Order {
    (usize::BITS - pages.leading_zeros() - 1) as Order
}
