use core::fmt;

use super::{Mfn, Order};

/// Errors reported by the frame manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No free block of the requested order, and refilling did not help.
    OutOfMemory,
    /// The frame is outside known memory, misaligned, or not tracked.
    InvalidFrame(Mfn),
    /// The order is larger than the manager's maximum order.
    InvalidOrder(Order),
    /// The frame is already free.
    DoubleRelease(Mfn),
    /// The frame is busy, but not as a block head of the stated order.
    OrderMismatch {
        mfn: Mfn,
        expected: Order,
        found: Order,
    },
    /// The range is already tracked by another descriptor.
    Overlap(Mfn),
    /// The frame hosts descriptor table storage and can never be freed.
    DescriptorPage(Mfn),
    /// A memory region is empty or overlaps an existing one.
    InvalidRegion,
    /// The region map has no room left.
    RegionFull,
    /// The paging code could not map the frame.
    MapFailed(Mfn),
    NotInitialized,
    AlreadyInitialized,
}

pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "out of memory"),
            Error::InvalidFrame(mfn) => write!(f, "invalid frame {:#x}", mfn),
            Error::InvalidOrder(order) => write!(f, "invalid order {}", order),
            Error::DoubleRelease(mfn) => write!(f, "frame {:#x} released twice", mfn),
            Error::OrderMismatch {
                mfn,
                expected,
                found,
            } => write!(
                f,
                "frame {:#x} released with order {} but has order {}",
                mfn, expected, found
            ),
            Error::Overlap(mfn) => write!(f, "frame {:#x} is already tracked", mfn),
            Error::DescriptorPage(mfn) => {
                write!(f, "frame {:#x} hosts frame descriptors", mfn)
            }
            Error::InvalidRegion => write!(f, "invalid memory region"),
            Error::RegionFull => write!(f, "memory region map is full"),
            Error::MapFailed(mfn) => write!(f, "failed to map frame {:#x}", mfn),
            Error::NotInitialized => write!(f, "frame manager is not initialized"),
            Error::AlreadyInitialized => write!(f, "frame manager is already initialized"),
        }
    }
}
