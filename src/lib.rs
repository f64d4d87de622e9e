//! Physical memory manager for the test kernel.
//!
//! Owns every physical page frame and hands them out in power-of-two blocks
//! with a buddy allocator. The descriptor table that tracks the frames is
//! built out of frames taken from the allocator itself, so nothing here
//! needs a heap.

#![cfg_attr(not(test), no_std)]

pub mod mm;
pub mod sync;

pub use mm::buddy::{
    FrameManager, FramesCount, PagingBackend, Scope, DEFAULT_ORDERS, MAX_MEMORY_REGIONS,
};
pub use mm::memblock::{FreeRanges, MemBlock};
pub use mm::page::{display_frame, Frame, FrameFlags};
pub use mm::{Error, Mfn, Order, PhysicalAddr, Result};
pub use sync::{Spin, SpinGuard};
