//! Synchronization

mod spin;

pub use spin::*;
