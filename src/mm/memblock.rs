//! Memblock describes the physical memory handed over by the boot code.
//!
//! It is a pair of sorted, fixed-capacity region lists: `memory` for every
//! physically present range and `reserved` for ranges inside them that must
//! never reach the frame allocator (kernel image, boot structures, ...).
//! It needs no heap, so it can be filled before the allocator exists.

use super::{Error, Mfn, PhysicalAddr, Result};

#[derive(Debug)]
pub struct MemBlock<const N: usize, const M: usize> {
    memory: MemBlockType<N>,
    reserved: MemBlockType<M>,
}

#[derive(Debug)]
pub(crate) struct MemBlockType<const N: usize> {
    len: usize,
    region: [MemBlockRegion; N],
}

impl<const N: usize> MemBlockType<N> {
    pub(crate) const fn new() -> Self {
        Self {
            len: 0,
            region: [MemBlockRegion::EMPTY; N],
        }
    }

    pub(crate) fn regions(&self) -> &[MemBlockRegion] {
        &self.region[0..self.len]
    }

    fn search(&self, base: PhysicalAddr) -> core::result::Result<usize, usize> {
        self.regions().binary_search_by(|m| m.base.cmp(&base))
    }

    fn insert(&mut self, region: MemBlockRegion, pos: usize) -> Result<()> {
        if self.len == N {
            return Err(Error::RegionFull);
        }

        self.region.as_mut_slice().copy_within(pos..self.len, pos + 1);
        self.region[pos] = region;
        self.len += 1;
        Ok(())
    }

    /// Adds a region, keeping the list sorted. Overlaps are rejected.
    pub(crate) fn add(&mut self, base: PhysicalAddr, size: usize) -> Result<()> {
        if size == 0 || base.0.checked_add(size).is_none() {
            return Err(Error::InvalidRegion);
        }
        let region = MemBlockRegion { base, size };

        match self.search(base) {
            Ok(_) => Err(Error::InvalidRegion),
            Err(pos) => {
                // check prev
                if pos != 0 && self.region[pos - 1].end() > base {
                    return Err(Error::InvalidRegion);
                }

                // check next
                if pos < self.len && self.region[pos].base < region.end() {
                    return Err(Error::InvalidRegion);
                }

                self.insert(region, pos)
            }
        }
    }

    fn region_of(&self, addr: PhysicalAddr) -> Option<&MemBlockRegion> {
        let pos = match self.search(addr) {
            Ok(pos) => pos,
            Err(0) => return None,
            Err(pos) => pos - 1,
        };
        Some(&self.region[pos]).filter(|region| region.contains(addr))
    }

    pub(crate) fn contains(&self, addr: PhysicalAddr) -> bool {
        self.region_of(addr).is_some()
    }

    /// Whether `first..=last` lies inside a single region.
    pub(crate) fn contains_range(&self, first: PhysicalAddr, last: PhysicalAddr) -> bool {
        first <= last
            && self
                .region_of(first)
                .map_or(false, |region| region.contains(last))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemBlockRegion {
    pub base: PhysicalAddr,
    pub size: usize,
}

impl MemBlockRegion {
    const EMPTY: MemBlockRegion = MemBlockRegion {
        base: PhysicalAddr::new(0),
        size: 0,
    };

    pub fn end(&self) -> PhysicalAddr {
        self.base + self.size
    }

    pub fn contains(&self, addr: PhysicalAddr) -> bool {
        addr >= self.base && addr < self.end()
    }
}

impl<const N: usize, const M: usize> MemBlock<N, M> {
    pub const fn new() -> Self {
        Self {
            memory: MemBlockType::new(),
            reserved: MemBlockType::new(),
        }
    }

    /// Add block to memory region.
    pub fn add(&mut self, base: PhysicalAddr, size: usize) -> Result<()> {
        self.memory.add(base, size)
    }

    /// Add block to reserved region.
    pub fn reserve(&mut self, base: PhysicalAddr, size: usize) -> Result<()> {
        self.reserved.add(base, size)
    }

    pub fn memory(&self) -> &[MemBlockRegion] {
        self.memory.regions()
    }

    pub fn reserved(&self) -> &[MemBlockRegion] {
        self.reserved.regions()
    }

    /// Whether `addr` is backed by physical memory, reserved or not.
    pub fn has_memory_range(&self, addr: PhysicalAddr) -> bool {
        addr != PhysicalAddr::INVALID && self.memory.contains(addr)
    }

    /// Frame ranges `[start, end)` that are present and not reserved, in
    /// ascending order.
    ///
    /// Partial pages at either edge of a range are dropped.
    pub fn free_ranges(&self) -> FreeRanges<'_> {
        FreeRanges {
            memory: self.memory(),
            reserved: self.reserved(),
            cursor: None,
        }
    }
}

impl<const N: usize, const M: usize> Default for MemBlock<N, M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator returned by [`MemBlock::free_ranges`].
#[derive(Clone)]
pub struct FreeRanges<'a> {
    memory: &'a [MemBlockRegion],
    reserved: &'a [MemBlockRegion],
    /// Where scanning resumes inside `memory[0]`.
    cursor: Option<PhysicalAddr>,
}

impl Iterator for FreeRanges<'_> {
    type Item = (Mfn, Mfn);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let m = self.memory.first()?;
            let start = self.cursor.unwrap_or(m.base);
            let end = m.end();

            let hole = self
                .reserved
                .iter()
                .find(|r| r.end() > start && r.base < end);
            let stop = match hole {
                Some(r) => {
                    self.cursor = Some(r.end());
                    r.base
                }
                None => {
                    self.memory = &self.memory[1..];
                    self.cursor = None;
                    end
                }
            };

            let first = start.next_page_frame();
            let last = stop.page_frame();
            if start < stop && first < last {
                return Some((first, last));
            }
        }
    }
}
