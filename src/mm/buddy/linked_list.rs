//! Linked List
//!
//! Doubly linked free lists threaded through the descriptor table by slot
//! index. Being linked is what makes a descriptor free: `Link::listed` is
//! only ever changed here.
//!
//! Warning: this mod should only used by buddy system

use crate::mm::page::{FrameId, FrameSlot};
use crate::mm::table::FrameTable;
use crate::mm::Mfn;

#[derive(Clone, Copy, Debug)]
pub(crate) struct Link {
    prev: Option<FrameId>,
    next: Option<FrameId>,
    listed: bool,
}

impl Link {
    pub(crate) const fn new() -> Self {
        Link {
            prev: None,
            next: None,
            listed: false,
        }
    }

    pub(crate) fn is_listed(&self) -> bool {
        self.listed
    }
}

/// Free blocks of one order, kept sorted by mfn so that allocation always
/// hands out the lowest block first.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FreeList {
    head: Option<FrameId>,
    len: usize,
}

impl FreeList {
    pub(crate) const fn new() -> FreeList {
        FreeList { head: None, len: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Links `id` in mfn order. Costs a walk up to the insertion point.
    pub(crate) fn insert(&mut self, table: &mut FrameTable, id: FrameId) {
        let mfn = table[id].mfn();
        let mut prev = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            if table[c].mfn() > mfn {
                break;
            }
            prev = cur;
            cur = table[c].link.next;
        }

        let link = &mut table[id].link;
        debug_assert!(!link.listed);
        *link = Link {
            prev,
            next: cur,
            listed: true,
        };

        match prev {
            Some(p) => table[p].link.next = Some(id),
            None => self.head = Some(id),
        }
        if let Some(c) = cur {
            table[c].link.prev = Some(id);
        }
        self.len += 1;
    }

    pub(crate) fn remove(&mut self, table: &mut FrameTable, id: FrameId) {
        let Link { prev, next, listed } = table[id].link;
        debug_assert!(listed);

        match prev {
            Some(p) => table[p].link.next = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            table[n].link.prev = prev;
        }
        table[id].link = Link::new();
        self.len -= 1;
    }

    pub(crate) fn pop(&mut self, table: &mut FrameTable) -> Option<FrameId> {
        let id = self.head?;
        self.remove(table, id);
        Some(id)
    }

    pub(crate) fn iter<'a>(&self, table: &'a FrameTable) -> Iter<'a> {
        Iter {
            table,
            cur: self.head,
        }
    }

    /// The listed descriptor of the block at `mfn`. The walk stops at the
    /// first block above it.
    pub(crate) fn find_mfn(&self, table: &FrameTable, mfn: Mfn) -> Option<FrameId> {
        self.iter(table)
            .take_while(|(_, slot)| slot.mfn() <= mfn)
            .find(|(_, slot)| slot.mfn() == mfn)
            .map(|(id, _)| id)
    }

    /// The first listed descriptor accepted by `pred`.
    pub(crate) fn find<F>(&self, table: &FrameTable, mut pred: F) -> Option<FrameId>
    where
        F: FnMut(&FrameSlot) -> bool,
    {
        self.iter(table)
            .find(|&(_, slot)| pred(slot))
            .map(|(id, _)| id)
    }
}

pub(crate) struct Iter<'a> {
    table: &'a FrameTable,
    cur: Option<FrameId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (FrameId, &'a FrameSlot);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let slot = &self.table[id];
        self.cur = slot.link.next;
        Some((id, slot))
    }
}
