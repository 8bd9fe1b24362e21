// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use super::endpoint::IsochTransferDescriptor;

/// Index of a transfer descriptor in its endpoint's arena. Stays valid until the descriptor is
/// dispatched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TdId(usize);

struct TdSlot {
    td: Option<IsochTransferDescriptor>,
    next: Option<TdId>,
}

/// Storage for the descriptors of one endpoint. Queue links live next to each descriptor.
#[derive(Default)]
pub(crate) struct TdArena {
    slots: Vec<TdSlot>,
    free: Vec<usize>,
}

impl TdArena {
    pub fn insert(&mut self, td: IsochTransferDescriptor) -> TdId {
        let slot = TdSlot {
            td: Some(td),
            next: None,
        };
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = slot;
                TdId(index)
            }
            None => {
                self.slots.push(slot);
                TdId(self.slots.len() - 1)
            }
        }
    }

    pub fn remove(&mut self, id: TdId) -> Option<IsochTransferDescriptor> {
        let slot = self.slots.get_mut(id.0)?;
        let td = slot.td.take()?;
        slot.next = None;
        self.free.push(id.0);
        Some(td)
    }

    pub fn get(&self, id: TdId) -> Option<&IsochTransferDescriptor> {
        self.slots.get(id.0).and_then(|s| s.td.as_ref())
    }

    pub fn get_mut(&mut self, id: TdId) -> Option<&mut IsochTransferDescriptor> {
        self.slots.get_mut(id.0).and_then(|s| s.td.as_mut())
    }

    fn next(&self, id: TdId) -> Option<TdId> {
        self.slots.get(id.0).and_then(|s| s.next)
    }

    fn set_next(&mut self, id: TdId, next: Option<TdId>) {
        if let Some(slot) = self.slots.get_mut(id.0) {
            slot.next = next;
        }
    }

    /// Live descriptors, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (TdId, &IsochTransferDescriptor)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.td.as_ref().map(|td| (TdId(i), td)))
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

/// Singly linked FIFO threaded through the arena's links.
#[derive(Default)]
pub(crate) struct TdQueue {
    head: Option<TdId>,
    tail: Option<TdId>,
}

impl TdQueue {
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn front(&self) -> Option<TdId> {
        self.head
    }

    /// A queue with a head but no tail lost its tail pointer. Find the real tail by walking
    /// the chain. Returns true if a repair was made.
    pub fn repair_tail(&mut self, arena: &TdArena) -> bool {
        if self.head.is_none() || self.tail.is_some() {
            return false;
        }
        let mut last = self.head;
        let mut steps = 0;
        while let Some(id) = last.and_then(|id| arena.next(id)) {
            last = Some(id);
            steps += 1;
            if steps > arena.slots.len() {
                break;
            }
        }
        self.tail = last;
        true
    }

    pub fn push_back(&mut self, arena: &mut TdArena, id: TdId) {
        arena.set_next(id, None);
        match self.tail {
            Some(tail) => arena.set_next(tail, Some(id)),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
    }

    pub fn pop_front(&mut self, arena: &mut TdArena) -> Option<TdId> {
        let id = self.head?;
        if self.tail == Some(id) {
            self.head = None;
            self.tail = None;
        } else {
            self.head = arena.next(id);
            if self.head.is_none() {
                self.tail = None;
            }
        }
        arena.set_next(id, None);
        Some(id)
    }

    /// Ids from head to tail.
    pub fn ids(&self, arena: &TdArena) -> Vec<TdId> {
        let mut ids = Vec::new();
        let mut cur = self.head;
        while let Some(id) = cur {
            if ids.len() > arena.slots.len() {
                break;
            }
            ids.push(id);
            if Some(id) == self.tail {
                break;
            }
            cur = arena.next(id);
        }
        ids
    }

    pub fn clear(&mut self) {
        self.head = None;
        self.tail = None;
    }

    #[cfg(test)]
    pub fn lose_tail(&mut self) {
        self.tail = None;
    }
}
