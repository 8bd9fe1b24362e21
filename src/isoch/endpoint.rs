// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per endpoint isochronous state and the queue engine moving transfer descriptors between
//! the to-do, scheduled, done and deferred stages.
//!
//! A descriptor goes ToDo -> Scheduled -> Done or Deferred -> dispatched. Deferred
//! descriptors finished out of frame order; they move to done once a descriptor with a higher
//! frame number reaches done, or when the endpoint runs out of scheduled and to-do work.
//!
//! Nothing in the queue engine logs, backends may call it with preemption held off. Repairs
//! and corruption are counted and reported later from gated code.

use usb_util::{EndpointDirection, TransferStatus};

use super::frame_list::{FrameList, IsochCallback, IsochCompletion};
use super::td_queue::{TdArena, TdId, TdQueue};
use crate::dma_command::MemoryDescriptor;
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TdState {
    ToDo,
    /// Taken off a queue by the engine and not yet placed anywhere else.
    Unlinked,
    Scheduled,
    Done,
    Deferred,
}

/// One frame of an isochronous request.
pub struct IsochTransferDescriptor {
    frame_number: u64,
    frame_list: FrameList,
    frame_index: usize,
    buffer: Option<MemoryDescriptor>,
    buffer_offset: usize,
    completion: IsochCompletion,
    status: TransferStatus,
    state: TdState,
}

impl IsochTransferDescriptor {
    pub fn new(
        frame_number: u64,
        frame_list: FrameList,
        frame_index: usize,
        completion: IsochCompletion,
    ) -> IsochTransferDescriptor {
        IsochTransferDescriptor {
            frame_number,
            frame_list,
            frame_index,
            buffer: None,
            buffer_offset: 0,
            completion,
            status: TransferStatus::Success,
            state: TdState::Unlinked,
        }
    }

    /// Attach the part of the request buffer this frame transfers, starting at `offset`.
    pub fn with_buffer(mut self, buffer: MemoryDescriptor, offset: usize) -> Self {
        self.buffer = Some(buffer);
        self.buffer_offset = offset;
        self
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn frame_list(&self) -> &FrameList {
        &self.frame_list
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn buffer(&self) -> Option<&MemoryDescriptor> {
        self.buffer.as_ref()
    }

    pub fn buffer_offset(&self) -> usize {
        self.buffer_offset
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn state(&self) -> TdState {
        self.state
    }

    pub fn has_completion(&self) -> bool {
        self.completion.is_armed()
    }

    /// Record the result of this descriptor's frame in the client's frame list.
    pub fn record_frame(&mut self, act_count: u16, status: TransferStatus) {
        self.status = status;
        self.frame_list.update(self.frame_index, act_count, status);
    }

    pub(crate) fn take_completion(&mut self) -> Option<IsochCallback> {
        self.completion.take()
    }
}

/// Identifies an isochronous endpoint on the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IsochEndpointKey {
    pub function_address: u8,
    pub endpoint_number: u8,
    pub direction: EndpointDirection,
}

/// Which queue to look at in `IsochEndpoint::queued_frames`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsochQueue {
    ToDo,
    Done,
    Deferred,
}

pub struct IsochEndpoint {
    key: IsochEndpointKey,
    arena: TdArena,
    to_do: TdQueue,
    done: TdQueue,
    deferred: TdQueue,
    active_tds: u32,
    on_to_do_list: u32,
    on_done_queue: u32,
    deferred_tds: u32,
    scheduled_tds: u32,
    accumulated_status: TransferStatus,
    max_packet_size: u32,
    interval: u8,
    pipe_open: bool,
    repairs: u32,
    corruptions: u32,
}

fn decrement(counter: &mut u32) -> bool {
    match counter.checked_sub(1) {
        Some(v) => {
            *counter = v;
            true
        }
        None => false,
    }
}

impl IsochEndpoint {
    pub(crate) fn new(key: IsochEndpointKey) -> IsochEndpoint {
        IsochEndpoint {
            key,
            arena: TdArena::default(),
            to_do: TdQueue::default(),
            done: TdQueue::default(),
            deferred: TdQueue::default(),
            active_tds: 0,
            on_to_do_list: 0,
            on_done_queue: 0,
            deferred_tds: 0,
            scheduled_tds: 0,
            accumulated_status: TransferStatus::Success,
            max_packet_size: 0,
            interval: 1,
            pipe_open: false,
            repairs: 0,
            corruptions: 0,
        }
    }

    /// Return the endpoint to the state `new` produces, for reuse from the free list.
    pub(crate) fn init(&mut self, key: IsochEndpointKey) {
        *self = IsochEndpoint::new(key);
    }

    pub fn key(&self) -> IsochEndpointKey {
        self.key
    }

    pub fn function_address(&self) -> u8 {
        self.key.function_address
    }

    pub fn endpoint_number(&self) -> u8 {
        self.key.endpoint_number
    }

    pub fn direction(&self) -> EndpointDirection {
        self.key.direction
    }

    pub fn max_packet_size(&self) -> u32 {
        self.max_packet_size
    }

    pub fn interval(&self) -> u8 {
        self.interval
    }

    pub(crate) fn open(&mut self, max_packet_size: u32, interval: u8) {
        self.max_packet_size = max_packet_size;
        self.interval = interval;
        self.pipe_open = true;
    }

    pub(crate) fn close(&mut self) {
        self.pipe_open = false;
    }

    pub fn pipe_open(&self) -> bool {
        self.pipe_open
    }

    pub fn accumulated_status(&self) -> TransferStatus {
        self.accumulated_status
    }

    /// Fold a descriptor status into the accumulated status. Aborted stays until reset.
    pub fn record_status(&mut self, status: TransferStatus) {
        if status == TransferStatus::Success || self.accumulated_status == TransferStatus::Aborted
        {
            return;
        }
        self.accumulated_status = status;
    }

    /// Clear the accumulated status, including a latched abort.
    pub fn reset_accumulated_status(&mut self) {
        self.accumulated_status = TransferStatus::Success;
    }

    /// Clear the accumulated status after a completion was delivered. A latched abort stays.
    pub(crate) fn clear_delivered_status(&mut self) {
        if self.accumulated_status != TransferStatus::Aborted {
            self.accumulated_status = TransferStatus::Success;
        }
    }

    pub(crate) fn set_aborted(&mut self) {
        self.accumulated_status = TransferStatus::Aborted;
    }

    pub fn active_tds(&self) -> u32 {
        self.active_tds
    }

    pub fn on_to_do_list(&self) -> u32 {
        self.on_to_do_list
    }

    pub fn on_done_queue(&self) -> u32 {
        self.on_done_queue
    }

    pub fn deferred_tds(&self) -> u32 {
        self.deferred_tds
    }

    pub fn scheduled_tds(&self) -> u32 {
        self.scheduled_tds
    }

    /// Every live descriptor is on exactly one of the four stages.
    pub fn accounting_is_consistent(&self) -> bool {
        self.active_tds
            == self.on_to_do_list + self.scheduled_tds + self.on_done_queue + self.deferred_tds
            && self.active_tds as usize == self.arena.len()
    }

    pub fn has_live_tds(&self) -> bool {
        self.active_tds != 0 || self.arena.len() != 0
    }

    pub fn td(&self, id: TdId) -> Option<&IsochTransferDescriptor> {
        self.arena.get(id)
    }

    pub fn td_mut(&mut self, id: TdId) -> Option<&mut IsochTransferDescriptor> {
        self.arena.get_mut(id)
    }

    /// Scheduled descriptors in ascending frame order.
    pub fn scheduled_ids(&self) -> Vec<TdId> {
        let mut scheduled: Vec<(u64, TdId)> = self
            .arena
            .iter()
            .filter(|(_, td)| td.state == TdState::Scheduled)
            .map(|(id, td)| (td.frame_number, id))
            .collect();
        scheduled.sort_by_key(|(frame, _)| *frame);
        scheduled.into_iter().map(|(_, id)| id).collect()
    }

    /// Frame numbers on `queue`, head first.
    pub fn queued_frames(&self, queue: IsochQueue) -> Vec<u64> {
        let queue = match queue {
            IsochQueue::ToDo => &self.to_do,
            IsochQueue::Done => &self.done,
            IsochQueue::Deferred => &self.deferred,
        };
        queue
            .ids(&self.arena)
            .into_iter()
            .filter_map(|id| self.arena.get(id).map(|td| td.frame_number))
            .collect()
    }

    /// Returns and clears the number of queue repairs made since the last call.
    pub(crate) fn take_repairs(&mut self) -> u32 {
        std::mem::replace(&mut self.repairs, 0)
    }

    /// Returns and clears the number of inconsistencies found since the last call.
    pub(crate) fn take_corruptions(&mut self) -> u32 {
        std::mem::replace(&mut self.corruptions, 0)
    }

    fn note_corruption(&mut self) {
        self.corruptions += 1;
        self.record_status(TransferStatus::Error);
    }

    fn set_state(&mut self, id: TdId, state: TdState) -> bool {
        match self.arena.get_mut(id) {
            Some(td) => {
                td.state = state;
                true
            }
            None => false,
        }
    }

    /// Queue a new descriptor for scheduling.
    pub fn enqueue_to_do(&mut self, mut td: IsochTransferDescriptor) -> TdId {
        td.state = TdState::ToDo;
        let id = self.arena.insert(td);
        self.to_do.push_back(&mut self.arena, id);
        self.on_to_do_list += 1;
        self.active_tds += 1;
        id
    }

    /// Take the oldest descriptor waiting to be scheduled.
    pub fn dequeue_to_do(&mut self) -> Option<TdId> {
        let id = self.to_do.pop_front(&mut self.arena)?;
        if !decrement(&mut self.on_to_do_list) {
            self.note_corruption();
        }
        self.set_state(id, TdState::Unlinked);
        Some(id)
    }

    /// The backend placed `id`, taken from the to-do list, on the hardware schedule.
    pub fn mark_scheduled(&mut self, id: TdId) -> Result<()> {
        match self.arena.get_mut(id) {
            Some(td) if td.state == TdState::Unlinked => td.state = TdState::Scheduled,
            _ => return Err(Error::BadArgument),
        }
        self.scheduled_tds += 1;
        Ok(())
    }

    /// The hardware finished the scheduled descriptor `id`. It goes to done, unless a
    /// descriptor for an earlier frame is still scheduled, in which case it is deferred.
    pub fn complete_scheduled(&mut self, id: TdId, status: TransferStatus) -> Result<TdState> {
        let frame_number = match self.arena.get_mut(id) {
            Some(td) if td.state == TdState::Scheduled => {
                td.status = status;
                td.state = TdState::Unlinked;
                td.frame_number
            }
            _ => return Err(Error::BadArgument),
        };
        if !decrement(&mut self.scheduled_tds) {
            self.note_corruption();
        }
        self.record_status(status);
        let earlier_scheduled = self
            .arena
            .iter()
            .any(|(_, td)| td.state == TdState::Scheduled && td.frame_number < frame_number);
        if earlier_scheduled {
            self.enqueue_deferred(id);
            Ok(TdState::Deferred)
        } else {
            self.enqueue_done(id, true);
            Ok(TdState::Done)
        }
    }

    fn link_done(&mut self, id: TdId) {
        if !self.set_state(id, TdState::Done) {
            self.note_corruption();
            return;
        }
        self.done.push_back(&mut self.arena, id);
        self.on_done_queue += 1;
    }

    /// Put `id` on the done queue. With `check_deferred`, deferred descriptors for lower frame
    /// numbers go first, and once nothing is scheduled or waiting, every deferred descriptor
    /// is flushed behind it.
    pub fn enqueue_done(&mut self, id: TdId, check_deferred: bool) {
        if self.done.repair_tail(&self.arena) {
            self.repairs += 1;
        }
        let frame_number = match self.arena.get(id) {
            Some(td) => td.frame_number,
            None => {
                self.note_corruption();
                return;
            }
        };
        if check_deferred {
            while let Some(head) = self.deferred.front() {
                match self.arena.get(head) {
                    Some(td) if td.frame_number >= frame_number => break,
                    _ => {}
                }
                match self.dequeue_deferred() {
                    Some(deferred) => self.link_done(deferred),
                    None => break,
                }
            }
        }
        self.link_done(id);
        // End of stream: nothing else will arrive to release what is still deferred.
        if check_deferred && self.scheduled_tds == 0 && self.to_do.is_empty() {
            while let Some(deferred) = self.dequeue_deferred() {
                self.link_done(deferred);
            }
        }
    }

    /// Take the oldest finished descriptor off the done queue, ready for dispatch.
    pub fn dequeue_done(&mut self) -> Option<IsochTransferDescriptor> {
        loop {
            let id = self.done.pop_front(&mut self.arena)?;
            if !decrement(&mut self.on_done_queue) {
                self.note_corruption();
            }
            if !decrement(&mut self.active_tds) {
                self.note_corruption();
            }
            match self.arena.remove(id) {
                Some(td) => return Some(td),
                None => self.note_corruption(),
            }
        }
    }

    /// Hold `id` back until earlier frames have finished.
    pub fn enqueue_deferred(&mut self, id: TdId) {
        if !self.set_state(id, TdState::Deferred) {
            self.note_corruption();
            return;
        }
        self.deferred.push_back(&mut self.arena, id);
        self.deferred_tds += 1;
    }

    pub fn dequeue_deferred(&mut self) -> Option<TdId> {
        let id = self.deferred.pop_front(&mut self.arena)?;
        if !decrement(&mut self.deferred_tds) {
            self.note_corruption();
        }
        self.set_state(id, TdState::Unlinked);
        Some(id)
    }

    /// Latch Aborted and move everything not on the hardware schedule to done. Deferred
    /// descriptors go before the to-do list, which holds later frames.
    pub(crate) fn abort_pending(&mut self) {
        self.set_aborted();
        while let Some(id) = self.dequeue_deferred() {
            self.link_done(id);
        }
        while let Some(id) = self.dequeue_to_do() {
            if let Some(td) = self.arena.get_mut(id) {
                td.status = TransferStatus::Aborted;
            }
            self.link_done(id);
        }
    }

    #[cfg(test)]
    pub(crate) fn lose_done_tail(&mut self) {
        self.done.lose_tail();
    }

    #[cfg(test)]
    pub(crate) fn drop_descriptor(&mut self, id: TdId) {
        self.arena.remove(id);
    }
}
