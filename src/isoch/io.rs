// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::mem;

use usb_util::{EndpointDirection, TransferStatus};

use super::directory::IsochEndpointId;
use super::dispatcher::{return_isoch_done_queue, schedule_isoch_done};
use super::endpoint::{IsochEndpointKey, IsochQueue, IsochTransferDescriptor, TdState};
use super::frame_list::{FrameList, IsochCompletion};
use super::td_queue::TdId;
use crate::controller::{ControllerState, UsbController};
use crate::dma_command::MemoryDescriptor;
use crate::error::{Error, Result};

/// A client isochronous request: one descriptor per frame, starting at `frame_start`.
pub struct IsochRequest {
    pub address: u8,
    pub endpoint_number: u8,
    pub direction: EndpointDirection,
    pub frame_start: u64,
    pub frames: FrameList,
    /// Data for all frames back to back. Optional for backends that move data themselves.
    pub buffer: Option<MemoryDescriptor>,
}

impl IsochRequest {
    fn key(&self) -> IsochEndpointKey {
        IsochEndpointKey {
            function_address: self.address,
            endpoint_number: self.endpoint_number,
            direction: self.direction,
        }
    }
}

/// Point in time view of an isochronous endpoint's queues and counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IsochEndpointSnapshot {
    pub key: IsochEndpointKey,
    pub pipe_open: bool,
    pub accumulated_status: TransferStatus,
    pub active_tds: u32,
    pub on_to_do_list: u32,
    pub scheduled_tds: u32,
    pub on_done_queue: u32,
    pub deferred_tds: u32,
    /// Frame numbers per queue, head first.
    pub to_do: Vec<u64>,
    pub done: Vec<u64>,
    pub deferred: Vec<u64>,
    pub consistent: bool,
}

fn lookup(state: &ControllerState, key: IsochEndpointKey) -> Result<IsochEndpointId> {
    state
        .isoch_endpoints
        .find_endpoint(key)
        .ok_or(Error::EndpointNotFound)
}

fn key(address: u8, endpoint: u8, direction: EndpointDirection) -> IsochEndpointKey {
    IsochEndpointKey {
        function_address: address,
        endpoint_number: endpoint,
        direction,
    }
}

impl ControllerState {
    fn submit_isoch(
        &mut self,
        request: IsochRequest,
        mut completion: IsochCompletion,
    ) -> Result<IsochEndpointId> {
        let id = lookup(self, request.key())?;
        let armed = completion.is_armed();
        let ep = self
            .isoch_endpoints
            .get_mut(id)
            .ok_or(Error::EndpointNotFound)?;
        if !ep.pipe_open() {
            return Err(Error::NoDevice);
        }
        let frames = request.frames.to_vec();
        if frames.is_empty() {
            return Err(Error::BadArgument);
        }
        let last = frames.len() - 1;
        let mut offset = 0;
        for (index, frame) in frames.iter().enumerate() {
            // The request completes with its last frame.
            let frame_completion = if index == last {
                mem::take(&mut completion)
            } else {
                IsochCompletion::none()
            };
            let mut td = IsochTransferDescriptor::new(
                request.frame_start + index as u64,
                request.frames.clone(),
                index,
                frame_completion,
            );
            if let Some(buffer) = request.buffer.as_ref() {
                td = td.with_buffer(buffer.clone(), offset);
            }
            offset += frame.req_count as usize;
            ep.enqueue_to_do(td);
        }
        if armed {
            self.isoch_transfer_started();
        }
        let ep = self
            .isoch_endpoints
            .get_mut(id)
            .ok_or(Error::EndpointNotFound)?;
        self.hci.add_isoch_frames_to_schedule(ep);
        Ok(id)
    }
}

impl UsbController {
    /// Queue an isochronous request. `completion` runs on the worker thread with the
    /// endpoint's accumulated status once the last frame is done.
    pub fn isoc_io(&self, request: IsochRequest, completion: IsochCompletion) -> Result<()> {
        if request.frames.is_empty() {
            error!("{}: isoch request without frames", self.name());
            return Err(Error::BadArgument);
        }
        if let Some(buffer) = request.buffer.as_ref() {
            let needed = request.frames.total_req_count();
            if buffer.len() < needed {
                error!(
                    "{}: isoch buffer of {} bytes for {} requested",
                    self.name(),
                    buffer.len(),
                    needed
                );
                return Err(Error::BadArgument);
            }
        }
        self.shared()
            .gate
            .run_action(|state| state.submit_isoch(request, completion))??;
        Ok(())
    }

    pub fn find_isoch_endpoint(
        &self,
        address: u8,
        endpoint: u8,
        direction: EndpointDirection,
    ) -> Result<Option<IsochEndpointId>> {
        let key = key(address, endpoint, direction);
        self.shared()
            .gate
            .run_action(|state| state.isoch_endpoints.find_endpoint(key))
    }

    /// Ask the backend to move more of the to-do list onto the hardware schedule.
    pub fn kick_isoch_schedule(&self, id: IsochEndpointId) -> Result<()> {
        self.shared().gate.run_action(|state| {
            let ep = state
                .isoch_endpoints
                .get_mut(id)
                .ok_or(Error::EndpointNotFound)?;
            state.hci.add_isoch_frames_to_schedule(ep);
            Ok(())
        })?
    }

    /// The hardware retired descriptor `td` of endpoint `id` after moving `act_count` bytes.
    /// For backends reporting from outside the gate; from inside a backend call use
    /// `IsochEndpoint::complete_scheduled` directly.
    pub fn complete_isoch_td(
        &self,
        id: IsochEndpointId,
        td: TdId,
        act_count: u16,
        status: TransferStatus,
    ) -> Result<TdState> {
        let td_state = self.shared().gate.run_action(|state| {
            let ep = state
                .isoch_endpoints
                .get_mut(id)
                .ok_or(Error::EndpointNotFound)?;
            match ep.td_mut(td) {
                Some(desc) if desc.state() == TdState::Scheduled => {
                    desc.record_frame(act_count, status)
                }
                _ => return Err(Error::BadArgument),
            }
            let td_state = ep.complete_scheduled(td, status);
            state.report_queue_health(id);
            td_state
        })??;
        if td_state == TdState::Done {
            schedule_isoch_done(self.shared(), id);
        }
        Ok(td_state)
    }

    /// Abort everything queued on an isochronous endpoint. Each request completes with
    /// Aborted, and later ones do too until `reset_isoch_status`.
    pub fn abort_isoch_endpoint(
        &self,
        address: u8,
        endpoint: u8,
        direction: EndpointDirection,
    ) -> Result<()> {
        let key = key(address, endpoint, direction);
        let id = self.shared().gate.run_action(|state| {
            let id = lookup(state, key)?;
            if let Some(ep) = state.isoch_endpoints.get_mut(id) {
                ep.set_aborted();
                state.hci.abort_isoch_endpoint(ep);
                ep.abort_pending();
            }
            state.report_queue_health(id);
            Ok(id)
        })??;
        debug!("{}: aborted isoch endpoint {:?}", self.name(), key);
        schedule_isoch_done(self.shared(), id);
        Ok(())
    }

    /// Clear the accumulated status of an endpoint, including a latched abort.
    pub fn reset_isoch_status(
        &self,
        address: u8,
        endpoint: u8,
        direction: EndpointDirection,
    ) -> Result<()> {
        let key = key(address, endpoint, direction);
        self.shared().gate.run_action(|state| {
            let id = lookup(state, key)?;
            if let Some(ep) = state.isoch_endpoints.get_mut(id) {
                ep.reset_accumulated_status();
            }
            Ok(())
        })?
    }

    /// Deliver finished requests of `id` on the calling thread. Returns how many callbacks
    /// this call ran; 0 if another drain is already in progress.
    pub fn return_isoch_done_queue(&self, id: IsochEndpointId) -> usize {
        return_isoch_done_queue(self.shared(), id)
    }

    pub fn isoch_endpoint_snapshot(
        &self,
        address: u8,
        endpoint: u8,
        direction: EndpointDirection,
    ) -> Result<IsochEndpointSnapshot> {
        let key = key(address, endpoint, direction);
        self.shared().gate.run_action(|state| {
            let id = lookup(state, key)?;
            let ep = state
                .isoch_endpoints
                .get(id)
                .ok_or(Error::EndpointNotFound)?;
            Ok(IsochEndpointSnapshot {
                key,
                pipe_open: ep.pipe_open(),
                accumulated_status: ep.accumulated_status(),
                active_tds: ep.active_tds(),
                on_to_do_list: ep.on_to_do_list(),
                scheduled_tds: ep.scheduled_tds(),
                on_done_queue: ep.on_done_queue(),
                deferred_tds: ep.deferred_tds(),
                to_do: ep.queued_frames(IsochQueue::ToDo),
                done: ep.queued_frames(IsochQueue::Done),
                deferred: ep.queued_frames(IsochQueue::Deferred),
                consistent: ep.accounting_is_consistent(),
            })
        })?
    }

    /// Isochronous requests submitted with a completion that has not been delivered yet.
    pub fn active_isoch_transfers(&self) -> Result<i64> {
        self.shared()
            .gate
            .run_action(|state| state.active_isoch_transfers)
    }
}
