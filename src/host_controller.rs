// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use bitflags::bitflags;
use usb_util::{EndpointDirection, Speed, TransferStatus};

use crate::command_pool::Command;
use crate::error::{Error, Result};
use crate::isoch::IsochEndpoint;

bitflags! {
    /// Properties of a high speed hub reported with `HubCommand::AddHub`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct HubFlags: u32 {
        /// The hub has one transaction translator per port.
        const MULTI_TT = 0x0001;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HubCommand {
    AddHub,
    RemoveHub,
}

/// Everything a backend needs to set up an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointSpec {
    pub address: u8,
    pub endpoint: u8,
    pub direction: EndpointDirection,
    pub speed: Speed,
    pub max_packet_size: u16,
    /// Polling interval. Raw bInterval for high speed isochronous endpoints, 1 for full speed
    /// ones.
    pub interval: u8,
    /// Hub and port whose transaction translator serves this endpoint, 0 if none.
    pub high_speed_hub: u8,
    pub high_speed_port: u8,
}

/// Host controller interface is the hardware specific part of a controller. All calls are
/// made with the controller's command gate held.
pub trait HostControllerInterface: Send {
    /// Set up a control endpoint.
    fn create_control_endpoint(&mut self, spec: &EndpointSpec) -> Result<()>;
    /// Set up a bulk endpoint.
    fn create_bulk_endpoint(&mut self, spec: &EndpointSpec) -> Result<()>;
    /// Set up an interrupt endpoint.
    fn create_interrupt_endpoint(&mut self, spec: &EndpointSpec) -> Result<()>;
    /// Set up an isochronous endpoint.
    fn create_isoch_endpoint(&mut self, spec: &EndpointSpec) -> Result<()>;
    /// Tear down an endpoint.
    fn delete_endpoint(&mut self, address: u8, endpoint: u8, direction: EndpointDirection)
        -> Result<()>;
    /// Clear a halted endpoint. None clears both directions.
    fn clear_endpoint_stall(
        &mut self,
        address: u8,
        endpoint: u8,
        direction: Option<EndpointDirection>,
    ) -> Result<()>;
    /// Start a control, bulk or interrupt command. The backend owns the command until it hands
    /// it back through `UsbController::complete_transfer`. On failure the command is returned
    /// untouched.
    fn submit_transfer(&mut self, command: Command) -> std::result::Result<(), (Error, Command)>;
    /// Move descriptors from the endpoint's to-do list onto the hardware schedule, with
    /// `dequeue_to_do` and `mark_scheduled`.
    fn add_isoch_frames_to_schedule(&mut self, endpoint: &mut IsochEndpoint);

    /// Unlink every scheduled descriptor of `endpoint` from the hardware and retire it.
    fn abort_isoch_endpoint(&mut self, endpoint: &mut IsochEndpoint) {
        retire_scheduled_as_aborted(endpoint);
    }
    /// Tell the controller about a high speed hub coming or going.
    fn hub_maintenance(
        &mut self,
        _hub: u8,
        _port: u8,
        _command: HubCommand,
        _flags: HubFlags,
    ) -> Result<()> {
        Err(Error::Unsupported)
    }
    /// Put a root hub port into a usb 2.0 test mode.
    fn set_test_mode(&mut self, _mode: u32, _port: u32) -> Result<()> {
        Err(Error::Unsupported)
    }
    /// Current bus micro frame.
    fn micro_frame_number(&self) -> u64 {
        0
    }
    /// Limit how long the system may stall bus master access, in nanoseconds. 0 lifts it.
    fn require_max_bus_stall(&mut self, _ns: u32) {}
}

/// Retire the scheduled descriptors of `endpoint` in frame order with an Aborted status.
pub fn retire_scheduled_as_aborted(endpoint: &mut IsochEndpoint) {
    for id in endpoint.scheduled_ids() {
        if let Err(e) = endpoint.complete_scheduled(id, TransferStatus::Aborted) {
            error!(
                "isoch endpoint {:?}: cannot retire descriptor {:?}: {}",
                endpoint.key(),
                id,
                e
            );
        }
    }
}
