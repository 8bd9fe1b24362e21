// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Arc;
use std::thread;

use usb_util::{EndpointDirection, EndpointType, Speed};

use crate::async_job_queue::AsyncJobQueue;
use crate::command_gate::CommandGate;
use crate::command_pool::CommandPool;
use crate::config::ControllerConfig;
use crate::device_address_table::DeviceAddressTable;
use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::host_controller::{EndpointSpec, HostControllerInterface, HubCommand, HubFlags};
use crate::isoch::{schedule_isoch_done, DispatchState, IsochEndpointDirectory, IsochEndpointId,
                   IsochEndpointKey};
use crate::sync::Mutex;

/// Largest bInterval of a high speed isochronous endpoint, usb 2.0 table 9-13.
pub const MAX_HIGH_SPEED_ISOCH_INTERVAL: u8 = 16;

/// Endpoint as described by its endpoint descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub number: u8,
    pub direction: EndpointDirection,
    pub transfer_type: EndpointType,
    pub max_packet_size: u16,
    pub interval: u8,
}

/// State behind the command gate.
pub(crate) struct ControllerState {
    pub hci: Box<dyn HostControllerInterface>,
    pub command_pool: CommandPool,
    pub isoch_endpoints: IsochEndpointDirectory,
    pub device_table: DeviceAddressTable,
    pub active_isoch_transfers: i64,
    pub isoch_max_bus_stall: u32,
}

impl ControllerState {
    pub fn isoch_transfer_started(&mut self) {
        self.active_isoch_transfers += 1;
        if self.active_isoch_transfers == 1 && self.isoch_max_bus_stall != 0 {
            self.hci.require_max_bus_stall(self.isoch_max_bus_stall);
        }
    }

    pub fn isoch_transfer_finished(&mut self) {
        self.active_isoch_transfers -= 1;
        if self.active_isoch_transfers < 0 {
            error!(
                "active isoch transfer count went negative ({})",
                self.active_isoch_transfers
            );
        } else if self.active_isoch_transfers == 0 && self.isoch_max_bus_stall != 0 {
            self.hci.require_max_bus_stall(0);
        }
    }

    /// Log repairs and inconsistencies the queue engine recorded for `id`.
    pub fn report_queue_health(&mut self, id: IsochEndpointId) {
        if let Some(ep) = self.isoch_endpoints.get_mut(id) {
            let repairs = ep.take_repairs();
            if repairs != 0 {
                warn!(
                    "isoch endpoint {:?}: done queue tail repaired {} times",
                    ep.key(),
                    repairs
                );
            }
            let corruptions = ep.take_corruptions();
            if corruptions != 0 {
                error!(
                    "isoch endpoint {:?}: {} queue inconsistencies",
                    ep.key(),
                    corruptions
                );
            }
        }
    }

    fn do_create_ep(&mut self, address: u8, speed: Speed, endpoint: &Endpoint) -> Result<()> {
        let (high_speed_hub, high_speed_port) = self.device_table.high_speed_ancestor(address)?;
        let mut spec = EndpointSpec {
            address,
            endpoint: endpoint.number,
            direction: endpoint.direction,
            speed,
            max_packet_size: endpoint.max_packet_size,
            interval: endpoint.interval,
            high_speed_hub,
            high_speed_port,
        };
        debug!(
            "create {:?} endpoint {} for device {}, high speed hub {} port {}",
            endpoint.transfer_type, endpoint.number, address, high_speed_hub, high_speed_port
        );
        match endpoint.transfer_type {
            EndpointType::Control => self.hci.create_control_endpoint(&spec),
            EndpointType::Bulk => self.hci.create_bulk_endpoint(&spec),
            EndpointType::Interrupt => self.hci.create_interrupt_endpoint(&spec),
            EndpointType::Isochronous => {
                spec.interval = isoch_interval(speed, endpoint.interval)?;
                self.hci.create_isoch_endpoint(&spec)?;
                let key = IsochEndpointKey {
                    function_address: address,
                    endpoint_number: endpoint.number,
                    direction: endpoint.direction,
                };
                let id = match self.isoch_endpoints.find_endpoint(key) {
                    Some(id) => id,
                    None => self.isoch_endpoints.create_endpoint(key),
                };
                if let Some(ep) = self.isoch_endpoints.get_mut(id) {
                    ep.open(u32::from(endpoint.max_packet_size), spec.interval);
                }
                Ok(())
            }
        }
    }

    /// Returns the isochronous endpoint that still has to drain, and the backend's answer.
    fn do_close_pipe(
        &mut self,
        address: u8,
        endpoint: &Endpoint,
    ) -> (Option<IsochEndpointId>, Result<()>) {
        let mut isoch = None;
        if endpoint.transfer_type == EndpointType::Isochronous {
            let key = IsochEndpointKey {
                function_address: address,
                endpoint_number: endpoint.number,
                direction: endpoint.direction,
            };
            if let Some(id) = self.isoch_endpoints.find_endpoint(key) {
                if let Some(ep) = self.isoch_endpoints.get_mut(id) {
                    ep.set_aborted();
                    self.hci.abort_isoch_endpoint(ep);
                    ep.abort_pending();
                    ep.close();
                }
                self.report_queue_health(id);
                // A reopen of this pipe gets a fresh endpoint while this one drains.
                if let Err(e) = self.isoch_endpoints.retire_endpoint(id) {
                    error!("failed to retire isoch endpoint {:?}: {}", id, e);
                }
                isoch = Some(id);
            }
        }
        let deleted = self
            .hci
            .delete_endpoint(address, endpoint.number, endpoint.direction);
        (isoch, deleted)
    }
}

/// Normalized interval for an isochronous endpoint. High speed endpoints poll every
/// 2^(interval-1) micro frames; full speed ones every frame.
fn isoch_interval(speed: Speed, interval: u8) -> Result<u8> {
    if speed != Speed::High {
        return Ok(1);
    }
    if interval < 1 || interval > MAX_HIGH_SPEED_ISOCH_INTERVAL {
        error!(
            "high speed isoch endpoint with illegal interval {}",
            interval
        );
        return Err(Error::BadArgument);
    }
    debug!(
        "high speed isoch endpoint with interval {} [raw {}]",
        1u32 << (interval - 1),
        interval
    );
    Ok(interval)
}

/// Parts of a controller shared with the worker thread and device handles.
pub(crate) struct Shared {
    pub name: String,
    pub bus_number: u8,
    pub gate: CommandGate<ControllerState>,
    pub event_loop: Arc<EventLoop>,
    pub job_queue: Arc<AsyncJobQueue>,
    pub dispatch: Mutex<DispatchState>,
}

impl Shared {
    /// True where a blocking request could never see its completion.
    pub fn on_dispatch_thread(&self) -> bool {
        self.gate.on_thread() || self.event_loop.on_thread()
    }
}

/// UsbController is the core of a usb host controller driver. It admits transfers through
/// its command gate, hands them to the hardware backend, and delivers completions.
pub struct UsbController {
    shared: Arc<Shared>,
    event_loop_thread: Option<thread::JoinHandle<()>>,
}

impl UsbController {
    pub fn new(
        config: ControllerConfig,
        hci: Box<dyn HostControllerInterface>,
    ) -> Result<UsbController> {
        config.validate()?;
        let (event_loop, handle) = EventLoop::start(&config.name)?;
        let event_loop = Arc::new(event_loop);
        let job_queue = AsyncJobQueue::init(&event_loop);
        let state = ControllerState {
            hci,
            command_pool: CommandPool::new(&config),
            isoch_endpoints: IsochEndpointDirectory::new(),
            device_table: DeviceAddressTable::new(),
            active_isoch_transfers: 0,
            isoch_max_bus_stall: config.isoch_max_bus_stall,
        };
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            bus_number: config.bus_number,
            gate: CommandGate::new(state),
            event_loop,
            job_queue,
            dispatch: Mutex::new(DispatchState::default()),
        });
        debug!(
            "{}: controller started on bus {} with {} commands",
            config.name, config.bus_number, config.initial_commands
        );
        Ok(UsbController {
            shared,
            event_loop_thread: Some(handle),
        })
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn bus_number(&self) -> u8 {
        self.shared.bus_number
    }

    /// Create the backend endpoint for a pipe of the device at `address`.
    pub fn open_pipe(&self, address: u8, speed: Speed, endpoint: &Endpoint) -> Result<()> {
        self.shared
            .gate
            .run_action(|state| state.do_create_ep(address, speed, endpoint))?
    }

    /// Tear down a pipe. Queued isochronous work completes with Aborted.
    pub fn close_pipe(&self, address: u8, endpoint: &Endpoint) -> Result<()> {
        let (isoch, deleted) = self
            .shared
            .gate
            .run_action(|state| state.do_close_pipe(address, endpoint))?;
        if let Some(id) = isoch {
            schedule_isoch_done(&self.shared, id);
        }
        deleted
    }

    /// Record the transaction translator of the device about to be addressed at 0.
    pub fn configure_device_zero(&self, speed: Speed, hub: u8, port: u8) -> Result<()> {
        self.shared.gate.run_action(|state| {
            state
                .device_table
                .resolve_high_speed_ancestor(0, speed, hub, port)
        })?
    }

    pub fn high_speed_ancestor(&self, address: u8) -> Result<(u8, u8)> {
        self.shared
            .gate
            .run_action(|state| state.device_table.high_speed_ancestor(address))?
    }

    fn hs_hub_maintenance(&self, hub: u8, command: HubCommand, flags: HubFlags) -> Result<()> {
        let name = &self.shared.name;
        self.shared.gate.run_action(|state| {
            let multi_tt = flags.contains(HubFlags::MULTI_TT);
            state.device_table.set_multi_tt(hub, multi_tt)?;
            debug!(
                "{}: {:?} for hub {}, multi tt: {}",
                name, command, hub, multi_tt
            );
            state.hci.hub_maintenance(hub, 0, command, flags)
        })?
    }

    /// A high speed hub was configured at `hub`.
    pub fn add_hs_hub(&self, hub: u8, flags: HubFlags) -> Result<()> {
        self.hs_hub_maintenance(hub, HubCommand::AddHub, flags)
    }

    pub fn remove_hs_hub(&self, hub: u8) -> Result<()> {
        self.hs_hub_maintenance(hub, HubCommand::RemoveHub, HubFlags::empty())
    }

    pub fn set_test_mode(&self, mode: u32, port: u32) -> Result<()> {
        debug!("{}: set test mode {} on port {}", self.shared.name, mode, port);
        self.shared
            .gate
            .run_action(|state| state.hci.set_test_mode(mode, port))?
    }

    pub fn micro_frame_number(&self) -> Result<u64> {
        self.shared
            .gate
            .run_action(|state| state.hci.micro_frame_number())
    }

    pub fn clear_endpoint_stall(
        &self,
        address: u8,
        endpoint: u8,
        direction: Option<EndpointDirection>,
    ) -> Result<()> {
        self.shared
            .gate
            .run_action(|state| state.hci.clear_endpoint_stall(address, endpoint, direction))?
    }

    /// Returns (free, allocated) command counts.
    pub fn command_pool_counts(&self) -> Result<(usize, usize)> {
        self.shared.gate.run_action(|state| {
            (
                state.command_pool.free_count(),
                state.command_pool.allocated_count(),
            )
        })
    }
}

impl Drop for UsbController {
    fn drop(&mut self) {
        self.shared.event_loop.stop();
        if let Some(handle) = self.event_loop_thread.take() {
            // Dropped from one of our own callbacks; the loop exits once it returns.
            if self.shared.event_loop.on_thread() {
                return;
            }
            if handle.join().is_err() {
                error!("{}: event loop thread panicked", self.shared.name);
            }
        }
    }
}
