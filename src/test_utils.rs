// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fakes shared by the unit tests: a scriptable backend and a recording hub policy.

use std::mem;
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;

use usb_util::EndpointDirection;

use crate::command_pool::{Command, CommandId, Transaction};
use crate::config::ControllerConfig;
use crate::controller::UsbController;
use crate::device::{HubPolicy, PowerType};
use crate::error::{Error, Result};
use crate::host_controller::{retire_scheduled_as_aborted, EndpointSpec, HostControllerInterface,
                             HubCommand, HubFlags};
use crate::isoch::{IsochEndpoint, TdId};
use crate::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HciCall {
    CreateControl {
        address: u8,
        endpoint: u8,
    },
    CreateBulk {
        address: u8,
        endpoint: u8,
    },
    CreateInterrupt {
        address: u8,
        endpoint: u8,
        interval: u8,
    },
    CreateIsoch {
        address: u8,
        endpoint: u8,
        interval: u8,
        high_speed_hub: u8,
        high_speed_port: u8,
    },
    DeleteEndpoint {
        address: u8,
        endpoint: u8,
    },
    ClearStall {
        address: u8,
        endpoint: u8,
        direction: Option<EndpointDirection>,
    },
    Submit {
        id: CommandId,
        transaction: Transaction,
    },
    AbortIsoch {
        address: u8,
        endpoint: u8,
    },
    HubMaintenance {
        hub: u8,
        command: HubCommand,
        flags: u32,
    },
    TestMode {
        mode: u32,
        port: u32,
    },
    RequireMaxBusStall(u32),
}

#[derive(Default)]
struct FakeState {
    calls: Vec<HciCall>,
    pending: Vec<Command>,
    scheduled_isoch: Vec<TdId>,
    schedule_isoch: bool,
    fail_submit: Option<Error>,
    unsupported_test_mode: bool,
    micro_frame: u64,
}

/// Backend that records every call and keeps submitted commands until a test completes them.
pub struct FakeHci {
    state: Arc<Mutex<FakeState>>,
}

/// Test side view of a `FakeHci` owned by a controller.
#[derive(Clone)]
pub struct FakeHciHandle {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHci {
    pub fn new() -> (FakeHci, FakeHciHandle) {
        let state = Arc::new(Mutex::new(FakeState::default()));
        (
            FakeHci {
                state: state.clone(),
            },
            FakeHciHandle { state },
        )
    }

    fn record(&self, call: HciCall) {
        self.state.lock().calls.push(call);
    }
}

impl FakeHciHandle {
    /// Calls made so far, submits excluded.
    pub fn calls(&self) -> Vec<HciCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| match c {
                HciCall::Submit { .. } => false,
                _ => true,
            })
            .cloned()
            .collect()
    }

    pub fn submits(&self) -> Vec<HciCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| match c {
                HciCall::Submit { .. } => true,
                _ => false,
            })
            .cloned()
            .collect()
    }

    /// Take the commands submitted and not yet completed, oldest first.
    pub fn take_pending(&self) -> Vec<Command> {
        mem::replace(&mut self.state.lock().pending, Vec::new())
    }

    /// Descriptors placed on the fake hardware schedule, in scheduling order.
    pub fn scheduled_isoch(&self) -> Vec<TdId> {
        self.state.lock().scheduled_isoch.clone()
    }

    /// Whether `add_isoch_frames_to_schedule` schedules the whole to-do list.
    pub fn set_schedule_isoch(&self, schedule: bool) {
        self.state.lock().schedule_isoch = schedule;
    }

    pub fn set_fail_submit(&self, error: Option<Error>) {
        self.state.lock().fail_submit = error;
    }

    pub fn set_unsupported_test_mode(&self, unsupported: bool) {
        self.state.lock().unsupported_test_mode = unsupported;
    }

    pub fn set_micro_frame(&self, frame: u64) {
        self.state.lock().micro_frame = frame;
    }
}

impl HostControllerInterface for FakeHci {
    fn create_control_endpoint(&mut self, spec: &EndpointSpec) -> Result<()> {
        self.record(HciCall::CreateControl {
            address: spec.address,
            endpoint: spec.endpoint,
        });
        Ok(())
    }

    fn create_bulk_endpoint(&mut self, spec: &EndpointSpec) -> Result<()> {
        self.record(HciCall::CreateBulk {
            address: spec.address,
            endpoint: spec.endpoint,
        });
        Ok(())
    }

    fn create_interrupt_endpoint(&mut self, spec: &EndpointSpec) -> Result<()> {
        self.record(HciCall::CreateInterrupt {
            address: spec.address,
            endpoint: spec.endpoint,
            interval: spec.interval,
        });
        Ok(())
    }

    fn create_isoch_endpoint(&mut self, spec: &EndpointSpec) -> Result<()> {
        self.record(HciCall::CreateIsoch {
            address: spec.address,
            endpoint: spec.endpoint,
            interval: spec.interval,
            high_speed_hub: spec.high_speed_hub,
            high_speed_port: spec.high_speed_port,
        });
        Ok(())
    }

    fn delete_endpoint(
        &mut self,
        address: u8,
        endpoint: u8,
        _direction: EndpointDirection,
    ) -> Result<()> {
        self.record(HciCall::DeleteEndpoint { address, endpoint });
        Ok(())
    }

    fn clear_endpoint_stall(
        &mut self,
        address: u8,
        endpoint: u8,
        direction: Option<EndpointDirection>,
    ) -> Result<()> {
        self.record(HciCall::ClearStall {
            address,
            endpoint,
            direction,
        });
        Ok(())
    }

    fn submit_transfer(&mut self, command: Command) -> std::result::Result<(), (Error, Command)> {
        let mut state = self.state.lock();
        if let Some(e) = state.fail_submit {
            return Err((e, command));
        }
        state.calls.push(HciCall::Submit {
            id: command.id(),
            transaction: *command.transaction(),
        });
        state.pending.push(command);
        Ok(())
    }

    fn add_isoch_frames_to_schedule(&mut self, endpoint: &mut IsochEndpoint) {
        let mut state = self.state.lock();
        if !state.schedule_isoch {
            return;
        }
        while let Some(td) = endpoint.dequeue_to_do() {
            if endpoint.mark_scheduled(td).is_ok() {
                state.scheduled_isoch.push(td);
            }
        }
    }

    fn abort_isoch_endpoint(&mut self, endpoint: &mut IsochEndpoint) {
        self.record(HciCall::AbortIsoch {
            address: endpoint.function_address(),
            endpoint: endpoint.endpoint_number(),
        });
        retire_scheduled_as_aborted(endpoint);
    }

    fn hub_maintenance(
        &mut self,
        hub: u8,
        _port: u8,
        command: HubCommand,
        flags: HubFlags,
    ) -> Result<()> {
        self.record(HciCall::HubMaintenance {
            hub,
            command,
            flags: flags.bits(),
        });
        Ok(())
    }

    fn set_test_mode(&mut self, mode: u32, port: u32) -> Result<()> {
        if self.state.lock().unsupported_test_mode {
            return Err(Error::Unsupported);
        }
        self.record(HciCall::TestMode { mode, port });
        Ok(())
    }

    fn micro_frame_number(&self) -> u64 {
        self.state.lock().micro_frame
    }

    fn require_max_bus_stall(&mut self, ns: u32) {
        self.record(HciCall::RequireMaxBusStall(ns));
    }
}

pub fn test_controller_with(config: ControllerConfig) -> (UsbController, FakeHciHandle) {
    let (hci, handle) = FakeHci::new();
    let controller = UsbController::new(config, Box::new(hci)).unwrap();
    (controller, handle)
}

/// Controller named "test_usb" over a `FakeHci`, starting with `initial_commands` commands.
pub fn test_controller(initial_commands: usize) -> (UsbController, FakeHciHandle) {
    test_controller_with(ControllerConfig {
        name: "test_usb".to_string(),
        initial_commands,
        ..Default::default()
    })
}

/// Park the controller's worker thread until the returned sender fires.
pub fn hold_worker(controller: &UsbController) -> Sender<()> {
    let (release, hold) = channel::<()>();
    controller
        .shared()
        .job_queue
        .queue_job(move || {
            let _ = hold.recv();
        })
        .unwrap();
    release
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyCall {
    ResetPort(u8),
    SuspendPort(u8, bool),
    RequestPower(u8, PowerType, u32),
    ReturnPower(u8, PowerType, u32),
    PortInformation(u8),
}

type ResetHook = Box<dyn FnOnce() + Send>;

pub struct RecordingHubPolicy {
    calls: Mutex<Vec<PolicyCall>>,
    reset_result: Mutex<Result<()>>,
    suspend_result: Mutex<Result<()>>,
    power_grant: Mutex<u32>,
    return_power_result: Mutex<Result<()>>,
    port_information: Mutex<u32>,
    reset_hook: Mutex<Option<ResetHook>>,
}

impl RecordingHubPolicy {
    pub fn new() -> RecordingHubPolicy {
        RecordingHubPolicy {
            calls: Mutex::new(Vec::new()),
            reset_result: Mutex::new(Ok(())),
            suspend_result: Mutex::new(Ok(())),
            power_grant: Mutex::new(0),
            return_power_result: Mutex::new(Ok(())),
            port_information: Mutex::new(0),
            reset_hook: Mutex::new(None),
        }
    }

    /// Port calls, except port information queries.
    pub fn calls(&self) -> Vec<PolicyCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| match c {
                PolicyCall::PortInformation(_) => false,
                _ => true,
            })
            .cloned()
            .collect()
    }

    pub fn set_reset_result(&self, result: Result<()>) {
        *self.reset_result.lock() = result;
    }

    pub fn set_suspend_result(&self, result: Result<()>) {
        *self.suspend_result.lock() = result;
    }

    pub fn set_power_grant(&self, grant: u32) {
        *self.power_grant.lock() = grant;
    }

    pub fn set_return_power_result(&self, result: Result<()>) {
        *self.return_power_result.lock() = result;
    }

    pub fn set_port_information(&self, information: u32) {
        *self.port_information.lock() = information;
    }

    /// Run `hook` from inside the next reset_port call.
    pub fn on_next_reset(&self, hook: ResetHook) {
        *self.reset_hook.lock() = Some(hook);
    }
}

impl HubPolicy for RecordingHubPolicy {
    fn reset_port(&self, port: u8) -> Result<()> {
        self.calls.lock().push(PolicyCall::ResetPort(port));
        let hook = self.reset_hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        *self.reset_result.lock()
    }

    fn suspend_port(&self, port: u8, suspend: bool) -> Result<()> {
        self.calls.lock().push(PolicyCall::SuspendPort(port, suspend));
        *self.suspend_result.lock()
    }

    fn request_extra_power(&self, port: u8, power_type: PowerType, requested: u32) -> u32 {
        self.calls
            .lock()
            .push(PolicyCall::RequestPower(port, power_type, requested));
        std::cmp::min(requested, *self.power_grant.lock())
    }

    fn return_extra_power(&self, port: u8, power_type: PowerType, returned: u32) -> Result<()> {
        self.calls
            .lock()
            .push(PolicyCall::ReturnPower(port, power_type, returned));
        *self.return_power_result.lock()
    }

    fn get_port_information(&self, port: u8) -> Result<u32> {
        self.calls.lock().push(PolicyCall::PortInformation(port));
        Ok(*self.port_information.lock())
    }
}
