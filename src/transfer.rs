// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Control, bulk and interrupt transfers: admission, dispatch to the backend, and completion.

use std::sync::mpsc::channel;

use usb_util::{EndpointDirection, EndpointType, TransferStatus, UsbRequestSetup};

use crate::command_pool::{Command, CommandStage, Selector, Transaction, TransferCallback,
                          TransferCompletion};
use crate::controller::{ControllerState, Endpoint, UsbController};
use crate::dma_command::MemoryDescriptor;
use crate::error::{Error, Result};

/// bmRequestType of CLEAR_TT_BUFFER: host to device, class, other.
pub const CLEAR_TT_REQUEST_TYPE: u8 = 0x23;
pub const CLEAR_TT_BUFFER: u8 = 8;
pub const CLEAR_TT_NO_DATA_TIMEOUT: u32 = 5000;

/// How the caller learns about the end of a transfer.
pub enum Completion {
    /// Called with the status and the number of bytes moved.
    Async(TransferCallback),
    /// The call blocks until the transfer finishes.
    Sync,
}

impl Completion {
    pub fn new<F>(callback: F) -> Completion
    where
        F: FnOnce(TransferStatus, usize) + Send + 'static,
    {
        Completion::Async(Box::new(callback))
    }
}

/// A transfer on a control, bulk or interrupt pipe.
pub struct IoRequest {
    pub address: u8,
    pub endpoint: Endpoint,
    pub buffer: Option<MemoryDescriptor>,
    pub req_count: usize,
    pub no_data_timeout: u32,
    pub completion_timeout: u32,
    pub stream_id: u32,
}

impl IoRequest {
    pub fn new(
        address: u8,
        endpoint: Endpoint,
        buffer: Option<MemoryDescriptor>,
        req_count: usize,
    ) -> IoRequest {
        IoRequest {
            address,
            endpoint,
            buffer,
            req_count,
            no_data_timeout: 0,
            completion_timeout: 0,
            stream_id: 0,
        }
    }

    /// Timeouts in milliseconds. Only bulk pipes accept them.
    pub fn with_timeouts(mut self, no_data_timeout: u32, completion_timeout: u32) -> IoRequest {
        self.no_data_timeout = no_data_timeout;
        self.completion_timeout = completion_timeout;
        self
    }

    pub fn with_stream(mut self, stream_id: u32) -> IoRequest {
        self.stream_id = stream_id;
        self
    }
}

fn validate(selector: Selector, request: &IoRequest) -> Result<()> {
    let endpoint = &request.endpoint;
    let direction_ok = match selector {
        Selector::Read => endpoint.direction == EndpointDirection::DeviceToHost,
        Selector::Write => endpoint.direction == EndpointDirection::HostToDevice,
        Selector::DeviceRequest => endpoint.transfer_type == EndpointType::Control,
    };
    if !direction_ok {
        debug!(
            "{:?} on {:?} endpoint {} ({:?}) refused",
            selector, endpoint.direction, endpoint.number, endpoint.transfer_type
        );
        return Err(Error::BadArgument);
    }
    if endpoint.transfer_type == EndpointType::Isochronous {
        return Err(Error::BadArgument);
    }
    if request.req_count != 0 {
        match request.buffer.as_ref() {
            Some(buffer) if buffer.len() >= request.req_count => {}
            _ => {
                debug!(
                    "no buffer or buffer shorter than {} bytes",
                    request.req_count
                );
                return Err(Error::BadArgument);
            }
        }
    }
    if endpoint.transfer_type != EndpointType::Bulk
        && (request.no_data_timeout != 0
            || request.completion_timeout != 0
            || request.stream_id != 0)
    {
        debug!(
            "timeouts or streams on a {:?} pipe",
            endpoint.transfer_type
        );
        return Err(Error::BadArgument);
    }
    Ok(())
}

impl ControllerState {
    fn return_unbound(&mut self, mut command: Command) {
        let _ = command.unbind();
        self.command_pool.return_command(command);
    }

    /// Issue CLEAR_TT_BUFFER to the hub translating for `address`, so a transaction stuck in
    /// its translator is dropped. Runs inside the gate.
    pub(crate) fn clear_tt(
        &mut self,
        address: u8,
        endpoint: u8,
        direction: EndpointDirection,
    ) -> Result<()> {
        let (hub, port) = self.device_table.high_speed_ancestor(address)?;
        if hub == 0 {
            debug!("device {} has no transaction translator", address);
            return Ok(());
        }
        let mut value = u16::from(endpoint & 0xf) | (u16::from(address & 0x7f) << 4);
        if direction == EndpointDirection::DeviceToHost {
            value |= 1 << 15;
        }
        let index = if self.device_table.is_multi_tt(hub) {
            u16::from(port)
        } else {
            1
        };
        let setup = UsbRequestSetup::new(CLEAR_TT_REQUEST_TYPE, CLEAR_TT_BUFFER, value, index, 0);
        let mut command = self.command_pool.acquire()?;
        command.set_transaction(Transaction {
            selector: Selector::DeviceRequest,
            address: hub,
            endpoint: 0,
            direction: EndpointDirection::HostToDevice,
            transfer_type: EndpointType::Control,
            req_count: 0,
            no_data_timeout: CLEAR_TT_NO_DATA_TIMEOUT,
            completion_timeout: 0,
            stream_id: 0,
            request: Some(setup),
        });
        command.set_completion(TransferCompletion::ClearTt);
        debug!(
            "clear tt on hub {} for endpoint {} of device {}, wValue {:#06x}",
            hub, endpoint, address, value
        );
        match self.hci.submit_transfer(command) {
            Ok(()) => Ok(()),
            Err((e, command)) => {
                error!("clear tt on hub {} failed: {}", hub, e);
                self.return_unbound(command);
                Err(e)
            }
        }
    }

    fn clear_tt_complete(&mut self, mut command: Command, status: TransferStatus) -> Option<Command> {
        let hub = command.address();
        let kept = if command
            .stage()
            .pending_returns()
            .contains(CommandStage::SETUP_BACK)
        {
            debug!("clear tt setup on hub {} came back", hub);
            command.advance_stage(CommandStage::SETUP_BACK);
            Some(command)
        } else {
            self.return_unbound(command);
            None
        };
        if status != TransferStatus::Success && status != TransferStatus::TransactionReturned {
            if status == TransferStatus::NotResponding {
                debug!("clear tt: hub {} not responding, clearing its stall", hub);
            } else {
                error!(
                    "clear tt: error {:?} from hub {}, clearing its stall",
                    status, hub
                );
            }
            if let Err(e) = self.hci.clear_endpoint_stall(hub, 0, None) {
                warn!("failed to clear stall of hub {}: {}", hub, e);
            }
        }
        kept
    }
}

impl UsbController {
    /// Read from an IN pipe. Synchronous reads return the number of bytes received; async
    /// ones return 0 and report through their callback.
    pub fn read(&self, request: IoRequest, completion: Completion) -> Result<usize> {
        self.do_io(Selector::Read, request, None, completion)
    }

    /// Write to an OUT pipe.
    pub fn write(&self, request: IoRequest, completion: Completion) -> Result<usize> {
        self.do_io(Selector::Write, request, None, completion)
    }

    /// Send `setup` on a control pipe, with the data stage in the request's buffer.
    pub fn device_request(
        &self,
        setup: UsbRequestSetup,
        mut request: IoRequest,
        completion: Completion,
    ) -> Result<usize> {
        request.endpoint.direction = setup.direction();
        if usize::from(setup.length) < request.req_count {
            request.req_count = usize::from(setup.length);
        }
        self.do_io(Selector::DeviceRequest, request, Some(setup), completion)
    }

    fn do_io(
        &self,
        selector: Selector,
        request: IoRequest,
        setup: Option<UsbRequestSetup>,
        completion: Completion,
    ) -> Result<usize> {
        validate(selector, &request)?;
        let sync = match completion {
            Completion::Sync => true,
            Completion::Async(_) => false,
        };
        let shared = self.shared();
        if sync && shared.on_dispatch_thread() {
            error!(
                "{}: sync {:?} on the dispatch thread, use async",
                shared.name, selector
            );
            return Err(Error::SyncRequestOnDispatchThread);
        }

        let transaction = Transaction {
            selector,
            address: request.address,
            endpoint: request.endpoint.number,
            direction: request.endpoint.direction,
            transfer_type: request.endpoint.transfer_type,
            req_count: request.req_count,
            no_data_timeout: request.no_data_timeout,
            completion_timeout: request.completion_timeout,
            stream_id: request.stream_id,
            request: setup,
        };
        let buffer = if request.req_count != 0 {
            request.buffer
        } else {
            None
        };
        let name = &shared.name;
        // The dma binding is only touched inside the gate.
        let prepare = move |state: &mut ControllerState| -> Result<Command> {
            let mut command = state.command_pool.acquire()?;
            command.set_transaction(transaction);
            if let Some(buffer) = buffer {
                if let Err(e) = command.bind(buffer) {
                    error!("{}: failed to bind transfer buffer: {}", name, e);
                    state.return_unbound(command);
                    return Err(e);
                }
            }
            Ok(command)
        };
        let mut command = if sync {
            shared.gate.run_action_when(
                |state| state.command_pool.has_free() || state.command_pool.can_grow(),
                prepare,
            )??
        } else {
            shared.gate.run_action(prepare)??
        };

        let (waiter, completion) = match completion {
            Completion::Async(callback) => (None, TransferCompletion::Async(callback)),
            Completion::Sync => {
                let (sender, receiver) = channel();
                (Some(receiver), TransferCompletion::Sync(sender))
            }
        };
        command.set_completion(completion);

        shared.gate.run_action(|state| match state.hci.submit_transfer(command) {
            Ok(()) => Ok(()),
            Err((e, command)) => {
                debug!("submit of {:?} failed: {}", selector, e);
                state.return_unbound(command);
                Err(e)
            }
        })??;

        match waiter {
            None => Ok(0),
            Some(receiver) => {
                let (status, act_count) = receiver.recv().map_err(|_| {
                    error!("{}: sync transfer dropped without completion", shared.name);
                    Error::BadState
                })?;
                Error::from_status(status)?;
                Ok(act_count)
            }
        }
    }

    /// The backend finished `command` with `status` after moving `act_count` bytes. Must be
    /// called from outside the gate. Returns a clear tt command that has more stages to
    /// complete; the backend keeps it and completes it again later.
    pub fn complete_transfer(
        &self,
        mut command: Command,
        status: TransferStatus,
        act_count: usize,
    ) -> std::result::Result<Option<Command>, (Error, Command)> {
        let shared = self.shared();
        if shared.gate.on_thread() {
            error!("{}: transfer completed inside the gate", shared.name);
            return Err((Error::SyncRequestOnDispatchThread, command));
        }
        if command.is_clear_tt() {
            return match shared
                .gate
                .run_action(|state| state.clear_tt_complete(command, status))
            {
                Ok(kept) => Ok(kept),
                Err(e) => {
                    error!("{}: clear tt completion failed: {}", shared.name, e);
                    Ok(None)
                }
            };
        }
        let completion = command.take_completion();
        if let Err(e) = shared
            .gate
            .run_action(|state| state.return_unbound(command))
        {
            error!("{}: failed to return command: {}", shared.name, e);
        }
        if status == TransferStatus::NotResponding {
            debug!("{}: device not responding", shared.name);
        }
        match completion {
            Some(TransferCompletion::Async(callback)) => callback(status, act_count),
            Some(TransferCompletion::Sync(sender)) => {
                if sender.send((status, act_count)).is_err() {
                    warn!("{}: sync transfer waiter is gone", shared.name);
                }
            }
            Some(TransferCompletion::ClearTt) | None => {
                warn!("{}: completed transfer had no completion", shared.name)
            }
        }
        Ok(None)
    }

    /// Clear the transaction translator buffer for an endpoint of a low or full speed
    /// device behind a high speed hub.
    pub fn clear_tt(&self, address: u8, endpoint: u8, direction: EndpointDirection) -> Result<()> {
        self.shared()
            .gate
            .run_action(|state| state.clear_tt(address, endpoint, direction))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use usb_util::Speed;

    use crate::host_controller::HubFlags;
    use crate::test_utils::{test_controller, HciCall};

    fn bulk_in() -> Endpoint {
        Endpoint {
            number: 1,
            direction: EndpointDirection::DeviceToHost,
            transfer_type: EndpointType::Bulk,
            max_packet_size: 512,
            interval: 0,
        }
    }

    fn interrupt_out() -> Endpoint {
        Endpoint {
            number: 2,
            direction: EndpointDirection::HostToDevice,
            transfer_type: EndpointType::Interrupt,
            max_packet_size: 64,
            interval: 8,
        }
    }

    fn control() -> Endpoint {
        Endpoint {
            number: 0,
            direction: EndpointDirection::HostToDevice,
            transfer_type: EndpointType::Control,
            max_packet_size: 64,
            interval: 0,
        }
    }

    #[test]
    fn argument_errors_before_dispatch() {
        let (controller, hci) = test_controller(2);
        let buffer = MemoryDescriptor::contiguous(0x1000, 16);
        // Wrong direction.
        assert_eq!(
            controller.write(
                IoRequest::new(1, bulk_in(), Some(buffer.clone()), 16),
                Completion::new(|_, _| {})
            ),
            Err(Error::BadArgument)
        );
        // Buffer too short.
        assert_eq!(
            controller.read(
                IoRequest::new(1, bulk_in(), Some(buffer.clone()), 32),
                Completion::new(|_, _| {})
            ),
            Err(Error::BadArgument)
        );
        // Timeouts on a non bulk pipe.
        assert_eq!(
            controller.write(
                IoRequest::new(1, interrupt_out(), Some(buffer.clone()), 16).with_timeouts(10, 0),
                Completion::new(|_, _| {})
            ),
            Err(Error::BadArgument)
        );
        // Streams on a non bulk pipe.
        assert_eq!(
            controller.write(
                IoRequest::new(1, interrupt_out(), Some(buffer), 16).with_stream(3),
                Completion::new(|_, _| {})
            ),
            Err(Error::BadArgument)
        );
        assert!(hci.calls().is_empty());
        assert_eq!(controller.command_pool_counts(), Ok((2, 2)));
    }

    #[test]
    fn async_read_binds_and_completes() {
        let (controller, hci) = test_controller(2);
        let buffer = MemoryDescriptor::contiguous(0x2000, 64);
        let (sender, receiver) = std::sync::mpsc::channel();
        controller
            .read(
                IoRequest::new(7, bulk_in(), Some(buffer.clone()), 64)
                    .with_timeouts(100, 1000)
                    .with_stream(2),
                Completion::new(move |status, count| {
                    let _ = sender.send((status, count));
                }),
            )
            .unwrap();
        assert_eq!(controller.command_pool_counts(), Ok((1, 2)));
        let mut pending = hci.take_pending();
        assert_eq!(pending.len(), 1);
        let command = pending.remove(0);
        assert!(command.buffer().unwrap().same_buffer(&buffer));
        assert_eq!(command.transaction().stream_id, 2);
        assert_eq!(command.transaction().no_data_timeout, 100);
        command.buffer().unwrap().write_at(0, &[1, 2, 3]);
        assert!(controller
            .complete_transfer(command, TransferStatus::Success, 3)
            .unwrap()
            .is_none());
        assert_eq!(receiver.recv(), Ok((TransferStatus::Success, 3)));
        assert_eq!(&buffer.to_vec()[..3], &[1, 2, 3]);
        assert_eq!(controller.command_pool_counts(), Ok((2, 2)));
    }

    #[test]
    fn sync_write_waits_for_completion() {
        let (controller, hci) = test_controller(1);
        let controller = Arc::new(controller);
        let worker = {
            let controller = controller.clone();
            thread::spawn(move || {
                let buffer = MemoryDescriptor::with_bytes(0x3000, &[9; 8]).unwrap();
                controller.write(
                    IoRequest::new(3, interrupt_out(), Some(buffer), 8),
                    Completion::Sync,
                )
            })
        };
        let command = loop {
            if let Some(command) = hci.take_pending().pop() {
                break command;
            }
            thread::sleep(Duration::from_millis(5));
        };
        assert!(command.is_sync());
        controller
            .complete_transfer(command, TransferStatus::Success, 8)
            .unwrap();
        assert_eq!(worker.join().unwrap(), Ok(8));
    }

    #[test]
    fn sync_error_status_maps_to_error() {
        let (controller, hci) = test_controller(1);
        let controller = Arc::new(controller);
        let worker = {
            let controller = controller.clone();
            thread::spawn(move || {
                let buffer = MemoryDescriptor::contiguous(0x3000, 8);
                controller.read(
                    IoRequest::new(3, bulk_in(), Some(buffer), 8),
                    Completion::Sync,
                )
            })
        };
        let command = loop {
            if let Some(command) = hci.take_pending().pop() {
                break command;
            }
            thread::sleep(Duration::from_millis(5));
        };
        controller
            .complete_transfer(command, TransferStatus::NotResponding, 0)
            .unwrap();
        assert_eq!(worker.join().unwrap(), Err(Error::NotResponding));
    }

    #[test]
    fn sync_request_refused_on_dispatch_thread() {
        let (controller, _hci) = test_controller(1);
        let controller = Arc::new(controller);
        let (sender, receiver) = std::sync::mpsc::channel();
        let inner = controller.clone();
        controller
            .shared()
            .job_queue
            .queue_job(move || {
                let buffer = MemoryDescriptor::contiguous(0x3000, 8);
                let result = inner.read(
                    IoRequest::new(3, bulk_in(), Some(buffer), 8),
                    Completion::Sync,
                );
                let _ = sender.send(result);
            })
            .unwrap();
        assert_eq!(
            receiver.recv_timeout(Duration::from_secs(5)),
            Ok(Err(Error::SyncRequestOnDispatchThread))
        );
        assert_eq!(controller.command_pool_counts(), Ok((1, 1)));
    }

    #[test]
    fn pool_grows_from_zero() {
        let (controller, hci) = test_controller(0);
        controller
            .write(
                IoRequest::new(3, interrupt_out(), None, 0),
                Completion::new(|_, _| {}),
            )
            .unwrap();
        let (free, allocated) = controller.command_pool_counts().unwrap();
        assert_eq!(allocated, 50);
        assert_eq!(free, 49);
        assert_eq!(hci.take_pending().len(), 1);
    }

    #[test]
    fn sync_acquire_waits_for_returned_command() {
        let config = crate::config::ControllerConfig {
            initial_commands: 1,
            command_pool_increment: 1,
            max_commands: 1,
            ..Default::default()
        };
        let (controller, hci) = crate::test_utils::test_controller_with(config);
        controller
            .write(
                IoRequest::new(3, interrupt_out(), None, 0),
                Completion::new(|_, _| {}),
            )
            .unwrap();
        assert_eq!(
            controller.write(
                IoRequest::new(3, interrupt_out(), None, 0),
                Completion::new(|_, _| {})
            ),
            Err(Error::NoResources)
        );
        let controller = Arc::new(controller);
        let started = Arc::new(Barrier::new(2));
        let worker = {
            let controller = controller.clone();
            let started = started.clone();
            thread::spawn(move || {
                started.wait();
                controller.write(IoRequest::new(3, interrupt_out(), None, 0), Completion::Sync)
            })
        };
        started.wait();
        let first = hci.take_pending().pop().unwrap();
        controller
            .complete_transfer(first, TransferStatus::Success, 0)
            .unwrap();
        let second = loop {
            if let Some(command) = hci.take_pending().pop() {
                break command;
            }
            thread::sleep(Duration::from_millis(5));
        };
        controller
            .complete_transfer(second, TransferStatus::Success, 0)
            .unwrap();
        assert_eq!(worker.join().unwrap(), Ok(0));
    }

    #[test]
    fn submit_failure_returns_command() {
        let (controller, hci) = test_controller(1);
        hci.set_fail_submit(Some(Error::NoDevice));
        let buffer = MemoryDescriptor::contiguous(0x3000, 8);
        let (sender, receiver) = std::sync::mpsc::channel::<TransferStatus>();
        assert_eq!(
            controller.read(
                IoRequest::new(3, bulk_in(), Some(buffer), 8),
                Completion::new(move |status, _| {
                    let _ = sender.send(status);
                })
            ),
            Err(Error::NoDevice)
        );
        assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(controller.command_pool_counts(), Ok((1, 1)));
    }

    #[test]
    fn unreachable_buffer_returns_command() {
        let (controller, hci) = test_controller(1);
        // Past the 32 bit dma limit of the default config.
        let buffer = MemoryDescriptor::contiguous(0xffff_ff00, 0x200);
        assert_eq!(
            controller.read(
                IoRequest::new(3, bulk_in(), Some(buffer), 0x200),
                Completion::new(|_, _| {})
            ),
            Err(Error::NoResources)
        );
        assert!(hci.submits().is_empty());
        assert_eq!(controller.command_pool_counts(), Ok((1, 1)));
        let retry = MemoryDescriptor::contiguous(0x1000, 8);
        controller
            .read(
                IoRequest::new(3, bulk_in(), Some(retry.clone()), 8),
                Completion::new(|_, _| {})
            )
            .unwrap();
        let command = hci.take_pending().remove(0);
        assert!(command.buffer().unwrap().same_buffer(&retry));
    }

    #[test]
    fn device_request_carries_setup() {
        let (controller, hci) = test_controller(1);
        let setup = UsbRequestSetup::new(0x80, 6, 0x0100, 0, 18);
        let buffer = MemoryDescriptor::contiguous(0x4000, 64);
        controller
            .device_request(
                setup,
                IoRequest::new(5, control(), Some(buffer), 64),
                Completion::new(|_, _| {}),
            )
            .unwrap();
        let command = hci.take_pending().pop().unwrap();
        assert_eq!(command.selector(), Selector::DeviceRequest);
        assert_eq!(command.request(), Some(setup));
        assert_eq!(command.direction(), EndpointDirection::DeviceToHost);
        assert_eq!(command.req_count(), 18);

        assert_eq!(
            controller.device_request(
                setup,
                IoRequest::new(5, bulk_in(), None, 0),
                Completion::new(|_, _| {})
            ),
            Err(Error::BadArgument)
        );
    }

    fn clear_tt_setup(hci: &crate::test_utils::FakeHciHandle) -> Command {
        let command = hci.take_pending().pop().unwrap();
        assert!(command.is_clear_tt());
        command
    }

    #[test]
    fn clear_tt_request_layout() {
        let (controller, hci) = test_controller(2);
        controller.configure_device_zero(Speed::Full, 2, 3).unwrap();
        controller.clear_tt(0, 1, EndpointDirection::DeviceToHost).unwrap();
        let command = clear_tt_setup(&hci);
        assert_eq!(command.address(), 2);
        assert_eq!(command.endpoint(), 0);
        assert_eq!(command.transaction().no_data_timeout, CLEAR_TT_NO_DATA_TIMEOUT);
        assert!(!command.has_bound_buffer());
        assert_eq!(
            command.request(),
            Some(UsbRequestSetup::new(0x23, 8, 0x8001, 1, 0))
        );
        assert!(controller
            .complete_transfer(command, TransferStatus::Success, 0)
            .unwrap()
            .is_none());

        controller.add_hs_hub(2, HubFlags::MULTI_TT).unwrap();
        controller.clear_tt(0, 4, EndpointDirection::HostToDevice).unwrap();
        let command = clear_tt_setup(&hci);
        assert_eq!(
            command.request(),
            Some(UsbRequestSetup::new(0x23, 8, 0x0004, 3, 0))
        );
        controller
            .complete_transfer(command, TransferStatus::Success, 0)
            .unwrap();
        assert_eq!(controller.command_pool_counts(), Ok((2, 2)));
    }

    #[test]
    fn clear_tt_skipped_without_translator() {
        let (controller, hci) = test_controller(2);
        controller.configure_device_zero(Speed::High, 2, 3).unwrap();
        controller.clear_tt(0, 1, EndpointDirection::DeviceToHost).unwrap();
        assert!(hci.take_pending().is_empty());
    }

    #[test]
    fn clear_tt_completion_stages_and_stall() {
        let (controller, hci) = test_controller(2);
        controller.configure_device_zero(Speed::Low, 6, 1).unwrap();
        controller.clear_tt(0, 0, EndpointDirection::HostToDevice).unwrap();
        let mut command = clear_tt_setup(&hci);
        command.advance_stage(CommandStage::SETUP_SENT | CommandStage::STATUS_SENT);
        // The setup stage comes back first; the command stays with the backend.
        let command = controller
            .complete_transfer(command, TransferStatus::Stall, 0)
            .unwrap()
            .unwrap();
        assert!(command.stage().contains(CommandStage::SETUP_BACK));
        assert_eq!(controller.command_pool_counts(), Ok((1, 2)));
        assert!(controller
            .complete_transfer(command, TransferStatus::NotResponding, 0)
            .unwrap()
            .is_none());
        assert_eq!(controller.command_pool_counts(), Ok((2, 2)));
        let stalls: Vec<HciCall> = hci
            .calls()
            .into_iter()
            .filter(|c| match c {
                HciCall::ClearStall { .. } => true,
                _ => false,
            })
            .collect();
        let hub_stall = HciCall::ClearStall {
            address: 6,
            endpoint: 0,
            direction: None,
        };
        assert_eq!(stalls, vec![hub_stall.clone(), hub_stall]);
    }

    #[test]
    fn clear_tt_transaction_returned_is_quiet() {
        let (controller, hci) = test_controller(2);
        controller.configure_device_zero(Speed::Full, 4, 2).unwrap();
        controller.clear_tt(0, 3, EndpointDirection::DeviceToHost).unwrap();
        let command = clear_tt_setup(&hci);
        controller
            .complete_transfer(command, TransferStatus::TransactionReturned, 0)
            .unwrap();
        assert!(!hci.calls().iter().any(|c| match c {
            HciCall::ClearStall { .. } => true,
            _ => false,
        }));
    }
}
