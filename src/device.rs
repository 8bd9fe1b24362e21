// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::{Arc, Weak};

use usb_util::Speed;

use crate::controller::{Shared, UsbController};
use crate::error::{Error, Result};
use crate::sync::Mutex;

/// When extra port power is drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerType {
    DuringSleep,
    DuringWake,
}

/// Notifications delivered to the client of a device on the worker thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceMessage {
    PortHasBeenReset,
    PortHasBeenSuspended,
    PortWasNotSuspended,
}

/// Port operations of the hub a device is attached to.
pub trait HubPolicy: Send + Sync {
    fn reset_port(&self, port: u8) -> Result<()>;
    fn suspend_port(&self, port: u8, suspend: bool) -> Result<()>;
    /// Returns the amount of power granted, in milliamps.
    fn request_extra_power(&self, port: u8, power_type: PowerType, requested: u32) -> u32;
    fn return_extra_power(&self, port: u8, power_type: PowerType, returned: u32) -> Result<()>;
    fn get_port_information(&self, port: u8) -> Result<u32>;
}

pub type MessageHandler = Arc<dyn Fn(DeviceMessage) + Send + Sync>;

#[derive(Default)]
struct DeviceState {
    reset_in_progress: bool,
    inactive: bool,
    sleep_power: u32,
    wake_power: u32,
}

impl DeviceState {
    fn power_mut(&mut self, power_type: PowerType) -> &mut u32 {
        match power_type {
            PowerType::DuringSleep => &mut self.sleep_power,
            PowerType::DuringWake => &mut self.wake_power,
        }
    }
}

/// A device on the bus, seen through the hub port it is attached to.
pub struct UsbDevice {
    controller: Weak<Shared>,
    address: u8,
    speed: Speed,
    port: u8,
    hub: Option<Arc<dyn HubPolicy>>,
    state: Mutex<DeviceState>,
    message_handler: Mutex<Option<MessageHandler>>,
}

impl UsbDevice {
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn set_message_handler(&self, handler: MessageHandler) {
        *self.message_handler.lock() = Some(handler);
    }

    /// The device is going away; port operations fail with NoDevice from now on.
    pub fn terminate(&self) {
        self.state.lock().inactive = true;
    }

    fn controller(&self) -> Result<Arc<Shared>> {
        if self.state.lock().inactive {
            error!("device {} is inactive", self.address);
            return Err(Error::NoDevice);
        }
        let shared = self.controller.upgrade().ok_or(Error::NoDevice)?;
        if shared.on_dispatch_thread() {
            error!(
                "{}: port operation for device {} on the dispatch thread",
                shared.name, self.address
            );
            return Err(Error::SyncRequestOnDispatchThread);
        }
        Ok(shared)
    }

    fn post_message(&self, shared: &Shared, message: DeviceMessage) {
        let handler = match self.message_handler.lock().clone() {
            Some(handler) => handler,
            None => return,
        };
        debug!(
            "{}: device {} port {}: {:?}",
            shared.name, self.address, self.port, message
        );
        if let Err(e) = shared.job_queue.queue_job(move || handler(message)) {
            error!("{}: failed to deliver {:?}: {}", shared.name, message, e);
        }
    }

    /// Reset the port of this device. Clients are told with PortHasBeenReset on success.
    pub fn reset_device(&self) -> Result<()> {
        let shared = self.controller()?;
        {
            let mut state = self.state.lock();
            if state.reset_in_progress {
                error!(
                    "{}: reset of device {} already in progress",
                    shared.name, self.address
                );
                return Err(Error::NotPermitted);
            }
            state.reset_in_progress = true;
        }
        let result = match self.hub.as_ref() {
            Some(hub) => hub.reset_port(self.port),
            None => Ok(()),
        };
        match result {
            Ok(()) => self.post_message(&shared, DeviceMessage::PortHasBeenReset),
            Err(e) => warn!(
                "{}: reset of port {} failed: {}",
                shared.name, self.port, e
            ),
        }
        self.state.lock().reset_in_progress = false;
        result
    }

    /// Suspend or resume the port. A failed resume is only reported to clients.
    pub fn suspend_device(&self, suspend: bool) -> Result<()> {
        let shared = self.controller()?;
        let result = match self.hub.as_ref() {
            Some(hub) => hub.suspend_port(self.port, suspend),
            None => Ok(()),
        };
        if suspend {
            let message = if result.is_ok() {
                DeviceMessage::PortHasBeenSuspended
            } else {
                DeviceMessage::PortWasNotSuspended
            };
            self.post_message(&shared, message);
            result
        } else {
            if result.is_err() {
                self.post_message(&shared, DeviceMessage::PortWasNotSuspended);
            }
            Ok(())
        }
    }

    /// Ask the hub for extra power. Returns what was granted.
    pub fn request_extra_power(&self, power_type: PowerType, requested: u32) -> u32 {
        let granted = match self.hub.as_ref() {
            Some(hub) => hub.request_extra_power(self.port, power_type, requested),
            None => 0,
        };
        {
            let mut state = self.state.lock();
            let allocated = state.power_mut(power_type);
            *allocated = allocated.saturating_add(granted);
        }
        debug!(
            "device {}: requested {} {:?}, granted {}",
            self.address, requested, power_type, granted
        );
        granted
    }

    pub fn return_extra_power(&self, power_type: PowerType, returned: u32) -> Result<()> {
        // Check and subtract under one lock; restored if the hub refuses.
        {
            let mut state = self.state.lock();
            let allocated = state.power_mut(power_type);
            match allocated.checked_sub(returned) {
                Some(left) => *allocated = left,
                None => {
                    debug!(
                        "device {}: returning {} {:?} but only {} allocated",
                        self.address, returned, power_type, *allocated
                    );
                    return Err(Error::BadArgument);
                }
            }
        }
        if let Some(hub) = self.hub.as_ref() {
            if let Err(e) = hub.return_extra_power(self.port, power_type, returned) {
                let mut state = self.state.lock();
                let allocated = state.power_mut(power_type);
                *allocated = allocated.saturating_add(returned);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn extra_power_allocated(&self, power_type: PowerType) -> u32 {
        let state = self.state.lock();
        match power_type {
            PowerType::DuringSleep => state.sleep_power,
            PowerType::DuringWake => state.wake_power,
        }
    }

    /// Port information bits from the hub.
    pub fn get_device_information(&self) -> Result<u32> {
        match self.hub.as_ref() {
            Some(hub) => hub.get_port_information(self.port),
            None => Err(Error::NoDevice),
        }
    }
}

impl UsbController {
    /// Register the device at `address`, attached to `port` of the hub at `hub_address`, and
    /// record which transaction translator serves it.
    pub fn create_device(
        &self,
        address: u8,
        speed: Speed,
        hub_address: u8,
        port: u8,
        hub: Option<Arc<dyn HubPolicy>>,
    ) -> Result<UsbDevice> {
        self.shared().gate.run_action(|state| {
            state
                .device_table
                .resolve_high_speed_ancestor(address, speed, hub_address, port)
        })??;
        Ok(UsbDevice {
            controller: Arc::downgrade(self.shared()),
            address,
            speed,
            port,
            hub,
            state: Mutex::new(DeviceState::default()),
            message_handler: Mutex::new(None),
        })
    }
}
