// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hardware independent core of a usb host controller driver.
//!
//! `UsbController` admits control, bulk, interrupt and isochronous transfers through a
//! command gate, hands them to a `HostControllerInterface` backend, and delivers completions.
//! Isochronous completions are reordered by frame number and dispatched on a worker thread.

#[macro_use]
extern crate log;

#[macro_use]
mod error;

mod async_job_queue;
mod command_gate;
mod command_pool;
mod config;
mod controller;
mod device;
mod device_address_table;
mod dma_command;
mod event_loop;
mod host_controller;
mod isoch;
mod sync;
#[cfg(test)]
mod test_utils;
mod transfer;

pub use crate::command_pool::{Command, CommandId, CommandPool, CommandStage, Selector,
                              Transaction, TransferCallback, TransferCompletion,
                              UIM_SCRATCH_SLOTS};
pub use crate::config::ControllerConfig;
pub use crate::controller::{Endpoint, UsbController, MAX_HIGH_SPEED_ISOCH_INTERVAL};
pub use crate::device::{DeviceMessage, HubPolicy, MessageHandler, PowerType, UsbDevice};
pub use crate::device_address_table::{DeviceAddressTable, MAX_DEVICES};
pub use crate::dma_command::{DmaCommand, DmaSegment, MemoryDescriptor, DMA_SEGMENT_ENTRY_SIZE,
                             DMA_SEGMENT_FLAG_LAST};
pub use crate::error::{Error, Result};
pub use crate::host_controller::{retire_scheduled_as_aborted, EndpointSpec,
                                 HostControllerInterface, HubCommand, HubFlags};
pub use crate::isoch::{FrameList, IsochCallback, IsochCompletion, IsochEndpoint,
                       IsochEndpointDirectory, IsochEndpointId, IsochEndpointKey,
                       IsochEndpointSnapshot, IsochFrame, IsochQueue, IsochRequest,
                       IsochTransferDescriptor, TdId, TdState};
pub use crate::transfer::{Completion, IoRequest, CLEAR_TT_BUFFER, CLEAR_TT_NO_DATA_TIMEOUT,
                          CLEAR_TT_REQUEST_TYPE};
pub use usb_util::{EndpointDirection, EndpointType, Speed, TransferStatus, UsbRequestSetup};
