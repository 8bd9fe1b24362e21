// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::error::{Error, Result};

pub const DEFAULT_COMMAND_POOL_SIZE: usize = 50;
pub const DEFAULT_COMMAND_POOL_INCREMENT: usize = 50;
pub const DEFAULT_MAX_COMMANDS: usize = 1000;
// Controllers this core drives use 32 bit dma addresses.
pub const DEFAULT_DMA_ADDRESS_BITS: u8 = 32;
pub const DEFAULT_DMA_MAX_SEGMENT_SIZE: u32 = 4096;

/// Settings of one controller instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Used as the worker thread name and as log prefix.
    pub name: String,
    pub bus_number: u8,
    /// Commands created when the controller starts.
    pub initial_commands: usize,
    /// Commands added each time the pool runs dry.
    pub command_pool_increment: usize,
    /// Upper bound on commands ever allocated.
    pub max_commands: usize,
    /// Max bus stall in nanoseconds requested while isochronous transfers are active. Zero
    /// means no requirement.
    pub isoch_max_bus_stall: u32,
    pub dma_address_bits: u8,
    pub dma_max_segment_size: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            name: "usb_host".to_string(),
            bus_number: 0,
            initial_commands: DEFAULT_COMMAND_POOL_SIZE,
            command_pool_increment: DEFAULT_COMMAND_POOL_INCREMENT,
            max_commands: DEFAULT_MAX_COMMANDS,
            isoch_max_bus_stall: 0,
            dma_address_bits: DEFAULT_DMA_ADDRESS_BITS,
            dma_max_segment_size: DEFAULT_DMA_MAX_SEGMENT_SIZE,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.command_pool_increment == 0
            || self.initial_commands > self.max_commands
            || self.dma_address_bits == 0
            || self.dma_address_bits > 64
            || self.dma_max_segment_size == 0
        {
            error!("invalid controller config: {:?}", self);
            return Err(Error::BadArgument);
        }
        Ok(())
    }
}
