// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::cmp::min;
use std::fmt;
use std::sync::mpsc::Sender;

use bitflags::bitflags;
use usb_util::{EndpointDirection, EndpointType, TransferStatus, UsbRequestSetup};

use crate::config::ControllerConfig;
use crate::dma_command::{DmaCommand, MemoryDescriptor};
use crate::error::{Error, Result};

/// Scratch slots a controller backend may use to track a command.
pub const UIM_SCRATCH_SLOTS: usize = 10;

bitflags! {
    /// Progress of a transaction. The low nibble records stages handed to the hardware, the
    /// high nibble records stages that came back.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CommandStage: u8 {
        const SETUP_SENT = 0x01;
        const DATA_SENT = 0x02;
        const STATUS_SENT = 0x04;
        const SETUP_BACK = 0x10;
        const DATA_BACK = 0x20;
        const STATUS_BACK = 0x40;
    }
}

impl CommandStage {
    /// Stages sent to the hardware that have not come back yet, in "back" bits.
    pub fn pending_returns(self) -> CommandStage {
        let sent = (self.bits() & 0x0f) << 4;
        let back = self.bits() & 0xf0;
        CommandStage::from_bits_truncate(sent ^ back)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selector {
    Read,
    Write,
    DeviceRequest,
}

pub type TransferCallback = Box<dyn FnOnce(TransferStatus, usize) + Send>;

/// What happens when the hardware reports a command finished.
pub enum TransferCompletion {
    Async(TransferCallback),
    /// A caller is blocked until the status and byte count arrive.
    Sync(Sender<(TransferStatus, usize)>),
    /// Clear TT request sent to a hub on the core's own behalf.
    ClearTt,
}

impl fmt::Debug for TransferCompletion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransferCompletion::Async(_) => write!(f, "Async"),
            TransferCompletion::Sync(_) => write!(f, "Sync"),
            TransferCompletion::ClearTt => write!(f, "ClearTt"),
        }
    }
}

/// Addressing and sizing of one transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub selector: Selector,
    pub address: u8,
    pub endpoint: u8,
    pub direction: EndpointDirection,
    pub transfer_type: EndpointType,
    pub req_count: usize,
    pub no_data_timeout: u32,
    pub completion_timeout: u32,
    pub stream_id: u32,
    pub request: Option<UsbRequestSetup>,
}

impl Transaction {
    fn empty() -> Transaction {
        Transaction {
            selector: Selector::Read,
            address: 0,
            endpoint: 0,
            direction: EndpointDirection::HostToDevice,
            transfer_type: EndpointType::Control,
            req_count: 0,
            no_data_timeout: 0,
            completion_timeout: 0,
            stream_id: 0,
            request: None,
        }
    }
}

pub type CommandId = u32;

/// Command is a reusable transfer request. It is either free in the pool or owned by exactly
/// one transaction.
pub struct Command {
    id: CommandId,
    transaction: Transaction,
    completion: Option<TransferCompletion>,
    uim_scratch: [u32; UIM_SCRATCH_SLOTS],
    is_sync: bool,
    stage: CommandStage,
    dma_command: Option<DmaCommand>,
}

impl Command {
    pub(crate) fn new(id: CommandId, dma_command: Option<DmaCommand>) -> Command {
        Command {
            id,
            transaction: Transaction::empty(),
            completion: None,
            uim_scratch: [0; UIM_SCRATCH_SLOTS],
            is_sync: false,
            stage: CommandStage::empty(),
            dma_command,
        }
    }

    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub(crate) fn set_transaction(&mut self, transaction: Transaction) {
        self.transaction = transaction;
    }

    pub fn selector(&self) -> Selector {
        self.transaction.selector
    }

    pub fn address(&self) -> u8 {
        self.transaction.address
    }

    pub fn endpoint(&self) -> u8 {
        self.transaction.endpoint
    }

    pub fn direction(&self) -> EndpointDirection {
        self.transaction.direction
    }

    pub fn transfer_type(&self) -> EndpointType {
        self.transaction.transfer_type
    }

    pub fn req_count(&self) -> usize {
        self.transaction.req_count
    }

    pub fn request(&self) -> Option<UsbRequestSetup> {
        self.transaction.request
    }

    pub fn is_sync(&self) -> bool {
        self.is_sync
    }

    pub(crate) fn set_completion(&mut self, completion: TransferCompletion) {
        self.is_sync = match completion {
            TransferCompletion::Sync(_) => true,
            _ => false,
        };
        self.completion = Some(completion);
    }

    pub(crate) fn take_completion(&mut self) -> Option<TransferCompletion> {
        self.completion.take()
    }

    pub(crate) fn is_clear_tt(&self) -> bool {
        match self.completion {
            Some(TransferCompletion::ClearTt) => true,
            _ => false,
        }
    }

    pub fn uim_scratch(&self, index: usize) -> Option<u32> {
        self.uim_scratch.get(index).cloned()
    }

    pub fn set_uim_scratch(&mut self, index: usize, value: u32) -> Result<()> {
        let slot = self.uim_scratch.get_mut(index).ok_or(Error::BadArgument)?;
        *slot = value;
        Ok(())
    }

    pub fn stage(&self) -> CommandStage {
        self.stage
    }

    /// Stages only accumulate while the command is in flight.
    pub fn advance_stage(&mut self, stage: CommandStage) {
        self.stage |= stage;
    }

    pub fn dma_command(&self) -> Option<&DmaCommand> {
        self.dma_command.as_ref()
    }

    /// Returns the buffer bound to this command.
    pub fn buffer(&self) -> Option<&MemoryDescriptor> {
        self.dma_command
            .as_ref()
            .and_then(|dma| dma.memory_descriptor())
    }

    pub fn has_bound_buffer(&self) -> bool {
        self.buffer().is_some()
    }

    /// Bind `buffer` for dma. A buffer left over from an earlier transaction is unbound first.
    pub fn bind(&mut self, buffer: MemoryDescriptor) -> Result<()> {
        let id = self.id;
        let dma = match self.dma_command.as_mut() {
            Some(dma) => dma,
            None => {
                error!("command {} has no dma command", id);
                return Err(Error::NoResources);
            }
        };
        if let Some(stale) = dma.clear_memory_descriptor() {
            error!(
                "command {} dma command already contains {:?} - clearing",
                id, stale
            );
        }
        dma.set_memory_descriptor(buffer)
    }

    /// Release the dma binding. Unbinding a command with nothing bound succeeds.
    pub fn unbind(&mut self) -> Result<()> {
        if let Some(dma) = self.dma_command.as_mut() {
            dma.clear_memory_descriptor();
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.transaction = Transaction::empty();
        self.completion = None;
        self.uim_scratch = [0; UIM_SCRATCH_SLOTS];
        self.is_sync = false;
        self.stage = CommandStage::empty();
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("transaction", &self.transaction)
            .field("completion", &self.completion)
            .field("stage", &self.stage)
            .field("bound", &self.has_bound_buffer())
            .finish()
    }
}

/// CommandPool hands out commands without blocking and grows in batches up to a limit. It
/// never shrinks.
pub struct CommandPool {
    free: Vec<Command>,
    allocated: usize,
    increment: usize,
    max_commands: usize,
    dma_address_bits: u8,
    dma_max_segment_size: u32,
}

impl CommandPool {
    pub fn new(config: &ControllerConfig) -> CommandPool {
        let mut pool = CommandPool {
            free: Vec::new(),
            allocated: 0,
            increment: config.command_pool_increment,
            max_commands: config.max_commands,
            dma_address_bits: config.dma_address_bits,
            dma_max_segment_size: config.dma_max_segment_size,
        };
        pool.grow(config.initial_commands);
        pool
    }

    fn grow(&mut self, count: usize) -> usize {
        let count = min(count, self.max_commands - self.allocated);
        for _ in 0..count {
            let id = self.allocated as CommandId;
            let dma = DmaCommand::new(self.dma_address_bits, self.dma_max_segment_size);
            self.free.push(Command::new(id, Some(dma)));
            self.allocated += 1;
        }
        count
    }

    /// Take a free command, or None when the pool is empty.
    pub fn get_command(&mut self) -> Option<Command> {
        self.free.pop()
    }

    pub fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    pub fn can_grow(&self) -> bool {
        self.allocated < self.max_commands
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated
    }

    /// Add a batch of commands, return how many were added.
    pub fn increase_command_pool(&mut self) -> usize {
        let added = self.grow(self.increment);
        if added == 0 {
            warn!(
                "command pool exhausted at {} commands",
                self.allocated_count()
            );
        } else {
            debug!(
                "command pool grown by {} to {} commands",
                added, self.allocated
            );
        }
        added
    }

    /// Take a command, growing the pool once if it is empty.
    pub fn acquire(&mut self) -> Result<Command> {
        if let Some(command) = self.get_command() {
            return Ok(command);
        }
        self.increase_command_pool();
        self.get_command().ok_or(Error::NoResources)
    }

    pub fn return_command(&mut self, mut command: Command) {
        if command.has_bound_buffer() {
            error!("command {} returned with a bound buffer - unbinding", command.id);
            let _ = command.unbind();
        }
        command.reset();
        self.free.push(command);
    }
}
