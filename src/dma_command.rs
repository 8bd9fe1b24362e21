// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::cmp::min;
use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::sync::Mutex;

/// Size of one entry of the table produced by `DmaCommand::gen_segment_table`.
pub const DMA_SEGMENT_ENTRY_SIZE: usize = 16;
/// Flag set on the last entry of a segment table.
pub const DMA_SEGMENT_FLAG_LAST: u32 = 0x1;

/// A physically contiguous piece of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmaSegment {
    pub address: u64,
    pub length: u32,
}

/// MemoryDescriptor is a client buffer together with the physical ranges backing it. Clones
/// share the same bytes, so data written by the controller is visible to the client.
#[derive(Clone)]
pub struct MemoryDescriptor {
    data: Arc<Mutex<Vec<u8>>>,
    ranges: Arc<Vec<DmaSegment>>,
}

impl MemoryDescriptor {
    /// Create a zero filled buffer backed by `ranges`, in order.
    pub fn new(ranges: Vec<DmaSegment>) -> MemoryDescriptor {
        let len = ranges.iter().map(|r| r.length as usize).sum();
        MemoryDescriptor {
            data: Arc::new(Mutex::new(vec![0; len])),
            ranges: Arc::new(ranges),
        }
    }

    pub fn contiguous(address: u64, length: u32) -> MemoryDescriptor {
        MemoryDescriptor::new(vec![DmaSegment { address, length }])
    }

    /// A contiguous buffer holding a copy of `bytes`.
    pub fn with_bytes(address: u64, bytes: &[u8]) -> Result<MemoryDescriptor> {
        let length = u32::try_from(bytes.len()).map_err(|_| Error::BadArgument)?;
        let md = MemoryDescriptor::contiguous(address, length);
        md.write_at(0, bytes);
        Ok(md)
    }

    /// Total len of this buffer.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ranges(&self) -> &[DmaSegment] {
        &self.ranges
    }

    /// Read content starting at `offset` into `buf`, return read size.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let size = min(buf.len(), data.len() - offset);
        buf[..size].copy_from_slice(&data[offset..offset + size]);
        size
    }

    /// Write `buf` starting at `offset`, return write size.
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        let mut data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let size = min(buf.len(), data.len() - offset);
        data[offset..offset + size].copy_from_slice(&buf[..size]);
        size
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Returns true if both descriptors refer to the same bytes.
    pub fn same_buffer(&self, other: &MemoryDescriptor) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for MemoryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryDescriptor")
            .field("len", &self.len())
            .field("ranges", &self.ranges)
            .finish()
    }
}

/// DmaCommand holds the dma mapping of the buffer bound to one transaction command. It splits
/// the buffer's physical ranges into segments the controller can address.
pub struct DmaCommand {
    address_bits: u8,
    max_segment_size: u32,
    memory_descriptor: Option<MemoryDescriptor>,
    segments: Vec<DmaSegment>,
}

impl DmaCommand {
    pub fn new(address_bits: u8, max_segment_size: u32) -> DmaCommand {
        DmaCommand {
            address_bits,
            max_segment_size,
            memory_descriptor: None,
            segments: Vec::new(),
        }
    }

    pub fn memory_descriptor(&self) -> Option<&MemoryDescriptor> {
        self.memory_descriptor.as_ref()
    }

    /// Map `md`. Fails with BadState if a descriptor is already set; the caller clears it
    /// first.
    pub fn set_memory_descriptor(&mut self, md: MemoryDescriptor) -> Result<()> {
        if self.memory_descriptor.is_some() {
            return Err(Error::BadState);
        }
        if self.max_segment_size == 0 {
            error!("dma command has a zero max segment size");
            return Err(Error::BadState);
        }
        let limit = if self.address_bits >= 64 {
            u64::max_value()
        } else {
            1u64 << self.address_bits
        };
        let mut segments = Vec::new();
        for range in md.ranges() {
            let end = range
                .address
                .checked_add(u64::from(range.length))
                .ok_or(Error::BadArgument)?;
            if end > limit {
                return Err(Error::NoResources);
            }
            let mut offset = 0u32;
            while offset < range.length {
                let length = min(self.max_segment_size, range.length - offset);
                segments.push(DmaSegment {
                    address: range.address + u64::from(offset),
                    length,
                });
                offset += length;
            }
        }
        self.segments = segments;
        self.memory_descriptor = Some(md);
        Ok(())
    }

    pub fn clear_memory_descriptor(&mut self) -> Option<MemoryDescriptor> {
        self.segments.clear();
        self.memory_descriptor.take()
    }

    pub fn segments(&self) -> &[DmaSegment] {
        &self.segments
    }

    /// Encode the segment list as the little endian table a controller walks: u64 address,
    /// u32 length, u32 flags per entry.
    pub fn gen_segment_table(&self) -> Vec<u8> {
        let mut table = vec![0u8; self.segments.len() * DMA_SEGMENT_ENTRY_SIZE];
        for (i, (segment, entry)) in self
            .segments
            .iter()
            .zip(table.chunks_mut(DMA_SEGMENT_ENTRY_SIZE))
            .enumerate()
        {
            let flags = if i + 1 == self.segments.len() {
                DMA_SEGMENT_FLAG_LAST
            } else {
                0
            };
            LittleEndian::write_u64(&mut entry[0..8], segment.address);
            LittleEndian::write_u32(&mut entry[8..12], segment.length);
            LittleEndian::write_u32(&mut entry[12..16], flags);
        }
        table
    }

    /// Read content to buffer, return read size.
    pub fn read(&self, buffer: &mut [u8]) -> usize {
        match &self.memory_descriptor {
            Some(md) => md.read_at(0, buffer),
            None => 0,
        }
    }

    /// Write content from buffer, return write size.
    pub fn write(&self, buffer: &[u8]) -> usize {
        match &self.memory_descriptor {
            Some(md) => md.write_at(0, buffer),
            None => 0,
        }
    }
}
