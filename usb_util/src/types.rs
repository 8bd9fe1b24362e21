// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use byteorder::{ByteOrder, LittleEndian};

/// Speed of usb device. See usb spec for more details.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Speed {
    // The device is operating at low speed (1.5MBit/s).
    Low,
    // The device is operating at full speed (12MBit/s).
    Full,
    // The device is operating at high speed (480MBit/s).
    High,
    // The device is operating at super speed (5000MBit/s).
    Super,
}

impl Speed {
    /// Low and full speed devices behind a high speed hub talk through its transaction
    /// translator.
    pub fn needs_transaction_translator(self) -> bool {
        match self {
            Speed::Low | Speed::Full => true,
            Speed::High | Speed::Super => false,
        }
    }
}

/// Bit offset of the direction flag inside an endpoint address.
pub const ENDPOINT_DIRECTION_OFFSET: u8 = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointDirection {
    HostToDevice = 0,
    DeviceToHost = 1,
}

impl EndpointDirection {
    /// Direction of a control request, taken from bit 7 of bmRequestType.
    pub fn from_request_type(request_type: u8) -> EndpointDirection {
        if request_type >> ENDPOINT_DIRECTION_OFFSET == 1 {
            EndpointDirection::DeviceToHost
        } else {
            EndpointDirection::HostToDevice
        }
    }
}

/// Usb endpoint transfer types. See usb spec 9.6.6.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

/// Status reported by the host controller when a transfer or a frame finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferStatus {
    Success,
    Aborted,
    // Device sent less data than requested.
    Underrun,
    // Device sent more data than requested (babble).
    Overrun,
    // Controller could not fetch outgoing data in time.
    BufferUnderrun,
    // Controller could not store incoming data in time.
    BufferOverrun,
    NotResponding,
    TimedOut,
    Stall,
    NoDevice,
    // Transaction was handed back to software before it ran.
    TransactionReturned,
    Error,
}

impl TransferStatus {
    pub fn is_success(self) -> bool {
        self == TransferStatus::Success
    }
}

/// Size of a usb device request on the wire.
pub const USB_REQUEST_SETUP_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsbRequestSetup {
    // USB Device Request. USB spec. rev. 2.0 9.3
    pub request_type: u8, // bmRequestType
    pub request: u8,      // bRequest
    pub value: u16,       // wValue
    pub index: u16,       // wIndex
    pub length: u16,      // wLength
}

impl UsbRequestSetup {
    pub fn new(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> Self {
        UsbRequestSetup {
            request_type,
            request,
            value,
            index,
            length,
        }
    }

    pub fn direction(&self) -> EndpointDirection {
        EndpointDirection::from_request_type(self.request_type)
    }

    /// Encode the request the way it goes out in a setup packet.
    pub fn to_bytes(&self) -> [u8; USB_REQUEST_SETUP_SIZE] {
        let mut buf = [0u8; USB_REQUEST_SETUP_SIZE];
        buf[0] = self.request_type;
        buf[1] = self.request;
        LittleEndian::write_u16(&mut buf[2..4], self.value);
        LittleEndian::write_u16(&mut buf[4..6], self.index);
        LittleEndian::write_u16(&mut buf[6..8], self.length);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<UsbRequestSetup> {
        if buf.len() < USB_REQUEST_SETUP_SIZE {
            return None;
        }
        Some(UsbRequestSetup {
            request_type: buf[0],
            request: buf[1],
            value: LittleEndian::read_u16(&buf[2..4]),
            index: LittleEndian::read_u16(&buf[4..6]),
            length: LittleEndian::read_u16(&buf[6..8]),
        })
    }
}
