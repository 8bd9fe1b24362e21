// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt::{self, Display};

use usb_util::TransferStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Malformed request: wrong direction, short buffer, illegal interval or timeout.
    BadArgument,
    /// Command pool or dma resources are exhausted.
    NoResources,
    /// Device or pipe is gone.
    NoDevice,
    /// A synchronous request was made from a context that would deadlock waiting for it.
    SyncRequestOnDispatchThread,
    TransactionTimeout,
    BufferUnderrun,
    BufferOverrun,
    Aborted,
    NotResponding,
    /// No isochronous endpoint matches the request.
    EndpointNotFound,
    NotPermitted,
    Unsupported,
    /// Error happens when invoking some syscall,
    SysError(i32),
    /// Code is in a bad state, queues or counters are inconsistent.
    BadState,
    /// Hardware finished a transfer with a status that has no dedicated error.
    TransferFailed(TransferStatus),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map a completion status to the result a synchronous caller sees.
    pub fn from_status(status: TransferStatus) -> Result<()> {
        let err = match status {
            TransferStatus::Success => return Ok(()),
            TransferStatus::Aborted => Error::Aborted,
            TransferStatus::TimedOut => Error::TransactionTimeout,
            TransferStatus::BufferUnderrun => Error::BufferUnderrun,
            TransferStatus::BufferOverrun => Error::BufferOverrun,
            TransferStatus::NotResponding => Error::NotResponding,
            TransferStatus::NoDevice => Error::NoDevice,
            s => Error::TransferFailed(s),
        };
        Err(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::Error::*;

        match self {
            BadArgument => write!(f, "bad argument"),
            NoResources => write!(f, "no resources available"),
            NoDevice => write!(f, "no such device"),
            SyncRequestOnDispatchThread => {
                write!(f, "synchronous request made on the dispatch thread")
            }
            TransactionTimeout => write!(f, "transaction timed out"),
            BufferUnderrun => write!(f, "controller buffer underrun"),
            BufferOverrun => write!(f, "controller buffer overrun"),
            Aborted => write!(f, "transfer aborted"),
            NotResponding => write!(f, "device not responding"),
            EndpointNotFound => write!(f, "endpoint not found"),
            NotPermitted => write!(f, "operation not permitted"),
            Unsupported => write!(f, "operation not supported"),
            SysError(errno) => write!(f, "system error {}", errno),
            BadState => write!(f, "bad state"),
            TransferFailed(status) => write!(f, "transfer failed: {:?}", status),
        }
    }
}

impl std::error::Error for Error {}

/// err_msg would be used with Result::map_err. It would print the current error, and map it if
/// needed. Using this macro because:
/// An error message is printed where the error happens, and file name, line number is included.
/// Easy to write, no need to use match just for print error.
macro_rules! err_msg {
    () => {
        |e| {
            error!("usb error: {:?}", e);
            e
        }
    };
    (Error::SysError) => {
        |e: std::io::Error| {
            error!("usb error: {:?}", e);
            Error::SysError(e.raw_os_error().unwrap_or(0))
        }
    };
    (Error::SysError, $($arg:tt)* ) => {
        |e: std::io::Error| {
            error!("usb error: {:?}. {}", e, format!($($arg)*));
            Error::SysError(e.raw_os_error().unwrap_or(0))
        }
    };
    ($err:path) => {
        |e| {
            error!("usb error: {:?}", e);
            $err
        }
    };
    ($err:path, $($arg:tt)* ) => {
        |e| {
            error!("usb error: {:?}. {}", e, format!($($arg)*));
            $err
        }
    };
    ( $($arg:tt)* ) => {
        |e| {
            error!("usb error: {:?}. {}", e, format!($($arg)*));
            e
        }
    };
}
