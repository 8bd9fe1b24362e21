// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Usb wire level types shared by the host controller core and its backends.

mod types;

pub use crate::types::*;
