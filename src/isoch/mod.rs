// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod directory;
mod dispatcher;
mod endpoint;
mod frame_list;
mod io;
mod td_queue;

pub use self::directory::{IsochEndpointDirectory, IsochEndpointId};
pub use self::endpoint::{IsochEndpoint, IsochEndpointKey, IsochQueue, IsochTransferDescriptor,
                         TdState};
pub use self::frame_list::{FrameList, IsochCallback, IsochCompletion, IsochFrame};
pub use self::io::{IsochEndpointSnapshot, IsochRequest};
pub use self::td_queue::TdId;

pub(crate) use self::dispatcher::{return_isoch_done_queue, schedule_isoch_done, DispatchState};
