// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use usb_util::{EndpointDirection, TransferStatus};

use super::directory::IsochEndpointId;
use super::frame_list::{FrameList, IsochCallback};
use crate::controller::{ControllerState, Shared};
use crate::sync::Mutex;

/// Serializes done queue drains of one controller. While a drain runs, other callers only
/// add their endpoint to `pending`, so callbacks keep done queue order.
#[derive(Default)]
pub(crate) struct DispatchState {
    running: bool,
    pending: Vec<IsochEndpointId>,
}

// Clears `running` if the drain unwinds. A normal exit clears it together with the pending
// check instead.
struct RunningGuard<'a> {
    dispatch: &'a Mutex<DispatchState>,
}

impl<'a> Drop for RunningGuard<'a> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.dispatch.lock().running = false;
        }
    }
}

struct DoneEntry {
    callback: IsochCallback,
    status: TransferStatus,
    frames: FrameList,
    direction: EndpointDirection,
}

// Pops descriptors until one carries a completion. Runs inside the gate.
fn take_done_entry(state: &mut ControllerState, id: IsochEndpointId) -> Option<DoneEntry> {
    loop {
        let ep = state.isoch_endpoints.get_mut(id)?;
        let mut td = match ep.dequeue_done() {
            Some(td) => td,
            None => {
                let release = !ep.pipe_open() && !ep.has_live_tds();
                state.report_queue_health(id);
                if release {
                    if let Err(e) = state.isoch_endpoints.deallocate_endpoint(id) {
                        error!("failed to release isoch endpoint {:?}: {}", id, e);
                    }
                }
                return None;
            }
        };
        let callback = match td.take_completion() {
            Some(callback) => callback,
            None => continue,
        };
        let status = ep.accumulated_status();
        ep.clear_delivered_status();
        let direction = ep.direction();
        let frames = td.frame_list().clone();
        state.isoch_transfer_finished();
        return Some(DoneEntry {
            callback,
            status,
            frames,
            direction,
        });
    }
}

fn drain_endpoint(shared: &Shared, id: IsochEndpointId) -> usize {
    let mut delivered = 0;
    loop {
        let entry = match shared.gate.run_action(|state| take_done_entry(state, id)) {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                error!("{}: cannot drain isoch endpoint {:?}: {}", shared.name, id, e);
                break;
            }
        };
        match entry.status {
            TransferStatus::BufferUnderrun | TransferStatus::BufferOverrun => {
                error!(
                    "{}: isoch endpoint {:?} completed with {:?}",
                    shared.name, id, entry.status
                );
            }
            TransferStatus::Overrun if entry.direction == EndpointDirection::DeviceToHost => {
                error!(
                    "{}: isoch endpoint {:?} in transfer overrun",
                    shared.name, id
                );
            }
            _ => {}
        }
        let DoneEntry {
            callback,
            status,
            frames,
            ..
        } = entry;
        if panic::catch_unwind(AssertUnwindSafe(move || callback(status, frames))).is_err() {
            error!("{}: isoch completion of {:?} panicked", shared.name, id);
        }
        delivered += 1;
    }
    delivered
}

/// Deliver the finished requests of endpoint `id`, in done queue order. Returns the number of
/// callbacks run by this call.
pub(crate) fn return_isoch_done_queue(shared: &Shared, id: IsochEndpointId) -> usize {
    {
        let mut dispatch = shared.dispatch.lock();
        if !dispatch.pending.contains(&id) {
            dispatch.pending.push(id);
        }
        if dispatch.running {
            return 0;
        }
        dispatch.running = true;
    }
    let _guard = RunningGuard {
        dispatch: &shared.dispatch,
    };
    let mut delivered = 0;
    loop {
        let next = {
            let mut dispatch = shared.dispatch.lock();
            if dispatch.pending.is_empty() {
                dispatch.running = false;
                None
            } else {
                Some(dispatch.pending.remove(0))
            }
        };
        match next {
            Some(id) => delivered += drain_endpoint(shared, id),
            None => break,
        }
    }
    delivered
}

/// Drain endpoint `id` on the worker thread.
pub(crate) fn schedule_isoch_done(shared: &Arc<Shared>, id: IsochEndpointId) {
    let weak = Arc::downgrade(shared);
    let queued = shared.job_queue.queue_job(move || {
        if let Some(shared) = weak.upgrade() {
            return_isoch_done_queue(&shared, id);
        }
    });
    if let Err(e) = queued {
        error!("{}: failed to queue isoch completion: {}", shared.name, e);
    }
}
