// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt;
use std::sync::Arc;

use usb_util::TransferStatus;

/// Request and result of one isochronous frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IsochFrame {
    pub req_count: u16,
    pub act_count: u16,
    pub status: TransferStatus,
}

impl IsochFrame {
    pub fn new(req_count: u16) -> IsochFrame {
        IsochFrame {
            req_count,
            act_count: 0,
            status: TransferStatus::Success,
        }
    }
}

/// Frames of one isochronous request. The client keeps a clone to read per frame results
/// after the completion fires. Backends update it from the interrupt path, so it is guarded
/// by a spin lock.
#[derive(Clone, Debug)]
pub struct FrameList {
    frames: Arc<spin::Mutex<Vec<IsochFrame>>>,
}

impl FrameList {
    pub fn new(frames: Vec<IsochFrame>) -> FrameList {
        FrameList {
            frames: Arc::new(spin::Mutex::new(frames)),
        }
    }

    pub fn from_counts(counts: &[u16]) -> FrameList {
        FrameList::new(counts.iter().map(|c| IsochFrame::new(*c)).collect())
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<IsochFrame> {
        self.frames.lock().get(index).cloned()
    }

    /// Record the outcome of frame `index`. Returns false if there is no such frame.
    pub fn update(&self, index: usize, act_count: u16, status: TransferStatus) -> bool {
        match self.frames.lock().get_mut(index) {
            Some(frame) => {
                frame.act_count = act_count;
                frame.status = status;
                true
            }
            None => false,
        }
    }

    pub fn total_req_count(&self) -> usize {
        self.frames
            .lock()
            .iter()
            .map(|f| usize::from(f.req_count))
            .sum()
    }

    pub fn to_vec(&self) -> Vec<IsochFrame> {
        self.frames.lock().clone()
    }
}

pub type IsochCallback = Box<dyn FnOnce(TransferStatus, FrameList) + Send>;

/// IsochCompletion is the completion record carried by a transfer descriptor. Its action is
/// consumed the first time it fires; anything the client needs is captured by the closure.
#[derive(Default)]
pub struct IsochCompletion {
    action: Option<IsochCallback>,
}

impl IsochCompletion {
    pub fn new<F>(action: F) -> IsochCompletion
    where
        F: FnOnce(TransferStatus, FrameList) + Send + 'static,
    {
        IsochCompletion {
            action: Some(Box::new(action)),
        }
    }

    /// A completion that does nothing; its descriptor is simply deallocated.
    pub fn none() -> IsochCompletion {
        IsochCompletion { action: None }
    }

    pub fn is_armed(&self) -> bool {
        self.action.is_some()
    }

    pub fn take(&mut self) -> Option<IsochCallback> {
        self.action.take()
    }
}

impl fmt::Debug for IsochCompletion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "IsochCompletion {{ armed: {} }}", self.is_armed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn completion_taken_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut completion = IsochCompletion::new(move |status, _| {
            assert_eq!(status, TransferStatus::Success);
            c.fetch_add(1, Ordering::SeqCst);
        });
        let frames = FrameList::from_counts(&[8]);
        let action = completion.take().unwrap();
        assert!(!completion.is_armed());
        assert!(completion.take().is_none());
        action(TransferStatus::Success, frames);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn frame_updates_are_shared() {
        let frames = FrameList::from_counts(&[8, 16]);
        let backend_view = frames.clone();
        assert!(backend_view.update(1, 12, TransferStatus::Underrun));
        assert!(!backend_view.update(2, 1, TransferStatus::Success));
        assert_eq!(
            frames.get(1),
            Some(IsochFrame {
                req_count: 16,
                act_count: 12,
                status: TransferStatus::Underrun,
            })
        );
        assert_eq!(frames.total_req_count(), 24);
    }
}
