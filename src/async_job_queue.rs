// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::mem;
use std::sync::Arc;

use crate::error::Result;
use crate::event_loop::{EventHandler, EventLoop, EventToken};
use crate::sync::Mutex;

type Job = Box<dyn FnOnce() + Send>;

/// Async Job Queue can schedule async jobs on the event loop thread.
pub struct AsyncJobQueue {
    jobs: Mutex<Vec<Job>>,
    event_loop: Arc<EventLoop>,
    token: EventToken,
}

impl AsyncJobQueue {
    pub fn init(event_loop: &Arc<EventLoop>) -> Arc<AsyncJobQueue> {
        let token = event_loop.new_token();
        let queue = Arc::new(AsyncJobQueue {
            jobs: Mutex::new(Vec::new()),
            event_loop: event_loop.clone(),
            token,
        });
        let handler: Arc<dyn EventHandler> = queue.clone();
        event_loop.add_event(token, Arc::downgrade(&handler));
        queue
    }

    /// Jobs run in the order they were queued.
    pub fn queue_job<T: FnOnce() + 'static + Send>(&self, cb: T) -> Result<()> {
        self.jobs.lock().push(Box::new(cb));
        self.event_loop.signal(self.token)
    }
}

impl Drop for AsyncJobQueue {
    fn drop(&mut self) {
        self.event_loop.remove_event(self.token);
    }
}

impl EventHandler for AsyncJobQueue {
    fn on_event(&self, _token: EventToken) {
        let jobs = mem::replace(&mut *self.jobs.lock(), Vec::new());
        for cb in jobs {
            cb();
        }
    }
}
