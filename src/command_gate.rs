// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::thread::{self, ThreadId};

use crate::error::{Error, Result};
use crate::sync::{Condvar, Mutex};

/// CommandGate serializes every mutation of the state it owns. Actions run one at a time on
/// the calling thread. The gate is not reentrant: an action that tries to enter the gate again
/// fails instead of deadlocking.
pub struct CommandGate<S> {
    state: Mutex<S>,
    wakeup: Condvar,
    owner: spin::Mutex<Option<ThreadId>>,
}

struct OwnerGuard<'a> {
    owner: &'a spin::Mutex<Option<ThreadId>>,
}

impl<'a> OwnerGuard<'a> {
    fn enter(owner: &'a spin::Mutex<Option<ThreadId>>) -> OwnerGuard<'a> {
        *owner.lock() = Some(thread::current().id());
        OwnerGuard { owner }
    }
}

impl<'a> Drop for OwnerGuard<'a> {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}

impl<S> CommandGate<S> {
    pub fn new(state: S) -> CommandGate<S> {
        CommandGate {
            state: Mutex::new(state),
            wakeup: Condvar::new(),
            owner: spin::Mutex::new(None),
        }
    }

    /// Returns true if the calling thread is running a gated action.
    pub fn on_thread(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    /// Run `action` with exclusive access to the state.
    pub fn run_action<R, F>(&self, action: F) -> Result<R>
    where
        F: FnOnce(&mut S) -> R,
    {
        self.run_action_when(|_| true, action)
    }

    /// Run `action` once `ready` holds. While `ready` is false the gate is released and the
    /// caller sleeps until another action completes.
    pub fn run_action_when<R, P, F>(&self, mut ready: P, action: F) -> Result<R>
    where
        P: FnMut(&mut S) -> bool,
        F: FnOnce(&mut S) -> R,
    {
        if self.on_thread() {
            error!("command gate entered again from a gated action");
            return Err(Error::SyncRequestOnDispatchThread);
        }
        let mut state = self.state.lock();
        while !ready(&mut *state) {
            state = self.wakeup.wait(state);
        }
        let result = {
            let _owner = OwnerGuard::enter(&self.owner);
            action(&mut *state)
        };
        drop(state);
        self.wakeup.notify_all();
        Ok(result)
    }
}
