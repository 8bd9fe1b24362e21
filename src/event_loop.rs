// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::HashMap;
use std::mem::drop;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread;

use crate::error::{Error, Result};
use crate::sync::Mutex;

/// Identifies one event source registered on an `EventLoop`.
pub type EventToken = u64;

/// Interface for event handler.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, token: EventToken);
}

enum LoopMessage {
    Signal(EventToken),
    Stop,
}

type HandlerMap = Arc<Mutex<HashMap<EventToken, Weak<dyn EventHandler>>>>;

/// EventLoop runs on its own worker thread. When a registered token is signaled, the loop
/// invokes the mapped handler on that thread.
pub struct EventLoop {
    sender: Mutex<Sender<LoopMessage>>,
    handlers: HandlerMap,
    next_token: AtomicU64,
    thread_id: thread::ThreadId,
}

impl EventLoop {
    /// Start an event loop on a thread called `name`.
    pub fn start(name: &str) -> Result<(EventLoop, thread::JoinHandle<()>)> {
        let (sender, receiver) = channel();
        let handlers: HandlerMap = Arc::new(Mutex::new(HashMap::new()));
        let loop_handlers = handlers.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(receiver, loop_handlers))
            .map_err(err_msg!(Error::SysError, "failed to spawn {}", name))?;
        let event_loop = EventLoop {
            sender: Mutex::new(sender),
            handlers,
            next_token: AtomicU64::new(1),
            thread_id: handle.thread().id(),
        };
        Ok((event_loop, handle))
    }

    /// Reserve a token that can later be bound to a handler with `add_event`.
    pub fn new_token(&self) -> EventToken {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Add event to event loop.
    pub fn add_event(&self, token: EventToken, handler: Weak<dyn EventHandler>) {
        self.handlers.lock().insert(token, handler);
    }

    /// Removes event for this token.
    pub fn remove_event(&self, token: EventToken) {
        self.handlers.lock().remove(&token);
    }

    /// Wake the loop up to run the handler bound to `token`.
    pub fn signal(&self, token: EventToken) -> Result<()> {
        self.sender
            .lock()
            .send(LoopMessage::Signal(token))
            .map_err(err_msg!(Error::BadState, "event loop is gone"))
    }

    /// Returns true when called from the loop's own thread.
    pub fn on_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stops this event loop asynchronously. Events signaled after this are not handled.
    pub fn stop(&self) {
        let _ = self.sender.lock().send(LoopMessage::Stop);
    }
}

fn run_loop(receiver: Receiver<LoopMessage>, handlers: HandlerMap) {
    for message in receiver.iter() {
        let token = match message {
            LoopMessage::Stop => return,
            LoopMessage::Signal(token) => token,
        };
        let mut locked = handlers.lock();
        let weak_handler = match locked.get(&token) {
            Some(cb) => cb.clone(),
            None => {
                warn!("callback for token {} already removed", token);
                continue;
            }
        };
        match weak_handler.upgrade() {
            Some(handler) => {
                // Drop lock before triggering the event.
                drop(locked);
                handler.on_event(token);
            }
            // If the handler is already gone, we remove the token.
            None => {
                locked.remove(&token);
            }
        }
    }
}
