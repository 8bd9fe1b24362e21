// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use super::endpoint::{IsochEndpoint, IsochEndpointKey};
use crate::error::{Error, Result};

/// Stable handle of an isochronous endpoint owned by a directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IsochEndpointId(usize);

/// IsochEndpointDirectory owns the isochronous endpoints of one controller. Released
/// endpoints go to a free list and are reinitialized when handed out again, so ids never
/// move. Retired endpoints are still draining: they keep their id but no longer match a key.
#[derive(Default)]
pub struct IsochEndpointDirectory {
    endpoints: Vec<IsochEndpoint>,
    active: Vec<IsochEndpointId>,
    retired: Vec<IsochEndpointId>,
    free: Vec<IsochEndpointId>,
}

impl IsochEndpointDirectory {
    pub fn new() -> IsochEndpointDirectory {
        IsochEndpointDirectory::default()
    }

    /// New endpoints go to the front of the active list.
    pub fn create_endpoint(&mut self, key: IsochEndpointKey) -> IsochEndpointId {
        let id = match self.free.pop() {
            Some(id) => {
                self.endpoints[id.0].init(key);
                id
            }
            None => {
                self.endpoints.push(IsochEndpoint::new(key));
                IsochEndpointId(self.endpoints.len() - 1)
            }
        };
        self.active.insert(0, id);
        id
    }

    pub fn find_endpoint(&self, key: IsochEndpointKey) -> Option<IsochEndpointId> {
        self.active
            .iter()
            .find(|id| self.endpoints[id.0].key() == key)
            .cloned()
    }

    /// Stop matching `id` by key. It stays reachable by id until deallocated.
    pub fn retire_endpoint(&mut self, id: IsochEndpointId) -> Result<()> {
        let index = self
            .active
            .iter()
            .position(|a| *a == id)
            .ok_or(Error::BadArgument)?;
        self.active.remove(index);
        self.retired.push(id);
        Ok(())
    }

    pub fn deallocate_endpoint(&mut self, id: IsochEndpointId) -> Result<()> {
        if let Some(index) = self.active.iter().position(|a| *a == id) {
            self.active.remove(index);
        } else if let Some(index) = self.retired.iter().position(|a| *a == id) {
            self.retired.remove(index);
        } else {
            return Err(Error::BadArgument);
        }
        self.free.push(id);
        Ok(())
    }

    fn is_live(&self, id: IsochEndpointId) -> bool {
        self.active.contains(&id) || self.retired.contains(&id)
    }

    pub fn get(&self, id: IsochEndpointId) -> Option<&IsochEndpoint> {
        if self.is_live(id) {
            self.endpoints.get(id.0)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, id: IsochEndpointId) -> Option<&mut IsochEndpoint> {
        if self.is_live(id) {
            self.endpoints.get_mut(id.0)
        } else {
            None
        }
    }

    pub fn active_endpoints(&self) -> &[IsochEndpointId] {
        &self.active
    }

    pub fn retired_endpoints(&self) -> &[IsochEndpointId] {
        &self.retired
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}
