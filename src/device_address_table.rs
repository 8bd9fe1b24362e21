// Copyright 2018 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use usb_util::Speed;

use crate::error::{Error, Result};

/// Number of addresses on a usb bus.
pub const MAX_DEVICES: usize = 128;

/// DeviceAddressTable records, per device address, the high speed hub and port that
/// translate split transactions for it, and whether each hub has a translator per port.
pub struct DeviceAddressTable {
    high_speed_hub: [u8; MAX_DEVICES],
    high_speed_port: [u8; MAX_DEVICES],
    multi_tt: [bool; MAX_DEVICES],
}

impl Default for DeviceAddressTable {
    fn default() -> Self {
        DeviceAddressTable {
            high_speed_hub: [0; MAX_DEVICES],
            high_speed_port: [0; MAX_DEVICES],
            multi_tt: [false; MAX_DEVICES],
        }
    }
}

fn check_address(address: u8) -> Result<usize> {
    let index = address as usize;
    if index >= MAX_DEVICES {
        error!("device address {} out of range", address);
        return Err(Error::BadArgument);
    }
    Ok(index)
}

impl DeviceAddressTable {
    pub fn new() -> DeviceAddressTable {
        DeviceAddressTable::default()
    }

    /// Record the transaction translator for a device at `device_address` attached to `port`
    /// of `hub`. A low or full speed device on a high speed hub uses that hub; behind a full
    /// speed hub it uses the hub's own translator. High speed devices need none.
    pub fn resolve_high_speed_ancestor(
        &mut self,
        device_address: u8,
        speed: Speed,
        hub: u8,
        port: u8,
    ) -> Result<()> {
        let device = check_address(device_address)?;
        let hub_index = check_address(hub)?;
        let (hs_hub, hs_port) = if speed.needs_transaction_translator() {
            if self.high_speed_hub[hub_index] == 0 {
                (hub, port)
            } else {
                (
                    self.high_speed_hub[hub_index],
                    self.high_speed_port[hub_index],
                )
            }
        } else {
            (0, 0)
        };
        self.high_speed_hub[device] = hs_hub;
        self.high_speed_port[device] = hs_port;
        debug!(
            "device {} ({:?}) on hub {} port {}: high speed ancestor hub {} port {}",
            device_address, speed, hub, port, hs_hub, hs_port
        );
        Ok(())
    }

    /// Returns the (hub, port) translating for `device_address`, (0, 0) if none.
    pub fn high_speed_ancestor(&self, device_address: u8) -> Result<(u8, u8)> {
        let device = check_address(device_address)?;
        Ok((self.high_speed_hub[device], self.high_speed_port[device]))
    }

    pub fn set_multi_tt(&mut self, hub: u8, multi_tt: bool) -> Result<()> {
        let hub = check_address(hub)?;
        self.multi_tt[hub] = multi_tt;
        Ok(())
    }

    pub fn is_multi_tt(&self, hub: u8) -> bool {
        self.multi_tt
            .get(hub as usize)
            .cloned()
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_speed_on_high_speed_hub() {
        let mut table = DeviceAddressTable::new();
        // Hub 2 is a high speed hub on the root.
        table.resolve_high_speed_ancestor(2, Speed::High, 1, 1).unwrap();
        table.resolve_high_speed_ancestor(5, Speed::Full, 2, 3).unwrap();
        assert_eq!(table.high_speed_ancestor(2), Ok((0, 0)));
        assert_eq!(table.high_speed_ancestor(5), Ok((2, 3)));
    }

    #[test]
    fn full_speed_hub_inherits_ancestor() {
        let mut table = DeviceAddressTable::new();
        table.resolve_high_speed_ancestor(2, Speed::High, 1, 1).unwrap();
        // Full speed hub 4 on port 4 of hub 2, then a low speed device behind it.
        table.resolve_high_speed_ancestor(4, Speed::Full, 2, 4).unwrap();
        table.resolve_high_speed_ancestor(6, Speed::Low, 4, 1).unwrap();
        assert_eq!(table.high_speed_ancestor(6), Ok((2, 4)));
    }

    #[test]
    fn device_zero_recomputed() {
        let mut table = DeviceAddressTable::new();
        table.resolve_high_speed_ancestor(0, Speed::Full, 2, 1).unwrap();
        assert_eq!(table.high_speed_ancestor(0), Ok((2, 1)));
        table.resolve_high_speed_ancestor(0, Speed::High, 2, 1).unwrap();
        assert_eq!(table.high_speed_ancestor(0), Ok((0, 0)));
    }

    #[test]
    fn address_out_of_range() {
        let mut table = DeviceAddressTable::new();
        assert_eq!(
            table.resolve_high_speed_ancestor(128, Speed::Full, 1, 1),
            Err(Error::BadArgument)
        );
        assert_eq!(table.high_speed_ancestor(200), Err(Error::BadArgument));
        assert_eq!(table.set_multi_tt(128, true), Err(Error::BadArgument));
        assert!(!table.is_multi_tt(255));
        table.set_multi_tt(2, true).unwrap();
        assert!(table.is_multi_tt(2));
    }
}
