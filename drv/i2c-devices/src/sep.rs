// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for the backplane SEP (PSoC) control-register block
//!
//! Every SEP exposes its auto-configuration registers behind a single
//! control address.  Writes to these registers are only acted upon by the
//! SEP firmware once [`Register::AutoConfigEnable`] has been written with
//! [`AUTO_CONFIG_ENABLE`].

use core::ops::Range;

use drv_i2c_api::{I2cDevice, RegisterWrite, ResponseCode};
use num_derive::FromPrimitive;
use static_assertions::const_assert;

/// Address of the SEP control-register block.
pub const SEP_CONTROL_ADDRESS: u8 = 0x60;

/// Value written to [`Register::AutoConfigEnable`] to commit configuration.
pub const AUTO_CONFIG_ENABLE: u8 = 0xbe;

/// Value written to [`Register::AutoConfigDisable`].
pub const AUTO_CONFIG_DISABLE: u8 = 0xff;

/// Offsets that may be written by a raw (offset, value) pair.
pub const CONTROL_REGISTERS: Range<u8> = 0x0d..0x20;

const_assert!(SEP_CONTROL_ADDRESS <= 0x7f);

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum Register {
    ConfigValue = 0x0d,
    AutoConfigEnable = 0x0e,
    GroupId = 0x11,
    SlotId = 0x12,
    BayId = 0x13,
    AutoConfigDisable = 0x14,
    BackplaneInfo = 0x16,
    NumSlots = 0x17,
    StartSlot = 0x18,
    HfcIdentity = 0x19,
    SystemMgmtProtocol = 0x1a,
}

#[derive(Clone, Debug)]
pub struct Sep {
    device: I2cDevice,
}

impl Sep {
    pub fn new(device: I2cDevice) -> Self {
        Self { device }
    }

    /// The SEP control block on the given bus node.
    pub fn on_bus(prefix: &str, bus: u32, address: u8) -> Self {
        Self::new(I2cDevice::on_bus(prefix, bus, address))
    }

    pub fn device(&self) -> &I2cDevice {
        &self.device
    }

    pub fn write_reg(
        &self,
        bus: &mut (impl RegisterWrite + ?Sized),
        register: Register,
        value: u8,
    ) -> Result<(), ResponseCode> {
        bus.write_reg(&self.device, register as u8, value)
    }

    /// Writes an arbitrary control register, as named by an offset rather
    /// than a [`Register`].  Offsets outside of [`CONTROL_REGISTERS`] are
    /// refused without touching the bus.
    pub fn write_raw(
        &self,
        bus: &mut (impl RegisterWrite + ?Sized),
        offset: u8,
        value: u8,
    ) -> Result<(), ResponseCode> {
        if !CONTROL_REGISTERS.contains(&offset) {
            return Err(ResponseCode::NoRegister);
        }
        bus.write_reg(&self.device, offset, value)
    }

    /// Commits the auto-configuration registers.
    pub fn enable(
        &self,
        bus: &mut (impl RegisterWrite + ?Sized),
    ) -> Result<(), ResponseCode> {
        self.write_reg(bus, Register::AutoConfigEnable, AUTO_CONFIG_ENABLE)
    }

    /// Turns auto-configuration off, leaving the SEP unconfigured.
    pub fn disable(
        &self,
        bus: &mut (impl RegisterWrite + ?Sized),
    ) -> Result<(), ResponseCode> {
        self.write_reg(bus, Register::AutoConfigDisable, AUTO_CONFIG_DISABLE)
    }
}
