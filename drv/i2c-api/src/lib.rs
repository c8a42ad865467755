// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client API for Linux I2C character devices
//!
//! This API allows for single-byte register writes to I2C devices hanging off
//! a `/dev/i2c-N` bus node.  The actual bus transaction is performed by the
//! kernel's i2c-dev driver; this crate handles selecting the target address
//! and framing the register/value pair.
//!
//! # I2C devices
//!
//! An I2C device is uniquely identified by a 2-tuple:
//!
//! - The bus device node (e.g. `/dev/i2c-55`)
//! - The 7-bit address of the device itself
//!
//! Multiplexers are not modelled here: a mux is simply another device whose
//! control register is written before talking to the devices behind it.
//!
//! # Handle lifetime
//!
//! The bus node is opened for each write and closed before the write
//! returns, on success and failure alike.  No handle is cached across
//! devices.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use log::{debug, error};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

mod recording;

pub use recording::{RecordingBus, WriteRecord};

/// `ioctl` request that sets the slave address for subsequent transfers on
/// an i2c-dev file descriptor (see `linux/i2c-dev.h`).
const I2C_SLAVE: u32 = 0x0703;

/// The response code returned from a bus operation.  These response codes
/// are pretty specific, not because the caller is expected to necessarily
/// handle them differently, but to give upstack software some modicum of
/// context surrounding the error.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum ResponseCode {
    /// Bus device node could not be opened
    Open = 1,
    /// Slave address selection was refused by the adapter
    AddressSelect = 2,
    /// Register write failed on the wire (typically a NAK)
    Write = 3,
    /// Adapter accepted fewer bytes than were written
    ShortWrite = 4,
    /// Device address is reserved or not a 7-bit address
    ReservedAddress = 5,
    /// Device does not have indicated register
    NoRegister = 6,
    /// Indicated segment is an invalid segment identifier
    BadSegment = 7,
    /// Failure injected by a [`RecordingBus`]
    Injected = 8,
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ResponseCode::Open => "failed to open bus device",
            ResponseCode::AddressSelect => "failed to select slave address",
            ResponseCode::Write => "register write failed",
            ResponseCode::ShortWrite => "short register write",
            ResponseCode::ReservedAddress => "reserved device address",
            ResponseCode::NoRegister => "no such register",
            ResponseCode::BadSegment => "no such mux segment",
            ResponseCode::Injected => "injected failure",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ResponseCode {}

#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[allow(clippy::unusual_byte_groupings)]
pub enum ReservedAddress {
    GeneralCall = 0b0000_000,
    CBUSAddress = 0b0000_001,
    FutureBus = 0b0000_010,
    FuturePurposes = 0b0000_011,
    HighSpeedReserved00 = 0b0000_100,
    HighSpeedReserved01 = 0b0000_101,
    HighSpeedReserved10 = 0b0000_110,
    HighSpeedReserved11 = 0b0000_111,
    TenBit00 = 0b1111_100,
    TenBit01 = 0b1111_101,
    TenBit10 = 0b1111_110,
    TenBit11 = 0b1111_111,
}

///
/// The 2-tuple that uniquely identifies an I2C device.
///
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct I2cDevice {
    pub bus: PathBuf,
    pub address: u8,
}

impl fmt::Display for I2cDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:#x}", self.bus.display(), self.address)
    }
}

impl I2cDevice {
    pub fn new(bus: impl Into<PathBuf>, address: u8) -> Self {
        Self {
            bus: bus.into(),
            address,
        }
    }

    ///
    /// Returns the device at `address` on bus number `bus`, where the bus
    /// device node is formed by appending the number to `prefix` (e.g.
    /// `/dev/i2c-` and 55 yield `/dev/i2c-55`).
    ///
    pub fn on_bus(prefix: &str, bus: u32, address: u8) -> Self {
        Self::new(format!("{prefix}{bus}"), address)
    }

    ///
    /// Checks that the address is a 7-bit address outside of the ranges
    /// reserved by the I2C specification.
    ///
    pub fn validate_address(&self) -> Result<(), ResponseCode> {
        if self.address > 0x7f
            || ReservedAddress::from_u8(self.address).is_some()
        {
            Err(ResponseCode::ReservedAddress)
        } else {
            Ok(())
        }
    }
}

/// A byte-level register write primitive.
///
/// Implementations perform exactly one register write per call and retain no
/// state about the device between calls.
pub trait RegisterWrite {
    fn write_reg(
        &mut self,
        device: &I2cDevice,
        reg: u8,
        value: u8,
    ) -> Result<(), ResponseCode>;
}

impl<T: RegisterWrite + ?Sized> RegisterWrite for &mut T {
    fn write_reg(
        &mut self,
        device: &I2cDevice,
        reg: u8,
        value: u8,
    ) -> Result<(), ResponseCode> {
        (**self).write_reg(device, reg, value)
    }
}

/// Register writes through the kernel's i2c-dev interface.
#[derive(Copy, Clone, Debug, Default)]
pub struct LinuxI2c;

impl RegisterWrite for LinuxI2c {
    fn write_reg(
        &mut self,
        device: &I2cDevice,
        reg: u8,
        value: u8,
    ) -> Result<(), ResponseCode> {
        device.validate_address()?;
        debug!("{device}: reg {reg:#04x} <- {value:#04x}");

        // The file is dropped (and thereby closed) on every return path.
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&device.bus)
            .map_err(|e| {
                error!("failed to open {}: {e}", device.bus.display());
                ResponseCode::Open
            })?;

        // SAFETY: `file` is open for the duration of the call, and I2C_SLAVE
        // takes its argument by value.
        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                I2C_SLAVE as _,
                libc::c_ulong::from(device.address),
            )
        };
        if rc < 0 {
            error!(
                "{device}: address select failed: {}",
                std::io::Error::last_os_error()
            );
            return Err(ResponseCode::AddressSelect);
        }

        // A two byte write of register and value is an SMBus "write byte
        // data" transaction on the wire.
        match file.write(&[reg, value]) {
            Ok(2) => Ok(()),
            Ok(n) => {
                error!("{device}: short write at reg {reg:#04x} ({n} bytes)");
                Err(ResponseCode::ShortWrite)
            }
            Err(e) => {
                error!("{device}: write to reg {reg:#04x} failed: {e}");
                Err(ResponseCode::Write)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_on_bus() {
        let dev = I2cDevice::on_bus("/dev/i2c-", 55, 0x60);
        assert_eq!(dev.bus, PathBuf::from("/dev/i2c-55"));
        assert_eq!(dev.to_string(), "/dev/i2c-55 0x60");
    }

    #[test]
    fn reserved_addresses_are_rejected() {
        for addr in [0x00, 0x03, 0x07, 0x78, 0x7f, 0x80, 0xff] {
            assert_eq!(
                I2cDevice::new("/dev/i2c-1", addr).validate_address(),
                Err(ResponseCode::ReservedAddress),
                "address {addr:#x}"
            );
        }
        for addr in [0x08, 0x50, 0x60, 0x75, 0x77] {
            assert!(I2cDevice::new("/dev/i2c-1", addr)
                .validate_address()
                .is_ok());
        }
    }

    #[test]
    fn missing_bus_node_fails_to_open() {
        let dev = I2cDevice::new("/nonexistent/i2c-255", 0x60);
        assert_eq!(
            LinuxI2c.write_reg(&dev, 0x11, 0x01),
            Err(ResponseCode::Open)
        );
    }

    #[test]
    fn reserved_address_checked_before_open() {
        let dev = I2cDevice::new("/nonexistent/i2c-255", 0x00);
        assert_eq!(
            LinuxI2c.write_reg(&dev, 0x11, 0x01),
            Err(ResponseCode::ReservedAddress)
        );
    }
}
