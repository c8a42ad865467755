// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A bus that records writes instead of performing them
//!
//! Used for `--dry-run` and as the test double for everything that drives a
//! [`RegisterWrite`].  Failures can be injected per register offset, per bus
//! node, or on the Nth write attempt.

use std::path::PathBuf;

use log::info;

use crate::{I2cDevice, RegisterWrite, ResponseCode};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WriteRecord {
    pub device: I2cDevice,
    pub reg: u8,
    pub value: u8,
}

#[derive(Clone, Debug)]
enum Fault {
    Register(u8),
    Bus(PathBuf),
    Attempt(usize),
}

#[derive(Clone, Debug, Default)]
pub struct RecordingBus {
    writes: Vec<WriteRecord>,
    faults: Vec<Fault>,
    attempts: usize,
    log_writes: bool,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recording bus that also logs every write at `info`.
    pub fn logging() -> Self {
        Self {
            log_writes: true,
            ..Self::default()
        }
    }

    /// Fail every write to register `reg`, on any device.
    pub fn fail_register(mut self, reg: u8) -> Self {
        self.faults.push(Fault::Register(reg));
        self
    }

    /// Fail every write to any device on the given bus node.
    pub fn fail_bus(mut self, bus: impl Into<PathBuf>) -> Self {
        self.faults.push(Fault::Bus(bus.into()));
        self
    }

    /// Fail the `n`th write attempt (0-based) made through this bus.
    pub fn fail_attempt(mut self, n: usize) -> Self {
        self.faults.push(Fault::Attempt(n));
        self
    }

    /// Writes that succeeded, in issue order.
    pub fn writes(&self) -> &[WriteRecord] {
        &self.writes
    }

    /// Number of write attempts, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn clear(&mut self) {
        self.writes.clear();
        self.attempts = 0;
    }

    fn faulted(&self, device: &I2cDevice, reg: u8) -> bool {
        self.faults.iter().any(|f| match f {
            Fault::Register(r) => *r == reg,
            Fault::Bus(b) => *b == device.bus,
            Fault::Attempt(n) => *n == self.attempts,
        })
    }
}

impl RegisterWrite for RecordingBus {
    fn write_reg(
        &mut self,
        device: &I2cDevice,
        reg: u8,
        value: u8,
    ) -> Result<(), ResponseCode> {
        device.validate_address()?;
        let faulted = self.faulted(device, reg);
        self.attempts += 1;
        if faulted {
            return Err(ResponseCode::Injected);
        }
        if self.log_writes {
            info!("dry run: {device}: reg {reg:#04x} <- {value:#04x}");
        }
        self.writes.push(WriteRecord {
            device: device.clone(),
            reg,
            value,
        });
        Ok(())
    }
}
