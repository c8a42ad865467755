// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for the PCA954x family of I2C multiplexers

use drv_i2c_api::{I2cDevice, RegisterWrite, ResponseCode};

/// Most PCA954x parts have at most 8 segments.
pub const MAX_SEGMENTS: u8 = 8;

/// The control register; writing a one-hot mask connects that segment.
const CONTROL: u8 = 0x00;

#[derive(Clone, Debug)]
pub struct Pca954x {
    device: I2cDevice,
    segments: u8,
}

impl Pca954x {
    pub fn new(device: I2cDevice, segments: u8) -> Self {
        Self { device, segments }
    }

    pub fn device(&self) -> &I2cDevice {
        &self.device
    }

    /// Connects `segment` (0-based) to the upstream bus, disconnecting all
    /// others.
    pub fn select(
        &self,
        bus: &mut (impl RegisterWrite + ?Sized),
        segment: u8,
    ) -> Result<(), ResponseCode> {
        if segment >= self.segments.min(MAX_SEGMENTS) {
            return Err(ResponseCode::BadSegment);
        }
        bus.write_reg(&self.device, CONTROL, 1 << segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_i2c_api::RecordingBus;

    #[test]
    fn select_writes_one_hot_mask() {
        let mux = Pca954x::new(I2cDevice::new("/dev/i2c-10", 0x70), 3);
        let mut bus = RecordingBus::new();
        mux.select(&mut bus, 0).unwrap();
        mux.select(&mut bus, 2).unwrap();
        let masks: Vec<_> =
            bus.writes().iter().map(|w| (w.reg, w.value)).collect();
        assert_eq!(masks, [(0x00, 0x01), (0x00, 0x04)]);
    }

    #[test]
    fn select_rejects_missing_segment() {
        let mux = Pca954x::new(I2cDevice::new("/dev/i2c-10", 0x71), 2);
        let mut bus = RecordingBus::new();
        assert_eq!(mux.select(&mut bus, 2), Err(ResponseCode::BadSegment));
        assert_eq!(bus.attempts(), 0);
    }
}
