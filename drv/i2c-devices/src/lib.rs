// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! I2C device drivers
//!
//! This crate contains the I2C device drivers needed to bring up disk
//! backplanes:
//!
//! - [`pca954x`]: PCA954x-family I2C multiplexer
//! - [`sep`]: Backplane SEP (PSoC) control-register block

pub mod pca954x;
pub mod sep;
