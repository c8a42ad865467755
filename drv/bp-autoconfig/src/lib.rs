// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Disk backplane detection and SEP auto-configuration
//!
//! For every backplane connector, the board product name is read from the
//! backplane's FRU EEPROM and matched against [`bp_catalog::CATALOG`].  The
//! match lands in the [`PresenceRegistry`], and the bus router then walks
//! each SEP on the backplane through the auto-configuration sequence:
//!
//! ```text
//! GroupId -> SlotId -> BayId -> BackplaneInfo -> NumSlots -> StartSlot
//!         -> HfcIdentity -> SystemMgmtProtocol -> Enable
//! ```
//!
//! `SlotId` and `BayId` are skipped for SAS/SATA-only backplanes.  The first
//! failed write ends the sequence for that SEP and for the rest of its
//! connector; `Enable` is only written once everything before it landed.
//!
//! All state lives in a [`Context`] that is passed down explicitly; there
//! are no globals and nothing here spawns threads.

use core::fmt;

use bp_catalog::{Descriptor, PresenceRegistry, CATALOG};
use derive_more::From;
use drv_fru_vpd::{FruWindow, VpdError};
use drv_i2c_api::ResponseCode;
use drv_i2c_devices::sep::SEP_CONTROL_ADDRESS;

pub mod detect;
pub mod legacy;
pub mod routing;
pub mod scan;
pub mod sequencer;

pub use detect::detect;
pub use routing::{configure_connector, BusNumbering};
pub use scan::{init_connector, scan, ConnectorConfig, ConnectorOutcome, ScanReport};
pub use sequencer::{SepTarget, State, Step};

pub const DEFAULT_BUS_PREFIX: &str = "/dev/i2c-";

/// System type nibble used when the platform does not override it.
pub const DEFAULT_SYSTEM_TYPE: u8 = 0x2;

/// Management protocol nibble used when the platform does not override it.
pub const DEFAULT_MGMT_PROTOCOL: u8 = 0x3;

/// Combines the system type and management protocol nibbles into the value
/// of the system type / management protocol register.
pub const fn mgmt_protocol_value(system_type: u8, protocol: u8) -> u8 {
    ((system_type & 0xf) << 4) | (protocol & 0xf)
}

#[derive(Clone, Debug, PartialEq, Eq, From)]
pub enum BpError {
    /// The FRU EEPROM could not be opened or positioned.
    #[from]
    Fru(VpdError),
    /// The FRU product name matches no known backplane.
    NoCatalogMatch { product: String },
    /// Nothing has been detected on the connector.
    NotDetected,
    /// The connector (or one of its SEPs) has no bus to be reached on.
    BusNotApplicable,
    /// The descriptor cannot describe this SEP.
    BadSep { sep: u8 },
    /// An auto-configuration step failed to write its register.
    RegisterWrite { step: Step, code: ResponseCode },
    /// A direct control register write (disable, legacy pairs) failed.
    ControlWrite { register: u8, code: ResponseCode },
    /// A multiplexer could not be switched to the requested segment.
    MuxSelect { address: u8, code: ResponseCode },
}

impl fmt::Display for BpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BpError::Fru(e) => write!(f, "FRU: {e}"),
            BpError::NoCatalogMatch { product } => {
                write!(f, "no known backplane matches {product:?}")
            }
            BpError::NotDetected => write!(f, "no backplane detected"),
            BpError::BusNotApplicable => write!(f, "no bus for connector"),
            BpError::BadSep { sep } => {
                write!(f, "SEP {sep} cannot be configured from this backplane")
            }
            BpError::RegisterWrite { step, code } => {
                write!(f, "step {step:?} failed: {code}")
            }
            BpError::ControlWrite { register, code } => {
                write!(f, "write to register {register:#04x} failed: {code}")
            }
            BpError::MuxSelect { address, code } => {
                write!(f, "mux {address:#04x} select failed: {code}")
            }
        }
    }
}

impl std::error::Error for BpError {}

/// Everything about the platform the router and sequencer need.
#[derive(Clone, Debug)]
pub struct Platform {
    /// Bus device node prefix; the bus number is appended.
    pub bus_prefix: String,
    pub sep_address: u8,
    pub numbering: BusNumbering,
    /// Value of the system type / management protocol register.
    pub mgmt_protocol: u8,
    pub fru: FruWindow,
    pub catalog: &'static [Descriptor],
}

impl Platform {
    pub fn new(numbering: BusNumbering) -> Self {
        Self {
            bus_prefix: DEFAULT_BUS_PREFIX.to_string(),
            sep_address: SEP_CONTROL_ADDRESS,
            numbering,
            mgmt_protocol: mgmt_protocol_value(
                DEFAULT_SYSTEM_TYPE,
                DEFAULT_MGMT_PROTOCOL,
            ),
            fru: FruWindow::default(),
            catalog: CATALOG,
        }
    }
}

/// State shared by detection and configuration of one chassis.
#[derive(Clone, Debug)]
pub struct Context {
    pub platform: Platform,
    pub registry: PresenceRegistry,
}

impl Context {
    pub fn new(platform: Platform, connectors: usize) -> Self {
        Self {
            platform,
            registry: PresenceRegistry::new(connectors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mgmt_protocol() {
        let p = Platform::new(BusNumbering::Offset { base: 55, stride: 2 });
        assert_eq!(p.mgmt_protocol, 0x23);
        assert_eq!(mgmt_protocol_value(0x1, 0xf), 0x1f);
        assert_eq!(mgmt_protocol_value(0x12, 0x34), 0x24);
    }
}
