// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Known disk backplanes, and which of them are plugged in where.
//!
//! [`CATALOG`] maps the product name a backplane advertises in its FRU
//! EEPROM to the topology parameters needed to auto-configure its SEPs.
//! Product names are matched by substring, in table order, so the first
//! entry whose name appears anywhere in the FRU field wins.
//!
//! [`PresenceRegistry`] holds, per physical connector, the descriptor of the
//! backplane detected there (if any).

use core::fmt;

use num_derive::FromPrimitive;
use static_assertions::const_assert;

/// No backplane has more SEPs than this.
pub const MAX_SEP: u8 = 3;

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum BpType {
    Anybay2U25In8Bay = 1,
    U3Anybay2U8Bay = 2,
    E3sAnybay2U4Bay = 3,
    SasSata2U25In8Bay = 4,
    SasSata2U35In12Bay = 5,
}

/// Which kinds of drives a backplane takes.  SAS/SATA-only backplanes have
/// no PCIe slot or bay identity to configure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BpClass {
    SasSata,
    Anybay,
    Nvme,
    Edsff,
}

/// Size of the bay group a SEP is responsible for.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum GroupId {
    By4 = 4,
    By8 = 8,
}

impl GroupId {
    pub const fn size(self) -> u8 {
        self as u8
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Descriptor {
    /// Substring of the FRU board product name identifying this backplane
    pub name: &'static str,
    pub bp_type: BpType,
    pub sep_count: u8,
    pub bay_count: u8,
    pub class: BpClass,
    pub group: GroupId,
    /// Host-facing connector identity, indexed by SEP
    pub hfc: [u8; 2],
}

impl Descriptor {
    /// Returns the host-facing connector identity for SEP `sep`, if the
    /// descriptor defines one.
    pub fn hfc_for(&self, sep: u8) -> Option<u8> {
        self.hfc.get(usize::from(sep)).copied()
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub const CATALOG: &[Descriptor] = &[
    Descriptor {
        name: "2U 2.5\" Anybay 8-Bay BP",
        bp_type: BpType::Anybay2U25In8Bay,
        sep_count: 2,
        bay_count: 8,
        class: BpClass::Anybay,
        group: GroupId::By4,
        hfc: [0, 5],
    },
    Descriptor {
        name: "2U Volcano U.3 8-Bay BP",
        bp_type: BpType::U3Anybay2U8Bay,
        sep_count: 1,
        bay_count: 8,
        class: BpClass::Nvme,
        group: GroupId::By4,
        hfc: [0, 5],
    },
    Descriptor {
        name: "2U Volcano E3.S 4-Bay BP",
        bp_type: BpType::E3sAnybay2U4Bay,
        sep_count: 1,
        bay_count: 4,
        class: BpClass::Nvme,
        group: GroupId::By4,
        hfc: [0, 5],
    },
    Descriptor {
        name: "2U 2.5\" SAS/SATA 8-Bay BP",
        bp_type: BpType::SasSata2U25In8Bay,
        sep_count: 1,
        bay_count: 8,
        class: BpClass::SasSata,
        group: GroupId::By8,
        hfc: [0, 0],
    },
    Descriptor {
        name: "2U 3.5\" SAS/SATA 12-Bay BP",
        bp_type: BpType::SasSata2U35In12Bay,
        sep_count: 1,
        bay_count: 12,
        class: BpClass::SasSata,
        group: GroupId::By8,
        hfc: [0, 0],
    },
];

const fn catalog_is_sane(catalog: &[Descriptor]) -> bool {
    let mut i = 0;
    while i < catalog.len() {
        let d = &catalog[i];
        // An empty name would match every product string.
        if d.name.is_empty()
            || d.sep_count > MAX_SEP
            || d.sep_count as usize > d.hfc.len()
        {
            return false;
        }
        i += 1;
    }
    true
}

const_assert!(catalog_is_sane(CATALOG));

/// Returns the first descriptor in `catalog` whose name appears in
/// `product`.
pub fn match_product<'a>(
    product: &str,
    catalog: &'a [Descriptor],
) -> Option<&'a Descriptor> {
    catalog.iter().find(|d| product.contains(d.name))
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OutOfRange(pub u8);

impl fmt::Display for OutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connector {} is out of range", self.0)
    }
}

impl std::error::Error for OutOfRange {}

/// One slot per physical connector; empty until a backplane is detected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PresenceRegistry {
    slots: Vec<Option<Descriptor>>,
}

impl PresenceRegistry {
    pub fn new(connectors: usize) -> Self {
        Self {
            slots: vec![None; connectors],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The backplane detected on `connector`, or `Ok(None)` if nothing has
    /// been detected there yet.
    pub fn entry(
        &self,
        connector: u8,
    ) -> Result<Option<&Descriptor>, OutOfRange> {
        self.slots
            .get(usize::from(connector))
            .map(Option::as_ref)
            .ok_or(OutOfRange(connector))
    }

    pub fn insert(
        &mut self,
        connector: u8,
        descriptor: Descriptor,
    ) -> Result<(), OutOfRange> {
        let slot = self
            .slots
            .get_mut(usize::from(connector))
            .ok_or(OutOfRange(connector))?;
        *slot = Some(descriptor);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, Option<&Descriptor>)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, d)| (i as u8, d.as_ref()))
    }
}
