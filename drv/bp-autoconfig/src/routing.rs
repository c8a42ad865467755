// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bus routing: which bus node reaches which SEP

use drv_i2c_api::RegisterWrite;
use drv_i2c_devices::sep::Sep;
use log::{debug, error};
use serde::Deserialize;

use crate::sequencer::{self, SepTarget};
use crate::{BpError, Context};

/// How a chassis numbers the buses its backplane SEPs sit on.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusNumbering {
    /// `base + connector * stride + sep`
    Offset { base: u32, stride: u32 },
    /// Bus numbers listed per connector, then per SEP.
    Table(Vec<Vec<u32>>),
}

impl BusNumbering {
    pub fn bus(&self, connector: u8, sep: u8) -> Option<u32> {
        match self {
            BusNumbering::Offset { base, stride } => u32::from(connector)
                .checked_mul(*stride)?
                .checked_add(*base)?
                .checked_add(u32::from(sep)),
            BusNumbering::Table(rows) => rows
                .get(usize::from(connector))?
                .get(usize::from(sep))
                .copied(),
        }
    }
}

/// Configures every SEP of the backplane detected on `connector`, returning
/// how many were configured.
///
/// Every SEP is routed and checked before the first write, so a backplane
/// that cannot be configured completely is not touched at all.  Once writing
/// starts, the first SEP that fails ends the connector; later SEPs are not
/// attempted.
pub fn configure_connector(
    ctx: &Context,
    bus: &mut (impl RegisterWrite + ?Sized),
    connector: u8,
) -> Result<u8, BpError> {
    let descriptor = *ctx
        .registry
        .entry(connector)
        .map_err(|_| BpError::BusNotApplicable)?
        .ok_or(BpError::NotDetected)?;
    if descriptor.sep_count == 0 {
        return Err(BpError::NotDetected);
    }

    let platform = &ctx.platform;
    let seps = (0..descriptor.sep_count)
        .map(|sep| {
            let number = platform
                .numbering
                .bus(connector, sep)
                .ok_or(BpError::BusNotApplicable)?;
            let target = SepTarget {
                descriptor,
                connector,
                sep,
                mgmt_protocol: platform.mgmt_protocol,
            };
            sequencer::plan(&target)?;
            let dev =
                Sep::on_bus(&platform.bus_prefix, number, platform.sep_address);
            Ok((dev, target))
        })
        .collect::<Result<Vec<_>, BpError>>()
        .map_err(|e| {
            error!("BP#{connector} [{descriptor}]: {e}");
            e
        })?;

    for (dev, target) in &seps {
        debug!("BP#{connector} SEP{}: using {}", target.sep, dev.device());
        sequencer::run(bus, dev, target).map_err(|e| {
            error!(
                "BP#{connector} [{descriptor}]: SEP{} failed: {e}",
                target.sep
            );
            e
        })?;
    }
    Ok(descriptor.sep_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Platform;
    use bp_catalog::{Descriptor, CATALOG};
    use drv_i2c_api::RecordingBus;
    use std::path::PathBuf;

    fn e3s_table() -> BusNumbering {
        BusNumbering::Table(vec![
            vec![55],
            vec![56],
            vec![61],
            vec![62],
            vec![63],
            vec![64],
        ])
    }

    #[test]
    fn offset_numbering() {
        let n = BusNumbering::Offset { base: 55, stride: 2 };
        assert_eq!(n.bus(0, 0), Some(55));
        assert_eq!(n.bus(0, 1), Some(56));
        assert_eq!(n.bus(2, 1), Some(60));

        let n = BusNumbering::Offset {
            base: u32::MAX,
            stride: 2,
        };
        assert_eq!(n.bus(1, 0), None);
    }

    #[test]
    fn table_numbering() {
        let n = e3s_table();
        assert_eq!(n.bus(2, 0), Some(61));
        assert_eq!(n.bus(5, 0), Some(64));
        assert_eq!(n.bus(2, 1), None);
        assert_eq!(n.bus(6, 0), None);
    }

    #[test]
    fn numbering_from_toml() {
        #[derive(Deserialize)]
        struct Holder {
            numbering: BusNumbering,
        }
        let h: Holder =
            toml::from_str("numbering = { offset = { base = 55, stride = 2 } }")
                .unwrap();
        assert_eq!(h.numbering, BusNumbering::Offset { base: 55, stride: 2 });

        let h: Holder =
            toml::from_str("numbering = { table = [[55], [56], [61]] }")
                .unwrap();
        assert_eq!(h.numbering.bus(2, 0), Some(61));
    }

    #[test]
    fn empty_entry_is_not_detected() {
        let ctx = Context::new(Platform::new(e3s_table()), 6);
        let mut bus = RecordingBus::new();
        assert_eq!(
            configure_connector(&ctx, &mut bus, 1),
            Err(BpError::NotDetected)
        );
        assert_eq!(bus.attempts(), 0);
    }

    #[test]
    fn backplane_without_seps_is_not_detected() {
        let mut ctx = Context::new(Platform::new(e3s_table()), 6);
        let no_seps = Descriptor {
            sep_count: 0,
            ..CATALOG[2]
        };
        ctx.registry.insert(3, no_seps).unwrap();
        let mut bus = RecordingBus::new();
        assert_eq!(
            configure_connector(&ctx, &mut bus, 3),
            Err(BpError::NotDetected)
        );
        assert_eq!(bus.attempts(), 0);
    }

    #[test]
    fn sep_without_hfc_identity_writes_nothing() {
        let mut ctx = Context::new(
            Platform::new(BusNumbering::Offset { base: 55, stride: 3 }),
            1,
        );
        let three_seps = Descriptor {
            sep_count: 3,
            ..CATALOG[0]
        };
        ctx.registry.insert(0, three_seps).unwrap();
        let mut bus = RecordingBus::new();
        assert_eq!(
            configure_connector(&ctx, &mut bus, 0),
            Err(BpError::BadSep { sep: 2 })
        );
        assert_eq!(bus.attempts(), 0);
    }

    #[test]
    fn partly_routed_backplane_writes_nothing() {
        let mut ctx = Context::new(
            Platform::new(BusNumbering::Table(vec![vec![55]])),
            1,
        );
        ctx.registry.insert(0, CATALOG[0]).unwrap();
        let mut bus = RecordingBus::new();
        assert_eq!(
            configure_connector(&ctx, &mut bus, 0),
            Err(BpError::BusNotApplicable)
        );
        assert_eq!(bus.attempts(), 0);
    }

    #[test]
    fn out_of_range_connector() {
        let ctx = Context::new(Platform::new(e3s_table()), 6);
        let mut bus = RecordingBus::new();
        assert_eq!(
            configure_connector(&ctx, &mut bus, 6),
            Err(BpError::BusNotApplicable)
        );
    }

    #[test]
    fn missing_table_row_is_not_applicable() {
        let mut ctx = Context::new(
            Platform::new(BusNumbering::Table(vec![vec![55]])),
            2,
        );
        ctx.registry.insert(1, CATALOG[2]).unwrap();
        let mut bus = RecordingBus::new();
        assert_eq!(
            configure_connector(&ctx, &mut bus, 1),
            Err(BpError::BusNotApplicable)
        );
        assert_eq!(bus.attempts(), 0);
    }

    #[test]
    fn failed_sep_stops_siblings() {
        let mut ctx = Context::new(
            Platform::new(BusNumbering::Offset { base: 55, stride: 2 }),
            3,
        );
        ctx.registry.insert(0, CATALOG[0]).unwrap();
        let mut bus = RecordingBus::new().fail_bus("/dev/i2c-55");
        assert!(configure_connector(&ctx, &mut bus, 0).is_err());
        assert_eq!(bus.attempts(), 1);
        assert!(bus
            .writes()
            .iter()
            .all(|w| w.device.bus != PathBuf::from("/dev/i2c-56")));
    }
}
