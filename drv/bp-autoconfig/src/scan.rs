// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Detection and configuration across all connectors of a chassis

use std::path::PathBuf;

use drv_i2c_api::RegisterWrite;
use log::{error, info};

use crate::{configure_connector, detect, BpError, Context};

/// A connector to probe: its index and where its FRU EEPROM is exposed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectorConfig {
    pub index: u8,
    pub eeprom: PathBuf,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConnectorOutcome {
    Configured { backplane: &'static str, seps: u8 },
    /// No FRU EEPROM at all; the connector is unpopulated.
    Absent,
    Failed(BpError),
}

/// Detects the backplane on one connector and configures its SEPs.
pub fn init_connector(
    ctx: &mut Context,
    bus: &mut (impl RegisterWrite + ?Sized),
    connector: &ConnectorConfig,
) -> Result<ConnectorOutcome, BpError> {
    let descriptor = match detect(ctx, connector.index, &connector.eeprom) {
        Ok(d) => d,
        Err(BpError::Fru(e)) if e.is_absent() => {
            info!(
                "BP#{}: no FRU at {}, skipping",
                connector.index,
                connector.eeprom.display()
            );
            return Ok(ConnectorOutcome::Absent);
        }
        Err(e) => return Err(e),
    };
    let seps = configure_connector(ctx, bus, connector.index)?;
    Ok(ConnectorOutcome::Configured {
        backplane: descriptor.name,
        seps,
    })
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScanReport {
    pub connectors: Vec<(u8, ConnectorOutcome)>,
}

impl ScanReport {
    /// The first failure in scan order, if any.
    pub fn first_failure(&self) -> Option<(u8, &BpError)> {
        self.connectors.iter().find_map(|(c, o)| match o {
            ConnectorOutcome::Failed(e) => Some((*c, e)),
            _ => None,
        })
    }

    pub fn configured(&self) -> usize {
        self.connectors
            .iter()
            .filter(|(_, o)| matches!(o, ConnectorOutcome::Configured { .. }))
            .count()
    }
}

/// Runs [`init_connector`] over every connector in order.  A failing
/// connector is logged and recorded; the scan carries on with the next one.
pub fn scan(
    ctx: &mut Context,
    bus: &mut (impl RegisterWrite + ?Sized),
    connectors: &[ConnectorConfig],
) -> ScanReport {
    let mut report = ScanReport::default();
    for c in connectors {
        let outcome = init_connector(ctx, bus, c).unwrap_or_else(|e| {
            error!("BP#{}: {e}", c.index);
            ConnectorOutcome::Failed(e)
        });
        report.connectors.push((c.index, outcome));
    }
    info!(
        "{} of {} connectors configured",
        report.configured(),
        connectors.len()
    );
    report
}
