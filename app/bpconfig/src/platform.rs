// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Platform gating, chassis SKU selection and the top-level run

use anyhow::{bail, Context as _, Result};
use drv_bp_autoconfig::legacy::{load_pairs, run_legacy, LegacyReport};
use drv_bp_autoconfig::{scan, BpError, Context, ScanReport};
use drv_fru_vpd::read_product_name;
use drv_i2c_api::RegisterWrite;
use drv_i2c_devices::sep::{Register, Sep};
use log::{error, info, warn};

use crate::config::{Config, Layout, PdbProbe, Probe, Revision, Sku};
use crate::identity::Identity;

#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Use this SKU instead of probing.
    pub sku: Option<String>,
    /// Configure even if this is not a power-on reset.
    pub skip_gates: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    NotManaged(u32),
    NotPowerOnReset,
    /// The board predates auto-configuration; its SEP was disabled instead.
    EarlyRevision {
        revision: Revision,
        disabled: Result<(), BpError>,
    },
    NoSku,
    Scanned(ScanReport),
    Legacy(Result<LegacyReport, BpError>),
}

/// Process exit code for a failure, by failure class.
pub fn exit_code_for(e: &BpError) -> i32 {
    match e {
        BpError::Fru(_) => 2,
        BpError::NoCatalogMatch { .. } => 3,
        BpError::RegisterWrite { .. }
        | BpError::ControlWrite { .. }
        | BpError::MuxSelect { .. } => 4,
        BpError::NotDetected
        | BpError::BusNotApplicable
        | BpError::BadSep { .. } => 5,
    }
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::NotManaged(_)
            | RunOutcome::NotPowerOnReset
            | RunOutcome::NoSku => 0,
            RunOutcome::EarlyRevision { disabled, .. } => {
                disabled.as_ref().err().map_or(0, exit_code_for)
            }
            RunOutcome::Scanned(report) => report
                .first_failure()
                .map_or(0, |(_, e)| exit_code_for(e)),
            RunOutcome::Legacy(Ok(report)) => {
                report.failed.first().map_or(0, |(_, _, e)| exit_code_for(e))
            }
            RunOutcome::Legacy(Err(e)) => exit_code_for(e),
        }
    }
}

fn pdb_matches(config: &Config, pdb: &PdbProbe) -> bool {
    match read_product_name(&pdb.eeprom, config.fru) {
        Ok(name) => {
            info!("PDB {}: {name}", pdb.eeprom.display());
            name.contains(&pdb.product)
        }
        Err(e) => {
            info!("PDB {}: {e}", pdb.eeprom.display());
            false
        }
    }
}

fn applies(config: &Config, sku: &Sku) -> bool {
    match &sku.probe {
        Probe::Pdb(pdb) => pdb_matches(config, pdb),
        Probe::NoPdb(path) => {
            let present = path.exists();
            if present {
                info!("PDB {} is present", path.display());
            }
            !present
        }
        Probe::LegacyConf(path) => path.exists(),
        Probe::Always => true,
    }
}

/// Picks the chassis SKU: the forced one, or else the first whose probe
/// applies.
pub fn select_sku<'a>(
    config: &'a Config,
    forced: Option<&str>,
) -> Result<Option<(&'a str, &'a Sku)>> {
    if let Some(name) = forced {
        let Some((name, sku)) = config.skus.get_key_value(name) else {
            bail!("{}", config.sku_name_suggestion(name));
        };
        return Ok(Some((name.as_str(), sku)));
    }
    Ok(config
        .skus
        .iter()
        .find(|(_, sku)| applies(config, sku))
        .map(|(name, sku)| (name.as_str(), sku)))
}

pub fn run(
    config: &Config,
    identity: &dyn Identity,
    bus: &mut dyn RegisterWrite,
    options: &Options,
) -> Result<RunOutcome> {
    if options.skip_gates {
        warn!("skipping the power-on reset check");
    } else if !identity.power_on_reset() {
        info!("not a power-on reset; leaving backplanes alone");
        return Ok(RunOutcome::NotPowerOnReset);
    }

    let board = identity.board_id().context("reading board id")?;
    if !config.board_ids.contains(&board) {
        info!("board {board:#x} is not a {} board", config.name);
        return Ok(RunOutcome::NotManaged(board));
    }

    if let Some(gate) = &config.revision_gate {
        let revision = identity
            .board_revision(&gate.command)
            .context("reading board revision")?;
        if revision < gate.minimum {
            let sep = Sep::on_bus(
                &config.bus_prefix,
                gate.disable_bus,
                config.sep_address,
            );
            info!(
                "board revision {}.{} is early; disabling {}",
                revision.major,
                revision.minor,
                sep.device()
            );
            let disabled = sep.disable(bus).map_err(|code| {
                error!("{}: disable failed: {code}", sep.device());
                BpError::ControlWrite {
                    register: Register::AutoConfigDisable as u8,
                    code,
                }
            });
            return Ok(RunOutcome::EarlyRevision { revision, disabled });
        }
    }

    let Some((name, sku)) = select_sku(config, options.sku.as_deref())?
    else {
        warn!("no chassis SKU applies; nothing to configure");
        return Ok(RunOutcome::NoSku);
    };
    info!("configuring {} chassis SKU {name}", config.name);

    match &sku.layout {
        Layout::Scan {
            numbering,
            connectors,
        } => {
            let platform = config.platform(numbering.clone());
            let mut ctx = Context::new(platform, connectors.len());
            Ok(RunOutcome::Scanned(scan(&mut ctx, bus, connectors)))
        }
        Layout::Legacy(topo) => {
            let pairs = load_pairs(&topo.conf);
            Ok(RunOutcome::Legacy(run_legacy(
                bus,
                &config.bus_prefix,
                config.sep_address,
                topo,
                &pairs,
            )))
        }
    }
}
