// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Who we are running on, and why we booted

use std::process::Command;

use anyhow::{bail, Context, Result};
use drv_fru_vpd::read_window;
use log::{debug, info};

use crate::config::{BoardIdSource, IdentityConfig, Revision};

pub trait Identity {
    fn board_id(&self) -> Result<u32>;

    /// Whether this boot follows a power-on reset.  Anything that cannot be
    /// determined counts as "no".
    fn power_on_reset(&self) -> bool;

    fn board_revision(&self, command: &[String]) -> Result<Revision>;
}

/// Parses a board id printed in hex, with or without a `0x` prefix.
pub fn parse_board_id(text: &str) -> Option<u32> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(digits, 16).ok()
}

/// Parses `major.minor` (or `major minor`).
pub fn parse_revision(text: &str) -> Option<Revision> {
    let mut parts = text
        .trim()
        .split(|c: char| c == '.' || c.is_whitespace())
        .filter(|s| !s.is_empty());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(Revision { major, minor })
}

fn output_of(argv: &[String]) -> Result<String> {
    let Some((program, args)) = argv.split_first() else {
        bail!("empty command");
    };
    let out = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("failed to run {argv:?}"))?;
    if !out.status.success() {
        bail!("{argv:?} failed: {}", out.status);
    }
    let text = String::from_utf8_lossy(&out.stdout).into_owned();
    debug!("{argv:?}: {:?}", text.trim_end());
    Ok(text)
}

/// Identity as reported by the running system.
pub struct SystemIdentity<'a> {
    config: &'a IdentityConfig,
}

impl<'a> SystemIdentity<'a> {
    pub fn new(config: &'a IdentityConfig) -> Self {
        Self { config }
    }
}

impl Identity for SystemIdentity<'_> {
    fn board_id(&self) -> Result<u32> {
        let id = match &self.config.board_id {
            BoardIdSource::Command(argv) => {
                let text = output_of(argv)?;
                parse_board_id(&text).with_context(|| {
                    format!("{argv:?} printed {:?}, not a board id", text.trim())
                })?
            }
            BoardIdSource::Eeprom { path, offset } => {
                let mut byte = [0u8; 1];
                let n = read_window(path, *offset, &mut byte)
                    .with_context(|| format!("reading {}", path.display()))?;
                if n != 1 {
                    bail!("{}: no board id at {offset:#x}", path.display());
                }
                u32::from(byte[0])
            }
        };
        info!("board id {id:#x}");
        Ok(id)
    }

    fn power_on_reset(&self) -> bool {
        let Some(argv) = &self.config.power_on_reset else {
            return true;
        };
        match output_of(argv) {
            Ok(text) => {
                info!("power-on reset: {}", text.trim());
                text.trim_start().starts_with("true")
            }
            Err(e) => {
                info!("power-on reset unknown: {e:#}");
                false
            }
        }
    }

    fn board_revision(&self, command: &[String]) -> Result<Revision> {
        let text = output_of(command)?;
        let rev = parse_revision(&text).with_context(|| {
            format!("{command:?} printed {:?}, not a revision", text.trim())
        })?;
        info!("board revision {}.{}", rev.major, rev.minor);
        Ok(rev)
    }
}
