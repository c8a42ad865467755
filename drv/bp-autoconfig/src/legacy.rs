// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Legacy chassis: fixed register/value pairs behind a mux tree
//!
//! Older chassis have no per-backplane FRU detection.  Instead, a text file
//! lists `register value` pairs (hex, one pair per line, ended by a `ff`
//! register) that are written verbatim to the PSoC behind every leaf of a
//! two-level PCA954x tree, followed by the enable sentinel.  Without any
//! pairs, each PSoC is disabled instead.

use core::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use drv_i2c_api::{I2cDevice, RegisterWrite, ResponseCode};
use drv_i2c_devices::pca954x::{Pca954x, MAX_SEGMENTS};
use drv_i2c_devices::sep::{Register, Sep, CONTROL_REGISTERS};
use log::{error, info, warn};
use serde::Deserialize;

use crate::BpError;

/// Register value that ends the pair list.
pub const CONF_END: u8 = 0xff;

/// Most pairs a configuration file may carry.
pub const MAX_PAIRS: usize = 32;

pub const DEFAULT_CONF_PATH: &str = "/var/lib/misc/ubm.conf";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegisterPair {
    pub register: u8,
    pub value: u8,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LegacyConfError {
    /// Not a `register value` pair of hex numbers.
    BadLine { line: usize },
    BadRegister { line: usize, register: u32 },
    BadValue { line: usize, value: u32 },
}

impl fmt::Display for LegacyConfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegacyConfError::BadLine { line } => {
                write!(f, "line {line}: expected `register value`")
            }
            LegacyConfError::BadRegister { line, register } => {
                write!(f, "line {line}: bad register {register:#x}")
            }
            LegacyConfError::BadValue { line, value } => {
                write!(f, "line {line}: bad value {value:#x}")
            }
        }
    }
}

impl std::error::Error for LegacyConfError {}

fn parse_hex(token: &str) -> Option<u32> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u32::from_str_radix(digits, 16).ok()
}

/// Parses the legacy configuration text into register/value pairs.
///
/// Blank lines are ignored.  Parsing stops at the `ff` register or after
/// [`MAX_PAIRS`] pairs; running out of lines first is accepted.  Any line
/// that does not hold a writable register and a value in `1..=0xff` rejects
/// the whole file.
pub fn parse_legacy_conf(
    text: &str,
) -> Result<Vec<RegisterPair>, LegacyConfError> {
    let mut pairs = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        let mut tokens = raw.split_whitespace();
        let Some(first) = tokens.next() else {
            continue;
        };
        let register =
            parse_hex(first).ok_or(LegacyConfError::BadLine { line })?;
        if register == u32::from(CONF_END) {
            return Ok(pairs);
        }
        let value = tokens
            .next()
            .and_then(parse_hex)
            .ok_or(LegacyConfError::BadLine { line })?;
        if tokens.next().is_some() {
            return Err(LegacyConfError::BadLine { line });
        }

        let register = u8::try_from(register)
            .ok()
            .filter(|r| CONTROL_REGISTERS.contains(r))
            .ok_or(LegacyConfError::BadRegister { line, register })?;
        let value = u8::try_from(value)
            .ok()
            .filter(|&v| v != 0)
            .ok_or(LegacyConfError::BadValue { line, value })?;

        if pairs.len() == MAX_PAIRS {
            warn!("only the first {MAX_PAIRS} register pairs are used");
            return Ok(pairs);
        }
        pairs.push(RegisterPair { register, value });
    }
    warn!("no end marker ({CONF_END:#x}) in legacy configuration");
    Ok(pairs)
}

/// Loads the pairs from `path`.  A file that cannot be read or parsed
/// yields no pairs, which disables every PSoC.
pub fn load_pairs(path: &Path) -> Vec<RegisterPair> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            error!("{}: {e}", path.display());
            return Vec::new();
        }
    };
    match parse_legacy_conf(&text) {
        Ok(pairs) => {
            for (n, p) in pairs.iter().enumerate() {
                info!(
                    "{}({n}): reg {:#04x} = {:#04x}",
                    path.display(),
                    p.register,
                    p.value
                );
            }
            pairs
        }
        Err(e) => {
            error!("{}: {e}", path.display());
            Vec::new()
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MuxHop {
    pub address: u8,
    pub segment: u8,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MuxFanout {
    pub address: u8,
    pub segments: u8,
}

fn default_conf() -> PathBuf {
    PathBuf::from(DEFAULT_CONF_PATH)
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LegacyTopology {
    #[serde(default = "default_conf")]
    pub conf: PathBuf,
    pub bus: u32,
    /// Mux connecting the backplane bus; selected once.
    pub root: MuxHop,
    pub first: MuxFanout,
    /// Behind every segment of `first`.
    pub second: MuxFanout,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LegacyReport {
    pub configured: usize,
    /// `(first segment, second segment, error)` for every PSoC that failed.
    pub failed: Vec<(u8, u8, BpError)>,
}

fn select(
    bus: &mut (impl RegisterWrite + ?Sized),
    mux: &Pca954x,
    segment: u8,
) -> Result<(), BpError> {
    mux.select(bus, segment).map_err(|code| {
        error!("mux {}: segment {segment}: {code}", mux.device());
        BpError::MuxSelect {
            address: mux.device().address,
            code,
        }
    })
}

fn program_psoc(
    bus: &mut (impl RegisterWrite + ?Sized),
    sep: &Sep,
    pairs: &[RegisterPair],
) -> Result<(), BpError> {
    let control = |register: u8| {
        move |code: ResponseCode| BpError::ControlWrite { register, code }
    };
    if pairs.is_empty() {
        return sep
            .disable(bus)
            .map_err(control(Register::AutoConfigDisable as u8));
    }
    for p in pairs {
        sep.write_raw(bus, p.register, p.value)
            .map_err(control(p.register))?;
    }
    sep.enable(bus)
        .map_err(control(Register::AutoConfigEnable as u8))
}

/// Writes `pairs` (or a disable) to the PSoC behind every leaf of the mux
/// tree.  A mux that cannot be switched ends the run; a PSoC that fails
/// only gives up its own segment.
pub fn run_legacy(
    bus: &mut (impl RegisterWrite + ?Sized),
    prefix: &str,
    sep_address: u8,
    topo: &LegacyTopology,
    pairs: &[RegisterPair],
) -> Result<LegacyReport, BpError> {
    let on_bus = |address| I2cDevice::on_bus(prefix, topo.bus, address);
    let root = Pca954x::new(on_bus(topo.root.address), MAX_SEGMENTS);
    let first = Pca954x::new(on_bus(topo.first.address), topo.first.segments);
    let second =
        Pca954x::new(on_bus(topo.second.address), topo.second.segments);
    let sep = Sep::new(on_bus(sep_address));

    select(bus, &root, topo.root.segment)?;

    let mut report = LegacyReport::default();
    for i in 0..topo.first.segments {
        select(bus, &first, i)?;
        for j in 0..topo.second.segments {
            select(bus, &second, j)?;
            info!("configuring BP on port {i} {j}");
            match program_psoc(bus, &sep, pairs) {
                Ok(()) => report.configured += 1,
                Err(e) => {
                    error!("BP on port {i} {j}: {e}");
                    report.failed.push((i, j, e));
                }
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_i2c_api::RecordingBus;
    use indoc::indoc;
    use std::io::Write;

    fn topology() -> LegacyTopology {
        LegacyTopology {
            conf: default_conf(),
            bus: 10,
            root: MuxHop {
                address: 0x75,
                segment: 0,
            },
            first: MuxFanout {
                address: 0x70,
                segments: 3,
            },
            second: MuxFanout {
                address: 0x71,
                segments: 2,
            },
        }
    }

    fn pair(register: u8, value: u8) -> RegisterPair {
        RegisterPair { register, value }
    }

    #[test]
    fn parses_pairs_until_sentinel() {
        let text = indoc! {"
            11 01
            0x12 0x40

            16 1
            ff
            17 08
        "};
        assert_eq!(
            parse_legacy_conf(text),
            Ok(vec![pair(0x11, 0x01), pair(0x12, 0x40), pair(0x16, 0x01)])
        );
    }

    #[test]
    fn missing_sentinel_is_accepted() {
        assert_eq!(parse_legacy_conf("11 01\n"), Ok(vec![pair(0x11, 1)]));
        assert_eq!(parse_legacy_conf(""), Ok(vec![]));
    }

    #[test]
    fn malformed_lines_reject_the_file() {
        assert_eq!(
            parse_legacy_conf("11 01\n0c 01\n"),
            Err(LegacyConfError::BadRegister {
                line: 2,
                register: 0x0c
            })
        );
        assert_eq!(
            parse_legacy_conf("20 01\n"),
            Err(LegacyConfError::BadRegister {
                line: 1,
                register: 0x20
            })
        );
        assert_eq!(
            parse_legacy_conf("11 00\n"),
            Err(LegacyConfError::BadValue { line: 1, value: 0 })
        );
        assert_eq!(
            parse_legacy_conf("11 100\n"),
            Err(LegacyConfError::BadValue {
                line: 1,
                value: 0x100
            })
        );
        assert_eq!(
            parse_legacy_conf("11\n"),
            Err(LegacyConfError::BadLine { line: 1 })
        );
        assert_eq!(
            parse_legacy_conf("11 02 03\n"),
            Err(LegacyConfError::BadLine { line: 1 })
        );
        assert_eq!(
            parse_legacy_conf("zz 02\n"),
            Err(LegacyConfError::BadLine { line: 1 })
        );
    }

    #[test]
    fn pair_count_is_capped() {
        let text = "11 01\n".repeat(MAX_PAIRS + 5);
        assert_eq!(parse_legacy_conf(&text).unwrap().len(), MAX_PAIRS);
    }

    #[test]
    fn load_falls_back_to_no_pairs() {
        assert!(load_pairs(Path::new("/nonexistent/ubm.conf")).is_empty());

        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"11 01\nbogus\n").unwrap();
        assert!(load_pairs(f.path()).is_empty());

        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"11 01\n17 08\nff\n").unwrap();
        assert_eq!(load_pairs(f.path()), [pair(0x11, 1), pair(0x17, 8)]);
    }

    #[test]
    fn writes_pairs_behind_every_leaf() {
        let mut bus = RecordingBus::new();
        let pairs = [pair(0x11, 0x01), pair(0x17, 0x08)];
        let report =
            run_legacy(&mut bus, "/dev/i2c-", 0x60, &topology(), &pairs)
                .unwrap();
        assert_eq!(report.configured, 6);
        assert!(report.failed.is_empty());

        let trace: Vec<_> = bus
            .writes()
            .iter()
            .map(|w| (w.device.address, w.reg, w.value))
            .collect();
        assert_eq!(
            &trace[..7],
            [
                (0x75, 0x00, 0x01),
                (0x70, 0x00, 0x01),
                (0x71, 0x00, 0x01),
                (0x60, 0x11, 0x01),
                (0x60, 0x17, 0x08),
                (0x60, 0x0e, 0xbe),
                (0x71, 0x00, 0x02),
            ]
        );
        let roots = trace.iter().filter(|t| t.0 == 0x75).count();
        assert_eq!(roots, 1);
        let enables = trace.iter().filter(|t| t.1 == 0x0e).count();
        assert_eq!(enables, 6);
        assert!(bus
            .writes()
            .iter()
            .all(|w| w.device.bus == Path::new("/dev/i2c-10")));
    }

    #[test]
    fn no_pairs_disables() {
        let mut bus = RecordingBus::new();
        let report =
            run_legacy(&mut bus, "/dev/i2c-", 0x60, &topology(), &[]).unwrap();
        assert_eq!(report.configured, 6);
        let psoc: Vec<_> = bus
            .writes()
            .iter()
            .filter(|w| w.device.address == 0x60)
            .map(|w| (w.reg, w.value))
            .collect();
        assert_eq!(psoc, [(0x14, 0xff); 6]);
    }

    #[test]
    fn psoc_failure_abandons_only_its_segment() {
        // Attempt 3 is the first pair write behind port 0 0.
        let mut bus = RecordingBus::new().fail_attempt(3);
        let pairs = [pair(0x11, 0x01)];
        let report =
            run_legacy(&mut bus, "/dev/i2c-", 0x60, &topology(), &pairs)
                .unwrap();
        assert_eq!(report.configured, 5);
        assert_eq!(
            report.failed,
            [(
                0,
                0,
                BpError::ControlWrite {
                    register: 0x11,
                    code: ResponseCode::Injected
                }
            )]
        );
    }

    #[test]
    fn mux_failure_ends_the_run() {
        let mut bus = RecordingBus::new().fail_attempt(0);
        assert_eq!(
            run_legacy(&mut bus, "/dev/i2c-", 0x60, &topology(), &[]),
            Err(BpError::MuxSelect {
                address: 0x75,
                code: ResponseCode::Injected
            })
        );
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn topology_from_toml() {
        let topo: LegacyTopology = toml::from_str(indoc! {"
            bus = 10
            root = { address = 0x75, segment = 0 }
            first = { address = 0x70, segments = 3 }
            second = { address = 0x71, segments = 2 }
        "})
        .unwrap();
        assert_eq!(topo, topology());
    }
}
