// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bp_catalog::CATALOG;
use drv_bp_autoconfig::legacy::LegacyTopology;
use drv_bp_autoconfig::{
    mgmt_protocol_value, BusNumbering, ConnectorConfig, Platform,
    DEFAULT_BUS_PREFIX, DEFAULT_MGMT_PROTOCOL, DEFAULT_SYSTEM_TYPE,
};
use drv_fru_vpd::{FruWindow, PRODUCT_NAME_LEN, PRODUCT_NAME_OFFSET};
use drv_i2c_api::I2cDevice;
use drv_i2c_devices::sep::SEP_CONTROL_ADDRESS;
use indexmap::IndexMap;
use serde::Deserialize;

/// The platform description built into the binary.
pub const DEFAULT_CONFIG: &str = include_str!("../app.toml");

/// A `RawConfig` is an `app.toml` that has been deserialized but not yet
/// checked for consistency.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawConfig {
    name: String,
    board_ids: Vec<u32>,
    #[serde(default = "default_bus_prefix")]
    bus_prefix: String,
    #[serde(default = "default_sep_address")]
    sep_address: u8,
    identity: IdentityConfig,
    revision_gate: Option<RevisionGate>,
    #[serde(default)]
    fru: RawFru,
    #[serde(default)]
    management: Management,
    sku: IndexMap<String, RawSku>,
}

fn default_bus_prefix() -> String {
    DEFAULT_BUS_PREFIX.to_string()
}

fn default_sep_address() -> u8 {
    SEP_CONTROL_ADDRESS
}

/// Where the board id comes from.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoardIdSource {
    /// A command printing the id in hex.
    Command(Vec<String>),
    /// A single byte of an EEPROM image.
    Eeprom { path: PathBuf, offset: u64 },
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct IdentityConfig {
    pub board_id: BoardIdSource,
    /// Command whose output starts with `true` after a power-on reset.  When
    /// absent, every boot is configured.
    pub power_on_reset: Option<Vec<String>>,
}

#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize,
)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Revision {
    pub major: u32,
    pub minor: u32,
}

/// Boards older than `minimum` only get their SEP disabled.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RevisionGate {
    pub command: Vec<String>,
    pub minimum: Revision,
    pub disable_bus: u32,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawFru {
    product_offset: u64,
    product_size: usize,
}

impl Default for RawFru {
    fn default() -> Self {
        Self {
            product_offset: PRODUCT_NAME_OFFSET,
            product_size: PRODUCT_NAME_LEN,
        }
    }
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct Management {
    system_type: u8,
    protocol: u8,
}

impl Default for Management {
    fn default() -> Self {
        Self {
            system_type: DEFAULT_SYSTEM_TYPE,
            protocol: DEFAULT_MGMT_PROTOCOL,
        }
    }
}

/// A power distribution board whose product name identifies the chassis.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PdbProbe {
    pub eeprom: PathBuf,
    pub product: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawSku {
    pdb: Option<PdbProbe>,
    pdb_absent: Option<PathBuf>,
    legacy: Option<LegacyTopology>,
    bus_numbering: Option<BusNumbering>,
    #[serde(default)]
    connectors: Vec<PathBuf>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Probe {
    Pdb(PdbProbe),
    /// Applies only to chassis without this PDB EEPROM.  A chassis with a
    /// PDB that no SKU recognizes is left alone.
    NoPdb(PathBuf),
    /// Applies when the legacy configuration file exists.
    LegacyConf(PathBuf),
    Always,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Layout {
    Scan {
        numbering: BusNumbering,
        connectors: Vec<ConnectorConfig>,
    },
    Legacy(LegacyTopology),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Sku {
    pub probe: Probe,
    pub layout: Layout,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub name: String,
    pub board_ids: Vec<u32>,
    pub bus_prefix: String,
    pub sep_address: u8,
    pub identity: IdentityConfig,
    pub revision_gate: Option<RevisionGate>,
    pub fru: FruWindow,
    pub mgmt_protocol: u8,
    pub skus: IndexMap<String, Sku>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("loading {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(text)?;

        if raw.board_ids.is_empty() {
            bail!("board-ids must name at least one board");
        }
        if I2cDevice::new("", raw.sep_address)
            .validate_address()
            .is_err()
        {
            bail!("sep-address {:#x} is not a usable address", raw.sep_address);
        }
        let fru = FruWindow::new(raw.fru.product_offset, raw.fru.product_size)
            .map_err(|e| anyhow::anyhow!("fru: {e}"))?;
        if raw.sku.is_empty() {
            bail!("at least one [sku.<name>] is required");
        }
        let Management {
            system_type,
            protocol,
        } = raw.management;
        if system_type > 0xf || protocol > 0xf {
            bail!(
                "management: system-type {system_type:#x} and protocol \
                 {protocol:#x} must each fit in 4 bits"
            );
        }

        let mut skus = IndexMap::new();
        for (name, sku) in raw.sku {
            let sku = validate_sku(sku)
                .with_context(|| format!("sku.{name}"))?;
            skus.insert(name, sku);
        }

        Ok(Config {
            name: raw.name,
            board_ids: raw.board_ids,
            bus_prefix: raw.bus_prefix,
            sep_address: raw.sep_address,
            identity: raw.identity,
            revision_gate: raw.revision_gate,
            fru,
            mgmt_protocol: mgmt_protocol_value(system_type, protocol),
            skus,
        })
    }

    pub fn builtin() -> Result<Self> {
        Self::from_toml(DEFAULT_CONFIG).context("built-in configuration")
    }

    /// Platform parameters for a chassis using `numbering`.
    pub fn platform(&self, numbering: BusNumbering) -> Platform {
        Platform {
            bus_prefix: self.bus_prefix.clone(),
            sep_address: self.sep_address,
            numbering,
            mgmt_protocol: self.mgmt_protocol,
            fru: self.fru,
            catalog: CATALOG,
        }
    }

    pub fn sku_name_suggestion(&self, name: &str) -> String {
        // Only suggest for small differences; short names otherwise match
        // almost anything.
        const MAX_DISTANCE: usize = 3;

        let mut scored: Vec<_> = self
            .skus
            .keys()
            .filter_map(|s| {
                let distance = strsim::damerau_levenshtein(name, s);
                if distance <= MAX_DISTANCE {
                    Some((distance, s))
                } else {
                    None
                }
            })
            .collect();
        scored.sort();
        let mut out = format!("'{name}' is not a known SKU.");
        if let Some((_, s)) = scored.first() {
            out.push_str(&format!(" Did you mean '{s}'?"));
        }
        out
    }
}

fn validate_sku(raw: RawSku) -> Result<Sku> {
    match (raw.legacy, raw.bus_numbering) {
        (Some(_), Some(_)) => {
            bail!("legacy and bus-numbering are mutually exclusive")
        }
        (Some(topo), None) => {
            if raw.pdb.is_some()
                || raw.pdb_absent.is_some()
                || !raw.connectors.is_empty()
            {
                bail!("a legacy SKU takes neither pdb nor connectors");
            }
            Ok(Sku {
                probe: Probe::LegacyConf(topo.conf.clone()),
                layout: Layout::Legacy(topo),
            })
        }
        (None, Some(numbering)) => {
            if raw.connectors.is_empty() {
                bail!("no connectors listed");
            }
            if let BusNumbering::Table(rows) = &numbering {
                if rows.len() < raw.connectors.len() {
                    bail!(
                        "bus-numbering table has {} rows for {} connectors",
                        rows.len(),
                        raw.connectors.len()
                    );
                }
            }
            let connectors = raw
                .connectors
                .into_iter()
                .enumerate()
                .map(|(i, eeprom)| {
                    let index = u8::try_from(i)
                        .context("too many connectors")?;
                    Ok(ConnectorConfig { index, eeprom })
                })
                .collect::<Result<Vec<_>>>()?;
            let probe = match (raw.pdb, raw.pdb_absent) {
                (Some(_), Some(_)) => {
                    bail!("pdb and pdb-absent are mutually exclusive")
                }
                (Some(pdb), None) => Probe::Pdb(pdb),
                (None, Some(path)) => Probe::NoPdb(path),
                (None, None) => Probe::Always,
            };
            Ok(Sku {
                probe,
                layout: Layout::Scan {
                    numbering,
                    connectors,
                },
            })
        }
        (None, None) => bail!("either legacy or bus-numbering is required"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const MINIMAL: &str = indoc! {r#"
        name = "test"
        board-ids = [0x6a]

        [identity]
        board-id = { command = ["echo", "6a"] }

        [sku.anybay]
        bus-numbering = { offset = { base = 55, stride = 2 } }
        connectors = ["/tmp/bp0", "/tmp/bp1"]
    "#};

    #[test]
    fn builtin_config_loads() {
        let config = Config::builtin().unwrap();
        assert_eq!(
            config.board_ids,
            [0x6a, 0x72, 0x73, 0x6b, 0x74, 0x75]
        );
        assert_eq!(config.mgmt_protocol, 0x23);
        assert_eq!(config.sep_address, 0x60);
        assert_eq!(config.fru, FruWindow::default());

        let names: Vec<_> = config.skus.keys().map(String::as_str).collect();
        assert_eq!(names, ["e3s", "anybay"]);
        let Probe::Pdb(pdb) = &config.skus["e3s"].probe else {
            panic!("e3s is not probed by its PDB");
        };
        assert_eq!(
            config.skus["anybay"].probe,
            Probe::NoPdb(pdb.eeprom.clone())
        );
        let Layout::Scan { connectors, .. } = &config.skus["e3s"].layout
        else {
            panic!("e3s is not a scanned SKU");
        };
        assert_eq!(connectors.len(), 6);
        assert_eq!(connectors[5].index, 5);
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.bus_prefix, "/dev/i2c-");
        assert_eq!(config.mgmt_protocol, 0x23);
        assert_eq!(config.identity.power_on_reset, None);
        assert_eq!(config.revision_gate, None);
        assert_eq!(
            config.skus["anybay"],
            Sku {
                probe: Probe::Always,
                layout: Layout::Scan {
                    numbering: BusNumbering::Offset {
                        base: 55,
                        stride: 2
                    },
                    connectors: vec![
                        ConnectorConfig {
                            index: 0,
                            eeprom: "/tmp/bp0".into()
                        },
                        ConnectorConfig {
                            index: 1,
                            eeprom: "/tmp/bp1".into()
                        },
                    ],
                },
            }
        );
    }

    #[test]
    fn overrides_apply() {
        let text = format!(
            "{MINIMAL}{}",
            indoc! {r#"
                [fru]
                product-offset = 0x10
                product-size = 48

                [management]
                system-type = 1
                protocol = 5

                [revision-gate]
                command = ["cat", "/etc/rev"]
                minimum = { major = 1, minor = 2 }
                disable-bus = 10
            "#}
        );
        let config = Config::from_toml(&text).unwrap();
        assert_eq!(config.fru, FruWindow::new(0x10, 48).unwrap());
        assert_eq!(config.mgmt_protocol, 0x15);
        let gate = config.revision_gate.unwrap();
        assert_eq!(gate.minimum, Revision { major: 1, minor: 2 });
        assert_eq!(gate.disable_bus, 10);
    }

    #[test]
    fn legacy_sku() {
        let text = format!(
            "{MINIMAL}{}",
            indoc! {r#"
                [sku.legacy]
                legacy = { bus = 10, root = { address = 0x75, segment = 0 }, first = { address = 0x70, segments = 3 }, second = { address = 0x71, segments = 2 } }
            "#}
        );
        let config = Config::from_toml(&text).unwrap();
        let sku = &config.skus["legacy"];
        assert_eq!(sku.probe, Probe::LegacyConf("/var/lib/misc/ubm.conf".into()));
        assert!(matches!(sku.layout, Layout::Legacy(_)));
    }

    #[test]
    fn inconsistent_configs_are_refused() {
        let bad = [
            MINIMAL.replace("board-ids = [0x6a]", "board-ids = []"),
            MINIMAL.replace("connectors = [\"/tmp/bp0\", \"/tmp/bp1\"]", ""),
            MINIMAL.replace("name = \"test\"", "name = \"test\"\nsep-address = 0x7c"),
            MINIMAL.replace("name = \"test\"", "name = \"test\"\nbogus = 1"),
            format!("{MINIMAL}[fru]\nproduct-offset = 0\nproduct-size = 65\n"),
            format!("{MINIMAL}[sku.empty]\n"),
            format!("{MINIMAL}[management]\nsystem-type = 0x12\nprotocol = 3\n"),
            format!("{MINIMAL}[management]\nsystem-type = 2\nprotocol = 0x10\n"),
            MINIMAL.replace(
                "offset = { base = 55, stride = 2 }",
                "table = [[55]]",
            ),
            format!(
                "{MINIMAL}[sku.both-probes]\nconnectors = [\"/x\"]\n\
                 bus-numbering = {{ table = [[1]] }}\n\
                 pdb-absent = \"/pdb\"\n\
                 pdb = {{ eeprom = \"/pdb\", product = \"PDB\" }}\n"
            ),
            format!(
                "{MINIMAL}[sku.both]\nconnectors = [\"/x\"]\n\
                 bus-numbering = {{ table = [[1]] }}\n\
                 legacy = {{ bus = 1, root = {{ address = 0x75, segment = 0 }}, \
                 first = {{ address = 0x70, segments = 1 }}, \
                 second = {{ address = 0x71, segments = 1 }} }}\n"
            ),
        ];
        for text in bad {
            assert!(Config::from_toml(&text).is_err(), "accepted:\n{text}");
        }
    }

    #[test]
    fn sku_suggestions() {
        let config = Config::builtin().unwrap();
        assert_eq!(
            config.sku_name_suggestion("e3"),
            "'e3' is not a known SKU. Did you mean 'e3s'?"
        );
        assert_eq!(
            config.sku_name_suggestion("completely-different"),
            "'completely-different' is not a known SKU."
        );
    }
}
