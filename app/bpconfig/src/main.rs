// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boot-time disk backplane auto-configuration
//!
//! Exit status: 0 when configured (or when there was nothing to do on this
//! platform or this boot), 1 when the configuration or the board identity
//! cannot be read, and otherwise a code naming the first connector failure:
//! 2 for an unreadable FRU, 3 for an unknown backplane, 4 for a failed
//! register write and 5 for a connector that could not be routed.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use drv_i2c_api::{LinuxI2c, RecordingBus, RegisterWrite};
use log::{error, info};

mod config;
mod identity;
mod platform;

use crate::config::Config;
use crate::identity::SystemIdentity;
use crate::platform::{Options, RunOutcome};

#[derive(Debug, Parser)]
#[clap(
    max_term_width = 80,
    about = "detects disk backplanes and auto-configures their SEPs"
)]
struct Args {
    /// Path to the platform configuration file, in TOML.  Defaults to the
    /// built-in configuration.
    #[clap(long)]
    config: Option<PathBuf>,
    /// Configure this chassis SKU instead of probing for one.
    #[clap(long)]
    sku: Option<String>,
    /// Log the register writes instead of issuing them.
    #[clap(long)]
    dry_run: bool,
    /// Configure even if this boot is not a power-on reset.
    #[clap(long)]
    skip_gates: bool,
    /// More output; repeat for even more.
    #[clap(short, parse(from_occurrences))]
    verbose: u64,
}

fn run(args: &Args) -> Result<RunOutcome> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::builtin()?,
    };

    let mut bus: Box<dyn RegisterWrite> = if args.dry_run {
        info!("dry run: no register will be written");
        Box::new(RecordingBus::logging())
    } else {
        Box::new(LinuxI2c)
    };

    let identity = SystemIdentity::new(&config.identity);
    let options = Options {
        sku: args.sku.clone(),
        skip_gates: args.skip_gates,
    };
    platform::run(&config, &identity, bus.as_mut(), &options)
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level),
    )
    .init();

    let code = match run(&args) {
        Ok(outcome) => {
            let code = outcome.exit_code();
            if code != 0 {
                error!("backplane configuration failed ({code})");
            }
            code
        }
        Err(e) => {
            error!("{e:#}");
            1
        }
    };
    std::process::exit(code);
}
