// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use bp_catalog::{match_product, Descriptor};
use drv_fru_vpd::read_product_name;
use log::{error, info};

use crate::{BpError, Context};

/// Identifies the backplane on `connector` from its FRU EEPROM and records
/// it in the presence registry.
///
/// A connector whose registry entry is already populated is not read again.
pub fn detect(
    ctx: &mut Context,
    connector: u8,
    eeprom: &Path,
) -> Result<Descriptor, BpError> {
    let known = ctx
        .registry
        .entry(connector)
        .map_err(|_| BpError::BusNotApplicable)?;
    if let Some(d) = known {
        return Ok(*d);
    }

    let product = read_product_name(eeprom, ctx.platform.fru)?;
    let descriptor = *match_product(&product.text(), ctx.platform.catalog)
        .ok_or_else(|| {
            error!("BP#{connector}: unknown backplane {product:?}");
            BpError::NoCatalogMatch {
                product: product.to_string(),
            }
        })?;

    ctx.registry
        .insert(connector, descriptor)
        .map_err(|_| BpError::BusNotApplicable)?;
    info!(
        "BP#{connector} [{descriptor}] detected with [{}] SEP",
        descriptor.sep_count
    );
    Ok(descriptor)
}
