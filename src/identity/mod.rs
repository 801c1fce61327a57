//! Partition identity: normalization and naming
//!
//! Everything in here is pure. Raw console output goes in, canonical
//! identifiers and deterministic storage object names come out.

pub mod naming;
pub mod normalize;

pub use naming::*;
pub use normalize::*;

use crate::domain::model::{PartitionIdentity, RawPartition, Site};
use crate::error::Result;
use indexmap::IndexSet;

/// Normalize a raw partition reported by the console.
///
/// WWPNs keep the console's adapter order with duplicates dropped. The first
/// malformed WWPN or MAC fails the whole partition.
pub fn normalize_partition(
    site: Site,
    managed_system: &str,
    raw: &RawPartition,
) -> Result<PartitionIdentity> {
    let wwpns = raw
        .wwpns
        .iter()
        .map(|w| normalize_wwpn(w))
        .collect::<Result<IndexSet<_>>>()?;

    let mac_addresses = raw
        .macs
        .iter()
        .map(|m| normalize_mac(m))
        .collect::<Result<_>>()?;

    Ok(PartitionIdentity {
        site,
        managed_system: managed_system.to_string(),
        partition_name: raw.partition_name.clone(),
        role: raw.role.clone(),
        wwpns: wwpns.into_iter().collect(),
        mac_addresses,
    })
}
