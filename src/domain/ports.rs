//! Domain Ports - Capability traits for the console and the arrays
//!
//! These traits define the boundaries between the reconciliation logic and
//! the external systems. Adapters implement them; the reconciler never sees
//! a transport.

use crate::domain::model::{RawPartition, Site, SnapshotReplicationStatus};
use crate::error::Result;
use crate::identity::Wwpn;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// Discovery Filter
// =============================================================================

/// Filter applied by inventory sources during discovery
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryFilter {
    /// Partition names skipped entirely
    #[serde(default)]
    pub exclude: BTreeSet<String>,
}

impl DiscoveryFilter {
    pub fn excluding<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exclude: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_excluded(&self, partition_name: &str) -> bool {
        self.exclude.contains(partition_name)
    }
}

// =============================================================================
// Inventory Source Port
// =============================================================================

/// Port for the hardware management console
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Discover the partitions of a managed system at one site.
    ///
    /// Partitions named in the filter's exclude list are never returned.
    async fn discover(
        &self,
        managed_system: &str,
        site: Site,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<RawPartition>>;

    /// Names of the managed systems the console knows at one site, in the
    /// order the console lists them
    async fn list_managed_systems(&self, site: Site) -> Result<Vec<String>>;

    /// Source name used in logs and errors
    fn source_name(&self) -> &str;
}

// =============================================================================
// Storage State Source Port
// =============================================================================

/// Port for one storage array
///
/// `create_host` and `bind_wwpn` are the only mutating calls. Capacity and
/// replication are never created through this port, only verified.
#[async_trait]
pub trait StorageStateSource: Send + Sync {
    /// Names of all host objects on the array
    async fn list_hosts(&self) -> Result<Vec<String>>;

    /// WWPNs bound to a host
    async fn list_wwpn_bindings(&self, host: &str) -> Result<Vec<Wwpn>>;

    /// Names of the LUNs connected to a host
    async fn list_lun_bindings(&self, host: &str) -> Result<Vec<String>>;

    /// Replication status of a snapshot set
    async fn snapshot_replication_status(&self, set_name: &str)
        -> Result<SnapshotReplicationStatus>;

    /// Create an empty host object
    async fn create_host(&self, name: &str) -> Result<()>;

    /// Bind a WWPN to an existing host
    async fn bind_wwpn(&self, host: &str, wwpn: &Wwpn) -> Result<()>;

    /// Array name used in logs and errors
    fn array_name(&self) -> &str;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type InventorySourceRef = Arc<dyn InventorySource>;
pub type StorageStateSourceRef = Arc<dyn StorageStateSource>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_filter() {
        let filter = DiscoveryFilter::excluding(["vios1", "vios2"]);
        assert!(filter.is_excluded("vios1"));
        assert!(!filter.is_excluded("lpar-db01"));
        assert!(!DiscoveryFilter::default().is_excluded("vios1"));
    }
}
