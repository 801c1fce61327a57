//! Domain Model - Snapshots flowing through a reconciliation run
//!
//! All values here are read-only snapshots owned by the run that produced
//! them. Nothing downstream patches them; a changed input means re-deriving.

use crate::identity::{Mac, Wwpn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

// =============================================================================
// Sites
// =============================================================================

/// One of the two storage sites
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    /// Production site
    Nominal,
    /// Disaster-recovery site (Plan de Reprise d'Activité)
    Pra,
}

impl Site {
    pub const ALL: [Site; 2] = [Site::Nominal, Site::Pra];

    pub fn as_str(&self) -> &'static str {
        match self {
            Site::Nominal => "nominal",
            Site::Pra => "pra",
        }
    }
}

impl std::fmt::Display for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Partition Identity
// =============================================================================

/// Partition as reported by the console, before normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPartition {
    /// LPAR name
    pub partition_name: String,
    /// Partition role (the console's `lpar_env`, e.g. `aixlinux`)
    pub role: String,
    /// WWPNs in adapter order, as printed by the console
    pub wwpns: Vec<String>,
    /// MAC addresses, as printed by the console
    pub macs: Vec<String>,
}

/// Normalized identity of one partition at one site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PartitionIdentity {
    pub site: Site,
    pub managed_system: String,
    pub partition_name: String,
    pub role: String,
    /// WWPNs in adapter order, de-duplicated
    pub wwpns: Vec<Wwpn>,
    pub mac_addresses: BTreeSet<Mac>,
}

impl PartitionIdentity {
    /// Unique key of the partition within a run
    pub fn key(&self) -> PartitionKey {
        PartitionKey {
            managed_system: self.managed_system.clone(),
            partition_name: self.partition_name.clone(),
        }
    }
}

/// (managed_system, partition_name)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct PartitionKey {
    pub managed_system: String,
    pub partition_name: String,
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.managed_system, self.partition_name)
    }
}

// =============================================================================
// Storage Objects
// =============================================================================

/// Name of a LUN (array volume) expected to be connected to a host
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct LunRef(pub String);

impl std::fmt::Display for LunRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage objects a partition must have on an array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DesiredStorageObject {
    /// Partition this object was derived from
    pub partition_name: String,
    pub host_name: String,
    pub bound_wwpns: BTreeSet<Wwpn>,
    pub lun_bindings: BTreeSet<LunRef>,
    pub snapshot_set_name: String,
}

/// Storage objects as read from an array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ActualStorageObject {
    pub host_name: String,
    pub bound_wwpns: BTreeSet<Wwpn>,
    pub lun_bindings: BTreeSet<LunRef>,
    pub snapshot_set_name: String,
    /// Replication status of the snapshot set, if it was read
    pub snapshot: Option<SnapshotReplicationStatus>,
}

impl ActualStorageObject {
    /// A host that exists but has nothing bound yet
    pub fn empty(host_name: &str, snapshot_set_name: &str) -> Self {
        Self {
            host_name: host_name.to_string(),
            bound_wwpns: BTreeSet::new(),
            lun_bindings: BTreeSet::new(),
            snapshot_set_name: snapshot_set_name.to_string(),
            snapshot: None,
        }
    }
}

/// Replication status of a snapshot set (protection group)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub struct SnapshotReplicationStatus {
    /// Whether the (replicated) snapshot set exists on the array
    pub exists: bool,
    /// Seconds since the last completed snapshot or transfer
    pub last_sync_age_secs: Option<u64>,
}

impl SnapshotReplicationStatus {
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn synced(age: Duration) -> Self {
        Self {
            exists: true,
            last_sync_age_secs: Some(age.as_secs()),
        }
    }

    pub fn last_sync_age(&self) -> Option<Duration> {
        self.last_sync_age_secs.map(Duration::from_secs)
    }

    /// Exists and synced within `max_age`
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.exists
            && self
                .last_sync_age()
                .map(|age| age <= max_age)
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_display() {
        assert_eq!(format!("{}", Site::Nominal), "nominal");
        assert_eq!(format!("{}", Site::Pra), "pra");
    }

    #[test]
    fn test_snapshot_freshness() {
        let max = Duration::from_secs(3600);
        assert!(SnapshotReplicationStatus::synced(Duration::from_secs(60)).is_fresh(max));
        assert!(!SnapshotReplicationStatus::synced(Duration::from_secs(7200)).is_fresh(max));
        assert!(!SnapshotReplicationStatus::missing().is_fresh(max));

        let never_synced = SnapshotReplicationStatus {
            exists: true,
            last_sync_age_secs: None,
        };
        assert!(!never_synced.is_fresh(max));
    }
}
