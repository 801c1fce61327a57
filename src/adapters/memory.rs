//! In-Memory Adapters
//!
//! Array and console doubles holding their state in memory. Used for tests
//! and rehearsals; [`ArrayState`] is also the document format of the
//! file-backed array.

use crate::domain::model::{RawPartition, Site, SnapshotReplicationStatus};
use crate::domain::ports::{DiscoveryFilter, InventorySource, StorageStateSource};
use crate::error::{Error, Result};
use crate::identity::Wwpn;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Array State
// =============================================================================

/// Host object on an array
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    #[serde(default)]
    pub wwpns: BTreeSet<Wwpn>,
    #[serde(default)]
    pub luns: BTreeSet<String>,
}

/// Snapshot set (protection group) on an array
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSetRecord {
    /// Completion time of the last snapshot or replication transfer
    pub last_sync: Option<DateTime<Utc>>,
}

/// Complete state of a simulated array
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayState {
    #[serde(default)]
    pub hosts: BTreeMap<String, HostRecord>,
    #[serde(default)]
    pub snapshot_sets: BTreeMap<String, SnapshotSetRecord>,
}

impl ArrayState {
    fn host(&self, array: &str, name: &str) -> Result<&HostRecord> {
        self.hosts.get(name).ok_or_else(|| Error::ArrayOperation {
            array: array.to_string(),
            operation: "get_host".into(),
            reason: format!("host {} does not exist", name),
        })
    }

    pub fn host_names(&self) -> Vec<String> {
        self.hosts.keys().cloned().collect()
    }

    pub fn wwpns(&self, array: &str, host: &str) -> Result<Vec<Wwpn>> {
        Ok(self.host(array, host)?.wwpns.iter().cloned().collect())
    }

    pub fn luns(&self, array: &str, host: &str) -> Result<Vec<String>> {
        Ok(self.host(array, host)?.luns.iter().cloned().collect())
    }

    pub fn snapshot_status(&self, set_name: &str, now: DateTime<Utc>) -> SnapshotReplicationStatus {
        match self.snapshot_sets.get(set_name) {
            Some(set) => SnapshotReplicationStatus {
                exists: true,
                last_sync_age_secs: set
                    .last_sync
                    .map(|at| (now - at).num_seconds().max(0) as u64),
            },
            None => SnapshotReplicationStatus::missing(),
        }
    }

    pub fn create_host(&mut self, array: &str, name: &str) -> Result<()> {
        if self.hosts.contains_key(name) {
            return Err(Error::ArrayOperation {
                array: array.to_string(),
                operation: "create_host".into(),
                reason: format!("host {} already exists", name),
            });
        }
        self.hosts.insert(name.to_string(), HostRecord::default());
        Ok(())
    }

    pub fn bind_wwpn(&mut self, array: &str, host: &str, wwpn: &Wwpn) -> Result<()> {
        if let Some((owner, _)) = self
            .hosts
            .iter()
            .find(|(name, record)| *name != host && record.wwpns.contains(wwpn))
        {
            return Err(Error::DivergentState {
                host: host.to_string(),
                detail: format!(
                    "{} refused {}: already in use by host {}",
                    array,
                    wwpn.colon_form(),
                    owner
                ),
            });
        }

        let record = self.hosts.get_mut(host).ok_or_else(|| Error::ArrayOperation {
            array: array.to_string(),
            operation: "bind_wwpn".into(),
            reason: format!("host {} does not exist", host),
        })?;
        record.wwpns.insert(wwpn.clone());
        Ok(())
    }
}

// =============================================================================
// Memory Array
// =============================================================================

/// Storage array held in memory
pub struct MemoryArray {
    name: String,
    state: RwLock<ArrayState>,
    /// Calls left to fail with `SourceUnavailable`
    unavailable_calls: AtomicU32,
    mutations: AtomicU64,
}

impl MemoryArray {
    pub fn new(name: &str) -> Self {
        Self::from_state(name, ArrayState::default())
    }

    pub fn from_state(name: &str, state: ArrayState) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(state),
            unavailable_calls: AtomicU32::new(0),
            mutations: AtomicU64::new(0),
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> ArrayState {
        self.state.read().clone()
    }

    /// Add a host with bound WWPNs, bypassing the mutation counter
    pub fn add_host(&self, name: &str, wwpns: &[Wwpn]) {
        let mut state = self.state.write();
        let record = state.hosts.entry(name.to_string()).or_default();
        record.wwpns.extend(wwpns.iter().cloned());
    }

    /// Connect a LUN to an existing host
    pub fn connect_lun(&self, host: &str, lun: &str) {
        if let Some(record) = self.state.write().hosts.get_mut(host) {
            record.luns.insert(lun.to_string());
        }
    }

    /// Add a snapshot set last synced `age` ago (`None`: never synced)
    pub fn add_snapshot_set(&self, name: &str, age: Option<Duration>) {
        let last_sync = age
            .and_then(|a| chrono::Duration::from_std(a).ok())
            .map(|a| Utc::now() - a);
        self.state
            .write()
            .snapshot_sets
            .insert(name.to_string(), SnapshotSetRecord { last_sync });
    }

    /// Make the next `count` calls fail as if the array were unreachable
    pub fn fail_next_calls(&self, count: u32) {
        self.unavailable_calls.store(count, Ordering::SeqCst);
    }

    /// Number of successful mutating calls
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    fn check_available(&self, operation: &str) -> Result<()> {
        let failed = self
            .unavailable_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            debug!(array = %self.name, operation, "Injected unavailability");
            return Err(Error::SourceUnavailable {
                source_name: self.name.clone(),
                reason: format!("{} failed: array unreachable", operation),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StorageStateSource for MemoryArray {
    async fn list_hosts(&self) -> Result<Vec<String>> {
        self.check_available("list_hosts")?;
        Ok(self.state.read().host_names())
    }

    async fn list_wwpn_bindings(&self, host: &str) -> Result<Vec<Wwpn>> {
        self.check_available("list_wwpn_bindings")?;
        self.state.read().wwpns(&self.name, host)
    }

    async fn list_lun_bindings(&self, host: &str) -> Result<Vec<String>> {
        self.check_available("list_lun_bindings")?;
        self.state.read().luns(&self.name, host)
    }

    async fn snapshot_replication_status(
        &self,
        set_name: &str,
    ) -> Result<SnapshotReplicationStatus> {
        self.check_available("snapshot_replication_status")?;
        Ok(self.state.read().snapshot_status(set_name, Utc::now()))
    }

    async fn create_host(&self, name: &str) -> Result<()> {
        self.check_available("create_host")?;
        self.state.write().create_host(&self.name, name)?;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn bind_wwpn(&self, host: &str, wwpn: &Wwpn) -> Result<()> {
        self.check_available("bind_wwpn")?;
        self.state.write().bind_wwpn(&self.name, host, wwpn)?;
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn array_name(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// Memory Inventory
// =============================================================================

/// Console inventory held in memory
pub struct MemoryInventory {
    name: String,
    partitions: RwLock<BTreeMap<(String, Site), Vec<RawPartition>>>,
    unavailable_calls: AtomicU32,
}

impl MemoryInventory {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            partitions: RwLock::new(BTreeMap::new()),
            unavailable_calls: AtomicU32::new(0),
        }
    }

    /// Add a partition to a managed system at one site, replacing any
    /// partition of the same name
    pub fn insert(&self, managed_system: &str, site: Site, partition: RawPartition) {
        let mut partitions = self.partitions.write();
        let known = partitions
            .entry((managed_system.to_string(), site))
            .or_default();
        match known
            .iter_mut()
            .find(|p| p.partition_name == partition.partition_name)
        {
            Some(existing) => *existing = partition,
            None => known.push(partition),
        }
    }

    /// Make the next `count` calls fail as if the console were unreachable
    pub fn fail_next_calls(&self, count: u32) {
        self.unavailable_calls.store(count, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        let failed = self
            .unavailable_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::SourceUnavailable {
                source_name: self.name.clone(),
                reason: "console session refused".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl InventorySource for MemoryInventory {
    async fn discover(
        &self,
        managed_system: &str,
        site: Site,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<RawPartition>> {
        self.check_available()?;

        Ok(self
            .partitions
            .read()
            .get(&(managed_system.to_string(), site))
            .map(|partitions| {
                partitions
                    .iter()
                    .filter(|p| !filter.is_excluded(&p.partition_name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_managed_systems(&self, site: Site) -> Result<Vec<String>> {
        self.check_available()?;

        Ok(self
            .partitions
            .read()
            .keys()
            .filter(|(_, s)| *s == site)
            .map(|(managed_system, _)| managed_system.clone())
            .collect())
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::normalize_wwpn;

    #[tokio::test]
    async fn test_bind_rejects_wwpn_owned_by_other_host() {
        let array = MemoryArray::new("pure-nominal");
        let wwpn = normalize_wwpn("c0507603a2920080").unwrap();
        array.add_host("old", &[wwpn.clone()]);
        array.create_host("new").await.unwrap();

        let err = array.bind_wwpn("new", &wwpn).await.unwrap_err();
        assert!(matches!(err, Error::DivergentState { ref host, .. } if host == "new"));
        assert_eq!(array.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_unavailability_is_consumed() {
        let array = MemoryArray::new("pure-pra");
        array.fail_next_calls(1);

        assert!(matches!(
            array.list_hosts().await,
            Err(Error::SourceUnavailable { .. })
        ));
        assert!(array.list_hosts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inventory_applies_exclusions() {
        let inventory = MemoryInventory::new("hmc");
        for name in ["vios1", "db01"] {
            inventory.insert(
                "P980-A",
                Site::Nominal,
                RawPartition {
                    partition_name: name.into(),
                    role: "aixlinux".into(),
                    wwpns: vec![],
                    macs: vec![],
                },
            );
        }

        let found = inventory
            .discover("P980-A", Site::Nominal, &DiscoveryFilter::excluding(["vios1"]))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].partition_name, "db01");

        let other_site = inventory
            .discover("P980-A", Site::Pra, &DiscoveryFilter::default())
            .await
            .unwrap();
        assert!(other_site.is_empty());
    }

    #[tokio::test]
    async fn test_inventory_lists_systems_per_site() {
        let inventory = MemoryInventory::new("hmc");
        let partition = RawPartition {
            partition_name: "db01".into(),
            role: "aixlinux".into(),
            wwpns: vec![],
            macs: vec![],
        };
        inventory.insert("P980-B", Site::Nominal, partition.clone());
        inventory.insert("P980-A", Site::Nominal, partition.clone());
        inventory.insert("P980-A", Site::Nominal, partition.clone());
        inventory.insert("P980-C", Site::Pra, partition);

        assert_eq!(
            inventory.list_managed_systems(Site::Nominal).await.unwrap(),
            vec!["P980-A", "P980-B"]
        );
        assert_eq!(
            inventory.list_managed_systems(Site::Pra).await.unwrap(),
            vec!["P980-C"]
        );
    }

    #[test]
    fn test_snapshot_age() {
        let mut state = ArrayState::default();
        let now = Utc::now();
        state.snapshot_sets.insert(
            "pg-a".into(),
            SnapshotSetRecord {
                last_sync: Some(now - chrono::Duration::seconds(90)),
            },
        );

        let status = state.snapshot_status("pg-a", now);
        assert!(status.exists);
        assert_eq!(status.last_sync_age_secs, Some(90));
        assert!(!state.snapshot_status("pg-b", now).exists);
    }
}
