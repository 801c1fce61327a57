//! Site State - Snapshot of one array as seen by a run
//!
//! Read once before planning. WWPN ownership is indexed across every host on
//! the array, not only the desired ones, so that a WWPN already bound to an
//! unrelated host is caught before anything is bound.

use crate::domain::model::{ActualStorageObject, DesiredStorageObject, LunRef, Site, SnapshotReplicationStatus};
use crate::domain::ports::StorageStateSource;
use crate::error::Result;
use crate::identity::Wwpn;
use crate::reconcile::plan::{Operation, ReconciliationPlan};
use crate::retry::RetryPolicy;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Actual state of one array, restricted to what a run needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteState {
    /// Every host object on the array
    pub host_names: BTreeSet<String>,
    /// Desired hosts that exist, with their bindings
    pub hosts: BTreeMap<String, ActualStorageObject>,
    /// Owner host of every WWPN bound on the array
    pub wwpn_owners: BTreeMap<Wwpn, String>,
    /// Replication status of the desired snapshot sets
    pub snapshots: BTreeMap<String, SnapshotReplicationStatus>,
}

impl SiteState {
    /// Read the array state relevant to `desired`
    pub async fn read(
        source: &dyn StorageStateSource,
        site: Site,
        desired: &[DesiredStorageObject],
        retry: &RetryPolicy,
    ) -> Result<Self> {
        let array = source.array_name().to_string();
        let mut state = SiteState::default();

        let hosts = retry
            .call(&array, "list_hosts", || source.list_hosts())
            .await?;
        state.host_names = hosts.into_iter().collect();

        for host in &state.host_names {
            let wwpns = retry
                .call(&array, "list_wwpn_bindings", || source.list_wwpn_bindings(host))
                .await?;
            for wwpn in wwpns {
                state.wwpn_owners.insert(wwpn, host.clone());
            }
        }

        for object in desired {
            let snapshot = retry
                .call(&array, "snapshot_replication_status", || {
                    source.snapshot_replication_status(&object.snapshot_set_name)
                })
                .await?;
            state
                .snapshots
                .insert(object.snapshot_set_name.clone(), snapshot);

            if !state.host_names.contains(&object.host_name) {
                continue;
            }

            let luns = retry
                .call(&array, "list_lun_bindings", || {
                    source.list_lun_bindings(&object.host_name)
                })
                .await?;

            let bound_wwpns = state
                .wwpn_owners
                .iter()
                .filter(|(_, owner)| **owner == object.host_name)
                .map(|(wwpn, _)| wwpn.clone())
                .collect();

            state.hosts.insert(
                object.host_name.clone(),
                ActualStorageObject {
                    host_name: object.host_name.clone(),
                    bound_wwpns,
                    lun_bindings: luns.into_iter().map(LunRef).collect(),
                    snapshot_set_name: object.snapshot_set_name.clone(),
                    snapshot: Some(snapshot),
                },
            );
        }

        debug!(
            %site,
            array = %array,
            hosts = state.host_names.len(),
            wwpns = state.wwpn_owners.len(),
            "Read site state"
        );

        Ok(state)
    }

    /// Actual storage object of a host, if it exists
    pub fn actual(&self, host_name: &str) -> Option<&ActualStorageObject> {
        self.hosts.get(host_name)
    }

    /// State the array reaches once every mutating operation of `plan`
    /// succeeds. Verifications change nothing.
    pub fn project(&self, plan: &ReconciliationPlan) -> SiteState {
        let mut next = self.clone();

        for operation in &plan.operations {
            match operation {
                Operation::CreateHost {
                    host,
                    snapshot_set_name,
                } => {
                    next.host_names.insert(host.clone());
                    let mut object = ActualStorageObject::empty(host, snapshot_set_name);
                    object.snapshot = next.snapshots.get(snapshot_set_name).copied();
                    next.hosts.entry(host.clone()).or_insert(object);
                }
                Operation::BindWwpn { host, wwpn } => {
                    next.wwpn_owners.insert(wwpn.clone(), host.clone());
                    if let Some(object) = next.hosts.get_mut(host) {
                        object.bound_wwpns.insert(wwpn.clone());
                    }
                }
                Operation::UnbindWwpn { .. }
                | Operation::VerifyLunMapping { .. }
                | Operation::VerifySnapshotReplication { .. } => {}
            }
        }

        next
    }
}
