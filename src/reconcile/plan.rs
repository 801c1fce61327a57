//! Reconciliation Planner
//!
//! Diffs desired storage objects against one site's actual state and emits
//! an ordered, inspectable plan. Planning is pure; nothing here talks to an
//! array.

use crate::domain::model::{DesiredStorageObject, LunRef, Site};
use crate::error::Error;
use crate::identity::Wwpn;
use crate::reconcile::state::SiteState;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// =============================================================================
// Operations
// =============================================================================

/// One corrective or verifying step on an array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create the host object
    CreateHost {
        host: String,
        snapshot_set_name: String,
    },
    /// Bind a WWPN to the host
    BindWwpn { host: String, wwpn: Wwpn },
    /// Advisory only: a WWPN bound to the host that no partition reports
    UnbindWwpn { host: String, wwpn: Wwpn },
    /// Check that a LUN is connected to the host
    VerifyLunMapping { host: String, lun: LunRef },
    /// Check that the snapshot set exists and is fresh
    VerifySnapshotReplication { host: String, set_name: String },
}

impl Operation {
    pub fn host(&self) -> &str {
        match self {
            Operation::CreateHost { host, .. }
            | Operation::BindWwpn { host, .. }
            | Operation::UnbindWwpn { host, .. }
            | Operation::VerifyLunMapping { host, .. }
            | Operation::VerifySnapshotReplication { host, .. } => host,
        }
    }

    /// Position of the operation within a host's sequence. Each phase
    /// relies on the postcondition of the previous one.
    pub fn phase(&self) -> u8 {
        match self {
            Operation::CreateHost { .. } => 0,
            Operation::BindWwpn { .. } => 1,
            Operation::UnbindWwpn { .. } => 2,
            Operation::VerifyLunMapping { .. } => 3,
            Operation::VerifySnapshotReplication { .. } => 4,
        }
    }

    /// Surfaced in the plan but never applied
    pub fn is_advisory(&self) -> bool {
        matches!(self, Operation::UnbindWwpn { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateHost { .. } => "create_host",
            Operation::BindWwpn { .. } => "bind_wwpn",
            Operation::UnbindWwpn { .. } => "unbind_wwpn",
            Operation::VerifyLunMapping { .. } => "verify_lun_mapping",
            Operation::VerifySnapshotReplication { .. } => "verify_snapshot_replication",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::CreateHost { host, .. } => write!(f, "create host {}", host),
            Operation::BindWwpn { host, wwpn } => {
                write!(f, "bind {} to {}", wwpn.colon_form(), host)
            }
            Operation::UnbindWwpn { host, wwpn } => {
                write!(f, "(advisory) unbind {} from {}", wwpn.colon_form(), host)
            }
            Operation::VerifyLunMapping { host, lun } => {
                write!(f, "verify LUN {} mapped to {}", lun, host)
            }
            Operation::VerifySnapshotReplication { set_name, .. } => {
                write!(f, "verify replication of {}", set_name)
            }
        }
    }
}

// =============================================================================
// Divergences
// =============================================================================

/// Conflict between desired and actual state the reconciler must not fix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DivergenceKind {
    /// The WWPN is bound to another host on the array
    WwpnBoundElsewhere { wwpn: Wwpn, owner: String },
    /// Two partitions of this run report the same WWPN
    WwpnClaimedTwice { wwpn: Wwpn, other_host: String },
}

/// A divergence found while planning one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Divergence {
    pub partition_name: String,
    pub host: String,
    #[serde(flatten)]
    pub kind: DivergenceKind,
}

impl Divergence {
    pub fn to_error(&self) -> Error {
        let detail = match &self.kind {
            DivergenceKind::WwpnBoundElsewhere { wwpn, owner } => format!(
                "partition {} wants {} but it is bound to host {}",
                self.partition_name,
                wwpn.colon_form(),
                owner
            ),
            DivergenceKind::WwpnClaimedTwice { wwpn, other_host } => format!(
                "partition {} reports {} which is also desired for host {}",
                self.partition_name,
                wwpn.colon_form(),
                other_host
            ),
        };
        Error::DivergentState {
            host: self.host.clone(),
            detail,
        }
    }
}

// =============================================================================
// Plan
// =============================================================================

/// Ordered operations for one site, computed fresh per run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReconciliationPlan {
    pub site: Site,
    pub operations: Vec<Operation>,
    pub divergences: Vec<Divergence>,
}

impl ReconciliationPlan {
    pub fn empty(site: Site) -> Self {
        Self {
            site,
            operations: Vec::new(),
            divergences: Vec::new(),
        }
    }

    /// Nothing left to do except advisories
    pub fn is_converged(&self) -> bool {
        self.operations.iter().all(Operation::is_advisory)
    }

    pub fn actionable(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|op| !op.is_advisory())
    }

    pub fn advisories(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|op| op.is_advisory())
    }

    /// Number of operations with the given name
    pub fn count(&self, name: &str) -> usize {
        self.operations.iter().filter(|op| op.name() == name).count()
    }
}

// =============================================================================
// Planner
// =============================================================================

/// Computes reconciliation plans
#[derive(Debug, Clone)]
pub struct Planner {
    snapshot_max_age: Duration,
}

impl Planner {
    pub fn new(snapshot_max_age: Duration) -> Self {
        Self { snapshot_max_age }
    }

    pub fn snapshot_max_age(&self) -> Duration {
        self.snapshot_max_age
    }

    /// Diff `desired` against `actual` for one site
    pub fn plan(
        &self,
        site: Site,
        desired: &[DesiredStorageObject],
        actual: &SiteState,
    ) -> ReconciliationPlan {
        let mut plan = ReconciliationPlan::empty(site);

        let mut ordered: Vec<&DesiredStorageObject> = desired.iter().collect();
        ordered.sort_by(|a, b| a.host_name.cmp(&b.host_name));

        // First desired host claiming each WWPN in this run
        let mut claims: BTreeMap<&Wwpn, &str> = BTreeMap::new();

        for object in ordered {
            let host = object.host_name.as_str();
            let existing = actual.actual(host);

            if existing.is_none() {
                plan.operations.push(Operation::CreateHost {
                    host: host.to_string(),
                    snapshot_set_name: object.snapshot_set_name.clone(),
                });
            }

            for wwpn in &object.bound_wwpns {
                if existing.is_some_and(|a| a.bound_wwpns.contains(wwpn)) {
                    claims.entry(wwpn).or_insert(host);
                    continue;
                }

                if let Some(owner) = actual.wwpn_owners.get(wwpn).filter(|o| *o != host) {
                    plan.divergences.push(Divergence {
                        partition_name: object.partition_name.clone(),
                        host: host.to_string(),
                        kind: DivergenceKind::WwpnBoundElsewhere {
                            wwpn: wwpn.clone(),
                            owner: owner.clone(),
                        },
                    });
                    continue;
                }

                match claims.get(wwpn) {
                    Some(other) if *other != host => {
                        plan.divergences.push(Divergence {
                            partition_name: object.partition_name.clone(),
                            host: host.to_string(),
                            kind: DivergenceKind::WwpnClaimedTwice {
                                wwpn: wwpn.clone(),
                                other_host: other.to_string(),
                            },
                        });
                    }
                    _ => {
                        claims.insert(wwpn, host);
                        plan.operations.push(Operation::BindWwpn {
                            host: host.to_string(),
                            wwpn: wwpn.clone(),
                        });
                    }
                }
            }

            if let Some(a) = existing {
                for wwpn in a.bound_wwpns.difference(&object.bound_wwpns) {
                    plan.operations.push(Operation::UnbindWwpn {
                        host: host.to_string(),
                        wwpn: wwpn.clone(),
                    });
                }
            }

            for lun in &object.lun_bindings {
                if !existing.is_some_and(|a| a.lun_bindings.contains(lun)) {
                    plan.operations.push(Operation::VerifyLunMapping {
                        host: host.to_string(),
                        lun: lun.clone(),
                    });
                }
            }

            let fresh = actual
                .snapshots
                .get(&object.snapshot_set_name)
                .is_some_and(|s| s.is_fresh(self.snapshot_max_age));
            if !fresh {
                plan.operations.push(Operation::VerifySnapshotReplication {
                    host: host.to_string(),
                    set_name: object.snapshot_set_name.clone(),
                });
            }
        }

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{ActualStorageObject, SnapshotReplicationStatus};
    use crate::identity::normalize_wwpn;
    use std::collections::BTreeSet;

    fn wwpn(s: &str) -> Wwpn {
        normalize_wwpn(s).unwrap()
    }

    fn desired(partition: &str, wwpns: &[&str], luns: &[&str]) -> DesiredStorageObject {
        let host = format!("h-{}", partition);
        DesiredStorageObject {
            partition_name: partition.into(),
            bound_wwpns: wwpns.iter().map(|w| wwpn(w)).collect(),
            lun_bindings: luns.iter().map(|l| LunRef(format!("{}-{}", host, l))).collect(),
            snapshot_set_name: format!("pg-{}", host),
            host_name: host,
        }
    }

    fn fresh_snapshots(state: &mut SiteState, objects: &[DesiredStorageObject]) {
        for object in objects {
            state.snapshots.insert(
                object.snapshot_set_name.clone(),
                SnapshotReplicationStatus::synced(Duration::from_secs(60)),
            );
        }
    }

    fn with_host(state: &mut SiteState, object: &DesiredStorageObject, wwpns: &[&str], luns: &[&str]) {
        let bound: BTreeSet<Wwpn> = wwpns.iter().map(|w| wwpn(w)).collect();
        for w in &bound {
            state.wwpn_owners.insert(w.clone(), object.host_name.clone());
        }
        state.host_names.insert(object.host_name.clone());
        state.hosts.insert(
            object.host_name.clone(),
            ActualStorageObject {
                host_name: object.host_name.clone(),
                bound_wwpns: bound,
                lun_bindings: luns
                    .iter()
                    .map(|l| LunRef(format!("{}-{}", object.host_name, l)))
                    .collect(),
                snapshot_set_name: object.snapshot_set_name.clone(),
                snapshot: state.snapshots.get(&object.snapshot_set_name).copied(),
            },
        );
    }

    fn planner() -> Planner {
        Planner::new(Duration::from_secs(3600))
    }

    #[test]
    fn test_fresh_site_creates_then_binds() {
        let objects = vec![
            desired("c", &["c0507603a2920090", "c0507603a2920091"], &[]),
            desired("a", &["c0507603a2920080", "c0507603a2920081"], &[]),
            desired("b", &["c0507603a2920084"], &[]),
        ];
        let mut state = SiteState::default();
        fresh_snapshots(&mut state, &objects);

        let plan = planner().plan(Site::Pra, &objects, &state);

        assert_eq!(plan.count("create_host"), 3);
        assert_eq!(plan.count("bind_wwpn"), 5);
        assert_eq!(plan.operations.len(), 8);
        assert!(plan.divergences.is_empty());

        // Per host: create first, then binds
        let hosts: Vec<_> = plan
            .operations
            .iter()
            .filter(|op| op.phase() == 0)
            .map(|op| op.host().to_string())
            .collect();
        assert_eq!(hosts, vec!["h-a", "h-b", "h-c"]);
        for host in &hosts {
            let phases: Vec<_> = plan
                .operations
                .iter()
                .filter(|op| op.host() == host)
                .map(Operation::phase)
                .collect();
            assert_eq!(phases[0], 0);
            assert!(phases.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_converged_site_plans_nothing() {
        let objects = vec![desired("a", &["c0507603a2920080"], &["rootvg"])];
        let mut state = SiteState::default();
        fresh_snapshots(&mut state, &objects);
        with_host(&mut state, &objects[0], &["c0507603a2920080"], &["rootvg"]);

        let plan = planner().plan(Site::Nominal, &objects, &state);
        assert!(plan.operations.is_empty());
        assert!(plan.is_converged());
    }

    #[test]
    fn test_partial_host_gets_missing_binding_and_advisory_unbind() {
        let objects = vec![desired("a", &["c0507603a2920080", "c0507603a2920081"], &[])];
        let mut state = SiteState::default();
        fresh_snapshots(&mut state, &objects);
        with_host(&mut state, &objects[0], &["c0507603a2920080", "c0507603a29200ff"], &[]);

        let plan = planner().plan(Site::Nominal, &objects, &state);

        assert_eq!(
            plan.operations,
            vec![
                Operation::BindWwpn {
                    host: "h-a".into(),
                    wwpn: wwpn("c0507603a2920081"),
                },
                Operation::UnbindWwpn {
                    host: "h-a".into(),
                    wwpn: wwpn("c0507603a29200ff"),
                },
            ]
        );
        assert!(!plan.is_converged());
        assert_eq!(plan.advisories().count(), 1);
    }

    #[test]
    fn test_wwpn_bound_elsewhere_is_divergent() {
        let objects = vec![desired("a", &["c0507603a2920080", "c0507603a2920081"], &[])];
        let mut state = SiteState::default();
        fresh_snapshots(&mut state, &objects);
        state.host_names.insert("old-host".into());
        state
            .wwpn_owners
            .insert(wwpn("c0507603a2920081"), "old-host".into());

        let plan = planner().plan(Site::Pra, &objects, &state);

        assert_eq!(plan.count("bind_wwpn"), 1);
        assert!(!plan.operations.iter().any(|op| matches!(
            op,
            Operation::BindWwpn { wwpn: w, .. } if *w == wwpn("c0507603a2920081")
        )));
        assert_eq!(plan.divergences.len(), 1);
        assert_eq!(
            plan.divergences[0].kind,
            DivergenceKind::WwpnBoundElsewhere {
                wwpn: wwpn("c0507603a2920081"),
                owner: "old-host".into(),
            }
        );
        assert!(matches!(
            plan.divergences[0].to_error(),
            Error::DivergentState { .. }
        ));
    }

    #[test]
    fn test_rotated_wwpns_are_bound_next_to_old_ones() {
        let objects = vec![desired("a", &["c0507603a2920080", "c0507603a2920081"], &[])];
        let mut state = SiteState::default();
        fresh_snapshots(&mut state, &objects);
        with_host(&mut state, &objects[0], &["c0507603a29200aa", "c0507603a29200ab"], &[]);

        let plan = planner().plan(Site::Pra, &objects, &state);

        assert!(plan.divergences.is_empty());
        assert_eq!(plan.count("create_host"), 0);
        assert_eq!(plan.count("bind_wwpn"), 2);
        assert_eq!(plan.count("unbind_wwpn"), 2);
        let unbound: BTreeSet<Wwpn> = plan
            .advisories()
            .filter_map(|op| match op {
                Operation::UnbindWwpn { wwpn, .. } => Some(wwpn.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            unbound,
            BTreeSet::from([wwpn("c0507603a29200aa"), wwpn("c0507603a29200ab")])
        );

        // Once bound, only the advisory unbinds remain
        let rerun = planner().plan(Site::Pra, &objects, &state.project(&plan));
        assert_eq!(rerun.actionable().count(), 0);
        assert_eq!(rerun.count("unbind_wwpn"), 2);
    }

    #[test]
    fn test_same_wwpn_claimed_by_two_partitions() {
        let objects = vec![
            desired("a", &["c0507603a2920080"], &[]),
            desired("b", &["c0507603a2920080"], &[]),
        ];
        let mut state = SiteState::default();
        fresh_snapshots(&mut state, &objects);

        let plan = planner().plan(Site::Pra, &objects, &state);

        assert_eq!(plan.count("bind_wwpn"), 1);
        assert_eq!(plan.divergences.len(), 1);
        assert_eq!(plan.divergences[0].partition_name, "b");
    }

    #[test]
    fn test_missing_lun_and_stale_snapshot_are_verified() {
        let objects = vec![desired("a", &["c0507603a2920080"], &["rootvg", "datavg"])];
        let mut state = SiteState::default();
        state.snapshots.insert(
            objects[0].snapshot_set_name.clone(),
            SnapshotReplicationStatus::synced(Duration::from_secs(7200)),
        );
        with_host(&mut state, &objects[0], &["c0507603a2920080"], &["rootvg"]);

        let plan = planner().plan(Site::Pra, &objects, &state);

        assert_eq!(
            plan.operations,
            vec![
                Operation::VerifyLunMapping {
                    host: "h-a".into(),
                    lun: LunRef("h-a-datavg".into()),
                },
                Operation::VerifySnapshotReplication {
                    host: "h-a".into(),
                    set_name: "pg-h-a".into(),
                },
            ]
        );
    }

    #[test]
    fn test_projection_reaches_fixed_point() {
        let objects = vec![
            desired("a", &["c0507603a2920080", "c0507603a2920081"], &[]),
            desired("b", &["c0507603a2920084"], &[]),
        ];
        let mut state = SiteState::default();
        fresh_snapshots(&mut state, &objects);

        let first = planner().plan(Site::Pra, &objects, &state);
        let projected = state.project(&first);
        let second = planner().plan(Site::Pra, &objects, &projected);

        assert!(!first.operations.is_empty());
        assert!(second.operations.is_empty());
    }
}
