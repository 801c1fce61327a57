//! Plan Application
//!
//! Executes a plan against one array in order. Each operation re-checks its
//! postcondition first and is a no-op when the array already satisfies it.
//! A partition-scoped failure skips the rest of that host's operations; any
//! other failure aborts the rest of the site's plan. Nothing already applied
//! is rolled back.

use crate::domain::model::{Site, SnapshotReplicationStatus};
use crate::domain::ports::StorageStateSource;
use crate::error::{Error, ErrorScope, Result};
use crate::reconcile::plan::{Operation, ReconciliationPlan};
use crate::reconcile::state::SiteState;
use crate::retry::RetryPolicy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// =============================================================================
// Outcomes
// =============================================================================

/// What happened to one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The array was changed
    Applied,
    /// The postcondition already held
    AlreadySatisfied,
    /// A verification passed
    Verified,
    /// Advisory operation, not applied
    Advisory,
    /// Not attempted because an earlier operation failed
    Skipped,
    /// The operation failed
    Failed {
        kind: String,
        scope: ErrorScope,
        message: String,
    },
}

impl OutcomeStatus {
    pub fn name(&self) -> &'static str {
        match self {
            OutcomeStatus::Applied => "applied",
            OutcomeStatus::AlreadySatisfied => "already_satisfied",
            OutcomeStatus::Verified => "verified",
            OutcomeStatus::Advisory => "advisory",
            OutcomeStatus::Skipped => "skipped",
            OutcomeStatus::Failed { .. } => "failed",
        }
    }
}

/// Outcome of one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OperationOutcome {
    pub operation: Operation,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

/// Result of applying a plan to one site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ApplyResult {
    pub site: Site,
    pub array: String,
    pub outcomes: Vec<OperationOutcome>,
}

impl ApplyResult {
    /// First failed outcome, if any
    pub fn failure(&self) -> Option<&OperationOutcome> {
        self.outcomes
            .iter()
            .find(|o| matches!(o.status, OutcomeStatus::Failed { .. }))
    }

    /// First failure that stopped the whole site
    pub fn site_failure(&self) -> Option<&OperationOutcome> {
        self.outcomes.iter().find(|o| {
            matches!(
                o.status,
                OutcomeStatus::Failed { scope, .. } if scope != ErrorScope::Partition
            )
        })
    }

    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }

    /// Number of operations that changed the array
    pub fn applied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Applied)
            .count()
    }
}

// =============================================================================
// Applier
// =============================================================================

/// Applies plans to one array
pub struct Applier<'a> {
    source: &'a dyn StorageStateSource,
    retry: &'a RetryPolicy,
    snapshot_max_age: Duration,
}

impl<'a> Applier<'a> {
    pub fn new(
        source: &'a dyn StorageStateSource,
        retry: &'a RetryPolicy,
        snapshot_max_age: Duration,
    ) -> Self {
        Self {
            source,
            retry,
            snapshot_max_age,
        }
    }

    /// Apply `plan` in order, stopping the host or the site at a failure
    /// depending on its scope
    pub async fn apply(&self, plan: &ReconciliationPlan) -> ApplyResult {
        let array = self.source.array_name().to_string();
        let mut outcomes = Vec::with_capacity(plan.operations.len());
        let mut aborted = false;
        let mut failed_hosts = BTreeSet::new();

        for operation in &plan.operations {
            let status = if aborted || failed_hosts.contains(operation.host()) {
                OutcomeStatus::Skipped
            } else if operation.is_advisory() {
                info!(site = %plan.site, "{}", operation);
                OutcomeStatus::Advisory
            } else {
                match self.execute(operation).await {
                    Ok(status) => {
                        debug!(site = %plan.site, status = status.name(), "{}", operation);
                        status
                    }
                    Err(e) => {
                        let scope = e.scope();
                        if scope == ErrorScope::Partition {
                            warn!(site = %plan.site, array = %array, "{} failed: {}", operation, e);
                            failed_hosts.insert(operation.host().to_string());
                        } else {
                            error!(site = %plan.site, array = %array, "{} failed: {}", operation, e);
                            aborted = true;
                        }
                        OutcomeStatus::Failed {
                            kind: e.kind().to_string(),
                            scope,
                            message: e.to_string(),
                        }
                    }
                }
            };

            outcomes.push(OperationOutcome {
                operation: operation.clone(),
                status,
            });
        }

        ApplyResult {
            site: plan.site,
            array,
            outcomes,
        }
    }

    async fn execute(&self, operation: &Operation) -> Result<OutcomeStatus> {
        let source = self.source;
        let array = source.array_name();
        let name = operation.name();

        match operation {
            Operation::CreateHost { host, .. } => {
                self.retry
                    .call(array, name, || async move {
                        if source.list_hosts().await?.iter().any(|h| h == host) {
                            return Ok(OutcomeStatus::AlreadySatisfied);
                        }
                        source.create_host(host).await?;
                        Ok(OutcomeStatus::Applied)
                    })
                    .await
            }
            Operation::BindWwpn { host, wwpn } => {
                self.retry
                    .call(array, name, || async move {
                        if source.list_wwpn_bindings(host).await?.contains(wwpn) {
                            return Ok(OutcomeStatus::AlreadySatisfied);
                        }
                        source.bind_wwpn(host, wwpn).await?;
                        Ok(OutcomeStatus::Applied)
                    })
                    .await
            }
            Operation::VerifyLunMapping { host, lun } => {
                let luns = self
                    .retry
                    .call(array, name, || source.list_lun_bindings(host))
                    .await?;
                if luns.iter().any(|l| *l == lun.0) {
                    Ok(OutcomeStatus::Verified)
                } else {
                    Err(Error::LunMappingMissing {
                        host: host.clone(),
                        lun: lun.0.clone(),
                    })
                }
            }
            Operation::VerifySnapshotReplication { set_name, .. } => {
                let status = self
                    .retry
                    .call(array, name, || source.snapshot_replication_status(set_name))
                    .await?;
                match stale_snapshot(set_name, &status, self.snapshot_max_age) {
                    Some(e) => Err(e),
                    None => Ok(OutcomeStatus::Verified),
                }
            }
            Operation::UnbindWwpn { .. } => Ok(OutcomeStatus::Advisory),
        }
    }
}

fn stale_snapshot(
    set_name: &str,
    status: &SnapshotReplicationStatus,
    max_age: Duration,
) -> Option<Error> {
    if status.is_fresh(max_age) {
        return None;
    }
    let reason = match status.last_sync_age() {
        _ if !status.exists => "replicated snapshot set does not exist".to_string(),
        Some(age) => format!(
            "last sync {}s ago exceeds bound of {}s",
            age.as_secs(),
            max_age.as_secs()
        ),
        None => "no completed sync".to_string(),
    };
    Some(Error::SnapshotReplication {
        set_name: set_name.to_string(),
        reason,
    })
}

// =============================================================================
// Rehearsal
// =============================================================================

/// Error the first failing operation of `plan` would raise against `state`,
/// without calling the array.
///
/// Mutations are assumed to succeed. Verifications are evaluated against the
/// state read before planning, which no operation of the plan changes.
pub fn rehearse(
    plan: &ReconciliationPlan,
    state: &SiteState,
    snapshot_max_age: Duration,
) -> Option<Error> {
    plan.operations.iter().find_map(|operation| match operation {
        Operation::VerifyLunMapping { host, lun } => {
            let mapped = state
                .actual(host)
                .is_some_and(|a| a.lun_bindings.contains(lun));
            (!mapped).then(|| Error::LunMappingMissing {
                host: host.clone(),
                lun: lun.0.clone(),
            })
        }
        Operation::VerifySnapshotReplication { set_name, .. } => {
            let status = state.snapshots.get(set_name).copied().unwrap_or_default();
            stale_snapshot(set_name, &status, snapshot_max_age)
        }
        Operation::CreateHost { .. } | Operation::BindWwpn { .. } | Operation::UnbindWwpn { .. } => {
            None
        }
    })
}
