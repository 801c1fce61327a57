//! DR Orchestrator
//!
//! Drives one managed system through
//! `Discover -> Normalize -> ReconcileNominal -> ReconcilePra -> Verify` and
//! ends in `Ready` or `Blocked`. The first failing stage blocks the run and no
//! later stage is entered.
//!
//! In dry-run mode every apply is replaced by its plan: mutations are assumed
//! to succeed, verifications are evaluated against the state read before
//! planning, and the Verify stage checks the projected state. A dry-run thus
//! walks the same states and produces the same plans and verdicts as a live
//! run whose applies succeed.

use crate::domain::model::{DesiredStorageObject, PartitionIdentity, RawPartition, Site};
use crate::domain::ports::{
    DiscoveryFilter, InventorySource, InventorySourceRef, StorageStateSource,
    StorageStateSourceRef,
};
use crate::error::{Error, Result};
use crate::identity::{normalize_partition, NamingConfig, NamingConvention};
use crate::orchestrator::lock::SystemLocks;
use crate::orchestrator::metrics::RunMetrics;
use crate::orchestrator::report::{RejectedPartition, RunReport, RunState, SiteReport};
use crate::reconcile::{
    rehearse, Applier, ConsistencyChecker, OperationOutcome, OutcomeStatus, PartitionVerdict,
    Planner, SiteState, SiteView, WwpnPolicy,
};
use crate::retry::RetryPolicy;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Plan only, never mutate the arrays
    pub dry_run: bool,
    /// Retry bound and timeout of every external call
    pub retry: RetryPolicy,
    /// Maximum age of the last snapshot replication
    pub snapshot_max_age_secs: u64,
    pub naming: NamingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            retry: RetryPolicy::default(),
            snapshot_max_age_secs: 3600,
            naming: NamingConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn snapshot_max_age(&self) -> Duration {
        Duration::from_secs(self.snapshot_max_age_secs)
    }
}

// =============================================================================
// Targets and Sessions
// =============================================================================

/// One managed system to bring to readiness
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemTarget {
    pub managed_system: String,
    /// Partitions skipped entirely
    #[serde(default)]
    pub exclude: BTreeSet<String>,
    #[serde(default)]
    pub wwpn_policy: WwpnPolicy,
}

impl SystemTarget {
    pub fn new(managed_system: &str) -> Self {
        Self {
            managed_system: managed_system.to_string(),
            ..Default::default()
        }
    }

    pub fn filter(&self) -> DiscoveryFilter {
        DiscoveryFilter {
            exclude: self.exclude.clone(),
        }
    }
}

/// Sources used by the run of one managed system
#[derive(Clone)]
pub struct SystemSession {
    pub inventory: InventorySourceRef,
    pub nominal: StorageStateSourceRef,
    pub pra: StorageStateSourceRef,
}

impl SystemSession {
    fn array(&self, site: Site) -> &dyn StorageStateSource {
        match site {
            Site::Nominal => self.nominal.as_ref(),
            Site::Pra => self.pra.as_ref(),
        }
    }
}

/// Why a run stopped
#[derive(Debug)]
struct Halt {
    kind: String,
    message: String,
}

impl From<Error> for Halt {
    fn from(e: Error) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

impl Halt {
    fn from_outcome(outcome: &OperationOutcome) -> Option<Self> {
        match &outcome.status {
            OutcomeStatus::Failed { kind, message, .. } => Some(Self {
                kind: kind.clone(),
                message: format!("{}: {}", outcome.operation, message),
            }),
            _ => None,
        }
    }
}

/// One site after reconciliation
struct ReconciledSite {
    identities: Vec<PartitionIdentity>,
    desired: Vec<DesiredStorageObject>,
    /// Re-read after apply, or projected from the plan in dry-run
    state: SiteState,
}

impl ReconciledSite {
    fn views(&self) -> Vec<SiteView> {
        self.identities
            .iter()
            .zip(&self.desired)
            .map(|(identity, desired)| SiteView {
                identity: identity.clone(),
                desired: desired.clone(),
                actual: self.state.actual(&desired.host_name).cloned(),
            })
            .collect()
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Runs managed systems to DR readiness
pub struct Orchestrator {
    config: OrchestratorConfig,
    locks: Arc<SystemLocks>,
    metrics: RunMetrics,
    naming: NamingConvention,
    planner: Planner,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Result<Self> {
        Ok(Self {
            locks: SystemLocks::new(),
            metrics: RunMetrics::new()?,
            naming: NamingConvention::new(config.naming.clone()),
            planner: Planner::new(config.snapshot_max_age()),
            config,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Run one managed system to `Ready` or `Blocked`.
    ///
    /// Stage failures end up in the report. The only error returned is
    /// [`Error::RunInProgress`], when another run holds the managed system.
    pub async fn run(&self, target: &SystemTarget, session: &SystemSession) -> Result<RunReport> {
        let managed_system = target.managed_system.as_str();
        let _guard = self.locks.try_acquire(managed_system)?;

        let started = Instant::now();
        let mut report = RunReport::new(managed_system, self.config.dry_run);
        info!(
            managed_system,
            dry_run = self.config.dry_run,
            "Starting DR run"
        );

        let span = info_span!("run", managed_system);
        let outcome = self
            .advance(target, session, &mut report)
            .instrument(span)
            .await;

        if let Err(halt) = outcome {
            warn!(
                managed_system,
                stage = %report.final_state,
                kind = %halt.kind,
                "Run blocked: {}",
                halt.message
            );
            report.block_with(&halt.kind, &halt.message);
        }

        let elapsed = started.elapsed();
        self.metrics
            .record_run(managed_system, report.final_state.as_str(), elapsed.as_secs_f64());
        info!(
            managed_system,
            state = %report.final_state,
            elapsed_ms = elapsed.as_millis() as u64,
            "DR run finished"
        );

        Ok(report)
    }

    /// Targets for every managed system the console knows at the nominal
    /// site, with default options
    pub async fn managed_systems(&self, inventory: &dyn InventorySource) -> Result<Vec<SystemTarget>> {
        let systems = self
            .config
            .retry
            .call(inventory.source_name(), "list_managed_systems", || {
                inventory.list_managed_systems(Site::Nominal)
            })
            .await?;
        info!(
            source = inventory.source_name(),
            count = systems.len(),
            "Enumerated managed systems"
        );
        Ok(systems.iter().map(|name| SystemTarget::new(name)).collect())
    }

    /// Run several managed systems in parallel, each with its own session
    pub async fn run_all(
        &self,
        runs: Vec<(SystemTarget, SystemSession)>,
    ) -> Vec<Result<RunReport>> {
        join_all(
            runs.iter()
                .map(|(target, session)| self.run(target, session)),
        )
        .await
    }

    async fn advance(
        &self,
        target: &SystemTarget,
        session: &SystemSession,
        report: &mut RunReport,
    ) -> std::result::Result<(), Halt> {
        let managed_system = target.managed_system.as_str();

        // Discover
        report.enter(RunState::Discover);
        let discovered = self.discover(target, session, report).await?;
        if report
            .discovered
            .iter()
            .any(|(site, count)| *site == Site::Nominal && *count == 0)
        {
            return Err(Error::NotReady {
                managed_system: managed_system.to_string(),
                reason: "no partitions discovered at the nominal site".into(),
            }
            .into());
        }

        // Normalize
        report.enter(RunState::Normalize);
        let mut partition_errors = Vec::new();
        let identities = self.normalize(managed_system, discovered, report, &mut partition_errors);
        report.partitions = identities.clone();

        let (nominal, pra): (Vec<_>, Vec<_>) = identities
            .into_iter()
            .partition(|i| i.site == Site::Nominal);

        // Reconcile
        report.enter(RunState::ReconcileNominal);
        let nominal = self
            .reconcile_site(Site::Nominal, nominal, session, report)
            .await?;

        report.enter(RunState::ReconcilePra);
        let pra = self.reconcile_site(Site::Pra, pra, session, report).await?;

        // Verify
        report.enter(RunState::Verify);
        let consistency =
            ConsistencyChecker::new(target.wwpn_policy.clone()).check(&nominal.views(), &pra.views());
        for unpaired in &consistency.unpaired {
            warn!(
                managed_system,
                partition = %unpaired.partition_name,
                present_at = %unpaired.present_at,
                "Partition known at one site only"
            );
        }

        let divergences = [&report.nominal, &report.pra]
            .into_iter()
            .flatten()
            .flat_map(|site| site.plan.divergences.iter().map(|d| d.to_error()))
            .collect::<Vec<_>>();

        // Partition-scoped apply failures that did not stop their site
        let refused = [&report.nominal, &report.pra]
            .into_iter()
            .flatten()
            .filter_map(|site| site.apply.as_ref())
            .flat_map(|result| result.outcomes.iter())
            .find_map(Halt::from_outcome);

        let blocking = consistency
            .mac_violations()
            .flat_map(PartitionVerdict::errors)
            .next()
            .or_else(|| divergences.into_iter().next())
            .map(Halt::from)
            .or(refused)
            .or_else(|| partition_errors.into_iter().next().map(Halt::from))
            .or_else(|| {
                consistency
                    .failures()
                    .flat_map(PartitionVerdict::errors)
                    .next()
                    .map(Halt::from)
            });

        info!(
            managed_system,
            verdicts = consistency.verdicts.len(),
            failed = consistency.failures().count(),
            unpaired = consistency.unpaired.len(),
            "Cross-site verification done"
        );
        report.consistency = Some(consistency);

        if let Some(halt) = blocking {
            return Err(halt);
        }

        report.enter(RunState::Ready);
        Ok(())
    }

    async fn discover(
        &self,
        target: &SystemTarget,
        session: &SystemSession,
        report: &mut RunReport,
    ) -> Result<Vec<(Site, Vec<RawPartition>)>> {
        let managed_system = target.managed_system.as_str();
        let filter = target.filter();
        let inventory = session.inventory.as_ref();
        let mut discovered = Vec::with_capacity(Site::ALL.len());

        for site in Site::ALL {
            let partitions = self
                .config
                .retry
                .call(inventory.source_name(), "discover", || {
                    inventory.discover(managed_system, site, &filter)
                })
                .await?
                .into_iter()
                .filter(|p| !filter.is_excluded(&p.partition_name))
                .collect::<Vec<_>>();

            debug!(
                managed_system,
                %site,
                count = partitions.len(),
                "Discovered partitions"
            );
            report.discovered.push((site, partitions.len()));
            discovered.push((site, partitions));
        }

        Ok(discovered)
    }

    /// Normalize discovered partitions. A partition rejected at one site is
    /// dropped at both.
    fn normalize(
        &self,
        managed_system: &str,
        discovered: Vec<(Site, Vec<RawPartition>)>,
        report: &mut RunReport,
        errors: &mut Vec<Error>,
    ) -> Vec<PartitionIdentity> {
        let mut identities = Vec::new();
        let mut rejected = BTreeSet::new();

        for (site, partitions) in discovered {
            for raw in partitions {
                match normalize_partition(site, managed_system, &raw) {
                    Ok(identity) => identities.push(identity),
                    Err(e) => {
                        warn!(
                            managed_system,
                            %site,
                            partition = %raw.partition_name,
                            "Rejecting partition: {}",
                            e
                        );
                        report.rejected.push(RejectedPartition {
                            site,
                            partition_name: raw.partition_name.clone(),
                            kind: e.kind().to_string(),
                            message: e.to_string(),
                        });
                        rejected.insert(raw.partition_name);
                        errors.push(e);
                    }
                }
            }
        }

        identities.retain(|i| !rejected.contains(&i.partition_name));
        identities
    }

    async fn reconcile_site(
        &self,
        site: Site,
        identities: Vec<PartitionIdentity>,
        session: &SystemSession,
        report: &mut RunReport,
    ) -> std::result::Result<ReconciledSite, Halt> {
        let array = session.array(site);
        let retry = &self.config.retry;
        let max_age = self.planner.snapshot_max_age();

        let desired = identities
            .iter()
            .map(|identity| self.naming.derive_names(identity))
            .collect::<Vec<_>>();

        let state = SiteState::read(array, site, &desired, retry).await?;
        let plan = self.planner.plan(site, &desired, &state);

        for divergence in &plan.divergences {
            warn!(%site, host = %divergence.host, "{}", divergence.to_error());
        }
        info!(
            %site,
            array = array.array_name(),
            actionable = plan.actionable().count(),
            advisory = plan.advisories().count(),
            divergent = plan.divergences.len(),
            "Planned site"
        );

        let (apply, failure, projected) = if self.config.dry_run {
            let failure = rehearse(&plan, &state, max_age).map(Halt::from);
            (None, failure, Some(state.project(&plan)))
        } else {
            let result = Applier::new(array, retry, max_age).apply(&plan).await;
            self.metrics.record_apply(&result);
            let failure = result.site_failure().and_then(Halt::from_outcome);
            (Some(result), failure, None)
        };

        let site_report = SiteReport {
            site,
            array: array.array_name().to_string(),
            plan,
            apply,
        };
        match site {
            Site::Nominal => report.nominal = Some(site_report),
            Site::Pra => report.pra = Some(site_report),
        }

        if let Some(halt) = failure {
            return Err(halt);
        }

        let state = match projected {
            Some(state) => state,
            None => SiteState::read(array, site, &desired, retry).await?,
        };

        Ok(ReconciledSite {
            identities,
            desired,
            state,
        })
    }
}
