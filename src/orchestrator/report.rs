//! Run Report
//!
//! Structured record of one run for one managed system. Renders as a human
//! summary through `Display` and as JSON through serde; [`report_schema`]
//! documents the JSON shape.

use crate::domain::model::{PartitionIdentity, Site};
use crate::reconcile::{ApplyResult, ConsistencyReport, OutcomeStatus, ReconciliationPlan};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Run State
// =============================================================================

/// Orchestrator states, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Discover,
    Normalize,
    ReconcileNominal,
    ReconcilePra,
    Verify,
    /// Safe to activate the partitions at the PRA site
    Ready,
    Blocked,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Discover => "discover",
            RunState::Normalize => "normalize",
            RunState::ReconcileNominal => "reconcile_nominal",
            RunState::ReconcilePra => "reconcile_pra",
            RunState::Verify => "verify",
            RunState::Ready => "ready",
            RunState::Blocked => "blocked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Ready | RunState::Blocked)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Report Entries
// =============================================================================

/// Why a run stopped short of `Ready`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BlockedReason {
    /// State in which the run was blocked
    pub stage: RunState,
    pub kind: String,
    pub message: String,
}

/// Partition dropped from the desired set of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RejectedPartition {
    pub site: Site,
    pub partition_name: String,
    pub kind: String,
    pub message: String,
}

/// Plan and apply result of one site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SiteReport {
    pub site: Site,
    pub array: String,
    pub plan: ReconciliationPlan,
    /// Absent in dry-run
    pub apply: Option<ApplyResult>,
}

// =============================================================================
// Run Report
// =============================================================================

/// Report of one run for one managed system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    pub managed_system: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// States entered, in order, terminal state included
    pub stages: Vec<RunState>,
    pub final_state: RunState,
    pub blocked: Option<BlockedReason>,
    /// Partitions discovered per site, after exclusions
    pub discovered: Vec<(Site, usize)>,
    /// Normalized partitions of both sites
    pub partitions: Vec<PartitionIdentity>,
    pub rejected: Vec<RejectedPartition>,
    pub nominal: Option<SiteReport>,
    pub pra: Option<SiteReport>,
    pub consistency: Option<ConsistencyReport>,
}

impl RunReport {
    pub fn new(managed_system: &str, dry_run: bool) -> Self {
        Self {
            managed_system: managed_system.to_string(),
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
            final_state: RunState::Discover,
            blocked: None,
            discovered: Vec::new(),
            partitions: Vec::new(),
            rejected: Vec::new(),
            nominal: None,
            pra: None,
            consistency: None,
        }
    }

    pub(crate) fn enter(&mut self, state: RunState) {
        self.stages.push(state);
        self.final_state = state;
        if state.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }

    pub(crate) fn block_with(&mut self, kind: &str, message: &str) {
        self.blocked = Some(BlockedReason {
            stage: self.final_state,
            kind: kind.to_string(),
            message: message.to_string(),
        });
        self.enter(RunState::Blocked);
    }

    pub fn is_ready(&self) -> bool {
        self.final_state == RunState::Ready
    }

    pub fn site(&self, site: Site) -> Option<&SiteReport> {
        match site {
            Site::Nominal => self.nominal.as_ref(),
            Site::Pra => self.pra.as_ref(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// JSON schema of the machine-readable report
pub fn report_schema() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&schemars::schema_for!(Vec<RunReport>))
}

// =============================================================================
// Human Summary
// =============================================================================

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "== {}: {}{}",
            self.managed_system,
            self.final_state.as_str().to_uppercase(),
            if self.dry_run { " (dry-run)" } else { "" }
        )?;
        writeln!(
            f,
            "   stages: {}",
            self.stages
                .iter()
                .map(RunState::as_str)
                .collect::<Vec<_>>()
                .join(" -> ")
        )?;
        for (site, count) in &self.discovered {
            writeln!(f, "   {} partitions: {}", site, count)?;
        }

        for rejected in &self.rejected {
            writeln!(
                f,
                "   x rejected {}/{}: {}",
                rejected.site, rejected.partition_name, rejected.message
            )?;
        }

        for site in [&self.nominal, &self.pra].into_iter().flatten() {
            write_site(f, site)?;
        }

        if let Some(consistency) = &self.consistency {
            let passed = consistency.verdicts.iter().filter(|v| v.passed).count();
            writeln!(
                f,
                "   consistency: {}/{} partitions passed",
                passed,
                consistency.verdicts.len()
            )?;
            for verdict in consistency.failures() {
                for error in verdict.errors() {
                    writeln!(f, "     x {}", error)?;
                }
            }
            for unpaired in &consistency.unpaired {
                writeln!(
                    f,
                    "     ~ {} only known at {}",
                    unpaired.partition_name, unpaired.present_at
                )?;
            }
        }

        if let Some(blocked) = &self.blocked {
            writeln!(f, "   blocked at {}: {}", blocked.stage, blocked.message)?;
        }

        Ok(())
    }
}

fn write_site(f: &mut fmt::Formatter<'_>, site: &SiteReport) -> fmt::Result {
    let plan = &site.plan;
    writeln!(
        f,
        "   [{} {}] {} actionable, {} advisory, {} divergent",
        site.site,
        site.array,
        plan.actionable().count(),
        plan.advisories().count(),
        plan.divergences.len()
    )?;

    match &site.apply {
        Some(result) => {
            for outcome in &result.outcomes {
                match &outcome.status {
                    OutcomeStatus::Failed { message, .. } => {
                        writeln!(f, "     x {}: {}", outcome.operation, message)?
                    }
                    status => writeln!(f, "     - {} [{}]", outcome.operation, status.name())?,
                }
            }
        }
        None => {
            for operation in &plan.operations {
                writeln!(f, "     - {} [planned]", operation)?;
            }
        }
    }

    for divergence in &plan.divergences {
        writeln!(f, "     ! {}", divergence.to_error())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_block_records_stage_and_error() {
        let mut report = RunReport::new("P980-A", true);
        report.enter(RunState::Discover);
        let error = Error::SourceUnavailable {
            source_name: "hmc".into(),
            reason: "connection refused".into(),
        };
        report.block_with(error.kind(), &error.to_string());

        assert_eq!(report.stages, vec![RunState::Discover, RunState::Blocked]);
        assert_eq!(report.final_state, RunState::Blocked);
        let blocked = report.blocked.as_ref().unwrap();
        assert_eq!(blocked.stage, RunState::Discover);
        assert_eq!(blocked.kind, "source_unavailable");
        assert!(report.finished_at.is_some());

        let summary = report.to_string();
        assert!(summary.contains("BLOCKED (dry-run)"));
        assert!(summary.contains("blocked at discover"));
    }

    #[test]
    fn test_json_round_trip_and_schema() {
        let mut report = RunReport::new("P980-A", false);
        report.enter(RunState::Discover);

        let json = report.to_json().unwrap();
        let parsed: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);

        let schema = report_schema().unwrap();
        assert!(schema.contains("RunReport"));
        assert!(schema.contains("reconcile_pra"));
    }
}
