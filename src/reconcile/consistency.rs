//! Cross-Site Consistency Checker
//!
//! Compares the nominal and PRA definitions of each partition after
//! reconciliation. It only reports; correcting anything is left to the
//! reconciler on a later run, once the identity sources agree.

use crate::domain::model::{ActualStorageObject, DesiredStorageObject, PartitionIdentity, Site};
use crate::error::Error;
use crate::identity::{Mac, Wwpn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// WWPN Policy
// =============================================================================

/// How WWPNs of the two sites are compared for a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WwpnCheck {
    /// Site-local WWPNs; the same number of ports must be bound at both sites
    #[default]
    Correspond,
    /// The PRA site must present byte-identical WWPNs
    Preserve,
}

/// Per-partition WWPN comparison policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WwpnPolicy {
    #[serde(default)]
    pub default: WwpnCheck,
    /// Partitions whose WWPNs must be preserved across sites
    #[serde(default)]
    pub preserve: BTreeSet<String>,
}

impl WwpnPolicy {
    pub fn for_partition(&self, partition_name: &str) -> WwpnCheck {
        if self.preserve.contains(partition_name) {
            WwpnCheck::Preserve
        } else {
            self.default
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// One partition as defined at one site
#[derive(Debug, Clone)]
pub struct SiteView {
    pub identity: PartitionIdentity,
    pub desired: DesiredStorageObject,
    /// Host as read (or projected) on the site's array
    pub actual: Option<ActualStorageObject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MacDelta {
    pub only_nominal: Vec<Mac>,
    pub only_pra: Vec<Mac>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WwpnDelta {
    pub check: WwpnCheck,
    pub nominal: Vec<Wwpn>,
    pub pra: Vec<Wwpn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NamingDelta {
    pub nominal_host: String,
    pub pra_host: String,
    /// Sites whose array has no host under the derived name
    pub missing_at: Vec<Site>,
}

/// Verdict for one partition present at both sites
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PartitionVerdict {
    pub partition_name: String,
    pub host_name: String,
    pub passed: bool,
    pub mac_delta: Option<MacDelta>,
    pub wwpn_delta: Option<WwpnDelta>,
    pub naming_delta: Option<NamingDelta>,
}

impl PartitionVerdict {
    /// Errors carried by this verdict
    pub fn errors(&self) -> Vec<Error> {
        let mut errors = Vec::new();

        if let Some(delta) = &self.mac_delta {
            errors.push(Error::ConsistencyViolation {
                partition: self.partition_name.clone(),
                detail: format!(
                    "MAC mismatch: only nominal [{}], only pra [{}]",
                    join(&delta.only_nominal),
                    join(&delta.only_pra)
                ),
            });
        }
        if let Some(delta) = &self.wwpn_delta {
            errors.push(Error::ConsistencyViolation {
                partition: self.partition_name.clone(),
                detail: format!(
                    "WWPN {:?} check failed: nominal [{}], pra [{}]",
                    delta.check,
                    join(&delta.nominal),
                    join(&delta.pra)
                ),
            });
        }
        if let Some(delta) = &self.naming_delta {
            errors.push(Error::ConsistencyViolation {
                partition: self.partition_name.clone(),
                detail: format!(
                    "naming mismatch: nominal {}, pra {}, missing at {:?}",
                    delta.nominal_host, delta.pra_host, delta.missing_at
                ),
            });
        }

        errors
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Partition known at one site only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UnpairedPartition {
    pub partition_name: String,
    pub present_at: Site,
}

/// Cross-site verdicts of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConsistencyReport {
    pub verdicts: Vec<PartitionVerdict>,
    pub unpaired: Vec<UnpairedPartition>,
}

impl ConsistencyReport {
    pub fn passed(&self) -> bool {
        self.verdicts.iter().all(|v| v.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PartitionVerdict> {
        self.verdicts.iter().filter(|v| !v.passed)
    }

    /// Partitions whose MAC sets differ between sites
    pub fn mac_violations(&self) -> impl Iterator<Item = &PartitionVerdict> {
        self.verdicts.iter().filter(|v| v.mac_delta.is_some())
    }
}

// =============================================================================
// Checker
// =============================================================================

/// Compares nominal and PRA partition definitions
#[derive(Debug, Clone, Default)]
pub struct ConsistencyChecker {
    policy: WwpnPolicy,
}

impl ConsistencyChecker {
    pub fn new(policy: WwpnPolicy) -> Self {
        Self { policy }
    }

    pub fn check(&self, nominal: &[SiteView], pra: &[SiteView]) -> ConsistencyReport {
        let nominal_by_name: BTreeMap<&str, &SiteView> = nominal
            .iter()
            .map(|v| (v.identity.partition_name.as_str(), v))
            .collect();
        let pra_by_name: BTreeMap<&str, &SiteView> = pra
            .iter()
            .map(|v| (v.identity.partition_name.as_str(), v))
            .collect();

        let mut report = ConsistencyReport::default();

        for (name, nominal_view) in &nominal_by_name {
            match pra_by_name.get(name) {
                Some(pra_view) => report
                    .verdicts
                    .push(self.compare(nominal_view, pra_view)),
                None => report.unpaired.push(UnpairedPartition {
                    partition_name: name.to_string(),
                    present_at: Site::Nominal,
                }),
            }
        }
        for name in pra_by_name.keys() {
            if !nominal_by_name.contains_key(name) {
                report.unpaired.push(UnpairedPartition {
                    partition_name: name.to_string(),
                    present_at: Site::Pra,
                });
            }
        }

        report
    }

    fn compare(&self, nominal: &SiteView, pra: &SiteView) -> PartitionVerdict {
        let partition_name = nominal.identity.partition_name.clone();

        let nominal_macs = &nominal.identity.mac_addresses;
        let pra_macs = &pra.identity.mac_addresses;
        let mac_delta = (nominal_macs != pra_macs).then(|| MacDelta {
            only_nominal: nominal_macs.difference(pra_macs).cloned().collect(),
            only_pra: pra_macs.difference(nominal_macs).cloned().collect(),
        });

        let mut missing_at = Vec::new();
        if nominal.actual.is_none() {
            missing_at.push(Site::Nominal);
        }
        if pra.actual.is_none() {
            missing_at.push(Site::Pra);
        }
        let naming_delta = (nominal.desired.host_name != pra.desired.host_name
            || !missing_at.is_empty())
        .then(|| NamingDelta {
            nominal_host: nominal.desired.host_name.clone(),
            pra_host: pra.desired.host_name.clone(),
            missing_at,
        });

        let check = self.policy.for_partition(&partition_name);
        let wwpn_delta = match (presented(nominal), presented(pra)) {
            (Some(n), Some(p)) => {
                let mismatch = match check {
                    WwpnCheck::Correspond => n.len() != p.len(),
                    WwpnCheck::Preserve => n != p,
                };
                mismatch.then(|| WwpnDelta {
                    check,
                    nominal: n.into_iter().collect(),
                    pra: p.into_iter().collect(),
                })
            }
            _ => None,
        };

        PartitionVerdict {
            passed: mac_delta.is_none() && wwpn_delta.is_none() && naming_delta.is_none(),
            host_name: nominal.desired.host_name.clone(),
            partition_name,
            mac_delta,
            wwpn_delta,
            naming_delta,
        }
    }
}

/// Reported WWPNs the host actually carries. Leftover bindings no partition
/// reports are advisory and left out of the comparison.
fn presented(view: &SiteView) -> Option<BTreeSet<Wwpn>> {
    view.actual.as_ref().map(|actual| {
        actual
            .bound_wwpns
            .intersection(&view.desired.bound_wwpns)
            .cloned()
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{normalize_mac, normalize_wwpn, NamingConvention};

    fn view(site: Site, name: &str, wwpns: &[&str], macs: &[&str], present: bool) -> SiteView {
        let identity = PartitionIdentity {
            site,
            managed_system: "P980-A".into(),
            partition_name: name.into(),
            role: "aixlinux".into(),
            wwpns: wwpns.iter().map(|w| normalize_wwpn(w).unwrap()).collect(),
            mac_addresses: macs.iter().map(|m| normalize_mac(m).unwrap()).collect(),
        };
        let desired = NamingConvention::default().derive_names(&identity);
        let actual = present.then(|| ActualStorageObject {
            host_name: desired.host_name.clone(),
            bound_wwpns: desired.bound_wwpns.clone(),
            lun_bindings: desired.lun_bindings.clone(),
            snapshot_set_name: desired.snapshot_set_name.clone(),
            snapshot: None,
        });
        SiteView {
            identity,
            desired,
            actual,
        }
    }

    #[test]
    fn test_matching_sites_pass() {
        let nominal = vec![view(Site::Nominal, "db01", &["c0507603a2920080"], &["0a1b2c3d4e5f"], true)];
        let pra = vec![view(Site::Pra, "db01", &["c0507603a29200a0"], &["0A:1B:2C:3D:4E:5F"], true)];

        let report = ConsistencyChecker::default().check(&nominal, &pra);
        assert!(report.passed());
        assert_eq!(report.verdicts.len(), 1);
        assert!(report.unpaired.is_empty());
    }

    #[test]
    fn test_mac_mismatch_is_violation() {
        let nominal = vec![view(Site::Nominal, "db01", &["c0507603a2920080"], &["0a1b2c3d4e5f"], true)];
        let pra = vec![view(Site::Pra, "db01", &["c0507603a29200a0"], &["0a1b2c3d4e60"], true)];

        let report = ConsistencyChecker::default().check(&nominal, &pra);
        assert!(!report.passed());
        assert_eq!(report.mac_violations().count(), 1);

        let verdict = &report.verdicts[0];
        let delta = verdict.mac_delta.as_ref().unwrap();
        assert_eq!(delta.only_nominal, vec![normalize_mac("0a1b2c3d4e5f").unwrap()]);
        assert_eq!(delta.only_pra, vec![normalize_mac("0a1b2c3d4e60").unwrap()]);
        assert!(matches!(
            verdict.errors()[0],
            Error::ConsistencyViolation { .. }
        ));
    }

    #[test]
    fn test_wwpn_correspondence_and_preservation() {
        let nominal = vec![view(
            Site::Nominal,
            "db01",
            &["c0507603a2920080", "c0507603a2920081"],
            &["0a1b2c3d4e5f"],
            true,
        )];
        let pra = vec![view(
            Site::Pra,
            "db01",
            &["c0507603a29200a0", "c0507603a29200a1"],
            &["0a1b2c3d4e5f"],
            true,
        )];

        assert!(ConsistencyChecker::default().check(&nominal, &pra).passed());

        let preserve = ConsistencyChecker::new(WwpnPolicy {
            default: WwpnCheck::Correspond,
            preserve: ["db01".to_string()].into_iter().collect(),
        });
        let report = preserve.check(&nominal, &pra);
        assert!(!report.passed());
        assert_eq!(
            report.verdicts[0].wwpn_delta.as_ref().map(|d| d.check),
            Some(WwpnCheck::Preserve)
        );
        assert_eq!(report.mac_violations().count(), 0);
    }

    #[test]
    fn test_port_count_mismatch() {
        let nominal = vec![view(
            Site::Nominal,
            "db01",
            &["c0507603a2920080", "c0507603a2920081"],
            &[],
            true,
        )];
        let pra = vec![view(Site::Pra, "db01", &["c0507603a29200a0"], &[], true)];

        let report = ConsistencyChecker::default().check(&nominal, &pra);
        assert!(report.verdicts[0].wwpn_delta.is_some());
    }

    #[test]
    fn test_leftover_bindings_are_ignored() {
        let nominal = vec![view(Site::Nominal, "db01", &["c0507603a2920080"], &[], true)];
        let mut pra = vec![view(Site::Pra, "db01", &["c0507603a29200a0"], &[], true)];
        if let Some(actual) = pra[0].actual.as_mut() {
            actual.bound_wwpns.insert(normalize_wwpn("c0507603a29200ff").unwrap());
        }

        assert!(ConsistencyChecker::default().check(&nominal, &pra).passed());

        // A desired WWPN that is not bound still counts
        if let Some(actual) = pra[0].actual.as_mut() {
            actual.bound_wwpns.remove(&normalize_wwpn("c0507603a29200a0").unwrap());
        }
        let report = ConsistencyChecker::default().check(&nominal, &pra);
        let delta = report.verdicts[0].wwpn_delta.as_ref().unwrap();
        assert!(delta.pra.is_empty());
    }

    #[test]
    fn test_missing_host_and_unpaired() {
        let nominal = vec![
            view(Site::Nominal, "db01", &["c0507603a2920080"], &[], true),
            view(Site::Nominal, "app01", &["c0507603a2920082"], &[], true),
        ];
        let pra = vec![
            view(Site::Pra, "db01", &["c0507603a29200a0"], &[], false),
            view(Site::Pra, "dr-only", &["c0507603a29200a2"], &[], true),
        ];

        let report = ConsistencyChecker::default().check(&nominal, &pra);

        assert_eq!(report.verdicts.len(), 1);
        let naming = report.verdicts[0].naming_delta.as_ref().unwrap();
        assert_eq!(naming.missing_at, vec![Site::Pra]);

        let unpaired: Vec<_> = report
            .unpaired
            .iter()
            .map(|u| (u.partition_name.as_str(), u.present_at))
            .collect();
        assert_eq!(unpaired, vec![("app01", Site::Nominal), ("dr-only", Site::Pra)]);
    }
}
