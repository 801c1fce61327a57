//! Naming Convention Engine
//!
//! Maps a partition's logical identity to the names of its storage objects.
//! Names are a function of (managed_system, partition_name, role) only, so a
//! WWPN or MAC change re-derives to the same host and reconciliation never
//! has to rename anything.

use crate::domain::model::{DesiredStorageObject, LunRef, PartitionIdentity};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// Constants
// =============================================================================

/// Longest host name the engine produces, leaving room for LUN suffixes
/// under the array's 63-character object name limit
pub const HOST_NAME_MAX: usize = 48;

/// Longest volume suffix appended to a host name
pub const VOLUME_SUFFIX_MAX: usize = 14;

/// Hex digits of the identity digest appended to every host name
const DIGEST_HEX_LEN: usize = 8;

/// Longest sanitized host prefix; leaves one stem character, two dashes and
/// the digest under `HOST_NAME_MAX`
pub const HOST_PREFIX_MAX: usize = HOST_NAME_MAX - DIGEST_HEX_LEN - 3;

const SNAPSHOT_SET_PREFIX: &str = "pg-";

// =============================================================================
// Configuration
// =============================================================================

/// LUN layout per partition role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeLayout {
    /// Volume suffixes for roles without an explicit entry
    #[serde(default)]
    pub default: Vec<String>,
    /// Volume suffixes by role
    #[serde(default)]
    pub by_role: BTreeMap<String, Vec<String>>,
}

impl VolumeLayout {
    fn volumes_for(&self, role: &str) -> &[String] {
        self.by_role
            .get(role)
            .map(Vec::as_slice)
            .unwrap_or(self.default.as_slice())
    }
}

/// Naming configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConfig {
    /// Prefix prepended to every host name
    #[serde(default)]
    pub host_prefix: String,
    /// Expected LUNs per role
    #[serde(default)]
    pub volumes: VolumeLayout,
}

// =============================================================================
// Naming Convention
// =============================================================================

/// Deterministic name derivation
#[derive(Debug, Clone, Default)]
pub struct NamingConvention {
    config: NamingConfig,
}

impl NamingConvention {
    pub fn new(config: NamingConfig) -> Self {
        Self { config }
    }

    /// Derive the desired storage objects of a partition
    pub fn derive_names(&self, identity: &PartitionIdentity) -> DesiredStorageObject {
        let host_name = self.host_name(
            &identity.managed_system,
            &identity.partition_name,
            &identity.role,
        );

        let lun_bindings = self
            .config
            .volumes
            .volumes_for(&identity.role)
            .iter()
            .map(|volume| {
                let mut suffix = sanitize(volume);
                suffix.truncate(VOLUME_SUFFIX_MAX);
                LunRef(format!("{}-{}", host_name, suffix.trim_end_matches('-')))
            })
            .collect::<BTreeSet<_>>();

        DesiredStorageObject {
            partition_name: identity.partition_name.clone(),
            snapshot_set_name: format!("{}{}", SNAPSHOT_SET_PREFIX, host_name),
            bound_wwpns: identity.wwpns.iter().cloned().collect(),
            lun_bindings,
            host_name,
        }
    }

    /// Host name for a logical identity
    ///
    /// Readable stem plus a digest of the exact tuple. The digest keeps two
    /// tuples that sanitize to the same stem (`db_01` and `db-01`) apart.
    pub fn host_name(&self, managed_system: &str, partition_name: &str, role: &str) -> String {
        let mut prefix = sanitize(&self.config.host_prefix);
        prefix.truncate(HOST_PREFIX_MAX);
        prefix.truncate(prefix.trim_end_matches('-').len());
        if !prefix.is_empty() {
            prefix.push('-');
        }
        let digest = identity_digest(managed_system, partition_name, role);

        let mut stem = [managed_system, partition_name, role]
            .iter()
            .map(|part| sanitize(part))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        if stem.is_empty() {
            stem.push_str("lpar");
        }

        let budget = HOST_NAME_MAX
            .saturating_sub(prefix.len() + 1 + DIGEST_HEX_LEN)
            .max(1);
        stem.truncate(budget);
        let stem = stem.trim_end_matches('-');

        format!("{}{}-{}", prefix, stem, digest)
    }
}

/// Lowercase, keep `[a-z0-9]`, fold everything else into single dashes
fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

fn identity_digest(managed_system: &str, partition_name: &str, role: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(managed_system.as_bytes());
    hasher.update([0u8]);
    hasher.update(partition_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(role.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..DIGEST_HEX_LEN / 2])
}
