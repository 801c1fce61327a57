//! Run Configuration
//!
//! YAML document describing the console, the two arrays, the managed systems
//! to process and the engine options. Every field has a default so a minimal
//! file only says where the sources live. Without a `systems` list every
//! managed system the console knows is processed.
//!
//! ```yaml
//! dry_run: true
//! retry:
//!   max_attempts: 3
//! console:
//!   endpoint: hmc-paris.example.net
//!   dump_dir: /var/lib/lpar-dr-sync/hmc
//! arrays:
//!   nominal: { name: pure-paris, state_file: /var/lib/lpar-dr-sync/paris.json }
//!   pra: { name: pure-lyon, state_file: /var/lib/lpar-dr-sync/lyon.json }
//! systems:
//!   - managed_system: P980-A
//!     exclude: [vios1, vios2]
//!     wwpn_policy:
//!       preserve: [lpar-db01]
//! ```

use crate::domain::model::Site;
use crate::error::{Error, Result};
use crate::identity::{NamingConfig, HOST_PREFIX_MAX};
use crate::orchestrator::{OrchestratorConfig, SystemTarget};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Upper bound of `retry.max_attempts`
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

// =============================================================================
// Sources
// =============================================================================

/// Hardware management console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub name: String,
    pub endpoint: String,
    pub user: String,
    /// Environment variable holding the console password
    pub password_env: Option<String>,
    /// Directory of captured console output, `<dump_dir>/<site>/<system>.*`
    pub dump_dir: Option<PathBuf>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            name: "hmc".into(),
            endpoint: String::new(),
            user: String::new(),
            password_env: None,
            dump_dir: None,
        }
    }
}

/// Storage array of one site
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayConfig {
    /// Defaults to the site name
    pub name: String,
    pub endpoint: String,
    pub user: String,
    /// Environment variable holding the API token
    pub token_env: Option<String>,
    /// Array state document, for file-backed arrays
    pub state_file: Option<PathBuf>,
}

/// Arrays of both sites
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteArrays {
    pub nominal: ArrayConfig,
    pub pra: ArrayConfig,
}

impl Default for SiteArrays {
    fn default() -> Self {
        let mut arrays = Self {
            nominal: ArrayConfig::default(),
            pra: ArrayConfig::default(),
        };
        arrays.name_after_sites();
        arrays
    }
}

impl SiteArrays {
    pub fn get(&self, site: Site) -> &ArrayConfig {
        match site {
            Site::Nominal => &self.nominal,
            Site::Pra => &self.pra,
        }
    }

    /// Name unnamed arrays after their site
    fn name_after_sites(&mut self) {
        for (site, array) in [(Site::Nominal, &mut self.nominal), (Site::Pra, &mut self.pra)] {
            if array.name.trim().is_empty() {
                array.name = site.as_str().to_string();
            }
        }
    }
}

// =============================================================================
// DR Configuration
// =============================================================================

/// Complete configuration of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrConfig {
    pub dry_run: bool,
    pub retry: RetryPolicy,
    pub snapshot_max_age_secs: u64,
    pub naming: NamingConfig,
    pub console: ConsoleConfig,
    pub arrays: SiteArrays,
    pub systems: Vec<SystemTarget>,
}

impl Default for DrConfig {
    fn default() -> Self {
        let engine = OrchestratorConfig::default();
        Self {
            dry_run: engine.dry_run,
            retry: engine.retry,
            snapshot_max_age_secs: engine.snapshot_max_age_secs,
            naming: engine.naming,
            console: ConsoleConfig::default(),
            arrays: SiteArrays::default(),
            systems: Vec::new(),
        }
    }
}

impl DrConfig {
    /// Load and validate a YAML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&content)?;
        debug!(
            path = %path.display(),
            systems = config.systems.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.arrays.name_after_sites();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for system in &self.systems {
            if system.managed_system.trim().is_empty() {
                return Err(Error::Configuration("empty managed system name".into()));
            }
            if !seen.insert(system.managed_system.as_str()) {
                return Err(Error::Configuration(format!(
                    "managed system {} listed twice",
                    system.managed_system
                )));
            }
        }

        if !(1..=MAX_RETRY_ATTEMPTS).contains(&self.retry.max_attempts) {
            return Err(Error::Configuration(format!(
                "retry.max_attempts must be between 1 and {}",
                MAX_RETRY_ATTEMPTS
            )));
        }
        if self.retry.call_timeout_secs == 0 {
            return Err(Error::Configuration(
                "retry.call_timeout_secs must be positive".into(),
            ));
        }
        if self.snapshot_max_age_secs == 0 {
            return Err(Error::Configuration(
                "snapshot_max_age_secs must be positive".into(),
            ));
        }
        if self.naming.host_prefix.len() > HOST_PREFIX_MAX {
            return Err(Error::Configuration(format!(
                "naming.host_prefix is longer than {} characters",
                HOST_PREFIX_MAX
            )));
        }
        if self.arrays.nominal.name == self.arrays.pra.name {
            return Err(Error::Configuration(format!(
                "both sites use array {}",
                self.arrays.nominal.name
            )));
        }

        Ok(())
    }

    /// Engine options, with the dry-run flag as configured
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            dry_run: self.dry_run,
            retry: self.retry.clone(),
            snapshot_max_age_secs: self.snapshot_max_age_secs,
            naming: self.naming.clone(),
        }
    }

    pub fn system(&self, managed_system: &str) -> Option<&SystemTarget> {
        self.systems
            .iter()
            .find(|s| s.managed_system == managed_system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::WwpnCheck;
    use assert_matches::assert_matches;

    const EXAMPLE: &str = r#"
retry:
  max_attempts: 5
naming:
  host_prefix: DR
  volumes:
    default: [rootvg]
    by_role:
      os400: [load-source]
console:
  endpoint: hmc-paris.example.net
  dump_dir: /var/lib/lpar-dr-sync/hmc
arrays:
  nominal: { name: pure-paris, state_file: /tmp/paris.json }
  pra: { name: pure-lyon, state_file: /tmp/lyon.json, token_env: PURE_LYON_TOKEN }
systems:
  - managed_system: P980-A
    exclude: [vios1, vios2]
    wwpn_policy:
      preserve: [lpar-db01]
  - managed_system: P980-B
"#;

    #[test]
    fn test_example_loads_with_defaults() {
        let config = DrConfig::from_yaml(EXAMPLE).unwrap();

        assert!(config.dry_run);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.call_timeout_secs, 30);
        assert_eq!(config.snapshot_max_age_secs, 3600);
        assert_eq!(config.console.name, "hmc");
        assert_eq!(config.arrays.get(Site::Pra).name, "pure-lyon");
        assert_eq!(config.naming.volumes.by_role["os400"], vec!["load-source"]);

        let a = config.system("P980-A").unwrap();
        assert!(a.exclude.contains("vios2"));
        assert_eq!(a.wwpn_policy.for_partition("lpar-db01"), WwpnCheck::Preserve);
        assert_eq!(a.wwpn_policy.for_partition("lpar-app01"), WwpnCheck::Correspond);
        assert!(config.system("P980-B").unwrap().exclude.is_empty());
        assert!(config.system("P980-C").is_none());

        let engine = config.orchestrator_config();
        assert!(engine.dry_run);
        assert_eq!(engine.naming.host_prefix, "DR");
    }

    #[test]
    fn test_sections_without_names_keep_default_names() {
        let config = DrConfig::from_yaml(
            "console: { dump_dir: /tmp/hmc }\n\
             arrays:\n  nominal: { state_file: /tmp/a.json }\n  pra: { state_file: /tmp/b.json }\n",
        )
        .unwrap();

        assert_eq!(config.console.name, "hmc");
        assert_eq!(config.arrays.nominal.name, "nominal");
        assert_eq!(config.arrays.pra.name, "pra");
        assert!(config.systems.is_empty());
        assert_eq!(DrConfig::default().arrays, DrConfig::from_yaml("{}").unwrap().arrays);
    }

    #[test]
    fn test_validation_errors() {
        assert_matches!(
            DrConfig::from_yaml("arrays: { nominal: { name: pure }, pra: { name: pure } }\n"),
            Err(Error::Configuration(msg)) if msg.contains("both sites")
        );
        assert_matches!(
            DrConfig::from_yaml(&format!("naming: {{ host_prefix: {} }}\n", "x".repeat(40))),
            Err(Error::Configuration(msg)) if msg.contains("host_prefix")
        );
        assert_matches!(
            DrConfig::from_yaml("systems: [{managed_system: A}, {managed_system: A}]\n"),
            Err(Error::Configuration(msg)) if msg.contains("listed twice")
        );
        assert_matches!(
            DrConfig::from_yaml("retry: {max_attempts: 50}\nsystems: [{managed_system: A}]\n"),
            Err(Error::Configuration(msg)) if msg.contains("max_attempts")
        );
        assert_matches!(
            DrConfig::from_yaml("systems: {managed_system: A}\n"),
            Err(Error::YamlParse(_))
        );
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            DrConfig::load(dir.path().join("absent.yaml")),
            Err(Error::Configuration(_))
        );

        let path = dir.path().join("dr.yaml");
        std::fs::write(&path, EXAMPLE).unwrap();
        assert_eq!(DrConfig::load(&path).unwrap().systems.len(), 2);
    }
}
