//! HMC Dump Inventory
//!
//! Reads partition inventory from captured HMC command output:
//!
//! ```text
//! lshwres -r virtualio --rsubtype fc  --level lpar -m <sys> -F "lpar_name;wwpns"    > <sys>.fc
//! lshwres -r virtualio --rsubtype eth --level lpar -m <sys> -F "lpar_name;mac_addr" > <sys>.eth
//! lsyscfg -r lpar -m <sys> -F "name;lpar_env"                                         > <sys>.lpar
//! lsyscfg -r sys -F name                                                               > managed_systems
//! ```
//!
//! Files live under `<dir>/<site>/`. The console prints one line per virtual
//! adapter, so lines are merged per partition. Only partitions with FC
//! adapters are inventoried; MAC and role files are optional.

use crate::domain::model::{RawPartition, Site};
use crate::domain::ports::{DiscoveryFilter, InventorySource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Role used when the console does not report `lpar_env`
pub const DEFAULT_ROLE: &str = "aixlinux";

// =============================================================================
// Output Parsing
// =============================================================================

fn is_noise(line: &str) -> bool {
    line.is_empty() || line.starts_with("No results were found")
}

fn is_empty_value(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("null") || value.eq_ignore_ascii_case("none")
}

/// Split `name;values` lines into names and their multi-valued field,
/// merging repeated names in first-seen order
fn parse_multi_valued(output: &str, split: fn(char) -> bool) -> IndexMap<String, Vec<String>> {
    let mut merged: IndexMap<String, IndexSet<String>> = IndexMap::new();

    for line in output.lines().map(str::trim).filter(|l| !is_noise(l)) {
        let Some((name, values)) = line.split_once(';') else {
            debug!("Skipping unparseable HMC line: {}", line);
            continue;
        };

        let entry = merged.entry(name.trim().to_string()).or_default();
        for value in values
            .split(split)
            .map(|v| v.trim().trim_matches('"'))
            .filter(|v| !is_empty_value(v))
        {
            entry.insert(value.to_string());
        }
    }

    merged
        .into_iter()
        .map(|(name, values)| (name, values.into_iter().collect()))
        .collect()
}

/// Parse `lpar_name;wwpns` output
pub fn parse_fc_output(output: &str) -> IndexMap<String, Vec<String>> {
    parse_multi_valued(output, |c| c == ',')
}

/// Parse `lpar_name;mac_addr` output
pub fn parse_eth_output(output: &str) -> IndexMap<String, Vec<String>> {
    parse_multi_valued(output, |c| c == ',' || c.is_whitespace())
}

/// Parse `name;lpar_env` output
pub fn parse_lpar_env_output(output: &str) -> IndexMap<String, String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !is_noise(l))
        .filter_map(|line| line.split_once(';'))
        .map(|(name, env)| (name.trim().to_string(), env.trim().trim_matches('"').to_string()))
        .collect()
}

/// Parse `lsyscfg -r sys -F name` output, dropping duplicates
pub fn parse_system_names(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|l| l.trim().trim_matches('"').trim())
        .filter(|l| !is_noise(l))
        .map(str::to_string)
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}

/// Assemble raw partitions from the three outputs
pub fn assemble_partitions(
    fc: &IndexMap<String, Vec<String>>,
    eth: &IndexMap<String, Vec<String>>,
    roles: &IndexMap<String, String>,
    filter: &DiscoveryFilter,
) -> Vec<RawPartition> {
    fc.iter()
        .filter(|(name, _)| !filter.is_excluded(name))
        .map(|(name, wwpns)| RawPartition {
            partition_name: name.clone(),
            role: roles
                .get(name)
                .filter(|r| !r.is_empty())
                .cloned()
                .unwrap_or_else(|| DEFAULT_ROLE.to_string()),
            wwpns: wwpns.clone(),
            macs: eth.get(name).cloned().unwrap_or_default(),
        })
        .collect()
}

// =============================================================================
// Inventory Source
// =============================================================================

/// File listing the managed systems of a site
pub const SYSTEMS_FILE: &str = "managed_systems";

/// Inventory read from captured HMC output files
pub struct HmcDumpInventory {
    name: String,
    dir: PathBuf,
}

impl HmcDumpInventory {
    pub fn new(name: &str, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            dir: dir.into(),
        }
    }

    fn path(&self, site: Site, managed_system: &str, kind: &str) -> PathBuf {
        self.dir
            .join(site.as_str())
            .join(format!("{}.{}", managed_system, kind))
    }

    async fn read(&self, site: Site, managed_system: &str, kind: &str) -> Result<Option<String>> {
        self.read_path(self.path(site, managed_system, kind)).await
    }

    async fn read_path(&self, path: PathBuf) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::SourceUnavailable {
                source_name: self.name.clone(),
                reason: format!("cannot read {}: {}", path.display(), e),
            }),
        }
    }
}

#[async_trait]
impl InventorySource for HmcDumpInventory {
    async fn discover(
        &self,
        managed_system: &str,
        site: Site,
        filter: &DiscoveryFilter,
    ) -> Result<Vec<RawPartition>> {
        let fc = self
            .read(site, managed_system, "fc")
            .await?
            .ok_or_else(|| Error::SourceUnavailable {
                source_name: self.name.clone(),
                reason: format!(
                    "no FC inventory at {}",
                    self.path(site, managed_system, "fc").display()
                ),
            })?;

        let eth = match self.read(site, managed_system, "eth").await? {
            Some(content) => parse_eth_output(&content),
            None => {
                warn!(managed_system, %site, "No Ethernet inventory, partitions will have no MACs");
                IndexMap::new()
            }
        };

        let roles = self
            .read(site, managed_system, "lpar")
            .await?
            .map(|content| parse_lpar_env_output(&content))
            .unwrap_or_default();

        let partitions = assemble_partitions(&parse_fc_output(&fc), &eth, &roles, filter);
        debug!(
            managed_system,
            %site,
            count = partitions.len(),
            "Read HMC inventory"
        );
        Ok(partitions)
    }

    async fn list_managed_systems(&self, site: Site) -> Result<Vec<String>> {
        let path = self.dir.join(site.as_str()).join(SYSTEMS_FILE);
        let content = self
            .read_path(path.clone())
            .await?
            .ok_or_else(|| Error::SourceUnavailable {
                source_name: self.name.clone(),
                reason: format!("no managed system list at {}", path.display()),
            })?;

        let systems = parse_system_names(&content);
        debug!(%site, count = systems.len(), "Read managed system list");
        Ok(systems)
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}
