//! File-Backed Array
//!
//! An array whose state is a JSON document on disk, for offline rehearsals
//! of a run against exported array state. The document is rewritten after
//! every mutation.
//!
//! The state lock is held across a mutation and its write to disk, so
//! concurrent runs sharing one array never interleave their writes. A
//! mutation is applied to a copy and only becomes visible once the document
//! is on disk.

use crate::adapters::memory::ArrayState;
use crate::domain::model::SnapshotReplicationStatus;
use crate::domain::ports::StorageStateSource;
use crate::error::{Error, Result};
use crate::identity::Wwpn;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Array backed by a JSON state file
pub struct JsonFileArray {
    name: String,
    path: PathBuf,
    state: Mutex<ArrayState>,
}

impl JsonFileArray {
    /// Open an array state file. A missing file is an unreachable array.
    pub async fn open(name: &str, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            Error::SourceUnavailable {
                source_name: name.to_string(),
                reason: format!("cannot read {}: {}", path.display(), e),
            }
        })?;
        let state: ArrayState = serde_json::from_str(&raw)?;

        info!(
            array = name,
            path = %path.display(),
            hosts = state.hosts.len(),
            "Opened array state file"
        );

        Ok(Self {
            name: name.to_string(),
            path,
            state: Mutex::new(state),
        })
    }

    /// Apply `change` and persist the result, all under the state lock
    async fn mutate<F>(&self, operation: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut ArrayState) -> Result<()> + Send,
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        change(&mut next)?;

        if let Err(e) = self.persist(&next).await {
            warn!(array = %self.name, operation, "State file not written, change dropped: {}", e);
            return Err(e);
        }
        *state = next;
        Ok(())
    }

    async fn persist(&self, state: &ArrayState) -> Result<()> {
        let document = serde_json::to_string_pretty(state)?;

        let tmp = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));
        tokio::fs::write(&tmp, document).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(array = %self.name, path = %self.path.display(), "Persisted array state");
        Ok(())
    }
}

#[async_trait]
impl StorageStateSource for JsonFileArray {
    async fn list_hosts(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().await.host_names())
    }

    async fn list_wwpn_bindings(&self, host: &str) -> Result<Vec<Wwpn>> {
        self.state.lock().await.wwpns(&self.name, host)
    }

    async fn list_lun_bindings(&self, host: &str) -> Result<Vec<String>> {
        self.state.lock().await.luns(&self.name, host)
    }

    async fn snapshot_replication_status(
        &self,
        set_name: &str,
    ) -> Result<SnapshotReplicationStatus> {
        Ok(self.state.lock().await.snapshot_status(set_name, Utc::now()))
    }

    async fn create_host(&self, name: &str) -> Result<()> {
        self.mutate("create_host", |state| state.create_host(&self.name, name))
            .await
    }

    async fn bind_wwpn(&self, host: &str, wwpn: &Wwpn) -> Result<()> {
        self.mutate("bind_wwpn", |state| state.bind_wwpn(&self.name, host, wwpn))
            .await
    }

    fn array_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::normalize_wwpn;

    #[tokio::test]
    async fn test_mutations_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pra.json");
        std::fs::write(
            &path,
            r#"{ "hosts": { "old": { "wwpns": ["C0:50:76:03:A2:92:00:99"] } } }"#,
        )
        .unwrap();

        let array = JsonFileArray::open("pure-pra", &path).await.unwrap();
        assert_eq!(array.list_hosts().await.unwrap(), vec!["old".to_string()]);

        let wwpn = normalize_wwpn("c0507603a2920080").unwrap();
        array.create_host("db01").await.unwrap();
        array.bind_wwpn("db01", &wwpn).await.unwrap();

        let reopened = JsonFileArray::open("pure-pra", &path).await.unwrap();
        assert_eq!(
            reopened.list_wwpn_bindings("db01").await.unwrap(),
            vec![wwpn]
        );
        assert_eq!(
            reopened.list_wwpn_bindings("old").await.unwrap()[0].as_str(),
            "c0507603a2920099"
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = JsonFileArray::open("pure-pra", dir.path().join("absent.json"))
            .await
            .err()
            .unwrap();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_concurrent_mutations_all_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pra.json");
        std::fs::write(&path, "{}").unwrap();

        let array = std::sync::Arc::new(JsonFileArray::open("pure-pra", &path).await.unwrap());
        let (a, b) = (array.clone(), array.clone());

        for round in 0..50 {
            let (db, app) = (format!("db{:02}", round), format!("app{:02}", round));
            let (left, right) = tokio::join!(a.create_host(&db), b.create_host(&app));
            left.unwrap();
            right.unwrap();
        }

        let reopened = JsonFileArray::open("pure-pra", &path).await.unwrap();
        assert_eq!(reopened.list_hosts().await.unwrap().len(), 100);
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pra.json");
        std::fs::write(&path, "{}").unwrap();
        let array = JsonFileArray::open("pure-pra", &path).await.unwrap();

        // The rename target becomes a non-empty directory
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "").unwrap();

        let err = array.create_host("db01").await.unwrap_err();
        assert_eq!(err.kind(), "io");
        assert!(array.list_hosts().await.unwrap().is_empty());
    }
}
