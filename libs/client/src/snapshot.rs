//! Saved restore points of an instance's disk and memory.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use vdev_id::{InstanceId, SnapshotId};

use crate::accessor::{CallOptions, RemoteAccessor};
use crate::error::Result;

/// Progress of a snapshot on the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotStatus {
    /// The snapshot is complete and can be restored.
    #[serde(default)]
    pub created: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A snapshot record as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: SnapshotId,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub status: SnapshotStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A snapshot of one instance, with the operations that act on it.
///
/// Not cached on the instance; every listing builds fresh values.
#[derive(Clone)]
pub struct Snapshot {
    instance: InstanceId,
    info: SnapshotInfo,
    accessor: Arc<dyn RemoteAccessor>,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("instance", &self.instance)
            .field("info", &self.info)
            .finish()
    }
}

impl Snapshot {
    pub(crate) fn new(
        instance: InstanceId,
        info: SnapshotInfo,
        accessor: Arc<dyn RemoteAccessor>,
    ) -> Self {
        Self {
            instance,
            info,
            accessor,
        }
    }

    pub fn id(&self) -> SnapshotId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance
    }

    pub fn info(&self) -> &SnapshotInfo {
        &self.info
    }

    pub fn is_created(&self) -> bool {
        self.info.status.created
    }

    fn path(&self) -> String {
        format!("/instances/{}/snapshots/{}", self.instance, self.info.id)
    }

    /// Restore the instance to this snapshot.
    pub async fn restore(&self) -> Result<()> {
        info!(instance_id = %self.instance, snapshot_id = %self.info.id, "Restoring snapshot");
        self.accessor
            .call(&format!("{}/restore", self.path()), CallOptions::post())
            .await?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        info!(instance_id = %self.instance, snapshot_id = %self.info.id, "Deleting snapshot");
        self.accessor
            .call(&self.path(), CallOptions::delete())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use serde_json::json;

    use super::*;
    use crate::accessor::MockAccessor;

    fn info(id: SnapshotId) -> SnapshotInfo {
        serde_json::from_value(json!({
            "id": id,
            "name": "clean-boot",
            "status": { "created": true, "task": "done" },
            "created": "2026-03-01T12:00:00Z",
            "fw": "17.0"
        }))
        .unwrap()
    }

    #[test]
    fn test_info_decodes_status_and_extra() {
        let id = SnapshotId::new();
        let info = info(id);

        assert_eq!(info.id, id);
        assert!(info.status.created);
        assert_eq!(info.status.extra["task"], json!("done"));
        assert_eq!(info.extra["fw"], json!("17.0"));
        assert!(info.created.is_some());
    }

    #[test]
    fn test_info_tolerates_missing_status() {
        let info: SnapshotInfo = serde_json::from_value(json!({"id": SnapshotId::new()})).unwrap();
        assert!(!info.status.created);
        assert!(info.created.is_none());
    }

    #[tokio::test]
    async fn test_restore_and_delete_are_plain_calls() {
        let instance = InstanceId::new();
        let sid = SnapshotId::new();
        let base = format!("/instances/{instance}/snapshots/{sid}");
        let mock = Arc::new(MockAccessor::new());
        mock.respond_json(Method::POST, format!("{base}/restore"), json!({}));
        mock.respond_json(Method::DELETE, &base, Value::Null);

        let snapshot = Snapshot::new(instance, info(sid), mock.clone());
        snapshot.restore().await.unwrap();
        snapshot.delete().await.unwrap();

        assert_eq!(mock.call_count(&Method::POST, &format!("{base}/restore")), 1);
        assert_eq!(mock.call_count(&Method::DELETE, &base), 1);
    }
}
