//! Projects group instances and create them.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use vdev_id::{InstanceId, ProjectId};

use crate::accessor::{call_json, CallOptions, RemoteAccessor};
use crate::error::Result;
use crate::instance::{Instance, InstanceOptions};
use crate::state::InstanceSnapshot;

/// A project record as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: ProjectId,

    #[serde(default)]
    pub name: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Parameters for a new instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateInstance {
    pub name: String,
    pub flavor: String,

    /// Operating system version; the platform picks a default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

impl CreateInstance {
    pub fn new(name: impl Into<String>, flavor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flavor: flavor.into(),
            os: None,
        }
    }

    pub fn os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }
}

#[derive(Serialize)]
struct CreateInstanceRequest<'a> {
    project: ProjectId,
    #[serde(flatten)]
    params: &'a CreateInstance,
}

/// Handle to a project.
#[derive(Clone)]
pub struct Project {
    info: ProjectInfo,
    accessor: Arc<dyn RemoteAccessor>,
    options: InstanceOptions,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project").field("info", &self.info).finish()
    }
}

impl Project {
    pub(crate) fn new(
        info: ProjectInfo,
        accessor: Arc<dyn RemoteAccessor>,
        options: InstanceOptions,
    ) -> Self {
        Self {
            info,
            accessor,
            options,
        }
    }

    pub fn id(&self) -> ProjectId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &ProjectInfo {
        &self.info
    }

    /// Every instance in the project, each in its own handle.
    pub async fn instances(&self) -> Result<Vec<Instance>> {
        let snapshots: Vec<InstanceSnapshot> = call_json(
            &*self.accessor,
            &format!("/projects/{}/instances", self.info.id),
            CallOptions::get(),
        )
        .await?;
        Ok(snapshots.into_iter().map(|s| self.wrap(s)).collect())
    }

    /// Fetch one instance by id.
    pub async fn instance(&self, id: InstanceId) -> Result<Instance> {
        let snapshot: InstanceSnapshot =
            call_json(&*self.accessor, &format!("/instances/{id}"), CallOptions::get()).await?;
        Ok(self.wrap(snapshot))
    }

    /// Create an instance and return a handle seeded with the platform's reply.
    ///
    /// The instance usually starts in `creating`; wait for `on` before using
    /// its channels.
    pub async fn create_instance(&self, params: CreateInstance) -> Result<Instance> {
        info!(project_id = %self.info.id, name = %params.name, flavor = %params.flavor, "Creating instance");
        let body = serde_json::to_value(CreateInstanceRequest {
            project: self.info.id,
            params: &params,
        })?;
        let snapshot: InstanceSnapshot =
            call_json(&*self.accessor, "/instances", CallOptions::post().json(body)).await?;
        info!(instance_id = %snapshot.id, state = %snapshot.state, "Instance created");
        Ok(self.wrap(snapshot))
    }

    fn wrap(&self, snapshot: InstanceSnapshot) -> Instance {
        Instance::new(Arc::clone(&self.accessor), snapshot, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use serde_json::json;

    use super::*;
    use crate::accessor::MockAccessor;
    use crate::state::InstanceStatus;

    fn project(mock: &Arc<MockAccessor>) -> Project {
        let info = ProjectInfo {
            id: ProjectId::new(),
            name: "default".into(),
            extra: BTreeMap::new(),
        };
        Project::new(info, mock.clone(), InstanceOptions::default())
    }

    #[tokio::test]
    async fn test_create_instance_posts_project_and_params() {
        let mock = Arc::new(MockAccessor::new());
        let project = project(&mock);
        let id = InstanceId::new();
        mock.respond_json(
            Method::POST,
            "/instances",
            json!({"id": id, "name": "pixel", "state": "creating", "flavor": "pixel-7"}),
        );

        let instance = project
            .create_instance(CreateInstance::new("pixel", "pixel-7").os("14.0"))
            .await
            .unwrap();

        assert_eq!(instance.id(), id);
        assert_eq!(instance.state(), InstanceStatus::Creating);
        assert_eq!(
            mock.calls()[0].body,
            Some(json!({
                "project": project.id(),
                "name": "pixel",
                "flavor": "pixel-7",
                "os": "14.0"
            }))
        );
    }

    #[tokio::test]
    async fn test_create_instance_omits_missing_os() {
        let mock = Arc::new(MockAccessor::new());
        let project = project(&mock);
        mock.respond_json(
            Method::POST,
            "/instances",
            json!({"id": InstanceId::new(), "state": "creating"}),
        );

        project
            .create_instance(CreateInstance::new("a", "b"))
            .await
            .unwrap();
        let body = mock.calls()[0].body.clone().unwrap();
        assert!(body.get("os").is_none());
    }

    #[tokio::test]
    async fn test_instances_wraps_each_record() {
        let mock = Arc::new(MockAccessor::new());
        let project = project(&mock);
        mock.respond_json(
            Method::GET,
            format!("/projects/{}/instances", project.id()),
            json!([
                {"id": InstanceId::new(), "state": "on"},
                {"id": InstanceId::new(), "state": "off"}
            ]),
        );

        let instances = project.instances().await.unwrap();
        let states: Vec<_> = instances.iter().map(Instance::state).collect();
        assert_eq!(states, vec![InstanceStatus::On, InstanceStatus::Off]);
    }

    #[tokio::test]
    async fn test_missing_instance_is_not_found() {
        let mock = Arc::new(MockAccessor::new());
        let project = project(&mock);

        let err = project.instance(InstanceId::new()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
