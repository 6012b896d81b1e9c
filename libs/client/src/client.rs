//! Entry point: configuration plus the shared accessor.

use std::sync::Arc;

use vdev_id::{InstanceId, ProjectId};

use crate::accessor::{call_json, CallOptions, HttpAccessor, RemoteAccessor};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::instance::{Instance, InstanceOptions};
use crate::project::{Project, ProjectInfo};
use crate::state::InstanceSnapshot;

/// Platform client. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    accessor: Arc<dyn RemoteAccessor>,
    options: InstanceOptions,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("api_url", &self.config.api_url)
            .field("options", &self.options)
            .finish()
    }
}

impl Client {
    /// Create a client talking REST to `config.api_url`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let accessor = Arc::new(HttpAccessor::new(&config)?);
        Ok(Self::with_accessor(config, accessor))
    }

    /// Create a client from `VDEV_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Create a client over any accessor.
    pub fn with_accessor(config: ClientConfig, accessor: Arc<dyn RemoteAccessor>) -> Self {
        let options = InstanceOptions::from_config(&config);
        Self {
            config,
            accessor,
            options,
        }
    }

    /// Replace how instance handles are wired (poll interval, connectors).
    pub fn with_instance_options(mut self, options: InstanceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn accessor(&self) -> &Arc<dyn RemoteAccessor> {
        &self.accessor
    }

    pub async fn projects(&self) -> Result<Vec<Project>> {
        let infos: Vec<ProjectInfo> =
            call_json(&*self.accessor, "/projects", CallOptions::get()).await?;
        Ok(infos.into_iter().map(|info| self.wrap_project(info)).collect())
    }

    pub async fn project(&self, id: ProjectId) -> Result<Project> {
        let info: ProjectInfo =
            call_json(&*self.accessor, &format!("/projects/{id}"), CallOptions::get()).await?;
        Ok(self.wrap_project(info))
    }

    /// Fetch an instance by id and wrap it in a handle.
    pub async fn instance(&self, id: InstanceId) -> Result<Instance> {
        let snapshot: InstanceSnapshot =
            call_json(&*self.accessor, &format!("/instances/{id}"), CallOptions::get()).await?;
        Ok(Instance::new(
            Arc::clone(&self.accessor),
            snapshot,
            &self.options,
        ))
    }

    fn wrap_project(&self, info: ProjectInfo) -> Project {
        Project::new(info, Arc::clone(&self.accessor), self.options.clone())
    }
}
