//! CLI commands.

mod auth;
mod context;
mod instances;
mod projects;
mod snapshots;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use vdev_client::{Client, Instance, InstanceId, ProjectId};

use crate::config::{Config, Credentials};
use crate::error::CliError;
use crate::output::OutputFormat;

/// Default bound for `--wait` and `instances wait`.
pub const DEFAULT_WAIT_SECS: u64 = 300;

/// vdev CLI - Manage virtual devices on the vdev platform.
#[derive(Debug, Parser)]
#[command(name = "vdev")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Project ID.
    #[arg(long, global = true, env = "VDEV_PROJECT")]
    project: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Authenticate with the platform.
    Auth(auth::AuthCommand),

    /// Show or change saved CLI context.
    Context(context::ContextCommand),

    /// Manage projects.
    Projects(projects::ProjectsCommand),

    /// Manage instances (virtual devices).
    Instances(instances::InstancesCommand),

    /// Manage instance snapshots.
    Snapshots(snapshots::SnapshotsCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let ctx = CommandContext {
            config: Config::load()?,
            credentials: Credentials::load()?,
            format: OutputFormat::parse(&self.format),
            project: self.project,
        };

        match self.command {
            Commands::Auth(cmd) => cmd.run(ctx).await,
            Commands::Context(cmd) => cmd.run(ctx).await,
            Commands::Projects(cmd) => cmd.run(ctx).await,
            Commands::Instances(cmd) => cmd.run(ctx).await,
            Commands::Snapshots(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("vdev {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: Config,
    pub credentials: Option<Credentials>,
    pub format: OutputFormat,
    pub project: Option<String>,
}

impl CommandContext {
    /// Get an authenticated platform client.
    pub fn client(&self) -> Result<Client> {
        let credentials = self.credentials.as_ref().filter(|c| !c.is_expired());
        let config = self.config.client_config(credentials)?;
        if config.token.is_none() {
            return Err(CliError::NotAuthenticated.into());
        }
        debug!(api_url = %config.api_url, "Building platform client");
        Ok(Client::new(config)?)
    }

    /// Resolve the current project, preferring flag over context.
    pub fn resolve_project(&self) -> Option<&str> {
        self.project
            .as_deref()
            .or(self.config.context.project.as_deref())
    }

    /// Require a project to be specified.
    pub fn require_project(&self) -> Result<ProjectId> {
        let raw = self.resolve_project().ok_or(CliError::NoProject)?;
        Ok(raw.parse()?)
    }

    /// Fetch an instance by its ID argument.
    pub async fn instance(&self, client: &Client, raw: &str) -> Result<Instance> {
        let id: InstanceId = raw.parse()?;
        client
            .instance(id)
            .await
            .map_err(|e| {
                anyhow::Error::from(CliError::not_found_as(e, || {
                    format!("Instance '{raw}' not found")
                }))
            })
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_project_flag_wins_over_context() {
        let mut config = Config::default();
        config.context.project = Some("from-context".into());
        let ctx = CommandContext {
            config,
            credentials: None,
            format: OutputFormat::Table,
            project: Some("from-flag".into()),
        };
        assert_eq!(ctx.resolve_project(), Some("from-flag"));
    }

    #[test]
    fn test_require_project_validates_id() {
        let ctx = CommandContext {
            config: Config::default(),
            credentials: None,
            format: OutputFormat::Table,
            project: Some("not-a-uuid".into()),
        };
        assert!(ctx.require_project().is_err());
    }
}
