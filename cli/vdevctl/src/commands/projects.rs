//! Project commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;
use vdev_client::Project;

use crate::output::{print_output, OutputFormat};

use super::CommandContext;

/// Project commands.
#[derive(Debug, Args)]
pub struct ProjectsCommand {
    #[command(subcommand)]
    command: ProjectsSubcommand,
}

#[derive(Debug, Subcommand)]
enum ProjectsSubcommand {
    /// List projects visible to the current token.
    List,
}

impl ProjectsCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            ProjectsSubcommand::List => list_projects(ctx).await,
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct ProjectRow {
    #[tabled(rename = "ID")]
    id: String,

    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Current")]
    #[serde(skip)]
    current: String,
}

impl ProjectRow {
    fn new(project: &Project, current: Option<&str>) -> Self {
        let id = project.id().to_string();
        let current = if current == Some(id.as_str()) { "*" } else { "" };
        Self {
            name: project.name().to_string(),
            current: current.to_string(),
            id,
        }
    }
}

async fn list_projects(ctx: CommandContext) -> Result<()> {
    let client = ctx.client()?;
    let projects = client.projects().await?;

    match ctx.format {
        OutputFormat::Json => {
            let infos: Vec<_> = projects.iter().map(Project::info).collect();
            crate::output::print_single(&infos);
        }
        OutputFormat::Table => {
            let current = ctx.resolve_project();
            let rows: Vec<_> = projects
                .iter()
                .map(|p| ProjectRow::new(p, current))
                .collect();
            print_output(&rows, ctx.format);
        }
    }
    Ok(())
}
