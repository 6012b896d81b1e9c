//! Context commands (saved defaults for endpoint and project).

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use vdev_id::ProjectId;

use crate::output::{print_single, print_success, OutputFormat};

use super::CommandContext;

/// Manage saved CLI context.
#[derive(Debug, Args)]
pub struct ContextCommand {
    #[command(subcommand)]
    command: ContextSubcommand,
}

#[derive(Debug, Subcommand)]
enum ContextSubcommand {
    /// Show the saved context.
    Show,

    /// Update the saved context.
    Set(SetContextArgs),

    /// Clear the saved project.
    Clear,
}

#[derive(Debug, Args)]
struct SetContextArgs {
    /// Default project ID.
    #[arg(long, value_name = "ID")]
    default_project: Option<ProjectId>,

    /// Platform API URL.
    #[arg(long)]
    api_url: Option<String>,

    /// Poll interval for waits and watches, in milliseconds.
    #[arg(long)]
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ContextView {
    api_url: String,
    project: Option<String>,
    poll_interval_ms: Option<u64>,
}

impl ContextCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            ContextSubcommand::Show => show(ctx).await,
            ContextSubcommand::Set(args) => set(ctx, args).await,
            ContextSubcommand::Clear => clear(ctx).await,
        }
    }
}

async fn show(ctx: CommandContext) -> Result<()> {
    let view = ContextView {
        api_url: ctx.config.api_url.clone(),
        project: ctx.config.context.project.clone(),
        poll_interval_ms: ctx.config.poll_interval_ms,
    };

    match ctx.format {
        OutputFormat::Json => print_single(&view),
        OutputFormat::Table => {
            println!("api_url: {}", view.api_url);
            println!("project: {}", view.project.as_deref().unwrap_or("-"));
            println!(
                "poll_interval_ms: {}",
                view.poll_interval_ms
                    .map(|ms| ms.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
    }

    Ok(())
}

async fn set(mut ctx: CommandContext, args: SetContextArgs) -> Result<()> {
    if let Some(project) = args.default_project {
        ctx.config.context.project = Some(project.to_string());
    }
    if let Some(api_url) = args.api_url {
        ctx.config.api_url = api_url;
    }
    if let Some(ms) = args.poll_interval_ms {
        ctx.config.poll_interval_ms = Some(ms);
    }

    // Refuse to persist something the client would reject.
    ctx.config.client_config(None)?;
    ctx.config.save()?;

    match ctx.format {
        OutputFormat::Json => print_single(&ctx.config),
        OutputFormat::Table => print_success("Saved context"),
    }
    Ok(())
}

async fn clear(mut ctx: CommandContext) -> Result<()> {
    ctx.config.context.project = None;
    ctx.config.save()?;

    match ctx.format {
        OutputFormat::Json => print_single(&serde_json::json!({ "ok": true })),
        OutputFormat::Table => print_success("Cleared saved context"),
    }

    Ok(())
}
