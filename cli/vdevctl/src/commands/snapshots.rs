//! Snapshot commands (saved restore points of an instance).

use anyhow::Result;
use clap::{Args, Subcommand};
use vdev_client::{Instance, Snapshot};
use vdev_id::SnapshotId;

use crate::error::CliError;
use crate::output::{print_output, print_single, print_success, OutputFormat, SnapshotRow};

use super::CommandContext;

/// Snapshot commands.
#[derive(Debug, Args)]
pub struct SnapshotsCommand {
    #[command(subcommand)]
    command: SnapshotsSubcommand,
}

#[derive(Debug, Subcommand)]
enum SnapshotsSubcommand {
    /// List snapshots of an instance.
    List(ListSnapshotsArgs),

    /// Snapshot an instance.
    Create(CreateSnapshotArgs),

    /// Restore an instance to a snapshot.
    Restore(SnapshotArgs),

    /// Delete a snapshot.
    Delete(SnapshotArgs),
}

#[derive(Debug, Args)]
struct ListSnapshotsArgs {
    /// Instance ID.
    instance: String,
}

#[derive(Debug, Args)]
struct CreateSnapshotArgs {
    /// Instance ID.
    instance: String,

    /// Snapshot name.
    name: String,
}

#[derive(Debug, Args)]
struct SnapshotArgs {
    /// Instance ID.
    instance: String,

    /// Snapshot ID.
    snapshot: SnapshotId,
}

impl SnapshotsCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            SnapshotsSubcommand::List(args) => list_snapshots(ctx, args).await,
            SnapshotsSubcommand::Create(args) => create_snapshot(ctx, args).await,
            SnapshotsSubcommand::Restore(args) => restore_snapshot(ctx, args).await,
            SnapshotsSubcommand::Delete(args) => delete_snapshot(ctx, args).await,
        }
    }
}

async fn list_snapshots(ctx: CommandContext, args: ListSnapshotsArgs) -> Result<()> {
    let client = ctx.client()?;
    let instance = ctx.instance(&client, &args.instance).await?;
    let snapshots = instance.snapshots().await?;

    match ctx.format {
        OutputFormat::Json => {
            let infos: Vec<_> = snapshots.iter().map(Snapshot::info).collect();
            print_single(&infos);
        }
        OutputFormat::Table => {
            let rows: Vec<_> = snapshots.iter().map(SnapshotRow::from).collect();
            print_output(&rows, ctx.format);
        }
    }
    Ok(())
}

async fn create_snapshot(ctx: CommandContext, args: CreateSnapshotArgs) -> Result<()> {
    let client = ctx.client()?;
    let instance = ctx.instance(&client, &args.instance).await?;
    let snapshot = instance.create_snapshot(&args.name).await?;

    match ctx.format {
        OutputFormat::Json => print_single(snapshot.info()),
        OutputFormat::Table => {
            print_success(&format!("Created snapshot {} ({})", snapshot.id(), snapshot.name()))
        }
    }
    Ok(())
}

/// Find `id` among the instance's snapshots.
async fn find_snapshot(instance: &Instance, id: SnapshotId) -> Result<Snapshot> {
    instance
        .snapshots()
        .await?
        .into_iter()
        .find(|s| s.id() == id)
        .ok_or_else(|| CliError::NotFound(format!("Snapshot '{id}' not found")).into())
}

async fn restore_snapshot(ctx: CommandContext, args: SnapshotArgs) -> Result<()> {
    let client = ctx.client()?;
    let instance = ctx.instance(&client, &args.instance).await?;
    let snapshot = find_snapshot(&instance, args.snapshot).await?;

    snapshot.restore().await?;
    print_success(&format!(
        "Restoring instance {} to snapshot {}",
        instance.id(),
        snapshot.name()
    ));
    Ok(())
}

async fn delete_snapshot(ctx: CommandContext, args: SnapshotArgs) -> Result<()> {
    let client = ctx.client()?;
    let instance = ctx.instance(&client, &args.instance).await?;
    let snapshot = find_snapshot(&instance, args.snapshot).await?;

    snapshot.delete().await?;
    print_success(&format!("Deleted snapshot {}", snapshot.id()));
    Ok(())
}
