//! Instance commands (virtual device management).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use vdev_client::{ClientError, CreateInstance, Instance, InstanceEvent, InstanceStatus};

use crate::output::{
    colored_status, print_info, print_output, print_single, print_success, InstanceRow,
    OutputFormat,
};

use super::{CommandContext, DEFAULT_WAIT_SECS};

/// Instance commands.
#[derive(Debug, Args)]
pub struct InstancesCommand {
    #[command(subcommand)]
    command: InstancesSubcommand,
}

#[derive(Debug, Subcommand)]
enum InstancesSubcommand {
    /// List instances in the current project.
    List,

    /// Get instance details.
    Get(InstanceArgs),

    /// Create a new instance.
    Create(CreateInstanceArgs),

    /// Power an instance on.
    Start(LifecycleArgs),

    /// Power an instance off.
    Stop(LifecycleArgs),

    /// Reboot an instance.
    Reboot(InstanceArgs),

    /// Pause a running instance.
    Pause(LifecycleArgs),

    /// Resume a paused instance.
    Unpause(LifecycleArgs),

    /// Rename an instance.
    Rename(RenameArgs),

    /// Delete an instance.
    Delete(LifecycleArgs),

    /// Block until an instance reaches a state.
    Wait(WaitArgs),

    /// Print state changes until interrupted.
    Watch(InstanceArgs),

    /// Print the hypervisor console log.
    Console(InstanceArgs),

    /// Show (or clear) recorded panics.
    Panics(PanicsArgs),

    /// Save a screenshot of the device screen.
    Screenshot(ScreenshotArgs),
}

#[derive(Debug, Args)]
struct InstanceArgs {
    /// Instance ID.
    instance: String,
}

#[derive(Debug, Args)]
struct LifecycleArgs {
    /// Instance ID.
    instance: String,

    /// Wait for the resulting state.
    #[arg(long)]
    wait: bool,

    /// Wait bound in seconds.
    #[arg(long, default_value_t = DEFAULT_WAIT_SECS)]
    timeout: u64,
}

#[derive(Debug, Args)]
struct CreateInstanceArgs {
    /// Instance name.
    name: String,

    /// Device flavor (hardware model).
    #[arg(long)]
    flavor: String,

    /// Operating system version.
    #[arg(long)]
    os: Option<String>,

    /// Wait until the instance is on.
    #[arg(long)]
    wait: bool,

    /// Wait bound in seconds.
    #[arg(long, default_value_t = DEFAULT_WAIT_SECS)]
    timeout: u64,
}

#[derive(Debug, Args)]
struct RenameArgs {
    /// Instance ID.
    instance: String,

    /// New name.
    name: String,
}

#[derive(Debug, Args)]
struct WaitArgs {
    /// Instance ID.
    instance: String,

    /// Target state (on, off, paused, ...).
    #[arg(long)]
    state: InstanceStatus,

    /// Wait bound in seconds.
    #[arg(long, default_value_t = DEFAULT_WAIT_SECS)]
    timeout: u64,
}

#[derive(Debug, Args)]
struct PanicsArgs {
    /// Instance ID.
    instance: String,

    /// Clear the panics after printing them.
    #[arg(long)]
    clear: bool,
}

#[derive(Debug, Args)]
struct ScreenshotArgs {
    /// Instance ID.
    instance: String,

    /// Output file.
    #[arg(long, short)]
    output: PathBuf,
}

/// Lifecycle actions that map to a single command call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Start,
    Stop,
    Pause,
    Unpause,
    Delete,
}

impl Action {
    fn verb(self) -> &'static str {
        match self {
            Self::Start => "Started",
            Self::Stop => "Stopped",
            Self::Pause => "Paused",
            Self::Unpause => "Resumed",
            Self::Delete => "Deletion requested for",
        }
    }

    /// State the platform settles in once the action is applied.
    fn target(self) -> InstanceStatus {
        match self {
            Self::Start | Self::Unpause => InstanceStatus::On,
            Self::Stop => InstanceStatus::Off,
            Self::Pause => InstanceStatus::Paused,
            Self::Delete => InstanceStatus::Deleted,
        }
    }

    /// Outcome of waiting for [`Action::target`].
    ///
    /// A deleted instance may vanish instead of reporting `deleted`; the
    /// poll then fails with a 404, which still means the delete finished.
    fn settle<T>(self, waited: vdev_client::Result<T>) -> vdev_client::Result<()> {
        match waited {
            Ok(_) => Ok(()),
            Err(ClientError::PollFailed(cause)) if self == Self::Delete && cause.is_not_found() => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn apply(self, instance: &Instance) -> vdev_client::Result<()> {
        match self {
            Self::Start => instance.start().await,
            Self::Stop => instance.stop().await,
            Self::Pause => instance.pause().await,
            Self::Unpause => instance.unpause().await,
            Self::Delete => instance.destroy().await,
        }
    }
}

impl InstancesCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            InstancesSubcommand::List => list_instances(ctx).await,
            InstancesSubcommand::Get(args) => get_instance(ctx, args).await,
            InstancesSubcommand::Create(args) => create_instance(ctx, args).await,
            InstancesSubcommand::Start(args) => lifecycle(ctx, args, Action::Start).await,
            InstancesSubcommand::Stop(args) => lifecycle(ctx, args, Action::Stop).await,
            InstancesSubcommand::Reboot(args) => reboot(ctx, args).await,
            InstancesSubcommand::Pause(args) => lifecycle(ctx, args, Action::Pause).await,
            InstancesSubcommand::Unpause(args) => lifecycle(ctx, args, Action::Unpause).await,
            InstancesSubcommand::Rename(args) => rename(ctx, args).await,
            InstancesSubcommand::Delete(args) => lifecycle(ctx, args, Action::Delete).await,
            InstancesSubcommand::Wait(args) => wait(ctx, args).await,
            InstancesSubcommand::Watch(args) => watch(ctx, args).await,
            InstancesSubcommand::Console(args) => console(ctx, args).await,
            InstancesSubcommand::Panics(args) => panics(ctx, args).await,
            InstancesSubcommand::Screenshot(args) => screenshot(ctx, args).await,
        }
    }
}

fn print_instance(instance: &Instance, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_single(&*instance.snapshot()),
        OutputFormat::Table => print_output(&[InstanceRow::from(instance)], format),
    }
}

async fn list_instances(ctx: CommandContext) -> Result<()> {
    let client = ctx.client()?;
    let project = client.project(ctx.require_project()?).await?;
    let instances = project.instances().await?;

    match ctx.format {
        OutputFormat::Json => {
            let snapshots: Vec<_> = instances.iter().map(|i| (*i.snapshot()).clone()).collect();
            print_single(&snapshots);
        }
        OutputFormat::Table => {
            let rows: Vec<_> = instances.iter().map(InstanceRow::from).collect();
            print_output(&rows, ctx.format);
        }
    }
    Ok(())
}

async fn get_instance(ctx: CommandContext, args: InstanceArgs) -> Result<()> {
    let client = ctx.client()?;
    let instance = ctx.instance(&client, &args.instance).await?;
    print_instance(&instance, ctx.format);
    Ok(())
}

async fn create_instance(ctx: CommandContext, args: CreateInstanceArgs) -> Result<()> {
    let client = ctx.client()?;
    let project = client.project(ctx.require_project()?).await?;

    let mut params = CreateInstance::new(args.name, args.flavor);
    if let Some(os) = args.os {
        params = params.os(os);
    }
    let instance = project.create_instance(params).await?;

    if args.wait {
        print_info(&format!("Waiting for {} to boot...", instance.id()));
        instance
            .wait_for_state_timeout(InstanceStatus::On, Duration::from_secs(args.timeout))
            .await?;
    }

    if ctx.format == OutputFormat::Table {
        print_success(&format!("Created instance {}", instance.id()));
    }
    print_instance(&instance, ctx.format);
    instance.close().await;
    Ok(())
}

async fn lifecycle(ctx: CommandContext, args: LifecycleArgs, action: Action) -> Result<()> {
    let client = ctx.client()?;
    let instance = ctx.instance(&client, &args.instance).await?;

    action.apply(&instance).await?;

    if args.wait {
        let target = action.target();
        print_info(&format!("Waiting for state {}...", colored_status(&target)));
        let waited = instance
            .wait_for_state_timeout(target, Duration::from_secs(args.timeout))
            .await;
        action.settle(waited)?;
    }

    print_success(&format!("{} instance {}", action.verb(), instance.id()));
    instance.close().await;
    Ok(())
}

async fn reboot(ctx: CommandContext, args: InstanceArgs) -> Result<()> {
    let client = ctx.client()?;
    let instance = ctx.instance(&client, &args.instance).await?;
    instance.reboot().await?;
    print_success(&format!("Reboot requested for instance {}", instance.id()));
    Ok(())
}

async fn rename(ctx: CommandContext, args: RenameArgs) -> Result<()> {
    let client = ctx.client()?;
    let instance = ctx.instance(&client, &args.instance).await?;
    instance.rename(&args.name).await?;
    print_success(&format!("Renamed instance {} to '{}'", instance.id(), args.name));
    Ok(())
}

async fn wait(ctx: CommandContext, args: WaitArgs) -> Result<()> {
    let client = ctx.client()?;
    let instance = ctx.instance(&client, &args.instance).await?;

    let snapshot = instance
        .wait_for_state_timeout(args.state.clone(), Duration::from_secs(args.timeout))
        .await?;
    instance.close().await;

    match ctx.format {
        OutputFormat::Json => print_single(&*snapshot),
        OutputFormat::Table => print_success(&format!(
            "Instance {} is {}",
            instance.id(),
            colored_status(&snapshot.state)
        )),
    }
    Ok(())
}

async fn watch(ctx: CommandContext, args: InstanceArgs) -> Result<()> {
    let client = ctx.client()?;
    let instance = ctx.instance(&client, &args.instance).await?;
    let mut events = instance.subscribe();

    print_info(&format!(
        "Watching {} (currently {}). Press Ctrl-C to stop.",
        instance.id(),
        colored_status(&instance.state())
    ));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event, ctx.format)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(events);
    instance.close().await;
    Ok(())
}

fn print_event(event: &InstanceEvent, format: OutputFormat) -> Result<()> {
    let now = chrono::Utc::now().format("%H:%M:%S");
    match (event, format) {
        (InstanceEvent::StateChanged(snapshot), OutputFormat::Json) => {
            println!(
                "{}",
                serde_json::json!({ "event": "state_changed", "instance": &**snapshot })
            );
        }
        (InstanceEvent::StateChanged(snapshot), OutputFormat::Table) => {
            println!("{now} state {}", colored_status(&snapshot.state));
        }
        (InstanceEvent::Panicked(snapshot), OutputFormat::Json) => {
            println!(
                "{}",
                serde_json::json!({ "event": "panicked", "instance": &**snapshot })
            );
        }
        (InstanceEvent::Panicked(_), OutputFormat::Table) => {
            println!("{now} {}", "panicked".red().bold());
        }
        (InstanceEvent::PollFailed(error), _) => {
            anyhow::bail!("state polling failed: {error}");
        }
    }
    Ok(())
}

async fn console(ctx: CommandContext, args: InstanceArgs) -> Result<()> {
    let client = ctx.client()?;
    let instance = ctx.instance(&client, &args.instance).await?;

    let log = instance.console_log().await?;
    instance.close().await;

    match ctx.format {
        OutputFormat::Json => print_single(&serde_json::json!({ "log": log })),
        OutputFormat::Table => print!("{log}"),
    }
    Ok(())
}

async fn panics(ctx: CommandContext, args: PanicsArgs) -> Result<()> {
    let client = ctx.client()?;
    let instance = ctx.instance(&client, &args.instance).await?;

    let panics = if args.clear {
        instance.clear_panics().await?
    } else {
        instance.panic_log().await?
    };
    instance.close().await;

    match ctx.format {
        OutputFormat::Json => print_single(&panics),
        OutputFormat::Table if panics.is_empty() => println!("{}", "No panics recorded.".dimmed()),
        OutputFormat::Table => {
            for panic in &panics {
                println!("{}", serde_json::to_string_pretty(panic)?);
            }
            if args.clear {
                print_success(&format!("Cleared {} panic(s)", panics.len()));
            }
        }
    }
    Ok(())
}

async fn screenshot(ctx: CommandContext, args: ScreenshotArgs) -> Result<()> {
    let client = ctx.client()?;
    let instance = ctx.instance(&client, &args.instance).await?;

    let image = instance.screenshot().await?;
    tokio::fs::write(&args.output, &image)
        .await
        .with_context(|| format!("Failed to write screenshot to {:?}", args.output))?;

    print_success(&format!(
        "Saved {} bytes to {}",
        image.len(),
        args.output.display()
    ));
    Ok(())
}
