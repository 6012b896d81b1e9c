//! `vdev auth`: store, check and forget the API token.

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use vdev_client::Client;

use crate::config::Credentials;
use crate::output::{print_info, print_success};

use super::CommandContext;

/// Manage the stored API token.
#[derive(Debug, Args)]
pub struct AuthCommand {
    #[command(subcommand)]
    command: AuthSubcommand,
}

#[derive(Debug, Subcommand)]
enum AuthSubcommand {
    /// Validate a token against the platform and store it.
    Login(LoginArgs),

    /// Forget the stored token.
    Logout,

    /// Show which token is in use.
    Status,
}

#[derive(Debug, Args)]
struct LoginArgs {
    /// API token.
    #[arg(long, env = "VDEV_API_TOKEN")]
    token: Option<String>,
}

impl AuthCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            AuthSubcommand::Login(args) => login(ctx, args).await,
            AuthSubcommand::Logout => logout().await,
            AuthSubcommand::Status => status(ctx).await,
        }
    }
}

async fn login(ctx: CommandContext, args: LoginArgs) -> Result<()> {
    let Some(token) = args.token else {
        print_info("Use --token or set the VDEV_API_TOKEN environment variable.");
        return Ok(());
    };

    let creds = Credentials::new(token);

    // Validate this token, not whatever VDEV_API_TOKEN holds, before storing it.
    let config = ctx.config.client_config(None)?.with_token(creds.token.clone());
    let client = Client::new(config)?;
    let projects = client.projects().await?;

    creds.save()?;

    print_success(&format!(
        "Logged in successfully ({} project(s) visible).",
        projects.len()
    ));
    Ok(())
}

async fn logout() -> Result<()> {
    Credentials::delete()?;
    print_success("Removed stored token.");
    Ok(())
}

async fn status(ctx: CommandContext) -> Result<()> {
    match ctx.credentials {
        Some(creds) => {
            println!("{} token stored", "Auth:".green().bold());
            println!("  Endpoint: {}", ctx.config.api_url);
            println!("  Token: {}", creds.masked_token());
            println!("  Saved: {}", creds.saved_at);

            if creds.is_expired() {
                println!(
                    "  {} Token has expired. Run `vdev auth login`.",
                    "Warning:".yellow()
                );
            } else if let Some(expires_at) = creds.expires_at {
                println!("  Expires: {expires_at}");
            }
        }
        None => {
            println!("{} no token stored", "Auth:".red().bold());
            println!("\nRun {} to log in.", "vdev auth login --token <token>".cyan());
        }
    }

    Ok(())
}
