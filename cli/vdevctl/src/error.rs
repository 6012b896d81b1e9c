//! Error handling and display for the CLI.

use colored::Colorize;
use thiserror::Error;
use vdev_client::ClientError;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Not authenticated. Run `vdev auth login --token <token>` to authenticate.")]
    NotAuthenticated,

    #[error(
        "No project specified. Use --project or `vdev context set --default-project <id>`."
    )]
    NoProject,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Map a 404 from the platform to a friendlier not-found error.
    pub fn not_found_as(err: ClientError, what: impl FnOnce() -> String) -> Self {
        if err.is_not_found() {
            Self::NotFound(what())
        } else {
            Self::Client(err)
        }
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    let client_err = match err.downcast_ref::<CliError>() {
        Some(CliError::NotAuthenticated) => {
            print_hint("Run `vdev auth login --token <token>` to authenticate.");
            return;
        }
        Some(CliError::Client(inner)) => Some(inner),
        Some(_) => None,
        None => err.downcast_ref::<ClientError>(),
    };

    let Some(client_err) = client_err else {
        return;
    };
    match client_err {
        ClientError::Api { status: 401, .. } => {
            print_hint("Your token may have expired. Run `vdev auth login`.");
        }
        ClientError::Api { status: 403, .. } => {
            print_hint("You may not have permission for this operation.");
        }
        ClientError::Network(_) => {
            print_hint("Check your network connection and API endpoint (`vdev context show`).");
        }
        ClientError::Connect { .. } | ClientError::StreamClosed => {
            print_hint("The instance may not be running. Check `vdev instances get <id>`.");
        }
        ClientError::MissingKey => {
            print_hint("The platform has not reported key material for this instance yet.");
        }
        ClientError::Timeout(_) => {
            print_hint("The instance did not reach the expected state in time; raise --timeout.");
        }
        ClientError::PollFailed(source) => {
            eprintln!("\nCaused by: {source}");
        }
        _ => {}
    }
}

fn print_hint(hint: &str) {
    eprintln!("\n{}", format!("Hint: {hint}").yellow());
}
