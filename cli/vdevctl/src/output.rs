//! Output formatting for CLI commands.

use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};
use vdev_client::{Instance, InstanceStatus, Snapshot};

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "json" => Self::Json,
            _ => Self::Table,
        }
    }
}

/// Print data in the specified format.
pub fn print_output<T: Serialize + Tabled>(data: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("{}", "No items found.".dimmed());
            } else {
                println!("{}", Table::new(data));
            }
        }
        OutputFormat::Json => println!("{}", format_json(data, "[]")),
    }
}

/// Print a single item as JSON.
pub fn print_single<T: Serialize>(data: &T) {
    println!("{}", format_json(data, "{}"));
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}

fn format_json<T: Serialize + ?Sized>(data: &T, fallback: &str) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| fallback.to_string())
}

/// Colored rendering of an instance state.
pub fn colored_status(status: &InstanceStatus) -> String {
    let text = status.as_str();
    match status {
        InstanceStatus::On => text.green().to_string(),
        InstanceStatus::Off | InstanceStatus::Deleted => text.dimmed().to_string(),
        InstanceStatus::Paused => text.blue().to_string(),
        InstanceStatus::Creating | InstanceStatus::Rebooting | InstanceStatus::Deleting => {
            text.yellow().to_string()
        }
        InstanceStatus::Error => text.red().to_string(),
        InstanceStatus::Other(_) => text.to_string(),
    }
}

fn display_option(opt: &Option<String>) -> String {
    opt.as_deref().unwrap_or("-").to_string()
}

/// One row of `vdev instances list`.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct InstanceRow {
    #[tabled(rename = "ID")]
    pub id: String,

    #[tabled(rename = "Name")]
    pub name: String,

    #[tabled(rename = "State")]
    #[serde(skip)]
    pub state_display: String,

    #[tabled(skip)]
    pub state: String,

    #[tabled(rename = "Flavor")]
    pub flavor: String,

    #[tabled(rename = "Service IP", display = "display_option")]
    pub service_ip: Option<String>,

    #[tabled(rename = "Panicked")]
    pub panicked: bool,
}

impl From<&Instance> for InstanceRow {
    fn from(instance: &Instance) -> Self {
        let snapshot = instance.snapshot();
        Self {
            id: snapshot.id.to_string(),
            name: snapshot.name.clone(),
            state_display: colored_status(&snapshot.state),
            state: snapshot.state.to_string(),
            flavor: snapshot.flavor.clone(),
            service_ip: snapshot.service_ip.clone(),
            panicked: snapshot.panicked,
        }
    }
}

/// One row of `vdev snapshots list`.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct SnapshotRow {
    #[tabled(rename = "ID")]
    pub id: String,

    #[tabled(rename = "Name")]
    pub name: String,

    #[tabled(rename = "Ready")]
    pub ready: bool,

    #[tabled(rename = "Created", display = "display_option")]
    pub created_at: Option<String>,
}

impl From<&Snapshot> for SnapshotRow {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            id: snapshot.id().to_string(),
            name: snapshot.name().to_string(),
            ready: snapshot.is_created(),
            created_at: snapshot.info().created.map(|t| t.to_rfc3339()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use vdev_client::{InstanceOptions, InstanceSnapshot, MockAccessor};

    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!(OutputFormat::parse("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("table"), OutputFormat::Table);
        assert_eq!(OutputFormat::parse("yaml"), OutputFormat::Table);
    }

    #[test]
    fn test_instance_row_json_hides_colored_state() {
        let snapshot: InstanceSnapshot = serde_json::from_value(json!({
            "id": vdev_client::InstanceId::new(),
            "name": "pixel",
            "state": "on",
            "serviceIp": "10.0.0.3"
        }))
        .unwrap();
        let instance = Instance::new(
            Arc::new(MockAccessor::new()),
            snapshot,
            &InstanceOptions::default(),
        );

        let row = InstanceRow::from(&instance);
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["state"], "on");
        assert!(value.get("state_display").is_none());
        assert_eq!(value["service_ip"], "10.0.0.3");
    }
}
