//! Remote instance state as reported by the platform.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vdev_id::InstanceId;

/// Power/lifecycle state of an instance.
///
/// Transitions are driven by the platform; the client only observes them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstanceStatus {
    Creating,
    On,
    Off,
    Paused,
    Rebooting,
    Deleting,
    Deleted,
    Error,
    /// A state this client does not know about.
    Other(String),
}

impl InstanceStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Creating => "creating",
            Self::On => "on",
            Self::Off => "off",
            Self::Paused => "paused",
            Self::Rebooting => "rebooting",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Error => "error",
            Self::Other(s) => s,
        }
    }

    /// Returns true once the remote resource is gone.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

impl From<String> for InstanceStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "creating" => Self::Creating,
            "on" => Self::On,
            "off" => Self::Off,
            "paused" => Self::Paused,
            "rebooting" => Self::Rebooting,
            "deleting" => Self::Deleting,
            "deleted" => Self::Deleted,
            "error" => Self::Error,
            _ => Self::Other(s),
        }
    }
}

impl From<InstanceStatus> for String {
    fn from(status: InstanceStatus) -> Self {
        match status {
            InstanceStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl FromStr for InstanceStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_ascii_lowercase()))
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of the in-device agent, present once the agent is reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Opaque path segment the agent endpoint is addressed by.
    pub info: String,
}

/// Structural snapshot of everything the platform reports for an instance.
///
/// Equality is structural: every field is compared, and unknown fields live
/// in an ordered map so the server's key order never matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub id: InstanceId,

    #[serde(default)]
    pub name: String,

    pub state: InstanceStatus,

    #[serde(default)]
    pub flavor: String,

    /// Address of the instance on the service network, once assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentDescriptor>,

    /// Set while the device is in a faulted/panicked condition.
    #[serde(default)]
    pub panicked: bool,

    /// Key material used to sign hypervisor commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Every other field the platform reports.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl InstanceSnapshot {
    /// Minimal snapshot for an instance in `state`.
    pub fn new(id: InstanceId, state: InstanceStatus) -> Self {
        Self {
            id,
            name: String::new(),
            state,
            flavor: String::new(),
            service_ip: None,
            agent: None,
            panicked: false,
            key: None,
            extra: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    const ID: &str = "6f1c1b9e-3c0a-4f0e-9a55-2b1f5d3c8e71";

    #[rstest]
    #[case("on", InstanceStatus::On)]
    #[case("paused", InstanceStatus::Paused)]
    #[case("deleted", InstanceStatus::Deleted)]
    #[case("booting", InstanceStatus::Other("booting".into()))]
    fn test_status_from_wire(#[case] wire: &str, #[case] expected: InstanceStatus) {
        let status: InstanceStatus = serde_json::from_value(json!(wire)).unwrap();
        assert_eq!(status, expected);
        assert_eq!(serde_json::to_value(&status).unwrap(), json!(wire));
    }

    #[test]
    fn test_status_parse_is_case_insensitive() {
        assert_eq!("ON".parse::<InstanceStatus>().unwrap(), InstanceStatus::On);
    }

    #[test]
    fn test_snapshot_decodes_known_and_extra_fields() {
        let snapshot: InstanceSnapshot = serde_json::from_value(json!({
            "id": ID,
            "name": "pixel",
            "state": "on",
            "flavor": "pixel-7",
            "serviceIp": "10.11.0.5",
            "agent": { "info": "a1b2" },
            "panicked": false,
            "key": "secret",
            "bootOptions": { "cores": 4 },
            "project": "p"
        }))
        .unwrap();

        assert_eq!(snapshot.state, InstanceStatus::On);
        assert_eq!(snapshot.service_ip.as_deref(), Some("10.11.0.5"));
        assert_eq!(snapshot.agent.as_ref().map(|a| a.info.as_str()), Some("a1b2"));
        assert_eq!(snapshot.extra["bootOptions"], json!({"cores": 4}));
        assert!(!snapshot.extra.contains_key("name"));
    }

    #[test]
    fn test_equality_ignores_key_order() {
        let a: InstanceSnapshot = serde_json::from_str(&format!(
            r#"{{"id":"{ID}","state":"on","extra":{{"b":1,"a":{{"y":2,"x":1}}}},"name":"n"}}"#
        ))
        .unwrap();
        let b: InstanceSnapshot = serde_json::from_str(&format!(
            r#"{{"name":"n","extra":{{"a":{{"x":1,"y":2}},"b":1}},"state":"on","id":"{ID}"}}"#
        ))
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_equality_sees_nested_changes() {
        let base = json!({"id": ID, "state": "on", "services": {"vpn": {"ip": "1"}}});
        let mut changed = base.clone();
        changed["services"]["vpn"]["ip"] = json!("2");

        let a: InstanceSnapshot = serde_json::from_value(base).unwrap();
        let b: InstanceSnapshot = serde_json::from_value(changed).unwrap();
        assert_ne!(a, b);
    }
}
