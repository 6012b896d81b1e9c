//! Settings persisted between invocations: endpoint, saved project context,
//! and the API token.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vdev_client::config::DEFAULT_API_URL;
use vdev_client::ClientConfig;

const CONFIG_FILE: &str = "config.json";
const CREDENTIALS_FILE: &str = "credentials.json";

/// Directory holding `config.json` and `credentials.json`.
///
/// `VDEV_CONFIG_DIR` overrides the platform default.
fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("VDEV_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let dirs = ProjectDirs::from("com", "vdev", "vdev")
        .context("no home directory to store vdev settings in")?;
    Ok(dirs.config_dir().to_path_buf())
}

/// Read and decode one settings file; `None` if it does not exist yet.
fn read_settings<T: DeserializeOwned>(name: &str) -> Result<Option<T>> {
    let path = config_dir()?.join(name);
    if !path.exists() {
        debug!(path = %path.display(), "Settings file absent");
        return Ok(None);
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid settings JSON", path.display()))?;
    Ok(Some(value))
}

fn write_settings<T: Serialize>(name: &str, value: &T) -> Result<()> {
    let dir = config_dir()?;
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    write_private(&dir.join(name), &serde_json::to_string_pretty(value)?)
}

/// Persistent CLI settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Platform REST base URL.
    #[serde(default = "api_url_from_env")]
    pub api_url: String,

    /// Background poll interval for waits and watches, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,

    #[serde(default)]
    pub context: CliContext,
}

fn api_url_from_env() -> String {
    std::env::var("VDEV_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: api_url_from_env(),
            poll_interval_ms: None,
            context: CliContext::default(),
        }
    }
}

impl Config {
    /// Saved settings, or defaults on first use.
    pub fn load() -> Result<Self> {
        Ok(read_settings(CONFIG_FILE)?.unwrap_or_default())
    }

    pub fn save(&self) -> Result<()> {
        write_settings(CONFIG_FILE, self)
    }

    /// Client settings for this config and (optional) credentials.
    ///
    /// `VDEV_API_TOKEN` wins over stored credentials.
    pub fn client_config(&self, credentials: Option<&Credentials>) -> Result<ClientConfig> {
        let mut config = ClientConfig::new(self.api_url.clone());

        if let Some(ms) = self.poll_interval_ms {
            config = config.with_poll_interval(Duration::from_millis(ms));
        }

        let token = std::env::var("VDEV_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| credentials.map(|c| c.token.clone()));
        if let Some(token) = token {
            config = config.with_token(token);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Saved defaults applied when a flag is omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliContext {
    /// Project used when `--project` is not given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

/// API token saved by `vdev auth login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    pub saved_at: DateTime<Utc>,
}

impl Credentials {
    pub fn new(token: String) -> Self {
        Self {
            token,
            expires_at: None,
            saved_at: Utc::now(),
        }
    }

    pub fn load() -> Result<Option<Self>> {
        read_settings(CREDENTIALS_FILE)
    }

    pub fn save(&self) -> Result<()> {
        write_settings(CREDENTIALS_FILE, self)
    }

    /// Remove saved credentials. A no-op if none are stored.
    pub fn delete() -> Result<()> {
        let path = config_dir()?.join(CREDENTIALS_FILE);
        match fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(e).with_context(|| format!("removing {}", path.display()))
            }
            _ => Ok(()),
        }
    }

    /// True once a known expiry has passed. Tokens without one never expire.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    /// Token with everything but the last four characters masked.
    pub fn masked_token(&self) -> String {
        let chars: Vec<char> = self.token.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        format!("****{tail}")
    }
}

/// Write `contents` to `path`, readable only by the owner on Unix.
fn write_private(path: &Path, contents: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(contents.as_bytes()))
            .with_context(|| format!("writing {}", path.display()))?;
    }

    #[cfg(not(unix))]
    fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_endpoint_and_no_project() {
        let config = Config::default();
        assert!(config.api_url.starts_with("http"));
        assert!(config.context.project.is_none());
    }

    #[test]
    fn test_config_roundtrips_without_optional_fields() {
        let config: Config = serde_json::from_str(r#"{"api_url":"https://x/api/v1"}"#).unwrap();
        assert_eq!(config.api_url, "https://x/api/v1");
        assert_eq!(config.poll_interval_ms, None);

        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("poll_interval_ms").is_none());
    }

    #[test]
    fn test_client_config_applies_poll_interval() {
        let config = Config {
            api_url: "https://vdev.example.com/api/v1".into(),
            poll_interval_ms: Some(250),
            context: CliContext::default(),
        };
        let client = config.client_config(None).unwrap();
        assert_eq!(client.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_client_config_rejects_bad_url() {
        let config = Config {
            api_url: "vdev.example.com".into(),
            poll_interval_ms: None,
            context: CliContext::default(),
        };
        assert!(config.client_config(None).is_err());
    }

    #[test]
    fn test_fresh_credentials_are_masked_and_valid() {
        let creds = Credentials::new("vdev_pat_1234".to_string());
        assert!(!creds.is_expired());
        assert_eq!(creds.masked_token(), "****1234");
        assert_eq!(Credentials::new("ab".into()).masked_token(), "****ab");
    }

    #[test]
    fn test_past_expiry_is_expired() {
        let mut creds = Credentials::new("t".into());
        creds.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        assert!(creds.is_expired());
    }
}
