//! Connector configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use imlink_core::id::{MAX_DATACENTER_ID, MAX_WORKER_ID};
use imlink_core::{ImError, ImResult, DEFAULT_MAX_FRAME_LEN};

use crate::connector::ConnectorSettings;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub connector: ConnectorSection,
    #[serde(default)]
    pub id: IdSection,
    #[serde(default)]
    pub codec: CodecSection,
}

/// `[connector]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorSection {
    #[serde(default)]
    pub transfer_urls: Vec<String>,
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    /// `0` disables reconnects.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl Default for ConnectorSection {
    fn default() -> Self {
        Self {
            transfer_urls: Vec::new(),
            sync_timeout_ms: default_sync_timeout_ms(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

/// `[id]` section: snowflake generator placement.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdSection {
    #[serde(default)]
    pub worker_id: u64,
    #[serde(default)]
    pub datacenter_id: u64,
}

/// `[codec]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CodecSection {
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

impl Default for CodecSection {
    fn default() -> Self {
        Self {
            max_frame_len: default_max_frame_len(),
        }
    }
}

fn default_sync_timeout_ms() -> u64 {
    2000
}
fn default_reconnect_delay_secs() -> u64 {
    5
}
fn default_outbound_buffer() -> usize {
    64
}
fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

/// Values the command line may override.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub transfer_urls: Vec<String>,
    pub sync_timeout_ms: Option<u64>,
    pub reconnect_delay_secs: Option<u64>,
    pub worker_id: Option<u64>,
    pub datacenter_id: Option<u64>,
}

/// Resolved connector configuration.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub transfer_urls: Vec<String>,
    pub sync_timeout: Duration,
    pub reconnect_delay: Option<Duration>,
    pub outbound_buffer: usize,
    pub max_frame_len: usize,
    pub worker_id: u64,
    pub datacenter_id: u64,
}

impl ConnectorConfig {
    /// Load config from a TOML file (if present), then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> ImResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    Self::parse_file(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };
        Self::resolve(file_config, cli)
    }

    pub fn parse_file(content: &str) -> ImResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| ImError::Config(format!("config parse error: {e}")))
    }

    /// Merge CLI overrides over file values and validate the result.
    pub fn resolve(file: ConfigFile, cli: CliOverrides) -> ImResult<Self> {
        let transfer_urls = if cli.transfer_urls.is_empty() {
            file.connector.transfer_urls
        } else {
            cli.transfer_urls
        };
        let sync_timeout_ms = cli.sync_timeout_ms.unwrap_or(file.connector.sync_timeout_ms);
        let reconnect_delay_secs = cli
            .reconnect_delay_secs
            .unwrap_or(file.connector.reconnect_delay_secs);
        let worker_id = cli.worker_id.unwrap_or(file.id.worker_id);
        let datacenter_id = cli.datacenter_id.unwrap_or(file.id.datacenter_id);

        if transfer_urls.is_empty() {
            return Err(ImError::Config(
                "at least one transfer address is required".into(),
            ));
        }
        if sync_timeout_ms == 0 {
            return Err(ImError::Config("sync_timeout_ms must be positive".into()));
        }
        if worker_id > MAX_WORKER_ID || datacenter_id > MAX_DATACENTER_ID {
            return Err(ImError::Config(format!(
                "worker_id must be <= {MAX_WORKER_ID} and datacenter_id <= {MAX_DATACENTER_ID}"
            )));
        }
        if file.codec.max_frame_len == 0 {
            return Err(ImError::Config("max_frame_len must be positive".into()));
        }

        Ok(Self {
            transfer_urls,
            sync_timeout: Duration::from_millis(sync_timeout_ms),
            reconnect_delay: (reconnect_delay_secs > 0)
                .then(|| Duration::from_secs(reconnect_delay_secs)),
            outbound_buffer: file.connector.outbound_buffer.max(1),
            max_frame_len: file.codec.max_frame_len,
            worker_id,
            datacenter_id,
        })
    }

    pub fn settings(&self) -> ConnectorSettings {
        ConnectorSettings {
            sync_timeout: self.sync_timeout,
            reconnect_delay: self.reconnect_delay,
            outbound_buffer: self.outbound_buffer,
            max_frame_len: self.max_frame_len,
        }
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_with_defaults() {
        let file = ConnectorConfig::parse_file(
            r#"
            [connector]
            transfer_urls = ["10.0.0.5:9082", "10.0.0.6:9082"]
            reconnect_delay_secs = 0

            [id]
            worker_id = 4
            "#,
        )
        .unwrap();
        let cfg = ConnectorConfig::resolve(file, CliOverrides::default()).unwrap();

        assert_eq!(cfg.transfer_urls.len(), 2);
        assert_eq!(cfg.sync_timeout, Duration::from_millis(2000));
        assert_eq!(cfg.reconnect_delay, None);
        assert_eq!(cfg.worker_id, 4);
        assert_eq!(cfg.datacenter_id, 0);
        assert_eq!(cfg.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }

    #[test]
    fn cli_overrides_file() {
        let file = ConnectorConfig::parse_file(
            r#"
            [connector]
            transfer_urls = ["10.0.0.5:9082"]
            sync_timeout_ms = 500
            "#,
        )
        .unwrap();
        let cfg = ConnectorConfig::resolve(
            file,
            CliOverrides {
                transfer_urls: vec!["127.0.0.1:9082".into()],
                sync_timeout_ms: Some(1500),
                ..CliOverrides::default()
            },
        )
        .unwrap();

        assert_eq!(cfg.transfer_urls, vec!["127.0.0.1:9082".to_string()]);
        assert_eq!(cfg.sync_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.reconnect_delay, Some(Duration::from_secs(5)));
    }

    #[test]
    fn missing_transfer_is_config_error() {
        let err = ConnectorConfig::resolve(ConfigFile::default(), CliOverrides::default())
            .unwrap_err();
        assert!(matches!(err, ImError::Config(_)));
    }

    #[test]
    fn out_of_range_worker_rejected() {
        let err = ConnectorConfig::resolve(
            ConfigFile::default(),
            CliOverrides {
                transfer_urls: vec!["t:1".into()],
                worker_id: Some(MAX_WORKER_ID + 1),
                ..CliOverrides::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, ImError::Config(_)));
    }

    #[test]
    fn malformed_toml_is_config_error() {
        assert!(matches!(
            ConnectorConfig::parse_file("[connector\ntransfer_urls = 3"),
            Err(ImError::Config(_))
        ));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connector.toml");
        std::fs::write(&path, "[connector]\ntransfer_urls = [\"127.0.0.1:9082\"]\n").unwrap();

        let cfg = ConnectorConfig::load(Some(&path), CliOverrides::default()).unwrap();
        assert_eq!(cfg.transfer_urls, vec!["127.0.0.1:9082".to_string()]);

        let missing = dir.path().join("absent.toml");
        assert!(ConnectorConfig::load(Some(&missing), CliOverrides::default()).is_err());
    }
}
