use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use types::{Group, GroupKey, LogicalState, Site};

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_MODBUS_REQUEST_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 5_000;
const DEFAULT_FILL_DEBOUNCE_MS: u64 = 2_000;
const DEFAULT_RDS_LANGUAGE: &str = "en";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("site {site_id:?}: {reason}")]
    InvalidSite { site_id: String, reason: String },
    #[error("config field {field} must be set to a value >= 1")]
    InvalidField { field: &'static str },
    #[error("failed to read config file {path}: {source}")]
    ReadFile { path: String, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, source: String },
}

/// Typed, validated, process-wide configuration. Read once at startup;
/// never reloaded.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub rds_base_url: String,
    pub rds_user: String,
    pub rds_pass: String,
    pub rds_language: String,
    /// Timeout applied to every RDS HTTP call. Defaults to `poll_interval`.
    pub rds_request_timeout: Duration,
    pub poll_interval: Duration,
    pub modbus_request_timeout: Duration,
    pub reconnect_backoff: Duration,
    pub fill_debounce: Duration,
    pub sites: Vec<Site>,
    pub debug_log: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let poll_interval = Duration::from_millis(DEFAULT_POLL_INTERVAL_MS);
        Self {
            rds_base_url: String::new(),
            rds_user: String::new(),
            rds_pass: String::new(),
            rds_language: DEFAULT_RDS_LANGUAGE.to_string(),
            rds_request_timeout: poll_interval,
            poll_interval,
            modbus_request_timeout: Duration::from_millis(DEFAULT_MODBUS_REQUEST_TIMEOUT_MS),
            reconnect_backoff: Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_MS),
            fill_debounce: Duration::from_millis(DEFAULT_FILL_DEBOUNCE_MS),
            sites: Vec::new(),
            debug_log: false,
        }
    }
}

impl BridgeConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Site-level rules first (non-empty and unique `siteId`; `offset` and
    /// `default` are already guaranteed well-formed by their Rust types at
    /// deserialization time), then the ambient numeric sanity checks on
    /// the bridge's own duration fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rds_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidField { field: "rdsHost" });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidField { field: "pollInterval" });
        }
        if self.modbus_request_timeout.is_zero() {
            return Err(ConfigError::InvalidField {
                field: "modbusRequestTimeout",
            });
        }
        if self.reconnect_backoff.is_zero() {
            return Err(ConfigError::InvalidField {
                field: "reconnectBackoff",
            });
        }
        if self.fill_debounce.is_zero() {
            return Err(ConfigError::InvalidField { field: "fillDebounce" });
        }
        if self.rds_request_timeout.is_zero() {
            return Err(ConfigError::InvalidField {
                field: "rdsRequestTimeout",
            });
        }

        group_sites(&self.sites)?;
        Ok(())
    }

    /// Validated sites, grouped by (host, port, unitId).
    pub fn groups(&self) -> Result<Vec<Group>, ConfigError> {
        group_sites(&self.sites)
    }
}

/// Validates every site and groups them by (host, port, unitId),
/// preserving configuration order within and across groups.
pub fn group_sites(sites: &[Site]) -> Result<Vec<Group>, ConfigError> {
    let mut seen_ids = HashSet::new();
    for site in sites {
        if site.site_id.trim().is_empty() {
            return Err(ConfigError::InvalidSite {
                site_id: site.site_id.clone(),
                reason: "siteId must be a non-empty string".to_string(),
            });
        }
        if !seen_ids.insert(site.site_id.as_str()) {
            return Err(ConfigError::InvalidSite {
                site_id: site.site_id.clone(),
                reason: "siteId must be unique across all sites".to_string(),
            });
        }
    }

    let mut order: Vec<GroupKey> = Vec::new();
    let mut members: HashMap<GroupKey, Vec<Site>> = HashMap::new();
    for site in sites {
        let key = GroupKey {
            host: site.host.clone(),
            port: site.port,
            unit_id: site.unit_id,
        };
        if !members.contains_key(&key) {
            order.push(key.clone());
        }
        members.entry(key).or_default().push(site.clone());
    }

    let groups = order
        .into_iter()
        .map(|key| {
            let sites = members.remove(&key).expect("key was just inserted above");
            let min_offset = sites
                .iter()
                .map(|s| s.offset)
                .min()
                .expect("group is never empty");
            let max_offset = sites
                .iter()
                .map(|s| s.offset)
                .max()
                .expect("group is never empty");
            Group {
                key,
                sites,
                min_offset,
                max_offset,
            }
        })
        .collect();

    Ok(groups)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileConfig {
    rds_host: Option<String>,
    rds_user: Option<String>,
    rds_pass: Option<String>,
    rds_language: Option<String>,
    rds_request_timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    modbus_request_timeout_ms: Option<u64>,
    reconnect_backoff_ms: Option<u64>,
    fill_debounce_ms: Option<u64>,
    debug_log: Option<bool>,
    sites: Option<Vec<FileSite>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileSite {
    site_id: String,
    host: String,
    port: u16,
    unit_id: u8,
    offset: u16,
    default: LogicalState,
}

fn load_file_config(config_path: Option<&str>) -> anyhow::Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("BRIDGE_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
        path: path.clone(),
        source,
    })?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source: source.to_string(),
        })?,
        _ => toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source: source.to_string(),
        })?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut BridgeConfig, file: FileConfig) {
    if let Some(value) = file.rds_host {
        config.rds_base_url = value;
    }
    if let Some(value) = file.rds_user {
        config.rds_user = value;
    }
    if let Some(value) = file.rds_pass {
        config.rds_pass = value;
    }
    if let Some(value) = file.rds_language {
        config.rds_language = value;
    }
    if let Some(ms) = file.rds_request_timeout_ms {
        config.rds_request_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = file.poll_interval_ms {
        config.poll_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = file.modbus_request_timeout_ms {
        config.modbus_request_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = file.reconnect_backoff_ms {
        config.reconnect_backoff = Duration::from_millis(ms);
    }
    if let Some(ms) = file.fill_debounce_ms {
        config.fill_debounce = Duration::from_millis(ms);
    }
    if let Some(value) = file.debug_log {
        config.debug_log = value;
    }
    if let Some(sites) = file.sites {
        config.sites = sites
            .into_iter()
            .map(|s| Site {
                site_id: s.site_id,
                host: s.host,
                port: s.port,
                unit_id: s.unit_id,
                offset: s.offset,
                default: s.default,
            })
            .collect();
    }
}

fn apply_env_overrides(config: &mut BridgeConfig) {
    if let Ok(value) = env::var("BRIDGE_RDS_HOST") {
        config.rds_base_url = value;
    }
    if let Ok(value) = env::var("BRIDGE_RDS_USER") {
        config.rds_user = value;
    }
    if let Ok(value) = env::var("BRIDGE_RDS_PASS") {
        config.rds_pass = value;
    }
    if let Ok(value) = env::var("BRIDGE_RDS_LANGUAGE") {
        config.rds_language = value;
    }
    if let Some(ms) = parse_env_u64("BRIDGE_POLL_INTERVAL_MS") {
        config.poll_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = parse_env_u64("BRIDGE_MODBUS_REQUEST_TIMEOUT_MS") {
        config.modbus_request_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = parse_env_u64("BRIDGE_RECONNECT_BACKOFF_MS") {
        config.reconnect_backoff = Duration::from_millis(ms);
    }
    if let Some(ms) = parse_env_u64("BRIDGE_FILL_DEBOUNCE_MS") {
        config.fill_debounce = Duration::from_millis(ms);
    }
    if let Some(ms) = parse_env_u64("BRIDGE_RDS_REQUEST_TIMEOUT_MS") {
        config.rds_request_timeout = Duration::from_millis(ms);
    }
    if let Some(value) = parse_env_bool("BRIDGE_DEBUG_LOG") {
        config.debug_log = value;
    }
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(id: &str, host: &str, port: u16, unit: u8, offset: u16) -> Site {
        Site {
            site_id: id.to_string(),
            host: host.to_string(),
            port,
            unit_id: unit,
            offset,
            default: LogicalState::Empty,
        }
    }

    #[test]
    fn groups_sites_sharing_host_port_unit() {
        let sites = vec![
            site("A", "10.0.0.1", 502, 1, 0),
            site("B", "10.0.0.1", 502, 1, 1),
            site("C", "10.0.0.2", 502, 1, 0),
        ];
        let groups = group_sites(&sites).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].sites.len(), 2);
        assert_eq!(groups[1].sites.len(), 1);
    }

    #[test]
    fn rejects_duplicate_site_id() {
        let sites = vec![
            site("A", "10.0.0.1", 502, 1, 0),
            site("A", "10.0.0.2", 502, 1, 0),
        ];
        let err = group_sites(&sites).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSite { .. }));
    }

    #[test]
    fn rejects_blank_site_id() {
        let sites = vec![site("  ", "10.0.0.1", 502, 1, 0)];
        let err = group_sites(&sites).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSite { .. }));
    }

    #[test]
    fn validate_rejects_missing_rds_host() {
        let config = BridgeConfig::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidField { field: "rdsHost" }
        ));
    }

    #[test]
    fn validate_passes_with_rds_host_and_no_sites() {
        let mut config = BridgeConfig::default();
        config.rds_base_url = "http://rds.example.internal".to_string();
        assert!(config.validate().is_ok());
    }
}
