// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Device Configuration Types
//
// Defines the configuration schema for a simulated device, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Device identity (the source of the Identity Snapshot)
// - The list of protocol responders to run
// - Runtime timeouts, storage locations, admin credentials, observability

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::domain::identity::{IdentityConfig, IdentitySnapshot};
use crate::domain::session::PasswordHash;

pub const API_VERSION: &str = "devsim/v1";
pub const MANIFEST_KIND: &str = "DeviceConfig";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("No configuration file found (use --config or DEVSIM_CONFIG_PATH)")]
    NotFound,
}

/// Top-level Kubernetes-style device configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfigManifest {
    /// API version (must be "devsim/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "DeviceConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: DeviceConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Device configuration specification (content under spec:)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfigSpec {
    pub identity: IdentityConfig,

    pub responders: Vec<ResponderSpec>,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<AdminConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

/// The four protocol kinds the runtime knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponderKind {
    /// SNMP-style query responder (UDP)
    Snmp,
    /// Raw print-job ingest (TCP, JetDirect)
    JobIngest,
    /// WS-Discovery (UDP multicast)
    Discovery,
    /// LLMNR name resolution (UDP multicast)
    NameResolution,
}

impl ResponderKind {
    pub const ALL: [ResponderKind; 4] = [
        ResponderKind::Snmp,
        ResponderKind::JobIngest,
        ResponderKind::Discovery,
        ResponderKind::NameResolution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponderKind::Snmp => "snmp",
            ResponderKind::JobIngest => "job-ingest",
            ResponderKind::Discovery => "discovery",
            ResponderKind::NameResolution => "name-resolution",
        }
    }

    /// Port the protocol conventionally listens on.
    pub fn well_known_port(&self) -> u16 {
        match self {
            ResponderKind::Snmp => 161,
            ResponderKind::JobIngest => 9100,
            ResponderKind::Discovery => 3702,
            ResponderKind::NameResolution => 5355,
        }
    }
}

impl fmt::Display for ResponderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResponderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "Unknown responder kind '{}'. Supported: snmp, job-ingest, discovery, name-resolution",
                    s
                ))
            })
    }
}

/// One responder to run: protocol kind plus the port it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderSpec {
    pub kind: ResponderKind,
    pub port: u16,
}

impl ResponderSpec {
    pub fn new(kind: ResponderKind, port: u16) -> Self {
        Self { kind, port }
    }

    /// Stable responder id used in status output, log file names and the child list.
    pub fn id(&self) -> String {
        format!("{}-{}", self.kind, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Address every responder binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Idle read timeout for every network read
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// How long a responder drains in-flight work after shutdown is requested
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,

    /// How long the supervisor waits for a responder to report its bind result
    #[serde(default = "default_startup_timeout", with = "humantime_serde")]
    pub startup_timeout: Duration,

    /// Send the unsolicited discovery announcement at startup
    #[serde(default = "default_true")]
    pub announce: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            idle_timeout: default_idle_timeout(),
            shutdown_grace: default_shutdown_grace(),
            startup_timeout: default_startup_timeout(),
            announce: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Lock file, child list and logs live here
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,

    /// Catalog directory; relative paths resolve against `run_dir`
    #[serde(default = "default_jobs_dir")]
    pub jobs_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            run_dir: default_run_dir(),
            jobs_dir: default_jobs_dir(),
        }
    }
}

impl StorageConfig {
    pub fn resolved_jobs_dir(&self) -> PathBuf {
        if self.jobs_dir.is_absolute() {
            self.jobs_dir.clone()
        } else {
            self.run_dir.join(&self.jobs_dir)
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.run_dir.join("logs")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Address of the admin JSON API served by the master process
    pub listen: SocketAddr,

    pub username: String,

    /// `hmac-sha256$<salt-hex>$<mac-hex>` (see `devsim config hash-password`)
    pub password_hash: String,

    /// Bytes of artifact shown by the job preview
    #[serde(default = "default_preview_bytes")]
    pub preview_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus scrape endpoint served by the master process
    pub listen: SocketAddr,
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(3)
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_run_dir() -> PathBuf {
    PathBuf::from("./run")
}

fn default_jobs_dir() -> PathBuf {
    PathBuf::from("print_jobs")
}

fn default_preview_bytes() -> usize {
    512
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl DeviceConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. DEVSIM_CONFIG_PATH environment variable
    /// 2. ./devsim.yaml (working directory)
    /// 3. ~/.devsim/config.yaml (user home)
    /// 4. /etc/devsim/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("DEVSIM_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./devsim.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".devsim").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/devsim/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Resolve the config path: explicit CLI path first, then discovery.
    pub fn resolve_path(cli_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
        match cli_path {
            Some(path) => Ok(path.to_path_buf()),
            None => Self::discover_config().ok_or(ConfigError::NotFound),
        }
    }

    /// Load, apply env overrides and validate. Nothing is started on failure.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!("Loading configuration from {:?}", path);
        let mut config = Self::from_yaml_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DEVSIM_RUN_DIR") {
            if !val.is_empty() {
                tracing::info!("Environment override: DEVSIM_RUN_DIR={}", val);
                self.spec.storage.run_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var("DEVSIM_LOG_LEVEL") {
            if !val.is_empty() {
                self.spec
                    .observability
                    .get_or_insert_with(ObservabilityConfig::default)
                    .logging
                    .level = val;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_version != API_VERSION {
            return Err(invalid(format!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version, API_VERSION
            )));
        }

        if self.kind != MANIFEST_KIND {
            return Err(invalid(format!(
                "Invalid kind: '{}'. Must be '{}'",
                self.kind, MANIFEST_KIND
            )));
        }

        if self.metadata.name.is_empty() {
            return Err(invalid("metadata.name cannot be empty"));
        }

        let identity = &self.spec.identity;
        if identity.hostname.is_empty() {
            return Err(invalid("spec.identity.hostname cannot be empty"));
        }
        if identity
            .hostname
            .trim_end_matches('.')
            .split('.')
            .any(|label| label.is_empty() || label.len() > 63)
        {
            return Err(invalid(format!(
                "spec.identity.hostname '{}' is not a valid DNS name",
                identity.hostname
            )));
        }
        for oid in identity.extra_oids.keys() {
            let arcs: Vec<&str> = oid.split('.').collect();
            if arcs.len() < 2 || arcs.iter().any(|arc| arc.parse::<u32>().is_err()) {
                return Err(invalid(format!("spec.identity.extra_oids: '{}' is not a dotted OID", oid)));
            }
        }

        if self.spec.responders.is_empty() {
            return Err(invalid("spec.responders must list at least one responder"));
        }

        let mut ports = HashSet::new();
        let mut ingest_count = 0;
        for responder in &self.spec.responders {
            if responder.port == 0 {
                return Err(invalid(format!("Responder {} cannot use port 0", responder.kind)));
            }
            if !ports.insert(responder.port) {
                return Err(invalid(format!(
                    "Port {} is claimed by more than one responder",
                    responder.port
                )));
            }
            if responder.kind == ResponderKind::JobIngest {
                ingest_count += 1;
            }
        }
        if ingest_count > 1 {
            return Err(invalid("At most one job-ingest responder may write the job catalog"));
        }

        if self.spec.runtime.idle_timeout.is_zero() {
            return Err(invalid("spec.runtime.idle_timeout must be greater than zero"));
        }

        if let Some(admin) = &self.spec.admin {
            if admin.username.is_empty() {
                return Err(invalid("spec.admin.username cannot be empty"));
            }
            PasswordHash::parse(&admin.password_hash)
                .map_err(|e| invalid(format!("spec.admin.password_hash: {}", e)))?;
        }

        if let Some(observability) = &self.spec.observability {
            match observability.logging.format.as_str() {
                "text" | "json" => {}
                other => {
                    return Err(invalid(format!(
                        "Unknown log format '{}'. Expected 'text' or 'json'",
                        other
                    )))
                }
            }
        }

        Ok(())
    }

    /// Freeze the identity section into the snapshot handed to responders.
    pub fn identity_snapshot(&self) -> IdentitySnapshot {
        IdentitySnapshot::from_config(&self.spec.identity)
    }

    pub fn logging(&self) -> LoggingConfig {
        self.spec
            .observability
            .as_ref()
            .map(|o| o.logging.clone())
            .unwrap_or_default()
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
apiVersion: devsim/v1
kind: DeviceConfig
metadata:
  name: lobby-printer
spec:
  identity:
    hostname: HPLJ-4F2
    ip: 10.0.0.40
    serial: CNB8K12345
    model: HP LaserJet Pro M404dn
    page_count: 18432
  responders:
    - kind: job-ingest
      port: 9100
    - kind: snmp
      port: 161
    - kind: discovery
      port: 3702
    - kind: name-resolution
      port: 5355
  runtime:
    idle_timeout: 15s
"#;

    #[test]
    fn test_sample_parses_and_validates() {
        let manifest = DeviceConfigManifest::from_yaml_str(SAMPLE).unwrap();
        manifest.validate().unwrap();

        assert_eq!(manifest.metadata.name, "lobby-printer");
        assert_eq!(manifest.spec.responders.len(), 4);
        assert_eq!(manifest.spec.responders[0].kind, ResponderKind::JobIngest);
        assert_eq!(manifest.spec.runtime.idle_timeout, Duration::from_secs(15));
        assert_eq!(manifest.spec.runtime.shutdown_grace, Duration::from_secs(3));
        assert!(manifest.spec.runtime.announce);
        assert_eq!(manifest.identity_snapshot().page_count, 18432);
    }

    #[test]
    fn test_unknown_kind_is_rejected_at_parse() {
        let yaml = SAMPLE.replace("kind: snmp", "kind: telnet");
        assert!(matches!(
            DeviceConfigManifest::from_yaml_str(&yaml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation() {
        let mut manifest = DeviceConfigManifest::from_yaml_str(SAMPLE).unwrap();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "WrongKind".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = MANIFEST_KIND.to_string();

        // Duplicate port
        manifest.spec.responders.push(ResponderSpec::new(ResponderKind::Snmp, 9100));
        assert!(manifest.validate().is_err());
        manifest.spec.responders.pop();

        // Second catalog writer
        manifest.spec.responders.push(ResponderSpec::new(ResponderKind::JobIngest, 9101));
        assert!(manifest.validate().is_err());
        manifest.spec.responders.pop();

        manifest.spec.responders.push(ResponderSpec::new(ResponderKind::Snmp, 0));
        assert!(manifest.validate().is_err());
        manifest.spec.responders.pop();

        manifest.spec.identity.hostname = String::new();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_admin_hash_must_parse() {
        let mut manifest = DeviceConfigManifest::from_yaml_str(SAMPLE).unwrap();
        manifest.spec.admin = Some(AdminConfig {
            listen: "127.0.0.1:8080".parse().unwrap(),
            username: "admin".to_string(),
            password_hash: "plaintext".to_string(),
            preview_bytes: 512,
        });
        assert!(matches!(manifest.validate(), Err(ConfigError::Invalid(_))));

        manifest.spec.admin.as_mut().unwrap().password_hash =
            PasswordHash::derive("hunter2").to_string();
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_responder_ids_and_kinds() {
        let spec = ResponderSpec::new(ResponderKind::NameResolution, 5355);
        assert_eq!(spec.id(), "name-resolution-5355");
        assert_eq!("job-ingest".parse::<ResponderKind>().unwrap(), ResponderKind::JobIngest);
        assert!("ftp".parse::<ResponderKind>().is_err());
    }

    #[test]
    fn test_jobs_dir_resolves_against_run_dir() {
        let storage = StorageConfig {
            run_dir: PathBuf::from("/srv/devsim"),
            jobs_dir: PathBuf::from("print_jobs"),
        };
        assert_eq!(storage.resolved_jobs_dir(), PathBuf::from("/srv/devsim/print_jobs"));
        assert_eq!(storage.log_dir(), PathBuf::from("/srv/devsim/logs"));
    }
}
