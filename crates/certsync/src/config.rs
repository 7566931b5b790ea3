//! Configuration loading for certificate deployment.
//!
//! Settings come from a `KEY=VALUE` file (blank lines and `#` comments are
//! skipped). Environment variables prefixed with [`ENV_PREFIX`] override
//! file values. Keys are case-insensitive; the key names used by the older
//! shell-based tooling (`SYNOLOGY_HOST`, `NPM_CERT_PATH`, `PVE_CERT_PATH`, ...)
//! are accepted as aliases.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, info};
use validator::{Validate, ValidationError};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/root/deploy-certs/deploy-pve-cert.conf";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "PVECERT_";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: expected KEY=VALUE, got '{content}'")]
    Syntax { line: usize, content: String },

    #[error("{0}")]
    Deserialize(#[from] envy::Error),

    #[error("invalid settings: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Resolved settings shared by the deployer and the verifier.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CertSyncConfig {
    /// Host holding the issued certificates
    #[serde(alias = "synology_host")]
    #[validate(length(min = 1))]
    pub remote_host: String,

    /// SSH user on the remote host
    #[serde(alias = "synology_user")]
    #[validate(length(min = 1))]
    pub remote_user: String,

    /// Private key used for the non-interactive SSH channel
    #[serde(alias = "synology_ssh_key")]
    #[validate(custom(function = "validate_path"))]
    pub ssh_key: PathBuf,

    #[serde(default = "default_remote_port")]
    pub remote_port: u16,

    /// Remote directory containing the key and full chain
    #[serde(alias = "npm_cert_path")]
    #[validate(length(min = 1))]
    pub remote_cert_dir: String,

    #[serde(default = "default_remote_chain_file")]
    #[validate(length(min = 1))]
    pub remote_chain_file: String,

    #[serde(default = "default_remote_key_file")]
    #[validate(length(min = 1))]
    pub remote_key_file: String,

    /// Domain the certificate must cover
    #[validate(custom(function = "validate_domain"))]
    pub domain: String,

    /// Root directory for timestamped snapshots
    #[validate(custom(function = "validate_path"))]
    pub backup_dir: PathBuf,

    /// Append-only audit log
    #[validate(custom(function = "validate_path"))]
    pub log_file: PathBuf,

    /// Live full chain read by the management service
    #[serde(alias = "pve_cert_path", default = "default_cert_path")]
    #[validate(custom(function = "validate_path"))]
    pub cert_path: PathBuf,

    /// Live private key read by the management service
    #[serde(alias = "pve_key_path", default = "default_key_path")]
    #[validate(custom(function = "validate_path"))]
    pub key_path: PathBuf,

    #[serde(default = "default_service_name")]
    #[validate(length(min = 1))]
    pub service_name: String,

    /// HTTPS port of the management service
    #[serde(default = "default_service_port")]
    pub service_port: u16,

    /// Owner applied to installed files; `None` leaves it unchanged
    #[serde(default = "default_owner", deserialize_with = "deserialize_identity")]
    pub owner: Option<String>,

    /// Group applied to installed files; `None` leaves it unchanged
    #[serde(default = "default_group", deserialize_with = "deserialize_identity")]
    pub group: Option<String>,

    #[serde(default = "default_file_mode", deserialize_with = "deserialize_mode")]
    pub key_mode: u32,

    #[serde(default = "default_file_mode", deserialize_with = "deserialize_mode")]
    pub cert_mode: u32,

    #[serde(default = "default_connect_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub connect_timeout_secs: u64,

    /// Use the legacy SCP protocol (`scp -O`), required by some NAS sshd builds
    #[serde(default = "default_true")]
    pub legacy_scp: bool,

    #[serde(default = "default_expiry_warning_days")]
    #[validate(range(min = 0, max = 365))]
    pub expiry_warning_days: i64,

    /// Address the verifier connects to when probing the live endpoint
    #[serde(default = "default_probe_host")]
    #[validate(length(min = 1))]
    pub probe_host: String,

    #[serde(default = "default_true")]
    pub probe_enabled: bool,

    /// Parent of the per-run staging directory; system temp dir when unset
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

fn default_remote_port() -> u16 {
    22
}

fn default_remote_chain_file() -> String {
    "fullchain.pem".to_string()
}

fn default_remote_key_file() -> String {
    "privkey.pem".to_string()
}

fn default_cert_path() -> PathBuf {
    PathBuf::from("/etc/pve/local/pveproxy-ssl.pem")
}

fn default_key_path() -> PathBuf {
    PathBuf::from("/etc/pve/local/pveproxy-ssl.key")
}

fn default_service_name() -> String {
    "pveproxy".to_string()
}

fn default_service_port() -> u16 {
    8006
}

fn default_owner() -> Option<String> {
    Some("root".to_string())
}

fn default_group() -> Option<String> {
    Some("www-data".to_string())
}

fn default_file_mode() -> u32 {
    0o640
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_expiry_warning_days() -> i64 {
    30
}

fn default_probe_host() -> String {
    "127.0.0.1".to_string()
}

fn deserialize_identity<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    let value = value.trim();
    Ok((!value.is_empty()).then(|| value.to_string()))
}

fn deserialize_mode<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    let digits = value.trim().trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|e| D::Error::custom(format!("invalid octal mode '{value}': {e}")))?;
    if mode > 0o777 {
        return Err(D::Error::custom(format!("mode '{value}' out of range")));
    }
    Ok(mode)
}

fn validate_path(path: &Path) -> Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::new("empty_path"));
    }
    Ok(())
}

fn validate_domain(domain: &str) -> Result<(), ValidationError> {
    let valid = !domain.is_empty()
        && !domain.contains("://")
        && !domain.contains('/')
        && !domain.contains(char::is_whitespace);
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("bare_hostname"))
    }
}

impl CertSyncConfig {
    /// Load settings from a file, applying environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut settings = parse_key_values(&content)?;
        let overrides = env_overrides();
        if !overrides.is_empty() {
            debug!(count = overrides.len(), "Applying environment overrides");
        }
        settings.extend(overrides);

        let config = Self::from_pairs(settings)?;
        info!(
            path = %path.display(),
            remote = %config.remote_target(),
            domain = %config.domain,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Build settings from already-parsed key/value pairs.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(pairs)?;
        config.validate()?;
        Ok(config)
    }

    /// `user@host` for the remote copy channel.
    pub fn remote_target(&self) -> String {
        format!("{}@{}", self.remote_user, self.remote_host)
    }

    pub fn remote_chain_path(&self) -> String {
        remote_join(&self.remote_cert_dir, &self.remote_chain_file)
    }

    pub fn remote_key_path(&self) -> String {
        remote_join(&self.remote_cert_dir, &self.remote_key_file)
    }

    /// Human-readable origin of the deployed material.
    pub fn source_description(&self) -> String {
        format!("{}:{}", self.remote_target(), self.remote_cert_dir)
    }

    /// URL operators use to reach the management service.
    pub fn access_url(&self) -> String {
        format!("https://{}:{}", self.domain, self.service_port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn remote_join(dir: &str, file: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), file)
}

/// Parse `KEY=VALUE` lines into a map keyed by lowercase key.
///
/// Later duplicates win, so a file can be appended to without editing.
pub fn parse_key_values(content: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut settings = HashMap::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(ConfigError::Syntax {
                line: index + 1,
                content: line.to_string(),
            });
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::Syntax {
                line: index + 1,
                content: line.to_string(),
            });
        }

        settings.insert(key.to_lowercase(), unquote(value.trim()).to_string());
    }

    Ok(settings)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn env_overrides() -> HashMap<String, String> {
    std::env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(ENV_PREFIX)
                .map(|key| (key.to_lowercase(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
# Remote certificate host
REMOTE_HOST=nas.lan
REMOTE_USER=certbot
SSH_KEY=/root/.ssh/id_ed25519
REMOTE_CERT_DIR=/volume1/docker/npm/letsencrypt/live/npm-7/

DOMAIN=pve.example.com
BACKUP_DIR=/root/deploy-certs/backups
LOG_FILE=/var/log/deploy-pve-cert.log
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = CertSyncConfig::from_pairs(parse_key_values(MINIMAL).unwrap()).unwrap();

        assert_eq!(config.remote_port, 22);
        assert_eq!(config.service_name, "pveproxy");
        assert_eq!(config.cert_path, PathBuf::from("/etc/pve/local/pveproxy-ssl.pem"));
        assert_eq!(config.key_mode, 0o640);
        assert_eq!(config.owner.as_deref(), Some("root"));
        assert_eq!(config.group.as_deref(), Some("www-data"));
        assert!(config.legacy_scp);
        assert_eq!(
            config.remote_chain_path(),
            "/volume1/docker/npm/letsencrypt/live/npm-7/fullchain.pem"
        );
        assert_eq!(config.access_url(), "https://pve.example.com:8006");
    }

    #[test]
    fn test_legacy_key_names() {
        let content = r#"
SYNOLOGY_HOST=192.168.1.10
SYNOLOGY_USER=admin
SYNOLOGY_SSH_KEY=/root/.ssh/synology
NPM_CERT_PATH=/volume1/npm/live/npm-3
PVE_CERT_PATH=/tmp/pve.pem
PVE_KEY_PATH=/tmp/pve.key
DOMAIN=pve.example.com
BACKUP_DIR=/tmp/backups
LOG_FILE=/tmp/deploy.log
"#;
        let config = CertSyncConfig::from_pairs(parse_key_values(content).unwrap()).unwrap();

        assert_eq!(config.remote_target(), "admin@192.168.1.10");
        assert_eq!(config.key_path, PathBuf::from("/tmp/pve.key"));
        assert_eq!(config.remote_cert_dir, "/volume1/npm/live/npm-3");
    }

    #[test]
    fn test_missing_required_key() {
        let content = MINIMAL.replace("DOMAIN=pve.example.com", "");
        let err = CertSyncConfig::from_pairs(parse_key_values(&content).unwrap()).unwrap_err();

        assert!(matches!(err, ConfigError::Deserialize(_)));
        assert!(err.to_string().contains("domain"));
    }

    #[test]
    fn test_octal_modes_and_empty_owner() {
        let content = format!("{MINIMAL}\nKEY_MODE=600\nCERT_MODE=0o644\nOWNER=\nGROUP=\n");
        let config = CertSyncConfig::from_pairs(parse_key_values(&content).unwrap()).unwrap();

        assert_eq!(config.key_mode, 0o600);
        assert_eq!(config.cert_mode, 0o644);
        assert!(config.owner.is_none());
        assert!(config.group.is_none());
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let content = format!("{MINIMAL}\nKEY_MODE=999\n");
        assert!(CertSyncConfig::from_pairs(parse_key_values(&content).unwrap()).is_err());
    }

    #[test]
    fn test_domain_with_scheme_rejected() {
        let content = MINIMAL.replace("DOMAIN=pve.example.com", "DOMAIN=https://pve.example.com");
        let err = CertSyncConfig::from_pairs(parse_key_values(&content).unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_timeout_range_validated() {
        let content = format!("{MINIMAL}\nCONNECT_TIMEOUT_SECS=0\n");
        let err = CertSyncConfig::from_pairs(parse_key_values(&content).unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let err = parse_key_values("# header\nREMOTE_HOST nas\n").unwrap_err();
        match err {
            ConfigError::Syntax { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_quoted_values_and_case() {
        let settings = parse_key_values("Domain = \"pve.example.com\"\nlog_file='/tmp/x.log'").unwrap();
        assert_eq!(settings["domain"], "pve.example.com");
        assert_eq!(settings["log_file"], "/tmp/x.log");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = CertSyncConfig::from_file(file.path()).unwrap();
        assert_eq!(config.domain, "pve.example.com");
    }

    #[test]
    fn test_from_missing_file() {
        let err = CertSyncConfig::from_file(Path::new("/nonexistent/deploy.conf")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
