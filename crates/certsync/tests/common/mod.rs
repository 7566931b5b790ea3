//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use rcgen::{date_time_ymd, CertificateParams, DnType, KeyPair};

use pve_certsync::cert::fingerprint;
use pve_certsync::{CertSyncConfig, MemoryRemote};

pub const DOMAIN: &str = "pve.example.com";
pub const REMOTE_DIR: &str = "/volume1/docker/npm/letsencrypt/live/npm-1";

/// PEM key and chain of a self-signed certificate.
pub struct Pair {
    pub chain: String,
    pub key: String,
}

/// Self-signed pair for `names` valid between the given years.
pub fn pair(names: &[&str], from_year: i32, to_year: i32) -> Pair {
    let key_pair = KeyPair::generate().unwrap();
    let mut params =
        CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
    params
        .distinguished_name
        .push(DnType::CommonName, names[0].to_string());
    params.not_before = date_time_ymd(from_year, 1, 1);
    params.not_after = date_time_ymd(to_year, 1, 1);

    let cert = params.self_signed(&key_pair).unwrap();
    Pair {
        chain: cert.pem(),
        key: key_pair.serialize_pem(),
    }
}

pub fn current_pair() -> Pair {
    pair(&[DOMAIN], 2020, 2045)
}

pub fn expired_pair() -> Pair {
    pair(&[DOMAIN], 2015, 2020)
}

/// Settings rooted in `root`, using the legacy key names of the shell tooling.
pub fn config(root: &Path, overrides: &[(&str, &str)]) -> CertSyncConfig {
    let file = format!(
        "# deploy-pve-cert configuration\n\
         SYNOLOGY_HOST=nas.example.com\n\
         SYNOLOGY_USER=certsync\n\
         SYNOLOGY_SSH_KEY=/root/.ssh/id_ed25519\n\
         NPM_CERT_PATH={REMOTE_DIR}\n\
         DOMAIN={DOMAIN}\n\
         BACKUP_DIR={root}/backups\n\
         LOG_FILE={root}/logs/deploy-pve-cert.log\n\
         PVE_CERT_PATH={root}/pve/local/pveproxy-ssl.pem\n\
         PVE_KEY_PATH={root}/pve/local/pveproxy-ssl.key\n\
         STAGING_DIR={root}/staging\n\
         OWNER=\n\
         GROUP=\n\
         PROBE_ENABLED=false\n",
        root = root.display()
    );

    let mut settings: HashMap<String, String> =
        pve_certsync::config::parse_key_values(&file).unwrap();
    settings.extend(
        overrides
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string())),
    );
    CertSyncConfig::from_pairs(settings).unwrap()
}

/// Remote serving `pair` from the configured directory.
pub fn remote_serving(pair: &Pair) -> MemoryRemote {
    let remote = MemoryRemote::new("nas.example.com");
    remote.insert(format!("{REMOTE_DIR}/fullchain.pem"), pair.chain.clone());
    remote.insert(format!("{REMOTE_DIR}/privkey.pem"), pair.key.clone());
    remote
}

/// Put `pair` in place as the live pair.
pub fn install_live(config: &CertSyncConfig, pair: &Pair) {
    fs::create_dir_all(config.cert_path.parent().unwrap()).unwrap();
    fs::write(&config.cert_path, &pair.chain).unwrap();
    fs::write(&config.key_path, &pair.key).unwrap();
}

/// SHA-256 of the live chain and key.
pub fn live_hashes(config: &CertSyncConfig) -> (String, String) {
    (
        fingerprint(&fs::read(&config.cert_path).unwrap()),
        fingerprint(&fs::read(&config.key_path).unwrap()),
    )
}
