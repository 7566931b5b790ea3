//! Generated certificate material for unit tests.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{Datelike, Duration, Utc};
use rcgen::{date_time_ymd, CertificateParams, DnType, KeyPair};

use crate::config::CertSyncConfig;

pub const DOMAIN: &str = "pve.example.com";

/// Validity window of a generated certificate.
#[derive(Debug, Clone, Copy)]
pub enum Validity {
    /// 2020-01-01 through 2040-01-01
    Current,
    /// 2015-01-01 through 2020-01-01
    Expired,
    /// Valid since 2020-01-01, expiring this many days from today
    ExpiresInDays(i64),
}

/// A self-signed key/chain pair.
pub struct Issued {
    pub chain_pem: String,
    pub key_pem: String,
    pub cert_der: Vec<u8>,
    pub key_der: Vec<u8>,
}

/// Issue a self-signed certificate for `names`; the first becomes the CN.
pub fn issue(names: &[&str], validity: Validity) -> Issued {
    let key_pair = KeyPair::generate().unwrap();
    let mut params =
        CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
    params
        .distinguished_name
        .push(DnType::CommonName, names[0].to_string());

    let (not_before, not_after) = match validity {
        Validity::Current => (date_time_ymd(2020, 1, 1), date_time_ymd(2040, 1, 1)),
        Validity::Expired => (date_time_ymd(2015, 1, 1), date_time_ymd(2020, 1, 1)),
        Validity::ExpiresInDays(days) => {
            let end = Utc::now() + Duration::days(days);
            (
                date_time_ymd(2020, 1, 1),
                date_time_ymd(end.year(), end.month() as u8, end.day() as u8),
            )
        }
    };
    params.not_before = not_before;
    params.not_after = not_after;

    let cert = params.self_signed(&key_pair).unwrap();
    Issued {
        chain_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
        cert_der: cert.der().to_vec(),
        key_der: key_pair.serialize_der(),
    }
}

/// Settings with every local path under `root`, probing disabled and
/// ownership left unchanged. `overrides` replace individual keys.
pub fn config(root: &Path, overrides: &[(&str, &str)]) -> CertSyncConfig {
    let mut pairs: HashMap<String, String> = [
        ("remote_host", "nas.example.com"),
        ("remote_user", "certs"),
        ("ssh_key", "/root/.ssh/id_ed25519"),
        ("remote_cert_dir", "/volume1/certs"),
        ("domain", DOMAIN),
        ("owner", ""),
        ("group", ""),
        ("probe_enabled", "false"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    for (key, path) in [
        ("backup_dir", "backups"),
        ("log_file", "deploy.log"),
        ("cert_path", "live/pveproxy-ssl.pem"),
        ("key_path", "live/pveproxy-ssl.key"),
        ("staging_dir", "staging"),
    ] {
        pairs.insert(key.to_string(), root.join(path).display().to_string());
    }
    pairs.extend(overrides.iter().map(|(k, v)| (k.to_string(), v.to_string())));

    CertSyncConfig::from_pairs(pairs).unwrap()
}

/// Write `issued` to the live paths of `config`.
pub fn install_live(config: &CertSyncConfig, issued: &Issued) {
    fs::create_dir_all(config.cert_path.parent().unwrap()).unwrap();
    fs::write(&config.cert_path, &issued.chain_pem).unwrap();
    fs::write(&config.key_path, &issued.key_pem).unwrap();
}
