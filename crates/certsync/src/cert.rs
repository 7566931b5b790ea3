//! Certificate inspection and validation
//!
//! Parses PEM full chains, extracts the fields operators care about
//! (subject, issuer, validity window, names, fingerprint) and checks a
//! key/chain pair before it is allowed anywhere near the live paths.

use chrono::{DateTime, Utc};
use rustls::pki_types::PrivateKeyDer;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;

/// Errors raised while inspecting certificate material.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("not PEM encoded: {0}")]
    Pem(#[from] pem::PemError),

    #[error("no CERTIFICATE block found")]
    NoCertificate,

    #[error("invalid X509 certificate: {0}")]
    X509(String),

    #[error("certificate expired at {not_after}")]
    Expired { not_after: DateTime<Utc> },

    #[error("certificate not valid before {not_before}")]
    NotYetValid { not_before: DateTime<Utc> },

    #[error("certificate does not cover '{domain}' (names: {names})")]
    DomainMismatch { domain: String, names: String },

    #[error("no private key found in key file")]
    MissingKey,

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("private key does not match the certificate public key")]
    KeyMismatch,
}

/// Summary of the leaf certificate of a chain.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    /// Hex-encoded serial number
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Subject common names
    pub common_names: Vec<String>,
    /// DNS subject alternative names
    pub dns_names: Vec<String>,
    /// SHA-256 over the leaf DER, lowercase hex
    pub fingerprint_sha256: String,
    /// Number of certificates in the chain, leaf included
    pub chain_length: usize,
    #[serde(skip)]
    spki: Vec<u8>,
}

impl CertificateInfo {
    /// Inspect the leaf of a PEM chain.
    pub fn from_pem(chain: &[u8]) -> Result<Self, CertificateError> {
        let blocks = pem::parse_many(chain)?;
        let certs: Vec<&pem::Pem> = blocks
            .iter()
            .filter(|block| block.tag() == "CERTIFICATE")
            .collect();

        let leaf = certs.first().ok_or(CertificateError::NoCertificate)?;
        Self::from_der(leaf.contents(), certs.len())
    }

    /// Inspect a single DER certificate.
    pub fn from_der(der: &[u8], chain_length: usize) -> Result<Self, CertificateError> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| CertificateError::X509(e.to_string()))?;

        let validity = cert.validity();
        let not_before = to_utc(validity.not_before.timestamp())?;
        let not_after = to_utc(validity.not_after.timestamp())?;

        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: hex::encode(cert.raw_serial()),
            not_before,
            not_after,
            common_names: common_names(&cert),
            dns_names: dns_names(&cert)?,
            fingerprint_sha256: fingerprint(der),
            chain_length,
            spki: cert.public_key().raw.to_vec(),
        })
    }

    /// Whether `now` falls inside the validity window.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    /// Whole days until expiry; negative once expired.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }

    /// Whether the subject CN or a DNS SAN covers `domain`.
    pub fn covers_domain(&self, domain: &str) -> bool {
        self.names().any(|name| name_matches(name, domain))
    }

    /// All names the certificate claims, SANs first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dns_names
            .iter()
            .chain(self.common_names.iter())
            .map(String::as_str)
    }

    /// Check the validity window at `now`.
    pub fn check_window(&self, now: DateTime<Utc>) -> Result<(), CertificateError> {
        if now > self.not_after {
            return Err(CertificateError::Expired {
                not_after: self.not_after,
            });
        }
        if now < self.not_before {
            return Err(CertificateError::NotYetValid {
                not_before: self.not_before,
            });
        }
        Ok(())
    }

    /// Check that `domain` is covered.
    pub fn check_domain(&self, domain: &str) -> Result<(), CertificateError> {
        if self.covers_domain(domain) {
            return Ok(());
        }
        Err(CertificateError::DomainMismatch {
            domain: domain.to_string(),
            names: self.names().collect::<Vec<_>>().join(", "),
        })
    }

    /// Check that `key_pem` holds the private half of this certificate.
    pub fn check_key(&self, key_pem: &[u8]) -> Result<KeyCheck, CertificateError> {
        let key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| CertificateError::InvalidKey(e.to_string()))?
            .ok_or(CertificateError::MissingKey)?;

        let public = match public_key_of(key) {
            Ok(Some(public)) => public,
            Ok(None) => {
                return Ok(KeyCheck::Unverified(
                    "key type does not expose its public key".to_string(),
                ))
            }
            Err(reason) => return Ok(KeyCheck::Unverified(reason)),
        };

        if public == self.spki {
            Ok(KeyCheck::Matched)
        } else {
            Err(CertificateError::KeyMismatch)
        }
    }
}

/// Outcome of pairing a private key with a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyCheck {
    /// Key's public half equals the certificate's.
    Matched,
    /// Key parsed, but pairing could not be confirmed.
    Unverified(String),
}

/// A staged key/chain pair that passed every check.
#[derive(Debug, Clone)]
pub struct ValidatedPair {
    pub info: CertificateInfo,
    pub key_check: KeyCheck,
}

/// Validate a key/chain pair for `domain` at `now`.
pub fn validate_pair(
    chain_pem: &[u8],
    key_pem: &[u8],
    domain: &str,
    now: DateTime<Utc>,
) -> Result<ValidatedPair, CertificateError> {
    let info = CertificateInfo::from_pem(chain_pem)?;
    info.check_window(now)?;
    info.check_domain(domain)?;
    let key_check = info.check_key(key_pem)?;

    Ok(ValidatedPair { info, key_check })
}

/// SHA-256 fingerprint of DER bytes, lowercase hex.
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Match a certificate name against a hostname.
///
/// `*.example.com` covers exactly one extra label.
pub fn name_matches(pattern: &str, domain: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();

    match pattern.strip_prefix("*.") {
        Some(suffix) => match domain.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest == suffix,
            None => false,
        },
        None => pattern == domain,
    }
}

fn to_utc(timestamp: i64) -> Result<DateTime<Utc>, CertificateError> {
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| CertificateError::X509(format!("timestamp {timestamp} out of range")))
}

fn common_names(cert: &X509Certificate<'_>) -> Vec<String> {
    cert.subject()
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .map(str::to_string)
        .collect()
}

fn dns_names(cert: &X509Certificate<'_>) -> Result<Vec<String>, CertificateError> {
    let san = cert
        .subject_alternative_name()
        .map_err(|e| CertificateError::X509(e.to_string()))?;

    Ok(san
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default())
}

fn public_key_of(key: PrivateKeyDer<'static>) -> Result<Option<Vec<u8>>, String> {
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    let signing_key = provider
        .key_provider
        .load_private_key(key)
        .map_err(|e| format!("unsupported private key: {e}"))?;

    Ok(signing_key.public_key().map(|spki| spki.to_vec()))
}
