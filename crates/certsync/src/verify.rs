//! Post-deployment verification
//!
//! Read-only inspection of the installed pair. Each check runs on its own
//! and reports pass, warn, fail or skip; the run passes when nothing failed.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cert::{CertificateError, CertificateInfo, KeyCheck};
use crate::config::CertSyncConfig;
use crate::error::{CertSyncError, CertSyncResult};
use crate::probe::served_certificate;
use crate::service::ServiceControl;

/// Result of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Warn,
    Fail,
    Skip,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pass => "PASS",
            Self::Warn => "WARN",
            Self::Fail => "FAIL",
            Self::Skip => "SKIP",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub outcome: Outcome,
    pub detail: String,
}

impl Check {
    fn new(name: &'static str, outcome: Outcome, detail: impl Into<String>) -> Self {
        Self {
            name,
            outcome,
            detail: detail.into(),
        }
    }
}

/// Everything the verifier found.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub cert_path: PathBuf,
    pub certificate: CertificateInfo,
    /// Modification time of the live chain
    pub modified: Option<DateTime<Local>>,
    pub checks: Vec<Check>,
    pub passed: bool,
}

impl VerifyReport {
    pub fn check(&self, name: &str) -> Option<&Check> {
        self.checks.iter().find(|check| check.name == name)
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cert = &self.certificate;
        writeln!(f, "Certificate: {}", self.cert_path.display())?;
        writeln!(f, "  Subject:     {}", cert.subject)?;
        writeln!(f, "  Issuer:      {}", cert.issuer)?;
        writeln!(f, "  Serial:      {}", cert.serial)?;
        writeln!(f, "  SHA-256:     {}", cert.fingerprint_sha256)?;
        writeln!(f, "  Not before:  {}", cert.not_before)?;
        writeln!(f, "  Not after:   {}", cert.not_after)?;
        if let Some(modified) = self.modified {
            writeln!(f, "  Modified:    {}", modified.format("%Y-%m-%d %H:%M:%S"))?;
        }
        writeln!(f, "  Names:       {}", cert.names().collect::<Vec<_>>().join(", "))?;
        writeln!(f)?;
        writeln!(f, "Checks:")?;
        for check in &self.checks {
            writeln!(f, "  [{}] {}: {}", check.outcome, check.name, check.detail)?;
        }
        writeln!(f)?;
        write!(
            f,
            "Overall: {}",
            if self.passed { "PASSED" } else { "FAILED" }
        )
    }
}

/// Inspects the live pair, the service and the served certificate.
pub struct Verifier<S> {
    config: CertSyncConfig,
    service: S,
}

impl<S: ServiceControl> Verifier<S> {
    pub fn new(config: CertSyncConfig, service: S) -> Self {
        Self { config, service }
    }

    pub async fn verify(&self) -> CertSyncResult<VerifyReport> {
        let path = &self.config.cert_path;
        let read_error = |reason: String| CertSyncError::FileRead {
            path: path.clone(),
            reason,
        };

        let chain = fs::read(path).map_err(|e| read_error(e.to_string()))?;
        let certificate = CertificateInfo::from_pem(&chain).map_err(|e| read_error(e.to_string()))?;
        let modified = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Local>::from);

        let now = Utc::now();
        let checks = vec![
            self.check_validity(&certificate, now),
            self.check_expiry_horizon(&certificate, now),
            self.check_domain(&certificate),
            self.check_key_pair(&certificate),
            self.check_service().await,
            self.check_endpoint(&certificate).await,
        ];

        for check in &checks {
            match check.outcome {
                Outcome::Fail => warn!(check = check.name, detail = %check.detail, "Check failed"),
                _ => debug!(check = check.name, outcome = %check.outcome, detail = %check.detail, "Check finished"),
            }
        }

        let passed = checks.iter().all(|check| check.outcome != Outcome::Fail);
        info!(passed, subject = %certificate.subject, "Verification finished");

        Ok(VerifyReport {
            cert_path: path.clone(),
            certificate,
            modified,
            checks,
            passed,
        })
    }

    fn check_validity(&self, cert: &CertificateInfo, now: DateTime<Utc>) -> Check {
        match cert.check_window(now) {
            Ok(()) => Check::new("validity", Outcome::Pass, format!("valid until {}", cert.not_after)),
            Err(e) => Check::new("validity", Outcome::Fail, e.to_string()),
        }
    }

    fn check_expiry_horizon(&self, cert: &CertificateInfo, now: DateTime<Utc>) -> Check {
        if !cert.is_valid_at(now) {
            return Check::new("expiry-horizon", Outcome::Skip, "certificate not currently valid");
        }

        let days = cert.days_remaining(now);
        let detail = format!("{days} days remaining");
        if days < self.config.expiry_warning_days {
            Check::new("expiry-horizon", Outcome::Warn, detail)
        } else {
            Check::new("expiry-horizon", Outcome::Pass, detail)
        }
    }

    fn check_domain(&self, cert: &CertificateInfo) -> Check {
        match cert.check_domain(&self.config.domain) {
            Ok(()) => Check::new("domain", Outcome::Pass, format!("covers {}", self.config.domain)),
            Err(e) => Check::new("domain", Outcome::Fail, e.to_string()),
        }
    }

    fn check_key_pair(&self, cert: &CertificateInfo) -> Check {
        let key = match fs::read(&self.config.key_path) {
            Ok(key) => key,
            Err(e) => {
                return Check::new(
                    "key-pair",
                    Outcome::Warn,
                    format!("cannot read {}: {e}", self.config.key_path.display()),
                )
            }
        };

        match cert.check_key(&key) {
            Ok(KeyCheck::Matched) => Check::new("key-pair", Outcome::Pass, "private key matches certificate"),
            Ok(KeyCheck::Unverified(reason)) => Check::new("key-pair", Outcome::Warn, reason),
            Err(CertificateError::KeyMismatch) => {
                Check::new("key-pair", Outcome::Fail, CertificateError::KeyMismatch.to_string())
            }
            Err(e) => Check::new("key-pair", Outcome::Warn, e.to_string()),
        }
    }

    async fn check_service(&self) -> Check {
        let name = &self.config.service_name;
        match self.service.is_active(name).await {
            Ok(true) => Check::new("service", Outcome::Pass, format!("{name} is active")),
            Ok(false) => Check::new("service", Outcome::Warn, format!("{name} is not active")),
            Err(e) => Check::new("service", Outcome::Warn, e.to_string()),
        }
    }

    async fn check_endpoint(&self, cert: &CertificateInfo) -> Check {
        if !self.config.probe_enabled {
            return Check::new("live-endpoint", Outcome::Skip, "probing disabled");
        }

        let served = served_certificate(
            &self.config.probe_host,
            self.config.service_port,
            &self.config.domain,
            self.config.connect_timeout(),
        )
        .await;

        match served {
            Ok(served) if served.fingerprint_sha256 == cert.fingerprint_sha256 => Check::new(
                "live-endpoint",
                Outcome::Pass,
                "served certificate matches the installed one",
            ),
            Ok(served) => Check::new(
                "live-endpoint",
                Outcome::Fail,
                format!(
                    "served certificate {} differs from installed {}; restart {}",
                    served.fingerprint_sha256, cert.fingerprint_sha256, self.config.service_name
                ),
            ),
            Err(e) => Check::new("live-endpoint", Outcome::Warn, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::tests::serve_once;
    use crate::service::MemoryService;
    use crate::test_support::{config, install_live, issue, Validity, DOMAIN};

    #[tokio::test]
    async fn test_good_pair_passes() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config(dir.path(), &[]);
        install_live(&config, &issue(&[DOMAIN], Validity::Current));

        let report = Verifier::new(config, MemoryService::new())
            .verify()
            .await
            .unwrap();

        assert!(report.passed);
        for name in ["validity", "expiry-horizon", "domain", "key-pair", "service"] {
            assert_eq!(report.check(name).unwrap().outcome, Outcome::Pass, "{name}");
        }
        assert_eq!(report.check("live-endpoint").unwrap().outcome, Outcome::Skip);
        assert!(report.modified.is_some());
        assert!(report.to_string().ends_with("Overall: PASSED"));
    }

    #[tokio::test]
    async fn test_expired_pair_fails_validity() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config(dir.path(), &[]);
        install_live(&config, &issue(&[DOMAIN], Validity::Expired));

        let report = Verifier::new(config, MemoryService::new())
            .verify()
            .await
            .unwrap();

        assert!(!report.passed);
        assert_eq!(report.check("validity").unwrap().outcome, Outcome::Fail);
        assert_eq!(report.check("expiry-horizon").unwrap().outcome, Outcome::Skip);
    }

    #[tokio::test]
    async fn test_wrong_domain_and_foreign_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config(dir.path(), &[]);
        let mut installed = issue(&["other.example.com"], Validity::Current);
        installed.key_pem = issue(&[DOMAIN], Validity::Current).key_pem;
        install_live(&config, &installed);

        let report = Verifier::new(config, MemoryService::new())
            .verify()
            .await
            .unwrap();

        assert!(!report.passed);
        assert_eq!(report.check("domain").unwrap().outcome, Outcome::Fail);
        assert_eq!(report.check("key-pair").unwrap().outcome, Outcome::Fail);
    }

    #[tokio::test]
    async fn test_inactive_service_only_warns() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config(dir.path(), &[]);
        install_live(&config, &issue(&[DOMAIN], Validity::Current));
        let service = MemoryService::new();
        service.set_active(false);

        let report = Verifier::new(config, service).verify().await.unwrap();

        assert!(report.passed);
        assert_eq!(report.check("service").unwrap().outcome, Outcome::Warn);
    }

    #[tokio::test]
    async fn test_stale_served_certificate_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let stale = issue(&[DOMAIN], Validity::Current);
        let port = serve_once(&stale).await.to_string();
        let config = config(
            dir.path(),
            &[("probe_enabled", "true"), ("service_port", port.as_str())],
        );
        install_live(&config, &issue(&[DOMAIN], Validity::Current));

        let report = Verifier::new(config, MemoryService::new())
            .verify()
            .await
            .unwrap();

        assert!(!report.passed);
        assert_eq!(report.check("live-endpoint").unwrap().outcome, Outcome::Fail);
    }

    #[tokio::test]
    async fn test_served_certificate_matches() {
        let dir = tempfile::TempDir::new().unwrap();
        let current = issue(&[DOMAIN], Validity::Current);
        let port = serve_once(&current).await.to_string();
        let config = config(
            dir.path(),
            &[("probe_enabled", "true"), ("service_port", port.as_str())],
        );
        install_live(&config, &current);

        let report = Verifier::new(config, MemoryService::new())
            .verify()
            .await
            .unwrap();

        assert!(report.passed);
        assert_eq!(report.check("live-endpoint").unwrap().outcome, Outcome::Pass);
    }

    #[tokio::test]
    async fn test_missing_certificate_is_file_read_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config(dir.path(), &[]);

        let err = Verifier::new(config, MemoryService::new())
            .verify()
            .await
            .unwrap_err();

        assert_eq!(err.step(), "file-read");
    }
}
