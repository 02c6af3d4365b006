use std::sync::{Arc, Mutex};

use rustls::CertificateError;
use thiserror::Error;

/// Classification of a handshake validation failure, mirroring the policy
/// error flags a platform TLS engine reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The peer presented no certificate although one was required
    #[error("peer presented no certificate")]
    CertificateMissing,
    /// The certificate is not valid for the expected hostname
    #[error("certificate name does not match the expected hostname")]
    NameMismatch,
    /// No trust path from the certificate to a configured anchor
    #[error("certificate chain is not trusted")]
    ChainUntrusted,
    /// Revocation checking failed or the certificate is revoked
    #[error("certificate revocation check failed")]
    Revoked,
    /// The certificate is outside its validity window
    #[error("certificate is outside its validity period")]
    Expired,
    /// Any other handshake validation failure
    #[error("handshake validation failed: {0}")]
    Other(String),
}

/// The typed outcome of one handshake validation. Produced once per
/// handshake and never persisted across sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The peer was accepted (possibly with logged warnings)
    Accept,
    /// The peer was rejected for the given policy reason
    Reject(PolicyError),
}

/// Map a rustls handshake error onto the policy taxonomy.
pub fn classify(err: &rustls::Error) -> PolicyError {
    match err {
        rustls::Error::NoCertificatesPresented => PolicyError::CertificateMissing,
        rustls::Error::InvalidCertificate(cert_err) => match cert_err {
            CertificateError::NotValidForName
            | CertificateError::NotValidForNameContext { .. } => PolicyError::NameMismatch,
            CertificateError::UnknownIssuer
            | CertificateError::BadSignature
            | CertificateError::BadEncoding
            | CertificateError::InvalidPurpose
            | CertificateError::ApplicationVerificationFailure => PolicyError::ChainUntrusted,
            CertificateError::Revoked
            | CertificateError::UnknownRevocationStatus
            | CertificateError::ExpiredRevocationList => PolicyError::Revoked,
            CertificateError::Expired | CertificateError::NotValidYet => PolicyError::Expired,
            other => PolicyError::Other(format!("{other:?}")),
        },
        other => PolicyError::Other(other.to_string()),
    }
}

/// Shared cell recording the verdict of the most recent handshake.
///
/// Verifiers run behind the TLS engine, so the programs observe their
/// decision through this handle rather than a return value.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    last: Arc<Mutex<Option<Verdict>>>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of a handshake validation.
    pub fn record(&self, verdict: Verdict) {
        if let Ok(mut slot) = self.last.lock() {
            *slot = Some(verdict);
        }
    }

    /// The verdict of the most recent handshake, if one has run.
    pub fn last(&self) -> Option<Verdict> {
        self.last.lock().ok().and_then(|slot| slot.clone())
    }
}
