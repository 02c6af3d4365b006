use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::client::danger::HandshakeSignatureValid;
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, SignatureScheme};
use seclink_common::policy::{classify, ValidationReport, Verdict};

/// Client certificate policy of the echo server.
///
/// A certificate is always requested. Whether one must be presented follows
/// the immutable per-server configuration; when one is presented, trust
/// evaluation is delegated to a WebPKI verifier and a failure is logged but
/// NOT rejected. The only hard rejection is absence-when-required, which the
/// TLS engine enforces through `client_auth_mandatory`.
///
/// This permissiveness reproduces the observed behavior of the system being
/// demonstrated. It means a present-but-untrusted certificate is accepted
/// with a warning; do not reuse this verifier outside demonstrations.
#[derive(Debug)]
pub struct PresenceClientVerifier {
    inner: Arc<dyn ClientCertVerifier>,
    require_client_cert: bool,
    report: ValidationReport,
}

impl PresenceClientVerifier {
    pub fn new(
        roots: Arc<RootCertStore>,
        require_client_cert: bool,
        report: ValidationReport,
    ) -> Result<Arc<Self>> {
        let inner = WebPkiClientVerifier::builder(roots)
            .build()
            .context("Failed to build client certificate verifier")?;
        Ok(Arc::new(Self {
            inner,
            require_client_cert,
            report,
        }))
    }
}

impl ClientCertVerifier for PresenceClientVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        self.require_client_cert
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        match self.inner.verify_client_cert(end_entity, intermediates, now) {
            Ok(verified) => {
                tracing::info!("Client certificate passed trust evaluation");
                self.report.record(Verdict::Accept);
                Ok(verified)
            }
            Err(err) => {
                let policy = classify(&err);
                tracing::warn!(
                    "Client certificate failed trust evaluation ({policy}); accepting anyway"
                );
                self.report.record(Verdict::Accept);
                Ok(ClientCertVerified::assertion())
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
