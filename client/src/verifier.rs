use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use seclink_common::{
    diagnostics,
    policy::{classify, ValidationReport, Verdict},
};

/// Server certificate policy of the echo client: fail closed.
///
/// Trust evaluation is delegated to a WebPKI verifier against the store's
/// anchors. A clean evaluation is accepted immediately; any policy error is
/// classified, every element of the presented chain is logged for
/// diagnostics, and the handshake is rejected.
#[derive(Debug)]
pub struct ReportingServerVerifier {
    inner: Arc<WebPkiServerVerifier>,
    report: ValidationReport,
}

impl ReportingServerVerifier {
    pub fn new(roots: Arc<RootCertStore>, report: ValidationReport) -> Result<Arc<Self>> {
        let inner = WebPkiServerVerifier::builder(roots)
            .build()
            .context("Failed to build server certificate verifier")?;
        Ok(Arc::new(Self { inner, report }))
    }
}

impl ServerCertVerifier for ReportingServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => {
                self.report.record(Verdict::Accept);
                Ok(verified)
            }
            Err(err) => {
                let policy = classify(&err);
                tracing::error!(
                    "Server certificate rejected for {:?}: {}",
                    server_name,
                    policy
                );
                for (index, cert) in std::iter::once(end_entity)
                    .chain(intermediates.iter())
                    .enumerate()
                {
                    tracing::error!("Chain[{index}]: {}", diagnostics::describe_certificate(cert));
                }
                self.report.record(Verdict::Reject(policy));
                Err(err)
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
