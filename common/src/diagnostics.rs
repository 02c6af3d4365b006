use rustls::pki_types::CertificateDer;
use x509_cert::der::Decode;
use x509_cert::Certificate;

use crate::session::SecureSession;
use crate::store;

/// Human-readable one-liner for a certificate: thumbprint, subject, issuer,
/// and validity window. Unparseable certificates still get a thumbprint.
pub fn describe_certificate(cert: &CertificateDer<'_>) -> String {
    let fp = store::fingerprint(cert);
    match Certificate::from_der(cert.as_ref()) {
        Ok(parsed) => {
            let tbs = &parsed.tbs_certificate;
            format!(
                "{} subject=[{}] issuer=[{}] valid {:?} to {:?}",
                fp,
                tbs.subject,
                tbs.issuer,
                tbs.validity.not_before.to_system_time(),
                tbs.validity.not_after.to_system_time(),
            )
        }
        Err(_) => format!("{fp} (unparseable certificate)"),
    }
}

/// Log the parameters negotiated for an established session: protocol,
/// cipher suite, peer certificate details, and the configured read deadline.
pub fn log_negotiated(session: &SecureSession) {
    let role = if session.is_server() { "server" } else { "client" };
    tracing::info!(
        "Session established as {} (protocol {:?}, cipher suite {:?})",
        role,
        session.protocol_version(),
        session.cipher_suite().map(|suite| suite.suite()),
    );

    match session.peer_certificates() {
        Some(chain) if !chain.is_empty() => {
            tracing::info!("Peer presented {} certificate(s)", chain.len());
            tracing::info!("Peer leaf: {}", describe_certificate(&chain[0]));
        }
        _ => tracing::info!("Peer presented no certificate"),
    }

    match session.read_timeout() {
        Some(deadline) => tracing::info!("Read deadline: {:?}", deadline),
        None => tracing::info!("Read deadline: none (reads block indefinitely)"),
    }
}
