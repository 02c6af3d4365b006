use std::{net::TcpStream, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig as RustlsClientConfig, ClientConnection};
use seclink_common::{
    config::ClientSettings,
    diagnostics,
    policy::{ValidationReport, Verdict},
    session::SecureSession,
    store::CertStore,
};

use crate::verifier::ReportingServerVerifier;

/// Interactive TLS echo client.
///
/// Construction resolves the client certificate by thumbprint and builds the
/// TLS configuration; `connect` establishes one secure session at a time.
pub struct EchoClient {
    tls_config: Arc<RustlsClientConfig>,
    settings: ClientSettings,
    report: ValidationReport,
    connection: Option<SecureSession>,
}

impl EchoClient {
    /// Create a client from settings. Every failure here is startup-fatal
    /// and happens before any socket is opened.
    pub fn new(settings: ClientSettings) -> Result<Self> {
        // Install default crypto provider for rustls if not already installed
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        tracing::info!("Opening certificate store at {:?}", settings.store_dir);
        let store = CertStore::open_read_only(&settings.store_dir)?;

        // The identity lookup runs even when the certificate is never
        // offered, preserving the observed startup contract.
        let identity = store.find_by_fingerprint(&settings.certificate)?;
        tracing::info!("Loaded client certificate {}", identity.fingerprint);

        let roots = Arc::new(store.trust_anchors()?);
        let report = ValidationReport::new();
        let verifier = ReportingServerVerifier::new(roots, report.clone())?;

        let builder = RustlsClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier);
        let config = if settings.offer_certificate {
            builder
                .with_client_auth_cert(identity.cert_chain, identity.key)
                .context("Failed to attach client certificate")?
        } else {
            builder.with_no_client_auth()
        };

        Ok(Self {
            tls_config: Arc::new(config),
            settings,
            report,
            connection: None,
        })
    }

    /// Connect and perform the handshake against the configured target
    /// hostname. Rejection by the server verifier fails closed here.
    pub fn connect(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.settings.address, self.settings.port);
        tracing::info!("Connecting to {addr}");
        let stream =
            TcpStream::connect(&addr).with_context(|| format!("Failed to connect to {addr}"))?;

        if let Some(secs) = self.settings.session_timeout_secs {
            stream
                .set_read_timeout(Some(Duration::from_secs(secs)))
                .context("Failed to apply session read deadline")?;
        }

        let server_name = ServerName::try_from(self.settings.target_host.clone())
            .map_err(|_| anyhow!("Invalid target host {:?}", self.settings.target_host))?;
        let conn = ClientConnection::new(self.tls_config.clone(), server_name)?;

        let session = SecureSession::from_client(stream, conn)
            .context("TLS handshake with server failed")?;
        diagnostics::log_negotiated(&session);

        self.connection = Some(session);
        Ok(())
    }

    /// Whether a secure session is currently established.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Send one line and wait for the server's reply (write-then-read, the
    /// order this client has always used). `Ok(None)` means the server
    /// closed the session.
    pub fn exchange(&mut self, line: &str) -> Result<Option<String>> {
        let session = self
            .connection
            .as_mut()
            .ok_or_else(|| anyhow!("Not connected to server"))?;

        session.send_line(line)?;
        session.recv_line()
    }

    /// Close the session, announcing the end to the server.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(mut session) = self.connection.take() {
            let _ = session.close();
            tracing::info!("Disconnected");
        }
        Ok(())
    }

    /// Typed outcome of the most recent server-certificate validation.
    pub fn last_verdict(&self) -> Option<Verdict> {
        self.report.last()
    }
}

impl Drop for EchoClient {
    fn drop(&mut self) {
        if self.is_connected() {
            let _ = self.disconnect();
        }
    }
}
