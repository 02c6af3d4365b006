//! Seclink Echo Server Library
//!
//! A TLS echo server that accepts one connection at a time, performs an
//! optionally mutually-authenticated handshake, and then runs an interactive
//! read-print / prompt-write loop until the peer disconnects, at which point
//! it returns to accepting.

use std::{
    io::{self, BufRead, Write},
    net::{TcpListener, TcpStream},
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use rustls::{ServerConfig, ServerConnection};
use seclink_common::{
    config::ServerSettings,
    diagnostics,
    policy::{ValidationReport, Verdict},
    session::SecureSession,
    store::CertStore,
};

mod verifier;

pub use verifier::PresenceClientVerifier;

/// The seclink echo server. Sessions are handled strictly one at a time;
/// nothing is shared between connections except the read-only TLS
/// configuration built at startup.
#[derive(Clone)]
pub struct EchoServer {
    tls_config: Arc<ServerConfig>,
    settings: ServerSettings,
    report: ValidationReport,
}

impl EchoServer {
    /// Create a server from settings. Every failure here is startup-fatal:
    /// the store must open, the certificate must resolve by thumbprint, and
    /// the trust anchors must load, all before any socket is bound.
    pub fn new(settings: ServerSettings) -> Result<Self> {
        // Install default crypto provider for rustls if not already installed
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        tracing::info!("Opening certificate store at {:?}", settings.store_dir);
        let store = CertStore::open_read_only(&settings.store_dir)?;

        let identity = store.find_by_fingerprint(&settings.certificate)?;
        tracing::info!("Loaded server certificate {}", identity.fingerprint);

        let roots = Arc::new(store.trust_anchors()?);
        tracing::info!("Loaded {} trust anchor(s)", roots.len());

        let report = ValidationReport::new();
        let client_verifier = PresenceClientVerifier::new(
            roots,
            settings.require_client_cert,
            report.clone(),
        )?;

        // No protocol version is pinned; rustls negotiates the best
        // available, like the system this demonstrates.
        let config = ServerConfig::builder()
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(identity.cert_chain, identity.key)
            .context("Failed to build TLS server configuration")?;

        Ok(Self {
            tls_config: Arc::new(config),
            settings,
            report,
        })
    }

    /// Bind the configured listen address.
    pub fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.settings.listen_addr, self.settings.port);
        let listener =
            TcpListener::bind(&addr).with_context(|| format!("Failed to bind {addr}"))?;
        tracing::info!("Listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Serve forever. Equivalent to `run_with_shutdown` with a flag nobody
    /// ever clears.
    pub fn run(&self) -> Result<()> {
        self.run_with_shutdown(Arc::new(AtomicBool::new(true)))
    }

    /// Serve until the shutdown flag is cleared. The accept call polls so a
    /// flipped flag is noticed within tens of milliseconds; each accepted
    /// session still runs to completion.
    pub fn run_with_shutdown(&self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let listener = self.bind()?;
        listener
            .set_nonblocking(true)
            .context("Failed to make listener interruptible")?;

        let stdin = io::stdin();
        let stdout = io::stdout();

        tracing::info!("Waiting for client");
        while shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) =
                        self.handle_client(stream, &mut stdin.lock(), &mut stdout.lock())
                    {
                        tracing::error!("Client session error: {e:#}");
                    }
                    tracing::info!("Waiting for client");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    tracing::error!("Connection error: {e}");
                }
            }
        }

        tracing::info!("Shutdown signal received, stopping gracefully");
        Ok(())
    }

    /// Handle one accepted connection: handshake, diagnostics, then the
    /// echo loop. Received lines are printed to `console`; replies are read
    /// one line at a time from `replies` (stdin in the binary, scripted
    /// input in tests).
    pub fn handle_client(
        &self,
        stream: TcpStream,
        replies: &mut dyn BufRead,
        console: &mut dyn Write,
    ) -> Result<()> {
        let peer = stream
            .peer_addr()
            .context("Failed to resolve peer address")?;
        tracing::info!("Accepted connection from {peer}");

        // The listener may hand out sockets inheriting its nonblocking mode.
        stream
            .set_nonblocking(false)
            .context("Failed to configure session socket")?;
        if let Some(secs) = self.settings.session_timeout_secs {
            stream
                .set_read_timeout(Some(Duration::from_secs(secs)))
                .context("Failed to apply session read deadline")?;
        }

        let conn = ServerConnection::new(self.tls_config.clone())?;
        let mut session = SecureSession::from_server(stream, conn)
            .context("TLS handshake with client failed")?;

        diagnostics::log_negotiated(&session);

        loop {
            tracing::info!("Waiting for data");
            let Some(text) = session.recv_line()? else {
                tracing::info!("Client disconnected");
                break;
            };

            writeln!(console, "{text}").context("Failed to print received text")?;

            write!(console, "Enter text to send: ").context("Failed to prompt")?;
            console.flush().context("Failed to flush console")?;

            let mut reply = String::new();
            let read = replies
                .read_line(&mut reply)
                .context("Failed to read reply")?;
            if read == 0 {
                tracing::info!("Console closed, ending session");
                break;
            }
            let reply = reply.trim_end_matches(|c| c == '\r' || c == '\n');
            session.send_line(reply)?;
        }

        let _ = session.close();
        Ok(())
    }

    /// Verdict of the most recent client-certificate validation.
    pub fn last_verdict(&self) -> Option<Verdict> {
        self.report.last()
    }

    /// The settings this server was built from.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}
