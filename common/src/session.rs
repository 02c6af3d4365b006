use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use rustls::pki_types::CertificateDer;
use rustls::{ClientConnection, Connection, ProtocolVersion, ServerConnection, SupportedCipherSuite};

/// Ciphertext is pulled from the wire in chunks of this size, matching the
/// application read buffer of the original programs.
pub const READ_CHUNK: usize = 4096;

/// Upper bound on a single reassembled line. A peer that never sends the
/// terminator cannot grow the buffer past this.
pub const MAX_LINE: usize = 1024 * 1024;

/// A blocking TLS session over a TCP socket.
///
/// The session is line-oriented: `send_line` writes UTF-8 text terminated by
/// a single `\n`, and `recv_line` reassembles incoming bytes across reads
/// until the terminator arrives. At most one handshake runs per session; the
/// constructors drive it to completion before returning.
pub struct SecureSession {
    socket: TcpStream,
    tls: Connection,
    pending: Vec<u8>,
}

impl SecureSession {
    /// Wrap an accepted socket in a server-side session and complete the
    /// handshake.
    pub fn from_server(socket: TcpStream, tls: ServerConnection) -> Result<Self> {
        let mut session = Self {
            socket,
            tls: Connection::Server(tls),
            pending: Vec::new(),
        };
        session.complete_handshake()?;
        Ok(session)
    }

    /// Wrap a connected socket in a client-side session and complete the
    /// handshake.
    pub fn from_client(socket: TcpStream, tls: ClientConnection) -> Result<Self> {
        let mut session = Self {
            socket,
            tls: Connection::Client(tls),
            pending: Vec::new(),
        };
        session.complete_handshake()?;
        Ok(session)
    }

    /// Drive the handshake until the session is established. A peer that
    /// closes the socket mid-handshake produces an error, not a hang.
    fn complete_handshake(&mut self) -> Result<()> {
        while self.tls.is_handshaking() {
            while self.tls.wants_write() {
                self.tls
                    .write_tls(&mut self.socket)
                    .context("Failed to send handshake data")?;
            }

            if self.tls.is_handshaking() && self.tls.wants_read() {
                let read = self
                    .tls
                    .read_tls(&mut self.socket)
                    .context("Failed to read handshake data")?;
                if read == 0 {
                    bail!("Connection closed during TLS handshake");
                }
                if let Err(err) = self.tls.process_new_packets() {
                    // Push the pending alert out before surfacing the error
                    // so the peer learns why the handshake died.
                    while self.tls.wants_write() {
                        if self.tls.write_tls(&mut self.socket).is_err() {
                            break;
                        }
                    }
                    return Err(anyhow!("TLS handshake failed: {err}"));
                }
            }
        }

        while self.tls.wants_write() {
            self.tls
                .write_tls(&mut self.socket)
                .context("Failed to flush handshake data")?;
        }
        Ok(())
    }

    /// Whether the handshake has completed and application data can flow.
    pub fn is_established(&self) -> bool {
        !self.tls.is_handshaking()
    }

    /// Negotiated protocol version, once established.
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.tls.protocol_version()
    }

    /// Negotiated cipher suite, once established.
    pub fn cipher_suite(&self) -> Option<SupportedCipherSuite> {
        self.tls.negotiated_cipher_suite()
    }

    /// The certificate chain the peer presented, if any.
    pub fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        self.tls.peer_certificates()
    }

    /// Whether the session is running as the server side.
    pub fn is_server(&self) -> bool {
        matches!(self.tls, Connection::Server(_))
    }

    /// The read deadline configured on the underlying socket.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.socket.read_timeout().ok().flatten()
    }

    /// Send one line of text. The text must not contain the terminator
    /// itself; an empty line is valid and occupies one byte on the wire.
    pub fn send_line(&mut self, text: &str) -> Result<()> {
        if text.contains('\n') {
            bail!("Text to send must not contain a newline");
        }
        if text.len() > MAX_LINE {
            bail!("Refusing to send a line larger than {MAX_LINE} bytes");
        }

        let mut framed = Vec::with_capacity(text.len() + 1);
        framed.extend_from_slice(text.as_bytes());
        framed.push(b'\n');

        self.write_all(&framed).context("Failed to send text")?;
        self.flush().context("Failed to flush session")?;
        Ok(())
    }

    /// Receive one line of text, reassembling across reads until the
    /// terminator arrives. Returns `Ok(None)` on a clean close between
    /// lines; a close mid-line is an error.
    pub fn recv_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            if self.pending.len() > MAX_LINE {
                bail!("Peer sent more than {MAX_LINE} bytes without a line terminator");
            }

            let mut buf = [0u8; READ_CHUNK];
            let read = self.read(&mut buf).context("Failed to read from session")?;
            if read == 0 {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                bail!("Connection closed in the middle of a line");
            }
            self.pending.extend_from_slice(&buf[..read]);
        }
    }

    /// Announce the end of the session to the peer and flush.
    pub fn close(&mut self) -> Result<()> {
        self.tls.send_close_notify();
        while self.tls.wants_write() {
            self.tls
                .write_tls(&mut self.socket)
                .context("Failed to send close notification")?;
        }
        self.socket.flush().context("Failed to flush socket")?;
        Ok(())
    }
}

impl Read for SecureSession {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // Buffered plaintext first. The reader signals "nothing buffered
            // yet" as WouldBlock, which sends us to the wire below.
            match self.tls.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if !self.tls.wants_read() {
                return Ok(0);
            }

            match self.tls.read_tls(&mut self.socket) {
                // Peer closed the socket. Without a close_notify this is
                // strictly a truncation, but the echo pair treats it as EOF.
                Ok(0) => return Ok(0),
                Ok(_) => {
                    self.tls
                        .process_new_packets()
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Write for SecureSession {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.tls.writer().write(buf)?;
        while self.tls.wants_write() {
            self.tls.write_tls(&mut self.socket)?;
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tls.writer().flush()?;
        while self.tls.wants_write() {
            self.tls.write_tls(&mut self.socket)?;
        }
        self.socket.flush()
    }
}
