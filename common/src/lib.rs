//! Seclink Common Library
//!
//! This crate provides the pieces shared by the seclink echo server and
//! client. It includes:
//!
//! - Settings structures for both programs
//! - A read-only, fingerprint-addressed certificate store
//! - Validation policy types (typed handshake verdicts)
//! - A blocking TLS session wrapper over TCP
//! - Post-handshake diagnostic logging
//!
//! # Features
//!
//! - **Fingerprint lookup**: certificates are addressed by the SHA-256
//!   thumbprint of their DER encoding, the way platform stores address them
//! - **Line-oriented secure transport**: newline-delimited UTF-8 text over a
//!   rustls session, with multi-read reassembly for oversized lines
//! - **Typed validation outcomes**: handshake policy failures are classified
//!   into an explicit enum instead of a boolean plus side channels

/// Settings structures for the server and client programs
pub mod config;

/// Post-handshake diagnostic logging
pub mod diagnostics;

/// Handshake validation policy types
pub mod policy;

/// Blocking TLS session over TCP
pub mod session;

/// Read-only certificate store addressed by fingerprint
pub mod store;

// Re-export commonly used types for convenience
pub use config::{ClientSettings, ServerSettings, DEFAULT_PORT};
pub use policy::{PolicyError, ValidationReport, Verdict};
pub use session::{SecureSession, MAX_LINE, READ_CHUNK};
pub use store::{CertIdentity, CertStore, CertStoreError};
