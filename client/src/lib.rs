//! Seclink Echo Client Library
//!
//! An interactive TLS client for the seclink echo server. The client
//! resolves its certificate from the local store by thumbprint, validates
//! the server's identity fail-closed against the store's trust anchors, and
//! exchanges newline-delimited UTF-8 text over the established session.
//!
//! # Example
//!
//! ```no_run
//! use seclink_client::EchoClient;
//! use seclink_common::config::ClientSettings;
//!
//! # fn main() -> anyhow::Result<()> {
//! let settings = ClientSettings::load("client.json")?;
//! let mut client = EchoClient::new(settings)?;
//! client.connect()?;
//!
//! if let Some(reply) = client.exchange("ping")? {
//!     println!("{reply}");
//! }
//!
//! client.disconnect()?;
//! # Ok(())
//! # }
//! ```

mod client;
mod verifier;

pub use client::EchoClient;
pub use verifier::ReportingServerVerifier;
// Re-export commonly used types from seclink-common for convenience
pub use seclink_common::{ClientSettings, PolicyError, Verdict};
