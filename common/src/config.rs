use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// The TCP port the echo pair uses unless configured otherwise
pub const DEFAULT_PORT: u16 = 56000;

const STORE_DIR_ENV: &str = "SECLINK_STORE_DIR";
const DEFAULT_STORE_DIR: &str = "store";

fn default_store_dir() -> PathBuf {
    let dir = env::var(STORE_DIR_ENV).unwrap_or(DEFAULT_STORE_DIR.to_string());
    PathBuf::from(dir)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_connect_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_true() -> bool {
    true
}

/// Settings for the echo server
///
/// The certificate is addressed by its SHA-256 thumbprint within the store
/// directory. Each connection sees an immutable copy of these settings; there
/// is no process-global mutable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Directory holding identity bundles and trust anchors
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    /// Thumbprint of the server certificate to present
    pub certificate: String,
    /// Whether a client certificate must be presented during the handshake
    #[serde(default)]
    pub require_client_cert: bool,
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-session read deadline in seconds; absent means block forever
    #[serde(default)]
    pub session_timeout_secs: Option<u64>,
}

/// Settings for the echo client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Directory holding identity bundles and trust anchors
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    /// Thumbprint of the client certificate to load
    pub certificate: String,
    /// Server address to connect to
    #[serde(default = "default_connect_addr")]
    pub address: String,
    /// Server port to connect to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Hostname the server certificate must be valid for
    pub target_host: String,
    /// Whether to present the loaded certificate during the handshake
    #[serde(default = "default_true")]
    pub offer_certificate: bool,
    /// Per-session read deadline in seconds; absent means block forever
    #[serde(default)]
    pub session_timeout_secs: Option<u64>,
}

impl ServerSettings {
    /// Load settings from a JSON file. Any failure here is startup-fatal.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json(path.as_ref())
    }
}

impl ClientSettings {
    /// Load settings from a JSON file. Any failure here is startup-fatal.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_json(path.as_ref())
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file {path:?}"))?;
    serde_json::from_str(&raw).with_context(|| format!("Malformed settings file {path:?}"))
}
