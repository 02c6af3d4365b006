use std::{
    fs,
    io::BufReader,
    path::{Path, PathBuf},
};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use rustls_pemfile::{certs, private_key};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised by the certificate store. All of them are startup-fatal for
/// the programs using the store; there is no retry path.
#[derive(Debug, Error)]
pub enum CertStoreError {
    /// The store directory does not exist or is not a directory
    #[error("certificate store {0:?} cannot be opened read-only")]
    Unavailable(PathBuf),
    /// No certificate in the store matches the requested thumbprint
    #[error("no certificate in the store matches thumbprint {0:?}")]
    NotFound(String),
    /// The matching bundle has no usable private key next to it
    #[error("certificate {fingerprint} has no usable private key at {key_path:?}")]
    KeyMissing {
        fingerprint: String,
        key_path: PathBuf,
    },
    /// The store holds no parseable certificates to trust
    #[error("certificate store {0:?} contains no usable trust anchors")]
    NoAnchors(PathBuf),
    /// A store entry could not be read or parsed
    #[error("failed to read store entry {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A certificate identity resolved from the store: the presented chain, the
/// matching private key, and the canonical thumbprint it was found under.
pub struct CertIdentity {
    /// Certificate chain, leaf first
    pub cert_chain: Vec<CertificateDer<'static>>,
    /// Private key for the leaf certificate
    pub key: PrivateKeyDer<'static>,
    /// Canonical (lowercase hex SHA-256) thumbprint of the leaf
    pub fingerprint: String,
}

/// A read-only directory of PEM files acting as the local certificate store.
///
/// Identity bundles are `<name>.pem` (leaf first) paired with
/// `<name>.key.pem`. Every certificate in the directory is also a trust
/// anchor, so the store doubles as the trusted root set.
pub struct CertStore {
    dir: PathBuf,
}

/// SHA-256 thumbprint of a certificate's DER encoding, lowercase hex.
pub fn fingerprint(cert: &CertificateDer<'_>) -> String {
    hex::encode(Sha256::digest(cert.as_ref()))
}

/// Thumbprints are compared with separators stripped and case folded, so
/// `AB:CD:..` and `abcd..` address the same certificate.
fn normalize_fingerprint(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, ':' | ' '))
        .collect::<String>()
        .to_ascii_lowercase()
}

impl CertStore {
    /// Open the store read-only. Fails if the directory is absent, mirroring
    /// an open-existing-only store open.
    pub fn open_read_only<P: AsRef<Path>>(dir: P) -> Result<Self, CertStoreError> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(CertStoreError::Unavailable(dir));
        }
        Ok(Self { dir })
    }

    /// The directory this store reads from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Certificate bundle files in the store: `*.pem`, excluding key files.
    /// Sorted so lookups are deterministic when thumbprints collide.
    fn bundles(&self) -> Result<Vec<PathBuf>, CertStoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| CertStoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut bundles = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CertStoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            let is_pem = path.extension().is_some_and(|ext| ext == "pem");
            let is_key = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| stem.ends_with(".key"));
            if is_pem && !is_key {
                bundles.push(path);
            }
        }
        bundles.sort();
        Ok(bundles)
    }

    fn read_bundle(&self, path: &Path) -> Result<Vec<CertificateDer<'static>>, CertStoreError> {
        let pem = fs::read(path).map_err(|source| CertStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        certs(&mut BufReader::new(&*pem))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| CertStoreError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Find the first certificate whose leaf thumbprint matches, returning
    /// its chain and private key. This is a one-shot startup dependency: no
    /// sockets are touched and no retry is attempted.
    pub fn find_by_fingerprint(&self, wanted: &str) -> Result<CertIdentity, CertStoreError> {
        let wanted = normalize_fingerprint(wanted);

        for path in self.bundles()? {
            let chain = match self.read_bundle(&path) {
                Ok(chain) if !chain.is_empty() => chain,
                // Unreadable or empty bundles do not fail the lookup, they
                // just cannot match.
                _ => continue,
            };

            let leaf_fp = fingerprint(&chain[0]);
            if leaf_fp != wanted {
                continue;
            }

            let key_path = path.with_extension("key.pem");
            let key_pem = fs::read(&key_path).map_err(|_| CertStoreError::KeyMissing {
                fingerprint: leaf_fp.clone(),
                key_path: key_path.clone(),
            })?;
            let key = private_key(&mut BufReader::new(&*key_pem))
                .ok()
                .flatten()
                .ok_or(CertStoreError::KeyMissing {
                    fingerprint: leaf_fp.clone(),
                    key_path,
                })?;

            tracing::debug!("Resolved certificate {} from {:?}", leaf_fp, path);
            return Ok(CertIdentity {
                cert_chain: chain,
                key,
                fingerprint: leaf_fp,
            });
        }

        Err(CertStoreError::NotFound(wanted))
    }

    /// Collect every certificate in the store into a trust anchor set.
    pub fn trust_anchors(&self) -> Result<RootCertStore, CertStoreError> {
        let mut roots = RootCertStore::empty();
        for path in self.bundles()? {
            if let Ok(chain) = self.read_bundle(&path) {
                roots.add_parsable_certificates(chain);
            }
        }

        if roots.is_empty() {
            return Err(CertStoreError::NoAnchors(self.dir.clone()));
        }
        Ok(roots)
    }
}
