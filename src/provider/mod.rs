//! # Provider Modules
//!
//! Backend adapters that read or write the TLS credential.
//!
//! Each adapter implements one or both capabilities:
//! - [`Fetcher`] reads the authoritative credential from a source backend
//! - [`Syncer`] makes a destination backend hold a given credential
//!
//! The reconciliation loop only ever sees these traits.

use anyhow::Result;
use async_trait::async_trait;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod gcp;
pub mod kubernetes;

/// A certificate / private key pair, treated as opaque bytes.
///
/// A fresh value is fetched every iteration and wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    certificate: Vec<u8>,
    private_key: Vec<u8>,
}

impl Credential {
    #[must_use]
    pub fn new(certificate: Vec<u8>, private_key: Vec<u8>) -> Self {
        Self {
            certificate,
            private_key,
        }
    }

    #[must_use]
    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    #[must_use]
    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("certificate_len", &self.certificate.len())
            .field("private_key", &"***")
            .finish()
    }
}

/// Reads the current credential from a source backend
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Return both halves of the credential or fail; never a partial pair.
    async fn fetch(&self) -> Result<Credential>;
}

/// Reconciles a destination backend towards a credential
#[async_trait]
pub trait Syncer: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Make the backend hold `credential`.
    ///
    /// Must be idempotent: a second call with the same credential performs no
    /// mutating request.
    async fn sync(&self, credential: &Credential) -> Result<()>;
}
