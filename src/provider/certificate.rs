//! Certificate store.
//!
//! Providers reference a certificate/key pair by id only. The pair is
//! resolved here whenever a client identity has to be presented.

use std::fs;
use std::io;

use dashmap::DashMap;
use thiserror::Error;

use super::store::ProviderStore;
use crate::config::CertificateConfig;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate `{0}` not found")]
    NotFound(String),
    #[error("failed to read `{path}`: {source}")]
    Io { path: String, source: io::Error },
    #[error("certificate `{id}` is not usable: {reason}")]
    Invalid { id: String, reason: String },
    #[error("certificate `{id}` rejected by TLS backend: {source}")]
    Identity { id: String, source: reqwest::Error },
}

/// PEM encoded certificate chain and private key.
#[derive(Clone)]
pub struct CertificateKeyPair {
    pub id: String,
    pub name: String,
    certificate_pem: Vec<u8>,
    key_pem: Vec<u8>,
}

impl std::fmt::Debug for CertificateKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateKeyPair")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl CertificateKeyPair {
    /// Build a pair from PEM text, checking both halves parse.
    pub fn from_pem(
        id: impl Into<String>,
        name: impl Into<String>,
        certificate_pem: Vec<u8>,
        key_pem: Vec<u8>,
    ) -> Result<Self, CertificateError> {
        let id = id.into();
        let invalid = |reason: String| CertificateError::Invalid {
            id: id.clone(),
            reason,
        };

        let certs = rustls_pemfile::certs(&mut certificate_pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid(format!("certificate PEM: {e}")))?;
        if certs.is_empty() {
            return Err(invalid("no certificate in PEM".to_string()));
        }

        match rustls_pemfile::private_key(&mut key_pem.as_slice()) {
            Ok(Some(_)) => {}
            Ok(None) => return Err(invalid("no private key in PEM".to_string())),
            Err(e) => return Err(invalid(format!("key PEM: {e}"))),
        }

        Ok(Self {
            id,
            name: name.into(),
            certificate_pem,
            key_pem,
        })
    }

    /// Read a pair from the files named in the configuration.
    pub fn load(config: &CertificateConfig) -> Result<Self, CertificateError> {
        let read = |path: &str| {
            fs::read(path).map_err(|source| CertificateError::Io {
                path: path.to_string(),
                source,
            })
        };
        let certificate_pem = read(&config.certificate_path)?;
        let key_pem = read(&config.key_path)?;
        Self::from_pem(&config.id, &config.name, certificate_pem, key_pem)
    }

    /// Client identity for outbound TLS connections.
    pub fn identity(&self) -> Result<reqwest::Identity, CertificateError> {
        let mut pem = self.certificate_pem.clone();
        pem.push(b'\n');
        pem.extend_from_slice(&self.key_pem);
        reqwest::Identity::from_pem(&pem).map_err(|source| CertificateError::Identity {
            id: self.id.clone(),
            source,
        })
    }
}

/// Resolves certificate ids to key material.
pub trait CertificateStore: Send + Sync {
    fn resolve(&self, id: &str) -> Result<CertificateKeyPair, CertificateError>;

    fn insert(&self, pair: CertificateKeyPair);

    fn remove(&self, id: &str) -> bool;

    fn ids(&self) -> Vec<String>;
}

/// In-memory [`CertificateStore`].
#[derive(Debug, Default)]
pub struct MemoryCertificateStore {
    pairs: DashMap<String, CertificateKeyPair>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every configured pair. Fails on the first unreadable one.
    pub fn load(configs: &[CertificateConfig]) -> Result<Self, CertificateError> {
        let store = Self::new();
        for config in configs {
            store.insert(CertificateKeyPair::load(config)?);
        }
        Ok(store)
    }
}

impl CertificateStore for MemoryCertificateStore {
    fn resolve(&self, id: &str) -> Result<CertificateKeyPair, CertificateError> {
        self.pairs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CertificateError::NotFound(id.to_string()))
    }

    fn insert(&self, pair: CertificateKeyPair) {
        self.pairs.insert(pair.id.clone(), pair);
    }

    fn remove(&self, id: &str) -> bool {
        self.pairs.remove(id).is_some()
    }

    fn ids(&self) -> Vec<String> {
        self.pairs.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Delete a certificate and detach it from every provider using it.
pub fn delete_certificate(
    certificates: &dyn CertificateStore,
    providers: &dyn ProviderStore,
    id: &str,
) -> bool {
    let removed = certificates.remove(id);
    let detached = providers.detach_certificate(id);
    if removed {
        tracing::info!(certificate = %id, detached, "Certificate deleted");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryProviderStore, ProxyProviderRecord};

    #[test]
    fn rejects_pem_without_certificate() {
        let err = CertificateKeyPair::from_pem("c1", "", b"garbage".to_vec(), b"garbage".to_vec())
            .unwrap_err();
        assert!(matches!(err, CertificateError::Invalid { .. }));
    }

    #[test]
    fn missing_files_are_reported() {
        let err = CertificateKeyPair::load(&CertificateConfig {
            id: "c1".into(),
            name: String::new(),
            certificate_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
        })
        .unwrap_err();
        assert!(matches!(err, CertificateError::Io { .. }));
    }

    #[test]
    fn resolve_unknown_id() {
        let store = MemoryCertificateStore::new();
        assert!(matches!(
            store.resolve("nope"),
            Err(CertificateError::NotFound(_))
        ));
    }

    #[test]
    fn delete_detaches_from_providers() {
        let certificates = MemoryCertificateStore::new();
        let providers = MemoryProviderStore::new();
        providers
            .create(ProxyProviderRecord {
                id: "app".into(),
                certificate: Some("c1".into()),
                ..Default::default()
            })
            .unwrap();

        assert!(!delete_certificate(&certificates, &providers, "c1"));
        let record = providers.get("app").unwrap().record;
        assert_eq!(record.certificate, None);
    }
}
