//! Provider record storage.
//!
//! # Responsibilities
//! - Hold provider records under a monotonically increasing version
//! - Generate the cookie secret once, when a record is created
//! - Keep that secret across every later update
//! - Detach (never delete) certificates referenced by providers
//!
//! # Design Decisions
//! - Versions are global, so `(id, version)` never repeats after a delete
//! - Unchanged records keep their version; resolvers keep their cache

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use thiserror::Error;

use super::model::ProxyProviderRecord;
use super::secret::generate_cookie_secret;

/// A record together with the version it was stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    pub version: u64,
    pub record: ProxyProviderRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("provider `{0}` already exists")]
    AlreadyExists(String),
    #[error("provider `{0}` not found")]
    NotFound(String),
}

/// Read-mostly store of proxy provider records.
pub trait ProviderStore: Send + Sync {
    /// Fetch the current record for `id`.
    fn get(&self, id: &str) -> Option<VersionedRecord>;

    /// Insert a new record, generating its cookie secret if it has none.
    fn create(&self, record: ProxyProviderRecord) -> Result<VersionedRecord, StoreError>;

    /// Replace an existing record. The stored cookie secret is kept.
    fn update(&self, record: ProxyProviderRecord) -> Result<VersionedRecord, StoreError>;

    /// Remove a record. Referenced certificates are left alone.
    fn delete(&self, id: &str) -> bool;

    /// Clear every reference to `certificate_id`; returns how many changed.
    fn detach_certificate(&self, certificate_id: &str) -> usize;

    /// All stored ids.
    fn ids(&self) -> Vec<String>;
}

/// In-memory [`ProviderStore`].
#[derive(Debug, Default)]
pub struct MemoryProviderStore {
    records: DashMap<String, VersionedRecord>,
    next_version: AtomicU64,
}

impl MemoryProviderStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Make the store hold exactly `records`, as after a config file reload.
    ///
    /// New ids are created, known ids updated, missing ids deleted.
    pub fn sync(&self, records: &[ProxyProviderRecord]) {
        for record in records {
            let result = if self.records.contains_key(&record.id) {
                self.update(record.clone())
            } else {
                self.create(record.clone())
            };
            if let Err(e) = result {
                tracing::warn!(provider = %record.id, error = %e, "Provider sync failed");
            }
        }

        let stale: Vec<String> = self
            .records
            .iter()
            .filter(|entry| !records.iter().any(|r| &r.id == entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for id in stale {
            self.delete(&id);
        }
    }
}

impl ProviderStore for MemoryProviderStore {
    fn get(&self, id: &str) -> Option<VersionedRecord> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    fn create(&self, mut record: ProxyProviderRecord) -> Result<VersionedRecord, StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.records.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(record.id)),
            Entry::Vacant(slot) => {
                if record.cookie_secret.is_empty() {
                    record.cookie_secret = generate_cookie_secret();
                    tracing::info!(provider = %record.id, "Generated cookie secret");
                }
                let stored = VersionedRecord {
                    version: self.bump(),
                    record,
                };
                slot.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    fn update(&self, mut record: ProxyProviderRecord) -> Result<VersionedRecord, StoreError> {
        let mut entry = self
            .records
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;

        let current = &entry.record;
        if !record.cookie_secret.is_empty() && record.cookie_secret != current.cookie_secret {
            tracing::warn!(
                provider = %record.id,
                "Ignoring cookie secret change; secrets are fixed at creation"
            );
        }
        record.cookie_secret = current.cookie_secret.clone();

        if record == *current {
            return Ok(entry.value().clone());
        }

        let version = self.bump();
        *entry = VersionedRecord { version, record };
        Ok(entry.value().clone())
    }

    fn delete(&self, id: &str) -> bool {
        self.records.remove(id).is_some()
    }

    fn detach_certificate(&self, certificate_id: &str) -> usize {
        let mut detached = 0;
        for mut entry in self.records.iter_mut() {
            if entry.record.certificate.as_deref() == Some(certificate_id) {
                entry.record.certificate = None;
                entry.version = self.bump();
                detached += 1;
            }
        }
        detached
    }

    fn ids(&self) -> Vec<String> {
        self.records.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> ProxyProviderRecord {
        ProxyProviderRecord {
            id: id.into(),
            internal_host: "http://backend".into(),
            external_host: "https://app.example.com".into(),
            client_id: "client".into(),
            ..Default::default()
        }
    }

    #[test]
    fn create_generates_secret_once() {
        let store = MemoryProviderStore::new();
        let created = store.create(record("app")).unwrap();
        assert_eq!(created.record.cookie_secret.len(), 32);

        let mut changed = record("app");
        changed.internal_host = "http://other".into();
        changed.cookie_secret = "X".repeat(32);
        let updated = store.update(changed).unwrap();

        assert_eq!(updated.record.cookie_secret, created.record.cookie_secret);
        assert!(updated.version > created.version);
    }

    #[test]
    fn create_keeps_configured_secret() {
        let store = MemoryProviderStore::new();
        let mut rec = record("app");
        rec.cookie_secret = "K".repeat(32);
        let created = store.create(rec).unwrap();
        assert_eq!(created.record.cookie_secret, "K".repeat(32));
    }

    #[test]
    fn duplicate_create_fails() {
        let store = MemoryProviderStore::new();
        store.create(record("app")).unwrap();
        assert_eq!(
            store.create(record("app")),
            Err(StoreError::AlreadyExists("app".into()))
        );
    }

    #[test]
    fn unchanged_update_keeps_version() {
        let store = MemoryProviderStore::new();
        let created = store.create(record("app")).unwrap();
        let updated = store.update(record("app")).unwrap();
        assert_eq!(created.version, updated.version);
    }

    #[test]
    fn detaching_certificate_keeps_provider() {
        let store = MemoryProviderStore::new();
        let mut rec = record("app");
        rec.certificate = Some("cert-1".into());
        let before = store.create(rec).unwrap();

        assert_eq!(store.detach_certificate("cert-1"), 1);
        let after = store.get("app").unwrap();
        assert_eq!(after.record.certificate, None);
        assert!(after.version > before.version);
        assert_eq!(store.detach_certificate("cert-1"), 0);
    }

    #[test]
    fn sync_creates_updates_and_deletes() {
        let store = MemoryProviderStore::new();
        store.create(record("old")).unwrap();
        let app_secret = store.create(record("app")).unwrap().record.cookie_secret;

        store.sync(&[record("app"), record("new")]);

        let mut ids = store.ids();
        ids.sort();
        assert_eq!(ids, vec!["app", "new"]);
        assert_eq!(store.get("app").unwrap().record.cookie_secret, app_secret);
    }
}
