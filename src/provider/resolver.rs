//! Config resolver.
//!
//! # Responsibilities
//! - Turn a stored record into a validated, immutable [`ConfigSnapshot`]
//! - Compile exemption patterns once per record version
//! - Publish the active snapshot atomically for request handlers
//!
//! # Design Decisions
//! - Snapshots are shared through `Arc`; readers never lock
//! - A failed refresh keeps the previous snapshot active
//! - Cache entries for older versions are evicted on insert

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use thiserror::Error;

use super::model::ProxyProvider;
use super::store::ProviderStore;
use super::validation::compile_provider;
use crate::config::ValidationError;
use crate::routing::ExemptionSet;

/// An immutable, versioned view of one provider.
#[derive(Debug)]
pub struct ConfigSnapshot {
    pub provider_id: String,
    pub version: u64,
    pub provider: ProxyProvider,
    pub exemptions: ExemptionSet,
}

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("proxy provider `{0}` not found")]
    NotFound(String),

    #[error("proxy provider `{id}` is invalid: {}", describe(.errors))]
    Invalid {
        id: String,
        errors: Vec<ValidationError>,
    },
}

fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Resolves provider records into snapshots.
pub struct ConfigResolver {
    store: Arc<dyn ProviderStore>,
    provider_id: String,
    snapshots: DashMap<(String, u64), Arc<ConfigSnapshot>>,
    current: ArcSwapOption<ConfigSnapshot>,
}

impl ConfigResolver {
    /// Create a resolver serving `provider_id`. Nothing is active until
    /// [`refresh`](Self::refresh) succeeds.
    pub fn new(store: Arc<dyn ProviderStore>, provider_id: impl Into<String>) -> Self {
        Self {
            store,
            provider_id: provider_id.into(),
            snapshots: DashMap::new(),
            current: ArcSwapOption::empty(),
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn store(&self) -> &Arc<dyn ProviderStore> {
        &self.store
    }

    /// Resolve the snapshot for `id` at its current stored version.
    pub fn resolve(&self, id: &str) -> Result<Arc<ConfigSnapshot>, ResolveError> {
        let entry = self
            .store
            .get(id)
            .ok_or_else(|| ResolveError::NotFound(id.to_string()))?;

        let key = (id.to_string(), entry.version);
        if let Some(cached) = self.snapshots.get(&key) {
            return Ok(Arc::clone(cached.value()));
        }

        let (provider, exemptions) =
            compile_provider(&entry.record).map_err(|errors| ResolveError::Invalid {
                id: id.to_string(),
                errors,
            })?;

        let snapshot = Arc::new(ConfigSnapshot {
            provider_id: id.to_string(),
            version: entry.version,
            provider,
            exemptions,
        });

        self.snapshots
            .retain(|(cached_id, version), _| cached_id != id || *version == entry.version);
        self.snapshots.insert(key, Arc::clone(&snapshot));

        tracing::debug!(
            provider = %id,
            version = entry.version,
            patterns = snapshot.exemptions.len(),
            "Compiled provider snapshot"
        );
        Ok(snapshot)
    }

    /// The active snapshot, if any.
    pub fn current(&self) -> Option<Arc<ConfigSnapshot>> {
        self.current.load_full()
    }

    /// Re-resolve the served provider and publish it.
    ///
    /// On error the previously published snapshot stays active.
    pub fn refresh(&self) -> Result<Arc<ConfigSnapshot>, ResolveError> {
        let snapshot = self.resolve(&self.provider_id)?;
        let previous = self.current.swap(Some(Arc::clone(&snapshot)));

        if previous.as_ref().map(|p| p.version) != Some(snapshot.version) {
            tracing::info!(
                provider = %self.provider_id,
                version = snapshot.version,
                name = %snapshot.provider,
                "Provider snapshot activated"
            );
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryProviderStore, ProxyProviderRecord, SkipPaths};

    fn record() -> ProxyProviderRecord {
        ProxyProviderRecord {
            id: "app".into(),
            internal_host: "http://backend".into(),
            external_host: "https://app.example.com".into(),
            client_id: "client".into(),
            skip_path_regex: SkipPaths::List(vec!["^/health$".into()]),
            ..Default::default()
        }
    }

    fn resolver() -> (Arc<MemoryProviderStore>, ConfigResolver) {
        let store = Arc::new(MemoryProviderStore::new());
        let resolver = ConfigResolver::new(store.clone(), "app");
        (store, resolver)
    }

    #[test]
    fn missing_provider_is_not_found() {
        let (_, resolver) = resolver();
        assert!(matches!(resolver.resolve("app"), Err(ResolveError::NotFound(_))));
        assert!(resolver.current().is_none());
    }

    #[test]
    fn same_version_reuses_snapshot() {
        let (store, resolver) = resolver();
        store.create(record()).unwrap();

        let first = resolver.resolve("app").unwrap();
        let second = resolver.resolve("app").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.exemptions.is_exempt("/health"));
    }

    #[test]
    fn update_invalidates_snapshot() {
        let (store, resolver) = resolver();
        store.create(record()).unwrap();
        let first = resolver.refresh().unwrap();

        let mut changed = record();
        changed.skip_path_regex = SkipPaths::List(vec!["^/status$".into()]);
        store.update(changed).unwrap();

        let second = resolver.refresh().unwrap();
        assert!(second.version > first.version);
        assert!(!second.exemptions.is_exempt("/health"));
        assert!(second.exemptions.is_exempt("/status"));
        // In-flight holders keep their view.
        assert!(first.exemptions.is_exempt("/health"));
        assert_eq!(resolver.snapshots.len(), 1);
    }

    #[test]
    fn invalid_update_keeps_previous_snapshot() {
        let (store, resolver) = resolver();
        store.create(record()).unwrap();
        let good = resolver.refresh().unwrap();

        let mut broken = record();
        broken.skip_path_regex = SkipPaths::List(vec!["(".into()]);
        store.update(broken).unwrap();

        assert!(matches!(resolver.refresh(), Err(ResolveError::Invalid { .. })));
        assert_eq!(resolver.current().unwrap().version, good.version);
    }
}
