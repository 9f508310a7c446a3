//! Bulk loader: the initial population of the state store.
//!
//! All collections are fetched concurrently and settle independently: a
//! failed collection keeps whatever the store already held (its built-in
//! default on a first load) and is reported as a [`PartialLoadWarning`],
//! while the rest are applied. The store leaves its loading state exactly
//! once, after every fetch settled.

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;

use crate::error::PartialLoadWarning;
use crate::gateway::RemoteGateway;
use crate::model::Collection;
use crate::store::{Compare, StateStore};

/// Outcome of a bulk load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Collections applied, with how many records each now holds.
    pub loaded: Vec<(Collection, usize)>,
    pub warnings: Vec<PartialLoadWarning>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

pub struct BulkLoader {
    gateway: Arc<dyn RemoteGateway>,
    store: Arc<StateStore>,
    analytics_window: usize,
}

impl BulkLoader {
    pub fn new(gateway: Arc<dyn RemoteGateway>, store: Arc<StateStore>, analytics_window: usize) -> Self {
        Self {
            gateway,
            store,
            analytics_window,
        }
    }

    /// Fetch every collection and apply what arrived.
    ///
    /// Never fails as a whole; per-collection failures end up in the
    /// report. Calling it again refreshes from the remote store.
    pub async fn load_all(&self) -> LoadReport {
        let fetches = Collection::ALL.iter().map(|&collection| async move {
            let result = self.gateway.fetch_all(collection.table()).await;
            (collection, result)
        });
        let settled = join_all(fetches).await;

        let mut report = LoadReport::default();
        for (collection, result) in settled {
            match result {
                Ok(mut rows) => {
                    if collection == Collection::AnalyticsEvents {
                        newest_first(&mut rows, self.analytics_window);
                    }
                    let refresh = self.store.refresh_from_wire(collection, &rows, Compare::Exact);
                    if refresh.skipped > 0 {
                        tracing::warn!(
                            table = collection.table(),
                            skipped = refresh.skipped,
                            "Rows skipped during load"
                        );
                    }
                    report.loaded.push((collection, refresh.count));
                }
                Err(e) => {
                    tracing::warn!(table = collection.table(), "Load failed, keeping current data: {e}");
                    report.warnings.push(PartialLoadWarning {
                        collection,
                        cause: e.to_string(),
                    });
                }
            }
        }

        if self.store.finish_loading() {
            tracing::info!(
                loaded = report.loaded.len(),
                failed = report.warnings.len(),
                "Initial load finished"
            );
        } else {
            tracing::debug!(loaded = report.loaded.len(), "Reload finished");
        }
        report
    }
}

/// Sort analytics rows by `created_at`, newest first, and keep `window`.
fn newest_first(rows: &mut Vec<Value>, window: usize) {
    rows.sort_by(|a, b| {
        let created = |row: &Value| row.get("created_at").and_then(Value::as_str).map(str::to_owned);
        created(b).cmp(&created(a))
    });
    rows.truncate(window);
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use crate::model::SiteSettings;
    use serde_json::json;

    fn loader(gateway: &Arc<MemoryGateway>, store: &Arc<StateStore>) -> BulkLoader {
        BulkLoader::new(gateway.clone(), store.clone(), 200)
    }

    #[tokio::test]
    async fn failed_collections_keep_defaults_and_warn() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.seed("bookings", vec![json!({"id": "BK-1", "full_name": "Sam"})]);
        gateway.fail_transport("site_settings");
        let store = Arc::new(StateStore::new());

        let report = loader(&gateway, &store).load_all().await;
        assert!(!store.is_loading());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].collection, Collection::Configuration);
        assert_eq!(store.settings(), SiteSettings::default());
        assert_eq!(store.bookings()[0].full_name, "Sam");
        assert!(report.loaded.contains(&(Collection::Bookings, 1)));
    }

    #[tokio::test]
    async fn settings_row_merges_onto_defaults() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.seed(
            "site_settings",
            vec![json!({"id": 1, "site_name": "Metro Blackline", "primary_color": null})],
        );
        let store = Arc::new(StateStore::new());

        loader(&gateway, &store).load_all().await;
        let settings = store.settings();
        assert_eq!(settings.site_name, "Metro Blackline");
        assert_eq!(settings.colors.primary, SiteSettings::default().colors.primary);
    }

    #[tokio::test]
    async fn analytics_keep_newest_window() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.seed(
            "analytics_events",
            vec![
                json!({"id": 1, "page": "/a", "created_at": "2026-01-01T00:00:00Z"}),
                json!({"id": 2, "page": "/b", "created_at": "2026-01-03T00:00:00Z"}),
                json!({"id": 3, "page": "/c", "created_at": "2026-01-02T00:00:00Z"}),
            ],
        );
        let store = Arc::new(StateStore::new());

        BulkLoader::new(gateway.clone(), store.clone(), 2).load_all().await;
        let pages: Vec<_> = store
            .items::<crate::model::AnalyticsEvent>()
            .into_iter()
            .filter_map(|e| e.page)
            .collect();
        assert_eq!(pages, vec!["/b", "/c"]);
    }

    #[tokio::test]
    async fn loading_twice_is_harmless() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.seed("plans", vec![json!({"id": 1, "name": "Gold", "price": "99"})]);
        let store = Arc::new(StateStore::new());
        let loader = loader(&gateway, &store);

        loader.load_all().await;
        let first = store.plans();
        let version = store.version();
        loader.load_all().await;
        assert_eq!(store.plans(), first);
        assert_eq!(store.version(), version);
        assert_eq!(first[0].price, 99.0);
    }
}
