use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use super::evaluator;
use super::{parse_result_blocks, SearchBackend, SearchResult, SearchResultCollection, SearchSource};

/// Queries the internal and external backends in priority order and scores the merged hits.
#[derive(Clone)]
pub struct SearchCoordinator {
    internal: Arc<dyn SearchBackend>,
    external: Arc<dyn SearchBackend>,
}

impl std::fmt::Debug for SearchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCoordinator")
            .field("internal", &self.internal.name())
            .field("external", &self.external.name())
            .finish()
    }
}

impl SearchCoordinator {
    pub fn new(internal: Arc<dyn SearchBackend>, external: Arc<dyn SearchBackend>) -> Self {
        Self { internal, external }
    }

    /// Internal-first: external is consulted only when internal hits are insufficient.
    /// External-first: internal is always consulted as a supplement.
    ///
    /// A failing backend is logged and skipped. The call fails only when every
    /// backend it queried failed.
    pub async fn search(&self, query: &str, internal_first: bool) -> Result<SearchResultCollection> {
        let mut collection = SearchResultCollection::new(query);
        let mut failures: Vec<String> = Vec::new();

        info!(query, internal_first, "Starting search");

        let attempted = if internal_first {
            self.gather(SearchSource::Internal, &mut collection, &mut failures).await;
            if evaluator::is_sufficient(&collection) {
                1
            } else {
                info!(query, "Internal search insufficient, supplementing with external");
                self.gather(SearchSource::External, &mut collection, &mut failures).await;
                2
            }
        } else {
            self.gather(SearchSource::External, &mut collection, &mut failures).await;
            self.gather(SearchSource::Internal, &mut collection, &mut failures).await;
            2
        };

        if failures.len() == attempted {
            return Err(anyhow!("all search backends failed: {}", failures.join("; ")));
        }

        evaluator::evaluate(&mut collection);
        info!(
            query,
            results = collection.results.len(),
            sufficient = collection.is_sufficient,
            confidence = collection.confidence,
            "Search completed"
        );
        Ok(collection)
    }

    /// Query one backend and append its hits, recording a failure instead of propagating it.
    async fn gather(
        &self,
        source: SearchSource,
        collection: &mut SearchResultCollection,
        failures: &mut Vec<String>,
    ) {
        match self.query_backend(source, &collection.query).await {
            Ok(hits) => {
                info!(source = source.as_str(), results = hits.len(), "Backend search done");
                collection.results.extend(hits);
            }
            Err(e) => {
                warn!(query = %collection.query, source = source.as_str(), "Backend search failed: {:#}", e);
                failures.push(format!("{}: {:#}", source.as_str(), e));
            }
        }
    }

    async fn query_backend(&self, source: SearchSource, query: &str) -> Result<Vec<SearchResult>> {
        let backend = match source {
            SearchSource::Internal => &self.internal,
            SearchSource::External => &self.external,
        };
        let raw = backend.search(query).await?;
        Ok(parse_result_blocks(&raw, source))
    }
}
