//! Enrichment resolvers.
//!
//! Two independent best-effort lookups run before the first generation of a
//! session: a knowledge search and a factor selection. Neither can fail the
//! run; both degrade to placeholder text.

pub mod catalogue;
pub mod factors;
pub mod search;

pub use catalogue::{FactorCatalogue, FactorCategory, FactorInfo};
pub use factors::{FactorSelection, FactorSelector, SelectionSource};
pub use search::{HttpKnowledgeSearch, KnowledgeSearch};

use refinery_common::Enrichment;
use std::sync::Arc;
use std::time::Duration;

pub struct EnrichmentResolvers {
    search: Option<Arc<dyn KnowledgeSearch>>,
    selector: FactorSelector,
    search_deadline: Duration,
}

impl EnrichmentResolvers {
    pub fn new(
        search: Option<Arc<dyn KnowledgeSearch>>,
        selector: FactorSelector,
        search_deadline: Duration,
    ) -> Self {
        Self {
            search,
            selector,
            search_deadline,
        }
    }

    pub fn catalogue(&self) -> &FactorCatalogue {
        self.selector.catalogue()
    }

    /// Run both resolvers concurrently. Order of completion does not matter.
    pub async fn resolve(&self, requirement: &str) -> Enrichment {
        let (knowledge, selection) = tokio::join!(
            search::search_or_placeholder(self.search.as_deref(), requirement, self.search_deadline),
            self.selector.select(requirement),
        );
        tracing::info!(
            factors = selection.factors.len(),
            source = ?selection.source,
            "Enrichment resolved"
        );
        Enrichment {
            knowledge,
            factors: selection.render(requirement),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Down;

    #[async_trait]
    impl KnowledgeSearch for Down {
        async fn search(&self, _query: &str) -> anyhow::Result<String> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_resolve_degrades_without_failing() {
        let resolvers = EnrichmentResolvers::new(
            Some(Arc::new(Down)),
            FactorSelector::new(Arc::new(FactorCatalogue::default()), None, 15, Duration::from_secs(1)),
            Duration::from_secs(1),
        );
        let enrichment = resolvers.resolve("RSI mean-reversion").await;
        assert!(enrichment.knowledge.contains("connection refused"));
        assert!(enrichment.factors.contains("RSI_14"));
        assert!(!resolvers.catalogue().is_empty());
    }
}
