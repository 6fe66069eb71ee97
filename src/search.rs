//! One search: harvest every source, then optionally collapse duplicates.

use crate::config::Config;
use crate::dedup::{DedupReport, Deduplicator};
use crate::document::Document;
use crate::harvest::{HarvestReport, Harvester};
use crate::sources::{build_sources, SourceAdapter};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Documents of a finished search with the harvest and dedup summaries
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub documents: Vec<Document>,
    pub harvest: HarvestReport,
    /// `None` when duplicates were kept
    pub dedup: Option<DedupReport>,
}

/// Harvest-then-deduplicate pipeline
#[derive(Debug, Clone)]
pub struct Search {
    harvester: Harvester,
    deduplicator: Deduplicator,
    remove_duplicates: bool,
}

impl Search {
    #[must_use]
    pub const fn new(harvester: Harvester, deduplicator: Deduplicator) -> Self {
        Self {
            harvester,
            deduplicator,
            remove_duplicates: true,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Harvester::new(config.harvest.clone()),
            Deduplicator::from_config(&config.dedup),
        )
        .remove_duplicates(config.dedup.enabled)
    }

    #[must_use]
    pub const fn remove_duplicates(mut self, enabled: bool) -> Self {
        self.remove_duplicates = enabled;
        self
    }

    /// Run against explicit adapters
    #[instrument(skip(self, adapters))]
    pub async fn perform(
        &self,
        query: &str,
        limit: u32,
        adapters: Vec<Arc<dyn SourceAdapter>>,
    ) -> Result<SearchResults> {
        let mut harvest = self.harvester.harvest(query, limit, adapters).await?;
        let pool = std::mem::take(&mut harvest.documents);

        let (documents, dedup) = if self.remove_duplicates {
            let (documents, report) = self.deduplicator.deduplicate(pool).await;
            (documents, Some(report))
        } else {
            (pool, None)
        };

        info!(
            "Search '{}' returned {} documents ({} harvested)",
            harvest.query,
            documents.len(),
            harvest.total_pulled
        );

        Ok(SearchResults {
            documents,
            harvest,
            dedup,
        })
    }

    /// Run against the providers named in `sources`, or every enabled one
    pub async fn perform_with_config(
        &self,
        config: &Config,
        query: &str,
        limit: u32,
        sources: &[String],
    ) -> Result<SearchResults> {
        let adapters = build_sources(config, sources)?;
        self.perform(query, limit, adapters).await
    }
}
