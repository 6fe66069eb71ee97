//! Duplicate clustering and merging over a harvested pool.

pub mod classifier;
pub mod external;
pub mod graph;
pub mod merge;
pub mod rules;
pub mod signals;

pub use classifier::{ClassifierError, DuplicateClassifier, RuleClassifier};
pub use external::{ClassifierRow, CommandClassifier, PairRow};
pub use graph::DuplicateGraph;
pub use merge::MergeResolver;
pub use rules::{RuleRow, RuleTable};
pub use signals::{CandidatePair, SimilaritySignals};

use crate::config::DedupConfig;
use crate::document::{Doi, Document};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How duplicate edges become clusters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterPolicy {
    /// Plain connected components
    Transitive,
    /// Union-find that never joins two different DOIs
    #[default]
    DoiGuarded,
}

/// Summary of one deduplication call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    pub classifier: String,
    pub input: usize,
    pub output: usize,
    pub pairs_compared: usize,
    pub duplicate_pairs: usize,
    /// Clusters with more than one member
    pub clusters_merged: usize,
    /// Why merging was skipped, when the classifier failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

/// Classifier, graph and merge resolver behind one call
#[derive(Clone)]
pub struct Deduplicator {
    classifier: Arc<dyn DuplicateClassifier>,
    policy: ClusterPolicy,
}

impl std::fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator")
            .field("classifier", &self.classifier.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(Arc::new(RuleClassifier::default()), ClusterPolicy::default())
    }
}

impl Deduplicator {
    #[must_use]
    pub fn new(classifier: Arc<dyn DuplicateClassifier>, policy: ClusterPolicy) -> Self {
        Self { classifier, policy }
    }

    /// External classifier when a command is configured, rule table otherwise
    #[must_use]
    pub fn from_config(config: &DedupConfig) -> Self {
        let table = RuleTable::reference(config.author_threshold);
        let classifier: Arc<dyn DuplicateClassifier> = match &config.command {
            Some(program) => Arc::new(
                CommandClassifier::new(program, Duration::from_secs(config.command_timeout_secs))
                    .with_rule_table(table),
            ),
            None => Arc::new(RuleClassifier::new(table).with_all_pairs(config.all_pairs)),
        };
        Self::new(classifier, config.cluster_policy)
    }

    #[must_use]
    pub const fn policy(&self) -> ClusterPolicy {
        self.policy
    }

    /// Collapse duplicates of `pool` into canonical records.
    ///
    /// A failing classifier never fails the call: every document is kept as
    /// its own cluster and the report says why.
    #[instrument(skip(self, pool), fields(classifier = self.classifier.name(), input = pool.len()))]
    pub async fn deduplicate(&self, pool: Vec<Document>) -> (Vec<Document>, DedupReport) {
        let input = pool.len();
        let mut report = DedupReport {
            classifier: self.classifier.name().to_string(),
            input,
            output: input,
            pairs_compared: 0,
            duplicate_pairs: 0,
            clusters_merged: 0,
            degraded: None,
        };

        if input < 2 {
            return (pool, report);
        }

        let pairs = match self.classifier.classify(&pool).await {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!("Duplicate classifier failed, keeping all {} records: {}", input, e);
                report.degraded = Some(e.to_string());
                return (pool, report);
            }
        };

        let mut graph = DuplicateGraph::new(pool.iter().map(Document::id));
        report.pairs_compared = pairs.len();
        for pair in pairs.iter().filter(|p| p.duplicate) {
            if graph.add_edge(pair.left, pair.right) {
                report.duplicate_pairs += 1;
            }
        }
        link_shared_dois(&mut graph, &pool);

        debug!(
            "Duplicate graph: {} edges over {} records",
            graph.edge_count(),
            input
        );

        let components = match self.policy {
            ClusterPolicy::Transitive => graph.connected_components(),
            ClusterPolicy::DoiGuarded => {
                let dois: Vec<Option<Doi>> = pool.iter().map(|d| d.doi().cloned()).collect();
                graph.doi_guarded_components(&dois)
            }
        };

        report.clusters_merged = components.iter().filter(|c| c.len() > 1).count();
        let merged = MergeResolver::resolve(pool, &components);
        report.output = merged.len();

        info!(
            "Deduplicated {} records into {} ({} clusters merged)",
            report.input, report.output, report.clusters_merged
        );

        (merged, report)
    }
}

/// Records with the same DOI always end up in one cluster
fn link_shared_dois(graph: &mut DuplicateGraph, pool: &[Document]) {
    let mut first_with: HashMap<&Doi, usize> = HashMap::new();
    for (i, doc) in pool.iter().enumerate() {
        if let Some(doi) = doc.doi() {
            match first_with.get(doi) {
                Some(&first) => {
                    graph.add_edge(pool[first].id(), doc.id());
                }
                None => {
                    first_with.insert(doi, i);
                }
            }
        }
    }
}
