use super::rules::RuleTable;
use super::signals::{normalize, CandidatePair, SimilaritySignals};
use crate::document::Document;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors raised by a duplicate classifier
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Classifier I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Classifier payload error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("Classifier exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Classifier task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Pairwise duplicate decisions over a document pool
#[async_trait]
pub trait DuplicateClassifier: Send + Sync {
    /// Short name used in logs and reports
    fn name(&self) -> &str;

    /// Decide the compared pairs of `pool`; pairs not returned are not duplicates
    async fn classify(&self, pool: &[Document]) -> Result<Vec<CandidatePair>, ClassifierError>;
}

/// In-process classifier applying a [`RuleTable`]
#[derive(Debug, Clone, Default)]
pub struct RuleClassifier {
    table: RuleTable,
    all_pairs: bool,
}

impl RuleClassifier {
    #[must_use]
    pub const fn new(table: RuleTable) -> Self {
        Self {
            table,
            all_pairs: false,
        }
    }

    /// Compare every pair instead of DOI and title blocks
    #[must_use]
    pub const fn with_all_pairs(mut self, all_pairs: bool) -> Self {
        self.all_pairs = all_pairs;
        self
    }

    #[must_use]
    pub const fn table(&self) -> &RuleTable {
        &self.table
    }

    /// Index pairs `(i, j)`, `i < j`, worth comparing
    fn candidates(&self, pool: &[Document]) -> BTreeSet<(usize, usize)> {
        let mut pairs = BTreeSet::new();

        if self.all_pairs || !self.table.blockable() {
            for i in 0..pool.len() {
                for j in (i + 1)..pool.len() {
                    pairs.insert((i, j));
                }
            }
            return pairs;
        }

        let mut blocks: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, doc) in pool.iter().enumerate() {
            if let Some(doi) = doc.doi() {
                blocks.entry(format!("doi:{doi}")).or_default().push(i);
            }
            if let Some(title) = doc.title().map(normalize).filter(|t| !t.is_empty()) {
                blocks.entry(format!("title:{title}")).or_default().push(i);
            }
        }

        for members in blocks.values() {
            for (n, &i) in members.iter().enumerate() {
                for &j in &members[n + 1..] {
                    pairs.insert((i.min(j), i.max(j)));
                }
            }
        }
        pairs
    }

    /// Score and decide `(i, j)` pairs of `pool`
    #[must_use]
    pub fn decide_pairs(&self, pool: &[Document]) -> Vec<CandidatePair> {
        let candidates = self.candidates(pool);
        debug!("Comparing {} candidate pairs over {} documents", candidates.len(), pool.len());

        candidates
            .into_iter()
            .map(|(i, j)| {
                let signals = SimilaritySignals::between(&pool[i], &pool[j]);
                CandidatePair {
                    left: pool[i].id(),
                    right: pool[j].id(),
                    duplicate: self.table.decide(&signals),
                    signals,
                }
            })
            .collect()
    }
}

#[async_trait]
impl DuplicateClassifier for RuleClassifier {
    fn name(&self) -> &str {
        "rules"
    }

    /// Scoring is CPU-bound, so it runs on the blocking pool
    async fn classify(&self, pool: &[Document]) -> Result<Vec<CandidatePair>, ClassifierError> {
        let classifier = self.clone();
        let pool = pool.to_vec();
        let pairs = tokio::task::spawn_blocking(move || classifier.decide_pairs(&pool)).await?;
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Source;

    fn doc(title: &str, doi: Option<&str>) -> Document {
        let mut builder = Document::builder(Source::Crossref)
            .title(title)
            .author("Doe, J.");
        if let Some(doi) = doi {
            builder = builder.doi(doi);
        }
        builder.build()
    }

    #[test]
    fn test_blocks_only_compare_related_records() {
        let pool = vec![
            doc("Alpha", Some("10.1/a")),
            doc("Beta", Some("10.1/a")),
            doc("alpha", None),
            doc("Gamma", None),
        ];
        let classifier = RuleClassifier::default();

        let pairs: Vec<(usize, usize)> = classifier.candidates(&pool).into_iter().collect();
        assert_eq!(pairs, vec![(0, 1), (0, 2)]);

        let all = RuleClassifier::default().with_all_pairs(true);
        assert_eq!(all.candidates(&pool).len(), 6);
    }

    #[tokio::test]
    async fn test_decisions() {
        let pool = vec![
            doc("Alpha", Some("10.1/a")),
            doc("Beta", Some("10.1/a")),
            doc("alpha", None),
            doc("Alpha", Some("10.1/z")),
        ];
        let pairs = RuleClassifier::default().classify(&pool).await.unwrap();

        let decision = |a: usize, b: usize| {
            pairs
                .iter()
                .find(|p| p.left == pool[a].id() && p.right == pool[b].id())
                .map(|p| p.duplicate)
        };
        // shared DOI
        assert_eq!(decision(0, 1), Some(true));
        // same title and author, one DOI missing
        assert_eq!(decision(0, 2), Some(true));
        // same title, conflicting DOIs
        assert_eq!(decision(0, 3), Some(false));
    }

    #[test]
    fn test_blocked_and_exhaustive_decisions_agree() {
        let pool = vec![
            doc("Graph clustering", Some("10.5/x")),
            doc("Graph Clustering.", None),
            doc("Graph colouring", None),
            doc("Other", Some("10.5/x")),
        ];
        let duplicates = |classifier: RuleClassifier| {
            classifier
                .decide_pairs(&pool)
                .into_iter()
                .filter(|p| p.duplicate)
                .map(|p| (p.left, p.right))
                .collect::<BTreeSet<_>>()
        };

        assert_eq!(
            duplicates(RuleClassifier::default()),
            duplicates(RuleClassifier::default().with_all_pairs(true))
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_classify_runs_off_the_runtime_thread() {
        let pool: Vec<Document> = (0..40)
            .map(|i| doc(&format!("Paper {}", i % 10), None))
            .collect();
        let classifier = RuleClassifier::default().with_all_pairs(true);

        // a single-threaded runtime keeps ticking while scoring runs elsewhere
        let ticker = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(1)).await;
        });
        let pairs = classifier.classify(&pool).await.unwrap();
        ticker.await.unwrap();

        assert_eq!(pairs.len(), 40 * 39 / 2);
        assert_eq!(pairs, classifier.decide_pairs(&pool));
    }
}
