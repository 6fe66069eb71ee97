//! Pinned duplicate-decision rule table.

use super::signals::SimilaritySignals;
use serde::{Deserialize, Serialize};

/// Default minimum author similarity of the author-gated rows
pub const DEFAULT_AUTHOR_THRESHOLD: f64 = 0.5;

/// One positive rule: every listed requirement must hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRow {
    pub title_exact: bool,
    pub abstract_exact: bool,
    pub year_equal: bool,
    pub min_author: Option<f64>,
}

impl RuleRow {
    #[must_use]
    pub fn matches(&self, signals: &SimilaritySignals) -> bool {
        (!self.title_exact || signals.title_exact())
            && (!self.abstract_exact || signals.abstract_exact())
            && (!self.year_equal || signals.year == Some(true))
            && self
                .min_author
                .map_or(true, |threshold| signals.author >= threshold)
    }
}

/// Ordered duplicate rules behind a DOI gate.
///
/// With the gate on, a pair where both DOIs are known is decided by DOI
/// equality alone and the rows are never consulted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTable {
    pub doi_gate: bool,
    pub rows: Vec<RuleRow>,
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::reference(DEFAULT_AUTHOR_THRESHOLD)
    }
}

impl RuleTable {
    /// DOI gate, then: authors + title; title + abstract + year;
    /// authors + title + abstract
    #[must_use]
    pub fn reference(author_threshold: f64) -> Self {
        Self {
            doi_gate: true,
            rows: vec![
                RuleRow {
                    title_exact: true,
                    abstract_exact: false,
                    year_equal: false,
                    min_author: Some(author_threshold),
                },
                RuleRow {
                    title_exact: true,
                    abstract_exact: true,
                    year_equal: true,
                    min_author: None,
                },
                RuleRow {
                    title_exact: true,
                    abstract_exact: true,
                    year_equal: false,
                    min_author: Some(author_threshold),
                },
            ],
        }
    }

    #[must_use]
    pub fn decide(&self, signals: &SimilaritySignals) -> bool {
        if self.doi_gate {
            if let Some(doi) = signals.doi {
                return doi >= 1.0;
            }
        }
        self.rows.iter().any(|row| row.matches(signals))
    }

    /// True when every positive decision implies equal DOIs or equal titles,
    /// so comparing only inside DOI and title blocks loses nothing
    #[must_use]
    pub fn blockable(&self) -> bool {
        self.rows.iter().all(|row| row.title_exact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> SimilaritySignals {
        SimilaritySignals {
            title: 0.0,
            author: 0.0,
            abstract_text: 0.0,
            year: None,
            doi: None,
        }
    }

    #[test]
    fn test_doi_gate_overrides_rows() {
        let table = RuleTable::default();
        let same_doi = SimilaritySignals {
            doi: Some(1.0),
            ..signals()
        };
        assert!(table.decide(&same_doi));

        let everything_else_equal = SimilaritySignals {
            title: 1.0,
            author: 1.0,
            abstract_text: 1.0,
            year: Some(true),
            doi: Some(0.9),
        };
        assert!(!table.decide(&everything_else_equal));
    }

    #[test]
    fn test_reference_rows() {
        let table = RuleTable::default();

        let author_and_title = SimilaritySignals {
            title: 1.0,
            author: 0.5,
            ..signals()
        };
        assert!(table.decide(&author_and_title));

        let weak_author = SimilaritySignals {
            author: 0.49,
            ..author_and_title
        };
        assert!(!table.decide(&weak_author));

        let title_abstract_year = SimilaritySignals {
            title: 1.0,
            abstract_text: 1.0,
            year: Some(true),
            ..signals()
        };
        assert!(table.decide(&title_abstract_year));

        let year_differs = SimilaritySignals {
            year: Some(false),
            ..title_abstract_year
        };
        assert!(!table.decide(&year_differs));

        let near_title = SimilaritySignals {
            title: 0.98,
            author: 1.0,
            abstract_text: 1.0,
            year: Some(true),
            doi: None,
        };
        assert!(!table.decide(&near_title));
    }

    #[test]
    fn test_custom_threshold() {
        let strict = RuleTable::reference(0.9);
        let pair = SimilaritySignals {
            title: 1.0,
            author: 0.8,
            ..signals()
        };
        assert!(!strict.decide(&pair));
        assert!(RuleTable::default().decide(&pair));
    }

    #[test]
    fn test_blockable() {
        assert!(RuleTable::default().blockable());

        let mut loose = RuleTable::default();
        loose.rows.push(RuleRow {
            title_exact: false,
            abstract_exact: true,
            year_equal: true,
            min_author: None,
        });
        assert!(!loose.blockable());
    }
}
