//! Pairwise similarity signals between two documents.

use crate::document::{Doi, Document, DocumentId};
use serde::{Deserialize, Serialize};
use strsim::{jaro_winkler, normalized_levenshtein};

/// Lower-case, non-alphanumerics to spaces, whitespace collapsed
#[must_use]
pub fn normalize(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn compare(a: Option<&str>, b: Option<&str>, metric: fn(&str, &str) -> f64) -> f64 {
    let (Some(a), Some(b)) = (a, b) else {
        return 0.0;
    };
    let (a, b) = (normalize(a), normalize(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    metric(&a, &b).clamp(0.0, 1.0)
}

/// Jaro-Winkler similarity of normalised titles; 0.0 when either is missing
#[must_use]
pub fn title_similarity(a: Option<&str>, b: Option<&str>) -> f64 {
    compare(a, b, jaro_winkler)
}

/// Jaro-Winkler similarity of the normalised, joined author lists
#[must_use]
pub fn author_similarity(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    compare(
        Some(a.join(" ").as_str()),
        Some(b.join(" ").as_str()),
        jaro_winkler,
    )
}

/// Normalised Levenshtein similarity of abstracts
#[must_use]
pub fn abstract_similarity(a: Option<&str>, b: Option<&str>) -> f64 {
    compare(a, b, normalized_levenshtein)
}

/// `None` unless both sides carry a DOI
#[must_use]
pub fn doi_similarity(a: Option<&Doi>, b: Option<&Doi>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) if a == b => Some(1.0),
        (Some(a), Some(b)) => Some(normalized_levenshtein(a.as_str(), b.as_str()).min(0.999)),
        _ => None,
    }
}

#[must_use]
pub fn same_year(a: Option<i32>, b: Option<i32>) -> Option<bool> {
    Some(a? == b?)
}

/// Similarity signals of one compared pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilaritySignals {
    pub title: f64,
    pub author: f64,
    #[serde(rename = "abstract")]
    pub abstract_text: f64,
    /// `None` when either year is unknown
    pub year: Option<bool>,
    /// `None` when either DOI is missing
    pub doi: Option<f64>,
}

impl SimilaritySignals {
    #[must_use]
    pub fn between(a: &Document, b: &Document) -> Self {
        Self {
            title: title_similarity(a.title(), b.title()),
            author: author_similarity(a.authors(), b.authors()),
            abstract_text: abstract_similarity(a.abstract_text(), b.abstract_text()),
            year: same_year(a.year(), b.year()),
            doi: doi_similarity(a.doi(), b.doi()),
        }
    }

    #[must_use]
    pub fn title_exact(&self) -> bool {
        self.title >= 1.0
    }

    #[must_use]
    pub fn abstract_exact(&self) -> bool {
        self.abstract_text >= 1.0
    }
}

/// Two compared documents and the classifier's verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidatePair {
    pub left: DocumentId,
    pub right: DocumentId,
    pub signals: SimilaritySignals,
    pub duplicate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Source;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Deep-Learning:\n A  Review! "), "deep learning a review");
        assert_eq!(normalize("Über Graphen"), "über graphen");
        assert_eq!(normalize("?!"), "");
    }

    #[test]
    fn test_titles_equal_after_normalisation_are_exact() {
        assert!((title_similarity(Some("Graph Clustering."), Some("graph  clustering")) - 1.0).abs() < f64::EPSILON);
        assert!(title_similarity(Some("Graph clustering"), Some("Graph coloring")) < 1.0);
        assert!(title_similarity(None, Some("x")).abs() < f64::EPSILON);
        assert!(title_similarity(Some("..."), Some("...")).abs() < f64::EPSILON);
    }

    #[test]
    fn test_doi_signal() {
        let a = Doi::parse("10.1/a");
        let b = Doi::parse("10.1/b");
        assert_eq!(doi_similarity(a.as_ref(), a.as_ref()), Some(1.0));
        assert!(doi_similarity(a.as_ref(), b.as_ref()).unwrap() < 1.0);
        assert_eq!(doi_similarity(a.as_ref(), None), None);
    }

    #[test]
    fn test_year_signal() {
        assert_eq!(same_year(Some(2020), Some(2020)), Some(true));
        assert_eq!(same_year(Some(2020), Some(2021)), Some(false));
        assert_eq!(same_year(None, Some(2021)), None);
    }

    #[test]
    fn test_signals_between_documents() {
        let a = Document::builder(Source::Crossref)
            .title("Record Linkage")
            .author("Fellegi, I.")
            .author("Sunter, A.")
            .abstract_text("A theory for record linkage.")
            .year(1969)
            .build();
        let b = Document::builder(Source::OpenAlex)
            .title("record linkage")
            .author("Fellegi, I.")
            .author("Sunter, A.")
            .abstract_text("A theory for record linkage")
            .year(1969)
            .build();

        let signals = SimilaritySignals::between(&a, &b);
        assert!(signals.title_exact());
        assert!(signals.abstract_exact());
        assert!(signals.author >= 1.0);
        assert_eq!(signals.year, Some(true));
        assert_eq!(signals.doi, None);
    }
}
