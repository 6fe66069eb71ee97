//! Harvested document model shared by every source adapter and the
//! deduplication engine.

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use uuid::Uuid;

static DOI_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(doi:\s*|https?://(dx\.)?doi\.org/)").expect("static DOI prefix pattern")
});

/// Opaque per-record identity, minted once when the document is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// DOI (Digital Object Identifier) wrapper, normalised for comparison
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Doi(String);

impl Doi {
    /// Parse and normalise a DOI. Returns `None` for values that are not DOIs.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned = DOI_PREFIX.replace(raw.trim(), "");
        let cleaned = cleaned.trim().to_lowercase();

        if cleaned.is_empty() || !cleaned.contains('/') {
            return None;
        }

        Some(Self(cleaned))
    }

    /// Get the DOI string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Doi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Originating provider of a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Source {
    Arxiv,
    Core,
    Crossref,
    OpenAlex,
    /// Any adapter outside the built-in set
    Custom(String),
}

impl Source {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Arxiv => "arxiv",
            Self::Core => "core",
            Self::Crossref => "crossref",
            Self::OpenAlex => "openalex",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Source {
    fn from(value: String) -> Self {
        match value.as_str() {
            "arxiv" => Self::Arxiv,
            "core" => Self::Core,
            "crossref" => Self::Crossref,
            "openalex" => Self::OpenAlex,
            _ => Self::Custom(value),
        }
    }
}

impl From<Source> for String {
    fn from(value: Source) -> Self {
        value.as_str().to_string()
    }
}

/// Snapshot of a merged-away record, kept on its canonical document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub year: Option<i32>,
    pub source: Source,
    pub title: Option<String>,
    pub journal: Option<String>,
    pub urls: Vec<String>,
    pub doi: Option<Doi>,
    pub publication_date: Option<NaiveDate>,
}

/// One harvested record.
///
/// Primary fields are fixed at construction; only the merge step may attach
/// versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    id: DocumentId,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    authors: Vec<String>,
    publication_date: Option<NaiveDate>,
    journal: Option<String>,
    volume: Option<String>,
    doi: Option<Doi>,
    urls: Vec<String>,
    source: Source,
    versions: Vec<Version>,
}

impl Document {
    /// Start building a document harvested from `source`
    #[must_use]
    pub fn builder(source: Source) -> DocumentBuilder {
        DocumentBuilder::new(source)
    }

    #[must_use]
    pub const fn id(&self) -> DocumentId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    #[must_use]
    pub fn abstract_text(&self) -> Option<&str> {
        self.abstract_text.as_deref()
    }

    #[must_use]
    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    #[must_use]
    pub const fn publication_date(&self) -> Option<NaiveDate> {
        self.publication_date
    }

    #[must_use]
    pub fn year(&self) -> Option<i32> {
        self.publication_date.map(|date| date.year())
    }

    #[must_use]
    pub fn journal(&self) -> Option<&str> {
        self.journal.as_deref()
    }

    #[must_use]
    pub fn volume(&self) -> Option<&str> {
        self.volume.as_deref()
    }

    #[must_use]
    pub const fn doi(&self) -> Option<&Doi> {
        self.doi.as_ref()
    }

    #[must_use]
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    #[must_use]
    pub const fn source(&self) -> &Source {
        &self.source
    }

    #[must_use]
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    /// Number of absent descriptive fields; lower means a richer record
    #[must_use]
    pub fn empty_fields(&self) -> usize {
        [
            self.title.is_none(),
            self.abstract_text.is_none(),
            self.publication_date.is_none(),
            self.authors.is_empty(),
            self.journal.is_none(),
            self.volume.is_none(),
            self.doi.is_none(),
            self.urls.is_empty(),
        ]
        .into_iter()
        .filter(|empty| *empty)
        .count()
    }

    /// Snapshot of this record as an alternate version of another one
    #[must_use]
    pub fn as_version(&self) -> Version {
        Version {
            year: self.year(),
            source: self.source.clone(),
            title: self.title.clone(),
            journal: self.journal.clone(),
            urls: self.urls.clone(),
            doi: self.doi.clone(),
            publication_date: self.publication_date,
        }
    }

    pub(crate) fn add_version(&mut self, other: &Self) {
        self.versions.push(other.as_version());
    }
}

/// Builder used by source adapters to map provider payloads
#[derive(Debug)]
pub struct DocumentBuilder {
    title: Option<String>,
    abstract_text: Option<String>,
    authors: Vec<String>,
    publication_date: Option<NaiveDate>,
    journal: Option<String>,
    volume: Option<String>,
    doi: Option<Doi>,
    urls: Vec<String>,
    source: Source,
}

impl DocumentBuilder {
    fn new(source: Source) -> Self {
        Self {
            title: None,
            abstract_text: None,
            authors: Vec::new(),
            publication_date: None,
            journal: None,
            volume: None,
            doi: None,
            urls: Vec::new(),
            source,
        }
    }

    #[must_use]
    pub fn title(mut self, title: impl AsRef<str>) -> Self {
        let flattened = title.as_ref().split_whitespace().collect::<Vec<_>>().join(" ");
        self.title = non_blank(&flattened);
        self
    }

    #[must_use]
    pub fn abstract_text(mut self, text: impl AsRef<str>) -> Self {
        self.abstract_text = non_blank(text.as_ref());
        self
    }

    #[must_use]
    pub fn author(mut self, name: impl AsRef<str>) -> Self {
        if let Some(name) = non_blank(name.as_ref()) {
            self.authors.push(name);
        }
        self
    }

    #[must_use]
    pub fn authors<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .fold(self, |builder, name| builder.author(name))
    }

    #[must_use]
    pub const fn publication_date(mut self, date: NaiveDate) -> Self {
        self.publication_date = Some(date);
        self
    }

    /// Year-only publication date, pinned to January 1st
    #[must_use]
    pub fn year(mut self, year: i32) -> Self {
        self.publication_date = NaiveDate::from_ymd_opt(year, 1, 1);
        self
    }

    #[must_use]
    pub fn journal(mut self, journal: impl AsRef<str>) -> Self {
        self.journal = non_blank(journal.as_ref());
        self
    }

    #[must_use]
    pub fn volume(mut self, volume: impl AsRef<str>) -> Self {
        self.volume = non_blank(volume.as_ref());
        self
    }

    /// Set the DOI; malformed values are dropped
    #[must_use]
    pub fn doi(mut self, doi: impl AsRef<str>) -> Self {
        self.doi = Doi::parse(doi.as_ref());
        self
    }

    #[must_use]
    pub fn url(mut self, url: impl AsRef<str>) -> Self {
        if let Some(url) = non_blank(url.as_ref()) {
            if !self.urls.contains(&url) {
                self.urls.push(url);
            }
        }
        self
    }

    #[must_use]
    pub fn build(self) -> Document {
        Document {
            id: DocumentId::new(),
            title: self.title,
            abstract_text: self.abstract_text,
            authors: self.authors,
            publication_date: self.publication_date,
            journal: self.journal,
            volume: self.volume,
            doi: self.doi,
            urls: self.urls,
            source: self.source,
            versions: Vec::new(),
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doi_normalisation() {
        let doi = Doi::parse(" https://doi.org/10.1038/Nature12373 ").unwrap();
        assert_eq!(doi.as_str(), "10.1038/nature12373");
        assert_eq!(Doi::parse("doi:10.1/A"), Doi::parse("10.1/a"));
        assert!(Doi::parse("not-a-doi").is_none());
        assert!(Doi::parse("   ").is_none());
    }

    #[test]
    fn test_ids_are_unique_per_record() {
        let a = Document::builder(Source::Crossref).title("Same").build();
        let b = Document::builder(Source::Crossref).title("Same").build();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_empty_field_count() {
        let bare = Document::builder(Source::Arxiv).build();
        assert_eq!(bare.empty_fields(), 8);

        let rich = Document::builder(Source::Crossref)
            .title("Deep Learning")
            .abstract_text("An overview")
            .author("LeCun, Y.")
            .year(2015)
            .journal("Nature")
            .volume("521")
            .doi("10.1038/nature14539")
            .url("https://doi.org/10.1038/nature14539")
            .build();
        assert_eq!(rich.empty_fields(), 0);
        assert_eq!(rich.year(), Some(2015));
    }

    #[test]
    fn test_blank_values_count_as_empty() {
        let doc = Document::builder(Source::OpenAlex)
            .title("  \n ")
            .journal("")
            .author(" ")
            .build();
        assert!(doc.title().is_none());
        assert!(doc.journal().is_none());
        assert!(doc.authors().is_empty());
    }

    #[test]
    fn test_title_line_breaks_are_flattened() {
        let doc = Document::builder(Source::Core)
            .title("Attention\n  is all\nyou need")
            .build();
        assert_eq!(doc.title(), Some("Attention is all you need"));
    }

    #[test]
    fn test_source_round_trips_through_strings() {
        assert_eq!(Source::from("openalex".to_string()), Source::OpenAlex);
        assert_eq!(
            Source::from("pubmed".to_string()),
            Source::Custom("pubmed".to_string())
        );
        assert_eq!(String::from(Source::Crossref), "crossref");
    }

    #[test]
    fn test_version_snapshot() {
        let mut canonical = Document::builder(Source::Crossref).title("A").build();
        let other = Document::builder(Source::Arxiv)
            .title("A")
            .year(2020)
            .url("https://arxiv.org/abs/1")
            .build();
        canonical.add_version(&other);

        let version = &canonical.versions()[0];
        assert_eq!(version.source, Source::Arxiv);
        assert_eq!(version.year, Some(2020));
        assert_eq!(version.urls, vec!["https://arxiv.org/abs/1".to_string()]);
    }
}
