use super::http::HttpSource;
use super::traits::{Page, PageCursor, ProviderError, SourceAdapter};
use crate::config::{HttpConfig, SourceConfig};
use crate::document::{Document, Source};
use crate::resilience::RetryConfig;
use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::{debug, info};

/// Crossref serves at most 1000 rows per request
const MAX_ROWS: u32 = 1000;

static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("static markup pattern"));

#[derive(Debug, Deserialize)]
struct CrossrefResponse {
    message: CrossrefMessage,
}

#[derive(Debug, Deserialize)]
struct CrossrefMessage {
    #[serde(rename = "total-results")]
    total_results: Option<u64>,
    #[serde(default)]
    items: Vec<CrossrefItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefItem {
    #[serde(default)]
    title: Vec<String>,
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(default)]
    link: Vec<CrossrefLink>,
    published: Option<CrossrefDate>,
    issued: Option<CrossrefDate>,
    #[serde(default)]
    author: Vec<CrossrefAuthor>,
    #[serde(rename = "container-title", default)]
    container_title: Vec<String>,
    volume: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrossrefLink {
    #[serde(rename = "URL")]
    url: String,
}

#[derive(Debug, Deserialize)]
struct CrossrefDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i32>>>,
}

impl CrossrefDate {
    fn to_date(&self) -> Option<NaiveDate> {
        let parts = self.date_parts.first()?;
        let year = (*parts.first()?)?;
        let month = parts.get(1).copied().flatten().unwrap_or(1);
        let day = parts.get(2).copied().flatten().unwrap_or(1);
        NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CrossrefAuthor {
    given: Option<String>,
    family: Option<String>,
    name: Option<String>,
}

impl CrossrefAuthor {
    /// "Family, G." when both parts exist, otherwise whatever is present
    pub(crate) fn display_name(&self) -> Option<String> {
        match (&self.family, &self.given) {
            (Some(family), Some(given)) => {
                let initial = given.chars().next().map(|c| format!(" {c}.")).unwrap_or_default();
                Some(format!("{family},{initial}"))
            }
            (Some(family), None) => Some(family.clone()),
            (None, Some(given)) => Some(given.clone()),
            (None, None) => self.name.clone(),
        }
    }
}

/// Crossref works API adapter (offset pagination)
#[derive(Debug)]
pub struct CrossrefSource {
    http: HttpSource,
}

impl CrossrefSource {
    pub fn new(http: &HttpConfig, settings: SourceConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http: HttpSource::new(Source::Crossref, http, settings)?,
        })
    }

    pub(crate) fn convert_item(item: CrossrefItem) -> Document {
        let mut builder = Document::builder(Source::Crossref);

        if let Some(title) = item.title.first() {
            builder = builder.title(title);
        }
        if let Some(doi) = &item.doi {
            builder = builder.doi(doi);
        }
        for link in &item.link {
            builder = builder.url(&link.url);
        }
        if let Some(url) = &item.url {
            builder = builder.url(url);
        }
        if let Some(date) = item
            .published
            .as_ref()
            .or(item.issued.as_ref())
            .and_then(CrossrefDate::to_date)
        {
            builder = builder.publication_date(date);
        }
        builder = builder.authors(item.author.iter().filter_map(CrossrefAuthor::display_name));
        if let Some(journal) = item.container_title.first() {
            builder = builder.journal(journal);
        }
        if let Some(volume) = &item.volume {
            builder = builder.volume(volume);
        }
        if let Some(abstract_text) = &item.abstract_text {
            builder = builder.abstract_text(MARKUP.replace_all(abstract_text, " "));
        }

        builder.build()
    }
}

#[async_trait]
impl SourceAdapter for CrossrefSource {
    fn source(&self) -> Source {
        Source::Crossref
    }

    fn max_page_size(&self) -> u32 {
        self.http.settings().page_size.min(MAX_ROWS)
    }

    fn retry_config(&self) -> RetryConfig {
        self.http.settings().retry_config()
    }

    async fn fetch_page(
        &self,
        query: &str,
        cursor: &PageCursor,
        page_size: u32,
    ) -> Result<Page, ProviderError> {
        let PageCursor::Offset(offset) = cursor else {
            return Err(ProviderError::Other(format!(
                "crossref pages by offset, got {cursor}"
            )));
        };

        let mut params = vec![
            ("query", query.to_string()),
            ("rows", page_size.to_string()),
            ("offset", offset.to_string()),
        ];
        if let Some(mailto) = &self.http.settings().mailto {
            params.push(("mailto", mailto.clone()));
        }

        let url = format!("{}/works", self.http.base_url());
        debug!("Crossref request: {} at {}", url, cursor);

        let response = self
            .http
            .send(self.http.client().get(&url).query(&params))
            .await?;
        let body: CrossrefResponse = self.http.json(response).await?;

        let fetched = u32::try_from(body.message.items.len()).unwrap_or(u32::MAX);
        let reached = u64::from(*offset) + u64::from(fetched);
        let exhausted = fetched == 0
            || fetched < page_size
            || body.message.total_results.is_some_and(|total| reached >= total);

        let documents: Vec<Document> = body
            .message
            .items
            .into_iter()
            .map(Self::convert_item)
            .collect();

        info!("crossref: {} documents at offset {}", documents.len(), offset);

        Ok(Page {
            documents,
            next: (!exhausted).then(|| PageCursor::Offset(offset + fetched)),
        })
    }
}
