use super::http::HttpSource;
use super::traits::{Page, PageCursor, ProviderError, SourceAdapter};
use crate::config::{HttpConfig, SourceConfig};
use crate::document::{Document, Source};
use crate::resilience::RetryConfig;
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, info, warn};
use url::Url;

/// Id namespace of the entries arXiv uses to report request errors
const ERROR_ID_PREFIX: &str = "http://arxiv.org/api/errors";

/// arXiv API adapter for e-prints (offset pagination over the Atom feed)
#[derive(Debug)]
pub struct ArxivSource {
    http: HttpSource,
}

/// One parsed feed page
struct ArxivFeed {
    documents: Vec<Document>,
    total_results: Option<u32>,
}

impl ArxivSource {
    pub fn new(http: &HttpConfig, settings: SourceConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http: HttpSource::new(Source::Arxiv, http, settings)?,
        })
    }

    /// Build arXiv API URL for search
    fn build_search_url(&self, query: &str, start: u32, max_results: u32) -> Result<Url, ProviderError> {
        let mut url = Url::parse(self.http.base_url())
            .map_err(|e| ProviderError::Other(format!("Invalid base URL: {e}")))?;

        url.query_pairs_mut()
            .append_pair("search_query", &format!("all:\"{}\"", query.trim()))
            .append_pair("start", &start.to_string())
            .append_pair("max_results", &max_results.to_string())
            .append_pair("sortBy", "relevance")
            .append_pair("sortOrder", "descending");

        Ok(url)
    }

    /// Parse arXiv Atom feed response
    fn parse_feed(response_text: &str) -> Result<ArxivFeed, ProviderError> {
        use roxmltree::Document as Xml;

        let doc = Xml::parse(response_text)
            .map_err(|e| ProviderError::Parse(format!("Failed to parse XML: {e}")))?;

        let total_results = doc
            .descendants()
            .find(|n| n.has_tag_name("totalResults"))
            .and_then(|n| n.text())
            .and_then(|text| text.trim().parse().ok());

        let mut documents = Vec::new();

        for entry in doc.descendants().filter(|n| n.has_tag_name("entry")) {
            let child_text = |tag: &str| {
                entry
                    .children()
                    .find(|n| n.has_tag_name(tag))
                    .and_then(|n| n.text())
                    .map(str::trim)
            };
            if child_text("id").is_some_and(|id| id.starts_with(ERROR_ID_PREFIX)) {
                let message = child_text("summary").unwrap_or("unknown error");
                warn!("arXiv reported an error: {}", message);
                return Err(ProviderError::InvalidQuery(format!("arXiv: {message}")));
            }

            let mut builder = Document::builder(Source::Arxiv);
            let mut has_title = false;

            for child in entry.children().filter(roxmltree::Node::is_element) {
                let text = child.text().unwrap_or_default().trim();
                match child.tag_name().name() {
                    "id" => builder = builder.url(text),
                    "title" => {
                        has_title = !text.is_empty();
                        builder = builder.title(text);
                    }
                    "summary" => builder = builder.abstract_text(text.replace('\n', " ")),
                    "published" => {
                        // YYYY-MM-DDTHH:MM:SSZ
                        if let Some(date) = text
                            .get(..10)
                            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
                        {
                            builder = builder.publication_date(date);
                        }
                    }
                    "author" => {
                        for name in child.descendants().filter(|n| n.has_tag_name("name")) {
                            builder = builder.author(name.text().unwrap_or_default());
                        }
                    }
                    "link" => {
                        if let Some(href) = child.attribute("href") {
                            builder = builder.url(href);
                        }
                    }
                    "doi" => builder = builder.doi(text),
                    "journal_ref" => builder = builder.journal(text),
                    _ => {}
                }
            }

            if has_title {
                documents.push(builder.build());
            }
        }

        debug!("Parsed {} papers from arXiv response", documents.len());
        Ok(ArxivFeed {
            documents,
            total_results,
        })
    }
}

#[async_trait]
impl SourceAdapter for ArxivSource {
    fn source(&self) -> Source {
        Source::Arxiv
    }

    fn max_page_size(&self) -> u32 {
        self.http.settings().page_size
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
        let PageCursor::Offset(start) = cursor else {
            return Err(ProviderError::Other(format!("arxiv pages by offset, got {cursor}")));
        };

        let url = self.build_search_url(query, *start, page_size)?;
        debug!("arXiv search URL: {}", url);

        let response = self.http.send(self.http.client().get(url)).await?;
        let response = self.http.check_status(response).await?;
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Network {
                source_name: "arxiv".to_string(),
                message: format!("Failed to read response: {e}"),
            })?;

        let feed = Self::parse_feed(&text)?;
        let fetched = u32::try_from(feed.documents.len()).unwrap_or(u32::MAX);
        let exhausted = fetched == 0
            || fetched < page_size
            || feed
                .total_results
                .is_some_and(|total| start.saturating_add(fetched) >= total);

        info!("arxiv: {} documents at offset {}", fetched, start);

        Ok(Page {
            documents: feed.documents,
            next: (!exhausted).then(|| PageCursor::Offset(start + fetched)),
        })
    }
}
