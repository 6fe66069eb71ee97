use super::http::HttpSource;
use super::traits::{Page, PageCursor, ProviderError, SourceAdapter};
use crate::config::{HttpConfig, SourceConfig};
use crate::document::{Document, Source};
use crate::resilience::RetryConfig;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// CORE serves at most 200 works per scroll page
const MAX_LIMIT: u32 = 200;
const RETRY_AFTER_HEADER: &str = "X-RateLimit-Retry-After";
const OUT_OF_MEMORY_MARKER: &str = "Allowed memory size";

#[derive(Debug, Serialize)]
struct CoreQuery<'a> {
    q: &'a str,
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    scroll: Option<bool>,
    #[serde(rename = "scrollId", skip_serializing_if = "Option::is_none")]
    scroll_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CoreResponse {
    #[serde(default)]
    results: Vec<CoreWork>,
    #[serde(rename = "scrollId")]
    scroll_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoreWork {
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    doi: Option<String>,
    download_url: Option<String>,
    published_date: Option<String>,
    year_published: Option<i32>,
    #[serde(default)]
    authors: Vec<CoreAuthor>,
    #[serde(default)]
    journals: Vec<CoreJournal>,
}

#[derive(Debug, Deserialize)]
struct CoreAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CoreJournal {
    title: Option<String>,
}

/// CORE v3 search adapter (scroll pagination, bearer API key)
#[derive(Debug)]
pub struct CoreSource {
    http: HttpSource,
    api_key: String,
}

impl CoreSource {
    pub fn new(http: &HttpConfig, settings: SourceConfig) -> Result<Self, ProviderError> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::Auth("CORE requires an API key".to_string()))?;

        Ok(Self {
            http: HttpSource::new(Source::Core, http, settings)?,
            api_key,
        })
    }

    fn convert_work(work: CoreWork) -> Document {
        let mut builder = Document::builder(Source::Core);

        if let Some(title) = &work.title {
            builder = builder.title(title);
        }
        if let Some(text) = &work.abstract_text {
            builder = builder.abstract_text(text);
        }
        if let Some(doi) = &work.doi {
            builder = builder.doi(doi);
        }
        if let Some(url) = &work.download_url {
            builder = builder.url(url);
        }

        let date = work
            .published_date
            .as_deref()
            .and_then(|raw| raw.get(..10))
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok());
        builder = match (date, work.year_published) {
            (Some(date), _) => builder.publication_date(date),
            (None, Some(year)) => builder.year(year),
            (None, None) => builder,
        };

        builder = builder.authors(work.authors.iter().filter_map(|a| a.name.as_deref()));
        if let Some(journal) = work.journals.first().and_then(|j| j.title.as_ref()) {
            builder = builder.journal(journal);
        }

        builder.build()
    }
}

/// CORE announces the end of a rate-limit window as a timestamp
fn core_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER_HEADER)?.to_str().ok()?;
    let until = DateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw.trim()))
        .ok()?;
    let wait = until.with_timezone(&Utc) - Utc::now();
    // a little slack past the announced instant
    Some(wait.to_std().unwrap_or_default() + Duration::from_secs(2))
}

#[async_trait]
impl SourceAdapter for CoreSource {
    fn source(&self) -> Source {
        Source::Core
    }

    fn max_page_size(&self) -> u32 {
        self.http.settings().page_size.min(MAX_LIMIT)
    }

    fn first_cursor(&self) -> PageCursor {
        PageCursor::Start
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
        let body = match cursor {
            PageCursor::Start => CoreQuery {
                q: query,
                limit: page_size,
                scroll: Some(true),
                scroll_id: None,
            },
            PageCursor::Token(scroll_id) => CoreQuery {
                q: query,
                limit: page_size,
                scroll: None,
                scroll_id: Some(scroll_id),
            },
            PageCursor::Offset(_) => {
                return Err(ProviderError::Other(format!("core pages by scroll id, got {cursor}")))
            }
        };

        let url = format!("{}/search/works", self.http.base_url());
        debug!("CORE request: {} at {}", url, cursor);

        let request = self
            .http
            .client()
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body);
        let response = self.http.send(request).await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = core_retry_after(response.headers());
            warn!("Too many requests on CORE, retry after {:?}", retry_after);
            return Err(ProviderError::RateLimit { retry_after });
        }
        if status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            if text.contains(OUT_OF_MEMORY_MARKER) {
                return Err(ProviderError::PageTooLarge {
                    source_name: "core".to_string(),
                    requested: page_size,
                });
            }
            return Err(self.http.status_error(status, None, &text));
        }

        let body: CoreResponse = self.http.json(response).await?;
        let next = match body.scroll_id {
            Some(scroll_id) if !body.results.is_empty() => Some(PageCursor::Token(scroll_id)),
            _ => None,
        };
        let documents: Vec<Document> = body.results.into_iter().map(Self::convert_work).collect();

        info!("core: {} documents", documents.len());

        Ok(Page { documents, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_requires_api_key() {
        let settings = SourceConfig {
            base_url: "https://api.core.ac.uk/v3".to_string(),
            ..SourceConfig::default()
        };
        assert!(matches!(
            CoreSource::new(&HttpConfig::default(), settings),
            Err(ProviderError::Auth(_))
        ));
    }

    #[test]
    fn test_convert_work() {
        let work: CoreWork = serde_json::from_value(serde_json::json!({
            "title": "Open\naccess aggregation",
            "abstract": "Aggregating repositories.",
            "doi": "10.5555/Core.1",
            "downloadUrl": "https://core.ac.uk/download/1.pdf",
            "publishedDate": "2019-06-01T00:00:00",
            "authors": [{"name": "Knoth, Petr"}, {"name": null}],
            "journals": [{"title": "D-Lib"}]
        }))
        .unwrap();

        let doc = CoreSource::convert_work(work);
        assert_eq!(doc.title(), Some("Open access aggregation"));
        assert_eq!(doc.doi().unwrap().as_str(), "10.5555/core.1");
        assert_eq!(doc.year(), Some(2019));
        assert_eq!(doc.authors(), &["Knoth, Petr"]);
        assert_eq!(doc.journal(), Some("D-Lib"));
    }

    #[test]
    fn test_retry_after_timestamp() {
        let mut headers = HeaderMap::new();
        let until = (Utc::now() + chrono::Duration::seconds(30)).format("%Y-%m-%dT%H:%M:%S%z");
        headers.insert(
            RETRY_AFTER_HEADER,
            HeaderValue::from_str(&until.to_string()).unwrap(),
        );
        let wait = core_retry_after(&headers).unwrap();
        assert!(wait > Duration::from_secs(20) && wait <= Duration::from_secs(33));
    }
}
