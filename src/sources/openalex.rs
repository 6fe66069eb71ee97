use super::http::HttpSource;
use super::traits::{Page, PageCursor, ProviderError, SourceAdapter};
use crate::config::{HttpConfig, SourceConfig};
use crate::document::{Document, Source};
use crate::resilience::RetryConfig;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// OpenAlex caps `per-page` at 200
const MAX_PER_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
struct OpenAlexResponse {
    meta: OpenAlexMeta,
    #[serde(default)]
    results: Vec<OpenAlexWork>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexMeta {
    next_cursor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OpenAlexWork {
    id: Option<String>,
    title: Option<String>,
    display_name: Option<String>,
    doi: Option<String>,
    publication_date: Option<String>,
    publication_year: Option<i32>,
    ids: Option<HashMap<String, serde_json::Value>>,
    open_access: Option<OpenAccess>,
    authorships: Vec<Authorship>,
    biblio: Option<Biblio>,
    primary_location: Option<Location>,
    host_venue: Option<Venue>,
    abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,
}

#[derive(Debug, Deserialize)]
struct OpenAccess {
    #[serde(default)]
    is_oa: bool,
    oa_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Authorship {
    author: Venue,
}

#[derive(Debug, Deserialize)]
struct Biblio {
    volume: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Location {
    source: Option<Venue>,
}

#[derive(Debug, Deserialize)]
struct Venue {
    display_name: Option<String>,
}

/// OpenAlex works API adapter (cursor pagination)
#[derive(Debug)]
pub struct OpenAlexSource {
    http: HttpSource,
}

impl OpenAlexSource {
    pub fn new(http: &HttpConfig, settings: SourceConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http: HttpSource::new(Source::OpenAlex, http, settings)?,
        })
    }

    fn convert_work(work: OpenAlexWork) -> Document {
        let mut builder = Document::builder(Source::OpenAlex);

        if let Some(title) = work.title.as_ref().or(work.display_name.as_ref()) {
            builder = builder.title(title);
        }
        if let Some(doi) = &work.doi {
            builder = builder.doi(doi);
        }

        let date = work
            .publication_date
            .as_deref()
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok());
        builder = match (date, work.publication_year) {
            (Some(date), _) => builder.publication_date(date),
            (None, Some(year)) => builder.year(year),
            (None, None) => builder,
        };

        match &work.ids {
            Some(ids) => {
                for key in ["openalex", "doi"] {
                    if let Some(url) = ids.get(key).and_then(serde_json::Value::as_str) {
                        builder = builder.url(url);
                    }
                }
            }
            None => {
                if let Some(id) = &work.id {
                    builder = builder.url(id);
                }
            }
        }
        if let Some(OpenAccess {
            is_oa: true,
            oa_url: Some(url),
        }) = &work.open_access
        {
            builder = builder.url(url);
        }

        builder = builder.authors(
            work.authorships
                .iter()
                .filter_map(|a| a.author.display_name.as_deref()),
        );

        if let Some(volume) = work.biblio.as_ref().and_then(|b| b.volume.as_ref()) {
            builder = builder.volume(volume);
        }

        let venue = work
            .primary_location
            .as_ref()
            .and_then(|location| location.source.as_ref())
            .or(work.host_venue.as_ref())
            .and_then(|venue| venue.display_name.as_ref());
        if let Some(venue) = venue {
            builder = builder.journal(venue);
        }

        if let Some(index) = &work.abstract_inverted_index {
            builder = builder.abstract_text(rebuild_abstract(index));
        }

        builder.build()
    }
}

/// Reassemble an abstract from OpenAlex's word → positions index
fn rebuild_abstract(index: &HashMap<String, Vec<usize>>) -> String {
    let mut positioned: Vec<(usize, &str)> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |p| (*p, word.as_str())))
        .collect();
    positioned.sort_unstable();

    positioned
        .into_iter()
        .map(|(_, word)| word)
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl SourceAdapter for OpenAlexSource {
    fn source(&self) -> Source {
        Source::OpenAlex
    }

    fn max_page_size(&self) -> u32 {
        self.http.settings().page_size.min(MAX_PER_PAGE)
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
        let cursor_param = match cursor {
            PageCursor::Start => "*".to_string(),
            PageCursor::Token(token) => token.clone(),
            PageCursor::Offset(_) => {
                return Err(ProviderError::Other(format!(
                    "openalex pages by cursor, got {cursor}"
                )))
            }
        };

        let mut params = vec![
            ("search", query.to_string()),
            ("per-page", page_size.to_string()),
            ("cursor", cursor_param),
        ];
        if let Some(mailto) = &self.http.settings().mailto {
            params.push(("mailto", mailto.clone()));
        }

        let url = format!("{}/works", self.http.base_url());
        debug!("OpenAlex request: {} at {}", url, cursor);

        let response = self
            .http
            .send(self.http.client().get(&url).query(&params))
            .await?;
        let body: OpenAlexResponse = self.http.json(response).await?;

        let next = match body.meta.next_cursor {
            Some(token) if !body.results.is_empty() => Some(PageCursor::Token(token)),
            _ => None,
        };
        let documents: Vec<Document> = body.results.into_iter().map(Self::convert_work).collect();

        info!("openalex: {} documents", documents.len());

        Ok(Page { documents, next })
    }
}
