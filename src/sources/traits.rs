use crate::document::{Document, Source};
use crate::resilience::RetryConfig;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Position of the next page to request from a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// Numeric result offset (Crossref, arXiv)
    Offset(u32),
    /// Opaque continuation token (OpenAlex cursor, CORE scroll id)
    Token(String),
    /// First page of a token-paginated provider
    Start,
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offset(offset) => write!(f, "offset {offset}"),
            Self::Token(token) => write!(f, "token {token}"),
            Self::Start => f.write_str("start"),
        }
    }
}

/// One page of provider results, already mapped to documents
#[derive(Debug, Clone)]
pub struct Page {
    pub documents: Vec<Document>,
    /// `None` once the provider has no further results
    pub next: Option<PageCursor>,
}

impl Page {
    #[must_use]
    pub const fn last(documents: Vec<Document>) -> Self {
        Self {
            documents,
            next: None,
        }
    }
}

/// Errors that can occur during provider operations
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error from {source_name}: {message}")]
    Network {
        source_name: String,
        message: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limit exceeded")]
    RateLimit { retry_after: Option<Duration> },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Service unavailable ({source_name}): {reason}")]
    ServiceUnavailable { source_name: String, reason: String },

    /// Provider could not serve a page this large
    #[error("{source_name} rejected a page of {requested} records")]
    PageTooLarge { source_name: String, requested: u32 },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider error: {0}")]
    Other(String),
}

/// Uniform wrapper around one external literature provider.
///
/// Implementations only translate a single page request; quota accounting,
/// retries, suspension and cancellation live in the shared pull driver
/// (see [`crate::harvest::pull`]).
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source tag stamped on every document this adapter produces
    fn source(&self) -> Source;

    /// Largest page the provider serves in one request
    fn max_page_size(&self) -> u32;

    /// Cursor of the first page
    fn first_cursor(&self) -> PageCursor {
        PageCursor::Offset(0)
    }

    /// Backoff applied to retryable page failures
    fn retry_config(&self) -> RetryConfig {
        RetryConfig::default()
    }

    /// Fetch one page of at most `page_size` results starting at `cursor`
    async fn fetch_page(
        &self,
        query: &str,
        cursor: &PageCursor,
        page_size: u32,
    ) -> Result<Page, ProviderError>;
}
