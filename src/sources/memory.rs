use super::traits::{Page, PageCursor, ProviderError, SourceAdapter};
use crate::document::{Document, Source};
use crate::resilience::RetryConfig;
use async_trait::async_trait;
use std::time::Duration;

/// Adapter over a fixed set of documents, paged by offset.
///
/// Used for offline runs and tests; the query is ignored.
#[derive(Debug, Clone)]
pub struct MemorySource {
    source: Source,
    documents: Vec<Document>,
    max_page_size: u32,
}

impl MemorySource {
    #[must_use]
    pub fn new(source: Source, documents: Vec<Document>, max_page_size: u32) -> Self {
        Self {
            source,
            documents,
            max_page_size: max_page_size.max(1),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl SourceAdapter for MemorySource {
    fn source(&self) -> Source {
        self.source.clone()
    }

    fn max_page_size(&self) -> u32 {
        self.max_page_size
    }

    fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            ..RetryConfig::default()
        }
    }

    async fn fetch_page(
        &self,
        _query: &str,
        cursor: &PageCursor,
        page_size: u32,
    ) -> Result<Page, ProviderError> {
        let PageCursor::Offset(offset) = cursor else {
            return Err(ProviderError::Other(format!("memory source pages by offset, got {cursor}")));
        };

        let start = (*offset as usize).min(self.documents.len());
        let end = start
            .saturating_add(page_size.min(self.max_page_size) as usize)
            .min(self.documents.len());
        let documents = self.documents[start..end].to_vec();

        let next = (end < self.documents.len())
            .then(|| PageCursor::Offset(u32::try_from(end).unwrap_or(u32::MAX)));

        Ok(Page { documents, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| Document::builder(Source::Crossref).title(format!("Paper {i}")).build())
            .collect()
    }

    #[tokio::test]
    async fn test_pages_in_order() {
        let source = MemorySource::new(Source::Crossref, docs(5), 2);

        let first = source.fetch_page("q", &PageCursor::Offset(0), 10).await.unwrap();
        assert_eq!(first.documents.len(), 2);
        assert_eq!(first.next, Some(PageCursor::Offset(2)));

        let last = source.fetch_page("q", &PageCursor::Offset(4), 2).await.unwrap();
        assert_eq!(last.documents[0].title(), Some("Paper 4"));
        assert!(last.next.is_none());
    }

    #[tokio::test]
    async fn test_empty_source_is_exhausted_immediately() {
        let source = MemorySource::new(Source::Custom("empty".to_string()), Vec::new(), 10);
        let page = source.fetch_page("q", &PageCursor::Offset(0), 10).await.unwrap();
        assert!(page.documents.is_empty());
        assert!(page.next.is_none());
    }
}
