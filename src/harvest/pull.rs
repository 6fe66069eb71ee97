//! Generic pull driver shared by every source adapter.
//!
//! Turns page-level [`SourceAdapter::fetch_page`] calls into a lazy,
//! quota-bounded document stream and walks the ledger entry through
//! `Working -> Waiting -> Working ... -> Finished*`.

use super::ledger::{LedgerEntry, QuotaWait, SourceStatus};
use crate::document::Document;
use crate::resilience::{retry_with_policy, RetryPolicy};
use crate::sources::{Page, PageCursor, SourceAdapter};
use crate::Error;
use futures::stream::{self, Stream};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Smallest page the driver shrinks to after "page too large" answers
pub const MIN_PAGE_SIZE: u32 = 20;

/// Lazy, finite, non-restartable stream of documents from one adapter.
///
/// Every yielded document has already been charged to `entry`. The entry is
/// in a terminal status once the stream ends.
pub fn pull(
    adapter: Arc<dyn SourceAdapter>,
    query: String,
    entry: Arc<LedgerEntry>,
    poll_interval: Duration,
) -> impl Stream<Item = Document> + Send + 'static {
    let puller = Puller::new(adapter, query, entry, poll_interval);
    stream::unfold(puller, |mut puller| async move {
        puller.next_document().await.map(|doc| (doc, puller))
    })
}

struct Puller {
    adapter: Arc<dyn SourceAdapter>,
    query: String,
    entry: Arc<LedgerEntry>,
    poll_interval: Duration,
    policy: RetryPolicy,
    /// `None` once upstream is exhausted
    cursor: Option<PageCursor>,
    buffer: VecDeque<Document>,
    page_ceiling: u32,
    done: bool,
}

impl Puller {
    fn new(
        adapter: Arc<dyn SourceAdapter>,
        query: String,
        entry: Arc<LedgerEntry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            policy: RetryPolicy::from_config(adapter.retry_config()),
            cursor: Some(adapter.first_cursor()),
            page_ceiling: adapter.max_page_size().max(1),
            buffer: VecDeque::new(),
            done: false,
            adapter,
            query,
            entry,
            poll_interval,
        }
    }

    async fn next_document(&mut self) -> Option<Document> {
        loop {
            if self.done {
                return None;
            }

            if self.buffer.is_empty() && self.cursor.is_none() {
                info!("{}: upstream exhausted", self.entry.source());
                self.finish(SourceStatus::Finished, None).await;
                return None;
            }

            let quota = match self.entry.await_quota(self.poll_interval).await {
                QuotaWait::Granted(quota) => quota,
                QuotaWait::Cancelled => {
                    debug!("{}: cancelled", self.entry.source());
                    self.done = true;
                    return None;
                }
            };

            if let Some(document) = self.buffer.pop_front() {
                self.entry.record(1).await;
                return Some(document);
            }

            let Some(cursor) = self.cursor.clone() else {
                continue;
            };
            let page_size = quota.min(self.page_ceiling);

            let Some(result) = self.fetch(&cursor, page_size).await else {
                debug!("{}: cancelled during a page request", self.entry.source());
                self.finish(SourceStatus::Finished, None).await;
                return None;
            };

            match result {
                Ok(page) => self.accept(page),
                Err(Error::PageTooLarge { requested, .. }) => {
                    if self.page_ceiling <= MIN_PAGE_SIZE {
                        let message = format!("page of {requested} still too large");
                        self.finish(SourceStatus::FinishedWithError, Some(message)).await;
                        return None;
                    }
                    self.page_ceiling = (self.page_ceiling / 2).max(MIN_PAGE_SIZE);
                    warn!(
                        "{}: page of {} too large, shrinking to {}",
                        self.entry.source(),
                        requested,
                        self.page_ceiling
                    );
                }
                Err(error) if error.is_retryable() => {
                    warn!("{}: giving up after retries: {}", self.entry.source(), error);
                    self.finish(SourceStatus::Finished, Some(error.to_string())).await;
                    return None;
                }
                Err(error) => {
                    warn!("{}: failed: {}", self.entry.source(), error);
                    self.finish(SourceStatus::FinishedWithError, Some(error.to_string()))
                        .await;
                    return None;
                }
            }
        }
    }

    /// One page with retries; `None` when the entry is cancelled first
    async fn fetch(&self, cursor: &PageCursor, page_size: u32) -> Option<crate::Result<Page>> {
        let adapter = &self.adapter;
        let entry = &self.entry;
        let query = self.query.as_str();
        let name = format!("{} page at {}", adapter.source(), cursor);

        debug!("{}: requesting {} records at {}", adapter.source(), page_size, cursor);

        let attempts = retry_with_policy(
            || async move {
                if entry.is_cancelled().await {
                    return Err(Error::Provider(format!("{} cancelled", adapter.source())));
                }
                adapter
                    .fetch_page(query, cursor, page_size)
                    .await
                    .map_err(Error::from)
            },
            &self.policy,
            &name,
        );

        // Backoff sleeps and slow requests must not outlive cancellation
        tokio::select! {
            result = attempts => {
                if self.entry.is_cancelled().await {
                    None
                } else {
                    Some(result)
                }
            }
            () = self.entry.cancelled(self.poll_interval) => None,
        }
    }

    fn accept(&mut self, page: Page) {
        // An empty page ends the pull even if the provider offered a cursor
        self.cursor = if page.documents.is_empty() {
            None
        } else {
            page.next
        };
        self.buffer.extend(page.documents);
    }

    async fn finish(&mut self, status: SourceStatus, error: Option<String>) {
        self.done = true;
        self.entry.finish(status, error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Source;
    use crate::resilience::RetryConfig;
    use crate::sources::{MemorySource, ProviderError};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    const POLL: Duration = Duration::from_millis(10);

    fn corpus(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| Document::builder(Source::Crossref).title(format!("Paper {i}")).build())
            .collect()
    }

    /// Fails with the given error a fixed number of times, then serves one page
    struct Flaky {
        failures: AtomicU32,
        error: fn() -> ProviderError,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SourceAdapter for Flaky {
        fn source(&self) -> Source {
            Source::Custom("flaky".to_string())
        }

        fn max_page_size(&self) -> u32 {
            10
        }

        fn retry_config(&self) -> RetryConfig {
            RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                ..RetryConfig::default()
            }
        }

        async fn fetch_page(
            &self,
            _query: &str,
            _cursor: &PageCursor,
            _page_size: u32,
        ) -> Result<Page, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err((self.error)());
            }
            Ok(Page::last(corpus(2)))
        }
    }

    /// Rejects pages above a size with "page too large"
    struct Picky {
        accepts: u32,
        seen: std::sync::Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl SourceAdapter for Picky {
        fn source(&self) -> Source {
            Source::Core
        }

        fn max_page_size(&self) -> u32 {
            200
        }

        async fn fetch_page(
            &self,
            _query: &str,
            _cursor: &PageCursor,
            page_size: u32,
        ) -> Result<Page, ProviderError> {
            self.seen.lock().unwrap().push(page_size);
            if page_size > self.accepts {
                return Err(ProviderError::PageTooLarge {
                    source_name: "core".to_string(),
                    requested: page_size,
                });
            }
            Ok(Page::last(corpus(1)))
        }
    }

    #[tokio::test]
    async fn test_pull_stops_at_exhausted_upstream() {
        let adapter = Arc::new(MemorySource::new(Source::Crossref, corpus(3), 2));
        let entry = Arc::new(LedgerEntry::new(Source::Crossref, 10));

        let docs: Vec<Document> = pull(adapter, "q".into(), entry.clone(), POLL).collect().await;

        assert_eq!(docs.len(), 3);
        assert_eq!(docs[2].title(), Some("Paper 2"));
        let report = entry.snapshot().await;
        assert_eq!(report.status, SourceStatus::Finished);
        assert_eq!(report.pulled, 3);
        assert_eq!(report.quota_remaining, 7);
    }

    #[tokio::test]
    async fn test_pull_waits_when_quota_runs_out() {
        let adapter = Arc::new(MemorySource::new(Source::Crossref, corpus(10), 4));
        let entry = Arc::new(LedgerEntry::new(Source::Crossref, 3));

        let mut stream = Box::pin(pull(adapter, "q".into(), entry.clone(), POLL));
        for _ in 0..3 {
            assert!(stream.next().await.is_some());
        }

        // quota is spent, the next poll parks the entry
        let pending = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(pending.is_err());
        assert_eq!(entry.status().await, SourceStatus::Waiting);

        entry.grant(1).await;
        assert!(stream.next().await.is_some());

        entry.cancel().await;
        assert!(stream.next().await.is_none());
        let report = entry.snapshot().await;
        assert_eq!(report.status, SourceStatus::Finished);
        assert_eq!(report.pulled, 4);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let adapter = Arc::new(Flaky {
            failures: AtomicU32::new(2),
            error: || ProviderError::ServiceUnavailable {
                source_name: "flaky".to_string(),
                reason: "HTTP 503".to_string(),
            },
            calls: AtomicU32::new(0),
        });
        let entry = Arc::new(LedgerEntry::new(adapter.source(), 5));

        let docs: Vec<Document> = pull(adapter.clone(), "q".into(), entry.clone(), POLL)
            .collect()
            .await;

        assert_eq!(docs.len(), 2);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
        assert_eq!(entry.status().await, SourceStatus::Finished);
    }

    #[tokio::test]
    async fn test_exhausted_retries_finish_without_error_status() {
        let adapter = Arc::new(Flaky {
            failures: AtomicU32::new(10),
            error: || ProviderError::RateLimit { retry_after: None },
            calls: AtomicU32::new(0),
        });
        let entry = Arc::new(LedgerEntry::new(adapter.source(), 5));

        let docs: Vec<Document> = pull(adapter, "q".into(), entry.clone(), POLL).collect().await;

        assert!(docs.is_empty());
        let report = entry.snapshot().await;
        assert_eq!(report.status, SourceStatus::Finished);
        assert!(report.last_error.is_some());
    }

    #[tokio::test]
    async fn test_permanent_errors_finish_with_error() {
        let adapter = Arc::new(Flaky {
            failures: AtomicU32::new(1),
            error: || ProviderError::Parse("not json".to_string()),
            calls: AtomicU32::new(0),
        });
        let entry = Arc::new(LedgerEntry::new(adapter.source(), 5));

        let docs: Vec<Document> = pull(adapter.clone(), "q".into(), entry.clone(), POLL)
            .collect()
            .await;

        assert!(docs.is_empty());
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(entry.status().await, SourceStatus::FinishedWithError);
    }

    #[tokio::test]
    async fn test_page_ceiling_halves_until_accepted() {
        let adapter = Arc::new(Picky {
            accepts: 60,
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let entry = Arc::new(LedgerEntry::new(Source::Core, 500));

        let docs: Vec<Document> = pull(adapter.clone(), "q".into(), entry, POLL).collect().await;

        assert_eq!(docs.len(), 1);
        assert_eq!(*adapter.seen.lock().unwrap(), vec![200, 100, 50]);
    }

    #[tokio::test]
    async fn test_page_ceiling_gives_up_at_floor() {
        let adapter = Arc::new(Picky {
            accepts: 5,
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let entry = Arc::new(LedgerEntry::new(Source::Core, 500));

        let docs: Vec<Document> = pull(adapter.clone(), "q".into(), entry.clone(), POLL)
            .collect()
            .await;

        assert!(docs.is_empty());
        assert_eq!(*adapter.seen.lock().unwrap(), vec![200, 100, 50, 25, 20]);
        assert_eq!(entry.status().await, SourceStatus::FinishedWithError);
    }
}
