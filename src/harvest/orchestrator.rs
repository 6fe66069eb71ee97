use super::ledger::{cancel_if_all_waiting, split_quota, LedgerEntry, SessionLedger, SourceReport, SourceStatus};
use super::pull::pull;
use crate::config::HarvestConfig;
use crate::document::Document;
use crate::sources::SourceAdapter;
use crate::{Error, Result};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// How a harvest ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestOutcome {
    /// The whole budget was pulled
    LimitSatisfied,
    /// Every source ran dry or failed before the budget was used
    SourcesExhausted,
    DeadlineReached,
}

/// Result of one harvest session
#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub session_id: Uuid,
    pub query: String,
    pub limit: u32,
    #[serde(skip)]
    pub documents: Vec<Document>,
    pub sources: Vec<SourceReport>,
    pub total_pulled: u32,
    /// Quota drained from finished sources with nobody left to take it
    pub unassigned_quota: u32,
    pub outcome: HarvestOutcome,
    pub elapsed_ms: u64,
}

/// Runs one worker per source adapter and moves unused quota between them
#[derive(Debug, Clone, Default)]
pub struct Harvester {
    config: HarvestConfig,
}

struct Worker {
    entry: Arc<LedgerEntry>,
    handle: Option<JoinHandle<()>>,
}

impl Harvester {
    #[must_use]
    pub const fn new(config: HarvestConfig) -> Self {
        Self { config }
    }

    /// Pull at most `limit` documents for `query` across `adapters`
    #[instrument(skip(self, adapters), fields(sources = adapters.len()))]
    pub async fn harvest(
        &self,
        query: &str,
        limit: u32,
        adapters: Vec<Arc<dyn SourceAdapter>>,
    ) -> Result<HarvestReport> {
        let query = query.trim();
        if query.is_empty() {
            return Err(invalid("query", "cannot be empty"));
        }
        if limit == 0 {
            return Err(invalid("limit", "must be greater than zero"));
        }
        if adapters.is_empty() {
            return Err(invalid("sources", "at least one source adapter is required"));
        }
        if self.config.poll_interval().is_zero() {
            return Err(invalid("poll_interval_ms", "must be greater than zero"));
        }

        let started = Instant::now();
        let poll = self.config.poll_interval();
        let quotas = split_quota(limit, adapters.len());
        let ledger = SessionLedger::new(adapters.iter().map(|a| a.source()).collect(), &quotas);

        info!(
            "Harvest {} started: limit {} over {} sources {:?}",
            ledger.session_id(),
            limit,
            adapters.len(),
            quotas
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut workers: Vec<Worker> = adapters
            .into_iter()
            .zip(ledger.entries().iter().cloned())
            .map(|(adapter, entry)| {
                let handle = spawn_worker(adapter, query.to_string(), entry.clone(), poll, tx.clone());
                Worker {
                    entry,
                    handle: Some(handle),
                }
            })
            .collect();
        drop(tx);

        let (outcome_hint, unassigned_quota) = self.coordinate(&mut workers, started).await;

        for worker in &mut workers {
            if let Some(handle) = worker.handle.take() {
                reap(worker.entry.as_ref(), handle).await;
            }
        }

        let mut documents = Vec::new();
        while let Some(document) = rx.recv().await {
            documents.push(document);
        }

        let sources = ledger.snapshot().await;
        let total_pulled = sources.iter().map(|s| s.pulled).sum();
        let outcome = match outcome_hint {
            Some(outcome) => outcome,
            None if total_pulled >= limit => HarvestOutcome::LimitSatisfied,
            None => HarvestOutcome::SourcesExhausted,
        };

        for source in &sources {
            debug!(
                "{}: {:?}, pulled {} of {} granted",
                source.source, source.status, source.pulled, source.granted
            );
        }
        info!(
            "Harvest {} finished: {} documents ({:?}) in {:?}",
            ledger.session_id(),
            total_pulled,
            outcome,
            started.elapsed()
        );

        Ok(HarvestReport {
            session_id: ledger.session_id(),
            query: query.to_string(),
            limit,
            documents,
            sources,
            total_pulled,
            unassigned_quota,
            outcome,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Redistribution loop; returns an outcome when it is already decided
    async fn coordinate(
        &self,
        workers: &mut [Worker],
        started: Instant,
    ) -> (Option<HarvestOutcome>, u32) {
        let deadline = self.config.deadline();
        let mut active: Vec<usize> = (0..workers.len()).collect();
        let mut unassigned = 0u32;

        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            // A worker that is gone without a terminal status died
            for &i in &active {
                let worker = &mut workers[i];
                if worker.handle.as_ref().is_some_and(JoinHandle::is_finished) {
                    if let Some(handle) = worker.handle.take() {
                        reap(worker.entry.as_ref(), handle).await;
                    }
                }
            }

            if active.is_empty() {
                return (None, unassigned);
            }

            if deadline.is_some_and(|limit| started.elapsed() >= limit) {
                warn!("Harvest deadline reached, cancelling {} sources", active.len());
                for worker in workers.iter() {
                    worker.entry.cancel().await;
                }
                return (Some(HarvestOutcome::DeadlineReached), unassigned);
            }

            let entries: Vec<Arc<LedgerEntry>> =
                active.iter().map(|&i| workers[i].entry.clone()).collect();
            if cancel_if_all_waiting(&entries).await {
                info!("All {} active sources are waiting, stopping", entries.len());
                return (None, unassigned);
            }

            let mut surplus = 0u32;
            let mut still_active = Vec::with_capacity(active.len());
            for &i in &active {
                match workers[i].entry.drain_if_finished().await {
                    Some(left) => {
                        debug!("{} finished with {} quota left", workers[i].entry.source(), left);
                        surplus += left;
                    }
                    None => still_active.push(i),
                }
            }
            active = still_active;

            if surplus == 0 {
                continue;
            }
            if active.is_empty() {
                unassigned += surplus;
                continue;
            }

            let shares = split_quota(surplus, active.len());
            info!("Redistributing {} quota over {} sources: {:?}", surplus, active.len(), shares);
            for (&i, share) in active.iter().zip(shares) {
                workers[i].entry.grant(share).await;
            }
        }
    }
}

fn spawn_worker(
    adapter: Arc<dyn SourceAdapter>,
    query: String,
    entry: Arc<LedgerEntry>,
    poll: Duration,
    tx: mpsc::UnboundedSender<Document>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let source = adapter.source();
        let mut documents = Box::pin(pull(adapter, query, entry.clone(), poll));
        while let Some(document) = documents.next().await {
            if tx.send(document).is_err() {
                warn!("{}: document pool closed", source);
                entry.cancel().await;
                break;
            }
        }
        debug!("{}: worker done", source);
    })
}

/// Join a worker and force its entry terminal if the task died early
async fn reap(entry: &LedgerEntry, handle: JoinHandle<()>) {
    let reason = match handle.await {
        Ok(()) if entry.status().await.is_finished() => return,
        Ok(()) => "worker stopped before finishing".to_string(),
        Err(e) if e.is_panic() => format!("worker panicked: {}", panic_message(e.into_panic())),
        Err(e) => format!("worker aborted: {e}"),
    };

    error!("{}: {}", entry.source(), reason);
    entry.finish(SourceStatus::FinishedWithError, Some(reason)).await;
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn invalid(field: &str, reason: &str) -> Error {
    Error::InvalidInput {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Source;
    use crate::sources::MemorySource;

    fn fast() -> Harvester {
        Harvester::new(HarvestConfig {
            poll_interval_ms: 10,
            ..HarvestConfig::default()
        })
    }

    fn memory(name: &str, n: usize) -> Arc<dyn SourceAdapter> {
        let source = Source::Custom(name.to_string());
        let docs = (0..n)
            .map(|i| Document::builder(source.clone()).title(format!("{name} {i}")).build())
            .collect();
        Arc::new(MemorySource::new(source, docs, 5))
    }

    #[tokio::test]
    async fn test_rejects_invalid_input() {
        let harvester = fast();
        assert!(matches!(
            harvester.harvest("  ", 5, vec![memory("a", 1)]).await,
            Err(Error::InvalidInput { field, .. }) if field == "query"
        ));
        assert!(matches!(
            harvester.harvest("q", 0, vec![memory("a", 1)]).await,
            Err(Error::InvalidInput { field, .. }) if field == "limit"
        ));
        assert!(matches!(
            harvester.harvest("q", 5, Vec::new()).await,
            Err(Error::InvalidInput { field, .. }) if field == "sources"
        ));
    }

    #[tokio::test]
    async fn test_single_source_fills_limit() {
        let report = fast().harvest("q", 7, vec![memory("a", 20)]).await.unwrap();
        assert_eq!(report.documents.len(), 7);
        assert_eq!(report.total_pulled, 7);
        assert_eq!(report.outcome, HarvestOutcome::LimitSatisfied);
        assert_eq!(report.sources[0].status, SourceStatus::Finished);
        assert!(report.sources[0].cancelled);
    }

    #[tokio::test]
    async fn test_remainder_goes_to_first_sources() {
        let report = fast()
            .harvest("q", 5, vec![memory("a", 10), memory("b", 10), memory("c", 10)])
            .await
            .unwrap();
        let granted: Vec<u32> = report.sources.iter().map(|s| s.granted).collect();
        let pulled: Vec<u32> = report.sources.iter().map(|s| s.pulled).collect();
        assert_eq!(&granted[..], &[2, 2, 1]);
        assert_eq!(&pulled[..], &[2, 2, 1]);
        assert_eq!(report.outcome, HarvestOutcome::LimitSatisfied);
    }

    #[tokio::test]
    async fn test_quota_with_no_taker_is_reported() {
        let report = fast()
            .harvest("q", 5, vec![memory("a", 0), memory("b", 0)])
            .await
            .unwrap();
        assert!(report.documents.is_empty());
        assert_eq!(report.outcome, HarvestOutcome::SourcesExhausted);
        assert_eq!(report.unassigned_quota, 5);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(7)), "unknown panic");
    }
}
