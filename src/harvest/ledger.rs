//! Per-harvest shared state: one entry per source adapter.
//!
//! Every read-modify-write on an entry happens under that entry's own lock.
//! The only multi-entry operation, [`cancel_if_all_waiting`], takes the
//! locks in slice order.

use crate::document::Source;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

/// Lifecycle of one adapter inside a harvest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Working,
    /// Quota used up while upstream still has results
    Waiting,
    Finished,
    FinishedWithError,
}

impl SourceStatus {
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Finished | Self::FinishedWithError)
    }
}

/// Outcome of waiting for quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaWait {
    Granted(u32),
    Cancelled,
}

#[derive(Debug)]
struct EntryState {
    status: SourceStatus,
    quota_remaining: u32,
    pulled: u32,
    granted: u32,
    cancelled: bool,
    last_error: Option<String>,
}

/// Point-in-time copy of one ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: Source,
    pub status: SourceStatus,
    pub pulled: u32,
    pub quota_remaining: u32,
    /// Quota ever granted, initial share included
    pub granted: u32,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Ledger entry of a single adapter
#[derive(Debug)]
pub struct LedgerEntry {
    source: Source,
    state: Mutex<EntryState>,
    notify: Notify,
    /// Wakes in-flight page requests on cancellation
    cancel_notify: Notify,
}

impl LedgerEntry {
    #[must_use]
    pub fn new(source: Source, quota: u32) -> Self {
        Self {
            source,
            state: Mutex::new(EntryState {
                status: SourceStatus::Working,
                quota_remaining: quota,
                pulled: 0,
                granted: quota,
                cancelled: false,
                last_error: None,
            }),
            notify: Notify::new(),
            cancel_notify: Notify::new(),
        }
    }

    #[must_use]
    pub const fn source(&self) -> &Source {
        &self.source
    }

    pub async fn status(&self) -> SourceStatus {
        self.state.lock().await.status
    }

    /// Wait until this entry holds quota or is cancelled.
    ///
    /// With no quota left the entry turns `Waiting` and re-checks at least
    /// every `poll`. Cancellation wins over available quota and finishes the
    /// entry.
    pub async fn await_quota(&self, poll: Duration) -> QuotaWait {
        loop {
            {
                let mut state = self.state.lock().await;
                if state.cancelled || state.status.is_finished() {
                    if !state.status.is_finished() {
                        state.status = SourceStatus::Finished;
                    }
                    return QuotaWait::Cancelled;
                }
                if state.quota_remaining > 0 {
                    state.status = SourceStatus::Working;
                    return QuotaWait::Granted(state.quota_remaining);
                }
                if state.status != SourceStatus::Waiting {
                    debug!("{}: quota used up, waiting", self.source);
                    state.status = SourceStatus::Waiting;
                }
            }

            // A grant or cancel between unlock and here leaves a stored permit
            let _ = timeout(poll, self.notify.notified()).await;
        }
    }

    /// Account `count` delivered documents against the quota
    pub async fn record(&self, count: u32) {
        let mut state = self.state.lock().await;
        let count = count.min(state.quota_remaining);
        state.quota_remaining -= count;
        state.pulled += count;
    }

    /// Move into a terminal status; no-op once finished
    pub async fn finish(&self, status: SourceStatus, error: Option<String>) -> bool {
        debug_assert!(status.is_finished());
        let mut state = self.state.lock().await;
        if state.status.is_finished() {
            return false;
        }
        state.status = status;
        if error.is_some() {
            state.last_error = error;
        }
        true
    }

    /// Take the unused quota of a finished entry
    pub async fn drain_if_finished(&self) -> Option<u32> {
        let mut state = self.state.lock().await;
        if !state.status.is_finished() {
            return None;
        }
        Some(std::mem::take(&mut state.quota_remaining))
    }

    /// Add quota, waking the adapter if it is waiting
    pub async fn grant(&self, share: u32) {
        if share == 0 {
            return;
        }
        {
            let mut state = self.state.lock().await;
            state.quota_remaining += share;
            state.granted += share;
            if state.status == SourceStatus::Waiting {
                state.status = SourceStatus::Working;
            }
        }
        self.notify.notify_one();
    }

    /// Set the one-way cancellation flag
    pub async fn cancel(&self) {
        self.state.lock().await.cancelled = true;
        self.notify.notify_one();
        self.cancel_notify.notify_waiters();
    }

    pub async fn is_cancelled(&self) -> bool {
        self.state.lock().await.cancelled
    }

    /// Resolve once the entry is cancelled, re-checking at least every `poll`
    pub async fn cancelled(&self, poll: Duration) {
        loop {
            let notified = self.cancel_notify.notified();
            if self.is_cancelled().await {
                return;
            }
            let _ = timeout(poll, notified).await;
        }
    }

    pub async fn snapshot(&self) -> SourceReport {
        let state = self.state.lock().await;
        SourceReport {
            source: self.source.clone(),
            status: state.status,
            pulled: state.pulled,
            quota_remaining: state.quota_remaining,
            granted: state.granted,
            cancelled: state.cancelled,
            last_error: state.last_error.clone(),
        }
    }
}

/// Cancel every entry if all of them are `Waiting`.
///
/// Holds every entry lock, taken in slice order, across the check and the
/// cancel so no entry can change status in between.
pub async fn cancel_if_all_waiting(entries: &[Arc<LedgerEntry>]) -> bool {
    if entries.is_empty() {
        return false;
    }

    let mut guards = Vec::with_capacity(entries.len());
    for entry in entries {
        let guard = entry.state.lock().await;
        if guard.status != SourceStatus::Waiting {
            return false;
        }
        guards.push(guard);
    }

    for guard in &mut guards {
        guard.cancelled = true;
    }
    drop(guards);

    for entry in entries {
        entry.notify.notify_one();
        entry.cancel_notify.notify_waiters();
    }
    true
}

/// Split `total` into `parts` shares: `total div parts` each, the first
/// `total mod parts` shares one larger.
#[must_use]
pub fn split_quota(total: u32, parts: usize) -> Vec<u32> {
    let Ok(n) = u32::try_from(parts) else {
        return vec![0; parts];
    };
    if n == 0 {
        return Vec::new();
    }

    let base = total / n;
    let extra = (total % n) as usize;
    (0..parts)
        .map(|i| if i < extra { base + 1 } else { base })
        .collect()
}

/// Shared state of one harvest session
#[derive(Debug)]
pub struct SessionLedger {
    session_id: Uuid,
    entries: Vec<Arc<LedgerEntry>>,
}

impl SessionLedger {
    /// One entry per source, with the initial quotas in the same order
    #[must_use]
    pub fn new(sources: Vec<Source>, quotas: &[u32]) -> Self {
        let entries = sources
            .into_iter()
            .zip(quotas.iter().copied().chain(std::iter::repeat(0)))
            .map(|(source, quota)| Arc::new(LedgerEntry::new(source, quota)))
            .collect();

        Self {
            session_id: Uuid::new_v4(),
            entries,
        }
    }

    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    #[must_use]
    pub fn entries(&self) -> &[Arc<LedgerEntry>] {
        &self.entries
    }

    pub async fn snapshot(&self) -> Vec<SourceReport> {
        let mut reports = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            reports.push(entry.snapshot().await);
        }
        reports
    }

    pub async fn cancel_all(&self) {
        for entry in &self.entries {
            entry.cancel().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_quota() {
        assert_eq!(split_quota(9, 3), vec![3, 3, 3]);
        assert_eq!(split_quota(10, 3), vec![4, 3, 3]);
        assert_eq!(split_quota(2, 2), vec![1, 1]);
        assert_eq!(split_quota(1, 3), vec![1, 0, 0]);
        assert!(split_quota(5, 0).is_empty());
    }

    #[tokio::test]
    async fn test_record_and_grant_conserve_quota() {
        let entry = LedgerEntry::new(Source::Crossref, 3);
        entry.record(2).await;
        entry.grant(4).await;

        let report = entry.snapshot().await;
        assert_eq!(report.pulled, 2);
        assert_eq!(report.quota_remaining, 5);
        assert_eq!(report.granted, 7);
        assert_eq!(report.pulled + report.quota_remaining, report.granted);
    }

    #[tokio::test]
    async fn test_await_quota_turns_waiting_then_resumes() {
        let entry = Arc::new(LedgerEntry::new(Source::OpenAlex, 0));

        let waiter = {
            let entry = entry.clone();
            tokio::spawn(async move { entry.await_quota(Duration::from_secs(5)).await })
        };

        while entry.status().await != SourceStatus::Waiting {
            tokio::task::yield_now().await;
        }
        entry.grant(2).await;

        assert_eq!(waiter.await.unwrap(), QuotaWait::Granted(2));
        assert_eq!(entry.status().await, SourceStatus::Working);
    }

    #[tokio::test]
    async fn test_cancel_finishes_a_waiting_entry() {
        let entry = Arc::new(LedgerEntry::new(Source::Arxiv, 0));

        let waiter = {
            let entry = entry.clone();
            tokio::spawn(async move { entry.await_quota(Duration::from_secs(5)).await })
        };

        while entry.status().await != SourceStatus::Waiting {
            tokio::task::yield_now().await;
        }
        entry.cancel().await;

        assert_eq!(waiter.await.unwrap(), QuotaWait::Cancelled);
        assert_eq!(entry.status().await, SourceStatus::Finished);
    }

    #[tokio::test]
    async fn test_cancelled_wakes_pending_waiters() {
        let entry = Arc::new(LedgerEntry::new(Source::Crossref, 5));
        assert!(!entry.is_cancelled().await);

        let waiter = {
            let entry = entry.clone();
            tokio::spawn(async move { entry.cancelled(Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        entry.cancel().await;

        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(entry.is_cancelled().await);
    }

    #[tokio::test]
    async fn test_finished_is_terminal() {
        let entry = LedgerEntry::new(Source::Core, 5);
        assert!(
            entry
                .finish(SourceStatus::FinishedWithError, Some("HTTP 400".to_string()))
                .await
        );
        assert!(!entry.finish(SourceStatus::Finished, None).await);
        entry.grant(1).await;

        let report = entry.snapshot().await;
        assert_eq!(report.status, SourceStatus::FinishedWithError);
        assert_eq!(report.last_error.as_deref(), Some("HTTP 400"));
        assert_eq!(entry.drain_if_finished().await, Some(6));
        assert_eq!(entry.drain_if_finished().await, Some(0));
    }

    #[tokio::test]
    async fn test_drain_skips_active_entries() {
        let entry = LedgerEntry::new(Source::Crossref, 5);
        assert_eq!(entry.drain_if_finished().await, None);
    }

    #[tokio::test]
    async fn test_cancel_if_all_waiting() {
        let a = Arc::new(LedgerEntry::new(Source::Crossref, 0));
        let b = Arc::new(LedgerEntry::new(Source::OpenAlex, 1));
        let entries = vec![a.clone(), b.clone()];

        let _ = timeout(Duration::from_millis(5), a.await_quota(Duration::from_millis(1))).await;
        assert_eq!(a.status().await, SourceStatus::Waiting);
        // b still holds quota and is working
        assert!(!cancel_if_all_waiting(&entries).await);

        b.record(1).await;
        let _ = timeout(Duration::from_millis(5), b.await_quota(Duration::from_millis(1))).await;
        assert!(cancel_if_all_waiting(&entries).await);
        assert!(a.snapshot().await.cancelled);
        assert!(b.snapshot().await.cancelled);
    }
}
