use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use threadline_cache::{CacheHandle, IndexerMode, ReconcileReport};
use threadline_core::CachePage;
use threadline_submit::RemoteError;
use threadline_task::Cancellation;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Read query sent to the indexer for one listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_uri: Option<String>,
    pub limit: usize,
    pub mode: IndexerMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Indexer read API. Returns the raw JSON page body; decoding happens during
/// reconciliation so undecodable pages never reach the tree.
#[async_trait]
pub trait IndexerSource: Send + Sync {
    async fn fetch_page(&self, query: &IndexerQuery) -> Result<Vec<u8>, RemoteError>;
}

/// Indexer double serving queued bodies, then the last page set.
#[derive(Default)]
pub struct InMemoryIndexer {
    page: Mutex<Option<Vec<u8>>>,
    queued: Mutex<VecDeque<Result<Vec<u8>, RemoteError>>>,
    fetches: AtomicUsize,
}

impl InMemoryIndexer {
    pub fn set_page(&self, page: &CachePage) -> Result<(), serde_json::Error> {
        let body = serde_json::to_vec(page)?;
        *lock(&self.page) = Some(body);
        Ok(())
    }

    /// Queues one response served ahead of the current page.
    pub fn push_raw(&self, response: Result<Vec<u8>, RemoteError>) {
        lock(&self.queued).push_back(response);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexerSource for InMemoryIndexer {
    async fn fetch_page(&self, _query: &IndexerQuery) -> Result<Vec<u8>, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(queued) = lock(&self.queued).pop_front() {
            return queued;
        }
        lock(&self.page)
            .clone()
            .ok_or_else(|| RemoteError::Server {
                status: 404,
                message: "no page".to_string(),
            })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Periodically pulls the listing from the indexer and reconciles it into
/// the cache.
pub struct RefetchService {
    source: Arc<dyn IndexerSource>,
    cache: CacheHandle,
    query: IndexerQuery,
    interval: Duration,
}

impl RefetchService {
    pub fn new(
        source: Arc<dyn IndexerSource>,
        cache: CacheHandle,
        query: IndexerQuery,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            query,
            interval,
        }
    }

    pub fn query(&self) -> &IndexerQuery {
        &self.query
    }

    /// Fetches once and reconciles. Fetch failures leave the cache untouched.
    pub async fn refresh_once(&self) -> Result<ReconcileReport, RemoteError> {
        let body = self.source.fetch_page(&self.query).await?;
        let report = self.cache.reconcile_json(&body);
        debug!(
            indexed = report.indexed,
            reinserted = report.reinserted,
            rejected = report.rejected,
            "refetch reconciled"
        );
        Ok(report)
    }

    /// Refreshes on every tick until `cancel` fires. The first refresh runs
    /// immediately.
    pub async fn run(self, cancel: Cancellation) {
        info!(interval = ?self.interval, "refetch service started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = self.refresh_once() => {
                            if let Err(err) = result {
                                warn!(error = %err, "refetch failed");
                            }
                        }
                    }
                }
            }
        }
        info!("refetch service stopped");
    }
}
