use std::num::NonZeroUsize;
use std::sync::Arc;

use thiserror::Error;
use threadline_cache::handle::Snapshot;
use threadline_cache::{CacheHandle, ReconcileReport};
use threadline_core::error::ValidationError;
use threadline_core::{CommentId, CommentPayload, OperationKind, PendingOperation};
use threadline_submit::{
    CachedProfileResolver, ProfileResolver, ReceiptWatcher, Relay, RemoteError, SubmitOptions,
    SubmitRequest, Submitter, Wallet,
};
use threadline_task::Cancellation;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ThreadlineConfig;
use crate::http::{HttpError, HttpIndexer, HttpRelay};
use crate::refetch::{IndexerQuery, IndexerSource, RefetchService};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("missing collaborator: {0}")]
    Missing(&'static str),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Assembles a [`Client`] from configuration and collaborators.
///
/// The relay and indexer default to HTTP clients built from the configured
/// URLs; the wallet and receipt watcher must always be supplied.
pub struct ClientBuilder {
    config: ThreadlineConfig,
    wallet: Option<Arc<dyn Wallet>>,
    receipts: Option<Arc<dyn ReceiptWatcher>>,
    relay: Option<Arc<dyn Relay>>,
    profiles: Option<Arc<dyn ProfileResolver>>,
    indexer: Option<Arc<dyn IndexerSource>>,
}

impl ClientBuilder {
    pub fn new(config: ThreadlineConfig) -> Self {
        Self {
            config,
            wallet: None,
            receipts: None,
            relay: None,
            profiles: None,
            indexer: None,
        }
    }

    pub fn wallet(mut self, wallet: Arc<dyn Wallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn receipts(mut self, receipts: Arc<dyn ReceiptWatcher>) -> Self {
        self.receipts = Some(receipts);
        self
    }

    pub fn relay(mut self, relay: Arc<dyn Relay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn profiles(mut self, profiles: Arc<dyn ProfileResolver>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn indexer(mut self, indexer: Arc<dyn IndexerSource>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn build(self) -> Result<Client, ClientError> {
        let config = self.config;
        let wallet = self.wallet.ok_or(ClientError::Missing("wallet"))?;
        let receipts = self.receipts.ok_or(ClientError::Missing("receipt watcher"))?;

        let relay = match (self.relay, config.relay_url.as_deref()) {
            (Some(relay), _) => Some(relay),
            (None, Some(url)) => {
                Some(Arc::new(HttpRelay::new(url, config.http_timeout)?) as Arc<dyn Relay>)
            }
            (None, None) => None,
        };
        let indexer: Arc<dyn IndexerSource> = match self.indexer {
            Some(indexer) => indexer,
            None => Arc::new(HttpIndexer::new(&config.indexer_url, config.http_timeout)?),
        };

        let cache = CacheHandle::new(config.cache_config());
        let mut submitter = Submitter::new(wallet, receipts, config.submitter_config())
            .with_observer(Arc::new(cache.clone()));
        if let Some(relay) = relay {
            submitter = submitter.with_relay(relay);
        }
        if let Some(profiles) = self.profiles {
            let capacity = NonZeroUsize::new(config.profile_cache_capacity);
            let profiles: Arc<dyn ProfileResolver> = match capacity {
                Some(capacity) => Arc::new(CachedProfileResolver::new(profiles, capacity)),
                None => profiles,
            };
            submitter = submitter.with_profiles(profiles);
        }

        let query = IndexerQuery {
            target_uri: config.target_uri.clone(),
            limit: config.page_limit,
            mode: config.indexer_mode,
            cursor: None,
        };

        tracing::info!(
            chain_id = config.chain_id,
            mode = config.submission_mode.as_str(),
            indexer = %config.indexer_url,
            "client ready"
        );

        Ok(Client {
            config,
            submitter: Arc::new(submitter),
            cache,
            indexer,
            query,
        })
    }
}

/// Submits comment writes and keeps the displayed listing in step with them.
///
/// Every write is inserted into the cache optimistically when it starts and
/// its row follows the operation to its terminal state.
#[derive(Clone)]
pub struct Client {
    config: ThreadlineConfig,
    submitter: Arc<Submitter>,
    cache: CacheHandle,
    indexer: Arc<dyn IndexerSource>,
    query: IndexerQuery,
}

impl Client {
    pub fn builder(config: ThreadlineConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    pub fn config(&self) -> &ThreadlineConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.cache.subscribe()
    }

    pub async fn post(
        &self,
        payload: CommentPayload,
        options: SubmitOptions,
    ) -> Result<PendingOperation, ClientError> {
        self.write(OperationKind::Post, payload, options).await
    }

    /// `payload.comment_id` names the comment being edited.
    pub async fn edit(
        &self,
        payload: CommentPayload,
        options: SubmitOptions,
    ) -> Result<PendingOperation, ClientError> {
        self.write(OperationKind::Edit, payload, options).await
    }

    pub async fn delete(
        &self,
        payload: CommentPayload,
        options: SubmitOptions,
    ) -> Result<PendingOperation, ClientError> {
        self.write(OperationKind::Delete, payload, options).await
    }

    /// Runs a request as given, including its own mode and chain.
    pub async fn submit(
        &self,
        request: SubmitRequest,
        options: SubmitOptions,
    ) -> Result<PendingOperation, ClientError> {
        Ok(self.submitter.submit(request, options).await?)
    }

    /// Runs a failed write again. Its row is replaced, not duplicated.
    pub async fn retry(
        &self,
        previous: &PendingOperation,
        options: SubmitOptions,
    ) -> Result<PendingOperation, ClientError> {
        Ok(self.submitter.resubmit(previous, options).await?)
    }

    pub fn dismiss(&self, fingerprint: CommentId) -> bool {
        self.cache.dismiss(fingerprint)
    }

    /// Fetches the configured listing once and reconciles it.
    pub async fn refresh(&self) -> Result<ReconcileReport, RemoteError> {
        self.refetch_service().refresh_once().await
    }

    pub fn refetch_service(&self) -> RefetchService {
        RefetchService::new(
            self.indexer.clone(),
            self.cache.clone(),
            self.query.clone(),
            self.config.refetch_interval,
        )
    }

    /// Spawns the periodic refetch loop on the current runtime.
    pub fn spawn_refetch(&self, cancel: Cancellation) -> JoinHandle<()> {
        tokio::spawn(self.refetch_service().run(cancel))
    }

    async fn write(
        &self,
        kind: OperationKind,
        payload: CommentPayload,
        options: SubmitOptions,
    ) -> Result<PendingOperation, ClientError> {
        let request = SubmitRequest {
            kind,
            mode: self.config.submission_mode,
            chain_id: self.config.chain(),
            payload,
        };
        self.submit(request, options).await
    }
}
