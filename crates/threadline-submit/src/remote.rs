use std::time::Duration;

use async_trait::async_trait;
use threadline_core::{Address, AuthorProfile, ChainId, Signature, TxHash};

use crate::error::RemoteError;
use crate::request::{
    ContractCall, Receipt, RelayRequest, RelayResponse, RelaySubmission, TypedDataRequest,
};

/// The author's signing and sending account.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn chain_id(&self) -> Result<ChainId, RemoteError>;

    async fn switch_chain(&self, chain_id: ChainId) -> Result<(), RemoteError>;

    /// Asks the author to sign. Waits on a human, so callers must not
    /// abandon the returned future.
    async fn sign_typed_data(&self, request: &TypedDataRequest) -> Result<Signature, RemoteError>;

    async fn send_transaction(&self, call: &ContractCall) -> Result<TxHash, RemoteError>;
}

/// App-operated service that pays for, and optionally co-signs, writes.
/// Requests are idempotent by fingerprint.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn prepare(&self, request: &RelayRequest) -> Result<RelayResponse, RemoteError>;

    async fn submit(&self, submission: &RelaySubmission) -> Result<TxHash, RemoteError>;
}

#[async_trait]
pub trait ReceiptWatcher: Send + Sync {
    /// Resolves once the transaction is mined. Implementations should give up
    /// with [`RemoteError::Timeout`] after `timeout`.
    async fn wait_for_receipt(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<Receipt, RemoteError>;
}

/// Source of author display profiles.
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    async fn resolve(&self, address: Address) -> Result<Option<AuthorProfile>, RemoteError>;
}
