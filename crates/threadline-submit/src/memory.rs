//! In-memory collaborators for tests and simulations.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use k256::ecdsa::signature::{Signer as _, Verifier as _};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use thiserror::Error;
use threadline_core::hash::blake3_32;
use threadline_core::{Address, AuthorProfile, ChainId, Signature, TxHash};

use crate::error::RemoteError;
use crate::remote::{ProfileResolver, ReceiptWatcher, Relay, Wallet};
use crate::request::{
    ContractCall, Receipt, ReceiptStatus, RelayRequest, RelayResponse, RelaySubmission,
    TypedDataDomain, TypedDataRequest,
};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WalletKeyError {
    #[error("invalid secp256k1 secret key")]
    InvalidSecretKey,
}

/// Address derived from a secp256k1 public key: the last 20 bytes of its
/// BLAKE3 hash.
pub fn address_for_key(key: &VerifyingKey) -> Address {
    let digest = blake3_32(&key.to_sec1_bytes());
    let mut address = [0_u8; 20];
    address.copy_from_slice(&digest[12..]);
    Address(address)
}

/// Checks a 64-byte wallet signature over `digest`.
pub fn verify_signature(key: &VerifyingKey, digest: &[u8], signature: &Signature) -> bool {
    EcdsaSignature::from_slice(&signature.0)
        .map(|sig| key.verify(digest, &sig).is_ok())
        .unwrap_or(false)
}

#[derive(Debug)]
struct WalletState {
    chain_id: ChainId,
    allow_switch: bool,
    reject_signatures: bool,
    send_failures: VecDeque<RemoteError>,
    nonce: u64,
    signed: Vec<TypedDataRequest>,
    sent: Vec<ContractCall>,
}

/// Wallet holding a local secp256k1 key.
#[derive(Debug)]
pub struct InMemoryWallet {
    signing_key: SigningKey,
    address: Address,
    state: Mutex<WalletState>,
}

impl InMemoryWallet {
    pub fn from_secret(secret: [u8; 32], chain_id: ChainId) -> Result<Self, WalletKeyError> {
        let signing_key =
            SigningKey::from_slice(&secret).map_err(|_| WalletKeyError::InvalidSecretKey)?;
        let address = address_for_key(signing_key.verifying_key());
        Ok(Self {
            signing_key,
            address,
            state: Mutex::new(WalletState {
                chain_id,
                allow_switch: true,
                reject_signatures: false,
                send_failures: VecDeque::new(),
                nonce: 0,
                signed: Vec::new(),
                sent: Vec::new(),
            }),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        *self.signing_key.verifying_key()
    }

    pub fn set_chain(&self, chain_id: ChainId) {
        locked(&self.state).chain_id = chain_id;
    }

    pub fn allow_chain_switch(&self, allow: bool) {
        locked(&self.state).allow_switch = allow;
    }

    /// Makes every later signature request fail as a user rejection.
    pub fn reject_signatures(&self, reject: bool) {
        locked(&self.state).reject_signatures = reject;
    }

    /// Queues a failure for the next `send_transaction` call.
    pub fn push_send_failure(&self, error: RemoteError) {
        locked(&self.state).send_failures.push_back(error);
    }

    pub fn signed_requests(&self) -> Vec<TypedDataRequest> {
        locked(&self.state).signed.clone()
    }

    pub fn sent_calls(&self) -> Vec<ContractCall> {
        locked(&self.state).sent.clone()
    }

    /// Number of `send_transaction` calls, failed ones included.
    pub fn send_attempts(&self) -> u64 {
        locked(&self.state).nonce
    }
}

#[async_trait]
impl Wallet for InMemoryWallet {
    async fn chain_id(&self) -> Result<ChainId, RemoteError> {
        Ok(locked(&self.state).chain_id)
    }

    async fn switch_chain(&self, chain_id: ChainId) -> Result<(), RemoteError> {
        let mut state = locked(&self.state);
        if !state.allow_switch {
            return Err(RemoteError::UserRejected);
        }
        state.chain_id = chain_id;
        Ok(())
    }

    async fn sign_typed_data(&self, request: &TypedDataRequest) -> Result<Signature, RemoteError> {
        let mut state = locked(&self.state);
        if state.reject_signatures {
            return Err(RemoteError::UserRejected);
        }
        let signature: EcdsaSignature = self.signing_key.sign(&request.digest);
        state.signed.push(request.clone());
        Ok(Signature(signature.to_bytes().to_vec()))
    }

    async fn send_transaction(&self, call: &ContractCall) -> Result<TxHash, RemoteError> {
        let mut state = locked(&self.state);
        state.nonce += 1;
        if let Some(failure) = state.send_failures.pop_front() {
            return Err(failure);
        }
        let mut seed = Vec::with_capacity(20 + 8 + 32);
        seed.extend_from_slice(self.address.as_bytes());
        seed.extend_from_slice(&state.nonce.to_be_bytes());
        seed.extend_from_slice(call.fingerprint.as_bytes());
        state.sent.push(call.clone());
        Ok(TxHash(blake3_32(&seed)))
    }
}

#[derive(Debug, Default)]
struct RelayState {
    prepare_responses: VecDeque<Result<RelayResponse, RemoteError>>,
    submit_responses: VecDeque<Result<TxHash, RemoteError>>,
    prepared: Vec<RelayRequest>,
    submitted: Vec<RelaySubmission>,
}

/// Relay replaying queued responses. With empty queues it asks for the
/// author's signature on prepare and returns a deterministic hash on submit.
#[derive(Debug)]
pub struct ScriptedRelay {
    domain_name: String,
    verifying_contract: Address,
    state: Mutex<RelayState>,
}

impl ScriptedRelay {
    pub fn new(domain_name: impl Into<String>, verifying_contract: Address) -> Self {
        Self {
            domain_name: domain_name.into(),
            verifying_contract,
            state: Mutex::default(),
        }
    }

    pub fn push_prepare(&self, response: Result<RelayResponse, RemoteError>) {
        locked(&self.state).prepare_responses.push_back(response);
    }

    pub fn push_submit(&self, response: Result<TxHash, RemoteError>) {
        locked(&self.state).submit_responses.push_back(response);
    }

    pub fn prepared(&self) -> Vec<RelayRequest> {
        locked(&self.state).prepared.clone()
    }

    pub fn submitted(&self) -> Vec<RelaySubmission> {
        locked(&self.state).submitted.clone()
    }

    /// Hash returned by submit when nothing is queued.
    pub fn default_tx_hash(submission: &RelaySubmission) -> TxHash {
        let mut seed = b"relay".to_vec();
        seed.extend_from_slice(submission.fingerprint.as_bytes());
        TxHash(blake3_32(&seed))
    }
}

#[async_trait]
impl Relay for ScriptedRelay {
    async fn prepare(&self, request: &RelayRequest) -> Result<RelayResponse, RemoteError> {
        let mut state = locked(&self.state);
        state.prepared.push(request.clone());
        if let Some(response) = state.prepare_responses.pop_front() {
            return response;
        }
        let domain = TypedDataDomain {
            name: self.domain_name.clone(),
            chain_id: request.chain_id,
            verifying_contract: self.verifying_contract,
        };
        Ok(RelayResponse::NeedsSignature {
            fingerprint: request.fingerprint,
            typed_data: TypedDataRequest::new(
                domain,
                request.kind,
                request.fingerprint,
                request.payload.clone(),
            ),
            app_signature: None,
        })
    }

    async fn submit(&self, submission: &RelaySubmission) -> Result<TxHash, RemoteError> {
        let mut state = locked(&self.state);
        state.submitted.push(submission.clone());
        match state.submit_responses.pop_front() {
            Some(response) => response,
            None => Ok(Self::default_tx_hash(submission)),
        }
    }
}

/// Receipt source with per-hash outcomes. Unknown hashes resolve to the
/// default status, or time out when no default is set.
#[derive(Debug)]
pub struct InMemoryReceipts {
    statuses: Mutex<HashMap<TxHash, ReceiptStatus>>,
    default_status: Mutex<Option<ReceiptStatus>>,
}

impl Default for InMemoryReceipts {
    fn default() -> Self {
        Self {
            statuses: Mutex::default(),
            default_status: Mutex::new(Some(ReceiptStatus::Success)),
        }
    }
}

impl InMemoryReceipts {
    /// Receipts that never arrive unless set explicitly.
    pub fn never_mined() -> Self {
        Self {
            statuses: Mutex::default(),
            default_status: Mutex::new(None),
        }
    }

    pub fn set_status(&self, tx_hash: TxHash, status: ReceiptStatus) {
        locked(&self.statuses).insert(tx_hash, status);
    }

    pub fn set_default(&self, status: Option<ReceiptStatus>) {
        *locked(&self.default_status) = status;
    }
}

#[async_trait]
impl ReceiptWatcher for InMemoryReceipts {
    async fn wait_for_receipt(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<Receipt, RemoteError> {
        let known = locked(&self.statuses).get(&tx_hash).copied();
        let status = known.or(*locked(&self.default_status));
        match status {
            Some(status) => Ok(Receipt {
                tx_hash,
                status,
                block_number: Some(1),
            }),
            None => {
                tokio::time::sleep(timeout).await;
                Err(RemoteError::Timeout)
            }
        }
    }
}

/// Fixed address-to-profile table that counts lookups.
#[derive(Debug, Default)]
pub struct StaticProfiles {
    profiles: Mutex<HashMap<Address, AuthorProfile>>,
    lookups: AtomicUsize,
}

impl StaticProfiles {
    pub fn insert(&self, profile: AuthorProfile) {
        locked(&self.profiles).insert(profile.address, profile);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ProfileResolver for StaticProfiles {
    async fn resolve(&self, address: Address) -> Result<Option<AuthorProfile>, RemoteError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(locked(&self.profiles).get(&address).cloned())
    }
}
