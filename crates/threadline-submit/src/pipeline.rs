use std::sync::Arc;
use std::time::Duration;

use threadline_core::error::ValidationError;
use threadline_core::observer::{NoopObserver, OperationObserver};
use threadline_core::{
    Address, AuthorProfile, ChainId, CommentPayload, FailureCause, OperationKind,
    PendingOperation, Signature, Stage, SubmissionFailure, SubmissionMode, TxHash,
};
use threadline_task::{run_classified, Cancellation, RetryPolicy, RunOptions};
use tracing::{debug, info, warn};

use crate::error::{run_failure, RemoteError};
use crate::remote::{ProfileResolver, ReceiptWatcher, Relay, Wallet};
use crate::request::{
    ContractCall, ReceiptStatus, RelayRequest, RelayResponse, RelaySubmission, TypedDataDomain,
    TypedDataRequest,
};

/// Static settings for the submission pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitterConfig {
    /// Used when a submit call does not carry its own policy.
    pub retry_policy: RetryPolicy,
    pub confirmation_timeout: Duration,
    /// Upper bound on the best-effort author profile lookup.
    pub profile_lookup_timeout: Duration,
    pub comments_contract: Address,
    pub signing_domain_name: String,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            confirmation_timeout: Duration::from_secs(60),
            profile_lookup_timeout: Duration::from_millis(750),
            comments_contract: Address::ZERO,
            signing_domain_name: "Comments".to_string(),
        }
    }
}

impl SubmitterConfig {
    pub fn domain(&self, chain_id: ChainId) -> TypedDataDomain {
        TypedDataDomain {
            name: self.signing_domain_name.clone(),
            chain_id,
            verifying_contract: self.comments_contract,
        }
    }
}

/// One write as requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub kind: OperationKind,
    pub mode: SubmissionMode,
    pub chain_id: ChainId,
    pub payload: CommentPayload,
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub retry_policy: Option<RetryPolicy>,
    pub cancellation: Cancellation,
}

enum Authorization {
    /// The relay already broadcast; nothing left to send.
    AlreadyBroadcast(TxHash),
    Ready {
        author_signature: Option<Signature>,
        app_signature: Option<Signature>,
    },
}

/// Drives pending operations through the submission stages.
pub struct Submitter {
    wallet: Arc<dyn Wallet>,
    relay: Option<Arc<dyn Relay>>,
    receipts: Arc<dyn ReceiptWatcher>,
    profiles: Option<Arc<dyn ProfileResolver>>,
    observer: Arc<dyn OperationObserver>,
    config: SubmitterConfig,
}

impl Submitter {
    pub fn new(
        wallet: Arc<dyn Wallet>,
        receipts: Arc<dyn ReceiptWatcher>,
        config: SubmitterConfig,
    ) -> Self {
        Self {
            wallet,
            relay: None,
            receipts,
            profiles: None,
            observer: Arc::new(NoopObserver),
            config,
        }
    }

    pub fn with_relay(mut self, relay: Arc<dyn Relay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileResolver>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn OperationObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    /// Validates a request and builds its pending operation without any
    /// side effect.
    pub fn prepare(&self, request: SubmitRequest) -> Result<PendingOperation, ValidationError> {
        if request.mode.uses_relay() && self.relay.is_none() {
            return Err(ValidationError::RelayUnavailable(request.mode.as_str()));
        }
        PendingOperation::new(request.kind, request.mode, request.chain_id, request.payload)
    }

    /// Validates and runs one write to a terminal state.
    ///
    /// Only validation failures are returned as `Err`; every later failure is
    /// recorded on the returned operation.
    pub async fn submit(
        &self,
        request: SubmitRequest,
        options: SubmitOptions,
    ) -> Result<PendingOperation, ValidationError> {
        let op = self.prepare(request)?;
        Ok(self.drive(op, options).await)
    }

    /// Runs a settled operation's payload again as a fresh operation with the
    /// same fingerprint.
    pub async fn resubmit(
        &self,
        previous: &PendingOperation,
        options: SubmitOptions,
    ) -> Result<PendingOperation, ValidationError> {
        if !previous.is_terminal() {
            return Err(ValidationError::StillInFlight);
        }
        self.submit(
            SubmitRequest {
                kind: previous.kind,
                mode: previous.submission_mode,
                chain_id: previous.chain_id,
                payload: previous.payload.clone(),
            },
            options,
        )
        .await
    }

    async fn drive(&self, mut op: PendingOperation, options: SubmitOptions) -> PendingOperation {
        self.observer.operation_created(&op);
        info!(
            fingerprint = %op.fingerprint,
            kind = op.kind.as_str(),
            mode = op.submission_mode.as_str(),
            chain_id = %op.chain_id,
            "submission started"
        );

        if let Some(profile) = self.lookup_profile(op.payload.author).await {
            op.resolved_author_profile = Some(profile);
            self.observer.operation_progressed(&op);
        }

        match self.execute(&mut op, &options).await {
            Ok(()) => info!(
                fingerprint = %op.fingerprint,
                tx_hash = ?op.tx_hash,
                "submission confirmed"
            ),
            Err(failure) => {
                warn!(
                    fingerprint = %op.fingerprint,
                    stage = op.stage.as_str(),
                    cause = ?failure.cause,
                    error = %failure,
                    "submission failed"
                );
                if let Err(err) = op.fail(failure) {
                    warn!(fingerprint = %op.fingerprint, error = %err, "failure not recorded");
                }
            }
        }

        self.observer.operation_settled(&op);
        op
    }

    async fn lookup_profile(&self, author: Address) -> Option<AuthorProfile> {
        let profiles = self.profiles.as_ref()?;
        match tokio::time::timeout(self.config.profile_lookup_timeout, profiles.resolve(author))
            .await
        {
            Ok(Ok(profile)) => profile,
            Ok(Err(err)) => {
                debug!(author = %author, error = %err, "profile lookup failed");
                None
            }
            Err(_) => {
                debug!(author = %author, "profile lookup timed out");
                None
            }
        }
    }

    async fn execute(
        &self,
        op: &mut PendingOperation,
        options: &SubmitOptions,
    ) -> Result<(), SubmissionFailure> {
        let run_options = RunOptions::new(
            options.retry_policy.unwrap_or(self.config.retry_policy),
            options.cancellation.clone(),
        );
        check_cancelled(&run_options.cancellation)?;

        self.ensure_chain(op.chain_id).await?;
        op.advance(Stage::ChainReady)?;
        check_cancelled(&run_options.cancellation)?;

        match self.authorize(op, &run_options).await? {
            Authorization::AlreadyBroadcast(tx_hash) => {
                debug!(fingerprint = %op.fingerprint, tx_hash = %tx_hash, "relay broadcast directly");
                op.tx_hash = Some(tx_hash);
                op.advance(Stage::Signed)?;
                op.advance(Stage::Confirming)?;
            }
            Authorization::Ready {
                author_signature,
                app_signature,
            } => {
                op.advance(Stage::Signed)?;
                check_cancelled(&run_options.cancellation)?;
                let tx_hash = self
                    .broadcast(op, author_signature, app_signature, &run_options)
                    .await?;
                op.tx_hash = Some(tx_hash);
                op.advance(Stage::Broadcast)?;
                op.advance(Stage::Confirming)?;
            }
        }
        self.observer.operation_progressed(op);

        self.confirm(op).await?;
        op.advance(Stage::Success)?;
        Ok(())
    }

    async fn ensure_chain(&self, expected: ChainId) -> Result<(), SubmissionFailure> {
        let current = self
            .wallet
            .chain_id()
            .await
            .map_err(|err| err.to_failure(false))?;
        if current == expected {
            return Ok(());
        }

        debug!(current = %current, expected = %expected, "switching wallet chain");
        if let Err(err) = self.wallet.switch_chain(expected).await {
            let cause = match err {
                RemoteError::UserRejected => FailureCause::UserRejected,
                _ => FailureCause::ChainMismatch,
            };
            return Err(SubmissionFailure::new(
                cause,
                format!("could not switch wallet to chain {expected}: {err}"),
            ));
        }

        let switched = self
            .wallet
            .chain_id()
            .await
            .map_err(|err| err.to_failure(false))?;
        if switched != expected {
            return Err(SubmissionFailure::new(
                FailureCause::ChainMismatch,
                format!("wallet is on chain {switched}, expected {expected}"),
            ));
        }
        Ok(())
    }

    async fn authorize(
        &self,
        op: &PendingOperation,
        run_options: &RunOptions,
    ) -> Result<Authorization, SubmissionFailure> {
        match op.submission_mode {
            SubmissionMode::Direct => {
                let request = TypedDataRequest::new(
                    self.config.domain(op.chain_id),
                    op.kind,
                    op.fingerprint,
                    op.payload.clone(),
                );
                let signature = self.sign(&request).await?;
                Ok(Authorization::Ready {
                    author_signature: Some(signature),
                    app_signature: None,
                })
            }
            SubmissionMode::RelayedUnapproved => {
                let relay = self.relay()?;
                let request = RelayRequest::from_operation(op);
                let request = &request;
                let response = run_classified(
                    |cancel| async move {
                        cancel.check()?;
                        relay.prepare(request).await
                    },
                    run_options,
                    RemoteError::is_retryable,
                )
                .await
                .map_err(|err| run_failure(err, true))?;

                if response.fingerprint() != op.fingerprint {
                    return Err(SubmissionFailure::new(
                        FailureCause::FingerprintMismatch,
                        format!(
                            "relay answered for {} instead of {}",
                            response.fingerprint(),
                            op.fingerprint
                        ),
                    ));
                }

                match response {
                    RelayResponse::Broadcast { tx_hash, .. } => {
                        Ok(Authorization::AlreadyBroadcast(tx_hash))
                    }
                    RelayResponse::NeedsSignature {
                        typed_data,
                        app_signature,
                        ..
                    } => {
                        let expected = TypedDataRequest::new(
                            self.config.domain(op.chain_id),
                            op.kind,
                            op.fingerprint,
                            op.payload.clone(),
                        );
                        if typed_data != expected {
                            return Err(SubmissionFailure::new(
                                FailureCause::FingerprintMismatch,
                                format!(
                                    "relay asked to sign {} for {}, not the submitted write",
                                    typed_data.primary_type, typed_data.fingerprint
                                ),
                            ));
                        }
                        let signature = self.sign(&expected).await?;
                        Ok(Authorization::Ready {
                            author_signature: Some(signature),
                            app_signature,
                        })
                    }
                }
            }
            SubmissionMode::RelayedApproved => Ok(Authorization::Ready {
                author_signature: None,
                app_signature: None,
            }),
        }
    }

    /// Wallet signing is not raced against cancellation; the prompt must
    /// settle on its own.
    async fn sign(&self, request: &TypedDataRequest) -> Result<Signature, SubmissionFailure> {
        self.wallet
            .sign_typed_data(request)
            .await
            .map_err(|err| err.to_failure(false))
    }

    async fn broadcast(
        &self,
        op: &PendingOperation,
        author_signature: Option<Signature>,
        app_signature: Option<Signature>,
        run_options: &RunOptions,
    ) -> Result<TxHash, SubmissionFailure> {
        if op.submission_mode.uses_relay() {
            let relay = self.relay()?;
            let submission = RelaySubmission::new(op, author_signature, app_signature);
            let submission = &submission;
            run_classified(
                |cancel| async move {
                    cancel.check()?;
                    relay.submit(submission).await
                },
                run_options,
                RemoteError::is_retryable,
            )
            .await
            .map_err(|err| run_failure(err, true))
        } else {
            let call = ContractCall::for_operation(op, self.config.comments_contract, author_signature);
            let call = &call;
            let wallet = &self.wallet;
            run_classified(
                |cancel| async move {
                    cancel.check()?;
                    wallet.send_transaction(call).await
                },
                run_options,
                RemoteError::is_retryable,
            )
            .await
            .map_err(|err| run_failure(err, false))
        }
    }

    async fn confirm(&self, op: &PendingOperation) -> Result<(), SubmissionFailure> {
        let tx_hash = op.tx_hash.ok_or_else(|| {
            SubmissionFailure::new(FailureCause::Internal, "no transaction hash to confirm")
        })?;
        let timeout = self.config.confirmation_timeout;
        match tokio::time::timeout(timeout, self.receipts.wait_for_receipt(tx_hash, timeout)).await
        {
            Err(_) | Ok(Err(RemoteError::Timeout)) => Err(SubmissionFailure::confirmation_timeout()),
            Ok(Err(err)) => Err(err.to_failure(false)),
            Ok(Ok(receipt)) => match receipt.status {
                ReceiptStatus::Success => Ok(()),
                ReceiptStatus::Reverted => Err(SubmissionFailure::reverted()),
            },
        }
    }

    fn relay(&self) -> Result<&Arc<dyn Relay>, SubmissionFailure> {
        self.relay
            .as_ref()
            .ok_or_else(|| SubmissionFailure::new(FailureCause::Internal, "no relay configured"))
    }
}

fn check_cancelled(cancellation: &Cancellation) -> Result<(), SubmissionFailure> {
    cancellation
        .check()
        .map_err(|cancelled| SubmissionFailure::new(FailureCause::Cancelled, cancelled.to_string()))
}
