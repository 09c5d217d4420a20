use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{TransitionError, ValidationError};
use crate::fingerprint::operation_fingerprint;
use crate::types::{hex_bytes, Address, ChainId, CommentId, TxHash};
use crate::validate::validate_payload;

/// Write action carried by a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Post,
    Edit,
    Delete,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

/// Who signs and who pays for the ledger write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmissionMode {
    /// Author signs and pays.
    Direct,
    /// Author signs, the app's relay broadcasts.
    RelayedUnapproved,
    /// The app holds standing approval; no author signature is needed.
    RelayedApproved,
}

impl SubmissionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::RelayedUnapproved => "relayed-unapproved",
            Self::RelayedApproved => "relayed-approved",
        }
    }

    pub fn uses_relay(self) -> bool {
        !matches!(self, Self::Direct)
    }
}

/// One key/value metadata attachment on a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub key: String,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

/// Write content as the author composed it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPayload {
    pub author: Address,
    pub app: Address,
    #[serde(default)]
    pub channel_id: u64,
    #[serde(default)]
    pub content: String,
    /// Root-level target (for example a page URL); exclusive with `parent_id`.
    #[serde(default)]
    pub target_uri: Option<String>,
    /// Parent comment for replies; exclusive with `target_uri`.
    #[serde(default)]
    pub parent_id: Option<CommentId>,
    /// Existing comment an edit or delete applies to.
    #[serde(default)]
    pub comment_id: Option<CommentId>,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
    /// Signature expiry in unix seconds.
    #[serde(default)]
    pub deadline: u64,
}

impl CommentPayload {
    /// Parent reference used to locate the target page; zero means root.
    pub fn parent_reference(&self) -> CommentId {
        self.parent_id.unwrap_or(CommentId::ZERO)
    }

    pub fn is_reply(&self) -> bool {
        !self.parent_reference().is_zero()
    }
}

/// Best-effort display enrichment for an author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorProfile {
    pub address: Address,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Definitive chain-level rejection reported by a wallet, relay, or receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    InvalidSignature,
    StaleNonce,
    InsufficientFee,
    Reverted,
    Other,
}

impl RejectReason {
    /// Maps relay/node error codes onto a rejection reason.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "invalid_signature" | "invalid-signature" | "bad_signature" => {
                Some(Self::InvalidSignature)
            }
            "nonce_too_low" | "stale_nonce" | "stale-nonce" => Some(Self::StaleNonce),
            "insufficient_funds" | "insufficient_fee" | "underpriced" => {
                Some(Self::InsufficientFee)
            }
            "reverted" | "execution_reverted" => Some(Self::Reverted),
            "rejected" => Some(Self::Other),
            _ => None,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InvalidSignature => "invalid signature",
            Self::StaleNonce => "stale nonce",
            Self::InsufficientFee => "insufficient fee",
            Self::Reverted => "reverted",
            Self::Other => "rejected",
        };
        f.write_str(text)
    }
}

/// Classified reason a submission settled in `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "reason", rename_all = "kebab-case")]
pub enum FailureCause {
    ChainMismatch,
    UserRejected,
    ChainRejected(RejectReason),
    Transport,
    Relay,
    FingerprintMismatch,
    /// Receipt showed a non-success status.
    Reverted,
    /// No receipt within the confirmation window; the tx may still land.
    ConfirmationTimeout,
    Cancelled,
    Internal,
}

/// Terminal failure recorded on a pending operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionFailure {
    pub cause: FailureCause,
    pub message: String,
}

impl SubmissionFailure {
    pub fn new(cause: FailureCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
        }
    }

    pub fn confirmation_timeout() -> Self {
        Self::new(FailureCause::ConfirmationTimeout, "confirmation timed out")
    }

    pub fn reverted() -> Self {
        Self::new(FailureCause::Reverted, "transaction reverted")
    }

    pub fn is_timeout(&self) -> bool {
        self.cause == FailureCause::ConfirmationTimeout
    }

    /// Whether resubmitting is sensible; a timed-out tx should be checked on
    /// an explorer first because it may still confirm.
    pub fn suggests_resubmit(&self) -> bool {
        !matches!(
            self.cause,
            FailureCause::ConfirmationTimeout | FailureCause::FingerprintMismatch
        )
    }
}

impl fmt::Display for SubmissionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<TransitionError> for SubmissionFailure {
    fn from(err: TransitionError) -> Self {
        Self::new(FailureCause::Internal, err.to_string())
    }
}

/// Externally visible operation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OperationState {
    Pending,
    Success,
    Error { error: SubmissionFailure },
}

/// Pipeline stage; `Success` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Preparing,
    ChainReady,
    Signed,
    Broadcast,
    Confirming,
    Success,
    Error,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::ChainReady => "chain-ready",
            Self::Signed => "signed",
            Self::Broadcast => "broadcast",
            Self::Confirming => "confirming",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    fn may_advance_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Self::Preparing, Self::ChainReady)
                | (Self::ChainReady, Self::Signed)
                | (Self::Signed, Self::Broadcast)
                // relay returned an already-broadcast tx
                | (Self::Signed, Self::Confirming)
                | (Self::Broadcast, Self::Confirming)
                | (Self::Confirming, Self::Success)
        )
    }
}

/// One in-flight write and its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub fingerprint: CommentId,
    pub kind: OperationKind,
    pub submission_mode: SubmissionMode,
    pub chain_id: ChainId,
    pub payload: CommentPayload,
    pub tx_hash: Option<TxHash>,
    pub state: OperationState,
    pub stage: Stage,
    pub resolved_author_profile: Option<AuthorProfile>,
}

impl PendingOperation {
    /// Validates `payload` and derives the fingerprint. Nothing is created
    /// when validation fails.
    pub fn new(
        kind: OperationKind,
        submission_mode: SubmissionMode,
        chain_id: ChainId,
        payload: CommentPayload,
    ) -> Result<Self, ValidationError> {
        validate_payload(kind, &payload)?;
        let fingerprint = operation_fingerprint(kind, chain_id, &payload);
        Ok(Self {
            fingerprint,
            kind,
            submission_mode,
            chain_id,
            payload,
            tx_hash: None,
            state: OperationState::Pending,
            stage: Stage::Preparing,
            resolved_author_profile: None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn failure(&self) -> Option<&SubmissionFailure> {
        match &self.state {
            OperationState::Error { error } => Some(error),
            _ => None,
        }
    }

    /// Moves to the next non-error stage.
    pub fn advance(&mut self, next: Stage) -> Result<(), TransitionError> {
        if self.stage.is_terminal() {
            return Err(TransitionError::AlreadyTerminal(self.stage.as_str()));
        }
        if !self.stage.may_advance_to(next) {
            return Err(TransitionError::Illegal {
                from: self.stage.as_str(),
                to: next.as_str(),
            });
        }
        self.stage = next;
        if next == Stage::Success {
            self.state = OperationState::Success;
        }
        Ok(())
    }

    /// Settles the operation in `error` from any non-terminal stage.
    pub fn fail(&mut self, failure: SubmissionFailure) -> Result<(), TransitionError> {
        if self.stage.is_terminal() {
            return Err(TransitionError::AlreadyTerminal(self.stage.as_str()));
        }
        self.stage = Stage::Error;
        self.state = OperationState::Error { error: failure };
        Ok(())
    }
}
