use serde::{Deserialize, Serialize};
use threadline_core::hash::{blake3_32, push_field};
use threadline_core::types::hex_bytes;
use threadline_core::{
    Address, ChainId, CommentId, CommentPayload, OperationKind, PendingOperation, Signature,
    TxHash,
};

const TYPED_DATA_DOMAIN: &[u8] = b"typed-data-v1";

/// Signing domain separating this app's writes from other contracts/chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedDataDomain {
    pub name: String,
    pub chain_id: ChainId,
    pub verifying_contract: Address,
}

/// Structured data the author is asked to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedDataRequest {
    pub domain: TypedDataDomain,
    pub primary_type: String,
    pub fingerprint: CommentId,
    pub message: CommentPayload,
    /// 32-byte digest the signature commits to.
    #[serde(with = "hex_bytes")]
    pub digest: Vec<u8>,
}

impl TypedDataRequest {
    pub fn new(
        domain: TypedDataDomain,
        kind: OperationKind,
        fingerprint: CommentId,
        message: CommentPayload,
    ) -> Self {
        let primary_type = primary_type(kind).to_string();
        let digest = typed_data_digest(&domain, &primary_type, fingerprint, message.deadline);
        Self {
            domain,
            primary_type,
            fingerprint,
            message,
            digest: digest.to_vec(),
        }
    }
}

fn primary_type(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Post => "AddComment",
        OperationKind::Edit => "EditComment",
        OperationKind::Delete => "DeleteComment",
    }
}

fn typed_data_digest(
    domain: &TypedDataDomain,
    primary_type: &str,
    fingerprint: CommentId,
    deadline: u64,
) -> [u8; 32] {
    let mut buf = Vec::with_capacity(TYPED_DATA_DOMAIN.len() + 128);
    buf.extend_from_slice(TYPED_DATA_DOMAIN);
    push_field(&mut buf, domain.name.as_bytes());
    buf.extend_from_slice(&domain.chain_id.0.to_be_bytes());
    buf.extend_from_slice(domain.verifying_contract.as_bytes());
    push_field(&mut buf, primary_type.as_bytes());
    buf.extend_from_slice(fingerprint.as_bytes());
    buf.extend_from_slice(&deadline.to_be_bytes());
    blake3_32(&buf)
}

/// Contract call the author's wallet broadcasts in direct mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractCall {
    pub to: Address,
    pub chain_id: ChainId,
    pub function: String,
    pub fingerprint: CommentId,
    pub payload: CommentPayload,
    pub author_signature: Option<Signature>,
}

impl ContractCall {
    pub fn for_operation(
        op: &PendingOperation,
        to: Address,
        author_signature: Option<Signature>,
    ) -> Self {
        let function = match op.kind {
            OperationKind::Post => "postComment",
            OperationKind::Edit => "editComment",
            OperationKind::Delete => "deleteComment",
        };
        Self {
            to,
            chain_id: op.chain_id,
            function: function.to_string(),
            fingerprint: op.fingerprint,
            payload: op.payload.clone(),
            author_signature,
        }
    }
}

/// Body sent to the relay's prepare endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub fingerprint: CommentId,
    pub kind: OperationKind,
    pub chain_id: ChainId,
    pub payload: CommentPayload,
}

impl RelayRequest {
    pub fn from_operation(op: &PendingOperation) -> Self {
        Self {
            fingerprint: op.fingerprint,
            kind: op.kind,
            chain_id: op.chain_id,
            payload: op.payload.clone(),
        }
    }
}

/// Relay answer to a prepare request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum RelayResponse {
    /// The author has standing approval and the relay already broadcast.
    #[serde(rename_all = "camelCase")]
    Broadcast {
        fingerprint: CommentId,
        tx_hash: TxHash,
    },
    #[serde(rename_all = "camelCase")]
    NeedsSignature {
        fingerprint: CommentId,
        typed_data: TypedDataRequest,
        #[serde(default)]
        app_signature: Option<Signature>,
    },
}

impl RelayResponse {
    pub fn fingerprint(&self) -> CommentId {
        match self {
            Self::Broadcast { fingerprint, .. } | Self::NeedsSignature { fingerprint, .. } => {
                *fingerprint
            }
        }
    }
}

/// Body sent to the relay's submit endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySubmission {
    pub fingerprint: CommentId,
    pub kind: OperationKind,
    pub chain_id: ChainId,
    pub payload: CommentPayload,
    #[serde(default)]
    pub author_signature: Option<Signature>,
    #[serde(default)]
    pub app_signature: Option<Signature>,
}

impl RelaySubmission {
    pub fn new(
        op: &PendingOperation,
        author_signature: Option<Signature>,
        app_signature: Option<Signature>,
    ) -> Self {
        Self {
            fingerprint: op.fingerprint,
            kind: op.kind,
            chain_id: op.chain_id,
            payload: op.payload.clone(),
            author_signature,
            app_signature,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub status: ReceiptStatus,
    #[serde(default)]
    pub block_number: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::{RelayResponse, TypedDataDomain, TypedDataRequest};
    use threadline_core::{Address, ChainId, CommentId, CommentPayload, OperationKind, TxHash};

    fn domain(chain: u64) -> TypedDataDomain {
        TypedDataDomain {
            name: "Comments".to_string(),
            chain_id: ChainId(chain),
            verifying_contract: Address([0xcc; 20]),
        }
    }

    #[test]
    fn digest_binds_domain_and_kind() {
        let fp = CommentId([0x01; 32]);
        let payload = CommentPayload::default();
        let base = TypedDataRequest::new(domain(1), OperationKind::Post, fp, payload.clone());
        assert_eq!(base.digest.len(), 32);
        assert_eq!(base.primary_type, "AddComment");

        let other_chain = TypedDataRequest::new(domain(2), OperationKind::Post, fp, payload.clone());
        assert_ne!(base.digest, other_chain.digest);

        let edit = TypedDataRequest::new(domain(1), OperationKind::Edit, fp, payload);
        assert_ne!(base.digest, edit.digest);
    }

    #[test]
    fn relay_response_is_tagged_by_status() {
        let body = format!(
            r#"{{"status":"broadcast","fingerprint":"0x{fp}","txHash":"0x{tx}"}}"#,
            fp = "11".repeat(32),
            tx = "22".repeat(32)
        );
        let parsed: RelayResponse = serde_json::from_str(&body).expect("decode");
        assert_eq!(
            parsed,
            RelayResponse::Broadcast {
                fingerprint: CommentId([0x11; 32]),
                tx_hash: TxHash([0x22; 32]),
            }
        );
        assert_eq!(parsed.fingerprint(), CommentId([0x11; 32]));
    }
}
