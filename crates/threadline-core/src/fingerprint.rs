use crate::hash::{blake3_32, push_field};
use crate::operation::{CommentPayload, OperationKind};
use crate::types::{ChainId, CommentId};

const COMMENT_ID_DOMAIN: &[u8] = b"comment-v1";

/// Derives the content-addressed id a new comment will carry once indexed:
/// `H("comment-v1" || chain_be || author || app || channel_be || parent ||
/// target || content || metadata || deadline_be)`.
pub fn derive_comment_id(chain_id: ChainId, payload: &CommentPayload) -> CommentId {
    let mut buf = Vec::with_capacity(
        COMMENT_ID_DOMAIN.len() + 8 + 20 + 20 + 8 + 32 + payload.content.len() + 64,
    );
    buf.extend_from_slice(COMMENT_ID_DOMAIN);
    buf.extend_from_slice(&chain_id.0.to_be_bytes());
    buf.extend_from_slice(payload.author.as_bytes());
    buf.extend_from_slice(payload.app.as_bytes());
    buf.extend_from_slice(&payload.channel_id.to_be_bytes());
    buf.extend_from_slice(payload.parent_reference().as_bytes());
    push_field(&mut buf, payload.target_uri.as_deref().unwrap_or("").as_bytes());
    push_field(&mut buf, payload.content.as_bytes());
    buf.extend_from_slice(&(payload.metadata.len() as u32).to_be_bytes());
    for entry in &payload.metadata {
        push_field(&mut buf, entry.key.as_bytes());
        push_field(&mut buf, &entry.value);
    }
    buf.extend_from_slice(&payload.deadline.to_be_bytes());
    CommentId(blake3_32(&buf))
}

/// Fingerprint correlating an operation with its eventual indexed row.
///
/// Edits and deletes target an existing row, so they reuse its id.
pub fn operation_fingerprint(
    kind: OperationKind,
    chain_id: ChainId,
    payload: &CommentPayload,
) -> CommentId {
    match (kind, payload.comment_id) {
        (OperationKind::Edit | OperationKind::Delete, Some(subject)) => subject,
        _ => derive_comment_id(chain_id, payload),
    }
}
