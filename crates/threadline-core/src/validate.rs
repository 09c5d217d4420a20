use crate::error::ValidationError;
use crate::operation::{CommentPayload, OperationKind};

/// Upper bound on comment body size accepted for submission.
pub const MAX_CONTENT_BYTES: usize = 10 * 1024;

fn has_target(payload: &CommentPayload) -> bool {
    payload
        .target_uri
        .as_deref()
        .is_some_and(|uri| !uri.trim().is_empty())
}

fn check_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    if content.len() > MAX_CONTENT_BYTES {
        return Err(ValidationError::ContentTooLong {
            max: MAX_CONTENT_BYTES,
        });
    }
    Ok(())
}

/// Checks domain rules for a write before any pending operation exists.
pub fn validate_payload(kind: OperationKind, payload: &CommentPayload) -> Result<(), ValidationError> {
    if payload.author.is_zero() {
        return Err(ValidationError::MissingAuthor);
    }
    let subject = payload.comment_id.filter(|id| !id.is_zero());

    match kind {
        OperationKind::Post => {
            if payload.comment_id.is_some() {
                return Err(ValidationError::UnexpectedSubject);
            }
            check_content(&payload.content)?;
            match (has_target(payload), payload.is_reply()) {
                (true, true) => Err(ValidationError::ConflictingTarget),
                (false, false) => Err(ValidationError::MissingTarget),
                _ => Ok(()),
            }
        }
        OperationKind::Edit => {
            if subject.is_none() {
                return Err(ValidationError::MissingSubject("edit"));
            }
            check_content(&payload.content)
        }
        OperationKind::Delete => {
            if subject.is_none() {
                return Err(ValidationError::MissingSubject("delete"));
            }
            Ok(())
        }
    }
}
