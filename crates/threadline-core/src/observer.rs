use crate::operation::PendingOperation;

/// Receives pending operations as the submission pipeline creates and settles
/// them. Implemented by the cache engine; callbacks must not block.
pub trait OperationObserver: Send + Sync {
    /// Called once, right after validation, before any network step.
    fn operation_created(&self, op: &PendingOperation);
    /// Called when a non-terminal stage change reveals new data, such as the
    /// transaction hash after broadcast.
    fn operation_progressed(&self, _op: &PendingOperation) {}
    /// Called once the operation reaches `success` or `error`.
    fn operation_settled(&self, op: &PendingOperation);
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl OperationObserver for NoopObserver {
    fn operation_created(&self, _op: &PendingOperation) {}

    fn operation_settled(&self, _op: &PendingOperation) {}
}
