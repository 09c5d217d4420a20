use std::sync::Arc;
use std::time::Duration;

use threadline::{Client, InMemoryIndexer, ThreadlineConfig};
use threadline_core::{
    Address, CachePage, CommentId, CommentPayload, CommentRow, FailureCause, OperationKind,
    OperationState, PendingKind, PendingOperation, RejectReason, RowStatus, Stage,
    SubmissionMode, TxHash,
};
use threadline_submit::memory::{InMemoryReceipts, InMemoryWallet, ScriptedRelay};
use threadline_submit::{RelayResponse, RemoteError, SubmitOptions};
use threadline_task::RetryPolicy;

const TARGET: &str = "https://example.com/article";

struct Harness {
    client: Client,
    wallet: Arc<InMemoryWallet>,
    receipts: Arc<InMemoryReceipts>,
    relay: Arc<ScriptedRelay>,
    indexer: Arc<InMemoryIndexer>,
}

fn config(mode: SubmissionMode) -> ThreadlineConfig {
    let mut config = ThreadlineConfig::load(None).expect("default config");
    config.submission_mode = mode;
    config.relay_url = None;
    config.comments_contract = Address([0xcc; 20]);
    config.target_uri = Some(TARGET.to_string());
    config.confirmation_timeout = Duration::from_secs(2);
    config.retries = 0;
    config
}

fn harness(config: ThreadlineConfig) -> Harness {
    let wallet =
        Arc::new(InMemoryWallet::from_secret([0x11; 32], config.chain()).expect("wallet key"));
    let receipts = Arc::new(InMemoryReceipts::default());
    let relay = Arc::new(ScriptedRelay::new(
        config.signing_domain_name.clone(),
        config.comments_contract,
    ));
    let indexer = Arc::new(InMemoryIndexer::default());
    let client = Client::builder(config)
        .wallet(wallet.clone())
        .receipts(receipts.clone())
        .relay(relay.clone())
        .indexer(indexer.clone())
        .build()
        .expect("client");
    Harness {
        client,
        wallet,
        receipts,
        relay,
        indexer,
    }
}

fn post_payload(author: Address, content: &str) -> CommentPayload {
    CommentPayload {
        author,
        content: content.to_string(),
        target_uri: Some(TARGET.to_string()),
        ..CommentPayload::default()
    }
}

fn indexed_row(id: CommentId, content: &str) -> CommentRow {
    CommentRow {
        id,
        author: Address([0x22; 20]),
        author_profile: None,
        app: Address::ZERO,
        channel_id: 0,
        content: content.to_string(),
        target_uri: Some(TARGET.to_string()),
        parent_id: CommentId::default(),
        metadata: Vec::new(),
        created_at: 1_700_000_000,
        deleted_at: None,
        reaction_counts: Default::default(),
        replies: Some(CachePage::empty(5)),
        pending: None,
    }
}

fn page(limit: usize, rows: Vec<CommentRow>) -> CachePage {
    let mut page = CachePage::empty(limit);
    page.results = rows;
    page
}

#[tokio::test]
async fn optimistic_post_lands_in_empty_listing() {
    let h = harness(config(SubmissionMode::Direct));
    h.client.cache().reconcile(CachePage::empty(2));

    let op = h
        .client
        .post(post_payload(h.wallet.address(), "first!"), SubmitOptions::default())
        .await
        .expect("valid post");
    assert_eq!(op.state, OperationState::Success);

    let snapshot = h.client.cache().snapshot().expect("tree");
    assert_eq!(snapshot.len(), 1);
    let row = &snapshot.results[0];
    assert_eq!(row.id, op.fingerprint);
    assert!(row.is_optimistic());
    let marker = row.pending.as_ref().expect("marker");
    assert_eq!(marker.kind, PendingKind::Insert);
    assert_eq!(marker.status, RowStatus::Confirmed);
    assert_eq!(marker.tx_hash, op.tx_hash);
}

#[tokio::test]
async fn indexed_write_leaves_unindexed_set() {
    let h = harness(config(SubmissionMode::Direct));
    let c1 = indexed_row(CommentId([0x01; 32]), "older one");
    let c2 = indexed_row(CommentId([0x02; 32]), "older two");
    h.client
        .cache()
        .reconcile(page(2, vec![c1.clone(), c2.clone()]));

    let op = h
        .client
        .post(post_payload(h.wallet.address(), "fresh"), SubmitOptions::default())
        .await
        .expect("valid post");
    let before = h.client.cache().snapshot().expect("tree");
    assert_eq!(before.len(), 2);
    assert_eq!(before.results[0].id, op.fingerprint);
    assert_eq!(h.client.cache().unindexed().len(), 1);

    let fresh = page(2, vec![indexed_row(op.fingerprint, "fresh"), c1]);
    h.indexer.set_page(&fresh).expect("page");
    let report = h.client.refresh().await.expect("refresh");

    assert_eq!(report.indexed, 1);
    assert!(h.client.cache().unindexed().is_empty());
    assert_eq!(*h.client.cache().snapshot().expect("tree"), fresh);
}

#[tokio::test(start_paused = true)]
async fn transient_send_failures_are_retried() {
    let h = harness(config(SubmissionMode::Direct));
    h.client.cache().reconcile(CachePage::empty(5));
    h.wallet
        .push_send_failure(RemoteError::Transport("connection reset".into()));
    h.wallet
        .push_send_failure(RemoteError::Transport("connection reset".into()));

    let op = h
        .client
        .post(
            post_payload(h.wallet.address(), "third time lucky"),
            SubmitOptions {
                retry_policy: Some(RetryPolicy::constant(2, Duration::from_millis(10))),
                ..SubmitOptions::default()
            },
        )
        .await
        .expect("valid post");

    assert_eq!(op.state, OperationState::Success);
    assert_eq!(h.wallet.send_attempts(), 3);
    assert_eq!(h.wallet.sent_calls().len(), 1);
}

#[tokio::test]
async fn relay_broadcast_skips_author_signature() {
    let h = harness(config(SubmissionMode::RelayedUnapproved));
    h.client.cache().reconcile(CachePage::empty(5));

    let payload = post_payload(h.wallet.address(), "sponsored");
    let expected = PendingOperation::new(
        OperationKind::Post,
        SubmissionMode::RelayedUnapproved,
        h.client.config().chain(),
        payload.clone(),
    )
    .expect("valid post");
    let tx_hash = TxHash([0x5a; 32]);
    h.relay.push_prepare(Ok(RelayResponse::Broadcast {
        fingerprint: expected.fingerprint,
        tx_hash,
    }));

    let op = h
        .client
        .post(payload, SubmitOptions::default())
        .await
        .expect("valid post");

    assert_eq!(op.fingerprint, expected.fingerprint);
    assert_eq!(op.tx_hash, Some(tx_hash));
    assert_eq!(op.stage, Stage::Success);
    assert!(h.wallet.signed_requests().is_empty());
    assert!(h.wallet.sent_calls().is_empty());
    assert!(h.relay.submitted().is_empty());
    assert_eq!(h.relay.prepared().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn confirmation_timeout_marks_row_without_removing_it() {
    let h = harness(config(SubmissionMode::Direct));
    h.receipts.set_default(None);
    h.client.cache().reconcile(CachePage::empty(5));

    let op = h
        .client
        .post(post_payload(h.wallet.address(), "slow chain"), SubmitOptions::default())
        .await
        .expect("valid post");

    let failure = op.failure().expect("failed");
    assert!(failure.is_timeout());
    assert_eq!(failure.cause, FailureCause::ConfirmationTimeout);

    let snapshot = h.client.cache().snapshot().expect("tree");
    assert_eq!(snapshot.len(), 1);
    let marker = snapshot.results[0].pending.as_ref().expect("marker");
    assert!(matches!(
        marker.status,
        RowStatus::Error {
            timed_out: true,
            ..
        }
    ));
    assert!(h
        .client
        .cache()
        .unindexed()
        .iter()
        .any(|tracked| tracked.fingerprint == op.fingerprint));
}

#[tokio::test]
async fn retried_write_replaces_its_row() {
    let h = harness(config(SubmissionMode::Direct));
    h.client.cache().reconcile(CachePage::empty(5));
    h.wallet.push_send_failure(RemoteError::Rejected {
        reason: RejectReason::InsufficientFee,
        message: "underpriced".into(),
    });

    let failed = h
        .client
        .post(post_payload(h.wallet.address(), "try again"), SubmitOptions::default())
        .await
        .expect("valid post");
    assert_eq!(
        failed.failure().map(|f| f.cause),
        Some(FailureCause::ChainRejected(RejectReason::InsufficientFee))
    );
    let errored = h.client.cache().snapshot().expect("tree");
    assert!(matches!(
        errored.results[0].pending.as_ref().map(|m| &m.status),
        Some(RowStatus::Error { timed_out: false, .. })
    ));

    let retried = h
        .client
        .retry(&failed, SubmitOptions::default())
        .await
        .expect("resubmitted");
    assert_eq!(retried.fingerprint, failed.fingerprint);
    assert_eq!(retried.state, OperationState::Success);

    let snapshot = h.client.cache().snapshot().expect("tree");
    assert_eq!(snapshot.len(), 1);
    assert_eq!(
        snapshot.results[0].pending.as_ref().map(|m| &m.status),
        Some(&RowStatus::Confirmed)
    );
    assert_eq!(h.client.cache().unindexed().len(), 1);
}

#[tokio::test]
async fn dismissed_failure_disappears() {
    let h = harness(config(SubmissionMode::Direct));
    h.client.cache().reconcile(CachePage::empty(5));
    h.wallet.reject_signatures(true);

    let failed = h
        .client
        .post(post_payload(h.wallet.address(), "never mind"), SubmitOptions::default())
        .await
        .expect("valid post");
    assert_eq!(
        failed.failure().map(|f| f.cause),
        Some(FailureCause::UserRejected)
    );
    assert_eq!(h.client.cache().snapshot().expect("tree").len(), 1);

    assert!(h.client.dismiss(failed.fingerprint));
    assert!(h.client.cache().snapshot().expect("tree").is_empty());
    assert!(h.client.cache().unindexed().is_empty());
}

#[tokio::test]
async fn edit_overlay_survives_until_indexed() {
    let h = harness(config(SubmissionMode::Direct));
    let subject = indexed_row(CommentId([0x0e; 32]), "typo");
    h.client.cache().reconcile(page(5, vec![subject.clone()]));

    let op = h
        .client
        .edit(
            CommentPayload {
                author: h.wallet.address(),
                content: "fixed".into(),
                comment_id: Some(subject.id),
                ..CommentPayload::default()
            },
            SubmitOptions::default(),
        )
        .await
        .expect("valid edit");
    assert_eq!(op.fingerprint, subject.id);

    let row = h.client.cache().snapshot().expect("tree").results[0].clone();
    assert_eq!(row.content, "fixed");
    assert_eq!(row.pending.as_ref().map(|m| m.kind), Some(PendingKind::Edit));

    // Indexer still reports the old content: overlay is re-applied.
    h.indexer.set_page(&page(5, vec![subject.clone()])).expect("page");
    let report = h.client.refresh().await.expect("refresh");
    assert_eq!(report.reinserted, 1);
    assert_eq!(
        h.client.cache().snapshot().expect("tree").results[0].content,
        "fixed"
    );

    let mut updated = subject;
    updated.content = "fixed".into();
    h.indexer.set_page(&page(5, vec![updated.clone()])).expect("page");
    let report = h.client.refresh().await.expect("refresh");
    assert_eq!(report.indexed, 1);
    assert_eq!(h.client.cache().snapshot().expect("tree").results[0], updated);
}

#[tokio::test]
async fn delete_overlay_hides_row_until_indexed() {
    let h = harness(config(SubmissionMode::Direct));
    let subject = indexed_row(CommentId([0x0d; 32]), "regrettable");
    h.client.cache().reconcile(page(5, vec![subject.clone()]));

    h.client
        .delete(
            CommentPayload {
                author: h.wallet.address(),
                comment_id: Some(subject.id),
                ..CommentPayload::default()
            },
            SubmitOptions::default(),
        )
        .await
        .expect("valid delete");

    let row = h.client.cache().snapshot().expect("tree").results[0].clone();
    assert!(row.deleted_at.is_some());
    assert_eq!(row.pending.as_ref().map(|m| m.kind), Some(PendingKind::Delete));

    h.indexer.set_page(&CachePage::empty(5)).expect("page");
    let report = h.client.refresh().await.expect("refresh");
    assert_eq!(report.indexed, 1);
    assert!(h.client.cache().unindexed().is_empty());
}

#[tokio::test]
async fn reply_lands_under_its_parent() {
    let h = harness(config(SubmissionMode::Direct));
    let parent = indexed_row(CommentId([0x0a; 32]), "parent");
    h.client.cache().reconcile(page(5, vec![parent.clone()]));

    let op = h
        .client
        .post(
            CommentPayload {
                author: h.wallet.address(),
                content: "a reply".into(),
                parent_id: Some(parent.id),
                ..CommentPayload::default()
            },
            SubmitOptions::default(),
        )
        .await
        .expect("valid reply");

    let snapshot = h.client.cache().snapshot().expect("tree");
    assert_eq!(snapshot.len(), 1);
    let replies = snapshot.results[0].replies.as_ref().expect("reply page");
    assert_eq!(replies.results[0].id, op.fingerprint);
    assert!(replies.results[0].is_optimistic());
}

#[tokio::test]
async fn snapshots_are_published_to_subscribers() {
    let h = harness(config(SubmissionMode::Direct));
    let mut rx = h.client.subscribe();
    h.client.cache().reconcile(CachePage::empty(5));
    rx.changed().await.expect("initial page");
    rx.borrow_and_update();

    h.client
        .post(post_payload(h.wallet.address(), "watch me"), SubmitOptions::default())
        .await
        .expect("valid post");

    assert!(rx.has_changed().expect("sender alive"));
    let latest = rx.borrow_and_update().clone().expect("tree");
    assert_eq!(latest.len(), 1);
}
