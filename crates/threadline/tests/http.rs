//! HTTP collaborators against a locally hosted relay and indexer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use threadline::{Client, HttpIndexer, HttpRelay, IndexerQuery, IndexerSource, ThreadlineConfig};
use threadline_cache::IndexerMode;
use threadline_core::{
    Address, CachePage, ChainId, CommentPayload, OperationKind, OperationState, RejectReason,
    SubmissionMode, TxHash,
};
use threadline_submit::memory::{InMemoryReceipts, InMemoryWallet};
use threadline_submit::{
    Relay, RelayRequest, RelayResponse, RelaySubmission, RemoteError, SubmitOptions,
    TypedDataDomain, TypedDataRequest,
};

const RELAY_TX: TxHash = TxHash([0x7e; 32]);

#[derive(Clone, Default)]
struct Backend {
    prepared: Arc<Mutex<Vec<RelayRequest>>>,
    submitted: Arc<Mutex<Vec<RelaySubmission>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    /// Status and body returned by every relay call while set.
    failure: Arc<Mutex<Option<(StatusCode, serde_json::Value)>>>,
    broadcast_directly: Arc<Mutex<bool>>,
}

impl Backend {
    fn failure(&self) -> Option<Response> {
        self.failure
            .lock()
            .unwrap()
            .clone()
            .map(|(status, body)| (status, Json(body)).into_response())
    }
}

async fn prepare(State(backend): State<Backend>, Json(request): Json<RelayRequest>) -> Response {
    if let Some(failure) = backend.failure() {
        return failure;
    }
    backend.prepared.lock().unwrap().push(request.clone());
    let response = if *backend.broadcast_directly.lock().unwrap() {
        RelayResponse::Broadcast {
            fingerprint: request.fingerprint,
            tx_hash: RELAY_TX,
        }
    } else {
        let domain = TypedDataDomain {
            name: "Comments".to_string(),
            chain_id: request.chain_id,
            verifying_contract: Address([0xcc; 20]),
        };
        RelayResponse::NeedsSignature {
            fingerprint: request.fingerprint,
            typed_data: TypedDataRequest::new(
                domain,
                request.kind,
                request.fingerprint,
                request.payload.clone(),
            ),
            app_signature: None,
        }
    };
    Json(response).into_response()
}

async fn submit(
    State(backend): State<Backend>,
    Json(submission): Json<RelaySubmission>,
) -> Response {
    if let Some(failure) = backend.failure() {
        return failure;
    }
    backend.submitted.lock().unwrap().push(submission);
    Json(json!({ "txHash": RELAY_TX })).into_response()
}

async fn comments(
    State(backend): State<Backend>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    backend.queries.lock().unwrap().push(params);
    Json(CachePage::empty(3)).into_response()
}

async fn spawn_backend(backend: Backend) -> SocketAddr {
    let app = Router::new()
        .route("/api/relay/prepare", post(prepare))
        .route("/api/relay/submit", post(submit))
        .route("/api/comments", get(comments))
        .with_state(backend);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

fn relay_request(author: Address) -> RelayRequest {
    let op = threadline_core::PendingOperation::new(
        OperationKind::Post,
        SubmissionMode::RelayedUnapproved,
        ChainId(8453),
        CommentPayload {
            author,
            content: "over http".into(),
            target_uri: Some("https://example.com".into()),
            ..CommentPayload::default()
        },
    )
    .expect("valid post");
    RelayRequest::from_operation(&op)
}

#[tokio::test]
async fn relay_prepare_and_submit_round_trip() {
    let backend = Backend::default();
    *backend.broadcast_directly.lock().unwrap() = true;
    let addr = spawn_backend(backend.clone()).await;
    let relay = HttpRelay::new(&format!("http://{addr}/"), Duration::from_secs(5)).expect("relay");

    let request = relay_request(Address([0x01; 20]));
    let response = relay.prepare(&request).await.expect("prepare");
    assert_eq!(
        response,
        RelayResponse::Broadcast {
            fingerprint: request.fingerprint,
            tx_hash: RELAY_TX,
        }
    );
    assert_eq!(backend.prepared.lock().unwrap().len(), 1);

    let op = threadline_core::PendingOperation::new(
        request.kind,
        SubmissionMode::RelayedApproved,
        request.chain_id,
        request.payload.clone(),
    )
    .expect("valid post");
    let tx = relay
        .submit(&RelaySubmission::new(&op, None, None))
        .await
        .expect("submit");
    assert_eq!(tx, RELAY_TX);
}

#[tokio::test]
async fn relay_errors_are_classified() {
    let backend = Backend::default();
    let addr = spawn_backend(backend.clone()).await;
    let relay = HttpRelay::new(&format!("http://{addr}"), Duration::from_secs(5)).expect("relay");
    let request = relay_request(Address([0x01; 20]));

    *backend.failure.lock().unwrap() = Some((
        StatusCode::BAD_REQUEST,
        json!({ "code": "invalid_signature", "message": "signature does not match" }),
    ));
    assert_eq!(
        relay.prepare(&request).await,
        Err(RemoteError::Rejected {
            reason: RejectReason::InvalidSignature,
            message: "signature does not match".into(),
        })
    );

    *backend.failure.lock().unwrap() = Some((
        StatusCode::SERVICE_UNAVAILABLE,
        json!({ "message": "maintenance" }),
    ));
    let err = relay.prepare(&request).await.expect_err("unavailable");
    assert_eq!(
        err,
        RemoteError::Server {
            status: 503,
            message: "maintenance".into(),
        }
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unreachable_relay_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let relay = HttpRelay::new(&format!("http://{addr}"), Duration::from_secs(2)).expect("relay");
    let err = relay
        .prepare(&relay_request(Address([0x01; 20])))
        .await
        .expect_err("nothing listening");
    assert!(matches!(err, RemoteError::Transport(_) | RemoteError::Timeout));
}

#[tokio::test]
async fn indexer_sends_listing_query() {
    let backend = Backend::default();
    let addr = spawn_backend(backend.clone()).await;
    let indexer =
        HttpIndexer::new(&format!("http://{addr}"), Duration::from_secs(5)).expect("indexer");

    let body = indexer
        .fetch_page(&IndexerQuery {
            target_uri: Some("https://example.com/a?b=c".into()),
            limit: 3,
            mode: IndexerMode::Flat,
            cursor: Some("abc".into()),
        })
        .await
        .expect("fetch");
    let page: CachePage = serde_json::from_slice(&body).expect("page body");
    assert_eq!(page, CachePage::empty(3));

    let queries = backend.queries.lock().unwrap().clone();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0]["targetUri"], "https://example.com/a?b=c");
    assert_eq!(queries[0]["limit"], "3");
    assert_eq!(queries[0]["mode"], "flat");
    assert_eq!(queries[0]["cursor"], "abc");
}

#[tokio::test]
async fn client_posts_through_http_relay() {
    let backend = Backend::default();
    let addr = spawn_backend(backend.clone()).await;

    let mut config = ThreadlineConfig::load(None).expect("default config");
    config.relay_url = Some(format!("http://{addr}"));
    config.indexer_url = format!("http://{addr}");
    config.submission_mode = SubmissionMode::RelayedUnapproved;
    config.comments_contract = Address([0xcc; 20]);
    config.target_uri = None;

    let wallet =
        Arc::new(InMemoryWallet::from_secret([0x21; 32], config.chain()).expect("wallet key"));
    let client = Client::builder(config)
        .wallet(wallet.clone())
        .receipts(Arc::new(InMemoryReceipts::default()))
        .build()
        .expect("client");

    let report = client.refresh().await.expect("refresh");
    assert!(!report.rejected);

    let op = client
        .post(
            CommentPayload {
                author: wallet.address(),
                content: "signed by me, paid by the app".into(),
                target_uri: Some("https://example.com".into()),
                ..CommentPayload::default()
            },
            SubmitOptions::default(),
        )
        .await
        .expect("valid post");

    assert_eq!(op.state, OperationState::Success);
    assert_eq!(op.tx_hash, Some(RELAY_TX));
    assert_eq!(wallet.signed_requests().len(), 1);

    let submitted = backend.submitted.lock().unwrap().clone();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].fingerprint, op.fingerprint);
    assert!(submitted[0].author_signature.is_some());

    let snapshot = client.cache().snapshot().expect("tree");
    assert_eq!(snapshot.results[0].id, op.fingerprint);
}
