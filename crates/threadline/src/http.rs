use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use threadline_core::{RejectReason, TxHash};
use threadline_submit::{Relay, RelayRequest, RelayResponse, RelaySubmission, RemoteError};

use crate::refetch::{IndexerQuery, IndexerSource};

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid base url: {0}")]
    InvalidUrl(String),
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Error body returned by the relay and indexer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub tx_hash: TxHash,
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, HttpError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

fn normalize_base(base: &str) -> Result<String, HttpError> {
    let trimmed = base.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.to_string())
    } else {
        Err(HttpError::InvalidUrl(base.to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transport(err.to_string())
    }
}

/// Maps a non-success response onto a remote error. Known rejection codes
/// become [`RemoteError::Rejected`].
pub fn status_error(status: u16, body: &[u8]) -> RemoteError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_else(|_| ErrorBody {
        code: None,
        message: String::from_utf8_lossy(body).into_owned(),
    });
    match parsed.code.as_deref().and_then(RejectReason::from_code) {
        Some(reason) => RemoteError::Rejected {
            reason,
            message: parsed.message,
        },
        None => RemoteError::Server {
            status,
            message: parsed.message,
        },
    }
}

async fn read_body(response: reqwest::Response) -> Result<Vec<u8>, RemoteError> {
    let status = response.status();
    let body = response.bytes().await.map_err(transport_error)?;
    if status.is_success() {
        Ok(body.to_vec())
    } else {
        Err(status_error(status.as_u16(), &body))
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, RemoteError> {
    serde_json::from_slice(body).map_err(|err| RemoteError::InvalidResponse(err.to_string()))
}

/// Relay reached over JSON HTTP.
#[derive(Clone)]
pub struct HttpRelay {
    base: String,
    http: reqwest::Client,
}

impl HttpRelay {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, HttpError> {
        Ok(Self {
            base: normalize_base(base)?,
            http: build_client(timeout)?,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/api/relay/{}", self.base, path)
    }

    async fn post<B>(&self, path: &str, body: &B) -> Result<Vec<u8>, RemoteError>
    where
        B: Serialize + Sync,
    {
        let url = self.endpoint(path);
        tracing::debug!(%url, "relay request");
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        read_body(response).await
    }
}

#[async_trait]
impl Relay for HttpRelay {
    async fn prepare(&self, request: &RelayRequest) -> Result<RelayResponse, RemoteError> {
        let body = self.post("prepare", request).await?;
        decode(&body)
    }

    async fn submit(&self, submission: &RelaySubmission) -> Result<TxHash, RemoteError> {
        let body = self.post("submit", submission).await?;
        let parsed: SubmitResponse = decode(&body)?;
        Ok(parsed.tx_hash)
    }
}

/// Indexer read API reached over HTTP.
#[derive(Clone)]
pub struct HttpIndexer {
    base: String,
    http: reqwest::Client,
}

impl HttpIndexer {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, HttpError> {
        Ok(Self {
            base: normalize_base(base)?,
            http: build_client(timeout)?,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/comments", self.base)
    }
}

#[async_trait]
impl IndexerSource for HttpIndexer {
    async fn fetch_page(&self, query: &IndexerQuery) -> Result<Vec<u8>, RemoteError> {
        let response = self
            .http
            .get(self.endpoint())
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        read_body(response).await
    }
}
