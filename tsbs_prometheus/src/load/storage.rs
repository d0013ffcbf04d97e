//! The shared handle to the Prometheus remote-write endpoint.

use std::sync::atomic::{AtomicBool, Ordering};

use prost::Message;
use reqwest::{Method, StatusCode, header::CONTENT_TYPE};
use secrecy::{ExposeSecret, Secret};
use tracing::debug;
use url::Url;

use super::prompb::WriteRequest;

const REMOTE_WRITE_VERSION: &str = "0.1.0";
const READY_PATH: &str = "/-/ready";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage url: {0}")]
    Url(#[from] url::ParseError),

    #[error("failed to build the http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to send {method} {url} request: {source}")]
    RequestSend {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read the response body: {0}")]
    Bytes(#[source] reqwest::Error),

    #[error("server responded with error [{code}]: {message}")]
    ApiError { code: StatusCode, message: String },

    #[error("failed to compress the write request: {0}")]
    Compress(#[from] snap::Error),

    #[error("storage handle is closed")]
    Closed,
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

/// Connection to the storage under test
///
/// One handle is built per run and shared by the database creator and every worker.
#[derive(Debug)]
pub struct PromStorage {
    http_client: reqwest::Client,
    base_url: Url,
    write_url: Url,
    auth_token: Option<Secret<String>>,
    closed: AtomicBool,
}

impl PromStorage {
    pub fn new(base_url: Url, write_path: &str) -> Result<Self> {
        let write_url = base_url.join(write_path)?;
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(StorageError::Client)?;
        Ok(Self {
            http_client,
            base_url,
            write_url,
            auth_token: None,
            closed: AtomicBool::new(false),
        })
    }

    /// Set the `Bearer` token sent with every request
    pub fn with_auth_token<S: Into<String>>(mut self, auth_token: S) -> Self {
        self.auth_token = Some(Secret::new(auth_token.into()));
        self
    }

    pub fn write_url(&self) -> &Url {
        &self.write_url
    }

    /// Check that the server is ready to accept writes
    pub async fn ready(&self) -> Result<()> {
        self.ensure_open()?;
        let url = self.base_url.join(READY_PATH)?;
        let mut req = self.http_client.get(url);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token.expose_secret());
        }
        let resp = req
            .send()
            .await
            .map_err(|source| StorageError::RequestSend {
                method: Method::GET,
                url: READY_PATH.to_string(),
                source,
            })?;
        check_status(resp).await
    }

    /// Send one remote-write request, returning once the server acknowledged it
    pub async fn remote_write(&self, request: &WriteRequest) -> Result<()> {
        self.ensure_open()?;
        let body = snap::raw::Encoder::new().compress_vec(&request.encode_to_vec())?;
        debug!(
            series = request.timeseries.len(),
            bytes = body.len(),
            "sending remote write request"
        );

        let mut req = self
            .http_client
            .post(self.write_url.clone())
            .header("Content-Encoding", "snappy")
            .header(CONTENT_TYPE, "application/x-protobuf")
            .header("X-Prometheus-Remote-Write-Version", REMOTE_WRITE_VERSION);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token.expose_secret());
        }
        let resp = req
            .body(body)
            .send()
            .await
            .map_err(|source| StorageError::RequestSend {
                method: Method::POST,
                url: self.write_url.path().to_string(),
                source,
            })?;
        check_status(resp).await
    }

    /// Release the handle; later requests fail with [`StorageError::Closed`]
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(url = %self.base_url, "storage handle closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

async fn check_status(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let content = resp.bytes().await.map_err(StorageError::Bytes)?;
    Err(StorageError::ApiError {
        code: status,
        message: String::from_utf8_lossy(&content).into_owned(),
    })
}
