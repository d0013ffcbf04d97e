use std::time::Duration;

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, Secret};
use tokio::time::Instant;
use tracing::info;
use tsbs_query::{HttpQuery, QuerySpec};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid query url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid http method '{0}'")]
    Method(String),

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
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Per request output options
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// 0 logs nothing, 1 logs each request line, 2 adds the request body, 3 adds the response
    pub debug: u8,
    /// Pretty print every JSON response to stdout
    pub print_responses: bool,
}

/// Executes [`HttpQuery`]s against a single endpoint
#[derive(Debug, Clone)]
pub struct HttpClient {
    http_client: reqwest::Client,
    base_url: Url,
    auth_token: Option<Secret<String>>,
    options: ClientOptions,
}

impl HttpClient {
    pub fn new(base_url: Url, options: ClientOptions) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(ClientError::Client)?;
        Ok(Self {
            http_client,
            base_url,
            auth_token: None,
            options,
        })
    }

    /// Set the `Bearer` token sent with every request
    pub fn with_auth_token(mut self, auth_token: Secret<String>) -> Self {
        self.auth_token = Some(auth_token);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Run `query`, returning the time from sending the request until the whole body was read
    pub async fn execute(&self, query: &QuerySpec<HttpQuery>) -> Result<Duration> {
        let request = &query.request;
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ClientError::Method(request.method.clone()))?;
        let url = Url::parse(&format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            request.path
        ))?;

        if self.options.debug >= 1 {
            info!(id = query.id, "{method} {url}");
        }
        if self.options.debug >= 2
            && let Some(body) = &request.body
        {
            info!(id = query.id, %body, "request body");
        }

        let mut req = self.http_client.request(method.clone(), url);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token.expose_secret());
        }
        if let Some(body) = &request.body {
            req = req.body(body.clone());
        }

        let start = Instant::now();
        let resp = req
            .send()
            .await
            .map_err(|source| ClientError::RequestSend {
                method,
                url: request.path.clone(),
                source,
            })?;
        let status = resp.status();
        let content = resp.bytes().await.map_err(ClientError::Bytes)?;
        let lag = start.elapsed();

        if !status.is_success() {
            return Err(ClientError::ApiError {
                code: status,
                message: String::from_utf8_lossy(&content).into_owned(),
            });
        }
        if self.options.debug >= 3 {
            info!(
                id = query.id,
                response = %String::from_utf8_lossy(&content),
                "response body"
            );
        }
        if self.options.print_responses {
            println!(
                "ID {}: {}\n{}",
                query.id,
                query.human_label,
                pretty_response(&content)
            );
        }
        Ok(lag)
    }
}

/// Indented JSON, or the raw text when the body is not JSON
fn pretty_response(content: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(content)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| String::from_utf8_lossy(content).into_owned())
}
