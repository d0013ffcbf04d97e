//! Generation and replay of the query half of the benchmark.
//!
//! Queries are generated offline from a seeded [`devops::DevopsCore`] and written as a JSON Lines
//! corpus of [`QuerySpec`]s. The [`runner::QueryRunner`] later reads that corpus back, replays it
//! against the backend from a pool of workers and aggregates latencies per query label.

pub mod corpus;
pub mod devops;
pub mod generator;
pub mod http;
pub mod interval;
pub mod runner;
pub mod stats;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use http::HttpQuery;
pub use interval::TimeInterval;

/// Boxed error produced by backend query processors
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid time range: start {start} is not before end {end}")]
    InvalidTimeRange { start: String, end: String },

    #[error("timestamp {0} cannot be represented with nanosecond precision")]
    TimestampOutOfRange(String),

    #[error("impossible random window: window of {window:?} does not fit in a range of {range:?}")]
    ImpossibleRandomWindow { window: Duration, range: Duration },

    #[error("number of hosts ({requested}) cannot exceed the scale ({scale})")]
    TooManyHosts { requested: usize, scale: usize },

    #[error("number of metrics must be between 1 and {max}, got {requested}")]
    InvalidMetricCount { requested: usize, max: usize },

    #[error("unknown query type '{0}'")]
    UnknownQueryType(String),

    #[error("at least one endpoint url is required")]
    NoEndpoints,

    #[error("invalid query configuration: {0}")]
    Config(String),

    #[error("error reading query corpus: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed query on corpus line {line}: {source}")]
    Corpus {
        line: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("error encoding query: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("error creating latency histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),

    #[error("query worker {worker} failed to start: {source}")]
    WorkerInit {
        worker: usize,
        #[source]
        source: BoxError,
    },

    #[error("query worker failed to complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A single executed query that did not complete successfully
#[derive(Debug, thiserror::Error)]
#[error("query {id} ({label}) failed: {source}")]
pub struct QueryError {
    pub id: u64,
    pub label: String,
    #[source]
    pub source: BoxError,
}

/// One entry of a query corpus
///
/// The request type is chosen by the backend; HTTP backends use [`HttpQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec<R> {
    pub id: u64,
    pub human_label: String,
    pub human_description: String,
    pub request: R,
}

impl<R> QuerySpec<R> {
    pub fn new(
        human_label: impl Into<String>,
        human_description: impl Into<String>,
        request: R,
    ) -> Self {
        Self {
            id: 0,
            human_label: human_label.into(),
            human_description: human_description.into(),
            request,
        }
    }

    pub fn with_id(self, id: u64) -> Self {
        Self { id, ..self }
    }
}
