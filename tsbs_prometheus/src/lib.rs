//! The Prometheus backend of the benchmark harness.
//!
//! [`load`] writes points through the remote-write protocol and [`query`] renders the devops
//! queries as PromQL HTTP requests and executes them against the query API.

pub mod load;
pub mod query;

/// Name of the backend as it appears in query labels
pub const BACKEND_NAME: &str = "Prometheus";
