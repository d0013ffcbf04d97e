//! Querying Prometheus through its HTTP API.

pub mod client;
pub mod devops;
pub mod processor;

pub use client::{ClientError, ClientOptions, HttpClient};
pub use devops::PrometheusDevops;
pub use processor::HttpQueryProcessor;
