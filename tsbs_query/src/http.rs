use serde::{Deserialize, Serialize};

/// A query executed as a single HTTP request against the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpQuery {
    pub method: String,
    /// Path and query string, relative to the endpoint url
    pub path: String,
    #[serde(default)]
    pub body: Option<String>,
}

impl HttpQuery {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.into(),
            body: None,
        }
    }
}
