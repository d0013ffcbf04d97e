use std::sync::Arc;

use async_trait::async_trait;
use secrecy::Secret;
use tsbs_query::{
    BoxError, HttpQuery, QuerySpec,
    runner::{QueryProcessor, endpoint_for_worker},
    stats::Stat,
};
use url::Url;

use super::client::{ClientOptions, HttpClient};

/// Runs the queries of one worker against the endpoint that worker is bound to
#[derive(Debug)]
pub struct HttpQueryProcessor {
    urls: Arc<[Url]>,
    options: ClientOptions,
    auth_token: Option<Secret<String>>,
    client: Option<HttpClient>,
}

impl HttpQueryProcessor {
    pub fn new(urls: Arc<[Url]>, options: ClientOptions) -> Self {
        Self {
            urls,
            options,
            auth_token: None,
            client: None,
        }
    }

    pub fn with_auth_token(mut self, auth_token: Option<Secret<String>>) -> Self {
        self.auth_token = auth_token;
        self
    }

    /// The endpoint bound by `init`
    pub fn endpoint(&self) -> Option<&Url> {
        self.client.as_ref().map(HttpClient::base_url)
    }
}

#[async_trait]
impl QueryProcessor for HttpQueryProcessor {
    type Request = HttpQuery;

    async fn init(&mut self, worker: usize) -> Result<(), BoxError> {
        let url = endpoint_for_worker(&self.urls, worker)?;
        let mut client = HttpClient::new(url.clone(), self.options)?;
        if let Some(token) = self.auth_token.clone() {
            client = client.with_auth_token(token);
        }
        self.client = Some(client);
        Ok(())
    }

    async fn process_query(&mut self, query: &QuerySpec<HttpQuery>) -> Result<Vec<Stat>, BoxError> {
        let client = self.client.as_ref().ok_or("processor used before init")?;
        let lag = client.execute(query).await?;
        Ok(vec![Stat::new(query.human_label.as_str(), lag)])
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;

    use super::*;

    fn urls(urls: &[&str]) -> Arc<[Url]> {
        urls.iter().map(|u| u.parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn workers_bind_endpoints_round_robin() {
        let urls = urls(&["http://a.example:9090", "http://b.example:9090"]);
        let mut bound = Vec::new();
        for worker in 0..4 {
            let mut processor = HttpQueryProcessor::new(Arc::clone(&urls), ClientOptions::default());
            processor.init(worker).await.unwrap();
            bound.push(processor.endpoint().unwrap().host_str().unwrap().to_string());
        }
        assert_eq!(
            vec!["a.example", "b.example", "a.example", "b.example"],
            bound
        );
    }

    #[tokio::test]
    async fn no_endpoints_fails_init() {
        let mut processor = HttpQueryProcessor::new(urls(&[]), ClientOptions::default());
        assert!(processor.init(0).await.is_err());
    }

    #[tokio::test]
    async fn query_yields_one_stat_under_its_label() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let url = server.url();
        let mut processor = HttpQueryProcessor::new(urls(&[url.as_str()]), ClientOptions::default());
        processor.init(0).await.unwrap();
        let spec = QuerySpec::new(
            "Prometheus last row per host",
            "Prometheus last row per host: cpu",
            HttpQuery::get("/api/v1/query?query=cpu&time=1.000"),
        );
        let stats = processor.process_query(&spec).await.unwrap();
        assert_eq!(1, stats.len());
        assert_eq!("Prometheus last row per host", &*stats[0].label);
        mock.assert_async().await;
    }
}
