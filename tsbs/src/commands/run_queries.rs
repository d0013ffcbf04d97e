use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use secrecy::Secret;
use tracing::info;
use tsbs_prometheus::query::{ClientOptions, HttpQueryProcessor};
use tsbs_query::{
    HttpQuery,
    corpus::CorpusReader,
    runner::{QueryRunner, RunnerConfig},
};
use url::Url;

use super::common::{Backend, SeparatedList, open_input};

#[derive(Debug, Parser)]
pub(crate) struct Config {
    /// Storage system the corpus was generated for
    #[clap(long = "backend", env = "TSBS_BACKEND", value_enum, default_value_t)]
    backend: Backend,

    /// Query corpus to replay; stdin when not given
    #[clap(short = 'f', long = "file", env = "TSBS_FILE")]
    file: Option<PathBuf>,

    /// Comma separated endpoint URLs; worker `w` queries endpoint `w % count`
    #[clap(
        long = "urls",
        env = "TSBS_URLS",
        default_value = "http://localhost:9090"
    )]
    urls: SeparatedList<Url>,

    /// Bearer token sent with every request
    #[clap(long = "token", env = "TSBS_TOKEN")]
    token: Option<Secret<String>>,

    /// Number of concurrent workers
    #[clap(long = "workers", env = "TSBS_WORKERS", default_value_t = 1)]
    workers: usize,

    /// Stop after this many queries; 0 replays the whole corpus
    #[clap(long = "limit", env = "TSBS_LIMIT", default_value_t = 0)]
    limit: u64,

    /// Number of leading queries left out of the statistics
    #[clap(long = "burn-in", env = "TSBS_BURN_IN", default_value_t = 0)]
    burn_in: u64,

    /// Log intermediate statistics every this many queries; 0 disables
    #[clap(long = "print-interval", env = "TSBS_PRINT_INTERVAL", default_value_t = 100)]
    print_interval: u64,

    /// Request logging: 1 logs requests, 2 adds request bodies, 3 adds responses
    #[clap(
        long = "debug",
        env = "TSBS_DEBUG",
        default_value_t = 0,
        value_parser = clap::value_parser!(u8).range(0..=3)
    )]
    debug: u8,

    /// Pretty print every response to stdout
    #[clap(long = "print-responses", env = "TSBS_PRINT_RESPONSES")]
    print_responses: bool,
}

impl Config {
    fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            workers: self.workers,
            limit: self.limit,
            burn_in: self.burn_in,
            print_interval: self.print_interval,
            ..Default::default()
        }
    }
}

pub(crate) async fn command(config: Config) -> anyhow::Result<()> {
    let runner = QueryRunner::new(config.runner_config());
    let urls: Arc<[Url]> = config.urls.into_iter().collect();
    if urls.is_empty() {
        return Err(tsbs_query::Error::NoEndpoints.into());
    }
    let input = open_input(config.file.as_deref()).await?;
    info!(
        backend = ?config.backend,
        endpoints = urls.len(),
        workers = config.workers,
        "running queries"
    );

    let summary = match config.backend {
        Backend::Prometheus => {
            let options = ClientOptions {
                debug: config.debug,
                print_responses: config.print_responses,
            };
            let token = config.token;
            let queries = CorpusReader::<_, HttpQuery>::new(input).into_stream();
            runner
                .run(
                    |_worker| {
                        Ok(HttpQueryProcessor::new(Arc::clone(&urls), options)
                            .with_auth_token(token.clone()))
                    },
                    queries,
                )
                .await
                .context("error running queries")?
        }
    };

    println!("{summary}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::parse_from(["run-queries"]);
        let runner = config.runner_config();
        assert_eq!(1, runner.workers);
        assert_eq!(0, runner.limit);
        assert_eq!(0, runner.burn_in);
        assert_eq!(100, runner.print_interval);
        assert_eq!(1, config.urls.0.len());
        assert_eq!(0, config.debug);
    }

    #[test]
    fn debug_level_is_bounded() {
        assert!(Config::try_parse_from(["run-queries", "--debug", "3"]).is_ok());
        assert!(Config::try_parse_from(["run-queries", "--debug", "4"]).is_err());
    }
}
