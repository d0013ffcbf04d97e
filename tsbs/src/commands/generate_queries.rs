use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::info;
use tsbs_prometheus::query::PrometheusDevops;
use tsbs_query::{
    TimeInterval,
    devops::{DevopsCore, QueryType},
    generator::QueryGenerator,
};

use super::common::Backend;

#[derive(Debug, Parser)]
pub(crate) struct Config {
    /// Storage system to render the queries for
    #[clap(long = "backend", env = "TSBS_BACKEND", value_enum, default_value_t)]
    backend: Backend,

    /// Query type to generate, e.g. `single-groupby-1-1-1` or `lastpoint`
    #[clap(long = "query-type", env = "TSBS_QUERY_TYPE")]
    query_type: String,

    /// Number of queries to generate
    #[clap(long = "queries", env = "TSBS_QUERIES", default_value_t = 1000)]
    queries: u64,

    /// Number of hosts the data set was generated for
    #[clap(long = "scale", env = "TSBS_SCALE", default_value_t = 1)]
    scale: usize,

    /// Seed of the random generator; a random seed is chosen and logged when not given
    #[clap(long = "seed", env = "TSBS_SEED")]
    seed: Option<u64>,

    /// Beginning of the data set's time range, RFC3339
    #[clap(
        long = "timestamp-start",
        env = "TSBS_TIMESTAMP_START",
        default_value = "2016-01-01T00:00:00Z"
    )]
    timestamp_start: DateTime<Utc>,

    /// End of the data set's time range, RFC3339
    #[clap(
        long = "timestamp-end",
        env = "TSBS_TIMESTAMP_END",
        default_value = "2016-01-02T06:00:00Z"
    )]
    timestamp_end: DateTime<Utc>,

    /// File to write the corpus to; stdout when not given
    #[clap(short = 'f', long = "file", env = "TSBS_FILE")]
    file: Option<PathBuf>,
}

pub(crate) async fn command(config: Config) -> anyhow::Result<()> {
    let query_type: QueryType = config.query_type.parse().with_context(|| {
        format!(
            "known query types are: {}",
            QueryType::names().collect::<Vec<_>>().join(", ")
        )
    })?;
    let interval = TimeInterval::new(config.timestamp_start, config.timestamp_end)?;
    let seed = config.seed.unwrap_or_else(rand::random);
    info!(seed, %query_type, scale = config.scale, "generating queries");

    let core = DevopsCore::new(interval, config.scale, seed)?;
    let Config {
        backend,
        queries,
        file,
        ..
    } = config;

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let out: Box<dyn Write + Send> = match &file {
            Some(path) => Box::new(
                File::create(path)
                    .with_context(|| format!("error creating {}", path.display()))?,
            ),
            None => Box::new(std::io::stdout()),
        };
        let out = BufWriter::new(out);
        match backend {
            Backend::Prometheus => {
                QueryGenerator::new(PrometheusDevops::new(core), query_type)
                    .write_corpus(queries, out)?;
            }
        }
        Ok(())
    })
    .await
    .context("query generation did not complete")??;

    Ok(())
}
