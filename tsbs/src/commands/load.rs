use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::{ArgAction, Parser};
use secrecy::{ExposeSecret, Secret};
use tracing::info;
use tsbs_load::{BenchmarkRunner, LoadSummary, RunnerConfig};
use tsbs_prometheus::load::{PrometheusBenchmark, storage::PromStorage};
use url::Url;

use super::common::{Backend, open_input};

#[derive(Debug, Parser)]
pub(crate) struct Config {
    /// Storage system to load into
    #[clap(long = "backend", env = "TSBS_BACKEND", value_enum, default_value_t)]
    backend: Backend,

    /// File to read points from, one `<tags> <metrics> <timestamp>` line per point
    ///
    /// Reads from stdin when not given.
    #[clap(short = 'f', long = "file", env = "TSBS_FILE")]
    file: Option<PathBuf>,

    /// Base URL of the storage system
    #[clap(
        long = "url",
        env = "TSBS_URL",
        default_value = "http://localhost:9090"
    )]
    url: Url,

    /// Path of the write endpoint, relative to `--url`
    #[clap(
        long = "write-path",
        env = "TSBS_WRITE_PATH",
        default_value = "/api/v1/write"
    )]
    write_path: String,

    /// Bearer token sent with every request
    #[clap(long = "token", env = "TSBS_TOKEN")]
    token: Option<Secret<String>>,

    /// Name of the database to create and load into
    #[clap(long = "db-name", env = "TSBS_DB_NAME", default_value = "benchmark")]
    db_name: String,

    /// Number of points per batch
    #[clap(long = "batch-size", env = "TSBS_BATCH_SIZE", default_value_t = 10_000)]
    batch_size: usize,

    /// Number of concurrent workers
    #[clap(long = "workers", env = "TSBS_WORKERS", default_value_t = 1)]
    workers: usize,

    /// Stop after this many points; 0 loads the whole input
    #[clap(long = "limit", env = "TSBS_LIMIT", default_value_t = 0)]
    limit: u64,

    /// Write the points; `false` runs the pipeline without touching the storage system
    #[clap(
        long = "do-load",
        env = "TSBS_DO_LOAD",
        action = ArgAction::Set,
        default_value_t = true
    )]
    do_load: bool,

    /// Create the database before loading
    #[clap(
        long = "do-create-db",
        env = "TSBS_DO_CREATE_DB",
        action = ArgAction::Set,
        default_value_t = true
    )]
    do_create_db: bool,

    /// Fail when the database already exists instead of replacing it
    #[clap(
        long = "do-abort-on-exist",
        env = "TSBS_DO_ABORT_ON_EXIST",
        action = ArgAction::Set,
        default_value_t = false
    )]
    do_abort_on_exist: bool,

    /// Give every worker its own queue and route points to workers by hashing their tags
    #[clap(long = "hash-workers", env = "TSBS_HASH_WORKERS")]
    hash_workers: bool,

    /// Number of batches a worker queue holds before reading pauses
    #[clap(long = "queue-capacity", env = "TSBS_QUEUE_CAPACITY", default_value_t = 4)]
    queue_capacity: usize,

    /// Period of the progress report; 0s disables it
    #[clap(
        long = "reporting-period",
        env = "TSBS_REPORTING_PERIOD",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    reporting_period: Duration,

    /// Do not check that the storage system is ready before loading
    #[clap(long = "skip-ready-check", env = "TSBS_SKIP_READY_CHECK")]
    skip_ready_check: bool,
}

impl Config {
    fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            db_name: self.db_name.clone(),
            batch_size: self.batch_size,
            workers: self.workers,
            limit: self.limit,
            do_load: self.do_load,
            do_create_db: self.do_create_db,
            do_abort_on_exist: self.do_abort_on_exist,
            hash_workers: self.hash_workers,
            queue_capacity: self.queue_capacity,
            reporting_period: (!self.reporting_period.is_zero()).then_some(self.reporting_period),
        }
    }
}

pub(crate) async fn command(config: Config) -> anyhow::Result<()> {
    let input = open_input(config.file.as_deref()).await?;
    let runner = BenchmarkRunner::new(config.runner_config());
    info!(
        backend = ?config.backend,
        url = %config.url,
        workers = config.workers,
        batch_size = config.batch_size,
        "starting load"
    );

    let summary: LoadSummary = match config.backend {
        Backend::Prometheus => {
            let mut storage = PromStorage::new(config.url.clone(), &config.write_path)
                .context("error creating the storage handle")?;
            if let Some(token) = &config.token {
                storage = storage.with_auth_token(token.expose_secret().as_str());
            }
            let benchmark =
                PrometheusBenchmark::new(storage).with_skip_ready_check(config.skip_ready_check);
            runner
                .run(&benchmark, input)
                .await
                .context("error loading points")?
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
        let config = Config::parse_from(["load"]);
        let runner = config.runner_config();
        assert_eq!(10_000, runner.batch_size);
        assert_eq!(1, runner.workers);
        assert!(runner.do_load);
        assert!(runner.do_create_db);
        assert!(!runner.do_abort_on_exist);
        assert!(!runner.hash_workers);
        assert_eq!(4, runner.queue_capacity);
        assert_eq!(Some(Duration::from_secs(10)), runner.reporting_period);
    }

    #[test]
    fn zero_period_disables_reporting() {
        let config = Config::parse_from([
            "load",
            "--reporting-period",
            "0s",
            "--do-load",
            "false",
            "--hash-workers",
        ]);
        let runner = config.runner_config();
        assert_eq!(None, runner.reporting_period);
        assert!(!runner.do_load);
        assert!(runner.hash_workers);
    }
}
