//! Concurrent replay of a query corpus.

use std::{fmt::Display, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::{sync::mpsc, task::JoinSet, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    BoxError, Error, QueryError, QuerySpec, Result,
    stats::{Stat, StatsCollector},
};

/// Executes queries against the backend on behalf of one worker
///
/// A worker has at most one query in flight, so a processor never needs to synchronize with
/// itself.
#[async_trait]
pub trait QueryProcessor: Send + 'static {
    type Request: Send + Sync + 'static;

    async fn init(&mut self, worker: usize) -> Result<(), BoxError>;

    /// Execute `query` and return the latencies it produced
    async fn process_query(
        &mut self,
        query: &QuerySpec<Self::Request>,
    ) -> Result<Vec<Stat>, BoxError>;
}

/// The endpoint worker `worker` sends its queries to
pub fn endpoint_for_worker<T>(endpoints: &[T], worker: usize) -> Result<&T> {
    if endpoints.is_empty() {
        return Err(Error::NoEndpoints);
    }
    Ok(&endpoints[worker % endpoints.len()])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    pub workers: usize,
    /// Stop after this many queries; 0 replays the whole corpus
    pub limit: u64,
    /// Number of leading results left out of the statistics
    pub burn_in: u64,
    /// Log intermediate statistics every this many results; 0 disables
    pub print_interval: u64,
    /// Number of queries buffered per worker
    pub queue_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            limit: 0,
            burn_in: 0,
            print_interval: 100,
            queue_capacity: 1,
        }
    }
}

/// Outcome of a finished run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub queries: u64,
    pub workers: usize,
    pub elapsed: Duration,
    pub stats: StatsCollector,
}

impl RunSummary {
    pub fn query_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.queries as f64 / secs
        } else {
            0.0
        }
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "run complete after {} queries with {} workers (Overall query rate {:.2} queries/sec):",
            self.queries,
            self.workers,
            self.query_rate()
        )?;
        writeln!(f, "{}", self.stats)?;
        write!(f, "wall clock time: {:.6}sec", self.elapsed.as_secs_f64())
    }
}

enum Outcome {
    Done(Vec<Stat>),
    Failed(String),
}

/// Replays queries from a pool of workers and aggregates their latencies
#[derive(Debug, Clone, Copy)]
pub struct QueryRunner {
    config: RunnerConfig,
}

impl QueryRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Run every query from `queries`, sending query `i` to worker `i % workers`
    ///
    /// `make_processor` is called once per worker index. Failed queries are counted per label
    /// and do not stop the run; errors reading the corpus or setting up a worker do.
    pub async fn run<P, F, S>(&self, mut make_processor: F, queries: S) -> Result<RunSummary>
    where
        P: QueryProcessor,
        F: FnMut(usize) -> Result<P> + Send,
        S: Stream<Item = Result<QuerySpec<P::Request>>> + Send,
    {
        let config = self.config;
        if config.workers == 0 {
            return Err(Error::Config("the number of workers must be at least 1".into()));
        }
        if config.queue_capacity == 0 {
            return Err(Error::Config("the queue capacity must be at least 1".into()));
        }

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let collector = tokio::spawn(collect(
            outcome_rx,
            StatsCollector::new(config.burn_in)?,
            config.print_interval,
        ));

        let start = Instant::now();
        let mut senders = Vec::with_capacity(config.workers);
        let mut workers = JoinSet::new();
        for worker in 0..config.workers {
            let (tx, rx) = mpsc::channel(config.queue_capacity);
            senders.push(tx);
            workers.spawn(run_worker(
                worker,
                make_processor(worker)?,
                rx,
                outcome_tx.clone(),
            ));
        }
        drop(outcome_tx);

        let mut queries = std::pin::pin!(queries);
        let mut sent = 0u64;
        let mut read_error = None;
        while config.limit == 0 || sent < config.limit {
            let query = match queries.next().await {
                Some(Ok(query)) => Arc::new(query),
                Some(Err(e)) => {
                    read_error = Some(e);
                    break;
                }
                None => break,
            };
            let worker = (sent % config.workers as u64) as usize;
            if senders[worker].send(query).await.is_err() {
                // the worker stopped early; its error is reported when it is joined
                break;
            }
            sent += 1;
        }
        drop(senders);

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined.map_err(Error::from).and_then(|r| r) {
                failure.get_or_insert(e);
            }
        }
        let elapsed = start.elapsed();
        let stats = collector.await??;

        if let Some(e) = read_error.or(failure) {
            return Err(e);
        }
        Ok(RunSummary {
            queries: sent,
            workers: config.workers,
            elapsed,
            stats,
        })
    }
}

async fn run_worker<P: QueryProcessor>(
    worker: usize,
    mut processor: P,
    mut queue: mpsc::Receiver<Arc<QuerySpec<P::Request>>>,
    outcomes: mpsc::UnboundedSender<Outcome>,
) -> Result<()> {
    processor
        .init(worker)
        .await
        .map_err(|source| Error::WorkerInit { worker, source })?;

    let mut executed = 0u64;
    while let Some(query) = queue.recv().await {
        let outcome = match processor.process_query(&query).await {
            Ok(stats) => Outcome::Done(stats),
            Err(source) => {
                let e = QueryError {
                    id: query.id,
                    label: query.human_label.clone(),
                    source,
                };
                warn!(worker, error = %e, "query failed");
                Outcome::Failed(query.human_label.clone())
            }
        };
        executed += 1;
        if outcomes.send(outcome).is_err() {
            break;
        }
    }
    debug!(worker, executed, "query worker finished");
    Ok(())
}

async fn collect(
    mut outcomes: mpsc::UnboundedReceiver<Outcome>,
    mut stats: StatsCollector,
    print_interval: u64,
) -> Result<StatsCollector> {
    let mut received = 0u64;
    while let Some(outcome) = outcomes.recv().await {
        let was_warm = stats.warmed_up();
        match outcome {
            Outcome::Done(results) => stats.record(&results)?,
            Outcome::Failed(label) => stats.record_failure(&label)?,
        }
        received += 1;
        if !was_warm && stats.warmed_up() && received > 1 {
            info!(burn_in = received - 1, "burn-in complete");
        }
        if print_interval > 0 && received % print_interval == 0 && stats.warmed_up() {
            info!(queries = received, "after {received} queries:\n{stats}");
        }
    }
    Ok(stats)
}
