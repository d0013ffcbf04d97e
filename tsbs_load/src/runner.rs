//! The worker pool that moves sealed batches from the producer to the backend processors.
//!
//! The producer runs on the calling task: it decodes points, picks a partition for each point,
//! appends it to that partition's open batch and sends the batch once it is full. Every worker
//! task owns one [`Processor`] and pulls batches from its queue in FIFO order. The queues are
//! bounded, so a slow backend suspends the producer once a queue fills up.

use std::{mem, sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, mpsc},
    task::JoinSet,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    Batch, BatchFactory, Benchmark, BoxError, DbCreator, Error, InputReader, PointDecoder,
    Processor, Result,
    indexer::{ConstantIndexer, PointIndexer},
    report::{LoadCounters, LoadSummary, ProgressReporter},
};

/// How sealed batches are distributed over the workers
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// One queue shared by every worker; the point indexer is not consulted
    #[default]
    Single,
    /// One queue per worker; the backend's point indexer chooses the queue
    PerWorker,
}

/// Settings of a single load run
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Name of the database to create and load into
    pub db_name: String,
    /// Number of points per batch
    pub batch_size: usize,
    /// Number of concurrent workers
    pub workers: usize,
    /// Stop after this many points have been read; 0 reads the whole input
    pub limit: u64,
    /// When `false`, run the pipeline without writing anything to the backend
    pub do_load: bool,
    /// Create the database before loading
    pub do_create_db: bool,
    /// Fail instead of replacing a database that already exists
    pub do_abort_on_exist: bool,
    /// Partition points over per-worker queues with the backend's hashing indexer
    pub hash_workers: bool,
    /// Number of sealed batches a queue holds before the producer waits
    pub queue_capacity: usize,
    /// Log throughput at this period while the run is in progress
    pub reporting_period: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            db_name: "benchmark".to_string(),
            batch_size: 10_000,
            workers: 1,
            limit: 0,
            do_load: true,
            do_create_db: true,
            do_abort_on_exist: false,
            hash_workers: false,
            queue_capacity: 4,
            reporting_period: Some(Duration::from_secs(10)),
        }
    }
}

impl RunnerConfig {
    pub fn queue_mode(&self) -> QueueMode {
        if self.hash_workers {
            QueueMode::PerWorker
        } else {
            QueueMode::Single
        }
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("the number of workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("the batch size must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("the queue capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Drives a load run for any [`Benchmark`]
#[derive(Debug, Clone)]
pub struct BenchmarkRunner {
    config: RunnerConfig,
}

impl BenchmarkRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Load everything readable from `input` into the backend described by `benchmark`
    ///
    /// Once database setup has started, the database creator is closed before this returns,
    /// whether the run succeeded or not. A dry run never touches the database creator.
    pub async fn run<B: Benchmark>(&self, benchmark: &B, input: InputReader) -> Result<LoadSummary> {
        self.config.validate()?;

        if !self.config.do_load {
            return self.load(benchmark, input).await;
        }

        let mut creator = benchmark.db_creator();
        let result = match self.setup_db(&mut creator).await {
            Ok(()) => self.load(benchmark, input).await,
            Err(e) => Err(e),
        };

        let closed = creator.close().await.map_err(setup_error("close"));
        let summary = result?;
        closed?;
        Ok(summary)
    }

    async fn setup_db<C: DbCreator>(&self, creator: &mut C) -> Result<()> {
        let db_name = self.config.db_name.as_str();
        creator.init().await.map_err(setup_error("init"))?;
        if !self.config.do_create_db {
            return Ok(());
        }

        if creator
            .db_exists(db_name)
            .await
            .map_err(setup_error("db_exists"))?
        {
            if self.config.do_abort_on_exist {
                return Err(Error::DatabaseExists(db_name.to_string()));
            }
            info!(db_name, "removing existing database");
            creator
                .remove_old_db(db_name)
                .await
                .map_err(setup_error("remove_old_db"))?;
        }

        creator
            .create_db(db_name)
            .await
            .map_err(setup_error("create_db"))?;
        debug!(db_name, "database created");
        Ok(())
    }

    async fn load<B: Benchmark>(&self, benchmark: &B, input: InputReader) -> Result<LoadSummary> {
        let config = &self.config;
        let counters = Arc::new(LoadCounters::default());
        let abort = CancellationToken::new();
        let start = Instant::now();
        let reporter = config
            .reporting_period
            .filter(|p| !p.is_zero())
            .map(|period| ProgressReporter::spawn(Arc::clone(&counters), period, start));

        let (senders, queues) =
            build_queues(config.queue_mode(), config.workers, config.queue_capacity);
        let mut workers = JoinSet::new();
        for (worker, queue) in queues.into_iter().enumerate() {
            workers.spawn(run_worker(
                worker,
                benchmark.processor(),
                queue,
                Arc::clone(&counters),
                config.do_load,
                abort.clone(),
            ));
        }
        info!(
            workers = config.workers,
            batch_size = config.batch_size,
            mode = ?config.queue_mode(),
            do_load = config.do_load,
            "started load workers"
        );

        let produced = self.produce(benchmark, input, senders, &abort).await;

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined.map_err(Error::from).and_then(|r| r) {
                if failure.is_none() {
                    failure = Some(e);
                } else {
                    warn!(error = %e, "additional worker failure");
                }
            }
        }
        let elapsed = start.elapsed();
        if let Some(reporter) = reporter {
            reporter.stop().await;
        }

        // a failed worker is what stops the producer early, so it is reported first
        if let Some(e) = failure {
            return Err(e);
        }
        produced?;

        let totals = counters.snapshot();
        Ok(LoadSummary {
            metrics: totals.metrics,
            rows: totals.rows,
            elapsed,
            workers: config.workers,
        })
    }

    /// Decode, index and batch points until the input or the limit is exhausted
    ///
    /// The senders are dropped on return, which closes the queues and lets the workers finish.
    async fn produce<B: Benchmark>(
        &self,
        benchmark: &B,
        input: InputReader,
        senders: Vec<mpsc::Sender<B::Batch>>,
        abort: &CancellationToken,
    ) -> Result<()> {
        let config = &self.config;
        let partitions = senders.len();
        let mut decoder = benchmark.point_decoder(input);
        let factory = benchmark.batch_factory();
        let mut indexer: Box<dyn PointIndexer<B::Point>> = match config.queue_mode() {
            QueueMode::Single => Box::new(ConstantIndexer),
            QueueMode::PerWorker => benchmark.point_indexer(partitions),
        };
        let mut batches: Vec<B::Batch> = (0..partitions).map(|_| factory.new_batch()).collect();

        let mut read = 0u64;
        loop {
            if config.limit > 0 && read >= config.limit {
                debug!(limit = config.limit, "point limit reached");
                break;
            }
            let Some(point) = decoder.decode().await? else {
                break;
            };
            read += 1;

            let index = indexer.index(&point);
            if index >= partitions {
                return Err(Error::IndexOutOfRange { index, partitions });
            }
            let batch = &mut batches[index];
            batch.append(point);
            if batch.len() >= config.batch_size {
                let sealed = mem::replace(batch, factory.new_batch());
                if !dispatch(&senders[index], sealed, abort).await {
                    // the failing worker reports why when it is joined
                    return Ok(());
                }
            }
        }

        for (index, batch) in batches.into_iter().enumerate() {
            if !batch.is_empty() && !dispatch(&senders[index], batch, abort).await {
                break;
            }
        }
        debug!(points = read, "producer finished");
        Ok(())
    }
}

fn setup_error(step: &'static str) -> impl FnOnce(BoxError) -> Error {
    move |source| Error::DatabaseSetup { step, source }
}

/// Send a sealed batch, returning `false` if the run was aborted or the queue is gone
async fn dispatch<T>(sender: &mpsc::Sender<T>, batch: T, abort: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = abort.cancelled() => false,
        sent = sender.send(batch) => sent.is_ok(),
    }
}

enum WorkerQueue<T> {
    Owned(mpsc::Receiver<T>),
    Shared(Arc<Mutex<mpsc::Receiver<T>>>),
}

impl<T> WorkerQueue<T> {
    async fn next(&mut self) -> Option<T> {
        match self {
            Self::Owned(rx) => rx.recv().await,
            Self::Shared(rx) => rx.lock().await.recv().await,
        }
    }
}

fn build_queues<T>(
    mode: QueueMode,
    workers: usize,
    capacity: usize,
) -> (Vec<mpsc::Sender<T>>, Vec<WorkerQueue<T>>) {
    match mode {
        QueueMode::Single => {
            let (tx, rx) = mpsc::channel(capacity);
            let shared = Arc::new(Mutex::new(rx));
            let queues = (0..workers)
                .map(|_| WorkerQueue::Shared(Arc::clone(&shared)))
                .collect();
            (vec![tx], queues)
        }
        QueueMode::PerWorker => (0..workers)
            .map(|_| {
                let (tx, rx) = mpsc::channel(capacity);
                (tx, WorkerQueue::Owned(rx))
            })
            .unzip(),
    }
}

async fn run_worker<P: Processor>(
    worker: usize,
    mut processor: P,
    mut queue: WorkerQueue<P::Batch>,
    counters: Arc<LoadCounters>,
    do_load: bool,
    abort: CancellationToken,
) -> Result<()> {
    let outcome: Result<usize, BoxError> = async {
        processor.init(worker, worker == 0).await?;
        let mut batches = 0;
        while let Some(batch) = queue.next().await {
            let stats = processor.process_batch(batch, do_load).await?;
            counters.add(stats);
            batches += 1;
        }
        processor.close(do_load).await?;
        Ok(batches)
    }
    .await;

    match outcome {
        Ok(batches) => {
            debug!(worker, batches, "worker finished");
            Ok(())
        }
        Err(source) => {
            abort.cancel();
            Err(Error::Worker { worker, source })
        }
    }
}
