//! The backend independent half of a load benchmark.
//!
//! Data points are read from a buffered input stream by a [`PointDecoder`], grouped into
//! [`Batch`]es, routed to a worker by a [`PointIndexer`] and finally handed to a backend specific
//! [`Processor`] which writes them into the storage system under test. The
//! [`BenchmarkRunner`][runner::BenchmarkRunner] owns the worker pool and the bounded queues that
//! connect the producer to the workers.
//!
//! A backend plugs into the pipeline by implementing [`Benchmark`], which bundles the concrete
//! point, batch, decoder, processor and database creator types for that backend.

pub mod indexer;
pub mod report;
pub mod runner;

use std::{fmt::Debug, ops::AddAssign};

use async_trait::async_trait;
use tokio::io::AsyncBufRead;

pub use indexer::{ConstantIndexer, HashIndexer, PartitionKey, PointIndexer};
pub use report::LoadSummary;
pub use runner::{BenchmarkRunner, QueueMode, RunnerConfig};

/// Boxed error produced by backend adapters
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The input stream a [`PointDecoder`] reads from
pub type InputReader = Box<dyn AsyncBufRead + Unpin + Send>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid load configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("database '{0}' already exists and abort on exist was requested")]
    DatabaseExists(String),

    #[error("database setup failed during {step}: {source}")]
    DatabaseSetup {
        step: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("point indexer returned index {index} but there are only {partitions} partitions")]
    IndexOutOfRange { index: usize, partitions: usize },

    #[error("worker {worker} failed: {source}")]
    Worker {
        worker: usize,
        #[source]
        source: BoxError,
    },

    #[error("worker task failed to complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while turning the input stream into points
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("scan error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error on line {line}: line does not have 3 tuples, has {found}")]
    Arity { line: u64, found: usize },

    #[error("parse error on line {line}: {reason}")]
    Malformed { line: u64, reason: String },
}

/// Reads one point per call from the underlying input stream
#[async_trait]
pub trait PointDecoder: Send {
    type Point: Send;

    /// Decode the next point, returning `Ok(None)` once the input is cleanly exhausted
    async fn decode(&mut self) -> Result<Option<Self::Point>, DecodeError>;
}

/// A group of points that is written to the backend in a single call
///
/// A batch is filled by the producer and then moved, whole, to exactly one worker.
pub trait Batch: Debug + Send + 'static {
    type Point: Send;

    /// Number of points (rows) in the batch
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of metric fields across all points in the batch
    fn metric_count(&self) -> u64;

    fn append(&mut self, point: Self::Point);
}

/// Creates empty batches for the producer to fill
pub trait BatchFactory: Send {
    type Batch: Batch;

    fn new_batch(&self) -> Self::Batch;
}

/// Counts reported back by a [`Processor`] for a single batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub metrics: u64,
    pub rows: u64,
}

impl AddAssign for BatchStats {
    fn add_assign(&mut self, rhs: Self) {
        self.metrics += rhs.metrics;
        self.rows += rhs.rows;
    }
}

/// Writes batches into the backend on behalf of one worker
///
/// Each worker owns its processor; `init` is called once before the first batch and `close` once
/// after the worker's queue is drained.
#[async_trait]
pub trait Processor: Send + 'static {
    type Batch: Batch;

    async fn init(&mut self, worker: usize, is_first: bool) -> Result<(), BoxError>;

    /// Write the batch, returning only after the backend acknowledged it
    ///
    /// When `do_load` is `false` nothing is written and only the counts are returned.
    async fn process_batch(&mut self, batch: Self::Batch, do_load: bool)
    -> Result<BatchStats, BoxError>;

    async fn close(&mut self, do_load: bool) -> Result<(), BoxError>;
}

/// Prepares the target database before the workers start
#[async_trait]
pub trait DbCreator: Send + Sync {
    async fn init(&mut self) -> Result<(), BoxError>;

    async fn db_exists(&self, db_name: &str) -> Result<bool, BoxError>;

    async fn remove_old_db(&self, db_name: &str) -> Result<(), BoxError>;

    async fn create_db(&self, db_name: &str) -> Result<(), BoxError>;

    /// Release anything acquired for the run; called once, whatever the outcome of the run
    async fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// The set of types a backend provides to take part in a load run
pub trait Benchmark: Send + Sync {
    type Point: Send + 'static;
    type Batch: Batch<Point = Self::Point>;
    type Decoder: PointDecoder<Point = Self::Point>;
    type Factory: BatchFactory<Batch = Self::Batch>;
    type Processor: Processor<Batch = Self::Batch>;
    type Creator: DbCreator;

    fn point_decoder(&self, input: InputReader) -> Self::Decoder;

    fn batch_factory(&self) -> Self::Factory;

    /// Indexer used when points are partitioned across worker queues
    fn point_indexer(&self, partitions: usize) -> Box<dyn PointIndexer<Self::Point>>;

    fn processor(&self) -> Self::Processor;

    fn db_creator(&self) -> Self::Creator;
}
