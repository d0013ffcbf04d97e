//! Loading line points into Prometheus through remote write.

pub mod batch;
pub mod creator;
pub mod decoder;
pub mod prompb;
pub mod processor;
pub mod storage;
pub mod writer;

use std::sync::Arc;

use tsbs_load::{Benchmark, HashIndexer, InputReader, PointIndexer};

use self::{
    batch::{LineBatch, LineBatchFactory},
    creator::PromCreator,
    decoder::{LineDecoder, LinePoint},
    processor::PromProcessor,
    storage::PromStorage,
};

/// The Prometheus load backend; every worker shares one [`PromStorage`]
#[derive(Debug, Clone)]
pub struct PrometheusBenchmark {
    storage: Arc<PromStorage>,
    skip_ready_check: bool,
}

impl PrometheusBenchmark {
    pub fn new(storage: PromStorage) -> Self {
        Self {
            storage: Arc::new(storage),
            skip_ready_check: false,
        }
    }

    /// Do not wait for `/-/ready` before loading
    pub fn with_skip_ready_check(mut self, skip: bool) -> Self {
        self.skip_ready_check = skip;
        self
    }

    pub fn storage(&self) -> &Arc<PromStorage> {
        &self.storage
    }
}

impl Benchmark for PrometheusBenchmark {
    type Point = LinePoint;
    type Batch = LineBatch;
    type Decoder = LineDecoder;
    type Factory = LineBatchFactory;
    type Processor = PromProcessor;
    type Creator = PromCreator;

    fn point_decoder(&self, input: InputReader) -> LineDecoder {
        LineDecoder::new(input)
    }

    fn batch_factory(&self) -> LineBatchFactory {
        LineBatchFactory
    }

    fn point_indexer(&self, partitions: usize) -> Box<dyn PointIndexer<LinePoint>> {
        Box::new(HashIndexer::new(partitions))
    }

    fn processor(&self) -> PromProcessor {
        PromProcessor::new(Arc::clone(&self.storage))
    }

    fn db_creator(&self) -> PromCreator {
        PromCreator::new(Arc::clone(&self.storage), self.skip_ready_check)
    }
}
