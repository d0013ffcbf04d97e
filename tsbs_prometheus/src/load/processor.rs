use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use tsbs_load::{Batch, BatchStats, BoxError, Processor};

use super::{batch::LineBatch, storage::PromStorage, writer::DbWriter};

/// Writes the batches of one worker
#[derive(Debug)]
pub struct PromProcessor {
    storage: Arc<PromStorage>,
    writer: Option<DbWriter>,
    worker: usize,
}

impl PromProcessor {
    pub fn new(storage: Arc<PromStorage>) -> Self {
        Self {
            storage,
            writer: None,
            worker: 0,
        }
    }
}

#[async_trait]
impl Processor for PromProcessor {
    type Batch = LineBatch;

    async fn init(&mut self, worker: usize, _is_first: bool) -> Result<(), BoxError> {
        self.worker = worker;
        self.writer = Some(DbWriter::new(Arc::clone(&self.storage)));
        Ok(())
    }

    async fn process_batch(
        &mut self,
        batch: LineBatch,
        do_load: bool,
    ) -> Result<BatchStats, BoxError> {
        let stats = BatchStats {
            metrics: batch.metric_count(),
            rows: batch.len() as u64,
        };
        if !do_load {
            return Ok(stats);
        }

        let writer = self.writer.as_ref().ok_or("processor used before init")?;
        let latency = writer.write(batch.points()).await?;
        debug!(
            worker = self.worker,
            rows = stats.rows,
            latency_ms = latency.as_secs_f64() * 1000.0,
            "batch written"
        );
        Ok(stats)
    }

    async fn close(&mut self, _do_load: bool) -> Result<(), BoxError> {
        self.writer = None;
        Ok(())
    }
}
