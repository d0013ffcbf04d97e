use tsbs_load::{Batch, BatchFactory};

use super::decoder::LinePoint;

#[derive(Debug, Default)]
pub struct LineBatch {
    points: Vec<LinePoint>,
    metrics: u64,
}

impl LineBatch {
    pub fn points(&self) -> &[LinePoint] {
        &self.points
    }
}

impl Batch for LineBatch {
    type Point = LinePoint;

    fn len(&self) -> usize {
        self.points.len()
    }

    fn metric_count(&self) -> u64 {
        self.metrics
    }

    fn append(&mut self, point: LinePoint) {
        self.metrics += point.metric_count();
        self.points.push(point);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LineBatchFactory;

impl BatchFactory for LineBatchFactory {
    type Batch = LineBatch;

    fn new_batch(&self) -> LineBatch {
        LineBatch::default()
    }
}
