//! Policies that map a point to the worker queue it is written from.

use std::fmt::Debug;

use twox_hash::XxHash64;

/// Maps a point to a partition in `[0, partitions)`
pub trait PointIndexer<P>: Debug + Send {
    fn index(&mut self, point: &P) -> usize;
}

/// Sends every point to partition 0, keeping one global write order
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantIndexer;

impl<P> PointIndexer<P> for ConstantIndexer {
    fn index(&mut self, _point: &P) -> usize {
        0
    }
}

/// Exposes the stable entity key of a point, e.g. its tag set
pub trait PartitionKey {
    fn partition_key(&self) -> &[u8];
}

/// Hashes the entity key of each point so that all points of one entity land on the same
/// partition, preserving per-entity order while spreading entities across workers
#[derive(Debug, Clone, Copy)]
pub struct HashIndexer {
    partitions: u64,
}

const HASH_SEED: u64 = 0;

impl HashIndexer {
    /// Create a [`HashIndexer`] over `partitions` partitions; zero is treated as one
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1) as u64,
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions as usize
    }
}

impl<P: PartitionKey> PointIndexer<P> for HashIndexer {
    fn index(&mut self, point: &P) -> usize {
        let hash = XxHash64::oneshot(HASH_SEED, point.partition_key());
        (hash % self.partitions) as usize
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;

    use super::*;

    struct Keyed(String);

    impl PartitionKey for Keyed {
        fn partition_key(&self) -> &[u8] {
            self.0.as_bytes()
        }
    }

    #[test]
    fn constant_indexer_always_zero() {
        let mut indexer = ConstantIndexer;
        for i in 0..100 {
            assert_eq!(0, indexer.index(&Keyed(format!("host_{i}"))));
        }
    }

    #[test]
    fn hash_indexer_is_stable_per_entity() {
        let mut indexer = HashIndexer::new(4);
        let mut seen = HashMap::new();
        for round in 0..3 {
            for i in 0..50 {
                let key = format!("cpu,hostname=host_{i}");
                let idx = indexer.index(&Keyed(key.clone()));
                let first = *seen.entry(key).or_insert(idx);
                assert_eq!(first, idx, "entity moved partitions on round {round}");
            }
        }
        // 50 entities over 4 partitions should not all collapse onto one
        let used: std::collections::HashSet<_> = seen.values().collect();
        assert!(used.len() > 1);
    }

    #[test]
    fn hash_indexer_zero_partitions() {
        let mut indexer = HashIndexer::new(0);
        assert_eq!(1, indexer.partitions());
        assert_eq!(0, indexer.index(&Keyed("anything".into())));
    }

    proptest! {
        #[test]
        fn hash_indexer_in_range(key in ".*", partitions in 1usize..64) {
            let mut indexer = HashIndexer::new(partitions);
            prop_assert!(indexer.index(&Keyed(key)) < partitions);
        }
    }
}
